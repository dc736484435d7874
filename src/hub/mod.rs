// Hub broker module
// Pairs clients with servers, fans frames between them, serves the live
// directory and read-only static data. Stateless w.r.t. simulation content.

pub mod broker;
pub mod directory;
pub mod http;
pub mod static_data;

pub use directory::{HubDirectory, ServerInfo};
pub use http::{router, HubState};
pub use static_data::{StaticData, StaticResource};
