// External-process plugin bridge
//
// Discovered modules run as child processes speaking line-delimited JSON on
// stdin/stdout, discriminated by the "$" field. The parent drives the child
// with init/sync/tick/pm; the child requests txt/addac/delac; addac is
// answered with acadded carrying the assigned id, malformed lines with err.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::constants::RESYNC_INTERVAL_SECS;
use crate::errors::SimnetResult;
use crate::model::aircraft::{Aircraft, AircraftMeta, AircraftMotion, AircraftState};
use crate::model::delta::AircraftDelta;
use crate::sim::plugin::{Plugin, SimulationHandle};

/// Aircraft data as a child supplies it; the id is assigned on this side.
#[derive(Debug, Deserialize)]
struct AircraftSeed {
    metadata: AircraftMeta,
    state: AircraftState,
    motion: AircraftMotion,
}

/// One child process wrapped as a plugin.
pub struct BridgePlugin {
    name: String,
    stdin: Arc<Mutex<ChildStdin>>,
    /// Held so the process dies with the plugin
    _child: Child,
}

impl BridgePlugin {
    /// Start the module, send init and the first sync, and wire up the
    /// request reader.
    pub async fn launch(path: &Path, handle: SimulationHandle) -> SimnetResult<BridgePlugin> {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "module".to_string());

        let mut child = Command::new(path)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| crate::errors::op_failed("module stdin not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| crate::errors::op_failed("module stdout not piped"))?;
        let stdin = Arc::new(Mutex::new(stdin));

        let plugin = BridgePlugin {
            name,
            stdin: Arc::clone(&stdin),
            _child: child,
        };

        let init = json!({
            "$": "init",
            "server": handle.server_id(),
        });
        plugin.write_line(&init.to_string()).await?;
        plugin.sync(&handle).await?;

        tokio::spawn(read_requests(stdout, Arc::clone(&stdin), handle.clone()));
        tokio::spawn(resync_loop(Arc::clone(&stdin), handle));

        Ok(plugin)
    }

    async fn write_line(&self, line: &str) -> SimnetResult<()> {
        write_line(&self.stdin, line).await
    }

    /// Push a complete server snapshot to the child.
    async fn sync(&self, handle: &SimulationHandle) -> SimnetResult<()> {
        let line = sync_line(handle).await?;
        self.write_line(&line).await
    }
}

#[async_trait]
impl Plugin for BridgePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "external process module"
    }

    fn maintainer(&self) -> &str {
        "external"
    }

    async fn process_text_message(&self, sender: Uuid, recipient: Uuid, message: &str) {
        let line = json!({
            "$": "pm",
            "from": sender,
            "to": recipient,
            "message": message,
        });
        if self.write_line(&line.to_string()).await.is_err() {
            debug!("module {} is gone; pm dropped", self.name);
        }
    }

    async fn tick(&self, dt: Duration) {
        let line = json!({
            "$": "tick",
            "dt": dt.as_secs_f64(),
        });
        if self.write_line(&line.to_string()).await.is_err() {
            debug!("module {} is gone; tick dropped", self.name);
        }
    }
}

async fn write_line(stdin: &Arc<Mutex<ChildStdin>>, line: &str) -> SimnetResult<()> {
    let mut stdin = stdin.lock().await;
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await?;
    Ok(())
}

async fn sync_line(handle: &SimulationHandle) -> SimnetResult<String> {
    let aircraft: Vec<AircraftDelta> = handle
        .aircraft()
        .await
        .values()
        .map(AircraftDelta::full)
        .collect();
    let controllers: Vec<serde_json::Value> = handle
        .controllers()
        .await
        .values()
        .map(|c| serde_json::to_value(c).unwrap_or_default())
        .collect();
    Ok(json!({
        "$": "sync",
        "aircraft": aircraft,
        "controllers": controllers,
    })
    .to_string())
}

/// Consume the child's stdout: requests in, replies back down its stdin.
async fn read_requests(
    stdout: tokio::process::ChildStdout,
    stdin: Arc<Mutex<ChildStdin>>,
    handle: SimulationHandle,
) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        match handle_request(&line, &handle).await {
            Ok(Some(reply)) => {
                if write_line(&stdin, &reply).await.is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(msg) => {
                let err = json!({ "$": "err", "msg": msg }).to_string();
                if write_line(&stdin, &err).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!("module stdout closed");
}

/// One child request. `Ok(Some(..))` is a reply line, `Err(..)` an err body.
async fn handle_request(line: &str, handle: &SimulationHandle) -> Result<Option<String>, String> {
    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| format!("bad json: {}", e))?;
    let discriminator = value["$"].as_str().ok_or("missing discriminator")?;

    match discriminator {
        "txt" => {
            let from = parse_uuid(&value, "from")?;
            let to = parse_uuid(&value, "to")?;
            let message = value["message"].as_str().ok_or("missing message")?;
            handle.send_text_message(from, to, message.to_string()).await;
            Ok(None)
        }
        "addac" => {
            let seed: AircraftSeed = serde_json::from_value(value["aircraft"].clone())
                .map_err(|e| format!("bad aircraft: {}", e))?;
            let id = handle
                .add_aircraft(Aircraft::new(seed.metadata, seed.state, seed.motion))
                .await;
            Ok(Some(json!({ "$": "acadded", "id": id }).to_string()))
        }
        "delac" => {
            let id = parse_uuid(&value, "id")?;
            if !handle.remove_aircraft(id).await {
                warn!("module asked to delete unknown aircraft {}", id);
            }
            Ok(None)
        }
        // replies echoed back by simple children are not requests
        "err" | "acadded" => Ok(None),
        other => Err(format!("unknown discriminator: {}", other)),
    }
}

fn parse_uuid(value: &serde_json::Value, field: &str) -> Result<Uuid, String> {
    value[field]
        .as_str()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| format!("missing or invalid {}", field))
}

/// Keep the child's world model fresh the same way controllers are kept
/// fresh: a full snapshot at least every resync period.
async fn resync_loop(stdin: Arc<Mutex<ChildStdin>>, handle: SimulationHandle) {
    loop {
        tokio::time::sleep(Duration::from_secs(RESYNC_INTERVAL_SECS)).await;
        let Ok(line) = sync_line(&handle).await else { continue };
        if write_line(&stdin, &line).await.is_err() {
            return;
        }
    }
}
