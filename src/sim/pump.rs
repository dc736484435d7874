// Plugin pump
//
// Drives the simulation: a 10 Hz tick that extrapolates the fleet, runs the
// instruction planner, and ticks every enabled plugin; plus a 5 s scan of the
// configured module directories for external-process plugins.
//
// In-process plugins register explicitly, declaring the collaborators they
// need by type; instantiation proceeds in rounds against a type-keyed
// registry until every constructor is satisfied or a round makes no progress.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::constants::{MODULE_SCAN_INTERVAL_SECS, PUMP_TICK_MILLIS};
use crate::errors::{SimnetError, SimnetResult};
use crate::model::aircraft::Aircraft;
use crate::model::delta::{AircraftDelta, UpdateFields};
use crate::sim::bridge::BridgePlugin;
use crate::sim::planner::Planner;
use crate::sim::plugin::{Plugin, SimulationHandle};

/// A fresh copy of the committed aircraft map, injectable into plugin
/// constructors.
pub struct AircraftSnapshot(pub HashMap<Uuid, Aircraft>);

/// Type-keyed collaborator registry used during plugin instantiation.
pub struct DependencyRegistry {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl DependencyRegistry {
    pub fn new() -> Self {
        DependencyRegistry { entries: HashMap::new() }
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, value: Arc<T>) {
        self.entries.insert(TypeId::of::<T>(), value);
    }

    fn insert_raw(&mut self, type_id: TypeId, value: Arc<dyn Any + Send + Sync>) {
        self.entries.insert(type_id, value);
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|entry| Arc::clone(entry).downcast::<T>().ok())
    }

    pub fn contains(&self, type_id: TypeId) -> bool {
        self.entries.contains_key(&type_id)
    }
}

impl Default for DependencyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

type BuildFn = Box<
    dyn Fn(&DependencyRegistry) -> SimnetResult<(Arc<dyn Plugin>, Arc<dyn Any + Send + Sync>)>
        + Send
        + Sync,
>;

/// One registered in-process plugin: its declared dependencies and builder.
pub struct PluginRegistration {
    name: &'static str,
    type_id: TypeId,
    dependencies: Vec<TypeId>,
    build: BuildFn,
}

impl PluginRegistration {
    pub fn new<P, F>(name: &'static str, dependencies: Vec<TypeId>, build: F) -> Self
    where
        P: Plugin + Send + Sync + 'static,
        F: Fn(&DependencyRegistry) -> SimnetResult<Arc<P>> + Send + Sync + 'static,
    {
        PluginRegistration {
            name,
            type_id: TypeId::of::<P>(),
            dependencies,
            build: Box::new(move |registry| {
                let plugin = build(registry)?;
                Ok((
                    Arc::clone(&plugin) as Arc<dyn Plugin>,
                    plugin as Arc<dyn Any + Send + Sync>,
                ))
            }),
        }
    }
}

struct PluginSlot {
    plugin: Arc<dyn Plugin>,
    enabled: AtomicBool,
    /// Module path for externally discovered plugins
    module: Option<PathBuf>,
}

/// The per-server loop that ticks plugins, advances instructions, and keeps
/// the module table.
pub struct PluginPump {
    handle: SimulationHandle,
    planner: Arc<Mutex<Planner>>,
    plugins: RwLock<Vec<PluginSlot>>,
    scan_dirs: Vec<PathBuf>,
    seen_modules: Mutex<HashMap<PathBuf, SystemTime>>,
}

impl std::fmt::Debug for PluginPump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginPump")
            .field("scan_dirs", &self.scan_dirs)
            .finish_non_exhaustive()
    }
}

impl PluginPump {
    /// Instantiate the registered plugins and build the pump. Fails with
    /// `MissingDependency` when a constructor round makes no progress.
    pub async fn new(
        handle: SimulationHandle,
        planner: Arc<Mutex<Planner>>,
        registrations: Vec<PluginRegistration>,
        scan_dirs: Vec<PathBuf>,
    ) -> SimnetResult<Self> {
        let mut registry = DependencyRegistry::new();
        registry.insert(Arc::new(handle.clone()));
        registry.insert(Arc::new(AircraftSnapshot(handle.aircraft().await)));

        let plugins = instantiate(registrations, &mut registry)?;
        Ok(PluginPump {
            handle,
            planner,
            plugins: RwLock::new(plugins),
            scan_dirs,
            seen_modules: Mutex::new(HashMap::new()),
        })
    }

    /// Names and enabled flags, for status output.
    pub async fn plugin_names(&self) -> Vec<(String, bool)> {
        self.plugins
            .read()
            .await
            .iter()
            .map(|slot| (slot.plugin.name().to_string(), slot.enabled.load(Ordering::SeqCst)))
            .collect()
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        for slot in self.plugins.read().await.iter() {
            if slot.plugin.name() == name {
                slot.enabled.store(enabled, Ordering::SeqCst);
                return true;
            }
        }
        false
    }

    /// Hand a relayed chat frame to every enabled plugin.
    pub async fn dispatch_text(&self, sender: Uuid, recipient: Uuid, message: &str) {
        let plugins: Vec<Arc<dyn Plugin>> = self
            .plugins
            .read()
            .await
            .iter()
            .filter(|slot| slot.enabled.load(Ordering::SeqCst))
            .map(|slot| Arc::clone(&slot.plugin))
            .collect();
        for plugin in plugins {
            plugin.process_text_message(sender, recipient, message).await;
        }
    }

    /// The pump task. Returns when `shutdown` flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_millis(PUMP_TICK_MILLIS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut scanner = interval(Duration::from_secs(MODULE_SCAN_INTERVAL_SECS));
        scanner.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_tick = Instant::now();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick);
                    last_tick = now;
                    self.step(dt).await;
                }
                _ = scanner.tick() => {
                    self.scan_modules().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("pump shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// One pump tick: extrapolate, plan, tick plugins.
    async fn step(&self, dt: Duration) {
        let dt_secs = dt.as_secs_f64();
        let now = Utc::now();
        let store = self.handle.store();

        // advance every aircraft to now; the diffs ride the pending batch
        let fleet = store.current_aircraft().await;
        let mut advanced = Vec::with_capacity(fleet.len());
        for ac in &fleet {
            let next = ac.extrapolate(now);
            let delta = AircraftDelta::diff(ac, &next);
            if !delta.update.is_empty() {
                store.queue_update(delta).await;
            }
            advanced.push(next);
        }

        // planner adjustments write through only when motion changed
        let adjustments = self.planner.lock().await.tick(&advanced, dt_secs);
        for (id, motion) in adjustments {
            let mut delta = AircraftDelta::empty(id);
            delta.update.insert(UpdateFields::MOVEMENT);
            delta.motion = Some(motion);
            store.queue_update(delta).await;
        }

        let plugins: Vec<Arc<dyn Plugin>> = self
            .plugins
            .read()
            .await
            .iter()
            .filter(|slot| slot.enabled.load(Ordering::SeqCst))
            .map(|slot| Arc::clone(&slot.plugin))
            .collect();
        for plugin in plugins {
            plugin.tick(dt).await;
        }
    }

    /// Look for new or changed modules; unchanged paths are skipped.
    async fn scan_modules(&self) {
        for dir in &self.scan_dirs {
            let mut entries = match tokio::fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    debug!("module directory {} unreadable: {}", dir.display(), e);
                    continue;
                }
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                let Ok(meta) = entry.metadata().await else { continue };
                if !meta.is_file() {
                    continue;
                }
                let Ok(modified) = meta.modified() else { continue };

                {
                    let seen = self.seen_modules.lock().await;
                    if seen.get(&path) == Some(&modified) {
                        continue;
                    }
                }
                self.load_module(path.clone(), modified).await;
            }
        }
    }

    async fn load_module(&self, path: PathBuf, modified: SystemTime) {
        // a changed module replaces its previous instance
        self.plugins
            .write()
            .await
            .retain(|slot| slot.module.as_ref() != Some(&path));

        match BridgePlugin::launch(&path, self.handle.clone()).await {
            Ok(plugin) => {
                info!("loaded module {}", path.display());
                self.plugins.write().await.push(PluginSlot {
                    plugin: Arc::new(plugin),
                    enabled: AtomicBool::new(true),
                    module: Some(path.clone()),
                });
                self.seen_modules.lock().await.insert(path, modified);
            }
            Err(e) => {
                warn!("module {} failed to start: {}", path.display(), e);
                // remember the attempt so a broken module is not retried
                // until it changes on disk
                self.seen_modules.lock().await.insert(path, modified);
            }
        }
    }
}

/// Round-based constructor resolution.
fn instantiate(
    mut pending: Vec<PluginRegistration>,
    registry: &mut DependencyRegistry,
) -> SimnetResult<Vec<PluginSlot>> {
    let mut slots = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let mut progressed = false;
        let mut still_pending = Vec::new();

        for registration in pending {
            if registration.dependencies.iter().all(|dep| registry.contains(*dep)) {
                let (plugin, as_any) = (registration.build)(registry)?;
                registry.insert_raw(registration.type_id, as_any);
                debug!("instantiated plugin {}", registration.name);
                slots.push(PluginSlot {
                    plugin,
                    enabled: AtomicBool::new(true),
                    module: None,
                });
                progressed = true;
            } else {
                still_pending.push(registration);
            }
        }

        if !progressed {
            let names: Vec<&str> = still_pending.iter().map(|r| r.name).collect();
            return Err(SimnetError::MissingDependency(names.join(", ")));
        }
        pending = still_pending;
    }

    Ok(slots)
}
