//! Engine lifecycle
//!
//! The engine is a single stateful resource. [`EngineLifecycle`] owns it and
//! tracks it as `NotStarted | Running | Stopped`; every other component reaches
//! the engine through [`EngineLifecycle::lease`], which fails once the engine
//! is no longer running.

use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, watch, Mutex};

use crate::engine::{Engine, EngineEvent, EngineStartParams, PoiList};
use crate::error::{EngineError, OrchestratorError, OrchestratorResult};

/// Longest wallet source label the engine accepts
pub const MAX_WALLET_SOURCE_LEN: usize = 16;

/// Default time `stop` waits for in-flight work
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Engine start configuration
#[derive(Clone, Debug)]
pub struct LifecycleConfig {
    pub wallet_source: String,
    pub db_path: PathBuf,
    pub artifacts_dir: PathBuf,
    pub poi_node_urls: Vec<String>,
    pub custom_poi_lists: Vec<PoiList>,
    pub debug: bool,
    pub verbose_scan_logging: bool,
    pub use_native_artifacts: bool,
    pub skip_merkletree_scans: bool,
    pub flush_timeout: Duration,
}

impl LifecycleConfig {
    pub fn new(
        wallet_source: impl Into<String>,
        db_path: impl Into<PathBuf>,
        artifacts_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            wallet_source: wallet_source.into(),
            db_path: db_path.into(),
            artifacts_dir: artifacts_dir.into(),
            poi_node_urls: Vec::new(),
            custom_poi_lists: Vec::new(),
            debug: true,
            verbose_scan_logging: false,
            use_native_artifacts: false,
            skip_merkletree_scans: false,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }

    pub fn with_poi_nodes(mut self, urls: Vec<String>) -> Self {
        self.poi_node_urls = urls;
        self
    }

    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Wallet source: 1-16 chars of lowercase letters, digits or spaces
    pub fn validate(&self) -> OrchestratorResult<()> {
        let source = &self.wallet_source;
        if source.is_empty() || source.len() > MAX_WALLET_SOURCE_LEN {
            return Err(OrchestratorError::Configuration(format!(
                "wallet source must be 1-{} characters, got {}",
                MAX_WALLET_SOURCE_LEN,
                source.len()
            )));
        }
        if !source
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == ' ')
        {
            return Err(OrchestratorError::Configuration(format!(
                "wallet source must be lowercase: {:?}",
                source
            )));
        }
        Ok(())
    }

    fn start_params(&self) -> EngineStartParams {
        EngineStartParams {
            wallet_source: self.wallet_source.clone(),
            db_path: self.db_path.clone(),
            artifacts_dir: self.artifacts_dir.clone(),
            debug: self.debug,
            use_native_artifacts: self.use_native_artifacts,
            skip_merkletree_scans: self.skip_merkletree_scans,
            poi_node_urls: self.poi_node_urls.clone(),
            custom_poi_lists: self.custom_poi_lists.clone(),
            verbose_scan_logging: self.verbose_scan_logging,
        }
    }
}

/// Result of a stop call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    /// The engine was running and has been released
    Stopped { drained: bool },
    /// A previous call already stopped it
    AlreadyStopped,
    /// Nothing was ever started
    NotStarted,
}

struct RunningEngine {
    started_at: Instant,
    flush_timeout: Duration,
}

enum EngineState {
    NotStarted,
    Running(RunningEngine),
    Stopped,
}

/// Shared access to the running engine
///
/// Outstanding leases delay `stop` up to the flush timeout.
pub struct EngineLease {
    engine: Arc<dyn Engine>,
    in_flight: Arc<watch::Sender<usize>>,
}

impl Deref for EngineLease {
    type Target = dyn Engine;

    fn deref(&self) -> &Self::Target {
        self.engine.as_ref()
    }
}

impl Drop for EngineLease {
    fn drop(&mut self) {
        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}

pub struct EngineLifecycle {
    engine: Arc<dyn Engine>,
    state: Mutex<EngineState>,
    in_flight: Arc<watch::Sender<usize>>,
}

impl EngineLifecycle {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        let (in_flight, _) = watch::channel(0usize);
        Self {
            engine,
            state: Mutex::new(EngineState::NotStarted),
            in_flight: Arc::new(in_flight),
        }
    }

    /// Start the engine
    ///
    /// Fails with `AlreadyRunning` while a previous start is still live.
    /// Starting again after `stop` is allowed.
    pub async fn start(&self, config: &LifecycleConfig) -> OrchestratorResult<()> {
        config.validate()?;

        let mut state = self.state.lock().await;
        if matches!(*state, EngineState::Running(_)) {
            return Err(OrchestratorError::AlreadyRunning);
        }

        prepare_storage(config).await?;

        tracing::info!(
            "Starting engine (source={}, db={}, artifacts={})",
            config.wallet_source,
            config.db_path.display(),
            config.artifacts_dir.display()
        );

        self.engine
            .start(&config.start_params())
            .await
            .map_err(|e| match e {
                EngineError::AlreadyRunning => OrchestratorError::AlreadyRunning,
                other => OrchestratorError::Lifecycle(other),
            })?;

        *state = EngineState::Running(RunningEngine {
            started_at: Instant::now(),
            flush_timeout: config.flush_timeout,
        });
        tracing::info!("Engine started");
        Ok(())
    }

    /// Stop the engine; safe to call any number of times
    pub async fn stop(&self) -> OrchestratorResult<StopOutcome> {
        let mut state = self.state.lock().await;
        let running = match std::mem::replace(&mut *state, EngineState::Stopped) {
            EngineState::Running(running) => running,
            EngineState::Stopped => {
                tracing::debug!("Engine already stopped");
                return Ok(StopOutcome::AlreadyStopped);
            }
            EngineState::NotStarted => {
                *state = EngineState::NotStarted;
                return Ok(StopOutcome::NotStarted);
            }
        };

        let drained = self.drain(running.flush_timeout).await;
        if !drained {
            tracing::warn!(
                "Stopping engine with {} operation(s) still in flight",
                *self.in_flight.borrow()
            );
        }

        // A failed stop leaves the engine held; keep it Running so a retry can release it
        if let Err(e) = self.engine.stop().await {
            tracing::warn!("Engine stop failed, still running: {}", e);
            *state = EngineState::Running(running);
            return Err(OrchestratorError::Lifecycle(e));
        }

        tracing::info!(
            "Engine stopped after {:?}",
            running.started_at.elapsed()
        );
        Ok(StopOutcome::Stopped { drained })
    }

    /// Borrow the engine for one operation
    pub async fn lease(&self) -> OrchestratorResult<EngineLease> {
        let state = self.state.lock().await;
        match *state {
            EngineState::Running(_) => {
                self.in_flight.send_modify(|n| *n += 1);
                Ok(EngineLease {
                    engine: self.engine.clone(),
                    in_flight: self.in_flight.clone(),
                })
            }
            _ => Err(OrchestratorError::EngineNotRunning),
        }
    }

    pub async fn is_running(&self) -> bool {
        matches!(*self.state.lock().await, EngineState::Running(_))
    }

    /// Engine progress events; subscribing needs no lease
    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.engine.events()
    }

    async fn drain(&self, flush_timeout: Duration) -> bool {
        let mut rx = self.in_flight.subscribe();
        tokio::time::timeout(flush_timeout, rx.wait_for(|n| *n == 0))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }
}

/// Create the artifact directory and the database's parent directory
async fn prepare_storage(config: &LifecycleConfig) -> OrchestratorResult<()> {
    tokio::fs::create_dir_all(&config.artifacts_dir)
        .await
        .map_err(|e| {
            OrchestratorError::Configuration(format!(
                "artifact directory {}: {}",
                config.artifacts_dir.display(),
                e
            ))
        })?;

    if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            OrchestratorError::Configuration(format!("database directory {}: {}", parent.display(), e))
        })?;
    }
    Ok(())
}
