// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Bridge sessions: one initialized backend per work directory.
//!
//! A [`BridgeSession`] moves `Uninitialized -> Initializing -> Ready` (or
//! `Failed`) exactly once. Concurrent [`BridgeSession::initialize`] calls
//! collapse onto the first caller; the rest block on a condvar until it
//! finishes and then observe its outcome. Dispatch holds a per-session lock
//! around the backend, so calls through one session are serialized.
//!
//! The legacy slow path only needs a staged work dir and an interpreter;
//! it prepares those on demand and never waits for the worker.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::backend::{Backend, BackendLauncher, Handshake, LaunchContext, TaskRequest};
use crate::bootstrap::{Bootstrapper, PackageInstaller, PipInstaller, ProvisionedRuntime};
use crate::buffer::HandoffBuffer;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::layout::{WorkDirLayout, canonical_work_dir};
use crate::legacy::{INTERACTION_ERROR_PREFIX, LegacyTransport};
use crate::staging;
use crate::worker::{DaemonLauncher, resolve_interpreter};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    /// Initialization failed; the message of the original error.
    Failed(String),
}

impl SessionState {
    /// Stable numeric form for FFI callers.
    pub fn code(&self) -> i32 {
        match self {
            SessionState::Uninitialized => 0,
            SessionState::Initializing => 1,
            SessionState::Ready => 2,
            SessionState::Failed(_) => 3,
        }
    }
}

/// Fresh `jpb_<12 hex>` session key.
pub fn generate_session_key() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("jpb_{}", &id[..12])
}

struct ReadySession {
    session_key: String,
    backend: Box<dyn Backend>,
}

pub struct BridgeSession {
    config: BridgeConfig,
    layout: WorkDirLayout,
    installer: Arc<dyn PackageInstaller>,
    launcher: Arc<dyn BackendLauncher>,
    state: Mutex<SessionState>,
    state_changed: Condvar,
    ready: Mutex<Option<ReadySession>>,
    legacy: Mutex<Option<Arc<LegacyTransport>>>,
    runtime: Mutex<Option<ProvisionedRuntime>>,
}

pub struct SessionBuilder {
    config: BridgeConfig,
    installer: Arc<dyn PackageInstaller>,
    launcher: Arc<dyn BackendLauncher>,
}

impl SessionBuilder {
    pub fn installer(mut self, installer: Arc<dyn PackageInstaller>) -> Self {
        self.installer = installer;
        self
    }

    pub fn launcher(mut self, launcher: Arc<dyn BackendLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn build(self) -> BridgeSession {
        BridgeSession {
            layout: WorkDirLayout::new(&self.config.work_dir),
            config: self.config,
            installer: self.installer,
            launcher: self.launcher,
            state: Mutex::new(SessionState::Uninitialized),
            state_changed: Condvar::new(),
            ready: Mutex::new(None),
            legacy: Mutex::new(None),
            runtime: Mutex::new(None),
        }
    }
}

/// Marks the session `Failed` if the initializing thread unwinds.
struct InitGuard<'a> {
    session: &'a BridgeSession,
    armed: bool,
}

impl Drop for InitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.session
                .finish_initialize(Err("initialization panicked".to_string()));
        }
    }
}

impl BridgeSession {
    pub fn new(config: BridgeConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: BridgeConfig) -> SessionBuilder {
        SessionBuilder {
            config,
            installer: Arc::new(PipInstaller),
            launcher: Arc::new(DaemonLauncher),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn work_dir(&self) -> &Path {
        self.layout.root()
    }

    pub fn state(&self) -> SessionState {
        self.state.lock().clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.lock(), SessionState::Ready)
    }

    /// Session key bound by the successful initialize, if any.
    pub fn session_key(&self) -> Option<String> {
        self.ready.lock().as_ref().map(|r| r.session_key.clone())
    }

    pub fn runtime(&self) -> Option<ProvisionedRuntime> {
        self.runtime.lock().clone()
    }

    /// Initialize once. Later calls return immediately with the outcome of
    /// the first one; a failed session stays failed.
    pub fn initialize(&self, session_key: Option<&str>) -> Result<()> {
        {
            let mut state = self.state.lock();
            loop {
                match &*state {
                    SessionState::Ready => return Ok(()),
                    SessionState::Failed(reason) => {
                        return Err(BridgeError::NotReady(format!(
                            "initialization previously failed: {}",
                            reason
                        )));
                    }
                    SessionState::Initializing => self.state_changed.wait(&mut state),
                    SessionState::Uninitialized => {
                        *state = SessionState::Initializing;
                        break;
                    }
                }
            }
        }

        let mut guard = InitGuard {
            session: self,
            armed: true,
        };
        let started = Instant::now();
        let result = self.run_initialize(session_key);
        guard.armed = false;

        match &result {
            Ok(()) => {
                tracing::info!(
                    "[{}] Session ready in {:?}",
                    self.layout.root().display(),
                    started.elapsed()
                );
                self.finish_initialize(Ok(()));
            }
            Err(e) => {
                tracing::error!(
                    "[{}] Session initialization failed: {}",
                    self.layout.root().display(),
                    e
                );
                self.finish_initialize(Err(e.to_string()));
            }
        }
        result
    }

    fn finish_initialize(&self, outcome: std::result::Result<(), String>) {
        let mut state = self.state.lock();
        *state = match outcome {
            Ok(()) => SessionState::Ready,
            Err(reason) => SessionState::Failed(reason),
        };
        self.state_changed.notify_all();
    }

    /// Stage the work dir, provision the runtime and build the slow-path
    /// transport, once. Needs no worker, so the raw path works in every
    /// session state.
    fn prepare_runtime(&self) -> Result<Arc<LegacyTransport>> {
        let mut legacy = self.legacy.lock();
        if let Some(transport) = legacy.as_ref() {
            return Ok(Arc::clone(transport));
        }

        self.config.validate()?;
        staging::prepare_work_dir(&self.layout, self.config.source_script_dir.as_deref())?;

        let runtime = if self.config.runtime.provision {
            let provisioned = Bootstrapper::from_config(&self.config)
                .with_installer(self.installer.clone())
                .ensure_provisioned()?;
            tracing::info!(
                "[{}] Runtime {:?} at '{}'",
                self.layout.root().display(),
                provisioned.outcome,
                provisioned.runtime_root.display()
            );
            Some(provisioned)
        } else {
            tracing::info!("Runtime provisioning disabled, using external interpreter");
            None
        };
        let interpreter = resolve_interpreter(&self.config, runtime.as_ref());
        *self.runtime.lock() = runtime;

        let transport = Arc::new(LegacyTransport::new(self.layout.root(), &interpreter));
        *legacy = Some(Arc::clone(&transport));
        Ok(transport)
    }

    fn run_initialize(&self, session_key: Option<&str>) -> Result<()> {
        let transport = self.prepare_runtime()?;

        let session_key = session_key
            .map(str::to_string)
            .unwrap_or_else(generate_session_key);

        let mut backend = self.launcher.launch(&LaunchContext {
            config: &self.config,
            layout: &self.layout,
            interpreter: transport.interpreter(),
        })?;
        backend.handshake(&Handshake {
            session_key: session_key.clone(),
            model_path: self.config.model_path.clone(),
            confidence: self.config.confidence,
            work_dir: self.config.work_dir.clone(),
        })?;

        *self.ready.lock() = Some(ReadySession {
            session_key,
            backend,
        });
        Ok(())
    }

    /// Initialize on a background thread.
    pub fn spawn_initialize(
        self: &Arc<Self>,
        session_key: Option<String>,
    ) -> Result<std::thread::JoinHandle<Result<()>>> {
        let session = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("pybridge-init".to_string())
            .spawn(move || session.initialize(session_key.as_deref()))?;
        Ok(handle)
    }

    /// Initialize without blocking the async executor.
    pub async fn initialize_async(self: Arc<Self>, session_key: Option<String>) -> Result<()> {
        tokio::task::spawn_blocking(move || self.initialize(session_key.as_deref()))
            .await
            .map_err(|e| BridgeError::Other(anyhow::anyhow!("initialize task failed: {}", e)))?
    }

    /// Run one task through the backend.
    pub fn dispatch(
        &self,
        task_type: &str,
        correlation_id: &str,
        metadata: &str,
        input: &[u8],
    ) -> Result<Vec<u8>> {
        if !self.is_ready() {
            return Err(BridgeError::NotReady(format!(
                "dispatch of {} refused: session is {:?}",
                task_type,
                self.state()
            )));
        }

        let mut ready = self.ready.lock();
        let ready = ready
            .as_mut()
            .ok_or_else(|| BridgeError::NotReady("session was shut down".to_string()))?;

        tracing::debug!(
            request_id = %correlation_id,
            "[{}] Dispatching {} ({} bytes, metadata {:?})",
            ready.session_key,
            task_type,
            input.len(),
            metadata
        );
        let started = Instant::now();
        let request = TaskRequest {
            task_type,
            correlation_id,
            metadata,
            input,
        };
        match ready.backend.execute(&request) {
            Ok(output) => {
                tracing::debug!(
                    request_id = %correlation_id,
                    "[{}] {} done: {} bytes in {:?}",
                    ready.session_key,
                    task_type,
                    output.len(),
                    started.elapsed()
                );
                Ok(output)
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %correlation_id,
                    "[{}] {} failed: {}",
                    ready.session_key,
                    task_type,
                    e
                );
                Err(e.into())
            }
        }
    }

    /// Slow-path transport, preparing the work dir and runtime on first use.
    /// Independent of the worker handshake.
    pub fn legacy_transport(&self) -> Result<Arc<LegacyTransport>> {
        self.prepare_runtime()
    }

    /// Slow path over the session's work dir and interpreter. Usable before
    /// `initialize` and after a failed one.
    pub fn run_raw<B>(&self, buffer: &mut HandoffBuffer<B>, width: u32, height: u32, channels: u32) -> String
    where
        B: AsRef<[u8]> + AsMut<[u8]>,
    {
        match self.legacy_transport() {
            Ok(transport) => transport.run_raw(buffer, width, height, channels),
            Err(e) => format!("{}{}", INTERACTION_ERROR_PREFIX, e),
        }
    }

    /// Stop the worker and return to `Uninitialized`. The prepared runtime
    /// stays, so the raw path keeps working.
    pub fn shutdown(&self) {
        let ready = self.ready.lock().take();
        if let Some(mut ready) = ready {
            tracing::info!("[{}] Shutting down session", ready.session_key);
            ready.backend.shutdown(SHUTDOWN_TIMEOUT);
        }
        let mut state = self.state.lock();
        if matches!(*state, SessionState::Ready) {
            *state = SessionState::Uninitialized;
        }
        self.state_changed.notify_all();
    }
}

/// Process-wide map from canonical work directory to its session.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<PathBuf, Arc<BridgeSession>>>,
}

static GLOBAL_REGISTRY: OnceLock<SessionRegistry> = OnceLock::new();

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn global() -> &'static SessionRegistry {
        GLOBAL_REGISTRY.get_or_init(SessionRegistry::new)
    }

    /// The session for `config.work_dir`, created with default collaborators
    /// on first use. An existing session keeps its original configuration.
    pub fn get_or_create(&self, config: BridgeConfig) -> Arc<BridgeSession> {
        self.get_or_create_with(config, BridgeSession::new)
    }

    pub fn get_or_create_with<F>(&self, config: BridgeConfig, build: F) -> Arc<BridgeSession>
    where
        F: FnOnce(BridgeConfig) -> BridgeSession,
    {
        let key = canonical_work_dir(&config.work_dir);
        let mut sessions = self.sessions.lock();
        if let Some(existing) = sessions.get(&key) {
            tracing::debug!("Reusing session for '{}'", key.display());
            return Arc::clone(existing);
        }
        let session = Arc::new(build(config));
        sessions.insert(key, Arc::clone(&session));
        session
    }

    pub fn get(&self, work_dir: &Path) -> Option<Arc<BridgeSession>> {
        self.sessions
            .lock()
            .get(&canonical_work_dir(work_dir))
            .cloned()
    }

    /// Forget the session for `work_dir`, shutting it down.
    pub fn remove(&self, work_dir: &Path) -> Option<Arc<BridgeSession>> {
        let removed = self.sessions.lock().remove(&canonical_work_dir(work_dir));
        if let Some(session) = &removed {
            session.shutdown();
        }
        removed
    }
}
