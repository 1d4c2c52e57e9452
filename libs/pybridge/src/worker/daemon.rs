// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Long-lived worker process speaking the framed JSON envelope.
//!
//! The worker is spawned by the handshake and respawned lazily before a
//! dispatch when it has exited. A reader thread decodes stdout frames into a
//! channel so every wait on the worker is bounded; a dispatch that times out
//! kills the worker, and the next dispatch starts a fresh one.

use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::{ChildStdin, ChildStdout, Command, Stdio};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::backend::{Backend, BackendLauncher, Handshake, LaunchContext, TaskRequest};
use crate::config::{BridgeConfig, ENV_WORK_DIR};
use crate::error::{BridgeError, DispatchError, Result};
use crate::worker::channel::{ChannelKind, RegionPair};
use crate::worker::process_handle::ProcessHandle;
use crate::worker::protocol::{self, HostMessage, WorkerMessage};
use crate::worker::forward_stderr;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

type Reply = std::result::Result<WorkerMessage, DispatchError>;

struct LiveWorker {
    stdin: BufWriter<ChildStdin>,
    replies: Receiver<Reply>,
    process: ProcessHandle,
}

pub struct DaemonBackend {
    interpreter: PathBuf,
    script: PathBuf,
    work_dir: PathBuf,
    channel: ChannelKind,
    output_capacity: usize,
    dispatch_timeout: Duration,
    startup_timeout: Duration,
    handshake: Option<Handshake>,
    worker: Option<LiveWorker>,
}

impl DaemonBackend {
    pub fn new(
        interpreter: &Path,
        script: &Path,
        config: &BridgeConfig,
        channel: ChannelKind,
    ) -> Self {
        Self {
            interpreter: interpreter.to_path_buf(),
            script: script.to_path_buf(),
            work_dir: config.work_dir.clone(),
            channel,
            output_capacity: config.output_capacity,
            dispatch_timeout: config.dispatch_timeout(),
            startup_timeout: config.startup_timeout(),
            handshake: None,
            worker: None,
        }
    }

    pub fn channel(&self) -> &ChannelKind {
        &self.channel
    }

    fn spawn_worker(&self, handshake: &Handshake) -> Result<LiveWorker> {
        let instance_id = uuid::Uuid::new_v4().simple().to_string();
        let name = format!("worker-{}", &instance_id[..8]);

        let mut command = Command::new(&self.interpreter);
        command
            .arg(&self.script)
            .arg("--daemon")
            .arg("--mem-key")
            .arg(&handshake.session_key)
            .arg("--instance-id")
            .arg(&instance_id)
            .current_dir(&self.work_dir)
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONUNBUFFERED", "1")
            .env("PYTHONPATH", &self.work_dir)
            .env(ENV_WORK_DIR, &self.work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut process = ProcessHandle::spawn(command, &name)?;
        let stdin = process
            .take_stdin()
            .ok_or_else(|| BridgeError::Handshake("worker stdin not available".into()))?;
        let stdout = process
            .take_stdout()
            .ok_or_else(|| BridgeError::Handshake("worker stdout not available".into()))?;
        if let Some(stderr) = process.take_stderr() {
            forward_stderr(stderr, name.clone())?;
        }
        let replies = spawn_reply_reader(stdout, name.clone())?;

        let mut worker = LiveWorker {
            stdin: BufWriter::new(stdin),
            replies,
            process,
        };

        protocol::send(
            &mut worker.stdin,
            &HostMessage::Handshake {
                session_key: handshake.session_key.clone(),
                instance_id,
                model_path: handshake.model_path.clone(),
                confidence: handshake.confidence,
                work_dir: handshake.work_dir.clone(),
            },
        )
        .map_err(|e| BridgeError::Handshake(format!("[{}] {}", name, e)))?;

        match worker.replies.recv_timeout(self.startup_timeout) {
            Ok(Ok(WorkerMessage::Ready)) => {
                tracing::info!("[{}] Worker ready (PID {})", name, worker.process.pid());
                Ok(worker)
            }
            Ok(Ok(other)) => Err(BridgeError::Handshake(format!(
                "[{}] expected ready, got {:?}",
                name, other
            ))),
            Ok(Err(e)) => Err(BridgeError::Handshake(format!("[{}] {}", name, e))),
            Err(RecvTimeoutError::Timeout) => Err(BridgeError::Handshake(format!(
                "[{}] worker not ready within {:?}",
                name, self.startup_timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::Handshake(format!(
                "[{}] worker exited before becoming ready",
                name
            ))),
        }
    }

    /// Respawn the worker if it has exited since the last call.
    fn ensure_worker(&mut self) -> std::result::Result<(), DispatchError> {
        let alive = match self.worker.as_mut() {
            Some(worker) => worker.process.is_running(),
            None => false,
        };
        if alive {
            return Ok(());
        }
        if self.worker.take().is_some() {
            tracing::warn!("Worker exited since last dispatch, respawning");
        }
        let handshake = self
            .handshake
            .as_ref()
            .ok_or_else(|| DispatchError::WorkerGone("backend was never handshaken".into()))?;
        let worker = self
            .spawn_worker(handshake)
            .map_err(|e| DispatchError::WorkerGone(e.to_string()))?;
        self.worker = Some(worker);
        Ok(())
    }

    /// A reply must name the request it answers. Anything else leaves the
    /// stream out of step, so the worker is replaced.
    fn check_reply_id(
        &mut self,
        reply_id: Option<&str>,
        expected: &str,
    ) -> std::result::Result<(), DispatchError> {
        match reply_id {
            Some(id) if id == expected => Ok(()),
            Some(id) => {
                self.discard_worker("out-of-order reply");
                Err(DispatchError::Protocol(format!(
                    "reply for '{}' while waiting for '{}'",
                    id, expected
                )))
            }
            None => {
                self.discard_worker("reply without request id");
                Err(DispatchError::Protocol(format!(
                    "reply without request id while waiting for '{}'",
                    expected
                )))
            }
        }
    }

    fn discard_worker(&mut self, reason: &str) {
        if let Some(mut worker) = self.worker.take() {
            tracing::warn!("[{}] Discarding worker: {}", worker.process.name(), reason);
            worker.process.kill();
        }
    }
}

impl Backend for DaemonBackend {
    fn handshake(&mut self, handshake: &Handshake) -> Result<()> {
        self.discard_worker("re-handshake");
        let worker = self.spawn_worker(handshake)?;
        self.worker = Some(worker);
        self.handshake = Some(handshake.clone());
        Ok(())
    }

    fn execute(&mut self, request: &TaskRequest<'_>) -> std::result::Result<Vec<u8>, DispatchError> {
        self.ensure_worker()?;
        let session_key = self
            .handshake
            .as_ref()
            .map(|h| h.session_key.clone())
            .unwrap_or_default();

        let regions = RegionPair::allocate(
            &self.channel,
            &session_key,
            request.correlation_id,
            request.input,
            self.output_capacity,
        )?;

        let message = HostMessage::Execute {
            task_type: request.task_type.to_string(),
            request_id: request.correlation_id.to_string(),
            metadata: request.metadata.to_string(),
            input: regions.input().clone(),
            output: regions.output().clone(),
        };

        let reply = match self.worker.as_mut() {
            Some(worker) => match protocol::send(&mut worker.stdin, &message) {
                Ok(()) => worker.replies.recv_timeout(self.dispatch_timeout),
                Err(e) => Ok(Err(DispatchError::WorkerGone(format!("send failed: {}", e)))),
            },
            None => return Err(DispatchError::WorkerGone("no worker".into())),
        };

        match reply {
            Ok(Ok(WorkerMessage::Done { len, request_id })) => {
                self.check_reply_id(request_id.as_deref(), request.correlation_id)?;
                regions.read_output(len)
            }
            Ok(Ok(WorkerMessage::Error { error, request_id })) => {
                self.check_reply_id(request_id.as_deref(), request.correlation_id)?;
                Err(DispatchError::Worker(error))
            }
            Ok(Ok(WorkerMessage::Ready)) => {
                self.discard_worker("unexpected ready during dispatch");
                Err(DispatchError::Protocol("unexpected ready during dispatch".into()))
            }
            Ok(Err(e)) => {
                self.discard_worker(&e.to_string());
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) => {
                self.discard_worker("dispatch timed out");
                Err(DispatchError::Timeout(self.dispatch_timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.discard_worker("stdout closed");
                Err(DispatchError::WorkerGone("worker exited mid-request".into()))
            }
        }
    }

    fn shutdown(&mut self, timeout: Duration) {
        if let Some(mut worker) = self.worker.take() {
            if let Err(e) = protocol::send(&mut worker.stdin, &HostMessage::Shutdown) {
                tracing::debug!("[{}] shutdown send: {}", worker.process.name(), e);
            }
            drop(worker.stdin);
            worker.process.shutdown(timeout);
        }
    }
}

impl Drop for DaemonBackend {
    fn drop(&mut self) {
        self.shutdown(SHUTDOWN_TIMEOUT);
    }
}

fn spawn_reply_reader(stdout: ChildStdout, name: String) -> Result<Receiver<Reply>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    std::thread::Builder::new()
        .name(format!("{}-stdout", name))
        .spawn(move || {
            let mut reader = BufReader::new(stdout);
            loop {
                match protocol::recv::<_, WorkerMessage>(&mut reader) {
                    Ok(message) => {
                        tracing::trace!("[{}] <- {:?}", name, message);
                        if tx.send(Ok(message)).is_err() {
                            break;
                        }
                    }
                    Err(DispatchError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                        tracing::debug!("[{}] stdout closed", name);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("[{}] unreadable reply: {}", name, e);
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}

/// Launches a [`DaemonBackend`] running the work dir's entry script.
#[derive(Debug, Default, Clone, Copy)]
pub struct DaemonLauncher;

impl BackendLauncher for DaemonLauncher {
    fn launch(&self, ctx: &LaunchContext<'_>) -> Result<Box<dyn Backend>> {
        let channel = ChannelKind::select(ctx.config.fast_channel, &ctx.layout.channel_dir());
        tracing::debug!("Fast channel: {:?}", channel);
        Ok(Box::new(DaemonBackend::new(
            ctx.interpreter,
            &ctx.layout.worker_script(),
            ctx.config,
            channel,
        )))
    }
}
