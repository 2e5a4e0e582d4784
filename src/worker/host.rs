//! Host side of the isolation layer: starts one worker, waits for `ready`,
//! and correlates invokes with replies by request id.

use serde_json::Value;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::protocol::{HostMessage, WorkerInput, WorkerMessage};
use crate::config::{Config, SpiderConfig};
use crate::error::{ErrorCode, HostError, ToolError};
use crate::watch::FileEventKind;

type Reply = Result<Value, HostError>;
type PendingMap = Arc<Mutex<HashMap<u64, Sender<Reply>>>>;

pub type ProgressCallback = Arc<dyn Fn(usize, usize, Option<&str>) + Send + Sync>;
pub type InvalidationCallback = Arc<dyn Fn(&str, FileEventKind) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Outbound half of a worker connection.
pub trait Transport: Send {
    fn send(&mut self, message: &HostMessage) -> Result<(), HostError>;
    /// Stops the worker without waiting for it to acknowledge anything.
    fn terminate(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportKind {
    Thread,
    /// Runs `<program> worker` and speaks JSON lines over its stdio.
    Process { program: PathBuf },
}

#[derive(Clone)]
pub struct HostOptions {
    pub warmup_timeout: Duration,
    pub request_timeout: Duration,
    pub transport: TransportKind,
    pub on_progress: Option<ProgressCallback>,
    pub on_file_invalidated: Option<InvalidationCallback>,
}

impl Default for HostOptions {
    fn default() -> Self {
        let config = Config::get();
        Self {
            warmup_timeout: config.warmup_timeout(),
            request_timeout: config.request_timeout(),
            transport: TransportKind::Thread,
            on_progress: None,
            on_file_invalidated: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyInfo {
    pub warmup_duration_ms: u64,
    pub indexed_files: usize,
}

pub struct ThreadTransport {
    inbox: Sender<WorkerInput>,
}

impl ThreadTransport {
    pub fn spawn() -> Result<(Self, Receiver<WorkerMessage>), HostError> {
        let (inbox, outbox, _handle) =
            super::spawn_thread().map_err(|err| HostError::Transport(format!("{err:#}")))?;
        Ok((Self { inbox }, outbox))
    }
}

impl Transport for ThreadTransport {
    fn send(&mut self, message: &HostMessage) -> Result<(), HostError> {
        self.inbox
            .send(WorkerInput::Host(message.clone()))
            .map_err(|_| HostError::WorkerTerminated("worker thread has exited".to_string()))
    }

    fn terminate(&mut self) {
        // a thread cannot be killed; it stops at its next loop iteration
        let _ = self.inbox.send(WorkerInput::Host(HostMessage::Shutdown));
    }
}

pub struct ProcessTransport {
    child: Child,
    stdin: ChildStdin,
}

impl ProcessTransport {
    pub fn spawn(program: &PathBuf) -> Result<(Self, Receiver<WorkerMessage>), HostError> {
        let mut child = Command::new(program)
            .arg("worker")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| {
                HostError::Transport(format!("spawn {} worker: {err}", program.display()))
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HostError::Transport("worker stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HostError::Transport("worker stdout unavailable".to_string()))?;

        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("depspider-host-reader".to_string())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let Ok(line) = line else {
                        break;
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<WorkerMessage>(&line) {
                        Ok(message) => {
                            if tx.send(message).is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!("undecodable worker line: {err}"),
                    }
                }
            })
            .map_err(|err| HostError::Transport(format!("spawn reader: {err}")))?;
        Ok((Self { child, stdin }, rx))
    }
}

impl Transport for ProcessTransport {
    fn send(&mut self, message: &HostMessage) -> Result<(), HostError> {
        let line = serde_json::to_string(message)
            .map_err(|err| HostError::Transport(format!("encode message: {err}")))?;
        writeln!(self.stdin, "{line}")
            .and_then(|_| self.stdin.flush())
            .map_err(|err| HostError::WorkerTerminated(format!("write to worker: {err}")))
    }

    fn terminate(&mut self) {
        if let Err(err) = self.child.kill() {
            debug!("worker process already gone: {err}");
        }
        let _ = self.child.wait();
    }
}

struct Running {
    transport: Mutex<Box<dyn Transport>>,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
}

/// Owns at most one worker. A crashed worker is not restarted: its handle is
/// cleared the next time the host is touched, and [`Host::start`] may be
/// called again if that is the desired policy.
pub struct Host {
    options: HostOptions,
    running: Mutex<Option<Arc<Running>>>,
    next_id: AtomicU64,
}

impl Host {
    pub fn new(options: HostOptions) -> Self {
        Self {
            options,
            running: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn is_running(&self) -> bool {
        self.current().is_some()
    }

    /// The live worker, if any. A worker the router saw die is dropped from
    /// the slot here and its transport torn down.
    fn current(&self) -> Option<Arc<Running>> {
        let mut slot = lock(&self.running);
        if slot
            .as_ref()
            .is_some_and(|running| !running.alive.load(Ordering::SeqCst))
        {
            if let Some(dead) = slot.take() {
                lock(&dead.transport).terminate();
                warn!("worker terminated; handle cleared");
            }
        }
        slot.clone()
    }

    /// Spawns the configured transport and waits for `ready`.
    pub fn start(&mut self, config: SpiderConfig) -> Result<ReadyInfo, HostError> {
        let (transport, messages): (Box<dyn Transport>, Receiver<WorkerMessage>) =
            match &self.options.transport {
                TransportKind::Thread => {
                    let (transport, messages) = ThreadTransport::spawn()?;
                    (Box::new(transport), messages)
                }
                TransportKind::Process { program } => {
                    let (transport, messages) = ProcessTransport::spawn(program)?;
                    (Box::new(transport), messages)
                }
            };
        self.start_with(transport, messages, config)
    }

    /// Like [`Host::start`] over an already connected transport.
    pub fn start_with(
        &mut self,
        mut transport: Box<dyn Transport>,
        messages: Receiver<WorkerMessage>,
        config: SpiderConfig,
    ) -> Result<ReadyInfo, HostError> {
        if self.is_running() {
            transport.terminate();
            return Err(HostError::AlreadyStarted);
        }

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel();
        let router = Router {
            pending: Arc::clone(&pending),
            alive: Arc::clone(&alive),
            ready: Some(ready_tx),
            on_progress: self.options.on_progress.clone(),
            on_file_invalidated: self.options.on_file_invalidated.clone(),
        };
        thread::Builder::new()
            .name("depspider-host-router".to_string())
            .spawn(move || router.run(messages))
            .map_err(|err| HostError::Transport(format!("spawn router: {err}")))?;

        transport.send(&HostMessage::Init { config })?;
        let timeout = self.options.warmup_timeout;
        let ready = match ready_rx.recv_timeout(timeout) {
            Ok(Ok(info)) => info,
            Ok(Err(err)) => {
                transport.terminate();
                return Err(err);
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(?timeout, "worker warmup timed out; terminating worker");
                transport.terminate();
                return Err(HostError::WarmupTimeout(timeout));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(HostError::WorkerTerminated(
                    "worker exited before ready".to_string(),
                ));
            }
        };
        info!(
            warmup_ms = ready.warmup_duration_ms,
            indexed_files = ready.indexed_files,
            "worker ready"
        );
        *lock(&self.running) = Some(Arc::new(Running {
            transport: Mutex::new(transport),
            pending,
            alive,
        }));
        Ok(ready)
    }

    pub fn invoke(&self, tool: &str, params: Value) -> Result<Value, HostError> {
        self.invoke_with_timeout(tool, params, self.options.request_timeout)
    }

    /// Sends one request and waits at most `timeout` for its reply. A reply
    /// that arrives after the timeout is dropped.
    pub fn invoke_with_timeout(
        &self,
        tool: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, HostError> {
        let running = self.current().ok_or(HostError::NotStarted)?;
        let request_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel();
        lock(&running.pending).insert(request_id, tx);

        let message = HostMessage::Invoke {
            request_id,
            tool: tool.to_string(),
            params,
        };
        if let Err(err) = lock(&running.transport).send(&message) {
            lock(&running.pending).remove(&request_id);
            return Err(err);
        }

        match rx.recv_timeout(timeout) {
            Ok(reply) => reply,
            Err(RecvTimeoutError::Timeout) => {
                lock(&running.pending).remove(&request_id);
                warn!(request_id, tool, ?timeout, "request timed out");
                Err(HostError::RequestTimeout {
                    request_id,
                    tool: tool.to_string(),
                    timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(HostError::WorkerTerminated(
                "worker dropped the request".to_string(),
            )),
        }
    }

    pub fn shutdown(&mut self) {
        let Some(running) = lock(&self.running).take() else {
            return;
        };
        let mut transport = lock(&running.transport);
        if running.alive.load(Ordering::SeqCst) {
            let _ = transport.send(&HostMessage::Shutdown);
        }
        transport.terminate();
        info!("worker shut down");
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Routes worker messages to their waiters; runs until the worker's outbox
/// disconnects, then fails everything still pending.
struct Router {
    pending: PendingMap,
    alive: Arc<AtomicBool>,
    ready: Option<Sender<Result<ReadyInfo, HostError>>>,
    on_progress: Option<ProgressCallback>,
    on_file_invalidated: Option<InvalidationCallback>,
}

impl Router {
    fn run(mut self, messages: Receiver<WorkerMessage>) {
        for message in messages {
            self.route(message);
        }
        self.alive.store(false, Ordering::SeqCst);
        let orphaned: Vec<(u64, Sender<Reply>)> = lock(&self.pending).drain().collect();
        if !orphaned.is_empty() {
            warn!(pending = orphaned.len(), "worker terminated with requests in flight");
        }
        for (_, waiter) in orphaned {
            let _ = waiter.send(Err(HostError::WorkerTerminated(
                "worker terminated".to_string(),
            )));
        }
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Err(HostError::WorkerTerminated(
                "worker exited before ready".to_string(),
            )));
        }
    }

    fn route(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Ready {
                warmup_duration,
                indexed_files,
            } => {
                if let Some(ready) = self.ready.take() {
                    let _ = ready.send(Ok(ReadyInfo {
                        warmup_duration_ms: warmup_duration,
                        indexed_files,
                    }));
                }
            }
            WorkerMessage::Result {
                request_id,
                data,
                execution_time_ms,
            } => {
                debug!(request_id, execution_time_ms, "result");
                self.resolve(request_id, Ok(data));
            }
            WorkerMessage::Error {
                request_id: Some(request_id),
                error,
                code,
            } => {
                let err = ToolError::new(code.unwrap_or(ErrorCode::ExecutionError), error);
                self.resolve(request_id, Err(HostError::Tool(err)));
            }
            WorkerMessage::Error {
                request_id: None,
                error,
                code,
            } => {
                let err = ToolError::new(code.unwrap_or(ErrorCode::ExecutionError), error);
                match self.ready.take() {
                    Some(ready) => {
                        let _ = ready.send(Err(HostError::Tool(err)));
                    }
                    None => warn!("worker error: {err}"),
                }
            }
            WorkerMessage::WarmupProgress {
                processed,
                total,
                current_file,
            } => {
                if let Some(callback) = &self.on_progress {
                    callback(processed, total, current_file.as_deref());
                }
            }
            WorkerMessage::FileInvalidated { file_path, event } => {
                debug!(path = %file_path, event = event.as_str(), "file invalidated");
                if let Some(callback) = &self.on_file_invalidated {
                    callback(&file_path, event);
                }
            }
        }
    }

    fn resolve(&self, request_id: u64, reply: Reply) {
        match lock(&self.pending).remove(&request_id) {
            Some(waiter) => {
                let _ = waiter.send(reply);
            }
            None => debug!(request_id, "dropping reply for a request that already timed out"),
        }
    }
}
