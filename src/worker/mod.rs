//! The isolated worker: owns the spider and answers host messages.
//!
//! Everything that mutates the cache and the indexes runs on the worker's
//! single loop. Index passes advance one file per iteration and queued input
//! is drained in between, so progress messages, invokes and watcher events
//! are serviced while the workspace is still being indexed.

pub mod host;
pub mod protocol;
pub mod tools;

pub use host::{Host, HostOptions, ReadyInfo, Transport, TransportKind};
pub use protocol::{HostMessage, WorkerInput, WorkerMessage};
pub use tools::{ToolRequest, dispatch};

use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::SpiderConfig;
use crate::error::{ErrorCode, ToolError};
use crate::spider::{IndexPass, IndexStep, Spider};
use crate::util;
use crate::watch::{self, ChangeScheduler, FileEventKind, InvalidationSink, PathFilter, WatchHandle};

const SLOW_QUERY_MS: u128 = 100;

enum PassPurpose {
    Warmup,
    Rebuild { request_id: u64, started: Instant },
}

struct ActivePass {
    pass: IndexPass,
    purpose: PassPurpose,
}

struct WorkerContext {
    spider: Spider,
    scheduler: ChangeScheduler,
    pass: Option<ActivePass>,
    watcher: Option<WatchHandle>,
    init_started: Instant,
    ready_sent: bool,
}

#[derive(PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub struct Worker {
    inbox: Receiver<WorkerInput>,
    /// Handed to the file watcher once warmup is over; dropped otherwise so
    /// the inbox disconnects when the host goes away.
    events: Option<Sender<WorkerInput>>,
    outbox: Sender<WorkerMessage>,
    ctx: Option<WorkerContext>,
}

fn emit(outbox: &Sender<WorkerMessage>, message: WorkerMessage) {
    if outbox.send(message).is_err() {
        debug!("host is gone; dropping worker message");
    }
}

fn error_message(request_id: Option<u64>, err: &ToolError) -> WorkerMessage {
    WorkerMessage::Error {
        request_id,
        error: err.message.clone(),
        code: Some(err.code),
    }
}

/// Forwards debounced invalidations to the spider and tells the host.
struct Notifier<'a> {
    spider: &'a mut Spider,
    outbox: &'a Sender<WorkerMessage>,
}

impl InvalidationSink for Notifier<'_> {
    fn apply(&mut self, path: &Path, kind: FileEventKind) {
        InvalidationSink::apply(&mut *self.spider, path, kind);
        emit(
            self.outbox,
            WorkerMessage::FileInvalidated {
                file_path: util::path_key(path),
                event: kind,
            },
        );
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Worker {
    pub fn new(
        inbox: Receiver<WorkerInput>,
        events: Sender<WorkerInput>,
        outbox: Sender<WorkerMessage>,
    ) -> Self {
        Self {
            inbox,
            events: Some(events),
            outbox,
            ctx: None,
        }
    }

    /// Serves until `shutdown` arrives or the inbox disconnects.
    pub fn run(mut self) {
        debug!("worker loop started");
        loop {
            let input = match self.next_input() {
                Ok(input) => input,
                Err(()) => break,
            };
            if let Some(input) = input {
                if self.handle_input(input) == Flow::Stop {
                    break;
                }
            }
            self.flush_changes();
            self.step_pass();
        }
        self.shutdown();
    }

    /// Blocks only when no pass is running, and never past the next debounce
    /// deadline.
    fn next_input(&self) -> Result<Option<WorkerInput>, ()> {
        let busy = self.ctx.as_ref().is_some_and(|ctx| ctx.pass.is_some());
        if busy {
            return match self.inbox.try_recv() {
                Ok(input) => Ok(Some(input)),
                Err(TryRecvError::Empty) => Ok(None),
                Err(TryRecvError::Disconnected) => Err(()),
            };
        }
        let deadline = self
            .ctx
            .as_ref()
            .and_then(|ctx| ctx.scheduler.next_deadline());
        match deadline {
            Some(deadline) => {
                let wait = deadline.saturating_duration_since(Instant::now());
                match self.inbox.recv_timeout(wait) {
                    Ok(input) => Ok(Some(input)),
                    Err(RecvTimeoutError::Timeout) => Ok(None),
                    Err(RecvTimeoutError::Disconnected) => Err(()),
                }
            }
            None => self.inbox.recv().map(Some).map_err(|_| ()),
        }
    }

    fn handle_input(&mut self, input: WorkerInput) -> Flow {
        match input {
            WorkerInput::Host(HostMessage::Init { config }) => self.handle_init(config),
            WorkerInput::Host(HostMessage::Invoke {
                request_id,
                tool,
                params,
            }) => self.handle_invoke(request_id, &tool, params),
            WorkerInput::Host(HostMessage::Shutdown) => return Flow::Stop,
            WorkerInput::FileEvent { path, kind } => {
                if let Some(ctx) = self.ctx.as_mut() {
                    ctx.scheduler.schedule(&path, kind, Instant::now());
                }
            }
            WorkerInput::Rejected { request_id, error } => {
                let err = ToolError::validation(error);
                emit(&self.outbox, error_message(request_id, &err));
            }
        }
        Flow::Continue
    }

    fn handle_init(&mut self, config: SpiderConfig) {
        if self.ctx.is_some() {
            let err = ToolError::validation("worker is already initialized");
            emit(&self.outbox, error_message(None, &err));
            return;
        }
        let init_started = Instant::now();
        let debounce = Duration::from_millis(config.debounce_ms);
        let spider = match Spider::with_default_parsers(config) {
            Ok(spider) => spider,
            Err(err) => {
                error!("worker init failed: {err:#}");
                let err = ToolError::new(ErrorCode::ValidationError, format!("{err:#}"));
                emit(&self.outbox, error_message(None, &err));
                return;
            }
        };
        info!(root = %spider.root().display(), "worker initialized");

        let mut ctx = WorkerContext {
            spider,
            scheduler: ChangeScheduler::new(debounce),
            pass: None,
            watcher: None,
            init_started,
            ready_sent: false,
        };
        if ctx.spider.config().enable_warmup {
            match ctx.spider.begin_index() {
                Ok(pass) => {
                    ctx.pass = Some(ActivePass {
                        pass,
                        purpose: PassPurpose::Warmup,
                    });
                }
                Err(err) => warn!("warmup could not start: {err:#}"),
            }
        }
        let idle = ctx.pass.is_none();
        self.ctx = Some(ctx);
        if idle {
            self.finish_warmup();
        }
    }

    /// Starts the watcher and answers `ready`, whatever the warmup outcome.
    fn finish_warmup(&mut self) {
        let events = self.events.take();
        let Some(ctx) = self.ctx.as_mut() else {
            return;
        };
        if ctx.ready_sent {
            return;
        }
        if let Some(events) = events {
            if ctx.spider.config().enable_file_watcher {
                let root = ctx.spider.root().to_path_buf();
                let filter = PathFilter::new(
                    &root,
                    ctx.spider.config().respect_gitignore,
                    ctx.spider.exclude_filter().clone(),
                );
                let started = watch::start(&root, filter, move |path, kind| {
                    let _ = events.send(WorkerInput::FileEvent { path, kind });
                });
                match started {
                    Ok(handle) => ctx.watcher = Some(handle),
                    Err(err) => warn!("file watcher unavailable: {err:#}"),
                }
            }
        }
        ctx.ready_sent = true;
        let warmup_duration = ctx.init_started.elapsed().as_millis() as u64;
        let indexed_files = ctx.spider.cache().len();
        info!(warmup_duration, indexed_files, "worker ready");
        emit(
            &self.outbox,
            WorkerMessage::Ready {
                warmup_duration,
                indexed_files,
            },
        );
    }

    fn handle_invoke(&mut self, request_id: u64, tool: &str, params: serde_json::Value) {
        let Some(ctx) = self.ctx.as_mut() else {
            emit(&self.outbox, error_message(Some(request_id), &ToolError::not_initialized()));
            return;
        };
        let started = Instant::now();
        let request = match ToolRequest::parse(tool, params) {
            Ok(request) => request,
            Err(err) => {
                debug!(tool, "rejected invoke: {err}");
                emit(&self.outbox, error_message(Some(request_id), &err));
                return;
            }
        };
        if matches!(request, ToolRequest::RebuildIndex(_)) {
            self.start_rebuild(request_id);
            return;
        }

        let spider = &mut ctx.spider;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| tools::dispatch(spider, request)))
            .unwrap_or_else(|payload| {
                error!(tool, "tool panicked");
                Err(ToolError::execution(format!(
                    "{tool} panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });
        let elapsed = started.elapsed();
        if elapsed.as_millis() > SLOW_QUERY_MS {
            warn!(tool, elapsed_ms = elapsed.as_millis() as u64, "slow query");
        }
        let message = match outcome {
            Ok(data) => WorkerMessage::Result {
                request_id,
                data,
                execution_time_ms: elapsed.as_millis() as u64,
            },
            Err(err) => error_message(Some(request_id), &err),
        };
        emit(&self.outbox, message);
    }

    /// Cancels whatever pass is running (between files) and starts a new one.
    fn start_rebuild(&mut self, request_id: u64) {
        let Some(ctx) = self.ctx.as_mut() else {
            return;
        };
        if let Some(mut active) = ctx.pass.take() {
            active.pass.cancel();
            if let IndexStep::Done(summary) = ctx.spider.index_step(&mut active.pass) {
                info!(processed = active.pass.processed(), "cancelled running index pass");
                if let PassPurpose::Rebuild {
                    request_id: previous,
                    started,
                } = active.purpose
                {
                    emit(
                        &self.outbox,
                        WorkerMessage::Result {
                            request_id: previous,
                            data: serde_json::to_value(summary).unwrap_or_default(),
                            execution_time_ms: started.elapsed().as_millis() as u64,
                        },
                    );
                }
            }
        }
        match ctx.spider.begin_index() {
            Ok(pass) => {
                ctx.pass = Some(ActivePass {
                    pass,
                    purpose: PassPurpose::Rebuild {
                        request_id,
                        started: Instant::now(),
                    },
                });
            }
            Err(err) => {
                let err = ToolError::execution(format!("rebuild failed: {err:#}"));
                emit(&self.outbox, error_message(Some(request_id), &err));
                if !ctx.ready_sent {
                    self.finish_warmup();
                }
            }
        }
    }

    fn step_pass(&mut self) {
        let Some(ctx) = self.ctx.as_mut() else {
            return;
        };
        let Some(active) = ctx.pass.as_mut() else {
            return;
        };
        match ctx.spider.index_step(&mut active.pass) {
            IndexStep::Progress {
                report: Some(status),
            } => {
                if matches!(active.purpose, PassPurpose::Warmup) {
                    emit(
                        &self.outbox,
                        WorkerMessage::WarmupProgress {
                            processed: status.processed,
                            total: status.total,
                            current_file: status.current_file,
                        },
                    );
                }
            }
            IndexStep::Progress { report: None } => {}
            IndexStep::Done(summary) => {
                let purpose = ctx.pass.take().map(|active| active.purpose);
                ctx.spider.record_warmup(&summary);
                if let Some(PassPurpose::Rebuild {
                    request_id,
                    started,
                }) = purpose
                {
                    emit(
                        &self.outbox,
                        WorkerMessage::Result {
                            request_id,
                            data: serde_json::to_value(summary).unwrap_or_default(),
                            execution_time_ms: started.elapsed().as_millis() as u64,
                        },
                    );
                }
                if !ctx.ready_sent {
                    self.finish_warmup();
                }
            }
        }
    }

    fn flush_changes(&mut self) {
        let Some(ctx) = self.ctx.as_mut() else {
            return;
        };
        if ctx.scheduler.is_empty() {
            return;
        }
        let mut sink = Notifier {
            spider: &mut ctx.spider,
            outbox: &self.outbox,
        };
        ctx.scheduler.flush_due(Instant::now(), &mut sink);
    }

    fn shutdown(&mut self) {
        if let Some(mut ctx) = self.ctx.take() {
            ctx.watcher = None;
            ctx.scheduler.clear();
            if let Some(active) = ctx.pass.take() {
                active.pass.cancel();
            }
            ctx.spider.shutdown();
        }
        info!("worker stopped");
    }
}

/// Runs a worker on its own thread. Returns the inbox sender, the outbox
/// receiver and the thread handle.
pub fn spawn_thread() -> Result<(Sender<WorkerInput>, Receiver<WorkerMessage>, thread::JoinHandle<()>)>
{
    let (input_tx, input_rx) = mpsc::channel();
    let (output_tx, output_rx) = mpsc::channel();
    let worker = Worker::new(input_rx, input_tx.clone(), output_tx);
    let handle = thread::Builder::new()
        .name("depspider-worker".to_string())
        .spawn(move || worker.run())
        .context("spawn worker thread")?;
    Ok((input_tx, output_rx, handle))
}

/// Child-process entry point: host messages arrive as JSON lines on stdin,
/// worker messages leave as JSON lines on stdout.
pub fn run_stdio() -> Result<()> {
    let (input_tx, input_rx) = mpsc::channel();
    let (output_tx, output_rx) = mpsc::channel::<WorkerMessage>();

    let reader_tx = input_tx.clone();
    thread::Builder::new()
        .name("depspider-stdin".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(value) => value,
                    Err(err) => {
                        warn!("stdin error: {err}");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let input = match serde_json::from_str::<HostMessage>(&line) {
                    Ok(message) => WorkerInput::Host(message),
                    Err(err) => WorkerInput::Rejected {
                        request_id: serde_json::from_str::<serde_json::Value>(&line)
                            .ok()
                            .and_then(|value| value.get("requestId").and_then(|id| id.as_u64())),
                        error: format!("invalid message: {err}"),
                    },
                };
                if reader_tx.send(input).is_err() {
                    return;
                }
            }
            let _ = reader_tx.send(WorkerInput::Host(HostMessage::Shutdown));
        })
        .context("spawn stdin reader")?;

    let writer = thread::Builder::new()
        .name("depspider-stdout".to_string())
        .spawn(move || -> Result<()> {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            for message in output_rx {
                writeln!(out, "{}", serde_json::to_string(&message)?)?;
                out.flush()?;
            }
            Ok(())
        })
        .context("spawn stdout writer")?;

    Worker::new(input_rx, input_tx, output_tx).run();
    match writer.join() {
        Ok(result) => result,
        Err(_) => anyhow::bail!("stdout writer panicked"),
    }
}
