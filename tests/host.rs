use depspider::config::SpiderConfig;
use depspider::error::{ErrorCode, HostError};
use depspider::watch::FileEventKind;
use depspider::worker::{Host, HostMessage, HostOptions, Transport, WorkerMessage};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Scripted stand-in for a worker. The script returns `false` to simulate a
/// crash: the thread exits and its outbox disconnects.
struct FakeTransport {
    inbox: Sender<HostMessage>,
    terminated: Arc<AtomicBool>,
}

impl Transport for FakeTransport {
    fn send(&mut self, message: &HostMessage) -> Result<(), HostError> {
        self.inbox
            .send(message.clone())
            .map_err(|_| HostError::WorkerTerminated("fake worker gone".into()))
    }

    fn terminate(&mut self) {
        self.terminated.store(true, Ordering::SeqCst);
    }
}

fn fake_worker<F>(
    mut script: F,
) -> (
    Box<dyn Transport>,
    mpsc::Receiver<WorkerMessage>,
    Arc<AtomicBool>,
)
where
    F: FnMut(HostMessage, &Sender<WorkerMessage>) -> bool + Send + 'static,
{
    let (host_tx, host_rx) = mpsc::channel::<HostMessage>();
    let (worker_tx, worker_rx) = mpsc::channel();
    thread::spawn(move || {
        for message in host_rx {
            if !script(message, &worker_tx) {
                break;
            }
        }
    });
    let terminated = Arc::new(AtomicBool::new(false));
    let transport = FakeTransport {
        inbox: host_tx,
        terminated: Arc::clone(&terminated),
    };
    (Box::new(transport), worker_rx, terminated)
}

fn ready(out: &Sender<WorkerMessage>) {
    out.send(WorkerMessage::Ready {
        warmup_duration: 5,
        indexed_files: 2,
    })
    .unwrap();
}

fn options() -> HostOptions {
    HostOptions {
        warmup_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(5),
        ..HostOptions::default()
    }
}

fn config() -> SpiderConfig {
    SpiderConfig::new("/unused-by-fake-worker")
}

#[test]
fn timed_out_request_drops_its_late_reply() {
    let (transport, messages, _) = fake_worker(|message, out| {
        match message {
            HostMessage::Init { .. } => ready(out),
            HostMessage::Invoke {
                request_id, tool, ..
            } => {
                if tool == "slow" {
                    thread::sleep(Duration::from_millis(200));
                }
                out.send(WorkerMessage::Result {
                    request_id,
                    data: json!({ "tool": tool }),
                    execution_time_ms: 0,
                })
                .unwrap();
            }
            HostMessage::Shutdown => return false,
        }
        true
    });
    let mut host = Host::new(options());
    let info = host.start_with(transport, messages, config()).unwrap();
    assert_eq!(info.indexed_files, 2);

    let err = host
        .invoke_with_timeout("slow", json!({}), Duration::from_millis(50))
        .unwrap_err();
    assert!(matches!(err, HostError::RequestTimeout { ref tool, .. } if tool == "slow"));
    assert_eq!(err.code(), ErrorCode::ExecutionError);

    // The late "slow" reply arrives while this call waits and must not be
    // mistaken for it.
    let value = host.invoke("fast", json!({})).unwrap();
    assert_eq!(value, json!({ "tool": "fast" }));
    host.shutdown();
}

#[test]
fn worker_crash_rejects_pending_requests() {
    let (transport, messages, crashed) = fake_worker(|message, out| match message {
        HostMessage::Init { .. } => {
            ready(out);
            true
        }
        HostMessage::Invoke { .. } => false,
        HostMessage::Shutdown => false,
    });
    let mut host = Host::new(options());
    host.start_with(transport, messages, config()).unwrap();
    assert!(host.is_running());

    let err = host.invoke("get_index_status", json!({})).unwrap_err();
    assert!(matches!(err, HostError::WorkerTerminated(_)), "{err:?}");

    // Router marks the host dead once the outbox disconnects.
    for _ in 0..50 {
        if !host.is_running() {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(!host.is_running());
    assert!(crashed.load(Ordering::SeqCst));
    assert!(matches!(
        host.invoke("get_index_status", json!({})),
        Err(HostError::NotStarted)
    ));

    // The dead handle is gone, so a fresh worker can be started.
    let (transport, messages, _) = fake_worker(|message, out| {
        if let HostMessage::Init { .. } = message {
            ready(out);
        }
        !matches!(message, HostMessage::Shutdown)
    });
    host.start_with(transport, messages, config()).unwrap();
    assert!(host.is_running());
    host.shutdown();
}

#[test]
fn crash_before_ready_fails_start() {
    let (transport, messages, _) = fake_worker(|_, _| false);
    let mut host = Host::new(options());
    let err = host.start_with(transport, messages, config()).unwrap_err();
    assert!(matches!(err, HostError::WorkerTerminated(_)), "{err:?}");
    assert!(!host.is_running());
}

#[test]
fn warmup_timeout_terminates_the_worker() {
    let (transport, messages, terminated) = fake_worker(|_, _| true);
    let mut host = Host::new(HostOptions {
        warmup_timeout: Duration::from_millis(50),
        ..options()
    });
    let err = host.start_with(transport, messages, config()).unwrap_err();
    assert!(matches!(err, HostError::WarmupTimeout(_)));
    assert!(terminated.load(Ordering::SeqCst));
}

#[test]
fn rejected_init_surfaces_its_code() {
    let (transport, messages, _) = fake_worker(|message, out| {
        if let HostMessage::Init { .. } = message {
            out.send(WorkerMessage::Error {
                request_id: None,
                error: "workspaceRoot is not a directory".into(),
                code: Some(ErrorCode::ValidationError),
            })
            .unwrap();
        }
        true
    });
    let mut host = Host::new(options());
    let err = host.start_with(transport, messages, config()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);
}

#[test]
fn tool_errors_and_callbacks_pass_through() {
    let (transport, messages, _) = fake_worker(|message, out| {
        match message {
            HostMessage::Init { .. } => {
                out.send(WorkerMessage::WarmupProgress {
                    processed: 1,
                    total: 2,
                    current_file: Some("/w/a.ts".into()),
                })
                .unwrap();
                ready(out);
                out.send(WorkerMessage::FileInvalidated {
                    file_path: "/w/a.ts".into(),
                    event: FileEventKind::Change,
                })
                .unwrap();
            }
            HostMessage::Invoke { request_id, .. } => {
                out.send(WorkerMessage::Error {
                    request_id: Some(request_id),
                    error: "path escapes workspace".into(),
                    code: Some(ErrorCode::SecurityError),
                })
                .unwrap();
            }
            HostMessage::Shutdown => return false,
        }
        true
    });
    let progress = Arc::new(AtomicUsize::new(0));
    let invalidated = Arc::new(Mutex::new(Vec::new()));
    let progress_seen = Arc::clone(&progress);
    let invalidated_seen = Arc::clone(&invalidated);
    let mut host = Host::new(HostOptions {
        on_progress: Some(Arc::new(move |processed: usize, _: usize, _: Option<&str>| {
            progress_seen.store(processed, Ordering::SeqCst);
        })),
        on_file_invalidated: Some(Arc::new(move |path: &str, _: FileEventKind| {
            invalidated_seen.lock().unwrap().push(path.to_string());
        })),
        ..options()
    });
    host.start_with(transport, messages, config()).unwrap();
    assert_eq!(progress.load(Ordering::SeqCst), 1);

    let err = host
        .invoke("analyze_dependencies", json!({"filePath": "../etc/passwd"}))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::SecurityError);
    // The invalidation was sent before the reply on the same channel.
    assert_eq!(*invalidated.lock().unwrap(), vec!["/w/a.ts".to_string()]);
    host.shutdown();
}

#[test]
fn second_start_is_rejected() {
    let (transport, messages, _) = fake_worker(|message, out| {
        if let HostMessage::Init { .. } = message {
            ready(out);
        }
        !matches!(message, HostMessage::Shutdown)
    });
    let mut host = Host::new(options());
    host.start_with(transport, messages, config()).unwrap();

    let (transport, messages, terminated) = fake_worker(|_, _| true);
    let err = host.start_with(transport, messages, config()).unwrap_err();
    assert!(matches!(err, HostError::AlreadyStarted));
    assert!(terminated.load(Ordering::SeqCst));
    host.shutdown();
}

#[test]
fn thread_worker_serves_real_requests() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(
        dir.path().join("src/main.ts"),
        "import { a } from './a';\nconsole.log(a);\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("src/a.ts"), "export const a = 1;\n").unwrap();

    let mut config = SpiderConfig::new(dir.path());
    config.enable_file_watcher = false;
    let mut host = Host::new(options());
    let info = host.start(config).unwrap();
    assert_eq!(info.indexed_files, 2);

    let graph = host
        .invoke(
            "crawl_dependency_graph",
            json!({"entryFile": "src/main.ts", "maxDepth": 2}),
        )
        .unwrap();
    assert_eq!(graph["nodes"].as_array().unwrap().len(), 2);

    let refs = host
        .invoke("find_referencing_files", json!({"filePath": "src/a.ts"}))
        .unwrap();
    assert_eq!(refs["count"], 1);
    host.shutdown();
    assert!(!host.is_running());
}
