//! Host <-> worker messages. Both transports carry exactly these values; the
//! child-process transport writes one JSON object per line.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::config::SpiderConfig;
use crate::error::ErrorCode;
use crate::watch::FileEventKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HostMessage {
    Init {
        config: SpiderConfig,
    },
    #[serde(rename_all = "camelCase")]
    Invoke {
        request_id: u64,
        tool: String,
        #[serde(default)]
        params: Value,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerMessage {
    #[serde(rename_all = "camelCase")]
    Ready {
        /// Milliseconds spent between `init` and `ready`.
        warmup_duration: u64,
        indexed_files: usize,
    },
    #[serde(rename_all = "camelCase")]
    Result {
        request_id: u64,
        data: Value,
        execution_time_ms: u64,
    },
    /// `request_id` is absent only for a rejected `init`.
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
    },
    #[serde(rename_all = "camelCase")]
    WarmupProgress {
        processed: usize,
        total: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_file: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    FileInvalidated {
        file_path: String,
        event: FileEventKind,
    },
}

/// Everything the worker loop consumes: host traffic plus raw watcher events.
#[derive(Debug, Clone)]
pub enum WorkerInput {
    Host(HostMessage),
    FileEvent { path: PathBuf, kind: FileEventKind },
    /// A line the transport could not decode.
    Rejected {
        request_id: Option<u64>,
        error: String,
    },
}

impl From<HostMessage> for WorkerInput {
    fn from(message: HostMessage) -> Self {
        WorkerInput::Host(message)
    }
}
