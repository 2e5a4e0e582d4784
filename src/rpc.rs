use crate::config::SpiderConfig;
use crate::error::{ErrorCode, HostError};
use crate::worker::tools::{TOOL_DOCS, tool_schema};
use crate::worker::{Host, HostOptions, ReadyInfo};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::io::{self, BufRead, Write};
use tracing::{info, warn};

#[derive(Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Serialize)]
struct RpcResponse {
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: ErrorCode,
    message: String,
}

/// Methods answered by the wrapper itself rather than the worker.
fn local_method(method: &str, params: &Value) -> Option<Value> {
    match method {
        "help" | "list_tools" => Some(json!({
            "tools": TOOL_DOCS
                .iter()
                .map(|doc| json!({ "name": doc.name, "summary": doc.summary }))
                .collect::<Vec<_>>(),
        })),
        "describe_tool" => {
            let name = params.get("name").and_then(|value| value.as_str())?;
            let schema = tool_schema(name)?;
            let summary = TOOL_DOCS
                .iter()
                .find(|doc| doc.name == name)
                .map(|doc| doc.summary)
                .unwrap_or_default();
            Some(json!({ "name": name, "summary": summary, "inputSchema": schema }))
        }
        _ => None,
    }
}

/// Feeds each non-blank stdin line to `handle` and writes whatever it
/// returns as one stdout line. Stops at EOF or on a read error.
pub(crate) fn serve_lines<F>(mut handle: F) -> Result<()>
where
    F: FnMut(&str) -> Option<Value>,
{
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!("stdin closed with error: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        if let Some(reply) = handle(&line) {
            writeln!(stdout, "{}", serde_json::to_string(&reply)?)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

/// JSONL server over stdin/stdout backed by one worker.
pub fn serve(config: SpiderConfig, options: HostOptions) -> Result<()> {
    let mut app = App::start(config, options)?;
    let served = serve_lines(|line| {
        let response = match serde_json::from_str::<RpcRequest>(line) {
            Ok(request) => app.handle_request(request),
            Err(err) => error_response(
                Value::Null,
                ErrorCode::ValidationError,
                &format!("invalid request: {err}"),
            ),
        };
        serde_json::to_value(response).ok()
    });
    app.host.shutdown();
    served
}

/// Runs one request against a fresh worker and returns the response line.
pub fn call(
    config: SpiderConfig,
    options: HostOptions,
    method: String,
    params_raw: &str,
    id_raw: &str,
) -> Result<String> {
    let params: Value = serde_json::from_str(params_raw).with_context(|| "parse params JSON")?;
    let id = parse_value(id_raw);
    let mut app = App::start(config, options)?;
    let request = RpcRequest { id, method, params };
    let response = app.handle_request(request);
    app.host.shutdown();
    Ok(serde_json::to_string(&response)?)
}

struct App {
    host: Host,
}

impl App {
    fn start(config: SpiderConfig, options: HostOptions) -> Result<Self> {
        let mut host = Host::new(options);
        let ReadyInfo {
            warmup_duration_ms,
            indexed_files,
        } = host.start(config).context("start worker")?;
        info!(warmup_duration_ms, indexed_files, "rpc server ready");
        Ok(Self { host })
    }

    fn handle_request(&mut self, req: RpcRequest) -> RpcResponse {
        let id = req.id.clone();
        if let Some(value) = local_method(&req.method, &req.params) {
            return RpcResponse {
                id,
                result: Some(value),
                error: None,
            };
        }

        match self.host.invoke(&req.method, req.params) {
            Ok(value) => RpcResponse {
                id,
                result: Some(value),
                error: None,
            },
            Err(err) => host_error_response(id, &err),
        }
    }
}

fn host_error_response(id: Value, err: &HostError) -> RpcResponse {
    let message = match err {
        HostError::Tool(tool) => tool.message.clone(),
        other => other.to_string(),
    };
    error_response(id, err.code(), &message)
}

fn error_response(id: Value, code: ErrorCode, message: &str) -> RpcResponse {
    RpcResponse {
        id,
        result: None,
        error: Some(RpcError {
            code,
            message: message.to_string(),
        }),
    }
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;

    #[test]
    fn ids_fall_back_to_strings() {
        assert_eq!(parse_value("7"), json!(7));
        assert_eq!(parse_value("req-a"), json!("req-a"));
    }

    #[test]
    fn tool_errors_keep_their_code() {
        let err = HostError::Tool(ToolError::security("path escapes workspace"));
        let response = serde_json::to_value(host_error_response(json!(1), &err)).unwrap();
        assert_eq!(
            response,
            json!({
                "id": 1,
                "error": {"code": "SECURITY_ERROR", "message": "path escapes workspace"}
            })
        );
    }

    #[test]
    fn help_lists_every_tool() {
        let help = local_method("help", &Value::Null).unwrap();
        assert_eq!(help["tools"].as_array().unwrap().len(), TOOL_DOCS.len());
        let described = local_method("describe_tool", &json!({"name": "crawl_dependency_graph"}))
            .unwrap();
        assert_eq!(described["inputSchema"]["type"], "object");
        assert!(local_method("describe_tool", &json!({"name": "nope"})).is_none());
    }
}
