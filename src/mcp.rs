use crate::config::SpiderConfig;
use crate::error::HostError;
use crate::rpc::serve_lines;
use crate::worker::tools::{TOOL_DOCS, tool_schema};
use crate::worker::{Host, HostOptions};
use anyhow::{Context, Result};
use serde_json::{Map, Value, json};
use tracing::info;

const MAX_RESPONSE_BYTES: usize = 512_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextMode {
    None,
    Compact,
    Pretty,
}

/// How a `tools/call` result is rendered. Both knobs ride along in the tool
/// arguments and are stripped before the worker sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Presentation {
    text: TextMode,
    structured: bool,
}

impl Presentation {
    fn take_from(arguments: &mut Map<String, Value>) -> Self {
        let text = match arguments.remove("text_mode").as_ref().and_then(Value::as_str) {
            Some("none") => TextMode::None,
            Some("compact") => TextMode::Compact,
            _ => TextMode::Pretty,
        };
        let structured = arguments
            .remove("include_structured")
            .and_then(|value| value.as_bool())
            .unwrap_or(true);
        Self { text, structured }
    }

    fn render(self, value: &Value) -> Option<String> {
        match self.text {
            TextMode::None => None,
            TextMode::Compact => serde_json::to_string(value).ok(),
            TextMode::Pretty => serde_json::to_string_pretty(value).ok(),
        }
    }

    fn success(self, result: Value) -> Value {
        let content: Vec<Value> = self
            .render(&result)
            .map(|text| {
                if text.len() > MAX_RESPONSE_BYTES {
                    format!(
                        "Response too large ({} bytes). Narrow the request, e.g. a lower maxDepth.",
                        text.len()
                    )
                } else {
                    text
                }
            })
            .map(|text| json!({ "type": "text", "text": text }))
            .into_iter()
            .collect();
        let mut payload = json!({ "content": content, "isError": false });
        if self.structured {
            payload["structuredContent"] = match result {
                Value::Object(_) => result,
                other => json!({ "items": other }),
            };
        }
        payload
    }

    fn failure(self, message: &str) -> Value {
        let content = match self.text {
            TextMode::None => Vec::new(),
            _ => vec![json!({ "type": "text", "text": message })],
        };
        json!({ "content": content, "isError": true })
    }
}

/// Whatever executes a tool by name; the host in production.
trait ToolCaller {
    fn call_tool(&self, tool: &str, params: Value) -> Result<Value, HostError>;
}

impl ToolCaller for Host {
    fn call_tool(&self, tool: &str, params: Value) -> Result<Value, HostError> {
        self.invoke(tool, params)
    }
}

pub fn serve(config: SpiderConfig, options: HostOptions) -> Result<()> {
    let mut host = Host::new(options);
    let ready = host.start(config).context("start worker")?;
    info!(
        warmup_ms = ready.warmup_duration_ms,
        indexed_files = ready.indexed_files,
        "mcp server ready"
    );

    let served = serve_lines(|line| match serde_json::from_str::<Value>(line) {
        Ok(message) => handle_message(message, &host),
        Err(err) => Some(jsonrpc_error(
            Value::Null,
            -32700,
            &format!("parse error: {err}"),
        )),
    });
    host.shutdown();
    served
}

fn handle_message(message: Value, caller: &dyn ToolCaller) -> Option<Value> {
    let id = message.get("id").cloned();
    let method = message.get("method").and_then(|value| value.as_str());

    let Some(method) = method else {
        return id.map(|id| jsonrpc_error(id, -32600, "invalid request"));
    };

    match method {
        "initialize" => {
            let id = id?;
            Some(jsonrpc_result(id, initialize_result(&message)))
        }
        "notifications/initialized" => None,
        "ping" => id.map(|id| jsonrpc_result(id, json!({}))),
        "tools/list" => {
            let id = id?;
            Some(jsonrpc_result(id, json!({ "tools": tool_specs() })))
        }
        "tools/call" => {
            let id = id?;
            Some(handle_tool_call(id, &message, caller))
        }
        "resources/list" => id.map(|id| jsonrpc_result(id, json!({ "resources": [] }))),
        "prompts/list" => id.map(|id| jsonrpc_result(id, json!({ "prompts": [] }))),
        _ => id.map(|id| jsonrpc_error(id, -32601, "method not found")),
    }
}

fn initialize_result(message: &Value) -> Value {
    let protocol = message
        .get("params")
        .and_then(|params| params.get("protocolVersion"))
        .cloned()
        .unwrap_or_else(|| Value::String("2024-11-05".to_string()));
    json!({
        "protocolVersion": protocol,
        "capabilities": { "tools": {} },
        "serverInfo": {
            "name": "depspider",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "instructions": "File paths may be absolute or relative to the workspace root; paths \
outside the workspace are rejected. Start with crawl_dependency_graph for structure, \
get_impact_analysis before changing a symbol, and analyze_breaking_changes to compare two \
versions of a file. Extra arguments: text_mode (none|compact|pretty), include_structured.",
    })
}

fn tool_specs() -> Vec<Value> {
    TOOL_DOCS
        .iter()
        .filter_map(|doc| {
            let schema = tool_schema(doc.name)?;
            Some(json!({
                "name": doc.name,
                "description": doc.summary,
                "inputSchema": schema,
            }))
        })
        .collect()
}

fn handle_tool_call(id: Value, message: &Value, caller: &dyn ToolCaller) -> Value {
    let params = match message.get("params") {
        Some(value) => value,
        None => return jsonrpc_error(id, -32602, "missing params"),
    };
    let tool_name = params
        .get("name")
        .and_then(|value| value.as_str())
        .unwrap_or("");
    if tool_schema(tool_name).is_none() {
        return jsonrpc_error(id, -32601, &format!("unknown tool: {tool_name}"));
    }

    let mut arguments = match params.get("arguments") {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Null) | None => Map::new(),
        Some(_) => return jsonrpc_error(id, -32602, "arguments must be an object"),
    };
    let presentation = Presentation::take_from(&mut arguments);

    match caller.call_tool(tool_name, Value::Object(arguments)) {
        Ok(result) => jsonrpc_result(id, presentation.success(result)),
        Err(err) => {
            let message = match &err {
                HostError::Tool(tool) => format!("{}: {}", tool.code, tool.message),
                other => format!("{}: {other}", other.code()),
            };
            jsonrpc_result(id, presentation.failure(&message))
        }
    }
}

fn jsonrpc_result(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn jsonrpc_error(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}
