//! Mock MCP server for integration testing.
//!
//! Speaks newline-delimited JSON-RPC on stdio and answers initialize,
//! tools/list and tools/call.
//!
//! Usage:
//!   mock-mcp-server [--delay-ms N] [--crash-on TOOL] [--reject-init]
//!                   [--silent-init] [--garbage] [--split] [--page-size N]
//!                   [--ask-client] [--cycle-cursor] [--exit-on-init]
//!
//! Options:
//!   --delay-ms N      Add N ms delay to all responses
//!   --crash-on TOOL   Exit with code 1 when TOOL is called
//!   --reject-init     Answer initialize with an error
//!   --silent-init     Never answer initialize
//!   --garbage         Emit blank and non-JSON lines around every response
//!   --split           Write every response in two separately flushed halves
//!   --page-size N     Paginate tools/list with N tools per page
//!   --ask-client      Send a request and a notification to the client after
//!                     the initialized notification
//!   --cycle-cursor    Answer tools/list with one tool per page and cursors
//!                     that alternate between "A" and "B" forever
//!   --exit-on-init    Exit with code 1 as soon as initialize arrives

use std::env;
use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};

/// Server configuration parsed from command line.
#[derive(Default)]
struct ServerConfig {
    delay_ms: u64,
    crash_on: Option<String>,
    reject_init: bool,
    silent_init: bool,
    garbage: bool,
    split: bool,
    page_size: Option<usize>,
    ask_client: bool,
    cycle_cursor: bool,
    exit_on_init: bool,
}

impl ServerConfig {
    fn from_args() -> Self {
        let mut config = Self::default();
        let mut args = env::args().skip(1);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--delay-ms" => {
                    config.delay_ms = args.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                }
                "--crash-on" => config.crash_on = args.next(),
                "--reject-init" => config.reject_init = true,
                "--silent-init" => config.silent_init = true,
                "--garbage" => config.garbage = true,
                "--split" => config.split = true,
                "--page-size" => config.page_size = args.next().and_then(|v| v.parse().ok()),
                "--ask-client" => config.ask_client = true,
                "--cycle-cursor" => config.cycle_cursor = true,
                "--exit-on-init" => config.exit_on_init = true,
                _ => {}
            }
        }

        config
    }
}

/// Shared stdout; every frame is written under the lock.
#[derive(Clone)]
struct Output {
    stdout: Arc<Mutex<std::io::Stdout>>,
    garbage: bool,
    split: bool,
}

impl Output {
    fn send(&self, message: &Value) {
        let line = format!("{message}\n");
        let mut out = self.stdout.lock().unwrap();

        if self.garbage {
            out.write_all(b"\n   \nthis is not json\n{\"truncated\": \n").unwrap();
        }

        if self.split {
            let (head, tail) = line.split_at(line.len() / 2);
            out.write_all(head.as_bytes()).unwrap();
            out.flush().unwrap();
            thread::sleep(Duration::from_millis(20));
            out.write_all(tail.as_bytes()).unwrap();
        } else {
            out.write_all(line.as_bytes()).unwrap();
        }
        out.flush().unwrap();
    }
}

/// Replies received for our own server-to-client requests.
type ClientReplies = Arc<Mutex<Vec<Value>>>;

fn main() {
    let config = ServerConfig::from_args();
    let output = Output {
        stdout: Arc::new(Mutex::new(std::io::stdout())),
        garbage: config.garbage,
        split: config.split,
    };
    let replies: ClientReplies = Arc::new(Mutex::new(Vec::new()));

    eprintln!(
        "mock-mcp-server starting (MCP_TRANSPORT={}, LOG_LEVEL={})",
        env::var("MCP_TRANSPORT").unwrap_or_default(),
        env::var("LOG_LEVEL").unwrap_or_default()
    );

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { return };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Ok(message) = serde_json::from_str::<Value>(line) else {
            eprintln!("mock-mcp-server: ignoring malformed line");
            continue;
        };

        let Some(method) = message.get("method").and_then(Value::as_str) else {
            // A reply to one of our own requests.
            replies.lock().unwrap().push(message.clone());
            continue;
        };

        let Some(id) = message.get("id").cloned() else {
            if method == "notifications/initialized" && config.ask_client {
                output.send(&json!({
                    "jsonrpc": "2.0",
                    "id": "srv-1",
                    "method": "roots/list"
                }));
                output.send(&json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/message",
                    "params": { "level": "info", "data": "hello" }
                }));
            }
            continue;
        };

        if config.delay_ms > 0 {
            thread::sleep(Duration::from_millis(config.delay_ms));
        }

        let params = message.get("params").cloned().unwrap_or(json!({}));
        match method {
            "initialize" if config.exit_on_init => std::process::exit(1),
            "initialize" if config.silent_init => {}
            "initialize" if config.reject_init => output.send(&error(
                id,
                -32602,
                "Unsupported protocol version",
            )),
            "initialize" => output.send(&success(
                id,
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": "mock-mcp-server", "version": "1.0.0" }
                }),
            )),
            "tools/list" if config.cycle_cursor => {
                output.send(&success(id, cycling_page(&params)))
            }
            "tools/list" => output.send(&success(id, list_tools(&params, config.page_size))),
            "tools/call" => call_tool(id, &params, &config, &output, &replies),
            other => output.send(&error(id, -32601, &format!("Method not found: {other}"))),
        }
    }
}

fn success(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error(id: Value, code: i64, message: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

fn text(text: impl Into<String>) -> Value {
    json!({ "content": [ { "type": "text", "text": text.into() } ] })
}

fn tool_catalog() -> Vec<Value> {
    vec![
        json!({
            "name": "turnOn",
            "description": "Turn on a device",
            "inputSchema": {
                "type": "object",
                "properties": { "deviceId": { "type": "string" } },
                "required": ["deviceId"]
            }
        }),
        json!({
            "name": "echo",
            "description": "Echo back the input",
            "inputSchema": {
                "type": "object",
                "properties": { "message": { "type": "string" } },
                "required": ["message"]
            }
        }),
        json!({
            "name": "slow",
            "description": "Answer after delay_ms, out of order with other calls",
            "inputSchema": {
                "type": "object",
                "properties": { "delay_ms": { "type": "number" } }
            }
        }),
        json!({
            "name": "hang",
            "description": "Never answers",
            "inputSchema": { "type": "object" }
        }),
        json!({
            "name": "crash",
            "description": "Crashes the server",
            "inputSchema": { "type": "object" }
        }),
        json!({
            "name": "env",
            "description": "Report the transport environment",
            "inputSchema": { "type": "object" }
        }),
        json!({
            "name": "fail",
            "description": "Return a tool-level error",
            "inputSchema": { "type": "object" }
        }),
        json!({
            "name": "clientReplies",
            "description": "Report replies received for server requests",
            "inputSchema": { "type": "object" }
        }),
    ]
}

fn list_tools(params: &Value, page_size: Option<usize>) -> Value {
    let tools = tool_catalog();
    let Some(page_size) = page_size else {
        return json!({ "tools": tools });
    };

    let start: usize = params
        .get("cursor")
        .and_then(Value::as_str)
        .and_then(|c| c.parse().ok())
        .unwrap_or(0);
    let end = (start + page_size).min(tools.len());
    let page = &tools[start.min(end)..end];

    if end < tools.len() {
        json!({ "tools": page, "nextCursor": end.to_string() })
    } else {
        json!({ "tools": page })
    }
}

/// One tool per page; "B" follows the first page and "A", "A" follows "B".
fn cycling_page(params: &Value) -> Value {
    let next = match params.get("cursor").and_then(Value::as_str) {
        Some("B") => "A",
        _ => "B",
    };
    json!({ "tools": [tool_catalog()[0].clone()], "nextCursor": next })
}

fn call_tool(
    id: Value,
    params: &Value,
    config: &ServerConfig,
    output: &Output,
    replies: &ClientReplies,
) {
    let tool_name = params.get("name").and_then(Value::as_str).unwrap_or("");
    let args = params.get("arguments").cloned().unwrap_or(json!({}));

    if config.crash_on.as_deref() == Some(tool_name) {
        std::process::exit(1);
    }

    match tool_name {
        "turnOn" => {
            let device = args.get("deviceId").and_then(Value::as_str).unwrap_or("");
            output.send(&success(id, text(format!("Device {device} turned on"))));
        }
        "echo" => {
            let message = args.get("message").and_then(Value::as_str).unwrap_or("");
            output.send(&success(id, text(message)));
        }
        "slow" => {
            let delay = args.get("delay_ms").and_then(Value::as_u64).unwrap_or(1000);
            let output = output.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(delay));
                output.send(&success(id, text(format!("Slept for {delay} ms"))));
            });
        }
        "hang" => {}
        "crash" => std::process::exit(1),
        "env" => output.send(&success(
            id,
            json!({
                "content": [],
                "data": {
                    "transport": env::var("MCP_TRANSPORT").ok(),
                    "logLevel": env::var("LOG_LEVEL").ok()
                }
            }),
        )),
        "fail" => output.send(&success(
            id,
            json!({
                "content": [ { "type": "text", "text": "device offline" } ],
                "isError": true
            }),
        )),
        "clientReplies" => {
            let received = replies.lock().unwrap().clone();
            output.send(&success(id, json!({ "content": [], "data": received })));
        }
        other => output.send(&error(id, -32602, &format!("Unknown tool: {other}"))),
    }
}
