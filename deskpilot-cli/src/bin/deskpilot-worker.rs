//! Line-delimited JSON worker.
//!
//! Reads one request per line from stdin, dispatches to the agent, and
//! writes one response per line to stdout.  Logs go to stderr.

use std::io::{self, BufRead, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::Parser;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use deskpilot_cli::{build_agent, init_logging, CommonArgs};
use deskpilot_core::agent::captured_image_json;
use deskpilot_core::capture::CaptureRequest;
use deskpilot_core::input::{KeyInputRequest, MouseInputRequest};
use deskpilot_core::runner::MacroRunRequest;
use deskpilot_core::window::WindowMatch;
use deskpilot_core::{platform, Agent, AutomationError};

#[derive(Parser)]
#[command(name = "deskpilot-worker", about = "deskpilot JSON-lines worker process")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Deserialize)]
struct Request {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Serialize)]
struct Response {
    id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
}

impl Response {
    fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
            status: None,
        }
    }

    fn failed(id: u64, failure: Failure) -> Self {
        Self {
            id,
            result: failure.body,
            error: Some(failure.message),
            status: Some(failure.status),
        }
    }
}

/// A failed call: status, message, and an optional structured body.
struct Failure {
    status: u16,
    message: String,
    body: Option<Value>,
}

impl Failure {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: 400,
            message: message.into(),
            body: None,
        }
    }
}

impl From<AutomationError> for Failure {
    fn from(err: AutomationError) -> Self {
        Self {
            status: err.status_code(),
            message: err.to_string(),
            body: None,
        }
    }
}

fn parse<T: DeserializeOwned>(params: &Value) -> Result<T, Failure> {
    let params = if params.is_null() { json!({}) } else { params.clone() };
    serde_json::from_value(params).map_err(|e| Failure::bad_request(format!("BAD_REQUEST: {e}")))
}

fn str_param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

fn required<'a>(params: &'a Value, key: &str) -> Result<&'a str, Failure> {
    str_param(params, key).ok_or_else(|| Failure::bad_request(format!("BAD_REQUEST: {key} is required")))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, Failure> {
    serde_json::to_value(value).map_err(|e| Failure::from(AutomationError::from(e)))
}

/// Structured result with its own `ok`/`statusCode`: failures keep the
/// whole body.
fn status_result<T: Serialize>(value: &T, ok: bool, status: u16, error: Option<&str>) -> Result<Value, Failure> {
    let body = to_value(value)?;
    if ok {
        Ok(body)
    } else {
        Err(Failure {
            status,
            message: error.unwrap_or("UNKNOWN_ERROR").to_owned(),
            body: Some(body),
        })
    }
}

fn dispatch(agent: &Agent, method: &str, params: &Value) -> Result<Value, Failure> {
    let run_id = str_param(params, "runId");
    match method {
        "ping" => Ok(Value::String("pong".to_owned())),
        "status" => Ok(json!({
            "busy": agent.is_busy(),
            "dpiAwareness": platform::dpi_awareness_mode(),
            "runsDir": agent.config().runs_dir,
        })),
        "displays.list" => to_value(&agent.list_displays()),
        "windows.list" => to_value(&agent.list_windows()?),
        "windows.focus" => {
            let matcher: WindowMatch = parse(params.get("match").unwrap_or(&Value::Null))?;
            match agent.focus_window(&matcher)? {
                Some(window) => to_value(&window),
                None => Err(Failure {
                    status: 404,
                    message: "WINDOW_NOT_FOUND".into(),
                    body: None,
                }),
            }
        }
        "cursor.info" => to_value(&agent.cursor_info()),
        "capture" => {
            let request: CaptureRequest = parse(params)?;
            match agent.capture(&request, run_id) {
                Ok(image) => Ok(captured_image_json(&image)),
                Err(failure) => Err(Failure {
                    status: failure.status_code(),
                    message: failure.to_string(),
                    body: serde_json::to_value(&failure).ok(),
                }),
            }
        }
        "input.mouse" => {
            let request: MouseInputRequest = parse(params)?;
            let result = agent.mouse(&request, run_id);
            status_result(&result, result.ok, result.status_code, result.error.as_deref())
        }
        "input.key" => {
            let request: KeyInputRequest = parse(params)?;
            let result = agent.keys(&request, run_id);
            status_result(&result, result.ok, result.status_code, result.error.as_deref())
        }
        "macro.run" => {
            let request: MacroRunRequest = parse(params)?;
            let result = agent.run_macro(&request, run_id);
            match result.status_code {
                Some(status) => status_result(&result, false, status, result.error.as_deref()),
                None => to_value(&result),
            }
        }
        "runs.list" => {
            let limit = params.get("limit").and_then(Value::as_u64).map(|l| l as usize);
            to_value(&agent.list_runs(limit)?)
        }
        "runs.steps" => to_value(&agent.get_steps(required(params, "runId")?)?),
        "runs.screenshot" => {
            let shot = agent.get_screenshot(required(params, "runId")?, required(params, "stepId")?)?;
            let bytes = shot.read()?;
            Ok(json!({
                "path": shot.path,
                "contentType": shot.content_type,
                "imageB64": BASE64.encode(bytes),
            }))
        }
        _ => Err(Failure::bad_request(format!("unknown method: {method}"))),
    }
}

fn write_response(stdout: &mut impl Write, resp: &Response) {
    match serde_json::to_string(resp) {
        Ok(line) => {
            let _ = writeln!(stdout, "{line}");
        }
        Err(e) => {
            log::error!("response serialization failed: {e}");
            let _ = writeln!(
                stdout,
                r#"{{"id":{},"error":"response serialization failed","status":500}}"#,
                resp.id
            );
        }
    }
    let _ = stdout.flush();
}

fn main() {
    let args = Args::parse();
    init_logging(args.common.verbose);

    let agent = match build_agent(&args.common) {
        Ok(agent) => agent,
        Err(e) => {
            log::error!("startup failed: {e}");
            std::process::exit(2);
        }
    };
    log::info!("deskpilot-worker: ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                log::warn!("stdin read error: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: Request = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                // id unknown; reply on id 0.
                write_response(&mut stdout, &Response::failed(0, Failure::bad_request(format!("invalid JSON: {e}"))));
                continue;
            }
        };

        log::debug!("request {} {}", req.id, req.method);
        let resp = match dispatch(&agent, &req.method, &req.params) {
            Ok(result) => Response::ok(req.id, result),
            Err(failure) => Response::failed(req.id, failure),
        };
        write_response(&mut stdout, &resp);
    }

    log::info!("deskpilot-worker: stdin closed, exiting");
}
