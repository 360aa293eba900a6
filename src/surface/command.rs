use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::orchestrator::control::RuntimeHandle;
use crate::runtime::lifecycle::SystemStatus;

/// One verb of the line protocol. Commands arrive one per line; responses
/// are single-line JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandVerb {
    Status,
    Pause,
    Resume,
    Shutdown,
    SaveState(Option<PathBuf>),
}

/// Rejections answered as `{"error": ...}` with the command untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SurfaceError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("'{command}' takes no argument, got '{argument}'")]
    UnexpectedArgument { command: String, argument: String },
    #[error("system is shutting down")]
    ShuttingDown,
    #[error("command queue is full, try again later")]
    QueueFull,
}

#[derive(Serialize)]
struct AckResponse {
    result: &'static str,
    status: SystemStatus,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Parses one protocol line into a verb.
pub fn parse_command(line: &str) -> Result<CommandVerb, SurfaceError> {
    let mut parts = line.split_whitespace();
    let verb = parts.next().ok_or(SurfaceError::Empty)?;
    let argument = parts.next();
    if let Some(extra) = parts.next() {
        return Err(SurfaceError::UnexpectedArgument {
            command: verb.to_string(),
            argument: extra.to_string(),
        });
    }
    let no_argument = |command: CommandVerb| match argument {
        None => Ok(command),
        Some(argument) => Err(SurfaceError::UnexpectedArgument {
            command: verb.to_string(),
            argument: argument.to_string(),
        }),
    };
    match verb {
        "status" => no_argument(CommandVerb::Status),
        "pause" => no_argument(CommandVerb::Pause),
        "resume" => no_argument(CommandVerb::Resume),
        "shutdown" => no_argument(CommandVerb::Shutdown),
        "save_state" => Ok(CommandVerb::SaveState(argument.map(PathBuf::from))),
        other => Err(SurfaceError::UnknownCommand(other.to_string())),
    }
}

/// Handles one protocol line end to end: parse, validate against the current
/// lifecycle, enqueue, and render the single-line JSON response.
pub fn respond_line(line: &str, handle: &RuntimeHandle) -> String {
    match parse_command(line) {
        Ok(verb) => match apply(verb, handle) {
            Ok(response) => response,
            Err(err) => error_json(&err),
        },
        Err(err) => error_json(&err),
    }
}

fn apply(verb: CommandVerb, handle: &RuntimeHandle) -> Result<String, SurfaceError> {
    if let CommandVerb::Status = verb {
        let report = handle.status();
        return Ok(serde_json::to_string(&report)
            .unwrap_or_else(|err| format!(r#"{{"error":"status serialization failed: {err}"}}"#)));
    }
    if handle.state().is_terminal() {
        return Err(SurfaceError::ShuttingDown);
    }
    match verb {
        CommandVerb::Pause => handle.request_pause(),
        CommandVerb::Resume => handle.request_resume(),
        CommandVerb::Shutdown => handle.request_shutdown(),
        CommandVerb::SaveState(path) => handle.request_save(path),
        CommandVerb::Status => unreachable!("status handled above"),
    }
    .map_err(|_| SurfaceError::QueueFull)?;
    let ack = AckResponse {
        result: "ok",
        status: handle.status().status,
    };
    Ok(serde_json::to_string(&ack)
        .unwrap_or_else(|err| format!(r#"{{"error":"ack serialization failed: {err}"}}"#)))
}

fn error_json(err: &SurfaceError) -> String {
    serde_json::to_string(&ErrorResponse {
        error: err.to_string(),
    })
    .unwrap_or_else(|_| r#"{"error":"internal error"}"#.to_string())
}
