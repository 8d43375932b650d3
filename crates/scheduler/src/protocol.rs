//! Line-oriented command channel.
//!
//! One command per line, comma-separated fields, whitespace around fields
//! ignored:
//!
//! ```text
//! R,<pid>,<period_ms>,<budget_ms>   register
//! Y,<pid>                           yield (blocks until resumed)
//! D,<pid>                           deregister
//! L                                 list tasks
//! ```

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

use rmsched_core::{SchedError, TaskId};

use crate::runner::Scheduler;
use crate::task::TaskInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Register { pid: TaskId, period_ms: u64, budget_ms: u64 },
    Yield { pid: TaskId },
    Deregister { pid: TaskId },
    List,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("'{command}' is missing field '{field}'")]
    MissingField { command: char, field: &'static str },

    #[error("field '{field}' is not a number: '{value}'")]
    InvalidNumber { field: &'static str, value: String },

    #[error("unexpected trailing input: '{0}'")]
    TrailingInput(String),
}

/// Cursor over the comma-separated fields of one line.
struct Fields<'a> {
    command: char,
    rest: std::str::Split<'a, char>,
}

impl<'a> Fields<'a> {
    fn next_raw(&mut self, field: &'static str) -> Result<&'a str, ParseError> {
        match self.rest.next().map(str::trim) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(ParseError::MissingField { command: self.command, field }),
        }
    }

    fn number<T: FromStr>(&mut self, field: &'static str) -> Result<T, ParseError> {
        let value = self.next_raw(field)?;
        value.parse().map_err(|_| ParseError::InvalidNumber {
            field,
            value: value.to_string(),
        })
    }

    fn finish(mut self) -> Result<(), ParseError> {
        let leftover: Vec<&str> = self.rest.by_ref().map(str::trim).collect();
        if leftover.iter().all(|s| s.is_empty()) {
            Ok(())
        } else {
            Err(ParseError::TrailingInput(leftover.join(",")))
        }
    }
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ParseError::Empty);
        }
        let mut parts = line.split(',');
        let head = parts.next().map(str::trim).unwrap_or_default();
        let command = match head {
            "R" | "r" => 'R',
            "Y" | "y" => 'Y',
            "D" | "d" => 'D',
            "L" | "l" => 'L',
            other => return Err(ParseError::UnknownCommand(other.to_string())),
        };
        let mut fields = Fields { command, rest: parts };

        let parsed = match command {
            'R' => Command::Register {
                pid: fields.number("pid")?,
                period_ms: fields.number("period")?,
                budget_ms: fields.number("budget")?,
            },
            'Y' => Command::Yield { pid: fields.number("pid")? },
            'D' => Command::Deregister { pid: fields.number("pid")? },
            _ => Command::List,
        };
        fields.finish()?;
        Ok(parsed)
    }
}

/// Outcome of one command, rendered back onto the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ok,
    Tasks(Vec<TaskInfo>),
    Failed(SchedError),
    Malformed(ParseError),
}

impl Response {
    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok | Response::Tasks(_))
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ok => write!(f, "OK"),
            Response::Tasks(tasks) => {
                for (i, t) in tasks.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{} {} {}", t.id, t.period_ms, t.budget_ms)?;
                }
                Ok(())
            }
            Response::Failed(e) => write!(f, "ERR {}", e),
            Response::Malformed(e) => write!(f, "ERR {}", e),
        }
    }
}

/// Execute a parsed command. `Yield` blocks the calling thread.
pub fn handle(scheduler: &Scheduler, command: Command) -> Response {
    let result = match command {
        Command::Register { pid, period_ms, budget_ms } => {
            scheduler.register_ms(pid, period_ms, budget_ms).map(|_| ())
        }
        Command::Yield { pid } => scheduler.yield_task(pid),
        Command::Deregister { pid } => scheduler.deregister(pid),
        Command::List => return Response::Tasks(scheduler.list()),
    };
    match result {
        Ok(()) => Response::Ok,
        Err(e) => Response::Failed(e),
    }
}

/// Parse and execute one line from the channel.
pub fn handle_line(scheduler: &Scheduler, line: &str) -> Response {
    match line.parse::<Command>() {
        Ok(command) => handle(scheduler, command),
        Err(e) => {
            debug!(line, "malformed command: {}", e);
            Response::Malformed(e)
        }
    }
}
