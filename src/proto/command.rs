use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::proto::codec;

pub const DEFAULT_SEPARATOR: &str = ":";
pub const DEFAULT_PARAM_SEPARATOR: &str = ",";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether a command is written to the device or only waited for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Send,
    Listen,
}

/// Immutable catalog entry describing one device command.
#[derive(Debug, Clone)]
pub struct CommandDescriptor {
    name: String,
    separator: String,
    param_separator: String,
    expected_output: String,
    timeout: Duration,
    kind: CommandKind,
    matcher: Regex,
}

impl CommandDescriptor {
    /// Build a descriptor, compiling `expected_output` into the response matcher.
    pub fn new(
        name: impl Into<String>,
        kind: CommandKind,
        timeout: Duration,
        expected_output: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        let expected_output = expected_output.into();
        let matcher = codec::response_pattern(&expected_output).map_err(|source| {
            GatewayError::InvalidPattern {
                command: name.clone(),
                source,
            }
        })?;
        Ok(Self {
            name,
            separator: DEFAULT_SEPARATOR.to_string(),
            param_separator: DEFAULT_PARAM_SEPARATOR.to_string(),
            expected_output,
            timeout,
            kind,
            matcher,
        })
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn with_param_separator(mut self, param_separator: impl Into<String>) -> Self {
        self.param_separator = param_separator.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn separator(&self) -> &str {
        &self.separator
    }
    pub fn param_separator(&self) -> &str {
        &self.param_separator
    }
    pub fn expected_output(&self) -> &str {
        &self.expected_output
    }
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Compiled `<expected_output>.+`, case-insensitive.
    pub fn matcher(&self) -> &Regex {
        &self.matcher
    }
}

/// One caller invocation: a catalog entry plus its ordered parameters.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    descriptor: Arc<CommandDescriptor>,
    params: Vec<String>,
}

impl CommandRequest {
    pub fn new(descriptor: Arc<CommandDescriptor>, params: Vec<String>) -> Self {
        Self { descriptor, params }
    }

    pub fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }
    pub fn params(&self) -> &[String] {
        &self.params
    }
    pub fn kind(&self) -> CommandKind {
        self.descriptor.kind()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandStatus {
    Success,
    Error,
    Timeout,
}

/// Outcome of one command. Serializes to the wire result shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    #[serde(rename = "commandStatus")]
    pub status: CommandStatus,
    /// Seconds, rounded to two decimals.
    #[serde(rename = "commandDuration")]
    pub duration: f64,
    #[serde(rename = "commandOutput")]
    pub output: Vec<String>,
}

impl CommandResult {
    pub fn success(output: Vec<String>, elapsed: Duration) -> Self {
        Self {
            status: CommandStatus::Success,
            duration: round_secs(elapsed),
            output,
        }
    }

    pub fn error(output: Vec<String>, elapsed: Duration) -> Self {
        Self {
            status: CommandStatus::Error,
            duration: round_secs(elapsed),
            output,
        }
    }

    /// Send-path timeout: no output and no measured duration.
    pub fn timeout() -> Self {
        Self {
            status: CommandStatus::Timeout,
            duration: 0.0,
            output: Vec::new(),
        }
    }

    /// Listen-path timeout: the duration carries the configured timeout.
    pub fn listen_timeout(timeout: Duration) -> Self {
        Self {
            status: CommandStatus::Timeout,
            duration: round_secs(timeout),
            output: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success
    }
}

pub fn round_secs(d: Duration) -> f64 {
    (d.as_secs_f64() * 100.0).round() / 100.0
}
