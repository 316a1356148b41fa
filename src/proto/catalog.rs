use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use super::command::{CommandDescriptor, CommandKind, CommandRequest, DEFAULT_TIMEOUT};
use crate::error::{GatewayError, Result};

// (key, name, kind, timeout secs, expected output). Example entries for a
// Telegesis Zigbee coordinator.
const BUILTIN: &[(&str, &str, CommandKind, u64, &str)] = &[
    // hardware info
    ("ZB_ATI", "ATI", CommandKind::Send, 5, "Telegesis"),
    // neighbour table of the coordinator
    ("ZB_NTABLE", "AT+NTABLE", CommandKind::Send, 5, "Ntable:"),
    // unsolicited OTA image query
    ("ZB_IMGQUERY", "IMGQUERY", CommandKind::Listen, 300, "IMGQUERY:"),
];

/// Longest timeout a catalog file may configure.
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// One entry of a catalog file.
#[derive(Debug, Deserialize)]
struct CommandEntry {
    name: String,
    kind: CommandKind,
    #[serde(default)]
    timeout_secs: Option<u64>,
    expected_output: String,
    #[serde(default)]
    separator: Option<String>,
    #[serde(default)]
    param_separator: Option<String>,
}

impl CommandEntry {
    fn into_descriptor(self) -> Result<CommandDescriptor> {
        let timeout = match self.timeout_secs {
            Some(secs) if secs > MAX_TIMEOUT_SECS => {
                return Err(GatewayError::Catalog(format!(
                    "{}: timeout_secs {} exceeds the {}s limit",
                    self.name, secs, MAX_TIMEOUT_SECS
                )));
            }
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_TIMEOUT,
        };
        let mut d = CommandDescriptor::new(self.name, self.kind, timeout, self.expected_output)?;
        if let Some(sep) = self.separator {
            d = d.with_separator(sep);
        }
        if let Some(sep) = self.param_separator {
            d = d.with_param_separator(sep);
        }
        Ok(d)
    }
}

/// Registered commands, keyed by the name callers use on the wire.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    commands: BTreeMap<String, Arc<CommandDescriptor>>,
}

impl Catalog {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Result<Self> {
        let mut catalog = Self::empty();
        for &(key, name, kind, secs, expected) in BUILTIN {
            let d = CommandDescriptor::new(name, kind, Duration::from_secs(secs), expected)?;
            catalog.insert(key, d);
        }
        Ok(catalog)
    }

    /// Built-in entries, overridden and extended by `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut catalog = Self::builtin()?;
        if let Some(path) = path {
            let text = fs::read_to_string(path)
                .map_err(|e| GatewayError::Catalog(format!("read {}: {}", path.display(), e)))?;
            catalog.merge_yaml(&text)?;
        }
        Ok(catalog)
    }

    /// Merge a YAML map of `KEY: { name, kind, expected_output, ... }`.
    pub fn merge_yaml(&mut self, text: &str) -> Result<usize> {
        let entries: BTreeMap<String, CommandEntry> =
            serde_yaml::from_str(text).map_err(|e| GatewayError::Catalog(e.to_string()))?;
        let count = entries.len();
        for (key, entry) in entries {
            self.insert(key, entry.into_descriptor()?);
        }
        Ok(count)
    }

    pub fn insert(&mut self, key: impl Into<String>, descriptor: CommandDescriptor) {
        self.commands.insert(key.into(), Arc::new(descriptor));
    }

    pub fn get(&self, key: &str) -> Result<Arc<CommandDescriptor>> {
        self.commands
            .get(key)
            .cloned()
            .ok_or_else(|| GatewayError::NotRegistered(key.to_string()))
    }

    pub fn request(&self, key: &str, params: Vec<String>) -> Result<CommandRequest> {
        Ok(CommandRequest::new(self.get(key)?, params))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CommandDescriptor)> {
        self.commands.iter().map(|(k, d)| (k.as_str(), d.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
