// src/proto/codec.rs
use regex::{Regex, RegexBuilder};

use super::command::CommandDescriptor;

/// Every command must end with a CR or the device never acts on it.
pub const TERMINATOR: char = '\r';

const LINE_DELIMITER: char = '\n';
// Joins fragments for matching; never produced by the devices we talk to.
const UNPACK_DELIMITER: &str = "\u{1f}";
const ERROR_MARKER: &str = "ERROR";
// Zigbee coordinators answer some failed commands with a NACK instead of ERROR.
const NACK_MARKER: &str = "NACK";

/// Public API: render `name + separator + params + CR`.
pub fn build_command_string(descriptor: &CommandDescriptor, params: &[String]) -> String {
    let mut out = String::with_capacity(descriptor.name().len() + 16);
    out.push_str(descriptor.name());
    out.push_str(descriptor.separator().trim());
    out.push_str(&params.join(descriptor.param_separator()));
    out.push(TERMINATOR);
    out
}

/// Public API: split a raw chunk into trimmed, CR-free, upper-cased lines.
pub fn normalize(data: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(data)
        .split(LINE_DELIMITER)
        .filter(|fragment| !fragment.trim().is_empty())
        .map(|fragment| fragment.replace('\r', "").trim().to_uppercase())
        .collect()
}

pub fn unpack(fragments: &[String]) -> String {
    fragments.join(UNPACK_DELIMITER)
}

/// Only the lead line is inspected; devices report failures first.
pub fn has_errored(fragments: &[String]) -> bool {
    fragments
        .first()
        .is_some_and(|line| line.contains(ERROR_MARKER) || line.contains(NACK_MARKER))
}

/// Compile `<expected>.+` for [`find_match`].
pub fn response_pattern(expected: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(&format!("{expected}.+"))
        .case_insensitive(true)
        .build()
}

/// Scan the joined fragments and return the lines of the last match.
/// An empty result means nothing matched yet.
pub fn find_match(fragments: &[String], pattern: &Regex) -> Vec<String> {
    let unpacked = unpack(fragments);
    match pattern.find_iter(&unpacked).last() {
        Some(m) => m.as_str().split(UNPACK_DELIMITER).map(str::to_owned).collect(),
        None => Vec::new(),
    }
}

/// What a listen command waits for: its own rendered form, upper-cased.
pub fn listen_token(descriptor: &CommandDescriptor, params: &[String]) -> String {
    build_command_string(descriptor, params)
        .to_uppercase()
        .trim()
        .to_string()
}

/// Substring test used by listeners; position independent, no regex.
pub fn contains_token(fragments: &[String], token: &str) -> bool {
    !fragments.is_empty() && unpack(fragments).contains(token)
}
