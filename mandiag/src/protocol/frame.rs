//! Diagnostic frame codec.
//!
//! ## Frame Format
//!
//! Frames are ASCII lines of space-separated two-digit hex tokens:
//!
//! ```text
//! Request:  <REQ_PREFIX>  <Group> <Test> <Operation> <Reserved> <Length> [<Data> ...]
//! Response: <RESP_PREFIX> <Group> <Test> <Operation> <Status>   <Length> [<Data> ...]
//!
//! 6D643E 6E 03 00 00 00          -> request
//! 6D643C 6E 03 00 01 01 00       <- response, status 01, one data byte 00
//! ```
//!
//! The response prefix is what the scan loop looks for in the line stream;
//! everything else is positional.

use std::fmt;

use log::debug;

use crate::error::{Error, Result};
use crate::protocol::hex::{bytes_to_hex, tokenize_hex, tokens_to_bytes};

/// Prefix token of every request line.
pub const REQUEST_PREFIX: &str = "6D643E";

/// Prefix token of every response line.
pub const RESPONSE_PREFIX: &str = "6D643C";

/// Line terminator appended to every outbound frame.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Status code for a successful command.
pub const STATUS_SUCCESS: &str = "01";

/// Status code meaning "still processing, ask again".
pub const STATUS_PENDING: &str = "AA";

/// Data length code for "no payload".
pub const NO_DATA: &str = "00";

/// Operation codes that carry data even when the length field reads `00`.
pub const MULTI_FRAME_OPERATIONS: [&str; 2] = ["10", "11"];

/// Number of positional fields before the data bytes.
pub const HEADER_FIELDS: usize = 6;

/// How the engine treats a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// `01`: terminal success.
    Success,
    /// `AA`: retry the same request.
    Pending,
    /// Any other device-defined code, passed through untouched.
    Other,
}

impl StatusKind {
    /// Classify a two-digit status code.
    pub fn of(status: &str) -> Self {
        if status.eq_ignore_ascii_case(STATUS_SUCCESS) {
            Self::Success
        } else if status.eq_ignore_ascii_case(STATUS_PENDING) {
            Self::Pending
        } else {
            Self::Other
        }
    }
}

/// One outbound diagnostic request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
}

impl Command {
    /// Build a request from its fields.
    ///
    /// `group`, `test` and `operation` are byte values; the reserved field is
    /// always `00` and the length field is derived from `data`.
    pub fn new(group: u8, test: u8, operation: u8) -> CommandBuilder {
        CommandBuilder {
            group,
            test,
            operation,
            data: Vec::new(),
        }
    }

    /// Wrap pre-formatted request text as-is.
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            text: text.into().trim().to_string(),
        }
    }

    /// The request line without terminator.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Wire bytes for this command.
    pub fn encode(&self) -> Vec<u8> {
        encode(&self.text)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl AsRef<str> for Command {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

impl From<&str> for Command {
    fn from(text: &str) -> Self {
        Self::raw(text)
    }
}

impl From<String> for Command {
    fn from(text: String) -> Self {
        Self::raw(text)
    }
}

/// Builder returned by [`Command::new`].
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    group: u8,
    test: u8,
    operation: u8,
    data: Vec<u8>,
}

impl CommandBuilder {
    /// Attach payload bytes; the length field follows.
    #[must_use]
    pub fn with_data(mut self, data: &[u8]) -> Self {
        self.data = data.to_vec();
        self
    }

    /// Finish the command.
    ///
    /// Payloads longer than 255 bytes cannot be expressed in the length field.
    pub fn build(self) -> Result<Command> {
        let len = u8::try_from(self.data.len()).map_err(|_| {
            Error::InvalidHex(format!("payload of {} bytes exceeds 255", self.data.len()))
        })?;

        let mut text = format!(
            "{REQUEST_PREFIX} {:02X} {:02X} {:02X} 00 {len:02X}",
            self.group, self.test, self.operation
        );
        if !self.data.is_empty() {
            text.push(' ');
            text.push_str(&bytes_to_hex(&self.data));
        }

        Ok(Command { text })
    }
}

/// Encode command text into wire bytes.
///
/// The payload is already hex text, so this only appends the terminator.
/// Binary framing would slot in here.
pub fn encode(command_text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(command_text.len() + LINE_TERMINATOR.len());
    bytes.extend_from_slice(command_text.as_bytes());
    bytes.extend_from_slice(LINE_TERMINATOR.as_bytes());
    bytes
}

/// A parsed response line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Response {
    /// Prefix token (normally [`RESPONSE_PREFIX`]).
    pub prefix: String,
    /// Group identifier.
    pub group_id: String,
    /// Test identifier within the group.
    pub test_id: String,
    /// Operation code.
    pub operation: String,
    /// Two-digit status code.
    pub status: String,
    /// Two-digit data length code.
    pub data_length: String,
    /// Data bytes joined with single spaces; empty when there is no payload.
    pub data_bytes: String,
}

impl Response {
    /// Classification of the status field.
    pub fn status_kind(&self) -> StatusKind {
        StatusKind::of(&self.status)
    }

    /// Whether the device reported success.
    pub fn is_success(&self) -> bool {
        self.status_kind() == StatusKind::Success
    }

    /// Whether the device asked to be polled again.
    pub fn is_pending(&self) -> bool {
        self.status_kind() == StatusKind::Pending
    }

    /// Numeric value of the data length field, if it is valid hex.
    pub fn data_length_value(&self) -> Option<u8> {
        u8::from_str_radix(&self.data_length, 16).ok()
    }

    /// Iterate over the data byte tokens.
    pub fn data_tokens(&self) -> impl Iterator<Item = &str> {
        self.data_bytes.split_whitespace()
    }

    /// Decode the data byte tokens.
    pub fn data_as_bytes(&self) -> Result<Vec<u8>> {
        tokens_to_bytes(&self.data_tokens().collect::<Vec<_>>())
    }

    /// All frame tokens, prefix through data.
    pub fn tokens(&self) -> Vec<&str> {
        let mut tokens = vec![
            self.prefix.as_str(),
            self.group_id.as_str(),
            self.test_id.as_str(),
            self.operation.as_str(),
            self.status.as_str(),
            self.data_length.as_str(),
        ];
        tokens.extend(self.data_tokens());
        tokens
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tokens().join(" "))
    }
}

/// Parse a response line into positional fields.
///
/// Data bytes are kept when the length field is non-zero, or when the
/// operation is one of the [`MULTI_FRAME_OPERATIONS`]; otherwise they are
/// dropped even if trailing tokens exist.
pub fn parse(line: &str) -> Result<Response> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < HEADER_FIELDS {
        return Err(Error::Parse(format!(
            "expected at least {HEADER_FIELDS} tokens, got {} in '{}'",
            tokens.len(),
            line.trim()
        )));
    }

    let operation = tokens[3];
    let data_length = tokens[5];
    let keep_data = data_length != NO_DATA || MULTI_FRAME_OPERATIONS.contains(&operation);

    let response = Response {
        prefix: tokens[0].to_string(),
        group_id: tokens[1].to_string(),
        test_id: tokens[2].to_string(),
        operation: operation.to_string(),
        status: tokens[4].to_string(),
        data_length: data_length.to_string(),
        data_bytes: if keep_data {
            tokens[HEADER_FIELDS..].join(" ")
        } else {
            String::new()
        },
    };

    debug!("Parsed response: {response:?}");
    Ok(response)
}

/// Slice a noisy line from the last occurrence of the `prefix` token.
///
/// Log decorations in front of a frame would otherwise shift every
/// positional field. Returns `None` when the prefix token is absent.
pub fn extract_frame<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let mut found = None;
    let mut offset = 0;
    for token in line.split_whitespace() {
        let start = offset + line[offset..].find(token)?;
        if token.eq_ignore_ascii_case(prefix) {
            found = Some(start);
        }
        offset = start + token.len();
    }
    found.map(|start| &line[start..])
}

/// Turn request text in any accepted hex notation into a canonical command.
///
/// The body is split into byte tokens. `request_prefix` stays one compact
/// token at the front and is added when the text does not start with it.
pub fn normalize_command(text: &str, request_prefix: &str) -> Result<Command> {
    let prefix = tokenize_hex(request_prefix, false)?;
    let tokens = tokenize_hex(text, false)?;
    let body = tokens.strip_prefix(prefix.as_slice()).unwrap_or(&tokens[..]);
    if body.is_empty() {
        return Err(Error::InvalidHex("empty command".into()));
    }

    let body = body.join(" ");
    if prefix.is_empty() {
        return Ok(Command::raw(body));
    }
    Ok(Command::raw(format!("{} {body}", prefix.concat())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_appends_terminator() {
        assert_eq!(encode("6D643E 6E 03 00 00 00"), b"6D643E 6E 03 00 00 00\r\n");
        assert_eq!(encode(""), b"\r\n");
    }

    #[test]
    fn test_command_builder() {
        let cmd = Command::new(0x6E, 0x03, 0x00).build().unwrap();
        assert_eq!(cmd.as_str(), "6D643E 6E 03 00 00 00");

        let cmd = Command::new(0x14, 0x01, 0x01)
            .with_data(&[0x0A, 0xFF])
            .build()
            .unwrap();
        assert_eq!(cmd.to_string(), "6D643E 14 01 01 00 02 0A FF");
        assert_eq!(cmd.encode(), b"6D643E 14 01 01 00 02 0A FF\r\n");
    }

    #[test]
    fn test_command_builder_rejects_oversized_payload() {
        let data = vec![0u8; 256];
        assert!(Command::new(0, 0, 0).with_data(&data).build().is_err());
    }

    #[test]
    fn test_parse_single_data_byte() {
        let r = parse("6D643C 6E 03 00 01 01 00").unwrap();
        assert_eq!(r.prefix, "6D643C");
        assert_eq!(r.group_id, "6E");
        assert_eq!(r.test_id, "03");
        assert_eq!(r.operation, "00");
        assert_eq!(r.status, "01");
        assert_eq!(r.data_length, "01");
        assert_eq!(r.data_bytes, "00");
        assert!(r.is_success());
    }

    #[test]
    fn test_parse_zero_length_drops_trailing_tokens() {
        for op in ["00", "01", "02", "12", "FF"] {
            let line = format!("6D643C 0A 02 {op} 01 00 DE AD BE EF");
            let r = parse(&line).unwrap();
            assert_eq!(r.data_bytes, "", "operation {op}");
        }
    }

    #[test]
    fn test_parse_multi_frame_operation_keeps_data() {
        for op in MULTI_FRAME_OPERATIONS {
            let line = format!("6D643C 51 05 {op} 01 00 12 34");
            let r = parse(&line).unwrap();
            assert_eq!(r.data_bytes, "12 34", "operation {op}");
        }
    }

    #[test]
    fn test_parse_keeps_exact_data_sequence() {
        let data = ["00", "7F", "80", "FF", "0A", "10", "AA"];
        for n in 1..=data.len() {
            let payload = data[..n].join(" ");
            let line = format!("6D643C 64 01 00 01 {n:02X} {payload}");
            let r = parse(&line).unwrap();
            assert_eq!(r.data_bytes, payload);
            assert_eq!(r.data_tokens().count(), n);
        }
    }

    #[test]
    fn test_parse_collapses_irregular_spacing() {
        let r = parse("  6D643C\t34 02  00 01 02   AB\tCD  ").unwrap();
        assert_eq!(r.data_bytes, "AB CD");
    }

    #[test]
    fn test_parse_too_short() {
        let err = parse("6D643C 6E 03 00 01").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
        assert!(parse("").is_err());
    }

    #[test]
    fn test_status_kind() {
        assert_eq!(StatusKind::of("01"), StatusKind::Success);
        assert_eq!(StatusKind::of("AA"), StatusKind::Pending);
        assert_eq!(StatusKind::of("aa"), StatusKind::Pending);
        assert_eq!(StatusKind::of("F6"), StatusKind::Other);
    }

    #[test]
    fn test_response_helpers() {
        let r = parse("6D643C 64 01 00 01 03 53 57 31").unwrap();
        assert_eq!(r.data_length_value(), Some(3));
        assert_eq!(r.data_as_bytes().unwrap(), b"SW1");
        assert_eq!(r.to_string(), "6D643C 64 01 00 01 03 53 57 31");
    }

    #[test]
    fn test_extract_frame_skips_log_decoration() {
        let line = "[00:01:02.345] MD: 6D643C 6E 03 00 01 01 00";
        assert_eq!(
            extract_frame(line, RESPONSE_PREFIX),
            Some("6D643C 6E 03 00 01 01 00")
        );
        assert_eq!(extract_frame("boot ok", RESPONSE_PREFIX), None);
    }

    #[test]
    fn test_extract_frame_uses_last_prefix() {
        let line = "6D643C garbage 6D643C 00 01 00 01 00";
        assert_eq!(
            extract_frame(line, RESPONSE_PREFIX),
            Some("6D643C 00 01 00 01 00")
        );
    }

    #[test]
    fn test_normalize_command_keeps_compact_prefix() {
        let cmd = normalize_command("6d643e,6e,03,00,00,00", REQUEST_PREFIX).unwrap();
        assert_eq!(cmd.as_str(), "6D643E 6E 03 00 00 00");

        let cmd = normalize_command("6D 64 3E 6E0300 00 00", REQUEST_PREFIX).unwrap();
        assert_eq!(cmd.as_str(), "6D643E 6E 03 00 00 00");
    }

    #[test]
    fn test_normalize_command_adds_missing_prefix() {
        let cmd = normalize_command("0x6E 0x03 00 00 00", REQUEST_PREFIX).unwrap();
        assert_eq!(cmd.as_str(), "6D643E 6E 03 00 00 00");
        assert_eq!(cmd.encode(), encode("6D643E 6E 03 00 00 00"));

        let cmd = normalize_command("01 02", "").unwrap();
        assert_eq!(cmd.as_str(), "01 02");
    }

    #[test]
    fn test_normalize_command_rejects_empty_and_bad_hex() {
        assert!(normalize_command("  ", REQUEST_PREFIX).is_err());
        assert!(normalize_command("6D643E", REQUEST_PREFIX).is_err());
        assert!(normalize_command("6E QQ", REQUEST_PREFIX).is_err());
        assert!(normalize_command("6E", "MD>").is_err());
    }
}
