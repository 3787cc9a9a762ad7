//! Response validation.
//!
//! Validation never fails with an error: a mismatch is logged at `error`
//! level naming the field, and the result is `false`.

use log::{debug, error};

use crate::error::{Error, Result};
use crate::protocol::frame::{NO_DATA, RESPONSE_PREFIX, Response, STATUS_SUCCESS};
use crate::protocol::hex::{WILDCARD, bytes_match_with_wildcards, token_matches, tokenize_hex};

/// Expected status, length and (optionally) data of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectation {
    /// Expected status code.
    pub status: String,
    /// Expected data length code.
    pub data_length: String,
    /// Expected data bytes; `None` or blank text skips the data comparison.
    pub data: Option<String>,
}

impl Default for Expectation {
    fn default() -> Self {
        Self {
            status: STATUS_SUCCESS.to_string(),
            data_length: NO_DATA.to_string(),
            data: None,
        }
    }
}

impl Expectation {
    /// Expect `status` and `data_length`, ignoring data.
    pub fn new(status: impl Into<String>, data_length: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            data_length: data_length.into(),
            data: None,
        }
    }

    /// Also expect these data bytes.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }
}

/// Compare a response against an expectation field by field.
///
/// Data is only compared when the expectation carries data and the
/// response's length field is not `00`.
pub fn validate(response: &Response, expected: &Expectation) -> bool {
    for (field, value) in [
        ("status", &response.status),
        ("data_length", &response.data_length),
    ] {
        if value.trim().is_empty() {
            error!("Response is missing field '{field}'");
            return false;
        }
    }

    if response.status != expected.status {
        error!(
            "Status mismatch. Received: {}, Expected: {}",
            response.status, expected.status
        );
        return false;
    }

    if response.data_length != expected.data_length {
        error!(
            "Data length mismatch. Received: {}, Expected: {}",
            response.data_length, expected.data_length
        );
        return false;
    }

    // Blank expected data means "don't care", like no data at all.
    let expected_data = expected
        .data
        .as_deref()
        .filter(|data| !data.trim().is_empty());
    if let Some(data) = expected_data {
        if response.data_length != NO_DATA && response.data_bytes != data {
            error!(
                "Data mismatch. Received: {}, Expected: {}",
                response.data_bytes, data
            );
            return false;
        }
    }

    debug!("Response validated: {response}");
    true
}

/// Like [`validate`], failing when no response was received.
pub fn validate_response(response: Option<&Response>, expected: &Expectation) -> bool {
    match response {
        Some(response) => validate(response, expected),
        None => {
            error!("No response received");
            false
        },
    }
}

/// Expected response in wildcard notation.
///
/// Accepts either a full frame (`6D643C 6E 03 00 01 01 XX`) or the short form
/// `<Status> <Length> [Data..]`. `XX` matches any byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePattern {
    header: Option<[String; 3]>,
    status: String,
    data_length: String,
    data: Vec<String>,
}

impl ResponsePattern {
    /// Parse an expectation, recognising the full form by its leading prefix.
    pub fn parse(expected: &str, response_prefix: &str) -> Result<Self> {
        let tokens = tokenize_hex(expected, true)?;
        let prefix = tokenize_hex(response_prefix, false)?;

        let (header, rest) = if !prefix.is_empty() && tokens.starts_with(&prefix) {
            let rest = &tokens[prefix.len()..];
            if rest.len() < 5 {
                return Err(Error::InvalidHex(format!(
                    "expected frame '{expected}' is shorter than a response header"
                )));
            }
            let header = [rest[0].clone(), rest[1].clone(), rest[2].clone()];
            (Some(header), &rest[3..])
        } else {
            (None, tokens.as_slice())
        };

        if rest.len() < 2 {
            return Err(Error::InvalidHex(format!(
                "expected response '{expected}' needs at least <Status> <Length>"
            )));
        }

        Ok(Self {
            header,
            status: rest[0].clone(),
            data_length: rest[1].clone(),
            data: rest[2..].to_vec(),
        })
    }

    /// Whether the pattern constrains group, test and operation too.
    pub fn is_full_frame(&self) -> bool {
        self.header.is_some()
    }

    /// Check a response against the pattern, logging the first mismatch.
    pub fn matches(&self, response: &Response) -> bool {
        if let Some([group, test, operation]) = &self.header {
            for (field, actual, expected) in [
                ("group", &response.group_id, group),
                ("test", &response.test_id, test),
                ("operation", &response.operation, operation),
            ] {
                if !token_matches(actual, expected) {
                    error!("{field} mismatch. Received: {actual}, Expected: {expected}");
                    return false;
                }
            }
        }

        if !token_matches(&response.status, &self.status) {
            error!(
                "Status mismatch. Received: {}, Expected: {}",
                response.status, self.status
            );
            return false;
        }

        if !token_matches(&response.data_length, &self.data_length) {
            error!(
                "Data length mismatch. Received: {}, Expected: {}",
                response.data_length, self.data_length
            );
            return false;
        }

        if self.data.is_empty() {
            return true;
        }

        let actual: Vec<&str> = response.data_tokens().collect();
        let same_length = self.data_length != WILDCARD;
        match bytes_match_with_wildcards(&actual, &self.data, same_length) {
            Ok(()) => true,
            Err(detail) => {
                error!("Data mismatch. {detail}");
                false
            },
        }
    }
}

/// Compare every token of a response, prefix included, against `expected`.
///
/// `expected` must describe the whole frame; `XX` matches any byte.
pub fn matches_fixed_frame(response: &Response, expected: &str) -> bool {
    let expected = match tokenize_hex(expected, true) {
        Ok(tokens) => tokens,
        Err(e) => {
            error!("Invalid expected frame '{expected}': {e}");
            return false;
        },
    };
    let actual = match tokenize_hex(&response.to_string(), false) {
        Ok(tokens) => tokens,
        Err(e) => {
            error!("Response is not valid hex: {e}");
            return false;
        },
    };

    match bytes_match_with_wildcards(&actual, &expected, true) {
        Ok(()) => true,
        Err(detail) => {
            error!("Frame mismatch. {detail}");
            false
        },
    }
}

/// Pattern against the default response prefix.
impl std::str::FromStr for ResponsePattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s, RESPONSE_PREFIX)
    }
}
