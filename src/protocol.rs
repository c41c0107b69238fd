//! Newline-delimited JSON protocol codec.
//!
//! Each frame is one JSON object per `\n`-terminated line:
//! - Request: `{"key": <string>, "value": <string>}` stores a value (PUT),
//!   `{"key": <string>}` retrieves one (GET). The presence of the `value`
//!   field is the operation discriminator; there is no separate tag.
//! - Response: `{"status": "OK"}`, `{"status": "OK", "value": <string>}`,
//!   `{"status": "NOT_FOUND"}` or `{"status": "ERROR", "reason": <string>}`.
//!
//! Responses are serialized JSON followed by a newline; JSON string escaping
//! keeps the encoding self-delimiting.

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

/// Protocol parsing errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Line was not a JSON object with a `key` field
    Malformed(String),
    /// Line exceeds the configured maximum frame length
    FrameTooLarge { length: usize, limit: usize },
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Malformed(msg) => write!(f, "malformed request: {}", msg),
            ParseError::FrameTooLarge { length, limit } => {
                write!(f, "frame of {} bytes exceeds limit of {} bytes", length, limit)
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Split one complete line off the front of the read buffer.
///
/// Returns `Ok(Some(line))` with the delimiter trimmed (CRLF tolerated),
/// `Ok(None)` when no full line is buffered yet, and `FrameTooLarge` when
/// either a complete line or the still-unterminated buffered prefix exceeds
/// `max_frame_bytes`.
pub fn split_frame(
    buffer: &mut BytesMut,
    max_frame_bytes: usize,
) -> Result<Option<BytesMut>, ParseError> {
    match buffer.iter().position(|&b| b == b'\n') {
        Some(pos) => {
            if pos > max_frame_bytes {
                return Err(ParseError::FrameTooLarge {
                    length: pos,
                    limit: max_frame_bytes,
                });
            }
            let mut line = buffer.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            Ok(Some(line))
        }
        None => {
            if buffer.len() > max_frame_bytes {
                return Err(ParseError::FrameTooLarge {
                    length: buffer.len(),
                    limit: max_frame_bytes,
                });
            }
            Ok(None)
        }
    }
}

/// Raw request shape as it appears on the wire
#[derive(Deserialize)]
struct RawRequest {
    key: String,
    value: Option<String>,
}

/// Decoded client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Store a value under a key (insert or replace)
    Put { key: String, value: String },
    /// Retrieve the value of a key
    Get { key: String },
}

impl Request {
    /// Decode one request line.
    ///
    /// A present `value` field selects PUT, an absent (or explicit `null`)
    /// one selects GET. Anything that is not a JSON object carrying a string
    /// `key` is `Malformed`.
    pub fn decode(line: &[u8]) -> Result<Self, ParseError> {
        let raw: RawRequest =
            serde_json::from_slice(line).map_err(|e| ParseError::Malformed(e.to_string()))?;
        Ok(match raw.value {
            Some(value) => Request::Put { key: raw.key, value },
            None => Request::Get { key: raw.key },
        })
    }

    /// The key this request operates on
    pub fn key(&self) -> &str {
        match self {
            Request::Put { key, .. } | Request::Get { key } => key,
        }
    }
}

/// Server response frame
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status")]
pub enum Response {
    /// Operation succeeded; `value` is set for GET hits
    #[serde(rename = "OK")]
    Ok {
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    /// GET miss
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    /// Malformed or invalid request
    #[serde(rename = "ERROR")]
    Error { reason: String },
}

impl Response {
    /// Successful PUT
    pub fn ok() -> Self {
        Response::Ok { value: None }
    }

    /// Successful GET hit
    pub fn with_value(value: String) -> Self {
        Response::Ok { value: Some(value) }
    }

    /// GET miss
    pub fn not_found() -> Self {
        Response::NotFound
    }

    /// Request-level failure surfaced to the client
    pub fn error(reason: impl Into<String>) -> Self {
        Response::Error {
            reason: reason.into(),
        }
    }

    /// Encode the response as one JSON line including the trailing newline.
    pub fn to_line(&self) -> serde_json::Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}
