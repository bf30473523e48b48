//! Event frame encoder and decoder.
//!
//! Wire format, one frame per event:
//!
//! ```text
//! event: <name>
//! data: <single-line json>
//!
//! ```
//!
//! The blank line terminates the frame. Payloads are serialized as compact
//! JSON, which escapes any newline inside a string, so the terminator can
//! never appear inside a frame.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Errors produced while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("unknown event name: {0}")]
    UnknownEvent(String),
    #[error("frame has no event line")]
    MissingEvent,
    #[error("frame for event '{0}' has no data line")]
    MissingData(String),
    #[error("invalid payload for event '{event}': {reason}")]
    InvalidPayload { event: String, reason: String },
    #[error("stream ended inside a frame ({0} bytes pending)")]
    Truncated(usize),
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

/// The closed set of event names on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventName {
    Delta,
    Done,
    Error,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::Delta => "delta",
            EventName::Done => "done",
            EventName::Error => "error",
        }
    }

    /// Terminal events end a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventName::Done | EventName::Error)
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delta" => Ok(EventName::Delta),
            "done" => Ok(EventName::Done),
            "error" => Ok(EventName::Error),
            other => Err(FrameError::UnknownEvent(other.to_string())),
        }
    }
}

/// A typed stream event with its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Next piece of reply content, in generation order.
    Delta { fragment: String },
    /// The stream finished and the reply is durably persisted.
    Done { message_id: Uuid },
    /// The stream terminated abnormally; nothing was persisted.
    Error { code: String, detail: String },
}

#[derive(Serialize, Deserialize)]
struct DeltaPayload {
    fragment: String,
}

#[derive(Serialize, Deserialize)]
struct DonePayload {
    message_id: Uuid,
}

#[derive(Serialize, Deserialize)]
struct ErrorPayload {
    code: String,
    detail: String,
}

impl StreamEvent {
    pub fn delta(fragment: impl Into<String>) -> Self {
        StreamEvent::Delta {
            fragment: fragment.into(),
        }
    }

    pub fn name(&self) -> EventName {
        match self {
            StreamEvent::Delta { .. } => EventName::Delta,
            StreamEvent::Done { .. } => EventName::Done,
            StreamEvent::Error { .. } => EventName::Error,
        }
    }

    /// Serialize the payload as a single line of JSON.
    fn payload_json(&self) -> Result<String, serde_json::Error> {
        match self {
            StreamEvent::Delta { fragment } => serde_json::to_string(&DeltaPayload {
                fragment: fragment.clone(),
            }),
            StreamEvent::Done { message_id } => serde_json::to_string(&DonePayload {
                message_id: *message_id,
            }),
            StreamEvent::Error { code, detail } => serde_json::to_string(&ErrorPayload {
                code: code.clone(),
                detail: detail.clone(),
            }),
        }
    }

    fn from_payload(name: EventName, data: &str) -> Result<Self, FrameError> {
        let invalid = |e: serde_json::Error| FrameError::InvalidPayload {
            event: name.to_string(),
            reason: e.to_string(),
        };

        match name {
            EventName::Delta => {
                let p: DeltaPayload = serde_json::from_str(data).map_err(invalid)?;
                Ok(StreamEvent::Delta {
                    fragment: p.fragment,
                })
            }
            EventName::Done => {
                let p: DonePayload = serde_json::from_str(data).map_err(invalid)?;
                Ok(StreamEvent::Done {
                    message_id: p.message_id,
                })
            }
            EventName::Error => {
                let p: ErrorPayload = serde_json::from_str(data).map_err(invalid)?;
                Ok(StreamEvent::Error {
                    code: p.code,
                    detail: p.detail,
                })
            }
        }
    }
}

/// An event with its position in the session.
///
/// Sequence numbers start at 1 and increase by one per emitted frame. They
/// are not written to the wire; a decoder reassigns them in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFrame {
    pub seq: u64,
    pub event: StreamEvent,
}

/// Encode a frame into its wire form.
pub fn encode(frame: &EventFrame) -> Result<String, FrameError> {
    let data = frame
        .event
        .payload_json()
        .map_err(|e| FrameError::Encode(e.to_string()))?;
    Ok(format!("event: {}\ndata: {}\n\n", frame.event.name(), data))
}

/// Incremental frame decoder.
///
/// Feed it arbitrary chunks of the response body; it buffers until a frame
/// terminator is seen and returns every complete frame. `\r\n` line endings
/// and `:` comment lines are accepted.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
    next_seq: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return the frames it completed.
    pub fn push(&mut self, chunk: &str) -> Result<Vec<EventFrame>, FrameError> {
        self.buffer.push_str(chunk);
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut frames = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..end + 2).collect();
            if let Some(event) = parse_block(&block[..end])? {
                self.next_seq += 1;
                frames.push(EventFrame {
                    seq: self.next_seq,
                    event,
                });
            }
        }
        Ok(frames)
    }

    /// Check that the input ended on a frame boundary.
    pub fn finish(&self) -> Result<(), FrameError> {
        let pending = self.buffer.trim();
        if pending.is_empty() {
            Ok(())
        } else {
            Err(FrameError::Truncated(pending.len()))
        }
    }

    /// Decode a complete body in one call.
    pub fn decode_all(body: &str) -> Result<Vec<EventFrame>, FrameError> {
        let mut decoder = Self::new();
        let frames = decoder.push(body)?;
        decoder.finish()?;
        Ok(frames)
    }
}

/// Parse one frame block. Blocks holding only comments yield `None`.
fn parse_block(block: &str) -> Result<Option<StreamEvent>, FrameError> {
    let mut name: Option<&str> = None;
    let mut data: Option<String> = None;
    let mut saw_field = false;

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        saw_field = true;

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => name = Some(value),
            "data" => match data {
                Some(ref mut existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            },
            // id, retry and unknown fields carry nothing for this protocol
            _ => {}
        }
    }

    if !saw_field {
        return Ok(None);
    }

    let name: EventName = name.ok_or(FrameError::MissingEvent)?.parse()?;
    let data = data.ok_or_else(|| FrameError::MissingData(name.to_string()))?;
    StreamEvent::from_payload(name, &data).map(Some)
}
