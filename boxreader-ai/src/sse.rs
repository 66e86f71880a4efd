//! Incremental decoder for `text/event-stream` bodies.

use serde_json::Value;

const DONE_MARKER: &str = "[DONE]";

/// Splits arbitrary byte chunks into event payloads.
///
/// Frames end at a blank line. Only `data:` lines contribute; several in one
/// frame are joined with `\n`. Bytes of a UTF-8 sequence cut by a chunk
/// boundary are carried until the rest arrives.
#[derive(Debug, Default)]
pub struct SseDecoder {
    carry: Vec<u8>,
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);
        self.decode_carry();
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut events = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let frame: String = self.buffer.drain(..end + 2).collect();
            if let Some(data) = frame_data(&frame) {
                events.push(data);
            }
        }
        events
    }

    /// Text received after the last complete frame.
    pub fn remainder(&self) -> &str {
        &self.buffer
    }

    fn decode_carry(&mut self) {
        loop {
            match std::str::from_utf8(&self.carry) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    self.carry.clear();
                    return;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    self.buffer
                        .push_str(&String::from_utf8_lossy(&self.carry[..valid]));
                    match err.error_len() {
                        Some(bad) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            self.carry.drain(..valid + bad);
                        }
                        None => {
                            self.carry.drain(..valid);
                            return;
                        }
                    }
                }
            }
        }
    }
}

fn frame_data(frame: &str) -> Option<String> {
    let lines: Vec<&str> = frame
        .split('\n')
        .filter(|line| !line.is_empty())
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

pub fn is_done(data: &str) -> bool {
    data == DONE_MARKER
}

/// Incremental text carried by one event payload. Malformed JSON and events
/// without content yield `None`.
pub fn parse_delta(data: &str) -> Option<String> {
    if is_done(data) {
        return None;
    }
    let value: Value = serde_json::from_str(data).ok()?;
    value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|delta| !delta.is_empty())
        .map(str::to_string)
}
