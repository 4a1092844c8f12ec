use bytes::Bytes;

use crate::{Command, CommandBatch};

const LENGTHS_OPEN: u8 = b'[';
const LENGTHS_CLOSE: u8 = b']';
const LENGTHS_SEPARATOR: char = ',';

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("record at offset {offset} has no closing bracket after its length prefix")]
    UnterminatedLengths { offset: usize },
    #[error("record at offset {offset} has an empty name")]
    EmptyName { offset: usize },
    #[error("record name at offset {offset} is not valid utf-8")]
    InvalidName { offset: usize },
    #[error("record `{name}` has an invalid length prefix {lengths:?}")]
    InvalidLength { name: String, lengths: String },
    #[error("record `{name}` truncated: needs {needed} bytes, {available} available")]
    Truncated {
        name: String,
        needed: usize,
        available: usize,
    },
    #[error("response of {length} bytes contains no records")]
    NoRecords { length: usize },
    #[error("record `{name}` carries invalid json: {source}")]
    Json {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

impl WireError {
    /// `true` when the framing was intact but the JSON portion failed to parse.
    pub fn is_payload_error(&self) -> bool {
        matches!(self, WireError::Json { .. })
    }
}

/// Decodes every record in `frame`, tagging each command with `is_initial`.
///
/// Binary payloads are zero-copy slices of `frame`. Bytes after the last record that do not
/// contain a `[` are ignored; a `[` with no matching `]` is a framing error.
pub fn decode_frame(frame: Bytes, is_initial: bool) -> Result<CommandBatch, WireError> {
    let mut reader = FrameReader::new(&frame);
    let mut commands = Vec::new();
    while let Some(mut command) = reader.next_record()? {
        command.is_initial = is_initial;
        commands.push(command);
    }
    Ok(CommandBatch {
        commands,
        is_initial,
    })
}

struct FrameReader<'a> {
    frame: &'a Bytes,
    pos: usize,
}

impl<'a> FrameReader<'a> {
    fn new(frame: &'a Bytes) -> Self {
        Self { frame, pos: 0 }
    }

    fn next_record(&mut self) -> Result<Option<Command>, WireError> {
        let start = self.pos;
        let Some(open) = self.find(LENGTHS_OPEN, start) else {
            self.pos = self.frame.len();
            return Ok(None);
        };
        let name = self.read_name(start, open)?;
        let close = self
            .find(LENGTHS_CLOSE, open + 1)
            .ok_or(WireError::UnterminatedLengths { offset: start })?;
        let (json_len, binary_len) = parse_lengths(&name, &self.frame[open + 1..close])?;

        let json_start = close + 1;
        let json_end = self.checked_end(&name, json_start, json_len)?;
        let json = serde_json::from_slice(&self.frame[json_start..json_end]).map_err(|source| {
            WireError::Json {
                name: name.clone(),
                source,
            }
        })?;

        let mut end = json_end;
        let binary = match binary_len {
            Some(len) if len > 0 => {
                end = self.checked_end(&name, json_end, len)?;
                Some(self.frame.slice(json_end..end))
            }
            _ => None,
        };
        self.pos = end;

        Ok(Some(Command {
            name,
            json,
            binary,
            is_initial: false,
        }))
    }

    fn find(&self, needle: u8, from: usize) -> Option<usize> {
        self.frame[from..]
            .iter()
            .position(|byte| *byte == needle)
            .map(|idx| from + idx)
    }

    fn read_name(&self, start: usize, open: usize) -> Result<String, WireError> {
        let raw = std::str::from_utf8(&self.frame[start..open])
            .map_err(|_| WireError::InvalidName { offset: start })?;
        let name = raw.trim();
        if name.is_empty() {
            return Err(WireError::EmptyName { offset: start });
        }
        Ok(name.to_string())
    }

    fn checked_end(&self, name: &str, start: usize, len: usize) -> Result<usize, WireError> {
        let available = self.frame.len().saturating_sub(start);
        match start.checked_add(len) {
            Some(end) if end <= self.frame.len() => Ok(end),
            _ => Err(WireError::Truncated {
                name: name.to_string(),
                needed: len,
                available,
            }),
        }
    }
}

fn parse_lengths(name: &str, raw: &[u8]) -> Result<(usize, Option<usize>), WireError> {
    let invalid = || WireError::InvalidLength {
        name: name.to_string(),
        lengths: String::from_utf8_lossy(raw).into_owned(),
    };
    let text = std::str::from_utf8(raw).map_err(|_| invalid())?;
    let mut parts = text.split(LENGTHS_SEPARATOR);
    let json_len = parts
        .next()
        .and_then(parse_decimal)
        .ok_or_else(invalid)?;
    let binary_len = match parts.next() {
        Some(part) => Some(parse_decimal(part).ok_or_else(invalid)?),
        None => None,
    };
    if parts.next().is_some() {
        return Err(invalid());
    }
    Ok((json_len, binary_len))
}

fn parse_decimal(part: &str) -> Option<usize> {
    let part = part.trim();
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}
