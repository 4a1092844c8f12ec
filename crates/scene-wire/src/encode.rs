use serde_json::Value;

use crate::Command;

/// Appends one record to `buf`. An empty binary payload is written as absent.
///
/// `name` must be non-empty, free of `[`, and carry no surrounding whitespace; the decoder
/// trims names and splits on the first `[`, so any other name comes back altered.
pub fn encode_record(buf: &mut Vec<u8>, name: &str, json: &Value, binary: Option<&[u8]>) {
    debug_assert!(
        is_record_name(name),
        "record name {name:?} cannot be decoded back unchanged"
    );
    let text = json.to_string();
    buf.extend_from_slice(name.as_bytes());
    match binary.filter(|bytes| !bytes.is_empty()) {
        Some(bytes) => {
            buf.extend_from_slice(format!("[{},{}]", text.len(), bytes.len()).as_bytes());
            buf.extend_from_slice(text.as_bytes());
            buf.extend_from_slice(bytes);
        }
        None => {
            buf.extend_from_slice(format!("[{}]", text.len()).as_bytes());
            buf.extend_from_slice(text.as_bytes());
        }
    }
}

fn is_record_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('[') && name.trim() == name
}

pub fn encode_frame(commands: &[Command]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(commands.len() * 64);
    for command in commands {
        encode_record(
            &mut buf,
            &command.name,
            &command.json,
            command.binary.as_deref(),
        );
    }
    buf
}
