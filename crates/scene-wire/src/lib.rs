//! Scene wire format shared by the streaming worker and its tooling.
//!
//! A response body (a *frame*) carries zero or more back-to-back records:
//!
//! ```text
//! NAME '[' JSON_LEN [',' BINARY_LEN] ']' JSON_BYTES [BINARY_BYTES]
//! ```
//!
//! Whitespace between records is tolerated. Keeping the codec in its own crate lets
//! fixture generators and the worker agree on framing without pulling in the HTTP stack.

mod decode;
mod encode;

pub use decode::{decode_frame, WireError};
pub use encode::{encode_frame, encode_record};

use bytes::Bytes;
use serde_json::Value;

/// One decoded, named unit of scene data destined for the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub json: Value,
    pub binary: Option<Bytes>,
    pub is_initial: bool,
}

impl Command {
    pub fn new(name: impl Into<String>, json: Value) -> Self {
        Self {
            name: name.into(),
            json,
            binary: None,
            is_initial: false,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<Bytes>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    pub fn kind(&self) -> CommandKind {
        CommandKind::from_name(&self.name)
    }
}

/// Command names the sequencing rules care about. Everything else is forwarded as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    SetScene,
    SetView,
    SetViewNode,
    SetImage,
    SetSequence,
    SetPlayback,
    Other,
}

impl CommandKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "setScene" => CommandKind::SetScene,
            "setView" => CommandKind::SetView,
            "setViewNode" => CommandKind::SetViewNode,
            "setImage" => CommandKind::SetImage,
            "setSequence" => CommandKind::SetSequence,
            "setPlayback" => CommandKind::SetPlayback,
            _ => CommandKind::Other,
        }
    }
}

/// Ordered commands decoded from one frame plus the context they were fetched in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandBatch {
    pub commands: Vec<Command>,
    pub is_initial: bool,
}

impl CommandBatch {
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
