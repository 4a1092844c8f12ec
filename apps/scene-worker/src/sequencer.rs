//! Repairs cross-references and ordering inside one decoded batch before it is forwarded.
//!
//! Rules, applied in order:
//! 1. a `setView` without a view id takes the id of the first `setViewNode` that has one;
//! 2. `setScene` survives only when it is the whole batch;
//! 3. `setImage` payloads gain a `tileWidth` from the side table when one is known;
//! 4. when a `setSequence` follows a `setView`, every `setPlayback` moves to the end.
//!
//! Normalizing an already normalized batch returns it unchanged.

use scene_wire::{Command, CommandBatch, CommandKind};
use serde_json::{Map, Value};
use tracing::debug;

use crate::tile_width::TileWidthTable;

pub const VIEW_ID_FIELD: &str = "viewId";
pub const IMAGE_ID_FIELD: &str = "imageId";
pub const TILE_WIDTH_FIELD: &str = "tileWidth";

pub fn normalize(batch: CommandBatch, tiles: &TileWidthTable) -> Vec<Command> {
    let mut commands = batch.commands;
    backfill_view_ids(&mut commands);
    suppress_redundant_scene(&mut commands);
    annotate_tile_widths(&mut commands, tiles);
    order_for_forwarding(commands)
}

fn view_id(payload: &Value) -> Option<&Value> {
    payload.get(VIEW_ID_FIELD).filter(|id| match id {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    })
}

fn backfill_view_ids(commands: &mut [Command]) {
    let Some(node_view_id) = commands
        .iter()
        .filter(|c| c.kind() == CommandKind::SetViewNode)
        .find_map(|c| view_id(&c.json).cloned())
    else {
        return;
    };

    for command in commands
        .iter_mut()
        .filter(|c| c.kind() == CommandKind::SetView)
    {
        if view_id(&command.json).is_none() {
            debug!(view_id = %node_view_id, "back-filled setView id from setViewNode");
            let mut payload = Map::new();
            payload.insert(VIEW_ID_FIELD.to_string(), node_view_id.clone());
            command.json = Value::Object(payload);
        }
    }
}

fn suppress_redundant_scene(commands: &mut Vec<Command>) {
    if commands.len() > 1 {
        let before = commands.len();
        commands.retain(|c| c.kind() != CommandKind::SetScene);
        if commands.len() != before {
            debug!(dropped = before - commands.len(), "dropped setScene superseded by tree data");
        }
    }
}

fn image_id(payload: &Value) -> Option<&str> {
    payload
        .get(IMAGE_ID_FIELD)
        .or_else(|| payload.get("id"))
        .and_then(Value::as_str)
}

fn annotate_tile_widths(commands: &mut [Command], tiles: &TileWidthTable) {
    for command in commands
        .iter_mut()
        .filter(|c| c.kind() == CommandKind::SetImage)
    {
        let Some(width) = image_id(&command.json).and_then(|id| tiles.lookup(id)) else {
            continue;
        };
        if let Value::Object(payload) = &mut command.json {
            payload.insert(TILE_WIDTH_FIELD.to_string(), tile_width_value(&width));
        }
    }
}

/// Numeric header values become JSON numbers; anything else is passed on as text.
fn tile_width_value(raw: &str) -> Value {
    raw.parse::<u64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn playback_after_sequence(commands: &[Command]) -> bool {
    let Some(view_idx) = commands
        .iter()
        .position(|c| c.kind() == CommandKind::SetView)
    else {
        return false;
    };
    commands[view_idx + 1..]
        .iter()
        .any(|c| c.kind() == CommandKind::SetSequence)
}

fn order_for_forwarding(commands: Vec<Command>) -> Vec<Command> {
    if !playback_after_sequence(&commands) {
        return commands;
    }
    let (deferred, mut ordered): (Vec<Command>, Vec<Command>) = commands
        .into_iter()
        .partition(|c| c.kind() == CommandKind::SetPlayback);
    ordered.extend(deferred);
    ordered
}
