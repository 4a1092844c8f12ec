//! Turns a settled fetch into host messages: decode, normalize, forward.

use scene_wire::{decode_frame, WireError};
use tracing::{debug, warn};

use crate::error::{WorkerError, WorkerResult};
use crate::fetch::{FetchResponse, ResponseKind};
use crate::host::{HostPort, OutboundMessage};
use crate::metrics;
use crate::scheduler::RequestContext;
use crate::sequencer::normalize;
use crate::tile_width::TileWidthTable;

/// How the commands of one response are delivered to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub is_initial: bool,
    /// Text responses forward their payloads as `jsonString`.
    pub kind: ResponseKind,
}

impl Delivery {
    pub fn binary(is_initial: bool) -> Self {
        Self {
            is_initial,
            kind: ResponseKind::Binary,
        }
    }
}

/// Decodes the whole frame before posting anything, so a malformed response forwards nothing.
/// A text response with content but no records is a framing error. Returns the number of
/// commands posted.
pub fn forward_response(
    response: FetchResponse,
    delivery: Delivery,
    tiles: &TileWidthTable,
    port: &dyn HostPort,
) -> WorkerResult<usize> {
    let has_content = response.body.iter().any(|byte| !byte.is_ascii_whitespace());
    let length = response.body.len();
    let batch = decode_frame(response.body, delivery.is_initial)?;
    if batch.is_empty() && has_content && delivery.kind == ResponseKind::Text {
        return Err(WireError::NoRecords { length }.into());
    }

    let commands = normalize(batch, tiles);
    let count = commands.len();
    for command in commands {
        metrics::COMMANDS_FORWARDED
            .with_label_values(&[command.name.as_str()])
            .inc();
        let message = match delivery.kind {
            ResponseKind::Text => OutboundMessage::text(command),
            ResponseKind::Binary => OutboundMessage::from(command),
        };
        if port.post(message).is_err() {
            warn!(url = %response.url, "host port closed; dropping remaining commands");
            break;
        }
    }
    debug!(url = %response.url, commands = count, "forwarded response");
    Ok(count)
}

/// Posts the single `notifyError` for a failed operation.
pub fn report_failure(err: &WorkerError, context: &RequestContext, port: &dyn HostPort) {
    metrics::REQUESTS_FAILED
        .with_label_values(&[err.kind()])
        .inc();
    warn!(method = %context.method, kind = err.kind(), error = %err, "operation failed");
    let report = err.to_report(context);
    if port.post(OutboundMessage::error(&report)).is_err() {
        warn!(method = %context.method, "host port closed; error report dropped");
    }
}

/// Runs the post-processing for one outcome and reports any failure.
pub fn complete(
    outcome: WorkerResult<FetchResponse>,
    delivery: Delivery,
    context: &RequestContext,
    tiles: &TileWidthTable,
    port: &dyn HostPort,
) {
    if let Err(err) = outcome.and_then(|response| forward_response(response, delivery, tiles, port))
    {
        report_failure(&err, context, port);
    }
}
