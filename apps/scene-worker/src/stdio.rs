//! JSON-lines bridge: host messages arrive one per line on the reader, outbound messages leave
//! one per line on the writer with binary payloads base64 encoded.

use std::io;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::dispatcher::Dispatcher;
use crate::host::{parse_host_message, OutboundMessage};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutboundLine<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    json_content: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    json_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    binary_content: Option<String>,
    is_initial: bool,
}

pub fn encode_line(message: &OutboundMessage) -> Result<String, serde_json::Error> {
    let line = OutboundLine {
        name: &message.name,
        json_content: (!message.json_as_string).then_some(&message.json_content),
        json_string: message.json_string(),
        binary_content: message
            .binary_content
            .as_ref()
            .map(|binary| BASE64_STANDARD.encode(binary)),
        is_initial: message.is_initial,
    };
    serde_json::to_string(&line)
}

/// Drives `dispatcher` from `reader` until EOF or `close`, waits for accepted fetches, then
/// flushes everything the host port produced to `writer`.
///
/// `outbound` must be the receiving half of the port the dispatcher posts to, so the writer
/// finishes once the dispatcher is dropped.
pub async fn serve<R, W>(
    mut dispatcher: Dispatcher,
    outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    reader: R,
    writer: W,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer_task = tokio::spawn(write_outbound(outbound, writer));

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let reader_task = tokio::spawn(async move {
        let mut lines = reader.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match parse_host_message(line) {
                        Ok(message) => {
                            if inbound_tx.send(message).is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(error = %err, "ignoring unrecognized host message"),
                    }
                }
                Ok(None) => {
                    debug!("host input closed");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "failed to read host input");
                    break;
                }
            }
        }
    });

    dispatcher.run(inbound_rx).await;
    reader_task.abort();
    drop(dispatcher);

    writer_task
        .await
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?
}

async fn write_outbound<W>(
    mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    mut writer: W,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let mut line = encode_line(&message).map_err(io::Error::from)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    #[test_timeout::timeout]
    fn binary_payload_is_base64_encoded() {
        let message = OutboundMessage {
            name: "setGeomMesh".into(),
            json_content: json!({"id": "g1"}),
            json_as_string: false,
            binary_content: Some(Bytes::from_static(&[0, 1, 2, 255])),
            is_initial: true,
        };
        let line: Value = serde_json::from_str(&encode_line(&message).expect("encode")).expect("json");
        assert_eq!(
            line,
            json!({
                "name": "setGeomMesh",
                "jsonContent": {"id": "g1"},
                "binaryContent": "AAEC/w==",
                "isInitial": true
            })
        );
    }

    #[test_timeout::timeout]
    fn binary_field_is_omitted_when_absent() {
        let message = OutboundMessage {
            name: "setView".into(),
            json_content: json!({"viewId": "v1"}),
            json_as_string: false,
            binary_content: None,
            is_initial: false,
        };
        let line = encode_line(&message).expect("encode");
        assert!(!line.contains("binaryContent"));
    }

    #[test_timeout::timeout]
    fn text_commands_are_written_as_json_string() {
        let message = OutboundMessage::text(scene_wire::Command::new(
            "setViewGroups",
            json!({"groups": []}),
        ));
        let line: Value =
            serde_json::from_str(&encode_line(&message).expect("encode")).expect("json");
        assert_eq!(
            line,
            json!({
                "name": "setViewGroups",
                "jsonString": "{\"groups\":[]}",
                "isInitial": false
            })
        );
    }
}
