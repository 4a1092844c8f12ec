//! Messages exchanged with the host context and the port outbound messages travel through.

use bytes::Bytes;
use scene_wire::Command;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::ErrorReport;
use crate::scheduler::RequestContext;

pub const NOTIFY_ERROR: &str = "notifyError";

/// Inbound host message. The `method` field selects the operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum HostMessage {
    #[serde(rename_all = "camelCase")]
    InitializeConnection {
        base_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_active_requests: Option<usize>,
    },
    #[serde(rename_all = "camelCase")]
    GetScene { scene_id: String },
    #[serde(rename_all = "camelCase")]
    GetView {
        scene_id: String,
        view_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sids: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_initial: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_partial_tree: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    GetMaterial {
        scene_id: String,
        material_ids: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    GetAnnotation {
        scene_id: String,
        annotation_ids: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    GetImage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scene_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        material_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        view_id: Option<String>,
        image_id: String,
    },
    #[serde(rename_all = "camelCase")]
    GetGeomMesh {
        scene_id: String,
        mesh_ids: Vec<String>,
    },
    /// Bounding boxes only.
    #[serde(rename_all = "camelCase")]
    GetMesh {
        scene_id: String,
        mesh_ids: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    GetViewGroups {
        scene_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        view_group_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    GetViewAnimations {
        scene_id: String,
        view_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    UseAccessTokenResponse {
        #[serde(default)]
        access_token_response: Option<AccessTokenResponse>,
    },
    SetMaxActiveRequests { n: usize },
    Close,
    AddClientLog {},
}

impl HostMessage {
    pub fn method(&self) -> &'static str {
        match self {
            HostMessage::InitializeConnection { .. } => "initializeConnection",
            HostMessage::GetScene { .. } => "getScene",
            HostMessage::GetView { .. } => "getView",
            HostMessage::GetMaterial { .. } => "getMaterial",
            HostMessage::GetAnnotation { .. } => "getAnnotation",
            HostMessage::GetImage { .. } => "getImage",
            HostMessage::GetGeomMesh { .. } => "getGeomMesh",
            HostMessage::GetMesh { .. } => "getMesh",
            HostMessage::GetViewGroups { .. } => "getViewGroups",
            HostMessage::GetViewAnimations { .. } => "getViewAnimations",
            HostMessage::UseAccessTokenResponse { .. } => "useAccessTokenResponse",
            HostMessage::SetMaxActiveRequests { .. } => "setMaxActiveRequests",
            HostMessage::Close => "close",
            HostMessage::AddClientLog {} => "addClientLog",
        }
    }

    /// Caller context echoed in error reports: the method name plus the message fields.
    pub fn context(&self) -> RequestContext {
        let mut params = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Some(fields) = params.as_object_mut() {
            fields.remove("method");
        }
        if params.as_object().is_some_and(|fields| fields.is_empty()) {
            params = Value::Null;
        }
        RequestContext::new(self.method(), params)
    }
}

pub fn parse_host_message(raw: &str) -> Result<HostMessage, serde_json::Error> {
    serde_json::from_str(raw)
}

/// OAuth token payload forwarded by the host. Accepts both the raw snake_case token response
/// and camelCase keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenResponse {
    #[serde(alias = "access_token")]
    pub access_token: String,
    #[serde(alias = "token_type", default = "default_token_type")]
    pub token_type: String,
    #[serde(alias = "tenant_uuid", alias = "tenantId", default)]
    pub tenant_uuid: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl AccessTokenResponse {
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

/// One message posted to the host: a forwarded scene command or a `notifyError`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub name: String,
    pub json_content: Value,
    /// Commands from text responses reach the host as `jsonString` rather than `jsonContent`.
    pub json_as_string: bool,
    /// Shares the response buffer; never copied on the way out.
    pub binary_content: Option<Bytes>,
    pub is_initial: bool,
}

impl OutboundMessage {
    pub fn error(report: &ErrorReport) -> Self {
        Self {
            name: NOTIFY_ERROR.to_string(),
            json_content: serde_json::to_value(report).unwrap_or(Value::Null),
            json_as_string: false,
            binary_content: None,
            is_initial: false,
        }
    }

    /// A command decoded from a text response.
    pub fn text(command: Command) -> Self {
        Self {
            json_as_string: true,
            ..Self::from(command)
        }
    }

    pub fn is_error(&self) -> bool {
        self.name == NOTIFY_ERROR
    }

    /// Serialized payload for text commands, after any sequencing edits.
    pub fn json_string(&self) -> Option<String> {
        self.json_as_string.then(|| self.json_content.to_string())
    }
}

impl From<Command> for OutboundMessage {
    fn from(command: Command) -> Self {
        Self {
            name: command.name,
            json_content: command.json,
            json_as_string: false,
            binary_content: command.binary,
            is_initial: command.is_initial,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("host channel closed")]
    Closed,
}

pub trait HostPort: Send + Sync + 'static {
    fn post(&self, message: OutboundMessage) -> Result<(), HostError>;
}

/// Host port backed by an unbounded channel; the receiver is the host side.
#[derive(Debug, Clone)]
pub struct ChannelPort {
    sender: mpsc::UnboundedSender<OutboundMessage>,
}

impl ChannelPort {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl HostPort for ChannelPort {
    fn post(&self, message: OutboundMessage) -> Result<(), HostError> {
        self.sender.send(message).map_err(|_| HostError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test_timeout::timeout]
    fn parses_view_request() {
        let message = parse_host_message(
            r#"{"method":"getView","sceneId":"s1","viewId":"v1","query":"lod=2","isInitial":true}"#,
        )
        .expect("parse");
        assert_eq!(
            message,
            HostMessage::GetView {
                scene_id: "s1".into(),
                view_id: "v1".into(),
                query: Some(json!("lod=2")),
                sids: None,
                is_initial: Some(true),
                is_partial_tree: None,
            }
        );
        assert_eq!(message.method(), "getView");
        let context = message.context();
        assert_eq!(context.method, "getView");
        assert_eq!(context.params["viewId"], "v1");
        assert!(context.params.get("method").is_none());
    }

    #[test_timeout::timeout]
    fn parses_control_messages() {
        assert_eq!(
            parse_host_message(r#"{"method":"close"}"#).expect("close"),
            HostMessage::Close
        );
        assert_eq!(
            parse_host_message(r#"{"method":"setMaxActiveRequests","n":8}"#).expect("limit"),
            HostMessage::SetMaxActiveRequests { n: 8 }
        );
        assert_eq!(
            parse_host_message(r#"{"method":"addClientLog","level":"info","text":"hi"}"#)
                .expect("log"),
            HostMessage::AddClientLog {}
        );
    }

    #[test_timeout::timeout]
    fn token_response_accepts_raw_oauth_keys() {
        let message = parse_host_message(
            r#"{"method":"useAccessTokenResponse","accessTokenResponse":{"access_token":"abc","token_type":"Bearer","tenant_uuid":"t-1"}}"#,
        )
        .expect("parse");
        let token = match message {
            HostMessage::UseAccessTokenResponse {
                access_token_response: Some(token),
            } => token,
            other => panic!("unexpected message {other:?}"),
        };
        assert_eq!(token.authorization(), "Bearer abc");
        assert_eq!(token.tenant_uuid.as_deref(), Some("t-1"));

        let cleared =
            parse_host_message(r#"{"method":"useAccessTokenResponse","accessTokenResponse":null}"#)
                .expect("parse");
        assert_eq!(
            cleared,
            HostMessage::UseAccessTokenResponse {
                access_token_response: None
            }
        );
    }

    #[test_timeout::timeout]
    fn unknown_methods_fail_to_parse() {
        assert!(parse_host_message(r#"{"method":"getTeapot"}"#).is_err());
        assert!(parse_host_message("not json").is_err());
    }

    #[test_timeout::timeout]
    fn error_messages_use_notify_error_name() {
        let report = ErrorReport {
            error_text: "Request failed".into(),
            error: None,
            reason: None,
            context: None,
        };
        let message = OutboundMessage::error(&report);
        assert!(message.is_error());
        assert!(message.json_string().is_none());
        assert_eq!(message.json_content, json!({"errorText": "Request failed"}));
    }

    #[test_timeout::timeout]
    fn text_commands_carry_a_json_string() {
        let message = OutboundMessage::text(Command::new("setScene", json!({"id": "s1"})));
        assert_eq!(message.name, "setScene");
        assert_eq!(message.json_string().as_deref(), Some(r#"{"id":"s1"}"#));

        let binary = OutboundMessage::from(Command::new("setScene", json!({"id": "s1"})));
        assert!(binary.json_string().is_none());
    }

    #[tokio::test]
    async fn channel_port_reports_closed_host() {
        let (port, receiver) = ChannelPort::new();
        drop(receiver);
        let err = port
            .post(OutboundMessage::from(Command::new("setScene", json!({}))))
            .unwrap_err();
        assert!(matches!(err, HostError::Closed));
    }
}
