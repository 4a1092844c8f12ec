//! Routes host messages to endpoint builders and the scheduler, and posts results back.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::endpoints::Endpoints;
use crate::error::WorkerError;
use crate::fetch::SharedHeaders;
use crate::host::{parse_host_message, AccessTokenResponse, HostMessage, HostPort};
use crate::pipeline;
use crate::scheduler::RequestScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Shutdown,
}

pub struct Dispatcher {
    scheduler: RequestScheduler,
    headers: SharedHeaders,
    port: Arc<dyn HostPort>,
    endpoints: Option<Endpoints>,
    closed: bool,
    tasks: JoinSet<()>,
}

impl Dispatcher {
    pub fn new(scheduler: RequestScheduler, headers: SharedHeaders, port: Arc<dyn HostPort>) -> Self {
        Self {
            scheduler,
            headers,
            port,
            endpoints: None,
            closed: false,
            tasks: JoinSet::new(),
        }
    }

    pub fn scheduler(&self) -> &RequestScheduler {
        &self.scheduler
    }

    pub fn is_connected(&self) -> bool {
        self.endpoints.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Parses one raw host message. Unknown or malformed messages are logged and skipped.
    pub fn handle_raw(&mut self, raw: &str) -> Flow {
        match parse_host_message(raw) {
            Ok(message) => self.handle(message),
            Err(err) => {
                warn!(error = %err, "ignoring unrecognized host message");
                if self.closed {
                    Flow::Shutdown
                } else {
                    Flow::Continue
                }
            }
        }
    }

    /// Handles one host message. Must run inside a tokio runtime; fetches complete on spawned
    /// tasks tracked by the dispatcher.
    pub fn handle(&mut self, message: HostMessage) -> Flow {
        if self.closed {
            warn!(method = message.method(), "connection closed; ignoring host message");
            return Flow::Shutdown;
        }

        match message {
            HostMessage::InitializeConnection {
                base_url,
                correlation_id,
                max_active_requests,
            } => {
                self.initialize(&base_url, correlation_id, max_active_requests);
            }
            HostMessage::UseAccessTokenResponse {
                access_token_response,
            } => self.use_access_token(access_token_response),
            HostMessage::SetMaxActiveRequests { n } => self.scheduler.set_concurrency_limit(n),
            HostMessage::AddClientLog {} => debug!("client log message ignored"),
            HostMessage::Close => {
                info!(
                    in_flight = self.tasks.len(),
                    "closing connection; pending fetches will still complete"
                );
                self.closed = true;
                return Flow::Shutdown;
            }
            data => self.fetch(data),
        }
        Flow::Continue
    }

    fn initialize(
        &mut self,
        base_url: &str,
        correlation_id: Option<String>,
        max_active_requests: Option<usize>,
    ) {
        let endpoints = match Endpoints::new(base_url) {
            Ok(endpoints) => endpoints,
            Err(err) => {
                let message = HostMessage::InitializeConnection {
                    base_url: base_url.to_string(),
                    correlation_id,
                    max_active_requests,
                };
                pipeline::report_failure(&err, &message.context(), self.port.as_ref());
                return;
            }
        };

        let correlation_id = {
            let mut headers = self.headers.write();
            headers.correlation_id = correlation_id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            headers.correlation_id.clone()
        };
        if let Some(n) = max_active_requests {
            self.scheduler.set_concurrency_limit(n);
        }
        info!(base_url = %endpoints.base(), %correlation_id, "connection initialized");
        self.endpoints = Some(endpoints);
    }

    fn use_access_token(&mut self, token: Option<AccessTokenResponse>) {
        let mut headers = self.headers.write();
        match token {
            Some(token) => {
                headers.authorization = Some(token.authorization());
                headers.tenant_uuid = token.tenant_uuid.filter(|tenant| !tenant.is_empty());
                debug!(token_type = %token.token_type, "access token updated");
            }
            None => {
                headers.authorization = None;
                headers.tenant_uuid = None;
                debug!("access token cleared");
            }
        }
    }

    fn fetch(&mut self, message: HostMessage) {
        let context = message.context();
        let Some(endpoints) = &self.endpoints else {
            pipeline::report_failure(&WorkerError::NotConnected, &context, self.port.as_ref());
            return;
        };
        let plan = match endpoints.plan(&message) {
            Ok(plan) => plan,
            Err(err) => {
                pipeline::report_failure(&err, &context, self.port.as_ref());
                return;
            }
        };

        let delivery = plan.delivery();
        let handle = self.scheduler.enqueue(plan.request, context.clone());
        let port = Arc::clone(&self.port);
        let tiles = Arc::clone(self.scheduler.tiles());
        self.tasks.spawn(async move {
            let outcome = handle.settled().await.map_err(WorkerError::from);
            pipeline::complete(outcome, delivery, &context, &tiles, port.as_ref());
        });
    }

    /// Processes host messages until the channel closes or `close` arrives, then waits for
    /// every accepted fetch to finish forwarding.
    pub async fn run(&mut self, mut inbound: mpsc::UnboundedReceiver<HostMessage>) {
        loop {
            tokio::select! {
                message = inbound.recv() => {
                    let Some(message) = message else {
                        debug!("host channel closed");
                        break;
                    };
                    if self.handle(message) == Flow::Shutdown {
                        break;
                    }
                }
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(err) = joined {
                        warn!(error = %err, "fetch task failed");
                    }
                }
            }
        }
        self.finish().await;
    }

    /// Waits for in-flight and queued fetches to complete.
    pub async fn finish(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "fetch task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::RequestHeaders;
    use crate::host::{ChannelPort, OutboundMessage};
    use crate::scheduler::testing::ScriptedFetcher;
    use crate::tile_width::TileWidthTable;
    use scene_wire::{encode_frame, Command};
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        dispatcher: Dispatcher,
        fetcher: Arc<ScriptedFetcher>,
        headers: SharedHeaders,
        outbound: UnboundedReceiver<OutboundMessage>,
    }

    fn harness(max_active: usize) -> Harness {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let scheduler = RequestScheduler::new(
            fetcher.clone(),
            Arc::new(TileWidthTable::new()),
            max_active,
        );
        let headers = RequestHeaders::shared("boot");
        let (port, outbound) = ChannelPort::new();
        Harness {
            dispatcher: Dispatcher::new(scheduler, headers.clone(), Arc::new(port)),
            fetcher,
            headers,
            outbound,
        }
    }

    fn init(dispatcher: &mut Dispatcher) {
        let flow = dispatcher.handle_raw(
            r#"{"method":"initializeConnection","baseUrl":"https://assets.test/","correlationId":"corr-1"}"#,
        );
        assert_eq!(flow, Flow::Continue);
    }

    #[test_timeout::timeout]
    async fn fetch_before_initialize_reports_not_connected() {
        let mut h = harness(2);
        h.dispatcher
            .handle_raw(r#"{"method":"getScene","sceneId":"s1"}"#);

        let message = h.outbound.try_recv().expect("error report");
        assert!(message.is_error());
        assert_eq!(message.json_content["errorText"], "Connection not initialized");
        assert_eq!(message.json_content["context"]["method"], "getScene");
        assert!(h.fetcher.started().is_empty());
    }

    #[test_timeout::timeout]
    async fn initialize_sets_headers_and_limit() {
        let mut h = harness(2);
        init(&mut h.dispatcher);
        h.dispatcher.handle(HostMessage::SetMaxActiveRequests { n: 6 });
        h.dispatcher
            .handle_raw(r#"{"method":"useAccessTokenResponse","accessTokenResponse":{"accessToken":"t0k","tokenType":"Bearer","tenantUuid":"ten"}}"#);

        assert!(h.dispatcher.is_connected());
        assert_eq!(h.dispatcher.scheduler().stats().max_active, 6);
        {
            let headers = h.headers.read();
            assert_eq!(headers.correlation_id, "corr-1");
            assert_eq!(headers.authorization.as_deref(), Some("Bearer t0k"));
            assert_eq!(headers.tenant_uuid.as_deref(), Some("ten"));
        }

        h.dispatcher
            .handle_raw(r#"{"method":"useAccessTokenResponse","accessTokenResponse":null}"#);
        assert!(h.headers.read().authorization.is_none());
    }

    #[test_timeout::timeout]
    async fn invalid_base_url_is_reported() {
        let mut h = harness(1);
        h.dispatcher
            .handle_raw(r#"{"method":"initializeConnection","baseUrl":"::nope"}"#);
        let message = h.outbound.try_recv().expect("error report");
        assert_eq!(message.json_content["errorText"], "Invalid request");
        assert!(!h.dispatcher.is_connected());
    }

    #[test_timeout::timeout]
    async fn forwards_commands_and_isolates_failures() {
        let mut h = harness(2);
        init(&mut h.dispatcher);
        h.dispatcher.handle(HostMessage::GetMaterial {
            scene_id: "s1".into(),
            material_ids: vec!["m1".into()],
        });
        h.dispatcher.handle(HostMessage::GetView {
            scene_id: "s1".into(),
            view_id: "v1".into(),
            query: None,
            sids: None,
            is_initial: Some(true),
            is_partial_tree: None,
        });
        h.fetcher.wait_started(2).await;

        h.fetcher.release(
            "scenes/s1/materials",
            Err(crate::error::FetchError {
                status: 500,
                message: "boom".into(),
            }),
        );
        let frame = encode_frame(&[Command::new("setView", json!({"viewId": "v1"}))]);
        h.fetcher.respond("scenes/s1/views/v1", frame.into());
        h.dispatcher.finish().await;

        let mut messages = Vec::new();
        while let Ok(message) = h.outbound.try_recv() {
            messages.push(message);
        }
        assert_eq!(messages.len(), 2);
        let errors: Vec<_> = messages.iter().filter(|m| m.is_error()).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].json_content["context"]["method"], "getMaterial");
        let view = messages.iter().find(|m| m.name == "setView").expect("setView");
        assert!(view.is_initial);
    }

    #[test_timeout::timeout]
    async fn close_ignores_later_messages_but_finishes_pending() {
        let mut h = harness(1);
        init(&mut h.dispatcher);
        h.dispatcher.handle(HostMessage::GetScene {
            scene_id: "s1".into(),
        });
        h.fetcher.wait_started(1).await;

        assert_eq!(h.dispatcher.handle(HostMessage::Close), Flow::Shutdown);
        assert!(h.dispatcher.is_closed());
        assert_eq!(
            h.dispatcher.handle(HostMessage::GetScene {
                scene_id: "s2".into()
            }),
            Flow::Shutdown
        );

        let frame = encode_frame(&[Command::new("setScene", json!({"id": "s1"}))]);
        h.fetcher.respond("scenes/s1", frame.into());
        h.dispatcher.finish().await;

        let message = h.outbound.try_recv().expect("setScene");
        assert_eq!(message.name, "setScene");
        assert_eq!(message.json_string().as_deref(), Some(r#"{"id":"s1"}"#));
        assert!(h.outbound.try_recv().is_err());
        assert_eq!(h.fetcher.started(), vec!["scenes/s1"]);
    }
}
