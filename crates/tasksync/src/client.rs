//! GraphQL-over-HTTP client with WebSocket subscriptions.
//!
//! Queries and mutations are POSTed as `{ query, variables, operationName }`.
//! Subscriptions speak the `graphql-transport-ws` protocol.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{BoxStream, SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use crate::TaskSyncError;
use crate::config::ClientConfig;
use crate::operations::Operation;
use crate::transport::{GraphqlError, GraphqlResponse, GraphqlTransport};

/// WebSocket subprotocol for subscriptions.
const WS_PROTOCOL: &str = "graphql-transport-ws";

/// Each socket carries a single subscription.
const SUBSCRIPTION_ID: &str = "1";

/// Buffered subscription results before the socket reader waits.
const SUBSCRIPTION_BUFFER: usize = 256;

/// Query attempts on transient failures (initial + retries).
const QUERY_ATTEMPTS: u32 = 3;

const RETRY_BASE_MS: u64 = 200;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Serialize)]
struct RequestBody<'a> {
    query: &'a str,
    variables: &'a Value,
    #[serde(rename = "operationName")]
    operation_name: &'a str,
}

/// Client for a GraphQL task service.
pub struct HttpTransport {
    http: Client,
    config: ClientConfig,
}

impl HttpTransport {
    /// Create a client from validated settings.
    pub fn new(config: ClientConfig) -> Result<Self, TaskSyncError> {
        config.validate()?;
        let http = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Check if an error is transient and worth retrying.
    fn is_transient_error(err: &TaskSyncError) -> bool {
        match err {
            TaskSyncError::Status { status, .. } => matches!(status, 502..=504),
            TaskSyncError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    async fn post(
        &self,
        op: &Operation,
        variables: &Value,
    ) -> Result<GraphqlResponse, TaskSyncError> {
        let body = RequestBody {
            query: op.document,
            variables,
            operation_name: op.name,
        };
        trace!(operation = op.name, variables = %variables, "posting operation");

        let response = self.http.post(&self.config.endpoint).json(&body).send().await?;
        self.handle_response(response).await
    }

    /// Handle HTTP response and parse the GraphQL body.
    async fn handle_response(
        &self,
        response: reqwest::Response,
    ) -> Result<GraphqlResponse, TaskSyncError> {
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(TaskSyncError::RateLimited { retry_after_secs });
        }

        if !status.is_success() {
            let text = response.text().await.map_err(|e| TaskSyncError::Status {
                status: status.as_u16(),
                body: format!("failed to read response: {}", e),
            })?;

            // GraphQL servers often reject bad operations with 4xx + an errors body.
            if let Ok(body) = serde_json::from_str::<GraphqlResponse>(&text)
                && !body.errors.is_empty()
            {
                return Err(TaskSyncError::Graphql(body.errors));
            }

            return Err(TaskSyncError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let body = response.json().await?;
        Ok(body)
    }
}

#[async_trait]
impl GraphqlTransport for HttpTransport {
    async fn query(
        &self,
        op: &Operation,
        variables: Value,
    ) -> Result<GraphqlResponse, TaskSyncError> {
        let mut attempt = 0;
        loop {
            match self.post(op, &variables).await {
                Err(ref e) if Self::is_transient_error(e) && attempt + 1 < QUERY_ATTEMPTS => {
                    let backoff_ms = RETRY_BASE_MS * (1 << attempt);
                    warn!(
                        operation = op.name,
                        attempt = attempt + 1,
                        backoff_ms,
                        error = %e,
                        "transient error in query, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn mutate(
        &self,
        op: &Operation,
        variables: Value,
    ) -> Result<GraphqlResponse, TaskSyncError> {
        // Not retried: a lost response does not mean the write did not happen.
        self.post(op, &variables).await
    }

    async fn subscribe(
        &self,
        op: &Operation,
        variables: Value,
    ) -> Result<BoxStream<'static, Result<GraphqlResponse, TaskSyncError>>, TaskSyncError> {
        let url = self.config.subscription_url();
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TaskSyncError::WebSocket(format!("invalid url '{}': {}", url, e)))?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(WS_PROTOCOL));

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| TaskSyncError::WebSocket(format!("connection failed: {}", e)))?;
        let (mut write, mut read) = ws_stream.split();

        send_json(&mut write, json!({"type": "connection_init", "payload": {}})).await?;
        wait_for_ack(&mut read).await?;

        send_json(
            &mut write,
            json!({
                "id": SUBSCRIPTION_ID,
                "type": "subscribe",
                "payload": {
                    "query": op.document,
                    "variables": variables,
                    "operationName": op.name,
                }
            }),
        )
        .await?;
        info!(operation = op.name, url = %url, "subscription started");

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(pump(op.name, write, read, tx));

        Ok(ReceiverStream::new(rx).boxed())
    }
}

/// Server → client messages of `graphql-transport-ws`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    ConnectionAck,
    Next { payload: GraphqlResponse },
    Error { payload: Vec<GraphqlError> },
    Complete,
    Ping,
    Pong,
}

async fn send_json(
    write: &mut SplitSink<WsStream, Message>,
    value: Value,
) -> Result<(), TaskSyncError> {
    write
        .send(Message::Text(value.to_string()))
        .await
        .map_err(|e| TaskSyncError::WebSocket(format!("send failed: {}", e)))
}

async fn wait_for_ack(read: &mut SplitStream<WsStream>) -> Result<(), TaskSyncError> {
    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                Ok(ServerMessage::ConnectionAck) => return Ok(()),
                Ok(other) => trace!(message = ?other, "ignoring message before ack"),
                Err(e) => warn!(error = %e, "unparseable message before ack"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => return Err(TaskSyncError::WebSocket(format!("read error: {}", e))),
        }
    }
    Err(TaskSyncError::WebSocket("closed before connection_ack".to_string()))
}

/// Forward subscription results until the server completes, the socket
/// fails, or the consumer drops the stream.
async fn pump(
    operation: &'static str,
    mut write: SplitSink<WsStream, Message>,
    mut read: SplitStream<WsStream>,
    tx: mpsc::Sender<Result<GraphqlResponse, TaskSyncError>>,
) {
    loop {
        tokio::select! {
            _ = tx.closed() => {
                debug!(operation, "subscription dropped by consumer, completing");
                let complete = json!({"id": SUBSCRIPTION_ID, "type": "complete"});
                let _ = send_json(&mut write, complete).await;
                let _ = write.close().await;
                return;
            }

            msg = read.next() => {
                let failure = match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(ServerMessage::Next { payload }) => {
                                if tx.send(Ok(payload)).await.is_err() {
                                    return;
                                }
                                continue;
                            }
                            Ok(ServerMessage::Error { payload }) => TaskSyncError::Graphql(payload),
                            Ok(ServerMessage::Complete) => {
                                info!(operation, "subscription completed by server");
                                return;
                            }
                            Ok(ServerMessage::Ping) => {
                                let pong = json!({"type": "pong"});
                                match send_json(&mut write, pong).await {
                                    Err(e) => e,
                                    Ok(()) => continue,
                                }
                            }
                            Ok(other) => {
                                trace!(operation, message = ?other, "ignoring message");
                                continue;
                            }
                            Err(e) => {
                                warn!(operation, error = %e, "unparseable subscription message");
                                continue;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        TaskSyncError::WebSocket("connection closed".to_string())
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => TaskSyncError::WebSocket(format!("read error: {}", e)),
                };

                let _ = tx.send(Err(failure)).await;
                return;
            }
        }
    }
}
