use crate::auth::AuthProvider;
use crate::providers::AuthScheme;
use crate::types::{ChorusError, Result};
use crate::wire::ChatRequest;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;

pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// One fully-addressed upstream call.
#[derive(Debug, Clone)]
pub struct OutgoingCall {
    pub endpoint: String,
    pub auth: AuthScheme,
    pub body: ChatRequest,
}

/// What came back for one logical chat-completions call. Providers answer
/// the same request either as an SSE stream or as a single JSON object;
/// callers must accept both.
pub enum UpstreamBody {
    Events(ByteStream),
    Json(serde_json::Value),
}

/// Seam between the session state machine and the network. The reqwest
/// implementation below is the only one shipped; tests substitute scripted
/// transports.
pub trait Transport: Send + Sync {
    fn fetch(&self, call: OutgoingCall) -> BoxFuture<'static, Result<UpstreamBody>>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    auth: Arc<dyn AuthProvider>,
}

impl HttpTransport {
    pub fn new(auth: Arc<dyn AuthProvider>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .build()
            .map_err(ChorusError::Network)?;
        Ok(Self { client, auth })
    }

    pub fn with_client(client: reqwest::Client, auth: Arc<dyn AuthProvider>) -> Self {
        Self { client, auth }
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, call: OutgoingCall) -> BoxFuture<'static, Result<UpstreamBody>> {
        let client = self.client.clone();
        let auth = self.auth.clone();
        Box::pin(async move {
            let mut request = client.post(&call.endpoint).json(&call.body);

            if call.auth == AuthScheme::Bearer {
                match auth.token().await? {
                    Some(token) => {
                        request = request.header("Authorization", format!("Bearer {}", token));
                    }
                    None => {
                        return Err(ChorusError::Auth(format!(
                            "no bearer token available for {}",
                            call.endpoint
                        ))
                        .into());
                    }
                }
            }

            let response = request.send().await.map_err(ChorusError::Network)?;
            let status = response.status();

            if !status.is_success() {
                // A rejected or throttled token gets one rotation nudge; the
                // attempt tiers own the actual retry.
                if matches!(status.as_u16(), 401 | 403 | 429) {
                    if let Err(e) = auth.rotate().await {
                        tracing::debug!("Token rotation unavailable: {}", e.inner);
                    }
                }
                let body = match response.text().await {
                    Ok(t) => t,
                    Err(_) => "Unknown error (failed to read response text)".to_string(),
                };
                return Err(ChorusError::Upstream(status, body).into());
            }

            let is_event_stream = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.contains("text/event-stream"))
                .unwrap_or(call.body.stream);

            if is_event_stream {
                let stream = response
                    .bytes_stream()
                    .map(|r| r.map_err(std::io::Error::other))
                    .boxed();
                Ok(UpstreamBody::Events(stream))
            } else {
                let value = response
                    .json::<serde_json::Value>()
                    .await
                    .map_err(ChorusError::Network)?;
                Ok(UpstreamBody::Json(value))
            }
        })
    }
}
