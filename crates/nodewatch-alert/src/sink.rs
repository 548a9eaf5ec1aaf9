//! Alert sinks.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{AlertError, AlertResult};

/// Delivers one alert. Callers never retry.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, title: &str, body: &str) -> AlertResult<()>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}

/// Writes alerts to the log only. Used for node types without a webhook.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingAlertSink;

#[async_trait]
impl AlertSink for LoggingAlertSink {
    async fn send(&self, title: &str, body: &str) -> AlertResult<()> {
        info!(title, body, "alert");
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Slack-style incoming webhook payload.
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    username: &'a str,
    text: String,
}

/// Posts alerts to a chat webhook.
#[derive(Debug, Clone)]
pub struct WebhookAlertSink {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl WebhookAlertSink {
    pub fn new(url: &str, timeout: Duration) -> AlertResult<Self> {
        let url = reqwest::Url::parse(url).map_err(|e| AlertError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AlertError::Client)?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn send(&self, title: &str, body: &str) -> AlertResult<()> {
        let payload = WebhookPayload {
            username: "nodewatch",
            text: format!("*{title}*\n{body}"),
        };
        let resp = self.client.post(self.url.clone()).json(&payload).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AlertError::Rejected { status, body });
        }
        debug!(host = self.url.host_str().unwrap_or_default(), "webhook delivered");
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::Json;
    use axum::Router;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;

    type Received = Arc<Mutex<Vec<serde_json::Value>>>;

    async fn receiver(status: StatusCode) -> (String, Received) {
        let received = Received::default();
        let app = Router::new()
            .route(
                "/hook",
                post(
                    move |State(received): State<Received>, Json(payload): Json<serde_json::Value>| async move {
                        received.lock().unwrap().push(payload);
                        status
                    },
                ),
            )
            .with_state(received.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/hook"), received)
    }

    #[tokio::test]
    async fn webhook_posts_title_and_body() {
        let (url, received) = receiver(StatusCode::OK).await;
        let sink = WebhookAlertSink::new(&url, Duration::from_secs(5)).unwrap();

        sink.send("Error: Seed node x failed 3 times", "<bob> Timeout")
            .await
            .unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["username"], "nodewatch");
        assert_eq!(
            received[0]["text"],
            "*Error: Seed node x failed 3 times*\n<bob> Timeout"
        );
    }

    #[tokio::test]
    async fn rejected_webhook_is_an_error() {
        let (url, _) = receiver(StatusCode::INTERNAL_SERVER_ERROR).await;
        let sink = WebhookAlertSink::new(&url, Duration::from_secs(5)).unwrap();

        let err = sink.send("t", "b").await.unwrap_err();
        assert!(matches!(err, AlertError::Rejected { status, .. } if status == 500));
    }

    #[test]
    fn invalid_url_is_rejected_up_front() {
        let err = WebhookAlertSink::new("not a url", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, AlertError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn logging_sink_always_succeeds() {
        LoggingAlertSink.send("t", "b").await.unwrap();
    }
}
