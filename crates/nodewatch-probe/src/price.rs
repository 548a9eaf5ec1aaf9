//! Price node probe.
//!
//! Three GETs in order: `/getFees`, `/getVersion`, `/getAllMarketPrices`.
//! The first failing step decides the reason; later steps are not called.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use tracing::debug;

use nodewatch_core::NodeDescriptor;
use nodewatch_core::config::PriceProbeSettings;

use crate::Probe;
use crate::error::{ProbeError, ProbeResult};
use crate::transport::Connector;

pub struct PriceProbe {
    connector: Connector,
    settings: PriceProbeSettings,
}

impl PriceProbe {
    pub fn new(connector: Connector, settings: PriceProbeSettings) -> Self {
        Self {
            connector,
            settings,
        }
    }

    async fn check(&self, node: &NodeDescriptor) -> ProbeResult<()> {
        let fees = self.get(node, "/getFees").await?;
        if !fees.contains(&self.settings.fee_key) {
            return Err(ProbeError::Mismatch(format!(
                "Result does not contain expected keyword: {fees}"
            )));
        }

        let version = self.get(node, "/getVersion").await?;
        if version.trim() != self.settings.expected_version {
            return Err(ProbeError::Mismatch(format!("Incorrect version:{version}")));
        }

        let prices = self.get(node, "/getAllMarketPrices").await?;
        if !prices.contains(&self.settings.currency_marker) {
            return Err(ProbeError::Mismatch(
                "getAllMarketPrices does not contain our test string".to_string(),
            ));
        }
        Ok(())
    }

    /// One GET over a fresh connection; the body is returned as text.
    async fn get(&self, node: &NodeDescriptor, path: &str) -> ProbeResult<String> {
        let stream = self.connector.connect(node).await?;
        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(path)
            .header("host", node.target())
            .header("user-agent", concat!("nodewatch/", env!("CARGO_PKG_VERSION")))
            .body(Empty::<Bytes>::new())
            .map_err(|e| ProbeError::Http(e.to_string()))?;

        let resp = sender.send_request(req).await?;
        let status = resp.status();
        let body = resp.into_body().collect().await?.to_bytes();
        debug!(address = %node.address, path, %status, bytes = body.len(), "price node response");

        if !status.is_success() {
            return Err(ProbeError::Http(format!("{path} returned {status}")));
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

#[async_trait]
impl Probe for PriceProbe {
    async fn probe(&self, node: &NodeDescriptor, timeout: Duration) -> ProbeResult<()> {
        tokio::time::timeout(timeout, self.check(node))
            .await
            .map_err(|_| ProbeError::Timeout)?
    }

    fn name(&self) -> &'static str {
        "price"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::extract::State;
    use axum::routing::get;
    use nodewatch_core::NodeType;

    type Hits = Arc<Mutex<HashMap<&'static str, usize>>>;

    #[derive(Clone)]
    struct FakeNode {
        fees: &'static str,
        version: &'static str,
        prices: &'static str,
        hits: Hits,
    }

    fn hit(hits: &Hits, path: &'static str) {
        *hits.lock().unwrap().entry(path).or_default() += 1;
    }

    async fn fees(State(node): State<FakeNode>) -> &'static str {
        hit(&node.hits, "/getFees");
        node.fees
    }

    async fn version(State(node): State<FakeNode>) -> &'static str {
        hit(&node.hits, "/getVersion");
        node.version
    }

    async fn prices(State(node): State<FakeNode>) -> &'static str {
        hit(&node.hits, "/getAllMarketPrices");
        node.prices
    }

    async fn serve(fake: FakeNode) -> u16 {
        let app = Router::new()
            .route("/getFees", get(fees))
            .route("/getVersion", get(version))
            .route("/getAllMarketPrices", get(prices))
            .with_state(fake);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    fn healthy() -> FakeNode {
        FakeNode {
            fees: r#"{"dataMap": {"btcTxFee": 120}}"#,
            version: "0.6.0\n",
            prices: r#"{"data": [{"currencyCode": "BTC", "price": 1.0}]}"#,
            hits: Hits::default(),
        }
    }

    fn node(port: u16) -> NodeDescriptor {
        NodeDescriptor::new("127.0.0.1", port, Some("bob".into()), NodeType::PriceNode)
    }

    fn probe() -> PriceProbe {
        PriceProbe::new(Connector::default(), PriceProbeSettings::default())
    }

    #[tokio::test]
    async fn healthy_node_passes_all_steps() {
        let fake = healthy();
        let hits = fake.hits.clone();
        let port = serve(fake).await;

        probe().probe(&node(port), Duration::from_secs(5)).await.unwrap();
        assert_eq!(hits.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn missing_fee_key_short_circuits() {
        let fake = FakeNode {
            fees: r#"{"dataMap": {}}"#,
            ..healthy()
        };
        let hits = fake.hits.clone();
        let port = serve(fake).await;

        let err = probe().probe(&node(port), Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"Result does not contain expected keyword: {"dataMap": {}}"#
        );

        let hits = hits.lock().unwrap();
        assert_eq!(hits.get("/getFees"), Some(&1));
        assert_eq!(hits.get("/getVersion"), None);
        assert_eq!(hits.get("/getAllMarketPrices"), None);
    }

    #[tokio::test]
    async fn wrong_version_is_reported_verbatim() {
        let fake = FakeNode {
            version: "0.5.9",
            ..healthy()
        };
        let hits = fake.hits.clone();
        let port = serve(fake).await;

        let err = probe().probe(&node(port), Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err.to_string(), "Incorrect version:0.5.9");
        assert_eq!(hits.lock().unwrap().get("/getAllMarketPrices"), None);
    }

    #[tokio::test]
    async fn missing_currency_marker_fails_last_step() {
        let fake = FakeNode {
            prices: r#"{"data": []}"#,
            ..healthy()
        };
        let port = serve(fake).await;

        let err = probe().probe(&node(port), Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "getAllMarketPrices does not contain our test string"
        );
    }

    #[tokio::test]
    async fn non_success_status_is_an_http_error() {
        let app = Router::new();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let err = probe().probe(&node(port), Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "http request failed: /getFees returned 404 Not Found"
        );
    }
}
