//! Height-addressed RPC client for a Pocket node's `/v1/query/*` routes.
//!
//! One call is one attempt. Retrying belongs to the callers, which know which
//! delay and budget apply to which query.

use crate::chain::cache::{CacheError, ResponseCache};
use crate::chain::codec::{ChainCodec, CodecError};
use crate::chain::types::{Block, Claim, TxBatch};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

pub const ROUTE_HEIGHT: &str = "/query/height";
pub const ROUTE_BLOCK: &str = "/query/block";
pub const ROUTE_BLOCK_TXS: &str = "/query/blocktxs";
pub const ROUTE_STATE: &str = "/query/state";
pub const ROUTE_SUPPLY: &str = "/query/supply";

const DEFAULT_ENDPOINT: &str = "http://localhost:8081/v1";
const DEFAULT_PER_PAGE: u32 = 1000;
const STATE_PER_PAGE: u32 = 10_000_000;
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub endpoint: String,
    /// Page size for paginated height queries.
    pub per_page: u32,
    /// Minimum spacing between requests; 0 disables rate limiting.
    pub min_request_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            per_page: DEFAULT_PER_PAGE,
            min_request_interval_ms: 0,
        }
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("request: {0}")]
    Request(#[from] reqwest::Error),
    #[error("status code non 200: {status}: with body {body}")]
    HttpStatus { status: u16, body: String },
    #[error("decode: {0}")]
    Codec(#[from] CodecError),
    #[error("decode {route}: {reason}")]
    Decode { route: &'static str, reason: String },
    #[error("cache: {0}")]
    Cache(#[from] CacheError),
    #[error("invalid endpoint {0}: must be a node version endpoint ending in v1")]
    InvalidEndpoint(String),
}

/// Read-only view of a chain, addressed by height.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn latest_height(&self) -> Result<u64, ClientError>;

    async fn block(&self, height: u64) -> Result<Block, ClientError>;

    async fn block_txs(&self, height: u64) -> Result<TxBatch, ClientError>;

    /// Claims present in the end-of-block state at `height`.
    async fn claims(&self, height: u64) -> Result<Vec<Claim>, ClientError>;

    /// Total token supply at `height`.
    async fn supply(&self, height: u64) -> Result<i64, ClientError>;
}

#[derive(Deserialize)]
struct HeightResponse {
    height: u64,
}

#[derive(Deserialize)]
struct SupplyResponse {
    total: String,
}

pub struct HttpChainClient {
    config: ClientConfig,
    base: Url,
    client: reqwest::Client,
    codec: Arc<dyn ChainCodec>,
    cache: Option<ResponseCache>,
    last_request: Mutex<Option<Instant>>,
    request_count: AtomicU64,
}

impl HttpChainClient {
    pub fn new(
        config: ClientConfig,
        codec: Arc<dyn ChainCodec>,
        cache: Option<ResponseCache>,
    ) -> Result<Self, ClientError> {
        let base = Url::parse(config.endpoint.trim_end_matches('/'))
            .map_err(|_| ClientError::InvalidEndpoint(config.endpoint.clone()))?;
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            config,
            base,
            client,
            codec,
            cache,
            last_request: Mutex::new(None),
            request_count: AtomicU64::new(0),
        })
    }

    /// Check the endpoint is a reachable node version endpoint before any real work.
    pub async fn probe(&self) -> Result<(), ClientError> {
        if !self.base.as_str().trim_end_matches('/').ends_with("v1") {
            return Err(ClientError::InvalidEndpoint(self.config.endpoint.clone()));
        }
        let res = self.client.get(self.base.clone()).send().await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ClientError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        info!(endpoint = %self.base, "endpoint reachable");
        Ok(())
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    async fn rate_limit(&self) {
        if self.config.min_request_interval_ms == 0 {
            return;
        }
        let min_gap = Duration::from_millis(self.config.min_request_interval_ms);
        let wait = self
            .last_request
            .lock()
            .ok()
            .and_then(|last| *last)
            .map(|prev| min_gap.saturating_sub(prev.elapsed()))
            .unwrap_or(Duration::ZERO);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(Instant::now());
        }
    }

    fn url_for(&self, route: &str) -> String {
        let base = self.base.as_str().trim_end_matches('/');
        format!("{base}{route}")
    }

    /// POST `body` to `route` and decode the reply. Only replies that decode are
    /// stored in the cache; a cached reply that no longer decodes is fetched again.
    async fn post<T, F>(
        &self,
        route: &'static str,
        cache_height: Option<u64>,
        body: Option<serde_json::Value>,
        decode: F,
    ) -> Result<T, ClientError>
    where
        F: Fn(&[u8]) -> Result<T, ClientError> + Send,
    {
        let key = body
            .as_ref()
            .map(ResponseCache::request_key)
            .unwrap_or_default();
        if let (Some(cache), Some(height)) = (&self.cache, cache_height) {
            if let Some(hit) = cache.get(route, height, &key)? {
                match decode(&hit) {
                    Ok(value) => {
                        debug!(route, height, "cache hit");
                        return Ok(value);
                    }
                    Err(e) => {
                        warn!(route, height, error = %e, "cached response unreadable, refetching");
                    }
                }
            }
        }

        self.rate_limit().await;
        let mut req = self.client.post(self.url_for(route));
        if let Some(body) = &body {
            req = req.json(body);
        }
        let res = req.send().await?;
        let status = res.status();
        let bytes = res.bytes().await?;
        self.request_count.fetch_add(1, Ordering::Relaxed);
        if !status.is_success() {
            return Err(ClientError::HttpStatus {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        let value = decode(&bytes)?;
        if let (Some(cache), Some(height)) = (&self.cache, cache_height) {
            cache.put(route, height, &key, &bytes)?;
        }
        Ok(value)
    }
}

fn decode_json<T: DeserializeOwned>(route: &'static str, bytes: &[u8]) -> Result<T, ClientError> {
    serde_json::from_slice(bytes).map_err(|e| ClientError::Decode {
        route,
        reason: e.to_string(),
    })
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn latest_height(&self) -> Result<u64, ClientError> {
        let parsed: HeightResponse = self
            .post(ROUTE_HEIGHT, None, None, |b| decode_json(ROUTE_HEIGHT, b))
            .await?;
        Ok(parsed.height)
    }

    async fn block(&self, height: u64) -> Result<Block, ClientError> {
        let body = serde_json::json!({ "height": height });
        self.post(ROUTE_BLOCK, Some(height), Some(body), |b| {
            Ok(self.codec.decode_block(b)?)
        })
        .await
    }

    async fn block_txs(&self, height: u64) -> Result<TxBatch, ClientError> {
        let mut batch = TxBatch::default();
        let mut page: u32 = 1;
        loop {
            let body = serde_json::json!({
                "height": height,
                "page": page,
                "per_page": self.config.per_page,
            });
            let chunk = self
                .post(ROUTE_BLOCK_TXS, Some(height), Some(body), |b| {
                    Ok(self.codec.decode_tx_search(b)?)
                })
                .await?;
            let received = chunk.txs.len();
            batch.extend(chunk);
            if received == 0 || batch.txs.len() as u64 >= batch.total_count {
                break;
            }
            page += 1;
        }
        Ok(batch)
    }

    async fn claims(&self, height: u64) -> Result<Vec<Claim>, ClientError> {
        // The state route is not paged by the node; ask for everything at once.
        let body = serde_json::json!({
            "height": height,
            "page": 1,
            "per_page": STATE_PER_PAGE,
        });
        self.post(ROUTE_STATE, Some(height), Some(body), |b| {
            Ok(self.codec.decode_state(b)?)
        })
        .await
    }

    async fn supply(&self, height: u64) -> Result<i64, ClientError> {
        let body = serde_json::json!({ "height": height });
        self.post(ROUTE_SUPPLY, Some(height), Some(body), |b| {
            let parsed: SupplyResponse = decode_json(ROUTE_SUPPLY, b)?;
            parse_supply(&parsed.total)
        })
        .await
    }
}

fn parse_supply(total: &str) -> Result<i64, ClientError> {
    total
        .trim()
        .parse::<i64>()
        .map_err(|e| ClientError::Decode {
            route: ROUTE_SUPPLY,
            reason: format!("total {total:?}: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::codec::JsonCodec;
    use crate::chain::retry::with_retry;
    use axum::extract::State;
    use axum::http::{StatusCode, Uri};
    use axum::Router;
    use std::collections::VecDeque;

    /// Loopback node that answers requests with scripted replies, in order.
    #[derive(Clone, Default)]
    struct StubNode {
        replies: Arc<Mutex<VecDeque<(StatusCode, String)>>>,
        requests: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
    }

    impl StubNode {
        fn requests(&self) -> Vec<(String, serde_json::Value)> {
            self.requests.lock().unwrap().clone()
        }
    }

    async fn reply(State(node): State<StubNode>, uri: Uri, body: String) -> (StatusCode, String) {
        let parsed = serde_json::from_str(&body).unwrap_or(serde_json::Value::Null);
        node.requests
            .lock()
            .unwrap()
            .push((uri.path().to_string(), parsed));
        node.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((StatusCode::NOT_FOUND, "no reply scripted".to_string()))
    }

    async fn serve(replies: Vec<(StatusCode, String)>) -> (String, StubNode) {
        let node = StubNode::default();
        node.replies.lock().unwrap().extend(replies);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().fallback(reply).with_state(node.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}/v1"), node)
    }

    fn ok(body: &str) -> (StatusCode, String) {
        (StatusCode::OK, body.to_string())
    }

    fn cached_client(endpoint: &str) -> HttpChainClient {
        let config = ClientConfig {
            endpoint: endpoint.to_string(),
            ..Default::default()
        };
        let cache = ResponseCache::in_memory().unwrap();
        HttpChainClient::new(config, Arc::new(JsonCodec), Some(cache)).unwrap()
    }

    const BLOCK_5: &str = r#"{"block":{"header":{"height":"5","time":"2021-01-27T12:00:00Z"}}}"#;

    fn send_tx(hash: &str) -> String {
        format!(
            r#"{{"hash":"{hash}","height":7,"index":0,"tx_result":{{"code":0}},"stdTx":{{"msg":{{"type":"pos/Send","value":{{}}}}}}}}"#
        )
    }

    fn tx_page(hashes: &[&str], total_count: u64) -> String {
        let txs: Vec<String> = hashes.iter().map(|h| send_tx(h)).collect();
        let joined = txs.join(",");
        format!(r#"{{"txs":[{joined}],"total_count":{total_count}}}"#)
    }

    fn client(endpoint: &str) -> Result<HttpChainClient, ClientError> {
        let config = ClientConfig {
            endpoint: endpoint.to_string(),
            ..Default::default()
        };
        HttpChainClient::new(config, Arc::new(JsonCodec), None)
    }

    #[test]
    fn rejects_unparseable_endpoint() {
        assert!(matches!(
            client("not a url"),
            Err(ClientError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn builds_route_urls() {
        let c = client("http://node.example:8081/v1/").unwrap();
        assert_eq!(
            c.url_for(ROUTE_BLOCK_TXS),
            "http://node.example:8081/v1/query/blocktxs"
        );
    }

    #[tokio::test]
    async fn probe_requires_version_endpoint() {
        let c = client("http://node.example:8081/v2").unwrap();
        assert!(matches!(
            c.probe().await,
            Err(ClientError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn supply_parses_decimal_string() {
        assert_eq!(parse_supply(" 1000 ").unwrap(), 1000);
        assert!(matches!(
            parse_supply("1e9"),
            Err(ClientError::Decode { .. })
        ));
    }

    #[test]
    fn status_error_carries_code_and_body() {
        let err = ClientError::HttpStatus {
            status: 500,
            body: "boom".into(),
        };
        assert_eq!(err.to_string(), "status code non 200: 500: with body boom");
    }

    #[tokio::test]
    async fn truncated_reply_is_not_cached_and_retry_recovers() {
        let (endpoint, _node) = serve(vec![ok(r#"{"block":{"header":"#), ok(BLOCK_5)]).await;
        let c = cached_client(&endpoint);
        let block = with_retry("block", 5, 3, Duration::ZERO, || c.block(5))
            .await
            .unwrap();
        assert_eq!(block.height, 5);
        assert_eq!(c.request_count(), 2);
        let cache = c.cache.as_ref().unwrap();
        assert_eq!(cache.count(ROUTE_BLOCK).unwrap(), 1);
    }

    #[tokio::test]
    async fn unreadable_cache_entry_is_refetched() {
        let (endpoint, _node) = serve(vec![ok(BLOCK_5)]).await;
        let c = cached_client(&endpoint);
        let key = ResponseCache::request_key(&serde_json::json!({ "height": 5 }));
        let cache = c.cache.as_ref().unwrap();
        cache.put(ROUTE_BLOCK, 5, &key, b"{\"block\":").unwrap();
        assert_eq!(c.block(5).await.unwrap().height, 5);
        assert_eq!(c.request_count(), 1);
        assert_eq!(cache.get(ROUTE_BLOCK, 5, &key).unwrap(), Some(BLOCK_5.as_bytes().to_vec()));
    }

    #[tokio::test]
    async fn second_read_is_served_from_cache() {
        let (endpoint, node) = serve(vec![ok(BLOCK_5)]).await;
        let c = cached_client(&endpoint);
        assert_eq!(c.block(5).await.unwrap().height, 5);
        assert_eq!(c.block(5).await.unwrap().height, 5);
        assert_eq!(c.request_count(), 1);
        assert_eq!(node.requests().len(), 1);
    }

    #[tokio::test]
    async fn block_txs_reads_pages_until_total_count() {
        let (endpoint, node) = serve(vec![
            ok(&tx_page(&["a", "b"], 3)),
            ok(&tx_page(&["c"], 3)),
        ])
        .await;
        let c = client(&endpoint).unwrap();
        let batch = c.block_txs(7).await.unwrap();
        let hashes: Vec<&str> = batch.txs.iter().map(|t| t.hash.as_str()).collect();
        assert_eq!(hashes, vec!["a", "b", "c"]);
        assert_eq!(c.request_count(), 2);
        let requests = node.requests();
        assert_eq!(requests[0].0, "/v1/query/blocktxs");
        assert_eq!(requests[0].1["page"], 1);
        assert_eq!(requests[1].1["page"], 2);
        assert_eq!(requests[1].1["height"], 7);
    }

    #[tokio::test]
    async fn block_txs_stops_on_empty_page() {
        let (endpoint, _node) = serve(vec![ok(&tx_page(&["a"], 5)), ok(&tx_page(&[], 5))]).await;
        let c = client(&endpoint).unwrap();
        let batch = c.block_txs(7).await.unwrap();
        assert_eq!(batch.txs.len(), 1);
        assert_eq!(batch.total_count, 5);
        assert_eq!(c.request_count(), 2);
    }

    #[tokio::test]
    async fn non_success_status_carries_body() {
        let (endpoint, _node) = serve(vec![(
            StatusCode::SERVICE_UNAVAILABLE,
            "node busy".to_string(),
        )])
        .await;
        let c = client(&endpoint).unwrap();
        match c.supply(9).await {
            Err(ClientError::HttpStatus { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "node busy");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn claims_request_whole_state() {
        let (endpoint, node) =
            serve(vec![ok(r#"{"app_state":{"pocketcore":{"claims":[]}}}"#)]).await;
        let c = client(&endpoint).unwrap();
        assert!(c.claims(99).await.unwrap().is_empty());
        let requests = node.requests();
        assert_eq!(requests[0].0, "/v1/query/state");
        assert_eq!(requests[0].1["per_page"], STATE_PER_PAGE);
        assert_eq!(requests[0].1["height"], 99);
    }

    #[tokio::test]
    async fn supply_and_height_decode() {
        let (endpoint, _node) =
            serve(vec![ok(r#"{"height":1234}"#), ok(r#"{"total":"1000000"}"#)]).await;
        let c = client(&endpoint).unwrap();
        assert_eq!(c.latest_height().await.unwrap(), 1234);
        assert_eq!(c.supply(1234).await.unwrap(), 1_000_000);
    }
}
