//! Snapshot acquisition.
//!
//! A [`SnapshotSource`] yields one [`Snapshot`] per call. The [`SnapshotPoller`] is the
//! [`PollTask`] driven by the [`SamplingScheduler`](crate::scheduler::SamplingScheduler): it
//! fetches, applies successful snapshots to the shared [`SignalEngine`], and leaves the engine
//! untouched on any error.

use crate::{
    engine::SignalEngine,
    error::{ConfigError, FetchError},
    scheduler::PollTask,
    types::Snapshot,
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use reqwest::StatusCode;
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tracing::{debug, warn};
use url::Url;

/// Default per-request timeout of the [`HttpSnapshotSource`].
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    async fn fetch(&self) -> Result<Snapshot, FetchError>;
}

#[async_trait]
impl<S> SnapshotSource for Arc<S>
where
    S: SnapshotSource,
{
    async fn fetch(&self) -> Result<Snapshot, FetchError> {
        self.as_ref().fetch().await
    }
}

/// Fetches snapshots from a JSON HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    url: Url,
    timeout: Duration,
    bearer_token: Option<String>,
}

impl HttpSnapshotSource {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let url = Url::parse(url).map_err(|error| ConfigError::InvalidUrl(format!("{url}: {error}")))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(format!(
                "{url}: unsupported scheme {}",
                url.scheme()
            )));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            url,
            timeout,
            bearer_token: None,
        })
    }

    pub fn with_client(self, client: reqwest::Client) -> Self {
        Self { client, ..self }
    }

    pub fn with_bearer_token(self, token: impl Into<String>) -> Self {
        Self {
            bearer_token: Some(token.into()),
            ..self
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn map_send_error(&self, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout(self.timeout.as_millis() as u64)
        } else {
            FetchError::from(error)
        }
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self) -> Result<Snapshot, FetchError> {
        let mut request = self.client.get(self.url.clone()).timeout(self.timeout);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|error| self.map_send_error(error))?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(FetchError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|error| self.map_send_error(error))?;

        serde_json::from_slice::<Snapshot>(&body).map_err(|error| FetchError::Decode(error.to_string()))
    }
}

/// Invoked with the error whenever the source reports an authentication failure.
pub type AuthCallback = Arc<dyn Fn(FetchError) -> BoxFuture<'static, ()> + Send + Sync>;

/// Counters of a [`SnapshotPoller`], readable while polling is live.
#[derive(Debug, Default)]
pub struct PollStats {
    applied: AtomicU64,
    failed: AtomicU64,
    unauthorized: AtomicU64,
}

impl PollStats {
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn unauthorized(&self) -> u64 {
        self.unauthorized.load(Ordering::Relaxed)
    }
}

pub struct SnapshotPoller<S> {
    source: S,
    engine: Arc<Mutex<SignalEngine>>,
    on_unauthorized: Option<AuthCallback>,
    stats: Arc<PollStats>,
}

impl<S> std::fmt::Debug for SnapshotPoller<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotPoller")
            .field("on_unauthorized", &self.on_unauthorized.is_some())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<S> SnapshotPoller<S>
where
    S: SnapshotSource,
{
    pub fn new(source: S, engine: Arc<Mutex<SignalEngine>>) -> Self {
        Self {
            source,
            engine,
            on_unauthorized: None,
            stats: Arc::new(PollStats::default()),
        }
    }

    pub fn with_auth_callback(self, callback: AuthCallback) -> Self {
        Self {
            on_unauthorized: Some(callback),
            ..self
        }
    }

    pub fn engine(&self) -> &Arc<Mutex<SignalEngine>> {
        &self.engine
    }

    pub fn stats(&self) -> Arc<PollStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl<S> PollTask for SnapshotPoller<S>
where
    S: SnapshotSource,
{
    type Error = FetchError;

    async fn poll(&self) -> Result<(), Self::Error> {
        let snapshot = match self.source.fetch().await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);

                if error.is_auth() {
                    self.stats.unauthorized.fetch_add(1, Ordering::Relaxed);
                    match &self.on_unauthorized {
                        Some(callback) => callback(error.clone()).await,
                        None => warn!(%error, "snapshot source unauthorized, no auth callback configured"),
                    }
                }

                return Err(error);
            }
        };

        let report = self.engine.lock().apply_snapshot(&snapshot);
        self.stats.applied.fetch_add(1, Ordering::Relaxed);

        debug!(
            contracts = report.contracts,
            skipped = report.skipped,
            trend = %report.trend.classification,
            "snapshot polled"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::EngineConfig, engine::SignalView, types::Contract};
    use futures::FutureExt;
    use smol_str::SmolStr;
    use std::collections::VecDeque;
    use tokio_test::{assert_err, assert_ok};

    #[derive(Debug, Default)]
    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<Snapshot, FetchError>>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<Snapshot, FetchError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
            }
        }
    }

    #[async_trait]
    impl SnapshotSource for ScriptedSource {
        async fn fetch(&self) -> Result<Snapshot, FetchError> {
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Transport("script exhausted".to_string())))
        }
    }

    fn snapshot(ltp: f64) -> Snapshot {
        Snapshot {
            underlying: "BANKNIFTY".to_string(),
            spot_price: Some(51_000.0),
            futures: vec![Contract {
                instrument_token: Some(SmolStr::new("260105")),
                ltp: Some(ltp),
                volume: Some(1_000.0),
                ..Contract::default()
            }],
            ..Snapshot::default()
        }
    }

    fn engine() -> Arc<Mutex<SignalEngine>> {
        Arc::new(Mutex::new(SignalEngine::new(EngineConfig::default()).unwrap()))
    }

    #[tokio::test]
    async fn test_success_applies_snapshot() {
        let poller = SnapshotPoller::new(ScriptedSource::new(vec![Ok(snapshot(51_100.0))]), engine());

        assert_ok!(poller.poll().await);

        let view = poller.engine().lock().view();
        assert_eq!(view.underlying, "BANKNIFTY");
        assert_eq!(view.contracts.len(), 1);
        assert_eq!(poller.stats().applied(), 1);
    }

    #[tokio::test]
    async fn test_failure_leaves_engine_untouched() {
        let poller = SnapshotPoller::new(
            ScriptedSource::new(vec![
                Ok(snapshot(51_100.0)),
                Err(FetchError::Status(502)),
                Err(FetchError::Decode("expected value at line 1".to_string())),
            ]),
            engine(),
        );

        poller.poll().await.unwrap();
        let before: SignalView = poller.engine().lock().view();

        assert_eq!(poller.poll().await, Err(FetchError::Status(502)));
        assert!(poller.poll().await.unwrap_err().to_string().contains("decode"));

        assert_eq!(poller.engine().lock().view(), before);
        assert_eq!(poller.stats().failed(), 2);
        assert_eq!(poller.stats().unauthorized(), 0);
    }

    #[tokio::test]
    async fn test_unauthorized_invokes_auth_callback() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&calls);
        let callback: AuthCallback = Arc::new(move |error| {
            let recorded = Arc::clone(&recorded);
            async move { recorded.lock().push(error) }.boxed()
        });

        let poller = SnapshotPoller::new(
            ScriptedSource::new(vec![
                Err(FetchError::Unauthorized(401)),
                Err(FetchError::Timeout(5_000)),
            ]),
            engine(),
        )
        .with_auth_callback(callback);

        assert!(assert_err!(poller.poll().await).is_auth());
        assert!(assert_err!(poller.poll().await).is_transient());

        assert_eq!(*calls.lock(), vec![FetchError::Unauthorized(401)]);
        assert_eq!(poller.engine().lock().view(), SignalView::default());
    }

    #[test]
    fn test_http_source_validates_url() {
        struct TestCase {
            input: &'static str,
            valid: bool,
        }

        let cases = vec![
            // TC0: https endpoint
            TestCase {
                input: "https://chain.example.com/api/snapshot?underlying=NIFTY",
                valid: true,
            },
            // TC1: plain http endpoint
            TestCase {
                input: "http://127.0.0.1:8080/snapshot",
                valid: true,
            },
            // TC2: unsupported scheme
            TestCase {
                input: "ws://127.0.0.1:8080/snapshot",
                valid: false,
            },
            // TC3: not a url
            TestCase {
                input: "chain snapshot",
                valid: false,
            },
        ];

        for (index, test) in cases.into_iter().enumerate() {
            let actual = HttpSnapshotSource::new(test.input, DEFAULT_FETCH_TIMEOUT);
            assert_eq!(actual.is_ok(), test.valid, "TC{} failed", index);
            if let Err(error) = actual {
                assert!(matches!(error, ConfigError::InvalidUrl(_)), "TC{} failed", index);
            }
        }
    }
}
