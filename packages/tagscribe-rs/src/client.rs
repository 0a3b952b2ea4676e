//! Retrying wrapper around a [`VisionModel`].
//!
//! Every attempt takes the next credential from the shared pool. Failures are
//! handled by kind:
//!
//! - rate limited: retry at once on the next credential and reset the backoff.
//!   Not counted against any budget. After a whole pool cycle of consecutive
//!   rate limits the client pauses for `rate_limit_cooldown`.
//! - server error: sleep the backoff delay (x1.5, capped), bounded by
//!   `max_server_retries`.
//! - client error or empty response: same backoff, bounded by
//!   `max_client_retries`.
//! - anything else: returned immediately.
//!
//! Sleeps and in-flight requests both yield to the cancellation signal.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use serde::Serialize;
use tagscribe_vision::{ModelError, ModelRequest, VisionModel};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cancel::CancelSignal;
use crate::credentials::CredentialPool;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_client_retries: u32,
    pub max_server_retries: u32,
    pub rate_limit_cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            multiplier: 1.5,
            max_delay: Duration::from_secs(60),
            max_client_retries: 5,
            max_server_retries: 10,
            rate_limit_cooldown: Duration::from_secs(1),
        }
    }
}

/// Largest growth factor applied between two delays.
const MAX_MULTIPLIER: f64 = 10.0;
/// Upper bound for any single delay, whatever the policy asks for.
const MAX_DELAY_CEILING: Duration = Duration::from_secs(24 * 60 * 60);

/// Exponential delay sequence: `initial, initial*m, initial*m^2, ...` capped
/// at `max`. Never runs out; `reset` starts over from `initial`.
#[derive(Debug)]
pub struct Backoff {
    builder: ExponentialBuilder,
    delays: ExponentialBackoff,
    max: Duration,
}

impl Backoff {
    pub fn new(policy: &RetryPolicy) -> Self {
        let max = policy.max_delay.min(MAX_DELAY_CEILING);
        let factor = if policy.multiplier.is_finite() {
            policy.multiplier.clamp(1.0, MAX_MULTIPLIER)
        } else {
            1.0
        };
        let builder = ExponentialBuilder::default()
            .with_min_delay(policy.initial_delay.min(max))
            .with_max_delay(max)
            .with_factor(factor as f32)
            .with_max_times(usize::MAX);
        Self {
            delays: builder.clone().build(),
            builder,
            max,
        }
    }

    /// Returns the delay to wait now and grows the next one.
    pub fn next_delay(&mut self) -> Duration {
        self.delays.next().unwrap_or(self.max).min(self.max)
    }

    pub fn reset(&mut self) {
        self.delays = self.builder.clone().build();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBudget {
    Client,
    Server,
}

impl fmt::Display for RetryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
        }
    }
}

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("credential pool is empty")]
    NoCredentials,
    #[error("{budget} retry budget exhausted after {attempts} attempts: {last}")]
    ExhaustedRetries {
        budget: RetryBudget,
        attempts: u32,
        #[source]
        last: ModelError,
    },
    #[error("non-retryable model failure: {0}")]
    Unknown(#[source] ModelError),
    #[error("model call cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryReason {
    RateLimited,
    ServerError,
    ClientError,
    EmptyResponse,
}

/// One failed attempt that was retried.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryEvent {
    pub attempt: u32,
    pub credential_index: usize,
    pub reason: RetryReason,
    pub delay: Duration,
}

#[derive(Debug, Clone)]
pub struct Invocation {
    pub text: String,
    pub attempts: u32,
    pub retries: Vec<RetryEvent>,
}

pub struct ResilientModelClient {
    model: Arc<dyn VisionModel>,
    pool: Arc<CredentialPool>,
    policy: RetryPolicy,
}

impl ResilientModelClient {
    pub fn new(model: Arc<dyn VisionModel>, pool: Arc<CredentialPool>, policy: RetryPolicy) -> Self {
        Self { model, pool, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Calls the model until it yields non-blank text or the retry policy gives up.
    pub async fn invoke(&self, request: &ModelRequest, cancel: &CancelSignal) -> Result<String, InvokeError> {
        self.invoke_traced(request, cancel).await.map(|inv| inv.text)
    }

    /// Like [`invoke`](Self::invoke) but also reports every retried attempt.
    pub async fn invoke_traced(
        &self,
        request: &ModelRequest,
        cancel: &CancelSignal,
    ) -> Result<Invocation, InvokeError> {
        let mut backoff = Backoff::new(&self.policy);
        let mut retries = Vec::new();
        let mut attempts = 0u32;
        let mut client_failures = 0u32;
        let mut server_failures = 0u32;
        let mut consecutive_rate_limits = 0usize;

        loop {
            if cancel.is_cancelled() {
                return Err(InvokeError::Cancelled);
            }
            let credential = self.pool.acquire_next().ok_or(InvokeError::NoCredentials)?;
            attempts += 1;
            debug!(attempt = attempts, credential = credential.index, model = %request.model_id, "calling model");

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(InvokeError::Cancelled),
                r = self.model.generate(&credential.key, request) => r,
            };

            let err = match outcome {
                Ok(text) if !text.trim().is_empty() => {
                    return Ok(Invocation {
                        text,
                        attempts,
                        retries,
                    })
                }
                Ok(_) => ModelError::EmptyResponse,
                Err(e) => e,
            };

            let (reason, delay) = match err {
                ModelError::RateLimited { .. } => {
                    backoff.reset();
                    consecutive_rate_limits += 1;
                    let delay = if consecutive_rate_limits % self.pool.len().max(1) == 0 {
                        self.policy.rate_limit_cooldown
                    } else {
                        Duration::ZERO
                    };
                    (RetryReason::RateLimited, delay)
                }
                ModelError::Server { .. } => {
                    consecutive_rate_limits = 0;
                    server_failures += 1;
                    if server_failures > self.policy.max_server_retries {
                        return Err(InvokeError::ExhaustedRetries {
                            budget: RetryBudget::Server,
                            attempts,
                            last: err,
                        });
                    }
                    (RetryReason::ServerError, backoff.next_delay())
                }
                ModelError::Client { .. } | ModelError::EmptyResponse => {
                    consecutive_rate_limits = 0;
                    client_failures += 1;
                    if client_failures > self.policy.max_client_retries {
                        return Err(InvokeError::ExhaustedRetries {
                            budget: RetryBudget::Client,
                            attempts,
                            last: err,
                        });
                    }
                    let reason = if matches!(err, ModelError::EmptyResponse) {
                        RetryReason::EmptyResponse
                    } else {
                        RetryReason::ClientError
                    };
                    (reason, backoff.next_delay())
                }
                ModelError::Unknown(_) => return Err(InvokeError::Unknown(err)),
            };

            warn!(
                attempt = attempts,
                credential = credential.index,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "model call failed; retrying"
            );
            retries.push(RetryEvent {
                attempt: attempts,
                credential_index: credential.index,
                reason,
                delay,
            });
            pause(delay, cancel).await?;
        }
    }
}

async fn pause(delay: Duration, cancel: &CancelSignal) -> Result<(), InvokeError> {
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(InvokeError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tagscribe_vision::{EncodedImage, GenerationConfig};
    use tokio::time::Instant;

    /// Replays a fixed script of outcomes, then repeats `fallback`.
    struct ScriptedModel {
        script: Mutex<VecDeque<Result<String, ModelError>>>,
        fallback: Result<String, ModelError>,
        seen_keys: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(script: Vec<Result<String, ModelError>>, fallback: Result<String, ModelError>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                fallback,
                seen_keys: Mutex::new(Vec::new()),
            })
        }

        fn seen_keys(&self) -> Vec<String> {
            self.seen_keys.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl VisionModel for ScriptedModel {
        async fn generate(&self, credential: &str, _request: &ModelRequest) -> Result<String, ModelError> {
            self.seen_keys.lock().unwrap().push(credential.to_string());
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        }
    }

    fn server() -> ModelError {
        ModelError::Server {
            status: 503,
            message: "unavailable".into(),
        }
    }

    fn client_err() -> ModelError {
        ModelError::Client {
            status: 400,
            message: "bad request".into(),
        }
    }

    fn rate_limited() -> ModelError {
        ModelError::RateLimited {
            status: 429,
            message: "quota".into(),
        }
    }

    fn request() -> ModelRequest {
        ModelRequest {
            model_id: "test-model".into(),
            image: EncodedImage {
                bytes: vec![1, 2, 3],
                mime_type: "image/jpeg",
            },
            prompt: "transcribe".into(),
            config: GenerationConfig::default(),
        }
    }

    fn client(model: Arc<ScriptedModel>, keys: &[&str], policy: RetryPolicy) -> ResilientModelClient {
        ResilientModelClient::new(model, Arc::new(CredentialPool::new(keys.iter().copied())), policy)
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(20),
            ..Default::default()
        };
        let mut b = Backoff::new(&policy);
        let delays: Vec<u64> = (0..5).map(|_| b.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![20_000, 30_000, 45_000, 60_000, 60_000]);
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_secs(20));
    }

    #[test]
    fn test_backoff_never_runs_out() {
        let mut b = Backoff::new(&RetryPolicy::default());
        let last = (0..100).map(|_| b.next_delay()).last();
        assert_eq!(last, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_backoff_survives_extreme_policies() {
        let policy = RetryPolicy {
            multiplier: 1e30,
            ..Default::default()
        };
        let mut b = Backoff::new(&policy);
        let delays: Vec<u64> = (0..4).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![2, 20, 60, 60]);

        let policy = RetryPolicy {
            multiplier: 1e30,
            max_delay: Duration::MAX,
            ..Default::default()
        };
        let mut b = Backoff::new(&policy);
        for _ in 0..200 {
            assert!(b.next_delay() <= MAX_DELAY_CEILING);
        }

        let policy = RetryPolicy {
            multiplier: f64::NAN,
            ..Default::default()
        };
        let mut b = Backoff::new(&policy);
        assert_eq!(b.next_delay(), b.next_delay());
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_back_off_then_succeed() {
        let model = ScriptedModel::new(
            vec![Err(server()), Err(server()), Err(server()), Ok("page text".into())],
            Err(server()),
        );
        let c = client(model, &["a", "b"], RetryPolicy::default());

        let start = Instant::now();
        let inv = c.invoke_traced(&request(), &CancelSignal::never()).await.unwrap();

        assert_eq!(inv.text, "page text");
        assert_eq!(inv.attempts, 4);
        let delays: Vec<Duration> = inv.retries.iter().map(|r| r.delay).collect();
        assert_eq!(
            delays,
            vec![Duration::from_secs(2), Duration::from_secs(3), Duration::from_millis(4500)]
        );
        assert!(inv.retries.iter().all(|r| r.reason == RetryReason::ServerError));
        assert_eq!(start.elapsed(), Duration::from_millis(9500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limits_rotate_without_spending_budget() {
        let model = ScriptedModel::new(
            vec![
                Err(rate_limited()),
                Err(rate_limited()),
                Err(client_err()),
                Err(client_err()),
                Err(rate_limited()),
                Ok("done".into()),
            ],
            Err(client_err()),
        );
        let policy = RetryPolicy {
            max_client_retries: 2,
            ..Default::default()
        };
        let c = client(model.clone(), &["a", "b", "c"], policy);

        let inv = c.invoke_traced(&request(), &CancelSignal::never()).await.unwrap();
        assert_eq!(inv.text, "done");
        assert_eq!(model.seen_keys(), vec!["a", "b", "c", "a", "b", "c"]);

        let rate_limited: Vec<&RetryEvent> =
            inv.retries.iter().filter(|r| r.reason == RetryReason::RateLimited).collect();
        assert_eq!(rate_limited.len(), 3);
        assert!(rate_limited.iter().all(|r| r.delay.is_zero()));
        // The backoff only grows across the client errors.
        let client_delays: Vec<Duration> = inv
            .retries
            .iter()
            .filter(|r| r.reason == RetryReason::ClientError)
            .map(|r| r.delay)
            .collect();
        assert_eq!(client_delays, vec![Duration::from_secs(2), Duration::from_secs(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cycle_of_rate_limits_cools_down() {
        let model = ScriptedModel::new(vec![Err(rate_limited()), Err(rate_limited())], Ok("ok".into()));
        let c = client(model, &["a", "b"], RetryPolicy::default());

        let start = Instant::now();
        let inv = c.invoke_traced(&request(), &CancelSignal::never()).await.unwrap();
        assert_eq!(inv.text, "ok");
        assert_eq!(inv.retries[0].delay, Duration::ZERO);
        assert_eq!(inv.retries[1].delay, Duration::from_secs(1));
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_exhaust_budget() {
        let model = ScriptedModel::new(vec![], Err(client_err()));
        let c = client(model, &["a"], RetryPolicy::default());

        let err = c.invoke(&request(), &CancelSignal::never()).await.unwrap_err();
        match err {
            InvokeError::ExhaustedRetries {
                budget,
                attempts,
                last,
            } => {
                assert_eq!(budget, RetryBudget::Client);
                assert_eq!(attempts, 6);
                assert!(matches!(last, ModelError::Client { status: 400, .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_are_bounded() {
        let model = ScriptedModel::new(vec![], Err(server()));
        let policy = RetryPolicy {
            max_server_retries: 2,
            ..Default::default()
        };
        let c = client(model, &["a"], policy);

        let err = c.invoke(&request(), &CancelSignal::never()).await.unwrap_err();
        assert!(matches!(
            err,
            InvokeError::ExhaustedRetries {
                budget: RetryBudget::Server,
                attempts: 3,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_response_is_retried() {
        let model = ScriptedModel::new(vec![Ok("  \n ".into())], Ok("real answer".into()));
        let c = client(model, &["a"], RetryPolicy::default());

        let inv = c.invoke_traced(&request(), &CancelSignal::never()).await.unwrap();
        assert_eq!(inv.text, "real answer");
        assert_eq!(inv.retries.len(), 1);
        assert_eq!(inv.retries[0].reason, RetryReason::EmptyResponse);
    }

    #[tokio::test]
    async fn test_unknown_error_is_not_retried() {
        let model = ScriptedModel::new(vec![Err(ModelError::Unknown("boom".into()))], Ok("never".into()));
        let c = client(model.clone(), &["a"], RetryPolicy::default());

        let err = c.invoke(&request(), &CancelSignal::never()).await.unwrap_err();
        assert!(matches!(err, InvokeError::Unknown(ModelError::Unknown(_))));
        assert_eq!(model.seen_keys().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_pool() {
        let model = ScriptedModel::new(vec![], Ok("x".into()));
        let c = client(model, &[], RetryPolicy::default());
        let err = c.invoke(&request(), &CancelSignal::never()).await.unwrap_err();
        assert!(matches!(err, InvokeError::NoCredentials));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff() {
        let model = ScriptedModel::new(vec![], Err(server()));
        let c = client(model, &["a"], RetryPolicy::default());
        let (handle, signal) = cancel_pair();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            handle.cancel();
        });

        let start = Instant::now();
        let err = c.invoke(&request(), &signal).await.unwrap_err();
        assert!(matches!(err, InvokeError::Cancelled));
        // Woken mid-way through the first 2s backoff.
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }
}
