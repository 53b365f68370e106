use std::time::Duration;

use thiserror::Error;

use crate::audit::RunContext;
use crate::negotiation::tokens::{estimate_tokens, truncate_to_tokens};
use crate::negotiation::{NegotiationSession, SessionError, SessionRequest, SessionTranscript};

/// Headroom kept below the token limit when an oversized message is cut.
const TRUNCATION_HEADROOM: usize = 1_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base_delay: Duration::from_secs(1) }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 1_u32 << attempt.min(16);
        self.base_delay.saturating_mul(multiplier)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunnerError {
    #[error("rate limited on all {attempts} attempt(s): {last}")]
    RateLimited { attempts: u32, last: String },
    #[error(transparent)]
    Session(SessionError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOutcome {
    pub transcript: SessionTranscript,
    pub attempts: u32,
    pub delays: Vec<Duration>,
    pub truncated: bool,
}

/// Wraps one negotiation session call with token-budget truncation and
/// exponential backoff on rate limiting. Every other failure propagates.
#[derive(Clone, Debug)]
pub struct ResilientRunner {
    policy: RetryPolicy,
    token_limit: usize,
    context: RunContext,
}

impl ResilientRunner {
    pub fn new(policy: RetryPolicy, token_limit: usize, context: RunContext) -> Self {
        Self { policy, token_limit, context }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Returns the message unchanged when it fits the token limit, otherwise
    /// its prefix of `token_limit - 1000` tokens.
    pub fn fit_to_budget(&self, message: &str) -> (String, bool) {
        if estimate_tokens(message) <= self.token_limit {
            return (message.to_string(), false);
        }
        let budget = self.token_limit.saturating_sub(TRUNCATION_HEADROOM);
        (truncate_to_tokens(message, budget).to_string(), true)
    }

    pub async fn run(
        &self,
        session: &dyn NegotiationSession,
        mut request: SessionRequest,
    ) -> Result<RunOutcome, RunnerError> {
        let (message, truncated) = self.fit_to_budget(&request.message);
        if truncated {
            tracing::warn!(
                event_name = "runner.message_truncated",
                run_id = %self.context.run_id,
                phase = %request.phase,
                token_limit = self.token_limit,
                original_tokens = estimate_tokens(&request.message),
                "message exceeds token limit; truncating"
            );
            request.message = message;
        }

        let attempts = self.policy.max_retries.max(1);
        let mut delays = Vec::new();

        for attempt in 0..attempts {
            match session.run(&request).await {
                Ok(transcript) => {
                    return Ok(RunOutcome {
                        transcript,
                        attempts: attempt + 1,
                        delays,
                        truncated,
                    });
                }
                Err(SessionError::RateLimited(reason)) => {
                    if attempt + 1 >= attempts {
                        tracing::error!(
                            event_name = "runner.retries_exhausted",
                            run_id = %self.context.run_id,
                            phase = %request.phase,
                            attempts,
                            error = %reason,
                            "rate limited on every attempt"
                        );
                        return Err(RunnerError::RateLimited { attempts, last: reason });
                    }

                    let delay = self.policy.delay_for(attempt);
                    tracing::warn!(
                        event_name = "runner.rate_limited",
                        run_id = %self.context.run_id,
                        phase = %request.phase,
                        attempt = attempt + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "rate limit exceeded; backing off"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    delays.push(delay);
                }
                Err(error) => return Err(RunnerError::Session(error)),
            }
        }

        Err(RunnerError::RateLimited { attempts, last: "no attempt was made".to_string() })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::{ResilientRunner, RetryPolicy, RunnerError};
    use crate::audit::RunContext;
    use crate::negotiation::{
        NegotiationSession, SessionError, SessionRequest, SessionTranscript,
    };

    #[derive(Default)]
    struct ScriptedSession {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        results: VecDeque<Result<SessionTranscript, SessionError>>,
        seen_messages: Vec<String>,
    }

    impl ScriptedSession {
        fn with_script(results: Vec<Result<SessionTranscript, SessionError>>) -> Self {
            Self {
                state: Mutex::new(ScriptedState { results: results.into(), seen_messages: Vec::new() }),
            }
        }

        async fn calls(&self) -> usize {
            self.state.lock().await.seen_messages.len()
        }

        async fn last_message(&self) -> Option<String> {
            self.state.lock().await.seen_messages.last().cloned()
        }
    }

    #[async_trait]
    impl NegotiationSession for ScriptedSession {
        async fn run(&self, request: &SessionRequest) -> Result<SessionTranscript, SessionError> {
            let mut state = self.state.lock().await;
            state.seen_messages.push(request.message.clone());
            state.results.pop_front().unwrap_or_else(|| Ok(SessionTranscript::default()))
        }
    }

    fn request(message: &str) -> SessionRequest {
        SessionRequest { phase: "phase1".into(), participants: Vec::new(), message: message.into() }
    }

    fn rate_limited() -> Result<SessionTranscript, SessionError> {
        Err(SessionError::RateLimited("429".into()))
    }

    fn runner() -> ResilientRunner {
        ResilientRunner::new(RetryPolicy::default(), 30_000, RunContext::new("t"))
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn two_rate_limits_then_success_backs_off_one_then_two_seconds() {
        let session = ScriptedSession::with_script(vec![
            rate_limited(),
            rate_limited(),
            Ok(SessionTranscript { messages: Vec::new(), stop_reason: Some("done".into()) }),
        ]);
        let started = tokio::time::Instant::now();

        let outcome = runner().run(&session, request("hello")).await.expect("third attempt succeeds");

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.delays, vec![Duration::from_secs(1), Duration::from_secs(2)]);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert_eq!(outcome.transcript.stop_reason.as_deref(), Some("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_raise_to_the_caller() {
        let session = ScriptedSession::with_script(vec![rate_limited(), rate_limited(), rate_limited()]);

        let error = runner().run(&session, request("hello")).await.expect_err("all attempts fail");

        assert_eq!(error, RunnerError::RateLimited { attempts: 3, last: "429".into() });
        assert_eq!(session.calls().await, 3);
    }

    #[tokio::test]
    async fn non_rate_limit_errors_are_not_retried() {
        let session =
            ScriptedSession::with_script(vec![Err(SessionError::Transport("reset".into()))]);

        let error = runner().run(&session, request("hello")).await.expect_err("transport error");

        assert_eq!(error, RunnerError::Session(SessionError::Transport("reset".into())));
        assert_eq!(session.calls().await, 1);
    }

    #[tokio::test]
    async fn oversized_message_is_truncated_before_sending() {
        let session = ScriptedSession::default();
        let runner = ResilientRunner::new(RetryPolicy::default(), 2_000, RunContext::new("t"));
        let message = "x".repeat(9_000);

        let outcome = runner.run(&session, request(&message)).await.expect("runs");

        assert!(outcome.truncated);
        assert_eq!(session.last_message().await.map(|sent| sent.len()), Some(4_000));
    }

    #[test]
    fn message_within_budget_is_untouched() {
        let (message, truncated) = runner().fit_to_budget("short message");
        assert_eq!((message.as_str(), truncated), ("short message", false));
    }
}
