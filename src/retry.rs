//! Retry decisions
//!
//! When an attempt fails and a [`RequestRetrier`] is installed, the session
//! hands the retrier a [`RetryCompletion`]. The retrier may answer
//! immediately or later from any thread. Retrying after a delay never
//! blocks: the session schedules the new attempt on its runtime.

use std::fmt;
use std::time::Duration;

use http::Method;

use crate::request::Request;
use crate::session::Session;
use crate::Error;

/// Outcome of a retry decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    /// Whether to run the request again
    pub should_retry: bool,
    /// How long to wait before the next attempt
    pub delay: Duration,
}

impl RetryDecision {
    /// Finish with the error
    pub const fn do_not_retry() -> Self {
        Self {
            should_retry: false,
            delay: Duration::ZERO,
        }
    }

    /// Retry after `delay`
    pub const fn retry_after(delay: Duration) -> Self {
        Self {
            should_retry: true,
            delay,
        }
    }
}

type Continuation = Box<dyn FnOnce(RetryDecision) + Send>;

/// One-shot continuation carrying a retry decision back to the session.
///
/// Must be consumed exactly once. Dropping it without answering is treated
/// as [`RetryDecision::do_not_retry`] and logged.
#[must_use = "a retry completion must be answered, dropping it finishes the request"]
pub struct RetryCompletion {
    continuation: Option<Continuation>,
}

impl RetryCompletion {
    pub(crate) fn new(continuation: impl FnOnce(RetryDecision) + Send + 'static) -> Self {
        Self {
            continuation: Some(Box::new(continuation)),
        }
    }

    /// Answer with a decision
    pub fn complete(mut self, decision: RetryDecision) {
        if let Some(continuation) = self.continuation.take() {
            continuation(decision);
        }
    }

    /// Retry immediately
    pub fn retry(self) {
        self.complete(RetryDecision::retry_after(Duration::ZERO));
    }

    /// Retry after `delay`
    pub fn retry_after(self, delay: Duration) {
        self.complete(RetryDecision::retry_after(delay));
    }

    /// Finish with the error
    pub fn do_not_retry(self) {
        self.complete(RetryDecision::do_not_retry());
    }
}

impl fmt::Debug for RetryCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryCompletion")
            .field("answered", &self.continuation.is_none())
            .finish()
    }
}

impl Drop for RetryCompletion {
    fn drop(&mut self) {
        if let Some(continuation) = self.continuation.take() {
            tracing::warn!("retry completion dropped without a decision, not retrying");
            continuation(RetryDecision::do_not_retry());
        }
    }
}

/// Decides whether a failed request runs again
pub trait RequestRetrier: Send + Sync {
    /// Called once per failed attempt. `completion` must be answered.
    fn should(&self, session: &Session, request: &Request, error: &Error, completion: RetryCompletion);
}

impl<F> RequestRetrier for F
where
    F: Fn(&Session, &Request, &Error, RetryCompletion) + Send + Sync,
{
    fn should(&self, session: &Session, request: &Request, error: &Error, completion: RetryCompletion) {
        self(session, request, error, completion)
    }
}

/// Exponential backoff.
///
/// The delay for attempt `n` is `first × factor^n`, capped at `max`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Backoff {
    /// Delay before the first retry
    pub first: Duration,
    /// Upper bound for any delay
    pub max: Duration,
    /// Growth factor
    pub factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(500),
            max: Duration::from_secs(30),
            factor: 2.0,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt`, 0-indexed
    pub fn next(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exponent);
        if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Retries idempotent requests that failed with a transient error.
///
/// ```rust
/// use std::time::Duration;
/// use tether::{Backoff, RetryPolicy};
///
/// let policy = RetryPolicy::default().max_retries(3).backoff(Backoff {
///     first: Duration::from_secs(1),
///     max: Duration::from_secs(8),
///     factor: 2.0,
/// });
/// assert_eq!(policy.delay(2), Duration::from_secs(4));
/// ```
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Backoff,
    methods: Vec<Method>,
    status_codes: Vec<u16>,
    retry_timeouts: bool,
    retry_network_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Backoff::default(),
            methods: vec![
                Method::DELETE,
                Method::GET,
                Method::HEAD,
                Method::OPTIONS,
                Method::PUT,
                Method::TRACE,
            ],
            status_codes: vec![408, 500, 502, 503, 504],
            retry_timeouts: true,
            retry_network_errors: true,
        }
    }
}

impl RetryPolicy {
    /// Maximum number of retries per request
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay schedule
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Methods that may be retried
    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    /// Status codes, as reported by status validation, that may be retried
    pub fn status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.status_codes = codes.into_iter().collect();
        self
    }

    /// Whether timeouts are retried
    pub fn retry_timeouts(mut self, retry: bool) -> Self {
        self.retry_timeouts = retry;
        self
    }

    /// Whether network errors are retried
    pub fn retry_network_errors(mut self, retry: bool) -> Self {
        self.retry_network_errors = retry;
        self
    }

    /// Delay before retry number `attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.next(attempt)
    }

    /// Whether `error` on a request sent with `method` is worth another attempt
    pub fn is_retryable(&self, method: Option<&Method>, error: &Error) -> bool {
        if let Some(method) = method {
            if !self.methods.contains(method) {
                return false;
            }
        }
        if let Some(code) = error.response_code() {
            return self.status_codes.contains(&code);
        }
        match error {
            Error::Timeout => self.retry_timeouts,
            Error::Network { .. } | Error::Io(_) => self.retry_network_errors,
            _ => false,
        }
    }
}

impl RequestRetrier for RetryPolicy {
    fn should(&self, _session: &Session, request: &Request, error: &Error, completion: RetryCompletion) {
        let attempt = request.retry_count();
        let method = request.request().map(|r| r.method.clone());

        if attempt < self.max_retries && self.is_retryable(method.as_ref(), error) {
            let delay = self.delay(attempt);
            tracing::debug!(attempt, ?delay, %error, "retrying request");
            completion.retry_after(delay);
        } else {
            completion.do_not_retry();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResponseValidationFailureReason;
    use std::sync::{Arc, Mutex};

    #[test]
    fn backoff_grows_and_caps() {
        let backoff = Backoff {
            first: Duration::from_millis(100),
            max: Duration::from_secs(1),
            factor: 2.0,
        };
        assert_eq!(backoff.next(0), Duration::from_millis(100));
        assert_eq!(backoff.next(1), Duration::from_millis(200));
        assert_eq!(backoff.next(3), Duration::from_millis(800));
        assert_eq!(backoff.next(4), Duration::from_secs(1));
        assert_eq!(backoff.next(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn dropped_completion_does_not_retry() {
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let completion = RetryCompletion::new(move |decision| {
            *sink.lock().unwrap() = Some(decision);
        });
        drop(completion);
        assert_eq!(*seen.lock().unwrap(), Some(RetryDecision::do_not_retry()));
    }

    #[test]
    fn completion_runs_once() {
        let count = Arc::new(Mutex::new(0));
        let sink = count.clone();
        let completion = RetryCompletion::new(move |decision| {
            assert!(decision.should_retry);
            *sink.lock().unwrap() += 1;
        });
        completion.retry_after(Duration::from_secs(1));
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn policy_classification() {
        let policy = RetryPolicy::default();
        let server_error = Error::ResponseValidationFailed(
            ResponseValidationFailureReason::UnacceptableStatusCode { code: 503 },
        );
        let not_found = Error::ResponseValidationFailed(
            ResponseValidationFailureReason::UnacceptableStatusCode { code: 404 },
        );

        assert!(policy.is_retryable(Some(&Method::GET), &server_error));
        assert!(!policy.is_retryable(Some(&Method::POST), &server_error));
        assert!(!policy.is_retryable(Some(&Method::GET), &not_found));
        assert!(policy.is_retryable(None, &Error::Timeout));
        assert!(!policy.is_retryable(None, &Error::Cancelled));
        assert!(!policy.retry_timeouts(false).is_retryable(None, &Error::Timeout));
    }
}
