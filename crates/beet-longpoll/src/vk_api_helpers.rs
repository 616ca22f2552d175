use std::time::Duration;

/// VK error codes worth another attempt: unknown error, too many requests,
/// internal server error.
const RETRYABLE_VK_ERROR_CODES: [i64; 3] = [1, 6, 10];
const VK_TOO_MANY_REQUESTS: i64 = 6;
/// VK accepts three calls per second per token.
const RATE_LIMIT_PAUSE: Duration = Duration::from_millis(350);
/// Server-requested pauses are honoured up to this bound.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);
const MAX_BACKOFF_DOUBLINGS: u32 = 6;

/// What made the last attempt fail, as far as pacing the next one goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryCause {
    Transport,
    HttpStatus { retry_after: Option<Duration> },
    ApiError { code: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
}

impl RetryPolicy {
    pub(crate) fn new(max_attempts: usize, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(base_delay_ms.max(1)),
        }
    }

    /// `attempt` is 1-based and counts the call that just failed.
    pub(crate) fn next_pause(&self, attempt: usize, cause: RetryCause) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let retryable = match cause {
            RetryCause::Transport | RetryCause::HttpStatus { .. } => true,
            RetryCause::ApiError { code } => RETRYABLE_VK_ERROR_CODES.contains(&code),
        };
        if !retryable {
            return None;
        }
        let backoff = self.backoff(attempt);
        let pause = match cause {
            RetryCause::HttpStatus {
                retry_after: Some(requested),
            } => requested.min(MAX_RETRY_AFTER),
            RetryCause::ApiError {
                code: VK_TOO_MANY_REQUESTS,
            } => backoff.max(RATE_LIMIT_PAUSE),
            _ => backoff,
        };
        Some(pause)
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let doublings = (attempt.saturating_sub(1) as u32).min(MAX_BACKOFF_DOUBLINGS);
        self.base_delay.saturating_mul(1 << doublings)
    }
}

/// Only 429 and 5xx are transient on the method endpoint.
pub(crate) fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

pub(crate) fn is_transient_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

/// Delta-seconds form of `Retry-After`; the HTTP-date form is ignored.
pub(crate) fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let seconds = headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()?;
    Some(Duration::from_secs(seconds))
}

/// One-line excerpt of a response body for error messages (VK error pages are HTML).
pub(crate) fn body_excerpt(body: &str, max_chars: usize) -> String {
    let collapsed = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut excerpt = collapsed.chars().take(max_chars).collect::<String>();
    excerpt.push('…');
    excerpt
}

/// Long-poll servers come back without a scheme.
pub(crate) fn long_poll_url(server: &str) -> String {
    let server = server.trim();
    if server.contains("://") {
        server.to_string()
    } else {
        format!("https://{server}")
    }
}
