//! Top-level shape of a long-poll response: either a batch that advances the
//! stream position, or a numbered failure telling the cursor how to recover.

use anyhow::{bail, Context, Result};
use serde_json::Value;

/// Stream position too old; replace `ts` with the server value.
pub const FAILURE_TS_OUTDATED: u64 = 1;
/// Key expired; re-acquire the server key.
pub const FAILURE_KEY_EXPIRED: u64 = 2;
/// Key and position both lost; re-acquire and replay history.
pub const FAILURE_SESSION_LOST: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Batch { ts: u64, pts: Option<u64> },
    Failed { code: u64, ts: Option<u64> },
}

/// Classifies a raw long-poll body. Errors mean the body is not a usable
/// envelope at all and the request should be retried unchanged.
pub fn parse_poll_envelope(raw: &str) -> Result<PollOutcome> {
    let payload: Value =
        serde_json::from_str(raw).context("long-poll response is not valid json")?;
    if !payload.is_object() {
        bail!("long-poll response is not a json object");
    }
    let ts = payload.get("ts").and_then(value_as_u64);
    if let Some(failed) = payload.get("failed") {
        let Some(code) = value_as_u64(failed) else {
            bail!("long-poll failure code is not an integer: {failed}");
        };
        return Ok(PollOutcome::Failed { code, ts });
    }
    let Some(ts) = ts else {
        bail!("long-poll response carries neither ts nor failed");
    };
    let pts = payload.get("pts").and_then(value_as_u64);
    Ok(PollOutcome::Batch { ts, pts })
}

pub(crate) fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    }
}
