//! Bounded retry around model invocations.
//!
//! Transport errors, timeouts and unparseable responses are all the same
//! kind of failure: one spent attempt. Exhaustion returns `None` and the
//! caller substitutes its stage-specific fallback.

use crate::model::{ChatMessage, ChatModel};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Invoke the model up to `max_tries` times, returning the first response
/// the parser accepts.
pub async fn invoke_with_retry<T, P>(
    model: &Arc<dyn ChatModel>,
    stage: &str,
    messages: &[ChatMessage],
    max_tries: u32,
    timeout: Duration,
    mut parse: P,
) -> Option<T>
where
    P: FnMut(&str) -> Option<T>,
{
    for attempt in 1..=max_tries {
        match tokio::time::timeout(timeout, model.invoke(messages)).await {
            Ok(Ok(response)) => match parse(&response.content) {
                Some(value) => return Some(value),
                None => {
                    warn!(stage, attempt, max_tries, "response failed validation");
                }
            },
            Ok(Err(e)) => {
                warn!(stage, attempt, max_tries, error = %e, "model call failed");
            }
            Err(_) => {
                warn!(stage, attempt, max_tries, "model call timed out");
            }
        }
    }
    None
}

/// Single unvalidated call for free-text outputs. Errors and timeouts
/// yield `None`.
pub async fn invoke_once(
    model: &Arc<dyn ChatModel>,
    stage: &str,
    messages: &[ChatMessage],
    timeout: Duration,
) -> Option<String> {
    match tokio::time::timeout(timeout, model.invoke(messages)).await {
        Ok(Ok(response)) => Some(response.content),
        Ok(Err(e)) => {
            warn!(stage, error = %e, "model call failed");
            None
        }
        Err(_) => {
            warn!(stage, "model call timed out");
            None
        }
    }
}
