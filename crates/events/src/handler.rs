use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Outcome of a single handler invocation.
pub type HandlerResult = Result<(), HandlerError>;

/// Why a handler invocation did not succeed.
///
/// The dispatcher only distinguishes success from failure; the message is
/// stored on the event as `error_message`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("handler timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),
}

impl HandlerError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(format!("{err:#}"))
    }
}

/// Side-effect handler for one or more event types.
///
/// The dispatcher delivers **at least once**: a handler may see the same
/// event again after a failure, a timeout or a reclaim. Externally visible
/// effects must therefore be idempotent.
///
/// Return `Err` only when the primary effect did not happen. Best-effort
/// follow-ups (push delivery, cache warmups) should log their own failures
/// instead of failing the event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event_type: &str, payload: &JsonValue) -> HandlerResult;
}

/// Adapter for synchronous closures (tests, trivial handlers).
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&str, &JsonValue) -> HandlerResult + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&str, &JsonValue) -> HandlerResult + Send + Sync + 'static,
{
    async fn handle(&self, event_type: &str, payload: &JsonValue) -> HandlerResult {
        (self.f)(event_type, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fn_handler_forwards_type_and_payload() {
        let handler = FnHandler::new(|event_type, payload| {
            if event_type == "Payment.Succeeded" && payload["amount"] == 100 {
                Ok(())
            } else {
                Err(HandlerError::failed("unexpected input"))
            }
        });

        assert!(handler.handle("Payment.Succeeded", &json!({"amount": 100})).await.is_ok());
        assert_eq!(
            handler.handle("Payment.Overdue", &json!({})).await,
            Err(HandlerError::failed("unexpected input"))
        );
    }

    #[test]
    fn anyhow_errors_keep_their_context_chain() {
        let err = anyhow::anyhow!("connection refused").context("sending lease email");
        let handler_err = HandlerError::from(err);
        assert_eq!(
            handler_err.to_string(),
            "sending lease email: connection refused"
        );
    }

    #[test]
    fn timeout_message_mentions_the_budget() {
        let err = HandlerError::TimedOut(Duration::from_secs(2));
        assert_eq!(err.to_string(), "handler timed out after 2000ms");
    }
}
