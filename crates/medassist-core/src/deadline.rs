//! Per-call deadlines and caller cancellation for external I/O.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::errors::AgentError;

/// Runs `fut` until it completes, `timeout` elapses or `cancel` fires. Dropping
/// the future aborts the in-flight request.
pub async fn bounded<T, F>(
    operation: &str,
    timeout: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<T, AgentError>
where
    F: Future<Output = Result<T, AgentError>>,
{
    if cancel.is_cancelled() {
        return Err(AgentError::Cancelled);
    }

    tokio::select! {
        _ = cancel.cancelled() => {
            log::warn!("{} cancelled by caller", operation);
            Err(AgentError::Cancelled)
        }
        outcome = tokio::time::timeout(timeout, fut) => match outcome {
            Ok(result) => result,
            Err(_) => {
                log::error!("{} timed out after {:?}", operation, timeout);
                Err(AgentError::ProviderError(format!(
                    "{} timed out after {}s",
                    operation,
                    timeout.as_secs_f32()
                )))
            }
        },
    }
}

/// Sleeps for `pause` unless the caller cancels first.
pub async fn pause(pause: Duration, cancel: &CancellationToken) -> Result<(), AgentError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(AgentError::Cancelled),
        _ = tokio::time::sleep(pause) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_within_deadline() {
        let token = CancellationToken::new();
        let value = bounded("noop", Duration::from_secs(1), &token, async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_timeout_is_provider_error() {
        let token = CancellationToken::new();
        let result: Result<(), _> = bounded("slow call", Duration::from_millis(20), &token, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        match result {
            Err(AgentError::ProviderError(msg)) => assert!(msg.contains("slow call timed out")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation_aborts_call() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let result: Result<(), _> = bounded("long call", Duration::from_secs(10), &token, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(AgentError::Cancelled)));
    }

    #[tokio::test]
    async fn test_already_cancelled_token_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        let result = bounded("any", Duration::from_secs(1), &token, async { Ok(()) }).await;
        assert!(matches!(result, Err(AgentError::Cancelled)));
        assert!(matches!(pause(Duration::from_secs(1), &token).await, Err(AgentError::Cancelled)));
    }
}
