//! Deadlines for connection I/O and classification of the errors they raise.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{ProtocolError, Result};

/// Read deadline applied to each accepted connection
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long shutdown waits for in-flight connections
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Await `fut`, failing with [`ProtocolError::Timeout`] once `deadline` passes
pub async fn with_deadline<F, T>(deadline: Instant, fut: F) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout_at(deadline, fut)
        .await
        .map_err(|_| ProtocolError::Timeout)
}

/// Await `fut` for at most `duration`, flattening its own error
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| ProtocolError::Timeout)?
}

/// Tells timeouts apart from other transport failures
pub trait ErrorClassifier: Send + Sync {
    fn is_timeout(&self, err: &ProtocolError) -> bool;
}

/// Classifier for TCP connections
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnErrorClassifier;

impl ErrorClassifier for ConnErrorClassifier {
    fn is_timeout(&self, err: &ProtocolError) -> bool {
        match err {
            ProtocolError::Timeout => true,
            ProtocolError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifier() {
        let classifier = ConnErrorClassifier;
        assert!(classifier.is_timeout(&ProtocolError::Timeout));
        assert!(classifier.is_timeout(&ProtocolError::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            "deadline"
        ))));
        assert!(!classifier.is_timeout(&ProtocolError::Io(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "reset"
        ))));
        assert!(!classifier.is_timeout(&ProtocolError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_with_deadline_elapses() {
        let deadline = Instant::now() + Duration::from_millis(10);
        let result = with_deadline(deadline, tokio::time::sleep(Duration::from_secs(5))).await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));

        let deadline = Instant::now() + Duration::from_secs(5);
        assert_eq!(with_deadline(deadline, async { 7 }).await.ok(), Some(7));
    }

    #[tokio::test]
    async fn test_with_timeout_error_keeps_inner_error() {
        let result: Result<()> = with_timeout_error(
            async { Err(ProtocolError::ConnectionClosed) },
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }
}
