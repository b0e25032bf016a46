//! Messaging provider interface and the bounded-retry send helper.
//!
//! The engine never speaks a concrete provider protocol; it only requires
//! `send(from, to, text)`. Every provider call is wrapped in a timeout so one
//! unresponsive recipient cannot stall a batch, and transient failures get a
//! small, bounded number of retries before the recipient is marked failed.
//! Retrying never leaks outside this module: the dispatcher sees exactly one
//! success or one failure per recipient.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use megaphone_core::phone::E164;
use tracing::warn;

/// Result of a successful provider send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub delivery_id: String,
    pub provider_status: String,
}

/// Why a provider send failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Transport or carrier rejection for this recipient.
    Rejected { message: String },
    /// Transient transport failure worth retrying.
    Transient { message: String },
    /// The call exceeded the configured timeout.
    Timeout,
    /// Systemic provider outage; the whole broadcast should stop.
    Outage { message: String },
}

impl ProviderError {
    /// Whether another attempt within the same tick could succeed.
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout)
    }

    /// Whether this failure indicates the provider is down for everyone,
    /// not just this recipient.
    pub fn is_systemic(&self) -> bool {
        matches!(self, Self::Outage { .. })
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { message } => write!(f, "send rejected: {message}"),
            Self::Transient { message } => write!(f, "transient send failure: {message}"),
            Self::Timeout => write!(f, "send timed out"),
            Self::Outage { message } => write!(f, "provider outage: {message}"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Opaque SMS/voice provider collaborator.
#[async_trait]
pub trait MessagingProvider: Send + Sync {
    async fn send(
        &self,
        from: &E164,
        to: &E164,
        text: &str,
    ) -> Result<DeliveryReceipt, ProviderError>;
}

/// Retry/timeout policy for a single recipient's send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendPolicy {
    /// Total attempts, including the first (minimum 1).
    pub max_attempts: u32,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl Default for SendPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Send one message with bounded retries.
///
/// Retries only `retryable()` failures; rejections and outages return
/// immediately. The last error is returned once attempts are exhausted.
pub async fn send_with_retry(
    provider: &dyn MessagingProvider,
    from: &E164,
    to: &E164,
    text: &str,
    policy: SendPolicy,
) -> Result<DeliveryReceipt, ProviderError> {
    let attempts = policy.max_attempts.max(1);
    let mut last_error = ProviderError::Timeout;

    for attempt in 1..=attempts {
        let result = tokio::time::timeout(policy.timeout, provider.send(from, to, text)).await;

        let error = match result {
            Ok(Ok(receipt)) => return Ok(receipt),
            Ok(Err(e)) => e,
            Err(_) => ProviderError::Timeout,
        };

        if !error.retryable() || attempt == attempts {
            return Err(error);
        }

        warn!(%to, attempt, "retrying send after transient failure: {error}");
        last_error = error;
    }

    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn number(digits: &str) -> E164 {
        megaphone_core::phone::normalize_number(digits).unwrap()
    }

    /// Fails the first `failures` calls with a transient error, then succeeds.
    struct FlakyProvider {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl MessagingProvider for FlakyProvider {
        async fn send(
            &self,
            _from: &E164,
            _to: &E164,
            _text: &str,
        ) -> Result<DeliveryReceipt, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(ProviderError::Transient {
                    message: "connection reset".to_string(),
                })
            } else {
                Ok(DeliveryReceipt {
                    delivery_id: format!("msg_{call}"),
                    provider_status: "queued".to_string(),
                })
            }
        }
    }

    struct RejectingProvider {
        calls: AtomicU32,
    }

    #[async_trait]
    impl MessagingProvider for RejectingProvider {
        async fn send(
            &self,
            _from: &E164,
            _to: &E164,
            _text: &str,
        ) -> Result<DeliveryReceipt, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Rejected {
                message: "landline".to_string(),
            })
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl MessagingProvider for SlowProvider {
        async fn send(
            &self,
            _from: &E164,
            _to: &E164,
            _text: &str,
        ) -> Result<DeliveryReceipt, ProviderError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            unreachable!("timeout should fire first")
        }
    }

    fn policy(max_attempts: u32) -> SendPolicy {
        SendPolicy {
            max_attempts,
            timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let provider = FlakyProvider {
            failures: 1,
            calls: AtomicU32::new(0),
        };
        let receipt = send_with_retry(
            &provider,
            &number("6135550000"),
            &number("6135551111"),
            "hi",
            policy(2),
        )
        .await
        .unwrap();
        assert_eq!(receipt.delivery_id, "msg_1");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let provider = FlakyProvider {
            failures: 10,
            calls: AtomicU32::new(0),
        };
        let err = send_with_retry(
            &provider,
            &number("6135550000"),
            &number("6135551111"),
            "hi",
            policy(3),
        )
        .await
        .unwrap_err();
        assert!(err.retryable());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let provider = RejectingProvider {
            calls: AtomicU32::new(0),
        };
        let err = send_with_retry(
            &provider,
            &number("6135550000"),
            &number("6135551111"),
            "hi",
            policy(5),
        )
        .await
        .unwrap_err();
        assert_eq!(
            err,
            ProviderError::Rejected {
                message: "landline".to_string()
            }
        );
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_provider_times_out() {
        let err = send_with_retry(
            &SlowProvider,
            &number("6135550000"),
            &number("6135551111"),
            "hi",
            policy(1),
        )
        .await
        .unwrap_err();
        assert_eq!(err, ProviderError::Timeout);
    }

    #[test]
    fn test_outage_is_systemic_and_final() {
        let err = ProviderError::Outage {
            message: "503".to_string(),
        };
        assert!(err.is_systemic());
        assert!(!err.retryable());
    }
}
