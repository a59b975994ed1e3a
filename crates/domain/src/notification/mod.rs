//! Email rendering, the transport seam and outbox delivery bookkeeping.

mod templates;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use thiserror::Error;
use tracing::warn;

use crate::model::OutboundEmail;
use crate::storage::OutboxStore;

pub use templates::*;

/// Attempts after which a queued email is abandoned.
pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 8;

const BASE_RETRY_SECS: i64 = 60;
const MAX_RETRY_SECS: i64 = 6 * 60 * 60;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotificationError {
    #[error("mail transport failed: {0}")]
    Transport(String),
    #[error("mail transport timed out after {0}s")]
    Timeout(u64),
    #[error("mail provider rejected the message ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("payment code unavailable: {0}")]
    PaymentCode(String),
}

/// Outgoing mail transport. Implementations must enforce their own timeout.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<(), NotificationError>;
}

/// Inputs for a payment QR code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub payee_address: String,
    pub payee_name: String,
    pub amount: u64,
    pub note: String,
}

/// External code-generation service producing the payment QR.
pub trait PaymentCodes: Send + Sync {
    fn payment_code(&self, request: &PaymentRequest) -> Result<PaymentCode, NotificationError>;
}

/// Exponential backoff for the `attempts`-th failed delivery, capped at 6h.
pub fn retry_delay(attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(16);
    let secs = BASE_RETRY_SECS.saturating_mul(1i64 << exponent);
    Duration::seconds(secs.min(MAX_RETRY_SECS))
}

/// How long a freshly queued row stays hidden from the outbox worker while
/// the request that queued it makes its inline attempt.
pub fn inline_delivery_lease() -> Duration {
    retry_delay(1)
}

/// Sends one queued email and records the outcome on its outbox row.
///
/// Bookkeeping failures are logged and swallowed; the return value only
/// reflects whether the transport accepted the message.
pub async fn deliver_queued<S>(
    store: &S,
    notifier: &dyn Notifier,
    outbox_id: i64,
    email: &OutboundEmail,
    previous_attempts: u32,
    max_attempts: u32,
    now: DateTime<Utc>,
) -> Result<(), NotificationError>
where
    S: OutboxStore + ?Sized,
{
    let kind = email.kind.as_ref().to_owned();
    match notifier.send(email).await {
        Ok(()) => {
            counter!("notifications_total", "kind" => kind, "result" => "delivered").increment(1);
            if let Err(err) = store.mark_delivered(outbox_id, now).await {
                warn!(outbox_id, ?err, "email delivered but outbox row not updated");
            }
            Ok(())
        }
        Err(err) => {
            let attempts = previous_attempts.saturating_add(1);
            let retry_at = if attempts >= max_attempts {
                None
            } else {
                Some(now + retry_delay(attempts))
            };
            let result = if retry_at.is_some() { "retry" } else { "abandoned" };
            counter!("notifications_total", "kind" => kind, "result" => result).increment(1);
            warn!(
                outbox_id,
                attempts,
                recipient = %email.recipient,
                error = %err,
                "email delivery failed"
            );
            if let Err(store_err) = store
                .record_failure(outbox_id, &err.to_string(), retry_at)
                .await
            {
                warn!(outbox_id, ?store_err, "failed to record delivery failure");
            }
            Err(err)
        }
    }
}
