use chrono::{DateTime, Duration, Utc};
use hex::encode as hex_encode;
use sha3::{Digest, Sha3_256};
use thiserror::Error;

use super::{ArticleId, UserId};

/// Number of random bytes behind every payment token.
pub const TOKEN_BYTES: usize = 32;

/// Hex length of a rendered token value.
pub const TOKEN_LENGTH: usize = TOKEN_BYTES * 2;

/// Payment tokens stay redeemable for this long after issuance.
pub fn payment_token_ttl() -> Duration {
    Duration::hours(48)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenFormatError {
    #[error("token must be exactly {TOKEN_LENGTH} hex characters")]
    WrongLength,
    #[error("token contains non-hex characters")]
    NonHex,
}

/// Raw token value as it appears in the emailed link. Never persisted.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TokenValue(String);

impl TokenValue {
    /// Draws a fresh value from the operating system CSPRNG.
    pub fn generate() -> Result<Self, getrandom::Error> {
        let mut bytes = [0u8; TOKEN_BYTES];
        getrandom::fill(&mut bytes)?;
        Ok(Self(hex_encode(bytes)))
    }

    pub fn parse(raw: &str) -> Result<Self, TokenFormatError> {
        let raw = raw.trim();
        if raw.len() != TOKEN_LENGTH {
            return Err(TokenFormatError::WrongLength);
        }
        if !raw.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TokenFormatError::NonHex);
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn fingerprint(&self) -> TokenFingerprint {
        let mut hasher = Sha3_256::new();
        hasher.update(self.0.as_bytes());
        TokenFingerprint(hex_encode(hasher.finalize()))
    }
}

impl std::fmt::Debug for TokenValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenValue(<redacted>)")
    }
}

/// SHA3-256 digest of a token value; the only form stored at rest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenFingerprint(String);

impl TokenFingerprint {
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPaymentToken {
    pub fingerprint: TokenFingerprint,
    pub article_id: ArticleId,
    pub user_id: UserId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewPaymentToken {
    /// Generates a token for `article_id` valid for `ttl` from `issued_at`.
    /// The raw value is returned alongside the record to be persisted.
    pub fn issue(
        article_id: ArticleId,
        user_id: UserId,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<(TokenValue, Self), getrandom::Error> {
        let value = TokenValue::generate()?;
        let record = Self {
            fingerprint: value.fingerprint(),
            article_id,
            user_id,
            issued_at,
            expires_at: issued_at + ttl,
        };
        Ok((value, record))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentTokenRecord {
    pub fingerprint: TokenFingerprint,
    pub article_id: ArticleId,
    pub user_id: UserId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
}

/// Why a stored token cannot be redeemed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    #[error("payment token has already been used")]
    AlreadyUsed,
    #[error("payment token has expired")]
    Expired,
}

impl PaymentTokenRecord {
    /// `used` wins over expiry when both apply.
    pub fn check_redeemable(&self, now: DateTime<Utc>) -> Result<(), TokenRejection> {
        if self.used {
            return Err(TokenRejection::AlreadyUsed);
        }
        if now >= self.expires_at {
            return Err(TokenRejection::Expired);
        }
        Ok(())
    }
}
