//! One-time passcodes for email verification and password reset.
//!
//! Codes are six decimal digits, stored only as SHA-256 hashes, and checked
//! against `expires_at` at read time. A signup code also carries the password
//! hash it was requested with; verification applies that hash, so the code
//! can only activate the password chosen alongside it.

use async_trait::async_trait;
use rand::{rngs::OsRng, Rng};
use sha2::{Digest, Sha256};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpPurpose {
    Signup,
    PasswordReset,
}

impl OtpPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            OtpPurpose::Signup => "signup",
            OtpPurpose::PasswordReset => "password_reset",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct OneTimePasscode {
    pub id: Uuid,
    pub email: String,
    pub purpose: String,
    pub code_hash: String,
    pub pending_password_hash: Option<String>,
    pub attempts: i32,
    pub expires_at: OffsetDateTime,
    pub consumed_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// Outcome of presenting a code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtpCheck {
    Accepted { pending_password_hash: Option<String> },
    Mismatch,
    Expired,
    Exhausted,
    /// No outstanding code for this email and purpose.
    Missing,
}

impl OneTimePasscode {
    /// Unconsumed, unexpired and not locked by wrong guesses.
    pub fn is_outstanding(&self, now: OffsetDateTime, max_attempts: i32) -> bool {
        self.consumed_at.is_none() && now < self.expires_at && self.attempts < max_attempts
    }

    pub fn evaluate(&self, code_hash: &str, now: OffsetDateTime, max_attempts: i32) -> OtpCheck {
        if self.consumed_at.is_some() {
            return OtpCheck::Missing;
        }
        if now >= self.expires_at {
            return OtpCheck::Expired;
        }
        if self.attempts >= max_attempts {
            return OtpCheck::Exhausted;
        }
        if !constant_time_eq(self.code_hash.as_bytes(), code_hash.as_bytes()) {
            return OtpCheck::Mismatch;
        }
        OtpCheck::Accepted {
            pending_password_hash: self.pending_password_hash.clone(),
        }
    }
}

pub fn generate_code() -> String {
    format!("{:06}", OsRng.gen_range(0..1_000_000u32))
}

pub fn hash_code(code: &str) -> String {
    format!("{:x}", Sha256::digest(code.trim().as_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[async_trait]
pub trait OtpRepo: Send + Sync {
    /// Stores a new code and invalidates any outstanding one for the same
    /// email and purpose.
    async fn issue(
        &self,
        email: &str,
        purpose: OtpPurpose,
        code_hash: &str,
        pending_password_hash: Option<&str>,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()>;

    /// Most recently issued code for the email and purpose, in any state.
    async fn latest(&self, email: &str, purpose: OtpPurpose)
        -> anyhow::Result<Option<OneTimePasscode>>;

    /// Checks the latest outstanding code. `Accepted` consumes it and
    /// `Mismatch` counts an attempt against it.
    async fn consume(
        &self,
        email: &str,
        purpose: OtpPurpose,
        code_hash: &str,
        now: OffsetDateTime,
        max_attempts: i32,
    ) -> anyhow::Result<OtpCheck>;
}

const OTP_COLUMNS: &str = "id, email, purpose, code_hash, pending_password_hash, attempts, \
                           expires_at, consumed_at, created_at";

pub struct PgOtpRepo {
    db: PgPool,
}

impl PgOtpRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl OtpRepo for PgOtpRepo {
    async fn issue(
        &self,
        email: &str,
        purpose: OtpPurpose,
        code_hash: &str,
        pending_password_hash: Option<&str>,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        let mut tx = self.db.begin().await?;
        sqlx::query(
            r#"
            UPDATE one_time_passcodes
               SET consumed_at = now()
             WHERE email = $1 AND purpose = $2 AND consumed_at IS NULL
            "#,
        )
        .bind(email)
        .bind(purpose.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO one_time_passcodes
                   (email, purpose, code_hash, pending_password_hash, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(email)
        .bind(purpose.as_str())
        .bind(code_hash)
        .bind(pending_password_hash)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn latest(
        &self,
        email: &str,
        purpose: OtpPurpose,
    ) -> anyhow::Result<Option<OneTimePasscode>> {
        let row = sqlx::query_as::<_, OneTimePasscode>(&format!(
            r#"
            SELECT {OTP_COLUMNS}
              FROM one_time_passcodes
             WHERE email = $1 AND purpose = $2
             ORDER BY created_at DESC
             LIMIT 1
            "#
        ))
        .bind(email)
        .bind(purpose.as_str())
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn consume(
        &self,
        email: &str,
        purpose: OtpPurpose,
        code_hash: &str,
        now: OffsetDateTime,
        max_attempts: i32,
    ) -> anyhow::Result<OtpCheck> {
        let mut tx = self.db.begin().await?;
        let row = sqlx::query_as::<_, OneTimePasscode>(&format!(
            r#"
            SELECT {OTP_COLUMNS}
              FROM one_time_passcodes
             WHERE email = $1 AND purpose = $2 AND consumed_at IS NULL
             ORDER BY created_at DESC
             LIMIT 1
               FOR UPDATE
            "#
        ))
        .bind(email)
        .bind(purpose.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(otp) = row else {
            return Ok(OtpCheck::Missing);
        };

        let check = otp.evaluate(code_hash, now, max_attempts);
        match check {
            OtpCheck::Accepted { .. } => {
                sqlx::query("UPDATE one_time_passcodes SET consumed_at = $2 WHERE id = $1")
                    .bind(otp.id)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
            }
            OtpCheck::Mismatch => {
                sqlx::query("UPDATE one_time_passcodes SET attempts = attempts + 1 WHERE id = $1")
                    .bind(otp.id)
                    .execute(&mut *tx)
                    .await?;
            }
            _ => {}
        }
        tx.commit().await?;
        Ok(check)
    }
}
