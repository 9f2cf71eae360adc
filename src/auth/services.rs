use axum::extract::FromRef;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    dto::{AuthResponse, PublicUser},
    jwt::JwtKeys,
    otp::{generate_code, hash_code, OtpCheck, OtpPurpose},
    password::{check_password_policy, hash_password, normalize_email, verify_password},
    repo::User,
};
use crate::{
    error::{AppError, AppResult},
    mail::otp_mail,
    state::AppState,
};

fn issue_tokens(st: &AppState, user: User) -> AppResult<AuthResponse> {
    let keys = JwtKeys::from_ref(st);
    let access_token = keys.sign_access(user.id)?;
    let refresh_token = keys.sign_refresh(user.id)?;
    Ok(AuthResponse {
        access_token,
        refresh_token,
        user: PublicUser::from(user),
    })
}

async fn send_otp(
    st: &AppState,
    email: &str,
    purpose: OtpPurpose,
    pending_password_hash: Option<&str>,
) -> AppResult<()> {
    let code = generate_code();
    let ttl = st.config.otp.ttl_minutes;
    let expires_at = OffsetDateTime::now_utc() + TimeDuration::minutes(ttl);
    st.otps
        .issue(email, purpose, &hash_code(&code), pending_password_hash, expires_at)
        .await?;

    st.mailer
        .send(otp_mail(email, purpose.as_str(), &code, ttl))
        .await
        .map_err(|e| {
            warn!(error = %e, email = %email, "otp mail delivery failed");
            AppError::upstream("Could not deliver the verification email, try again")
        })?;
    info!(email = %email, purpose = purpose.as_str(), "otp issued");
    Ok(())
}

/// Consumes a valid code and returns the password hash bound to it, if any.
async fn check_otp(
    st: &AppState,
    email: &str,
    purpose: OtpPurpose,
    code: &str,
) -> AppResult<Option<String>> {
    let now = OffsetDateTime::now_utc();
    let check = st
        .otps
        .consume(email, purpose, &hash_code(code), now, st.config.otp.max_attempts)
        .await?;
    match check {
        OtpCheck::Accepted {
            pending_password_hash,
        } => Ok(pending_password_hash),
        OtpCheck::Mismatch | OtpCheck::Missing => {
            warn!(email = %email, outcome = ?check, "otp rejected");
            Err(AppError::Unauthorized("Invalid or expired code".into()))
        }
        OtpCheck::Expired => Err(AppError::Unauthorized("Code expired, request a new one".into())),
        OtpCheck::Exhausted => Err(AppError::Unauthorized(
            "Too many attempts, request a new code".into(),
        )),
    }
}

pub async fn signup(st: &AppState, email: &str, password: &str) -> AppResult<()> {
    let email = normalize_email(email)?;
    check_password_policy("password", password)?;

    let hash = hash_password(password)?;
    let user = st
        .users
        .upsert_unverified(&email, &hash)
        .await?
        .ok_or_else(|| AppError::Conflict("Email already registered".into()))?;

    // A pending code stays bound to its own password until it expires.
    let now = OffsetDateTime::now_utc();
    let pending = st
        .otps
        .latest(&email, OtpPurpose::Signup)
        .await?
        .filter(|otp| otp.is_outstanding(now, st.config.otp.max_attempts));
    if let Some(otp) = pending {
        let same_password = match otp.pending_password_hash.as_deref() {
            Some(pending_hash) => verify_password(password, pending_hash)?,
            None => verify_password(password, &user.password_hash)?,
        };
        if !same_password {
            warn!(email = %email, "signup with a different password while a code is pending");
            return Err(AppError::Conflict(
                "A verification code is already pending for this email".into(),
            ));
        }
    }

    send_otp(st, &email, OtpPurpose::Signup, Some(&hash)).await?;
    info!(user_id = %user.id, email = %email, "signup pending verification");
    Ok(())
}

pub async fn verify_signup(st: &AppState, email: &str, code: &str) -> AppResult<AuthResponse> {
    let email = normalize_email(email)?;
    let pending_hash = check_otp(st, &email, OtpPurpose::Signup, code).await?;

    let user = st
        .users
        .mark_verified(&email, pending_hash.as_deref())
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired code".into()))?;
    info!(user_id = %user.id, email = %user.email, "user verified");
    issue_tokens(st, user)
}

/// Reissues a signup code. Unknown or already verified emails are ignored
/// so the endpoint does not reveal which addresses exist.
pub async fn resend_signup_code(st: &AppState, email: &str) -> AppResult<()> {
    let email = normalize_email(email)?;
    match st.users.find_by_email(&email).await? {
        Some(user) if !user.verified => {
            let pending_hash = st
                .otps
                .latest(&email, OtpPurpose::Signup)
                .await?
                .and_then(|otp| otp.pending_password_hash);
            send_otp(st, &email, OtpPurpose::Signup, pending_hash.as_deref()).await
        }
        _ => Ok(()),
    }
}

pub async fn login(st: &AppState, email: &str, password: &str) -> AppResult<AuthResponse> {
    let email = normalize_email(email)?;
    let invalid = || AppError::Unauthorized("Invalid credentials".into());

    let Some(user) = st.users.find_by_email(&email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(invalid());
    };
    if !verify_password(password, &user.password_hash)? {
        warn!(email = %email, user_id = %user.id, "login invalid password");
        return Err(invalid());
    }
    if !user.verified {
        return Err(AppError::Forbidden("Email not verified".into()));
    }

    info!(user_id = %user.id, email = %user.email, "user logged in");
    issue_tokens(st, user)
}

pub async fn refresh(st: &AppState, refresh_token: &str) -> AppResult<AuthResponse> {
    let keys = JwtKeys::from_ref(st);
    let claims = keys.verify_refresh(refresh_token)?;

    let user = st
        .users
        .find_by_id(claims.sub)
        .await?
        .filter(|u| u.verified)
        .ok_or_else(|| AppError::Unauthorized("User not found".into()))?;
    issue_tokens(st, user)
}

pub async fn forgot_password(st: &AppState, email: &str) -> AppResult<()> {
    let email = normalize_email(email)?;
    match st.users.find_by_email(&email).await? {
        Some(user) if user.verified => {
            send_otp(st, &email, OtpPurpose::PasswordReset, None).await
        }
        _ => Ok(()),
    }
}

pub async fn reset_password(
    st: &AppState,
    email: &str,
    code: &str,
    new_password: &str,
) -> AppResult<()> {
    let email = normalize_email(email)?;
    check_password_policy("new_password", new_password)?;

    let user = st
        .users
        .find_by_email(&email)
        .await?
        .filter(|u| u.verified)
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired code".into()))?;
    check_otp(st, &email, OtpPurpose::PasswordReset, code).await?;

    let hash = hash_password(new_password)?;
    st.users.set_password(user.id, &hash).await?;
    info!(user_id = %user.id, "password reset");
    Ok(())
}

pub async fn current_user(st: &AppState, user_id: Uuid) -> AppResult<PublicUser> {
    st.users
        .find_by_id(user_id)
        .await?
        .map(PublicUser::from)
        .ok_or_else(|| AppError::Unauthorized("User not found".into()))
}

/// Removes the account, its stored originals, and (by cascade) all of its
/// vendors and documents.
pub async fn delete_account(st: &AppState, user_id: Uuid) -> AppResult<()> {
    let keys = st.documents.storage_keys(user_id).await?;
    for key in &keys {
        if let Err(e) = st.storage.delete_object(key).await {
            warn!(error = %e, key = %key, "failed to delete stored original");
        }
    }
    if !st.users.delete(user_id).await? {
        return Err(AppError::NotFound("User not found".into()));
    }
    info!(user_id = %user_id, removed_files = keys.len(), "account deleted");
    Ok(())
}
