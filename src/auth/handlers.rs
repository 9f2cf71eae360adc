use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            Accepted, AuthResponse, EmailRequest, LoginRequest, PublicUser, RefreshRequest,
            ResetPasswordRequest, SignupRequest, VerifyRequest,
        },
        jwt::AuthUser,
        services,
    },
    error::AppResult,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/verify", post(verify))
        .route("/auth/resend", post(resend))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/password/forgot", post(forgot_password))
        .route("/auth/password/reset", post(reset_password))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me).delete(delete_me))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> AppResult<(StatusCode, Json<Accepted>)> {
    services::signup(&state, &payload.email, &payload.password).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(Accepted {
            message: "Verification code sent",
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn verify(
    State(state): State<AppState>,
    Json(payload): Json<VerifyRequest>,
) -> AppResult<Json<AuthResponse>> {
    let res = services::verify_signup(&state, &payload.email, &payload.code).await?;
    Ok(Json(res))
}

#[instrument(skip(state, payload))]
pub async fn resend(
    State(state): State<AppState>,
    Json(payload): Json<EmailRequest>,
) -> AppResult<(StatusCode, Json<Accepted>)> {
    services::resend_signup_code(&state, &payload.email).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(Accepted {
            message: "If the account is pending verification, a new code was sent",
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let res = services::login(&state, &payload.email, &payload.password).await?;
    Ok(Json(res))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> AppResult<Json<AuthResponse>> {
    let res = services::refresh(&state, &payload.refresh_token).await?;
    Ok(Json(res))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<EmailRequest>,
) -> AppResult<(StatusCode, Json<Accepted>)> {
    services::forgot_password(&state, &payload.email).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(Accepted {
            message: "If the account exists, a reset code was sent",
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> AppResult<Json<Accepted>> {
    services::reset_password(&state, &payload.email, &payload.code, &payload.new_password).await?;
    Ok(Json(Accepted {
        message: "Password updated",
    }))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<PublicUser>> {
    Ok(Json(services::current_user(&state, user_id).await?))
}

#[instrument(skip(state))]
pub async fn delete_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<StatusCode> {
    services::delete_account(&state, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
