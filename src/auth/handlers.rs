use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::{
        dto::{
            ApiResponse, ChangePasswordRequest, Dashboard, DashboardData, ForgotPasswordRequest,
            LoginData, LoginRequest, ProfileData, RegisterRequest, ResetPasswordRequest,
            TokenData, TokenRequest,
        },
        extractors::{AuthUser, VerifiedUser},
        repo_types::PublicUser,
        services::AuthService,
    },
    error::AppError,
    state::AppState,
};

const FORGOT_PASSWORD_MESSAGE: &str =
    "If an account with that email exists, a password reset link has been sent";

type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), AppError>;

fn ok<T: serde::Serialize>(status: StatusCode, body: ApiResponse<T>) -> ApiResult<T> {
    Ok((status, Json(body)))
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/verify-email", post(verify_email))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/logout", post(logout))
        .route("/auth/refresh-token", post(refresh_token))
}

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/user/profile", get(profile))
        .route("/user/dashboard", get(dashboard))
        .route("/user/change-password", post(change_password))
}

#[instrument(skip_all)]
pub async fn register(
    State(auth): State<AuthService>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<PublicUser> {
    let Json(req) = payload?;
    let user = auth.register(req).await?;
    ok(
        StatusCode::CREATED,
        ApiResponse::with_data(
            "User registered successfully. Please check your email to verify your account.",
            user,
        ),
    )
}

#[instrument(skip_all)]
pub async fn login(
    State(auth): State<AuthService>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<LoginData> {
    let Json(req) = payload?;
    let data = auth.login(req).await?;
    ok(StatusCode::OK, ApiResponse::with_data("Login successful", data))
}

#[instrument(skip_all)]
pub async fn verify_email(
    State(auth): State<AuthService>,
    payload: Result<Json<TokenRequest>, JsonRejection>,
) -> ApiResult<()> {
    let Json(req) = payload?;
    auth.verify_email(&req.token).await?;
    ok(
        StatusCode::OK,
        ApiResponse::message("Email verified successfully. Welcome to our platform!"),
    )
}

#[instrument(skip_all)]
pub async fn forgot_password(
    State(auth): State<AuthService>,
    payload: Result<Json<ForgotPasswordRequest>, JsonRejection>,
) -> ApiResult<()> {
    let Json(req) = payload?;
    auth.forgot_password(&req.email).await?;
    ok(StatusCode::OK, ApiResponse::message(FORGOT_PASSWORD_MESSAGE))
}

#[instrument(skip_all)]
pub async fn reset_password(
    State(auth): State<AuthService>,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> ApiResult<()> {
    let Json(req) = payload?;
    auth.reset_password(req).await?;
    ok(StatusCode::OK, ApiResponse::message("Password reset successfully"))
}

/// Sessions are stateless; the client discards its token.
pub async fn logout() -> ApiResult<()> {
    info!("logout acknowledged");
    ok(StatusCode::OK, ApiResponse::message("Logged out successfully"))
}

#[instrument(skip_all)]
pub async fn refresh_token(
    State(auth): State<AuthService>,
    payload: Result<Json<TokenRequest>, JsonRejection>,
) -> ApiResult<TokenData> {
    let Json(req) = payload?;
    let token = auth.refresh_token(&req.token).await?;
    ok(
        StatusCode::OK,
        ApiResponse::with_data("Token refreshed successfully", TokenData { token }),
    )
}

pub async fn profile(AuthUser(user): AuthUser) -> ApiResult<ProfileData> {
    ok(
        StatusCode::OK,
        ApiResponse::with_data("Profile retrieved successfully", ProfileData { user }),
    )
}

pub async fn dashboard(VerifiedUser(user): VerifiedUser) -> ApiResult<DashboardData> {
    let dashboard = Dashboard {
        welcome_message: format!("Welcome back, {}!", user.first_name),
        email_verified: user.is_email_verified,
    };
    ok(
        StatusCode::OK,
        ApiResponse::with_data("Dashboard data retrieved", DashboardData { user, dashboard }),
    )
}

#[instrument(skip_all)]
pub async fn change_password(
    State(auth): State<AuthService>,
    AuthUser(user): AuthUser,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> ApiResult<()> {
    let Json(req) = payload?;
    auth.change_password(user.id, req).await?;
    ok(StatusCode::OK, ApiResponse::message("Password changed successfully"))
}
