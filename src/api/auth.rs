//! Authentication: signup/login with JWTs (bearer header or `jwt` cookie),
//! password reset over email, and the `CurrentUser` extractor guarding
//! protected routes.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, Host, Path, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::config::AuthConfig;
use crate::db::models::{timestamp, Role, User, UserResponse};
use crate::AppState;

const AUTH_COOKIE: &str = "jwt";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| ApiError::internal("Failed to hash password").with_detail(e.to_string()))?;
    Ok(hash.to_string())
}

/// Verify a password against a stored hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a random reset token (the plaintext mailed to the user)
fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a reset token for storage
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn sign_token(user_id: &str, auth: &AuthConfig) -> Result<String, ApiError> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now,
        exp: now + auth.jwt_expires_in_days * 24 * 60 * 60,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(auth.jwt_secret.as_bytes()),
    )
    .map_err(|e| ApiError::internal("Failed to sign token").with_detail(e.to_string()))
}

fn decode_token(token: &str, secret: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            ApiError::unauthorized("Your token has expired! Please log in again.")
        }
        _ => ApiError::unauthorized("Invalid token. Please log in again!"),
    })
}

fn validate_new_password(password: &str, confirm: &str) -> Result<(), ApiError> {
    if password.len() < 8 {
        return Err(ApiError::bad_request(
            "Password must be at least 8 characters",
        ));
    }
    if password != confirm {
        return Err(ApiError::bad_request("Passwords do not match"));
    }
    Ok(())
}

/// Check the caller's role against the roles allowed on a route.
pub fn authorize(user: &User, roles: &[Role]) -> Result<(), ApiError> {
    if roles.contains(&user.role) {
        return Ok(());
    }
    Err(ApiError::forbidden(
        "You do not have permission to perform this action",
    ))
}

/// Authenticated user, resolved from a bearer token or the auth cookie.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).or_else(|| cookie_token(parts)).ok_or_else(|| {
            ApiError::unauthorized("You are not logged in! Please log in to get access.")
        })?;
        let claims = decode_token(&token, &state.config.auth.jwt_secret)?;

        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ? AND active = 1")
            .bind(&claims.sub)
            .fetch_optional(&state.db)
            .await?;
        let user = user.ok_or_else(|| {
            ApiError::unauthorized("The user belonging to this token does no longer exist.")
        })?;

        // Tokens issued before the last password change are dead
        if user.changed_password_after(claims.iat) {
            return Err(ApiError::unauthorized(
                "User recently changed password! Please log in again.",
            ));
        }

        Ok(CurrentUser(user))
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

fn cookie_token(parts: &Parts) -> Option<String> {
    CookieJar::from_headers(&parts.headers)
        .get(AUTH_COOKIE)
        .map(|c| c.value().to_string())
}

fn auth_cookie(token: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((AUTH_COOKIE, token.to_string()))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .build()
}

/// Issue a token, set the auth cookie, and return the user envelope.
fn send_token(
    state: &AppState,
    jar: CookieJar,
    user: UserResponse,
    status: StatusCode,
) -> Result<Response, ApiError> {
    let token = sign_token(&user.id, &state.config.auth)?;
    let jar = jar.add(auth_cookie(&token, state.config.environment.is_production()));
    let body = json!({
        "status": "success",
        "token": token,
        "data": { "user": user },
    });
    Ok((status, jar, Json(body)).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub password_confirm: String,
}

pub async fn signup(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(request): Json<SignupRequest>,
) -> Result<Response, ApiError> {
    validate_new_password(&request.password, &request.password_confirm)?;
    if request.name.trim().is_empty() {
        return Err(ApiError::bad_request("Please tell us your name!"));
    }

    let user = User {
        id: Uuid::new_v4().to_string(),
        name: request.name,
        email: request.email.to_lowercase(),
        photo: "default.jpg".to_string(),
        role: Role::User,
        password_hash: hash_password(&request.password)?,
        password_changed_at: None,
        password_reset_token: None,
        password_reset_expires: None,
        active: true,
        created_at: timestamp(),
        updated_at: timestamp(),
    };

    // A duplicate email trips the UNIQUE constraint and maps to a 400
    sqlx::query(
        "INSERT INTO users (id, name, email, photo, role, password_hash, active, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(&user.id)
    .bind(&user.name)
    .bind(&user.email)
    .bind(&user.photo)
    .bind(user.role)
    .bind(&user.password_hash)
    .bind(&user.created_at)
    .bind(&user.updated_at)
    .execute(&state.db)
    .await?;

    if state.mailer.is_enabled() {
        if let Err(e) = state.mailer.send_welcome(&user.email, &user.name).await {
            tracing::warn!("Failed to send welcome email to {}: {}", user.email, e);
        }
    }

    send_token(&state, jar, UserResponse::from(user), StatusCode::CREATED)
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    if request.email.is_empty() || request.password.is_empty() {
        return Err(ApiError::bad_request("Please provide email and password!"));
    }

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ? AND active = 1")
        .bind(request.email.to_lowercase())
        .fetch_optional(&state.db)
        .await?;

    // One message for both unknown email and bad password
    let user = match user {
        Some(user) if verify_password(&request.password, &user.password_hash) => user,
        _ => return Err(ApiError::unauthorized("Incorrect email or password")),
    };

    send_token(&state, jar, UserResponse::from(user), StatusCode::OK)
}

pub async fn logout(jar: CookieJar) -> Response {
    let jar = jar.remove(Cookie::build((AUTH_COOKIE, "")).path("/").build());
    (jar, Json(json!({ "status": "success" }))).into_response()
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    Host(host): Host,
    Json(request): Json<ForgotPasswordRequest>,
) -> Result<Response, ApiError> {
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ? AND active = 1")
        .bind(request.email.to_lowercase())
        .fetch_optional(&state.db)
        .await?;
    let user = user.ok_or_else(|| {
        ApiError::not_found("There is no user with that email address.")
    })?;

    // Only the hash is persisted; the plaintext goes out by email
    let token = generate_token();
    let expires = (Utc::now() + Duration::minutes(10)).to_rfc3339();
    sqlx::query(
        "UPDATE users SET password_reset_token = ?, password_reset_expires = ? WHERE id = ?",
    )
    .bind(hash_token(&token))
    .bind(&expires)
    .bind(&user.id)
    .execute(&state.db)
    .await?;

    let reset_url = format!("http://{}/api/v1/users/reset-password/{}", host, token);
    if let Err(e) = state
        .mailer
        .send_password_reset(&user.email, &user.name, &reset_url)
        .await
    {
        tracing::error!("Failed to send password reset email: {}", e);
        sqlx::query(
            "UPDATE users SET password_reset_token = NULL, password_reset_expires = NULL WHERE id = ?",
        )
        .bind(&user.id)
        .execute(&state.db)
        .await?;
        return Err(ApiError::internal(
            "There was an error sending the email. Try again later!",
        ));
    }

    Ok(Json(json!({
        "status": "success",
        "message": "Token sent to email!",
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub password: String,
    pub password_confirm: String,
}

pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(token): Path<String>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<Response, ApiError> {
    validate_new_password(&request.password, &request.password_confirm)?;

    let user: Option<User> = sqlx::query_as(
        "SELECT * FROM users WHERE password_reset_token = ? AND password_reset_expires > ?",
    )
    .bind(hash_token(&token))
    .bind(timestamp())
    .fetch_optional(&state.db)
    .await?;
    let user =
        user.ok_or_else(|| ApiError::bad_request("Token is invalid or has expired"))?;

    update_credentials(&state, &user.id, &request.password).await?;

    send_token(&state, jar, UserResponse::from(user), StatusCode::OK)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordRequest {
    pub password_current: String,
    pub password: String,
    pub password_confirm: String,
}

pub async fn update_password(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Json(request): Json<UpdatePasswordRequest>,
) -> Result<Response, ApiError> {
    if !verify_password(&request.password_current, &user.password_hash) {
        return Err(ApiError::unauthorized("Your current password is wrong."));
    }
    validate_new_password(&request.password, &request.password_confirm)?;

    update_credentials(&state, &user.id, &request.password).await?;

    send_token(&state, jar, UserResponse::from(user), StatusCode::OK)
}

/// Store a new password hash and invalidate previously issued tokens.
/// The change timestamp is backdated one second so the token signed in
/// the same request stays valid.
async fn update_credentials(
    state: &AppState,
    user_id: &str,
    password: &str,
) -> Result<(), ApiError> {
    let changed_at = (Utc::now() - Duration::seconds(1)).to_rfc3339();
    sqlx::query(
        "UPDATE users SET password_hash = ?, password_changed_at = ?,
             password_reset_token = NULL, password_reset_expires = NULL, updated_at = ?
         WHERE id = ?",
    )
    .bind(hash_password(password)?)
    .bind(changed_at)
    .bind(timestamp())
    .bind(user_id)
    .execute(&state.db)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test-secret".to_string(),
            jwt_expires_in_days: 90,
        }
    }

    #[test]
    fn password_hash_roundtrip() {
        let hash = hash_password("pass1234").unwrap();
        assert!(verify_password("pass1234", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn token_roundtrip_preserves_subject() {
        let auth = auth_config();
        let token = sign_token("user-1", &auth).unwrap();
        let claims = decode_token(&token, &auth.jwt_secret).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn token_with_wrong_secret_is_rejected() {
        let auth = auth_config();
        let token = sign_token("user-1", &auth).unwrap();
        assert!(decode_token(&token, "other-secret").is_err());
    }

    #[test]
    fn reset_tokens_hash_deterministically() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert_eq!(hash_token(&token), hash_token(&token));
        assert_ne!(hash_token(&token), token);
    }

    #[test]
    fn new_password_validation() {
        assert!(validate_new_password("short", "short").is_err());
        assert!(validate_new_password("longenough", "different").is_err());
        assert!(validate_new_password("longenough", "longenough").is_ok());
    }

    #[test]
    fn auth_cookie_is_secure_in_production_only() {
        let prod = auth_cookie("t", true);
        assert_eq!(prod.secure(), Some(true));
        assert_eq!(prod.http_only(), Some(true));

        let dev = auth_cookie("t", false);
        assert_eq!(dev.secure(), Some(false));
    }

    #[test]
    fn role_checks() {
        let mut user = User::test_fixture();
        user.role = Role::User;
        assert!(authorize(&user, &[Role::Admin, Role::LeadGuide]).is_err());
        user.role = Role::Admin;
        assert!(authorize(&user, &[Role::Admin, Role::LeadGuide]).is_ok());
    }
}
