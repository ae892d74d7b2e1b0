pub mod password;

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::shared::error::{AppError, AppResult};
use crate::shared::schema::users;
use crate::shared::state::AppState;
use crate::shared::utils::DbPool;

pub const TOKEN_EXPIRY_HOURS: i64 = 24;
pub const RESET_TOKEN_EXPIRY_MINUTES: i64 = 60;

/// Closed role set. The wire form is the human-readable label; parsing is
/// case-insensitive so "support agent" and "Support Agent" resolve the same.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
pub enum Role {
    Admin,
    User,
    #[serde(rename = "Support Agent")]
    SupportAgent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "Admin",
            Self::User => "User",
            Self::SupportAgent => "Support Agent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "user" => Some(Self::User),
            "support agent" => Some(Self::SupportAgent),
            _ => None,
        }
    }
}

impl ToSql<Text, Pg> for Role {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        out.write_all(self.as_str().as_bytes())?;
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Pg> for Role {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let s = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
        Self::parse(&s).ok_or_else(|| format!("unrecognized role: {s}").into())
    }
}

#[derive(Debug, Clone, Serialize, Queryable, Insertable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    #[serde(skip_serializing)]
    pub reset_token_hash: Option<String>,
    #[serde(skip_serializing)]
    pub reset_token_expires: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Bearer-token claims: user id in `sub`, role, issued-at and expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

pub fn issue_token(user: &User, secret: &str) -> AppResult<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user.id,
        role: user.role,
        iat: now.timestamp(),
        exp: (now + Duration::hours(TOKEN_EXPIRY_HOURS)).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(e.into()))
}

pub fn decode_claims(token: &str, secret: &str) -> AppResult<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Auth("Invalid token".to_string()))
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|auth| {
            if auth.to_lowercase().starts_with("bearer ") {
                Some(auth[7..].to_string())
            } else {
                None
            }
        })
}

/// Authenticated-user extractor: validates the bearer token and resolves the
/// user record, so a token referencing a deleted account is rejected.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)
            .ok_or_else(|| AppError::Auth("No token, authorization denied".to_string()))?;

        let claims = decode_claims(&token, &state.config.jwt_secret)?;

        let mut conn = state.conn.get()?;
        let user = users::table
            .filter(users::id.eq(claims.sub))
            .first::<User>(&mut conn)
            .optional()?
            .ok_or_else(|| AppError::Auth("User not found".to_string()))?;

        Ok(CurrentUser(user))
    }
}

pub fn require_role(user: &User, allowed: &[Role]) -> AppResult<()> {
    if allowed.contains(&user.role) {
        Ok(())
    } else {
        Err(AppError::Permission(
            "Access denied: insufficient permissions".to_string(),
        ))
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub message: String,
    pub token: String,
    pub user: PublicProfile,
}

#[derive(Debug, Serialize)]
pub struct PublicProfile {
    pub username: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    #[serde(rename = "newPassword")]
    pub new_password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub role: Option<String>,
}

fn message_body(text: &str) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": text }))
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
    Json(req): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    require_role(&caller, &[Role::Admin])?;

    let (username, email, password_raw, role_raw) =
        match (req.username, req.email, req.password, req.role) {
            (Some(u), Some(e), Some(p), Some(r))
                if !u.trim().is_empty() && !e.trim().is_empty() && !p.is_empty() =>
            {
                (u, e, p, r)
            }
            _ => {
                return Err(AppError::Validation("All fields are required".to_string()));
            }
        };

    let role = Role::parse(&role_raw)
        .ok_or_else(|| AppError::Validation("Invalid role selected".to_string()))?;
    let email = email.trim().to_lowercase();

    let mut conn = state.conn.get()?;
    let existing = users::table
        .filter(users::email.eq(&email))
        .first::<User>(&mut conn)
        .optional()?;
    if existing.is_some() {
        return Err(AppError::Conflict("User already exists".to_string()));
    }

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        username,
        email,
        password_hash: password::hash_password(&password_raw)?,
        role,
        reset_token_hash: None,
        reset_token_expires: None,
        created_at: now,
        updated_at: now,
    };

    diesel::insert_into(users::table)
        .values(&user)
        .execute(&mut conn)?;

    info!(user_id = %user.id, role = role.as_str(), "registered new user");
    Ok((
        StatusCode::CREATED,
        message_body("User registered successfully"),
    ))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let mut conn = state.conn.get()?;
    let user = users::table
        .filter(users::email.eq(req.email.trim().to_lowercase()))
        .first::<User>(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::Auth("Invalid credentials".to_string()))?;

    if !password::verify_password(&req.password, &user.password_hash)? {
        return Err(AppError::Auth("Invalid credentials".to_string()));
    }

    let token = issue_token(&user, &state.config.jwt_secret)?;
    Ok(Json(LoginResponse {
        message: "Login successful".to_string(),
        token,
        user: PublicProfile {
            username: user.username,
            email: user.email,
            role: user.role,
        },
    }))
}

/// Always answers with the success-shaped body, including for unknown
/// emails, so the endpoint cannot be used to enumerate accounts.
pub async fn forget_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ForgotPasswordRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let response = message_body("If the account exists, a reset email has been sent");

    let mut conn = state.conn.get()?;
    let user = users::table
        .filter(users::email.eq(req.email.trim().to_lowercase()))
        .first::<User>(&mut conn)
        .optional()?;

    let Some(user) = user else {
        return Ok(response);
    };

    let token = password::generate_reset_token();
    let expires = Utc::now() + Duration::minutes(RESET_TOKEN_EXPIRY_MINUTES);

    diesel::update(users::table.filter(users::id.eq(user.id)))
        .set((
            users::reset_token_hash.eq(Some(password::reset_token_digest(&token))),
            users::reset_token_expires.eq(Some(expires)),
            users::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;

    let reset_link = format!("{}/ResetPassword/{}", state.config.app_url, token);
    if let Err(e) = state.mailer.send_reset_link(&user.email, &reset_link) {
        // The caller still gets the success shape; anything else would let
        // mail outages reveal which addresses are registered.
        warn!(user_id = %user.id, "failed to send reset email: {e:#}");
    }

    Ok(response)
}

pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Json(req): Json<ResetPasswordRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let new_password = req
        .new_password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::Validation("New password is required".to_string()))?;

    let mut conn = state.conn.get()?;
    let digest = password::reset_token_digest(&token);
    let user = users::table
        .filter(users::reset_token_hash.eq(Some(digest)))
        .filter(users::reset_token_expires.gt(Some(Utc::now())))
        .first::<User>(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::Auth("Invalid or expired token".to_string()))?;

    diesel::update(users::table.filter(users::id.eq(user.id)))
        .set((
            users::password_hash.eq(password::hash_password(&new_password)?),
            users::reset_token_hash.eq(None::<String>),
            users::reset_token_expires.eq(None::<DateTime<Utc>>),
            users::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;

    info!(user_id = %user.id, "password reset completed");
    Ok(message_body("Password reset successful. You can now log in."))
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
) -> AppResult<Json<Vec<User>>> {
    require_role(&caller, &[Role::Admin])?;

    let mut conn = state.conn.get()?;
    let all_users = users::table
        .order(users::created_at.asc())
        .load::<User>(&mut conn)?;
    Ok(Json(all_users))
}

pub async fn update_user(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
    Path(user_id): Path<Uuid>,
    Json(req): Json<UpdateUserRequest>,
) -> AppResult<Json<serde_json::Value>> {
    require_role(&caller, &[Role::Admin])?;

    if req.username.is_none() && req.role.is_none() {
        return Err(AppError::Validation(
            "At least one field (name or role) must be provided".to_string(),
        ));
    }

    let new_role = match &req.role {
        Some(raw) => Some(
            Role::parse(raw)
                .ok_or_else(|| AppError::Validation("Invalid role selection".to_string()))?,
        ),
        None => None,
    };

    let mut conn = state.conn.get()?;
    let user = users::table
        .filter(users::id.eq(user_id))
        .first::<User>(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    diesel::update(users::table.filter(users::id.eq(user_id)))
        .set((
            users::username.eq(req.username.unwrap_or(user.username)),
            users::role.eq(new_role.unwrap_or(user.role)),
            users::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;

    let updated = users::table
        .filter(users::id.eq(user_id))
        .first::<User>(&mut conn)?;
    Ok(Json(serde_json::json!({
        "message": "User updated successfully",
        "user": updated,
    })))
}

pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    require_role(&caller, &[Role::Admin])?;

    if caller.id == user_id {
        return Err(AppError::Validation(
            "You cannot delete your own account".to_string(),
        ));
    }

    let mut conn = state.conn.get()?;
    let deleted = diesel::delete(users::table.filter(users::id.eq(user_id)))
        .execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    info!(%user_id, "user deleted");
    Ok(message_body("User deleted successfully!"))
}

/// Registration is Admin-gated, so a fresh database gets its first Admin
/// from the configured seed credentials.
pub fn ensure_bootstrap_admin(pool: &DbPool, config: &AppConfig) -> anyhow::Result<()> {
    let Some(seed) = &config.bootstrap_admin else {
        return Ok(());
    };

    let mut conn = pool.get()?;
    let admin_count: i64 = users::table
        .filter(users::role.eq(Role::Admin))
        .count()
        .get_result(&mut conn)?;
    if admin_count > 0 {
        return Ok(());
    }

    let now = Utc::now();
    let admin = User {
        id: Uuid::new_v4(),
        username: seed.username.clone(),
        email: seed.email.trim().to_lowercase(),
        password_hash: password::hash_password(&seed.password)?,
        role: Role::Admin,
        reset_token_hash: None,
        reset_token_expires: None,
        created_at: now,
        updated_at: now,
    };
    diesel::insert_into(users::table)
        .values(&admin)
        .execute(&mut conn)?;

    info!(email = %admin.email, "seeded bootstrap admin account");
    Ok(())
}

pub fn configure_auth_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/forgetpassword", post(forget_password))
        .route("/api/auth/resetpassword/:token", post(reset_password))
        .route("/api/auth/users", get(list_users))
        .route("/api/auth/user/:id", put(update_user).delete(delete_user))
}
