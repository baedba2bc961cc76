//! User model: identity record with role, password hash and soft-delete flag.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::api::error::ApiError;
use crate::crud::Resource;
use crate::db::DbPool;

use super::timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum Role {
    User,
    Guide,
    LeadGuide,
    Admin,
}

impl Default for Role {
    fn default() -> Self {
        Self::User
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::User => "user",
            Role::Guide => "guide",
            Role::LeadGuide => "lead-guide",
            Role::Admin => "admin",
        };
        write!(f, "{}", s)
    }
}

/// Full user row. Never serialized outward: reads go through
/// [`UserResponse`], which carries no password or token material.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub photo: String,
    pub role: Role,
    pub password_hash: String,
    pub password_changed_at: Option<String>,
    pub password_reset_token: Option<String>,
    pub password_reset_expires: Option<String>,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    /// True if the password was changed after the given token issue time
    /// (unix seconds). Users who never changed their password pass.
    pub fn changed_password_after(&self, token_iat: i64) -> bool {
        match &self.password_changed_at {
            Some(raw) => match chrono::DateTime::parse_from_rfc3339(raw) {
                Ok(changed) => token_iat < changed.timestamp(),
                Err(_) => false,
            },
            None => false,
        }
    }

    #[cfg(test)]
    pub fn test_fixture() -> Self {
        Self {
            id: "u-test".to_string(),
            name: "Test User".to_string(),
            email: "test@example.com".to_string(),
            photo: "default.jpg".to_string(),
            role: Role::User,
            password_hash: "x".to_string(),
            password_changed_at: None,
            password_reset_token: None,
            password_reset_expires: None,
            active: true,
            created_at: super::timestamp(),
            updated_at: super::timestamp(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub photo: String,
    pub role: Role,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            photo: user.photo,
            role: user.role,
        }
    }
}

/// Admin-side user update. Password changes go through the dedicated
/// auth endpoints and are deliberately not expressible here.
#[derive(Debug, Deserialize)]
pub struct UpdateUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub photo: Option<String>,
    pub role: Option<Role>,
    pub active: Option<bool>,
}

/// CRUD descriptor for users.
pub struct Users;

#[async_trait]
impl Resource for Users {
    const TABLE: &'static str = "users";
    const FIELD_MAP: &'static [(&'static str, &'static str)] = &[
        ("name", "name"),
        ("email", "email"),
        ("role", "role"),
        ("createdAt", "created_at"),
    ];
    // Soft-deleted users are invisible to every read path
    const READ_SCOPE: &'static [&'static str] = &["active = 1"];

    type Row = User;
    type Out = UserResponse;
    type Create = serde_json::Value;
    type Update = UpdateUser;

    async fn insert(_pool: &DbPool, _body: Self::Create) -> Result<Self::Row, ApiError> {
        Err(ApiError::internal(
            "This route is not defined! Please use /signup instead",
        ))
    }

    async fn apply_update(
        pool: &DbPool,
        row: Self::Row,
        body: Self::Update,
    ) -> Result<Self::Row, ApiError> {
        let updated = User {
            id: row.id,
            name: body.name.unwrap_or(row.name),
            email: body
                .email
                .map(|e| e.trim().to_lowercase())
                .unwrap_or(row.email),
            photo: body.photo.unwrap_or(row.photo),
            role: body.role.unwrap_or(row.role),
            password_hash: row.password_hash,
            password_changed_at: row.password_changed_at,
            password_reset_token: row.password_reset_token,
            password_reset_expires: row.password_reset_expires,
            active: body.active.unwrap_or(row.active),
            created_at: row.created_at,
            updated_at: timestamp(),
        };

        sqlx::query(
            "UPDATE users SET name = ?, email = ?, photo = ?, role = ?, active = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&updated.name)
        .bind(&updated.email)
        .bind(&updated.photo)
        .bind(updated.role)
        .bind(updated.active)
        .bind(&updated.updated_at)
        .bind(&updated.id)
        .execute(pool)
        .await?;

        Ok(updated)
    }

    async fn hydrate(_pool: &DbPool, rows: Vec<Self::Row>) -> Result<Vec<Self::Out>, ApiError> {
        Ok(rows.into_iter().map(UserResponse::from).collect())
    }

    /// Users are never physically removed by the API: flip the active flag.
    async fn remove(pool: &DbPool, id: &str) -> Result<Option<Self::Row>, ApiError> {
        let Some(row) = Self::fetch(pool, id).await? else {
            return Ok(None);
        };
        sqlx::query("UPDATE users SET active = 0, updated_at = ? WHERE id = ?")
            .bind(timestamp())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(Some(User {
            active: false,
            ..row
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        User {
            id: "u1".into(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            photo: "default.jpg".into(),
            role: Role::User,
            password_hash: "$argon2id$fake".into(),
            password_changed_at: None,
            password_reset_token: None,
            password_reset_expires: None,
            active: true,
            created_at: timestamp(),
            updated_at: timestamp(),
        }
    }

    #[test]
    fn response_never_carries_password_material() {
        let json = serde_json::to_value(UserResponse::from(sample_user())).unwrap();
        let obj = json.as_object().unwrap();
        assert!(!obj.contains_key("password_hash"));
        assert!(!obj.contains_key("passwordHash"));
        assert!(!obj.contains_key("passwordResetToken"));
        assert!(obj.contains_key("email"));
    }

    #[test]
    fn changed_password_after_compares_issue_time() {
        let mut user = sample_user();
        assert!(!user.changed_password_after(1_000));

        user.password_changed_at = Some("2024-01-01T00:00:00+00:00".to_string());
        let changed_ts = chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:00+00:00")
            .unwrap()
            .timestamp();
        // Token issued before the change is stale, after it is fine
        assert!(user.changed_password_after(changed_ts - 10));
        assert!(!user.changed_password_after(changed_ts + 10));
    }

    #[test]
    fn role_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_value(Role::LeadGuide).unwrap(),
            serde_json::json!("lead-guide")
        );
        assert_eq!(Role::LeadGuide.to_string(), "lead-guide");
    }

    #[tokio::test]
    async fn soft_delete_hides_user_from_scoped_reads() {
        let pool = crate::db::test_pool().await;
        let user = sample_user();
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
        .execute(&pool)
        .await
        .unwrap();

        let removed = Users::remove(&pool, "u1").await.unwrap();
        assert!(removed.is_some());

        // Scoped fetch no longer sees the user...
        assert!(Users::fetch(&pool, "u1").await.unwrap().is_none());

        // ...but the row still exists
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE id = 'u1'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
