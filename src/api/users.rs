//! User endpoints: the `/me` self-service surface and the admin-only
//! account management routes.

use axum::{
    extract::{Multipart, Path, Query, State},
    response::Response,
    Json,
};
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::auth::{authorize, CurrentUser};
use crate::api::error::ApiError;
use crate::api::respond;
use crate::crud::{self, Resource};
use crate::db::models::{Role, UpdateUser, UserResponse, Users};
use crate::media;
use crate::AppState;

pub async fn get_me(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Response, ApiError> {
    crud::get_one::<Users>(&state.db, &user.id).await
}

/// Self-service profile update, restricted to name and email. Password
/// changes go through their own route.
pub async fn update_me(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    if body.get("password").is_some() || body.get("passwordConfirm").is_some() {
        return Err(ApiError::bad_request(
            "This route is not for password updates. Please use /update-password.",
        ));
    }

    let filtered = UpdateUser {
        name: body.get("name").and_then(|v| v.as_str()).map(str::to_string),
        email: body.get("email").and_then(|v| v.as_str()).map(str::to_string),
        photo: None,
        role: None,
        active: None,
    };

    let row = Users::fetch(&state.db, &user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("No document found with this ID"))?;
    let updated = Users::apply_update(&state.db, row, filtered).await?;

    Ok(respond::success(
        serde_json::json!({ "user": UserResponse::from(updated) }),
    ))
}

/// Accepts a single image part and stores it as the user's avatar.
pub async fn upload_my_photo(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let uploads = media::collect_images(&mut multipart).await?;
    let upload = uploads
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::bad_request("Please upload an image"))?;

    let filename = media::user_photo_name(&user.id);
    let dir = state.config.server.public_dir.join("img/users");
    media::save_resized(
        upload.data,
        media::USER_PHOTO_SIZE,
        media::USER_PHOTO_SIZE,
        dir.join(&filename),
    )
    .await?;

    sqlx::query("UPDATE users SET photo = ?, updated_at = ? WHERE id = ?")
        .bind(&filename)
        .bind(crate::db::models::timestamp())
        .bind(&user.id)
        .execute(&state.db)
        .await?;

    crud::get_one::<Users>(&state.db, &user.id).await
}

/// Soft-deletes the calling user's own account.
pub async fn delete_me(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Response, ApiError> {
    Users::remove(&state.db, &user.id).await?;
    Ok(respond::no_content())
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    authorize(&user, &[Role::Admin])?;
    crud::get_all::<Users>(&state.db, &params, None).await
}

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authorize(&user, &[Role::Admin])?;
    crud::get_one::<Users>(&state.db, &id).await
}

/// Always refuses; accounts are created through signup.
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    authorize(&user, &[Role::Admin])?;
    crud::create_one::<Users>(&state.db, body).await
}

pub async fn update_user(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateUser>,
) -> Result<Response, ApiError> {
    authorize(&user, &[Role::Admin])?;
    crud::update_one::<Users>(&state.db, &id, body).await
}

/// Admin delete is also a soft delete; `Users::remove` flips `active`.
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authorize(&user, &[Role::Admin])?;
    crud::delete_one::<Users>(&state.db, &id).await
}
