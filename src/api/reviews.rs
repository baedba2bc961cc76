//! Review endpoints, mounted both flat (`/reviews`) and nested under a
//! tour (`/tours/:tour_id/reviews`). On the nested mount the tour id
//! comes from the URL; the author is always the authenticated user.

use axum::{
    extract::{Path, Query, State},
    response::Response,
    Json,
};
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::auth::{authorize, CurrentUser};
use crate::api::error::ApiError;
use crate::crud;
use crate::db::models::{CreateReview, Reviews, Role, UpdateReview};
use crate::AppState;

pub async fn list_reviews(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user): CurrentUser,
    tour: Option<Path<String>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let tour_id = tour.map(|Path(id)| id);
    let parent = tour_id.as_deref().map(|id| ("tour_id", id));
    crud::get_all::<Reviews>(&state.db, &params, parent).await
}

/// Reviews written by the calling user.
pub async fn my_reviews(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    crud::get_all::<Reviews>(&state.db, &params, Some(("user_id", &user.id))).await
}

pub async fn get_review(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    crud::get_one::<Reviews>(&state.db, &id).await
}

/// Only regular users write reviews; staff roles are rejected.
pub async fn create_review(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    tour: Option<Path<String>>,
    Json(mut body): Json<CreateReview>,
) -> Result<Response, ApiError> {
    authorize(&user, &[Role::User])?;
    if body.tour.is_none() {
        body.tour = tour.map(|Path(id)| id);
    }
    body.user = Some(user.id.clone());
    crud::create_one::<Reviews>(&state.db, body).await
}

pub async fn update_review(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateReview>,
) -> Result<Response, ApiError> {
    authorize(&user, &[Role::User, Role::Admin])?;
    crud::update_one::<Reviews>(&state.db, &id, body).await
}

pub async fn delete_review(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authorize(&user, &[Role::User, Role::Admin])?;
    crud::delete_one::<Reviews>(&state.db, &id).await
}
