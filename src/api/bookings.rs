//! Booking endpoints: checkout session creation against the injected
//! payment provider, plus factory CRUD for staff.

use axum::{
    extract::{Path, Query, State},
    response::Response,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::auth::{authorize, CurrentUser};
use crate::api::error::ApiError;
use crate::api::respond;
use crate::crud::{self, Resource};
use crate::db::models::{Bookings, CreateBooking, Role, Tours, UpdateBooking};
use crate::payments::SessionRequest;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub tour_id: String,
    /// Site origin the provider redirects back to
    pub callback_url: String,
}

/// Creates a pending booking and opens a checkout session for it. The
/// booking id rides along as the provider's client reference and comes
/// back in the completion webhook.
pub async fn checkout_session(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<Response, ApiError> {
    let tour = Tours::fetch(&state.db, &request.tour_id)
        .await?
        .ok_or_else(|| ApiError::bad_request("No tour found with this ID"))?;

    // Price is snapshotted at booking time
    let booking = Bookings::insert(
        &state.db,
        CreateBooking {
            tour: tour.id.clone(),
            user: user.id.clone(),
            price: tour.price,
        },
    )
    .await?;

    let base = request.callback_url.trim_end_matches('/');
    let session = state
        .payments
        .create_session(SessionRequest {
            client_reference_id: booking.id.clone(),
            customer_email: user.email.clone(),
            product_name: format!("{} Tour", tour.name),
            product_description: tour.summary.clone(),
            product_image: Some(format!("{}/img/tours/{}", base, tour.image_cover)),
            amount_cents: (tour.price * 100.0).round() as i64,
            currency: state.config.payments.currency.clone(),
            success_url: format!("{}/my-tours?alert=booking&booking={}", base, booking.id),
            cancel_url: format!("{}/tour/{}", base, tour.slug),
        })
        .await
        .map_err(|e| {
            ApiError::internal("Failed to create checkout session").with_detail(e.to_string())
        })?;

    Ok(respond::success(json!({
        "checkoutSessionId": session.id,
        "checkoutUrl": session.url,
        "bookingId": booking.id,
    })))
}

pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user): CurrentUser,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    crud::get_all::<Bookings>(&state.db, &params, None).await
}

pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    crud::get_one::<Bookings>(&state.db, &id).await
}

pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<CreateBooking>,
) -> Result<Response, ApiError> {
    authorize(&user, &[Role::Admin, Role::LeadGuide])?;
    crud::create_one::<Bookings>(&state.db, body).await
}

pub async fn update_booking(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateBooking>,
) -> Result<Response, ApiError> {
    authorize(&user, &[Role::Admin, Role::LeadGuide])?;
    crud::update_one::<Bookings>(&state.db, &id, body).await
}

pub async fn delete_booking(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authorize(&user, &[Role::Admin, Role::LeadGuide])?;
    crud::delete_one::<Bookings>(&state.db, &id).await
}
