pub mod auth;
mod bookings;
pub mod error;
pub mod rate_limit;
pub mod respond;
mod reviews;
mod tours;
mod users;
mod webhooks;

use axum::{
    http::Uri,
    middleware,
    response::Response,
    routing::{delete, get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::AppState;
use error::ApiError;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Credential endpoints get the tight rate limit tier
    let auth_routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login))
        .route("/logout", get(auth::logout))
        .route("/forgot-password", post(auth::forgot_password))
        .route("/reset-password/:token", patch(auth::reset_password))
        .route("/update-password", patch(auth::update_password))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::limit_auth,
        ));

    let user_routes = Router::new()
        .route("/me", get(users::get_me))
        .route("/update-me", patch(users::update_me))
        .route("/me/photo", patch(users::upload_my_photo))
        .route("/delete-me", delete(users::delete_me))
        .route("/my-reviews", get(reviews::my_reviews))
        // Admin account management
        .route("/", get(users::list_users))
        .route("/", post(users::create_user))
        .route("/:id", get(users::get_user))
        .route("/:id", patch(users::update_user))
        .route("/:id", delete(users::delete_user))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::limit_api,
        ))
        .merge(auth_routes);

    let tour_routes = Router::new()
        .route("/", get(tours::list_tours))
        .route("/", post(tours::create_tour))
        .route("/top-5-cheap", get(tours::top_tours))
        .route("/stats", get(tours::tour_stats))
        .route("/monthly-plan/:year", get(tours::monthly_plan))
        .route(
            "/tours-within/:distance/center/:latlng/unit/:unit",
            get(tours::tours_within),
        )
        .route("/distances/:latlng/unit/:unit", get(tours::distances))
        .route("/slug/:slug", get(tours::get_tour_by_slug))
        .route("/booked", get(tours::booked_tours))
        .route("/:id", get(tours::get_tour))
        .route("/:id", patch(tours::update_tour))
        .route("/:id", delete(tours::delete_tour))
        .route("/:id/images", patch(tours::upload_tour_images))
        // Nested review mount; tour id is taken from the path
        .route("/:id/reviews", get(reviews::list_reviews))
        .route("/:id/reviews", post(reviews::create_review))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::limit_api,
        ));

    let review_routes = Router::new()
        .route("/", get(reviews::list_reviews))
        .route("/", post(reviews::create_review))
        .route("/:id", get(reviews::get_review))
        .route("/:id", patch(reviews::update_review))
        .route("/:id", delete(reviews::delete_review))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::limit_api,
        ));

    let booking_routes = Router::new()
        .route("/checkout-session", post(bookings::checkout_session))
        .route("/", get(bookings::list_bookings))
        .route("/", post(bookings::create_booking))
        .route("/:id", get(bookings::get_booking))
        .route("/:id", patch(bookings::update_booking))
        .route("/:id", delete(bookings::delete_booking))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::limit_api,
        ));

    // The payment webhook authenticates by signature, never by session,
    // and therefore lives outside the user-facing routers.
    let webhook_routes = Router::new()
        .route("/payments", post(webhooks::payment_webhook))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::limit_webhook,
        ));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1/users", user_routes)
        .nest("/api/v1/tours", tour_routes)
        .nest("/api/v1/reviews", review_routes)
        .nest("/api/v1/bookings", booking_routes)
        .nest("/webhooks", webhook_routes)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn not_found(uri: Uri) -> Response {
    use axum::response::IntoResponse;
    ApiError::not_found(format!("Can't find {} on this server!", uri.path())).into_response()
}
