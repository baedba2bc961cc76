//! Tour endpoints: factory CRUD plus the aliases, aggregations,
//! geospatial queries and image uploads layered on top.

use axum::{
    extract::{Multipart, Path, Query, State},
    response::Response,
    Json,
};
use futures::future::try_join_all;
use serde::Serialize;
use serde_json::json;
use sqlx::FromRow;
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::auth::{authorize, CurrentUser};
use crate::api::error::ApiError;
use crate::api::respond;
use crate::crud::{self, Resource};
use crate::db::models::{Role, TourRow, Tours, UpdateTour};
use crate::media;
use crate::AppState;

/// Mean earth radius used to turn a surface distance into radians.
const EARTH_RADIUS_MI: f64 = 3963.2;
const EARTH_RADIUS_KM: f64 = 6378.1;
/// Central-angle radians to meters
const EARTH_RADIUS_M: f64 = 6_378_100.0;
const METERS_TO_MI: f64 = 0.000621371;
const METERS_TO_KM: f64 = 0.001;

pub async fn list_tours(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    crud::get_all::<Tours>(&state.db, &params, None).await
}

/// Alias for the five highest-rated cheap tours.
pub async fn top_tours(
    State(state): State<Arc<AppState>>,
    Query(mut params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    params.insert("limit".to_string(), "5".to_string());
    params.insert("sort".to_string(), "-ratingsAverage,price".to_string());
    crud::get_all::<Tours>(&state.db, &params, None).await
}

pub async fn get_tour(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    crud::get_one::<Tours>(&state.db, &id).await
}

pub async fn get_tour_by_slug(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Response, ApiError> {
    let row: Option<TourRow> =
        sqlx::query_as("SELECT * FROM tours WHERE slug = ? AND secret = 0")
            .bind(&slug)
            .fetch_optional(&state.db)
            .await?;
    let row = row.ok_or_else(|| ApiError::not_found("There is no tour with that name."))?;
    let id = row.id.clone();
    crud::get_one::<Tours>(&state.db, &id).await
}

pub async fn create_tour(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    authorize(&user, &[Role::Admin, Role::LeadGuide])?;
    let body = serde_json::from_value(body)
        .map_err(|e| ApiError::bad_request("Invalid tour data").with_detail(e.to_string()))?;
    crud::create_one::<Tours>(&state.db, body).await
}

pub async fn update_tour(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateTour>,
) -> Result<Response, ApiError> {
    authorize(&user, &[Role::Admin, Role::LeadGuide])?;
    crud::update_one::<Tours>(&state.db, &id, body).await
}

pub async fn delete_tour(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authorize(&user, &[Role::Admin, Role::LeadGuide])?;
    crud::delete_one::<Tours>(&state.db, &id).await
}

/// Accepts an `imageCover` part and up to three `images` parts, resizes
/// them all concurrently, then updates the tour's image columns.
pub async fn upload_tour_images(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    authorize(&user, &[Role::Admin, Role::LeadGuide])?;

    let row = Tours::fetch(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("No document found with this ID"))?;

    let uploads = media::collect_images(&mut multipart).await?;
    let dir = state.config.server.public_dir.join("img/tours");

    let mut cover_name: Option<String> = None;
    let mut gallery_names: Vec<String> = Vec::new();
    let mut jobs = Vec::new();

    for upload in uploads {
        let name = match upload.field.as_str() {
            "imageCover" => {
                let name = media::tour_cover_name(&id);
                cover_name = Some(name.clone());
                name
            }
            "images" => {
                if gallery_names.len() >= 3 {
                    return Err(ApiError::bad_request(
                        "A tour can have at most 3 gallery images",
                    ));
                }
                let name = media::tour_image_name(&id, gallery_names.len());
                gallery_names.push(name.clone());
                name
            }
            other => {
                return Err(ApiError::bad_request(format!(
                    "Unexpected upload field '{}'",
                    other
                )))
            }
        };
        jobs.push(media::save_resized(
            upload.data,
            media::TOUR_IMAGE_WIDTH,
            media::TOUR_IMAGE_HEIGHT,
            dir.join(&name),
        ));
    }

    // Every resize completes before the tour record changes
    try_join_all(jobs).await?;

    let cover = cover_name.unwrap_or(row.image_cover);
    let images = if gallery_names.is_empty() {
        row.images
    } else {
        serde_json::to_string(&gallery_names).unwrap_or_else(|_| "[]".into())
    };
    sqlx::query("UPDATE tours SET image_cover = ?, images = ? WHERE id = ?")
        .bind(&cover)
        .bind(&images)
        .bind(&id)
        .execute(&state.db)
        .await?;

    crud::get_one::<Tours>(&state.db, &id).await
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
struct TourStats {
    difficulty: String,
    num_tours: i64,
    num_ratings: i64,
    avg_rating: f64,
    avg_price: f64,
    min_price: f64,
    max_price: f64,
}

/// Per-difficulty statistics over well-rated tours.
pub async fn tour_stats(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let stats: Vec<TourStats> = sqlx::query_as(
        "SELECT UPPER(difficulty) AS difficulty,
                COUNT(*) AS num_tours,
                COALESCE(SUM(ratings_quantity), 0) AS num_ratings,
                AVG(ratings_average) AS avg_rating,
                AVG(price) AS avg_price,
                MIN(price) AS min_price,
                MAX(price) AS max_price
         FROM tours
         WHERE ratings_average >= 4.5 AND secret = 0
         GROUP BY difficulty
         ORDER BY avg_price",
    )
    .fetch_all(&state.db)
    .await?;

    Ok(respond::success(json!({ "stats": stats })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MonthlyPlanEntry {
    month: i64,
    num_tour_starts: i64,
    tours: Vec<String>,
}

/// Busiest months of a given year, counted over tour start dates.
pub async fn monthly_plan(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(year): Path<i64>,
) -> Result<Response, ApiError> {
    authorize(&user, &[Role::Admin, Role::LeadGuide, Role::Guide])?;

    let rows: Vec<(i64, String)> = sqlx::query_as(
        "SELECT CAST(strftime('%m', d.start_date) AS INTEGER) AS month, t.name
         FROM tour_start_dates d
         JOIN tours t ON t.id = d.tour_id
         WHERE strftime('%Y', d.start_date) = ? AND t.secret = 0",
    )
    .bind(year.to_string())
    .fetch_all(&state.db)
    .await?;

    Ok(respond::success(json!({ "plan": fold_monthly_plan(rows) })))
}

/// Group (month, tour name) start rows into per-month entries, busiest
/// month first.
fn fold_monthly_plan(rows: Vec<(i64, String)>) -> Vec<MonthlyPlanEntry> {
    let mut months: std::collections::BTreeMap<i64, Vec<String>> = std::collections::BTreeMap::new();
    for (month, name) in rows {
        months.entry(month).or_default().push(name);
    }
    let mut plan: Vec<MonthlyPlanEntry> = months
        .into_iter()
        .map(|(month, tours)| MonthlyPlanEntry {
            month,
            num_tour_starts: tours.len() as i64,
            tours,
        })
        .collect();
    plan.sort_by(|a, b| b.num_tour_starts.cmp(&a.num_tour_starts));
    plan
}

fn parse_latlng(raw: &str) -> Result<(f64, f64), ApiError> {
    let mut parts = raw.split(',');
    let lat = parts.next().and_then(|p| p.trim().parse::<f64>().ok());
    let lng = parts.next().and_then(|p| p.trim().parse::<f64>().ok());
    match (lat, lng, parts.next()) {
        (Some(lat), Some(lng), None) => Ok((lat, lng)),
        _ => Err(ApiError::bad_request(
            "Please provide latitude and longitude in the format lat,lng.",
        )),
    }
}

/// Central angle in radians between two points on the sphere.
fn central_angle(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let half_dlat = ((lat2 - lat1).to_radians() / 2.0).sin();
    let half_dlng = ((lng2 - lng1).to_radians() / 2.0).sin();
    let a = half_dlat * half_dlat
        + lat1.to_radians().cos() * lat2.to_radians().cos() * half_dlng * half_dlng;
    2.0 * a.sqrt().asin()
}

/// GET /tours-within/:distance/center/:latlng/unit/:unit
pub async fn tours_within(
    State(state): State<Arc<AppState>>,
    Path((distance, latlng, unit)): Path<(f64, String, String)>,
) -> Result<Response, ApiError> {
    let (lat, lng) = parse_latlng(&latlng)?;
    let earth_radius = if unit == "mi" {
        EARTH_RADIUS_MI
    } else {
        EARTH_RADIUS_KM
    };
    let radius = distance / earth_radius;

    let rows: Vec<TourRow> = sqlx::query_as(
        "SELECT * FROM tours WHERE secret = 0 AND start_lat IS NOT NULL AND start_lng IS NOT NULL",
    )
    .fetch_all(&state.db)
    .await?;

    let nearby: Vec<TourRow> = rows
        .into_iter()
        .filter(|row| match (row.start_lat, row.start_lng) {
            (Some(tour_lat), Some(tour_lng)) => {
                central_angle(lat, lng, tour_lat, tour_lng) <= radius
            }
            _ => false,
        })
        .collect();

    let tours = Tours::hydrate(&state.db, nearby).await?;
    let results = tours.len();
    Ok(respond::success_list(results, tours))
}

#[derive(Debug, Serialize)]
struct TourDistance {
    id: String,
    name: String,
    distance: f64,
}

/// GET /distances/:latlng/unit/:unit
pub async fn distances(
    State(state): State<Arc<AppState>>,
    Path((latlng, unit)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let (lat, lng) = parse_latlng(&latlng)?;
    let multiplier = if unit == "mi" {
        METERS_TO_MI
    } else {
        METERS_TO_KM
    };

    let rows: Vec<TourRow> = sqlx::query_as(
        "SELECT * FROM tours WHERE secret = 0 AND start_lat IS NOT NULL AND start_lng IS NOT NULL",
    )
    .fetch_all(&state.db)
    .await?;

    let mut entries: Vec<TourDistance> = rows
        .into_iter()
        .filter_map(|row| match (row.start_lat, row.start_lng) {
            (Some(tour_lat), Some(tour_lng)) => {
                let meters = central_angle(lat, lng, tour_lat, tour_lng) * EARTH_RADIUS_M;
                Some(TourDistance {
                    id: row.id,
                    name: row.name,
                    distance: meters * multiplier,
                })
            }
            _ => None,
        })
        .collect();
    entries.sort_by(|a, b| a.distance.total_cmp(&b.distance));

    Ok(respond::success(entries))
}

/// Tours the calling user has paid bookings for.
pub async fn booked_tours(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Response, ApiError> {
    let rows: Vec<TourRow> = sqlx::query_as(
        "SELECT t.* FROM tours t
         JOIN bookings b ON b.tour_id = t.id
         WHERE b.user_id = ? AND b.paid = 1 AND b.status = 'completed'
         ORDER BY t.name",
    )
    .bind(&user.id)
    .fetch_all(&state.db)
    .await?;

    let tours = Tours::hydrate(&state.db, rows).await?;
    let results = tours.len();
    Ok(respond::success_list(results, tours))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latlng_parsing() {
        assert_eq!(parse_latlng("34.111745,-118.113491").unwrap(), (34.111745, -118.113491));
        assert!(parse_latlng("34.111745").is_err());
        assert!(parse_latlng("lat,lng").is_err());
        assert!(parse_latlng("1,2,3").is_err());
    }

    #[test]
    fn monthly_plan_groups_and_preserves_names() {
        let rows = vec![
            (7, "Forest | Hiker Special".to_string()),
            (7, "The Sea Explorer".to_string()),
            (3, "The Snow Adventurer".to_string()),
        ];
        let plan = fold_monthly_plan(rows);
        assert_eq!(plan[0].month, 7);
        assert_eq!(plan[0].num_tour_starts, 2);
        assert!(plan[0].tours.contains(&"Forest | Hiker Special".to_string()));
        assert_eq!(plan[1].month, 3);
        assert_eq!(plan[1].num_tour_starts, 1);
    }

    #[test]
    fn central_angle_of_identical_points_is_zero() {
        assert_eq!(central_angle(40.0, -105.0, 40.0, -105.0), 0.0);
    }

    #[test]
    fn central_angle_matches_known_distance() {
        // Los Angeles to New York, roughly 3944 km surface distance
        let angle = central_angle(34.0522, -118.2437, 40.7128, -74.0060);
        let km = angle * EARTH_RADIUS_M * METERS_TO_KM;
        assert!((km - 3944.0).abs() < 50.0, "got {} km", km);
    }

    #[test]
    fn radius_uses_unit_specific_earth_radius() {
        let mi = 200.0 / EARTH_RADIUS_MI;
        let km = 200.0 / EARTH_RADIUS_KM;
        assert!(mi > km);
    }
}
