//! Tour model: catalog item with geospatial start location, waypoints,
//! start dates and guide references.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::crud::Resource;
use crate::db::DbPool;

use super::review::{Review, Reviews};
use super::user::Role;
use super::timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Difficult,
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Difficult => "difficult",
        };
        write!(f, "{}", s)
    }
}

/// Flat tour row; child tables (locations, start dates, guides) are
/// joined in during hydration.
#[derive(Debug, Clone, FromRow)]
pub struct TourRow {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub duration: i64,
    pub max_group_size: i64,
    pub difficulty: Difficulty,
    pub ratings_average: f64,
    pub ratings_quantity: i64,
    pub price: f64,
    pub price_discount: Option<f64>,
    pub summary: String,
    pub description: String,
    pub image_cover: String,
    /// JSON array of gallery filenames
    pub images: String,
    pub secret: bool,
    pub start_lng: Option<f64>,
    pub start_lat: Option<f64>,
    pub start_address: Option<String>,
    pub start_description: Option<String>,
    pub created_at: String,
}

/// GeoJSON-shaped point
#[derive(Debug, Clone, Serialize)]
pub struct GeoPoint {
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// [longitude, latitude]
    pub coordinates: [f64; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Waypoint {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub coordinates: [f64; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<i64>,
}

/// Guide reference expanded at read time
#[derive(Debug, Clone, Serialize)]
pub struct GuideRef {
    pub id: String,
    pub name: String,
    pub photo: String,
    pub role: Role,
}

/// Serialized tour. `durationWeeks` is a read-time projection; `reviews`
/// is reverse-populated only on detail reads.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tour {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub duration: i64,
    pub duration_weeks: f64,
    pub max_group_size: i64,
    pub difficulty: Difficulty,
    pub ratings_average: f64,
    pub ratings_quantity: i64,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_discount: Option<f64>,
    pub summary: String,
    pub description: String,
    pub image_cover: String,
    pub images: Vec<String>,
    pub start_dates: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_location: Option<GeoPoint>,
    pub locations: Vec<Waypoint>,
    pub guides: Vec<GuideRef>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviews: Option<Vec<Review>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationInput {
    /// [longitude, latitude]
    pub coordinates: Vec<f64>,
    pub address: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub day: Option<i64>,
}

impl LocationInput {
    fn validate(&self) -> Result<(), ApiError> {
        if self.coordinates.len() != 2 {
            return Err(ApiError::bad_request(
                "A location must have [longitude, latitude] coordinates",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTour {
    pub name: String,
    pub duration: i64,
    pub max_group_size: i64,
    pub difficulty: Difficulty,
    pub price: f64,
    pub price_discount: Option<f64>,
    #[serde(default)]
    pub summary: String,
    pub description: String,
    pub image_cover: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub start_dates: Vec<String>,
    #[serde(default)]
    pub secret: bool,
    pub start_location: Option<LocationInput>,
    #[serde(default)]
    pub locations: Vec<LocationInput>,
    #[serde(default)]
    pub guides: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTour {
    pub name: Option<String>,
    pub duration: Option<i64>,
    pub max_group_size: Option<i64>,
    pub difficulty: Option<Difficulty>,
    pub price: Option<f64>,
    pub price_discount: Option<f64>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub image_cover: Option<String>,
    pub images: Option<Vec<String>>,
    pub start_dates: Option<Vec<String>>,
    pub secret: Option<bool>,
    pub start_location: Option<LocationInput>,
    pub locations: Option<Vec<LocationInput>>,
    pub guides: Option<Vec<String>>,
}

/// URL-safe, lowercase, hyphenated derivation of a display name.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            slug.push(c.to_ascii_lowercase());
            pending_hyphen = false;
        } else {
            pending_hyphen = true;
        }
    }
    slug
}

fn validate_name(name: &str) -> Result<(), ApiError> {
    let len = name.chars().count();
    if len < 10 {
        return Err(ApiError::bad_request(
            "A tour name must be at least 10 characters long",
        ));
    }
    if len > 40 {
        return Err(ApiError::bad_request(
            "A tour name must be maximum 40 characters long",
        ));
    }
    Ok(())
}

fn sql_placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

async fn store_locations(
    pool: &DbPool,
    tour_id: &str,
    locations: &[LocationInput],
) -> Result<(), ApiError> {
    sqlx::query("DELETE FROM tour_locations WHERE tour_id = ?")
        .bind(tour_id)
        .execute(pool)
        .await?;
    for (position, loc) in locations.iter().enumerate() {
        loc.validate()?;
        sqlx::query(
            "INSERT INTO tour_locations (id, tour_id, lng, lat, address, description, day, position)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(tour_id)
        .bind(loc.coordinates[0])
        .bind(loc.coordinates[1])
        .bind(&loc.address)
        .bind(&loc.description)
        .bind(loc.day)
        .bind(position as i64)
        .execute(pool)
        .await?;
    }
    Ok(())
}

async fn store_start_dates(
    pool: &DbPool,
    tour_id: &str,
    dates: &[String],
) -> Result<(), ApiError> {
    sqlx::query("DELETE FROM tour_start_dates WHERE tour_id = ?")
        .bind(tour_id)
        .execute(pool)
        .await?;
    for date in dates {
        sqlx::query("INSERT OR IGNORE INTO tour_start_dates (tour_id, start_date) VALUES (?, ?)")
            .bind(tour_id)
            .bind(date)
            .execute(pool)
            .await?;
    }
    Ok(())
}

async fn store_guides(pool: &DbPool, tour_id: &str, guides: &[String]) -> Result<(), ApiError> {
    sqlx::query("DELETE FROM tour_guides WHERE tour_id = ?")
        .bind(tour_id)
        .execute(pool)
        .await?;
    for user_id in guides {
        sqlx::query("INSERT OR IGNORE INTO tour_guides (tour_id, user_id) VALUES (?, ?)")
            .bind(tour_id)
            .bind(user_id)
            .execute(pool)
            .await?;
    }
    Ok(())
}

#[derive(FromRow)]
struct LocationRow {
    tour_id: String,
    lng: f64,
    lat: f64,
    address: Option<String>,
    description: Option<String>,
    day: Option<i64>,
}

#[derive(FromRow)]
struct GuideRow {
    tour_id: String,
    id: String,
    name: String,
    photo: String,
    role: Role,
}

/// CRUD descriptor for tours.
pub struct Tours;

impl Tours {
    /// Query-string whitelist: filterable columns plus sort keys.
    pub const FIELDS: &'static [(&'static str, &'static str)] = &[
        ("name", "name"),
        ("slug", "slug"),
        ("duration", "duration"),
        ("maxGroupSize", "max_group_size"),
        ("difficulty", "difficulty"),
        ("ratingsAverage", "ratings_average"),
        ("ratingsQuantity", "ratings_quantity"),
        ("price", "price"),
        ("createdAt", "created_at"),
    ];
}

#[async_trait]
impl Resource for Tours {
    const TABLE: &'static str = "tours";
    const FIELD_MAP: &'static [(&'static str, &'static str)] = Self::FIELDS;
    // Secret tours never appear in list/find results
    const READ_SCOPE: &'static [&'static str] = &["secret = 0"];

    type Row = TourRow;
    type Out = Tour;
    type Create = CreateTour;
    type Update = UpdateTour;

    async fn insert(pool: &DbPool, body: Self::Create) -> Result<Self::Row, ApiError> {
        validate_name(&body.name)?;
        if body.price < 0.0 {
            return Err(ApiError::bad_request("The price cannot be less than 0"));
        }
        // Discount is validated against the price only at creation
        if let Some(discount) = body.price_discount {
            if discount >= body.price {
                return Err(ApiError::bad_request(
                    "Discount price should be below the regular price",
                ));
            }
        }
        if let Some(start) = &body.start_location {
            start.validate()?;
        }

        let row = TourRow {
            id: Uuid::new_v4().to_string(),
            slug: slugify(&body.name),
            name: body.name,
            duration: body.duration,
            max_group_size: body.max_group_size,
            difficulty: body.difficulty,
            ratings_average: 4.5,
            ratings_quantity: 0,
            price: body.price,
            price_discount: body.price_discount,
            summary: body.summary,
            description: body.description,
            image_cover: body.image_cover,
            images: serde_json::to_string(&body.images).unwrap_or_else(|_| "[]".into()),
            secret: body.secret,
            start_lng: body.start_location.as_ref().map(|l| l.coordinates[0]),
            start_lat: body.start_location.as_ref().map(|l| l.coordinates[1]),
            start_address: body.start_location.as_ref().and_then(|l| l.address.clone()),
            start_description: body
                .start_location
                .as_ref()
                .and_then(|l| l.description.clone()),
            created_at: timestamp(),
        };

        sqlx::query(
            "INSERT INTO tours (id, name, slug, duration, max_group_size, difficulty,
                 ratings_average, ratings_quantity, price, price_discount, summary, description,
                 image_cover, images, secret, start_lng, start_lat, start_address,
                 start_description, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.id)
        .bind(&row.name)
        .bind(&row.slug)
        .bind(row.duration)
        .bind(row.max_group_size)
        .bind(row.difficulty)
        .bind(row.ratings_average)
        .bind(row.ratings_quantity)
        .bind(row.price)
        .bind(row.price_discount)
        .bind(&row.summary)
        .bind(&row.description)
        .bind(&row.image_cover)
        .bind(&row.images)
        .bind(row.secret)
        .bind(row.start_lng)
        .bind(row.start_lat)
        .bind(&row.start_address)
        .bind(&row.start_description)
        .bind(&row.created_at)
        .execute(pool)
        .await?;

        store_locations(pool, &row.id, &body.locations).await?;
        store_start_dates(pool, &row.id, &body.start_dates).await?;
        store_guides(pool, &row.id, &body.guides).await?;

        Ok(row)
    }

    async fn apply_update(
        pool: &DbPool,
        row: Self::Row,
        body: Self::Update,
    ) -> Result<Self::Row, ApiError> {
        let name = match body.name {
            Some(name) => {
                validate_name(&name)?;
                name
            }
            None => row.name.clone(),
        };
        // Slug follows the name
        let slug = slugify(&name);

        let (start_lng, start_lat, start_address, start_description) = match &body.start_location {
            Some(start) => {
                start.validate()?;
                (
                    Some(start.coordinates[0]),
                    Some(start.coordinates[1]),
                    start.address.clone(),
                    start.description.clone(),
                )
            }
            None => (
                row.start_lng,
                row.start_lat,
                row.start_address.clone(),
                row.start_description.clone(),
            ),
        };

        let updated = TourRow {
            id: row.id,
            name,
            slug,
            duration: body.duration.unwrap_or(row.duration),
            max_group_size: body.max_group_size.unwrap_or(row.max_group_size),
            difficulty: body.difficulty.unwrap_or(row.difficulty),
            ratings_average: row.ratings_average,
            ratings_quantity: row.ratings_quantity,
            price: body.price.unwrap_or(row.price),
            price_discount: body.price_discount.or(row.price_discount),
            summary: body.summary.unwrap_or(row.summary),
            description: body.description.unwrap_or(row.description),
            image_cover: body.image_cover.unwrap_or(row.image_cover),
            images: match &body.images {
                Some(images) => serde_json::to_string(images).unwrap_or_else(|_| "[]".into()),
                None => row.images,
            },
            secret: body.secret.unwrap_or(row.secret),
            start_lng,
            start_lat,
            start_address,
            start_description,
            created_at: row.created_at,
        };

        sqlx::query(
            "UPDATE tours SET name = ?, slug = ?, duration = ?, max_group_size = ?,
                 difficulty = ?, price = ?, price_discount = ?, summary = ?, description = ?,
                 image_cover = ?, images = ?, secret = ?, start_lng = ?, start_lat = ?,
                 start_address = ?, start_description = ?
             WHERE id = ?",
        )
        .bind(&updated.name)
        .bind(&updated.slug)
        .bind(updated.duration)
        .bind(updated.max_group_size)
        .bind(updated.difficulty)
        .bind(updated.price)
        .bind(updated.price_discount)
        .bind(&updated.summary)
        .bind(&updated.description)
        .bind(&updated.image_cover)
        .bind(&updated.images)
        .bind(updated.secret)
        .bind(updated.start_lng)
        .bind(updated.start_lat)
        .bind(&updated.start_address)
        .bind(&updated.start_description)
        .bind(&updated.id)
        .execute(pool)
        .await?;

        if let Some(locations) = &body.locations {
            store_locations(pool, &updated.id, locations).await?;
        }
        if let Some(dates) = &body.start_dates {
            store_start_dates(pool, &updated.id, dates).await?;
        }
        if let Some(guides) = &body.guides {
            store_guides(pool, &updated.id, guides).await?;
        }

        Ok(updated)
    }

    async fn hydrate(pool: &DbPool, rows: Vec<Self::Row>) -> Result<Vec<Self::Out>, ApiError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        let marks = sql_placeholders(ids.len());

        let mut locations: HashMap<String, Vec<Waypoint>> = HashMap::new();
        let sql = format!(
            "SELECT tour_id, lng, lat, address, description, day FROM tour_locations
             WHERE tour_id IN ({}) ORDER BY position",
            marks
        );
        let mut query = sqlx::query_as::<_, LocationRow>(&sql);
        for id in &ids {
            query = query.bind(*id);
        }
        for loc in query.fetch_all(pool).await? {
            locations.entry(loc.tour_id.clone()).or_default().push(Waypoint {
                kind: "Point",
                coordinates: [loc.lng, loc.lat],
                address: loc.address,
                description: loc.description,
                day: loc.day,
            });
        }

        let mut start_dates: HashMap<String, Vec<String>> = HashMap::new();
        let sql = format!(
            "SELECT tour_id, start_date FROM tour_start_dates
             WHERE tour_id IN ({}) ORDER BY start_date",
            marks
        );
        let mut query = sqlx::query_as::<_, (String, String)>(&sql);
        for id in &ids {
            query = query.bind(*id);
        }
        for (tour_id, date) in query.fetch_all(pool).await? {
            start_dates.entry(tour_id).or_default().push(date);
        }

        // Guides are expanded on every read; inactive users drop out here
        let mut guides: HashMap<String, Vec<GuideRef>> = HashMap::new();
        let sql = format!(
            "SELECT g.tour_id, u.id, u.name, u.photo, u.role
             FROM tour_guides g JOIN users u ON u.id = g.user_id
             WHERE g.tour_id IN ({}) AND u.active = 1",
            marks
        );
        let mut query = sqlx::query_as::<_, GuideRow>(&sql);
        for id in &ids {
            query = query.bind(*id);
        }
        for guide in query.fetch_all(pool).await? {
            guides.entry(guide.tour_id.clone()).or_default().push(GuideRef {
                id: guide.id,
                name: guide.name,
                photo: guide.photo,
                role: guide.role,
            });
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let start_location = match (row.start_lng, row.start_lat) {
                    (Some(lng), Some(lat)) => Some(GeoPoint {
                        kind: "Point",
                        coordinates: [lng, lat],
                        address: row.start_address.clone(),
                        description: row.start_description.clone(),
                    }),
                    _ => None,
                };
                Tour {
                    duration_weeks: row.duration as f64 / 7.0,
                    images: serde_json::from_str(&row.images).unwrap_or_default(),
                    start_dates: start_dates.remove(&row.id).unwrap_or_default(),
                    locations: locations.remove(&row.id).unwrap_or_default(),
                    guides: guides.remove(&row.id).unwrap_or_default(),
                    start_location,
                    id: row.id,
                    name: row.name,
                    slug: row.slug,
                    duration: row.duration,
                    max_group_size: row.max_group_size,
                    difficulty: row.difficulty,
                    ratings_average: row.ratings_average,
                    ratings_quantity: row.ratings_quantity,
                    price: row.price,
                    price_discount: row.price_discount,
                    summary: row.summary,
                    description: row.description,
                    image_cover: row.image_cover,
                    created_at: row.created_at,
                    reviews: None,
                }
            })
            .collect())
    }

    /// Detail reads also carry the tour's reviews (reverse lookup).
    async fn decorate_one(pool: &DbPool, out: &mut Self::Out) -> Result<(), ApiError> {
        let rows = sqlx::query_as::<_, super::review::ReviewRow>(
            "SELECT * FROM reviews WHERE tour_id = ? ORDER BY created_at DESC",
        )
        .bind(&out.id)
        .fetch_all(pool)
        .await?;
        out.reviews = Some(Reviews::hydrate(pool, rows).await?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_examples() {
        assert_eq!(slugify("Forest Hiker"), "forest-hiker");
        assert_eq!(slugify("The Sea Explorer"), "the-sea-explorer");
        assert_eq!(slugify("  Tricky -- Name! "), "tricky-name");
    }

    #[test]
    fn name_length_bounds() {
        assert!(validate_name("short").is_err());
        assert!(validate_name("A perfectly fine tour name").is_ok());
        assert!(validate_name(&"x".repeat(41)).is_err());
    }

    fn sample_create(name: &str) -> CreateTour {
        CreateTour {
            name: name.to_string(),
            duration: 7,
            max_group_size: 15,
            difficulty: Difficulty::Easy,
            price: 397.0,
            price_discount: None,
            summary: "A summary".into(),
            description: "A description".into(),
            image_cover: "cover.jpg".into(),
            images: vec![],
            start_dates: vec!["2026-04-01T09:00:00+00:00".into()],
            secret: false,
            start_location: Some(LocationInput {
                coordinates: vec![-80.185942, 25.774772],
                address: Some("Miami, FL".into()),
                description: Some("Harbor".into()),
                day: None,
            }),
            locations: vec![],
            guides: vec![],
        }
    }

    #[tokio::test]
    async fn insert_generates_slug_and_defaults() {
        let pool = crate::db::test_pool().await;
        let row = Tours::insert(&pool, sample_create("Forest Hiker Tour"))
            .await
            .unwrap();
        assert_eq!(row.slug, "forest-hiker-tour");
        assert_eq!(row.ratings_average, 4.5);
        assert_eq!(row.ratings_quantity, 0);

        let tours = Tours::hydrate(&pool, vec![row]).await.unwrap();
        assert_eq!(tours[0].duration_weeks, 1.0);
        assert_eq!(tours[0].start_dates.len(), 1);
        assert_eq!(
            tours[0].start_location.as_ref().unwrap().coordinates,
            [-80.185942, 25.774772]
        );
    }

    #[tokio::test]
    async fn discount_must_be_below_price_at_creation() {
        let pool = crate::db::test_pool().await;
        let mut body = sample_create("The Sea Explorer Tour");
        body.price_discount = Some(400.0);
        assert!(Tours::insert(&pool, body).await.is_err());
    }

    #[tokio::test]
    async fn rename_recomputes_slug() {
        let pool = crate::db::test_pool().await;
        let row = Tours::insert(&pool, sample_create("Forest Hiker Tour"))
            .await
            .unwrap();
        let updated = Tours::apply_update(
            &pool,
            row,
            UpdateTour {
                name: Some("The Sea Explorer".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.slug, "the-sea-explorer");
    }

    #[tokio::test]
    async fn secret_tours_are_invisible_to_scoped_fetch() {
        let pool = crate::db::test_pool().await;
        let mut body = sample_create("Completely Hidden Tour");
        body.secret = true;
        let row = Tours::insert(&pool, body).await.unwrap();
        assert!(Tours::fetch(&pool, &row.id).await.unwrap().is_none());
    }
}
