//! Review model. Writing or deleting a review recomputes the parent
//! tour's rating statistics.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::crud::Resource;
use crate::db::DbPool;

use super::timestamp;

#[derive(Debug, Clone, FromRow)]
pub struct ReviewRow {
    pub id: String,
    pub review: String,
    pub rating: f64,
    pub tour_id: String,
    pub user_id: String,
    pub created_at: String,
}

/// Author reference expanded at read time.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewAuthor {
    pub id: String,
    pub name: String,
    pub photo: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: String,
    pub review: String,
    pub rating: f64,
    pub tour: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<ReviewAuthor>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateReview {
    pub review: String,
    pub rating: f64,
    /// Filled from the URL on nested routes
    pub tour: Option<String>,
    /// Always overwritten with the authenticated user
    pub user: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateReview {
    pub review: Option<String>,
    pub rating: Option<f64>,
}

fn validate_rating(rating: f64) -> Result<(), ApiError> {
    if !(1.0..=5.0).contains(&rating) {
        return Err(ApiError::bad_request("Rating must be between 1.0 and 5.0"));
    }
    Ok(())
}

/// Recompute a tour's average rating and count from its reviews.
/// With no reviews left, the tour falls back to the catalog defaults.
pub async fn recalc_tour_ratings(pool: &DbPool, tour_id: &str) -> Result<(), ApiError> {
    let (count, avg): (i64, Option<f64>) =
        sqlx::query_as("SELECT COUNT(*), AVG(rating) FROM reviews WHERE tour_id = ?")
            .bind(tour_id)
            .fetch_one(pool)
            .await?;

    let (quantity, average) = match avg {
        Some(avg) if count > 0 => (count, (avg * 10.0).round() / 10.0),
        _ => (0, 4.5),
    };

    sqlx::query("UPDATE tours SET ratings_quantity = ?, ratings_average = ? WHERE id = ?")
        .bind(quantity)
        .bind(average)
        .bind(tour_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// CRUD descriptor for reviews.
pub struct Reviews;

#[async_trait]
impl Resource for Reviews {
    const TABLE: &'static str = "reviews";
    const FIELD_MAP: &'static [(&'static str, &'static str)] = &[
        ("rating", "rating"),
        ("createdAt", "created_at"),
        ("tour", "tour_id"),
        ("user", "user_id"),
    ];

    type Row = ReviewRow;
    type Out = Review;
    type Create = CreateReview;
    type Update = UpdateReview;

    async fn insert(pool: &DbPool, body: Self::Create) -> Result<Self::Row, ApiError> {
        validate_rating(body.rating)?;
        let tour_id = body
            .tour
            .ok_or_else(|| ApiError::bad_request("Review must belong to a tour"))?;
        let user_id = body
            .user
            .ok_or_else(|| ApiError::bad_request("Review must belong to a user"))?;
        if body.review.trim().is_empty() {
            return Err(ApiError::bad_request("Review can not be empty"));
        }

        let row = ReviewRow {
            id: Uuid::new_v4().to_string(),
            review: body.review,
            rating: body.rating,
            tour_id,
            user_id,
            created_at: timestamp(),
        };

        // UNIQUE(tour_id, user_id) rejects a second review for the same tour
        sqlx::query(
            "INSERT INTO reviews (id, review, rating, tour_id, user_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.id)
        .bind(&row.review)
        .bind(row.rating)
        .bind(&row.tour_id)
        .bind(&row.user_id)
        .bind(&row.created_at)
        .execute(pool)
        .await?;

        Ok(row)
    }

    async fn apply_update(
        pool: &DbPool,
        row: Self::Row,
        body: Self::Update,
    ) -> Result<Self::Row, ApiError> {
        if let Some(rating) = body.rating {
            validate_rating(rating)?;
        }
        let mut updated = row;
        if let Some(review) = body.review {
            updated.review = review;
        }
        if let Some(rating) = body.rating {
            updated.rating = rating;
        }

        sqlx::query("UPDATE reviews SET review = ?, rating = ? WHERE id = ?")
            .bind(&updated.review)
            .bind(updated.rating)
            .bind(&updated.id)
            .execute(pool)
            .await?;

        Ok(updated)
    }

    async fn hydrate(pool: &DbPool, rows: Vec<Self::Row>) -> Result<Vec<Self::Out>, ApiError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<&str> = rows.iter().map(|r| r.user_id.as_str()).collect();
        let marks = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT id, name, photo FROM users WHERE id IN ({})",
            marks
        );
        let mut query = sqlx::query_as::<_, (String, String, String)>(&sql);
        for id in &ids {
            query = query.bind(*id);
        }
        let mut authors: HashMap<String, ReviewAuthor> = HashMap::new();
        for (id, name, photo) in query.fetch_all(pool).await? {
            authors.insert(id.clone(), ReviewAuthor { id, name, photo });
        }

        Ok(rows
            .into_iter()
            .map(|row| Review {
                user: authors.get(&row.user_id).cloned(),
                id: row.id,
                review: row.review,
                rating: row.rating,
                tour: row.tour_id,
                created_at: row.created_at,
            })
            .collect())
    }

    async fn after_write(pool: &DbPool, row: &Self::Row) -> Result<(), ApiError> {
        recalc_tour_ratings(pool, &row.tour_id).await
    }

    async fn after_delete(pool: &DbPool, row: &Self::Row) -> Result<(), ApiError> {
        recalc_tour_ratings(pool, &row.tour_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::tour::{CreateTour, Difficulty, Tours};

    fn review_body(tour: &str, user: &str, rating: f64) -> CreateReview {
        CreateReview {
            review: "Loved every minute".into(),
            rating,
            tour: Some(tour.to_string()),
            user: Some(user.to_string()),
        }
    }

    async fn seed_user(pool: &DbPool, id: &str) {
        sqlx::query(
            "INSERT INTO users (id, name, email, password_hash, role, photo, active, created_at, updated_at)
             VALUES (?, ?, ?, 'x', 'user', 'default.jpg', 1, ?, ?)",
        )
        .bind(id)
        .bind(format!("User {}", id))
        .bind(format!("{}@example.com", id))
        .bind(timestamp())
        .bind(timestamp())
        .execute(pool)
        .await
        .unwrap();
    }

    async fn seed_tour(pool: &DbPool) -> String {
        let row = Tours::insert(
            pool,
            CreateTour {
                name: "Review Target Tour".into(),
                duration: 5,
                max_group_size: 10,
                difficulty: Difficulty::Easy,
                price: 297.0,
                price_discount: None,
                summary: String::new(),
                description: "desc".into(),
                image_cover: "cover.jpg".into(),
                images: vec![],
                start_dates: vec![],
                secret: false,
                start_location: None,
                locations: vec![],
                guides: vec![],
            },
        )
        .await
        .unwrap();
        row.id
    }

    #[test]
    fn rating_bounds() {
        assert!(validate_rating(0.9).is_err());
        assert!(validate_rating(1.0).is_ok());
        assert!(validate_rating(5.0).is_ok());
        assert!(validate_rating(5.1).is_err());
    }

    #[tokio::test]
    async fn writes_recompute_tour_statistics() {
        let pool = crate::db::test_pool().await;
        let tour = seed_tour(&pool).await;
        seed_user(&pool, "u1").await;
        seed_user(&pool, "u2").await;

        let first = Reviews::insert(&pool, review_body(&tour, "u1", 4.0))
            .await
            .unwrap();
        Reviews::after_write(&pool, &first).await.unwrap();
        let second = Reviews::insert(&pool, review_body(&tour, "u2", 5.0))
            .await
            .unwrap();
        Reviews::after_write(&pool, &second).await.unwrap();

        let (qty, avg): (i64, f64) =
            sqlx::query_as("SELECT ratings_quantity, ratings_average FROM tours WHERE id = ?")
                .bind(&tour)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(qty, 2);
        assert_eq!(avg, 4.5);
    }

    #[tokio::test]
    async fn deleting_last_review_restores_defaults() {
        let pool = crate::db::test_pool().await;
        let tour = seed_tour(&pool).await;
        seed_user(&pool, "u1").await;

        let row = Reviews::insert(&pool, review_body(&tour, "u1", 2.0))
            .await
            .unwrap();
        Reviews::after_write(&pool, &row).await.unwrap();
        let removed = Reviews::remove(&pool, &row.id).await.unwrap().unwrap();
        Reviews::after_delete(&pool, &removed).await.unwrap();

        let (qty, avg): (i64, f64) =
            sqlx::query_as("SELECT ratings_quantity, ratings_average FROM tours WHERE id = ?")
                .bind(&tour)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(qty, 0);
        assert_eq!(avg, 4.5);
    }

    #[tokio::test]
    async fn second_review_for_same_tour_is_rejected() {
        let pool = crate::db::test_pool().await;
        let tour = seed_tour(&pool).await;
        seed_user(&pool, "u1").await;

        Reviews::insert(&pool, review_body(&tour, "u1", 4.0))
            .await
            .unwrap();
        let err = Reviews::insert(&pool, review_body(&tour, "u1", 3.0))
            .await
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
