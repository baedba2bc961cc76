//! Booking model. A booking is created in `pending` state when a checkout
//! session is opened and settles to `completed` when the payment webhook
//! confirms it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::crud::Resource;
use crate::db::DbPool;

use super::timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, FromRow)]
pub struct BookingRow {
    pub id: String,
    pub tour_id: String,
    pub user_id: String,
    pub price: f64,
    pub paid: bool,
    pub status: BookingStatus,
    pub finished_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookedTourRef {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub price: f64,
    pub image_cover: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingUserRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tour: Option<BookedTourRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<BookingUserRef>,
    pub price: f64,
    pub paid: bool,
    pub status: BookingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateBooking {
    pub tour: String,
    pub user: String,
    pub price: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateBooking {
    pub price: Option<f64>,
    pub paid: Option<bool>,
    pub status: Option<BookingStatus>,
}

/// Settle a booking after a confirmed payment. Returns false when the
/// referenced booking does not exist.
pub async fn settle_booking(pool: &DbPool, booking_id: &str) -> Result<bool, ApiError> {
    let result = sqlx::query(
        "UPDATE bookings SET paid = 1, status = 'completed', finished_at = ? WHERE id = ?",
    )
    .bind(timestamp())
    .bind(booking_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// CRUD descriptor for bookings.
pub struct Bookings;

#[async_trait]
impl Resource for Bookings {
    const TABLE: &'static str = "bookings";
    const FIELD_MAP: &'static [(&'static str, &'static str)] = &[
        ("tour", "tour_id"),
        ("user", "user_id"),
        ("price", "price"),
        ("paid", "paid"),
        ("status", "status"),
        ("createdAt", "created_at"),
    ];

    type Row = BookingRow;
    type Out = Booking;
    type Create = CreateBooking;
    type Update = UpdateBooking;

    async fn insert(pool: &DbPool, body: Self::Create) -> Result<Self::Row, ApiError> {
        let row = BookingRow {
            id: Uuid::new_v4().to_string(),
            tour_id: body.tour,
            user_id: body.user,
            price: body.price,
            paid: false,
            status: BookingStatus::Pending,
            finished_at: None,
            created_at: timestamp(),
        };

        sqlx::query(
            "INSERT INTO bookings (id, tour_id, user_id, price, paid, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.id)
        .bind(&row.tour_id)
        .bind(&row.user_id)
        .bind(row.price)
        .bind(row.paid)
        .bind(row.status)
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
        let mut updated = BookingRow {
            price: body.price.unwrap_or(row.price),
            paid: body.paid.unwrap_or(row.paid),
            status: body.status.unwrap_or(row.status),
            ..row
        };
        // A completed booking always carries a completion timestamp and
        // counts as paid, whether it got there via webhook or admin edit
        if updated.status == BookingStatus::Completed && updated.finished_at.is_none() {
            updated.paid = true;
            updated.finished_at = Some(timestamp());
        }

        sqlx::query("UPDATE bookings SET price = ?, paid = ?, status = ?, finished_at = ? WHERE id = ?")
            .bind(updated.price)
            .bind(updated.paid)
            .bind(updated.status)
            .bind(&updated.finished_at)
            .bind(&updated.id)
            .execute(pool)
            .await?;

        Ok(updated)
    }

    async fn hydrate(pool: &DbPool, rows: Vec<Self::Row>) -> Result<Vec<Self::Out>, ApiError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let tour_ids: Vec<&str> = rows.iter().map(|r| r.tour_id.as_str()).collect();
        let marks = vec!["?"; tour_ids.len()].join(", ");
        // Purchased tours stay visible on bookings even if later marked secret
        let sql = format!(
            "SELECT id, name, slug, price, image_cover FROM tours WHERE id IN ({})",
            marks
        );
        let mut query = sqlx::query_as::<_, (String, String, String, f64, String)>(&sql);
        for id in &tour_ids {
            query = query.bind(*id);
        }
        let mut tours: HashMap<String, BookedTourRef> = HashMap::new();
        for (id, name, slug, price, image_cover) in query.fetch_all(pool).await? {
            tours.insert(
                id.clone(),
                BookedTourRef {
                    id,
                    name,
                    slug,
                    price,
                    image_cover,
                },
            );
        }

        let user_ids: Vec<&str> = rows.iter().map(|r| r.user_id.as_str()).collect();
        let marks = vec!["?"; user_ids.len()].join(", ");
        let sql = format!("SELECT id, name FROM users WHERE id IN ({})", marks);
        let mut query = sqlx::query_as::<_, (String, String)>(&sql);
        for id in &user_ids {
            query = query.bind(*id);
        }
        let mut users: HashMap<String, BookingUserRef> = HashMap::new();
        for (id, name) in query.fetch_all(pool).await? {
            users.insert(id.clone(), BookingUserRef { id, name });
        }

        Ok(rows
            .into_iter()
            .map(|row| Booking {
                tour: tours.get(&row.tour_id).cloned(),
                user: users.get(&row.user_id).cloned(),
                id: row.id,
                price: row.price,
                paid: row.paid,
                status: row.status,
                finished_at: row.finished_at,
                created_at: row.created_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed(pool: &DbPool) -> (String, String) {
        sqlx::query(
            "INSERT INTO users (id, name, email, password_hash, created_at, updated_at)
             VALUES ('u1', 'Traveler', 'traveler@example.com', 'x', ?, ?)",
        )
        .bind(timestamp())
        .bind(timestamp())
        .execute(pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO tours (id, name, slug, duration, max_group_size, difficulty, price,
                 description, image_cover, created_at)
             VALUES ('t1', 'Bookable Tour', 'bookable-tour', 3, 8, 'easy', 199.0,
                 'desc', 'cover.jpg', ?)",
        )
        .bind(timestamp())
        .execute(pool)
        .await
        .unwrap();
        ("t1".into(), "u1".into())
    }

    #[tokio::test]
    async fn new_booking_starts_pending_and_unpaid() {
        let pool = crate::db::test_pool().await;
        let (tour, user) = seed(&pool).await;
        let row = Bookings::insert(&pool, CreateBooking { tour, user, price: 199.0 })
            .await
            .unwrap();
        assert!(!row.paid);
        assert_eq!(row.status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn settle_marks_paid_and_completed() {
        let pool = crate::db::test_pool().await;
        let (tour, user) = seed(&pool).await;
        let row = Bookings::insert(&pool, CreateBooking { tour, user, price: 199.0 })
            .await
            .unwrap();

        assert!(settle_booking(&pool, &row.id).await.unwrap());
        assert!(!settle_booking(&pool, "missing").await.unwrap());

        let settled = Bookings::fetch(&pool, &row.id).await.unwrap().unwrap();
        assert!(settled.paid);
        assert_eq!(settled.status, BookingStatus::Completed);
        assert!(settled.finished_at.is_some());
    }

    #[tokio::test]
    async fn admin_completion_sets_paid_and_timestamp() {
        let pool = crate::db::test_pool().await;
        let (tour, user) = seed(&pool).await;
        let row = Bookings::insert(&pool, CreateBooking { tour, user, price: 199.0 })
            .await
            .unwrap();

        let body = UpdateBooking {
            price: None,
            paid: None,
            status: Some(BookingStatus::Completed),
        };
        let updated = Bookings::apply_update(&pool, row, body).await.unwrap();
        assert!(updated.paid);
        assert!(updated.finished_at.is_some());

        let stored = Bookings::fetch(&pool, &updated.id).await.unwrap().unwrap();
        assert!(stored.paid);
        assert_eq!(stored.finished_at, updated.finished_at);
    }

    // The checkout flow persists the booking before the provider session
    // opens, so a success redirect only displays it; settlement happens
    // once, through the webhook, and tolerates redelivery.
    #[tokio::test]
    async fn booking_exists_pending_before_settlement() {
        let pool = crate::db::test_pool().await;
        let (tour, user) = seed(&pool).await;
        let row = Bookings::insert(&pool, CreateBooking { tour, user, price: 199.0 })
            .await
            .unwrap();

        let visible = Bookings::fetch(&pool, &row.id).await.unwrap().unwrap();
        assert_eq!(visible.status, BookingStatus::Pending);
        assert!(!visible.paid);

        assert!(settle_booking(&pool, &row.id).await.unwrap());
        assert!(settle_booking(&pool, &row.id).await.unwrap());
        let settled = Bookings::fetch(&pool, &row.id).await.unwrap().unwrap();
        assert_eq!(settled.status, BookingStatus::Completed);
    }

    #[tokio::test]
    async fn hydrate_populates_tour_and_user_refs() {
        let pool = crate::db::test_pool().await;
        let (tour, user) = seed(&pool).await;
        let row = Bookings::insert(&pool, CreateBooking { tour, user, price: 199.0 })
            .await
            .unwrap();

        let out = Bookings::hydrate(&pool, vec![row]).await.unwrap();
        let booking = &out[0];
        assert_eq!(booking.tour.as_ref().unwrap().slug, "bookable-tour");
        assert_eq!(booking.user.as_ref().unwrap().name, "Traveler");
    }
}
