//! Entity models: flat database rows, serialized read models, and the
//! `Resource` descriptors wiring them into the generic CRUD factory.

mod booking;
mod review;
mod tour;
mod user;

pub use booking::*;
pub use review::*;
pub use tour::*;
pub use user::*;

/// Canonical timestamp format for all persisted dates.
pub fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
