pub mod api;
pub mod config;
pub mod crud;
pub mod db;
pub mod media;
pub mod notifications;
pub mod payments;
pub mod query;

pub use db::DbPool;

use config::Config;
use std::sync::Arc;

use crate::api::rate_limit::RateLimiter;
use crate::notifications::Mailer;
use crate::payments::CheckoutProvider;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub rate_limiter: Arc<RateLimiter>,
    pub mailer: Arc<Mailer>,
    pub payments: Arc<dyn CheckoutProvider>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool, payments: Arc<dyn CheckoutProvider>) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let mailer = Arc::new(Mailer::new(config.email.clone()));
        Self {
            config,
            db,
            rate_limiter,
            mailer,
            payments,
        }
    }
}
