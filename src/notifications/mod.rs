//! Outbound notifications. Currently email only: welcome messages on
//! signup and password reset links.

mod email;

pub use email::Mailer;
