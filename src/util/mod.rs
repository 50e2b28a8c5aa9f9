//! Shared helpers.
//!
//! - **URL validation**: refuses non-HTTP schemes and local or private hosts
//!   before anything is fetched.

mod url_validator;

pub use url_validator::{validate_feed_url, validate_url, UrlValidationError};
