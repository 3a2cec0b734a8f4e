//! Remote access gateway for the learning API.

mod client;
mod endpoint;
mod error;
pub mod types;

pub use client::{ApiClient, Timeouts};
pub use endpoint::{AuthMode, Endpoint, TimeoutClass};
pub use error::ApiError;
