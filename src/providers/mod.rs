pub mod rate_api;

pub use rate_api::{ApiResponse, Quote, RateApiClient};
