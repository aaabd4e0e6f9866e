/// REST API data types and error responses
pub mod dto;
mod error;

pub use error::ApiError;
