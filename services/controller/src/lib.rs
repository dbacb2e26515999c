//! MediLearn controller service: the HTTP surface that starts runs and serves their state.

pub mod api;
pub mod error;

pub use api::{router, AppState};
pub use error::ApiError;
