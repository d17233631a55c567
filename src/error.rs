//! Error types for the document store seam.
//!
//! Components above the store never surface these directly: forms turn them into
//! failure notices and the auth gate turns them into a denial.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid collection path: {0}")]
    InvalidPath(String),

    #[error("Malformed document: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
}

pub type StoreResult<T> = Result<T, StoreError>;
