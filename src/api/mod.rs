//! Tax service API client and models
//!
//! This module handles communication with the surplus lines tax service
//! and defines the typed records for its requests and responses.

pub mod client;
pub mod models;

pub use client::{TaxApiClient, API_KEY_HEADER, DEFAULT_BASE_URL};
pub use models::{
    CalculationResult, FallbackNotice, FieldValue, RateField, RateRecord, TaxRequest,
};
