//! Surplus lines tax client
//!
//! Typed client for the surplus lines tax service plus the normalization
//! that turns its responses into spreadsheet-shaped grids.
//!
//! ```no_run
//! use std::sync::Arc;
//! use sltax::api::TaxApiClient;
//! use sltax::credentials::MemoryCredentialStore;
//! use sltax::functions::TaxFunctions;
//!
//! # async fn run() {
//! let functions = TaxFunctions::new(
//!     TaxApiClient::new(sltax::api::DEFAULT_BASE_URL),
//!     Arc::new(MemoryCredentialStore::with_api_key("your-key")),
//! );
//! let total = functions.calculate("Texas", Some(10000.0), None).await;
//! println!("{:?}", total.as_scalar());
//! # }
//! ```

pub mod api;
pub mod config;
pub mod credentials;
pub mod dates;
pub mod error;
pub mod functions;
pub mod normalizer;
pub mod utils;

pub use error::{Result, TaxError};
pub use functions::TaxFunctions;
pub use normalizer::{Cell, TabularResult};
