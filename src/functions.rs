//! Custom function surface
//!
//! One method per spreadsheet function. Each runs the same pipeline:
//! validate arguments, read the API key, call the service, normalize. The
//! result is always a grid; failures arrive as a single `ERROR: ...` cell.
//!
//! Methods take `&self` and share nothing mutable, so any number of
//! invocations can be in flight at once. Dropping a pending future simply
//! abandons that invocation.

use crate::api::client::TaxApiClient;
use crate::api::models::{validate_state, TaxRequest};
use crate::credentials::{CredentialStore, API_KEY_NAME};
use crate::dates::{required_date, DateInput};
use crate::error::{Result, TaxError};
use crate::normalizer::{self, Cell, TabularResult};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct TaxFunctions {
    client: TaxApiClient,
    credentials: Arc<dyn CredentialStore>,
}

impl TaxFunctions {
    pub fn new(client: TaxApiClient, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            client,
            credentials,
        }
    }

    pub fn client(&self) -> &TaxApiClient {
        &self.client
    }

    pub fn has_api_key(&self) -> bool {
        self.credentials.get(API_KEY_NAME).is_some()
    }

    fn api_key(&self) -> Result<String> {
        self.credentials.get(API_KEY_NAME).ok_or(TaxError::Auth)
    }

    /// Store a new API key in every configured backend
    pub fn set_api_key(&self, api_key: &str) -> TabularResult {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return finish(
                "SETAPIKEY",
                Err(TaxError::Validation("API key is required".to_string())),
            );
        }
        match self.credentials.set(API_KEY_NAME, api_key) {
            Ok(()) => TabularResult::scalar(Cell::text("API key saved")),
            Err(e) => {
                warn!("Failed to store API key: {:#}", e);
                TabularResult::scalar(Cell::Text(format!(
                    "{}Could not save API key: {}",
                    crate::error::ERROR_PREFIX,
                    e
                )))
            }
        }
    }

    /// CALCULATE: total tax for a premium
    pub async fn calculate(
        &self,
        state: &str,
        premium: Option<f64>,
        effective_date: Option<&DateInput>,
    ) -> TabularResult {
        finish(
            "CALCULATE",
            self.try_calculate(state, premium, effective_date).await,
        )
    }

    async fn try_calculate(
        &self,
        state: &str,
        premium: Option<f64>,
        effective_date: Option<&DateInput>,
    ) -> Result<TabularResult> {
        let request = TaxRequest::new(state, premium, effective_date)?;
        let api_key = self.api_key()?;
        let result = self.client.calculate(&api_key, &request).await?;
        Ok(normalizer::calculation_total(&result))
    }

    /// DETAILS: state, premium, total tax and total due
    pub async fn details(
        &self,
        state: &str,
        premium: Option<f64>,
        multiline: bool,
        effective_date: Option<&DateInput>,
    ) -> TabularResult {
        finish(
            "DETAILS",
            self.try_details(state, premium, multiline, effective_date).await,
        )
    }

    async fn try_details(
        &self,
        state: &str,
        premium: Option<f64>,
        multiline: bool,
        effective_date: Option<&DateInput>,
    ) -> Result<TabularResult> {
        let request = TaxRequest::new(state, premium, effective_date)?;
        let api_key = self.api_key()?;
        let result = self.client.calculate(&api_key, &request).await?;
        Ok(normalizer::calculation_details(&request, &result, multiline))
    }

    /// WITHPREMIUM: premium, total tax and total due in one row
    pub async fn with_premium(
        &self,
        state: &str,
        premium: Option<f64>,
        effective_date: Option<&DateInput>,
    ) -> TabularResult {
        finish(
            "WITHPREMIUM",
            self.try_with_premium(state, premium, effective_date).await,
        )
    }

    async fn try_with_premium(
        &self,
        state: &str,
        premium: Option<f64>,
        effective_date: Option<&DateInput>,
    ) -> Result<TabularResult> {
        let request = TaxRequest::new(state, premium, effective_date)?;
        let api_key = self.api_key()?;
        let result = self.client.calculate(&api_key, &request).await?;
        Ok(normalizer::calculation_with_premium(&request, &result))
    }

    /// BREAKDOWN: each tax and fee component of a calculation
    pub async fn breakdown(
        &self,
        state: &str,
        premium: Option<f64>,
        effective_date: Option<&DateInput>,
    ) -> TabularResult {
        finish(
            "BREAKDOWN",
            self.try_breakdown(state, premium, effective_date).await,
        )
    }

    async fn try_breakdown(
        &self,
        state: &str,
        premium: Option<f64>,
        effective_date: Option<&DateInput>,
    ) -> Result<TabularResult> {
        let request = TaxRequest::new(state, premium, effective_date)?;
        let api_key = self.api_key()?;
        let result = self.client.calculate(&api_key, &request).await?;
        Ok(normalizer::calculation_breakdown(&result))
    }

    /// RATE: current tax rate percentage for a state
    pub async fn rate(&self, state: &str) -> TabularResult {
        finish("RATE", self.try_rate(state).await)
    }

    async fn try_rate(&self, state: &str) -> Result<TabularResult> {
        let state = validate_state(state)?;
        let api_key = self.api_key()?;
        let record = self.client.current_rate(&api_key, &state).await?;
        Ok(normalizer::current_rate(&record))
    }

    /// RATES: state and tax rate for every state
    pub async fn rates(&self) -> TabularResult {
        finish("RATES", self.try_rates().await)
    }

    async fn try_rates(&self) -> Result<TabularResult> {
        let api_key = self.api_key()?;
        let records = self.client.list_rates(&api_key).await?;
        Ok(normalizer::rate_table(&records))
    }

    /// RATESDETAILS: the full schedule for every state
    pub async fn rates_details(&self) -> TabularResult {
        finish("RATESDETAILS", self.try_rates_details().await)
    }

    async fn try_rates_details(&self) -> Result<TabularResult> {
        let api_key = self.api_key()?;
        let records = self.client.list_rates(&api_key).await?;
        Ok(normalizer::rate_details_table(&records))
    }

    /// STATES: supported state names
    pub async fn states(&self) -> TabularResult {
        finish("STATES", self.try_states().await)
    }

    async fn try_states(&self) -> Result<TabularResult> {
        let api_key = self.api_key()?;
        let states = self.client.list_states(&api_key).await?;
        Ok(normalizer::state_list(&states))
    }

    /// HISTORICALRATE: tax rate percentage in force on a date
    pub async fn historical_rate(&self, state: &str, date: Option<&DateInput>) -> TabularResult {
        finish("HISTORICALRATE", self.try_historical_rate(state, date).await)
    }

    async fn try_historical_rate(
        &self,
        state: &str,
        date: Option<&DateInput>,
    ) -> Result<TabularResult> {
        let state = validate_state(state)?;
        let date = required_date(date)?;
        let api_key = self.api_key()?;
        let record = self.client.historical_rate(&api_key, &state, &date).await?;
        Ok(normalizer::historical_rate(&record))
    }

    /// HISTORICALRATEDETAILS: full schedule in force on a date
    pub async fn historical_rate_details(
        &self,
        state: &str,
        date: Option<&DateInput>,
        multiline: bool,
    ) -> TabularResult {
        finish(
            "HISTORICALRATEDETAILS",
            self.try_historical_rate_details(state, date, multiline).await,
        )
    }

    async fn try_historical_rate_details(
        &self,
        state: &str,
        date: Option<&DateInput>,
        multiline: bool,
    ) -> Result<TabularResult> {
        let state = validate_state(state)?;
        let date = required_date(date)?;
        let api_key = self.api_key()?;
        let record = self.client.historical_rate(&api_key, &state, &date).await?;
        Ok(normalizer::historical_details(
            &state,
            &date.to_string(),
            &record,
            multiline,
        ))
    }
}

fn finish(function: &str, outcome: Result<TabularResult>) -> TabularResult {
    match outcome {
        Ok(grid) => {
            debug!(
                "{} returned {} row(s) x {} column(s)",
                function,
                grid.len(),
                grid.width()
            );
            grid
        }
        Err(err) => {
            warn!("{} failed ({}): {}", function, err.kind(), err);
            TabularResult::error(&err)
        }
    }
}
