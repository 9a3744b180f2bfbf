//! Request and response records for the tax service
//!
//! Upstream payloads are loosely typed: the same field can arrive as
//! `"4.85%"` in one response and `0.0485` in the next, lists can be missing,
//! and objects can be swapped for nulls. Every record here is made of
//! `Option` fields filled by lenient deserializers so that an odd value turns
//! into an explicit absence instead of a failed parse.

use crate::dates::{optional_date, DateInput, EffectiveDate};
use crate::error::{Result, TaxError};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Validated input for the calculate endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct TaxRequest {
    pub state: String,
    pub premium: f64,
    pub effective_date: Option<EffectiveDate>,
}

impl TaxRequest {
    /// Validate raw caller arguments. Checks run in the order the caller
    /// sees them: state, premium, then date.
    pub fn new(state: &str, premium: Option<f64>, effective_date: Option<&DateInput>) -> Result<Self> {
        let state = validate_state(state)?;
        let premium = validate_premium(premium)?;
        let effective_date = optional_date(effective_date)?;
        Ok(Self {
            state,
            premium,
            effective_date,
        })
    }
}

pub fn validate_state(state: &str) -> Result<String> {
    let trimmed = state.trim();
    if trimmed.is_empty() {
        return Err(TaxError::state_required());
    }
    Ok(trimmed.to_string())
}

pub fn validate_premium(premium: Option<f64>) -> Result<f64> {
    match premium {
        Some(p) if p.is_finite() && p > 0.0 => Ok(p),
        _ => Err(TaxError::invalid_premium()),
    }
}

/// JSON body sent to `POST /calculate`
#[derive(Debug, Serialize)]
pub struct CalculateBody<'a> {
    pub state: &'a str,
    pub premium: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<String>,
}

impl<'a> From<&'a TaxRequest> for CalculateBody<'a> {
    fn from(request: &'a TaxRequest) -> Self {
        Self {
            state: &request.state,
            premium: request.premium,
            effective_date: request.effective_date.map(|d| d.to_string()),
        }
    }
}

/// The named components of a state's rate schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RateField {
    TaxRate,
    StampingFee,
    FilingFee,
    ServiceFee,
    Surcharge,
    RegulatoryFee,
    FireMarshalTax,
    SlasClearinghouseFee,
    FlatFee,
    LegislativeSource,
    Confidence,
    EffectiveFrom,
    EffectiveTo,
}

impl RateField {
    pub const ALL: [RateField; 13] = [
        RateField::TaxRate,
        RateField::StampingFee,
        RateField::FilingFee,
        RateField::ServiceFee,
        RateField::Surcharge,
        RateField::RegulatoryFee,
        RateField::FireMarshalTax,
        RateField::SlasClearinghouseFee,
        RateField::FlatFee,
        RateField::LegislativeSource,
        RateField::Confidence,
        RateField::EffectiveFrom,
        RateField::EffectiveTo,
    ];

    /// Fee-like fields, in schedule order
    pub const FEES: [RateField; 8] = [
        RateField::StampingFee,
        RateField::FilingFee,
        RateField::ServiceFee,
        RateField::Surcharge,
        RateField::RegulatoryFee,
        RateField::FireMarshalTax,
        RateField::SlasClearinghouseFee,
        RateField::FlatFee,
    ];

    /// Key used in the JSON payloads
    pub fn key(&self) -> &'static str {
        match self {
            RateField::TaxRate => "tax_rate",
            RateField::StampingFee => "stamping_fee",
            RateField::FilingFee => "filing_fee",
            RateField::ServiceFee => "service_fee",
            RateField::Surcharge => "surcharge",
            RateField::RegulatoryFee => "regulatory_fee",
            RateField::FireMarshalTax => "fire_marshal_tax",
            RateField::SlasClearinghouseFee => "slas_clearinghouse_fee",
            RateField::FlatFee => "flat_fee",
            RateField::LegislativeSource => "legislative_source",
            RateField::Confidence => "confidence",
            RateField::EffectiveFrom => "effective_from",
            RateField::EffectiveTo => "effective_to",
        }
    }

    /// Human label used in headers and multiline output
    pub fn label(&self) -> &'static str {
        match self {
            RateField::TaxRate => "Tax Rate",
            RateField::StampingFee => "Stamping Fee",
            RateField::FilingFee => "Filing Fee",
            RateField::ServiceFee => "Service Fee",
            RateField::Surcharge => "Surcharge",
            RateField::RegulatoryFee => "Regulatory Fee",
            RateField::FireMarshalTax => "Fire Marshal Tax",
            RateField::SlasClearinghouseFee => "SLAS Clearinghouse Fee",
            RateField::FlatFee => "Flat Fee",
            RateField::LegislativeSource => "Legislative Source",
            RateField::Confidence => "Confidence",
            RateField::EffectiveFrom => "Effective From",
            RateField::EffectiveTo => "Effective To",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.key() == key)
    }
}

impl fmt::Display for RateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A single rate-schedule value as it came over the wire
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Lenient conversion: empty strings, nulls, arrays and objects are absent
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().map(FieldValue::Number),
            Value::String(s) if !s.trim().is_empty() => Some(FieldValue::Text(s.clone())),
            Value::Bool(b) => Some(FieldValue::Text(b.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

fn lenient_field<'de, D>(deserializer: D) -> std::result::Result<Option<FieldValue>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(FieldValue::from_json))
}

fn lenient_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(json_text))
}

fn lenient_number<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(json_number))
}

fn lenient_breakdown<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let mut breakdown = BTreeMap::new();
    if let Some(Value::Object(components)) = value {
        for (component, entry) in components {
            // Either {"amount": 12.5} or a bare number
            let amount = match &entry {
                Value::Object(obj) => obj.get("amount").and_then(json_number),
                other => json_number(other),
            };
            if let Some(amount) = amount {
                breakdown.insert(component, amount);
            }
        }
    }
    Ok(breakdown)
}

pub(crate) fn json_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn json_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// One state's rate schedule
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateRecord {
    #[serde(deserialize_with = "lenient_text")]
    pub state: Option<String>,
    #[serde(deserialize_with = "lenient_field")]
    pub tax_rate: Option<FieldValue>,
    #[serde(deserialize_with = "lenient_field")]
    pub stamping_fee: Option<FieldValue>,
    #[serde(deserialize_with = "lenient_field")]
    pub filing_fee: Option<FieldValue>,
    #[serde(deserialize_with = "lenient_field")]
    pub service_fee: Option<FieldValue>,
    #[serde(deserialize_with = "lenient_field")]
    pub surcharge: Option<FieldValue>,
    #[serde(deserialize_with = "lenient_field")]
    pub regulatory_fee: Option<FieldValue>,
    #[serde(deserialize_with = "lenient_field")]
    pub fire_marshal_tax: Option<FieldValue>,
    #[serde(deserialize_with = "lenient_field")]
    pub slas_clearinghouse_fee: Option<FieldValue>,
    #[serde(deserialize_with = "lenient_field")]
    pub flat_fee: Option<FieldValue>,
    #[serde(deserialize_with = "lenient_field")]
    pub legislative_source: Option<FieldValue>,
    #[serde(deserialize_with = "lenient_field")]
    pub confidence: Option<FieldValue>,
    #[serde(deserialize_with = "lenient_field")]
    pub effective_from: Option<FieldValue>,
    #[serde(deserialize_with = "lenient_field")]
    pub effective_to: Option<FieldValue>,
    #[serde(deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    #[serde(deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub rates_from: Option<String>,
}

impl RateRecord {
    /// Build a record from an arbitrary JSON value. Anything other than an
    /// object yields an empty record.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Object(_) => serde_json::from_value(value.clone()).unwrap_or_default(),
            _ => Self::default(),
        }
    }

    pub fn get(&self, field: RateField) -> Option<&FieldValue> {
        match field {
            RateField::TaxRate => self.tax_rate.as_ref(),
            RateField::StampingFee => self.stamping_fee.as_ref(),
            RateField::FilingFee => self.filing_fee.as_ref(),
            RateField::ServiceFee => self.service_fee.as_ref(),
            RateField::Surcharge => self.surcharge.as_ref(),
            RateField::RegulatoryFee => self.regulatory_fee.as_ref(),
            RateField::FireMarshalTax => self.fire_marshal_tax.as_ref(),
            RateField::SlasClearinghouseFee => self.slas_clearinghouse_fee.as_ref(),
            RateField::FlatFee => self.flat_fee.as_ref(),
            RateField::LegislativeSource => self.legislative_source.as_ref(),
            RateField::Confidence => self.confidence.as_ref(),
            RateField::EffectiveFrom => self.effective_from.as_ref(),
            RateField::EffectiveTo => self.effective_to.as_ref(),
        }
    }

    pub fn fallback(&self) -> Option<FallbackNotice> {
        FallbackNotice::new(self.fallback_reason.as_deref(), self.rates_from.as_deref())
    }

    /// Fill in a fallback notice carried next to (instead of inside) the record
    pub(crate) fn with_envelope_fallback(mut self, envelope: &Value) -> Self {
        if self.fallback_reason.is_none() {
            self.fallback_reason = envelope.get("fallback_reason").and_then(json_text);
        }
        if self.rates_from.is_none() {
            self.rates_from = envelope.get("rates_from").and_then(json_text);
        }
        self
    }
}

/// Result of `POST /calculate`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CalculationResult {
    #[serde(deserialize_with = "lenient_text")]
    pub state: Option<String>,
    #[serde(deserialize_with = "lenient_number")]
    pub premium: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub total_tax: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub total_due: Option<f64>,
    #[serde(deserialize_with = "lenient_breakdown")]
    pub breakdown: BTreeMap<String, f64>,
    #[serde(deserialize_with = "lenient_text")]
    pub fallback_reason: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub rates_from: Option<String>,
}

impl CalculationResult {
    pub fn fallback(&self) -> Option<FallbackNotice> {
        FallbackNotice::new(self.fallback_reason.as_deref(), self.rates_from.as_deref())
    }
}

/// Notice attached when historical data was missing and another schedule was used
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackNotice {
    pub reason: String,
    pub rates_from: String,
}

impl FallbackNotice {
    /// Rates come from the current schedule unless the service says otherwise
    pub const DEFAULT_SOURCE: &'static str = "current";

    pub fn new(reason: Option<&str>, rates_from: Option<&str>) -> Option<Self> {
        let reason = reason?;
        Some(Self {
            reason: reason.to_string(),
            rates_from: rates_from.unwrap_or(Self::DEFAULT_SOURCE).to_string(),
        })
    }
}
