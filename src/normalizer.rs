//! Response normalization
//!
//! Turns typed service records into the fixed-shape grids spreadsheet cells
//! expect. Every function here returns a grid; failures become a single
//! `ERROR: ...` cell rather than an `Err`.

use crate::api::models::{
    CalculationResult, FallbackNotice, FieldValue, RateField, RateRecord, TaxRequest,
};
use crate::error::TaxError;
use regex::Regex;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::OnceLock;

/// Placeholder for absent fields in multiline output
pub const NOT_AVAILABLE: &str = "N/A";

/// Placeholder for rate rows with no state name
pub const UNKNOWN_STATE: &str = "Unknown";

/// Decimal places kept after percentage conversion. Enough to hide binary
/// float noise (0.0485 * 100 = 4.8500000000000005) without touching real data.
const PERCENT_DECIMALS: i32 = 10;

/// Column order of HISTORICALRATEDETAILS after state and date
pub const HISTORICAL_COLUMNS: [RateField; 13] = [
    RateField::TaxRate,
    RateField::StampingFee,
    RateField::FilingFee,
    RateField::ServiceFee,
    RateField::Surcharge,
    RateField::RegulatoryFee,
    RateField::FireMarshalTax,
    RateField::SlasClearinghouseFee,
    RateField::FlatFee,
    RateField::EffectiveFrom,
    RateField::EffectiveTo,
    RateField::LegislativeSource,
    RateField::Confidence,
];

/// Column order of RATESDETAILS after state
pub const RATE_TABLE_COLUMNS: [RateField; 10] = [
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
];

fn numeric_prefix_regex() -> &'static Regex {
    static NUMERIC: OnceLock<Regex> = OnceLock::new();
    NUMERIC.get_or_init(|| Regex::new(r"\d*\.?\d+").expect("valid numeric regex"))
}

/// A single spreadsheet cell
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Text(String),
    Number(f64),
    Empty,
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&FieldValue> for Cell {
    fn from(value: &FieldValue) -> Self {
        match value {
            FieldValue::Number(n) => Cell::Number(*n),
            FieldValue::Text(s) => Cell::Text(s.clone()),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Text(s) => f.write_str(s),
            Cell::Number(n) => write!(f, "{}", n),
            Cell::Empty => Ok(()),
        }
    }
}

/// Ordered rows of cells, optionally with column labels for display
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TabularResult {
    rows: Vec<Vec<Cell>>,
    header: Option<Vec<String>>,
}

impl TabularResult {
    pub fn from_rows(rows: Vec<Vec<Cell>>) -> Self {
        Self { rows, header: None }
    }

    pub fn scalar(cell: Cell) -> Self {
        Self::from_rows(vec![vec![cell]])
    }

    pub fn single_row(cells: Vec<Cell>) -> Self {
        Self::from_rows(vec![cells])
    }

    /// One cell per row
    pub fn column(cells: Vec<Cell>) -> Self {
        Self::from_rows(cells.into_iter().map(|c| vec![c]).collect())
    }

    /// (label, value) rows
    pub fn pairs(pairs: Vec<(&str, Cell)>) -> Self {
        Self::from_rows(
            pairs
                .into_iter()
                .map(|(label, value)| vec![Cell::text(label), value])
                .collect(),
        )
    }

    pub fn error(err: &TaxError) -> Self {
        Self::scalar(Cell::Text(err.to_cell_text()))
    }

    pub fn with_header(mut self, header: Vec<String>) -> Self {
        self.header = Some(header);
        self
    }

    pub fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Cell>> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Widest row
    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// The only cell, when the grid is 1x1
    pub fn as_scalar(&self) -> Option<&Cell> {
        match self.rows.as_slice() {
            [row] if row.len() == 1 => row.first(),
            _ => None,
        }
    }

    /// Message of an error grid, without the prefix
    pub fn error_message(&self) -> Option<&str> {
        self.as_scalar()
            .and_then(Cell::as_text)
            .and_then(|s| s.strip_prefix(crate::error::ERROR_PREFIX))
    }

    pub fn is_error(&self) -> bool {
        self.error_message().is_some()
    }
}

impl Serialize for TabularResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.rows.serialize(serializer)
    }
}

/// How trailing fallback entries are attached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// One wide row: two extra cells
    Row,
    /// One value per row: two extra single-cell rows
    Column,
    /// (label, value) rows: two extra pairs
    Pairs,
}

/// Express a rate as a percentage number.
///
/// - `"4.85%"`: leading decimal number, read as a percentage (4.85)
/// - number below 1: a fraction, scaled by 100 (0.0485 becomes 4.85)
/// - number at or above 1: already a percentage
///
/// The service mixes these encodings. A true 0.5% rate sent as `0.5` reads
/// as 50; that matches how the service is consumed today.
pub fn normalize_percentage(value: &FieldValue) -> Option<f64> {
    let percent = match value {
        FieldValue::Text(text) => numeric_prefix_regex()
            .find(text)
            .and_then(|m| m.as_str().parse::<f64>().ok())?,
        FieldValue::Number(n) if *n < 1.0 => n * 100.0,
        FieldValue::Number(n) => *n,
    };
    percent.is_finite().then(|| round_percent(percent))
}

fn round_percent(value: f64) -> f64 {
    let scale = 10f64.powi(PERCENT_DECIMALS);
    (value * scale).round() / scale
}

/// Percentage cell for scalar and two-column outputs; absent or unreadable is 0
fn percentage_cell(value: Option<&FieldValue>) -> Cell {
    Cell::Number(value.and_then(normalize_percentage).unwrap_or(0.0))
}

/// Wire value as-is, or an empty cell
fn raw_cell(value: Option<&FieldValue>) -> Cell {
    value.map(Cell::from).unwrap_or(Cell::Empty)
}

/// Wire value as-is, or `N/A`
fn labelled_cell(value: Option<&FieldValue>) -> Cell {
    value
        .map(Cell::from)
        .unwrap_or_else(|| Cell::text(NOT_AVAILABLE))
}

fn amount_or_na(amount: Option<f64>) -> Cell {
    amount
        .map(Cell::Number)
        .unwrap_or_else(|| Cell::text(NOT_AVAILABLE))
}

/// Append the warning and source entries for a fallback notice
pub fn append_fallback(result: &mut TabularResult, notice: Option<&FallbackNotice>, layout: Layout) {
    let Some(notice) = notice else {
        return;
    };
    let warning = format!("WARNING: {}", notice.reason);
    let source = format!("Rates From: {}", notice.rates_from);

    match layout {
        Layout::Row => match result.rows.last_mut() {
            Some(row) => row.extend([Cell::Text(warning), Cell::Text(source)]),
            None => result.rows.push(vec![Cell::Text(warning), Cell::Text(source)]),
        },
        Layout::Column => {
            result.rows.push(vec![Cell::Text(warning)]);
            result.rows.push(vec![Cell::Text(source)]);
        }
        Layout::Pairs => {
            result
                .rows
                .push(vec![Cell::text("Warning"), Cell::text(notice.reason.clone())]);
            result
                .rows
                .push(vec![Cell::text("Rates From"), Cell::text(notice.rates_from.clone())]);
        }
    }

    if layout == Layout::Row {
        if let Some(header) = result.header.as_mut() {
            header.push("Warning".to_string());
            header.push("Rates From".to_string());
        }
    }
}

fn labels(prefix: &[&str], fields: &[RateField]) -> Vec<String> {
    prefix
        .iter()
        .map(|s| s.to_string())
        .chain(fields.iter().map(|f| f.label().to_string()))
        .collect()
}

/// CALCULATE: total tax as a scalar
pub fn calculation_total(result: &CalculationResult) -> TabularResult {
    let mut grid = TabularResult::scalar(Cell::Number(result.total_tax.unwrap_or(0.0)));
    append_fallback(&mut grid, result.fallback().as_ref(), Layout::Column);
    grid
}

/// DETAILS: state, premium, total tax, total due
pub fn calculation_details(
    request: &TaxRequest,
    result: &CalculationResult,
    multiline: bool,
) -> TabularResult {
    let state = Cell::text(result.state.clone().unwrap_or_else(|| request.state.clone()));
    let premium = Cell::Number(result.premium.unwrap_or(request.premium));

    let mut grid = if multiline {
        TabularResult::pairs(vec![
            ("State", state),
            ("Premium", premium),
            ("Total Tax", amount_or_na(result.total_tax)),
            ("Total Due", amount_or_na(result.total_due)),
        ])
    } else {
        TabularResult::single_row(vec![
            state,
            premium,
            Cell::Number(result.total_tax.unwrap_or(0.0)),
            Cell::Number(result.total_due.unwrap_or(0.0)),
        ])
        .with_header(labels(&["State", "Premium", "Total Tax", "Total Due"], &[]))
    };

    let layout = if multiline { Layout::Pairs } else { Layout::Row };
    append_fallback(&mut grid, result.fallback().as_ref(), layout);
    grid
}

/// WITHPREMIUM: premium as sent, total tax, total due
pub fn calculation_with_premium(request: &TaxRequest, result: &CalculationResult) -> TabularResult {
    let mut grid = TabularResult::single_row(vec![
        Cell::Number(request.premium),
        Cell::Number(result.total_tax.unwrap_or(0.0)),
        Cell::Number(result.total_due.unwrap_or(0.0)),
    ])
    .with_header(labels(&["Premium", "Total Tax", "Total Due"], &[]));
    append_fallback(&mut grid, result.fallback().as_ref(), Layout::Row);
    grid
}

fn component_label(component: &str) -> String {
    if component == "base_tax" {
        return "Base Tax".to_string();
    }
    if let Some(field) = RateField::from_key(component) {
        return field.label().to_string();
    }
    component
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// BREAKDOWN: one (component, amount) row per fee, then the totals
pub fn calculation_breakdown(result: &CalculationResult) -> TabularResult {
    let known: Vec<&str> = std::iter::once("base_tax")
        .chain(RateField::FEES.iter().map(|f| f.key()))
        .collect();

    let mut rows: Vec<Vec<Cell>> = Vec::new();
    for key in &known {
        if let Some(amount) = result.breakdown.get(*key) {
            rows.push(vec![Cell::Text(component_label(key)), Cell::Number(*amount)]);
        }
    }
    // Components the service added that we have no fixed slot for
    for (key, amount) in &result.breakdown {
        if !known.contains(&key.as_str()) {
            rows.push(vec![Cell::Text(component_label(key)), Cell::Number(*amount)]);
        }
    }
    rows.push(vec![Cell::text("Total Tax"), amount_or_na(result.total_tax)]);
    rows.push(vec![Cell::text("Total Due"), amount_or_na(result.total_due)]);

    let mut grid = TabularResult::from_rows(rows);
    append_fallback(&mut grid, result.fallback().as_ref(), Layout::Pairs);
    grid
}

/// RATE: current tax rate as a percentage scalar
pub fn current_rate(record: &RateRecord) -> TabularResult {
    TabularResult::scalar(percentage_cell(record.get(RateField::TaxRate)))
}

/// HISTORICALRATE: tax rate on a date, plus any fallback notice
pub fn historical_rate(record: &RateRecord) -> TabularResult {
    let mut grid = current_rate(record);
    append_fallback(&mut grid, record.fallback().as_ref(), Layout::Column);
    grid
}

/// HISTORICALRATEDETAILS: the full schedule for a date
pub fn historical_details(
    state: &str,
    date: &str,
    record: &RateRecord,
    multiline: bool,
) -> TabularResult {
    let mut grid = if multiline {
        let mut pairs = vec![("State", Cell::text(state)), ("Date", Cell::text(date))];
        pairs.extend(
            HISTORICAL_COLUMNS
                .iter()
                .map(|f| (f.label(), labelled_cell(record.get(*f)))),
        );
        TabularResult::pairs(pairs)
    } else {
        let mut row = vec![Cell::text(state), Cell::text(date)];
        row.extend(HISTORICAL_COLUMNS.iter().map(|f| raw_cell(record.get(*f))));
        TabularResult::single_row(row).with_header(labels(&["State", "Date"], &HISTORICAL_COLUMNS))
    };

    let layout = if multiline { Layout::Pairs } else { Layout::Row };
    append_fallback(&mut grid, record.fallback().as_ref(), layout);
    grid
}

fn state_cell(record: &RateRecord) -> Cell {
    Cell::text(record.state.as_deref().unwrap_or(UNKNOWN_STATE))
}

/// RATES: state and tax rate percentage, one row per state
pub fn rate_table(records: &[RateRecord]) -> TabularResult {
    TabularResult::from_rows(
        records
            .iter()
            .map(|r| vec![state_cell(r), percentage_cell(r.get(RateField::TaxRate))])
            .collect(),
    )
    .with_header(labels(&["State"], &[RateField::TaxRate]))
}

/// RATESDETAILS: every schedule field as sent, one row per state
pub fn rate_details_table(records: &[RateRecord]) -> TabularResult {
    TabularResult::from_rows(
        records
            .iter()
            .map(|r| {
                let mut row = vec![state_cell(r)];
                row.extend(RATE_TABLE_COLUMNS.iter().map(|f| raw_cell(r.get(*f))));
                row
            })
            .collect(),
    )
    .with_header(labels(&["State"], &RATE_TABLE_COLUMNS))
}

/// STATES: one name per row
pub fn state_list(states: &[String]) -> TabularResult {
    TabularResult::column(states.iter().map(|s| Cell::text(s.as_str())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> FieldValue {
        FieldValue::Text(s.to_string())
    }

    fn request() -> TaxRequest {
        TaxRequest::new("Texas", Some(10000.0), None).unwrap()
    }

    #[test]
    fn test_percentage_rule() {
        assert_eq!(normalize_percentage(&text("4.85%")), Some(4.85));
        assert_eq!(normalize_percentage(&text("3%")), Some(3.0));
        assert_eq!(normalize_percentage(&text("rate: 0.25 %")), Some(0.25));
        assert_eq!(normalize_percentage(&FieldValue::Number(0.0485)), Some(4.85));
        assert_eq!(normalize_percentage(&FieldValue::Number(0.0095)), Some(0.95));
        assert_eq!(normalize_percentage(&FieldValue::Number(4.85)), Some(4.85));
        assert_eq!(normalize_percentage(&FieldValue::Number(1.0)), Some(1.0));
        // Known ambiguity: a true 0.5% sent as 0.5 reads as 50
        assert_eq!(normalize_percentage(&FieldValue::Number(0.5)), Some(50.0));
        assert_eq!(normalize_percentage(&text("none")), None);
        assert_eq!(normalize_percentage(&text("1.2.3%")), Some(1.2));
        assert_eq!(normalize_percentage(&text(".5%")), Some(0.5));
    }

    #[test]
    fn test_percent_string_and_fraction_agree() {
        for (percent_text, fraction) in [("4.85%", 0.0485), ("3%", 0.03), ("0.95%", 0.0095), ("6%", 0.06)] {
            let from_text = normalize_percentage(&text(percent_text)).unwrap();
            let from_fraction = normalize_percentage(&FieldValue::Number(fraction)).unwrap();
            assert_eq!(from_text, from_fraction, "{percent_text}");
            assert_eq!(
                Cell::Number(from_text).to_string(),
                Cell::Number(from_fraction).to_string()
            );
        }
    }

    #[test]
    fn test_calculation_total_scalar() {
        let result = CalculationResult {
            total_tax: Some(503.0),
            ..Default::default()
        };
        let grid = calculation_total(&result);
        assert_eq!(grid.as_scalar(), Some(&Cell::Number(503.0)));
        assert_eq!(grid.as_scalar().unwrap().to_string(), "503");

        let missing = calculation_total(&CalculationResult::default());
        assert_eq!(missing.as_scalar(), Some(&Cell::Number(0.0)));
    }

    #[test]
    fn test_details_row_and_multiline() {
        let result = CalculationResult {
            state: Some("Texas".to_string()),
            premium: Some(10000.0),
            total_tax: Some(503.0),
            total_due: Some(10503.0),
            ..Default::default()
        };
        let row = calculation_details(&request(), &result, false);
        assert_eq!(
            row.rows(),
            &[vec![
                Cell::text("Texas"),
                Cell::Number(10000.0),
                Cell::Number(503.0),
                Cell::Number(10503.0)
            ]]
        );
        assert_eq!(row.header().unwrap().len(), 4);

        let multi = calculation_details(&request(), &CalculationResult::default(), true);
        assert_eq!(multi.len(), 4);
        assert_eq!(multi.width(), 2);
        assert_eq!(multi.rows()[0], vec![Cell::text("State"), Cell::text("Texas")]);
        assert_eq!(multi.rows()[3], vec![Cell::text("Total Due"), Cell::text("N/A")]);
    }

    #[test]
    fn test_fallback_adds_two_entries_per_layout() {
        let plain = CalculationResult {
            total_tax: Some(10.0),
            ..Default::default()
        };
        let noted = CalculationResult {
            fallback_reason: Some("No historical data for 1999-01-01".to_string()),
            ..plain.clone()
        };

        let row_plain = calculation_details(&request(), &plain, false);
        let row_noted = calculation_details(&request(), &noted, false);
        assert_eq!(row_noted.width(), row_plain.width() + 2);
        assert_eq!(row_noted.header().unwrap().len(), row_plain.header().unwrap().len() + 2);
        assert_eq!(
            row_noted.rows()[0][5],
            Cell::text("Rates From: current")
        );

        let multi_plain = calculation_details(&request(), &plain, true);
        let multi_noted = calculation_details(&request(), &noted, true);
        assert_eq!(multi_noted.len(), multi_plain.len() + 2);

        let scalar_noted = calculation_total(&noted);
        assert_eq!(scalar_noted.len(), 3);
        assert_eq!(
            scalar_noted.rows()[1],
            vec![Cell::text("WARNING: No historical data for 1999-01-01")]
        );
    }

    #[test]
    fn test_historical_details_fixed_order() {
        let record = RateRecord {
            tax_rate: Some(text("0.95%")),
            legislative_source: Some(text("Iowa Code 432.1")),
            ..Default::default()
        };
        let row = historical_details("Iowa", "2025-06-15", &record, false);
        assert_eq!(row.width(), 15);
        assert_eq!(row.rows()[0][2], Cell::text("0.95%"));
        assert_eq!(row.rows()[0][3], Cell::Empty);
        assert_eq!(row.rows()[0][13], Cell::text("Iowa Code 432.1"));

        let multi = historical_details("Iowa", "2025-06-15", &record, true);
        assert_eq!(multi.len(), 15);
        assert_eq!(multi.rows()[1], vec![Cell::text("Date"), Cell::text("2025-06-15")]);
        assert_eq!(multi.rows()[3], vec![Cell::text("Stamping Fee"), Cell::text("N/A")]);
        assert_eq!(multi.rows()[14][0], Cell::text("Confidence"));
    }

    #[test]
    fn test_rate_tables() {
        let records = vec![
            RateRecord {
                state: Some("Texas".to_string()),
                tax_rate: Some(text("4.85%")),
                stamping_fee: Some(text("0.18%")),
                ..Default::default()
            },
            RateRecord {
                tax_rate: Some(FieldValue::Number(0.03)),
                ..Default::default()
            },
        ];
        let rates = rate_table(&records);
        assert_eq!(rates.rows()[0], vec![Cell::text("Texas"), Cell::Number(4.85)]);
        assert_eq!(rates.rows()[1], vec![Cell::text("Unknown"), Cell::Number(3.0)]);

        let details = rate_details_table(&records);
        assert_eq!(details.width(), 11);
        assert_eq!(details.rows()[0][2], Cell::text("0.18%"));
        assert_eq!(details.rows()[1][1], Cell::Number(0.03));
        assert_eq!(details.header().unwrap()[10], "Legislative Source");
    }

    #[test]
    fn test_breakdown_order() {
        let mut result = CalculationResult {
            total_tax: Some(503.0),
            ..Default::default()
        };
        result.breakdown.insert("stamping_fee".to_string(), 18.0);
        result.breakdown.insert("base_tax".to_string(), 485.0);
        result.breakdown.insert("municipal_levy".to_string(), 0.0);

        let grid = calculation_breakdown(&result);
        let labels: Vec<String> = grid.rows().iter().map(|r| r[0].to_string()).collect();
        assert_eq!(
            labels,
            vec!["Base Tax", "Stamping Fee", "Municipal Levy", "Total Tax", "Total Due"]
        );
        assert_eq!(grid.rows()[4][1], Cell::text("N/A"));
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let record = RateRecord {
            state: Some("Iowa".to_string()),
            tax_rate: Some(FieldValue::Number(0.0095)),
            fallback_reason: Some("No data".to_string()),
            ..Default::default()
        };
        let first = serde_json::to_string(&historical_details("Iowa", "2025-06-15", &record, false)).unwrap();
        let second = serde_json::to_string(&historical_details("Iowa", "2025-06-15", &record, false)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_error_grid() {
        let grid = TabularResult::error(&TaxError::Auth);
        assert!(grid.is_error());
        assert_eq!(
            grid.error_message(),
            Some("Please configure your API key in Settings")
        );
        assert_eq!(
            serde_json::to_string(&grid).unwrap(),
            r#"[["ERROR: Please configure your API key in Settings"]]"#
        );
        assert!(!state_list(&["Texas".to_string()]).is_error());
    }

    #[test]
    fn test_cells_serialize_as_plain_json() {
        let grid = TabularResult::single_row(vec![Cell::text("Texas"), Cell::Number(4.85), Cell::Empty]);
        assert_eq!(serde_json::to_string(&grid).unwrap(), r#"[["Texas",4.85,null]]"#);
    }
}
