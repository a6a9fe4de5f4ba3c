//! Customer RFM input records and the segment summary table, both loaded with Polars

use crate::artifacts::ArtifactError;
use crate::model::{PurchaseModel, ValueModel};
use crate::pipeline::predict;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Index column of the segment summary table
pub const SEGMENT_COLUMN: &str = "Segment";

/// Form defaults used before the first submission
pub const DEFAULT_RECENCY: u32 = 30;
pub const DEFAULT_FREQUENCY: u32 = 3;
pub const DEFAULT_MONETARY: f64 = 500.0;
pub const DEFAULT_TENURE: u32 = 150;

/// Rejected user input, caught before the prediction pipeline runs
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InputError {
    #[error("{field} must be a number, got '{value}'")]
    NotANumber { field: &'static str, value: String },

    #[error("{field} must be finite, got {value}")]
    NotFinite { field: &'static str, value: f64 },

    #[error("{field} must be non-negative, got {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("{field} must be a whole number, got {value}")]
    NotInteger { field: &'static str, value: f64 },

    #[error("{field} must be at most {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        max: u32,
    },
}

/// One customer's RFM snapshot plus tenure
///
/// Time fields are in days. `tenure >= recency` is expected but not enforced;
/// the pipeline clamps the recency span instead.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RfmRecord {
    recency: u32,
    frequency: u32,
    monetary: f64,
    tenure: u32,
}

impl RfmRecord {
    pub fn new(
        recency: u32,
        frequency: u32,
        monetary: f64,
        tenure: u32,
    ) -> Result<Self, InputError> {
        let monetary = check_amount("monetary", monetary)?;
        Ok(Self {
            recency,
            frequency,
            monetary,
            tenure,
        })
    }

    /// Days since the last purchase
    pub fn recency(&self) -> u32 {
        self.recency
    }

    /// Total purchases, including the first
    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    /// Total historical spend
    pub fn monetary(&self) -> f64 {
        self.monetary
    }

    /// Days since the first purchase
    pub fn tenure(&self) -> u32 {
        self.tenure
    }
}

impl Default for RfmRecord {
    fn default() -> Self {
        Self {
            recency: DEFAULT_RECENCY,
            frequency: DEFAULT_FREQUENCY,
            monetary: DEFAULT_MONETARY,
            tenure: DEFAULT_TENURE,
        }
    }
}

/// Unvalidated RFM input; absent fields fall back to the form defaults
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RfmInput {
    pub recency: Option<f64>,
    pub frequency: Option<f64>,
    pub monetary: Option<f64>,
    pub tenure: Option<f64>,
}

impl RfmInput {
    /// Parse textual fields, treating blank strings as absent
    pub fn parse(
        recency: &str,
        frequency: &str,
        monetary: &str,
        tenure: &str,
    ) -> Result<Self, InputError> {
        Ok(Self {
            recency: parse_field("recency", recency)?,
            frequency: parse_field("frequency", frequency)?,
            monetary: parse_field("monetary", monetary)?,
            tenure: parse_field("tenure", tenure)?,
        })
    }

    /// Validate into a record, applying defaults to missing fields
    pub fn into_record(self) -> Result<RfmRecord, InputError> {
        let recency = match self.recency {
            Some(value) => check_count("recency", value)?,
            None => DEFAULT_RECENCY,
        };
        let frequency = match self.frequency {
            Some(value) => check_count("frequency", value)?,
            None => DEFAULT_FREQUENCY,
        };
        let tenure = match self.tenure {
            Some(value) => check_count("tenure", value)?,
            None => DEFAULT_TENURE,
        };
        RfmRecord::new(
            recency,
            frequency,
            self.monetary.unwrap_or(DEFAULT_MONETARY),
            tenure,
        )
    }
}

fn parse_field(field: &'static str, raw: &str) -> Result<Option<f64>, InputError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .map_err(|_| InputError::NotANumber {
            field,
            value: raw.to_string(),
        })
}

fn check_amount(field: &'static str, value: f64) -> Result<f64, InputError> {
    if !value.is_finite() {
        return Err(InputError::NotFinite { field, value });
    }
    if value < 0.0 {
        return Err(InputError::Negative { field, value });
    }
    Ok(value)
}

fn check_count(field: &'static str, value: f64) -> Result<u32, InputError> {
    let value = check_amount(field, value)?;
    if value.fract() != 0.0 {
        return Err(InputError::NotInteger { field, value });
    }
    if value > f64::from(u32::MAX) {
        return Err(InputError::OutOfRange {
            field,
            value,
            max: u32::MAX,
        });
    }
    Ok(value as u32)
}

/// Precomputed per-segment metrics and recommended strategies
///
/// Cells are kept as their textual CSV values so the table renders unmodified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentSummary {
    /// Column names, `Segment` first
    pub columns: Vec<String>,
    /// One row per segment, aligned with `columns`
    pub rows: Vec<Vec<String>>,
}

impl SegmentSummary {
    /// Look up a row by its segment identifier
    pub fn segment(&self, name: &str) -> Option<&[String]> {
        self.rows
            .iter()
            .find(|row| row.first().map(String::as_str) == Some(name))
            .map(Vec::as_slice)
    }
}

/// Read a CSV file into a DataFrame
pub(crate) fn read_csv(path: &Path) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()
}

/// Read a CSV file with every column kept as text, exactly as written
fn read_csv_as_text(path: &Path) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()
}

/// Load the segment summary CSV, indexed by its `Segment` column
///
/// # Arguments
/// * `path` - Path to the summary CSV
///
/// # Returns
/// * `SegmentSummary` with every column rendered as text
pub fn load_summary_table(path: &Path) -> Result<SegmentSummary, ArtifactError> {
    if !path.is_file() {
        return Err(ArtifactError::NotFound(path.to_path_buf()));
    }

    let df = read_csv_as_text(path).map_err(|source| ArtifactError::Table {
        path: path.to_path_buf(),
        source,
    })?;
    summary_from_frame(&df).map_err(|source| match source {
        SummaryShapeError::MissingIndex => ArtifactError::MissingIndex {
            path: path.to_path_buf(),
            column: SEGMENT_COLUMN,
        },
        SummaryShapeError::Polars(source) => ArtifactError::Table {
            path: path.to_path_buf(),
            source,
        },
    })
}

enum SummaryShapeError {
    MissingIndex,
    Polars(PolarsError),
}

impl From<PolarsError> for SummaryShapeError {
    fn from(err: PolarsError) -> Self {
        Self::Polars(err)
    }
}

fn summary_from_frame(df: &DataFrame) -> Result<SegmentSummary, SummaryShapeError> {
    let mut series: Vec<&Series> = df.get_columns().iter().collect();
    let index_pos = series
        .iter()
        .position(|s| s.name() == SEGMENT_COLUMN)
        .ok_or(SummaryShapeError::MissingIndex)?;
    let index = series.remove(index_pos);
    series.insert(0, index);

    let columns = series.iter().map(|s| s.name().to_string()).collect();

    let mut rows = vec![Vec::with_capacity(series.len()); df.height()];
    for s in series {
        let text = s.cast(&DataType::String)?;
        for (row, cell) in rows.iter_mut().zip(text.str()?.into_iter()) {
            row.push(cell.unwrap_or_default().to_string());
        }
    }

    Ok(SegmentSummary { columns, rows })
}

/// Extract RFM records from a customer CSV with `recency`, `frequency`, `monetary`, `tenure` columns
pub fn records_from_frame(df: &DataFrame) -> crate::Result<Vec<RfmRecord>> {
    let recency = float_column(df, "recency")?;
    let frequency = float_column(df, "frequency")?;
    let monetary = float_column(df, "monetary")?;
    let tenure = float_column(df, "tenure")?;

    let mut records = Vec::with_capacity(df.height());
    for row in 0..df.height() {
        let input = RfmInput {
            recency: Some(required_cell(&recency, row, "recency")?),
            frequency: Some(required_cell(&frequency, row, "frequency")?),
            monetary: Some(required_cell(&monetary, row, "monetary")?),
            tenure: Some(required_cell(&tenure, row, "tenure")?),
        };
        let record = input
            .into_record()
            .map_err(|e| anyhow::anyhow!("Row {}: {}", row + 1, e))?;
        records.push(record);
    }

    Ok(records)
}

/// Score every customer in `input` and write the CSV, with predictions appended, to `output`
///
/// # Returns
/// * Number of customers scored
pub fn score_csv(
    input: &Path,
    output: &Path,
    purchase_model: &dyn PurchaseModel,
    value_model: &dyn ValueModel,
) -> crate::Result<usize> {
    let mut df = read_csv(input)?;
    let records = records_from_frame(&df)?;

    let mut purchases = Vec::with_capacity(records.len());
    let mut values = Vec::with_capacity(records.len());
    let mut cltv = Vec::with_capacity(records.len());
    for (row, record) in records.iter().enumerate() {
        let prediction = predict(record, purchase_model, value_model)
            .map_err(|e| anyhow::anyhow!("Row {}: {}", row + 1, e))?;
        purchases.push(prediction.predicted_purchases);
        values.push(prediction.predicted_value);
        cltv.push(prediction.predicted_cltv);
    }

    df.with_column(Series::new("predicted_purchases", purchases))?;
    df.with_column(Series::new("predicted_value", values))?;
    df.with_column(Series::new("predicted_cltv", cltv))?;

    let mut file = std::fs::File::create(output)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(&mut df)?;

    Ok(records.len())
}

fn float_column(df: &DataFrame, name: &str) -> crate::Result<Vec<Option<f64>>> {
    let column = df
        .column(name)
        .map_err(|_| anyhow::anyhow!("Missing required column '{}'", name))?;
    let values = column.cast(&DataType::Float64)?;
    let values: Vec<Option<f64>> = values.f64()?.into_iter().collect();
    Ok(values)
}

fn required_cell(values: &[Option<f64>], row: usize, name: &str) -> crate::Result<f64> {
    values[row].ok_or_else(|| anyhow::anyhow!("Row {}: missing value for '{}'", row + 1, name))
}
