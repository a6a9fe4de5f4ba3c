//! Command-line interface definitions and argument parsing

use crate::artifacts::{
    ArtifactPaths, DEFAULT_PURCHASE_MODEL_PATH, DEFAULT_SUMMARY_PATH, DEFAULT_VALUE_MODEL_PATH,
};
use crate::data::{RfmInput, RfmRecord};
use clap::Parser;
use std::path::PathBuf;

/// Customer lifetime value dashboard backed by fitted BG/NBD and Gamma-Gamma models
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the fitted BG/NBD model
    #[arg(long, default_value = DEFAULT_PURCHASE_MODEL_PATH)]
    pub purchase_model: PathBuf,

    /// Path to the fitted Gamma-Gamma model
    #[arg(long, default_value = DEFAULT_VALUE_MODEL_PATH)]
    pub value_model: PathBuf,

    /// Path to the segment summary CSV
    #[arg(short, long, default_value = DEFAULT_SUMMARY_PATH)]
    pub summary: PathBuf,

    /// Address the dashboard listens on
    #[arg(short, long, default_value = "127.0.0.1:8501")]
    pub bind: String,

    /// Prediction mode: provide R,F,M,T values as comma-separated string
    /// Example: --predict "30,3,500.0,150" for Recency=30, Frequency=3, Monetary=500.0, Tenure=150
    #[arg(short, long, conflicts_with = "score")]
    pub predict: Option<String>,

    /// Batch mode: CSV with recency, frequency, monetary and tenure columns to score
    #[arg(long, requires = "output")]
    pub score: Option<PathBuf>,

    /// Output CSV for batch mode
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn artifact_paths(&self) -> ArtifactPaths {
        ArtifactPaths {
            purchase_model: self.purchase_model.clone(),
            value_model: self.value_model.clone(),
            summary: self.summary.clone(),
        }
    }

    /// Parse RFM values from the predict string
    /// Expected format: "recency,frequency,monetary,tenure"
    pub fn parse_rfm_values(&self) -> crate::Result<Option<RfmRecord>> {
        let Some(ref predict_str) = self.predict else {
            return Ok(None);
        };

        let parts: Vec<&str> = predict_str.split(',').collect();
        if parts.len() != 4 {
            anyhow::bail!("Predict values must be in format 'recency,frequency,monetary,tenure'");
        }
        if let Some(blank) = parts.iter().position(|p| p.trim().is_empty()) {
            anyhow::bail!("Predict value {} is empty", blank + 1);
        }

        let record = RfmInput::parse(parts[0], parts[1], parts[2], parts[3])?.into_record()?;
        Ok(Some(record))
    }
}
