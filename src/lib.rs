//! CltvForge: customer lifetime value prediction from RFM inputs
//!
//! This library loads fitted BG/NBD and Gamma-Gamma models plus a precomputed
//! segment summary, turns one customer's Recency, Frequency, Monetary and
//! tenure values into a 12-month CLTV estimate, and serves both through a
//! small HTTP dashboard.

pub mod artifacts;
pub mod cli;
pub mod dashboard;
pub mod data;
pub mod model;
pub mod pipeline;

// Re-export public items for easier access
pub use artifacts::{ArtifactLoader, ArtifactPaths, Artifacts};
pub use cli::Args;
pub use data::{load_summary_table, score_csv, RfmInput, RfmRecord, SegmentSummary};
pub use model::{BetaGeoModel, GammaGammaModel, ModelError, PurchaseModel, ValueModel};
pub use pipeline::{predict_cltv, CltvPrediction, ModelFeatures, FORECAST_HORIZON_DAYS};

/// Common result type used throughout the application
pub type Result<T> = anyhow::Result<T>;
