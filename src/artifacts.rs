//! One-time loading of the fitted models and the segment summary table

use crate::data::{load_summary_table, SegmentSummary};
use crate::model::{BetaGeoModel, GammaGammaModel, ModelError, PurchaseModel, ValueModel};
use once_cell::sync::OnceCell;
use polars::prelude::PolarsError;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_PURCHASE_MODEL_PATH: &str = "models/bgf.json";
pub const DEFAULT_VALUE_MODEL_PATH: &str = "models/ggf.json";
pub const DEFAULT_SUMMARY_PATH: &str = "data/processed/final_cltv_summary.csv";

/// Failure to load one artifact
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("{} not found", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid model in {}: {source}", .path.display())]
    Model { path: PathBuf, source: ModelError },

    #[error("Failed to parse table {}: {source}", .path.display())]
    Table { path: PathBuf, source: PolarsError },

    #[error("Table {} has no '{column}' column", .path.display())]
    MissingIndex { path: PathBuf, column: &'static str },
}

/// Storage locations of the three artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub purchase_model: PathBuf,
    pub value_model: PathBuf,
    pub summary: PathBuf,
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        Self {
            purchase_model: PathBuf::from(DEFAULT_PURCHASE_MODEL_PATH),
            value_model: PathBuf::from(DEFAULT_VALUE_MODEL_PATH),
            summary: PathBuf::from(DEFAULT_SUMMARY_PATH),
        }
    }
}

/// Everything loaded at start-up; absent fields failed to load
#[derive(Clone, Default)]
pub struct Artifacts {
    pub purchase_model: Option<Arc<dyn PurchaseModel>>,
    pub value_model: Option<Arc<dyn ValueModel>>,
    pub summary: Option<SegmentSummary>,
    /// User-facing messages for each failed load
    pub warnings: Vec<String>,
}

impl Artifacts {
    /// Load all three artifacts independently; a failure only blanks its own slot
    pub fn load(paths: &ArtifactPaths) -> Self {
        let mut warnings = Vec::new();

        let purchase_model = match load_bgf(&paths.purchase_model) {
            Ok(bgf) => {
                info!(
                    path = %paths.purchase_model.display(),
                    params = ?bgf.params(),
                    "loaded purchase model"
                );
                Some(Arc::new(bgf) as Arc<dyn PurchaseModel>)
            }
            Err(e) => {
                warn!(error = %e, "purchase model unavailable");
                warnings.push(format!("Purchase model could not be loaded ({e})."));
                None
            }
        };

        let value_model = match load_ggf(&paths.value_model) {
            Ok(ggf) => {
                info!(
                    path = %paths.value_model.display(),
                    params = ?ggf.params(),
                    "loaded value model"
                );
                Some(Arc::new(ggf) as Arc<dyn ValueModel>)
            }
            Err(e) => {
                warn!(error = %e, "value model unavailable");
                warnings.push(format!("Value model could not be loaded ({e})."));
                None
            }
        };

        let summary = match load_summary_table(&paths.summary) {
            Ok(summary) => {
                info!(
                    path = %paths.summary.display(),
                    segments = summary.rows.len(),
                    "loaded segment summary"
                );
                Some(summary)
            }
            Err(e) => {
                warn!(error = %e, "segment summary unavailable");
                warnings.push(format!("Summary table could not be loaded ({e})."));
                None
            }
        };

        Self {
            purchase_model,
            value_model,
            summary,
            warnings,
        }
    }

    pub fn models_ready(&self) -> bool {
        self.purchase_model.is_some() && self.value_model.is_some()
    }
}

impl std::fmt::Debug for Artifacts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifacts")
            .field("purchase_model", &self.purchase_model.is_some())
            .field("value_model", &self.value_model.is_some())
            .field("summary", &self.summary.as_ref().map(|s| s.rows.len()))
            .field("warnings", &self.warnings)
            .finish()
    }
}

/// Lazily loads [`Artifacts`] exactly once and hands out shared references
///
/// Concurrent first accesses block on a single load.
#[derive(Debug)]
pub struct ArtifactLoader {
    paths: ArtifactPaths,
    cell: OnceCell<Artifacts>,
    loads: AtomicUsize,
}

impl ArtifactLoader {
    pub fn new(paths: ArtifactPaths) -> Self {
        Self {
            paths,
            cell: OnceCell::new(),
            loads: AtomicUsize::new(0),
        }
    }

    /// Wrap already-loaded artifacts, skipping storage entirely
    pub fn preloaded(paths: ArtifactPaths, artifacts: Artifacts) -> Self {
        Self {
            paths,
            cell: OnceCell::with_value(artifacts),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn artifacts(&self) -> &Artifacts {
        self.cell.get_or_init(|| {
            let attempt = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(attempt, "reading artifacts from storage");
            Artifacts::load(&self.paths)
        })
    }

    /// Number of times storage has been read
    #[cfg(test)]
    fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

fn read_artifact(path: &Path) -> Result<String, ArtifactError> {
    std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ArtifactError::NotFound(path.to_path_buf())
        } else {
            ArtifactError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

fn load_bgf(path: &Path) -> Result<BetaGeoModel, ArtifactError> {
    BetaGeoModel::from_json(&read_artifact(path)?).map_err(|source| ArtifactError::Model {
        path: path.to_path_buf(),
        source,
    })
}

fn load_ggf(path: &Path) -> Result<GammaGammaModel, ArtifactError> {
    GammaGammaModel::from_json(&read_artifact(path)?).map_err(|source| ArtifactError::Model {
        path: path.to_path_buf(),
        source,
    })
}
