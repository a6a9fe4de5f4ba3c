//! CltvForge: CLTV dashboard, one-shot prediction, and batch scoring
//!
//! This is the main entrypoint that loads the model artifacts once and then
//! either serves the dashboard, predicts a single customer, or scores a CSV.

use anyhow::Result;
use clap::Parser;
use cltvforge::dashboard::{self, format_currency, format_number};
use cltvforge::{predict_cltv, score_csv, ArtifactLoader, Args, RfmRecord};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing from CLTV_LOG, falling back to info (debug with --verbose)
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("CLTV_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();
    init_tracing(args.verbose);

    // Load artifacts once, before any request or prediction needs them
    let loader = Arc::new(ArtifactLoader::new(args.artifact_paths()));
    let start_time = Instant::now();
    let artifacts = loader.artifacts();
    info!(
        models_ready = artifacts.models_ready(),
        summary_loaded = artifacts.summary.is_some(),
        elapsed_ms = start_time.elapsed().as_millis() as u64,
        "artifacts loaded"
    );

    if let Some(record) = args.parse_rfm_values()? {
        run_prediction_mode(&loader, record)
    } else if let Some(input) = &args.score {
        let output = args
            .output
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("--output is required with --score"))?;
        run_scoring_mode(&loader, input, output)
    } else {
        dashboard::serve(&args.bind, loader).await
    }
}

/// Run prediction mode for a single customer
fn run_prediction_mode(loader: &ArtifactLoader, record: RfmRecord) -> Result<()> {
    let artifacts = loader.artifacts();

    println!("=== Prediction Mode ===");
    println!(
        "Input: R={}, F={}, M={:.2}, T={}",
        record.recency(),
        record.frequency(),
        record.monetary(),
        record.tenure()
    );
    for warning in &artifacts.warnings {
        println!("! {}", warning);
    }

    let prediction = predict_cltv(
        &record,
        artifacts.purchase_model.as_deref(),
        artifacts.value_model.as_deref(),
    )?
    .ok_or_else(|| anyhow::anyhow!("Prediction unavailable: model artifacts are not loaded"))?;

    println!(
        "\n✓ Predicted CLTV for the next 12 months: {}",
        format_currency(prediction.predicted_cltv)
    );
    println!(
        "  This customer is predicted to make {} purchases.",
        format_number(prediction.predicted_purchases)
    );
    println!(
        "  The average monetary value per purchase is predicted to be {}.",
        format_currency(prediction.predicted_value)
    );

    Ok(())
}

/// Score every customer in a CSV file
fn run_scoring_mode(
    loader: &ArtifactLoader,
    input: &std::path::Path,
    output: &std::path::Path,
) -> Result<()> {
    let artifacts = loader.artifacts();
    let (Some(purchase_model), Some(value_model)) =
        (artifacts.purchase_model.as_deref(), artifacts.value_model.as_deref())
    else {
        anyhow::bail!("Scoring unavailable: {}", artifacts.warnings.join(" "));
    };

    println!("=== Batch Scoring ===");
    let start_time = Instant::now();
    let scored = score_csv(input, output, purchase_model, value_model)?;

    println!("✓ Scored {} customers", scored);
    println!("  Processing time: {:.2}s", start_time.elapsed().as_secs_f64());
    println!("  Output saved to: {}", output.display());

    Ok(())
}
