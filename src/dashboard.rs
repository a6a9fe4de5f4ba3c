//! HTTP dashboard: RFM input form, CLTV result, and the segment summary table

use crate::artifacts::{ArtifactLoader, Artifacts};
use crate::data::{
    InputError, RfmInput, SegmentSummary, DEFAULT_FREQUENCY, DEFAULT_MONETARY, DEFAULT_RECENCY,
    DEFAULT_TENURE,
};
use crate::model::ModelError;
use crate::pipeline::{predict_cltv, CltvPrediction};
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    loader: Arc<ArtifactLoader>,
}

impl AppState {
    fn artifacts(&self) -> &Artifacts {
        self.loader.artifacts()
    }
}

/// Build the dashboard router
pub fn router(loader: Arc<ArtifactLoader>) -> Router {
    Router::new()
        .route("/", get(index).post(submit))
        .route("/api/predict", post(api_predict))
        .route("/api/segments", get(api_segments))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { loader })
}

/// Bind `addr` and serve the dashboard until the process exits
pub async fn serve(addr: &str, loader: Arc<ArtifactLoader>) -> crate::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "serving cltv dashboard");
    axum::serve(listener, router(loader)).await?;
    Ok(())
}

/// Raw form fields, echoed back into the form after submission
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RfmForm {
    #[serde(default)]
    pub recency: String,
    #[serde(default)]
    pub frequency: String,
    #[serde(default)]
    pub monetary: String,
    #[serde(default)]
    pub tenure: String,
}

impl Default for RfmForm {
    fn default() -> Self {
        Self {
            recency: DEFAULT_RECENCY.to_string(),
            frequency: DEFAULT_FREQUENCY.to_string(),
            monetary: format!("{DEFAULT_MONETARY:.1}"),
            tenure: DEFAULT_TENURE.to_string(),
        }
    }
}

/// Result of one submission
#[derive(Debug)]
enum Outcome {
    Prediction(CltvPrediction),
    InvalidInput(InputError),
    ModelFailure(ModelError),
    ModelsUnavailable,
}

async fn index(State(state): State<AppState>) -> Html<String> {
    Html(render_page(state.artifacts(), &RfmForm::default(), None))
}

async fn submit(State(state): State<AppState>, Form(form): Form<RfmForm>) -> Html<String> {
    let artifacts = state.artifacts();

    let outcome = match RfmInput::parse(&form.recency, &form.frequency, &form.monetary, &form.tenure)
        .and_then(RfmInput::into_record)
    {
        Err(e) => Outcome::InvalidInput(e),
        Ok(record) => match predict_cltv(
            &record,
            artifacts.purchase_model.as_deref(),
            artifacts.value_model.as_deref(),
        ) {
            Ok(Some(prediction)) => {
                info!(cltv = prediction.predicted_cltv, "form prediction served");
                Outcome::Prediction(prediction)
            }
            Ok(None) => Outcome::ModelsUnavailable,
            Err(e) => {
                warn!(error = %e, "model query failed");
                Outcome::ModelFailure(e)
            }
        },
    };

    Html(render_page(artifacts, &form, Some(&outcome)))
}

/// JSON API failure
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(#[from] InputError),

    #[error("Prediction unavailable: model artifacts are not loaded")]
    ModelsUnavailable,

    #[error("Model query failed: {0}")]
    Model(#[from] ModelError),

    #[error("Segment summary not found")]
    SummaryNotFound,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::ModelsUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Model(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::SummaryNotFound => StatusCode::NOT_FOUND,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn api_predict(
    State(state): State<AppState>,
    Json(input): Json<RfmInput>,
) -> Result<Json<CltvPrediction>, ApiError> {
    let artifacts = state.artifacts();
    let record = input.into_record()?;

    let prediction = predict_cltv(
        &record,
        artifacts.purchase_model.as_deref(),
        artifacts.value_model.as_deref(),
    )?
    .ok_or(ApiError::ModelsUnavailable)?;

    Ok(Json(prediction))
}

async fn api_segments(State(state): State<AppState>) -> Result<Json<SegmentSummary>, ApiError> {
    state
        .artifacts()
        .summary
        .clone()
        .map(Json)
        .ok_or(ApiError::SummaryNotFound)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// Format with thousands separators and two decimals, e.g. `12,345.60`
pub fn format_number(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let (whole, fraction) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if value < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("{sign}{grouped}.{fraction}")
}

/// Format as dollars, e.g. `$1,234.56`
pub fn format_currency(value: f64) -> String {
    let number = format_number(value);
    match number.strip_prefix('-') {
        Some(rest) => format!("-${rest}"),
        None => format!("${number}"),
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

const STYLE: &str = r#"
    body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 0; display: flex; color: #262730; }
    aside { width: 300px; min-height: 100vh; background: #f0f2f6; padding: 24px; box-sizing: border-box; }
    main { flex: 1; padding: 32px 48px; }
    label { display: block; margin-top: 12px; font-size: 14px; }
    input { width: 100%; padding: 6px; margin-top: 4px; box-sizing: border-box; }
    button { margin-top: 20px; padding: 8px 16px; }
    .warning { background: #fff3cd; border-left: 4px solid #f0ad4e; padding: 12px; margin-bottom: 12px; }
    .error { background: #fde2e2; border-left: 4px solid #d9534f; padding: 12px; margin-bottom: 12px; }
    .success { background: #dff0d8; border-left: 4px solid #5cb85c; padding: 12px; margin-bottom: 12px; }
    table { border-collapse: collapse; }
    th, td { border: 1px solid #ddd; padding: 6px 12px; text-align: left; }
"#;

fn render_page(artifacts: &Artifacts, form: &RfmForm, outcome: Option<&Outcome>) -> String {
    let mut html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>CLTV Prediction &amp; Optimization</title>
<style>{STYLE}</style>
</head>
<body>
<aside>
<h2>Enter Customer RFM Data</h2>
<form method="post" action="/">
<label>Recency (Days since last purchase)<input type="number" name="recency" min="0" step="1" value="{recency}"></label>
<label>Frequency (Number of total purchases)<input type="number" name="frequency" min="0" step="1" value="{frequency}"></label>
<label>Total Monetary Value (Total spend)<input type="number" name="monetary" min="0" step="0.01" value="{monetary}"></label>
<label>Tenure (Customer Age in days)<input type="number" name="tenure" min="0" step="1" value="{tenure}"></label>
<button type="submit">Predict CLTV</button>
</form>
</aside>
<main>
<h1>Customer Lifetime Value (CLTV) Predictor</h1>
<p>This app predicts the Customer Lifetime Value for a new or existing customer based on their
Recency, Frequency, and Monetary (RFM) behavior. It leverages a probabilistic model
(BG/NBD and Gamma-Gamma) to forecast future revenue.</p>
<hr>
"#,
        recency = escape_html(&form.recency),
        frequency = escape_html(&form.frequency),
        monetary = escape_html(&form.monetary),
        tenure = escape_html(&form.tenure),
    );

    for warning in &artifacts.warnings {
        html.push_str(&format!(
            "<div class=\"warning\">{}</div>\n",
            escape_html(warning)
        ));
    }

    match outcome {
        Some(Outcome::Prediction(prediction)) => render_prediction(&mut html, prediction),
        Some(Outcome::InvalidInput(e)) => {
            html.push_str(&format!(
                "<div class=\"error\">Invalid input: {}</div>\n",
                escape_html(&e.to_string())
            ));
        }
        Some(Outcome::ModelFailure(e)) => {
            html.push_str(&format!(
                "<div class=\"error\">Prediction failed: {}</div>\n",
                escape_html(&e.to_string())
            ));
        }
        // The load warning above already explains why
        Some(Outcome::ModelsUnavailable) | None => {}
    }

    html.push_str("<hr>\n");
    render_summary(&mut html, artifacts.summary.as_ref());
    html.push_str("</main>\n</body>\n</html>\n");
    html
}

fn render_prediction(html: &mut String, prediction: &CltvPrediction) {
    html.push_str(&format!(
        r#"<div class="success"><h3>Predicted CLTV for the next 12 months: <strong>{cltv}</strong></h3></div>
<p>This customer is predicted to make <strong>{purchases}</strong> purchases.</p>
<p>The average monetary value per purchase is predicted to be <strong>{value}</strong>.</p>
"#,
        cltv = format_currency(prediction.predicted_cltv),
        purchases = format_number(prediction.predicted_purchases),
        value = format_currency(prediction.predicted_value),
    ));
}

fn render_summary(html: &mut String, summary: Option<&SegmentSummary>) {
    let Some(summary) = summary else {
        html.push_str(r#"<p class="not-found">Segment summary not found.</p>"#);
        html.push('\n');
        return;
    };

    html.push_str(
        "<h2>Project Recommendations Summary</h2>\n\
         <p>Based on the full customer analysis, the following segments and their characteristics were identified.\n\
         The table below provides the average metrics and proposed strategies for each group.</p>\n",
    );

    html.push_str("<table>\n<thead><tr>");
    for column in &summary.columns {
        html.push_str(&format!("<th>{}</th>", escape_html(column)));
    }
    html.push_str("</tr></thead>\n<tbody>\n");
    for row in &summary.rows {
        html.push_str("<tr>");
        for cell in row {
            html.push_str(&format!("<td>{}</td>", escape_html(cell)));
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</tbody>\n</table>\n");
}
