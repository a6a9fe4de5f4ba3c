//! Fitted BG/NBD and Gamma-Gamma models behind narrow query traits

use serde::Deserialize;

/// Iteration cap for the hypergeometric series
const MAX_SERIES_TERMS: usize = 200_000;

/// Relative tolerance at which the hypergeometric series is considered converged
const SERIES_TOLERANCE: f64 = 1e-15;

/// Errors raised while building or querying a fitted model
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Parameter '{name}' must be finite and positive, got {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("Invalid model input: {0}")]
    InvalidInput(String),

    #[error("Numerical failure: {0}")]
    Numerical(String),

    #[error("Malformed model artifact: {0}")]
    Deserialize(#[from] serde_json::Error),
}

/// Expected number of future transactions for one customer
pub trait PurchaseModel: Send + Sync {
    /// Conditional expected number of purchases in `(T, T + horizon]`
    ///
    /// # Arguments
    /// * `horizon` - Forward window length, in the model's time units
    /// * `frequency` - Repeat purchases observed
    /// * `recency` - Age of the customer at the last repeat purchase
    /// * `tenure` - Age of the customer at the end of observation
    fn forecast_purchases(
        &self,
        horizon: f64,
        frequency: f64,
        recency: f64,
        tenure: f64,
    ) -> Result<f64, ModelError>;
}

/// Expected average value of one future transaction for one customer
pub trait ValueModel: Send + Sync {
    /// Conditional expected average transaction value
    fn forecast_value(&self, frequency: f64, monetary: f64) -> Result<f64, ModelError>;
}

/// Fitted BG/NBD parameters
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct BetaGeoParams {
    pub r: f64,
    pub alpha: f64,
    pub a: f64,
    pub b: f64,
}

/// Fitted Gamma-Gamma parameters
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct GammaGammaParams {
    pub p: f64,
    pub q: f64,
    pub v: f64,
}

/// On-disk layout of a serialized fitter; everything but the parameters is ignored
#[derive(Debug, Deserialize)]
struct FittedArtifact<P> {
    #[serde(alias = "params_")]
    params: P,
}

/// BG/NBD repeat-purchase model
#[derive(Debug, Clone, PartialEq)]
pub struct BetaGeoModel {
    params: BetaGeoParams,
}

impl BetaGeoModel {
    pub fn new(params: BetaGeoParams) -> Result<Self, ModelError> {
        require_positive("r", params.r)?;
        require_positive("alpha", params.alpha)?;
        require_positive("a", params.a)?;
        require_positive("b", params.b)?;
        Ok(Self { params })
    }

    /// Parse a serialized fitter, validating its parameters
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let artifact: FittedArtifact<BetaGeoParams> = serde_json::from_str(json)?;
        Self::new(artifact.params)
    }

    pub fn params(&self) -> &BetaGeoParams {
        &self.params
    }
}

impl PurchaseModel for BetaGeoModel {
    fn forecast_purchases(
        &self,
        horizon: f64,
        frequency: f64,
        recency: f64,
        tenure: f64,
    ) -> Result<f64, ModelError> {
        require_non_negative("horizon", horizon)?;
        require_non_negative("frequency", frequency)?;
        require_non_negative("recency", recency)?;
        require_non_negative("tenure", tenure)?;

        let BetaGeoParams { r, alpha, a, b } = self.params;
        let (x, t_x, big_t, t) = (frequency, recency, tenure, horizon);

        let hyp_a = r + x;
        let hyp_b = b + x;
        let hyp_c = a + b + x - 1.0;
        let z = t / (alpha + big_t + t);

        let ln_hyp_term = ln_hyp2f1(hyp_a, hyp_b, hyp_c, z)?;

        let first_term = (a + b + x - 1.0) / (a - 1.0);
        let second_term =
            1.0 - (ln_hyp_term + (r + x) * ((alpha + big_t) / (alpha + t + big_t)).ln()).exp();
        let numerator = first_term * second_term;

        let denominator = if x > 0.0 {
            1.0 + (a / (b + x - 1.0)) * ((alpha + big_t) / (alpha + t_x)).powf(r + x)
        } else {
            1.0
        };

        let expected = numerator / denominator;
        if !expected.is_finite() {
            return Err(ModelError::Numerical(format!(
                "purchase forecast is not finite for frequency={x}, recency={t_x}, tenure={big_t}"
            )));
        }
        Ok(expected)
    }
}

/// Gamma-Gamma spend model
#[derive(Debug, Clone, PartialEq)]
pub struct GammaGammaModel {
    params: GammaGammaParams,
}

impl GammaGammaModel {
    pub fn new(params: GammaGammaParams) -> Result<Self, ModelError> {
        require_positive("p", params.p)?;
        require_positive("q", params.q)?;
        require_positive("v", params.v)?;
        Ok(Self { params })
    }

    /// Parse a serialized fitter, validating its parameters
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let artifact: FittedArtifact<GammaGammaParams> = serde_json::from_str(json)?;
        Self::new(artifact.params)
    }

    pub fn params(&self) -> &GammaGammaParams {
        &self.params
    }
}

impl ValueModel for GammaGammaModel {
    fn forecast_value(&self, frequency: f64, monetary: f64) -> Result<f64, ModelError> {
        if !frequency.is_finite() || frequency <= 0.0 {
            return Err(ModelError::InvalidInput(format!(
                "frequency must be positive, got {frequency}"
            )));
        }
        require_non_negative("monetary", monetary)?;

        let GammaGammaParams { p, q, v } = self.params;
        let individual_weight = p * frequency / (p * frequency + q - 1.0);
        let population_mean = v * p / (q - 1.0);
        let expected = (1.0 - individual_weight) * population_mean + individual_weight * monetary;

        if !expected.is_finite() {
            return Err(ModelError::Numerical(format!(
                "value forecast is not finite for frequency={frequency}, monetary={monetary}"
            )));
        }
        Ok(expected)
    }
}

fn require_positive(name: &'static str, value: f64) -> Result<(), ModelError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ModelError::InvalidParameter { name, value })
    }
}

fn require_non_negative(name: &str, value: f64) -> Result<(), ModelError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ModelError::InvalidInput(format!(
            "{name} must be finite and non-negative, got {value}"
        )))
    }
}

/// Natural log of the Gauss hypergeometric function 2F1(a, b; c; z) for `0 <= z < 1`
///
/// Falls back to Euler's transformation when the direct series overflows.
fn ln_hyp2f1(a: f64, b: f64, c: f64, z: f64) -> Result<f64, ModelError> {
    if !(0.0..1.0).contains(&z) {
        return Err(ModelError::Numerical(format!(
            "hypergeometric argument {z} outside [0, 1)"
        )));
    }
    if c <= 0.0 && c.fract() == 0.0 {
        return Err(ModelError::Numerical(format!(
            "hypergeometric parameter c={c} is a non-positive integer"
        )));
    }

    match hyp2f1_series(a, b, c, z) {
        Some(value) if value.is_finite() && value > 0.0 => Ok(value.ln()),
        _ => {
            let transformed = hyp2f1_series(c - a, c - b, c, z)
                .filter(|value| value.is_finite() && *value > 0.0)
                .ok_or_else(|| {
                    ModelError::Numerical(format!(
                        "hypergeometric series diverged for a={a}, b={b}, c={c}, z={z}"
                    ))
                })?;
            Ok(transformed.ln() + (c - a - b) * (1.0 - z).ln())
        }
    }
}

/// Direct power series; `None` when it fails to converge within the iteration cap
fn hyp2f1_series(a: f64, b: f64, c: f64, z: f64) -> Option<f64> {
    let mut term = 1.0_f64;
    let mut sum = 1.0_f64;

    for n in 0..MAX_SERIES_TERMS {
        let n = n as f64;
        term *= (a + n) * (b + n) / ((c + n) * (n + 1.0)) * z;
        sum += term;

        if !sum.is_finite() {
            return None;
        }
        if term.abs() <= SERIES_TOLERANCE * sum.abs() {
            return Some(sum);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol * (1.0 + expected.abs()),
            "expected {expected}, got {actual}"
        );
    }

    fn cdnow_bgf() -> BetaGeoModel {
        BetaGeoModel::new(BetaGeoParams {
            r: 0.243,
            alpha: 4.414,
            a: 0.793,
            b: 2.426,
        })
        .unwrap()
    }

    #[test]
    fn test_hyp2f1_matches_log_closed_form() {
        // 2F1(1, 1; 2; z) = -ln(1 - z) / z
        for &z in &[0.1_f64, 0.5, 0.9, 0.99] {
            let expected = (-(1.0 - z).ln() / z).ln();
            assert_close(ln_hyp2f1(1.0, 1.0, 2.0, z).unwrap(), expected, 1e-10);
        }
    }

    #[test]
    fn test_hyp2f1_at_zero_is_one() {
        assert_eq!(ln_hyp2f1(3.0, 4.0, 5.0, 0.0).unwrap(), 0.0);
    }

    #[test]
    fn test_hyp2f1_rejects_pole() {
        assert!(ln_hyp2f1(1.0, 1.0, -2.0, 0.5).is_err());
        assert!(ln_hyp2f1(1.0, 1.0, 2.0, 1.0).is_err());
    }

    #[test]
    fn test_bgf_matches_closed_form_for_new_customer() {
        // r = 1, b = 1, a = 2 reduces the hypergeometric term to -ln(1 - z) / z
        let model = BetaGeoModel::new(BetaGeoParams {
            r: 1.0,
            alpha: 10.0,
            a: 2.0,
            b: 1.0,
        })
        .unwrap();

        let z: f64 = 365.0 / 375.0;
        let hyp = -(1.0 - z).ln() / z;
        let expected = 2.0 * (1.0 - hyp * (10.0 / 375.0));

        let actual = model.forecast_purchases(365.0, 0.0, 0.0, 0.0).unwrap();
        assert_close(actual, expected, 1e-9);
    }

    #[test]
    fn test_bgf_forecast_grows_with_horizon() {
        let model = cdnow_bgf();
        let short = model.forecast_purchases(30.0, 2.0, 30.0, 38.0).unwrap();
        let long = model.forecast_purchases(365.0, 2.0, 30.0, 38.0).unwrap();
        assert!(short > 0.0);
        assert!(long > short);
    }

    #[test]
    fn test_bgf_zero_horizon_is_zero() {
        let model = cdnow_bgf();
        let expected = model.forecast_purchases(0.0, 4.0, 20.0, 30.0).unwrap();
        assert_close(expected, 0.0, 1e-12);
    }

    #[test]
    fn test_bgf_recent_buyer_beats_lapsed_buyer() {
        let model = cdnow_bgf();
        let recent = model.forecast_purchases(365.0, 5.0, 35.0, 38.0).unwrap();
        let lapsed = model.forecast_purchases(365.0, 5.0, 5.0, 38.0).unwrap();
        assert!(recent > lapsed);
    }

    #[test]
    fn test_bgf_rejects_malformed_input() {
        let model = cdnow_bgf();
        assert!(matches!(
            model.forecast_purchases(365.0, -1.0, 0.0, 0.0),
            Err(ModelError::InvalidInput(_))
        ));
        assert!(model.forecast_purchases(f64::NAN, 1.0, 0.0, 0.0).is_err());
    }

    #[test]
    fn test_ggf_is_weighted_mean() {
        let model = GammaGammaModel::new(GammaGammaParams {
            p: 6.25,
            q: 3.74,
            v: 15.45,
        })
        .unwrap();

        let weight = 6.25 * 3.0 / (6.25 * 3.0 + 3.74 - 1.0);
        let population_mean = 15.45 * 6.25 / (3.74 - 1.0);
        let expected = (1.0 - weight) * population_mean + weight * 500.0;

        assert_close(model.forecast_value(3.0, 500.0).unwrap(), expected, 1e-12);
    }

    #[test]
    fn test_ggf_rejects_zero_frequency() {
        let model = GammaGammaModel::new(GammaGammaParams {
            p: 6.25,
            q: 3.74,
            v: 15.45,
        })
        .unwrap();
        assert!(model.forecast_value(0.0, 100.0).is_err());
        assert!(model.forecast_value(2.0, -5.0).is_err());
    }

    #[test]
    fn test_from_json_reads_fitter_params() {
        let bgf =
            BetaGeoModel::from_json(r#"{"params_": {"r": 0.243, "alpha": 4.414, "a": 0.793, "b": 2.426}, "penalizer_coef": 0.0}"#)
                .unwrap();
        assert_eq!(bgf.params().alpha, 4.414);

        let ggf = GammaGammaModel::from_json(r#"{"params": {"p": 6.25, "q": 3.74, "v": 15.45}}"#)
            .unwrap();
        assert_eq!(ggf.params().q, 3.74);
    }

    #[test]
    fn test_from_json_rejects_bad_params() {
        assert!(matches!(
            BetaGeoModel::from_json(r#"{"params_": {"r": 0.2, "alpha": 4.4}}"#),
            Err(ModelError::Deserialize(_))
        ));
        assert!(matches!(
            GammaGammaModel::from_json(r#"{"params_": {"p": -1.0, "q": 3.7, "v": 15.4}}"#),
            Err(ModelError::InvalidParameter { name: "p", .. })
        ));
        assert!(BetaGeoModel::from_json("not json").is_err());
    }
}
