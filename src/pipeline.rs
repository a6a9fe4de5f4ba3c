//! RFM-to-CLTV prediction pipeline

use crate::data::RfmRecord;
use crate::model::{ModelError, PurchaseModel, ValueModel};
use serde::Serialize;
use tracing::debug;

/// Forecast window for purchase counts, in days
pub const FORECAST_HORIZON_DAYS: f64 = 365.0;

/// Features in the shape the repeat-purchase model was fitted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelFeatures {
    /// Repeat purchases, i.e. total purchases minus the first
    pub frequency: u32,
    /// Span between first and last purchase, clamped at zero
    pub recency: u32,
    /// Raw customer age
    pub tenure: u32,
}

impl ModelFeatures {
    pub fn from_record(record: &RfmRecord) -> Self {
        Self {
            frequency: record.frequency().saturating_sub(1),
            recency: record.tenure().saturating_sub(record.recency()),
            tenure: record.tenure(),
        }
    }
}

/// CLTV estimate together with the factors it was built from
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CltvPrediction {
    pub features: ModelFeatures,
    pub predicted_purchases: f64,
    pub predicted_value: f64,
    pub predicted_cltv: f64,
}

/// Predict CLTV for one customer
///
/// # Arguments
/// * `record` - Validated RFM input
/// * `purchase_model` - Fitted purchase model, if it loaded
/// * `value_model` - Fitted value model, if it loaded
///
/// # Returns
/// * `Ok(None)` when either model is absent, otherwise the estimate.
///   Model query failures are returned unchanged.
pub fn predict_cltv(
    record: &RfmRecord,
    purchase_model: Option<&dyn PurchaseModel>,
    value_model: Option<&dyn ValueModel>,
) -> Result<Option<CltvPrediction>, ModelError> {
    let (Some(purchase_model), Some(value_model)) = (purchase_model, value_model) else {
        debug!("prediction skipped, model artifacts missing");
        return Ok(None);
    };
    predict(record, purchase_model, value_model).map(Some)
}

/// Predict CLTV for one customer with both models present
pub fn predict(
    record: &RfmRecord,
    purchase_model: &dyn PurchaseModel,
    value_model: &dyn ValueModel,
) -> Result<CltvPrediction, ModelError> {
    let features = ModelFeatures::from_record(record);

    let predicted_purchases = purchase_model.forecast_purchases(
        FORECAST_HORIZON_DAYS,
        f64::from(features.frequency),
        f64::from(features.recency),
        f64::from(features.tenure),
    )?;

    // Value model is undefined without purchases; fall back to the observed spend
    let predicted_value = if record.frequency() > 0 {
        value_model.forecast_value(f64::from(record.frequency()), record.monetary())?
    } else {
        record.monetary()
    };

    let predicted_cltv = predicted_purchases * predicted_value;

    debug!(
        frequency = features.frequency,
        recency = features.recency,
        tenure = features.tenure,
        predicted_purchases,
        predicted_value,
        predicted_cltv,
        "cltv predicted"
    );

    Ok(CltvPrediction {
        features,
        predicted_purchases,
        predicted_value,
        predicted_cltv,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every query and answers with a fixed value
    struct RecordingPurchaseModel {
        answer: f64,
        calls: Mutex<Vec<(f64, f64, f64, f64)>>,
    }

    impl RecordingPurchaseModel {
        fn new(answer: f64) -> Self {
            Self {
                answer,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(f64, f64, f64, f64)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl PurchaseModel for RecordingPurchaseModel {
        fn forecast_purchases(
            &self,
            horizon: f64,
            frequency: f64,
            recency: f64,
            tenure: f64,
        ) -> Result<f64, ModelError> {
            self.calls
                .lock()
                .unwrap()
                .push((horizon, frequency, recency, tenure));
            Ok(self.answer)
        }
    }

    struct RecordingValueModel {
        answer: f64,
        calls: Mutex<Vec<(f64, f64)>>,
    }

    impl RecordingValueModel {
        fn new(answer: f64) -> Self {
            Self {
                answer,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(f64, f64)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ValueModel for RecordingValueModel {
        fn forecast_value(&self, frequency: f64, monetary: f64) -> Result<f64, ModelError> {
            self.calls.lock().unwrap().push((frequency, monetary));
            Ok(self.answer)
        }
    }

    struct FailingPurchaseModel;

    impl PurchaseModel for FailingPurchaseModel {
        fn forecast_purchases(&self, _: f64, _: f64, _: f64, _: f64) -> Result<f64, ModelError> {
            Err(ModelError::InvalidInput("rejected".to_string()))
        }
    }

    fn record(recency: u32, frequency: u32, monetary: f64, tenure: u32) -> RfmRecord {
        RfmRecord::new(recency, frequency, monetary, tenure).unwrap()
    }

    #[test]
    fn test_repeat_buyer_calls_both_models() {
        let bgf = RecordingPurchaseModel::new(2.5);
        let ggf = RecordingValueModel::new(180.0);

        let prediction = predict_cltv(&record(30, 3, 500.0, 150), Some(&bgf), Some(&ggf))
            .unwrap()
            .unwrap();

        assert_eq!(
            prediction.features,
            ModelFeatures {
                frequency: 2,
                recency: 120,
                tenure: 150
            }
        );
        assert_eq!(bgf.calls(), vec![(365.0, 2.0, 120.0, 150.0)]);
        assert_eq!(ggf.calls(), vec![(3.0, 500.0)]);
        assert_eq!(prediction.predicted_cltv, 2.5 * 180.0);
    }

    #[test]
    fn test_new_customer_skips_value_model() {
        let bgf = RecordingPurchaseModel::new(0.8);
        let ggf = RecordingValueModel::new(999.0);

        let prediction = predict_cltv(&record(0, 0, 200.0, 0), Some(&bgf), Some(&ggf))
            .unwrap()
            .unwrap();

        assert_eq!(prediction.features.frequency, 0);
        assert_eq!(prediction.features.recency, 0);
        assert_eq!(prediction.predicted_value, 200.0);
        assert_eq!(bgf.calls(), vec![(365.0, 0.0, 0.0, 0.0)]);
        assert!(ggf.calls().is_empty());
        assert_eq!(prediction.predicted_cltv, 0.8 * 200.0);
    }

    #[test]
    fn test_recency_beyond_tenure_is_clamped() {
        let bgf = RecordingPurchaseModel::new(1.0);
        let ggf = RecordingValueModel::new(1.0);

        let prediction = predict_cltv(&record(200, 5, 1000.0, 100), Some(&bgf), Some(&ggf))
            .unwrap()
            .unwrap();

        assert_eq!(prediction.features.recency, 0);
        assert_eq!(prediction.features.frequency, 4);
        assert_eq!(bgf.calls(), vec![(365.0, 4.0, 0.0, 100.0)]);
    }

    #[test]
    fn test_feature_adjustment_rules() {
        for recency in [0u32, 1, 50, 149, 150, 151, 400] {
            for frequency in [0u32, 1, 2, 17] {
                let features = ModelFeatures::from_record(&record(recency, frequency, 10.0, 150));

                let expected_frequency = if frequency > 0 { frequency - 1 } else { 0 };
                let expected_recency = if 150 > recency { 150 - recency } else { 0 };
                assert_eq!(features.frequency, expected_frequency);
                assert_eq!(features.recency, expected_recency);
                assert_eq!(features.tenure, 150);
            }
        }
    }

    #[test]
    fn test_missing_model_declines() {
        let bgf = RecordingPurchaseModel::new(1.0);
        let ggf = RecordingValueModel::new(1.0);
        let input = RfmRecord::default();

        assert!(predict_cltv(&input, None, Some(&ggf)).unwrap().is_none());
        assert!(predict_cltv(&input, Some(&bgf), None).unwrap().is_none());
        assert!(predict_cltv(&input, None, None).unwrap().is_none());
        assert!(bgf.calls().is_empty());
        assert!(ggf.calls().is_empty());
    }

    #[test]
    fn test_model_failure_propagates() {
        let ggf = RecordingValueModel::new(1.0);
        let result = predict_cltv(&RfmRecord::default(), Some(&FailingPurchaseModel), Some(&ggf));
        assert!(matches!(result, Err(ModelError::InvalidInput(_))));
    }
}
