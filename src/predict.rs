use std::sync::Arc;

use axum::body::Bytes;
use serde::Serialize;

use crate::classifier::Classifier;
use crate::error::PredictError;
use crate::labels::LabelTable;
use crate::load_image::load_image;

/// The `file` part of a `/predict` upload.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub predicted_index: usize,
    pub predicted_disease: String,
    /// Percentage in [0, 100], two decimals.
    pub confidence: f64,
}

/// Decode -> classify -> label, for a single upload.
#[derive(Clone)]
pub struct Predictor {
    classifier: Arc<dyn Classifier>,
    labels: Arc<LabelTable>,
}

impl Predictor {
    pub fn new(classifier: Arc<dyn Classifier>, labels: LabelTable) -> Self {
        Self {
            classifier,
            labels: Arc::new(labels),
        }
    }

    pub fn predict(&self, upload: Option<Upload>) -> Result<Prediction, PredictError> {
        let upload = upload.ok_or(PredictError::NoFileUploaded)?;
        if upload.file_name.is_empty() {
            return Err(PredictError::NoFileSelected);
        }

        let tensor = load_image(&upload.bytes).map_err(|err| {
            tracing::debug!("failed to decode {}: {}", upload.file_name, err.detail());
            err
        })?;
        let batch = tensor
            .unsqueeze(0)
            .map_err(|err| PredictError::failure(err.to_string()))?;

        let scores = self.classifier.predict(&batch)?;
        let (index, max) = argmax(&scores)
            .ok_or_else(|| PredictError::failure("model returned no scores"))?;
        let prediction = Prediction {
            predicted_index: index,
            predicted_disease: self.labels.lookup(index).to_string(),
            confidence: confidence(max),
        };

        tracing::info!(
            "Prediction index: {}, Label: {}, Confidence: {}",
            prediction.predicted_index,
            prediction.predicted_disease,
            prediction.confidence
        );
        Ok(prediction)
    }
}

/// Index and value of the largest score. Ties go to the lowest index and NaN
/// never wins; `None` if there is no comparable score at all.
pub fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in scores.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best
}

/// `max` as a percentage rounded to two decimals, clamped to [0, 100].
pub fn confidence(max: f32) -> f64 {
    round2((f64::from(max) * 100.0).clamp(0.0, 100.0))
}

/// Rounds the exact binary value to two decimals, ties to even. Scaling by 100
/// first would round values such as 0.125 the wrong way.
fn round2(x: f64) -> f64 {
    format!("{x:.2}").parse().unwrap_or(x)
}
