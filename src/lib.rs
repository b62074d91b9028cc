//! Plant leaf disease classification served over HTTP.
//!
//! An uploaded image is decoded in memory, resized to 128x128 RGB, scored by a
//! convolutional classifier and answered with the most likely disease label.

pub mod classifier;
pub mod config;
pub mod error;
pub mod labels;
pub mod load_image;
pub mod predict;
pub mod server;

pub use classifier::{Classifier, CnnClassifier, ModelConfig};
pub use error::{ClassifierError, DecodeError, PredictError};
pub use labels::LabelTable;
pub use predict::{Prediction, Predictor, Upload};
pub use server::{router, AppState};
