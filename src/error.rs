//! Error kinds for decoding, inference and request handling.

use axum::http::StatusCode;

/// The uploaded bytes could not be turned into an image.
#[derive(Debug, thiserror::Error)]
#[error("Invalid image file")]
pub struct DecodeError {
    #[source]
    source: DecodeSource,
}

#[derive(Debug, thiserror::Error)]
enum DecodeSource {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Tensor(#[from] candle_core::Error),
}

impl DecodeError {
    /// Underlying decoder message, for logs only.
    pub fn detail(&self) -> String {
        self.source.to_string()
    }
}

impl From<std::io::Error> for DecodeError {
    fn from(err: std::io::Error) -> Self {
        Self { source: err.into() }
    }
}

impl From<image::ImageError> for DecodeError {
    fn from(err: image::ImageError) -> Self {
        Self { source: err.into() }
    }
}

impl From<candle_core::Error> for DecodeError {
    fn from(err: candle_core::Error) -> Self {
        Self { source: err.into() }
    }
}

/// Failure inside the model call.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error("{0}")]
    Other(String),
}

impl ClassifierError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Everything that can go wrong while serving one `/predict` request.
#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error("No file uploaded")]
    NoFileUploaded,

    #[error("No file selected")]
    NoFileSelected,

    #[error("Invalid image file")]
    InvalidImage(#[from] DecodeError),

    #[error("File too large")]
    PayloadTooLarge,

    #[error("{0}")]
    PredictionFailure(String),
}

impl PredictError {
    pub fn failure(msg: impl Into<String>) -> Self {
        Self::PredictionFailure(msg.into())
    }

    /// Status used when strict HTTP semantics are enabled.
    pub fn strict_status(&self) -> StatusCode {
        match self {
            Self::NoFileUploaded | Self::NoFileSelected | Self::InvalidImage(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::PredictionFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ClassifierError> for PredictError {
    fn from(err: ClassifierError) -> Self {
        Self::PredictionFailure(err.to_string())
    }
}
