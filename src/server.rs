use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, StatusCode};
use axum::middleware::map_response_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};

use crate::error::PredictError;
use crate::predict::{Predictor, Upload};

pub const USAGE: &str = "Leaf diagnosis backend (memory-based) is running! Send a POST request to \
/predict to predict the disease, for example: curl -X POST -F 'file=@/path/to/leaf.jpg' \
http://HOST:PORT/predict";

const UPLOAD_FIELD: &str = "file";

#[derive(Clone)]
pub struct AppState {
    pub predictor: Predictor,
    /// Map errors to 400/500 instead of always answering 200.
    pub strict_status: bool,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(usage))
        .route("/predict", post(predict))
        .with_state(state.clone())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(map_response_with_state(state, json_payload_too_large))
}

/// The body limit answers oversized uploads with a plain-text 413 before the
/// handler runs; give those the same JSON envelope as every other error.
async fn json_payload_too_large(State(state): State<AppState>, response: Response) -> Response {
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .is_some_and(|value| value.as_bytes().starts_with(b"application/json"));
    if response.status() != StatusCode::PAYLOAD_TOO_LARGE || is_json {
        return response;
    }
    error_response(&state, PredictError::PayloadTooLarge)
}

fn error_response(state: &AppState, err: PredictError) -> Response {
    tracing::warn!("Error during prediction: {err}");
    let status = if state.strict_status {
        err.strict_status()
    } else {
        StatusCode::OK
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

async fn usage() -> &'static str {
    USAGE
}

async fn predict(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let result = match read_upload(multipart).await {
        Ok(upload) => {
            let predictor = state.predictor.clone();
            tokio::task::spawn_blocking(move || predictor.predict(upload))
                .await
                .unwrap_or_else(|err| Err(PredictError::failure(err.to_string())))
        }
        Err(err) => Err(err),
    };

    match result {
        Ok(prediction) => Json(prediction).into_response(),
        Err(err) => error_response(&state, err),
    }
}

/// Pulls the first `file` part that carries a file name. A body that is not
/// multipart at all, or whose multipart stream cannot be parsed, counts as no
/// upload.
async fn read_upload(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Option<Upload>, PredictError> {
    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            tracing::debug!("not a multipart request: {rejection}");
            return Ok(None);
        }
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(upload_error)?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let Some(file_name) = field.file_name().map(str::to_owned) else {
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(upload_error)?;
        tracing::debug!("Length of `{file_name}` is {} bytes", bytes.len());
        return Ok(Some(Upload { file_name, bytes }));
    }
    Ok(None)
}

fn upload_error(err: MultipartError) -> PredictError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return PredictError::PayloadTooLarge;
    }
    tracing::debug!("malformed multipart body: {err}");
    PredictError::NoFileUploaded
}
