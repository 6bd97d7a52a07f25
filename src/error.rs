use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;

/// Errors surfaced by the dispatcher, the worker pool, and the HTTP front-end.
///
/// Variants map 1:1 onto the status codes documented for `/predict` and
/// `/model-ready`; everything else (config load failure) is fatal and never
/// reaches this type.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("failed to decode request body")]
    MalformedBody,

    #[error("model parameter is missing or has an invalid format")]
    MissingModelParam,

    #[error("failed to unmarshal request body")]
    MalformedReadyBody,

    #[error("api key missing or invalid")]
    Unauthorized,

    #[error("failed to get available worker")]
    UnknownModel,

    #[error("{0}")]
    WorkerPredict(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::MalformedBody
            | GatewayError::MissingModelParam
            | GatewayError::MalformedReadyBody => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::UnknownModel | GatewayError::WorkerPredict(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        if matches!(self, GatewayError::Unauthorized) {
            return HttpResponse::build(self.status_code()).finish();
        }

        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: &self.to_string(),
        })
    }
}
