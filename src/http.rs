use actix_web::{get, post, web, HttpRequest, HttpResponse};

use crate::error::GatewayError;
use crate::manager::WorkerManager;
use crate::models::{ModelReadyRequest, PredictRequest};

/// Checked against the `X-API-KEY` header on every `/predict` call. Empty
/// disables auth entirely (spec §6).
#[derive(Clone, Default)]
pub struct ApiKey(pub String);

impl ApiKey {
    fn check(&self, req: &HttpRequest) -> Result<(), GatewayError> {
        if self.0.is_empty() {
            return Ok(());
        }
        match req.headers().get("X-API-KEY").and_then(|v| v.to_str().ok()) {
            Some(key) if key == self.0 => Ok(()),
            _ => Err(GatewayError::Unauthorized),
        }
    }
}

#[post("/predict")]
pub async fn predict(
    req: HttpRequest,
    body: web::Bytes,
    manager: web::Data<WorkerManager>,
    api_key: web::Data<ApiKey>,
) -> Result<HttpResponse, GatewayError> {
    api_key.check(&req)?;

    let predict_req: PredictRequest =
        serde_json::from_slice(&body).map_err(|_| GatewayError::MalformedBody)?;

    let model = predict_req.model().ok_or(GatewayError::MissingModelParam)?.to_string();
    let priority = predict_req.priority();

    let worker = manager.acquire(&model, priority).await?;

    let result = worker.predict(&predict_req).await;
    manager.release(&worker.id);

    let predictions = result?;
    Ok(HttpResponse::Ok().json(predictions))
}

#[get("/ping")]
pub async fn ping() -> HttpResponse {
    HttpResponse::Ok().finish()
}

#[post("/model-ready")]
pub async fn model_ready(
    body: web::Bytes,
    manager: web::Data<WorkerManager>,
) -> Result<HttpResponse, GatewayError> {
    let payload: ModelReadyRequest =
        serde_json::from_slice(&body).map_err(|_| GatewayError::MalformedReadyBody)?;

    let id = payload.worker_id.into();
    manager.mark_ready(&id);
    Ok(HttpResponse::Ok().finish())
}
