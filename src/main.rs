use actix_web::{web, App, HttpServer};
use log::error;

use predict_gateway::config::{self, Config, LoadingStrategy};
use predict_gateway::http::{model_ready, ping, predict, ApiKey};
use predict_gateway::manager::WorkerManager;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    let cfg = match Config::load(&config::config_path()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let manager = WorkerManager::new(&cfg, config::worker_runtime());

    let api_key = web::Data::new(ApiKey(config::api_key()));
    let manager_data = web::Data::from(manager.clone());

    let addr = format!("0.0.0.0:{}", config::server_port());
    log::info!("starting server on {}", addr);

    // Bind (and start accepting) before launching any worker subprocess:
    // a subprocess's very first act is to POST /model-ready back to us, so
    // the listener must already be up or sequential loading would deadlock
    // waiting on a readiness callback nobody is there to receive.
    let server = HttpServer::new(move || {
        App::new()
            .app_data(manager_data.clone())
            .app_data(api_key.clone())
            .service(predict)
            .service(ping)
            .service(model_ready)
    })
    .bind(&addr)?
    .run();
    let server_handle = tokio::spawn(server);

    manager.initialize(LoadingStrategy::from_env()).await;

    server_handle.await?
}
