use actix_web::{App, HttpServer};
use log::{error, info, warn};
use std::path::Path;

use tus_drive::app_state::AppState;
use tus_drive::config::AppConfig;
use tus_drive::service::completion_worker::CompletionWorker;
use tus_drive::tus::routes;

fn init_logging(config_file: &str) {
    if Path::new(config_file).exists() {
        if let Err(e) = log4rs::init_file(config_file, Default::default()) {
            eprintln!("Failed to load log configuration {}: {}", config_file, e);
            env_logger::init();
        }
    } else {
        env_logger::init();
        warn!("Log configuration {} not found, logging to stderr", config_file);
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = AppConfig::load()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
    init_logging(&config.logging.config_file);
    config.log_source();

    let state = AppState::from_config(config).map_err(|e| {
        error!("Failed to assemble data store: {}", e);
        std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
    })?;

    if state.config.tus.notify_complete_uploads {
        let _completions = CompletionWorker::new(state.handler.complete_uploads()).start_background();
    }

    let server = &state.config.server;
    info!("Starting server on {}:{}", server.host, server.port);

    let handler = state.handler.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .configure(routes::configure(handler.clone()))
    })
    .workers(server.workers)
    .bind((server.host.as_str(), server.port))?
    .run()
    .await
}
