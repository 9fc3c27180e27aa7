use actix_web::{middleware, web, App, HttpServer};
use chrono::Duration;
use std::sync::Arc;

use chirp::api::{self, AppState};
use chirp::auth::AuthService;
use chirp::config::Config;
use chirp::store::Store;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = Config::from_env();

    let store = Arc::new(Store::new(&config.database_path).map_err(|e| {
        log::error!("Failed to open database {}: {}", config.database_path, e);
        std::io::Error::other(e.to_string())
    })?);

    let session_ttl = Duration::try_days(config.session_ttl_days).ok_or_else(|| {
        std::io::Error::other(format!("Invalid session lifetime: {} days", config.session_ttl_days))
    })?;

    let auth_service = Arc::new(
        AuthService::new(store.clone())
            .with_session_ttl(session_ttl)
            .with_bcrypt_cost(config.bcrypt_cost),
    );

    match auth_service.purge_expired_sessions() {
        Ok(0) => {}
        Ok(n) => log::info!("Purged {} expired sessions", n),
        Err(e) => log::warn!("Failed to purge expired sessions: {}", e),
    }

    log::info!("Database: {}", config.database_path);

    let state = web::Data::new(AppState::new(store.clone(), auth_service.clone()));

    let server = HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            // AuthService is registered on its own for the CurrentUser extractor
            .app_data(web::Data::from(auth_service.clone()))
            .app_data(state.clone())
            .configure(api::configure_routes)
    });

    log::info!("Starting chirp server on port {}", config.port);

    server.bind(("0.0.0.0", config.port))?.run().await
}
