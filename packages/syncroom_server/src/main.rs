#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use actix_cors::Cors;
use actix_web::{App, middleware, web};
use syncroom_server::{
    api::{health_endpoint, root_endpoint},
    config::Config,
    reaper,
    ws::{self, server::SyncServer},
};
use tokio::try_join;

#[actix_web::main]
async fn main() -> Result<(), std::io::Error> {
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            eprintln!("Failed to load .env: {err}");
        }
    }

    env_logger::init();

    let config = Config::from_env().map_err(std::io::Error::other)?;
    log::debug!(
        "Starting with {} admin identities, reaping every {:?} after {:?} idle",
        config.admin_identities.len(),
        config.reap_interval,
        config.session_timeout,
    );

    let (sync_server, sync_server_handle) = SyncServer::new(&config);
    let sync_server = tokio::task::spawn(sync_server.run());
    let reaper = tokio::task::spawn(reaper::run(
        sync_server_handle.clone(),
        config.reap_interval,
    ));

    let handle = web::Data::new(sync_server_handle);

    let app = move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["GET", "POST"])
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(handle.clone())
            .service(root_endpoint)
            .service(health_endpoint)
            .service(ws::api::websocket)
    };

    let mut http_server = actix_web::HttpServer::new(app);

    if let Some(workers) = config.workers {
        log::debug!("Running with {workers} Actix workers");
        http_server = http_server.workers(workers);
    }

    let http_server = http_server
        .bind((config.bind_addr.as_str(), config.port))?
        .run();

    log::info!(
        "Syncroom server listening on {}:{}",
        config.bind_addr,
        config.port
    );

    try_join!(
        async move {
            let resp = http_server.await;
            reaper.abort();
            resp
        },
        async move { sync_server.await.map_err(std::io::Error::other)? }
    )?;

    Ok(())
}
