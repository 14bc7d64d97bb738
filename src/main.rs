use actix_cors::Cors;
use actix_web::{web, App, HttpServer, middleware::Compress};
use anyhow::Context;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;

use primrose::config::AppConfig;
use primrose::repo::Repo;
use primrose::startup::{self, PrepareOptions};
use primrose::{configure, InternalAccess};

#[cfg(not(any(feature = "inmem-store", feature = "postgres-store")))]
compile_error!("enable one of the `inmem-store` or `postgres-store` features");

#[cfg(feature = "postgres-store")]
fn build_repo(cfg: &AppConfig) -> Arc<dyn Repo> {
    let conn = startup::database_connection_string(cfg);
    info!("Using Postgres repository backend");
    Arc::new(primrose::repo::pg::PgRepo::connect_lazy(&conn))
}

#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
fn build_repo(_cfg: &AppConfig) -> Arc<dyn Repo> {
    info!("Using in-memory repository backend");
    Arc::new(primrose::repo::inmem::InMemRepo::from_env())
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds to reduce manual setup overhead.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Bootstrapping primrose");
    let cfg = AppConfig::from_env();
    let resolver = startup::resolver_for(&cfg);
    let repo = build_repo(&cfg);

    let state = startup::prepare(&cfg, &resolver, repo, PrepareOptions::default())
        .await
        .context("startup aborted")?;
    let state = web::Data::new(state);
    let internal = InternalAccess::new(cfg.internal_health_allow.clone());
    let origins = cfg.cors_origins.clone();

    let server = HttpServer::new(move || {
        let cors = origins
            .iter()
            .fold(Cors::default(), |c, o| c.allowed_origin(o))
            .allow_any_header()
            .allowed_methods(["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .max_age(3600);
        let internal = internal.clone();

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(cors)
            .app_data(state.clone())
            .configure(move |c| configure(c, internal))
    })
    .bind(&cfg.bind)
    .with_context(|| format!("failed to bind {}", cfg.bind))?;

    info!("Listening on http://{}", cfg.bind);
    server.run().await?;
    Ok(())
}
