//! Cinerec recommendation service
//!
//! Hosts the hybrid engine over PostgreSQL: trains at startup, retrains in the
//! background as ratings change, and reports health and model readiness.

use actix_web::{web, App, HttpResponse, HttpServer};
use cinerec_core::{
    init_logging, load_dotenv, ConfigLoader, DatabaseConfig, DatabasePool, LogConfig, LogFormat,
    ServiceConfig,
};
use cinerec_engine::{HybridRecommender, PostgresRatingStore, RecommenderConfig, RecommenderError};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Application state
struct AppState {
    recommender: Arc<HybridRecommender>,
    db: DatabasePool,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let service_config = ServiceConfig::from_env()?;
    service_config.validate()?;

    init_logging(&LogConfig {
        format: LogFormat::from_env(),
        level: service_config.log_level.clone(),
        service_name: "cinerec-service".to_string(),
    })?;

    let db_config = DatabaseConfig::from_env()?;
    db_config.validate()?;
    let model_config = RecommenderConfig::from_env()?;
    model_config.validate()?;

    info!(
        host = %service_config.host,
        port = service_config.port,
        factors = model_config.sgd.factors,
        epochs = model_config.sgd.epochs,
        cold_start_threshold = model_config.cold_start_threshold,
        "Starting Cinerec recommendation service"
    );

    let db = DatabasePool::new(&db_config).await.map_err(|e| {
        error!(error = %e, "Failed to connect to database");
        anyhow::anyhow!("Database connection failed: {}", e)
    })?;

    let store = PostgresRatingStore::new(db.pool().clone());
    store.ensure_schema().await?;

    let (recommender, worker) =
        HybridRecommender::with_background_retraining(Arc::new(store), &model_config);
    let recommender = Arc::new(recommender);

    match recommender.train().await {
        Ok(report) => info!(
            version = report.version,
            num_ratings = report.num_ratings,
            rmse = report.training_rmse,
            "Initial model trained"
        ),
        Err(RecommenderError::DataUnavailable(reason)) => {
            warn!(%reason, "No ratings yet, serving popularity until the first retrain")
        }
        Err(e) => error!(error = %e, "Initial training failed"),
    }

    let worker = worker.spawn();

    let state = web::Data::new(AppState { recommender, db });

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/health", web::get().to(health_check))
            .route("/ready", web::get().to(readiness_check))
    })
    .workers(service_config.workers)
    .bind((service_config.host.as_str(), service_config.port))?
    .run()
    .await?;

    worker.abort();
    info!("Service stopped");

    Ok(())
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "cinerec-service",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check(state: web::Data<AppState>) -> HttpResponse {
    let database = state.db.is_healthy().await;
    let model = state.recommender.state();

    let (status, connection) = if database {
        ("ready", "connected")
    } else {
        ("not_ready", "disconnected")
    };

    let body = serde_json::json!({
        "status": status,
        "database": connection,
        "pool": state.db.stats(),
        "model": model,
    });

    if database {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}
