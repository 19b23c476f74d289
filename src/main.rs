mod app;
mod auth;
mod config;
mod db;
mod error;
mod forms;
mod questions;
mod render;
mod seed;
mod state;
mod views;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "qaboard=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let app_state = state::AppState::init().await?;
    db::migrate(&app_state.db).await?;

    if app_state.config.seed_demo_data {
        seed::seed_demo_data(&app_state.db, seed::SeedOptions::default()).await?;
    }

    let app = app::build_app(app_state)?;
    app::serve(app).await
}
