use crate::config::AppConfig;
use crate::db;
use crate::render::{JsonRenderer, Renderer};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<AppConfig>,
    pub renderer: Arc<dyn Renderer>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);
        let db = db::connect(&config).await?;
        let renderer = Arc::new(JsonRenderer) as Arc<dyn Renderer>;

        Ok(Self::from_parts(db, config, renderer))
    }

    pub fn from_parts(db: SqlitePool, config: Arc<AppConfig>, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            db,
            config,
            renderer,
        }
    }

    #[cfg(test)]
    pub async fn in_memory() -> Self {
        let db = db::memory_pool().await;
        let config = Arc::new(AppConfig {
            database_url: "sqlite::memory:".into(),
            max_connections: 1,
            session: crate::config::SessionConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
            },
            seed_demo_data: false,
        });

        Self::from_parts(db, config, Arc::new(JsonRenderer))
    }
}
