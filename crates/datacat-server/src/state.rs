//! Shared application state.

use datacat_auth::AuthConfig;
use datacat_core::{AppConfig, JoinPlan, SchemaCache};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The frozen schema analysis and its derived join plan. Handlers take an
/// `Arc` snapshot, so a concurrent refresh never changes a request's view
/// mid-flight.
pub struct SchemaContext {
    pub cache: SchemaCache,
    pub plan: JoinPlan,
}

/// Shared state behind every handler.
pub struct AppState {
    pub pool: PgPool,
    pub schema: RwLock<Arc<SchemaContext>>,
    pub config: AppConfig,
    pub auth: AuthConfig,
}

impl AppState {
    /// Snapshot of the current schema context.
    pub async fn schema(&self) -> Arc<SchemaContext> {
        self.schema.read().await.clone()
    }

    /// Re-inspect the database and swap the schema context. The manual
    /// invalidation hook behind the refresh endpoint.
    pub async fn reload_schema(&self) -> datacat_core::Result<()> {
        let cache = SchemaCache::load(&self.pool, &self.config.main_table).await?;
        let plan = JoinPlan::build(&cache)?;
        *self.schema.write().await = Arc::new(SchemaContext { cache, plan });
        Ok(())
    }
}
