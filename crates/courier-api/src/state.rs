use std::sync::Arc;

use anyhow::anyhow;
use tracing::error;

use courier_db::Database;
use courier_gateway::dispatcher::Dispatcher;

use crate::error::{ApiError, ApiResult};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
}

impl AppStateInner {
    /// Run a database call off the async runtime.
    pub async fn blocking<F, T>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&Database) -> courier_db::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.publishing(move |db, _| f(db)).await
    }

    /// Run a write and announce it from the same blocking task. The task
    /// outlives the request, so a client that hangs up after the commit
    /// still gets its change published.
    pub async fn publishing<F, T>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&Database, &Dispatcher) -> courier_db::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let dispatcher = self.dispatcher.clone();
        tokio::task::spawn_blocking(move || f(&db, &dispatcher))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal(anyhow!("blocking task failed: {e}"))
            })?
            .map_err(ApiError::from)
    }
}
