use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    auth::jwt::JwtService,
    config::AppConfig,
    consultations::files::FileLimits,
    db::PgPool,
    error::{AppError, AppResult},
    models::Notification,
    notifier::{self, Notifier},
    storage::ObjectStorage,
};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn ObjectStorage>,
    pub notifier: Arc<dyn Notifier>,
    pub jwt: JwtService,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        storage: Arc<dyn ObjectStorage>,
        notifier: Arc<dyn Notifier>,
        jwt: JwtService,
    ) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            storage,
            notifier,
            jwt,
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }

    pub fn file_limits(&self) -> FileLimits {
        FileLimits {
            max_size: self.config.max_file_size,
            allowed_types: self.config.allowed_file_types.clone(),
        }
    }

    /// Pushes committed notifications; failures are logged by the dispatcher.
    pub async fn dispatch(&self, notifications: Vec<Notification>) {
        notifier::dispatch_all(self.notifier.as_ref(), notifications).await;
    }
}
