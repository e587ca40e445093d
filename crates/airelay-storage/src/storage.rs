use sea_orm::{ActiveValue, Database, DatabaseConnection, EntityTrait, Schema};
use time::OffsetDateTime;

use crate::entities;
use crate::queue::RequestLogInsert;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
}

/// Persistence for the relay's single table.
///
/// The request path never touches the DB directly; rows arrive through the
/// background queue in `queue.rs`.
#[derive(Clone)]
pub struct LogStorage {
    db: DatabaseConnection,
}

impl LogStorage {
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        let db = Database::connect(dsn).await?;
        Ok(Self { db })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Entity-first schema sync; run once at bootstrap.
    pub async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::RequestLog)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    pub async fn insert_request_logs(&self, rows: &[RequestLogInsert]) -> StorageResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let now = OffsetDateTime::now_utc();
        let models = rows.iter().map(|row| entities::request_log::ActiveModel {
            id: ActiveValue::NotSet,
            platform: ActiveValue::Set(row.platform.clone()),
            model: ActiveValue::Set(row.model.clone()),
            provider: ActiveValue::Set(row.provider.clone()),
            http_code: ActiveValue::Set(row.http_code),
            input_tokens: ActiveValue::Set(row.input_tokens),
            output_tokens: ActiveValue::Set(row.output_tokens),
            cache_create_tokens: ActiveValue::Set(row.cache_create_tokens),
            cache_read_tokens: ActiveValue::Set(row.cache_read_tokens),
            reasoning_tokens: ActiveValue::Set(row.reasoning_tokens),
            is_stream: ActiveValue::Set(row.is_stream),
            duration_sec: ActiveValue::Set(row.duration_sec),
            created_at: ActiveValue::Set(now),
        });
        entities::RequestLog::insert_many(models).exec(&self.db).await?;
        Ok(())
    }
}
