use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Schema, sea_query::Index};
use tracing::debug;

use crate::error::GatewayError;

use super::entities::{
    ColumnLog, ColumnToken, EntityChannel, EntityLog, EntityOption, EntityRedemption, EntityToken,
    EntityUser,
};

/// Opens the database and creates missing tables
pub async fn connect(url: &str) -> Result<DatabaseConnection, GatewayError> {
    if let Some(path) = url.strip_prefix("sqlite://")
        && let Some(parent) = std::path::Path::new(path.split('?').next().unwrap_or(path)).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::connect(url)
        .await
        .map_err(|e| GatewayError::storage("db_connect", e))?;
    migrate(&db).await;
    Ok(db)
}

// Existing tables and indexes make these statements fail, which is fine
async fn migrate(db: &DatabaseConnection) {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);
    let tables = [
        schema.create_table_from_entity(EntityChannel),
        schema.create_table_from_entity(EntityToken),
        schema.create_table_from_entity(EntityUser),
        schema.create_table_from_entity(EntityRedemption),
        schema.create_table_from_entity(EntityLog),
        schema.create_table_from_entity(EntityOption),
    ];
    for stmt in tables {
        if let Err(e) = db.execute(backend.build(&stmt)).await {
            debug!("create table skipped: {}", e);
        }
    }
    let indexes = [
        Index::create()
            .name("idx_tokens_user_id")
            .table(EntityToken)
            .col(ColumnToken::UserId)
            .to_owned(),
        Index::create()
            .name("idx_logs_created_at")
            .table(EntityLog)
            .col(ColumnLog::CreatedAt)
            .to_owned(),
        Index::create()
            .name("idx_logs_user_id")
            .table(EntityLog)
            .col(ColumnLog::UserId)
            .to_owned(),
    ];
    for idx in indexes {
        if let Err(e) = db.execute(backend.build(&idx)).await {
            debug!("create index skipped: {}", e);
        }
    }
}
