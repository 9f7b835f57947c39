//! Collection name mapping repository for SQLite operations

use sqlx::SqlitePool;

use crate::data::error::StorageError;
use crate::data::types::NameMapping;
use crate::utils::time::millis_to_datetime;

/// Insert the mapping unless the readable name is already mapped.
/// Returns the stored mapping (the existing one when there was a conflict).
pub async fn insert_mapping(
    pool: &SqlitePool,
    mapping: &NameMapping,
) -> Result<NameMapping, StorageError> {
    sqlx::query(
        r#"
        INSERT INTO name_mappings (database, readable, collection, created_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(&mapping.database)
    .bind(&mapping.readable)
    .bind(&mapping.collection)
    .bind(mapping.created_at.timestamp_millis())
    .execute(pool)
    .await
    .map_err(|e| StorageError::from_sqlite(e, &mapping.readable))?;

    // A generated name already owned by another readable name also lands here
    find_mapping(pool, &mapping.database, &mapping.readable)
        .await?
        .ok_or_else(|| {
            StorageError::conflict(
                &mapping.collection,
                "collection name already mapped to another readable name",
            )
        })
}

pub async fn find_mapping(
    pool: &SqlitePool,
    database: &str,
    readable: &str,
) -> Result<Option<NameMapping>, StorageError> {
    let row: Option<(String, String, String, i64)> = sqlx::query_as(
        r#"
        SELECT database, readable, collection, created_at
        FROM name_mappings
        WHERE database = ? AND readable = ?
        "#,
    )
    .bind(database)
    .bind(readable)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(database, readable, collection, created_at)| NameMapping {
        database,
        readable,
        collection,
        created_at: millis_to_datetime(created_at),
    }))
}
