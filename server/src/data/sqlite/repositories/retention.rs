//! Retention repository for SQLite operations
//!
//! Deletes, collection bounds and footprint queries used by the retention
//! engine.

use sqlx::SqlitePool;

use crate::data::error::StorageError;
use crate::data::types::{
    Bounds, CollectionClass, CollectionEntry, CollectionId, CollectionStats, DeletePredicate,
};

/// Delete the records matched by the predicate
pub async fn delete_where(
    pool: &SqlitePool,
    collection: &CollectionId,
    predicate: &DeletePredicate,
) -> Result<u64, StorageError> {
    let to_err = |e| StorageError::from_sqlite(e, collection);

    let deleted = match predicate {
        DeletePredicate::RecvTimeBefore(cutoff) => sqlx::query(
            "DELETE FROM raw_records WHERE database = ? AND collection = ? AND recv_time < ?",
        )
        .bind(&collection.database)
        .bind(&collection.collection)
        .bind(cutoff.timestamp_millis())
        .execute(pool)
        .await
        .map_err(to_err)?
        .rows_affected(),
        DeletePredicate::OriginBefore(cutoff) => {
            let cutoff = cutoff.timestamp_millis();
            let mut tx = pool.begin().await.map_err(to_err)?;
            sqlx::query(
                "DELETE FROM aggregated_occurrences WHERE database = ? AND collection = ? AND origin < ?",
            )
            .bind(&collection.database)
            .bind(&collection.collection)
            .bind(cutoff)
            .execute(&mut *tx)
            .await
            .map_err(to_err)?;
            let result = sqlx::query(
                "DELETE FROM aggregated_buckets WHERE database = ? AND collection = ? AND origin < ?",
            )
            .bind(&collection.database)
            .bind(&collection.collection)
            .bind(cutoff)
            .execute(&mut *tx)
            .await
            .map_err(to_err)?;
            tx.commit().await.map_err(to_err)?;
            result.rows_affected()
        }
        DeletePredicate::OldestRaw(count) => sqlx::query(
            r#"
            DELETE FROM raw_records WHERE id IN (
                SELECT id FROM raw_records
                WHERE database = ? AND collection = ?
                ORDER BY id
                LIMIT ?
            )
            "#,
        )
        .bind(&collection.database)
        .bind(&collection.collection)
        .bind(i64::try_from(*count).unwrap_or(i64::MAX))
        .execute(pool)
        .await
        .map_err(to_err)?
        .rows_affected(),
    };

    Ok(deleted)
}

/// Record (or replace) the bounds of a raw collection
pub async fn upsert_bounds(
    pool: &SqlitePool,
    collection: &CollectionId,
    bounds: Bounds,
) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        INSERT INTO bounded_collections (database, collection, max_bytes, max_docs)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (database, collection) DO UPDATE SET
            max_bytes = excluded.max_bytes,
            max_docs = excluded.max_docs
        "#,
    )
    .bind(&collection.database)
    .bind(&collection.collection)
    .bind(bounds.max_bytes.map(|v| v as i64))
    .bind(bounds.max_docs.map(|v| v as i64))
    .execute(pool)
    .await
    .map_err(|e| StorageError::from_sqlite(e, collection))?;
    Ok(())
}

/// Footprint of a collection, whichever record class it holds
pub async fn collection_size(
    pool: &SqlitePool,
    collection: &CollectionId,
) -> Result<CollectionStats, StorageError> {
    let (bytes, docs): (i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COALESCE((SELECT SUM(size_bytes) FROM raw_records WHERE database = ? AND collection = ?), 0)
          + COALESCE((SELECT SUM(length(attr_name) + length(attr_type) + length(last_value) + 128)
                      FROM aggregated_buckets WHERE database = ? AND collection = ?), 0),
            (SELECT COUNT(*) FROM raw_records WHERE database = ? AND collection = ?)
          + (SELECT COUNT(*) FROM aggregated_buckets WHERE database = ? AND collection = ?)
        "#,
    )
    .bind(&collection.database)
    .bind(&collection.collection)
    .bind(&collection.database)
    .bind(&collection.collection)
    .bind(&collection.database)
    .bind(&collection.collection)
    .bind(&collection.database)
    .bind(&collection.collection)
    .fetch_one(pool)
    .await
    .map_err(|e| StorageError::from_sqlite(e, collection))?;

    Ok(CollectionStats {
        bytes: bytes.max(0) as u64,
        docs: docs.max(0) as u64,
    })
}

/// Every collection with records or bounds, tagged with its class
pub async fn list_collections(pool: &SqlitePool) -> Result<Vec<CollectionEntry>, StorageError> {
    let rows: Vec<(String, String, String)> = sqlx::query_as(
        r#"
        SELECT database, collection, 'raw' FROM raw_records
        UNION
        SELECT database, collection, 'raw' FROM bounded_collections
        UNION
        SELECT database, collection, 'aggregated' FROM aggregated_buckets
        ORDER BY 1, 2
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(database, collection, class)| CollectionEntry {
            id: CollectionId::new(database, collection),
            class: if class == CollectionClass::Aggregated.as_str() {
                CollectionClass::Aggregated
            } else {
                CollectionClass::Raw
            },
        })
        .collect())
}
