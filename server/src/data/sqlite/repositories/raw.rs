//! Raw record repository for SQLite operations

use sqlx::SqlitePool;

use crate::data::error::StorageError;
use crate::data::types::{Bounds, CollectionId, RawQuery, RawRecord};
use crate::utils::time::millis_to_datetime;

type RawRow = (i64, String, String, String, String, String);

fn row_to_record(row: RawRow) -> Result<RawRecord, StorageError> {
    let (recv_time, entity_id, entity_type, attr_name, attr_type, attr_value) = row;
    Ok(RawRecord {
        recv_time: millis_to_datetime(recv_time),
        entity_id,
        entity_type,
        attr_name,
        attr_type,
        attr_value: serde_json::from_str(&attr_value)?,
    })
}

/// Append a raw record, evicting the oldest records of a bounded collection
/// in the same transaction. Returns how many records were evicted.
pub async fn insert_record(
    pool: &SqlitePool,
    collection: &CollectionId,
    record: &RawRecord,
) -> Result<u64, StorageError> {
    let attr_value = serde_json::to_string(&record.attr_value)?;
    let to_err = |e| StorageError::from_sqlite(e, collection);

    let mut tx = pool.begin().await.map_err(to_err)?;

    sqlx::query(
        r#"
        INSERT INTO raw_records
            (database, collection, recv_time, entity_id, entity_type, attr_name, attr_type, attr_value, size_bytes)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&collection.database)
    .bind(&collection.collection)
    .bind(record.recv_time.timestamp_millis())
    .bind(&record.entity_id)
    .bind(&record.entity_type)
    .bind(&record.attr_name)
    .bind(&record.attr_type)
    .bind(&attr_value)
    .bind(record.size_bytes() as i64)
    .execute(&mut *tx)
    .await
    .map_err(to_err)?;

    let bounds: Option<(Option<i64>, Option<i64>)> = sqlx::query_as(
        "SELECT max_bytes, max_docs FROM bounded_collections WHERE database = ? AND collection = ?",
    )
    .bind(&collection.database)
    .bind(&collection.collection)
    .fetch_optional(&mut *tx)
    .await
    .map_err(to_err)?;

    let evicted = match bounds {
        Some((max_bytes, max_docs)) => {
            let bounds = Bounds {
                max_bytes: max_bytes.map(|v| v as u64),
                max_docs: max_docs.map(|v| v as u64),
            };
            evict_to_bounds(&mut tx, collection, bounds)
                .await
                .map_err(to_err)?
        }
        None => 0,
    };

    tx.commit().await.map_err(to_err)?;
    Ok(evicted)
}

/// Keep the newest records that fit both bounds, delete the rest
async fn evict_to_bounds(
    conn: &mut sqlx::SqliteConnection,
    collection: &CollectionId,
    bounds: Bounds,
) -> Result<u64, sqlx::Error> {
    let max_bytes = bounds.max_bytes.map(|v| v as i64).unwrap_or(i64::MAX);
    let max_docs = bounds.max_docs.map(|v| v as i64).unwrap_or(i64::MAX);

    let result = sqlx::query(
        r#"
        DELETE FROM raw_records WHERE id IN (
            SELECT id FROM (
                SELECT id,
                       SUM(size_bytes) OVER (ORDER BY id DESC) AS newer_bytes,
                       ROW_NUMBER() OVER (ORDER BY id DESC) AS newer_docs
                FROM raw_records
                WHERE database = ? AND collection = ?
            )
            WHERE newer_bytes > ? OR newer_docs > ?
        )
        "#,
    )
    .bind(&collection.database)
    .bind(&collection.collection)
    .bind(max_bytes)
    .bind(max_docs)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

/// Read raw records in insertion order
pub async fn find_records(
    pool: &SqlitePool,
    collection: &CollectionId,
    query: &RawQuery,
) -> Result<Vec<RawRecord>, StorageError> {
    let date_from = query.date_from.map(|d| d.timestamp_millis());
    let date_to = query.date_to.map(|d| d.timestamp_millis());

    let rows: Vec<RawRow> = match query.last_n {
        Some(last_n) => {
            let mut rows: Vec<RawRow> = sqlx::query_as(
                r#"
                SELECT recv_time, entity_id, entity_type, attr_name, attr_type, attr_value
                FROM raw_records
                WHERE database = ? AND collection = ?
                  AND (? IS NULL OR recv_time >= ?)
                  AND (? IS NULL OR recv_time <= ?)
                ORDER BY id DESC
                LIMIT ?
                "#,
            )
            .bind(&collection.database)
            .bind(&collection.collection)
            .bind(date_from)
            .bind(date_from)
            .bind(date_to)
            .bind(date_to)
            .bind(last_n as i64)
            .fetch_all(pool)
            .await
            .map_err(|e| StorageError::from_sqlite(e, collection))?;
            rows.reverse();
            rows
        }
        None => sqlx::query_as(
            r#"
            SELECT recv_time, entity_id, entity_type, attr_name, attr_type, attr_value
            FROM raw_records
            WHERE database = ? AND collection = ?
              AND (? IS NULL OR recv_time >= ?)
              AND (? IS NULL OR recv_time <= ?)
            ORDER BY id
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(&collection.database)
        .bind(&collection.collection)
        .bind(date_from)
        .bind(date_from)
        .bind(date_to)
        .bind(date_to)
        .bind(query.limit.map(|l| l as i64).unwrap_or(-1))
        .bind(query.offset as i64)
        .fetch_all(pool)
        .await
        .map_err(|e| StorageError::from_sqlite(e, collection))?,
    };

    rows.into_iter().map(row_to_record).collect()
}
