//! Aggregated bucket repository for SQLite operations
//!
//! The upsert mirrors `AggregatedRecord::fold` as a single conditional
//! `INSERT .. ON CONFLICT DO UPDATE`, so concurrent writers never lose an
//! increment.

use std::collections::{BTreeMap, HashMap};

use sqlx::SqlitePool;

use crate::data::error::StorageError;
use crate::data::types::{
    AggregatedQuery, AggregatedRecord, BucketDelta, BucketKey, BucketValue, CollectionId,
    NumericStats, Resolution,
};
use crate::utils::time::millis_to_datetime;

type BucketRow = (
    String,
    i64,
    String,
    String,
    i64,
    i64,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    i64,
    i64,
    String,
);

/// Create the bucket record or fold the delta into it
pub async fn upsert_increment(
    pool: &SqlitePool,
    collection: &CollectionId,
    key: &BucketKey,
    delta: &BucketDelta,
) -> Result<(), StorageError> {
    let to_err = |e| StorageError::from_sqlite(e, collection);
    let origin = key.origin.timestamp_millis();
    let at = delta.at.timestamp_millis();
    let (n_count, n_value, n_square) = match &delta.value {
        BucketValue::Numeric(v) => (1_i64, Some(*v), Some(v * v)),
        BucketValue::Categorical(_) => (0, None, None),
    };

    let mut tx = pool.begin().await.map_err(to_err)?;

    sqlx::query(
        r#"
        INSERT INTO aggregated_buckets
            (database, collection, resolution, origin, attr_name, attr_type, count,
             n_count, n_sum, n_sum2, n_min, n_max, first_at, last_at, last_value)
        VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (database, collection, resolution, origin, attr_name) DO UPDATE SET
            count = count + 1,
            n_count = n_count + excluded.n_count,
            n_sum = CASE WHEN excluded.n_sum IS NULL THEN n_sum
                         ELSE COALESCE(n_sum, 0) + excluded.n_sum END,
            n_sum2 = CASE WHEN excluded.n_sum2 IS NULL THEN n_sum2
                          ELSE COALESCE(n_sum2, 0) + excluded.n_sum2 END,
            n_min = CASE WHEN excluded.n_min IS NULL THEN n_min
                         WHEN n_min IS NULL THEN excluded.n_min
                         ELSE MIN(n_min, excluded.n_min) END,
            n_max = CASE WHEN excluded.n_max IS NULL THEN n_max
                         WHEN n_max IS NULL THEN excluded.n_max
                         ELSE MAX(n_max, excluded.n_max) END,
            first_at = MIN(first_at, excluded.first_at),
            last_value = CASE WHEN excluded.last_at >= last_at THEN excluded.last_value
                              ELSE last_value END,
            last_at = MAX(last_at, excluded.last_at)
        "#,
    )
    .bind(&collection.database)
    .bind(&collection.collection)
    .bind(key.resolution.as_str())
    .bind(origin)
    .bind(&key.attr_name)
    .bind(&delta.attr_type)
    .bind(n_count)
    .bind(n_value)
    .bind(n_square)
    .bind(n_value)
    .bind(n_value)
    .bind(at)
    .bind(at)
    .bind(delta.value.display())
    .execute(&mut *tx)
    .await
    .map_err(to_err)?;

    if let BucketValue::Categorical(value) = &delta.value {
        sqlx::query(
            r#"
            INSERT INTO aggregated_occurrences
                (database, collection, resolution, origin, attr_name, value, count)
            VALUES (?, ?, ?, ?, ?, ?, 1)
            ON CONFLICT (database, collection, resolution, origin, attr_name, value)
            DO UPDATE SET count = count + 1
            "#,
        )
        .bind(&collection.database)
        .bind(&collection.collection)
        .bind(key.resolution.as_str())
        .bind(origin)
        .bind(&key.attr_name)
        .bind(value)
        .execute(&mut *tx)
        .await
        .map_err(to_err)?;
    }

    tx.commit().await.map_err(to_err)?;
    Ok(())
}

/// Read the buckets of one attribute at one resolution, ordered by origin
pub async fn find_buckets(
    pool: &SqlitePool,
    collection: &CollectionId,
    attr_name: &str,
    query: &AggregatedQuery,
) -> Result<Vec<AggregatedRecord>, StorageError> {
    let to_err = |e| StorageError::from_sqlite(e, collection);
    let resolution = query.resolution.as_str();
    let date_from = query
        .date_from
        .map(|d| query.resolution.floor(d).timestamp_millis());
    let date_to = query.date_to.map(|d| d.timestamp_millis());

    let rows: Vec<BucketRow> = sqlx::query_as(
        r#"
        SELECT resolution, origin, attr_name, attr_type, count,
               n_count, n_sum, n_sum2, n_min, n_max, first_at, last_at, last_value
        FROM aggregated_buckets
        WHERE database = ? AND collection = ? AND attr_name = ? AND resolution = ?
          AND (? IS NULL OR origin >= ?)
          AND (? IS NULL OR origin <= ?)
        ORDER BY origin
        "#,
    )
    .bind(&collection.database)
    .bind(&collection.collection)
    .bind(attr_name)
    .bind(resolution)
    .bind(date_from)
    .bind(date_from)
    .bind(date_to)
    .bind(date_to)
    .fetch_all(pool)
    .await
    .map_err(to_err)?;

    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let occurrence_rows: Vec<(i64, String, i64)> = sqlx::query_as(
        r#"
        SELECT origin, value, count
        FROM aggregated_occurrences
        WHERE database = ? AND collection = ? AND attr_name = ? AND resolution = ?
          AND (? IS NULL OR origin >= ?)
          AND (? IS NULL OR origin <= ?)
        "#,
    )
    .bind(&collection.database)
    .bind(&collection.collection)
    .bind(attr_name)
    .bind(resolution)
    .bind(date_from)
    .bind(date_from)
    .bind(date_to)
    .bind(date_to)
    .fetch_all(pool)
    .await
    .map_err(to_err)?;

    let mut occurrences: HashMap<i64, BTreeMap<String, u64>> = HashMap::new();
    for (origin, value, count) in occurrence_rows {
        occurrences
            .entry(origin)
            .or_default()
            .insert(value, count as u64);
    }

    rows.into_iter()
        .map(|row| {
            let (
                resolution,
                origin,
                attr_name,
                attr_type,
                count,
                n_count,
                n_sum,
                n_sum2,
                n_min,
                n_max,
                first_at,
                last_at,
                last_value,
            ) = row;
            let resolution: Resolution = resolution.parse().map_err(|e: String| {
                StorageError::Serialization(serde::de::Error::custom(e))
            })?;
            let numeric = match (n_sum, n_sum2, n_min, n_max) {
                (Some(sum), Some(sum2), Some(min), Some(max)) if n_count > 0 => {
                    Some(NumericStats {
                        count: n_count as u64,
                        sum,
                        sum2,
                        min,
                        max,
                    })
                }
                _ => None,
            };
            Ok(AggregatedRecord {
                key: BucketKey {
                    resolution,
                    origin: millis_to_datetime(origin),
                    attr_name,
                },
                attr_type,
                count: count as u64,
                numeric,
                occurrences: occurrences.remove(&origin).unwrap_or_default(),
                first_at: millis_to_datetime(first_at),
                last_at: millis_to_datetime(last_at),
                last_value,
            })
        })
        .collect()
}
