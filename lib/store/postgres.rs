use std::collections::{HashMap, HashSet};

use diesel::sql_query;
use diesel::sql_types::{Integer, Jsonb, Nullable, Text};
use diesel::QueryableByName;
use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use super::error_mapping::{map_diesel_error, map_pool_error};
use super::{ConflictPolicy, RecordStore, StoreError};
use crate::record::Record;

#[derive(QueryableByName)]
struct KeyRow {
    #[diesel(sql_type = Nullable<Text>)]
    key: Option<String>,
}

#[derive(QueryableByName)]
struct ColumnRow {
    #[diesel(sql_type = Text)]
    column_name: String,
}

#[derive(QueryableByName)]
#[allow(dead_code)]
struct ProbeRow {
    #[diesel(sql_type = Integer)]
    probe: i32,
}

/// Postgres-backed record store used by the production runtime.
///
/// Records are shipped as one JSONB array per statement and expanded server-side with
/// `jsonb_populate_recordset`, so any table whose columns match the upstream field names
/// can be written without a compiled schema. Only fields that exist as columns are written.
pub struct PgRecordStore {
    pool: Pool<AsyncPgConnection>,
    /// Column names per table, loaded once from `information_schema`.
    columns: RwLock<HashMap<String, Vec<String>>>,
}

impl PgRecordStore {
    pub fn new(pool: Pool<AsyncPgConnection>) -> Self {
        Self {
            pool,
            columns: RwLock::new(HashMap::new()),
        }
    }

    async fn table_columns(
        &self,
        conn: &mut AsyncPgConnection,
        table: &str,
    ) -> Result<Vec<String>, StoreError> {
        if let Some(cached) = self.columns.read().await.get(table) {
            return Ok(cached.clone());
        }

        let rows: Vec<ColumnRow> = sql_query(
            "SELECT column_name::text AS column_name \
             FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 \
             ORDER BY ordinal_position",
        )
        .bind::<Text, _>(table)
        .load(conn)
        .await
        .map_err(map_diesel_error)?;

        if rows.is_empty() {
            return Err(StoreError::fatal(format!(
                "table {table} does not exist in the current schema"
            )));
        }

        let names: Vec<String> = rows.into_iter().map(|row| row.column_name).collect();
        debug!(
            event = "table_columns_loaded",
            table,
            column_count = names.len(),
            "loaded target table columns"
        );
        self.columns
            .write()
            .await
            .insert(table.to_string(), names.clone());
        Ok(names)
    }
}

impl RecordStore for PgRecordStore {
    fn fetch_unique_keys<'a>(
        &'a self,
        table: &'a str,
        column: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, StoreError>> {
        Box::pin(async move {
            let mut conn = self.pool.get().await.map_err(map_pool_error)?;
            let rows: Vec<KeyRow> = sql_query(format!(
                "SELECT {}::text AS key FROM {}",
                quote_ident(column),
                quote_ident(table)
            ))
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;

            Ok(rows.into_iter().filter_map(|row| row.key).collect())
        })
    }

    fn upsert<'a>(
        &'a self,
        table: &'a str,
        rows: &'a [Record],
        conflict_columns: &'a [&'a str],
        policy: ConflictPolicy,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            if rows.is_empty() {
                return Ok(());
            }

            let mut conn = self.pool.get().await.map_err(map_pool_error)?;
            let table_columns = self.table_columns(&mut conn, table).await?;
            let columns = writable_columns(rows, &table_columns);
            if columns.is_empty() {
                return Err(StoreError::fatal(format!(
                    "no record field matches a column of {table}"
                )));
            }

            let statement = build_upsert_sql(table, &columns, conflict_columns, policy);
            let payload = Value::Array(rows.iter().cloned().map(Value::from).collect());

            sql_query(statement)
                .bind::<Jsonb, _>(payload)
                .execute(&mut conn)
                .await
                .map_err(map_diesel_error)?;
            Ok(())
        })
    }

    fn probe<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut conn = self.pool.get().await.map_err(map_pool_error)?;
            let _: Vec<ProbeRow> = sql_query(format!(
                "SELECT 1 AS probe FROM {} LIMIT 1",
                quote_ident(table)
            ))
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;
            Ok(())
        })
    }
}

/// Quotes a SQL identifier, doubling embedded quotes.
pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Fields present in at least one record that are real columns of the table, in the
/// order they first appear.
pub(crate) fn writable_columns(rows: &[Record], table_columns: &[String]) -> Vec<String> {
    let known: HashSet<&str> = table_columns.iter().map(String::as_str).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut columns = Vec::new();
    for field in rows.iter().flat_map(Record::fields) {
        if known.contains(field.as_str()) && seen.insert(field.as_str()) {
            columns.push(field.clone());
        }
    }
    columns
}

pub(crate) fn build_upsert_sql(
    table: &str,
    columns: &[String],
    conflict_columns: &[&str],
    policy: ConflictPolicy,
) -> String {
    let table = quote_ident(table);
    let column_list = columns
        .iter()
        .map(|column| quote_ident(column))
        .collect::<Vec<_>>()
        .join(", ");

    let on_conflict = if conflict_columns.is_empty() {
        match policy {
            ConflictPolicy::Merge => String::new(),
            ConflictPolicy::IgnoreDuplicates => " ON CONFLICT DO NOTHING".to_string(),
        }
    } else {
        let target = conflict_columns
            .iter()
            .map(|column| quote_ident(column))
            .collect::<Vec<_>>()
            .join(", ");
        let updates: Vec<String> = columns
            .iter()
            .filter(|column| !conflict_columns.contains(&column.as_str()))
            .map(|column| {
                let column = quote_ident(column);
                format!("{column} = EXCLUDED.{column}")
            })
            .collect();

        match policy {
            ConflictPolicy::Merge if !updates.is_empty() => {
                format!(" ON CONFLICT ({target}) DO UPDATE SET {}", updates.join(", "))
            }
            _ => format!(" ON CONFLICT ({target}) DO NOTHING"),
        }
    };

    format!(
        "INSERT INTO {table} ({column_list}) \
         SELECT {column_list} FROM jsonb_populate_recordset(NULL::{table}, $1){on_conflict}"
    )
}
