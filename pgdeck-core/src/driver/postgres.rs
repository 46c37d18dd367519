//! PostgreSQL driver on top of sqlx `PgPool`
//!
//! Pools are created lazily (`connect_lazy_with`): no connection is made
//! until the first acquire. The connect observer is wired through
//! `after_connect`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::TryStreamExt;
use serde_json::{json, Map, Value};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPoolOptions, PgRow, PgSslMode};
use sqlx::query::Query;
use sqlx::{Column, Either, Executor, PgPool, Postgres, Row, TypeInfo, ValueRef};

use super::{
    command_tag, ColumnInfo, ConnectTarget, Driver, DriverConnection, DriverPool, PoolObserver,
    StatementOutput,
};
use crate::config::EffectivePoolConfig;
use crate::error::PoolError;

/// Opens sqlx-backed Postgres pools
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDriver;

impl PostgresDriver {
    fn connect_options(target: &ConnectTarget, config: &EffectivePoolConfig) -> PgConnectOptions {
        let ssl_mode = if target.tls {
            PgSslMode::Require
        } else {
            PgSslMode::Disable
        };

        let options = PgConnectOptions::new()
            .host(&target.host)
            .port(target.port)
            .database(&target.database)
            .username(&target.username)
            .password(&target.secret)
            .ssl_mode(ssl_mode)
            .application_name("pgdeck");

        match config.statement_timeout {
            Some(timeout) => options.options([("statement_timeout", timeout.as_millis())]),
            None => options,
        }
    }

    /// sqlx bounds the whole acquire, queueing included. The registry's
    /// acquire window must be the one that applies, so sqlx only gets the
    /// longer of that window and the connect timeout.
    fn pool_options(config: &EffectivePoolConfig) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(config.max_size)
            .min_connections(0)
            .idle_timeout(config.idle_timeout)
            .acquire_timeout(config.acquire_timeout.max(config.connect_timeout))
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    async fn open_pool(
        &self,
        target: &ConnectTarget,
        config: &EffectivePoolConfig,
        observer: Arc<PoolObserver>,
    ) -> Result<Box<dyn DriverPool>, PoolError> {
        let connect_observer = Arc::clone(&observer);
        let options = Self::pool_options(config);
        let acquire_timeout = options.get_acquire_timeout();
        let pool = options
            .after_connect(move |_conn, _meta| {
                let observer = Arc::clone(&connect_observer);
                Box::pin(async move {
                    observer.on_connect();
                    Ok(())
                })
            })
            .connect_lazy_with(Self::connect_options(target, config));

        Ok(Box::new(PostgresPool {
            pool,
            observer,
            acquire_timeout,
        }))
    }
}

struct PostgresPool {
    pool: PgPool,
    observer: Arc<PoolObserver>,
    acquire_timeout: Duration,
}

#[async_trait]
impl DriverPool for PostgresPool {
    async fn acquire(&self) -> Result<Box<dyn DriverConnection>, PoolError> {
        match self.pool.acquire().await {
            Ok(conn) => Ok(Box::new(PostgresConnection { conn })),
            Err(e) => {
                let err = acquire_error(e, self.acquire_timeout);
                self.observer.on_error(&err);
                Err(err)
            }
        }
    }

    fn size(&self) -> u32 {
        self.pool.size()
    }

    fn idle(&self) -> u32 {
        self.pool.num_idle() as u32
    }

    async fn close(&self) -> Result<(), PoolError> {
        // Waits for borrowed connections to come back before returning
        self.pool.close().await;
        Ok(())
    }
}

struct PostgresConnection {
    conn: PoolConnection<Postgres>,
}

#[async_trait]
impl DriverConnection for PostgresConnection {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<StatementOutput, PoolError> {
        let query = params
            .iter()
            .fold(sqlx::query(sql), |query, param| bind_json(query, param));

        let mut rows = Vec::new();
        let mut fields = Vec::new();
        let mut rows_affected = 0;

        let mut stream = (&mut *self.conn).fetch_many(query);
        while let Some(step) = stream.try_next().await.map_err(query_error)? {
            match step {
                Either::Left(done) => rows_affected += done.rows_affected(),
                Either::Right(row) => {
                    if fields.is_empty() {
                        fields = describe(&row);
                    }
                    rows.push(row_to_json(&row).map_err(query_error)?);
                }
            }
        }

        let row_count = if rows.is_empty() {
            rows_affected
        } else {
            rows.len() as u64
        };

        Ok(StatementOutput {
            rows,
            fields,
            row_count,
            command: command_tag(sql),
        })
    }
}

fn acquire_error(e: sqlx::Error, waited: Duration) -> PoolError {
    match e {
        sqlx::Error::PoolTimedOut => PoolError::acquire_timeout(waited),
        sqlx::Error::PoolClosed => PoolError::PoolClosed,
        other => PoolError::connect(other.to_string()),
    }
}

fn query_error(e: sqlx::Error) -> PoolError {
    match e {
        sqlx::Error::Database(db) => {
            PoolError::query(db.message(), db.code().map(|c| c.into_owned()))
        }
        sqlx::Error::PoolClosed => PoolError::PoolClosed,
        sqlx::Error::Io(io) => PoolError::connect(io.to_string()),
        other => PoolError::query(other.to_string(), None),
    }
}

fn bind_json<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.as_str()),
        other => query.bind(sqlx::types::Json(other)),
    }
}

fn describe(row: &PgRow) -> Vec<ColumnInfo> {
    row.columns()
        .iter()
        .map(|column| ColumnInfo {
            name: column.name().to_string(),
            data_type: column.type_info().name().to_string(),
        })
        .collect()
}

fn row_to_json(row: &PgRow) -> Result<Map<String, Value>, sqlx::Error> {
    let mut object = Map::with_capacity(row.len());
    for column in row.columns() {
        let index = column.ordinal();
        let value = decode_column(row, index, column.type_info().name())?;
        object.insert(column.name().to_string(), value);
    }
    Ok(object)
}

fn decode_column(row: &PgRow, index: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(Value::Null);
    }

    let value = match type_name {
        "BOOL" => Value::Bool(row.try_get(index)?),
        "INT2" => json!(row.try_get::<i16, _>(index)?),
        "INT4" => json!(row.try_get::<i32, _>(index)?),
        "INT8" => json!(row.try_get::<i64, _>(index)?),
        "FLOAT4" => json!(row.try_get::<f32, _>(index)?),
        "FLOAT8" => json!(row.try_get::<f64, _>(index)?),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => Value::String(row.try_get(index)?),
        "JSON" | "JSONB" => row.try_get::<Value, _>(index)?,
        "UUID" => Value::String(row.try_get::<uuid::Uuid, _>(index)?.to_string()),
        "TIMESTAMPTZ" => Value::String(row.try_get::<DateTime<Utc>, _>(index)?.to_rfc3339()),
        "TIMESTAMP" => Value::String(row.try_get::<NaiveDateTime, _>(index)?.to_string()),
        "DATE" => Value::String(row.try_get::<NaiveDate, _>(index)?.to_string()),
        "TIME" => Value::String(row.try_get::<NaiveTime, _>(index)?.to_string()),
        "BYTEA" => Value::String(to_hex(&row.try_get::<Vec<u8>, _>(index)?)),
        other => {
            tracing::trace!(type_name = other, "No JSON mapping for column type");
            Value::Null
        }
    };
    Ok(value)
}

/// Postgres `bytea` hex output format
fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
