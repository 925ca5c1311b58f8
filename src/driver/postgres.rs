//! tokio-postgres adapter for the remote reporting engine.

use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::task::JoinHandle;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::{CancelToken, Client, Config, NoTls, Row};

use super::{ColumnMeta, Connection, Connector, DriverError, QueryResult, Value};

/// Opens connections to one Postgres target.
pub struct PostgresConnector {
    config: Config,
    target: String,
}

impl PostgresConnector {
    pub fn new(target: &str, dsn: &str, connect_timeout: Duration) -> Result<Self, DriverError> {
        let mut config = Config::from_str(dsn)
            .map_err(|e| DriverError::Connect(format!("invalid DSN for `{}`: {}", target, e)))?;
        config.connect_timeout(connect_timeout);
        Ok(Self {
            config,
            target: target.to_string(),
        })
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    async fn connect(&self) -> Result<Arc<dyn Connection>, DriverError> {
        let (client, connection) = self
            .config
            .connect(NoTls)
            .await
            .map_err(|e| DriverError::Connect(e.to_string()))?;

        let target = self.target.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(target_db = %target, error = %e, "Postgres connection terminated");
            }
        });

        let cancel_token = client.cancel_token();
        Ok(Arc::new(PgConnection {
            client,
            cancel_token,
            task: Mutex::new(Some(task)),
        }))
    }
}

/// A single Postgres session.
pub struct PgConnection {
    client: Client,
    cancel_token: CancelToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl Connection for PgConnection {
    async fn execute(&self, statement: &str, params: &[Value]) -> Result<QueryResult, DriverError> {
        if self.client.is_closed() {
            return Err(DriverError::Closed);
        }
        let prepared = self
            .client
            .prepare(statement)
            .await
            .map_err(|e| DriverError::Query(e.to_string()))?;

        let expected = prepared.params();
        if expected.len() != params.len() {
            return Err(DriverError::Query(format!(
                "statement expects {} parameters, got {}",
                expected.len(),
                params.len()
            )));
        }
        let bound = params
            .iter()
            .zip(expected)
            .enumerate()
            .map(|(idx, (value, ty))| bind(idx + 1, value, ty))
            .collect::<Result<Vec<_>, _>>()?;
        let refs: Vec<&(dyn ToSql + Sync)> = bound
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        let rows = self
            .client
            .query(&prepared, &refs)
            .await
            .map_err(|e| DriverError::Query(e.to_string()))?;

        let columns = prepared
            .columns()
            .iter()
            .map(|c| ColumnMeta {
                name: c.name().to_string(),
                type_name: c.type_().name().to_string(),
            })
            .collect();
        let rows = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;

        Ok(QueryResult { columns, rows })
    }

    async fn ping(&self) -> Result<(), DriverError> {
        self.client
            .simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(|e| DriverError::Query(e.to_string()))
    }

    async fn cancel(&self) -> Result<(), DriverError> {
        self.cancel_token
            .cancel_query(NoTls)
            .await
            .map_err(|e| DriverError::Cancel(e.to_string()))
    }

    async fn close(&self) -> Result<(), DriverError> {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
        Ok(())
    }
}

/// SQL NULL for a parameter of any server-inferred type.
#[derive(Debug)]
struct TypedNull;

impl ToSql for TypedNull {
    fn to_sql(
        &self,
        _: &Type,
        _: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        Ok(IsNull::Yes)
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Coerce a value to the type the server inferred for parameter `$index`.
fn bind(index: usize, value: &Value, ty: &Type) -> Result<Box<dyn ToSql + Sync + Send>, DriverError> {
    let mismatch = |reason: String| DriverError::Bind {
        index,
        ty: ty.name().to_string(),
        reason,
    };
    let bound: Box<dyn ToSql + Sync + Send> = match (value, ty.name()) {
        (Value::Null, _) => Box::new(TypedNull),
        (Value::Bool(b), "bool") => Box::new(*b),
        (Value::Int(n), "int2") => {
            Box::new(i16::try_from(*n).map_err(|_| mismatch(format!("{n} out of range")))?)
        }
        (Value::Int(n), "int4") => {
            Box::new(i32::try_from(*n).map_err(|_| mismatch(format!("{n} out of range")))?)
        }
        (Value::Int(n), "int8") => Box::new(*n),
        (Value::Int(n), "float4") => Box::new(*n as f32),
        (Value::Int(n), "float8") => Box::new(*n as f64),
        (Value::Float(f), "float4") => Box::new(*f as f32),
        (Value::Float(f), "float8") => Box::new(*f),
        (Value::Text(s), _) if <String as ToSql>::accepts(ty) => Box::new(s.clone()),
        (other, _) => return Err(mismatch(format!("{} value", kind(other)))),
    };
    Ok(bound)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Int(_) => "int",
        Value::Float(_) => "float",
        Value::Text(_) => "text",
    }
}

fn decode_row(row: &Row) -> Result<Vec<Value>, DriverError> {
    let mut values = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = match column.type_().name() {
            "bool" => row.try_get::<_, Option<bool>>(idx).map(|v| v.map(Value::Bool)),
            "int2" => row
                .try_get::<_, Option<i16>>(idx)
                .map(|v| v.map(|n| Value::Int(n.into()))),
            "int4" => row
                .try_get::<_, Option<i32>>(idx)
                .map(|v| v.map(|n| Value::Int(n.into()))),
            "int8" => row.try_get::<_, Option<i64>>(idx).map(|v| v.map(Value::Int)),
            "float4" => row
                .try_get::<_, Option<f32>>(idx)
                .map(|v| v.map(|n| Value::Float(n.into()))),
            "float8" => row.try_get::<_, Option<f64>>(idx).map(|v| v.map(Value::Float)),
            "text" | "varchar" | "bpchar" | "name" => {
                row.try_get::<_, Option<String>>(idx).map(|v| v.map(Value::Text))
            }
            other => return Err(DriverError::Unsupported(other.to_string())),
        };
        let value = value.map_err(|e| DriverError::Query(e.to_string()))?;
        values.push(value.unwrap_or(Value::Null));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: &Value, ty: &Type) -> Result<(IsNull, BytesMut), DriverError> {
        let bound = bind(1, value, ty)?;
        let mut buf = BytesMut::new();
        let is_null = bound.to_sql_checked(ty, &mut buf).expect("accepted by the server type");
        Ok((is_null, buf))
    }

    #[test]
    fn int_binds_to_int4_parameter() {
        let (is_null, buf) = encode(&Value::Int(42), &Type::INT4).unwrap();
        assert!(matches!(is_null, IsNull::No));
        assert_eq!(&buf[..], &42i32.to_be_bytes());
    }

    #[test]
    fn int_binds_to_int2_parameter() {
        let (_, buf) = encode(&Value::Int(-7), &Type::INT2).unwrap();
        assert_eq!(&buf[..], &(-7i16).to_be_bytes());
    }

    #[test]
    fn int_out_of_range_for_int2_is_rejected() {
        let err = bind(2, &Value::Int(70_000), &Type::INT2).unwrap_err();
        match err {
            DriverError::Bind { index, ty, .. } => {
                assert_eq!(index, 2);
                assert_eq!(ty, "int2");
            }
            other => panic!("expected bind error, got {other:?}"),
        }
    }

    #[test]
    fn null_binds_to_int4_and_date_parameters() {
        let (is_null, buf) = encode(&Value::Null, &Type::INT4).unwrap();
        assert!(matches!(is_null, IsNull::Yes));
        assert!(buf.is_empty());

        let (is_null, _) = encode(&Value::Null, &Type::DATE).unwrap();
        assert!(matches!(is_null, IsNull::Yes));
    }

    #[test]
    fn numbers_bind_to_float_parameters() {
        let (_, buf) = encode(&Value::Float(1.5), &Type::FLOAT4).unwrap();
        assert_eq!(&buf[..], &1.5f32.to_be_bytes());

        let (_, buf) = encode(&Value::Int(3), &Type::FLOAT8).unwrap();
        assert_eq!(&buf[..], &3.0f64.to_be_bytes());
    }

    #[test]
    fn text_binds_to_varchar_but_not_int4() {
        let (_, buf) = encode(&Value::from("EMEA"), &Type::VARCHAR).unwrap();
        assert_eq!(&buf[..], b"EMEA");

        assert!(matches!(
            bind(1, &Value::from("EMEA"), &Type::INT4),
            Err(DriverError::Bind { .. })
        ));
    }
}
