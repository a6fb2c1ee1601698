use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use std::time::Duration;

use crate::error::SpannerMiddlewareError;

/// Timestamp assigned by the backing database when a read-write transaction
/// commits.
pub type CommitTimestamp = DateTime<Utc>;

/// The element types the backing database can encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Int64,
    Float64,
    Bool,
    String,
    Bytes,
    Numeric,
    Date,
    Timestamp,
    Json,
}

/// A value carrying an explicit element type, for callers that need to bind
/// something the convenience variants cannot express (for example a typed
/// NULL inside an array).
#[derive(Debug, Clone, PartialEq)]
pub struct GenericValue {
    pub value_type: ValueType,
    pub value: JsonValue,
}

/// Values that can be bound as statement parameters or returned in rows.
///
/// This is the closed whitelist of bindable types; anything the backing
/// client cannot encode simply has no variant here. Validation at bind time
/// (see [`validate_params`]) covers the shapes the enum cannot rule out
/// statically: heterogeneous or nested arrays, array-typed generic values,
/// and malformed numeric text.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL value
    Null,
    /// Integer value (64-bit)
    Int64(i64),
    /// Floating point value (64-bit)
    Float64(f64),
    /// Boolean value
    Bool(bool),
    /// Text/string value
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// Arbitrary-precision decimal, carried as its canonical text form
    Numeric(String),
    /// Calendar date without a time zone
    Date(NaiveDate),
    /// Timestamp value
    Timestamp(DateTime<Utc>),
    /// JSON value
    Json(JsonValue),
    /// Homogeneous sequence of one of the scalar variants above
    Array(Vec<Value>),
    /// Explicitly typed value
    Generic(GenericValue),
}

impl Value {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int64(&self) -> Option<i64> {
        if let Value::Int64(v) = self { Some(*v) } else { None }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        if let Value::String(v) = self { Some(v) } else { None }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        if let Value::Bool(v) = self { Some(*v) } else { None }
    }

    #[must_use]
    pub fn as_float64(&self) -> Option<f64> {
        if let Value::Float64(v) = self { Some(*v) } else { None }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        if let Value::Bytes(v) = self { Some(v) } else { None }
    }

    /// The element type of this value, if it is a scalar.
    /// NULL, arrays, and generic values have no single scalar type.
    #[must_use]
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Int64(_) => Some(ValueType::Int64),
            Value::Float64(_) => Some(ValueType::Float64),
            Value::Bool(_) => Some(ValueType::Bool),
            Value::String(_) => Some(ValueType::String),
            Value::Bytes(_) => Some(ValueType::Bytes),
            Value::Numeric(_) => Some(ValueType::Numeric),
            Value::Date(_) => Some(ValueType::Date),
            Value::Timestamp(_) => Some(ValueType::Timestamp),
            Value::Json(_) => Some(ValueType::Json),
            Value::Null | Value::Array(_) | Value::Generic(_) => None,
        }
    }
}

/// Validate every bound parameter against the bindable whitelist before the
/// statement reaches the backing client.
///
/// # Errors
/// Returns `InvalidArgument` for heterogeneous arrays, nested arrays,
/// array- or generic-typed array elements, and numeric text that does not
/// parse as a decimal number.
pub fn validate_params(params: &[Value]) -> Result<(), SpannerMiddlewareError> {
    for (idx, value) in params.iter().enumerate() {
        validate_param(value).map_err(|e| {
            SpannerMiddlewareError::invalid_argument(format!("parameter {}: {e}", idx + 1))
        })?;
    }
    Ok(())
}

fn validate_param(value: &Value) -> Result<(), SpannerMiddlewareError> {
    match value {
        Value::Numeric(text) => validate_numeric(text),
        Value::Array(elements) => validate_array(elements),
        Value::Generic(generic) => {
            match generic.value_type {
                ValueType::Numeric => match &generic.value {
                    JsonValue::String(text) => validate_numeric(text),
                    JsonValue::Null => Ok(()),
                    other => Err(SpannerMiddlewareError::invalid_argument(format!(
                        "generic numeric value must be encoded as a string, got {other}"
                    ))),
                },
                _ => Ok(()),
            }
        }
        _ => Ok(()),
    }
}

fn validate_array(elements: &[Value]) -> Result<(), SpannerMiddlewareError> {
    let mut element_type: Option<ValueType> = None;
    for element in elements {
        match element {
            Value::Null => continue,
            Value::Array(_) => {
                return Err(SpannerMiddlewareError::invalid_argument(
                    "nested arrays are not supported",
                ));
            }
            Value::Generic(_) => {
                return Err(SpannerMiddlewareError::invalid_argument(
                    "generic values are not supported inside arrays",
                ));
            }
            scalar => {
                let ty = scalar
                    .value_type()
                    .expect("non-null scalar always has a value type");
                if let Value::Numeric(text) = scalar {
                    validate_numeric(text)?;
                }
                match element_type {
                    None => element_type = Some(ty),
                    Some(expected) if expected == ty => {}
                    Some(expected) => {
                        return Err(SpannerMiddlewareError::invalid_argument(format!(
                            "array elements must share one type, found {expected:?} and {ty:?}"
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

fn validate_numeric(text: &str) -> Result<(), SpannerMiddlewareError> {
    let digits = text.strip_prefix('-').or_else(|| text.strip_prefix('+')).unwrap_or(text);
    let mut dots = 0usize;
    let mut digit_seen = false;
    for b in digits.bytes() {
        match b {
            b'0'..=b'9' => digit_seen = true,
            b'.' => dots += 1,
            _ => {
                return Err(SpannerMiddlewareError::invalid_argument(format!(
                    "invalid numeric literal: {text}"
                )));
            }
        }
    }
    if !digit_seen || dots > 1 {
        return Err(SpannerMiddlewareError::invalid_argument(format!(
            "invalid numeric literal: {text}"
        )));
    }
    Ok(())
}

/// Staleness bound for snapshot reads: queries in autocommit mode and
/// read-only transactions.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TimestampBound {
    /// Read the freshest data. The default.
    #[default]
    Strong,
    /// Read data at exactly this long ago.
    ExactStaleness(Duration),
    /// Read data no staler than this.
    MaxStaleness(Duration),
    /// Read data as of an exact timestamp.
    ReadTimestamp(DateTime<Utc>),
    /// Read data from a snapshot no earlier than this timestamp.
    MinReadTimestamp(DateTime<Utc>),
}

/// The kind of write a [`Mutation`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOp {
    Insert,
    Update,
    InsertOrUpdate,
    Replace,
    Delete,
}

/// A single row write, applied directly outside a transaction or buffered
/// into a read-write transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub op: MutationOp,
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

impl Mutation {
    #[must_use]
    pub fn new(op: MutationOp, table: impl Into<String>) -> Self {
        Self {
            op,
            table: table.into(),
            columns: Vec::new(),
            values: Vec::new(),
        }
    }

    #[must_use]
    pub fn column(mut self, name: impl Into<String>, value: Value) -> Self {
        self.columns.push(name.into());
        self.values.push(value);
        self
    }
}
