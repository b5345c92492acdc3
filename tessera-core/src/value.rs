//! Column values and SQL type codes carried by staged rows.

use std::fmt;

use geo::Geometry;

/// A literal column value.
///
/// Geometry values are held in their domain form until a
/// [`GeometryEncoder`](crate::GeometryEncoder) turns them into the
/// backend's native representation.
///
/// # Examples
/// ```
/// use tessera_core::Value;
///
/// assert_eq!(Value::from("road"), Value::Text("road".into()));
/// assert!(Value::Null.is_null());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL `NULL`.
    Null,
    /// Boolean flag.
    Boolean(bool),
    /// Signed integer of any width up to 64 bits.
    Integer(i64),
    /// Floating point number.
    Real(f64),
    /// Character data.
    Text(String),
    /// Opaque binary payload, typically an encoded geometry.
    Blob(Vec<u8>),
    /// Unencoded geometry.
    Geometry(Geometry<f64>),
}

impl Value {
    /// Returns `true` when the value is SQL `NULL`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Hashable stand-in for a [`Value`] used to bucket rows before comparing
/// them.
///
/// Equal values always produce equal keys. The converse does not hold:
/// every geometry shares one key, so a key match must be confirmed with
/// `==`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ValueKey {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(u64),
    Text(String),
    Blob(Vec<u8>),
    Geometry,
}

impl Value {
    pub(crate) fn key(&self) -> ValueKey {
        match self {
            Self::Null => ValueKey::Null,
            Self::Boolean(flag) => ValueKey::Boolean(*flag),
            Self::Integer(number) => ValueKey::Integer(*number),
            // 0.0 and -0.0 compare equal
            Self::Real(number) if *number == 0.0 => ValueKey::Real(0),
            Self::Real(number) => ValueKey::Real(number.to_bits()),
            Self::Text(text) => ValueKey::Text(text.clone()),
            Self::Blob(bytes) => ValueKey::Blob(bytes.clone()),
            Self::Geometry(_) => ValueKey::Geometry,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Boolean(flag) => write!(f, "{flag}"),
            Self::Integer(number) => write!(f, "{number}"),
            Self::Real(number) => write!(f, "{number}"),
            Self::Text(text) => write!(f, "'{text}'"),
            Self::Blob(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Self::Geometry(_) => f.write_str("<geometry>"),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Geometry<f64>> for Value {
    fn from(value: Geometry<f64>) -> Self {
        Self::Geometry(value)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Self>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// SQL type code of a mapped column.
///
/// Primary and foreign key columns must agree on their type; mismatches are
/// reported using [`SqlType::name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SqlType {
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    BigInt,
    /// 16-bit integer.
    SmallInt,
    /// Double precision float.
    Double,
    /// Arbitrary precision decimal.
    Numeric,
    /// Variable length character data.
    Varchar,
    /// Fixed length character data.
    Char,
    /// Boolean.
    Boolean,
    /// Calendar date.
    Date,
    /// Date and time.
    Timestamp,
    /// Binary large object.
    Blob,
    /// Spatial column.
    Geometry,
}

impl SqlType {
    /// Upper-case SQL name of the type.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::SmallInt => "SMALLINT",
            Self::Double => "DOUBLE",
            Self::Numeric => "NUMERIC",
            Self::Varchar => "VARCHAR",
            Self::Char => "CHAR",
            Self::Boolean => "BOOLEAN",
            Self::Date => "DATE",
            Self::Timestamp => "TIMESTAMP",
            Self::Blob => "BLOB",
            Self::Geometry => "GEOMETRY",
        }
    }

    /// Whether identifiers of this type are parsed as integers.
    #[must_use]
    pub const fn is_integral(self) -> bool {
        matches!(self, Self::Integer | Self::BigInt | Self::SmallInt)
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
