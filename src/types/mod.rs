use std::cmp::Ordering;
use std::fmt;

use arrow::datatypes::DataType;
use ordered_float::OrderedFloat;

/// Represents a dynamically typed, nullable single value.
///
/// Values are hashable so that constants can take part in structural interning, which is why
/// floats are wrapped in [`OrderedFloat`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ScalarValue {
    /// represents `DataType::Null` (castable to/from any other type)
    Null,
    /// true or false value
    Boolean(Option<bool>),
    /// 64bit float
    Float64(Option<OrderedFloat<f64>>),
    /// signed 32bit int
    Int32(Option<i32>),
    /// signed 64bit int
    Int64(Option<i64>),
    /// utf-8 encoded string.
    String(Option<String>),
}

macro_rules! impl_scalar {
    ($ty:ty, $scalar:tt) => {
        impl From<$ty> for ScalarValue {
            fn from(value: $ty) -> Self {
                ScalarValue::$scalar(Some(value.into()))
            }
        }

        impl From<Option<$ty>> for ScalarValue {
            fn from(value: Option<$ty>) -> Self {
                ScalarValue::$scalar(value.map(Into::into))
            }
        }
    };
}

impl_scalar!(f64, Float64);
impl_scalar!(i32, Int32);
impl_scalar!(i64, Int64);
impl_scalar!(bool, Boolean);
impl_scalar!(String, String);

impl ScalarValue {
    pub fn data_type(&self) -> DataType {
        match self {
            ScalarValue::Null => DataType::Null,
            ScalarValue::Boolean(_) => DataType::Boolean,
            ScalarValue::Float64(_) => DataType::Float64,
            ScalarValue::Int32(_) => DataType::Int32,
            ScalarValue::Int64(_) => DataType::Int64,
            ScalarValue::String(_) => DataType::Utf8,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(
            self,
            ScalarValue::Null
                | ScalarValue::Boolean(None)
                | ScalarValue::Float64(None)
                | ScalarValue::Int32(None)
                | ScalarValue::Int64(None)
                | ScalarValue::String(None)
        )
    }

    /// Widen integer values to i64, used when comparing or combining mixed integer widths.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ScalarValue::Int32(v) => v.map(i64::from),
            ScalarValue::Int64(v) => *v,
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScalarValue::Boolean(v) => *v,
            _ => None,
        }
    }

    /// Compare two non-null values of compatible types. Returns `None` when either side is
    /// NULL or the types can't be compared.
    pub fn partial_cmp_value(&self, other: &ScalarValue) -> Option<Ordering> {
        if self.is_null() || other.is_null() {
            return None;
        }
        if let (Some(l), Some(r)) = (self.as_i64(), other.as_i64()) {
            return Some(l.cmp(&r));
        }
        match (self, other) {
            (ScalarValue::Float64(Some(l)), ScalarValue::Float64(Some(r))) => Some(l.cmp(r)),
            (ScalarValue::Boolean(Some(l)), ScalarValue::Boolean(Some(r))) => Some(l.cmp(r)),
            (ScalarValue::String(Some(l)), ScalarValue::String(Some(r))) => Some(l.cmp(r)),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            v if v.is_null() => write!(f, "NULL"),
            ScalarValue::Boolean(Some(v)) => write!(f, "{}", v),
            ScalarValue::Float64(Some(v)) => write!(f, "{}", v),
            ScalarValue::Int32(Some(v)) => write!(f, "{}", v),
            ScalarValue::Int64(Some(v)) => write!(f, "{}", v),
            ScalarValue::String(Some(v)) => write!(f, "'{}'", v),
            _ => unreachable!("null values handled above"),
        }
    }
}
