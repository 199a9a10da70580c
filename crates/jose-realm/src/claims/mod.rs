//! Typed access to decoded payload values.
//!
//! A [`Claim`] wraps one raw payload value. Its [`ClaimKind`] is fixed when the
//! claim is built; every accessor re-applies the configured transform and then
//! performs a checked cast. A null claim reads as `None` from every accessor.
//!
//! ```rust,ignore
//! let groups: Vec<String> = principal
//!     .claim("grp")
//!     .map(|c| c.as_list_of::<String>())
//!     .transpose()?
//!     .flatten()
//!     .unwrap_or_default();
//! ```

pub mod convert;

pub use convert::{value_type_name, ClaimScalar, ConverterTable};

use crate::errors::ClaimError;
use crate::transforms::{identity, SharedTransform};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Kind of a claim, derived once from its raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimKind {
    Null,
    String,
    Boolean,
    Number,
    Array,
}

impl ClaimKind {
    /// Kind of a top-level value; `None` for objects.
    #[must_use]
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(ClaimKind::Null),
            Value::String(_) => Some(ClaimKind::String),
            Value::Bool(_) => Some(ClaimKind::Boolean),
            Value::Number(_) => Some(ClaimKind::Number),
            Value::Array(_) => Some(ClaimKind::Array),
            Value::Object(_) => None,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ClaimKind::Null => "null",
            ClaimKind::String => "string",
            ClaimKind::Boolean => "boolean",
            ClaimKind::Number => "number",
            ClaimKind::Array => "array",
        }
    }
}

impl fmt::Display for ClaimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unit of an epoch offset stored in a numeric claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EpochUnit {
    #[default]
    Seconds,
    Milliseconds,
    Microseconds,
    Nanoseconds,
}

impl EpochUnit {
    fn per_second(self) -> i64 {
        match self {
            EpochUnit::Seconds => 1,
            EpochUnit::Milliseconds => 1_000,
            EpochUnit::Microseconds => 1_000_000,
            EpochUnit::Nanoseconds => 1_000_000_000,
        }
    }
}

/// One named claim of a validated token.
#[derive(Clone)]
pub struct Claim {
    name: String,
    kind: ClaimKind,
    raw: Value,
    transform: SharedTransform,
    converters: Arc<ConverterTable>,
}

impl Claim {
    /// Build a claim with the identity transform.
    ///
    /// # Errors
    ///
    /// `UnsupportedValue` when `raw` is an object, or an array holding anything
    /// other than strings, booleans and numbers.
    pub fn new(name: impl Into<String>, raw: Value) -> Result<Self, ClaimError> {
        Self::with_transform(name, raw, identity(), Arc::new(ConverterTable::new()))
    }

    /// Build a claim whose reads go through `transform`.
    ///
    /// # Errors
    ///
    /// Same as [`Claim::new`].
    pub fn with_transform(
        name: impl Into<String>,
        raw: Value,
        transform: SharedTransform,
        converters: Arc<ConverterTable>,
    ) -> Result<Self, ClaimError> {
        let name = name.into();
        let kind = ClaimKind::of(&raw).ok_or_else(|| ClaimError::UnsupportedValue {
            claim: name.clone(),
            reason: "objects are not supported claim values".to_string(),
        })?;

        if let Value::Array(items) = &raw {
            if let Some(bad) = items
                .iter()
                .find(|item| !matches!(item, Value::String(_) | Value::Bool(_) | Value::Number(_)))
            {
                return Err(ClaimError::UnsupportedValue {
                    claim: name,
                    reason: format!(
                        "array elements must be scalar, found {}",
                        value_type_name(bad)
                    ),
                });
            }
        }

        Ok(Self {
            name,
            kind,
            raw,
            transform,
            converters,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> ClaimKind {
        self.kind
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.kind == ClaimKind::Null
    }

    /// The untransformed payload value.
    #[must_use]
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// The value after the transform. Re-evaluated on every call.
    #[must_use]
    pub fn value(&self) -> Value {
        self.transform.apply(self.raw.clone())
    }

    fn mismatch(&self, expected: &'static str, found: &Value) -> ClaimError {
        ClaimError::TypeMismatch {
            claim: self.name.clone(),
            expected,
            found: value_type_name(found),
        }
    }

    fn scalar<T: ClaimScalar>(&self) -> Result<Option<T>, ClaimError> {
        if self.is_null() {
            return Ok(None);
        }
        let value = self.value();
        if value.is_null() {
            return Ok(None);
        }
        T::from_value(&value)
            .map(Some)
            .ok_or_else(|| self.mismatch(T::EXPECTED, &value))
    }

    /// # Errors
    ///
    /// `TypeMismatch` unless the value is a string.
    pub fn as_string(&self) -> Result<Option<String>, ClaimError> {
        self.scalar::<String>()
    }

    /// # Errors
    ///
    /// `TypeMismatch` unless the value is a boolean.
    pub fn as_bool(&self) -> Result<Option<bool>, ClaimError> {
        self.scalar::<bool>()
    }

    /// # Errors
    ///
    /// `TypeMismatch` unless the value is a number within `i32` range.
    pub fn as_i32(&self) -> Result<Option<i32>, ClaimError> {
        self.scalar::<i32>()
    }

    /// # Errors
    ///
    /// `TypeMismatch` unless the value is a number within `i64` range.
    pub fn as_i64(&self) -> Result<Option<i64>, ClaimError> {
        self.scalar::<i64>()
    }

    /// # Errors
    ///
    /// `TypeMismatch` unless the value is a number.
    pub fn as_f64(&self) -> Result<Option<f64>, ClaimError> {
        self.scalar::<f64>()
    }

    /// Read a numeric claim as an instant, in epoch seconds.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` unless the claim is of kind `Number`.
    pub fn as_instant(&self) -> Result<Option<DateTime<Utc>>, ClaimError> {
        self.as_instant_in(EpochUnit::Seconds)
    }

    /// Read a numeric claim as an instant, in the given epoch unit.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` unless the claim is of kind `Number`; `UnsupportedValue`
    /// when the offset is out of range.
    pub fn as_instant_in(&self, unit: EpochUnit) -> Result<Option<DateTime<Utc>>, ClaimError> {
        if self.is_null() {
            return Ok(None);
        }
        if self.kind != ClaimKind::Number {
            return Err(self.mismatch("instant", &self.raw));
        }
        let Some(offset) = self.scalar::<i64>()? else {
            return Ok(None);
        };

        let per_second = unit.per_second();
        let secs = offset.div_euclid(per_second);
        let sub_unit = offset.rem_euclid(per_second);
        let nanos = u32::try_from(sub_unit * (1_000_000_000 / per_second)).ok();

        nanos
            .and_then(|nanos| DateTime::from_timestamp(secs, nanos))
            .map(Some)
            .ok_or_else(|| ClaimError::UnsupportedValue {
                claim: self.name.clone(),
                reason: "epoch offset out of range".to_string(),
            })
    }

    /// Read a numeric claim (epoch seconds) as a [`SystemTime`].
    ///
    /// # Errors
    ///
    /// Same as [`Claim::as_instant`].
    pub fn as_system_time(&self) -> Result<Option<SystemTime>, ClaimError> {
        Ok(self.as_instant()?.map(|instant| {
            let millis = instant.timestamp_millis();
            if millis >= 0 {
                UNIX_EPOCH + Duration::from_millis(millis.unsigned_abs())
            } else {
                UNIX_EPOCH - Duration::from_millis(millis.unsigned_abs())
            }
        }))
    }

    fn elements(&self) -> Result<Option<Vec<Value>>, ClaimError> {
        if self.is_null() {
            return Ok(None);
        }
        if self.kind != ClaimKind::Array {
            return Err(self.mismatch("array", &self.raw));
        }
        match self.value() {
            Value::Null => Ok(None),
            Value::Array(items) => Ok(Some(items)),
            other => Err(self.mismatch("array", &other)),
        }
    }

    fn typed_elements<T: ClaimScalar>(&self) -> Result<Option<Vec<T>>, ClaimError> {
        let Some(items) = self.elements()? else {
            return Ok(None);
        };
        items
            .iter()
            .map(|item| T::from_value(item).ok_or_else(|| self.mismatch(T::EXPECTED, item)))
            .collect::<Result<Vec<T>, _>>()
            .map(Some)
    }

    /// Elements of an array claim, in order.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` unless the claim is of kind `Array`.
    pub fn as_list(&self) -> Result<Option<Vec<Value>>, ClaimError> {
        self.elements()
    }

    /// Elements of an array claim cast to `T`, in order.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` unless the claim is an array, or on the first element that
    /// is not a `T`.
    pub fn as_list_of<T: ClaimScalar>(&self) -> Result<Option<Vec<T>>, ClaimError> {
        self.typed_elements::<T>()
    }

    /// Distinct elements of an array claim, in first-seen order.
    ///
    /// # Errors
    ///
    /// Same as [`Claim::as_list`].
    pub fn as_set(&self) -> Result<Option<Vec<Value>>, ClaimError> {
        Ok(self.elements()?.map(dedup_in_order))
    }

    /// Distinct elements cast to `T`, in first-seen order.
    ///
    /// # Errors
    ///
    /// Same as [`Claim::as_list_of`].
    pub fn as_set_of<T: ClaimScalar + PartialEq>(&self) -> Result<Option<Vec<T>>, ClaimError> {
        Ok(self.typed_elements::<T>()?.map(dedup_in_order))
    }

    /// Elements cast to `T` as a fixed-size array.
    ///
    /// # Errors
    ///
    /// Same as [`Claim::as_list_of`].
    pub fn as_array<T: ClaimScalar>(&self) -> Result<Option<Box<[T]>>, ClaimError> {
        Ok(self.typed_elements::<T>()?.map(Vec::into_boxed_slice))
    }

    /// Convert the value to `T` through the registered [`ConverterTable`].
    ///
    /// # Errors
    ///
    /// `ConversionUnsupported` when no resolution step yields a `T`.
    pub fn convert<T: Any>(&self) -> Result<Option<T>, ClaimError> {
        if self.is_null() {
            return Ok(None);
        }
        let value = self.value();
        if value.is_null() {
            return Ok(None);
        }
        self.converters
            .convert::<T>(&value)
            .map(Some)
            .ok_or_else(|| ClaimError::ConversionUnsupported {
                claim: self.name.clone(),
                target: std::any::type_name::<T>(),
            })
    }

    /// Cast the value to `S` and pass it through `converter`.
    ///
    /// A null claim yields `None` without invoking `converter`.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` unless the value is an `S`.
    pub fn as_with<S, T, F>(&self, converter: F) -> Result<Option<T>, ClaimError>
    where
        S: ClaimScalar,
        F: FnOnce(S) -> T,
    {
        Ok(self.scalar::<S>()?.map(converter))
    }
}

fn dedup_in_order<T: PartialEq>(items: Vec<T>) -> Vec<T> {
    let mut distinct: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !distinct.contains(&item) {
            distinct.push(item);
        }
    }
    distinct
}

/// Claim values are redacted in Debug output.
impl fmt::Debug for Claim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claim")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("value", &"[REDACTED]")
            .finish()
    }
}
