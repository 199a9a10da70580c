//! Scalar extraction and generic conversion of claim values.
//!
//! [`ClaimScalar`] is the checked cast used by every typed accessor. Numbers
//! convert through their numeric value (integer <-> float); no other kinds
//! cross.
//!
//! [`ConverterTable`] backs [`Claim::convert`](super::Claim::convert): a statically
//! registered table keyed by target type. Resolution order:
//!
//! 1. the target is the value's own type
//! 2. a registered `From<S>` conversion whose source `S` matches the value
//! 3. a registered `FromStr` parse of a string value
//! 4. otherwise `ConversionUnsupported`

use serde_json::{Number, Value};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Name of the dynamic type of `value`, for diagnostics.
#[must_use]
pub fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A type a single claim value can be cast to.
pub trait ClaimScalar: Sized {
    /// Name used in `TypeMismatch` diagnostics.
    const EXPECTED: &'static str;

    /// Checked cast; `None` when the dynamic type is incompatible.
    fn from_value(value: &Value) -> Option<Self>;

    /// Lossless match of a value whose own type is `Self`. Selects
    /// constructor sources, so no widening or truncation applies.
    fn from_source(value: &Value) -> Option<Self> {
        Self::from_value(value)
    }
}

impl ClaimScalar for String {
    const EXPECTED: &'static str = "string";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(ToString::to_string)
    }
}

impl ClaimScalar for bool {
    const EXPECTED: &'static str = "boolean";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl ClaimScalar for i64 {
    const EXPECTED: &'static str = "long";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => number_to_i64(n),
            _ => None,
        }
    }

    fn from_source(value: &Value) -> Option<Self> {
        value.as_i64()
    }
}

impl ClaimScalar for i32 {
    const EXPECTED: &'static str = "int";

    fn from_value(value: &Value) -> Option<Self> {
        i64::from_value(value).and_then(|n| i32::try_from(n).ok())
    }

    fn from_source(value: &Value) -> Option<Self> {
        value.as_i64().and_then(|n| i32::try_from(n).ok())
    }
}

impl ClaimScalar for f64 {
    const EXPECTED: &'static str = "double";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }
}

/// Any scalar value, unconverted.
impl ClaimScalar for Value {
    const EXPECTED: &'static str = "scalar";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(_) | Value::Bool(_) | Value::Number(_) => Some(value.clone()),
            _ => None,
        }
    }
}

/// Integer view of a JSON number.
///
/// Floats truncate toward zero; values outside the `i64` range do not convert.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub(crate) fn number_to_i64(n: &Number) -> Option<i64> {
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    if n.as_u64().is_some() {
        // u64 beyond i64::MAX
        return None;
    }
    let f = n.as_f64()?;
    let truncated = f.trunc();
    if truncated.is_finite() && truncated >= i64::MIN as f64 && truncated < i64::MAX as f64 {
        Some(truncated as i64)
    } else {
        None
    }
}

type ConvertFn = Arc<dyn Fn(&Value) -> Option<Box<dyn Any + Send>> + Send + Sync>;

/// Registered conversions to custom claim wrapper types.
#[derive(Clone, Default)]
pub struct ConverterTable {
    constructors: HashMap<TypeId, Vec<ConvertFn>>,
    parsers: HashMap<TypeId, ConvertFn>,
    names: HashMap<TypeId, &'static str>,
}

impl ConverterTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T::from(S)` for values whose dynamic type is `S`.
    #[must_use]
    pub fn register_from<S, T>(mut self) -> Self
    where
        S: ClaimScalar + 'static,
        T: From<S> + Any + Send,
    {
        let convert: ConvertFn = Arc::new(|value: &Value| {
            S::from_source(value).map(|source| Box::new(T::from(source)) as Box<dyn Any + Send>)
        });
        self.constructors
            .entry(TypeId::of::<T>())
            .or_default()
            .push(convert);
        self.names
            .insert(TypeId::of::<T>(), std::any::type_name::<T>());
        self
    }

    /// Register `T::from_str` for string values.
    ///
    /// A string the parser rejects resolves to `ConversionUnsupported`.
    #[must_use]
    pub fn register_parse<T>(mut self) -> Self
    where
        T: FromStr + Any + Send,
    {
        let parse: ConvertFn = Arc::new(|value: &Value| {
            value
                .as_str()
                .and_then(|s| T::from_str(s).ok())
                .map(|parsed| Box::new(parsed) as Box<dyn Any + Send>)
        });
        self.parsers.insert(TypeId::of::<T>(), parse);
        self.names
            .insert(TypeId::of::<T>(), std::any::type_name::<T>());
        self
    }

    /// Number of target types with at least one registered conversion.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Resolve `value` to `T`, or `None` when every step is exhausted.
    pub(crate) fn convert<T: Any>(&self, value: &Value) -> Option<T> {
        if let Some(native) = downcast::<T>(native_value(value)) {
            return Some(native);
        }

        let target = TypeId::of::<T>();
        if let Some(constructors) = self.constructors.get(&target) {
            if let Some(built) = constructors.iter().find_map(|construct| construct(value)) {
                return downcast::<T>(built);
            }
        }

        self.parsers
            .get(&target)
            .and_then(|parse| parse(value))
            .and_then(downcast::<T>)
    }
}

impl fmt::Debug for ConverterTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut targets: Vec<&&str> = self.names.values().collect();
        targets.sort();
        f.debug_struct("ConverterTable")
            .field("targets", &targets)
            .finish()
    }
}

/// The value boxed as its own Rust type: `String`, `bool`, `i64`/`u64`/`f64`,
/// `Vec<Value>` or `Value` for anything else.
fn native_value(value: &Value) -> Box<dyn Any + Send> {
    match value {
        Value::String(s) => Box::new(s.clone()),
        Value::Bool(b) => Box::new(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Box::new(i)
            } else if let Some(u) = n.as_u64() {
                Box::new(u)
            } else {
                Box::new(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::Array(items) => Box::new(items.clone()),
        other => Box::new(other.clone()),
    }
}

fn downcast<T: Any>(boxed: Box<dyn Any + Send>) -> Option<T> {
    boxed.downcast::<T>().ok().map(|b| *b)
}
