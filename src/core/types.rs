use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};

/// State value used for every sliced atom before the first state event arrives.
pub const STATE_UNKNOWN: i64 = -1;

/// Numeric measurement carried by a sample field.
///
/// Arithmetic between an `Int` and a `Double` promotes both sides to
/// `Double`; two `Int`s stay integral and wrap on overflow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// 64-bit signed integer
    Int(i64),
    /// Double precision real
    Double(f64),
}

impl Value {
    /// Zero of the same variant as `self`
    pub fn zero_like(&self) -> Value {
        match self {
            Value::Int(_) => Value::Int(0),
            Value::Double(_) => Value::Double(0.0),
        }
    }

    /// Returns true if the value is exactly zero
    pub fn is_zero(&self) -> bool {
        match *self {
            Value::Int(v) => v == 0,
            Value::Double(v) => v == 0.0,
        }
    }

    /// Lossy conversion to a real
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Int(v) => v as f64,
            Value::Double(v) => v,
        }
    }

    /// Lossy conversion to an integer, truncating reals toward zero
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i64(&self) -> i64 {
        match *self {
            Value::Int(v) => v,
            Value::Double(v) => v as i64,
        }
    }

    /// Smaller of two values
    pub fn min(self, other: Value) -> Value {
        if other < self {
            other
        } else {
            self
        }
    }

    /// Larger of two values
    pub fn max(self, other: Value) -> Value {
        if other > self {
            other
        } else {
            self
        }
    }

    /// Mean over `count` samples, always a real
    pub fn mean(self, count: u64) -> Value {
        if count == 0 {
            return Value::Double(0.0);
        }
        #[allow(clippy::cast_precision_loss)]
        let count = count as f64;
        Value::Double(self.as_f64() / count)
    }
}

impl Add for Value {
    type Output = Value;

    fn add(self, rhs: Value) -> Value {
        match (self, rhs) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_add(b)),
            (a, b) => Value::Double(a.as_f64() + b.as_f64()),
        }
    }
}

impl Sub for Value {
    type Output = Value;

    fn sub(self, rhs: Value) -> Value {
        match (self, rhs) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_sub(b)),
            (a, b) => Value::Double(a.as_f64() - b.as_f64()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
        }
    }
}

/// Typed value of one dimension or state field
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AtomValue {
    /// Integer field (uids, enum states)
    Int(i64),
    /// String field (package names, tags)
    Str(String),
}

impl fmt::Display for AtomValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AtomValue::Int(v) => write!(f, "{}", v),
            AtomValue::Str(v) => write!(f, "{}", v),
        }
    }
}

/// One (field id, value) pair of a dimension tuple
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldValue {
    /// Field id within the source atom
    pub field: u32,
    /// Field value
    pub value: AtomValue,
}

impl FieldValue {
    /// Create an integer field
    pub fn int(field: u32, value: i64) -> Self {
        Self {
            field,
            value: AtomValue::Int(value),
        }
    }

    /// Create a string field
    pub fn str<S: Into<String>>(field: u32, value: S) -> Self {
        Self {
            field,
            value: AtomValue::Str(value.into()),
        }
    }
}

/// Ordered tuple of field values identifying one measured thing.
///
/// Equality and hashing are structural.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimensionKey(SmallVec<[FieldValue; 3]>);

impl DimensionKey {
    /// Build a key from its fields, in the given order
    pub fn new<I: IntoIterator<Item = FieldValue>>(fields: I) -> Self {
        DimensionKey(fields.into_iter().collect())
    }

    /// Key with no fields (metrics without dimensions)
    pub fn empty() -> Self {
        DimensionKey::default()
    }

    /// Fields of the tuple
    pub fn fields(&self) -> &[FieldValue] {
        &self.0
    }

    /// Returns true if the tuple has no fields
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if every field of `link` is present in this key with the same value
    pub fn contains(&self, link: &DimensionKey) -> bool {
        link.0.iter().all(|wanted| self.0.contains(wanted))
    }

    /// Sorted, deduplicated field ids of the tuple
    pub fn field_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.0.iter().map(|fv| fv.field).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Sub-tuple holding the given field ids in the given order, or `None`
    /// if one of them is absent
    pub fn project(&self, fields: &[u32]) -> Option<DimensionKey> {
        fields
            .iter()
            .map(|&id| self.0.iter().find(|fv| fv.field == id).cloned())
            .collect::<Option<SmallVec<_>>>()
            .map(DimensionKey)
    }
}

impl fmt::Display for DimensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, fv) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}={}", fv.field, fv.value)?;
        }
        write!(f, "}}")
    }
}

/// Values of the sliced state atoms for one dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateKey(DimensionKey);

impl StateKey {
    /// Build a state key from its fields
    pub fn new<I: IntoIterator<Item = FieldValue>>(fields: I) -> Self {
        StateKey(DimensionKey::new(fields))
    }

    /// Sentinel state for every sliced atom before any state event is seen
    pub fn unknown(atoms: &[u32]) -> Self {
        StateKey::new(atoms.iter().map(|&atom| FieldValue::int(atom, STATE_UNKNOWN)))
    }

    /// Returns true if every field holds the unknown sentinel
    pub fn is_unknown(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .fields()
                .iter()
                .all(|fv| fv.value == AtomValue::Int(STATE_UNKNOWN))
    }

    /// Fields of the state tuple
    pub fn fields(&self) -> &[FieldValue] {
        self.0.fields()
    }

    /// Apply a raw-state to group remapping to every integer field
    pub fn remapped(&self, map: &std::collections::HashMap<i64, i64>) -> StateKey {
        if map.is_empty() {
            return self.clone();
        }
        StateKey::new(self.fields().iter().map(|fv| match fv.value {
            AtomValue::Int(raw) => FieldValue::int(fv.field, map.get(&raw).copied().unwrap_or(raw)),
            AtomValue::Str(_) => fv.clone(),
        }))
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// (dimensions in what, state) pair: the sharding key of every produced series
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricDimensionKey {
    /// Dimensions extracted from the sample
    pub what: DimensionKey,
    /// State slice the dimension was in
    pub state: StateKey,
}

impl MetricDimensionKey {
    /// Create a new key
    pub fn new(what: DimensionKey, state: StateKey) -> Self {
        Self { what, state }
    }
}

impl fmt::Display for MetricDimensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.what, self.state)
    }
}

/// One classified sample: its dimension key and raw value fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Dimension key extracted by the matcher
    pub what: DimensionKey,
    /// Raw value fields, indexed by the metric's configured value fields
    pub values: Vec<Value>,
}

impl Sample {
    /// Create a new sample
    pub fn new(what: DimensionKey, values: Vec<Value>) -> Self {
        Self { what, values }
    }
}
