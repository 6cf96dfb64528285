//! Flat attribute values attached to clips and tracks.
//!
//! Attributes are restricted to scalars and homogeneous numeric arrays so that every
//! consumer can read them without knowing the producer's record types.

use std::collections::BTreeMap;
use std::collections::btree_map;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{Result, TrackDbError};

/// One attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Array(NumericArray),
}

impl AttrValue {
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Numeric view of a scalar; integers widen to `f64`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&NumericArray> {
        match self {
            Self::Array(value) => Some(value),
            _ => None,
        }
    }

    /// Value kind for diagnostics, e.g. `float` or `i16[12, 4]`.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Array(array) => format!("{}{:?}", array.data().dtype(), array.shape()),
            other => other.kind().to_string(),
        }
    }

    /// NaN and infinities have no JSON form and are refused by [`Attributes::set`].
    fn is_finite(&self) -> bool {
        match self {
            Self::Float(value) => value.is_finite(),
            Self::Array(array) => match array.data() {
                ArrayData::F32(values) => values.iter().all(|value| value.is_finite()),
                ArrayData::F64(values) => values.iter().all(|value| value.is_finite()),
                _ => true,
            },
            _ => true,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Array(_) => "array",
        }
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for AttrValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<f32> for AttrValue {
    fn from(value: f32) -> Self {
        Self::Float(f64::from(value))
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<NumericArray> for AttrValue {
    fn from(value: NumericArray) -> Self {
        Self::Array(value)
    }
}

/// Element storage of a [`NumericArray`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayData {
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl ArrayData {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::I16(values) => values.len(),
            Self::I32(values) => values.len(),
            Self::I64(values) => values.len(),
            Self::F32(values) => values.len(),
            Self::F64(values) => values.len(),
        }
    }

    #[must_use]
    pub fn dtype(&self) -> &'static str {
        match self {
            Self::I16(_) => "int16",
            Self::I32(_) => "int32",
            Self::I64(_) => "int64",
            Self::F32(_) => "float32",
            Self::F64(_) => "float64",
        }
    }
}

/// Row-major homogeneous numeric array with an explicit shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericArray {
    shape: SmallVec<[usize; 2]>,
    data: ArrayData,
}

impl NumericArray {
    /// Build an array, checking that `shape` accounts for every element.
    pub fn new(shape: &[usize], data: ArrayData) -> Result<Self> {
        let expected = shape.iter().try_fold(1usize, |acc, dim| acc.checked_mul(*dim));
        if expected != Some(data.len()) {
            return Err(TrackDbError::invalid_argument(format!(
                "array shape {shape:?} does not match {} elements",
                data.len()
            )));
        }
        Ok(Self {
            shape: SmallVec::from_slice(shape),
            data,
        })
    }

    /// One-dimensional array.
    #[must_use]
    pub fn vector(data: ArrayData) -> Self {
        let len = data.len();
        Self {
            shape: SmallVec::from_slice(&[len]),
            data,
        }
    }

    /// `rows × N` array of `i16`.
    #[must_use]
    pub fn rows_i16<const N: usize>(rows: &[[i16; N]]) -> Self {
        let flat: Vec<i16> = rows.iter().flat_map(|row| row.iter().copied()).collect();
        Self {
            shape: SmallVec::from_slice(&[rows.len(), N]),
            data: ArrayData::I16(flat),
        }
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Length of the leading axis.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    #[must_use]
    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    #[must_use]
    pub fn as_i16(&self) -> Option<&[i16]> {
        match &self.data {
            ArrayData::I16(values) => Some(values),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i32(&self) -> Option<&[i32]> {
        match &self.data {
            ArrayData::I32(values) => Some(values),
            _ => None,
        }
    }
}

/// Attribute set of a clip node or track dataset, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    entries: BTreeMap<String, AttrValue>,
}

impl Attributes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an attribute. Names must be non-empty and contain neither `/`
    /// nor NUL. Floats must be finite and arrays internally consistent.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Result<()> {
        let name = name.into();
        let value = value.into();
        validate_name(&name)?;
        if let AttrValue::Array(array) = &value {
            let expected: usize = array.shape().iter().product();
            if expected != array.data().len() {
                return Err(TrackDbError::InvalidAttribute {
                    name,
                    reason: format!(
                        "{} array of shape {:?} holds {} elements",
                        array.data().dtype(),
                        array.shape(),
                        array.data().len()
                    ),
                });
            }
        }
        if !value.is_finite() {
            return Err(TrackDbError::InvalidAttribute {
                name,
                reason: format!("{} value is not finite", value.describe()),
            });
        }
        self.entries.insert(name, value);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.entries.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    #[must_use]
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(AttrValue::as_f64)
    }

    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(AttrValue::as_str)
    }

    #[must_use]
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(AttrValue::as_bool)
    }

    #[must_use]
    pub fn get_array(&self, name: &str) -> Option<&NumericArray> {
        self.get(name).and_then(AttrValue::as_array)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, AttrValue> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a Attributes {
    type Item = (&'a String, &'a AttrValue);
    type IntoIter = btree_map::Iter<'a, String, AttrValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TrackDbError::InvalidAttribute {
            name: name.to_string(),
            reason: "name is empty".into(),
        });
    }
    if name.contains('/') || name.contains('\0') {
        return Err(TrackDbError::InvalidAttribute {
            name: name.to_string(),
            reason: "name contains '/' or NUL".into(),
        });
    }
    Ok(())
}
