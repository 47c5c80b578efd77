//! Matrix strategy expansion
//!
//! A matrix is a set of ordered axes plus `include` and `exclude` entries.
//! Expansion takes the cartesian product of the axes (last axis varies
//! fastest), removes excluded combinations and then applies includes.

use crate::expression::Value;
use serde::{Serialize, Serializer};
use serde_yaml::Mapping;
use std::fmt;

/// One combination of matrix values, in axis declaration order
#[derive(Debug, Clone, Default)]
pub struct MatrixBinding {
    entries: Vec<(String, Value)>,
}

impl MatrixBinding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Set a value, keeping the original position of an existing key
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// True when every entry of `pattern` is present here with an equal value
    pub fn contains_all(&self, pattern: &MatrixBinding) -> bool {
        pattern
            .iter()
            .all(|(key, value)| self.get(key) == Some(value))
    }

    fn same_keys(&self, other: &MatrixBinding) -> bool {
        self.len() == other.len() && other.iter().all(|(key, _)| self.get(key).is_some())
    }
}

/// Bindings are equal when they hold the same key/value pairs in any order
impl PartialEq for MatrixBinding {
    fn eq(&self, other: &Self) -> bool {
        self.same_keys(other) && self.contains_all(other)
    }
}

impl fmt::Display for MatrixBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

impl Serialize for MatrixBinding {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for MatrixBinding {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut binding = MatrixBinding::new();
        for (key, value) in iter {
            binding.set(key, value);
        }
        binding
    }
}

/// How `exclude` entries select combinations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExcludeMatch {
    /// Remove every combination containing all of the entry's key/value pairs
    #[default]
    Partial,
    /// Remove only the combination equal to the entry
    Exact,
}

/// How `include` entries are applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IncludeMode {
    /// Merge into matching combinations, or append when nothing matches
    #[default]
    MergeOrAppend,
    /// Always append as a new combination
    AppendOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExpansionPolicy {
    pub exclude: ExcludeMatch,
    pub include: IncludeMode,
}

/// A parsed `strategy.matrix` block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Matrix {
    pub axes: Vec<(String, Vec<Value>)>,
    pub include: Vec<MatrixBinding>,
    pub exclude: Vec<MatrixBinding>,
}

impl Matrix {
    /// Parse the YAML mapping form; `include` and `exclude` are reserved keys
    pub fn from_yaml(mapping: &Mapping) -> Result<Self, String> {
        let mut matrix = Matrix::default();

        for (key, value) in mapping {
            let name = key
                .as_str()
                .ok_or_else(|| format!("matrix keys must be strings, found {:?}", key))?;
            match name {
                "include" => matrix.include = parse_entries(name, value)?,
                "exclude" => matrix.exclude = parse_entries(name, value)?,
                axis => {
                    if matrix.axes.iter().any(|(existing, _)| existing == axis) {
                        return Err(format!("duplicate axis '{}'", axis));
                    }
                    let values = value
                        .as_sequence()
                        .ok_or_else(|| format!("axis '{}' must be a list", axis))?
                        .iter()
                        .map(|v| scalar(axis, v))
                        .collect::<Result<Vec<_>, _>>()?;
                    matrix.axes.push((axis.to_string(), values));
                }
            }
        }

        Ok(matrix)
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty() && self.include.is_empty()
    }

    fn is_axis(&self, key: &str) -> bool {
        self.axes.iter().any(|(name, _)| name == key)
    }
}

fn parse_entries(name: &str, value: &serde_yaml::Value) -> Result<Vec<MatrixBinding>, String> {
    let entries = value
        .as_sequence()
        .ok_or_else(|| format!("'{}' must be a list of mappings", name))?;
    entries
        .iter()
        .map(|entry| {
            let mapping = entry
                .as_mapping()
                .ok_or_else(|| format!("'{}' entries must be mappings", name))?;
            mapping
                .iter()
                .map(|(k, v)| {
                    let key = k
                        .as_str()
                        .ok_or_else(|| format!("'{}' keys must be strings", name))?;
                    Ok((key.to_string(), scalar(key, v)?))
                })
                .collect::<Result<MatrixBinding, String>>()
        })
        .collect()
}

fn scalar(key: &str, value: &serde_yaml::Value) -> Result<Value, String> {
    Value::from_yaml(value).ok_or_else(|| format!("value for '{}' must be a scalar", key))
}

/// Expand a matrix into its concrete bindings
///
/// The result is deterministic for a given matrix and policy. A matrix with
/// no axes and no includes yields a single empty binding.
pub fn expand(matrix: &Matrix, policy: ExpansionPolicy) -> Vec<MatrixBinding> {
    let mut combinations = if matrix.axes.is_empty() {
        Vec::new()
    } else {
        cartesian_product(&matrix.axes)
    };

    combinations.retain(|combo| {
        !matrix.exclude.iter().any(|pattern| match policy.exclude {
            ExcludeMatch::Partial => combo.contains_all(pattern),
            ExcludeMatch::Exact => combo == pattern,
        })
    });

    let product_len = combinations.len();
    for entry in &matrix.include {
        let merged = match policy.include {
            IncludeMode::MergeOrAppend if !matrix.axes.is_empty() => {
                merge_include(matrix, &mut combinations[..product_len], entry)
            }
            _ => false,
        };
        if !merged {
            combinations.push(entry.clone());
        }
    }

    let mut unique: Vec<MatrixBinding> = Vec::with_capacity(combinations.len());
    for combo in combinations {
        if !unique.contains(&combo) {
            unique.push(combo);
        }
    }

    if unique.is_empty() && matrix.is_empty() {
        unique.push(MatrixBinding::new());
    }
    unique
}

fn cartesian_product(axes: &[(String, Vec<Value>)]) -> Vec<MatrixBinding> {
    let mut combinations = vec![MatrixBinding::new()];
    for (name, values) in axes {
        let mut next = Vec::with_capacity(combinations.len() * values.len());
        for combo in &combinations {
            for value in values {
                let mut extended = combo.clone();
                extended.set(name.clone(), value.clone());
                next.push(extended);
            }
        }
        combinations = next;
    }
    combinations
}

/// Merge `entry` into every combination whose axis values it agrees with
///
/// An entry never overwrites an original axis value; keys outside the axes
/// are added or replaced.
fn merge_include(matrix: &Matrix, combinations: &mut [MatrixBinding], entry: &MatrixBinding) -> bool {
    let mut merged = false;
    for combo in combinations.iter_mut() {
        let compatible = entry
            .iter()
            .filter(|(key, _)| matrix.is_axis(key))
            .all(|(key, value)| combo.get(key) == Some(value));
        if compatible {
            for (key, value) in entry.iter() {
                if !matrix.is_axis(key) {
                    combo.set(key, value.clone());
                }
            }
            merged = true;
        }
    }
    merged
}
