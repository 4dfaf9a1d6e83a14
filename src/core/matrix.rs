//! Build matrix expansion
//!
//! A matrix is an ordered list of axes plus `exclude` and `include` overlays.
//! Expansion is a pure function with the following laws:
//!
//! 1. The base set is the Cartesian product of the axes in declaration
//!    order; later axes vary fastest.
//! 2. An `exclude` entry removes every base combination whose values equal
//!    all of the entry's pairs. Excludes apply before includes.
//! 3. An `include` overlay *matches* a base combination when every base-axis
//!    key named by the overlay has the same value in the combination. An
//!    overlay naming no base axis matches every base combination.
//! 4. A matching overlay merges its non-axis fields into each match; the
//!    instance count does not change. Axis values are never overwritten.
//! 5. An overlay with no match is appended as a new instance holding
//!    exactly the overlay's fields, adding one instance.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MatrixError {
    #[error("axis '{0}' declares no values")]
    EmptyAxis(String),

    #[error("axis '{0}' is declared more than once")]
    DuplicateAxis(String),

    #[error("matrix declares no axes and no include entries")]
    Empty,
}

/// One point of an expanded matrix: ordered `(name, value)` pairs
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatrixValues(Vec<(String, String)>);

impl MatrixValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut values = Self::new();
        for (k, v) in pairs {
            values.insert(k, v);
        }
        values
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set a value, keeping the position of an existing key
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every pair of `other` is present with the same value
    fn contains_all(&self, other: &MatrixValues) -> bool {
        other.iter().all(|(k, v)| self.get(k) == Some(v))
    }
}

/// A named axis and its ordered values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixAxis {
    pub name: String,
    pub values: Vec<String>,
}

/// Declarative matrix specification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixSpec {
    pub axes: Vec<MatrixAxis>,
    pub include: Vec<MatrixValues>,
    pub exclude: Vec<MatrixValues>,
}

impl MatrixSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_axis<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.axes.push(MatrixAxis {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn with_include(mut self, overlay: MatrixValues) -> Self {
        self.include.push(overlay);
        self
    }

    pub fn with_exclude(mut self, pattern: MatrixValues) -> Self {
        self.exclude.push(pattern);
        self
    }

    /// Check structural well-formedness without expanding
    pub fn validate(&self) -> Result<(), MatrixError> {
        let mut seen = HashSet::new();
        for axis in &self.axes {
            if !seen.insert(axis.name.as_str()) {
                return Err(MatrixError::DuplicateAxis(axis.name.clone()));
            }
            if axis.values.is_empty() {
                return Err(MatrixError::EmptyAxis(axis.name.clone()));
            }
        }
        if self.axes.is_empty() && self.include.is_empty() {
            return Err(MatrixError::Empty);
        }
        Ok(())
    }

    /// Number of base combinations before excludes and includes
    pub fn base_size(&self) -> usize {
        if self.axes.is_empty() {
            return 0;
        }
        self.axes.iter().map(|a| a.values.len()).product()
    }

    /// Expand into the ordered list of instance values
    pub fn expand(&self) -> Result<Vec<MatrixValues>, MatrixError> {
        self.validate()?;

        let mut combos: Vec<MatrixValues> = if self.axes.is_empty() {
            Vec::new()
        } else {
            vec![MatrixValues::new()]
        };

        for axis in &self.axes {
            let mut next = Vec::with_capacity(combos.len() * axis.values.len());
            for combo in &combos {
                for value in &axis.values {
                    let mut extended = combo.clone();
                    extended.insert(axis.name.clone(), value.clone());
                    next.push(extended);
                }
            }
            combos = next;
        }

        combos.retain(|combo| {
            !self
                .exclude
                .iter()
                .any(|pattern| !pattern.is_empty() && combo.contains_all(pattern))
        });

        let axis_names: HashSet<&str> = self.axes.iter().map(|a| a.name.as_str()).collect();
        let base_count = combos.len();

        for overlay in &self.include {
            let axis_pairs = MatrixValues::from_pairs(
                overlay
                    .iter()
                    .filter(|(k, _)| axis_names.contains(k)),
            );

            let matches: Vec<usize> = (0..base_count)
                .filter(|&i| combos[i].contains_all(&axis_pairs))
                .collect();

            if matches.is_empty() {
                combos.push(overlay.clone());
                continue;
            }

            for i in matches {
                for (k, v) in overlay.iter().filter(|(k, _)| !axis_names.contains(k)) {
                    combos[i].insert(k, v);
                }
            }
        }

        Ok(combos)
    }
}
