use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelParametersError {
    #[error("Unknown symbol '{0}': define it before assigning a value")]
    UnknownSymbol(String),

    #[error("Symbol '{0}' is already defined")]
    DuplicateSymbol(String),
}

/// Symbol -> value map for everything that can appear in matrix elements
/// besides the Mandelstam variables.
///
/// Symbols must be defined before any matrix element referencing them is
/// parsed. The revision counter increases only on genuine value changes,
/// so repeated assignment of the same value is observable as a no-op.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelParameters {
    values: BTreeMap<String, f64>,
    revision: u64,
}

impl ModelParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: impl Into<String>, value: f64) -> Result<(), ModelParametersError> {
        let name = name.into();
        if self.values.contains_key(&name) {
            return Err(ModelParametersError::DuplicateSymbol(name));
        }
        self.values.insert(name, value);
        self.revision += 1;
        Ok(())
    }

    /// Assign a new value to a previously defined symbol. Returns whether
    /// the stored value actually changed.
    pub fn set(&mut self, name: &str, value: f64) -> Result<bool, ModelParametersError> {
        match self.values.get_mut(name) {
            None => Err(ModelParametersError::UnknownSymbol(name.to_string())),
            Some(stored) => {
                if *stored == value {
                    Ok(false)
                } else {
                    *stored = value;
                    self.revision += 1;
                    Ok(true)
                }
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Symbols and values in deterministic (lexicographic) order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
