//! This module contains the scoped property map carried by each execution
//! state.
//!
//! Properties hold per-path flags and counters that do not belong in the
//! symbolic environment, such as whether assignments currently degrade to
//! taint or how many recirculation passes the path has taken.

use std::collections::BTreeMap;

use crate::{
    error::execution::{Error, Result},
    ir::expr::ExprRef,
};

/// The values a state property can take.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    U64(u64),
    Expression(ExprRef),
}

/// A string-keyed polymorphic map of per-path flags and counters.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Properties {
    entries: BTreeMap<String, PropertyValue>,
}

impl Properties {
    /// Creates an empty property map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the property `key` to `value`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: PropertyValue) {
        self.entries.insert(key.into(), value);
    }

    /// Checks whether the property `key` is present.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Gets the boolean property `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the property is absent or not a boolean.
    pub fn get_bool(&self, key: &str) -> Result<bool> {
        match self.entries.get(key) {
            Some(PropertyValue::Bool(value)) => Ok(*value),
            _ => Err(Error::BadProperty {
                key: key.to_string(),
            }),
        }
    }

    /// Gets the boolean property `key`, treating absence as `false`.
    #[must_use]
    pub fn get_bool_or_false(&self, key: &str) -> bool {
        matches!(self.entries.get(key), Some(PropertyValue::Bool(true)))
    }

    /// Gets the numeric property `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the property is absent or not numeric.
    pub fn get_u64(&self, key: &str) -> Result<u64> {
        match self.entries.get(key) {
            Some(PropertyValue::U64(value)) => Ok(*value),
            _ => Err(Error::BadProperty {
                key: key.to_string(),
            }),
        }
    }

    /// Gets the expression property `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the property is absent or not an expression.
    pub fn get_expression(&self, key: &str) -> Result<ExprRef> {
        match self.entries.get(key) {
            Some(PropertyValue::Expression(value)) => Ok(value.clone()),
            _ => Err(Error::BadProperty {
                key: key.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::state::properties::{Properties, PropertyValue};

    #[test]
    fn typed_getters_reject_mismatched_kinds() {
        let mut properties = Properties::new();
        properties.set("count", PropertyValue::U64(2));

        assert_eq!(properties.get_u64("count").unwrap(), 2);
        assert!(properties.get_bool("count").is_err());
        assert!(properties.get_u64("missing").is_err());
    }

    #[test]
    fn absent_flags_read_as_false() {
        let properties = Properties::new();
        assert!(!properties.get_bool_or_false("inUndefinedState"));
    }
}
