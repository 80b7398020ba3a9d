//! Named bind-variable maps.
//!
//! Every compiled statement carries its binds in a [`BindMap`]: insertion
//! order is preserved (it is the order parameters were compiled in), and
//! duplicate names are rejected so that composed criteria cannot silently
//! shadow each other.

use serde_json::Value;

use crate::error::{BridgeError, Result};
use crate::ora::mapper::SqlType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindDirection {
    In,
    Out,
    InOut,
}

/// One named bind: direction, runtime value and the declared SQL type when
/// the column mapping knows it.
#[derive(Debug, Clone)]
pub struct BoundParam {
    pub direction: BindDirection,
    pub value: Value,
    pub sql_type: Option<SqlType>,
}

impl BoundParam {
    pub fn input(value: Value, sql_type: Option<SqlType>) -> Self {
        Self {
            direction: BindDirection::In,
            value,
            sql_type,
        }
    }

    pub fn output(sql_type: SqlType) -> Self {
        Self {
            direction: BindDirection::Out,
            value: Value::Null,
            sql_type: Some(sql_type),
        }
    }

    pub fn in_out(value: Value, sql_type: Option<SqlType>) -> Self {
        Self {
            direction: BindDirection::InOut,
            value,
            sql_type,
        }
    }
}

/// Ordered map of bind name to parameter.
#[derive(Debug, Clone, Default)]
pub struct BindMap {
    entries: Vec<(String, BoundParam)>,
}

impl BindMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, param: BoundParam) -> Result<()> {
        let name = name.into();
        if self.contains(&name) {
            return Err(BridgeError::DuplicateBind(name));
        }
        self.entries.push((name, param));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn get(&self, name: &str) -> Option<&BoundParam> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, p)| p)
    }

    /// Merge another map into this one; composed criteria must use
    /// distinct prefixes, so a collision here is a caller error.
    pub fn merge(&mut self, other: BindMap) -> Result<()> {
        for (name, param) in other.entries {
            self.insert(name, param)?;
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BoundParam)> {
        self.entries.iter().map(|(n, p)| (n.as_str(), p))
    }

    /// Names of OUT and INOUT binds, in insertion order.
    pub fn out_names(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, p)| matches!(p.direction, BindDirection::Out | BindDirection::InOut))
            .map(|(n, _)| n.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_preserves_order() {
        let mut binds = BindMap::new();
        binds
            .insert("p_b", BoundParam::input(json!(1), None))
            .unwrap();
        binds
            .insert("p_a", BoundParam::input(json!(2), None))
            .unwrap();
        let names: Vec<_> = binds.iter().map(|(n, _)| n.to_string()).collect();
        assert_eq!(names, vec!["p_b", "p_a"]);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut binds = BindMap::new();
        binds
            .insert("p_x", BoundParam::input(json!(1), None))
            .unwrap();
        assert!(matches!(
            binds.insert("p_x", BoundParam::input(json!(2), None)),
            Err(BridgeError::DuplicateBind(_))
        ));
    }

    #[test]
    fn test_out_names() {
        let mut binds = BindMap::new();
        binds
            .insert("p_in", BoundParam::input(json!("v"), None))
            .unwrap();
        binds
            .insert("id", BoundParam::output(SqlType::Number))
            .unwrap();
        binds
            .insert(
                "lookback",
                BoundParam::in_out(json!(30), Some(SqlType::Number)),
            )
            .unwrap();
        assert_eq!(binds.out_names(), vec!["id", "lookback"]);
    }
}
