//! Condition trees over document paths and their compilation into backend
//! condition expressions with `#attrN` name and `:valueN` value placeholders.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, ValidationError};
use crate::types::{KeyPath, PathSegment};

/// Maximum nesting depth for condition expressions.
const MAX_EXPRESSION_DEPTH: usize = 16;

/// A logical condition evaluated by the backend against the stored item.
///
/// Paths are relative to the user document unless compiled with an empty
/// prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CompositeCondition {
    Exists(KeyPath),
    NotExists(KeyPath),

    Eq(KeyPath, Value),
    Ne(KeyPath, Value),
    Lt(KeyPath, Value),
    Le(KeyPath, Value),
    Gt(KeyPath, Value),
    Ge(KeyPath, Value),

    And(Vec<CompositeCondition>),
}

impl CompositeCondition {
    /// `attribute_exists(path)`
    pub fn exists(path: impl Into<KeyPath>) -> Self {
        CompositeCondition::Exists(path.into())
    }

    /// `attribute_not_exists(path)`
    pub fn not_exists(path: impl Into<KeyPath>) -> Self {
        CompositeCondition::NotExists(path.into())
    }

    /// `path = value`
    pub fn eq(path: impl Into<KeyPath>, value: impl Into<Value>) -> Self {
        CompositeCondition::Eq(path.into(), value.into())
    }

    /// `path <> value`
    pub fn ne(path: impl Into<KeyPath>, value: impl Into<Value>) -> Self {
        CompositeCondition::Ne(path.into(), value.into())
    }

    /// `path < value`
    pub fn lt(path: impl Into<KeyPath>, value: impl Into<Value>) -> Self {
        CompositeCondition::Lt(path.into(), value.into())
    }

    /// `path <= value`
    pub fn le(path: impl Into<KeyPath>, value: impl Into<Value>) -> Self {
        CompositeCondition::Le(path.into(), value.into())
    }

    /// `path > value`
    pub fn gt(path: impl Into<KeyPath>, value: impl Into<Value>) -> Self {
        CompositeCondition::Gt(path.into(), value.into())
    }

    /// `path >= value`
    pub fn ge(path: impl Into<KeyPath>, value: impl Into<Value>) -> Self {
        CompositeCondition::Ge(path.into(), value.into())
    }

    /// `cond1 AND cond2 AND ...`
    pub fn and(conditions: Vec<CompositeCondition>) -> Self {
        CompositeCondition::And(conditions)
    }
}

/// A condition expression ready to send to the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompiledCondition {
    pub expression: String,
    /// Name placeholder (`#attr0`) to attribute name.
    pub names: BTreeMap<String, String>,
    /// Value placeholder (`:value0`) to literal value.
    pub values: BTreeMap<String, Value>,
}

/// Compile `condition` into an expression fragment and placeholder maps.
///
/// Every path is prefixed with `prefix` (for example `value`, the envelope
/// attribute holding the user document). Identical attribute names share a
/// placeholder; each literal gets its own.
pub fn compile_condition(
    condition: &CompositeCondition,
    prefix: &KeyPath,
) -> Result<CompiledCondition, Error> {
    let mut compiler = Compiler {
        prefix,
        names: BTreeMap::new(),
        name_placeholders: HashMap::new(),
        values: BTreeMap::new(),
    };
    let expression = compiler.compile(condition, 0)?;
    Ok(CompiledCondition {
        expression,
        names: compiler.names,
        values: compiler.values,
    })
}

struct Compiler<'a> {
    prefix: &'a KeyPath,
    names: BTreeMap<String, String>,
    name_placeholders: HashMap<String, String>,
    values: BTreeMap<String, Value>,
}

impl Compiler<'_> {
    fn compile(&mut self, condition: &CompositeCondition, depth: usize) -> Result<String, Error> {
        if depth > MAX_EXPRESSION_DEPTH {
            return Err(ValidationError::InvalidArgument(format!(
                "condition depth exceeds maximum of {MAX_EXPRESSION_DEPTH}"
            ))
            .into());
        }

        match condition {
            CompositeCondition::Exists(path) => {
                Ok(format!("attribute_exists({})", self.path(path)?))
            }
            CompositeCondition::NotExists(path) => {
                Ok(format!("attribute_not_exists({})", self.path(path)?))
            }
            CompositeCondition::Eq(path, value) => self.comparison(path, "=", value),
            CompositeCondition::Ne(path, value) => self.comparison(path, "<>", value),
            CompositeCondition::Lt(path, value) => self.comparison(path, "<", value),
            CompositeCondition::Le(path, value) => self.comparison(path, "<=", value),
            CompositeCondition::Gt(path, value) => self.comparison(path, ">", value),
            CompositeCondition::Ge(path, value) => self.comparison(path, ">=", value),
            CompositeCondition::And(conditions) => {
                if conditions.is_empty() {
                    return Err(ValidationError::InvalidArgument(
                        "AND condition requires at least one operand".to_string(),
                    )
                    .into());
                }
                let parts = conditions
                    .iter()
                    .map(|c| self.compile(c, depth + 1).map(|e| format!("({e})")))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(parts.join(" AND "))
            }
        }
    }

    fn comparison(&mut self, path: &KeyPath, op: &str, value: &Value) -> Result<String, Error> {
        let path = self.path(path)?;
        let placeholder = format!(":value{}", self.values.len());
        self.values.insert(placeholder.clone(), value.clone());
        Ok(format!("{path} {op} {placeholder}"))
    }

    fn path(&mut self, path: &KeyPath) -> Result<String, Error> {
        let full = path.prefixed(self.prefix);
        if full.is_empty() {
            return Err(ValidationError::InvalidArgument(
                "condition path must not be empty".to_string(),
            )
            .into());
        }

        let mut rendered = String::new();
        for segment in full.segments() {
            match segment {
                PathSegment::Field(name) => {
                    if !rendered.is_empty() {
                        rendered.push('.');
                    }
                    let placeholder = self.name_placeholder(name);
                    rendered.push_str(&placeholder);
                }
                PathSegment::Index(i) => {
                    if rendered.is_empty() {
                        return Err(ValidationError::InvalidArgument(format!(
                            "condition path '{full}' must start with an attribute name"
                        ))
                        .into());
                    }
                    rendered.push_str(&format!("[{i}]"));
                }
            }
        }
        Ok(rendered)
    }

    fn name_placeholder(&mut self, name: &str) -> String {
        if let Some(existing) = self.name_placeholders.get(name) {
            return existing.clone();
        }
        let placeholder = format!("#attr{}", self.names.len());
        self.names.insert(placeholder.clone(), name.to_string());
        self.name_placeholders
            .insert(name.to_string(), placeholder.clone());
        placeholder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn value_prefix() -> KeyPath {
        KeyPath::parse("value")
    }

    #[test]
    fn test_compile_exists_with_prefix() {
        let compiled =
            compile_condition(&CompositeCondition::exists("name"), &value_prefix()).unwrap();
        assert_eq!(compiled.expression, "attribute_exists(#attr0.#attr1)");
        assert_eq!(compiled.names["#attr0"], "value");
        assert_eq!(compiled.names["#attr1"], "name");
        assert!(compiled.values.is_empty());
    }

    #[test]
    fn test_compile_comparison() {
        let compiled = compile_condition(
            &CompositeCondition::ge("stats.count", 10),
            &KeyPath::default(),
        )
        .unwrap();
        assert_eq!(compiled.expression, "#attr0.#attr1 >= :value0");
        assert_eq!(compiled.values[":value0"], json!(10));
    }

    #[test]
    fn test_compile_and_shares_name_placeholders() {
        let condition = CompositeCondition::and(vec![
            CompositeCondition::eq("status", "active"),
            CompositeCondition::ne("status", "deleted"),
            CompositeCondition::not_exists("lockedBy"),
        ]);
        let compiled = compile_condition(&condition, &value_prefix()).unwrap();
        assert_eq!(
            compiled.expression,
            "(#attr0.#attr1 = :value0) AND (#attr0.#attr1 <> :value1) AND (attribute_not_exists(#attr0.#attr2))"
        );
        assert_eq!(compiled.names.len(), 3);
        assert_eq!(compiled.values[":value1"], json!("deleted"));
    }

    #[test]
    fn test_compile_index_segments() {
        let compiled =
            compile_condition(&CompositeCondition::eq("tags.0", "x"), &value_prefix()).unwrap();
        assert_eq!(compiled.expression, "#attr0.#attr1[0] = :value0");
    }

    #[test]
    fn test_compile_is_deterministic() {
        let condition = CompositeCondition::and(vec![
            CompositeCondition::lt("a", 1),
            CompositeCondition::gt("b", 2),
        ]);
        let first = compile_condition(&condition, &value_prefix()).unwrap();
        let second = compile_condition(&condition, &value_prefix()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_compile_rejects_empty_and() {
        let err = compile_condition(&CompositeCondition::and(vec![]), &value_prefix()).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_compile_rejects_empty_path() {
        let err = compile_condition(
            &CompositeCondition::Exists(KeyPath::default()),
            &KeyPath::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_compile_rejects_excessive_depth() {
        let mut condition = CompositeCondition::exists("a");
        for _ in 0..20 {
            condition = CompositeCondition::and(vec![condition]);
        }
        assert!(compile_condition(&condition, &value_prefix()).is_err());
    }
}
