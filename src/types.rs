//! Catalog and configuration types
//!
//! Elements are catalog entries supplied by an external catalog service.
//! Base elements read a field straight out of a sample; derived elements
//! carry a formula over other element codes. The engine never mutates
//! either - catalogs and samples are read-only inputs.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

use crate::aggregate::Statistic;

/// Whether an element's value is read from a sample or computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    /// Value read directly from submitted data
    Base,
    /// Value computed from other elements via a formula
    Derived,
}

/// Declared type of an element's value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Number,
    Date,
    Boolean,
    Array,
    Text,
}

/// One catalog entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    /// Unique code, e.g. "E047" or "D061"
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub kind: ElementKind,
    pub declared_type: DataType,
    /// Field path into a sample record (base elements only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_ref: Option<String>,
    /// Formula over other element codes (derived elements only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregationConfig>,
}

/// Per-element aggregation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationConfig {
    #[serde(default)]
    pub enabled: bool,
    pub method: Statistic,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ScopeFilter>,
}

/// Comparison operator for scope filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeOperator {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    In,
}

/// Predicate restricting which records contribute to an aggregation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeFilter {
    pub field: String,
    pub operator: ScopeOperator,
    pub value: JsonValue,
}

impl ScopeFilter {
    /// Check whether a record passes the filter.
    /// Records missing the field never match.
    pub fn matches(&self, record: &JsonValue) -> bool {
        let field_value = match record.get(&self.field) {
            Some(v) if !v.is_null() => v,
            _ => return false,
        };

        match self.operator {
            ScopeOperator::Eq => field_value == &self.value,
            ScopeOperator::Ne => field_value != &self.value,
            ScopeOperator::In => match &self.value {
                JsonValue::Array(options) => options.contains(field_value),
                _ => false,
            },
            ScopeOperator::Gt | ScopeOperator::Lt | ScopeOperator::Gte | ScopeOperator::Lte => {
                let (Some(a), Some(b)) = (json_number(field_value), json_number(&self.value))
                else {
                    return false;
                };
                match self.operator {
                    ScopeOperator::Gt => a > b,
                    ScopeOperator::Lt => a < b,
                    ScopeOperator::Gte => a >= b,
                    ScopeOperator::Lte => a <= b,
                    _ => unreachable!(),
                }
            }
        }
    }
}

/// Coerce a JSON value to a number, accepting numeric strings
pub(crate) fn json_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// An element catalog, indexed by code
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    elements: HashMap<String, Element>,
    order: Vec<String>,
}

impl Catalog {
    pub fn new(elements: Vec<Element>) -> Self {
        let mut catalog = Catalog::default();
        for element in elements {
            catalog.add(element);
        }
        catalog
    }

    pub fn add(&mut self, element: Element) {
        if !self.elements.contains_key(&element.code) {
            self.order.push(element.code.clone());
        }
        self.elements.insert(element.code.clone(), element);
    }

    pub fn get(&self, code: &str) -> Option<&Element> {
        self.elements.get(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.elements.contains_key(code)
    }

    /// Elements in catalog insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.order.iter().filter_map(|code| self.elements.get(code))
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// A sample's payload may be nested under a "data" key (submission rows)
/// or be the record itself.
pub fn sample_data(record: &JsonValue) -> &JsonValue {
    match record.get("data") {
        Some(data) if data.is_object() => data,
        _ => record,
    }
}
