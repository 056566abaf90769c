//! Core evaluation engine: formula AST pipeline and per-sample resolution

pub mod evaluator;
pub mod extract;
pub mod parser;
pub mod tokenizer;

pub use evaluator::Value;

use crate::error::{ReckonError, ReckonResult};
use crate::types::{Catalog, DataType, Element, ElementKind};
use evaluator::Bindings;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Per-sample memoization cache.
///
/// Created fresh before resolving any element for one sample and discarded
/// afterwards. Must never be shared or reused across samples: reuse would
/// leak one respondent's computed values into another's evaluation.
#[derive(Debug, Default)]
pub struct EvalContext {
    resolved: HashMap<String, Value>,
    in_progress: HashSet<String>,
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Already-resolved value for a code, if any
    pub fn get(&self, code: &str) -> Option<&Value> {
        self.resolved.get(code)
    }

    /// Number of cached element values
    pub fn resolved_count(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_resolved(&self, code: &str) -> bool {
        self.resolved.contains_key(code)
    }
}

/// Derived Value Resolver.
///
/// Resolves any element code against one sample: base elements read
/// (type-aware) straight from the sample; derived elements resolve their
/// referenced codes recursively and evaluate their formula AST. Resolution
/// never fails - missing or malformed data yields `Value::Null`.
pub struct Resolver<'a> {
    catalog: &'a Catalog,
}

impl<'a> Resolver<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Resolve one element code for one sample.
    ///
    /// The context memoizes every resolved code, so sibling references to
    /// the same element are computed exactly once per sample.
    pub fn resolve(&self, code: &str, sample: &JsonValue, ctx: &mut EvalContext) -> Value {
        if let Some(value) = ctx.resolved.get(code) {
            return value.clone();
        }

        let Some(element) = self.catalog.get(code) else {
            warn!(code, "element not found in catalog");
            return Value::Null;
        };

        let value = match element.kind {
            ElementKind::Base => self.resolve_base(element, sample),
            ElementKind::Derived => {
                // Reentry means a cyclic catalog; degrade to null rather
                // than recurse forever. validate_catalog rejects these
                // up front.
                if ctx.in_progress.contains(code) {
                    warn!(code, "cyclic element reference, resolving to null");
                    return Value::Null;
                }
                ctx.in_progress.insert(code.to_string());
                let value = self.resolve_derived(element, sample, ctx);
                ctx.in_progress.remove(code);
                value
            }
        };

        ctx.resolved.insert(code.to_string(), value.clone());
        value
    }

    /// Read a base element from the sample, coercing per its declared type
    fn resolve_base(&self, element: &Element, sample: &JsonValue) -> Value {
        let Some(field_ref) = &element.field_ref else {
            warn!(code = %element.code, "base element has no field reference");
            return Value::Null;
        };

        let Some(raw) = sample.get(field_ref) else {
            return Value::Null;
        };

        match element.declared_type {
            DataType::Array => match raw {
                JsonValue::Array(items) => Value::Array(items.clone()),
                _ => Value::Null,
            },
            // Dates and logicals are carried as submitted (e.g. 'yes'/'no'
            // answers compare as text in formulas)
            DataType::Date | DataType::Boolean | DataType::Text => match raw {
                JsonValue::Null => Value::Null,
                JsonValue::String(s) if s.is_empty() => Value::Null,
                other => Value::from_json(other),
            },
            DataType::Number => match raw {
                JsonValue::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
                JsonValue::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|n| n.is_finite())
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            },
        }
    }

    /// Compute a derived element by resolving its references and
    /// evaluating its formula
    fn resolve_derived(&self, element: &Element, sample: &JsonValue, ctx: &mut EvalContext) -> Value {
        let Some(formula) = &element.formula else {
            warn!(code = %element.code, "derived element has no formula");
            return Value::Null;
        };

        let expr = match parser::parse_formula(formula) {
            Ok(expr) => expr,
            Err(e) => {
                warn!(code = %element.code, formula, error = %e, "formula failed to parse");
                return Value::Null;
            }
        };

        let mut vars = Bindings::new();
        for ref_code in extract::formula_variables(formula) {
            let value = self.resolve(&ref_code, sample, ctx);
            vars.insert(ref_code, value);
        }

        if expr.has_extended() {
            // Extended formulas tolerate null references; each function
            // defines its own null handling
            finish_extended(evaluator::evaluate(&expr, &vars))
        } else {
            // Plain arithmetic requires every referenced value
            if vars.values().any(Value::is_null) {
                return Value::Null;
            }
            finish_plain(evaluator::evaluate(&expr, &vars))
        }
    }

    /// Resolve one element across many samples, one fresh context per
    /// sample. Returns one value per sample, in input order.
    pub fn resolve_across(&self, code: &str, samples: &[JsonValue]) -> Vec<Value> {
        samples
            .iter()
            .map(|sample| {
                let mut ctx = EvalContext::new();
                self.resolve(code, crate::types::sample_data(sample), &mut ctx)
            })
            .collect()
    }
}

/// Extended formulas produce a finite number or a boolean; anything else
/// is unknown
fn finish_extended(value: Value) -> Value {
    match value {
        Value::Number(n) if n.is_finite() => Value::Number(n),
        Value::Bool(b) => Value::Bool(b),
        _ => Value::Null,
    }
}

/// Plain formulas produce only a finite number
fn finish_plain(value: Value) -> Value {
    match value {
        Value::Number(n) if n.is_finite() => Value::Number(n),
        _ => Value::Null,
    }
}

/// Validate a catalog before use: derived formulas must parse, base
/// elements must name a field, and the element dependency graph must be
/// acyclic.
pub fn validate_catalog(catalog: &Catalog) -> ReckonResult<()> {
    use petgraph::algo::toposort;
    use petgraph::graph::DiGraph;

    let mut graph = DiGraph::new();
    let mut node_indices = HashMap::new();

    for element in catalog.iter() {
        let idx = graph.add_node(element.code.clone());
        node_indices.insert(element.code.clone(), idx);
    }

    for element in catalog.iter() {
        match element.kind {
            ElementKind::Base => {
                if element.field_ref.is_none() {
                    return Err(ReckonError::Validation(format!(
                        "Base element {} has no field reference",
                        element.code
                    )));
                }
            }
            ElementKind::Derived => {
                let Some(formula) = &element.formula else {
                    return Err(ReckonError::Validation(format!(
                        "Derived element {} has no formula",
                        element.code
                    )));
                };

                parser::parse_formula(formula).map_err(|e| {
                    ReckonError::Parse(format!("Element {}: {}", element.code, e))
                })?;

                for ref_code in extract::formula_variables(formula) {
                    // References to codes outside the catalog resolve to
                    // null at runtime; only in-catalog edges matter here
                    if let (Some(&dep_idx), Some(&elem_idx)) =
                        (node_indices.get(&ref_code), node_indices.get(&element.code))
                    {
                        graph.add_edge(dep_idx, elem_idx, ());
                    }
                }
            }
        }
    }

    toposort(&graph, None).map_err(|cycle| {
        let code = graph
            .node_weight(cycle.node_id())
            .cloned()
            .unwrap_or_default();
        ReckonError::CircularDependency(format!("element dependency cycle involving {}", code))
    })?;

    Ok(())
}
