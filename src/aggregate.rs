//! Aggregation layer
//!
//! Reduces per-sample scalar values into population statistics (sum, avg,
//! count, extrema, standard deviation, coefficient of variation), with
//! optional scope filtering and grouping. Empty or fully-null inputs
//! aggregate to null - "no data" is distinct from "computed zero".

use crate::core::{EvalContext, Resolver, Value};
use crate::error::{ReckonError, ReckonResult};
use crate::types::{sample_data, Catalog, Element, ElementKind, ScopeFilter};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tracing::warn;

/// Statistic selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    Sum,
    Avg,
    Count,
    Min,
    Max,
    Stddev,
    Cv,
}

impl std::str::FromStr for Statistic {
    type Err = ReckonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Ok(Statistic::Sum),
            "avg" => Ok(Statistic::Avg),
            "count" => Ok(Statistic::Count),
            "min" => Ok(Statistic::Min),
            "max" => Ok(Statistic::Max),
            "stddev" => Ok(Statistic::Stddev),
            "cv" => Ok(Statistic::Cv),
            other => Err(ReckonError::Validation(format!(
                "Unknown statistic: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Statistic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Statistic::Sum => "sum",
            Statistic::Avg => "avg",
            Statistic::Count => "count",
            Statistic::Min => "min",
            Statistic::Max => "max",
            Statistic::Stddev => "stddev",
            Statistic::Cv => "cv",
        };
        write!(f, "{}", name)
    }
}

/// Options modifying statistic behavior
#[derive(Debug, Clone, Copy)]
pub struct StatOptions {
    /// Count null entries too (count statistic only)
    pub count_null: bool,
    /// Population (n) vs sample (n-1) standard deviation
    pub population: bool,
}

impl Default for StatOptions {
    fn default() -> Self {
        Self {
            count_null: false,
            population: true,
        }
    }
}

/// Coefficient-of-variation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CvResult {
    /// stdDev / mean, 4 decimal places; null below 2 valid samples
    pub cv: Option<f64>,
    /// 2 decimal places
    pub mean: Option<f64>,
    /// 2 decimal places
    pub std_dev: Option<f64>,
    pub count: usize,
}

/// One aggregate outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatValue {
    Count(usize),
    Number(Option<f64>),
    Cv(CvResult),
}

/// Numeric entries of a value set; null and non-numeric entries drop out
fn valid_numbers(values: &[Value]) -> Vec<f64> {
    values.iter().filter_map(Value::as_number).collect()
}

/// Sum of valid entries; null when none remain
pub fn sum(values: &[Value]) -> Option<f64> {
    let valid = valid_numbers(values);
    if valid.is_empty() {
        return None;
    }
    Some(valid.iter().sum())
}

/// Mean of valid entries; null when none remain
pub fn avg(values: &[Value]) -> Option<f64> {
    let valid = valid_numbers(values);
    if valid.is_empty() {
        return None;
    }
    Some(valid.iter().sum::<f64>() / valid.len() as f64)
}

/// Count of non-null entries (or all entries with `count_null`)
pub fn count(values: &[Value], count_null: bool) -> usize {
    if count_null {
        return values.len();
    }
    values.iter().filter(|v| !v.is_null()).count()
}

pub fn min(values: &[Value]) -> Option<f64> {
    valid_numbers(values).into_iter().reduce(f64::min)
}

pub fn max(values: &[Value]) -> Option<f64> {
    valid_numbers(values).into_iter().reduce(f64::max)
}

/// Standard deviation; population (n) by default, sample (n-1) otherwise
pub fn stddev(values: &[Value], population: bool) -> Option<f64> {
    let valid = valid_numbers(values);
    if valid.is_empty() || (!population && valid.len() < 2) {
        return None;
    }

    let n = valid.len() as f64;
    let mean = valid.iter().sum::<f64>() / n;
    let sum_sq: f64 = valid.iter().map(|v| (v - mean).powi(2)).sum();
    let divisor = if population { n } else { n - 1.0 };

    Some((sum_sq / divisor).sqrt())
}

/// Coefficient of variation: stdDev / mean.
///
/// A single sample has no meaningful variance, so `cv` is null below 2
/// valid entries while `mean` and `count` are still reported. A zero mean
/// reports `cv` as 0 rather than dividing by zero.
pub fn cv(values: &[Value]) -> CvResult {
    let valid = valid_numbers(values);
    let n = valid.len();
    if n == 0 {
        return CvResult {
            cv: None,
            mean: None,
            std_dev: None,
            count: 0,
        };
    }

    let mean = valid.iter().sum::<f64>() / n as f64;
    if mean == 0.0 {
        return CvResult {
            cv: Some(0.0),
            mean: Some(0.0),
            std_dev: Some(0.0),
            count: n,
        };
    }

    let variance = valid.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    let std_dev = variance.sqrt();

    CvResult {
        cv: (n >= 2).then(|| round_to(std_dev / mean, 4)),
        mean: Some(round_to(mean, 2)),
        std_dev: Some(round_to(std_dev, 2)),
        count: n,
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let multiplier = 10_f64.powi(decimals);
    (value * multiplier).round() / multiplier
}

/// Execute one statistic over a value set
pub fn execute_statistic(stat: Statistic, values: &[Value], opts: StatOptions) -> StatValue {
    match stat {
        Statistic::Sum => StatValue::Number(sum(values)),
        Statistic::Avg => StatValue::Number(avg(values)),
        Statistic::Count => StatValue::Count(count(values, opts.count_null)),
        Statistic::Min => StatValue::Number(min(values)),
        Statistic::Max => StatValue::Number(max(values)),
        Statistic::Stddev => StatValue::Number(stddev(values, opts.population)),
        Statistic::Cv => StatValue::Cv(cv(values)),
    }
}

/// Aggregate result for one group
#[derive(Debug, Clone, Serialize)]
pub struct GroupResult {
    /// Grouping-key values of this partition (absent keys appear as "null")
    pub group_values: BTreeMap<String, String>,
    pub value: StatValue,
    pub count: usize,
}

/// Group key used when no grouping keys are configured
pub const ALL_GROUP: &str = "_all";

/// Aggregate one value field across records, optionally scoped and grouped.
///
/// Partitions are keyed by the concatenation of grouping-key values; a
/// record missing a key partitions under the literal "null" (distinct from
/// the statistic-level exclusion of null values).
pub fn aggregate_by_group(
    records: &[JsonValue],
    value_field: &str,
    stat: Statistic,
    group_by: &[String],
    scope: Option<&ScopeFilter>,
    opts: StatOptions,
) -> BTreeMap<String, GroupResult> {
    let filtered: Vec<&JsonValue> = records
        .iter()
        .filter(|r| scope.map_or(true, |f| f.matches(r)))
        .collect();

    let mut results = BTreeMap::new();

    if group_by.is_empty() {
        let values: Vec<Value> = filtered
            .iter()
            .map(|r| field_value(r, value_field))
            .collect();
        results.insert(
            ALL_GROUP.to_string(),
            GroupResult {
                group_values: BTreeMap::new(),
                value: execute_statistic(stat, &values, opts),
                count: filtered.len(),
            },
        );
        return results;
    }

    let mut partitions: BTreeMap<String, (BTreeMap<String, String>, Vec<Value>)> = BTreeMap::new();

    for record in &filtered {
        let key_parts: Vec<String> = group_by
            .iter()
            .map(|field| match record.get(field) {
                Some(JsonValue::Null) | None => "null".to_string(),
                Some(JsonValue::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            })
            .collect();
        let key = key_parts.join("|");

        let entry = partitions.entry(key).or_insert_with(|| {
            let group_values = group_by.iter().cloned().zip(key_parts.clone()).collect();
            (group_values, Vec::new())
        });
        entry.1.push(field_value(record, value_field));
    }

    for (key, (group_values, values)) in partitions {
        let count = values.len();
        results.insert(
            key,
            GroupResult {
                group_values,
                value: execute_statistic(stat, &values, opts),
                count,
            },
        );
    }

    results
}

fn field_value(record: &JsonValue, field: &str) -> Value {
    record.get(field).map(Value::from_json).unwrap_or(Value::Null)
}

/// Per-sample detail row in an element aggregate
#[derive(Debug, Clone, Serialize)]
pub struct SampleValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_id: Option<String>,
    pub value: f64,
}

/// Aggregate of one element across a submission set
#[derive(Debug, Clone, Serialize)]
pub struct ElementAggregate {
    pub element_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_name: Option<String>,
    pub method: Statistic,
    pub value: StatValue,
    pub sample_count: usize,
    pub samples: Vec<SampleValue>,
}

/// Compute the aggregate of a derived element across submissions.
///
/// Each submission gets its own fresh evaluation context; the element is
/// resolved per sample and the finite numeric results feed the statistic.
pub fn aggregate_derived_element(
    catalog: &Catalog,
    element: &Element,
    submissions: &[JsonValue],
) -> ReckonResult<ElementAggregate> {
    if element.kind != ElementKind::Derived {
        return Err(ReckonError::Validation(format!(
            "Element {} is not derived",
            element.code
        )));
    }
    if element.formula.is_none() {
        return Err(ReckonError::Validation(format!(
            "Derived element {} has no formula",
            element.code
        )));
    }
    let Some(config) = &element.aggregation else {
        return Err(ReckonError::Validation(format!(
            "Element {} has no aggregation config",
            element.code
        )));
    };

    let resolver = Resolver::new(catalog);
    let mut values = Vec::new();
    let mut samples = Vec::new();

    for submission in scoped(submissions, config.scope.as_ref()) {
        let mut ctx = EvalContext::new();
        let value = resolver.resolve(&element.code, sample_data(submission), &mut ctx);

        // Only finite numeric results make a population entry
        if let Some(n) = value.as_number() {
            values.push(Value::Number(n));
            samples.push(SampleValue {
                sample_id: sample_id(submission),
                value: n,
            });
        }
    }

    Ok(ElementAggregate {
        element_code: element.code.clone(),
        element_name: element.name.clone(),
        method: config.method,
        value: execute_statistic(config.method, &values, StatOptions::default()),
        sample_count: values.len(),
        samples,
    })
}

/// Compute the aggregate of a base element (raw field values) across
/// submissions.
pub fn aggregate_base_element(
    element: &Element,
    submissions: &[JsonValue],
) -> ReckonResult<ElementAggregate> {
    let Some(field_ref) = &element.field_ref else {
        return Err(ReckonError::Validation(format!(
            "Base element {} has no field reference",
            element.code
        )));
    };
    let Some(config) = &element.aggregation else {
        return Err(ReckonError::Validation(format!(
            "Element {} has no aggregation config",
            element.code
        )));
    };

    let mut values = Vec::new();
    let mut samples = Vec::new();

    for submission in scoped(submissions, config.scope.as_ref()) {
        let raw = sample_data(submission).get(field_ref);
        let Some(n) = raw.map(Value::from_json).and_then(|v| v.as_number()) else {
            continue;
        };
        values.push(Value::Number(n));
        samples.push(SampleValue {
            sample_id: sample_id(submission),
            value: n,
        });
    }

    Ok(ElementAggregate {
        element_code: element.code.clone(),
        element_name: element.name.clone(),
        method: config.method,
        value: execute_statistic(config.method, &values, StatOptions::default()),
        sample_count: values.len(),
        samples,
    })
}

/// Aggregate every element with an enabled aggregation config.
/// Per-element failures are logged and skipped, never fatal to the batch.
pub fn aggregate_all_elements(catalog: &Catalog, submissions: &[JsonValue]) -> Vec<ElementAggregate> {
    let mut results = Vec::new();

    for element in catalog.iter() {
        let enabled = element
            .aggregation
            .as_ref()
            .map(|c| c.enabled)
            .unwrap_or(false);
        if !enabled {
            continue;
        }

        let result = match element.kind {
            ElementKind::Base => aggregate_base_element(element, submissions),
            ElementKind::Derived => aggregate_derived_element(catalog, element, submissions),
        };

        match result {
            Ok(aggregate) => results.push(aggregate),
            Err(e) => warn!(code = %element.code, error = %e, "element aggregation failed"),
        }
    }

    results
}

fn scoped<'a>(
    submissions: &'a [JsonValue],
    scope: Option<&'a ScopeFilter>,
) -> impl Iterator<Item = &'a JsonValue> {
    submissions
        .iter()
        .filter(move |s| scope.map_or(true, |f| f.matches(s)))
}

/// Submission identifier for detail rows, when the record carries one
fn sample_id(submission: &JsonValue) -> Option<String> {
    for key in ["sample_id", "sampleId", "school_id", "schoolId"] {
        if let Some(JsonValue::String(id)) = submission.get(key) {
            return Some(id.clone());
        }
    }
    None
}
