//! Aggregation layer tests
//!
//! Exercises the statistics, grouping, and scope filtering over both raw
//! record fields and catalog elements resolved per sample.

use pretty_assertions::assert_eq;
use reckon::aggregate::{
    aggregate_all_elements, aggregate_by_group, aggregate_derived_element, cv, StatOptions,
    StatValue, Statistic, ALL_GROUP,
};
use reckon::core::Value;
use reckon::types::{Catalog, Element};
use serde_json::json;

fn catalog_from(json: serde_json::Value) -> Catalog {
    let elements: Vec<Element> = serde_json::from_value(json).unwrap();
    Catalog::new(elements)
}

fn nums(values: &[f64]) -> Vec<Value> {
    values.iter().map(|n| Value::Number(*n)).collect()
}

#[test]
fn test_cv_is_order_independent() {
    let forward = cv(&nums(&[12.0, 15.0, 9.0, 30.0, 21.0]));
    let backward = cv(&nums(&[21.0, 30.0, 9.0, 15.0, 12.0]));
    let shuffled = cv(&nums(&[9.0, 30.0, 12.0, 21.0, 15.0]));
    assert_eq!(forward, backward);
    assert_eq!(forward, shuffled);
}

#[test]
fn test_cv_single_valid_sample() {
    let result = cv(&[Value::Number(42.0), Value::Null]);
    assert_eq!(result.cv, None);
    assert_eq!(result.mean, Some(42.0));
    assert_eq!(result.count, 1);
}

#[test]
fn test_empty_population_aggregates_to_null() {
    let records: Vec<serde_json::Value> = vec![];
    for stat in [Statistic::Sum, Statistic::Avg, Statistic::Min, Statistic::Max, Statistic::Stddev]
    {
        let results =
            aggregate_by_group(&records, "x", stat, &[], None, StatOptions::default());
        assert_eq!(
            results[ALL_GROUP].value,
            StatValue::Number(None),
            "{} over no data",
            stat
        );
    }
}

#[test]
fn test_null_values_aggregate_to_null_not_zero() {
    let records = vec![json!({"x": null}), json!({"other": 1})];
    let results =
        aggregate_by_group(&records, "x", Statistic::Sum, &[], None, StatOptions::default());
    assert_eq!(results[ALL_GROUP].value, StatValue::Number(None));
    // But the records were still seen
    assert_eq!(results[ALL_GROUP].count, 2);
}

#[test]
fn test_grouping_partitions_missing_keys_as_null() {
    let records = vec![
        json!({"province": "Jiangsu", "score": 10}),
        json!({"province": "Jiangsu", "score": 20}),
        json!({"score": 30}),
        json!({"province": null, "score": 40}),
    ];
    let group_by = vec!["province".to_string()];
    let results = aggregate_by_group(
        &records,
        "score",
        Statistic::Sum,
        &group_by,
        None,
        StatOptions::default(),
    );

    assert_eq!(results.len(), 2);
    assert_eq!(results["Jiangsu"].value, StatValue::Number(Some(30.0)));
    assert_eq!(results["null"].value, StatValue::Number(Some(70.0)));
}

#[test]
fn test_grouping_joins_keys_in_order() {
    let records = vec![
        json!({"province": "Jiangsu", "stage": "primary", "score": 1}),
        json!({"province": "Jiangsu", "stage": "middle", "score": 2}),
    ];
    let group_by = vec!["province".to_string(), "stage".to_string()];
    let results = aggregate_by_group(
        &records,
        "score",
        Statistic::Count,
        &group_by,
        None,
        StatOptions::default(),
    );

    assert!(results.contains_key("Jiangsu|primary"));
    assert!(results.contains_key("Jiangsu|middle"));
}

#[test]
fn test_derived_element_aggregation_across_schools() {
    let catalog = catalog_from(json!([
        {"code": "E047", "kind": "base", "declaredType": "number", "fieldRef": "weekly_music_hours"},
        {"code": "D061", "kind": "derived", "declaredType": "number",
         "formula": "CEIL(E047 / 12)",
         "aggregation": {"enabled": true, "method": "avg"}}
    ]));
    let element = catalog.get("D061").unwrap();

    let submissions = vec![
        json!({"school_id": "S1", "weekly_music_hours": 24}),
        json!({"school_id": "S2", "weekly_music_hours": 13}),
        json!({"school_id": "S3", "weekly_music_hours": 12}),
        json!({"school_id": "S4"}),
    ];

    let result = aggregate_derived_element(&catalog, element, &submissions).unwrap();
    // Resolved per school: 2, 2, 1, null; the null drops out
    assert_eq!(result.sample_count, 3);
    assert_eq!(result.value, StatValue::Number(Some(5.0 / 3.0)));
    assert_eq!(result.samples[0].sample_id.as_deref(), Some("S1"));
}

#[test]
fn test_scope_filter_restricts_the_population() {
    let catalog = catalog_from(json!([
        {"code": "E047", "kind": "base", "declaredType": "number", "fieldRef": "weekly_music_hours"},
        {"code": "D061", "kind": "derived", "declaredType": "number",
         "formula": "CEIL(E047 / 12)",
         "aggregation": {
             "enabled": true,
             "method": "sum",
             "scope": {"field": "stage", "operator": "eq", "value": "primary"}
         }}
    ]));
    let element = catalog.get("D061").unwrap();

    let submissions = vec![
        json!({"stage": "primary", "weekly_music_hours": 24}),
        json!({"stage": "middle", "weekly_music_hours": 240}),
        json!({"weekly_music_hours": 240}),
    ];

    let result = aggregate_derived_element(&catalog, element, &submissions).unwrap();
    assert_eq!(result.sample_count, 1);
    assert_eq!(result.value, StatValue::Number(Some(2.0)));
}

#[test]
fn test_scope_filter_in_operator() {
    let catalog = catalog_from(json!([
        {"code": "E047", "kind": "base", "declaredType": "number", "fieldRef": "hours"},
        {"code": "D061", "kind": "derived", "declaredType": "number",
         "formula": "CEIL(E047 / 12)",
         "aggregation": {
             "enabled": true,
             "method": "count",
             "scope": {"field": "stage", "operator": "in", "value": ["primary", "middle"]}
         }}
    ]));
    let element = catalog.get("D061").unwrap();

    let submissions = vec![
        json!({"stage": "primary", "hours": 12}),
        json!({"stage": "middle", "hours": 12}),
        json!({"stage": "high", "hours": 12}),
    ];

    let result = aggregate_derived_element(&catalog, element, &submissions).unwrap();
    assert_eq!(result.value, StatValue::Count(2));
}

#[test]
fn test_aggregate_all_skips_disabled_and_unconfigured_elements() {
    let catalog = catalog_from(json!([
        {"code": "E047", "kind": "base", "declaredType": "number", "fieldRef": "hours",
         "aggregation": {"enabled": true, "method": "sum"}},
        {"code": "E048", "kind": "base", "declaredType": "number", "fieldRef": "teachers",
         "aggregation": {"enabled": false, "method": "sum"}},
        {"code": "D061", "kind": "derived", "declaredType": "number", "formula": "CEIL(E047 / 12)"}
    ]));

    let submissions = vec![
        json!({"hours": 10, "teachers": 1}),
        json!({"hours": 14, "teachers": 2}),
    ];

    let results = aggregate_all_elements(&catalog, &submissions);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].element_code, "E047");
    assert_eq!(results[0].value, StatValue::Number(Some(24.0)));
}

#[test]
fn test_cv_aggregation_of_derived_element() {
    let catalog = catalog_from(json!([
        {"code": "E047", "kind": "base", "declaredType": "number", "fieldRef": "hours"},
        {"code": "D061", "kind": "derived", "declaredType": "number",
         "formula": "E047 * 1",
         "aggregation": {"enabled": true, "method": "cv"}}
    ]));
    let element = catalog.get("D061").unwrap();

    // Values 2,4,4,4,5,5,7,9: mean 5, population stddev 2, cv 0.4
    let submissions: Vec<_> = [2, 4, 4, 4, 5, 5, 7, 9]
        .iter()
        .map(|n| json!({"hours": n}))
        .collect();

    let result = aggregate_derived_element(&catalog, element, &submissions).unwrap();
    match result.value {
        StatValue::Cv(ref r) => {
            assert_eq!(r.cv, Some(0.4));
            assert_eq!(r.mean, Some(5.0));
            assert_eq!(r.std_dev, Some(2.0));
            assert_eq!(r.count, 8);
        }
        ref other => panic!("expected cv result, got {:?}", other),
    }
}

#[test]
fn test_scope_filter_numeric_comparisons() {
    use reckon::types::{ScopeFilter, ScopeOperator};

    let filter = ScopeFilter {
        field: "student_count".to_string(),
        operator: ScopeOperator::Gte,
        value: json!(100),
    };
    assert!(filter.matches(&json!({"student_count": 150})));
    assert!(filter.matches(&json!({"student_count": 100})));
    assert!(!filter.matches(&json!({"student_count": 99})));
    // Missing field never matches
    assert!(!filter.matches(&json!({})));
}
