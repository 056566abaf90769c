use crate::aggregate::{
    aggregate_all_elements, aggregate_base_element, aggregate_by_group, aggregate_derived_element,
    StatOptions, StatValue, Statistic,
};
use crate::core::{validate_catalog, EvalContext, Resolver, Value};
use crate::error::{ReckonError, ReckonResult};
use crate::types::{sample_data, Catalog, Element, ElementKind};
use colored::Colorize;
use serde_json::Value as JsonValue;
use std::fs;
use std::path::{Path, PathBuf};

/// Format a number for display, removing unnecessary decimal places
fn format_number(n: f64) -> String {
    let rounded = (n * 1e6).round() / 1e6;
    format!("{:.6}", rounded)
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

fn format_stat(value: &StatValue) -> String {
    match value {
        StatValue::Count(n) => n.to_string(),
        StatValue::Number(Some(n)) => format_number(*n),
        StatValue::Number(None) => "null".to_string(),
        StatValue::Cv(cv) => match (cv.cv, cv.mean, cv.std_dev) {
            (Some(c), Some(m), Some(s)) => format!(
                "cv={} (mean={}, stdDev={}, n={})",
                format_number(c),
                format_number(m),
                format_number(s),
                cv.count
            ),
            (None, Some(m), _) => format!("cv=null (mean={}, n={})", format_number(m), cv.count),
            _ => "cv=null (no data)".to_string(),
        },
    }
}

/// Load an element catalog from a JSON file (an array of element definitions)
pub fn load_catalog(path: &Path) -> ReckonResult<Catalog> {
    let content = fs::read_to_string(path)?;
    let elements: Vec<Element> = serde_json::from_str(&content)?;
    Ok(Catalog::new(elements))
}

/// Load submission records from a JSON file (an array of objects)
pub fn load_samples(path: &Path) -> ReckonResult<Vec<JsonValue>> {
    let content = fs::read_to_string(path)?;
    let parsed: JsonValue = serde_json::from_str(&content)?;

    match parsed {
        JsonValue::Array(samples) => Ok(samples),
        _ => Err(ReckonError::Validation(format!(
            "{}: expected a JSON array of submission records",
            path.display()
        ))),
    }
}

/// Execute the resolve command - evaluate elements against each sample
pub fn resolve(
    catalog_path: PathBuf,
    samples_path: PathBuf,
    codes: Vec<String>,
    json: bool,
    verbose: bool,
) -> ReckonResult<()> {
    let catalog = load_catalog(&catalog_path)?;
    let samples = load_samples(&samples_path)?;

    // Resolve every element when none were named
    let codes: Vec<String> = if codes.is_empty() {
        catalog.iter().map(|e| e.code.clone()).collect()
    } else {
        codes
    };

    for code in &codes {
        if !catalog.contains(code) {
            return Err(ReckonError::Validation(format!(
                "Unknown element code: {}",
                code
            )));
        }
    }

    if json {
        let resolver = Resolver::new(&catalog);
        let mut rows = Vec::new();
        for sample in &samples {
            let mut ctx = EvalContext::new();
            let mut row = serde_json::Map::new();
            for code in &codes {
                let value = resolver.resolve(code, sample_data(sample), &mut ctx);
                row.insert(code.clone(), value.to_json());
            }
            rows.push(JsonValue::Object(row));
        }
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("{}", "🧮 Reckon - Resolving elements".bold().green());
    println!("   Catalog: {}", catalog_path.display());
    println!("   Samples: {}", samples_path.display());
    println!("   Elements: {}\n", codes.join(", ").bright_blue());

    let resolver = Resolver::new(&catalog);
    for (i, sample) in samples.iter().enumerate() {
        println!("   📄 Sample {}:", (i + 1).to_string().bright_blue().bold());
        let mut ctx = EvalContext::new();
        for code in &codes {
            let value = resolver.resolve(code, sample_data(sample), &mut ctx);
            let shown = match &value {
                Value::Null => "null".yellow().to_string(),
                Value::Number(n) => format_number(*n).bold().to_string(),
                other => format!("{}", other).bold().to_string(),
            };
            if verbose {
                let element = catalog.get(code).ok_or_else(|| {
                    ReckonError::Validation(format!("Unknown element code: {}", code))
                })?;
                let detail = element
                    .formula
                    .as_deref()
                    .or(element.field_ref.as_deref())
                    .unwrap_or("-");
                println!("      {} = {}  ({})", code.cyan(), shown, detail.dimmed());
            } else {
                println!("      {} = {}", code.cyan(), shown);
            }
        }
        println!();
    }

    println!("{}", "✅ Resolution complete".bold().green());
    Ok(())
}

/// Execute the aggregate command - statistics across the submission set
#[allow(clippy::too_many_arguments)]
pub fn aggregate(
    catalog_path: PathBuf,
    samples_path: PathBuf,
    element: Option<String>,
    field: Option<String>,
    stat: Option<Statistic>,
    group_by: Vec<String>,
    json: bool,
    verbose: bool,
) -> ReckonResult<()> {
    let samples = load_samples(&samples_path)?;

    // Raw-field mode: aggregate a record field directly, no catalog element
    if let Some(field) = field {
        let stat = stat.ok_or_else(|| {
            ReckonError::Validation("--stat is required when aggregating by --field".to_string())
        })?;
        return aggregate_field(&samples, &field, stat, &group_by, json);
    }

    let catalog = load_catalog(&catalog_path)?;
    validate_catalog(&catalog)?;

    let results = match element {
        Some(code) => {
            let element = catalog.get(&code).ok_or_else(|| {
                ReckonError::Validation(format!("Unknown element code: {}", code))
            })?;
            let aggregate = match element.kind {
                ElementKind::Base => aggregate_base_element(element, &samples)?,
                ElementKind::Derived => aggregate_derived_element(&catalog, element, &samples)?,
            };
            vec![aggregate]
        }
        None => aggregate_all_elements(&catalog, &samples),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    println!("{}", "📊 Reckon - Aggregating elements".bold().green());
    println!("   Catalog: {}", catalog_path.display());
    println!(
        "   Samples: {} ({} records)\n",
        samples_path.display(),
        samples.len()
    );

    if results.is_empty() {
        println!("{}", "   No elements with aggregation enabled".yellow());
    }

    for result in &results {
        let label = match &result.element_name {
            Some(name) => format!("{} ({})", result.element_code, name),
            None => result.element_code.clone(),
        };
        println!(
            "   {} [{}] = {}",
            label.bright_blue().bold(),
            result.method.to_string().cyan(),
            format_stat(&result.value).bold()
        );
        if verbose {
            println!("      valid samples: {}", result.sample_count);
            for sample in &result.samples {
                let id = sample.sample_id.as_deref().unwrap_or("-");
                println!("      {} {}", id.dimmed(), format_number(sample.value));
            }
        }
    }

    println!();
    println!("{}", "✅ Aggregation complete".bold().green());
    Ok(())
}

fn aggregate_field(
    samples: &[JsonValue],
    field: &str,
    stat: Statistic,
    group_by: &[String],
    json: bool,
) -> ReckonResult<()> {
    let results = aggregate_by_group(samples, field, stat, group_by, None, StatOptions::default());

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    println!("{}", "📊 Reckon - Aggregating field".bold().green());
    println!("   Field: {} [{}]\n", field.bright_blue().bold(), stat);

    for (key, group) in &results {
        println!(
            "   {} = {}  ({} records)",
            key.cyan(),
            format_stat(&group.value).bold(),
            group.count
        );
    }

    println!();
    println!("{}", "✅ Aggregation complete".bold().green());
    Ok(())
}

/// Execute the check command - validate a catalog without resolving
pub fn check(catalog_path: PathBuf, verbose: bool) -> ReckonResult<()> {
    println!("{}", "🔍 Reckon - Checking catalog".bold().green());
    println!("   Catalog: {}\n", catalog_path.display());

    let catalog = load_catalog(&catalog_path)?;

    if verbose {
        let derived = catalog
            .iter()
            .filter(|e| e.kind == ElementKind::Derived)
            .count();
        println!(
            "   {} elements ({} derived, {} base)",
            catalog.len(),
            derived,
            catalog.len() - derived
        );
    }

    match validate_catalog(&catalog) {
        Ok(()) => {
            println!("{}", "✅ Catalog is valid".bold().green());
            Ok(())
        }
        Err(e) => {
            println!("{} {}", "❌".red(), e.to_string().red());
            Err(e)
        }
    }
}
