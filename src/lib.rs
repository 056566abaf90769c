//! Reckon - derived-indicator formula engine
//!
//! This library resolves Excel-style formulas defined over a catalog of
//! reporting elements, evaluating derived elements recursively against raw
//! submission records and aggregating the results across a population.
//!
//! # Features
//!
//! - Excel-style formulas (CEIL, FLOOR, LEN, YEAR, IF, COUNT_IF, SUM_ARRAY, AND, OR)
//! - Recursive derived-element resolution with per-sample memoization
//! - Catalog validation with circular-dependency detection
//! - Population statistics (sum, avg, count, min, max, stddev, cv)
//! - Grouped and scope-filtered aggregation
//!
//! # Example
//!
//! ```no_run
//! use reckon::core::{EvalContext, Resolver};
//! use reckon::types::{Catalog, Element};
//!
//! let elements: Vec<Element> = serde_json::from_str(r#"[]"#)?;
//! let catalog = Catalog::new(elements);
//!
//! let sample = serde_json::json!({"E047": 24});
//! let resolver = Resolver::new(&catalog);
//! let mut ctx = EvalContext::new();
//! let value = resolver.resolve("D061", &sample, &mut ctx);
//! println!("D061 = {}", value);
//! # Ok::<(), reckon::error::ReckonError>(())
//! ```

pub mod aggregate;
pub mod cli;
pub mod core;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use crate::aggregate::{StatValue, Statistic};
pub use crate::core::{EvalContext, Resolver, Value};
pub use crate::error::{ReckonError, ReckonResult};
pub use crate::types::{Catalog, Element, ElementKind};
