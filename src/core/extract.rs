//! Variable reference extraction
//!
//! Scans a formula string for the element codes it references. Works on raw
//! text rather than a parsed AST so it never fails: catalog validation needs
//! dependency edges even for formulas that will not parse.

use super::parser::Function;
use regex::Regex;
use std::sync::OnceLock;

///// Identifier pattern: a letter followed by letters, digits, or underscores
fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b[A-Za-z][A-Za-z0-9_]*\b").unwrap())
}

/// Reserved words that are never element references
fn is_reserved(word: &str) -> bool {
    Function::from_name(word).is_some()
        || word.eq_ignore_ascii_case("AND")
        || word.eq_ignore_ascii_case("OR")
        || word.eq_ignore_ascii_case("null")
        || word == "Math"
        || word == "PI"
}

/// Extract the ordered-unique element codes referenced by a formula.
///
/// Quoted string literals are skipped, so field-name arguments like
/// `'music_room_area'` in `COUNT_IF(E065, 'music_room_area', '>=', D063)`
/// are not mistaken for references. Never fails; an empty formula yields
/// an empty list.
pub fn formula_variables(formula: &str) -> Vec<String> {
    let mut variables: Vec<String> = Vec::new();

    for segment in unquoted_segments(formula) {
        for m in identifier_pattern().find_iter(&segment) {
            let identifier = m.as_str();
            if is_reserved(identifier) {
                continue;
            }
            if !variables.iter().any(|v| v == identifier) {
                variables.push(identifier.to_string());
            }
        }
    }

    variables
}

/// Split out the parts of a formula that are not inside string literals
fn unquoted_segments(formula: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in formula.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => {
                if c == '\'' || c == '"' {
                    quote = Some(c);
                    if !current.is_empty() {
                        segments.push(std::mem::take(&mut current));
                    }
                } else {
                    current.push(c);
                }
            }
        }
    }

    if !current.is_empty() {
        segments.push(current);
    }

    segments
}
