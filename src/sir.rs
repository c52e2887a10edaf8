//! Structured Intermediate Representation (SIR).
//!
//! The SIR is the tagged-record form translation LLMs emit. Each record maps
//! to exactly one clause string. Symbol discipline: predicates and constants
//! are lowercase snake_case; variables are ALL_CAPS or start with an
//! underscore and pass through untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A predicate applied to arguments, used in rule heads and bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SirLiteral {
    pub predicate: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// An attribute value: symbolic or numeric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SirValue {
    Number(f64),
    Symbol(String),
}

/// One tagged SIR record. Stray extra fields in LLM output are tolerated;
/// missing or mistyped required fields are not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SirRecord {
    Membership {
        instance: String,
        class: String,
    },
    Relation {
        predicate: String,
        subject: String,
        object: String,
    },
    Attribute {
        predicate: String,
        entity: String,
        value: SirValue,
    },
    Composition {
        entity: String,
        components: Vec<String>,
    },
    Definition {
        common: String,
        symbol: String,
    },
    Rule {
        head: SirLiteral,
        body: Vec<SirLiteral>,
    },
}

/// Whether a symbol is written as a logic variable.
fn is_variable(symbol: &str) -> bool {
    let mut chars = symbol.chars();
    match chars.next() {
        Some('_') => true,
        Some(c) if c.is_ascii_uppercase() => symbol
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'),
        _ => false,
    }
}

/// Normalize a predicate or constant to lowercase snake_case.
fn normalize_symbol(symbol: &str, role: &str) -> Result<String> {
    let trimmed = symbol.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidSirStructure(format!("empty {role}")));
    }
    if is_variable(trimmed) {
        return Ok(trimmed.to_string());
    }

    let mut out = String::with_capacity(trimmed.len());
    let mut last_underscore = false;
    for c in trimmed.chars() {
        let mapped = match c {
            c if c.is_ascii_alphanumeric() => Some(c.to_ascii_lowercase()),
            ' ' | '-' | '_' => Some('_'),
            _ => None,
        };
        match mapped {
            Some('_') => {
                if !out.is_empty() && !last_underscore {
                    out.push('_');
                    last_underscore = true;
                }
            }
            Some(c) => {
                out.push(c);
                last_underscore = false;
            }
            None => {}
        }
    }
    let out = out.trim_end_matches('_').to_string();

    if !out.chars().next().map_or(false, |c| c.is_ascii_lowercase()) {
        return Err(Error::InvalidSirStructure(format!(
            "{role} `{symbol}` does not normalize to a valid symbol"
        )));
    }
    Ok(out)
}

/// Predicates may not be variables.
fn normalize_predicate(symbol: &str) -> Result<String> {
    if is_variable(symbol.trim()) {
        return Err(Error::InvalidSirStructure(format!(
            "predicate `{symbol}` must not be a variable"
        )));
    }
    normalize_symbol(symbol, "predicate")
}

fn render_value(value: &SirValue) -> Result<String> {
    match value {
        SirValue::Number(n) => {
            if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                Ok(format!("{}", *n as i64))
            } else {
                Ok(format!("{n}"))
            }
        }
        SirValue::Symbol(s) => normalize_symbol(s, "value"),
    }
}

fn render_literal(literal: &SirLiteral) -> Result<String> {
    let predicate = normalize_predicate(&literal.predicate)?;
    if literal.args.is_empty() {
        return Ok(predicate);
    }
    let args: Vec<String> = literal
        .args
        .iter()
        .map(|a| normalize_symbol(a, "argument"))
        .collect::<Result<_>>()?;
    Ok(format!("{predicate}({})", args.join(", ")))
}

impl SirRecord {
    /// Render this record as one period-terminated clause string.
    pub fn to_clause(&self) -> Result<String> {
        match self {
            Self::Membership { instance, class } => {
                let class = normalize_predicate(class)?;
                let instance = normalize_symbol(instance, "instance")?;
                Ok(format!("{class}({instance})."))
            }
            Self::Relation {
                predicate,
                subject,
                object,
            } => {
                let predicate = normalize_predicate(predicate)?;
                let subject = normalize_symbol(subject, "subject")?;
                let object = normalize_symbol(object, "object")?;
                Ok(format!("{predicate}({subject}, {object})."))
            }
            Self::Attribute {
                predicate,
                entity,
                value,
            } => {
                let predicate = normalize_predicate(predicate)?;
                let entity = normalize_symbol(entity, "entity")?;
                let value = render_value(value)?;
                Ok(format!("{predicate}({entity}, {value})."))
            }
            Self::Composition { entity, components } => {
                if components.is_empty() {
                    return Err(Error::InvalidSirStructure(
                        "composition requires at least one component".to_string(),
                    ));
                }
                let entity = normalize_symbol(entity, "entity")?;
                let components: Vec<String> = components
                    .iter()
                    .map(|c| normalize_symbol(c, "component"))
                    .collect::<Result<_>>()?;
                Ok(format!("composed_of({entity}, [{}]).", components.join(", ")))
            }
            Self::Definition { common, symbol } => {
                let symbol = normalize_symbol(symbol, "symbol")?;
                let common = normalize_symbol(common, "common name")?;
                Ok(format!("defined_as({symbol}, {common})."))
            }
            Self::Rule { head, body } => {
                let head = render_literal(head)?;
                if body.is_empty() {
                    // a rule with no conditions is just a fact
                    return Ok(format!("{head}."));
                }
                let body: Vec<String> = body.iter().map(render_literal).collect::<Result<_>>()?;
                Ok(format!("{head} :- {}.", body.join(", ")))
            }
        }
    }
}

/// Decode a JSON value (an array of tagged records) and render each record.
pub fn records_to_clauses(value: &Value) -> Result<Vec<String>> {
    let items = value.as_array().ok_or_else(|| {
        Error::InvalidSirStructure(format!(
            "expected an array of SIR records, got {}",
            type_name(value)
        ))
    })?;

    let mut clauses = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let record: SirRecord = serde_json::from_value(item.clone()).map_err(|e| {
            Error::InvalidSirStructure(format!("record {index}: {e}"))
        })?;
        clauses.push(record.to_clause()?);
    }
    Ok(clauses)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
