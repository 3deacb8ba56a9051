//! Operator interpreter for rule conditions.
//!
//! Operators are matched case-insensitively. Missing or uncoercible operands
//! make the positive form of an operator fail rather than error; unknown
//! operators are reported as unsupported (`None`) so the whole evaluation can
//! short-circuit.
use std::cmp::Ordering;

use chrono::{DateTime, Local, NaiveDate, TimeZone};
use regex::Regex;
use serde_json::Value;

use crate::hashing::sha256_hex_prefix;
use crate::spec_store::SpecStore;

/// Strings at or above this length are not fed to the regex engine, and user
/// agents above it are not parsed.
pub(crate) const MAX_PARSED_VALUE_LEN: usize = 1000;

/// Apply `operator` to `(value, target)`. Returns `None` for operators this
/// library does not know.
pub(crate) fn apply_operator(
    operator: &str,
    value: &Value,
    target: &Value,
    store: &SpecStore,
) -> Option<bool> {
    let result = match operator.to_lowercase().as_str() {
        "gt" => compare_numbers(value, target, |a, b| a > b),
        "gte" => compare_numbers(value, target, |a, b| a >= b),
        "lt" => compare_numbers(value, target, |a, b| a < b),
        "lte" => compare_numbers(value, target, |a, b| a <= b),

        "version_gt" => compare_versions(value, target, |ord| ord == Ordering::Greater),
        "version_gte" => compare_versions(value, target, |ord| ord != Ordering::Less),
        "version_lt" => compare_versions(value, target, |ord| ord == Ordering::Less),
        "version_lte" => compare_versions(value, target, |ord| ord != Ordering::Greater),
        "version_eq" => compare_versions(value, target, |ord| ord == Ordering::Equal),
        "version_neq" => compare_versions(value, target, |ord| ord != Ordering::Equal),

        "any" => array_any(target, value, true),
        "none" => !array_any(target, value, true),
        "any_case_sensitive" => array_any(target, value, false),
        "none_case_sensitive" => !array_any(target, value, false),

        "str_starts_with_any" => string_compare(value, target, |v, t| v.starts_with(t)),
        "str_ends_with_any" => string_compare(value, target, |v, t| v.ends_with(t)),
        "str_contains_any" => string_compare(value, target, |v, t| v.contains(t)),
        "str_contains_none" => !string_compare(value, target, |v, t| v.contains(t)),
        "str_matches" => regex_match(value, target),

        "eq" => loose_eq(value, target),
        "neq" => !loose_eq(value, target),

        "before" => compare_times(value, target, |a, b| a < b),
        "after" => compare_times(value, target, |a, b| a > b),
        "on" => same_local_day(value, target),

        "in_segment_list" => segment_contains(store, value, target),
        "not_in_segment_list" => !segment_contains(store, value, target),

        "array_contains_any" => array_intersects(value, target),
        "array_contains_none" => value.is_array() && !array_intersects(value, target),
        "array_contains_all" => array_contains_all(value, target),
        "not_array_contains_all" => value.is_array() && !array_contains_all(value, target),

        _ => return None,
    };
    Some(result)
}

/// Coerce a JSON value to a number the way loose clients do: numbers as-is,
/// numeric strings parsed, booleans as 0/1.
pub(crate) fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Stringify a JSON value the way loose clients do. Integral floats render
/// without a trailing `.0`. `Null` has no string form.
pub(crate) fn string_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Some(i.to_string());
            }
            if let Some(u) = n.as_u64() {
                return Some(u.to_string());
            }
            let f = n.as_f64()?;
            if f.is_finite() && f.fract() == 0.0 && f.abs() < 9e15 {
                return Some((f as i64).to_string());
            }
            Some(n.to_string())
        }
        other => serde_json::to_string(other).ok(),
    }
}

fn compare_numbers(value: &Value, target: &Value, check: impl Fn(f64, f64) -> bool) -> bool {
    match (number_of(value), number_of(target)) {
        (Some(a), Some(b)) => check(a, b),
        _ => false,
    }
}

/// Parse a version string: strip any `-suffix`, split on `.`, every part
/// must be an integer.
fn parse_version(value: &Value) -> Option<Vec<i64>> {
    let s = string_of(value)?;
    let core = s.split('-').next()?;
    if core.is_empty() {
        return None;
    }
    core.split('.')
        .map(|part| part.trim().parse::<i64>().ok())
        .collect()
}

fn compare_versions(value: &Value, target: &Value, check: impl Fn(Ordering) -> bool) -> bool {
    let (Some(mut a), Some(mut b)) = (parse_version(value), parse_version(target)) else {
        return false;
    };
    // Pad the short side with zeros, so 1.2 == 1.2.0.
    let len = a.len().max(b.len());
    a.resize(len, 0);
    b.resize(len, 0);
    check(a.cmp(&b))
}

/// Whether `value` matches any entry of the `target` array, compared as
/// strings.
fn array_any(target: &Value, value: &Value, ignore_case: bool) -> bool {
    let Value::Array(entries) = target else {
        return false;
    };
    let Some(v) = string_of(value) else {
        return false;
    };
    entries.iter().any(|entry| match string_of(entry) {
        Some(e) if ignore_case => v.to_lowercase() == e.to_lowercase(),
        Some(e) => v == e,
        None => false,
    })
}

/// Case-insensitive string check of `value` against every entry of the
/// `target` array.
fn string_compare(value: &Value, target: &Value, check: impl Fn(&str, &str) -> bool) -> bool {
    let Some(v) = string_of(value) else {
        return false;
    };
    let Value::Array(entries) = target else {
        return false;
    };
    let v = v.to_lowercase();
    entries
        .iter()
        .any(|entry| string_of(entry).is_some_and(|e| check(&v, &e.to_lowercase())))
}

fn regex_match(value: &Value, target: &Value) -> bool {
    let Some(v) = string_of(value) else {
        return false;
    };
    if v.len() >= MAX_PARSED_VALUE_LEN {
        return false;
    }
    let Some(pattern) = target.as_str() else {
        return false;
    };
    match Regex::new(pattern) {
        Ok(regex) => regex.is_match(&v),
        Err(_) => false,
    }
}

/// Loose equality: string<->number coerces, booleans compare to 0/1, and two
/// nulls are equal.
fn loose_eq(value: &Value, target: &Value) -> bool {
    match (value, target) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        _ => match (number_of(value), number_of(target)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

/// Epoch milliseconds of a date-ish value: an ISO-8601 string, a `Y-m-d`
/// date, or a (possibly stringified) epoch-millis number.
fn epoch_ms(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => Some(n.as_f64()? as i64),
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.timestamp_millis());
            }
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis());
            }
            s.trim().parse::<f64>().ok().map(|f| f as i64)
        }
        _ => None,
    }
}

fn compare_times(value: &Value, target: &Value, check: impl Fn(i64, i64) -> bool) -> bool {
    match (epoch_ms(value), epoch_ms(target)) {
        (Some(a), Some(b)) => check(a, b),
        _ => false,
    }
}

/// Whether both sides fall on the same local calendar day.
fn same_local_day(value: &Value, target: &Value) -> bool {
    let (Some(a), Some(b)) = (epoch_ms(value), epoch_ms(target)) else {
        return false;
    };
    let (Some(a), Some(b)) = (
        Local.timestamp_millis_opt(a).single(),
        Local.timestamp_millis_opt(b).single(),
    ) else {
        return false;
    };
    a.date_naive() == b.date_naive()
}

fn segment_contains(store: &SpecStore, value: &Value, target: &Value) -> bool {
    let Some(v) = string_of(value) else {
        return false;
    };
    let Some(list_name) = target.as_str() else {
        return false;
    };
    store.id_list_contains(list_name, &sha256_hex_prefix(&v))
}

fn array_intersects(value: &Value, target: &Value) -> bool {
    let (Value::Array(values), Value::Array(targets)) = (value, target) else {
        return false;
    };
    targets
        .iter()
        .any(|t| values.iter().any(|v| loose_eq(v, t)))
}

fn array_contains_all(value: &Value, target: &Value) -> bool {
    let (Value::Array(values), Value::Array(targets)) = (value, target) else {
        return false;
    };
    targets
        .iter()
        .all(|t| values.iter().any(|v| loose_eq(v, t)))
}
