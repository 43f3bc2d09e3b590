//! Evaluation of document filters, expressions and pipeline stages
//!
//! Covers exactly the operator set the query and aggregation compilers emit.
//! Anything else is rejected as malformed rather than silently ignored.

use super::transport::{Document, TransportError};
use crate::value::{compare_values, values_equal};
use chrono::format::{Item, StrftimeItems};
use chrono::{
    DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, SecondsFormat, TimeZone, Utc,
};
use regex::RegexBuilder;
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::fmt::Write;

type Result<T> = std::result::Result<T, TransportError>;

fn malformed(message: impl Into<String>) -> TransportError {
    TransportError::Malformed(message.into())
}

/// Value at a dotted path; `None` when any segment is missing
pub(crate) fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn clause_list<'a>(operator: &str, value: &'a Value) -> Result<&'a [Value]> {
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| malformed(format!("{operator} expects an array")))
}

fn is_operator_object(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| !map.is_empty() && map.keys().all(|k| k.starts_with('$')))
}

// ============================================================================
// Query-operator filters
// ============================================================================

/// Whether `doc` satisfies a query-operator filter
pub(crate) fn matches_filter(doc: &Document, filter: &Value) -> Result<bool> {
    let clauses = filter
        .as_object()
        .ok_or_else(|| malformed("filter must be an object"))?;

    for (key, condition) in clauses {
        let holds = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clause_list(key, condition)? {
                    if !matches_filter(doc, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in clause_list(key, condition)? {
                    if matches_filter(doc, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for clause in clause_list(key, condition)? {
                    if matches_filter(doc, clause)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            "$expr" => truthy(eval(doc, condition)?.as_ref()),
            op if op.starts_with('$') => {
                return Err(malformed(format!("unsupported filter operator {op}")))
            }
            field => field_matches(lookup(doc, field), condition)?,
        };
        if !holds {
            return Ok(false);
        }
    }
    Ok(true)
}

fn query_equal(value: Option<&Value>, operand: &Value) -> bool {
    if operand.is_null() {
        return value.map_or(true, Value::is_null);
    }
    value.is_some_and(|v| values_equal(v, operand))
}

/// Ordering within one type bracket; values of different types never compare
fn bracket_cmp(value: &Value, operand: &Value) -> Option<Ordering> {
    match (value, operand) {
        (Value::Number(_), Value::Number(_))
        | (Value::String(_), Value::String(_))
        | (Value::Bool(_), Value::Bool(_)) => Some(compare_values(Some(value), Some(operand))),
        _ => None,
    }
}

fn field_matches(value: Option<&Value>, condition: &Value) -> Result<bool> {
    if !is_operator_object(condition) {
        return Ok(query_equal(value, condition));
    }

    let Some(operators) = condition.as_object() else {
        return Ok(false);
    };
    for (op, operand) in operators {
        let holds = match op.as_str() {
            "$eq" => query_equal(value, operand),
            "$ne" => !query_equal(value, operand),
            "$gt" | "$gte" | "$lt" | "$lte" => {
                match value.and_then(|v| bracket_cmp(v, operand)) {
                    Some(ordering) => match op.as_str() {
                        "$gt" => ordering == Ordering::Greater,
                        "$gte" => ordering != Ordering::Less,
                        "$lt" => ordering == Ordering::Less,
                        _ => ordering != Ordering::Greater,
                    },
                    None => false,
                }
            }
            "$exists" => value.is_some() == operand.as_bool().unwrap_or(true),
            "$regex" => {
                let pattern = operand
                    .as_str()
                    .ok_or_else(|| malformed("$regex expects a string"))?;
                let options = operators.get("$options").and_then(Value::as_str).unwrap_or("");
                match value {
                    Some(Value::String(text)) => regex_match(pattern, options, text)?,
                    _ => false,
                }
            }
            "$options" => true,
            other => return Err(malformed(format!("unsupported field operator {other}"))),
        };
        if !holds {
            return Ok(false);
        }
    }
    Ok(true)
}

fn regex_match(pattern: &str, options: &str, text: &str) -> Result<bool> {
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .build()
        .map_err(|e| malformed(format!("invalid regex '{pattern}': {e}")))?;
    Ok(regex.is_match(text))
}

// ============================================================================
// Aggregation expressions
// ============================================================================

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(_) => true,
    }
}

/// Single operand, unwrapping a one-element argument array
fn single(arg: &Value) -> &Value {
    match arg {
        Value::Array(items) if items.len() == 1 => &items[0],
        other => other,
    }
}

fn pair<'a>(op: &str, arg: &'a Value) -> Result<(&'a Value, &'a Value)> {
    match clause_list(op, arg)? {
        [a, b] => Ok((a, b)),
        _ => Err(malformed(format!("{op} expects two arguments"))),
    }
}

/// Evaluate an expression; `None` means the referenced field is missing
pub(crate) fn eval(doc: &Document, expr: &Value) -> Result<Option<Value>> {
    match expr {
        Value::String(s) if s.starts_with('$') => Ok(lookup(doc, &s[1..]).cloned()),
        Value::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval(doc, item)?.unwrap_or(Value::Null));
            }
            Ok(Some(Value::Array(values)))
        }
        Value::Object(map) => {
            if let Some((op, arg)) = map.iter().next().filter(|(op, _)| op.starts_with('$')) {
                if map.len() != 1 {
                    return Err(malformed(format!("{op} must be the only key")));
                }
                return eval_operator(doc, op, arg);
            }
            let mut out = Map::new();
            for (key, value) in map {
                if let Some(value) = eval(doc, value)? {
                    out.insert(key.clone(), value);
                }
            }
            Ok(Some(Value::Object(out)))
        }
        literal => Ok(Some(literal.clone())),
    }
}

fn eval_operator(doc: &Document, op: &str, arg: &Value) -> Result<Option<Value>> {
    let result = match op {
        "$literal" => arg.clone(),
        "$and" => {
            let mut all = true;
            for item in clause_list(op, arg)? {
                if !truthy(eval(doc, item)?.as_ref()) {
                    all = false;
                    break;
                }
            }
            Value::Bool(all)
        }
        "$or" => {
            let mut any = false;
            for item in clause_list(op, arg)? {
                if truthy(eval(doc, item)?.as_ref()) {
                    any = true;
                    break;
                }
            }
            Value::Bool(any)
        }
        "$not" => Value::Bool(!truthy(eval(doc, single(arg))?.as_ref())),
        "$eq" | "$ne" => {
            let (a, b) = pair(op, arg)?;
            let equal = match (eval(doc, a)?, eval(doc, b)?) {
                (None, None) => true,
                (Some(x), Some(y)) => values_equal(&x, &y),
                _ => false,
            };
            Value::Bool(if op == "$eq" { equal } else { !equal })
        }
        "$gt" | "$gte" | "$lt" | "$lte" => {
            let (a, b) = pair(op, arg)?;
            let (x, y) = (eval(doc, a)?, eval(doc, b)?);
            let ordering = compare_values(x.as_ref(), y.as_ref());
            Value::Bool(match op {
                "$gt" => ordering == Ordering::Greater,
                "$gte" => ordering != Ordering::Less,
                "$lt" => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            })
        }
        "$cond" => {
            let (condition, then, otherwise) = match arg {
                Value::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
                Value::Object(spec) => match (spec.get("if"), spec.get("then"), spec.get("else")) {
                    (Some(c), Some(t), Some(e)) => (c, t, e),
                    _ => return Err(malformed("$cond needs if/then/else")),
                },
                _ => return Err(malformed("$cond needs three arguments")),
            };
            return if truthy(eval(doc, condition)?.as_ref()) {
                eval(doc, then)
            } else {
                eval(doc, otherwise)
            };
        }
        "$add" => {
            let mut sum = NumericSum::default();
            for item in clause_list(op, arg)? {
                match eval(doc, item)? {
                    None | Some(Value::Null) => return Ok(Some(Value::Null)),
                    Some(Value::Number(n)) => sum.add(&n),
                    Some(other) => return Err(malformed(format!("$add cannot add {other}"))),
                }
            }
            sum.value()
        }
        "$type" => Value::String(
            match eval(doc, single(arg))? {
                None => "missing",
                Some(Value::Null) => "null",
                Some(Value::Bool(_)) => "bool",
                Some(Value::Number(n)) if n.is_f64() => "double",
                Some(Value::Number(_)) => "long",
                Some(Value::String(_)) => "string",
                Some(Value::Array(_)) => "array",
                Some(Value::Object(_)) => "object",
            }
            .to_string(),
        ),
        "$ifNull" => {
            let (value, replacement) = pair(op, arg)?;
            return match eval(doc, value)? {
                None | Some(Value::Null) => eval(doc, replacement),
                present => Ok(present),
            };
        }
        "$regexMatch" => {
            let spec = arg
                .as_object()
                .ok_or_else(|| malformed("$regexMatch expects an object"))?;
            let input = match spec.get("input") {
                Some(input) => eval(doc, input)?,
                None => None,
            };
            let pattern = spec
                .get("regex")
                .and_then(Value::as_str)
                .ok_or_else(|| malformed("$regexMatch needs a regex"))?;
            let options = spec.get("options").and_then(Value::as_str).unwrap_or("");
            match input {
                Some(Value::String(text)) => Value::Bool(regex_match(pattern, options, &text)?),
                _ => Value::Bool(false),
            }
        }
        "$toString" => match eval(doc, single(arg))? {
            None | Some(Value::Null) => Value::Null,
            Some(Value::String(s)) => Value::String(s),
            Some(Value::Number(n)) => Value::String(n.to_string()),
            Some(Value::Bool(b)) => Value::String(b.to_string()),
            Some(other) => return Err(malformed(format!("$toString cannot convert {other}"))),
        },
        "$toDate" => match eval(doc, single(arg))? {
            None | Some(Value::Null) => Value::Null,
            Some(value) => {
                let date = to_date(&value)
                    .ok_or_else(|| malformed(format!("$toDate cannot convert {value}")))?;
                Value::String(date.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        },
        "$dateToString" => {
            let spec = arg
                .as_object()
                .ok_or_else(|| malformed("$dateToString expects an object"))?;
            let date = match spec.get("date") {
                Some(date) => eval(doc, date)?,
                None => None,
            };
            let Some(date) = date.filter(|d| !d.is_null()) else {
                return Ok(Some(Value::Null));
            };
            let date = to_date(&date).ok_or_else(|| malformed(format!("not a date: {date}")))?;
            let format = spec
                .get("format")
                .and_then(Value::as_str)
                .unwrap_or("%Y-%m-%dT%H:%M:%S%.3fZ");
            let offset = match spec.get("timezone").and_then(Value::as_str) {
                Some(tz) => parse_offset(tz).unwrap_or_else(|| {
                    tracing::debug!("Unsupported timezone '{}', using UTC", tz);
                    utc_offset()
                }),
                None => utc_offset(),
            };
            Value::String(format_date(&date.with_timezone(&offset), format)?)
        }
        other => return Err(malformed(format!("unsupported expression operator {other}"))),
    };
    Ok(Some(result))
}

/// Running numeric sum that stays integral until a float is added
#[derive(Debug, Default)]
struct NumericSum {
    int: i64,
    float: f64,
    is_float: bool,
}

impl NumericSum {
    fn add(&mut self, n: &Number) {
        match n.as_i64() {
            Some(i) if !self.is_float => match self.int.checked_add(i) {
                Some(total) => self.int = total,
                None => {
                    self.is_float = true;
                    self.float = self.int as f64 + i as f64;
                }
            },
            _ => {
                if !self.is_float {
                    self.is_float = true;
                    self.float = self.int as f64;
                }
                self.float += n.as_f64().unwrap_or(0.0);
            }
        }
    }

    fn value(&self) -> Value {
        if self.is_float {
            Number::from_f64(self.float)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        } else {
            Value::from(self.int)
        }
    }
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

/// `UTC`, `Z`, `+02:00`, `-0530`, `+05`
fn parse_offset(tz: &str) -> Option<FixedOffset> {
    match tz {
        "UTC" | "Z" | "GMT" | "Etc/UTC" => return FixedOffset::east_opt(0),
        _ => {}
    }
    let (sign, rest) = match tz.as_bytes().first()? {
        b'+' => (1, &tz[1..]),
        b'-' => (-1, &tz[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
        _ => return None,
    };
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Dates are RFC 3339 text, SQLite-style datetimes, bare dates or epoch millis
fn to_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            if let Ok(date) = DateTime::parse_from_rfc3339(s) {
                return Some(date.with_timezone(&Utc));
            }
            for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                    return Some(Utc.from_utc_datetime(&naive));
                }
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive))
        }
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

fn format_date(date: &DateTime<FixedOffset>, format: &str) -> Result<String> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(malformed(format!("invalid date format '{format}'")));
    }
    let mut out = String::new();
    write!(out, "{}", date.format(format))
        .map_err(|_| malformed(format!("cannot format date with '{format}'")))?;
    Ok(out)
}

// ============================================================================
// Pipeline stages
// ============================================================================

/// Run `stages` over `docs`
pub(crate) fn run_pipeline(mut docs: Vec<Document>, stages: &[Value]) -> Result<Vec<Document>> {
    for stage in stages {
        let (name, spec) = stage
            .as_object()
            .filter(|s| s.len() == 1)
            .and_then(|s| s.iter().next())
            .ok_or_else(|| malformed("stage must be a single-key object"))?;

        docs = match name.as_str() {
            "$match" => {
                let mut kept = Vec::with_capacity(docs.len());
                for doc in docs {
                    if matches_filter(&doc, spec)? {
                        kept.push(doc);
                    }
                }
                kept
            }
            "$group" => group(&docs, spec)?,
            "$sort" => {
                let spec = spec
                    .as_object()
                    .ok_or_else(|| malformed("$sort expects an object"))?;
                sort_documents(&mut docs, spec);
                docs
            }
            "$skip" => docs.into_iter().skip(count_arg(name, spec)?).collect(),
            "$limit" => docs.into_iter().take(count_arg(name, spec)?).collect(),
            "$facet" => {
                let facets = spec
                    .as_object()
                    .ok_or_else(|| malformed("$facet expects an object"))?;
                let mut out = Document::new();
                for (facet, stages) in facets {
                    let stages = clause_list(facet, stages)?;
                    let rows = run_pipeline(docs.clone(), stages)?;
                    out.insert(
                        facet.clone(),
                        Value::Array(rows.into_iter().map(Value::Object).collect()),
                    );
                }
                vec![out]
            }
            other => return Err(malformed(format!("unsupported stage {other}"))),
        };
    }
    Ok(docs)
}

fn count_arg(stage: &str, spec: &Value) -> Result<usize> {
    spec.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| malformed(format!("{stage} expects a non-negative integer")))
}

/// Stable sort by `{path: 1 | -1, ...}`
pub(crate) fn sort_documents(docs: &mut [Document], spec: &Map<String, Value>) {
    docs.sort_by(|a, b| {
        for (path, direction) in spec {
            let ordering = compare_values(lookup(a, path), lookup(b, path));
            let ordering = if direction.as_i64() == Some(-1) {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

enum Accumulator {
    Sum(NumericSum),
    Avg { total: f64, count: u64 },
    Min(Option<Value>),
    Max(Option<Value>),
}

impl Accumulator {
    fn new(op: &str) -> Result<Self> {
        Ok(match op {
            "$sum" => Accumulator::Sum(NumericSum::default()),
            "$avg" => Accumulator::Avg { total: 0.0, count: 0 },
            "$min" => Accumulator::Min(None),
            "$max" => Accumulator::Max(None),
            other => return Err(malformed(format!("unsupported accumulator {other}"))),
        })
    }

    fn push(&mut self, value: Option<Value>) {
        match (self, value) {
            (Accumulator::Sum(sum), Some(Value::Number(n))) => sum.add(&n),
            (Accumulator::Avg { total, count }, Some(Value::Number(n))) => {
                *total += n.as_f64().unwrap_or(0.0);
                *count += 1;
            }
            (Accumulator::Min(current), Some(value)) if !value.is_null() => {
                if current
                    .as_ref()
                    .map_or(true, |c| compare_values(Some(&value), Some(c)) == Ordering::Less)
                {
                    *current = Some(value);
                }
            }
            (Accumulator::Max(current), Some(value)) if !value.is_null() => {
                if current
                    .as_ref()
                    .map_or(true, |c| compare_values(Some(&value), Some(c)) == Ordering::Greater)
                {
                    *current = Some(value);
                }
            }
            _ => {}
        }
    }

    fn finish(self) -> Value {
        match self {
            Accumulator::Sum(sum) => sum.value(),
            Accumulator::Avg { count: 0, .. } => Value::Null,
            Accumulator::Avg { total, count } => Number::from_f64(total / count as f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Accumulator::Min(value) | Accumulator::Max(value) => value.unwrap_or(Value::Null),
        }
    }
}

fn group(docs: &[Document], spec: &Value) -> Result<Vec<Document>> {
    let spec = spec
        .as_object()
        .ok_or_else(|| malformed("$group expects an object"))?;
    let id_expr = spec
        .get("_id")
        .ok_or_else(|| malformed("$group needs an _id"))?;

    let mut fields = Vec::new();
    for (name, accumulator) in spec.iter().filter(|(name, _)| name.as_str() != "_id") {
        let (op, expr) = accumulator
            .as_object()
            .filter(|a| a.len() == 1)
            .and_then(|a| a.iter().next())
            .ok_or_else(|| malformed(format!("accumulator '{name}' must be a single operator")))?;
        // Reject unknown accumulators even when there are no documents
        Accumulator::new(op)?;
        fields.push((name, op.as_str(), expr));
    }

    let mut groups: Vec<(Value, Vec<Accumulator>)> = Vec::new();
    for doc in docs {
        let id = eval(doc, id_expr)?.unwrap_or(Value::Null);
        let index = match groups.iter().position(|(existing, _)| values_equal(existing, &id)) {
            Some(index) => index,
            None => {
                let accumulators = fields
                    .iter()
                    .map(|(_, op, _)| Accumulator::new(op))
                    .collect::<Result<Vec<_>>>()?;
                groups.push((id, accumulators));
                groups.len() - 1
            }
        };
        for ((_, _, expr), accumulator) in fields.iter().zip(groups[index].1.iter_mut()) {
            accumulator.push(eval(doc, expr)?);
        }
    }

    Ok(groups
        .into_iter()
        .map(|(id, accumulators)| {
            let mut out = Document::new();
            out.insert("_id".to_string(), id);
            for ((name, _, _), accumulator) in fields.iter().zip(accumulators) {
                out.insert((*name).clone(), accumulator.finish());
            }
            out
        })
        .collect())
}
