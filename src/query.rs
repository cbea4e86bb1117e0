//! Query engine: property filters, multi-field sort, pagination.
//!
//! Array-valued properties match by containment: an exact clause matches if
//! any element equals the wanted value, a pattern clause if any element
//! matches the pattern, and a containment clause if every wanted value is
//! present.

use std::cmp::Ordering;

use serde_json::Value;

use crate::object::StoreObject;

/// A single property constraint.
#[derive(Debug, Clone)]
pub enum Match {
    /// Exact equality (containment for array-valued properties).
    Eq(Value),
    /// Wildcard pattern with `*` (any run) and `?` (any single character).
    Pattern { pattern: String, ignore_case: bool },
    /// Every listed value must be present in an array-valued property.
    Contains(Vec<Value>),
}

/// Conjunction of property constraints. An empty query matches everything.
#[derive(Debug, Clone, Default)]
pub struct Query {
    clauses: Vec<(String, Match)>,
}

impl Query {
    pub fn new() -> Self {
        Query::default()
    }

    pub fn eq(mut self, property: &str, value: impl Into<Value>) -> Self {
        self.clauses.push((property.to_owned(), Match::Eq(value.into())));
        self
    }

    pub fn pattern(mut self, property: &str, pattern: &str) -> Self {
        self.clauses.push((
            property.to_owned(),
            Match::Pattern { pattern: pattern.to_owned(), ignore_case: false },
        ));
        self
    }

    pub fn pattern_ci(mut self, property: &str, pattern: &str) -> Self {
        self.clauses.push((
            property.to_owned(),
            Match::Pattern { pattern: pattern.to_owned(), ignore_case: true },
        ));
        self
    }

    pub fn contains(mut self, property: &str, values: Vec<Value>) -> Self {
        self.clauses.push((property.to_owned(), Match::Contains(values)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// True if the object satisfies every clause. A missing property never
    /// matches.
    pub fn matches(&self, object: &StoreObject) -> bool {
        self.clauses.iter().all(|(property, constraint)| {
            let value = match object.get(property) {
                Some(v) => v,
                None => return false,
            };
            match constraint {
                Match::Eq(wanted) => match value {
                    Value::Array(elements) => elements.iter().any(|e| e == wanted),
                    other => other == wanted,
                },
                Match::Pattern { pattern, ignore_case } => match value {
                    Value::Array(elements) => elements
                        .iter()
                        .filter_map(Value::as_str)
                        .any(|s| wildcard_match(pattern, s, *ignore_case)),
                    Value::String(s) => wildcard_match(pattern, s, *ignore_case),
                    _ => false,
                },
                Match::Contains(wanted) => match value {
                    Value::Array(elements) => wanted.iter().all(|w| elements.contains(w)),
                    other => wanted.len() == 1 && other == &wanted[0],
                },
            }
        })
    }
}

/// Wildcard matcher with iterative backtracking over `*`.
fn wildcard_match(pattern: &str, text: &str, ignore_case: bool) -> bool {
    let (pattern, text) = if ignore_case {
        (pattern.to_lowercase(), text.to_lowercase())
    } else {
        (pattern.to_owned(), text.to_owned())
    };
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// One sort key.
#[derive(Debug, Clone)]
pub struct SortSpec {
    pub attribute: String,
    pub descending: bool,
    pub ignore_case: bool,
}

impl SortSpec {
    pub fn ascending(attribute: &str) -> Self {
        SortSpec { attribute: attribute.to_owned(), descending: false, ignore_case: false }
    }

    pub fn descending(attribute: &str) -> Self {
        SortSpec { attribute: attribute.to_owned(), descending: true, ignore_case: false }
    }

    pub fn ignore_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }
}

/// Sort and pagination applied to a result set.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub sort: Vec<SortSpec>,
    pub start: usize,
    pub count: Option<usize>,
}

/// Apply sort keys then the start/count window.
pub fn apply_options(mut results: Vec<StoreObject>, options: &QueryOptions) -> Vec<StoreObject> {
    if !options.sort.is_empty() {
        results.sort_by(|a, b| {
            for spec in &options.sort {
                let ord = compare_values(
                    a.get(&spec.attribute),
                    b.get(&spec.attribute),
                    spec.ignore_case,
                );
                let ord = if spec.descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }
    results
        .into_iter()
        .skip(options.start)
        .take(options.count.unwrap_or(usize::MAX))
        .collect()
}

/// Total order over JSON values for sorting. Missing values sort first,
/// then by type rank, then within type.
fn compare_values(a: Option<&Value>, b: Option<&Value>, ignore_case: bool) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => {
            let rank = |v: &Value| match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Number(_) => 2,
                Value::String(_) => 3,
                Value::Array(_) => 4,
                Value::Object(_) => 5,
            };
            match rank(a).cmp(&rank(b)) {
                Ordering::Equal => match (a, b) {
                    (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
                    (Value::Number(x), Value::Number(y)) => {
                        let x = x.as_f64().unwrap_or(f64::NAN);
                        let y = y.as_f64().unwrap_or(f64::NAN);
                        x.partial_cmp(&y).unwrap_or(Ordering::Equal)
                    }
                    (Value::String(x), Value::String(y)) => {
                        if ignore_case {
                            x.to_lowercase().cmp(&y.to_lowercase())
                        } else {
                            x.cmp(y)
                        }
                    }
                    _ => Ordering::Equal,
                },
                other => other,
            }
        }
    }
}
