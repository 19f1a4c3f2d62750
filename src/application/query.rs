use serde::Serialize;
use serde_json::Value;

use crate::application::errors::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn parse(raw: &str) -> Result<Self, ServiceError> {
        match raw.trim() {
            "1" | "asc" => Ok(SortOrder::Asc),
            "-1" | "desc" => Ok(SortOrder::Desc),
            other => Err(ServiceError::bad_request(format!(
                "Invalid sort order '{other}', expected 1 or -1"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq { field: String, value: String },
    In { field: String, values: Vec<String> },
}

impl Filter {
    pub fn field(&self) -> &str {
        match self {
            Filter::Eq { field, .. } | Filter::In { field, .. } => field,
        }
    }

    /// Every value the filter accepts.
    pub fn values(&self) -> Vec<String> {
        match self {
            Filter::Eq { value, .. } => vec![value.clone()],
            Filter::In { values, .. } => values.clone(),
        }
    }
}

/// Service query: pagination/sort/select controls plus field filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub limit: Option<usize>,
    pub skip: usize,
    pub sort: Vec<(String, SortOrder)>,
    pub select: Vec<String>,
    pub filters: Vec<Filter>,
}

impl Query {
    /// Parses flat query-string pairs, e.g. `$limit=5&$sort[email]=-1&hobbies[$in]=a,b`.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, ServiceError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut query = Query::default();
        for (key, value) in pairs {
            match key.as_str() {
                "$limit" => query.limit = Some(parse_count("$limit", &value)?),
                "$skip" => query.skip = parse_count("$skip", &value)?,
                "$select" | "$select[]" => query
                    .select
                    .extend(split_list(&value).into_iter().map(str::to_string)),
                _ => {
                    if let Some(field) = bracketed(&key, "$sort") {
                        query.sort.push((field.to_string(), SortOrder::parse(&value)?));
                    } else if let Some((field, op)) = field_operator(&key) {
                        match op {
                            "$in" => push_in(&mut query.filters, field, split_list(&value)),
                            other => {
                                return Err(ServiceError::bad_request(format!(
                                    "Invalid query operator '{other}'"
                                )));
                            }
                        }
                    } else if key.starts_with('$') {
                        return Err(ServiceError::bad_request(format!(
                            "Invalid query parameter '{key}'"
                        )));
                    } else {
                        query.filters.push(Filter::Eq {
                            field: key,
                            value,
                        });
                    }
                }
            }
        }
        Ok(query)
    }

    /// Parses a JSON query object as sent over the socket transport.
    pub fn from_json(value: &Value) -> Result<Self, ServiceError> {
        let obj = match value {
            Value::Null => return Ok(Query::default()),
            Value::Object(obj) => obj,
            _ => return Err(ServiceError::bad_request("Query must be an object")),
        };
        let mut query = Query::default();
        for (key, value) in obj {
            match key.as_str() {
                "$limit" => query.limit = Some(json_count("$limit", value)?),
                "$skip" => query.skip = json_count("$skip", value)?,
                "$select" => {
                    let fields = value
                        .as_array()
                        .ok_or_else(|| ServiceError::bad_request("$select must be an array"))?;
                    query
                        .select
                        .extend(fields.iter().filter_map(scalar_string));
                }
                "$sort" => {
                    let fields = value
                        .as_object()
                        .ok_or_else(|| ServiceError::bad_request("$sort must be an object"))?;
                    for (field, order) in fields {
                        let raw = scalar_string(order).unwrap_or_default();
                        query.sort.push((field.clone(), SortOrder::parse(&raw)?));
                    }
                }
                k if k.starts_with('$') => {
                    return Err(ServiceError::bad_request(format!(
                        "Invalid query parameter '{k}'"
                    )));
                }
                field => match value {
                    Value::Object(ops) => {
                        for (op, operand) in ops {
                            if op != "$in" {
                                return Err(ServiceError::bad_request(format!(
                                    "Invalid query operator '{op}'"
                                )));
                            }
                            let values = operand
                                .as_array()
                                .ok_or_else(|| ServiceError::bad_request("$in must be an array"))?
                                .iter()
                                .filter_map(scalar_string)
                                .collect::<Vec<_>>();
                            query.filters.push(Filter::In {
                                field: field.to_string(),
                                values,
                            });
                        }
                    }
                    other => {
                        let value = scalar_string(other).ok_or_else(|| {
                            ServiceError::bad_request(format!("Invalid value for '{field}'"))
                        })?;
                        query.filters.push(Filter::Eq {
                            field: field.to_string(),
                            value,
                        });
                    }
                },
            }
        }
        Ok(query)
    }

    pub fn has_filters(&self) -> bool {
        !self.filters.is_empty()
    }
}

/// Default and maximum page sizes for `find`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paginate {
    pub default: usize,
    pub max: usize,
}

impl Paginate {
    pub fn limit(&self, query: &Query) -> usize {
        query.limit.map(|l| l.min(self.max)).unwrap_or(self.default)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub total: u64,
    pub limit: usize,
    pub skip: usize,
    pub data: Vec<T>,
}

fn parse_count(name: &str, raw: &str) -> Result<usize, ServiceError> {
    raw.trim()
        .parse()
        .map_err(|_| ServiceError::bad_request(format!("{name} must be a non-negative integer")))
}

fn json_count(name: &str, value: &Value) -> Result<usize, ServiceError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| ServiceError::bad_request(format!("{name} must be a non-negative integer"))),
        Value::String(s) => parse_count(name, s),
        _ => Err(ServiceError::bad_request(format!(
            "{name} must be a non-negative integer"
        ))),
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn split_list(raw: &str) -> Vec<&str> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn push_in(filters: &mut Vec<Filter>, field: &str, values: Vec<&str>) {
    let values = values.into_iter().map(str::to_string);
    if let Some(Filter::In { values: existing, .. }) = filters
        .iter_mut()
        .find(|f| matches!(f, Filter::In { field: f_name, .. } if f_name == field))
    {
        existing.extend(values);
        return;
    }
    filters.push(Filter::In {
        field: field.to_string(),
        values: values.collect(),
    });
}

/// `prefix[inner]` -> `inner`
fn bracketed<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    key.strip_prefix(prefix)?
        .strip_prefix('[')?
        .strip_suffix(']')
}

/// `field[$op]` or `field[$op][]` -> (`field`, `$op`)
fn field_operator(key: &str) -> Option<(&str, &str)> {
    let open = key.find("[$")?;
    let field = &key[..open];
    if field.is_empty() || field.starts_with('$') {
        return None;
    }
    let rest = &key[open + 1..];
    let rest = rest.strip_suffix("[]").unwrap_or(rest);
    let op = rest.strip_suffix(']')?;
    Some((field, op))
}
