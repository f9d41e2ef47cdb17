//! Listing filters sent by clients.
//!
//! A [`FilterRequest`] is compiled into a store-independent [`Predicate`] plus
//! pagination and sort instructions. Compilation never fails: fields that do
//! not parse fall back to the defaults in [`default_on_parse_failure`] or are
//! skipped (dates). [`sql`] renders the result for a concrete table.

pub mod sql;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Deserializer};

/// Sort field used when the request does not name one.
pub const DEFAULT_SORT_FIELD: &str = "created_at";

/// Day format accepted by `date` fields.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Values substituted when a field cannot be parsed.
pub mod default_on_parse_failure {
    pub const NUMBER: i64 = 0;
    pub const RANGE_MIN: i64 = 0;
    pub const RANGE_MAX: i64 = i64::MAX;
    pub const BOOLEAN: bool = false;
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FilterRequest {
    pub sort: String,
    #[serde(alias = "isAscending")]
    pub is_ascending: bool,
    pub page: i64,
    #[serde(alias = "pageSize")]
    pub page_size: i64,
    pub filters: Vec<Filter>,
}

/// One group of fields joined by `operator`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Filter {
    pub operator: String,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Field {
    pub name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub value: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(alias = "minValue", deserialize_with = "lenient_string")]
    pub min_value: String,
    #[serde(alias = "maxValue", deserialize_with = "lenient_string")]
    pub max_value: String,
}

impl Field {
    pub fn new(name: &str, kind: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            kind: kind.to_string(),
            ..Self::default()
        }
    }

    pub fn range(name: &str, min: &str, max: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: "number_range".to_string(),
            min_value: min.to_string(),
            max_value: max.to_string(),
            ..Self::default()
        }
    }
}

/// Clients send numbers and booleans unquoted as often as quoted.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Date,
    ArrayObject,
    ArrayString,
    Boolean,
    Number,
    NumberRange,
}

impl FieldType {
    /// Unknown tags, including "string" and "default", match as text.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "date" => FieldType::Date,
            "array_object" => FieldType::ArrayObject,
            "array_string" => FieldType::ArrayString,
            "boolean" | "checkbox" => FieldType::Boolean,
            "number" => FieldType::Number,
            "number_range" => FieldType::NumberRange,
            _ => FieldType::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    And,
    Or,
}

impl Operator {
    pub fn from_tag(tag: &str) -> Self {
        if tag.trim().eq_ignore_ascii_case("or") {
            Operator::Or
        } else {
            Operator::And
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Integer(i64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Matches every record.
    All,
    /// Case-insensitive substring match. `needle` is the raw client text.
    Contains { field: String, needle: String },
    Equals { field: String, value: Value },
    /// Inclusive on both ends.
    Between { field: String, min: Value, max: Value },
    InSet { field: String, values: Vec<String> },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    /// Join predicates, collapsing trivial cases. `All` members are dropped.
    pub fn join(operator: Operator, predicates: Vec<Predicate>) -> Predicate {
        let mut predicates: Vec<Predicate> = predicates
            .into_iter()
            .filter(|p| *p != Predicate::All)
            .collect();
        match predicates.len() {
            0 => Predicate::All,
            1 => predicates.remove(0),
            _ => match operator {
                Operator::And => Predicate::And(predicates),
                Operator::Or => Predicate::Or(predicates),
            },
        }
    }

    pub fn and(predicates: Vec<Predicate>) -> Predicate {
        Self::join(Operator::And, predicates)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub predicate: Predicate,
    /// Normalized page number (at least 1).
    pub page: i64,
    pub skip: i64,
    pub limit: i64,
    pub sort: SortSpec,
}

/// Compile a request. Pure; identical for every entity type.
pub fn compile(request: &FilterRequest) -> CompiledQuery {
    let page = request.page.max(1);
    let limit = request.page_size.max(0);
    let skip = (page - 1).saturating_mul(limit);

    let sort = SortSpec {
        field: if request.sort.trim().is_empty() {
            DEFAULT_SORT_FIELD.to_string()
        } else {
            request.sort.trim().to_string()
        },
        ascending: request.is_ascending,
    };

    let groups = request
        .filters
        .iter()
        .map(|group| {
            let operator = Operator::from_tag(&group.operator);
            let atoms = group.fields.iter().filter_map(compile_field).collect();
            Predicate::join(operator, atoms)
        })
        .collect();

    CompiledQuery {
        predicate: Predicate::and(groups),
        page,
        skip,
        limit,
        sort,
    }
}

/// Compile one field. `None` means the field contributes nothing.
pub fn compile_field(field: &Field) -> Option<Predicate> {
    let name = field.name.trim();
    if name.is_empty() {
        return None;
    }
    let name = name.to_string();

    match FieldType::from_tag(&field.kind) {
        FieldType::Text => Some(Predicate::Contains {
            field: name,
            needle: field.value.clone(),
        }),
        FieldType::Date => {
            let (start, end) = day_bounds(&field.value)?;
            Some(Predicate::Between {
                field: name,
                min: Value::Timestamp(start),
                max: Value::Timestamp(end),
            })
        }
        FieldType::ArrayObject => {
            let needles: Vec<Predicate> = split_list(&field.value)
                .into_iter()
                .map(|needle| Predicate::Contains {
                    field: name.clone(),
                    needle,
                })
                .collect();
            if needles.is_empty() {
                return None;
            }
            Some(Predicate::join(Operator::Or, needles))
        }
        FieldType::ArrayString => {
            let values = split_list(&field.value);
            if values.is_empty() {
                return None;
            }
            Some(Predicate::InSet {
                field: name,
                values,
            })
        }
        FieldType::Boolean => Some(Predicate::Equals {
            field: name,
            value: Value::Boolean(parse_bool(&field.value)),
        }),
        FieldType::Number => Some(Predicate::Equals {
            field: name,
            value: Value::Integer(parse_number(
                &field.value,
                default_on_parse_failure::NUMBER,
            )),
        }),
        FieldType::NumberRange => Some(Predicate::Between {
            field: name,
            min: Value::Integer(parse_number(
                &field.min_value,
                default_on_parse_failure::RANGE_MIN,
            )),
            max: Value::Integer(parse_number(
                &field.max_value,
                default_on_parse_failure::RANGE_MAX,
            )),
        }),
    }
}

/// Inclusive UTC bounds of the calendar day named by `value`.
pub fn day_bounds(value: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let day = NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).ok()?;
    let start = day.and_hms_opt(0, 0, 0)?.and_utc();
    let end = start + Duration::days(1) - Duration::nanoseconds(1);
    Some((start, end))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number(value: &str, fallback: i64) -> i64 {
    value.trim().parse().unwrap_or(fallback)
}

fn parse_bool(value: &str) -> bool {
    match value.trim() {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => true,
        "0" | "f" | "F" | "FALSE" | "false" | "False" => false,
        _ => default_on_parse_failure::BOOLEAN,
    }
}
