use std::cmp::Ordering;

use serde::Deserialize;
use serde_json::Value;

use crate::errors::{AppError, AppResult};

// Task listings cap the page size when the client does not ask for one;
// user listings are unbounded.
pub const DEFAULT_TASK_LIMIT: usize = 100;

/// Raw string-valued query parameters, exactly as they appear in the URL.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(rename = "where")]
    pub where_: Option<String>,
    pub sort: Option<String>,
    pub select: Option<String>,
    pub skip: Option<String>,
    pub limit: Option<String>,
    pub count: Option<String>,
}

/// A validated filter/sort/projection/pagination bundle ready to run
/// against a batch of documents.
#[derive(Debug)]
pub struct QueryOptions {
    pub filter: Filter,
    pub sort: Vec<(String, SortOrder)>,
    pub select: Option<Projection>,
    pub skip: usize,
    pub limit: Option<usize>,
    pub count: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl QueryOptions {
    /// Translates raw parameters, failing with a Bad Request that names the
    /// first parameter that does not parse.
    pub fn parse(params: &ListParams, default_limit: Option<usize>) -> AppResult<Self> {
        let filter = match &params.where_ {
            Some(raw) => parse_json(raw)
                .and_then(Filter::from_value)
                .ok_or_else(|| AppError::BadRequest("Invalid where parameter".into()))?,
            None => Filter::default(),
        };

        let sort = match &params.sort {
            Some(raw) => parse_json(raw)
                .and_then(parse_sort)
                .ok_or_else(|| AppError::BadRequest("Invalid sort parameter".into()))?,
            None => Vec::new(),
        };

        let select = match &params.select {
            Some(raw) => Some(
                parse_json(raw)
                    .and_then(Projection::from_value)
                    .ok_or_else(|| AppError::BadRequest("Invalid select parameter".into()))?,
            ),
            None => None,
        };

        let skip = match &params.skip {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| AppError::BadRequest("Invalid skip parameter".into()))?,
            None => 0,
        };

        let limit = match &params.limit {
            Some(raw) => Some(
                raw.parse::<usize>()
                    .map_err(|_| AppError::BadRequest("Invalid limit parameter".into()))?,
            ),
            None => default_limit,
        };

        let count = params.count.as_deref() == Some("true");

        Ok(QueryOptions { filter, sort, select, skip, limit, count })
    }

    /// Runs the full pipeline: filter, sort, skip, limit, project.
    pub fn run(&self, mut docs: Vec<Value>) -> Vec<Value> {
        docs.retain(|doc| self.filter.matches(doc));

        if !self.sort.is_empty() {
            docs.sort_by(|a, b| self.compare_docs(a, b));
        }

        let iter = docs.into_iter().skip(self.skip);
        let page: Vec<Value> = match self.limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        };

        match &self.select {
            Some(projection) => page.iter().map(|doc| projection.apply(doc)).collect(),
            None => page,
        }
    }

    /// Scalar count of filter matches; sort/select/skip/limit do not apply.
    pub fn count_matches(&self, docs: &[Value]) -> usize {
        docs.iter().filter(|doc| self.filter.matches(doc)).count()
    }

    /// Applies only the projection, for single-document reads.
    pub fn project(&self, doc: &Value) -> Value {
        match &self.select {
            Some(projection) => projection.apply(doc),
            None => doc.clone(),
        }
    }

    fn compare_docs(&self, a: &Value, b: &Value) -> Ordering {
        for (field, order) in &self.sort {
            let left = a.get(field).unwrap_or(&Value::Null);
            let right = b.get(field).unwrap_or(&Value::Null);
            let ordering = match order {
                SortOrder::Asc => sort_compare(left, right),
                SortOrder::Desc => sort_compare(right, left),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

fn parse_json(raw: &str) -> Option<Value> {
    serde_json::from_str(raw).ok()
}

fn parse_sort(value: Value) -> Option<Vec<(String, SortOrder)>> {
    let object = match value {
        Value::Object(object) => object,
        _ => return None,
    };
    let mut keys = Vec::with_capacity(object.len());
    for (field, direction) in object {
        let order = match direction.as_i64() {
            Some(1) => SortOrder::Asc,
            Some(-1) => SortOrder::Desc,
            _ => return None,
        };
        keys.push((field, order));
    }
    Some(keys)
}

/// A conjunction of per-field conditions parsed from the `where` parameter.
#[derive(Debug, Default)]
pub struct Filter {
    clauses: Vec<Clause>,
}

#[derive(Debug)]
struct Clause {
    field: String,
    op: Op,
}

#[derive(Debug)]
enum Op {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
}

impl Filter {
    /// `{field: literal}` is equality; `{field: {"$op": operand}}` supports
    /// comparison and set-membership operators. Anything else fails.
    pub fn from_value(value: Value) -> Option<Self> {
        let object = match value {
            Value::Object(object) => object,
            _ => return None,
        };

        let mut clauses = Vec::new();
        for (field, condition) in object {
            match condition {
                Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                    if !ops.keys().all(|k| k.starts_with('$')) {
                        return None;
                    }
                    for (operator, operand) in ops {
                        clauses.push(Clause {
                            field: field.clone(),
                            op: Op::parse(&operator, operand)?,
                        });
                    }
                }
                literal => clauses.push(Clause { field, op: Op::Eq(literal) }),
            }
        }
        Some(Filter { clauses })
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.clauses.iter().all(|clause| clause.matches(doc))
    }
}

impl Op {
    fn parse(operator: &str, operand: Value) -> Option<Self> {
        let op = match operator {
            "$eq" => Op::Eq(operand),
            "$ne" => Op::Ne(operand),
            "$gt" => Op::Gt(operand),
            "$gte" => Op::Gte(operand),
            "$lt" => Op::Lt(operand),
            "$lte" => Op::Lte(operand),
            "$in" => Op::In(as_array(operand)?),
            "$nin" => Op::Nin(as_array(operand)?),
            _ => return None,
        };
        Some(op)
    }
}

fn as_array(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        _ => None,
    }
}

impl Clause {
    fn matches(&self, doc: &Value) -> bool {
        // Missing fields compare as null, like the store's filter dialect.
        let actual = doc.get(&self.field).unwrap_or(&Value::Null);
        match &self.op {
            Op::Eq(expected) => actual == expected,
            Op::Ne(expected) => actual != expected,
            Op::Gt(expected) => partial_compare(actual, expected) == Some(Ordering::Greater),
            Op::Gte(expected) => matches!(
                partial_compare(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Op::Lt(expected) => partial_compare(actual, expected) == Some(Ordering::Less),
            Op::Lte(expected) => matches!(
                partial_compare(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Op::In(set) => set.iter().any(|v| v == actual),
            Op::Nin(set) => !set.iter().any(|v| v == actual),
        }
    }
}

// Ordered comparisons only hold within one JSON type.
fn partial_compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

// Sorting needs a total order, so cross-type pairs fall back to a type rank.
fn sort_compare(a: &Value, b: &Value) -> Ordering {
    partial_compare(a, b).unwrap_or_else(|| type_rank(a).cmp(&type_rank(b)))
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Field projection parsed from the `select` parameter. Include and exclude
/// modes cannot be mixed, except for suppressing `_id` alongside includes.
#[derive(Debug)]
pub enum Projection {
    Include { fields: Vec<String>, id: bool },
    Exclude { fields: Vec<String> },
}

impl Projection {
    pub fn from_value(value: Value) -> Option<Self> {
        let object = match value {
            Value::Object(object) => object,
            _ => return None,
        };

        let mut include = Vec::new();
        let mut exclude = Vec::new();
        for (field, flag) in object {
            let included = match &flag {
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64()? != 0.0,
                _ => return None,
            };
            if included {
                include.push(field);
            } else {
                exclude.push(field);
            }
        }

        if include.is_empty() {
            return Some(Projection::Exclude { fields: exclude });
        }
        // In include mode the only excludable field is _id.
        if exclude.iter().any(|f| f != "_id") {
            return None;
        }
        let id = !exclude.iter().any(|f| f == "_id");
        Some(Projection::Include { fields: include, id })
    }

    pub fn apply(&self, doc: &Value) -> Value {
        let object = match doc.as_object() {
            Some(object) => object,
            None => return doc.clone(),
        };

        let kept = object.iter().filter(|(key, _)| match self {
            Projection::Include { fields, id } => {
                (*key == "_id" && *id) || fields.iter().any(|f| f == *key)
            }
            Projection::Exclude { fields } => !fields.iter().any(|f| f == *key),
        });

        Value::Object(kept.map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(
        where_: Option<&str>,
        sort: Option<&str>,
        select: Option<&str>,
    ) -> ListParams {
        ListParams {
            where_: where_.map(String::from),
            sort: sort.map(String::from),
            select: select.map(String::from),
            ..ListParams::default()
        }
    }

    fn docs() -> Vec<Value> {
        vec![
            json!({"_id": "t1", "name": "alpha", "completed": false, "priority": 3}),
            json!({"_id": "t2", "name": "bravo", "completed": true, "priority": 1}),
            json!({"_id": "t3", "name": "charlie", "completed": false, "priority": 2}),
        ]
    }

    #[test]
    fn test_equality_filter() {
        let options =
            QueryOptions::parse(&params(Some(r#"{"completed":false}"#), None, None), None)
                .unwrap();
        let result = options.run(docs());
        assert_eq!(result.len(), 2);
        assert!(result.iter().all(|d| d["completed"] == json!(false)));
    }

    #[test]
    fn test_comparison_and_membership_operators() {
        let filter = Filter::from_value(json!({"priority": {"$gt": 1, "$lte": 3}})).unwrap();
        assert!(filter.matches(&json!({"priority": 2})));
        assert!(filter.matches(&json!({"priority": 3})));
        assert!(!filter.matches(&json!({"priority": 1})));

        let filter = Filter::from_value(json!({"name": {"$in": ["alpha", "bravo"]}})).unwrap();
        assert!(filter.matches(&json!({"name": "alpha"})));
        assert!(!filter.matches(&json!({"name": "charlie"})));

        let filter = Filter::from_value(json!({"name": {"$nin": ["alpha"]}})).unwrap();
        assert!(!filter.matches(&json!({"name": "alpha"})));
        assert!(filter.matches(&json!({"name": "delta"})));
    }

    #[test]
    fn test_missing_fields_compare_as_null() {
        let filter = Filter::from_value(json!({"assignedUser": null})).unwrap();
        assert!(filter.matches(&json!({"name": "x"})));

        let filter = Filter::from_value(json!({"priority": {"$gt": 0}})).unwrap();
        assert!(!filter.matches(&json!({"name": "x"})));
    }

    #[test]
    fn test_filter_rejects_bad_grammar() {
        assert!(Filter::from_value(json!(["not", "an", "object"])).is_none());
        assert!(Filter::from_value(json!({"priority": {"$between": [1, 2]}})).is_none());
        assert!(Filter::from_value(json!({"priority": {"$gt": 1, "raw": 2}})).is_none());
        assert!(Filter::from_value(json!({"name": {"$in": "alpha"}})).is_none());
    }

    #[test]
    fn test_parse_failure_names_the_parameter() {
        let err = QueryOptions::parse(&params(Some("{oops"), None, None), None).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref m) if m == "Invalid where parameter"));

        let err =
            QueryOptions::parse(&params(None, Some(r#"{"name": "up"}"#), None), None).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref m) if m == "Invalid sort parameter"));

        let err = QueryOptions::parse(&params(None, None, Some("[1]")), None).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref m) if m == "Invalid select parameter"));

        let bad_skip = ListParams { skip: Some("-3".into()), ..ListParams::default() };
        let err = QueryOptions::parse(&bad_skip, None).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref m) if m == "Invalid skip parameter"));

        let bad_limit = ListParams { limit: Some("ten".into()), ..ListParams::default() };
        let err = QueryOptions::parse(&bad_limit, None).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref m) if m == "Invalid limit parameter"));
    }

    #[test]
    fn test_sort_directions_and_tie_breaks() {
        let options = QueryOptions::parse(
            &params(None, Some(r#"{"completed": 1, "priority": -1}"#), None),
            None,
        )
        .unwrap();
        let result = options.run(docs());
        let ids: Vec<_> = result.iter().map(|d| d["_id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["t1", "t3", "t2"]);
    }

    #[test]
    fn test_skip_and_limit_window() {
        let sorted = params(None, Some(r#"{"priority": 1}"#), None);
        let mut options = QueryOptions::parse(&sorted, None).unwrap();
        options.skip = 1;
        options.limit = Some(1);
        let result = options.run(docs());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0]["_id"], "t3");
    }

    #[test]
    fn test_default_limit_applies_only_when_absent() {
        let defaulted =
            QueryOptions::parse(&ListParams::default(), Some(DEFAULT_TASK_LIMIT)).unwrap();
        assert_eq!(defaulted.limit, Some(DEFAULT_TASK_LIMIT));

        let unbounded = QueryOptions::parse(&ListParams::default(), None).unwrap();
        assert_eq!(unbounded.limit, None);

        let explicit = ListParams { limit: Some("7".into()), ..ListParams::default() };
        let overridden = QueryOptions::parse(&explicit, Some(DEFAULT_TASK_LIMIT)).unwrap();
        assert_eq!(overridden.limit, Some(7));
    }

    #[test]
    fn test_count_ignores_sort_and_pagination() {
        let raw = ListParams {
            where_: Some(r#"{"completed": false}"#.into()),
            sort: Some(r#"{"priority": -1}"#.into()),
            limit: Some("1".into()),
            count: Some("true".into()),
            ..ListParams::default()
        };
        let options = QueryOptions::parse(&raw, Some(DEFAULT_TASK_LIMIT)).unwrap();
        assert!(options.count);
        assert_eq!(options.count_matches(&docs()), 2);

        // Only the literal string "true" turns the flag on.
        let off = ListParams { count: Some("1".into()), ..ListParams::default() };
        assert!(!QueryOptions::parse(&off, None).unwrap().count);
    }

    #[test]
    fn test_projection_include_keeps_id_by_default() {
        let projection = Projection::from_value(json!({"name": 1})).unwrap();
        let projected = projection.apply(&docs()[0]);
        assert_eq!(projected, json!({"_id": "t1", "name": "alpha"}));

        let no_id = Projection::from_value(json!({"name": 1, "_id": 0})).unwrap();
        assert_eq!(no_id.apply(&docs()[0]), json!({"name": "alpha"}));
    }

    #[test]
    fn test_projection_exclude_mode() {
        let projection = Projection::from_value(json!({"priority": 0})).unwrap();
        let projected = projection.apply(&docs()[0]);
        assert_eq!(
            projected,
            json!({"_id": "t1", "name": "alpha", "completed": false})
        );
    }

    #[test]
    fn test_projection_rejects_mixed_modes() {
        assert!(Projection::from_value(json!({"name": 1, "priority": 0})).is_none());
        assert!(Projection::from_value(json!({"name": "yes"})).is_none());
    }
}
