//! Query feature builder: translates a flat query-string map into SQL
//! filter / sort / field-selection / pagination parameters.
//!
//! Field names arriving on the wire are API-level (camelCase) and are
//! resolved against a per-resource whitelist mapping them to columns;
//! anything outside the whitelist is ignored. Comparison suffixes use
//! bracket notation (`price[gte]=100`). Malformed numeric control
//! parameters fall back to defaults silently.

use std::collections::HashMap;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 100;

/// Reserved control parameters, never treated as filters
const RESERVED: &[&str] = &["page", "sort", "limit", "fields"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Op {
    fn sql(&self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Gt => ">",
            Op::Gte => ">=",
            Op::Lt => "<",
            Op::Lte => "<=",
        }
    }

    fn from_suffix(s: &str) -> Option<Self> {
        match s {
            "gt" => Some(Op::Gt),
            "gte" => Some(Op::Gte),
            "lt" => Some(Op::Lt),
            "lte" => Some(Op::Lte),
            _ => None,
        }
    }
}

/// A bind parameter; numeric-looking values bind numerically so SQLite
/// comparisons against REAL/INTEGER columns behave as expected.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Num(f64),
    Text(String),
}

impl BindValue {
    fn parse(raw: &str) -> Self {
        match raw.parse::<f64>() {
            Ok(n) => BindValue::Num(n),
            Err(_) => BindValue::Text(raw.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Filter {
    pub column: &'static str,
    pub op: Op,
    pub value: BindValue,
}

/// Parsed query features, applied in fixed order:
/// filter -> sort -> field selection -> pagination.
#[derive(Debug, Clone)]
pub struct QueryFeatures {
    pub filters: Vec<Filter>,
    /// (column, descending)
    pub sort: Vec<(&'static str, bool)>,
    /// API-level field whitelist for the response projection
    pub fields: Option<Vec<String>>,
    pub page: u32,
    pub limit: u32,
}

impl QueryFeatures {
    /// Parse the raw query map against a resource's API-name -> column map.
    pub fn parse(params: &HashMap<String, String>, field_map: &[(&str, &'static str)]) -> Self {
        let lookup = |api_name: &str| -> Option<&'static str> {
            field_map
                .iter()
                .find(|(name, _)| *name == api_name)
                .map(|(_, col)| *col)
        };

        // (a) filter
        let mut filters = Vec::new();
        for (key, value) in params {
            let (field, op) = match key.split_once('[') {
                Some((field, rest)) => match rest.strip_suffix(']').and_then(Op::from_suffix) {
                    Some(op) => (field, op),
                    None => continue,
                },
                None => (key.as_str(), Op::Eq),
            };
            if RESERVED.contains(&field) {
                continue;
            }
            if let Some(column) = lookup(field) {
                filters.push(Filter {
                    column,
                    op,
                    value: BindValue::parse(value),
                });
            }
        }
        // Deterministic predicate order regardless of map iteration
        filters.sort_by_key(|f| f.column);

        // (b) sort
        let mut sort = Vec::new();
        if let Some(raw) = params.get("sort") {
            for part in raw.split(',') {
                let part = part.trim();
                let (name, desc) = match part.strip_prefix('-') {
                    Some(name) => (name, true),
                    None => (part, false),
                };
                if let Some(column) = lookup(name) {
                    sort.push((column, desc));
                }
            }
        }
        if sort.is_empty() {
            // Default: newest first
            if let Some(column) = lookup("createdAt") {
                sort.push((column, true));
            }
        }

        // (c) field selection
        let fields = params.get("fields").map(|raw| {
            raw.split(',')
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect()
        });

        // (d) pagination
        let page = params
            .get("page")
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|&p| p >= 1)
            .unwrap_or(DEFAULT_PAGE);
        let limit = params
            .get("limit")
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|&l| l >= 1)
            .unwrap_or(DEFAULT_LIMIT);

        Self {
            filters,
            sort,
            fields,
            page,
            limit,
        }
    }

    /// Render a full SELECT over `table`, combining the resource's fixed
    /// read-scope predicates, an optional parent scope (nested routes),
    /// the parsed filters, sort and pagination window.
    pub fn build_select(
        &self,
        table: &str,
        scope: &[&str],
        parent: Option<(&str, &str)>,
    ) -> (String, Vec<BindValue>) {
        let mut sql = format!("SELECT * FROM {} WHERE 1 = 1", table);
        let mut binds = Vec::new();

        for predicate in scope {
            sql.push_str(" AND ");
            sql.push_str(predicate);
        }

        if let Some((column, value)) = parent {
            sql.push_str(&format!(" AND {} = ?", column));
            binds.push(BindValue::Text(value.to_string()));
        }

        for filter in &self.filters {
            sql.push_str(&format!(" AND {} {} ?", filter.column, filter.op.sql()));
            binds.push(filter.value.clone());
        }

        if !self.sort.is_empty() {
            sql.push_str(" ORDER BY ");
            let clauses: Vec<String> = self
                .sort
                .iter()
                .map(|(col, desc)| format!("{} {}", col, if *desc { "DESC" } else { "ASC" }))
                .collect();
            sql.push_str(&clauses.join(", "));
        }

        // u64 arithmetic: page and limit come straight off the query
        // string, and their u32 product can overflow
        let offset = (self.page as u64 - 1) * self.limit as u64;
        sql.push_str(&format!(" LIMIT {} OFFSET {}", self.limit, offset));

        (sql, binds)
    }
}

/// Apply the `fields` projection to a serialized object, keeping only the
/// requested top-level keys. `id` and `status`-bearing wrappers are left
/// to the caller; this operates on a single serialized record.
pub fn project_fields(value: &mut serde_json::Value, fields: &[String]) {
    if let serde_json::Value::Object(map) = value {
        map.retain(|key, _| fields.iter().any(|f| f == key) || key == "id");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIELDS: &[(&str, &str)] = &[
        ("name", "name"),
        ("price", "price"),
        ("ratingsAverage", "ratings_average"),
        ("difficulty", "difficulty"),
        ("createdAt", "created_at"),
    ];

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn equality_and_range_filters() {
        let q = QueryFeatures::parse(
            &params(&[("difficulty", "easy"), ("price[gte]", "100")]),
            FIELDS,
        );
        assert_eq!(q.filters.len(), 2);

        let price = q.filters.iter().find(|f| f.column == "price").unwrap();
        assert_eq!(price.op, Op::Gte);
        assert_eq!(price.value, BindValue::Num(100.0));

        let diff = q.filters.iter().find(|f| f.column == "difficulty").unwrap();
        assert_eq!(diff.op, Op::Eq);
        assert_eq!(diff.value, BindValue::Text("easy".to_string()));
    }

    #[test]
    fn reserved_and_unknown_params_are_not_filters() {
        let q = QueryFeatures::parse(
            &params(&[("page", "3"), ("sort", "price"), ("bogus", "1")]),
            FIELDS,
        );
        assert!(q.filters.is_empty());
    }

    #[test]
    fn sort_parses_direction_and_defaults_to_created_desc() {
        let q = QueryFeatures::parse(&params(&[("sort", "-ratingsAverage,price")]), FIELDS);
        assert_eq!(q.sort, vec![("ratings_average", true), ("price", false)]);

        let q = QueryFeatures::parse(&params(&[]), FIELDS);
        assert_eq!(q.sort, vec![("created_at", true)]);
    }

    #[test]
    fn pagination_defaults_and_window() {
        let q = QueryFeatures::parse(&params(&[]), FIELDS);
        assert_eq!((q.page, q.limit), (DEFAULT_PAGE, DEFAULT_LIMIT));

        let q = QueryFeatures::parse(&params(&[("page", "2"), ("limit", "5")]), FIELDS);
        let (sql, _) = q.build_select("tours", &[], None);
        assert!(sql.ends_with("LIMIT 5 OFFSET 5"));
    }

    #[test]
    fn malformed_numbers_fall_back_to_defaults() {
        let q = QueryFeatures::parse(&params(&[("page", "abc"), ("limit", "-5")]), FIELDS);
        assert_eq!((q.page, q.limit), (DEFAULT_PAGE, DEFAULT_LIMIT));
    }

    #[test]
    fn extreme_page_does_not_overflow_offset() {
        let q = QueryFeatures::parse(
            &params(&[("page", "4294967295"), ("limit", "100")]),
            FIELDS,
        );
        let (sql, _) = q.build_select("tours", &[], None);
        assert!(sql.ends_with("LIMIT 100 OFFSET 429496729400"));
    }

    #[test]
    fn build_select_combines_scope_parent_and_filters() {
        let q = QueryFeatures::parse(&params(&[("price[lt]", "500")]), FIELDS);
        let (sql, binds) = q.build_select("tours", &["secret = 0"], Some(("tour_id", "t1")));
        assert!(sql.starts_with("SELECT * FROM tours WHERE 1 = 1 AND secret = 0 AND tour_id = ?"));
        assert!(sql.contains("price < ?"));
        assert_eq!(binds.len(), 2);
    }

    #[test]
    fn field_projection_retains_requested_and_id() {
        let mut value = serde_json::json!({
            "id": "x", "name": "Forest Hiker", "price": 397.0, "summary": "s"
        });
        project_fields(&mut value, &["name".to_string(), "price".to_string()]);
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("id"));
        assert!(obj.contains_key("name"));
        assert!(!obj.contains_key("summary"));
    }
}
