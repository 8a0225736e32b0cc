//! Predicate compiler: request -> SQL AST.
//!
//! The outer query ranges over `repository_commits rc INNER JOIN commits c`,
//! one row per (repository, commit) membership. Commit-column predicates
//! become plain comparisons on `c`. Label and key/value predicates become
//! correlated `EXISTS` sub-queries against their child table, negated at the
//! sub-query level for `NE` and `NOT_CONTAIN`.

use serde::{Deserialize, Serialize};

use crate::query::ast::{
    BinaryOperator, CompiledQuery, Expr, Function, Join, JoinKind, OrderBy, Select, SelectItem, TableRef,
};
use crate::query::error::{QueryError, QueryResult};
use crate::query::predicate::{CommitColumn, Field, KeyValueKind, KeyValueQuery, Operator, PredicateValue, SortKey};
use crate::storage::RepositoryId;

const LIKE_ESCAPE: char = '\\';

/// Repositories the caller may read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessScope {
    All,
    Only(Vec<RepositoryId>),
}

impl AccessScope {
    pub fn is_empty(&self) -> bool {
        matches!(self, AccessScope::Only(ids) if ids.is_empty())
    }

    pub fn allows(&self, id: RepositoryId) -> bool {
        match self {
            AccessScope::All => true,
            AccessScope::Only(ids) => ids.contains(&id),
        }
    }
}

/// A filter + sort + page request over commits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitQuery {
    pub predicates: Vec<KeyValueQuery>,
    /// Restrict to these repositories (intersected with the access scope).
    pub repository_ids: Vec<RepositoryId>,
    /// Restrict to these commit shas.
    pub commit_shas: Vec<String>,
    pub sort: Option<SortKey>,
    pub page_number: u32,
    pub page_limit: u32,
}

/// Everything the engine runs for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPlan {
    /// Uncorrelated existence probes, one per positive child predicate.
    pub probes: Vec<CompiledQuery>,
    /// Page of `(repository_id, sha)` rows.
    pub page: CompiledQuery,
    /// Total matching rows, ignoring pagination.
    pub count: CompiledQuery,
    /// Rows skipped before the page. `None` when the requested page lies
    /// beyond SQLite's integer range and can only be empty.
    pub offset: Option<i64>,
}

struct PredicateSql {
    condition: Expr,
    probe: Option<Select>,
}

fn rc() -> TableRef {
    TableRef::new("repository_commits", "rc")
}

fn commits() -> TableRef {
    TableRef::new("commits", "c")
}

fn base_select(projection: Vec<SelectItem>) -> Select {
    let (rc, c) = (rc(), commits());
    let mut select = Select::new(projection, rc.clone());
    select.joins.push(Join {
        kind: JoinKind::Inner,
        table: c.clone(),
        on: Expr::eq(c.col("sha"), rc.col("commit_sha")),
    });
    select
}

/// Compile a request. `None` means the access scope is empty and nothing
/// can match.
pub fn compile(scope: &AccessScope, query: &CommitQuery) -> QueryResult<Option<CompiledPlan>> {
    let mut conditions = Vec::new();
    let mut probes = Vec::new();

    for predicate in &query.predicates {
        let compiled = compile_predicate(predicate)?;
        conditions.push(compiled.condition);
        if let Some(probe) = compiled.probe {
            probes.push(probe.compile());
        }
    }

    let sort = query.sort.clone().unwrap_or_default();
    let sort_field = sort_field(&sort)?;

    if scope.is_empty() {
        return Ok(None);
    }

    let (rc, c) = (rc(), commits());
    let mut filters = Vec::new();

    if let AccessScope::Only(ids) = scope {
        filters.push(in_ids(rc.col("repository_id"), ids));
    }
    if !query.repository_ids.is_empty() {
        filters.push(in_ids(rc.col("repository_id"), &query.repository_ids));
    }
    let repos = TableRef::new("repositories", "r");
    let mut live = Select::new(vec![SelectItem::expr(repos.col("id"))], repos.clone());
    live.and_where(Expr::eq(repos.col("deleted"), Expr::Integer(0)));
    filters.push(Expr::InSubquery {
        expr: Box::new(rc.col("repository_id")),
        subquery: Box::new(live),
        negated: false,
    });
    if !query.commit_shas.is_empty() {
        filters.push(Expr::InList {
            expr: Box::new(c.col("sha")),
            list: query
                .commit_shas
                .iter()
                .map(|s| Expr::param(s.to_ascii_lowercase()))
                .collect(),
            negated: false,
        });
    }
    filters.extend(conditions);

    let mut count = base_select(vec![SelectItem::expr(Expr::func(
        Function::Count,
        vec![Expr::Wildcard],
    ))]);
    let mut page = base_select(vec![
        SelectItem::expr(rc.col("repository_id")),
        SelectItem::expr(c.col("sha")),
    ]);
    for filter in &filters {
        count.and_where(filter.clone());
    }
    page.where_clause = Expr::conjunction(filters);

    apply_sort(&mut page, sort_field, sort.ascending);

    let mut offset = Some(0);
    if query.page_number > 0 && query.page_limit > 0 {
        offset = page_offset(query.page_number, query.page_limit);
        page.limit = Some(u64::from(query.page_limit));
        page.offset = offset.map(|o| o as u64);
    }

    Ok(Some(CompiledPlan {
        probes,
        page: page.compile(),
        count: count.compile(),
        offset,
    }))
}

/// Offset of a 1-based page, or `None` when it does not fit in an `i64`.
pub fn page_offset(page_number: u32, page_limit: u32) -> Option<i64> {
    i64::from(page_limit).checked_mul(i64::from(page_number.saturating_sub(1)))
}

fn in_ids(expr: Expr, ids: &[RepositoryId]) -> Expr {
    Expr::InList {
        expr: Box::new(expr),
        list: ids.iter().map(|id| Expr::param(id.get())).collect(),
        negated: false,
    }
}

enum SortField {
    Column(CommitColumn),
    KeyValue { kind: KeyValueKind, key: String },
}

fn sort_field(sort: &SortKey) -> QueryResult<SortField> {
    match Field::parse(&sort.key)? {
        Field::Commit(column) => Ok(SortField::Column(column)),
        Field::KeyValue { kind, key } => Ok(SortField::KeyValue { kind, key }),
        Field::Label => Err(QueryError::invalid("sorting by labels is not supported")),
        Field::LinkedArtifact => Err(QueryError::invalid(
            "sorting by linked_artifact_id is not supported",
        )),
    }
}

fn apply_sort(select: &mut Select, field: SortField, ascending: bool) {
    let (rc, c) = (rc(), commits());
    let order = |expr: Expr| {
        if ascending {
            OrderBy::asc(expr)
        } else {
            OrderBy::desc(expr)
        }
    };

    match field {
        SortField::Column(column) => {
            select.order_by.push(order(c.col(column.column())));
        }
        SortField::KeyValue { kind, key } => {
            let s = TableRef::new("key_values", "s");
            let on = Expr::conjunction([
                Expr::eq(s.col("repository_id"), rc.col("repository_id")),
                Expr::eq(s.col("commit_sha"), c.col("sha")),
                Expr::eq(s.col("field_type"), Expr::param(kind.as_str().to_string())),
                Expr::eq(s.col("kv_key"), Expr::param(key)),
            ]);
            if let Some(on) = on {
                select.joins.push(Join {
                    kind: JoinKind::Left,
                    table: s.clone(),
                    on,
                });
            }
            select.group_by = vec![rc.col("repository_id"), c.col("sha")];

            let aggregate = if ascending { Function::Min } else { Function::Max };
            select
                .order_by
                .push(order(Expr::func(aggregate, vec![s.col("num_value")])));
            select
                .order_by
                .push(order(Expr::func(aggregate, vec![s.col("str_value")])));
        }
    }

    select.order_by.push(OrderBy::asc(c.col("sha")));
    select.order_by.push(OrderBy::asc(rc.col("repository_id")));
}

fn check_value(value: &PredicateValue, op: Operator) -> QueryResult<()> {
    match value {
        PredicateValue::Null => Err(QueryError::invalid("predicate value is null")),
        PredicateValue::Struct(_) => Err(QueryError::unimplemented(
            "struct predicate values are not supported",
        )),
        PredicateValue::List(_) if op != Operator::In => Err(QueryError::unimplemented(format!(
            "list predicate values are only supported with IN, not {}",
            op
        ))),
        PredicateValue::List(items) => {
            if items.is_empty() {
                return Err(QueryError::invalid("IN requires at least one value"));
            }
            for item in items {
                match item {
                    PredicateValue::String(s) if !s.is_empty() => {}
                    PredicateValue::String(_) => {
                        return Err(QueryError::invalid("predicate value is an empty string"))
                    }
                    other => {
                        return Err(QueryError::invalid(format!(
                            "IN expects string values, found {}",
                            other.kind()
                        )))
                    }
                }
            }
            Ok(())
        }
        PredicateValue::String(s) if s.is_empty() => {
            Err(QueryError::invalid("predicate value is an empty string"))
        }
        _ if op == Operator::In => Err(QueryError::invalid("IN requires a list value")),
        _ => Ok(()),
    }
}

fn compile_predicate(predicate: &KeyValueQuery) -> QueryResult<PredicateSql> {
    if predicate.key.trim().is_empty() {
        return Err(QueryError::invalid("predicate key is empty"));
    }
    check_value(&predicate.value, predicate.operator)?;

    let field = Field::parse(&predicate.key)?;
    if predicate.operator == Operator::In && field != Field::LinkedArtifact {
        return Err(QueryError::invalid(format!(
            "IN is only supported for linked_artifact_id, not '{}'",
            predicate.key
        )));
    }

    match field {
        Field::Commit(column) => Ok(PredicateSql {
            condition: commit_condition(column, predicate)?,
            probe: None,
        }),
        Field::LinkedArtifact => Ok(PredicateSql {
            condition: linked_artifact_condition(predicate)?,
            probe: None,
        }),
        Field::Label => {
            let l = TableRef::new("labels", "l");
            let matcher = text_match(l.col("label"), predicate)?;
            Ok(child_predicate(l, vec![matcher], predicate.operator))
        }
        Field::KeyValue { kind, key } => {
            let kv = TableRef::new("key_values", "kv");
            let mut matchers = vec![
                Expr::eq(kv.col("field_type"), Expr::param(kind.as_str().to_string())),
                Expr::eq(kv.col("kv_key"), Expr::param(key)),
            ];
            matchers.extend(key_value_match(&kv, predicate)?);
            Ok(child_predicate(kv, matchers, predicate.operator))
        }
    }
}

/// `[NOT] EXISTS (SELECT 1 FROM <table> WHERE owned-by-outer-row AND matchers)`
fn child_predicate(table: TableRef, matchers: Vec<Expr>, op: Operator) -> PredicateSql {
    let (rc, c) = (rc(), commits());

    let probe = if op.is_negative() {
        None
    } else {
        let mut probe = Select::new(vec![SelectItem::expr(Expr::Integer(1))], table.clone());
        probe.where_clause = Expr::conjunction(matchers.iter().cloned());
        probe.limit = Some(1);
        Some(probe)
    };

    let mut correlated = Select::new(vec![SelectItem::expr(Expr::Integer(1))], table.clone());
    correlated.and_where(Expr::eq(table.col("repository_id"), rc.col("repository_id")));
    correlated.and_where(Expr::eq(table.col("commit_sha"), c.col("sha")));
    for matcher in matchers {
        correlated.and_where(matcher);
    }

    PredicateSql {
        condition: Expr::exists(correlated, op.is_negative()),
        probe,
    }
}

/// Positive form of a text comparison; negation is applied by the caller.
fn text_match(column: Expr, predicate: &KeyValueQuery) -> QueryResult<Expr> {
    let value = string_value(predicate)?;
    match predicate.operator {
        Operator::Eq | Operator::Ne => Ok(Expr::eq(column, Expr::param(value.to_string()))),
        Operator::Contain | Operator::NotContain => Ok(contains(column, value, false)),
        op => Err(unsupported(op, predicate)),
    }
}

fn key_value_match(kv: &TableRef, predicate: &KeyValueQuery) -> QueryResult<Vec<Expr>> {
    let op = predicate.operator;
    match &predicate.value {
        PredicateValue::Number(n) => {
            let cmp = match op {
                Operator::Eq | Operator::Ne => BinaryOperator::Eq,
                Operator::Gt => BinaryOperator::Gt,
                Operator::Gte => BinaryOperator::GtEq,
                Operator::Lt => BinaryOperator::Lt,
                Operator::Lte => BinaryOperator::LtEq,
                _ => return Err(unsupported(op, predicate)),
            };
            Ok(vec![Expr::binary(kv.col("num_value"), cmp, Expr::param(*n))])
        }
        PredicateValue::String(_) => Ok(vec![text_match(kv.col("str_value"), predicate)?]),
        PredicateValue::Bool(b) => match op {
            Operator::Eq | Operator::Ne => Ok(vec![
                Expr::eq(kv.col("value_type"), Expr::param("bool".to_string())),
                Expr::eq(kv.col("kv_value"), Expr::param(b.to_string())),
            ]),
            _ => Err(unsupported(op, predicate)),
        },
        other => Err(QueryError::invalid(format!(
            "unsupported value kind {} for '{}'",
            other.kind(),
            predicate.key
        ))),
    }
}

fn commit_condition(column: CommitColumn, predicate: &KeyValueQuery) -> QueryResult<Expr> {
    let c = commits();
    let col = c.col(column.column());
    let op = predicate.operator;

    if column.is_numeric() {
        let number = match &predicate.value {
            PredicateValue::Number(n) => *n,
            PredicateValue::String(s) => s.trim().parse::<f64>().map_err(|_| {
                QueryError::invalid(format!("'{}' expects a number, got '{}'", predicate.key, s))
            })?,
            other => {
                return Err(QueryError::invalid(format!(
                    "'{}' expects a number, got {}",
                    predicate.key,
                    other.kind()
                )))
            }
        };
        let cmp = match op {
            Operator::Eq => BinaryOperator::Eq,
            Operator::Ne => BinaryOperator::NotEq,
            Operator::Gt => BinaryOperator::Gt,
            Operator::Gte => BinaryOperator::GtEq,
            Operator::Lt => BinaryOperator::Lt,
            Operator::Lte => BinaryOperator::LtEq,
            _ => return Err(unsupported(op, predicate)),
        };
        return Ok(Expr::binary(col, cmp, number_param(number)));
    }

    let raw = string_value(predicate)?;
    let value = if column == CommitColumn::Sha || column == CommitColumn::RootSha {
        raw.to_ascii_lowercase()
    } else {
        raw.to_string()
    };
    match op {
        Operator::Eq => Ok(Expr::eq(col, Expr::param(value))),
        Operator::Ne => Ok(Expr::binary(col, BinaryOperator::NotEq, Expr::param(value))),
        Operator::Contain => Ok(contains(col, &value, false)),
        Operator::NotContain => Ok(contains(col, &value, true)),
        _ => Err(unsupported(op, predicate)),
    }
}

fn linked_artifact_condition(predicate: &KeyValueQuery) -> QueryResult<Expr> {
    let sha = commits().col("sha");
    match (&predicate.operator, &predicate.value) {
        (Operator::Eq, PredicateValue::String(s)) => Ok(Expr::eq(sha, Expr::param(s.to_ascii_lowercase()))),
        (Operator::In, PredicateValue::List(items)) => Ok(Expr::InList {
            expr: Box::new(sha),
            list: items
                .iter()
                .filter_map(|item| match item {
                    PredicateValue::String(s) => Some(Expr::param(s.to_ascii_lowercase())),
                    _ => None,
                })
                .collect(),
            negated: false,
        }),
        (op, _) => Err(unsupported(*op, predicate)),
    }
}

fn string_value(predicate: &KeyValueQuery) -> QueryResult<&str> {
    match &predicate.value {
        PredicateValue::String(s) => Ok(s),
        other => Err(QueryError::invalid(format!(
            "'{}' expects a string, got {}",
            predicate.key,
            other.kind()
        ))),
    }
}

fn unsupported(op: Operator, predicate: &KeyValueQuery) -> QueryError {
    QueryError::invalid(format!(
        "operator {} is not supported for '{}' with a {} value",
        op,
        predicate.key,
        predicate.value.kind()
    ))
}

fn number_param(n: f64) -> Expr {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Expr::param(n as i64)
    } else {
        Expr::param(n)
    }
}

/// Case-insensitive substring match with LIKE wildcards escaped.
fn contains(column: Expr, needle: &str, negated: bool) -> Expr {
    Expr::Like {
        expr: Box::new(Expr::lower(column)),
        pattern: Box::new(Expr::param(like_pattern(needle))),
        escape: Some(LIKE_ESCAPE),
        negated,
    }
}

fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for ch in needle.to_lowercase().chars() {
        if ch == LIKE_ESCAPE || ch == '%' || ch == '_' {
            pattern.push(LIKE_ESCAPE);
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::types::Value;
    use sqlparser::dialect::SQLiteDialect;
    use sqlparser::parser::Parser;

    fn plan(query: &CommitQuery) -> CompiledPlan {
        compile(&AccessScope::All, query).unwrap().unwrap()
    }

    fn with(predicates: Vec<KeyValueQuery>) -> CommitQuery {
        CommitQuery {
            predicates,
            ..CommitQuery::default()
        }
    }

    fn err(predicate: KeyValueQuery) -> QueryError {
        compile(&AccessScope::All, &with(vec![predicate])).unwrap_err()
    }

    fn assert_parses(sql: &str) {
        Parser::parse_sql(&SQLiteDialect {}, sql).unwrap_or_else(|e| panic!("{}: {}", sql, e));
    }

    #[test]
    fn test_value_errors() {
        assert!(matches!(
            err(KeyValueQuery::new("", Operator::Eq, "x")),
            QueryError::InvalidArgument(_)
        ));
        assert!(matches!(
            err(KeyValueQuery::new("tags", Operator::Eq, "")),
            QueryError::InvalidArgument(_)
        ));
        assert!(matches!(
            err(KeyValueQuery::new("tags", Operator::Eq, PredicateValue::Null)),
            QueryError::InvalidArgument(_)
        ));
        assert!(matches!(
            err(KeyValueQuery::new(
                "attributes.a",
                Operator::Eq,
                PredicateValue::Struct(serde_json::Map::new())
            )),
            QueryError::Unimplemented(_)
        ));
        assert!(matches!(
            err(KeyValueQuery::new(
                "attributes.a",
                Operator::Eq,
                PredicateValue::List(vec!["x".into()])
            )),
            QueryError::Unimplemented(_)
        ));
        assert!(matches!(
            err(KeyValueQuery::new("bogus.a", Operator::Eq, "x")),
            QueryError::InvalidArgument(_)
        ));
        assert!(matches!(
            err(KeyValueQuery::new("observations.a.b", Operator::Eq, "x")),
            QueryError::InvalidArgument(_)
        ));
    }

    #[test]
    fn test_operator_field_combinations() {
        assert!(matches!(
            err(KeyValueQuery::new("tags", Operator::Gt, "x")),
            QueryError::InvalidArgument(_)
        ));
        assert!(matches!(
            err(KeyValueQuery::new("date_created", Operator::Contain, "1")),
            QueryError::InvalidArgument(_)
        ));
        assert!(matches!(
            err(KeyValueQuery::new("date_created", Operator::Gt, "soon")),
            QueryError::InvalidArgument(_)
        ));
        assert!(matches!(
            err(KeyValueQuery::new(
                "tags",
                Operator::In,
                PredicateValue::List(vec!["a".into()])
            )),
            QueryError::InvalidArgument(_)
        ));
        assert!(matches!(
            err(KeyValueQuery::new("linked_artifact_id", Operator::In, "abc")),
            QueryError::InvalidArgument(_)
        ));
    }

    #[test]
    fn test_negative_child_predicates_use_not_exists() {
        let p = plan(&with(vec![
            KeyValueQuery::new("tags", Operator::NotContain, "prod"),
            KeyValueQuery::new("metrics.loss", Operator::Ne, 0.5),
        ]));
        assert_eq!(p.page.sql.matches("NOT EXISTS").count(), 2);
        assert!(p.probes.is_empty());
    }

    #[test]
    fn test_positive_child_predicates_are_probed() {
        let p = plan(&with(vec![
            KeyValueQuery::new("tags", Operator::Eq, "v1"),
            KeyValueQuery::new("metrics.acc", Operator::Gte, 0.9),
            KeyValueQuery::new("author", Operator::Eq, "alice"),
        ]));
        assert_eq!(p.probes.len(), 2);
        assert!(p.probes[0].sql.starts_with("SELECT 1 FROM labels l WHERE"));
        assert!(!p.probes[0].sql.contains("rc."));
        for probe in &p.probes {
            assert_parses(&probe.sql);
        }
    }

    #[test]
    fn test_like_escaping() {
        assert_eq!(like_pattern("50%_A\\b"), "%50\\%\\_a\\\\b%");

        let p = plan(&with(vec![KeyValueQuery::new("message", Operator::Contain, "100%")]));
        assert!(p.page.sql.contains("LOWER(c.message) LIKE ?"));
        assert!(p.page.sql.contains("ESCAPE '\\'"));
        assert!(p.page.params.contains(&Value::Text("%100\\%%".into())));
    }

    #[test]
    fn test_numeric_strings_for_time_fields() {
        let p = plan(&with(vec![KeyValueQuery::new("time_updated", Operator::Gte, "1500")]));
        assert!(p.page.sql.contains("(c.date_updated >= ?"));
        assert!(p.page.params.contains(&Value::Integer(1500)));
    }

    #[test]
    fn test_pagination_and_default_sort() {
        let p = plan(&CommitQuery {
            page_number: 3,
            page_limit: 2,
            ..CommitQuery::default()
        });
        assert!(p
            .page
            .sql
            .ends_with("ORDER BY c.date_updated DESC, c.sha ASC, rc.repository_id ASC LIMIT 2 OFFSET 4"));
        assert!(!p.count.sql.contains("LIMIT"));
        assert!(!p.count.sql.contains("ORDER BY"));

        let all = plan(&CommitQuery {
            page_number: 0,
            page_limit: 2,
            ..CommitQuery::default()
        });
        assert!(!all.page.sql.contains("LIMIT"));
        assert_eq!(all.offset, Some(0));
    }

    #[test]
    fn test_page_offset_beyond_integer_range() {
        assert_eq!(page_offset(3, 2), Some(4));
        assert_eq!(page_offset(1, u32::MAX), Some(0));
        assert_eq!(page_offset(u32::MAX, u32::MAX), None);

        let p = plan(&CommitQuery {
            page_number: u32::MAX,
            page_limit: u32::MAX,
            ..CommitQuery::default()
        });
        assert_eq!(p.offset, None);
        assert!(!p.page.sql.contains("OFFSET"));

        let far = plan(&CommitQuery {
            page_number: u32::MAX,
            page_limit: 1,
            ..CommitQuery::default()
        });
        assert_eq!(far.offset, Some(i64::from(u32::MAX) - 1));
        assert!(far.page.sql.ends_with(&format!("LIMIT 1 OFFSET {}", u32::MAX - 1)));
    }

    #[test]
    fn test_key_value_sort_groups_and_aggregates() {
        let p = plan(&CommitQuery {
            sort: Some(SortKey::asc("metrics.acc")),
            predicates: vec![KeyValueQuery::new("author", Operator::Eq, "a")],
            ..CommitQuery::default()
        });
        assert!(p.page.sql.contains("LEFT JOIN key_values s ON"));
        assert!(p.page.sql.contains("GROUP BY rc.repository_id, c.sha"));
        assert!(p
            .page
            .sql
            .contains("ORDER BY MIN(s.num_value) ASC, MIN(s.str_value) ASC, c.sha ASC"));
        assert_eq!(p.page.params[0], Value::Text("metrics".into()));
        assert_eq!(p.page.params[1], Value::Text("acc".into()));
        assert_parses(&p.page.sql);
    }

    #[test]
    fn test_sort_by_labels_rejected() {
        let result = compile(
            &AccessScope::All,
            &CommitQuery {
                sort: Some(SortKey::asc("tags")),
                ..CommitQuery::default()
            },
        );
        assert!(matches!(result, Err(QueryError::InvalidArgument(_))));
    }

    #[test]
    fn test_empty_scope_short_circuits() {
        let result = compile(&AccessScope::Only(vec![]), &CommitQuery::default()).unwrap();
        assert!(result.is_none());

        // invalid predicates are still reported for an empty scope
        let result = compile(
            &AccessScope::Only(vec![]),
            &with(vec![KeyValueQuery::new("", Operator::Eq, "x")]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_full_plan_is_valid_sql() {
        let p = compile(
            &AccessScope::Only(vec![RepositoryId(1), RepositoryId(2)]),
            &CommitQuery {
                predicates: vec![
                    KeyValueQuery::new("tags", Operator::Eq, "gold"),
                    KeyValueQuery::new("hyperparameters.lr", Operator::Lt, 0.1),
                    KeyValueQuery::new("attributes.flag", Operator::Eq, true),
                    KeyValueQuery::new("observations.step", Operator::NotContain, "warm"),
                    KeyValueQuery::new(
                        "linked_artifact_id",
                        Operator::In,
                        PredicateValue::List(vec!["ABC".into(), "def".into()]),
                    ),
                    KeyValueQuery::new("version", Operator::Gt, 1i64),
                ],
                repository_ids: vec![RepositoryId(2)],
                commit_shas: vec![],
                sort: Some(SortKey::desc("hyperparameters.lr")),
                page_number: 1,
                page_limit: 10,
            },
        )
        .unwrap()
        .unwrap();

        assert_parses(&p.page.sql);
        assert_parses(&p.count.sql);
        assert!(p.page.params.contains(&Value::Text("abc".into())));
        let placeholders = p.page.sql.matches('?').count();
        assert_eq!(placeholders, p.page.params.len());
    }
}
