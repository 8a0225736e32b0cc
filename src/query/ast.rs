//! Structured SQL AST for commit queries.
//!
//! The compiler builds these values and renders them exactly once into SQL
//! text plus an ordered parameter list. Every caller-supplied value becomes a
//! numbered `?N` parameter; only integers produced by the engine itself
//! (LIMIT, OFFSET, constants) are written inline.

use std::fmt;

use rusqlite::types::Value;

/// SELECT statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub projection: Vec<SelectItem>,
    pub from: TableRef,
    pub joins: Vec<Join>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Select {
    /// `SELECT <projection> FROM <from>` with nothing else set.
    pub fn new(projection: Vec<SelectItem>, from: TableRef) -> Self {
        Self {
            projection,
            from,
            joins: Vec::new(),
            where_clause: None,
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// AND `expr` into the WHERE clause.
    pub fn and_where(&mut self, expr: Expr) {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => Expr::and(existing, expr),
            None => expr,
        });
    }

    /// Render into SQL text and parameters.
    pub fn compile(&self) -> CompiledQuery {
        let mut renderer = Renderer::default();
        renderer.select(self);
        CompiledQuery {
            sql: renderer.sql,
            params: renderer.params,
        }
    }
}

impl fmt::Display for Select {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.compile().sql)
    }
}

/// A table in FROM or JOIN, always aliased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub name: String,
    pub alias: String,
}

impl TableRef {
    pub fn new(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: alias.into(),
        }
    }

    /// Column of this table.
    pub fn col(&self, name: &str) -> Expr {
        Expr::column(&self.alias, name)
    }
}

/// A projected expression.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl SelectItem {
    pub fn expr(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn aliased(expr: Expr, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: Some(alias.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: TableRef,
    pub on: Expr,
}

/// ORDER BY clause item.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expr: Expr,
    pub ascending: bool,
}

impl OrderBy {
    pub fn asc(expr: Expr) -> Self {
        Self { expr, ascending: true }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            ascending: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOperator {
    fn as_sql(self) -> &'static str {
        match self {
            BinaryOperator::Eq => "=",
            BinaryOperator::NotEq => "<>",
            BinaryOperator::Lt => "<",
            BinaryOperator::LtEq => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::GtEq => ">=",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
        }
    }
}

/// Scalar and aggregate functions the compiler emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Lower,
    Min,
    Max,
    Count,
}

impl Function {
    fn as_sql(self) -> &'static str {
        match self {
            Function::Lower => "LOWER",
            Function::Min => "MIN",
            Function::Max => "MAX",
            Function::Count => "COUNT",
        }
    }
}

/// SQL expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `table.column`
    Column { table: String, name: String },
    /// Bound parameter.
    Param(Value),
    /// Integer written inline. Never used for caller input.
    Integer(i64),
    /// `*`, only valid as `COUNT(*)`.
    Wildcard,
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    InSubquery {
        expr: Box<Expr>,
        subquery: Box<Select>,
        negated: bool,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        escape: Option<char>,
        negated: bool,
    },
    Exists {
        subquery: Box<Select>,
        negated: bool,
    },
    Function {
        func: Function,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn column(table: &str, name: &str) -> Self {
        Expr::Column {
            table: table.to_string(),
            name: name.to_string(),
        }
    }

    pub fn param(value: impl Into<Value>) -> Self {
        Expr::Param(value.into())
    }

    pub fn binary(left: Expr, op: BinaryOperator, right: Expr) -> Self {
        Expr::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOperator::Eq, right)
    }

    pub fn and(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOperator::And, right)
    }

    /// AND together every expression; `None` when empty.
    pub fn conjunction(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        exprs.into_iter().reduce(Expr::and)
    }

    pub fn exists(subquery: Select, negated: bool) -> Self {
        Expr::Exists {
            subquery: Box::new(subquery),
            negated,
        }
    }

    pub fn func(func: Function, args: Vec<Expr>) -> Self {
        Expr::Function { func, args }
    }

    pub fn lower(expr: Expr) -> Self {
        Self::func(Function::Lower, vec![expr])
    }
}

/// Rendered SQL with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

impl fmt::Display for CompiledQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -- {} param(s)", self.sql, self.params.len())
    }
}

#[derive(Default)]
struct Renderer {
    sql: String,
    params: Vec<Value>,
}

impl Renderer {
    fn push(&mut self, s: &str) {
        self.sql.push_str(s);
    }

    fn select(&mut self, select: &Select) {
        self.push("SELECT ");
        for (i, item) in select.projection.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.expr(&item.expr);
            if let Some(alias) = &item.alias {
                self.push(" AS ");
                self.push(alias);
            }
        }

        self.push(" FROM ");
        self.table(&select.from);

        for join in &select.joins {
            self.push(match join.kind {
                JoinKind::Inner => " INNER JOIN ",
                JoinKind::Left => " LEFT JOIN ",
            });
            self.table(&join.table);
            self.push(" ON ");
            self.expr(&join.on);
        }

        if let Some(filter) = &select.where_clause {
            self.push(" WHERE ");
            self.expr(filter);
        }

        if !select.group_by.is_empty() {
            self.push(" GROUP BY ");
            for (i, expr) in select.group_by.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.expr(expr);
            }
        }

        if !select.order_by.is_empty() {
            self.push(" ORDER BY ");
            for (i, order) in select.order_by.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.expr(&order.expr);
                self.push(if order.ascending { " ASC" } else { " DESC" });
            }
        }

        match (select.limit, select.offset) {
            (Some(limit), offset) => {
                self.push(&format!(" LIMIT {}", limit));
                if let Some(offset) = offset {
                    self.push(&format!(" OFFSET {}", offset));
                }
            }
            (None, Some(offset)) => self.push(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }
    }

    fn table(&mut self, table: &TableRef) {
        self.push(&table.name);
        self.push(" ");
        self.push(&table.alias);
    }

    fn param(&mut self, value: &Value) {
        self.params.push(value.clone());
        let placeholder = format!("?{}", self.params.len());
        self.push(&placeholder);
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Column { table, name } => {
                self.push(table);
                self.push(".");
                self.push(name);
            }
            Expr::Param(value) => self.param(value),
            Expr::Integer(n) => self.push(&n.to_string()),
            Expr::Wildcard => self.push("*"),
            Expr::BinaryOp { left, op, right } => {
                self.push("(");
                self.expr(left);
                self.push(" ");
                self.push(op.as_sql());
                self.push(" ");
                self.expr(right);
                self.push(")");
            }
            Expr::InList { expr, list, negated } => {
                self.expr(expr);
                self.push(if *negated { " NOT IN (" } else { " IN (" });
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.expr(item);
                }
                self.push(")");
            }
            Expr::InSubquery {
                expr,
                subquery,
                negated,
            } => {
                self.expr(expr);
                self.push(if *negated { " NOT IN (" } else { " IN (" });
                self.select(subquery);
                self.push(")");
            }
            Expr::Like {
                expr,
                pattern,
                escape,
                negated,
            } => {
                self.expr(expr);
                self.push(if *negated { " NOT LIKE " } else { " LIKE " });
                self.expr(pattern);
                if let Some(escape) = escape {
                    self.push(&format!(" ESCAPE '{}'", escape));
                }
            }
            Expr::Exists { subquery, negated } => {
                self.push(if *negated { "NOT EXISTS (" } else { "EXISTS (" });
                self.select(subquery);
                self.push(")");
            }
            Expr::Function { func, args } => {
                self.push(func.as_sql());
                self.push("(");
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.expr(arg);
                }
                self.push(")");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::dialect::SQLiteDialect;
    use sqlparser::parser::Parser;

    fn parses(sql: &str) {
        Parser::parse_sql(&SQLiteDialect {}, sql).unwrap_or_else(|e| panic!("{}: {}", sql, e));
    }

    #[test]
    fn test_params_numbered_in_text_order() {
        let c = TableRef::new("commits", "c");
        let mut select = Select::new(vec![SelectItem::expr(c.col("sha"))], c.clone());
        select.and_where(Expr::eq(c.col("author"), Expr::param("alice".to_string())));
        select.and_where(Expr::binary(
            c.col("date_created"),
            BinaryOperator::Gt,
            Expr::param(10i64),
        ));

        let compiled = select.compile();
        assert_eq!(
            compiled.sql,
            "SELECT c.sha FROM commits c WHERE ((c.author = ?1) AND (c.date_created > ?2))"
        );
        assert_eq!(
            compiled.params,
            vec![Value::Text("alice".into()), Value::Integer(10)]
        );
        parses(&compiled.sql);
    }

    #[test]
    fn test_exists_join_group_order_render() {
        let rc = TableRef::new("repository_commits", "rc");
        let c = TableRef::new("commits", "c");
        let kv = TableRef::new("key_values", "kv");

        let mut inner = Select::new(vec![SelectItem::expr(Expr::Integer(1))], kv.clone());
        inner.and_where(Expr::eq(kv.col("commit_sha"), c.col("sha")));
        inner.and_where(Expr::Like {
            expr: Box::new(Expr::lower(kv.col("str_value"))),
            pattern: Box::new(Expr::param("%a\\%%".to_string())),
            escape: Some('\\'),
            negated: false,
        });

        let mut select = Select::new(
            vec![
                SelectItem::expr(rc.col("repository_id")),
                SelectItem::aliased(Expr::func(Function::Min, vec![kv.col("num_value")]), "sort_num"),
            ],
            rc.clone(),
        );
        select.joins.push(Join {
            kind: JoinKind::Inner,
            table: c.clone(),
            on: Expr::eq(c.col("sha"), rc.col("commit_sha")),
        });
        select.and_where(Expr::exists(inner, true));
        select.group_by = vec![rc.col("repository_id"), c.col("sha")];
        select.order_by = vec![OrderBy::desc(c.col("date_updated")), OrderBy::asc(c.col("sha"))];
        select.limit = Some(2);
        select.offset = Some(4);

        let sql = select.to_string();
        assert!(sql.contains("NOT EXISTS (SELECT 1 FROM key_values kv"));
        assert!(sql.contains("ESCAPE '\\'"));
        assert!(sql.ends_with("ORDER BY c.date_updated DESC, c.sha ASC LIMIT 2 OFFSET 4"));
        parses(&sql);
    }

    #[test]
    fn test_in_list_and_subquery() {
        let rc = TableRef::new("repository_commits", "rc");
        let r = TableRef::new("repositories", "r");
        let mut live = Select::new(vec![SelectItem::expr(r.col("id"))], r.clone());
        live.and_where(Expr::eq(r.col("deleted"), Expr::Integer(0)));

        let mut select = Select::new(
            vec![SelectItem::expr(Expr::func(Function::Count, vec![Expr::Wildcard]))],
            rc.clone(),
        );
        select.and_where(Expr::InList {
            expr: Box::new(rc.col("repository_id")),
            list: vec![Expr::param(1i64), Expr::param(2i64)],
            negated: false,
        });
        select.and_where(Expr::InSubquery {
            expr: Box::new(rc.col("repository_id")),
            subquery: Box::new(live),
            negated: false,
        });

        let compiled = select.compile();
        assert_eq!(
            compiled.sql,
            "SELECT COUNT(*) FROM repository_commits rc WHERE (rc.repository_id IN (?1, ?2) \
             AND rc.repository_id IN (SELECT r.id FROM repositories r WHERE (r.deleted = 0)))"
        );
        parses(&compiled.sql);
    }
}
