//! Native predicate tree, joins and ordering produced by the filter and sort compilers.

use crate::sql::builder::{quoted, QueryBuf, TableRef};
use crate::sql::SqlValue;
use std::fmt;

/// Alias of the primary resource's table in every generated statement.
pub const MAIN_ALIAS: &str = "main";

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnRef {
    pub alias: String,
    pub column: String,
    /// Cast applied to parameters compared against this column.
    pub pg_type: String,
}

impl ColumnRef {
    pub fn new(alias: &str, column: &str, pg_type: &str) -> Self {
        ColumnRef {
            alias: alias.to_string(),
            column: column.to_string(),
            pg_type: pg_type.to_string(),
        }
    }

    pub fn sql(&self) -> String {
        format!("{}.{}", quoted(&self.alias), quoted(&self.column))
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.alias, self.column)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Compare {
        column: ColumnRef,
        op: CompareOp,
        value: SqlValue,
    },
    Between {
        column: ColumnRef,
        low: SqlValue,
        high: SqlValue,
    },
    In {
        column: ColumnRef,
        values: Vec<SqlValue>,
        negated: bool,
    },
    Like {
        column: ColumnRef,
        pattern: String,
        case_insensitive: bool,
        negated: bool,
    },
    IsNull {
        column: ColumnRef,
        negated: bool,
    },
    /// Registered builder output. `{col}` stands for the column, each `{}` for the next param.
    Custom {
        column: ColumnRef,
        template: String,
        params: Vec<SqlValue>,
    },
}

impl Predicate {
    /// Render as parameterized SQL, pushing values into `buf`.
    pub fn write_sql(&self, buf: &mut QueryBuf) -> String {
        match self {
            Predicate::And(children) => join_children(children, " AND ", "TRUE", |c| c.write_sql(buf)),
            Predicate::Or(children) => join_children(children, " OR ", "FALSE", |c| c.write_sql(buf)),
            Predicate::Not(inner) => format!("NOT ({})", inner.write_sql(buf)),
            Predicate::Compare { column, op, value } => {
                let ph = buf.placeholder(value.clone(), &column.pg_type);
                format!("{} {} {}", column.sql(), op.symbol(), ph)
            }
            Predicate::Between { column, low, high } => {
                let lo = buf.placeholder(low.clone(), &column.pg_type);
                let hi = buf.placeholder(high.clone(), &column.pg_type);
                format!("{} BETWEEN {} AND {}", column.sql(), lo, hi)
            }
            Predicate::In { column, values, negated } => {
                if values.is_empty() {
                    return if *negated { "TRUE".into() } else { "FALSE".into() };
                }
                let phs: Vec<String> = values
                    .iter()
                    .map(|v| buf.placeholder(v.clone(), &column.pg_type))
                    .collect();
                let kw = if *negated { "NOT IN" } else { "IN" };
                format!("{} {} ({})", column.sql(), kw, phs.join(", "))
            }
            Predicate::Like {
                column,
                pattern,
                case_insensitive,
                negated,
            } => {
                let ph = buf.placeholder(SqlValue::Text(pattern.clone()), "text");
                format!("{} {} {}", column.sql(), like_keyword(*case_insensitive, *negated), ph)
            }
            Predicate::IsNull { column, negated } => {
                let kw = if *negated { "IS NOT NULL" } else { "IS NULL" };
                format!("{} {}", column.sql(), kw)
            }
            Predicate::Custom {
                column,
                template,
                params,
            } => fill_template(template, &column.sql(), params.iter().map(|p| buf.placeholder_untyped(p.clone()))),
        }
    }

    /// Column references in the tree, depth first.
    pub fn columns(&self) -> Vec<&ColumnRef> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        match self {
            Predicate::And(children) | Predicate::Or(children) => {
                children.iter().for_each(|c| c.collect_columns(out))
            }
            Predicate::Not(inner) => inner.collect_columns(out),
            Predicate::Compare { column, .. }
            | Predicate::Between { column, .. }
            | Predicate::In { column, .. }
            | Predicate::Like { column, .. }
            | Predicate::IsNull { column, .. }
            | Predicate::Custom { column, .. } => out.push(column),
        }
    }

    fn is_combinator(&self) -> bool {
        matches!(self, Predicate::And(_) | Predicate::Or(_))
    }
}

fn like_keyword(case_insensitive: bool, negated: bool) -> &'static str {
    match (case_insensitive, negated) {
        (false, false) => "LIKE",
        (true, false) => "ILIKE",
        (false, true) => "NOT LIKE",
        (true, true) => "NOT ILIKE",
    }
}

fn join_children<F>(children: &[Predicate], sep: &str, empty: &str, mut render: F) -> String
where
    F: FnMut(&Predicate) -> String,
{
    if children.is_empty() {
        return empty.to_string();
    }
    children
        .iter()
        .map(|c| {
            let s = render(c);
            if c.is_combinator() && children.len() > 1 {
                format!("({})", s)
            } else {
                s
            }
        })
        .collect::<Vec<_>>()
        .join(sep)
}

fn fill_template<I>(template: &str, column: &str, mut params: I) -> String
where
    I: Iterator<Item = String>,
{
    let with_col = template.replace("{col}", column);
    let mut out = String::with_capacity(with_col.len());
    let mut rest = with_col.as_str();
    while let Some(pos) = rest.find("{}") {
        out.push_str(&rest[..pos]);
        out.push_str(&params.next().unwrap_or_else(|| "NULL".into()));
        rest = &rest[pos + 2..];
    }
    out.push_str(rest);
    out
}

/// Unparameterized rendering with inline literals, for logs and assertions.
impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::And(children) => {
                f.write_str(&join_children(children, " AND ", "TRUE", |c| c.to_string()))
            }
            Predicate::Or(children) => {
                f.write_str(&join_children(children, " OR ", "FALSE", |c| c.to_string()))
            }
            Predicate::Not(inner) => write!(f, "NOT ({})", inner),
            Predicate::Compare { column, op, value } => write!(f, "{} {} {}", column, op.symbol(), value),
            Predicate::Between { column, low, high } => write!(f, "{} BETWEEN {} AND {}", column, low, high),
            Predicate::In { column, values, negated } => {
                let list: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                let kw = if *negated { "NOT IN" } else { "IN" };
                write!(f, "{} {} ({})", column, kw, list.join(", "))
            }
            Predicate::Like {
                column,
                pattern,
                case_insensitive,
                negated,
            } => write!(
                f,
                "{} {} {}",
                column,
                like_keyword(*case_insensitive, *negated),
                SqlValue::Text(pattern.clone())
            ),
            Predicate::IsNull { column, negated } => {
                write!(f, "{} {}", column, if *negated { "IS NOT NULL" } else { "IS NULL" })
            }
            Predicate::Custom {
                column,
                template,
                params,
            } => f.write_str(&fill_template(
                template,
                &column.to_string(),
                params.iter().map(|p| p.to_string()),
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

/// One aliased join along a relationship path, e.g. `posts` or `posts.comments`.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinSpec {
    pub path: String,
    pub alias: String,
    pub parent_alias: String,
    pub parent_column: String,
    pub table: TableRef,
    pub column: String,
    pub kind: JoinKind,
}

impl JoinSpec {
    /// Deterministic alias for a relationship path. Hops are joined by `__` and an underscore
    /// inside a name becomes `_x`, so distinct paths never share an alias. Never collides with
    /// [`MAIN_ALIAS`].
    pub fn alias_for(path: &str) -> String {
        let alias = path
            .split('.')
            .map(|segment| segment.replace('_', "_x"))
            .collect::<Vec<_>>()
            .join("__");
        if alias == MAIN_ALIAS {
            format!("{}_", alias)
        } else {
            alias
        }
    }

    pub fn sql(&self) -> String {
        let kw = match self.kind {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        };
        format!(
            "{} {} AS {} ON {}.{} = {}.{}",
            kw,
            self.table.qualified(),
            quoted(&self.alias),
            quoted(&self.alias),
            quoted(&self.column),
            quoted(&self.parent_alias),
            quoted(&self.parent_column)
        )
    }
}

/// Ordered, path-deduplicated joins.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JoinSet {
    joins: Vec<JoinSpec>,
}

impl JoinSet {
    pub fn new() -> Self {
        JoinSet::default()
    }

    /// Add a join unless its path is already present. Returns whether it was added.
    pub fn push(&mut self, join: JoinSpec) -> bool {
        if self.contains(&join.path) {
            return false;
        }
        self.joins.push(join);
        true
    }

    pub fn extend(&mut self, other: JoinSet) {
        for j in other.joins {
            self.push(j);
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.joins.iter().any(|j| j.path == path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &JoinSpec> {
        self.joins.iter()
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderClause {
    pub column: ColumnRef,
    pub direction: SortDirection,
}

impl OrderClause {
    pub fn sql(&self) -> String {
        let dir = match self.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        format!("{} {}", self.column.sql(), dir)
    }
}
