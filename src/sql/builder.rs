//! Renders compiled queries to parameterized SELECT, COUNT, INSERT, UPDATE and DELETE.

use crate::sql::predicate::{JoinSet, OrderClause, Predicate, MAIN_ALIAS};
use crate::sql::SqlValue;

/// Quote identifier for PostgreSQL (safe: only from the registry).
pub(crate) fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub pg_type: String,
}

/// Physical table of a resource type.
#[derive(Clone, Debug, PartialEq)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
    pub pk: String,
    pub pk_pg_type: String,
    pub columns: Vec<ColumnInfo>,
}

impl TableRef {
    pub fn qualified(&self) -> String {
        format!("{}.{}", quoted(&self.schema), quoted(&self.name))
    }

    /// Storage key used by in-process backends.
    pub fn key(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl QueryBuf {
    pub fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: SqlValue) -> usize {
        self.params.push(v);
        self.params.len()
    }

    /// `$n::pg_type` for a new parameter.
    pub fn placeholder(&mut self, v: SqlValue, pg_type: &str) -> String {
        let n = self.push_param(v);
        format!("${}::{}", n, pg_type)
    }

    pub fn placeholder_untyped(&mut self, v: SqlValue) -> String {
        format!("${}", self.push_param(v))
    }
}

impl Default for QueryBuf {
    fn default() -> Self {
        QueryBuf::new()
    }
}

/// SELECT list: custom enum (schema.typename) and numeric columns as col::text so sqlx returns String.
fn select_column_list(table: &TableRef, alias: Option<&str>) -> String {
    table
        .columns
        .iter()
        .map(|c| {
            let q = quoted(&c.name);
            let expr = match alias {
                Some(a) => format!("{}.{}", quoted(a), q),
                None => q.clone(),
            };
            if c.pg_type.contains('.') || c.pg_type == "numeric" {
                format!("{}::text AS {}", expr, q)
            } else if alias.is_some() {
                format!("{} AS {}", expr, q)
            } else {
                expr
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// A compiled read against one resource table, aliased as `main`.
#[derive(Clone, Debug)]
pub struct SelectQuery {
    pub table: TableRef,
    pub filter: Option<Predicate>,
    /// Inner joins needed by the filter. Evaluated in a key subquery so to-many joins
    /// never duplicate primary rows.
    pub filter_joins: JoinSet,
    /// Left joins needed by the ordering.
    pub sort_joins: JoinSet,
    pub order: Vec<OrderClause>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SelectQuery {
    pub fn new(table: TableRef) -> Self {
        SelectQuery {
            table,
            filter: None,
            filter_joins: JoinSet::new(),
            sort_joins: JoinSet::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
        }
    }
}

fn where_clause(query: &SelectQuery, q: &mut QueryBuf) -> String {
    let Some(filter) = &query.filter else {
        return String::new();
    };
    let cond = filter.write_sql(q);
    if query.filter_joins.is_empty() {
        return format!(" WHERE {}", cond);
    }
    let pk = format!("{}.{}", quoted(MAIN_ALIAS), quoted(&query.table.pk));
    let joins: Vec<String> = query.filter_joins.iter().map(|j| j.sql()).collect();
    format!(
        " WHERE {} IN (SELECT {} FROM {} AS {} {} WHERE {})",
        pk,
        pk,
        query.table.qualified(),
        quoted(MAIN_ALIAS),
        joins.join(" "),
        cond
    )
}

pub fn render_select(query: &SelectQuery) -> QueryBuf {
    let mut q = QueryBuf::new();
    let cols = select_column_list(&query.table, Some(MAIN_ALIAS));
    let where_sql = where_clause(query, &mut q);
    let joins: String = query.sort_joins.iter().map(|j| format!(" {}", j.sql())).collect();
    let order_sql = if query.order.is_empty() {
        String::new()
    } else {
        let parts: Vec<String> = query.order.iter().map(OrderClause::sql).collect();
        format!(" ORDER BY {}", parts.join(", "))
    };
    let limit_sql = query.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_sql = query.offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {} AS {}{}{}{}{}{}",
        cols,
        query.table.qualified(),
        quoted(MAIN_ALIAS),
        joins,
        where_sql,
        order_sql,
        limit_sql,
        offset_sql
    );
    q
}

/// COUNT(*) under the same filter; ordering and window are ignored.
pub fn render_count(query: &SelectQuery) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(query, &mut q);
    q.sql = format!(
        "SELECT COUNT(*) AS \"count\" FROM {} AS {}{}",
        query.table.qualified(),
        quoted(MAIN_ALIAS),
        where_sql
    );
    q
}

/// INSERT the given columns; omitted columns take their DB default.
pub fn render_insert(table: &TableRef, values: &[(ColumnInfo, SqlValue)]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let returning = select_column_list(table, None);
    if values.is_empty() {
        q.sql = format!(
            "INSERT INTO {} DEFAULT VALUES RETURNING {}",
            table.qualified(),
            returning
        );
        return q;
    }
    let mut cols = Vec::with_capacity(values.len());
    let mut placeholders = Vec::with_capacity(values.len());
    for (c, v) in values {
        cols.push(quoted(&c.name));
        placeholders.push(q.placeholder(v.clone(), &c.pg_type));
    }
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        table.qualified(),
        cols.join(", "),
        placeholders.join(", "),
        returning
    );
    q
}

fn set_clause(values: &[(ColumnInfo, SqlValue)], q: &mut QueryBuf) -> String {
    values
        .iter()
        .map(|(c, v)| format!("{} = {}", quoted(&c.name), q.placeholder(v.clone(), &c.pg_type)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// UPDATE by primary key. With nothing to set this becomes a SELECT of the row.
pub fn render_update(table: &TableRef, key: &SqlValue, values: &[(ColumnInfo, SqlValue)]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let returning = select_column_list(table, None);
    if values.is_empty() {
        let ph = q.placeholder(key.clone(), &table.pk_pg_type);
        q.sql = format!(
            "SELECT {} FROM {} WHERE {} = {}",
            returning,
            table.qualified(),
            quoted(&table.pk),
            ph
        );
        return q;
    }
    let sets = set_clause(values, &mut q);
    let ph = q.placeholder(key.clone(), &table.pk_pg_type);
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = {} RETURNING {}",
        table.qualified(),
        sets,
        quoted(&table.pk),
        ph,
        returning
    );
    q
}

/// UPDATE every row matching `predicate` (columns referenced under the `main` alias).
pub fn render_update_where(table: &TableRef, predicate: &Predicate, values: &[(ColumnInfo, SqlValue)]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let sets = set_clause(values, &mut q);
    let cond = predicate.write_sql(&mut q);
    q.sql = format!(
        "UPDATE {} AS {} SET {} WHERE {}",
        table.qualified(),
        quoted(MAIN_ALIAS),
        sets,
        cond
    );
    q
}

/// DELETE by primary key, returning the key when a row was removed.
pub fn render_delete(table: &TableRef, key: &SqlValue) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.placeholder(key.clone(), &table.pk_pg_type);
    q.sql = format!(
        "DELETE FROM {} WHERE {} = {} RETURNING {}",
        table.qualified(),
        quoted(&table.pk),
        ph,
        quoted(&table.pk)
    );
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::{ColumnRef, CompareOp, JoinKind, JoinSpec, SortDirection};

    fn users() -> TableRef {
        TableRef {
            schema: "public".into(),
            name: "users".into(),
            pk: "id".into(),
            pk_pg_type: "bigint".into(),
            columns: vec![
                ColumnInfo { name: "id".into(), pg_type: "bigint".into() },
                ColumnInfo { name: "name".into(), pg_type: "text".into() },
            ],
        }
    }

    fn posts() -> TableRef {
        TableRef {
            schema: "public".into(),
            name: "posts".into(),
            pk: "id".into(),
            pk_pg_type: "bigint".into(),
            columns: vec![ColumnInfo { name: "id".into(), pg_type: "bigint".into() }],
        }
    }

    #[test]
    fn test_render_select_with_filter_join() {
        let mut query = SelectQuery::new(users());
        query.filter_joins.push(JoinSpec {
            path: "posts".into(),
            alias: "posts".into(),
            parent_alias: "main".into(),
            parent_column: "id".into(),
            table: posts(),
            column: "author_id".into(),
            kind: JoinKind::Inner,
        });
        query.filter = Some(Predicate::Compare {
            column: ColumnRef::new("posts", "title", "text"),
            op: CompareOp::Eq,
            value: SqlValue::Text("Hello".into()),
        });
        query.order.push(OrderClause {
            column: ColumnRef::new("main", "id", "bigint"),
            direction: SortDirection::Asc,
        });
        query.limit = Some(20);
        let q = render_select(&query);
        assert_eq!(
            q.sql,
            "SELECT \"main\".\"id\" AS \"id\", \"main\".\"name\" AS \"name\" FROM \"public\".\"users\" AS \"main\" \
             WHERE \"main\".\"id\" IN (SELECT \"main\".\"id\" FROM \"public\".\"users\" AS \"main\" \
             INNER JOIN \"public\".\"posts\" AS \"posts\" ON \"posts\".\"author_id\" = \"main\".\"id\" \
             WHERE \"posts\".\"title\" = $1::text) ORDER BY \"main\".\"id\" ASC LIMIT 20"
        );
        assert_eq!(q.params, vec![SqlValue::Text("Hello".into())]);

        let count = render_count(&query);
        assert!(count.sql.starts_with("SELECT COUNT(*) AS \"count\" FROM \"public\".\"users\" AS \"main\" WHERE"));
    }

    #[test]
    fn test_render_writes() {
        let table = users();
        let name = table.column("name").unwrap().clone();
        let insert = render_insert(&table, &[(name.clone(), SqlValue::Text("ann".into()))]);
        assert_eq!(
            insert.sql,
            "INSERT INTO \"public\".\"users\" (\"name\") VALUES ($1::text) RETURNING \"id\", \"name\""
        );
        let empty = render_insert(&table, &[]);
        assert!(empty.sql.contains("DEFAULT VALUES"));

        let update = render_update(&table, &SqlValue::Int(3), &[(name, SqlValue::Text("bo".into()))]);
        assert_eq!(
            update.sql,
            "UPDATE \"public\".\"users\" SET \"name\" = $1::text WHERE \"id\" = $2::bigint RETURNING \"id\", \"name\""
        );
        let noop = render_update(&table, &SqlValue::Int(3), &[]);
        assert!(noop.sql.starts_with("SELECT"));

        let delete = render_delete(&table, &SqlValue::Int(3));
        assert_eq!(delete.sql, "DELETE FROM \"public\".\"users\" WHERE \"id\" = $1::bigint RETURNING \"id\"");
    }
}
