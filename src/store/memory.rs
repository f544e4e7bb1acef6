//! In-process store that evaluates compiled queries directly.
//!
//! Each transaction reads and writes a snapshot of every table and logs its writes. Commit
//! replays the log onto the current shared tables, so transactions that overlap both land;
//! a replay conflict such as a duplicate key fails the commit and publishes nothing. Id
//! sequences are shared, so a rolled-back insert leaves a gap.
//! Predicates follow SQL three-valued logic, and ordering puts nulls last ascending and first
//! descending, as Postgres does.

use crate::error::StorageError;
use crate::sql::{
    ColumnInfo, ColumnRef, CompareOp, JoinKind, JoinSpec, OrderClause, Predicate, SelectQuery, SortDirection,
    SqlValue, TableRef, MAIN_ALIAS,
};
use crate::store::{Row, Store, StoreTx};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

type Tables = BTreeMap<String, Vec<Row>>;

#[derive(Clone, Debug, Default)]
struct MemoryState {
    tables: Tables,
    sequences: BTreeMap<String, i64>,
}

fn lock_state(state: &Mutex<MemoryState>) -> Result<MutexGuard<'_, MemoryState>, StorageError> {
    state
        .lock()
        .map_err(|_| StorageError::Unavailable("memory store lock poisoned".into()))
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    fn snapshot(&self) -> Result<Tables, StorageError> {
        Ok(lock_state(&self.state)?.tables.clone())
    }

    /// Append rows to `table`; columns missing from a row are stored as null.
    pub fn seed<I>(&self, table: &TableRef, rows: I) -> Result<(), StorageError>
    where
        I: IntoIterator<Item = Value>,
    {
        let mut state = lock_state(&self.state)?;
        let stored = state.tables.entry(table.key()).or_default();
        for value in rows {
            let Value::Object(given) = value else {
                return Err(StorageError::Unsupported("seed rows must be JSON objects".into()));
            };
            let mut row = Row::new();
            for c in &table.columns {
                row.insert(c.name.clone(), given.get(&c.name).cloned().unwrap_or(Value::Null));
            }
            stored.push(row);
        }
        Ok(())
    }

    /// Committed rows of `table`, in insertion order.
    pub fn rows(&self, table: &TableRef) -> Result<Vec<Row>, StorageError> {
        Ok(self.snapshot()?.get(&table.key()).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StorageError> {
        Ok(Box::new(MemoryTx {
            shared: Arc::clone(&self.state),
            working: self.snapshot()?,
            log: Vec::new(),
        }))
    }
}

/// A write as the transaction performed it, replayed against the shared tables on commit.
#[derive(Clone, Debug)]
enum Write {
    Insert {
        table: TableRef,
        row: Row,
    },
    Update {
        table: TableRef,
        key: SqlValue,
        values: Vec<(ColumnInfo, SqlValue)>,
    },
    UpdateWhere {
        table: TableRef,
        predicate: Predicate,
        values: Vec<(ColumnInfo, SqlValue)>,
    },
    Delete {
        table: TableRef,
        key: SqlValue,
    },
}

impl Write {
    fn apply(&self, tables: &mut Tables) -> Result<(), StorageError> {
        match self {
            Write::Insert { table, row } => insert_row(tables, table, row.clone()),
            Write::Update { table, key, values } => {
                update_row(tables, table, key, values);
                Ok(())
            }
            Write::UpdateWhere {
                table,
                predicate,
                values,
            } => update_rows(tables, table, predicate, values).map(|_| ()),
            Write::Delete { table, key } => {
                delete_row(tables, table, key);
                Ok(())
            }
        }
    }
}

struct MemoryTx {
    shared: Arc<Mutex<MemoryState>>,
    working: Tables,
    log: Vec<Write>,
}

/// Rows visible to a predicate, by alias. A left join with no match binds nothing.
type Binding<'a> = HashMap<&'a str, &'a Row>;

impl MemoryTx {
    fn table(&self, table: &TableRef) -> &[Row] {
        self.working
            .get(&table.key())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn expand<'a>(&'a self, bindings: Vec<Binding<'a>>, join: &'a JoinSpec) -> Vec<Binding<'a>> {
        let candidates = self.table(&join.table);
        let mut out = Vec::new();
        for binding in bindings {
            let parent_value = binding
                .get(join.parent_alias.as_str())
                .and_then(|row| row.get(&join.parent_column))
                .filter(|v| !v.is_null());
            let matches: Vec<&Row> = match parent_value {
                Some(pv) => candidates
                    .iter()
                    .filter(|r| r.get(&join.column).map_or(false, |v| json_eq(v, pv)))
                    .collect(),
                None => Vec::new(),
            };
            if matches.is_empty() {
                if join.kind == JoinKind::Left {
                    out.push(binding);
                }
                continue;
            }
            for m in matches {
                let mut next = binding.clone();
                next.insert(join.alias.as_str(), m);
                out.push(next);
                if join.kind == JoinKind::Left {
                    break;
                }
            }
        }
        out
    }

    fn matching_indices(&self, query: &SelectQuery) -> Result<Vec<usize>, StorageError> {
        let rows = self.table(&query.table);
        let mut out = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            let Some(filter) = &query.filter else {
                out.push(i);
                continue;
            };
            let mut bindings: Vec<Binding> = vec![HashMap::from([(MAIN_ALIAS, row)])];
            for join in query.filter_joins.iter() {
                bindings = self.expand(bindings, join);
            }
            let mut matched = false;
            for b in &bindings {
                if eval(filter, b)? == Some(true) {
                    matched = true;
                    break;
                }
            }
            if matched {
                out.push(i);
            }
        }
        Ok(out)
    }

    /// Draw the next key from the shared sequence, past every key this transaction or a
    /// committed one has seen.
    fn next_key(&self, table: &TableRef) -> Result<Value, StorageError> {
        if table.pk_pg_type == "uuid" {
            return Ok(Value::String(uuid::Uuid::new_v4().to_string()));
        }
        let mut shared = lock_state(&self.shared)?;
        let committed = shared.tables.get(&table.key()).map(Vec::as_slice).unwrap_or(&[]);
        let max_existing = max_int_key(committed, &table.pk).max(max_int_key(self.table(table), &table.pk));
        let seq = shared.sequences.entry(table.key()).or_insert(0);
        *seq = (*seq).max(max_existing) + 1;
        Ok(Value::Number((*seq).into()))
    }
}

fn max_int_key(rows: &[Row], pk: &str) -> i64 {
    rows.iter()
        .filter_map(|r| r.get(pk).and_then(Value::as_i64))
        .max()
        .unwrap_or(0)
}

fn position(rows: &[Row], table: &TableRef, key: &SqlValue) -> Option<usize> {
    rows.iter()
        .position(|r| r.get(&table.pk).and_then(|v| key.compare_json(v)) == Some(Ordering::Equal))
}

fn insert_row(tables: &mut Tables, table: &TableRef, row: Row) -> Result<(), StorageError> {
    let rows = tables.entry(table.key()).or_default();
    let key = row.get(&table.pk).cloned().unwrap_or(Value::Null);
    if position(rows, table, &SqlValue::from_json(&key)).is_some() {
        return Err(StorageError::Constraint(format!(
            "duplicate key {} in {}",
            key,
            table.key()
        )));
    }
    rows.push(row);
    Ok(())
}

fn update_row(tables: &mut Tables, table: &TableRef, key: &SqlValue, values: &[(ColumnInfo, SqlValue)]) -> Option<Row> {
    let rows = tables.get_mut(&table.key())?;
    let i = position(rows, table, key)?;
    let row = &mut rows[i];
    for (c, v) in values {
        row.insert(c.name.clone(), v.to_json());
    }
    Some(row.clone())
}

fn update_rows(
    tables: &mut Tables,
    table: &TableRef,
    predicate: &Predicate,
    values: &[(ColumnInfo, SqlValue)],
) -> Result<u64, StorageError> {
    let Some(rows) = tables.get_mut(&table.key()) else {
        return Ok(0);
    };
    let mut hits = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        let binding: Binding = HashMap::from([(MAIN_ALIAS, row)]);
        if eval(predicate, &binding)? == Some(true) {
            hits.push(i);
        }
    }
    for &i in &hits {
        for (c, v) in values {
            rows[i].insert(c.name.clone(), v.to_json());
        }
    }
    Ok(hits.len() as u64)
}

fn delete_row(tables: &mut Tables, table: &TableRef, key: &SqlValue) -> bool {
    let Some(rows) = tables.get_mut(&table.key()) else {
        return false;
    };
    match position(rows, table, key) {
        Some(i) => {
            rows.remove(i);
            true
        }
        None => false,
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn count(&mut self, query: &SelectQuery) -> Result<u64, StorageError> {
        Ok(self.matching_indices(query)?.len() as u64)
    }

    async fn select(&mut self, query: &SelectQuery) -> Result<Vec<Row>, StorageError> {
        let indices = self.matching_indices(query)?;
        let rows = self.table(&query.table);
        let mut bound: Vec<Binding> = indices
            .into_iter()
            .map(|i| HashMap::from([(MAIN_ALIAS, &rows[i])]))
            .collect();
        for join in query.sort_joins.iter() {
            bound = self.expand(bound, join);
        }
        bound.sort_by(|a, b| compare_bindings(&query.order, a, b));
        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map(|n| n as usize).unwrap_or(usize::MAX);
        Ok(bound
            .into_iter()
            .skip(offset)
            .take(limit)
            .filter_map(|b| b.get(MAIN_ALIAS).map(|r| (*r).clone()))
            .collect())
    }

    async fn insert(&mut self, table: &TableRef, values: &[(ColumnInfo, SqlValue)]) -> Result<Row, StorageError> {
        let given: HashMap<&str, Value> = values.iter().map(|(c, v)| (c.name.as_str(), v.to_json())).collect();
        let key = match given.get(table.pk.as_str()) {
            Some(v) if !v.is_null() => v.clone(),
            _ => self.next_key(table)?,
        };
        let mut row = Row::new();
        for c in &table.columns {
            let v = if c.name == table.pk {
                key.clone()
            } else {
                given.get(c.name.as_str()).cloned().unwrap_or(Value::Null)
            };
            row.insert(c.name.clone(), v);
        }
        insert_row(&mut self.working, table, row.clone())?;
        self.log.push(Write::Insert {
            table: table.clone(),
            row: row.clone(),
        });
        Ok(row)
    }

    async fn update(
        &mut self,
        table: &TableRef,
        key: &SqlValue,
        values: &[(ColumnInfo, SqlValue)],
    ) -> Result<Option<Row>, StorageError> {
        let updated = update_row(&mut self.working, table, key, values);
        if updated.is_some() {
            self.log.push(Write::Update {
                table: table.clone(),
                key: key.clone(),
                values: values.to_vec(),
            });
        }
        Ok(updated)
    }

    async fn update_where(
        &mut self,
        table: &TableRef,
        predicate: &Predicate,
        values: &[(ColumnInfo, SqlValue)],
    ) -> Result<u64, StorageError> {
        let hits = update_rows(&mut self.working, table, predicate, values)?;
        if hits > 0 {
            self.log.push(Write::UpdateWhere {
                table: table.clone(),
                predicate: predicate.clone(),
                values: values.to_vec(),
            });
        }
        Ok(hits)
    }

    async fn delete(&mut self, table: &TableRef, key: &SqlValue) -> Result<bool, StorageError> {
        let deleted = delete_row(&mut self.working, table, key);
        if deleted {
            self.log.push(Write::Delete {
                table: table.clone(),
                key: key.clone(),
            });
        }
        Ok(deleted)
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let MemoryTx { shared, log, .. } = *self;
        let mut state = lock_state(&shared)?;
        let mut tables = state.tables.clone();
        for write in &log {
            write.apply(&mut tables)?;
        }
        state.tables = tables;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        Ok(())
    }
}

fn cell<'a>(binding: &Binding<'a>, column: &ColumnRef) -> &'a Value {
    static NULL: Value = Value::Null;
    let row: Option<&'a Row> = binding.get(column.alias.as_str()).copied();
    row.and_then(|r| r.get(&column.column)).unwrap_or(&NULL)
}

fn eval(predicate: &Predicate, binding: &Binding) -> Result<Option<bool>, StorageError> {
    Ok(match predicate {
        Predicate::And(children) => {
            let mut unknown = false;
            for c in children {
                match eval(c, binding)? {
                    Some(false) => return Ok(Some(false)),
                    None => unknown = true,
                    Some(true) => {}
                }
            }
            if unknown {
                None
            } else {
                Some(true)
            }
        }
        Predicate::Or(children) => {
            let mut unknown = false;
            for c in children {
                match eval(c, binding)? {
                    Some(true) => return Ok(Some(true)),
                    None => unknown = true,
                    Some(false) => {}
                }
            }
            if unknown {
                None
            } else {
                Some(false)
            }
        }
        Predicate::Not(inner) => eval(inner, binding)?.map(|b| !b),
        Predicate::Compare { column, op, value } => value.compare_json(cell(binding, column)).map(|ord| match op {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ne => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Ge => ord != Ordering::Less,
        }),
        Predicate::Between { column, low, high } => {
            let v = cell(binding, column);
            match (low.compare_json(v), high.compare_json(v)) {
                (Some(lo), Some(hi)) => Some(lo != Ordering::Less && hi != Ordering::Greater),
                _ => None,
            }
        }
        Predicate::In {
            column,
            values,
            negated,
        } => {
            let v = cell(binding, column);
            if v.is_null() {
                None
            } else {
                let found = values.iter().any(|x| x.compare_json(v) == Some(Ordering::Equal));
                Some(found != *negated)
            }
        }
        Predicate::Like {
            column,
            pattern,
            case_insensitive,
            negated,
        } => match cell(binding, column) {
            Value::String(s) => Some(like_match(pattern, s, *case_insensitive) != *negated),
            _ => None,
        },
        Predicate::IsNull { column, negated } => Some(cell(binding, column).is_null() != *negated),
        Predicate::Custom { template, .. } => {
            return Err(StorageError::Unsupported(format!(
                "custom predicate '{}' cannot be evaluated in memory",
                template
            )))
        }
    })
}

enum LikeToken {
    Any,
    One,
    Lit(char),
}

/// SQL LIKE with `\` as the escape character.
fn like_match(pattern: &str, text: &str, case_insensitive: bool) -> bool {
    let norm = |s: &str| if case_insensitive { s.to_lowercase() } else { s.to_string() };
    let pattern = norm(pattern);
    let text: Vec<char> = norm(text).chars().collect();

    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '\\' => LikeToken::Lit(chars.next().unwrap_or('\\')),
            '%' => LikeToken::Any,
            '_' => LikeToken::One,
            other => LikeToken::Lit(other),
        });
    }

    // dp[j]: tokens[..i] matches text[..j]
    let mut dp = vec![false; text.len() + 1];
    dp[0] = true;
    for token in &tokens {
        let mut next = vec![false; text.len() + 1];
        match token {
            LikeToken::Any => {
                let mut reachable = false;
                for j in 0..=text.len() {
                    reachable |= dp[j];
                    next[j] = reachable;
                }
            }
            LikeToken::One => {
                for j in 1..=text.len() {
                    next[j] = dp[j - 1];
                }
            }
            LikeToken::Lit(c) => {
                for j in 1..=text.len() {
                    next[j] = dp[j - 1] && text[j - 1] == *c;
                }
            }
        }
        dp = next;
    }
    dp[text.len()]
}

fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn json_cmp(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

fn compare_bindings(order: &[OrderClause], a: &Binding, b: &Binding) -> Ordering {
    for clause in order {
        let (x, y) = (cell(a, &clause.column), cell(b, &clause.column));
        let ord = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            // NULL sorts as larger than any value
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => json_cmp(x, y),
        };
        let ord = match clause.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
