//! Structured and raw searches over album items.
//!
//! Queries select item ids; a [`ItemCursor`] walks those ids in pages and
//! loads each full item on demand. A query is bound to the schema version
//! it was built against and refuses to run once the album has changed.

use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::collections::VecDeque;
use std::fmt;
use uuid::Uuid;

use super::albums::{Album, Item, ID_COLUMN};
use super::fields::{FieldType, Value};
use super::items::load_item;
use super::schema::quote_ident;
use super::{Database, Result};
use crate::error::StoreError;

/// Comparison applied by one query component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOperator {
    Equals,
    NotEquals,
    /// Substring match, case-insensitive for ASCII.
    Like,
    BiggerThan,
    BiggerOrEqualThan,
    SmallerThan,
    SmallerOrEqualThan,
}

impl QueryOperator {
    pub const ALL: [QueryOperator; 7] = [
        QueryOperator::Equals,
        QueryOperator::NotEquals,
        QueryOperator::Like,
        QueryOperator::BiggerThan,
        QueryOperator::BiggerOrEqualThan,
        QueryOperator::SmallerThan,
        QueryOperator::SmallerOrEqualThan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryOperator::Equals => "equals",
            QueryOperator::NotEquals => "notEquals",
            QueryOperator::Like => "like",
            QueryOperator::BiggerThan => "biggerThan",
            QueryOperator::BiggerOrEqualThan => "biggerOrEqualThan",
            QueryOperator::SmallerThan => "smallerThan",
            QueryOperator::SmallerOrEqualThan => "smallerOrEqualThan",
        }
    }

    /// Parse an operator from its name or its symbol (`=`, `!=`, `~`, `>`, ...).
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "=" | "==" => return Some(QueryOperator::Equals),
            "!=" | "<>" => return Some(QueryOperator::NotEquals),
            "~" => return Some(QueryOperator::Like),
            ">" => return Some(QueryOperator::BiggerThan),
            ">=" => return Some(QueryOperator::BiggerOrEqualThan),
            "<" => return Some(QueryOperator::SmallerThan),
            "<=" => return Some(QueryOperator::SmallerOrEqualThan),
            _ => {}
        }
        Self::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(s))
    }

    fn sql(&self) -> &'static str {
        match self {
            QueryOperator::Equals => "=",
            QueryOperator::NotEquals => "<>",
            QueryOperator::Like => "LIKE",
            QueryOperator::BiggerThan => ">",
            QueryOperator::BiggerOrEqualThan => ">=",
            QueryOperator::SmallerThan => "<",
            QueryOperator::SmallerOrEqualThan => "<=",
        }
    }

    pub fn supports(&self, field_type: FieldType) -> bool {
        match self {
            QueryOperator::Equals | QueryOperator::NotEquals => !field_type.is_reserved(),
            QueryOperator::Like => field_type.is_pattern_matchable(),
            _ => field_type.is_numeric(),
        }
    }
}

impl fmt::Display for QueryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One predicate of a structured search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryComponent {
    pub field_name: String,
    pub operator: QueryOperator,
    /// Literal parsed against the field's type when the query is built.
    pub value: String,
}

impl QueryComponent {
    pub fn new(field_name: impl Into<String>, operator: QueryOperator, value: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            operator,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone)]
enum Source {
    Filter { clause: String, params: Vec<Value> },
    Raw(String),
}

/// An executable search bound to one album schema.
#[derive(Debug, Clone)]
pub struct Query {
    album: Album,
    source: Source,
}

impl Query {
    pub fn album(&self) -> &Album {
        &self.album
    }

    pub fn schema_version(&self) -> Uuid {
        self.album.schema_version
    }

    /// Fail unless the album still has the schema this query was built for.
    fn check_current(&self, conn: &Connection) -> Result<()> {
        let current: Option<String> = conn
            .query_row(
                "SELECT schema_version FROM album_master WHERE id = ?1",
                [self.album.id],
                |row| row.get(0),
            )
            .optional()?;
        match current {
            None => Err(StoreError::AlbumNotFound(self.album.name.clone())),
            Some(v) if v == self.schema_version().to_string() => Ok(()),
            Some(_) => Err(StoreError::StaleQuery(self.album.name.clone())),
        }
    }

    /// SQL and parameters selecting the next page of ids after `last_id`.
    fn page_sql(&self, last_id: i64, page_size: usize) -> (String, Vec<Value>) {
        let id = quote_ident(ID_COLUMN);
        match &self.source {
            Source::Filter { clause, params } => {
                let sql = format!(
                    "SELECT {id} FROM {table} WHERE ({clause}) AND {id} > ?{n} ORDER BY {id} LIMIT ?{m}",
                    table = quote_ident(&self.album.table_name),
                    n = params.len() + 1,
                    m = params.len() + 2,
                );
                let mut bound = params.clone();
                bound.push(Value::Integer(last_id));
                bound.push(Value::Integer(page_size as i64));
                (sql, bound)
            }
            Source::Raw(raw) => (
                format!("SELECT q.{id} FROM ({raw}\n) AS q WHERE q.{id} > ?1 ORDER BY q.{id} LIMIT ?2"),
                vec![Value::Integer(last_id), Value::Integer(page_size as i64)],
            ),
        }
    }
}

/// Lazy forward-only walk over the items a query matches.
///
/// Items are yielded in id order. Build a new cursor to start over.
pub struct ItemCursor<'db> {
    db: &'db Database,
    query: Query,
    pending: VecDeque<i64>,
    last_id: i64,
    exhausted: bool,
}

impl<'db> ItemCursor<'db> {
    fn new(db: &'db Database, query: Query) -> Self {
        Self {
            db,
            query,
            pending: VecDeque::new(),
            last_id: 0,
            exhausted: false,
        }
    }

    fn fetch_page(&mut self) -> Result<()> {
        self.query.check_current(&self.db.conn)?;
        let page_size = self.db.page_size();
        let (sql, params) = self.query.page_sql(self.last_id, page_size);
        let mut stmt = self.db.conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params_from_iter(params.iter()), |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if ids.len() < page_size {
            self.exhausted = true;
        }
        if let Some(&last) = ids.last() {
            self.last_id = last;
        }
        self.pending.extend(ids);
        Ok(())
    }
}

impl Iterator for ItemCursor<'_> {
    type Item = Result<Item>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(id) = self.pending.pop_front() {
                match load_item(&self.db.conn, &self.query.album, id) {
                    Ok(Some(item)) => return Some(Ok(item)),
                    Ok(None) => continue,
                    Err(e) => return Some(Err(e)),
                }
            }
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
    }
}

fn component_sql(album: &Album, component: &QueryComponent) -> Result<(String, Value)> {
    let field = album
        .field(&component.field_name)
        .ok_or_else(|| StoreError::field_not_found(&album.name, &component.field_name))?;
    let op = component.operator;
    if !op.supports(field.field_type) {
        return Err(StoreError::UnsupportedOperator {
            operator: op.as_str(),
            field: field.name.clone(),
            field_type: field.field_type,
        });
    }

    let value = if op == QueryOperator::Like {
        Value::Text(format!("%{}%", component.value))
    } else {
        Value::parse(field.field_type, &component.value)
            .map_err(|reason| StoreError::mismatch(&field.name, field.field_type, reason))?
    };
    Ok((format!("{} {} ?", quote_ident(&field.name), op.sql()), value))
}

/// Reduce raw SQL to one read-only statement that projects `id`.
fn check_raw_query(db: &Database, sql: &str) -> Result<String> {
    let trimmed = sql.trim().trim_end_matches(';').trim_end();
    if trimmed.is_empty() {
        return Err(StoreError::RawQueryRejected("empty query".to_string()));
    }

    let stmt = db.conn.prepare(trimmed).map_err(|e| match e {
        rusqlite::Error::MultipleStatement => {
            StoreError::RawQueryRejected("only a single statement is allowed".to_string())
        }
        other => StoreError::RawQueryRejected(other.to_string()),
    })?;
    if !stmt.readonly() {
        return Err(StoreError::RawQueryRejected("statement modifies the store".to_string()));
    }
    if !stmt.column_names().iter().any(|c| c.eq_ignore_ascii_case(ID_COLUMN)) {
        return Err(StoreError::RawQueryRejected("result must include the id column".to_string()));
    }
    Ok(trimmed.to_string())
}

impl Database {
    /// Combine components with AND (`match_all`) or OR into a query.
    ///
    /// An empty component list matches every item.
    pub fn build_query(&self, components: &[QueryComponent], match_all: bool, album: &str) -> Result<Query> {
        let album = self.album(album)?;
        let mut clauses = Vec::with_capacity(components.len());
        let mut params = Vec::with_capacity(components.len());
        for component in components {
            let (clause, value) = component_sql(&album, component)?;
            clauses.push(clause);
            params.push(value);
        }

        let clause = if clauses.is_empty() {
            "1".to_string()
        } else {
            clauses.join(if match_all { " AND " } else { " OR " })
        };
        Ok(Query {
            album,
            source: Source::Filter { clause, params },
        })
    }

    pub fn execute(&self, query: &Query) -> ItemCursor<'_> {
        ItemCursor::new(self, query.clone())
    }

    /// Run caller-written SQL against an album.
    ///
    /// Only a single read-only statement whose result has an `id` column is
    /// accepted. Matching ids are loaded as items of `album`.
    pub fn execute_raw_query(&self, album: &str, sql: &str) -> Result<ItemCursor<'_>> {
        let album = self.album(album)?;
        let raw = check_raw_query(self, sql)?;
        tracing::debug!(album = %album.name, sql = %raw, "Raw query");
        Ok(ItemCursor::new(
            self,
            Query {
                album,
                source: Source::Raw(raw),
            },
        ))
    }

    /// Match `term` against every quick-searchable text-like field.
    pub fn quick_search(&self, album: &str, term: &str) -> Result<ItemCursor<'_>> {
        let current = self.album(album)?;
        let components: Vec<QueryComponent> = if term.trim().is_empty() {
            Vec::new()
        } else {
            current
                .fields
                .iter()
                .filter(|f| f.quick_searchable && f.field_type.is_pattern_matchable())
                .map(|f| QueryComponent::new(&f.name, QueryOperator::Like, term.trim()))
                .collect()
        };
        let query = self.build_query(&components, false, album)?;
        Ok(self.execute(&query))
    }

    pub fn select_all(&self, album: &str) -> Result<ItemCursor<'_>> {
        let query = self.build_query(&[], true, album)?;
        Ok(self.execute(&query))
    }
}
