//! Metadata catalogs.
//!
//! A [`Catalog`] stores committed entries and answers [`Query`]s over them.
//! [`SqliteCatalog`] keeps one table with the fixed columns plus a JSON
//! `fields` column; [`MemoryCatalog`] applies the same predicate semantics to
//! an in-process list.

use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::hash::ContentHash;
use crate::query::{Field, Filter, Order, Query, RowRef, sort_compare, validate_identifier};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params, params_from_iter};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// Contract the lake needs from a metadata catalog.
pub trait Catalog {
    /// Insert all entries or none of them. Every entry must be committed.
    fn insert_many<M: Serialize>(&self, entries: &[Entry<M>]) -> Result<()>;

    /// Return the entries matching `query`.
    fn query<M: DeserializeOwned>(&self, query: &Query) -> Result<Vec<Entry<M>>>;
}

/// An entry flattened into catalog columns.
#[derive(Debug, Clone, PartialEq)]
struct Row {
    content_hash: String,
    file_extension: String,
    fields: Value,
}

impl Row {
    fn from_entry<M: Serialize>(entry: &Entry<M>) -> Result<Self> {
        let hash = entry
            .content_hash()
            .ok_or_else(|| Error::not_committed(entry.file_extension()))?;
        Ok(Self {
            content_hash: hash.to_b32(),
            file_extension: entry.file_extension().to_string(),
            fields: serde_json::to_value(entry.fields())?,
        })
    }

    fn as_ref(&self) -> RowRef<'_> {
        RowRef {
            content_hash: &self.content_hash,
            file_extension: &self.file_extension,
            fields: &self.fields,
        }
    }

    fn into_entry<M: DeserializeOwned>(self) -> Result<Entry<M>> {
        let hash = ContentHash::from_b32(&self.content_hash)
            .map_err(|e| Error::catalog_query(format!("Corrupt content_hash column: {}", e)))?;
        let fields = serde_json::from_value(self.fields)?;
        Ok(Entry::committed(hash, self.file_extension, fields))
    }
}

/// Catalog backed by a SQLite database.
#[derive(Debug)]
pub struct SqliteCatalog {
    conn: Connection,
    table: String,
}

impl SqliteCatalog {
    /// Open (or create) a catalog database file using `table`.
    pub fn open<P: AsRef<Path>>(path: P, table: &str) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            Error::catalog_write(format!(
                "Failed to open catalog at {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_connection(conn, table)
    }

    /// Create a catalog that lives only as long as this value.
    pub fn open_in_memory(table: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::catalog_write(format!("Failed to open catalog: {}", e)))?;
        Self::from_connection(conn, table)
    }

    fn from_connection(conn: Connection, table: &str) -> Result<Self> {
        validate_identifier(table)?;
        let catalog = Self {
            conn,
            table: table.to_string(),
        };
        catalog.init_schema()?;
        Ok(catalog)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS "{table}" (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    content_hash TEXT NOT NULL,
                    file_extension TEXT NOT NULL,
                    fields TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS "{table}_content_hash" ON "{table}"(content_hash);
                "#,
                table = self.table
            ))
            .map_err(|e| Error::catalog_write(format!("Failed to initialize schema: {}", e)))
    }

    /// Require a caller field to be unique across the catalog, like a primary key.
    ///
    /// Entries without the field are not constrained.
    pub fn with_unique_field(self, field: &str) -> Result<Self> {
        validate_identifier(field)?;
        self.conn
            .execute_batch(&format!(
                r#"CREATE UNIQUE INDEX IF NOT EXISTS "{table}_{field}_unique"
                   ON "{table}"(json_extract(fields, '$.{field}'));"#,
                table = self.table,
                field = field
            ))
            .map_err(|e| {
                Error::catalog_write(format!("Failed to create unique index on {}: {}", field, e))
            })?;
        Ok(self)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Number of rows in the catalog table.
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(
                &format!(r#"SELECT COUNT(*) FROM "{}""#, self.table),
                [],
                |row| row.get(0),
            )
            .map_err(|e| Error::catalog_query(e.to_string()))?;
        Ok(count as usize)
    }
}

fn column_sql(field: &Field) -> String {
    match field {
        Field::ContentHash => "content_hash".to_string(),
        Field::FileExtension => "file_extension".to_string(),
        Field::Named(name) => format!("json_extract(fields, '$.{}')", name),
    }
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn filter_sql(filter: &Filter, params: &mut Vec<SqlValue>) -> String {
    match filter {
        Filter::Compare { field, op, value } => {
            params.push(to_sql_value(value));
            format!("{} {} ?", column_sql(field), op.as_sql())
        }
        Filter::And(filters) if filters.is_empty() => "1".to_string(),
        Filter::Or(filters) if filters.is_empty() => "0".to_string(),
        Filter::And(filters) => join_sql(filters, " AND ", params),
        Filter::Or(filters) => join_sql(filters, " OR ", params),
        Filter::Not(inner) => format!("NOT ({})", filter_sql(inner, params)),
    }
}

fn join_sql(filters: &[Filter], separator: &str, params: &mut Vec<SqlValue>) -> String {
    let parts: Vec<String> = filters
        .iter()
        .map(|f| format!("({})", filter_sql(f, params)))
        .collect();
    parts.join(separator)
}

impl SqliteCatalog {
    fn select_sql(&self, query: &Query) -> (String, Vec<SqlValue>) {
        let mut sql = format!(
            r#"SELECT content_hash, file_extension, fields FROM "{}""#,
            self.table
        );
        let mut params = Vec::new();

        if let Some(filter) = query.filter_ref() {
            sql.push_str(" WHERE ");
            sql.push_str(&filter_sql(filter, &mut params));
        }

        let mut order: Vec<String> = query
            .ordering()
            .iter()
            .map(|(field, order)| {
                let direction = match order {
                    Order::Asc => "ASC",
                    Order::Desc => "DESC",
                };
                format!("{} {}", column_sql(field), direction)
            })
            .collect();
        order.push("id ASC".to_string());
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));

        if let Some(limit) = query.limit_value() {
            sql.push_str(" LIMIT ?");
            params.push(SqlValue::Integer(limit as i64));
        }

        (sql, params)
    }
}

impl Catalog for SqliteCatalog {
    fn insert_many<M: Serialize>(&self, entries: &[Entry<M>]) -> Result<()> {
        let rows = entries
            .iter()
            .map(Row::from_entry)
            .collect::<Result<Vec<_>>>()?;

        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| Error::catalog_write(format!("Failed to begin transaction: {}", e)))?;
        {
            let mut stmt = tx
                .prepare(&format!(
                    r#"INSERT INTO "{}" (content_hash, file_extension, fields) VALUES (?1, ?2, ?3)"#,
                    self.table
                ))
                .map_err(|e| Error::catalog_write(e.to_string()))?;
            for row in &rows {
                stmt.execute(params![row.content_hash, row.file_extension, row.fields.to_string()])
                    .map_err(|e| Error::catalog_write(e.to_string()))?;
            }
        }
        // Dropping an uncommitted transaction rolls it back
        tx.commit()
            .map_err(|e| Error::catalog_write(format!("Failed to commit: {}", e)))
    }

    fn query<M: DeserializeOwned>(&self, query: &Query) -> Result<Vec<Entry<M>>> {
        query.validate()?;
        let (sql, params) = self.select_sql(query);

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| Error::catalog_query(e.to_string()))?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| Error::catalog_query(e.to_string()))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::catalog_query(e.to_string()))?;

        rows.into_iter()
            .map(|(content_hash, file_extension, fields)| {
                Row {
                    content_hash,
                    file_extension,
                    fields: serde_json::from_str(&fields)?,
                }
                .into_entry()
            })
            .collect()
    }
}

/// Catalog held in memory, in insertion order.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    rows: Mutex<Vec<Row>>,
    unique_fields: Vec<String>,
    fail_inserts: AtomicBool,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a caller field to be unique across the catalog.
    pub fn with_unique_field(mut self, field: &str) -> Result<Self> {
        validate_identifier(field)?;
        self.unique_fields.push(field.to_string());
        Ok(self)
    }

    /// Make every subsequent insert fail (or succeed again).
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_unique(&self, existing: &[Row], batch: &[Row]) -> Result<()> {
        for field in &self.unique_fields {
            let key = Field::named(field.as_str());
            let mut seen: Vec<Value> = Vec::new();
            for row in existing.iter().chain(batch) {
                let value = key.value_of(&row.as_ref());
                if value.is_null() {
                    continue;
                }
                if seen
                    .iter()
                    .any(|v| sort_compare(v, &value) == std::cmp::Ordering::Equal)
                {
                    return Err(Error::catalog_write(format!(
                        "UNIQUE constraint failed: {} = {}",
                        field, value
                    )));
                }
                seen.push(value);
            }
        }
        Ok(())
    }
}

impl Catalog for MemoryCatalog {
    fn insert_many<M: Serialize>(&self, entries: &[Entry<M>]) -> Result<()> {
        let batch = entries
            .iter()
            .map(Row::from_entry)
            .collect::<Result<Vec<_>>>()?;

        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(Error::catalog_write("injected insert failure"));
        }

        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        self.check_unique(&rows, &batch)?;
        rows.extend(batch);
        Ok(())
    }

    fn query<M: DeserializeOwned>(&self, query: &Query) -> Result<Vec<Entry<M>>> {
        query.validate()?;

        let mut matched: Vec<Row> = {
            let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
            rows.iter()
                .filter(|row| {
                    query
                        .filter_ref()
                        .is_none_or(|filter| filter.matches(&row.as_ref()))
                })
                .cloned()
                .collect()
        };

        // Stable sort keeps insertion order among ties
        if !query.ordering().is_empty() {
            matched.sort_by(|a, b| {
                for (field, order) in query.ordering() {
                    let ord = sort_compare(&field.value_of(&a.as_ref()), &field.value_of(&b.as_ref()));
                    let ord = match order {
                        Order::Asc => ord,
                        Order::Desc => ord.reverse(),
                    };
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
        }

        if let Some(limit) = query.limit_value() {
            matched.truncate(limit);
        }

        matched.into_iter().map(Row::into_entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Fields;
    use serde::Deserialize;
    use serde_json::json;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct File {
        name: String,
        size: u64,
    }

    fn committed(name: &str, size: u64) -> Entry<File> {
        let mut entry = Entry::new(
            ".txt",
            File {
                name: name.to_string(),
                size,
            },
        );
        entry.set_content_hash(ContentHash::hash_bytes(name.as_bytes()));
        entry
    }

    fn sample() -> Vec<Entry<File>> {
        vec![committed("b", 20), committed("a", 10), committed("c", 30)]
    }

    /// Runs the same assertions against both catalog implementations.
    fn check_query_semantics<C: Catalog>(catalog: &C) {
        catalog.insert_many(&sample()).unwrap();

        let all: Vec<Entry<File>> = catalog.query(&Query::all()).unwrap();
        let names: Vec<_> = all.iter().map(|e| e.fields().name.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);

        let hit: Vec<Entry<File>> = catalog.query(&Query::all().where_eq("name", "a")).unwrap();
        assert_eq!(hit, vec![committed("a", 10)]);

        let big: Vec<Entry<File>> = catalog
            .query(
                &Query::all()
                    .filter(Filter::ge("size", 20))
                    .order_by("size", Order::Desc),
            )
            .unwrap();
        let names: Vec<_> = big.iter().map(|e| e.fields().name.as_str()).collect();
        assert_eq!(names, vec!["c", "b"]);

        let limited: Vec<Entry<File>> = catalog
            .query(&Query::all().order_by("name", Order::Asc).limit(2))
            .unwrap();
        let names: Vec<_> = limited.iter().map(|e| e.fields().name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);

        let by_hash: Vec<Entry<File>> = catalog
            .query(&Query::all().where_eq(
                Field::ContentHash,
                ContentHash::hash_bytes(b"c").to_b32(),
            ))
            .unwrap();
        assert_eq!(by_hash.len(), 1);
        assert_eq!(by_hash[0].fields().name, "c");

        let negated: Vec<Entry<File>> = catalog
            .query(&Query::all().filter(Filter::eq("name", "a").or(Filter::eq("name", "b")).not()))
            .unwrap();
        assert_eq!(negated.len(), 1);

        let missing: Vec<Entry<File>> = catalog
            .query(&Query::all().filter(Filter::ne("colour", "red")))
            .unwrap();
        assert!(missing.is_empty());

        assert!(matches!(
            catalog.query::<File>(&Query::all().where_eq("na me", "a")),
            Err(Error::InvalidQuery { .. })
        ));
    }

    #[test]
    fn test_sqlite_query_semantics() {
        let catalog = SqliteCatalog::open_in_memory("entries").unwrap();
        check_query_semantics(&catalog);
        assert_eq!(catalog.count().unwrap(), 3);
    }

    #[test]
    fn test_memory_query_semantics() {
        let catalog = MemoryCatalog::new();
        check_query_semantics(&catalog);
        assert_eq!(catalog.len(), 3);
    }

    fn check_unique_is_all_or_nothing<C: Catalog>(catalog: &C) {
        catalog.insert_many(&[committed("a", 1)]).unwrap();

        let err = catalog
            .insert_many(&[committed("z", 2), committed("a", 3)])
            .unwrap_err();
        assert!(matches!(err, Error::CatalogWrite { .. }));

        // "z" must not have been inserted
        let all: Vec<Entry<File>> = catalog.query(&Query::all()).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_sqlite_unique_field() {
        let catalog = SqliteCatalog::open_in_memory("entries")
            .unwrap()
            .with_unique_field("name")
            .unwrap();
        check_unique_is_all_or_nothing(&catalog);
    }

    #[test]
    fn test_memory_unique_field() {
        let catalog = MemoryCatalog::new().with_unique_field("name").unwrap();
        check_unique_is_all_or_nothing(&catalog);
    }

    #[test]
    fn test_insert_uncommitted_rejected() {
        let catalog = SqliteCatalog::open_in_memory("entries").unwrap();
        let entry = Entry::new(".txt", Fields::new());
        let err = catalog.insert_many(&[entry]).unwrap_err();
        assert!(err.is_usage());
        assert_eq!(catalog.count().unwrap(), 0);
    }

    #[test]
    fn test_sqlite_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("catalog.sqlite");

        {
            let catalog = SqliteCatalog::open(&path, "files").unwrap();
            catalog.insert_many(&sample()).unwrap();
        }

        let catalog = SqliteCatalog::open(&path, "files").unwrap();
        let entries: Vec<Entry<Fields>> = catalog.query(&Query::all()).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].fields().get("name"), Some(&json!("b")));
        assert!(entries.iter().all(Entry::is_committed));
    }

    #[test]
    fn test_sqlite_rejects_bad_table_name() {
        assert!(SqliteCatalog::open_in_memory("drop table").is_err());
    }

    #[test]
    fn test_memory_injected_failure() {
        let catalog = MemoryCatalog::new();
        catalog.fail_inserts(true);
        assert!(catalog.insert_many(&sample()).is_err());
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_select_sql_shape() {
        let catalog = SqliteCatalog::open_in_memory("entries").unwrap();
        let (sql, params) = catalog.select_sql(
            &Query::all()
                .where_eq("name", "3")
                .order_by("name", Order::Asc)
                .limit(1),
        );
        assert_eq!(
            sql,
            r#"SELECT content_hash, file_extension, fields FROM "entries" WHERE json_extract(fields, '$.name') = ? ORDER BY json_extract(fields, '$.name') ASC, id ASC LIMIT ?"#
        );
        assert_eq!(params.len(), 2);
    }
}
