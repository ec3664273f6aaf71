//! Compares the live database against the [`SchemaRegistry`].
//!
//! Runs once per open, never per query.

use std::fmt;

use rusqlite::Connection;

use crate::{
  Result,
  schema::{ColumnInfo, SchemaRegistry, TableInfo},
};

/// Why a live database does not match the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaMismatch {
  /// A table is missing or its columns differ. `found` is `None` when the
  /// table does not exist.
  Table {
    table:    String,
    expected: TableInfo,
    found:    Option<TableInfo>,
  },
  /// Structure matches but the stored identity hash does not.
  IdentityHash { expected: String, found: String },
}

impl fmt::Display for SchemaMismatch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SchemaMismatch::Table { table, expected, found } => {
        write!(f, "table {table}: expected {expected}, found ")?;
        match found {
          Some(found) => write!(f, "{found}"),
          None => f.write_str("no table"),
        }
      }
      SchemaMismatch::IdentityHash { expected, found } => {
        write!(f, "identity hash: expected {expected}, found {found}")
      }
    }
  }
}

impl std::error::Error for SchemaMismatch {}

/// Read a table's layout from `PRAGMA table_info`; `None` if it does not
/// exist.
pub fn read_table_info(
  conn: &Connection,
  table: &str,
) -> rusqlite::Result<Option<TableInfo>> {
  let mut stmt = conn.prepare("SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1)")?;
  let columns = stmt
    .query_map(rusqlite::params![table], |row| {
      Ok(ColumnInfo {
        name:     row.get(0)?,
        sql_type: row.get::<_, String>(1)?.to_ascii_uppercase(),
        not_null: row.get(2)?,
        pk:       row.get(3)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  if columns.is_empty() {
    return Ok(None);
  }
  Ok(Some(TableInfo { name: table.to_owned(), columns }))
}

/// Check every registry table's structure, in registry order.
pub fn validate_structure(conn: &Connection, registry: &SchemaRegistry) -> Result<()> {
  for spec in registry.tables {
    let expected = TableInfo::from(spec);
    let found = read_table_info(conn, spec.table.name())?;
    if found.as_ref() != Some(&expected) {
      return Err(
        SchemaMismatch::Table {
          table: spec.table.name().to_owned(),
          expected,
          found,
        }
        .into(),
      );
    }
  }
  Ok(())
}

/// Structural check followed by the identity hash comparison.
///
/// The hash is compared even when every table matches.
pub fn validate(
  conn: &Connection,
  registry: &SchemaRegistry,
  stored_hash: &str,
) -> Result<()> {
  validate_structure(conn, registry)?;

  let expected = registry.identity_hash();
  if stored_hash != expected {
    return Err(
      SchemaMismatch::IdentityHash { expected, found: stored_hash.to_owned() }
        .into(),
    );
  }
  Ok(())
}
