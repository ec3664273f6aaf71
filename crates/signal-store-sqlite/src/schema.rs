//! The schema registry: the compiled expectation every opened store is
//! checked against.
//!
//! The registry is immutable for the life of a build. Changing any table
//! layout changes [`SchemaRegistry::identity_hash`] and requires bumping
//! [`SCHEMA_VERSION`] together with a [`Migration`](crate::lifecycle::Migration).

use std::fmt;

use rusqlite::Connection;
use sha2::{Digest, Sha256};
use signal_core::policy::Table;

/// Current schema version. No migrations exist yet.
pub const SCHEMA_VERSION: i64 = 1;

/// One-row bookkeeping table holding the version and identity hash.
pub const MASTER_TABLE: &str = "store_master";

const MASTER_DDL: &str = "
CREATE TABLE IF NOT EXISTS store_master (
    id            INTEGER PRIMARY KEY CHECK (id = 1),
    version       INTEGER NOT NULL,
    identity_hash TEXT    NOT NULL
)";

// ─── Declarations ────────────────────────────────────────────────────────────

/// A column as declared by the registry.
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
  pub name:     &'static str,
  pub sql_type: &'static str,
  pub not_null: bool,
  /// 1-based position in the primary key, 0 if not part of it.
  pub pk:       u32,
}

/// A table as declared by the registry.
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
  pub table:   Table,
  pub ddl:     &'static str,
  pub columns: &'static [ColumnSpec],
}

const fn col(
  name: &'static str,
  sql_type: &'static str,
  not_null: bool,
  pk: u32,
) -> ColumnSpec {
  ColumnSpec { name, sql_type, not_null, pk }
}

const TABLES: &[TableSpec] = &[
  TableSpec {
    table:   Table::Watchlist,
    ddl:     "CREATE TABLE IF NOT EXISTS watchlist (
                symbol  TEXT    NOT NULL PRIMARY KEY,
                addedAt INTEGER NOT NULL
              )",
    columns: &[
      col("symbol", "TEXT", true, 1),
      col("addedAt", "INTEGER", true, 0),
    ],
  },
  // Append-only. AUTOINCREMENT keeps ids from being reused after deletes.
  TableSpec {
    table:   Table::AnalysisHistory,
    ddl:     "CREATE TABLE IF NOT EXISTS analysis_history (
                id          INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
                generatedAt INTEGER NOT NULL,
                intent      TEXT    NOT NULL,
                setupsJson  TEXT    NOT NULL
              )",
    columns: &[
      col("id", "INTEGER", true, 1),
      col("generatedAt", "INTEGER", true, 0),
      col("intent", "TEXT", true, 0),
      col("setupsJson", "TEXT", true, 0),
    ],
  },
  TableSpec {
    table:   Table::AiSummaries,
    ddl:     "CREATE TABLE IF NOT EXISTS ai_summaries (
                symbol      TEXT    NOT NULL PRIMARY KEY,
                summary     TEXT    NOT NULL,
                risksJson   TEXT    NOT NULL,
                verdict     TEXT    NOT NULL,
                generatedAt INTEGER NOT NULL
              )",
    columns: &[
      col("symbol", "TEXT", true, 1),
      col("summary", "TEXT", true, 0),
      col("risksJson", "TEXT", true, 0),
      col("verdict", "TEXT", true, 0),
      col("generatedAt", "INTEGER", true, 0),
    ],
  },
];

// ─── Comparable table layout ─────────────────────────────────────────────────

/// A column as seen either in the registry or in `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
  pub name:     String,
  pub sql_type: String,
  pub not_null: bool,
  pub pk:       u32,
}

/// A table layout. Column order does not affect equality.
#[derive(Debug, Clone)]
pub struct TableInfo {
  pub name:    String,
  pub columns: Vec<ColumnInfo>,
}

impl TableInfo {
  fn sorted_columns(&self) -> Vec<&ColumnInfo> {
    let mut cols: Vec<&ColumnInfo> = self.columns.iter().collect();
    cols.sort_by(|a, b| a.name.cmp(&b.name));
    cols
  }
}

impl PartialEq for TableInfo {
  fn eq(&self, other: &Self) -> bool {
    self.name == other.name && self.sorted_columns() == other.sorted_columns()
  }
}

impl Eq for TableInfo {}

impl fmt::Display for TableInfo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}(", self.name)?;
    for (i, c) in self.columns.iter().enumerate() {
      if i > 0 {
        f.write_str(", ")?;
      }
      write!(f, "{} {}", c.name, c.sql_type)?;
      if c.not_null {
        f.write_str(" NOT NULL")?;
      }
      if c.pk > 0 {
        write!(f, " PK{}", c.pk)?;
      }
    }
    f.write_str(")")
  }
}

impl From<&TableSpec> for TableInfo {
  fn from(spec: &TableSpec) -> Self {
    TableInfo {
      name:    spec.table.name().to_owned(),
      columns: spec
        .columns
        .iter()
        .map(|c| ColumnInfo {
          name:     c.name.to_owned(),
          sql_type: c.sql_type.to_owned(),
          not_null: c.not_null,
          pk:       c.pk,
        })
        .collect(),
    }
  }
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// The full set of tables a store of [`SCHEMA_VERSION`] contains.
#[derive(Debug, Clone, Copy)]
pub struct SchemaRegistry {
  pub version: i64,
  pub tables:  &'static [TableSpec],
}

impl SchemaRegistry {
  pub fn current() -> Self {
    Self { version: SCHEMA_VERSION, tables: TABLES }
  }

  pub fn table_names(&self) -> impl Iterator<Item = Table> + '_ {
    self.tables.iter().map(|t| t.table)
  }

  pub fn expected(&self, table: Table) -> Option<TableInfo> {
    self
      .tables
      .iter()
      .find(|t| t.table == table)
      .map(TableInfo::from)
  }

  /// SHA-256 over a canonical rendering of every table and its conflict
  /// policy, hex encoded.
  pub fn identity_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.version.to_le_bytes());
    for spec in self.tables {
      hasher.update(spec.table.name().as_bytes());
      hasher.update([0u8]);
      hasher.update(spec.table.insert_policy().sql_verb().as_bytes());
      hasher.update([0u8]);
      for c in spec.columns {
        hasher.update(c.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(c.sql_type.as_bytes());
        hasher.update([u8::from(c.not_null)]);
        hasher.update(c.pk.to_le_bytes());
      }
      hasher.update([0xffu8]);
    }
    hex::encode(hasher.finalize())
  }

  /// Create every table plus the bookkeeping row.
  pub fn create_all(&self, conn: &Connection) -> rusqlite::Result<()> {
    for spec in self.tables {
      conn.execute_batch(spec.ddl)?;
    }
    conn.execute_batch(MASTER_DDL)?;
    write_master(conn, self.version, &self.identity_hash())
  }

  /// Drop every registry table and the bookkeeping row.
  pub fn drop_all(&self, conn: &Connection) -> rusqlite::Result<()> {
    for spec in self.tables {
      conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", spec.table.name()))?;
    }
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {MASTER_TABLE}"))
  }
}

// ─── Bookkeeping ─────────────────────────────────────────────────────────────

/// The persisted bookkeeping row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterRecord {
  pub version:       i64,
  pub identity_hash: String,
}

pub fn write_master(
  conn: &Connection,
  version: i64,
  identity_hash: &str,
) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT OR REPLACE INTO store_master (id, version, identity_hash) VALUES (1, ?1, ?2)",
    rusqlite::params![version, identity_hash],
  )?;
  Ok(())
}

/// Read the bookkeeping row; `None` if the table or the row is absent.
pub fn read_master(conn: &Connection) -> rusqlite::Result<Option<MasterRecord>> {
  use rusqlite::OptionalExtension as _;

  let has_table: bool = conn
    .query_row(
      "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
      rusqlite::params![MASTER_TABLE],
      |_| Ok(true),
    )
    .optional()?
    .unwrap_or(false);

  if !has_table {
    return Ok(None);
  }

  conn
    .query_row(
      "SELECT version, identity_hash FROM store_master WHERE id = 1",
      [],
      |row| {
        Ok(MasterRecord { version: row.get(0)?, identity_hash: row.get(1)? })
      },
    )
    .optional()
}
