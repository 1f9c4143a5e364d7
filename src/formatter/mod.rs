//! Raw plugin payload → structured change → serialized record.
//!
//! Two dialects (`test_decoding`, `wal2json`) share the `Change`/`FullChange`
//! data model; the chunked variant of `wal2json` additionally carries state
//! across calls (§4.3.3).

mod serialize;
mod test_decoding;
mod wal2json;
mod wal2json_chunked;

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::pg::PrimaryKeyEntry;

pub use serialize::Serializer;

pub const VERSION: u32 = 0;
pub const TYPE: &str = "CDC";

/// `test_decoding` xids are the bare string following `BEGIN`; `wal2json`
/// xids are JSON numbers. Both round-trip through serialization as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Xid {
    Text(String),
    Numeric(i64),
}

impl std::fmt::Display for Xid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Xid::Text(s) => write!(f, "{s}"),
            Xid::Numeric(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl std::str::FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "INSERT" => Ok(Operation::Insert),
            "UPDATE" => Ok(Operation::Update),
            "DELETE" => Ok(Operation::Delete),
            other => Err(Error::payload(format!("unknown operation \"{other}\""))),
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        };
        write!(f, "{s}")
    }
}

/// The compact variant: only the primary key is retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub xid: Xid,
    pub table: String,
    pub operation: Operation,
    pub primary_key_value: String,
}

/// The plugin's raw per-row structure, carried verbatim in full-change mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub kind: String,
    pub schema: String,
    pub table: String,
    pub columnnames: Vec<String>,
    pub columntypes: Vec<String>,
    pub columnvalues: Vec<serde_json::Value>,
}

/// The full-row variant: the plugin's change record plus its transaction
/// context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullChange {
    pub xid: Xid,
    pub timestamp: String,
    pub change: ChangeRecord,
}

/// Either shape a dialect can emit from one payload.
#[derive(Debug, Clone)]
pub enum Emitted {
    Change(Change),
    FullChange(FullChange),
}

/// One compiled PK-extraction pattern per table, built once at catalog load
/// (spec.md 4.3.1, 9).
pub struct PkPatterns {
    patterns: HashMap<String, (Regex, String)>,
}

impl PkPatterns {
    pub fn build(catalog: &HashMap<String, PrimaryKeyEntry>) -> Result<Self> {
        let mut patterns = HashMap::new();
        for (qualified_table, entry) in catalog {
            let body = format!(
                r"{}\[{}\]:'?([\w\-]+)'?",
                regex::escape(&entry.column_name),
                regex::escape(&entry.column_type)
            );
            let re = Regex::new(&body)
                .map_err(|e| Error::schema(format!("bad pk pattern for {qualified_table}: {e}")))?;
            patterns.insert(format!("{qualified_table}:"), (re, entry.column_name.clone()));
        }
        Ok(Self { patterns })
    }

    fn get(&self, table_with_colon: &str) -> Option<&(Regex, String)> {
        self.patterns.get(table_with_colon)
    }

    /// Looks up the primary-key column name for `qualified_table` (no
    /// trailing colon), used by dialects that index into a named column
    /// list rather than regex-matching free text.
    pub fn pk_column_name(&self, qualified_table: &str) -> Option<&str> {
        self.patterns
            .get(&format!("{qualified_table}:"))
            .map(|(_, col)| col.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    TestDecoding,
    Wal2Json,
    Wal2JsonChunked,
}

pub struct Formatter {
    dialect: Dialect,
    table_regex: Regex,
    full_change: bool,
    pk_patterns: PkPatterns,
    test_decoding_state: test_decoding::State,
    chunked_state: wal2json_chunked::State,
}

impl Formatter {
    pub fn new(
        dialect: Dialect,
        table_regex: Regex,
        full_change: bool,
        pk_patterns: PkPatterns,
    ) -> Result<Self> {
        if dialect == Dialect::Wal2JsonChunked && !full_change {
            return Err(Error::config(
                "chunk mode requires the full-change flag",
            ));
        }
        if dialect == Dialect::TestDecoding && full_change {
            return Err(Error::config(
                "full-change is not supported with the test_decoding plugin",
            ));
        }
        Ok(Self {
            dialect,
            table_regex,
            full_change,
            pk_patterns,
            test_decoding_state: test_decoding::State::default(),
            chunked_state: wal2json_chunked::State::default(),
        })
    }

    pub fn process(&mut self, payload: &[u8]) -> Result<Vec<Emitted>> {
        match self.dialect {
            Dialect::TestDecoding => test_decoding::process(
                &mut self.test_decoding_state,
                &self.table_regex,
                &self.pk_patterns,
                payload,
            ),
            Dialect::Wal2Json => {
                wal2json::process(&self.table_regex, self.full_change, &self.pk_patterns, payload)
            }
            Dialect::Wal2JsonChunked => {
                wal2json_chunked::process(&mut self.chunked_state, &self.table_regex, payload)
            }
        }
    }
}
