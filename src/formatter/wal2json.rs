//! `wal2json` non-chunked dialect: one complete JSON object per payload
//! (spec.md 4.3.2).

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::{Change, ChangeRecord, Emitted, FullChange, Operation, PkPatterns, Xid};
use crate::errors::{Error, Result};

#[derive(Deserialize)]
struct Envelope {
    xid: Option<Xid>,
    timestamp: Option<String>,
    change: Option<Vec<ChangeRecord>>,
}

pub fn process(
    table_regex: &Regex,
    full_change: bool,
    pk_patterns: &PkPatterns,
    payload: &[u8],
) -> Result<Vec<Emitted>> {
    let text = std::str::from_utf8(payload)?.trim();
    if text.is_empty() || text == "null" {
        return Ok(vec![]);
    }

    let envelope: Envelope = serde_json::from_str(text)?;
    let changes = match envelope.change {
        Some(c) if !c.is_empty() => c,
        _ => return Ok(vec![]),
    };

    // Open Question (i): a missing xid on a payload that does carry row
    // changes is fatal, not a silent carry-forward of a prior value.
    let xid = envelope
        .xid
        .ok_or_else(|| Error::payload("wal2json payload missing xid"))?;
    let timestamp = envelope.timestamp.unwrap_or_default();

    let mut emitted = Vec::new();
    for record in changes {
        // The original matches the table pattern against the bare table name
        // and reserves the qualified name for the PK-pattern lookup.
        if !table_regex.is_match(&record.table) {
            continue;
        }

        if full_change {
            emitted.push(Emitted::FullChange(FullChange {
                xid: xid.clone(),
                timestamp: timestamp.clone(),
                change: record,
            }));
        } else {
            emitted.push(Emitted::Change(compact_change(
                xid.clone(),
                record,
                pk_patterns,
            )?));
        }
    }

    Ok(emitted)
}

fn compact_change(xid: Xid, record: ChangeRecord, pk_patterns: &PkPatterns) -> Result<Change> {
    let operation = record.kind.to_uppercase().parse::<Operation>()?;
    let table = format!("{}.{}", record.schema, record.table);

    let pk_col = pk_patterns
        .pk_column_name(&table)
        .ok_or_else(|| Error::schema(format!("unable to locate table {table}")))?;
    let pk_index = record
        .columnnames
        .iter()
        .position(|c| c == pk_col)
        .ok_or_else(|| Error::schema(format!("unable to locate primary key for {table}")))?;
    let pk_value = stringify(&record.columnvalues[pk_index]);

    Ok(Change {
        xid,
        table,
        operation,
        primary_key_value: pk_value,
    })
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pg::PrimaryKeyEntry;
    use std::collections::HashMap;

    fn empty_catalog() -> PkPatterns {
        PkPatterns::build(&HashMap::new()).unwrap()
    }

    fn catalog_with(table: &str, column: &str) -> PkPatterns {
        let mut m = HashMap::new();
        m.insert(
            table.to_string(),
            PrimaryKeyEntry {
                qualified_table: table.to_string(),
                column_name: column.to_string(),
                column_type: "int4".to_string(),
                ordinal: 1,
            },
        );
        PkPatterns::build(&m).unwrap()
    }

    #[test]
    fn full_change_mode_carries_whole_record() {
        let re = Regex::new(".*").unwrap();
        let patterns = empty_catalog();
        let payload = br#"{
            "xid": 101,
            "timestamp": "2019-09-04 01:27:59.195339+00",
            "change": [
                {"kind": "insert", "schema": "public", "table": "test_table",
                 "columnnames": ["id"], "columntypes": ["int4"], "columnvalues": [1]}
            ]
        }"#;
        let emitted = process(&re, true, &patterns, payload).unwrap();
        assert_eq!(emitted.len(), 1);
        match &emitted[0] {
            Emitted::FullChange(fc) => {
                assert_eq!(fc.xid, Xid::Numeric(101));
                assert_eq!(fc.change.table, "test_table");
            }
            _ => panic!("expected FullChange"),
        }
    }

    #[test]
    fn compact_mode_projects_pk_column_by_name() {
        let re = Regex::new(".*").unwrap();
        let patterns = catalog_with("public.test_table", "id");
        let payload = br#"{
            "xid": 101,
            "timestamp": "t",
            "change": [
                {"kind": "insert", "schema": "public", "table": "test_table",
                 "columnnames": ["other", "id"], "columntypes": ["text", "int4"],
                 "columnvalues": ["x", 7]}
            ]
        }"#;
        let emitted = process(&re, false, &patterns, payload).unwrap();
        match &emitted[0] {
            Emitted::Change(c) => {
                assert_eq!(c.primary_key_value, "7");
                assert_eq!(c.table, "public.test_table");
            }
            _ => panic!("expected Change"),
        }
    }

    #[test]
    fn empty_change_list_emits_nothing() {
        let re = Regex::new(".*").unwrap();
        let patterns = empty_catalog();
        let payload = br#"{"xid": 1, "timestamp": "t", "change": []}"#;
        assert!(process(&re, true, &patterns, payload).unwrap().is_empty());
    }

    #[test]
    fn missing_xid_with_changes_is_fatal() {
        let re = Regex::new(".*").unwrap();
        let patterns = empty_catalog();
        let payload = br#"{"timestamp": "t", "change": [
            {"kind": "insert", "schema": "public", "table": "t",
             "columnnames": ["id"], "columntypes": ["int4"], "columnvalues": [1]}
        ]}"#;
        assert!(process(&re, true, &patterns, payload).is_err());
    }

    #[test]
    fn null_payload_emits_nothing() {
        let re = Regex::new(".*").unwrap();
        let patterns = empty_catalog();
        assert!(process(&re, true, &patterns, b"null").unwrap().is_empty());
    }
}
