//! `test_decoding` dialect: line-oriented text payloads (spec.md 4.3.1).

use regex::Regex;

use super::{Change, Emitted, Operation, PkPatterns, Xid};
use crate::errors::{Error, Result};

const IGNORED_CHANGES: &[&str] = &["COMMIT"];

#[derive(Default)]
pub struct State {
    cur_xid: Option<Xid>,
}

pub fn process(
    state: &mut State,
    table_regex: &Regex,
    pk_patterns: &PkPatterns,
    payload: &[u8],
) -> Result<Vec<Emitted>> {
    let text = std::str::from_utf8(payload)?;

    if let Some(xid) = text.strip_prefix("BEGIN ") {
        state.cur_xid = Some(Xid::Text(xid.trim().to_string()));
        return Ok(vec![]);
    }

    if IGNORED_CHANGES.contains(&text) {
        return Ok(vec![]);
    }

    if let Some(rest) = text.strip_prefix("table ") {
        return process_table_change(state, table_regex, pk_patterns, rest);
    }

    Err(Error::payload(format!("unknown change: {text}")))
}

fn process_table_change(
    state: &State,
    table_regex: &Regex,
    pk_patterns: &PkPatterns,
    rest: &str,
) -> Result<Vec<Emitted>> {
    let mut parts = rest.splitn(3, ' ');
    let table_seg = parts.next().unwrap_or_default();
    let op_seg = parts.next().unwrap_or_default();
    let tail = parts.next().unwrap_or_default();

    let table = table_seg.strip_suffix(':').unwrap_or(table_seg);
    let operation_str = op_seg.strip_suffix(':').unwrap_or(op_seg);

    if !table_regex.is_match(table) {
        return Ok(vec![]);
    }

    let lookup_key = format!("{table}:");
    let (pattern, _pk_col) = pk_patterns
        .get(&lookup_key)
        .ok_or_else(|| Error::schema(format!("unable to locate table {table}")))?;

    let captures = pattern
        .captures(tail)
        .ok_or_else(|| Error::schema(format!("unable to locate primary key for {table}")))?;

    let pk_value = captures
        .get(1)
        .ok_or_else(|| Error::schema(format!("unable to locate primary key for {table}")))?
        .as_str()
        .to_string();

    let operation = operation_str.parse::<Operation>()?;

    let xid = state
        .cur_xid
        .clone()
        .ok_or_else(|| Error::payload("row change before any BEGIN"))?;

    Ok(vec![Emitted::Change(Change {
        xid,
        table: table.to_string(),
        operation,
        primary_key_value: pk_value,
    })])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pg::PrimaryKeyEntry;
    use std::collections::HashMap;

    fn catalog() -> HashMap<String, PrimaryKeyEntry> {
        let mut m = HashMap::new();
        m.insert(
            "public.t".to_string(),
            PrimaryKeyEntry {
                qualified_table: "public.t".to_string(),
                column_name: "uuid".to_string(),
                column_type: "uuid".to_string(),
                ordinal: 1,
            },
        );
        m
    }

    #[test]
    fn single_insert_emits_change() {
        let patterns = PkPatterns::build(&catalog()).unwrap();
        let re = Regex::new(".*").unwrap();
        let mut state = State {
            cur_xid: Some(Xid::Text("7".to_string())),
        };
        let payload = b"table public.t: INSERT: uuid[uuid]:'00079f3e-0479-4475-acff-4f225cc5188a' col[text]:'x'";
        let emitted = process(&mut state, &re, &patterns, payload).unwrap();
        assert_eq!(emitted.len(), 1);
        match &emitted[0] {
            Emitted::Change(c) => {
                assert_eq!(c.xid, Xid::Text("7".to_string()));
                assert_eq!(c.table, "public.t");
                assert_eq!(c.operation, Operation::Insert);
                assert_eq!(c.primary_key_value, "00079f3e-0479-4475-acff-4f225cc5188a");
            }
            _ => panic!("expected Change"),
        }
    }

    #[test]
    fn begin_sets_xid_for_subsequent_change() {
        let patterns = PkPatterns::build(&catalog()).unwrap();
        let re = Regex::new(".*").unwrap();
        let mut state = State::default();
        assert!(process(&mut state, &re, &patterns, b"BEGIN 42").unwrap().is_empty());
        let payload = b"table public.t: INSERT: uuid[uuid]:'00079f3e-0479-4475-acff-4f225cc5188a' col[text]:'x'";
        let emitted = process(&mut state, &re, &patterns, payload).unwrap();
        match &emitted[0] {
            Emitted::Change(c) => assert_eq!(c.xid, Xid::Text("42".to_string())),
            _ => panic!("expected Change"),
        }
    }

    #[test]
    fn commit_emits_nothing() {
        let patterns = PkPatterns::build(&catalog()).unwrap();
        let re = Regex::new(".*").unwrap();
        let mut state = State::default();
        assert!(process(&mut state, &re, &patterns, b"COMMIT").unwrap().is_empty());
    }

    #[test]
    fn unknown_directive_is_fatal() {
        let patterns = PkPatterns::build(&catalog()).unwrap();
        let re = Regex::new(".*").unwrap();
        let mut state = State::default();
        assert!(process(&mut state, &re, &patterns, b"GARBAGE").is_err());
    }

    #[test]
    fn missing_table_in_catalog_is_fatal() {
        let patterns = PkPatterns::build(&HashMap::new()).unwrap();
        let re = Regex::new(".*").unwrap();
        let mut state = State {
            cur_xid: Some(Xid::Text("1".to_string())),
        };
        let payload = b"table public.t: INSERT: uuid[uuid]:'x' col[text]:'y'";
        assert!(process(&mut state, &re, &patterns, payload).is_err());
    }
}
