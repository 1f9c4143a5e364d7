//! `wal2json` chunked dialect: one byte-chunk of an open transaction per
//! payload (spec.md 4.3.3). Full-change mode only; compact mode is rejected
//! at construction in `Formatter::new`.

use regex::Regex;
use serde::Deserialize;

use super::{ChangeRecord, Emitted, FullChange, Xid};
use crate::errors::{Error, Result};

#[derive(Default)]
pub struct State {
    cur_xid: Option<Xid>,
    cur_timestamp: Option<String>,
    in_transaction: bool,
}

#[derive(Deserialize)]
struct Header {
    xid: Xid,
    timestamp: String,
}

pub fn process(state: &mut State, table_regex: &Regex, payload: &[u8]) -> Result<Vec<Emitted>> {
    let text = std::str::from_utf8(payload)?;

    if let Some(body) = text.strip_prefix(r#"{"xid":"#) {
        require(!state.in_transaction, "transaction header")?;
        let reconstructed = format!(r#"{{"xid":{body}]}}"#);
        let header: Header = serde_json::from_str(&reconstructed)?;
        state.cur_xid = Some(header.xid);
        state.cur_timestamp = Some(header.timestamp);
        state.in_transaction = true;
        return Ok(vec![]);
    }

    if text == "]}" {
        require(state.in_transaction, "transaction footer")?;
        state.cur_xid = None;
        state.cur_timestamp = None;
        state.in_transaction = false;
        return Ok(vec![]);
    }

    if let Some(body) = text.strip_prefix(',') {
        require(state.in_transaction, "subsequent row element")?;
        return parse_row(state, table_regex, body);
    }

    if text.starts_with('{') {
        require(state.in_transaction, "first row element")?;
        return parse_row(state, table_regex, text);
    }

    Ok(vec![])
}

fn parse_row(state: &State, table_regex: &Regex, text: &str) -> Result<Vec<Emitted>> {
    let record: ChangeRecord = serde_json::from_str(text)?;
    // Matched against the bare table name, matching the original's
    // table_re.search(change['table']); the qualified name is only used
    // where a PK-pattern lookup needs it.
    if !table_regex.is_match(&record.table) {
        return Ok(vec![]);
    }

    let xid = state
        .cur_xid
        .clone()
        .ok_or_else(|| Error::payload("chunked row outside a transaction"))?;
    let timestamp = state.cur_timestamp.clone().unwrap_or_default();

    Ok(vec![Emitted::FullChange(FullChange {
        xid,
        timestamp,
        change: record,
    })])
}

fn require(condition: bool, what: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(Error::payload(format!(
            "invalid chunk state transition at {what}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(table: &str, value: &str) -> String {
        format!(
            r#"{{"kind":"insert","schema":"public","table":"{table}","columnnames":["v"],"columntypes":["text"],"columnvalues":["{value}"]}}"#
        )
    }

    #[test]
    fn header_body_body_footer_yields_two_full_changes() {
        let re = Regex::new(".*").unwrap();
        let mut state = State::default();

        let header =
            br#"{"xid": 101, "timestamp": "2019-09-04 01:27:59.195339+00", "change": ["#;
        assert!(process(&mut state, &re, header).unwrap().is_empty());
        assert!(state.in_transaction);

        let first = row("test_table", "A");
        let emitted_a = process(&mut state, &re, first.as_bytes()).unwrap();
        assert_eq!(emitted_a.len(), 1);

        let second = format!(",{}", row("test_table", "B"));
        let emitted_b = process(&mut state, &re, second.as_bytes()).unwrap();
        assert_eq!(emitted_b.len(), 1);

        for emitted in [&emitted_a, &emitted_b] {
            match &emitted[0] {
                Emitted::FullChange(fc) => assert_eq!(fc.xid, Xid::Numeric(101)),
                _ => panic!("expected FullChange"),
            }
        }

        assert!(process(&mut state, &re, b"]}").unwrap().is_empty());
        assert!(!state.in_transaction);
        assert!(state.cur_xid.is_none());
    }

    #[test]
    fn header_while_already_in_transaction_is_fatal() {
        let re = Regex::new(".*").unwrap();
        let mut state = State {
            cur_xid: Some(Xid::Numeric(1)),
            cur_timestamp: Some("t".to_string()),
            in_transaction: true,
        };
        let header = br#"{"xid": 2, "timestamp": "t", "change": ["#;
        assert!(process(&mut state, &re, header).is_err());
    }

    #[test]
    fn row_outside_transaction_is_fatal() {
        let re = Regex::new(".*").unwrap();
        let mut state = State::default();
        let first = row("test_table", "A");
        assert!(process(&mut state, &re, first.as_bytes()).is_err());
    }

    #[test]
    fn footer_outside_transaction_is_fatal() {
        let re = Regex::new(".*").unwrap();
        let mut state = State::default();
        assert!(process(&mut state, &re, b"]}").is_err());
    }

    #[test]
    fn non_matching_table_is_dropped() {
        let re = Regex::new("^public\\.keep$").unwrap();
        let mut state = State::default();
        let header = br#"{"xid": 1, "timestamp": "t", "change": ["#;
        process(&mut state, &re, header).unwrap();
        let first = row("skip_me", "A");
        assert!(process(&mut state, &re, first.as_bytes()).unwrap().is_empty());
    }
}
