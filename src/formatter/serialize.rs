//! Pure serialization of a `Change`/`FullChange` into the bytes that leave
//! the formatter (spec.md 4.3.4). Four variants, each a pure function.

use serde::Serialize;

use super::{Change, Emitted, FullChange, TYPE, VERSION};
use crate::errors::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Serializer {
    Csv,
    CsvPayload,
    JsonLine,
    ChunkJsonLine,
}

impl Serializer {
    /// Fails at configuration time (spec.md 7) rather than at serialize
    /// time: a non-JSON serializer cannot carry a `FullChange`.
    pub fn accepts_full_change(self) -> bool {
        matches!(self, Serializer::JsonLine | Serializer::ChunkJsonLine)
    }

    pub fn serialize(self, emitted: &Emitted) -> Result<Vec<u8>> {
        match (self, emitted) {
            (Serializer::Csv, Emitted::Change(c)) => Ok(serialize_csv(c).into_bytes()),
            (Serializer::CsvPayload, Emitted::Change(c)) => {
                Ok(serialize_csv_payload(c)?.into_bytes())
            }
            (Serializer::JsonLine, Emitted::Change(c)) => Ok(serialize_json_line(c)?.into_bytes()),
            (Serializer::JsonLine, Emitted::FullChange(fc)) => {
                Ok(serialize_json_line(fc)?.into_bytes())
            }
            (Serializer::ChunkJsonLine, Emitted::FullChange(fc)) => {
                Ok(serialize_json_line(fc)?.into_bytes())
            }
            (Serializer::ChunkJsonLine, Emitted::Change(c)) => {
                Ok(serialize_json_line(c)?.into_bytes())
            }
            (Serializer::Csv, Emitted::FullChange(_))
            | (Serializer::CsvPayload, Emitted::FullChange(_)) => Err(
                crate::errors::Error::config("CSV serializers cannot carry a full change record"),
            ),
        }
    }
}

fn serialize_csv(change: &Change) -> String {
    format!(
        "{VERSION},{TYPE},{},{},{},{}",
        change.xid, change.table, change.operation, change.primary_key_value
    )
}

fn serialize_csv_payload(change: &Change) -> Result<String> {
    let json = serde_json::to_string(change)?;
    Ok(format!("{VERSION},{TYPE},{json}\n"))
}

fn serialize_json_line<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_string(value)?;
    Ok(format!("{json}\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::{Operation, Xid};

    fn sample_change() -> Change {
        Change {
            xid: Xid::Text("7".to_string()),
            table: "public.t".to_string(),
            operation: Operation::Insert,
            primary_key_value: "00079f3e-0479-4475-acff-4f225cc5188a".to_string(),
        }
    }

    #[test]
    fn csv_matches_the_documented_shape() {
        let out = Serializer::Csv.serialize(&Emitted::Change(sample_change())).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "0,CDC,7,public.t,INSERT,00079f3e-0479-4475-acff-4f225cc5188a"
        );
    }

    #[test]
    fn csv_rejects_full_change() {
        assert!(!Serializer::Csv.accepts_full_change());
    }

    #[test]
    fn json_line_ends_with_newline() {
        let out = Serializer::JsonLine
            .serialize(&Emitted::Change(sample_change()))
            .unwrap();
        assert!(String::from_utf8(out).unwrap().ends_with('\n'));
    }
}
