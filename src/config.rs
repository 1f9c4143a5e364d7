//! Command-line configuration: connection parameters, slot/plugin choice,
//! formatter selection, and the cross-field validation that turns
//! incompatible flag combinations into a startup-time `Configuration`
//! error rather than a runtime surprise (spec.md 6, 7).

use std::env;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use regex::Regex;

use crate::errors::{Error, Result};
use crate::formatter::{Dialect, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Plugin {
    TestDecoding,
    Wal2Json,
}

impl Plugin {
    pub fn as_str(self) -> &'static str {
        match self {
            Plugin::TestDecoding => "test_decoding",
            Plugin::Wal2Json => "wal2json",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SerializerArg {
    Csv,
    CsvPayload,
    JsonLine,
    ChunkJsonLine,
}

impl From<SerializerArg> for Serializer {
    fn from(value: SerializerArg) -> Self {
        match value {
            SerializerArg::Csv => Serializer::Csv,
            SerializerArg::CsvPayload => Serializer::CsvPayload,
            SerializerArg::JsonLine => Serializer::JsonLine,
            SerializerArg::ChunkJsonLine => Serializer::ChunkJsonLine,
        }
    }
}

/// Raw CLI surface (spec.md 6 "Control surface"). `Config::from_args`
/// resolves this into the validated, connection-string-ready `Config`.
#[derive(Debug, Parser)]
#[command(name = "pg2kinesis-rs", about = "PostgreSQL logical replication to a managed record-delivery sink")]
pub struct Args {
    /// Database name; ignored if PG2KINESIS_POSTGRES_CONNECTION is set.
    #[arg(long, env = "PG2KINESIS_PG_DBNAME", default_value = "postgres")]
    pub pg_dbname: String,

    #[arg(long, env = "PG2KINESIS_PG_HOST", default_value = "localhost")]
    pub pg_host: String,

    #[arg(long, env = "PG2KINESIS_PG_PORT", default_value_t = 5432)]
    pub pg_port: u16,

    #[arg(long, env = "PG2KINESIS_PG_USER", default_value = "postgres")]
    pub pg_user: String,

    #[arg(long, env = "PG2KINESIS_PG_SSLMODE", default_value = "prefer")]
    pub pg_sslmode: String,

    #[arg(long)]
    pub slot_name: String,

    #[arg(long = "output-plugin", value_enum, default_value = "test-decoding")]
    pub plugin: Plugin,

    #[arg(long = "message-formatter", value_enum, default_value = "csv")]
    pub formatter: SerializerArg,

    /// Regex a change's table name must match to be emitted.
    #[arg(long, default_value = ".*")]
    pub table_pattern: String,

    #[arg(long)]
    pub full_change: bool,

    #[arg(long)]
    pub create_slot: bool,

    #[arg(long)]
    pub recreate_slot: bool,

    #[arg(long = "send-window", default_value_t = 15)]
    pub send_window_secs: u64,

    #[arg(long = "wal2json-write-in-chunks")]
    pub chunk_mode: bool,

    /// Name of the downstream delivery stream.
    #[arg(long)]
    pub stream_name: String,

    /// Ceiling in seconds for the sink's geometric retry backoff.
    #[arg(long = "back-off-limit", default_value_t = 60)]
    pub back_off_limit_secs: u64,
}

pub struct Config {
    pub conninfo: String,
    pub slot_name: String,
    pub plugin: Plugin,
    pub dialect: Dialect,
    pub serializer: Serializer,
    pub table_regex: Regex,
    pub full_change: bool,
    pub create_slot: bool,
    pub recreate_slot: bool,
    pub send_window_secs: u64,
    pub chunk_mode: bool,
    pub stream_name: String,
    pub back_off_limit: Duration,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self> {
        let conninfo = resolve_conninfo(&args);

        let dialect = match (args.plugin, args.chunk_mode) {
            (Plugin::TestDecoding, true) => {
                return Err(Error::config("chunk mode requires the wal2json plugin"));
            }
            (Plugin::TestDecoding, false) => Dialect::TestDecoding,
            (Plugin::Wal2Json, false) => Dialect::Wal2Json,
            (Plugin::Wal2Json, true) => Dialect::Wal2JsonChunked,
        };

        if args.chunk_mode && !args.full_change {
            return Err(Error::config("chunk mode requires the full-change flag"));
        }
        if matches!(args.plugin, Plugin::TestDecoding) && args.full_change {
            return Err(Error::config(
                "full-change is not supported with the test_decoding plugin",
            ));
        }

        let serializer: Serializer = args.formatter.into();
        if args.full_change && !serializer.accepts_full_change() {
            return Err(Error::config(
                "full-change requires a JSON-line serializer",
            ));
        }

        let table_regex = Regex::new(&args.table_pattern)
            .map_err(|e| Error::config(format!("invalid table-pattern regex: {e}")))?;

        Ok(Self {
            conninfo,
            slot_name: args.slot_name,
            plugin: args.plugin,
            dialect,
            serializer,
            table_regex,
            full_change: args.full_change,
            create_slot: args.create_slot,
            recreate_slot: args.recreate_slot,
            send_window_secs: args.send_window_secs,
            chunk_mode: args.chunk_mode,
            stream_name: args.stream_name,
            back_off_limit: Duration::from_secs(args.back_off_limit_secs),
        })
    }
}

/// `PG2KINESIS_POSTGRES_CONNECTION`, when set, supersedes the five
/// individual connection flags with a full DSN (spec.md 6).
fn resolve_conninfo(args: &Args) -> String {
    if let Ok(dsn) = env::var("PG2KINESIS_POSTGRES_CONNECTION") {
        return dsn;
    }
    format!(
        "dbname={} host={} port={} user={} sslmode={}",
        args.pg_dbname, args.pg_host, args.pg_port, args.pg_user, args.pg_sslmode
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args {
            pg_dbname: "postgres".to_string(),
            pg_host: "localhost".to_string(),
            pg_port: 5432,
            pg_user: "postgres".to_string(),
            pg_sslmode: "prefer".to_string(),
            slot_name: "pg2kinesis".to_string(),
            plugin: Plugin::TestDecoding,
            formatter: SerializerArg::Csv,
            table_pattern: ".*".to_string(),
            full_change: false,
            create_slot: false,
            recreate_slot: false,
            send_window_secs: 15,
            chunk_mode: false,
            stream_name: "stream".to_string(),
            back_off_limit_secs: 60,
        }
    }

    #[test]
    fn full_change_with_test_decoding_is_rejected() {
        let mut args = base_args();
        args.full_change = true;
        assert!(Config::from_args(args).is_err());
    }

    #[test]
    fn chunk_mode_without_full_change_is_rejected() {
        let mut args = base_args();
        args.plugin = Plugin::Wal2Json;
        args.chunk_mode = true;
        assert!(Config::from_args(args).is_err());
    }

    #[test]
    fn full_change_with_csv_serializer_is_rejected() {
        let mut args = base_args();
        args.plugin = Plugin::Wal2Json;
        args.full_change = true;
        args.formatter = SerializerArg::Csv;
        assert!(Config::from_args(args).is_err());
    }

    #[test]
    fn wal2json_chunked_with_json_line_is_accepted() {
        let mut args = base_args();
        args.plugin = Plugin::Wal2Json;
        args.chunk_mode = true;
        args.full_change = true;
        args.formatter = SerializerArg::JsonLine;
        let cfg = Config::from_args(args).unwrap();
        assert_eq!(cfg.dialect, Dialect::Wal2JsonChunked);
    }

    #[test]
    fn explicit_dsn_env_var_supersedes_discrete_flags() {
        unsafe {
            env::set_var("PG2KINESIS_POSTGRES_CONNECTION", "postgresql://x/y");
        }
        let args = base_args();
        let cfg = Config::from_args(args).unwrap();
        assert_eq!(cfg.conninfo, "postgresql://x/y");
        unsafe {
            env::remove_var("PG2KINESIS_POSTGRES_CONNECTION");
        }
    }
}
