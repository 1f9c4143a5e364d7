//! One-shot primary-key catalog load (spec.md 4.1 PK-Catalog, section 6).

use std::collections::HashMap;

use tracing::info;

use crate::errors::{Error, Result};
use crate::pg::connection::Connection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKeyEntry {
    pub qualified_table: String,
    pub column_name: String,
    pub column_type: String,
    pub ordinal: i32,
}

const PK_SQL: &str = r#"
SELECT
    t.table_schema || '.' || t.table_name AS qualified_table,
    c.column_name,
    c.data_type,
    kcu.ordinal_position
FROM information_schema.tables t
LEFT JOIN information_schema.table_constraints tc
    ON tc.table_catalog = t.table_catalog
    AND tc.table_schema = t.table_schema
    AND tc.table_name = t.table_name
    AND tc.constraint_type = 'PRIMARY KEY'
LEFT JOIN information_schema.key_column_usage kcu
    ON kcu.constraint_catalog = tc.constraint_catalog
    AND kcu.constraint_schema = tc.constraint_schema
    AND kcu.constraint_name = tc.constraint_name
LEFT JOIN information_schema.columns c
    ON c.table_catalog = kcu.table_catalog
    AND c.table_schema = kcu.table_schema
    AND c.table_name = kcu.table_name
    AND c.column_name = kcu.column_name
WHERE t.table_type = 'BASE TABLE'
ORDER BY kcu.ordinal_position;
"#;

/// Loads the primary-key map for every base table. For composite keys, the
/// first (lowest ordinal_position) column wins, per spec.md 6.
pub fn load(conn: &Connection) -> Result<HashMap<String, PrimaryKeyEntry>> {
    info!("loading primary key catalog");
    let result = conn.exec(PK_SQL)?;
    if !result.is_ok() {
        return Err(Error::protocol(format!(
            "failed to load primary key catalog: {}",
            result.error_message().unwrap_or_default()
        )));
    }

    let mut map = HashMap::new();
    for row in 0..result.ntuples() {
        let qualified_table = match result.getvalue(row, 0) {
            Some(v) => v,
            None => continue,
        };
        let column_name = match result.getvalue(row, 1) {
            Some(v) => v,
            None => continue, // no PK on this table
        };
        let column_type = result.getvalue(row, 2).unwrap_or_default();
        let ordinal = result
            .getvalue(row, 3)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        map.entry(qualified_table.clone()).or_insert(PrimaryKeyEntry {
            qualified_table,
            column_name,
            column_type,
            ordinal,
        });
    }

    info!(tables = map.len(), "primary key catalog loaded");
    Ok(map)
}
