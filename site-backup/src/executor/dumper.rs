//! Table-at-a-time SQL dump of the site database.
//!
//! The dump file grows by one table per invocation. Like the staging tar it
//! is reopened at its committed length each time, so output from a table that
//! failed halfway never reaches the archive.

use super::staging::{open_at_committed, StagingArea};
use crate::models::BackupJob;
use crate::{BackupError, Result};
use chrono::Utc;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::io::{BufWriter, Seek, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableReport {
    pub table: Option<String>,
    pub rows: u64,
    pub failed: bool,
    pub done: bool,
}

pub struct DatabaseDumper {
    conn: Connection,
}

impl DatabaseDumper {
    /// Open the site database read-only.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self { conn })
    }

    /// User tables in name order.
    pub fn list_tables(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND substr(name, 1, 7) <> 'sqlite_'
             ORDER BY name",
        )?;
        let tables = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tables)
    }

    /// Write the statements recreating `table` and its rows. Returns the row count.
    ///
    /// Write failures surface as `BackupError::Io`; everything else is a read failure.
    pub fn dump_table<W: Write>(&self, table: &str, out: &mut W) -> Result<u64> {
        let create_sql: String = self.conn.query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )?;
        let quoted = quote_identifier(table);

        writeln!(out, "-- Table: {}", quoted)?;
        writeln!(out, "DROP TABLE IF EXISTS {};", quoted)?;
        writeln!(out, "{};", create_sql)?;

        let mut stmt = self.conn.prepare(&format!("SELECT * FROM {}", quoted))?;
        let columns = stmt.column_count();
        let mut rows = stmt.query([])?;
        let mut count = 0u64;
        let mut line = String::new();
        while let Some(row) = rows.next()? {
            line.clear();
            line.push_str("INSERT INTO ");
            line.push_str(&quoted);
            line.push_str(" VALUES(");
            for i in 0..columns {
                if i > 0 {
                    line.push(',');
                }
                line.push_str(&sql_literal(row.get_ref(i)?));
            }
            line.push_str(");\n");
            out.write_all(line.as_bytes())?;
            count += 1;
        }

        let mut stmt = self.conn.prepare(
            "SELECT sql FROM sqlite_master
             WHERE tbl_name = ?1 AND type IN ('index', 'trigger') AND sql IS NOT NULL
             ORDER BY type, name",
        )?;
        let extras = stmt
            .query_map(params![table], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for sql in extras {
            writeln!(out, "{};", sql)?;
        }
        if let Some(seq) = self.autoincrement_seq(table)? {
            let name = sql_literal(ValueRef::Text(table.as_bytes()));
            writeln!(out, "DELETE FROM sqlite_sequence WHERE name = {};", name)?;
            writeln!(out, "INSERT INTO sqlite_sequence(name, seq) VALUES({}, {});", name, seq)?;
        }
        writeln!(out)?;
        Ok(count)
    }

    /// The AUTOINCREMENT high-water mark of `table`, if it has one.
    fn autoincrement_seq(&self, table: &str) -> Result<Option<i64>> {
        let has_sequence: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'sqlite_sequence')",
            [],
            |row| row.get(0),
        )?;
        if !has_sequence {
            return Ok(None);
        }
        let seq = self
            .conn
            .query_row(
                "SELECT seq FROM sqlite_sequence WHERE name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(seq)
    }

    /// Dump the next table of the job, enumerating tables first if needed.
    pub fn process_table(&self, job: &mut BackupJob, staging: &StagingArea) -> Result<TableReport> {
        let dump_path = staging.dump_path();

        if !job.tables_indexed {
            let tables = self.list_tables()?;
            staging.write_table_list(&tables)?;

            let mut file = open_at_committed(&dump_path, 0)?;
            writeln!(file, "-- site-backup database dump")?;
            writeln!(file, "-- Generated: {}", Utc::now().to_rfc3339())?;
            writeln!(file)?;
            file.sync_all()?;

            job.dump_offset = file.stream_position()?;
            job.total_tables = tables.len() as u64;
            job.tables_indexed = true;
            info!(job_id = %job.id, total_tables = job.total_tables, "Indexed database tables");
        }

        if job.processed_tables >= job.total_tables {
            return Ok(TableReport {
                done: true,
                ..Default::default()
            });
        }

        let tables = staging.read_table_list()?;
        let Some(table) = tables.get(job.processed_tables as usize).cloned() else {
            return Err(BackupError::Archive(format!(
                "Table list for {} is shorter than recorded ({} tables)",
                job.id, job.total_tables
            )));
        };

        let mut out = BufWriter::new(open_at_committed(&dump_path, job.dump_offset)?);
        let mut report = TableReport {
            table: Some(table.clone()),
            ..Default::default()
        };

        match self.dump_table(&table, &mut out) {
            Ok(rows) => {
                let mut file = out.into_inner().map_err(|e| e.into_error())?;
                file.sync_all()?;
                job.dump_offset = file.stream_position()?;
                report.rows = rows;
                debug!(job_id = %job.id, table = %table, rows, "Dumped table");
            }
            Err(BackupError::Io(e)) => return Err(BackupError::Io(e)),
            Err(e) => {
                drop(out);
                // Discard whatever part of the table made it to disk
                open_at_committed(&dump_path, job.dump_offset)?;
                let message = format!("Failed to dump table {}: {}", table, e);
                warn!(job_id = %job.id, table = %table, error = %e, "Skipping table");
                job.record_error(message);
                report.failed = true;
            }
        }

        job.processed_tables += 1;
        report.done = job.processed_tables >= job.total_tables;
        Ok(report)
    }
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Render a stored value as a SQL literal that reads back identically.
pub fn sql_literal(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => real_literal(f),
        ValueRef::Text(bytes) => text_literal(bytes),
        ValueRef::Blob(bytes) => format!("X'{}'", hex::encode(bytes)),
    }
}

fn real_literal(f: f64) -> String {
    if f.is_nan() {
        "NULL".to_string()
    } else if f == f64::INFINITY {
        "9e999".to_string()
    } else if f == f64::NEG_INFINITY {
        "-9e999".to_string()
    } else {
        // Debug formatting is shortest round-trip and always keeps a '.' or exponent
        format!("{:?}", f)
    }
}

fn text_literal(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) if !text.contains('\0') => format!("'{}'", text.replace('\'', "''")),
        _ => format!("CAST(X'{}' AS TEXT)", hex::encode(bytes)),
    }
}
