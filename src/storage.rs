use crate::error::{ConsolidatorError, Result};
use crate::table::{Row, Table};
use csv::{ReaderBuilder, WriterBuilder};
use std::fs;
use serde::Serialize;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Read a CSV file with a header row into a [`Table`] labelled `label`.
///
/// A file that does not exist is reported as
/// [`ConsolidatorError::MissingInputFile`]. A header with no data rows yields
/// an empty table.
pub fn read_table(path: &Path, label: &str) -> Result<Table> {
    ensure_exists(path)?;
    let file = fs::File::open(path)?;
    let table = read_table_from_reader(file, label)?;
    debug!("Read {} rows from {}", table.len(), path.display());
    Ok(table)
}

/// Read CSV from any reader.
///
/// A header that repeats a column name is rejected with
/// [`ConsolidatorError::DuplicateColumn`]. Malformed rows are recovered locally: short rows are padded with nulls,
/// surplus cells are dropped and cells that are not valid UTF-8 become null.
pub fn read_table_from_reader<R: Read>(reader: R, label: &str) -> Result<Table> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = rdr
        .byte_headers()?
        .iter()
        .map(|h| String::from_utf8_lossy(h).into_owned())
        .collect();
    let mut table = Table::new(label, &headers);
    table.require_unique_columns()?;

    let mut invalid_cells = 0usize;
    for (line, record) in rdr.byte_records().enumerate() {
        let record = record?;
        if record.len() > headers.len() {
            warn!(
                "{}: row {} has {} fields, expected {}; extra fields dropped",
                label,
                line + 1,
                record.len(),
                headers.len()
            );
        }

        let row: Row = record
            .iter()
            .take(headers.len())
            .map(|bytes| match std::str::from_utf8(bytes) {
                Ok("") => None,
                Ok(s) => Some(s.to_string()),
                Err(_) => {
                    invalid_cells += 1;
                    None
                }
            })
            .collect();
        table.push_row(row);
    }

    if invalid_cells > 0 {
        debug!("{}: {} cells were not valid UTF-8 and were treated as missing", label, invalid_cells);
    }

    Ok(table)
}

/// Write `table` as CSV to `path`.
pub fn write_table(path: &Path, table: &Table) -> Result<()> {
    write_atomic(path, |file| write_table_to_writer(file, table))?;
    debug!("Wrote {} rows to {}", table.len(), path.display());
    Ok(())
}

/// Write `value` as pretty-printed JSON to `path`.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    write_atomic(path, |file| {
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
        Ok(())
    })
}

/// Run `write` against a temporary sibling of `path` and rename it into
/// place, so a failure never leaves a partially written file behind.
/// Missing parent directories are created.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(fs::File) -> Result<()>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = temp_path(path);
    let written = fs::File::create(&tmp)
        .map_err(ConsolidatorError::from)
        .and_then(write);

    match written {
        Ok(()) => {
            fs::rename(&tmp, path)?;
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

pub fn write_table_to_writer<W: Write>(writer: W, table: &Table) -> Result<()> {
    let mut wtr = WriterBuilder::new().from_writer(writer);
    wtr.write_record(table.headers())?;
    for row in table.rows() {
        wtr.write_record(row.iter().map(|cell| cell.as_deref().unwrap_or("")))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Fail with [`ConsolidatorError::MissingInputFile`] unless `path` is a file.
pub fn ensure_exists(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ConsolidatorError::MissingInputFile {
            path: path.display().to_string(),
        })
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_read_pads_short_rows_and_nulls_empty_cells() {
        let data = "id,name,createdTime\nd1,Drive One\nd2,,2024-01-01\n";
        let table = read_table_from_reader(data.as_bytes(), "drives").unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.value(0, "name"), Some("Drive One"));
        assert_eq!(table.value(0, "createdTime"), None);
        assert_eq!(table.value(1, "name"), None);
        assert_eq!(table.value(1, "createdTime"), Some("2024-01-01"));
    }

    #[test]
    fn test_invalid_utf8_cell_becomes_missing() {
        let mut data = b"id,name\nd1,".to_vec();
        data.extend_from_slice(&[0xff, 0xfe]);
        data.extend_from_slice(b"\n");

        let table = read_table_from_reader(data.as_slice(), "drives").unwrap();
        assert_eq!(table.value(0, "id"), Some("d1"));
        assert_eq!(table.value(0, "name"), None);
    }

    #[test]
    fn test_header_only_file_is_empty_table() {
        let table = read_table_from_reader("id,name\n".as_bytes(), "drives").unwrap();
        assert!(table.is_empty());
        assert_eq!(table.headers(), vec!["id", "name"]);
    }

    #[test]
    fn test_missing_file_is_reported_with_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("TeamDrives.csv");

        let err = read_table(&path, "drives").unwrap_err();
        match err {
            ConsolidatorError::MissingInputFile { path } => assert!(path.ends_with("TeamDrives.csv")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_write_then_read_preserves_nulls_as_empty_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("drives.csv");
        let table = Table::from_strs("drives", &["id", "name"], &[&["d1", ""], &["d2", "B, Inc"]]);

        write_table(&path, &table).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "id,name\nd1,\nd2,\"B, Inc\"\n");
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_repeated_header_is_rejected_on_read() {
        let err = read_table_from_reader("id,bytes,id\nd1,5,d1\n".as_bytes(), "storage").unwrap_err();
        assert_eq!(err.to_string(), "table 'storage' has more than one column named 'id'");
    }

    #[test]
    fn test_json_is_written_atomically() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reports").join("summary.json");

        write_json(&path, &serde_json::json!({ "stage": "dedup" })).unwrap();

        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["stage"], "dedup");
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_failed_write_leaves_no_file_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("summary.json");
        fs::write(&path, "previous").unwrap();

        let err = write_atomic(&path, |_| Err(ConsolidatorError::Config("boom".to_string()))).unwrap_err();
        assert!(matches!(err, ConsolidatorError::Config(_)));
        assert_eq!(fs::read_to_string(&path).unwrap(), "previous");
        assert!(!temp_path(&path).exists());
    }
}
