//! CSV fixtures for memory tables.
//!
//! The first record is the header. Cells are typed by shape: empty is NULL,
//! then integer, float, `true`/`false`, and finally text.

use std::io::Read;

use daoplan_core::error::{Error, Result};
use daoplan_core::value::Value;

use crate::memory::{MemoryDataSource, TableDef};

/// Load every record of `input` into `table`, creating the table from the
/// header when it does not exist yet. Returns the number of rows inserted.
pub fn load_csv<R: Read>(ds: &MemoryDataSource, table: &str, input: R) -> Result<usize> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| Error::Parse(format!("csv header: {e}")))?
        .iter()
        .map(str::to_string)
        .collect();
    if headers.is_empty() {
        return Err(Error::Parse(format!("csv for '{table}' has no header")));
    }

    if ds.rows(table).is_err() {
        let names: Vec<&str> = headers.iter().map(String::as_str).collect();
        ds.create_table(TableDef::new(table).columns(&names))?;
    }

    let mut loaded = 0;
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| Error::Parse(format!("csv record {}: {e}", line + 2)))?;
        let values = headers
            .iter()
            .zip(record.iter())
            .map(|(h, cell)| (h.as_str(), infer(cell)))
            .collect();
        ds.insert_row(table, values)?;
        loaded += 1;
    }
    tracing::debug!(table, rows = loaded, "loaded csv fixture");
    Ok(loaded)
}

fn infer(cell: &str) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = cell.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = cell.parse::<f64>() {
        return Value::Float(f);
    }
    match cell {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::Str(cell.to_string()),
    }
}
