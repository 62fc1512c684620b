//! Rendering command results as aligned key/value tables or JSON.

use std::fmt;
use std::io::{self, Write};

use serde::Serialize;

pub type OutputRow = Vec<String>;

pub type OutputTable = Vec<OutputRow>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Aligned columns for people.
    #[default]
    Table,
    /// The full result document.
    Json,
}

/// What a command produced: a short table for the terminal and the complete
/// document for machine consumers.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub table: OutputTable,
    pub document: Option<serde_json::Value>,
}

impl CommandOutput {
    pub fn new(table: OutputTable) -> Self {
        Self {
            table,
            document: None,
        }
    }

    pub fn with_document<T: Serialize>(mut self, doc: &T) -> serde_json::Result<Self> {
        self.document = Some(serde_json::to_value(doc)?);
        Ok(self)
    }
}

fn to_io_error(e: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

pub struct Printer<W: Write = Box<dyn Write>> {
    out: W,
    format: OutputFormat,
}

impl Printer<Box<dyn Write>> {
    pub fn stdout(format: OutputFormat) -> Self {
        Self {
            out: Box::new(io::stdout()),
            format,
        }
    }
}

impl<W: Write> Printer<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self { out, format }
    }

    pub fn print_error(&mut self, err: &str) -> io::Result<()> {
        match self.format {
            OutputFormat::Table => writeln!(self.out, "Error: {}", err),
            OutputFormat::Json => {
                let obj = serde_json::json!({ "error": err });
                let json = serde_json::to_string_pretty(&obj).map_err(to_io_error)?;
                writeln!(self.out, "{}", json)
            }
        }
    }

    /// Table mode prints the table; JSON mode prints the document when there
    /// is one and the table otherwise.
    pub fn print_output(&mut self, output: &CommandOutput) -> io::Result<()> {
        match (self.format, &output.document) {
            (OutputFormat::Json, Some(doc)) => self.print_value(doc),
            _ => self.print_table(&output.table),
        }
    }

    pub fn print_table(&mut self, table: &OutputTable) -> io::Result<()> {
        if table.is_empty() {
            return Ok(());
        }
        match self.format {
            OutputFormat::Table => self.print_table_aligned(table),
            OutputFormat::Json => self.print_table_json(table),
        }
    }

    /// JSON mode only; a no-op for tables.
    pub fn print_value<T: Serialize>(&mut self, value: &T) -> io::Result<()> {
        match self.format {
            OutputFormat::Table => Ok(()),
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(value).map_err(to_io_error)?;
                writeln!(self.out, "{}", json)
            }
        }
    }

    fn print_table_aligned(&mut self, table: &OutputTable) -> io::Result<()> {
        const SEPARATOR: &str = "  ";

        let mut widths: Vec<usize> = Vec::new();
        for row in table {
            if widths.len() < row.len() {
                widths.resize(row.len(), 0);
            }
            for (col, cell) in row.iter().enumerate() {
                widths[col] = widths[col].max(cell.len() + SEPARATOR.len());
            }
        }

        for row in table {
            let mut line = String::new();
            for (col, cell) in row.iter().enumerate() {
                line.push_str(cell);
                if col + 1 < row.len() {
                    let padding = widths[col].saturating_sub(cell.len());
                    line.extend(std::iter::repeat(' ').take(padding));
                }
            }
            writeln!(self.out, "{}", line)?;
        }
        Ok(())
    }

    /// First row is the header and supplies the keys.
    fn print_table_json(&mut self, table: &OutputTable) -> io::Result<()> {
        if table.len() <= 1 {
            let json = serde_json::to_string_pretty(table).map_err(to_io_error)?;
            return writeln!(self.out, "{}", json);
        }

        let headers = &table[0];
        let rows: Vec<serde_json::Map<String, serde_json::Value>> = table[1..]
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(i, cell)| {
                        let key = headers.get(i).cloned().unwrap_or_else(|| format!("col_{}", i));
                        (key, serde_json::Value::String(cell.clone()))
                    })
                    .collect()
            })
            .collect();
        let json = serde_json::to_string_pretty(&rows).map_err(to_io_error)?;
        writeln!(self.out, "{}", json)
    }
}

impl<W: Write> fmt::Debug for Printer<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Printer")
            .field("format", &self.format)
            .finish()
    }
}

pub fn table_with_header(headers: &[&str]) -> OutputTable {
    vec![headers.iter().map(|h| h.to_string()).collect()]
}

pub fn kv_row(key: &str, value: impl fmt::Display) -> OutputRow {
    vec![key.to_string(), value.to_string()]
}

/// `"-"` for absent values.
pub fn opt_cell<T: fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    const TIB: u64 = 1024 * GIB;

    if bytes >= TIB {
        format!("{:.2} TiB", bytes as f64 / TIB as f64)
    } else if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.2} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(format: OutputFormat, output: &CommandOutput) -> String {
        let mut buf = Vec::new();
        Printer::new(&mut buf, format).print_output(output).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_aligned_key_value_table() {
        let output = CommandOutput::new(vec![
            kv_row("Total reads", 3),
            kv_row("Classification", "MIXED (Sequential + Random)"),
        ]);
        let text = render(OutputFormat::Table, &output);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "Total reads     3");
        assert!(lines[1].starts_with("Classification  "));
    }

    #[test]
    fn test_json_prefers_document() {
        let output = CommandOutput::new(vec![kv_row("a", 1)])
            .with_document(&serde_json::json!({ "sequential_reads": 1 }))
            .unwrap();
        let parsed: serde_json::Value =
            serde_json::from_str(&render(OutputFormat::Json, &output)).unwrap();
        assert_eq!(parsed["sequential_reads"], 1);
    }

    #[test]
    fn test_json_table_uses_header_keys() {
        let mut table = table_with_header(&["token", "entries"]);
        table.push(vec!["0".into(), "12".into()]);
        let parsed: Vec<serde_json::Map<String, serde_json::Value>> =
            serde_json::from_str(&render(OutputFormat::Json, &CommandOutput::new(table))).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0]["entries"], "12");
    }

    #[test]
    fn test_print_error_json() {
        let mut buf = Vec::new();
        Printer::new(&mut buf, OutputFormat::Json)
            .print_error("no extents")
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(parsed["error"], "no extents");
    }

    #[test]
    fn test_empty_table_prints_nothing() {
        assert!(render(OutputFormat::Table, &CommandOutput::default()).is_empty());
    }

    #[test]
    fn test_cells() {
        assert_eq!(opt_cell::<u32>(None), "-");
        assert_eq!(opt_cell(Some(2.5)), "2.5");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MiB");
    }
}
