// src/storage/csv.rs

//! Minimal CSV codec for master stores.
//!
//! Parsing is quote-aware and tolerates CRLF line endings and newlines
//! inside quoted fields. Writing quotes every field.

use std::io::{self, Write};
use std::mem::take;

const SEP: char = ',';

/// Parse CSV text into rows of fields. Blank lines are skipped.
pub fn parse_rows(text: &str) -> Vec<Vec<String>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut rows = Vec::new();
    let mut field = String::new();
    let mut row = Vec::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                if in_quotes {
                    if matches!(chars.peek(), Some('"')) {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                } else {
                    in_quotes = true;
                }
            }
            c if c == SEP && !in_quotes => row.push(take(&mut field)),
            '\n' | '\r' if !in_quotes => {
                if ch == '\r' && matches!(chars.peek(), Some('\n')) {
                    chars.next();
                }
                row.push(take(&mut field));
                if !(row.len() == 1 && row[0].is_empty()) {
                    rows.push(take(&mut row));
                } else {
                    row.clear();
                }
            }
            _ => field.push(ch),
        }
    }

    // Trailing row without a final newline (or with an unterminated quote).
    row.push(field);
    if !(row.len() == 1 && row[0].is_empty()) {
        rows.push(row);
    }

    rows
}

/// Write one row with every field quoted.
pub fn write_row<W: Write>(mut w: W, row: &[String]) -> io::Result<()> {
    for (i, cell) in row.iter().enumerate() {
        if i > 0 {
            write!(w, "{SEP}")?;
        }
        write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
    }
    // RFC 4180 line ending
    write!(w, "\r\n")
}

/// Encode a header plus rows into a byte buffer.
pub fn encode(header: &[String], rows: &[Vec<String>]) -> Vec<u8> {
    let mut buf = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = write_row(&mut buf, header);
    for row in rows {
        let _ = write_row(&mut buf, row);
    }
    buf
}
