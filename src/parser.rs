use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("field count mismatch: header has {expected} columns, line has {found}")]
    FieldCount { expected: usize, found: usize },
}

/// One input row bound to the header that names its columns. Column order is
/// the header's order; values are positional.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    header: Arc<Vec<String>>,
    values: Vec<String>,
}

impl Record {
    pub fn new(header: Arc<Vec<String>>, values: Vec<String>) -> Result<Self, RecordError> {
        if values.len() != header.len() {
            return Err(RecordError::FieldCount { expected: header.len(), found: values.len() });
        }
        Ok(Self { header, values })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.header
            .iter()
            .position(|h| h == name)
            .map(|i| self.values[i].as_str())
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub(crate) fn values_mut(&mut self) -> &mut [String] {
        &mut self.values
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.header
            .iter()
            .map(|h| h.as_str())
            .zip(self.values.iter().map(|v| v.as_str()))
    }
}

/// Split one logical line into fields. A double quote toggles quoted state,
/// two consecutive quotes inside a quoted field collapse to one literal
/// quote, and the delimiter is literal while quoted. An unterminated quote
/// is accepted: the remainder of the line becomes part of the current field.
pub fn split_line(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if in_quotes && chars.peek() == Some(&'"') {
                current.push('"');
                chars.next();
            } else {
                in_quotes = !in_quotes;
            }
        } else if c == delimiter && !in_quotes {
            fields.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    fields.push(current);
    fields
}

/// Quote a field for output when it contains the delimiter, a quote, or a
/// line break; embedded quotes are doubled. Plain fields pass through.
pub fn escape_field(field: &str, delimiter: char) -> String {
    let needs_quoting = field.contains(delimiter)
        || field.contains('"')
        || field.contains('\n')
        || field.contains('\r');
    if !needs_quoting {
        return field.to_string();
    }
    let mut out = String::with_capacity(field.len() + 2);
    out.push('"');
    for c in field.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Serialize one row in the same column order and quoting discipline as the
/// input, without a trailing line terminator.
pub fn write_row(values: &[String], delimiter: char) -> String {
    let mut out = String::new();
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            out.push(delimiter);
        }
        out.push_str(&escape_field(v, delimiter));
    }
    out
}

pub fn strip_bom(line: &str) -> &str {
    line.strip_prefix('\u{feff}').unwrap_or(line)
}
