//! Schema description carried at the head of the record stream
//!
//! The header is plain text, one `key: value` entry per line, terminated by an
//! empty line. Only two keys matter to the distributor:
//!
//! - `field: <name> <type>` contributes the width of `<type>` to the record size
//! - `record_size: <n>` overrides the computed size
//!
//! Everything else (name, encoding, metadata, valname, ...) is kept verbatim so
//! the daemons receive exactly what the producer wrote.
//!
//! # Example
//!
//! ```text
//! name: crime50k
//! encoding: binary
//! field: location nc_dim_quadtree_25
//! field: crime nc_dim_cat_1
//! field: time nc_dim_time_2
//! field: count nc_var_uint_4
//!
//! ```
//!
//! The record size of this header is 8 + 1 + 2 + 4 = 15 bytes.

use std::fmt;
use thiserror::Error;

/// Quadtree coordinates are stored as two u32 values regardless of depth
const QUADTREE_WIDTH: usize = 8;

/// Widest single field accepted from a header
pub const MAX_FIELD_WIDTH: usize = 1024;

/// Errors raised while reading a schema header
#[derive(Error, Debug)]
pub enum SchemaError {
    /// Line without a `key:` prefix
    #[error("Malformed schema line {line}: {content:?}")]
    MalformedLine { line: usize, content: String },

    /// `field:` entry whose type has no known width
    #[error("Field {name:?} has unsupported type {ty:?}")]
    UnknownFieldType { name: String, ty: String },

    /// `record_size:` entry that is not a number
    #[error("Invalid record_size value: {0:?}")]
    InvalidRecordSize(String),

    /// Field widths add up past what a record size can hold
    #[error("Record size overflows after field {field:?}")]
    RecordTooLarge { field: String },

    /// Header describes zero-byte records
    #[error("Schema describes empty records")]
    EmptyRecord,

    /// Stream ended before the blank terminator line
    #[error("Record stream ended inside the schema header")]
    Truncated,

    /// IO error while reading the header
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One field of the record layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub ty: String,
    pub width: usize,
}

/// Parsed schema header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescription {
    /// Header lines as read, without line terminators
    lines: Vec<String>,
    fields: Vec<FieldSpec>,
    record_size: usize,
}

impl SchemaDescription {
    /// Parse header lines (without the blank terminator)
    pub fn from_lines<I, S>(lines: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut kept = Vec::new();
        let mut fields = Vec::new();
        let mut explicit_size = None;

        for (idx, line) in lines.into_iter().enumerate() {
            let line: String = line.into();
            let (key, value) = line.split_once(':').ok_or_else(|| SchemaError::MalformedLine {
                line: idx + 1,
                content: line.clone(),
            })?;
            let value = value.trim();

            match key.trim() {
                "field" => fields.push(parse_field(value)?),
                "record_size" => {
                    let size = value
                        .parse::<usize>()
                        .map_err(|_| SchemaError::InvalidRecordSize(value.to_string()))?;
                    explicit_size = Some(size);
                }
                _ => {}
            }

            kept.push(line);
        }

        let record_size = match explicit_size {
            Some(size) => size,
            None => computed_size(&fields)?,
        };
        if record_size == 0 {
            return Err(SchemaError::EmptyRecord);
        }

        Ok(Self {
            lines: kept,
            fields,
            record_size,
        })
    }

    /// Parse a complete header text (terminator optional)
    pub fn parse(text: &str) -> Result<Self, SchemaError> {
        Self::from_lines(
            text.lines()
                .map(|l| l.trim_end_matches('\r'))
                .take_while(|l| !l.is_empty()),
        )
    }

    /// Bytes per record
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Value of the `name:` line, if any
    pub fn name(&self) -> Option<&str> {
        self.lines.iter().find_map(|l| {
            l.split_once(':')
                .filter(|(k, _)| k.trim() == "name")
                .map(|(_, v)| v.trim())
        })
    }
}

/// External text form: header lines followed by the blank terminator
impl fmt::Display for SchemaDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        writeln!(f)
    }
}

fn computed_size(fields: &[FieldSpec]) -> Result<usize, SchemaError> {
    fields.iter().try_fold(0usize, |total, field| {
        total
            .checked_add(field.width)
            .ok_or_else(|| SchemaError::RecordTooLarge {
                field: field.name.clone(),
            })
    })
}

fn parse_field(value: &str) -> Result<FieldSpec, SchemaError> {
    let mut parts = value.split_whitespace();
    let name = parts.next().unwrap_or_default().to_string();
    let ty = parts.next().unwrap_or_default().to_string();

    let width = type_width(&ty).ok_or_else(|| SchemaError::UnknownFieldType {
        name: name.clone(),
        ty: ty.clone(),
    })?;

    Ok(FieldSpec { name, ty, width })
}

/// Width in bytes of a field type name
fn type_width(ty: &str) -> Option<usize> {
    if ty.starts_with("nc_dim_quadtree_") {
        return Some(QUADTREE_WIDTH);
    }

    let (_, suffix) = ty.rsplit_once('_')?;
    suffix
        .parse::<usize>()
        .ok()
        .filter(|w| (1..=MAX_FIELD_WIDTH).contains(w))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CRIME_HEADER: &str = "name: crime50k\n\
        encoding: binary\n\
        field: location nc_dim_quadtree_25\n\
        field: crime nc_dim_cat_1\n\
        field: time nc_dim_time_2\n\
        field: count nc_var_uint_4\n\
        \n";

    #[test]
    fn test_record_size_from_fields() {
        let schema = SchemaDescription::parse(CRIME_HEADER).unwrap();
        assert_eq!(schema.record_size(), 15);
        assert_eq!(schema.fields().len(), 4);
        assert_eq!(schema.fields()[0].width, 8);
        assert_eq!(schema.name(), Some("crime50k"));
    }

    #[test]
    fn test_explicit_record_size_wins() {
        let schema =
            SchemaDescription::parse("name: x\nfield: a nc_dim_cat_1\nrecord_size: 32\n").unwrap();
        assert_eq!(schema.record_size(), 32);
    }

    #[test]
    fn test_display_preserves_lines() {
        let schema = SchemaDescription::parse(CRIME_HEADER).unwrap();
        assert_eq!(schema.to_string(), CRIME_HEADER);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = SchemaDescription::parse("field: a float\n").unwrap_err();
        assert!(matches!(err, SchemaError::UnknownFieldType { .. }));
    }

    #[test]
    fn test_oversized_field_width_rejected() {
        let header = "field: a nc_var_uint_18446744073709551615\nfield: b nc_var_uint_2\n";
        let err = SchemaDescription::parse(header).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownFieldType { ref name, .. } if name == "a"));
    }

    #[test]
    fn test_field_sum_overflow_reported() {
        let fields = vec![
            FieldSpec { name: "a".into(), ty: "x".into(), width: usize::MAX },
            FieldSpec { name: "b".into(), ty: "y".into(), width: 2 },
        ];
        match computed_size(&fields).unwrap_err() {
            SchemaError::RecordTooLarge { field } => assert_eq!(field, "b"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_record_rejected() {
        let err = SchemaDescription::parse("name: nothing\n").unwrap_err();
        assert!(matches!(err, SchemaError::EmptyRecord));
    }

    #[test]
    fn test_malformed_line_reports_position() {
        let err = SchemaDescription::parse("name: x\ngarbage\n").unwrap_err();
        match err {
            SchemaError::MalformedLine { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }
}
