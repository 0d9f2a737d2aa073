//! Record source
//!
//! A single ordered byte stream: schema header first, then back-to-back
//! fixed-size records. The stream is read sequentially and exactly once.

pub mod schema;

pub use schema::{SchemaDescription, SchemaError};

use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

/// Sequential reader over the record stream
pub struct RecordSource {
    reader: BufReader<Box<dyn AsyncRead + Send + Unpin>>,
    bytes_read: u64,
}

impl RecordSource {
    /// Wrap any async reader
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            reader: BufReader::new(Box::new(reader)),
            bytes_read: 0,
        }
    }

    /// Read records from standard input
    pub fn stdin() -> Self {
        Self::new(tokio::io::stdin())
    }

    /// Read records from a file
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Self::new(file))
    }

    /// Read the schema header up to and including its blank terminator line
    pub async fn read_schema(&mut self) -> Result<SchemaDescription, SchemaError> {
        let mut lines = Vec::new();
        let mut line = String::new();

        loop {
            line.clear();
            let n = self.reader.read_line(&mut line).await?;
            if n == 0 {
                return Err(SchemaError::Truncated);
            }
            self.bytes_read += n as u64;

            let trimmed = line.trim_end_matches(|c: char| c == '\n' || c == '\r');
            if trimmed.is_empty() {
                break;
            }
            lines.push(trimmed.to_string());
        }

        SchemaDescription::from_lines(lines)
    }

    /// Fill `buf` as far as the stream allows
    ///
    /// Returns the number of bytes placed in `buf`. A value smaller than
    /// `buf.len()` means the stream is exhausted.
    pub async fn fill(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        self.bytes_read += filled as u64;
        Ok(filled)
    }

    /// Total bytes consumed so far (header included)
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}
