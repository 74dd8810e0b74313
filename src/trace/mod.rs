//! Waveform output for the CLI frontend.
//!
//! Writes one CSV row per committed step to any [`Write`] sink (stdout for
//! the binary, a buffer in tests).

use std::io::{BufWriter, Write};

use crate::error::{PowerStampError, Result};

/// CSV writer for sampled waveforms.
pub struct TraceWriter<W: Write> {
    out: BufWriter<W>,
    /// Name of the sink used in error messages
    label: String,
    columns: usize,
}

impl<W: Write> TraceWriter<W> {
    /// Create a writer and emit the header row.
    pub fn new(sink: W, label: impl Into<String>, columns: &[&str]) -> Result<Self> {
        let mut writer = Self {
            out: BufWriter::new(sink),
            label: label.into(),
            columns: columns.len(),
        };
        let header = columns.join(",");
        writer.write_line(&header)?;
        Ok(writer)
    }

    /// Write one row; the number of values must match the header.
    pub fn write_row(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.columns {
            return Err(PowerStampError::invalid_param(format!(
                "trace row has {} values, header has {} columns",
                values.len(),
                self.columns
            )));
        }
        let line = values
            .iter()
            .map(|v| format!("{v:.9e}"))
            .collect::<Vec<_>>()
            .join(",");
        self.write_line(&line)
    }

    /// Flush the output stream.
    pub fn flush(&mut self) -> Result<()> {
        self.out.flush().map_err(|source| PowerStampError::FileWrite {
            path: self.label.clone(),
            source,
        })
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.out, "{line}").map_err(|source| PowerStampError::FileWrite {
            path: self.label.clone(),
            source,
        })
    }

    /// Flush and hand back the sink.
    pub fn into_inner(self) -> Result<W> {
        let label = self.label;
        self.out.into_inner().map_err(|e| PowerStampError::FileWrite {
            path: label,
            source: e.into_error(),
        })
    }
}
