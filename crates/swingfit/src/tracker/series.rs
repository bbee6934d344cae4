//! Persisting the accepted `(period, swing)` series.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One accepted swing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwingSample {
    /// Time between same-direction crossings (s).
    pub period_s: f64,
    /// Sum of two consecutive opposite-direction amplitudes (degrees).
    pub swing_deg: f64,
}

/// Destination of the accepted series at stream end.
pub trait SeriesSink {
    fn write_series(&mut self, series: &[SwingSample]) -> std::io::Result<()>;
}

/// Two-column whitespace-delimited `period swing` table.
#[derive(Debug, Clone)]
pub struct TabulatedSeriesFile {
    path: PathBuf,
}

impl TabulatedSeriesFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Render `series` as table rows.
pub fn format_series(series: &[SwingSample]) -> String {
    series
        .iter()
        .map(|s| format!("{:.18e} {:.18e}\n", s.period_s, s.swing_deg))
        .collect()
}

impl SeriesSink for TabulatedSeriesFile {
    fn write_series(&mut self, series: &[SwingSample]) -> std::io::Result<()> {
        let mut file = std::io::BufWriter::new(std::fs::File::create(&self.path)?);
        file.write_all(format_series(series).as_bytes())?;
        file.flush()
    }
}

impl SeriesSink for Vec<SwingSample> {
    fn write_series(&mut self, series: &[SwingSample]) -> std::io::Result<()> {
        self.extend_from_slice(series);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn table_rows_are_two_columns() {
        let series = [
            SwingSample {
                period_s: 2.0,
                swing_deg: 9.25,
            },
            SwingSample {
                period_s: 1.9995,
                swing_deg: 9.5,
            },
        ];
        let text = format_series(&series);
        let rows: Vec<Vec<f64>> = text
            .lines()
            .map(|l| l.split_whitespace().map(|t| t.parse().unwrap()).collect())
            .collect();
        assert_eq!(rows, vec![vec![2.0, 9.25], vec![1.9995, 9.5]]);
    }

    #[test]
    fn file_sink_writes_table() {
        let dir = TempDir::new().unwrap();
        let mut sink = TabulatedSeriesFile::new(dir.path().join("fit.dat"));
        let series = [SwingSample {
            period_s: 2.001,
            swing_deg: 8.0,
        }];
        sink.write_series(&series).unwrap();
        let text = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(text, format_series(&series));
    }
}
