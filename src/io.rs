//! Parsers for the files the simulation engine writes.
//!
//! Each format has a reader-based parser, which takes a `source_name` used in error messages,
//! and a `load_*` convenience wrapper that opens a path.

use crate::errors::*;
use crate::ffs::{TrajectoryOutcome, TrajectoryOutcomeLog};
use crate::umbrella::{BiasWeightTable, BinKey, OrderParameterSample};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

/// Column layout of weight and energy files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceFormat {
    /// Number of integer order parameters identifying a bin
    pub bin_width: usize,
    /// Column of an energy file holding the first order parameter
    pub op_column_start: usize,
}

impl Default for TraceFormat {
    fn default() -> Self {
        Self {
            bin_width: 8,
            op_column_start: 5,
        }
    }
}

/// The two values of a flux summary file
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FluxSummary {
    /// First-crossing events
    pub crossings: u64,
    /// Either elapsed time or time per crossing, see `FluxValueKind`
    pub value: f64,
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| AnalysisError::io(path, e))
}

/// Non-blank, non-comment lines with their 1-based line numbers
fn records<'a, R: BufRead + 'a>(
    reader: R,
    source_name: &'a str,
) -> impl Iterator<Item = Result<(usize, String)>> + 'a {
    reader
        .lines()
        .enumerate()
        .filter_map(move |(i, line)| match line {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    None
                } else {
                    Some(Ok((i + 1, trimmed.to_string())))
                }
            }
            Err(e) => Some(Err(AnalysisError::io(source_name, e))),
        })
}

fn parse_field<T: FromStr>(
    field: &str,
    what: &str,
    source_name: &str,
    line: usize,
) -> Result<T> {
    field.parse().map_err(|_| {
        AnalysisError::malformed(source_name, line, format!("{} '{}' is not valid", what, field))
    })
}

fn parse_bin(fields: &[&str], source_name: &str, line: usize) -> Result<BinKey> {
    fields
        .iter()
        .map(|f| parse_field::<i64>(f, "order parameter", source_name, line))
        .collect::<Result<Vec<_>>>()
        .map(BinKey)
}

/// Parse a bias weight file: rows of `bin_width` integers followed by the weight $W$.
///
/// # Errors
///
/// `MalformedInput` for rows with the wrong number of fields, unparsable or non-finite values,
/// duplicated bins, or a file with no rows at all.
pub fn read_bias_weights<R: BufRead>(
    reader: R,
    source_name: &str,
    format: &TraceFormat,
) -> Result<BiasWeightTable> {
    let mut seen = HashSet::new();
    let mut weights = Vec::new();

    for record in records(reader, source_name) {
        let (line, text) = record?;
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() != format.bin_width + 1 {
            return Err(AnalysisError::malformed(
                source_name,
                line,
                format!(
                    "expected {} order parameters and a weight, found {} fields",
                    format.bin_width,
                    fields.len()
                ),
            ));
        }

        let bin = parse_bin(&fields[..format.bin_width], source_name, line)?;
        let weight: f64 = parse_field(fields[format.bin_width], "weight", source_name, line)?;
        if !weight.is_finite() {
            return Err(AnalysisError::malformed(
                source_name,
                line,
                format!("weight {} is not finite", weight),
            ));
        }
        if !seen.insert(bin.clone()) {
            return Err(AnalysisError::malformed(
                source_name,
                line,
                format!("bin {} appears twice", bin),
            ));
        }
        weights.push((bin, weight));
    }

    if weights.is_empty() {
        return Err(AnalysisError::malformed(source_name, 0, "no weights found"));
    }

    Ok(BiasWeightTable::from_weights(weights))
}

/// Load a bias weight file from disk
pub fn load_bias_weights(path: &Path, format: &TraceFormat) -> Result<BiasWeightTable> {
    read_bias_weights(open(path)?, &path.display().to_string(), format)
}

/// Parse an energy file into order-parameter samples.
///
/// Column 0 is the simulation time; the bin key occupies `bin_width` columns starting at
/// `op_column_start`. Extra trailing columns are ignored.
pub fn read_trace<R: BufRead>(
    reader: R,
    source_name: &str,
    format: &TraceFormat,
) -> Result<Vec<OrderParameterSample>> {
    let needed = format.op_column_start + format.bin_width;
    let mut samples = Vec::new();

    for record in records(reader, source_name) {
        let (line, text) = record?;
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() < needed.max(1) {
            return Err(AnalysisError::malformed(
                source_name,
                line,
                format!("expected at least {} columns, found {}", needed, fields.len()),
            ));
        }

        let time = parse_field(fields[0], "time", source_name, line)?;
        let bin = parse_bin(
            &fields[format.op_column_start..needed],
            source_name,
            line,
        )?;
        samples.push(OrderParameterSample { time, bin });
    }

    Ok(samples)
}

/// Load an energy file from disk
pub fn load_trace(path: &Path, format: &TraceFormat) -> Result<Vec<OrderParameterSample>> {
    read_trace(open(path)?, &path.display().to_string(), format)
}

/// Parse a flux summary: a `label: count` line followed by a `label: value` line
pub fn read_flux_summary<R: BufRead>(reader: R, source_name: &str) -> Result<FluxSummary> {
    let mut values = Vec::with_capacity(2);
    for record in records(reader, source_name).take(2) {
        let (line, text) = record?;
        let (_, value) = text.split_once(':').ok_or_else(|| {
            AnalysisError::malformed(source_name, line, "expected 'label: value'")
        })?;
        values.push((line, value.trim().to_string()));
    }

    match values.as_slice() {
        [(count_line, count), (value_line, value)] => Ok(FluxSummary {
            crossings: parse_field(count, "crossing count", source_name, *count_line)?,
            value: parse_field(value, "flux value", source_name, *value_line)?,
        }),
        _ => Err(AnalysisError::malformed(
            source_name,
            values.len(),
            "expected a crossing count line and a flux value line",
        )),
    }
}

/// Load a flux summary from disk
pub fn load_flux_summary(path: &Path) -> Result<FluxSummary> {
    read_flux_summary(open(path)?, &path.display().to_string())
}

/// Parse a shooting log. Lines starting `SUCCESS:` or `FAILURE:` are outcomes; the engine's
/// other output is skipped.
pub fn read_outcome_log<R: BufRead>(reader: R, source_name: &str) -> Result<TrajectoryOutcomeLog> {
    let mut log = TrajectoryOutcomeLog::new();
    for record in records(reader, source_name) {
        let (_, text) = record?;
        if text.starts_with("SUCCESS:") {
            log.push(TrajectoryOutcome::Success);
        } else if text.starts_with("FAILURE:") {
            log.push(TrajectoryOutcome::Failure);
        }
    }
    Ok(log)
}

/// Load a shooting log from disk
pub fn load_outcome_log(path: &Path) -> Result<TrajectoryOutcomeLog> {
    read_outcome_log(open(path)?, &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    fn small() -> TraceFormat {
        TraceFormat {
            bin_width: 2,
            op_column_start: 1,
        }
    }

    #[test]
    fn weights_parse_with_comments() {
        let text = "# weights\n0 0 1.0\n0 1 25.5\n\n1 1 0\n";
        let table = read_bias_weights(Cursor::new(text), "wfile", &small()).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.log_weight(&BinKey(vec![0, 0])), Some(0.0));
        assert_eq!(table.log_weight(&BinKey(vec![0, 1])), Some(25.5f64.ln()));
        assert_eq!(
            table.log_weight(&BinKey(vec![1, 1])),
            Some(f64::NEG_INFINITY)
        );
    }

    #[test]
    fn short_weight_row_is_malformed() {
        let err = read_bias_weights(Cursor::new("0 0 1.0\n0 1\n"), "wfile", &small()).unwrap_err();
        match err {
            AnalysisError::MalformedInput { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn duplicate_or_missing_weights_are_malformed() {
        assert!(read_bias_weights(Cursor::new("0 0 1\n0 0 2\n"), "w", &small()).is_err());
        assert!(read_bias_weights(Cursor::new("\n# nothing\n"), "w", &small()).is_err());
        assert!(read_bias_weights(Cursor::new("0 0 inf\n"), "w", &small()).is_err());
    }

    #[test]
    fn trace_reads_time_and_bin() {
        let text = "10.0 0 3 -1.2\n20.0 1 4 -1.3 extra\n";
        let samples = read_trace(Cursor::new(text), "energy", &small()).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].time, 10.0);
        assert_eq!(samples[0].bin, BinKey(vec![0, 3]));
        assert_eq!(samples[1].bin, BinKey(vec![1, 4]));
    }

    #[test]
    fn truncated_trace_row_is_malformed() {
        let err = read_trace(Cursor::new("10.0 0 3\n20.0 1\n"), "energy", &small()).unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedInput { line: 2, .. }));

        let err = read_trace(Cursor::new("10.0 0 x\n"), "energy", &small()).unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedInput { line: 1, .. }));
    }

    #[test]
    fn default_format_matches_engine_layout() {
        let line = "1000 -1.5 0.1 -1.4 0.0 1 2 0 3 0 0 1 0\n";
        let samples = read_trace(Cursor::new(line), "energy", &TraceFormat::default()).unwrap();
        assert_eq!(samples[0].bin, BinKey(vec![1, 2, 0, 3, 0, 0, 1, 0]));
    }

    #[test]
    fn flux_summary_parses() {
        let text = "Number of crossings: 42\nFlux: 1.5e3\n";
        let summary = read_flux_summary(Cursor::new(text), "flux").unwrap();
        assert_eq!(summary.crossings, 42);
        assert_eq!(summary.value, 1500.0);
    }

    #[test]
    fn truncated_flux_summary_is_malformed() {
        assert!(read_flux_summary(Cursor::new("Number of crossings: 42\n"), "flux").is_err());
        assert!(read_flux_summary(Cursor::new("42\n1.0\n"), "flux").is_err());
        assert!(read_flux_summary(Cursor::new("a: x\nb: 1.0\n"), "flux").is_err());
    }

    #[test]
    fn outcome_log_skips_chatter() {
        let text = "starting shooting\nSUCCESS: traj 1\nFAILURE: traj 2\nSUCCESS: traj 3\nbye\n";
        let log = read_outcome_log(Cursor::new(text), "ffs.log").unwrap();
        assert_eq!(log.attempts(), 3);
        assert_eq!(log.successes(), 2);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_outcome_log(&dir.path().join("ffs.log")).unwrap_err();
        assert!(matches!(err, AnalysisError::Io { .. }));
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "crossings: 7").unwrap();
        writeln!(file, "time: 3.5").unwrap();
        let summary = load_flux_summary(file.path()).unwrap();
        assert_eq!(summary.crossings, 7);
        assert_eq!(summary.value, 3.5);
    }
}
