//! Per-iteration records, the final timing record, and sinks that consume them.
//!
//! Only rank 0 writes to a sink. Sink I/O errors are logged and never abort a fit.

use std::io::{self, Write};

use serde::Serialize;

/// Metrics of one iteration. Disabled or unavailable metrics are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IterationRecord {
    pub iteration: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_energy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_likelihood: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantization_error: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nmi: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ami: Option<f64>,
    /// Global distance evaluations of this iteration's E-step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u64>,
    /// `(N·C) / eval_count`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_speedup: Option<f64>,
}

impl IterationRecord {
    pub fn new(iteration: usize) -> Self {
        Self {
            iteration,
            ..Default::default()
        }
    }
}

/// Wall-clock training time (E-step plus M-step; metrics excluded).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimingRecord {
    pub total_secs: f64,
    pub per_iteration_secs: Vec<f64>,
}

impl TimingRecord {
    pub fn mean_secs(&self) -> f64 {
        if self.per_iteration_secs.is_empty() {
            0.0
        } else {
            self.total_secs / self.per_iteration_secs.len() as f64
        }
    }
}

/// Consumer of fit progress.
pub trait ReportSink {
    fn iteration(&mut self, record: &IterationRecord) -> io::Result<()>;

    fn timing(&mut self, record: &TimingRecord) -> io::Result<()>;
}

/// Keeps every record in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub records: Vec<IterationRecord>,
    pub timing: Option<TimingRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReportSink for MemorySink {
    fn iteration(&mut self, record: &IterationRecord) -> io::Result<()> {
        self.records.push(record.clone());
        Ok(())
    }

    fn timing(&mut self, record: &TimingRecord) -> io::Result<()> {
        self.timing = Some(record.clone());
        Ok(())
    }
}

/// One JSON object per line.
///
/// Iteration lines hold an [`IterationRecord`]; the last line is
/// `{"timing": {...}}`.
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[derive(Serialize)]
struct TimingLine<'a> {
    timing: &'a TimingRecord,
}

impl<W: Write> ReportSink for JsonLinesSink<W> {
    fn iteration(&mut self, record: &IterationRecord) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")
    }

    fn timing(&mut self, record: &TimingRecord) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, &TimingLine { timing: record })?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

/// Tab-separated console table, `--` for metrics that were not computed.
pub struct TableSink<W: Write> {
    writer: W,
    iter_width: usize,
    header_written: bool,
}

impl<W: Write> TableSink<W> {
    /// `n_iter` sizes the iteration column.
    pub fn new(writer: W, n_iter: usize) -> Self {
        let iter_width = n_iter.max(1).to_string().len();
        Self {
            writer,
            iter_width,
            header_written: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn header(&mut self) -> io::Result<()> {
        writeln!(
            self.writer,
            "{:>w$}\t{:>13}\t{:>13}\t{:>13}\t{:>8}\t{:>8}\t{:>8}\t#D-Evals (Speed-Up)",
            "n",
            "Free Energy",
            "LogLikelihood",
            "Q-Error",
            "Purity",
            "NMI",
            "AMI",
            w = self.iter_width
        )
    }
}

fn wide(v: Option<f64>) -> String {
    v.map_or_else(|| format!("{:>13}", "--"), |x| format!("{:13.6}", x))
}

fn narrow(v: Option<f64>) -> String {
    v.map_or_else(|| format!("{:>8}", "--"), |x| format!("{:8.6}", x))
}

impl<W: Write> ReportSink for TableSink<W> {
    fn iteration(&mut self, r: &IterationRecord) -> io::Result<()> {
        if !self.header_written {
            self.header()?;
            self.header_written = true;
        }
        let evals = match (r.eval_count, r.eval_speedup) {
            (Some(d), Some(s)) => {
                let full = (d as f64 * s).round() as u64;
                format!("{}/{} (x{:.2})", d, full, s)
            }
            _ => format!("{:>8}", "--"),
        };
        writeln!(
            self.writer,
            "{:>w$}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            r.iteration,
            wide(r.free_energy),
            wide(r.log_likelihood),
            wide(r.quantization_error),
            narrow(r.purity),
            narrow(r.nmi),
            narrow(r.ami),
            evals,
            w = self.iter_width
        )
    }

    fn timing(&mut self, t: &TimingRecord) -> io::Result<()> {
        for (i, s) in t.per_iteration_secs.iter().enumerate() {
            writeln!(self.writer, "iteration {} : {:.2}s", i + 1, s)?;
        }
        writeln!(self.writer, "Pure training time : {:.2}s", t.total_secs)?;
        writeln!(
            self.writer,
            "Pure average training time : {:.2}s",
            t.mean_secs()
        )?;
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> IterationRecord {
        IterationRecord {
            free_energy: Some(-3.5),
            purity: Some(1.0),
            eval_count: Some(250),
            eval_speedup: Some(4.0),
            ..IterationRecord::new(2)
        }
    }

    #[test]
    fn test_json_lines_skip_missing_metrics() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.iteration(&sample()).unwrap();
        sink.timing(&TimingRecord {
            total_secs: 1.5,
            per_iteration_secs: vec![0.5, 1.0],
        })
        .unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let v: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(v["iteration"], 2);
        assert_eq!(v["free_energy"], -3.5);
        assert!(v.get("log_likelihood").is_none());
        let t: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(t["timing"]["total_secs"], 1.5);
    }

    #[test]
    fn test_table_row_format() {
        let mut sink = TableSink::new(Vec::new(), 20);
        sink.iteration(&sample()).unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        let row = out.lines().nth(1).unwrap();
        let cols: Vec<&str> = row.split('\t').collect();
        assert_eq!(cols[0], " 2");
        assert_eq!(cols[1].trim(), "-3.500000");
        assert_eq!(cols[2].trim(), "--");
        assert_eq!(cols[4].trim(), "1.000000");
        assert_eq!(cols[7], "250/1000 (x4.00)");
    }

    #[test]
    fn test_timing_mean() {
        let t = TimingRecord {
            total_secs: 3.0,
            per_iteration_secs: vec![1.0, 2.0],
        };
        assert_eq!(t.mean_secs(), 1.5);
        assert_eq!(TimingRecord::default().mean_secs(), 0.0);
    }
}
