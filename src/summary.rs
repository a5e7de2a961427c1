//! Kernel table rendering (text and JSON)

use crate::tracker::KernelInfo;
use serde::Serialize;
use std::fmt::Write;

/// One kernel table line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub name: String,
    pub calls: u64,
    pub total_ns: u64,
    pub avg_ns: u64,
    pub min_ns: u64,
    pub max_ns: u64,
    pub time_percent: f64,
}

/// Kernel table in report order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KernelSummary {
    pub total_time_ns: u64,
    pub kernels: Vec<SummaryRow>,
}

impl KernelSummary {
    /// Build from entries already sorted by [`crate::tracker::sorted_kernel_info`]
    pub fn new(sorted: Vec<(String, KernelInfo)>) -> Self {
        let total_time_ns: u64 = sorted.iter().map(|(_, info)| info.total_time).sum();
        let kernels = sorted
            .into_iter()
            .map(|(name, info)| {
                let time_percent = if total_time_ns > 0 {
                    (info.total_time as f64 / total_time_ns as f64) * 100.0
                } else {
                    0.0
                };
                SummaryRow {
                    name,
                    calls: info.call_count,
                    total_ns: info.total_time,
                    avg_ns: info.average_time(),
                    min_ns: info.min_time,
                    max_ns: info.max_time,
                    time_percent,
                }
            })
            .collect();

        Self {
            total_time_ns,
            kernels,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    pub fn render_text(&self) -> String {
        if self.is_empty() {
            return "No kernels traced.\n".to_string();
        }

        let mut out = String::new();
        out.push_str("% time     total (ns)    avg (ns)    min (ns)    max (ns)     calls kernel\n");
        out.push_str("------ -------------- ----------- ----------- ----------- --------- ----------------\n");
        for row in &self.kernels {
            // Writing to a String never fails
            let _ = writeln!(
                out,
                "{:6.2} {:>14} {:>11} {:>11} {:>11} {:>9} {}",
                row.time_percent,
                row.total_ns,
                row.avg_ns,
                row.min_ns,
                row.max_ns,
                row.calls,
                row.name
            );
        }
        out.push_str("------ -------------- ----------- ----------- ----------- --------- ----------------\n");
        let calls: u64 = self.kernels.iter().map(|r| r.calls).sum();
        let _ = writeln!(
            out,
            "100.00 {:>14} {:>11} {:>11} {:>11} {:>9} total",
            self.total_time_ns, "", "", "", calls
        );
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
