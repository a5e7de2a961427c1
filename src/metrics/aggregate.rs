// Combine rules folding a window of reports into one value per column

use super::{MetricKind, TypedValue};

/// Column summed across reports
pub const GPU_TIME: &str = "GpuTime";
/// Column averaged by clocks
pub const AVG_GPU_CORE_FREQUENCY: &str = "AvgGpuCoreFrequencyMHz";
/// Column passed through from the first report
pub const REPORT_REASON: &str = "ReportReason";

/// How one column of matching reports is folded into a single value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineRule {
    Sum,
    ClockWeighted,
    First,
    Omit,
}

impl CombineRule {
    /// Rule for a column; well-known names take precedence over the kind
    pub fn for_metric(name: &str, kind: MetricKind) -> Self {
        match name {
            GPU_TIME => return CombineRule::Sum,
            AVG_GPU_CORE_FREQUENCY => return CombineRule::ClockWeighted,
            REPORT_REASON => return CombineRule::First,
            _ => {}
        }

        match kind {
            MetricKind::Duration | MetricKind::Ratio => CombineRule::ClockWeighted,
            MetricKind::Throughput | MetricKind::Event => CombineRule::Sum,
            MetricKind::Timestamp | MetricKind::Raw => CombineRule::First,
            MetricKind::EventWithRange | MetricKind::Flag => CombineRule::Omit,
        }
    }
}

fn clocks(report: &[TypedValue], clocks_index: usize) -> u64 {
    report[clocks_index]
        .as_u64()
        .unwrap_or_else(|| panic!("clock column must be u64, got {:?}", report[clocks_index]))
}

/// Sum of the clock column over `reports`
pub fn total_clocks(reports: &[&[TypedValue]], clocks_index: usize) -> u64 {
    reports.iter().map(|r| clocks(r, clocks_index)).sum()
}

/// Sum a column; integers widen to `U64`, floats to `F64`
///
/// # Panics
///
/// Panics on an empty report set, a boolean column, or mixed value types.
pub fn sum(reports: &[&[TypedValue]], index: usize) -> TypedValue {
    assert!(!reports.is_empty(), "no reports to sum");

    match reports[0][index] {
        TypedValue::U32(_) | TypedValue::U64(_) => {
            let total = reports
                .iter()
                .map(|r| match r[index] {
                    TypedValue::U32(v) => u64::from(v),
                    TypedValue::U64(v) => v,
                    other => panic!("mixed value types in column {}: {:?}", index, other),
                })
                .sum();
            TypedValue::U64(total)
        }
        TypedValue::F32(_) | TypedValue::F64(_) => {
            let total = reports
                .iter()
                .map(|r| match r[index] {
                    TypedValue::F32(v) => f64::from(v),
                    TypedValue::F64(v) => v,
                    other => panic!("mixed value types in column {}: {:?}", index, other),
                })
                .sum();
            TypedValue::F64(total)
        }
        TypedValue::Bool8(_) => panic!("boolean column {} can not be summed", index),
    }
}

/// `Σ(value × clocks) / Σ(clocks)` for a column
///
/// Integer columns use integer division.
///
/// # Panics
///
/// Panics if `total_clocks` is zero, on a boolean column, or on mixed types.
pub fn clock_weighted(
    reports: &[&[TypedValue]],
    index: usize,
    clocks_index: usize,
    total_clocks: u64,
) -> TypedValue {
    assert!(!reports.is_empty(), "no reports to average");
    assert!(total_clocks > 0, "clock-weighted average over zero total clocks");

    match reports[0][index] {
        TypedValue::U32(_) | TypedValue::U64(_) => {
            let weighted: u128 = reports
                .iter()
                .map(|r| {
                    let value = match r[index] {
                        TypedValue::U32(v) => u64::from(v),
                        TypedValue::U64(v) => v,
                        other => panic!("mixed value types in column {}: {:?}", index, other),
                    };
                    u128::from(value) * u128::from(clocks(r, clocks_index))
                })
                .sum();
            TypedValue::U64((weighted / u128::from(total_clocks)) as u64)
        }
        TypedValue::F32(_) | TypedValue::F64(_) => {
            let weighted: f64 = reports
                .iter()
                .map(|r| {
                    let value = match r[index] {
                        TypedValue::F32(v) => f64::from(v),
                        TypedValue::F64(v) => v,
                        other => panic!("mixed value types in column {}: {:?}", index, other),
                    };
                    value * clocks(r, clocks_index) as f64
                })
                .sum();
            TypedValue::F64(weighted / total_clocks as f64)
        }
        TypedValue::Bool8(_) => panic!("boolean column {} can not be averaged", index),
    }
}
