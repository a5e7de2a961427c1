// Hardware counter aggregation over kernel intervals
//
// The sampling engine streams fixed-width counter reports per sub-device.
// Each report is a row of typed values laid out by the sub-device's
// MetricSchema; one column carries the report's begin time and one the GPU
// core clocks elapsed in the sample.
//
// Given a KernelInterval, the aggregator selects the reports whose begin time
// falls inside each sub-device window and either lists them or folds them
// into one row per window:
//
//   GpuTime, throughput, event columns      -> sum
//   duration, ratio, core frequency columns -> clock-weighted average
//   timestamp, raw, ReportReason columns    -> first report's value
//   event-with-range, flag columns          -> omitted

mod aggregate;
mod aggregator;
mod window;

pub use aggregate::{
    clock_weighted, sum, total_clocks, CombineRule, AVG_GPU_CORE_FREQUENCY, GPU_TIME, REPORT_REASON,
};
pub use aggregator::{AggregatedRow, MetricsAggregator, ReportRow};
pub use window::select_reports;

use serde::Serialize;
use std::fmt;

/// One counter value as produced by the sampling engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum TypedValue {
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool8(bool),
}

impl TypedValue {
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            TypedValue::U64(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::U32(v) => write!(f, "{}", v),
            TypedValue::U64(v) => write!(f, "{}", v),
            TypedValue::F32(v) => write!(f, "{}", v),
            TypedValue::F64(v) => write!(f, "{}", v),
            TypedValue::Bool8(v) => write!(f, "{}", u8::from(*v)),
        }
    }
}

/// Semantic kind of a counter column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MetricKind {
    Duration,
    Event,
    EventWithRange,
    Throughput,
    Timestamp,
    Flag,
    Ratio,
    Raw,
}

/// Column layout of one sub-device's reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSchema {
    names: Vec<String>,
    kinds: Vec<MetricKind>,
}

impl MetricSchema {
    /// # Panics
    ///
    /// Panics if `names` and `kinds` differ in length.
    pub fn new(names: Vec<String>, kinds: Vec<MetricKind>) -> Self {
        assert_eq!(
            names.len(),
            kinds.len(),
            "metric schema needs one kind per column"
        );
        Self { names, kinds }
    }

    /// Build a schema from `(name, kind)` pairs
    pub fn from_columns<'a>(columns: impl IntoIterator<Item = (&'a str, MetricKind)>) -> Self {
        let (names, kinds) = columns
            .into_iter()
            .map(|(name, kind)| (name.to_string(), kind))
            .unzip();
        Self { names, kinds }
    }

    /// Values per report
    pub fn report_size(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn kinds(&self) -> &[MetricKind] {
        &self.kinds
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// Raw counter reports of the external sampling engine
pub trait ReportSource {
    fn sub_device_count(&self) -> u32;

    fn schema(&self, sub_device_id: u32) -> Option<&MetricSchema>;

    /// Report chunks in capture order, each a flat run of whole reports
    fn chunks(&self, sub_device_id: u32) -> Vec<&[TypedValue]>;
}

/// In-memory report source
#[derive(Debug, Clone, Default)]
pub struct VecReportSource {
    sub_devices: Vec<(MetricSchema, Vec<Vec<TypedValue>>)>,
}

impl VecReportSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sub-device and return its id
    pub fn add_sub_device(&mut self, schema: MetricSchema) -> u32 {
        self.sub_devices.push((schema, Vec::new()));
        (self.sub_devices.len() - 1) as u32
    }

    /// Append one chunk of reports to a sub-device
    ///
    /// # Panics
    ///
    /// Panics if the sub-device is unknown or a report does not match its
    /// schema width.
    pub fn push_chunk(&mut self, sub_device_id: u32, reports: Vec<Vec<TypedValue>>) {
        let (schema, chunks) = self
            .sub_devices
            .get_mut(sub_device_id as usize)
            .unwrap_or_else(|| panic!("sub-device {} is not registered", sub_device_id));

        let size = schema.report_size();
        let mut chunk = Vec::with_capacity(reports.len() * size);
        for report in reports {
            assert_eq!(report.len(), size, "report width does not match schema");
            chunk.extend(report);
        }
        if !chunk.is_empty() {
            chunks.push(chunk);
        }
    }
}

impl ReportSource for VecReportSource {
    fn sub_device_count(&self) -> u32 {
        self.sub_devices.len() as u32
    }

    fn schema(&self, sub_device_id: u32) -> Option<&MetricSchema> {
        self.sub_devices
            .get(sub_device_id as usize)
            .map(|(schema, _)| schema)
    }

    fn chunks(&self, sub_device_id: u32) -> Vec<&[TypedValue]> {
        self.sub_devices
            .get(sub_device_id as usize)
            .map(|(_, chunks)| chunks.iter().map(Vec::as_slice).collect())
            .unwrap_or_default()
    }
}
