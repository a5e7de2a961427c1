// Kernel interval to counter row resolution for one sampled device

use super::aggregate::{clock_weighted, sum, total_clocks, CombineRule};
use super::window::select_reports;
use super::{MetricSchema, ReportSource, TypedValue};
use crate::clock::ClockSync;
use crate::config::TracerConfig;
use crate::driver::DeviceHandle;
use crate::error::{Result, TracerError};
use crate::tracker::{DeviceInterval, KernelInterval};
use serde::Serialize;

/// One raw report of a sub-device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub sub_device_id: u32,
    pub values: Vec<TypedValue>,
}

/// Folded reports of one sub-device window, aligned with the schema
///
/// Columns whose combination rule omits them are `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedRow {
    pub kernel_name: String,
    pub sub_device_id: u32,
    pub report_count: usize,
    pub values: Vec<Option<TypedValue>>,
}

#[derive(Debug, Clone, Copy)]
struct ColumnLayout {
    time_index: usize,
    clocks_index: usize,
}

/// Selects and folds counter reports for kernel intervals
///
/// Bound to the root device whose sub-devices the report source samples;
/// intervals of any other device have no reports here.
#[derive(Debug)]
pub struct MetricsAggregator<S: ReportSource> {
    source: S,
    device: DeviceHandle,
    sync: ClockSync,
    layouts: Vec<ColumnLayout>,
}

impl<S: ReportSource> MetricsAggregator<S> {
    /// Aggregator using the configured time and clock column names
    pub fn new(
        source: S,
        device: DeviceHandle,
        sync: ClockSync,
        config: &TracerConfig,
    ) -> Result<Self> {
        Self::with_columns(
            source,
            device,
            sync,
            &config.time_column,
            &config.clocks_column,
        )
    }

    /// # Errors
    ///
    /// Fails if a sub-device has no schema, an empty schema, or lacks one of
    /// the two columns.
    pub fn with_columns(
        source: S,
        device: DeviceHandle,
        sync: ClockSync,
        time_column: &str,
        clocks_column: &str,
    ) -> Result<Self> {
        let mut layouts = Vec::new();
        for sub_device_id in 0..source.sub_device_count() {
            let schema = source.schema(sub_device_id).ok_or_else(|| {
                TracerError::InvalidReportLayout {
                    sub_device_id,
                    reason: "no metric schema".to_string(),
                }
            })?;

            if schema.report_size() == 0 {
                return Err(TracerError::InvalidReportLayout {
                    sub_device_id,
                    reason: "empty metric schema".to_string(),
                });
            }

            let find = |metric: &str| {
                schema
                    .position(metric)
                    .ok_or_else(|| TracerError::MissingMetric {
                        sub_device_id,
                        metric: metric.to_string(),
                    })
            };

            layouts.push(ColumnLayout {
                time_index: find(time_column)?,
                clocks_index: find(clocks_column)?,
            });
        }

        tracing::debug!(
            device = %device,
            sub_devices = layouts.len(),
            "metrics aggregator ready"
        );

        Ok(Self {
            source,
            device,
            sync,
            layouts,
        })
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Root device the reports were sampled on
    pub fn device(&self) -> DeviceHandle {
        self.device
    }

    fn is_sampled(&self, interval: &KernelInterval) -> bool {
        if interval.device != self.device {
            tracing::trace!(
                kernel = %interval.kernel_name,
                device = %interval.device,
                "interval of an unsampled device skipped"
            );
            return false;
        }
        true
    }

    /// # Panics
    ///
    /// Panics for an unknown sub-device.
    pub fn schema(&self, sub_device_id: u32) -> &MetricSchema {
        self.source
            .schema(sub_device_id)
            .unwrap_or_else(|| panic!("sub-device {} has no metric schema", sub_device_id))
    }

    fn layout(&self, sub_device_id: u32) -> ColumnLayout {
        *self
            .layouts
            .get(sub_device_id as usize)
            .unwrap_or_else(|| panic!("sub-device {} is not sampled", sub_device_id))
    }

    /// Every report of a sub-device in capture order
    pub fn raw_reports(&self, sub_device_id: u32) -> Vec<ReportRow> {
        let size = self.schema(sub_device_id).report_size();
        self.source
            .chunks(sub_device_id)
            .into_iter()
            .flat_map(|chunk| chunk.chunks_exact(size))
            .map(|report| ReportRow {
                sub_device_id,
                values: report.to_vec(),
            })
            .collect()
    }

    fn matching(&self, interval: &KernelInterval, window: &DeviceInterval) -> Vec<&[TypedValue]> {
        let layout = self.layout(window.sub_device_id);
        let size = self.schema(window.sub_device_id).report_size();
        let start = self.sync.to_device_ns(window.start, interval.domain);
        let end = self.sync.to_device_ns(window.end, interval.domain);

        select_reports(
            &self.source.chunks(window.sub_device_id),
            size,
            layout.time_index,
            start,
            end,
        )
    }

    /// Reports inside each sub-device window of `interval`
    ///
    /// Empty for an interval of another device.
    pub fn kernel_reports(&self, interval: &KernelInterval) -> Vec<ReportRow> {
        if !self.is_sampled(interval) {
            return Vec::new();
        }

        interval
            .device_intervals
            .iter()
            .flat_map(|window| {
                let sub_device_id = window.sub_device_id;
                self.matching(interval, window)
                    .into_iter()
                    .map(move |report| ReportRow {
                        sub_device_id,
                        values: report.to_vec(),
                    })
            })
            .collect()
    }

    /// One folded row per sub-device window that has matching reports
    ///
    /// Empty for an interval of another device.
    pub fn aggregate(&self, interval: &KernelInterval) -> Vec<AggregatedRow> {
        let mut rows = Vec::new();
        if !self.is_sampled(interval) {
            return rows;
        }

        for window in &interval.device_intervals {
            let reports = self.matching(interval, window);
            if reports.is_empty() {
                tracing::debug!(
                    kernel = %interval.kernel_name,
                    sub_device = window.sub_device_id,
                    "no reports inside kernel window"
                );
                continue;
            }
            rows.push(self.fold(&interval.kernel_name, window.sub_device_id, &reports));
        }
        rows
    }

    /// Rows of every interval recorded on the sampled device, in interval
    /// order
    pub fn aggregate_all(&self, intervals: &[KernelInterval]) -> Vec<AggregatedRow> {
        intervals
            .iter()
            .flat_map(|interval| self.aggregate(interval))
            .collect()
    }

    fn fold(
        &self,
        kernel_name: &str,
        sub_device_id: u32,
        reports: &[&[TypedValue]],
    ) -> AggregatedRow {
        let schema = self.schema(sub_device_id);
        let clocks_index = self.layout(sub_device_id).clocks_index;
        let clocks = total_clocks(reports, clocks_index);

        let values = schema
            .names()
            .iter()
            .zip(schema.kinds())
            .enumerate()
            .map(|(index, (name, &kind))| match CombineRule::for_metric(name, kind) {
                CombineRule::Sum => Some(sum(reports, index)),
                CombineRule::ClockWeighted => {
                    Some(clock_weighted(reports, index, clocks_index, clocks))
                }
                CombineRule::First => Some(reports[0][index]),
                CombineRule::Omit => None,
            })
            .collect();

        AggregatedRow {
            kernel_name: kernel_name.to_string(),
            sub_device_id,
            report_count: reports.len(),
            values,
        }
    }
}
