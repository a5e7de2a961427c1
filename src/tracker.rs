//! Completion tracking: per-kernel statistics and resolved intervals
//!
//! [`CompletionTracker::finalize`] turns one completed [`Call`] into
//! host-anchored timings. It is called by the collector with the lock held
//! and only touches tracker state; the returned [`KernelFinish`] snapshot is
//! handed to the finish callback after the lock is released.

use crate::clock::{anchor_to_host, device_window, ClockDomain};
use crate::command::{Call, Command};
use crate::driver::{DeviceHandle, DriverApi, KernelTimestamp, QueueHandle};
use fnv::FnvHashMap;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Aggregated timing for one kernel or operation name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KernelInfo {
    /// Sum of all durations (ns)
    pub total_time: u64,
    pub min_time: u64,
    pub max_time: u64,
    pub call_count: u64,
}

impl KernelInfo {
    /// Statistics after the first observed call
    pub fn new(duration: u64) -> Self {
        Self {
            total_time: duration,
            min_time: duration,
            max_time: duration,
            call_count: 1,
        }
    }

    /// Fold one more call into the statistics
    pub fn record(&mut self, duration: u64) {
        self.total_time += duration;
        self.min_time = self.min_time.min(duration);
        self.max_time = self.max_time.max(duration);
        self.call_count += 1;
    }

    pub fn average_time(&self) -> u64 {
        if self.call_count == 0 {
            return 0;
        }
        self.total_time / self.call_count
    }

    /// Report ordering: longest total time first, then most calls
    pub fn report_order(&self, other: &KernelInfo) -> Ordering {
        other
            .total_time
            .cmp(&self.total_time)
            .then(other.call_count.cmp(&self.call_count))
    }
}

/// Kernel table entries in report order (ties broken by name)
pub fn sorted_kernel_info(map: &BTreeMap<String, KernelInfo>) -> Vec<(String, KernelInfo)> {
    let mut sorted: Vec<(String, KernelInfo)> =
        map.iter().map(|(name, info)| (name.clone(), *info)).collect();
    sorted.sort_by(|a, b| a.1.report_order(&b.1).then_with(|| a.0.cmp(&b.0)));
    sorted
}

/// Execution window on one sub-device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceInterval {
    pub start: u64,
    pub end: u64,
    pub sub_device_id: u32,
}

/// Resolved execution window(s) of one completed call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KernelInterval {
    pub kernel_name: String,
    /// Root device the interval is attributed to
    pub device: DeviceHandle,
    /// Clock domain of every `DeviceInterval` timestamp
    pub domain: ClockDomain,
    pub device_intervals: Vec<DeviceInterval>,
}

/// Root devices and their sub-devices
///
/// A root device with sub-devices is assumed to run under implicit scaling,
/// so its work is split into one slice per sub-device. This is a heuristic:
/// a workload running in explicit mode on such a device is over-attributed.
#[derive(Debug, Clone, Default)]
pub struct DeviceMap {
    devices: FnvHashMap<DeviceHandle, Vec<DeviceHandle>>,
}

impl DeviceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enumerate devices and sub-devices once
    pub fn from_driver(driver: &dyn DriverApi) -> Self {
        let mut map = Self::new();
        for device in driver.devices() {
            map.insert(device, driver.sub_devices(device));
        }
        map
    }

    pub fn insert(&mut self, device: DeviceHandle, sub_devices: Vec<DeviceHandle>) {
        let previous = self.devices.insert(device, sub_devices);
        assert!(previous.is_none(), "device {} enumerated twice", device);
    }

    /// Owning root device and sub-device slice ids for work on `device`
    ///
    /// # Panics
    ///
    /// Panics for a device that was never enumerated.
    pub fn slices(&self, device: DeviceHandle) -> (DeviceHandle, Vec<u32>) {
        if let Some(sub_devices) = self.devices.get(&device) {
            if sub_devices.is_empty() {
                return (device, vec![0]);
            }
            let count = sub_devices.len() as u32;
            return (device, (0..count).collect());
        }

        for (root, sub_devices) in &self.devices {
            if let Some(index) = sub_devices.iter().position(|d| *d == device) {
                let index = index as u32;
                return (*root, vec![index]);
            }
        }

        panic!("device {} is not part of the device map", device);
    }
}

/// Owned snapshot passed to the finish callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KernelFinish {
    pub queue: QueueHandle,
    /// `kernel_id.call_id`
    pub id: String,
    pub name: String,
    pub appended: u64,
    pub submitted: u64,
    pub started: u64,
    pub ended: u64,
}

/// Kernel table and interval list
#[derive(Debug)]
pub struct CompletionTracker {
    verbose: bool,
    record_intervals: bool,
    interval_domain: ClockDomain,
    device_map: DeviceMap,
    kernel_info: BTreeMap<String, KernelInfo>,
    intervals: Vec<KernelInterval>,
}

impl CompletionTracker {
    pub fn new(
        device_map: DeviceMap,
        verbose: bool,
        record_intervals: bool,
        interval_domain: ClockDomain,
    ) -> Self {
        Self {
            verbose,
            record_intervals,
            interval_domain,
            device_map,
            kernel_info: BTreeMap::new(),
            intervals: Vec::new(),
        }
    }

    /// Resolve a completed call against its kernel timestamps
    pub fn finalize(
        &mut self,
        call: &Call,
        command: &Command,
        timestamp: KernelTimestamp,
    ) -> KernelFinish {
        let freq = command.timer_frequency;
        let window = anchor_to_host(timestamp.start, timestamp.end, freq, call.anchor);
        let name = command.props.display_name(self.verbose);

        tracing::trace!(
            kernel = %name,
            start = window.start,
            end = window.end,
            "call finalized"
        );

        self.record_info(&name, window.duration());

        if self.record_intervals {
            let (start, end) = match self.interval_domain {
                ClockDomain::Host => (window.start, window.end),
                ClockDomain::Device => device_window(timestamp.start, timestamp.end, freq),
            };
            self.record_interval(name, command.device, start, end);
        }

        assert!(
            command.append_time <= call.submit_time(),
            "command {} submitted before it was appended",
            command.kernel_id
        );

        KernelFinish {
            queue: call.queue,
            id: format!("{}.{}", command.kernel_id, call.call_id),
            name: command.props.name.clone(),
            appended: command.append_time,
            submitted: call.submit_time(),
            started: window.start,
            ended: window.end,
        }
    }

    fn record_info(&mut self, name: &str, duration: u64) {
        match self.kernel_info.get_mut(name) {
            Some(info) => info.record(duration),
            None => {
                self.kernel_info
                    .insert(name.to_string(), KernelInfo::new(duration));
            }
        }
    }

    fn record_interval(&mut self, name: String, device: DeviceHandle, start: u64, end: u64) {
        let (root, slices) = self.device_map.slices(device);
        let device_intervals = slices
            .into_iter()
            .map(|sub_device_id| DeviceInterval {
                start,
                end,
                sub_device_id,
            })
            .collect();

        self.intervals.push(KernelInterval {
            kernel_name: name,
            device: root,
            domain: self.interval_domain,
            device_intervals,
        });
    }

    pub fn kernel_info(&self) -> &BTreeMap<String, KernelInfo> {
        &self.kernel_info
    }

    pub fn intervals(&self) -> &[KernelInterval] {
        &self.intervals
    }
}
