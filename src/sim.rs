//! In-memory driver for tests, benchmarks and the demo binary
//!
//! [`SimDriver`] implements both [`DriverApi`] and [`DriverHooks`]. Device
//! timers only move when told to, events are signalled explicitly with the
//! kernel ticks they should report, and the next event/pool/tracer creation
//! can be made to fail.
//!
//! ```
//! use kerntrace::driver::{DriverApi, EventStatus};
//! use kerntrace::sim::SimDriver;
//!
//! let sim = SimDriver::new();
//! let device = sim.add_device(1_000_000_000, 0);
//! sim.set_device_time(device, 500);
//! let event = sim.create_user_event();
//! assert_eq!(sim.event_status(event), EventStatus::NotReady);
//! sim.signal(event, 600, 900);
//! assert_eq!(sim.event_status(event), EventStatus::Ready);
//! ```

use crate::clock::HostClock;
use crate::driver::{
    ApiVersion, Backend, CommandListHandle, ContextHandle, DeviceHandle, DriverApi, DriverHooks,
    EventHandle, EventPoolDesc, EventPoolHandle, EventStatus, ImageHandle, KernelHandle,
    KernelTimestamp, QueueHandle, TracerHandle,
};
use crate::error::DriverError;
use fnv::FnvHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const ERROR_INVALID_ARGUMENT: i32 = 0x7800_0004;
pub const ERROR_OUT_OF_DEVICE_MEMORY: i32 = 0x7000_0002;
pub const ERROR_UNINITIALIZED: i32 = 0x7800_0001;

#[derive(Debug, Clone)]
struct SimDevice {
    frequency: u64,
    time: u64,
    sub_devices: Vec<DeviceHandle>,
    root: bool,
}

#[derive(Debug, Clone)]
struct SimEvent {
    pool: EventPoolHandle,
    status: EventStatus,
    timestamp: Option<KernelTimestamp>,
}

#[derive(Debug, Default)]
struct SimState {
    next_handle: u64,
    devices: Vec<(DeviceHandle, SimDevice)>,
    kernels: FnvHashMap<KernelHandle, (String, u32)>,
    pools: FnvHashMap<EventPoolHandle, EventPoolDesc>,
    events: FnvHashMap<EventHandle, SimEvent>,
    tracers: FnvHashMap<TracerHandle, bool>,
    timestamp_mask: u64,
    fail_event_pool: Option<i32>,
    fail_event: Option<i32>,
    fail_register: Option<i32>,
    fail_toggle: Option<i32>,
}

impl SimState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn device(&mut self, device: DeviceHandle) -> &mut SimDevice {
        self.devices
            .iter_mut()
            .find(|(handle, _)| *handle == device)
            .map(|(_, d)| d)
            .unwrap_or_else(|| panic!("simulated device {} does not exist", device))
    }
}

/// Simulated asynchronous-submission driver
#[derive(Debug)]
pub struct SimDriver {
    version: ApiVersion,
    backend: Backend,
    state: Mutex<SimState>,
}

impl Default for SimDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDriver {
    /// A 1.2 compute driver with no devices
    pub fn new() -> Self {
        Self::with_api_version(ApiVersion::new(1, 2))
    }

    pub fn with_api_version(version: ApiVersion) -> Self {
        Self {
            version,
            backend: Backend::ComputeDriver,
            state: Mutex::new(SimState {
                timestamp_mask: u64::MAX,
                ..Default::default()
            }),
        }
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a root device with `sub_devices` tiles sharing its timer
    pub fn add_device(&self, frequency: u64, sub_devices: usize) -> DeviceHandle {
        let mut state = self.lock();
        let root = DeviceHandle(state.handle());
        let tiles: Vec<DeviceHandle> = (0..sub_devices)
            .map(|_| DeviceHandle(state.handle()))
            .collect();

        for &tile in &tiles {
            state.devices.push((
                tile,
                SimDevice {
                    frequency,
                    time: 0,
                    sub_devices: Vec::new(),
                    root: false,
                },
            ));
        }
        state.devices.push((
            root,
            SimDevice {
                frequency,
                time: 0,
                sub_devices: tiles,
                root: true,
            },
        ));
        root
    }

    pub fn set_timestamp_mask(&self, mask: u64) {
        self.lock().timestamp_mask = mask;
    }

    pub fn set_device_time(&self, device: DeviceHandle, ticks: u64) {
        self.lock().device(device).time = ticks;
    }

    pub fn advance_device_time(&self, device: DeviceHandle, ticks: u64) {
        self.lock().device(device).time += ticks;
    }

    pub fn add_kernel(&self, name: &str, simd_width: u32) -> KernelHandle {
        let mut state = self.lock();
        let kernel = KernelHandle(state.handle());
        state.kernels.insert(kernel, (name.to_string(), simd_width));
        kernel
    }

    pub fn create_context(&self) -> ContextHandle {
        ContextHandle(self.lock().handle())
    }

    pub fn create_command_list(&self) -> CommandListHandle {
        CommandListHandle(self.lock().handle())
    }

    pub fn create_queue(&self) -> QueueHandle {
        QueueHandle(self.lock().handle())
    }

    pub fn create_image(&self) -> ImageHandle {
        ImageHandle(self.lock().handle())
    }

    /// Event owned by the application, in its own single-event pool
    pub fn create_user_event(&self) -> EventHandle {
        let mut state = self.lock();
        let pool = EventPoolHandle(state.handle());
        state.pools.insert(pool, EventPoolDesc::profiling());
        let event = EventHandle(state.handle());
        state.events.insert(
            event,
            SimEvent {
                pool,
                status: EventStatus::NotReady,
                timestamp: None,
            },
        );
        event
    }

    /// Complete an event with the given device kernel ticks
    ///
    /// # Panics
    ///
    /// Panics if the event does not exist.
    pub fn signal(&self, event: EventHandle, start: u64, end: u64) {
        let mut state = self.lock();
        let sim_event = state
            .events
            .get_mut(&event)
            .unwrap_or_else(|| panic!("simulated event {} does not exist", event));
        sim_event.status = EventStatus::Ready;
        sim_event.timestamp = Some(KernelTimestamp { start, end });
    }

    /// Force the status reported for an event
    pub fn set_event_status(&self, event: EventHandle, status: EventStatus) {
        if let Some(sim_event) = self.lock().events.get_mut(&event) {
            sim_event.status = status;
        }
    }

    /// Return the event to the not-ready state
    pub fn host_reset(&self, event: EventHandle) {
        if let Some(sim_event) = self.lock().events.get_mut(&event) {
            sim_event.status = EventStatus::NotReady;
            sim_event.timestamp = None;
        }
    }

    pub fn fail_next_event_pool(&self, code: i32) {
        self.lock().fail_event_pool = Some(code);
    }

    pub fn fail_next_event(&self, code: i32) {
        self.lock().fail_event = Some(code);
    }

    pub fn fail_next_register(&self, code: i32) {
        self.lock().fail_register = Some(code);
    }

    pub fn fail_next_toggle(&self, code: i32) {
        self.lock().fail_toggle = Some(code);
    }

    pub fn is_event_alive(&self, event: EventHandle) -> bool {
        self.lock().events.contains_key(&event)
    }

    pub fn live_event_count(&self) -> usize {
        self.lock().events.len()
    }

    pub fn live_pool_count(&self) -> usize {
        self.lock().pools.len()
    }

    /// Enabled state of a registered tracer; `None` once unregistered
    pub fn tracer_enabled(&self, tracer: TracerHandle) -> Option<bool> {
        self.lock().tracers.get(&tracer).copied()
    }

    pub fn registered_tracer_count(&self) -> usize {
        self.lock().tracers.len()
    }
}

impl DriverApi for SimDriver {
    fn api_version(&self) -> ApiVersion {
        self.version
    }

    fn devices(&self) -> Vec<DeviceHandle> {
        self.lock()
            .devices
            .iter()
            .filter(|(_, d)| d.root)
            .map(|(handle, _)| *handle)
            .collect()
    }

    fn sub_devices(&self, device: DeviceHandle) -> Vec<DeviceHandle> {
        self.lock().device(device).sub_devices.clone()
    }

    fn timer_frequency(&self, device: DeviceHandle) -> u64 {
        self.lock().device(device).frequency
    }

    fn timestamp_mask(&self, _device: DeviceHandle) -> u64 {
        self.lock().timestamp_mask
    }

    fn device_timestamp(&self, device: DeviceHandle) -> u64 {
        self.lock().device(device).time
    }

    fn kernel_name(&self, kernel: KernelHandle) -> String {
        self.lock()
            .kernels
            .get(&kernel)
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| panic!("simulated kernel {} does not exist", kernel))
    }

    fn kernel_max_subgroup_size(&self, kernel: KernelHandle) -> u32 {
        self.lock()
            .kernels
            .get(&kernel)
            .map(|(_, simd)| *simd)
            .unwrap_or_else(|| panic!("simulated kernel {} does not exist", kernel))
    }

    fn create_event_pool(
        &self,
        _context: ContextHandle,
        desc: &EventPoolDesc,
    ) -> Result<EventPoolHandle, DriverError> {
        let mut state = self.lock();
        if let Some(code) = state.fail_event_pool.take() {
            return Err(DriverError::new("zeEventPoolCreate", code));
        }
        let pool = EventPoolHandle(state.handle());
        state.pools.insert(pool, *desc);
        Ok(pool)
    }

    fn create_event(&self, pool: EventPoolHandle) -> Result<EventHandle, DriverError> {
        let mut state = self.lock();
        if let Some(code) = state.fail_event.take() {
            return Err(DriverError::new("zeEventCreate", code));
        }
        if !state.pools.contains_key(&pool) {
            return Err(DriverError::new("zeEventCreate", ERROR_INVALID_ARGUMENT));
        }
        let event = EventHandle(state.handle());
        state.events.insert(
            event,
            SimEvent {
                pool,
                status: EventStatus::NotReady,
                timestamp: None,
            },
        );
        Ok(event)
    }

    fn destroy_event(&self, event: EventHandle) -> Result<(), DriverError> {
        self.lock()
            .events
            .remove(&event)
            .map(|_| ())
            .ok_or(DriverError::new("zeEventDestroy", ERROR_INVALID_ARGUMENT))
    }

    fn destroy_event_pool(&self, pool: EventPoolHandle) -> Result<(), DriverError> {
        let mut state = self.lock();
        if state.events.values().any(|e| e.pool == pool) {
            return Err(DriverError::new("zeEventPoolDestroy", ERROR_INVALID_ARGUMENT));
        }
        state
            .pools
            .remove(&pool)
            .map(|_| ())
            .ok_or(DriverError::new("zeEventPoolDestroy", ERROR_INVALID_ARGUMENT))
    }

    fn event_status(&self, event: EventHandle) -> EventStatus {
        self.lock()
            .events
            .get(&event)
            .map(|e| e.status)
            .unwrap_or(EventStatus::Error(DriverError::new(
                "zeEventQueryStatus",
                ERROR_INVALID_ARGUMENT,
            )))
    }

    fn kernel_timestamp(&self, event: EventHandle) -> Result<KernelTimestamp, DriverError> {
        self.lock()
            .events
            .get(&event)
            .and_then(|e| e.timestamp)
            .ok_or(DriverError::new(
                "zeEventQueryKernelTimestamp",
                ERROR_INVALID_ARGUMENT,
            ))
    }
}

impl DriverHooks for SimDriver {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn register(&self) -> Result<TracerHandle, DriverError> {
        let mut state = self.lock();
        if let Some(code) = state.fail_register.take() {
            return Err(DriverError::new("zelTracerCreate", code));
        }
        let tracer = TracerHandle(state.handle());
        state.tracers.insert(tracer, true);
        Ok(tracer)
    }

    fn set_enabled(&self, tracer: TracerHandle, enabled: bool) -> Result<(), DriverError> {
        let mut state = self.lock();
        if let Some(code) = state.fail_toggle.take() {
            return Err(DriverError::new("zelTracerSetEnabled", code));
        }
        match state.tracers.get_mut(&tracer) {
            Some(flag) => {
                *flag = enabled;
                Ok(())
            }
            None => Err(DriverError::new("zelTracerSetEnabled", ERROR_UNINITIALIZED)),
        }
    }

    fn unregister(&self, tracer: TracerHandle) -> Result<(), DriverError> {
        self.lock()
            .tracers
            .remove(&tracer)
            .map(|_| ())
            .ok_or(DriverError::new("zelTracerDestroy", ERROR_UNINITIALIZED))
    }
}

/// Host clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    pub fn set(&self, time: u64) {
        self.now.store(time, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: u64) {
        self.now.fetch_add(delta, Ordering::SeqCst);
    }
}

impl HostClock for ManualClock {
    fn timestamp(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_devices_and_sub_devices() {
        let sim = SimDriver::new();
        let flat = sim.add_device(1_000, 0);
        let scaled = sim.add_device(2_000, 2);

        assert_eq!(sim.devices(), vec![flat, scaled]);
        assert!(sim.sub_devices(flat).is_empty());
        let tiles = sim.sub_devices(scaled);
        assert_eq!(tiles.len(), 2);
        assert_eq!(sim.timer_frequency(tiles[1]), 2_000);
    }

    #[test]
    fn test_masked_timestamp() {
        let sim = SimDriver::new();
        let device = sim.add_device(1_000, 0);
        sim.set_device_time(device, 0x1_0000_0010);
        sim.set_timestamp_mask(0xffff_ffff);
        assert_eq!(sim.masked_timestamp(device), 0x10);
    }

    #[test]
    fn test_event_pool_failure_is_one_shot() {
        let sim = SimDriver::new();
        let context = sim.create_context();
        sim.fail_next_event_pool(ERROR_OUT_OF_DEVICE_MEMORY);
        assert!(sim
            .create_event_pool(context, &EventPoolDesc::profiling())
            .is_err());
        assert!(sim
            .create_event_pool(context, &EventPoolDesc::profiling())
            .is_ok());
    }

    #[test]
    fn test_pool_with_live_events_can_not_be_destroyed() {
        let sim = SimDriver::new();
        let pool = sim
            .create_event_pool(sim.create_context(), &EventPoolDesc::profiling())
            .unwrap();
        let event = sim.create_event(pool).unwrap();
        assert!(sim.destroy_event_pool(pool).is_err());
        sim.destroy_event(event).unwrap();
        sim.destroy_event_pool(pool).unwrap();
        assert_eq!(sim.live_pool_count(), 0);
    }

    #[test]
    fn test_tracer_lifecycle() {
        let sim = SimDriver::new();
        let tracer = sim.register().unwrap();
        assert_eq!(sim.tracer_enabled(tracer), Some(true));
        sim.set_enabled(tracer, false).unwrap();
        assert_eq!(sim.tracer_enabled(tracer), Some(false));
        sim.unregister(tracer).unwrap();
        assert_eq!(sim.tracer_enabled(tracer), None);
        assert!(sim.unregister(tracer).is_err());
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(100);
        clock.advance(5);
        assert_eq!(clock.timestamp(), 105);
        clock.set(7);
        assert_eq!(clock.timestamp(), 7);
    }
}
