//! Kernel collector: the composition root of the interception pipeline
//!
//! # Architecture
//!
//! ```text
//! app thread ──► driver entrypoint ──► hooks::on_enter_* ─┐
//!                                                          │  lock
//!                      ┌───────────────────────────────────▼──────────┐
//!                      │ CollectorState                               │
//!                      │   CommandRegistry   (lists, pending calls)   │
//!                      │   CompletionTracker (kernel table, intervals)│
//!                      └───────────────────────────────────┬──────────┘
//!                                                          │  unlock
//!                       finish callback ◄── KernelFinish ◄─┘
//!                       owned events destroyed
//! ```
//!
//! One mutex guards all shared state. Driver calls that can fail or block
//! (event destruction) and the user finish callback run after the guard is
//! dropped.

use crate::clock::HostClock;
use crate::command::{Command, EventOwnership};
use crate::config::TracerConfig;
use crate::driver::{
    Backend, CommandListHandle, DriverApi, DriverHooks, EventHandle, EventStatus, TracerHandle,
};
use crate::error::{Result, TracerError};
use crate::registry::CommandRegistry;
use crate::tracker::{
    sorted_kernel_info, CompletionTracker, DeviceMap, KernelFinish, KernelInfo, KernelInterval,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Notification invoked once per finalized call, outside the collector lock
pub type FinishCallback = Arc<dyn Fn(&KernelFinish) + Send + Sync>;

/// State guarded by the collector lock
#[derive(Debug)]
pub(crate) struct CollectorState {
    pub(crate) registry: CommandRegistry,
    pub(crate) tracker: CompletionTracker,
}

/// Traces every command appended to the driver's command lists
pub struct KernelCollector {
    pub(crate) driver: Arc<dyn DriverApi>,
    hooks: Arc<dyn DriverHooks>,
    pub(crate) clock: Arc<dyn HostClock>,
    config: TracerConfig,
    callback: Option<FinishCallback>,
    tracer: TracerHandle,
    enabled: AtomicBool,
    state: Mutex<CollectorState>,
}

impl std::fmt::Debug for KernelCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelCollector")
            .field("backend", &self.hooks.backend())
            .field("tracer", &self.tracer)
            .field("enabled", &self.is_enabled())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl KernelCollector {
    /// Create a collector, logging and swallowing setup failures
    ///
    /// Returns `None` when the driver can not be traced; the traced
    /// application keeps running untraced.
    pub fn create(
        driver: Arc<dyn DriverApi>,
        hooks: Arc<dyn DriverHooks>,
        clock: Arc<dyn HostClock>,
        config: TracerConfig,
        callback: Option<FinishCallback>,
    ) -> Option<Arc<Self>> {
        match Self::try_create(driver, hooks, clock, config, callback) {
            Ok(collector) => Some(collector),
            Err(e) => {
                tracing::warn!("Unable to create kernel collector: {}", e);
                None
            }
        }
    }

    /// Create a collector, returning the setup error
    ///
    /// # Errors
    ///
    /// - [`TracerError::UnsupportedApiVersion`] on a 1.0 driver
    /// - [`TracerError::TracerCreate`] if the hook sets can not be registered
    pub fn try_create(
        driver: Arc<dyn DriverApi>,
        hooks: Arc<dyn DriverHooks>,
        clock: Arc<dyn HostClock>,
        config: TracerConfig,
        callback: Option<FinishCallback>,
    ) -> Result<Arc<Self>> {
        let version = driver.api_version();
        if !version.supports_tracing() {
            return Err(TracerError::UnsupportedApiVersion {
                major: version.major,
                minor: version.minor,
            });
        }

        let device_map = DeviceMap::from_driver(driver.as_ref());
        let tracer = hooks.register().map_err(TracerError::TracerCreate)?;

        tracing::debug!(
            backend = hooks.backend().name(),
            tracer = %tracer,
            "kernel collector registered"
        );

        let tracker = CompletionTracker::new(
            device_map,
            config.verbose,
            config.kernel_intervals,
            config.interval_domain,
        );

        Ok(Arc::new(Self {
            driver,
            hooks,
            clock,
            config,
            callback,
            tracer,
            enabled: AtomicBool::new(true),
            state: Mutex::new(CollectorState {
                registry: CommandRegistry::new(),
                tracker,
            }),
        }))
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CollectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    pub fn backend(&self) -> Backend {
        self.hooks.backend()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Stop tracing new appends and submissions
    pub fn disable_tracing(&self) -> Result<()> {
        self.hooks
            .set_enabled(self.tracer, false)
            .map_err(TracerError::TracerToggle)?;
        self.enabled.store(false, Ordering::Release);
        tracing::debug!(tracer = %self.tracer, "tracing disabled");
        Ok(())
    }

    pub fn enable_tracing(&self) -> Result<()> {
        self.hooks
            .set_enabled(self.tracer, true)
            .map_err(TracerError::TracerToggle)?;
        self.enabled.store(true, Ordering::Release);
        tracing::debug!(tracer = %self.tracer, "tracing enabled");
        Ok(())
    }

    /// Finalize the pending call waiting on `event`, if it is signalled
    ///
    /// Returns `true` if a call was finalized.
    pub fn process_event(&self, event: EventHandle) -> bool {
        let finish = {
            let mut state = self.lock();
            self.finalize_event_locked(&mut state, event)
        };

        match finish {
            Some(finish) => {
                self.notify(std::slice::from_ref(&finish));
                true
            }
            None => false,
        }
    }

    /// Finalize every signalled pending call
    ///
    /// Returns the number of calls finalized.
    pub fn process_calls(&self) -> usize {
        let finished = {
            let mut state = self.lock();
            self.sweep_locked(&mut state)
        };
        self.notify(&finished);
        finished.len()
    }

    pub(crate) fn finalize_event_locked(
        &self,
        state: &mut CollectorState,
        event: EventHandle,
    ) -> Option<KernelFinish> {
        let index = state.registry.find_pending(event)?;
        match self.driver.event_status(event) {
            EventStatus::Ready => Some(self.finalize_locked(state, index)),
            EventStatus::NotReady => None,
            EventStatus::Error(e) => panic!("unexpected status of event {}: {}", event, e),
        }
    }

    /// Non-blocking pass over all pending calls; order of the rest is kept
    pub(crate) fn sweep_locked(&self, state: &mut CollectorState) -> Vec<KernelFinish> {
        let mut finished = Vec::new();
        let mut index = 0;
        while index < state.registry.pending().len() {
            let call = &state.registry.pending()[index];
            let event = state.registry.command(call.command).event.event();
            match self.driver.event_status(event) {
                EventStatus::Ready => finished.push(self.finalize_locked(state, index)),
                EventStatus::NotReady => index += 1,
                EventStatus::Error(e) => panic!("unexpected status of event {}: {}", event, e),
            }
        }
        finished
    }

    fn finalize_locked(&self, state: &mut CollectorState, index: usize) -> KernelFinish {
        let call = state.registry.remove_pending(index);
        let command = state.registry.command(call.command);
        let timestamp = self
            .driver
            .kernel_timestamp(command.event.event())
            .unwrap_or_else(|e| panic!("kernel timestamp of a signalled event: {}", e));
        state.tracker.finalize(&call, command, timestamp)
    }

    pub(crate) fn notify(&self, finished: &[KernelFinish]) {
        if let Some(callback) = &self.callback {
            for finish in finished {
                callback(finish);
            }
        }
    }

    /// Destroy the events this tracer created for `commands`
    pub(crate) fn release_commands(&self, commands: Vec<Command>) {
        for command in commands {
            self.release_command(&command);
        }
    }

    pub(crate) fn release_command(&self, command: &Command) {
        if let EventOwnership::Owned { pool, event } = command.event {
            if let Err(e) = self.driver.destroy_event(event) {
                tracing::warn!("Unable to destroy profiling event {}: {}", event, e);
            }
            if let Err(e) = self.driver.destroy_event_pool(pool) {
                tracing::warn!("Unable to destroy profiling event pool {}: {}", pool, e);
            }
        }
    }

    /// Kernel table keyed by (possibly verbose) name
    pub fn kernel_info_map(&self) -> BTreeMap<String, KernelInfo> {
        self.lock().tracker.kernel_info().clone()
    }

    /// Kernel table in report order
    pub fn sorted_kernel_info(&self) -> Vec<(String, KernelInfo)> {
        sorted_kernel_info(self.lock().tracker.kernel_info())
    }

    /// Intervals in completion order
    pub fn kernel_intervals(&self) -> Vec<KernelInterval> {
        self.lock().tracker.intervals().to_vec()
    }

    pub fn pending_call_count(&self) -> usize {
        self.lock().registry.pending().len()
    }

    pub fn command_list_count(&self) -> usize {
        self.lock().registry.list_count()
    }

    /// Kernel ids appended to `list` since creation or the last reset
    pub fn kernel_ids(&self, list: CommandListHandle) -> Vec<u64> {
        self.lock().registry.kernel_ids(list).to_vec()
    }

    /// Call ids of the latest submission of `list`
    pub fn call_ids(&self, list: CommandListHandle) -> Vec<u64> {
        self.lock().registry.call_ids(list).to_vec()
    }
}

impl Drop for KernelCollector {
    fn drop(&mut self) {
        if let Err(e) = self.hooks.unregister(self.tracer) {
            tracing::warn!("Unable to unregister driver tracer {}: {}", self.tracer, e);
        }
    }
}
