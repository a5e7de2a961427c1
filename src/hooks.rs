//! Driver-facing enter/exit hooks
//!
//! A backend forwards every intercepted driver entrypoint here. Append and
//! queue-execute entrypoints come in pairs: the enter hook returns an
//! in-flight token that the backend hands back to the matching exit hook
//! together with the driver's result.
//!
//! ```text
//! on_enter_append ──► InFlightAppend ──► driver append ──► on_exit_append
//!                                                           ├─ Ok:  register command (+ call if immediate)
//!                                                           └─ Err: discard, free owned event
//! ```
//!
//! While tracing is disabled the enter hooks hand out no tokens. Command list,
//! kernel and image lifetime hooks keep running so the tables stay consistent
//! across a disable/enable cycle.
//!
//! Teardown hooks (list destroy/reset, queue destroy) run on exit and leave
//! the tables untouched when the driver rejected the call.

use crate::clock::SubmitAnchor;
use crate::collector::KernelCollector;
use crate::command::{Call, Command, EventOwnership, GroupCount, GroupSize, KernelProps};
use crate::driver::{
    CommandListHandle, ContextHandle, CopyRegion, DeviceHandle, DriverApi, EventHandle,
    EventPoolDesc, EventPoolFlags, ImageDesc, ImageHandle, ImageRegion, KernelHandle, QueueHandle,
};
use crate::error::{DriverError, Result, TracerError};
use crate::registry::CommandRegistry;

/// An intercepted command-list append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOp {
    LaunchKernel {
        kernel: KernelHandle,
        group_count: Option<GroupCount>,
    },
    LaunchCooperativeKernel {
        kernel: KernelHandle,
        group_count: Option<GroupCount>,
    },
    /// Launch arguments live in device memory and are unknown on the host
    LaunchKernelIndirect { kernel: KernelHandle },
    MemoryCopy { size: u64 },
    MemoryFill { size: u64 },
    MemoryCopyRegion {
        region: Option<CopyRegion>,
        pitch: u64,
    },
    MemoryCopyFromContext { size: u64 },
    Barrier,
    MemoryRangesBarrier,
    ImageCopy { src: ImageHandle },
    ImageCopyRegion { src: ImageHandle },
    ImageCopyToMemory { src: ImageHandle },
    ImageCopyFromMemory { region: Option<ImageRegion> },
}

impl AppendOp {
    /// Fixed operation label for non-kernel appends
    pub fn label(&self) -> Option<&'static str> {
        match self {
            AppendOp::LaunchKernel { .. }
            | AppendOp::LaunchCooperativeKernel { .. }
            | AppendOp::LaunchKernelIndirect { .. } => None,
            AppendOp::MemoryCopy { .. } => Some("zeCommandListAppendMemoryCopy"),
            AppendOp::MemoryFill { .. } => Some("zeCommandListAppendMemoryFill"),
            AppendOp::MemoryCopyRegion { .. } => Some("zeCommandListAppendMemoryCopyRegion"),
            AppendOp::MemoryCopyFromContext { .. } => {
                Some("zeCommandListAppendMemoryCopyFromContext")
            }
            AppendOp::Barrier => Some("zeCommandListAppendBarrier"),
            AppendOp::MemoryRangesBarrier => Some("zeCommandListAppendMemoryRangesBarrier"),
            AppendOp::ImageCopy { .. } => Some("zeCommandListAppendImageCopy"),
            AppendOp::ImageCopyRegion { .. } => Some("zeCommandListAppendImageCopyRegion"),
            AppendOp::ImageCopyToMemory { .. } => Some("zeCommandListAppendImageCopyToMemory"),
            AppendOp::ImageCopyFromMemory { .. } => {
                Some("zeCommandListAppendImageCopyFromMemory")
            }
        }
    }

    fn props(&self, driver: &dyn DriverApi, registry: &CommandRegistry) -> KernelProps {
        let kernel_props = |kernel: KernelHandle, group_count: Option<GroupCount>| {
            KernelProps::kernel(
                driver.kernel_name(kernel),
                driver.kernel_max_subgroup_size(kernel),
                registry.group_size(kernel),
                group_count,
            )
        };

        let bytes = match *self {
            AppendOp::LaunchKernel {
                kernel,
                group_count,
            }
            | AppendOp::LaunchCooperativeKernel {
                kernel,
                group_count,
            } => return kernel_props(kernel, group_count),
            AppendOp::LaunchKernelIndirect { kernel } => return kernel_props(kernel, None),
            AppendOp::MemoryCopy { size }
            | AppendOp::MemoryFill { size }
            | AppendOp::MemoryCopyFromContext { size } => size,
            AppendOp::MemoryCopyRegion { region, pitch } => {
                region.map_or(0, |r| copy_region_bytes(&r, pitch))
            }
            AppendOp::Barrier | AppendOp::MemoryRangesBarrier => 0,
            AppendOp::ImageCopy { src }
            | AppendOp::ImageCopyRegion { src }
            | AppendOp::ImageCopyToMemory { src } => registry.image_size(src),
            AppendOp::ImageCopyFromMemory { region } => region.map_or(0, |r| image_region_bytes(&r)),
        };

        let label = self.label().unwrap_or("unknown");
        KernelProps::transfer(label, bytes)
    }
}

/// Bytes moved by a buffer region copy
pub fn copy_region_bytes(region: &CopyRegion, pitch: u64) -> u64 {
    let bytes = region.width * region.height * pitch;
    if region.depth != 0 {
        bytes * region.depth
    } else {
        bytes
    }
}

/// Bytes written by an image copy from memory
pub fn image_region_bytes(region: &ImageRegion) -> u64 {
    let bytes = region.width * region.height;
    if region.depth != 0 {
        bytes * region.depth
    } else {
        bytes
    }
}

/// Descriptor to create a caller's event pool with, so its events carry
/// kernel timestamps
///
/// IPC pools can not be timestamped and are left alone (`None`).
pub fn profiling_pool_desc(desc: &EventPoolDesc) -> Option<EventPoolDesc> {
    if desc.flags.contains(EventPoolFlags::IPC) {
        return None;
    }
    Some(EventPoolDesc {
        flags: desc
            .flags
            .with(EventPoolFlags::KERNEL_TIMESTAMP)
            .with(EventPoolFlags::HOST_VISIBLE),
        count: desc.count,
    })
}

/// Command built by an enter hook, waiting for the driver's result
#[derive(Debug)]
pub struct InFlightAppend {
    list: CommandListHandle,
    command: Command,
    /// Submission anchor of an immediate list
    anchor: Option<SubmitAnchor>,
}

impl InFlightAppend {
    pub fn list(&self) -> CommandListHandle {
        self.list
    }

    /// Event the driver must signal on completion
    pub fn event(&self) -> EventHandle {
        self.command.event.event()
    }

    pub fn is_immediate(&self) -> bool {
        self.anchor.is_some()
    }
}

/// Anchors captured for a batch submission
#[derive(Debug)]
pub struct SubmitToken {
    queue: QueueHandle,
    anchors: Vec<(CommandListHandle, SubmitAnchor)>,
}

impl SubmitToken {
    pub fn queue(&self) -> QueueHandle {
        self.queue
    }

    pub fn anchors(&self) -> &[(CommandListHandle, SubmitAnchor)] {
        &self.anchors
    }
}

impl KernelCollector {
    /// Build a command for an append to `list`
    ///
    /// If the caller passes no signal event one is created with the minimal
    /// profiling configuration and written back to `signal_event`; the driver
    /// call must then use it. Returns `None` when the append is not traced.
    ///
    /// # Panics
    ///
    /// Panics if `list` was never registered.
    pub fn on_enter_append(
        &self,
        list: CommandListHandle,
        op: &AppendOp,
        signal_event: &mut Option<EventHandle>,
    ) -> Option<InFlightAppend> {
        if !self.is_enabled() {
            return None;
        }

        let (context, device, props, append_time, anchor) = {
            let state = self.lock();
            let registry = &state.registry;
            let device = registry.device(list);
            let props = op.props(self.driver.as_ref(), registry);

            let append_time = self.clock.timestamp();
            let anchor = registry
                .is_immediate(list)
                .then(|| SubmitAnchor::new(append_time, self.driver.masked_timestamp(device)));

            (registry.context(list), device, props, append_time, anchor)
        };

        let event = match *signal_event {
            Some(event) => EventOwnership::Borrowed(event),
            None => match self.create_profiling_event(context) {
                Ok(owned) => {
                    *signal_event = Some(owned.event());
                    owned
                }
                Err(e) => {
                    tracing::warn!("{} will not be traced: {}", props.name, e);
                    return None;
                }
            },
        };

        let frequency = self.driver.timer_frequency(device);
        tracing::debug!(
            list = %list,
            op = %props.name,
            event = %event.event(),
            owned = event.is_owned(),
            "append intercepted"
        );

        Some(InFlightAppend {
            list,
            command: Command::new(props, event, device, append_time, frequency),
            anchor,
        })
    }

    /// Register or discard the command built by [`Self::on_enter_append`]
    pub fn on_exit_append(
        &self,
        append: InFlightAppend,
        result: std::result::Result<(), DriverError>,
    ) {
        if let Err(e) = result {
            tracing::debug!(list = %append.list, "append failed, command discarded: {}", e);
            self.release_command(&append.command);
            return;
        }

        let mut state = self.lock();
        let cref = state.registry.add_command(append.list, append.command);
        if let Some(anchor) = append.anchor {
            state
                .registry
                .add_call(Call::new(cref, QueueHandle::from(append.list), anchor));
        }
    }

    fn create_profiling_event(&self, context: ContextHandle) -> Result<EventOwnership> {
        let pool = self
            .driver
            .create_event_pool(context, &EventPoolDesc::profiling())
            .map_err(TracerError::EventCreate)?;

        match self.driver.create_event(pool) {
            Ok(event) => Ok(EventOwnership::Owned { pool, event }),
            Err(e) => {
                if let Err(destroy) = self.driver.destroy_event_pool(pool) {
                    tracing::warn!("Unable to destroy profiling event pool {}: {}", pool, destroy);
                }
                Err(TracerError::EventCreate(e))
            }
        }
    }

    /// Capture a (host, device) anchor for every list in a batch submission
    pub fn on_enter_execute(
        &self,
        queue: QueueHandle,
        lists: &[CommandListHandle],
    ) -> Option<SubmitToken> {
        if !self.is_enabled() {
            return None;
        }

        let state = self.lock();
        let anchors = lists
            .iter()
            .map(|&list| {
                let device = state.registry.device(list);
                let anchor =
                    SubmitAnchor::new(self.clock.timestamp(), self.driver.masked_timestamp(device));
                (list, anchor)
            })
            .collect();

        Some(SubmitToken { queue, anchors })
    }

    /// Materialize one call per command of every submitted list
    pub fn on_exit_execute(
        &self,
        token: SubmitToken,
        result: std::result::Result<(), DriverError>,
    ) {
        if let Err(e) = result {
            tracing::debug!(queue = %token.queue, "submission failed: {}", e);
            return;
        }

        let mut state = self.lock();
        for (list, anchor) in token.anchors {
            // Immediate commands already became calls at append time
            if state.registry.is_immediate(list) {
                tracing::debug!(
                    queue = %token.queue,
                    list = %list,
                    "immediate list in execute skipped"
                );
                continue;
            }
            let calls = state.registry.add_calls(list, token.queue, anchor);
            tracing::debug!(queue = %token.queue, list = %list, calls, "list submitted");
        }
    }

    pub fn on_exit_command_list_create(
        &self,
        list: CommandListHandle,
        context: ContextHandle,
        device: DeviceHandle,
        immediate: bool,
        result: std::result::Result<(), DriverError>,
    ) {
        if result.is_ok() {
            self.lock()
                .registry
                .create_list(list, context, device, immediate);
        }
    }

    /// Drain completions, then drop the list and its commands
    pub fn on_exit_command_list_destroy(
        &self,
        list: CommandListHandle,
        result: std::result::Result<(), DriverError>,
    ) {
        if let Err(e) = result {
            tracing::debug!(list = %list, "list destroy failed: {}", e);
            return;
        }

        let (finished, commands) = {
            let mut state = self.lock();
            let finished = self.sweep_locked(&mut state);
            (finished, state.registry.remove_list(list))
        };
        self.notify(&finished);
        self.release_commands(commands);
    }

    /// Drain completions, then clear the list's commands
    pub fn on_exit_command_list_reset(
        &self,
        list: CommandListHandle,
        result: std::result::Result<(), DriverError>,
    ) {
        if let Err(e) = result {
            tracing::debug!(list = %list, "list reset failed: {}", e);
            return;
        }

        let (finished, commands) = {
            let mut state = self.lock();
            let finished = self.sweep_locked(&mut state);
            (finished, state.registry.reset_list(list))
        };
        self.notify(&finished);
        self.release_commands(commands);
    }

    pub fn on_exit_queue_synchronize(&self, result: std::result::Result<(), DriverError>) {
        if result.is_ok() {
            self.process_calls();
        }
    }

    pub fn on_exit_queue_destroy(
        &self,
        queue: QueueHandle,
        result: std::result::Result<(), DriverError>,
    ) {
        match result {
            Ok(()) => {
                self.process_calls();
            }
            Err(e) => tracing::debug!(queue = %queue, "queue destroy failed: {}", e),
        }
    }

    pub fn on_enter_event_destroy(&self, event: EventHandle) {
        self.process_event(event);
    }

    pub fn on_enter_event_host_reset(&self, event: EventHandle) {
        self.process_event(event);
    }

    pub fn on_exit_event_host_synchronize(
        &self,
        event: EventHandle,
        result: std::result::Result<(), DriverError>,
    ) {
        if result.is_ok() {
            self.process_event(event);
        }
    }

    /// Descriptor override for an application event pool
    pub fn on_enter_event_pool_create(&self, desc: &EventPoolDesc) -> Option<EventPoolDesc> {
        if !self.is_enabled() {
            return None;
        }
        profiling_pool_desc(desc)
    }

    pub fn on_exit_kernel_set_group_size(
        &self,
        kernel: KernelHandle,
        size: GroupSize,
        result: std::result::Result<(), DriverError>,
    ) {
        if result.is_ok() {
            self.lock().registry.set_group_size(kernel, size);
        }
    }

    pub fn on_exit_kernel_destroy(
        &self,
        kernel: KernelHandle,
        result: std::result::Result<(), DriverError>,
    ) {
        if result.is_ok() {
            self.lock().registry.remove_group_size(kernel);
        }
    }

    pub fn on_exit_image_create(
        &self,
        image: ImageHandle,
        desc: &ImageDesc,
        result: std::result::Result<(), DriverError>,
    ) {
        if result.is_ok() {
            self.lock().registry.add_image(image, desc.byte_size());
        }
    }

    pub fn on_exit_image_destroy(
        &self,
        image: ImageHandle,
        result: std::result::Result<(), DriverError>,
    ) {
        if result.is_ok() {
            self.lock().registry.remove_image(image);
        }
    }
}
