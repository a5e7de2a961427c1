//! Traced commands and their submissions
//!
//! A [`Command`] is one operation appended to a command list. Every time the
//! list is submitted to a queue the command produces a [`Call`]; immediate
//! lists produce exactly one call at append time.

use crate::clock::SubmitAnchor;
use crate::driver::{CommandListHandle, DeviceHandle, EventHandle, EventPoolHandle, QueueHandle};
use serde::{Deserialize, Serialize};

/// Work-group size set on a kernel (zero when never set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupSize {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl GroupSize {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }
}

/// Number of work-groups in a launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupCount {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl GroupCount {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }
}

/// Static properties of an appended operation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KernelProps {
    /// Kernel name or fixed operation label
    pub name: String,
    /// Max sub-group size; zero for transfers and barriers
    pub simd_width: u32,
    /// Bytes moved; zero for kernels and barriers
    pub bytes_transferred: u64,
    pub group_count: GroupCount,
    pub group_size: GroupSize,
}

impl KernelProps {
    /// Properties of a kernel launch
    pub fn kernel(
        name: impl Into<String>,
        simd_width: u32,
        group_size: GroupSize,
        group_count: Option<GroupCount>,
    ) -> Self {
        Self {
            name: name.into(),
            simd_width,
            bytes_transferred: 0,
            group_count: group_count.unwrap_or_default(),
            group_size,
        }
    }

    /// Properties of a transfer or barrier
    pub fn transfer(label: impl Into<String>, bytes_transferred: u64) -> Self {
        Self {
            name: label.into(),
            bytes_transferred,
            ..Default::default()
        }
    }

    /// Name used for the kernel table and intervals
    ///
    /// Verbose kernels: `name[SIMD<w> {gx; gy; gz} {sx; sy; sz}]`.
    /// Verbose transfers: `name[<n> bytes]`.
    pub fn display_name(&self, verbose: bool) -> String {
        assert!(!self.name.is_empty(), "operation name must not be empty");

        if !verbose {
            return self.name.clone();
        }

        if self.simd_width > 0 {
            format!(
                "{}[SIMD{} {{{}; {}; {}}} {{{}; {}; {}}}]",
                self.name,
                self.simd_width,
                self.group_count.x,
                self.group_count.y,
                self.group_count.z,
                self.group_size.x,
                self.group_size.y,
                self.group_size.z
            )
        } else if self.bytes_transferred > 0 {
            format!("{}[{} bytes]", self.name, self.bytes_transferred)
        } else {
            self.name.clone()
        }
    }
}

/// Who is responsible for destroying a command's completion event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOwnership {
    /// Created by the tracer; destroyed together with the command
    Owned {
        pool: EventPoolHandle,
        event: EventHandle,
    },
    /// Supplied by the application; never destroyed here
    Borrowed(EventHandle),
}

impl EventOwnership {
    pub fn event(&self) -> EventHandle {
        match self {
            EventOwnership::Owned { event, .. } | EventOwnership::Borrowed(event) => *event,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, EventOwnership::Owned { .. })
    }
}

/// One traced operation appended to a command list
#[derive(Debug, Clone)]
pub struct Command {
    pub props: KernelProps,
    pub event: EventOwnership,
    pub device: DeviceHandle,
    /// Process-wide id, assigned on registration (zero before)
    pub kernel_id: u64,
    /// Host time of the append
    pub append_time: u64,
    /// Device timer frequency snapshot
    pub timer_frequency: u64,
    /// Number of calls produced so far
    pub call_count: u64,
}

impl Command {
    pub fn new(
        props: KernelProps,
        event: EventOwnership,
        device: DeviceHandle,
        append_time: u64,
        timer_frequency: u64,
    ) -> Self {
        assert!(timer_frequency > 0, "device timer frequency must be non-zero");
        Self {
            props,
            event,
            device,
            kernel_id: 0,
            append_time,
            timer_frequency,
            call_count: 0,
        }
    }
}

/// Stable address of a command inside its list's arena
///
/// `epoch` changes on every reset/destroy of the list, so a reference that
/// survived a teardown is detected instead of silently aliasing a new command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandRef {
    pub list: CommandListHandle,
    pub epoch: u64,
    pub slot: usize,
}

/// One submission of a command to a queue
#[derive(Debug, Clone)]
pub struct Call {
    pub command: CommandRef,
    pub queue: QueueHandle,
    /// Host/device timestamps read together at submission
    pub anchor: SubmitAnchor,
    /// Per-command sequence number, starting at 1
    pub call_id: u64,
}

impl Call {
    pub fn new(command: CommandRef, queue: QueueHandle, anchor: SubmitAnchor) -> Self {
        Self {
            command,
            queue,
            anchor,
            call_id: 0,
        }
    }

    pub fn submit_time(&self) -> u64 {
        self.anchor.host_time
    }

    pub fn device_submit_time(&self) -> u64 {
        self.anchor.device_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gemm_props() -> KernelProps {
        KernelProps::kernel(
            "GEMM",
            32,
            GroupSize::new(64, 1, 1),
            Some(GroupCount::new(2, 1, 1)),
        )
    }

    #[test]
    fn test_display_name_plain() {
        assert_eq!(gemm_props().display_name(false), "GEMM");
    }

    #[test]
    fn test_display_name_verbose_kernel() {
        assert_eq!(
            gemm_props().display_name(true),
            "GEMM[SIMD32 {2; 1; 1} {64; 1; 1}]"
        );
    }

    #[test]
    fn test_display_name_verbose_transfer() {
        let props = KernelProps::transfer("zeCommandListAppendMemoryCopy", 4096);
        assert_eq!(
            props.display_name(true),
            "zeCommandListAppendMemoryCopy[4096 bytes]"
        );
    }

    #[test]
    fn test_display_name_verbose_barrier_has_no_suffix() {
        let props = KernelProps::transfer("zeCommandListAppendBarrier", 0);
        assert_eq!(props.display_name(true), "zeCommandListAppendBarrier");
    }

    #[test]
    fn test_kernel_without_group_count() {
        let props = KernelProps::kernel("k", 16, GroupSize::default(), None);
        assert_eq!(props.group_count, GroupCount::default());
    }

    #[test]
    fn test_event_ownership() {
        let owned = EventOwnership::Owned {
            pool: EventPoolHandle(1),
            event: EventHandle(2),
        };
        let borrowed = EventOwnership::Borrowed(EventHandle(3));

        assert!(owned.is_owned());
        assert_eq!(owned.event(), EventHandle(2));
        assert!(!borrowed.is_owned());
        assert_eq!(borrowed.event(), EventHandle(3));
    }

    #[test]
    fn test_call_anchor_accessors() {
        let cref = CommandRef {
            list: CommandListHandle(1),
            epoch: 0,
            slot: 0,
        };
        let call = Call::new(cref, QueueHandle(9), SubmitAnchor::new(1000, 500));
        assert_eq!(call.submit_time(), 1000);
        assert_eq!(call.device_submit_time(), 500);
        assert_eq!(call.call_id, 0);
    }
}
