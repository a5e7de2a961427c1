//! Driver capability interfaces
//!
//! The collector never talks to a GPU driver directly. A backend adapts the
//! driver's tracing ABI and handle types to the two traits here:
//!
//! - [`DriverApi`]: device/timer/kernel introspection and event management
//! - [`DriverHooks`]: registration of the tracing layer itself
//!
//! Handles are opaque integers; the backend owns the mapping to real driver
//! objects.

use crate::error::DriverError;
use serde::{Deserialize, Serialize};

macro_rules! driver_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            pub fn raw(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }
    };
}

driver_handle!(
    /// Driver context
    ContextHandle
);
driver_handle!(
    /// Root device or sub-device
    DeviceHandle
);
driver_handle!(
    /// Command list (immediate or deferred)
    CommandListHandle
);
driver_handle!(
    /// Execution queue
    QueueHandle
);
driver_handle!(
    /// Completion signalling event
    EventHandle
);
driver_handle!(EventPoolHandle);
driver_handle!(KernelHandle);
driver_handle!(ImageHandle);
driver_handle!(
    /// Registered tracing layer instance
    TracerHandle
);

/// Immediate command lists execute on append; the list itself stands in for
/// the queue of the resulting calls.
impl From<CommandListHandle> for QueueHandle {
    fn from(list: CommandListHandle) -> Self {
        QueueHandle(list.0)
    }
}

/// Driver API version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

impl ApiVersion {
    pub const V1_0: ApiVersion = ApiVersion { major: 1, minor: 0 };

    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// The tracing layer is unavailable on 1.0 drivers
    pub fn supports_tracing(&self) -> bool {
        *self != Self::V1_0
    }
}

/// Supported driver backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// Asynchronous command-list/queue compute driver
    ComputeDriver,
    /// Legacy runtime exposing the same submission model through a shim
    LegacyRuntime,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::ComputeDriver => "compute-driver",
            Backend::LegacyRuntime => "legacy-runtime",
        }
    }
}

/// Non-blocking completion status of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    /// Signalled; kernel timestamps can be read
    Ready,
    /// Still in flight
    NotReady,
    /// Any other driver status
    Error(DriverError),
}

/// Device-domain kernel start/end ticks recorded by a timestamp event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KernelTimestamp {
    pub start: u64,
    pub end: u64,
}

/// Event pool creation flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventPoolFlags(pub u32);

impl EventPoolFlags {
    pub const HOST_VISIBLE: u32 = 1 << 0;
    pub const IPC: u32 = 1 << 1;
    pub const KERNEL_TIMESTAMP: u32 = 1 << 2;

    pub fn contains(&self, flag: u32) -> bool {
        self.0 & flag == flag
    }

    pub fn with(self, flag: u32) -> Self {
        EventPoolFlags(self.0 | flag)
    }
}

/// Event pool descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventPoolDesc {
    pub flags: EventPoolFlags,
    pub count: u32,
}

impl EventPoolDesc {
    /// Minimum configuration able to record kernel timestamps: one
    /// host-visible timestamp event
    pub fn profiling() -> Self {
        Self {
            flags: EventPoolFlags(EventPoolFlags::KERNEL_TIMESTAMP | EventPoolFlags::HOST_VISIBLE),
            count: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    D1,
    D1Array,
    D2,
    D2Array,
    D3,
    Buffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormatType {
    Uint,
    Sint,
    Unorm,
    Snorm,
    Float,
}

impl ImageFormatType {
    /// Bytes per element
    pub fn element_size(&self) -> u64 {
        match self {
            ImageFormatType::Uint | ImageFormatType::Unorm => std::mem::size_of::<u32>() as u64,
            ImageFormatType::Sint | ImageFormatType::Snorm => std::mem::size_of::<i32>() as u64,
            ImageFormatType::Float => std::mem::size_of::<f32>() as u64,
        }
    }
}

/// Image descriptor as passed to image creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    pub image_type: ImageType,
    pub format: ImageFormatType,
    pub width: u64,
    pub height: u32,
    pub depth: u32,
}

impl ImageDesc {
    /// Total byte size of the image
    pub fn byte_size(&self) -> u64 {
        let elements = match self.image_type {
            ImageType::D2 | ImageType::D2Array => self.width * u64::from(self.height),
            ImageType::D3 => self.width * u64::from(self.height) * u64::from(self.depth),
            ImageType::D1 | ImageType::D1Array | ImageType::Buffer => self.width,
        };
        elements * self.format.element_size()
    }
}

/// Region of a buffer copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopyRegion {
    pub width: u64,
    pub height: u64,
    pub depth: u64,
}

/// Region of an image copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageRegion {
    pub width: u64,
    pub height: u64,
    pub depth: u64,
}

/// Device, kernel and event capabilities the collector calls into
pub trait DriverApi: Send + Sync {
    fn api_version(&self) -> ApiVersion;

    /// Root devices
    fn devices(&self) -> Vec<DeviceHandle>;

    /// Sub-devices of a root device (empty when the device is not partitioned)
    fn sub_devices(&self, device: DeviceHandle) -> Vec<DeviceHandle>;

    /// Device timer frequency in Hz
    fn timer_frequency(&self, device: DeviceHandle) -> u64;

    /// Mask of valid bits in device timestamps
    fn timestamp_mask(&self, device: DeviceHandle) -> u64;

    /// Raw device timestamp
    fn device_timestamp(&self, device: DeviceHandle) -> u64;

    fn kernel_name(&self, kernel: KernelHandle) -> String;

    fn kernel_max_subgroup_size(&self, kernel: KernelHandle) -> u32;

    fn create_event_pool(
        &self,
        context: ContextHandle,
        desc: &EventPoolDesc,
    ) -> Result<EventPoolHandle, DriverError>;

    fn create_event(&self, pool: EventPoolHandle) -> Result<EventHandle, DriverError>;

    fn destroy_event(&self, event: EventHandle) -> Result<(), DriverError>;

    fn destroy_event_pool(&self, pool: EventPoolHandle) -> Result<(), DriverError>;

    /// Non-blocking status query
    fn event_status(&self, event: EventHandle) -> EventStatus;

    /// Device-domain kernel ticks of a signalled event
    fn kernel_timestamp(&self, event: EventHandle) -> Result<KernelTimestamp, DriverError>;

    /// Device timestamp with invalid bits masked off
    fn masked_timestamp(&self, device: DeviceHandle) -> u64 {
        self.device_timestamp(device) & self.timestamp_mask(device)
    }
}

/// Registration of the tracing layer with a driver backend
pub trait DriverHooks: Send + Sync {
    fn backend(&self) -> Backend;

    /// Install the before/after hook sets; hooks start enabled
    fn register(&self) -> Result<TracerHandle, DriverError>;

    fn set_enabled(&self, tracer: TracerHandle, enabled: bool) -> Result<(), DriverError>;

    fn unregister(&self, tracer: TracerHandle) -> Result<(), DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_display_hex() {
        assert_eq!(CommandListHandle(255).to_string(), "0xff");
    }

    #[test]
    fn test_queue_from_immediate_list() {
        let queue: QueueHandle = CommandListHandle(7).into();
        assert_eq!(queue.raw(), 7);
    }

    #[test]
    fn test_api_version_tracing_support() {
        assert!(!ApiVersion::V1_0.supports_tracing());
        assert!(ApiVersion::new(1, 3).supports_tracing());
    }

    #[test]
    fn test_profiling_pool_desc() {
        let desc = EventPoolDesc::profiling();
        assert!(desc.flags.contains(EventPoolFlags::KERNEL_TIMESTAMP));
        assert!(desc.flags.contains(EventPoolFlags::HOST_VISIBLE));
        assert!(!desc.flags.contains(EventPoolFlags::IPC));
        assert_eq!(desc.count, 1);
    }

    #[test]
    fn test_image_byte_size_2d() {
        let desc = ImageDesc {
            image_type: ImageType::D2,
            format: ImageFormatType::Float,
            width: 16,
            height: 8,
            depth: 0,
        };
        assert_eq!(desc.byte_size(), 16 * 8 * 4);
    }

    #[test]
    fn test_image_byte_size_3d() {
        let desc = ImageDesc {
            image_type: ImageType::D3,
            format: ImageFormatType::Sint,
            width: 4,
            height: 4,
            depth: 2,
        };
        assert_eq!(desc.byte_size(), 4 * 4 * 2 * 4);
    }

    #[test]
    fn test_image_byte_size_1d_ignores_height() {
        let desc = ImageDesc {
            image_type: ImageType::D1,
            format: ImageFormatType::Uint,
            width: 32,
            height: 9,
            depth: 9,
        };
        assert_eq!(desc.byte_size(), 128);
    }
}
