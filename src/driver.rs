//! Register-level operations the loopback needs from the instrument driver.
//!
//! Every operation is addressed to one channel so that the two channel runners
//! can drive their halves of the instrument from separate threads.

use crate::{Channel, TriggerLine, TriggerMode};
use ndarray::{ArrayView1, ArrayViewMut1};
use std::fmt;

/// Status codes returned by the vendor library.
#[repr(i32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RpStatus {
    Ok = 0,
    OpenEeprom = 1,
    OpenMemoryDevice = 2,
    CloseMemoryDevice = 3,
    MapMemoryDevice = 4,
    UnmapMemoryDevice = 5,
    OutOfRange = 6,
    InvalidLedDirection = 7,
    ReadOnlyField = 8,
    WriteToInputPin = 9,
    InvalidPin = 10,
    UninitializedArgument = 11,
    CalibrationMissing = 12,
    CalibrationRead = 13,
    BufferTooSmall = 14,
    InvalidParameter = 15,
    Unsupported = 16,
    NotNormalized = 17,
    BusOpen = 18,
    BusClose = 19,
    BusAccess = 20,
    BusRead = 21,
    BusWrite = 22,
    ModuleNotConnected = 23,
    Unknown = -1,
}

impl From<i32> for RpStatus {
    fn from(value: i32) -> Self {
        match value {
            0 => Self::Ok,
            1 => Self::OpenEeprom,
            2 => Self::OpenMemoryDevice,
            3 => Self::CloseMemoryDevice,
            4 => Self::MapMemoryDevice,
            5 => Self::UnmapMemoryDevice,
            6 => Self::OutOfRange,
            7 => Self::InvalidLedDirection,
            8 => Self::ReadOnlyField,
            9 => Self::WriteToInputPin,
            10 => Self::InvalidPin,
            11 => Self::UninitializedArgument,
            12 => Self::CalibrationMissing,
            13 => Self::CalibrationRead,
            14 => Self::BufferTooSmall,
            15 => Self::InvalidParameter,
            16 => Self::Unsupported,
            17 => Self::NotNormalized,
            18 => Self::BusOpen,
            19 => Self::BusClose,
            20 => Self::BusAccess,
            21 => Self::BusRead,
            22 => Self::BusWrite,
            23 => Self::ModuleNotConnected,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for RpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, *self as i32)
    }
}

/// A failed driver call: which operation, and what the library said.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{op} failed: {status}")]
pub struct DriverError {
    pub op: &'static str,
    pub status: RpStatus,
}

impl DriverError {
    pub fn new(op: &'static str, status: RpStatus) -> Self {
        Self { op, status }
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerState {
    Waiting,
    Triggered,
}

pub trait Driver: Send + Sync {
    /// Reserved DMA region as `(base_address, size_in_bytes)`.
    fn reserved_memory_region(&self) -> DriverResult<(u64, u64)>;
    fn base_sample_rate_hz(&self) -> u64;

    fn reset_channel(&self, ch: Channel) -> DriverResult<()>;
    fn enable_split_trigger(&self, enable: bool) -> DriverResult<()>;

    fn set_acquisition_decimation(&self, ch: Channel, factor: u32) -> DriverResult<()>;
    fn set_trigger_delay(&self, ch: Channel, samples: u32) -> DriverResult<()>;
    fn set_buffer_region(&self, ch: Channel, address: u64, samples: u32) -> DriverResult<()>;
    fn enable_dma_acquisition(&self, ch: Channel, enable: bool) -> DriverResult<()>;

    fn start_acquisition(&self, ch: Channel) -> DriverResult<()>;
    fn stop_acquisition(&self, ch: Channel) -> DriverResult<()>;
    fn set_trigger_source(&self, ch: Channel, source: TriggerMode) -> DriverResult<()>;
    fn set_trigger_level(&self, line: TriggerLine, level: f32) -> DriverResult<()>;
    fn trigger_state(&self, ch: Channel) -> DriverResult<TriggerState>;
    fn buffer_full(&self, ch: Channel) -> DriverResult<bool>;
    fn write_pointer_at_trigger(&self, ch: Channel) -> DriverResult<u32>;
    /// Fill `out` with consecutive samples starting at `pointer`, wrapping
    /// around the channel's circular buffer.
    fn read_samples(&self, ch: Channel, pointer: u32, out: ArrayViewMut1<'_, f32>)
        -> DriverResult<()>;

    fn reserve_generation_region(&self, ch: Channel, start: u64, end: u64) -> DriverResult<()>;
    fn set_generation_decimation(&self, ch: Channel, factor: u32) -> DriverResult<()>;
    fn enable_dma_generation(&self, ch: Channel, enable: bool) -> DriverResult<()>;
    fn set_amplitude_offset_identity(&self, ch: Channel) -> DriverResult<()>;
    fn set_burst_mode(&self, ch: Channel) -> DriverResult<()>;
    fn set_burst_count(&self, ch: Channel, count: u32) -> DriverResult<()>;
    fn set_burst_repetitions(&self, ch: Channel, repetitions: u32) -> DriverResult<()>;
    fn set_burst_period(&self, ch: Channel, ticks: u32) -> DriverResult<()>;
    fn write_waveform(&self, ch: Channel, data: ArrayView1<'_, f32>) -> DriverResult<()>;
    fn enable_output(&self, ch: Channel) -> DriverResult<()>;
    fn trigger_once(&self, ch: Channel) -> DriverResult<()>;
    fn disable_output(&self, ch: Channel) -> DriverResult<()>;

    fn release(&self) -> DriverResult<()>;
}
