pub mod acquisition;
pub mod channel;
pub mod config;
pub mod driver;
pub mod error;
pub mod generation;
pub mod memory;
#[cfg(feature = "redpitaya")]
pub mod rp;
pub mod runner;
pub mod setup;
pub mod sim;
pub mod state;
pub mod stats;
pub mod supervisor;
pub mod waveform;

pub use channel::{
    Channel, ChannelConfig, GenerationSource, TriggerLine, TriggerMode, BYTES_PER_SAMPLE,
    SAMPLE_ALIGNMENT,
};
pub use config::Conf;
pub use driver::{Driver, DriverError};
pub use error::{Error, Result};
pub use generation::Generator;
pub use memory::MemoryPlan;
pub use sim::SimDriver;
pub use supervisor::{StopReason, Supervisor, SupervisorReport};
pub use waveform::{PublishedWaveform, Waveform};
