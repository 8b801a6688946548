use crate::{driver::DriverError, memory::PlanError, Channel};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration for '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("memory planning failed: {0}")]
    MemoryPlanning(#[from] PlanError),

    #[error("hardware setup failed{}: {source}", on_channel(.channel))]
    HardwareSetup {
        channel: Option<Channel>,
        source: DriverError,
    },

    #[error("{channel} acquisition failed: {source}")]
    Acquisition {
        channel: Channel,
        source: DriverError,
    },

    #[error("{channel} captured a non-finite sample at index {index}")]
    InvalidSampleData { channel: Channel, index: usize },

    #[error("{channel} generation failed: {source}")]
    Generation {
        channel: Channel,
        source: DriverError,
    },

    #[error("could not start {channel} runner thread: {source}")]
    RunnerSpawn {
        channel: Channel,
        source: std::io::Error,
    },
}

impl Error {
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

fn on_channel(channel: &Option<Channel>) -> String {
    match channel {
        Some(ch) => format!(" on {ch}"),
        None => String::new(),
    }
}

pub(crate) fn setup_err(channel: Option<Channel>) -> impl Fn(DriverError) -> Error {
    move |source| Error::HardwareSetup { channel, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::RpStatus;

    #[test]
    fn setup_errors_mention_channel_when_known() {
        let err = setup_err(Some(Channel::Ch2))(DriverError::new(
            "set_buffer_region",
            RpStatus::OutOfRange,
        ));
        assert_eq!(
            err.to_string(),
            "hardware setup failed on CH2: set_buffer_region failed: OutOfRange (6)"
        );

        let err = setup_err(None)(DriverError::new("enable_split_trigger", RpStatus::Unsupported));
        assert!(err.to_string().starts_with("hardware setup failed: "));
    }

    #[test]
    fn sample_errors_name_the_channel_and_index() {
        let err = Error::InvalidSampleData {
            channel: Channel::Ch1,
            index: 3,
        };
        assert_eq!(err.to_string(), "CH1 captured a non-finite sample at index 3");
    }
}
