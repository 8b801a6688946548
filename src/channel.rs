use serde::Deserialize;
use std::fmt;

/// DMA transfer granularity of the acquisition and generation engines, in samples.
pub const SAMPLE_ALIGNMENT: u64 = 128;

/// Raw samples sit in DMA memory as 16 bit words.
pub const BYTES_PER_SAMPLE: u64 = 2;

/// One of the two physical channels. Acquisition channel n is paired with
/// generator channel n.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    Ch1,
    Ch2,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Ch1, Channel::Ch2];

    pub fn index(self) -> usize {
        match self {
            Channel::Ch1 => 0,
            Channel::Ch2 => 1,
        }
    }

    pub fn partner(self) -> Channel {
        match self {
            Channel::Ch1 => Channel::Ch2,
            Channel::Ch2 => Channel::Ch1,
        }
    }

    pub fn input(self) -> TriggerLine {
        match self {
            Channel::Ch1 => TriggerLine::In1,
            Channel::Ch2 => TriggerLine::In2,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Ch1 => write!(f, "CH1"),
            Channel::Ch2 => write!(f, "CH2"),
        }
    }
}

/// Physical input whose level threshold arms a trigger.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TriggerLine {
    #[serde(rename = "IN1")]
    In1,
    #[serde(rename = "IN2")]
    In2,
}

impl fmt::Display for TriggerLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerLine::In1 => write!(f, "IN1"),
            TriggerLine::In2 => write!(f, "IN2"),
        }
    }
}

/// Hardware trigger source selector.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerMode {
    #[serde(rename = "CH1_PE")]
    Ch1Rising,
    #[serde(rename = "CH1_NE")]
    Ch1Falling,
    #[serde(rename = "CH2_PE")]
    Ch2Rising,
    #[serde(rename = "CH2_NE")]
    Ch2Falling,
}

impl TriggerMode {
    pub fn line(self) -> TriggerLine {
        match self {
            TriggerMode::Ch1Rising | TriggerMode::Ch1Falling => TriggerLine::In1,
            TriggerMode::Ch2Rising | TriggerMode::Ch2Falling => TriggerLine::In2,
        }
    }

    pub fn is_rising(self) -> bool {
        matches!(self, TriggerMode::Ch1Rising | TriggerMode::Ch2Rising)
    }
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TriggerMode::Ch1Rising => "CH1_PE",
            TriggerMode::Ch1Falling => "CH1_NE",
            TriggerMode::Ch2Rising => "CH2_PE",
            TriggerMode::Ch2Falling => "CH2_NE",
        };
        write!(f, "{name}")
    }
}

/// Which acquisition buffer feeds a generator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum GenerationSource {
    #[default]
    SameChannel,
    CrossChannel,
}

impl GenerationSource {
    /// Resolve an absolute input name relative to the generator's own channel.
    pub fn resolve(channel: Channel, input: TriggerLine) -> Self {
        if channel.input() == input {
            GenerationSource::SameChannel
        } else {
            GenerationSource::CrossChannel
        }
    }

    /// Acquisition channel whose captures feed `channel`'s generator.
    pub fn source_channel(self, channel: Channel) -> Channel {
        match self {
            GenerationSource::SameChannel => channel,
            GenerationSource::CrossChannel => channel.partner(),
        }
    }
}

/// Burst shape replayed on every trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BurstSettings {
    pub count: u32,
    pub repetitions: u32,
    pub period_ticks: u32,
}

/// Fully validated parameters of one acquisition/generation channel pair.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelConfig {
    pub channel: Channel,
    pub trigger_mode: TriggerMode,
    pub trigger_level: f32,
    pub buffer_duration_us: u64,
    pub buffer_samples: u32,
    pub burst: BurstSettings,
    pub generation_source: GenerationSource,
}

impl ChannelConfig {
    pub fn buffer_bytes(&self) -> u64 {
        u64::from(self.buffer_samples) * BYTES_PER_SAMPLE
    }
}

pub fn ceil_to_multiple(value: u64, multiple: u64) -> u64 {
    value.div_ceil(multiple) * multiple
}

/// Number of samples covering `duration_us` at `base_rate_hz`, rounded up to the
/// DMA granularity. Returns `None` on overflow or when the result is zero.
pub fn buffer_samples_for(duration_us: u64, base_rate_hz: u64) -> Option<u32> {
    let raw = duration_us.checked_mul(base_rate_hz)?.div_ceil(1_000_000);
    let aligned = ceil_to_multiple(raw, SAMPLE_ALIGNMENT);
    match u32::try_from(aligned) {
        Ok(0) | Err(_) => None,
        Ok(samples) => Some(samples),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hundred_microseconds_at_125_mhz() {
        assert_eq!(buffer_samples_for(100, 125_000_000), Some(12544));
    }

    #[test]
    fn buffer_samples_always_positive_multiple_of_128() {
        for duration_us in [1, 2, 7, 64, 99, 100, 101, 1000, 8191] {
            for rate in [1, 1_000, 122_880_000, 125_000_000, 250_000_000] {
                let samples = buffer_samples_for(duration_us, rate).unwrap();
                assert!(samples > 0);
                assert_eq!(samples % 128, 0, "{duration_us} us @ {rate} Hz");
                assert!(u64::from(samples) * 1_000_000 >= duration_us * rate);
            }
        }
    }

    #[test]
    fn exact_multiples_are_not_padded() {
        // 1024 us @ 125 kHz is exactly 128 samples
        assert_eq!(buffer_samples_for(1024, 125_000), Some(128));
    }

    #[test]
    fn zero_duration_has_no_buffer() {
        assert_eq!(buffer_samples_for(0, 125_000_000), None);
    }

    #[test]
    fn routing_resolves_relative_to_channel() {
        assert_eq!(
            GenerationSource::resolve(Channel::Ch1, TriggerLine::In2),
            GenerationSource::CrossChannel
        );
        assert_eq!(
            GenerationSource::resolve(Channel::Ch2, TriggerLine::In2),
            GenerationSource::SameChannel
        );
        assert_eq!(
            GenerationSource::CrossChannel.source_channel(Channel::Ch1),
            Channel::Ch2
        );
    }

    #[test]
    fn trigger_mode_selects_line() {
        assert_eq!(TriggerMode::Ch1Falling.line(), TriggerLine::In1);
        assert_eq!(TriggerMode::Ch2Rising.line(), TriggerLine::In2);
        assert!(!TriggerMode::Ch2Falling.is_rising());
    }
}
