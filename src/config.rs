use crate::{
    channel::{buffer_samples_for, BurstSettings},
    Channel, ChannelConfig, Error, GenerationSource, Result, TriggerLine, TriggerMode,
};
use confique::Config;
use std::{path::Path, time::Duration};

#[derive(Config, Debug, Clone)]
pub struct Conf {
    #[config(nested)]
    pub adc1: AdcSection,
    #[config(nested)]
    pub adc2: AdcSection,
    #[config(nested)]
    pub dac1: DacSection,
    #[config(nested)]
    pub dac2: DacSection,
    #[config(nested)]
    pub runtime: RuntimeSettings,
}

/// Acquisition side of one channel. Every field is required; they are kept
/// optional here so validation can name exactly what is missing.
#[derive(Config, Debug, Clone)]
pub struct AdcSection {
    pub trigger_mode: Option<TriggerMode>,
    pub trigger_level: Option<f64>,
    /// Capture window in microseconds.
    pub buffer_time: Option<u64>,
}

#[derive(Config, Debug, Clone)]
pub struct DacSection {
    pub count_burst: Option<u32>,
    pub repetition: Option<u32>,
    pub repetition_delay: Option<u32>,
    /// Input whose captures feed this output. Defaults to the output's own input.
    pub signal_source: Option<TriggerLine>,
}

#[derive(Config, Debug, Clone)]
pub struct RuntimeSettings {
    #[config(default = 1000)]
    pub trigger_poll_us: u64,
    #[config(default = 0)]
    pub fill_poll_us: u64,
    #[config(default = 5000)]
    pub shutdown_timeout_ms: u64,
    #[config(default = 10)]
    pub stats_interval_s: u64,
    #[config(default = false)]
    pub stop_on_runner_failure: bool,
}

/// Delays used by the acquisition polling loops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollSettings {
    pub trigger_interval: Duration,
    /// Zero means spin without sleeping.
    pub fill_interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            trigger_interval: Duration::from_millis(1),
            fill_interval: Duration::ZERO,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SupervisorSettings {
    pub poll: PollSettings,
    pub shutdown_timeout: Duration,
    pub stats_interval: Duration,
    pub stop_on_runner_failure: bool,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            poll: PollSettings::default(),
            shutdown_timeout: Duration::from_secs(5),
            stats_interval: Duration::from_secs(10),
            stop_on_runner_failure: false,
        }
    }
}

impl RuntimeSettings {
    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            poll: PollSettings {
                trigger_interval: Duration::from_micros(self.trigger_poll_us),
                fill_interval: Duration::from_micros(self.fill_poll_us),
            },
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
            stats_interval: Duration::from_secs(self.stats_interval_s),
            stop_on_runner_failure: self.stop_on_runner_failure,
        }
    }
}

impl Conf {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        // confique skips missing files, but a loopback without a config is useless
        if !path.is_file() {
            return Err(Error::invalid_config(
                path.display().to_string(),
                "configuration file not found",
            ));
        }
        Conf::builder()
            .file(path)
            .load()
            .map_err(|e| Error::invalid_config(path.display().to_string(), e.to_string()))
    }

    /// Validate every channel section against the platform's base sample rate.
    pub fn channel_configs(&self, base_rate_hz: u64) -> Result<Vec<ChannelConfig>> {
        let configs = Channel::ALL
            .iter()
            .map(|&ch| self.channel_config(ch, base_rate_hz))
            .collect::<Result<Vec<_>>>()?;
        check_shared_trigger_lines(&configs)?;
        Ok(configs)
    }

    fn channel_config(&self, ch: Channel, base_rate_hz: u64) -> Result<ChannelConfig> {
        let (adc, dac, adc_name, dac_name) = match ch {
            Channel::Ch1 => (&self.adc1, &self.dac1, "adc1", "dac1"),
            Channel::Ch2 => (&self.adc2, &self.dac2, "adc2", "dac2"),
        };
        if adc.is_empty() {
            return Err(Error::invalid_config(adc_name, "section is missing"));
        }
        if dac.is_empty() {
            return Err(Error::invalid_config(dac_name, "section is missing"));
        }

        let trigger_mode = required(adc.trigger_mode, adc_name, "trigger_mode")?;

        let level = required(adc.trigger_level, adc_name, "trigger_level")?;
        if !(-1.0..=1.0).contains(&level) {
            return Err(Error::invalid_config(
                format!("{adc_name}.trigger_level"),
                format!("{level} is outside [-1.0, 1.0]"),
            ));
        }

        let buffer_duration_us = required(adc.buffer_time, adc_name, "buffer_time")?;
        if buffer_duration_us == 0 {
            return Err(Error::invalid_config(
                format!("{adc_name}.buffer_time"),
                "must be greater than zero",
            ));
        }
        let buffer_samples = buffer_samples_for(buffer_duration_us, base_rate_hz).ok_or_else(|| {
            Error::invalid_config(
                format!("{adc_name}.buffer_time"),
                format!("{buffer_duration_us} us at {base_rate_hz} Hz gives no usable buffer"),
            )
        })?;

        let count = required(dac.count_burst, dac_name, "count_burst")?;
        if count == 0 {
            return Err(Error::invalid_config(
                format!("{dac_name}.count_burst"),
                "must be greater than zero",
            ));
        }
        let repetitions = required(dac.repetition, dac_name, "repetition")?;
        if repetitions == 0 {
            return Err(Error::invalid_config(
                format!("{dac_name}.repetition"),
                "must be greater than zero",
            ));
        }
        let period_ticks = required(dac.repetition_delay, dac_name, "repetition_delay")?;

        let generation_source = dac
            .signal_source
            .map(|input| GenerationSource::resolve(ch, input))
            .unwrap_or_default();

        Ok(ChannelConfig {
            channel: ch,
            trigger_mode,
            trigger_level: level as f32,
            buffer_duration_us,
            buffer_samples,
            burst: BurstSettings {
                count,
                repetitions,
                period_ticks,
            },
            generation_source,
        })
    }
}

impl AdcSection {
    fn is_empty(&self) -> bool {
        self.trigger_mode.is_none() && self.trigger_level.is_none() && self.buffer_time.is_none()
    }
}

impl DacSection {
    fn is_empty(&self) -> bool {
        self.count_burst.is_none()
            && self.repetition.is_none()
            && self.repetition_delay.is_none()
            && self.signal_source.is_none()
    }
}

fn required<T>(value: Option<T>, section: &str, field: &str) -> Result<T> {
    value.ok_or_else(|| Error::invalid_config(format!("{section}.{field}"), "required value is missing"))
}

/// The level threshold is a property of the input line, so channels that
/// trigger on the same line must agree on it.
fn check_shared_trigger_lines(configs: &[ChannelConfig]) -> Result<()> {
    for (i, a) in configs.iter().enumerate() {
        for b in &configs[i + 1..] {
            if a.trigger_mode.line() == b.trigger_mode.line() && a.trigger_level != b.trigger_level
            {
                return Err(Error::invalid_config(
                    format!("adc{}.trigger_level", b.channel.index() + 1),
                    format!(
                        "{} is already thresholded at {} by {}",
                        b.trigger_mode.line(),
                        a.trigger_level,
                        a.channel
                    ),
                ));
            }
        }
    }
    Ok(())
}
