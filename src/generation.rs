use crate::{
    channel::BurstSettings,
    driver::{Driver, DriverError},
    error::setup_err,
    memory::MemoryRegion,
    Channel, ChannelConfig, Error, Result,
};
use ndarray::ArrayView1;

/// Burst generator of one output channel.
///
/// Burst shape and DMA region are programmed once by [`Generator::configure`];
/// every replay after that is a waveform write plus a single trigger.
#[derive(Clone, Copy, Debug)]
pub struct Generator {
    channel: Channel,
    burst: BurstSettings,
}

impl Generator {
    pub fn new(config: &ChannelConfig) -> Self {
        Self {
            channel: config.channel,
            burst: config.burst,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn configure<D: Driver + ?Sized>(&self, driver: &D, region: &MemoryRegion) -> Result<()> {
        let ch = self.channel;
        let err = setup_err(Some(ch));
        driver
            .reserve_generation_region(ch, region.start, region.end())
            .map_err(&err)?;
        driver.set_generation_decimation(ch, 1).map_err(&err)?;
        driver.enable_dma_generation(ch, true).map_err(&err)?;
        driver.set_amplitude_offset_identity(ch).map_err(&err)?;
        driver.set_burst_mode(ch).map_err(&err)?;
        driver.set_burst_count(ch, self.burst.count).map_err(&err)?;
        driver
            .set_burst_repetitions(ch, self.burst.repetitions)
            .map_err(&err)?;
        driver
            .set_burst_period(ch, self.burst.period_ticks)
            .map_err(&err)?;
        Ok(())
    }

    /// Load `waveform` into the generation region and play one burst.
    pub fn fire<D: Driver + ?Sized>(&self, driver: &D, waveform: ArrayView1<'_, f32>) -> Result<()> {
        let ch = self.channel;
        driver.write_waveform(ch, waveform).map_err(self.failed())?;
        driver.enable_output(ch).map_err(self.failed())?;
        driver.trigger_once(ch).map_err(self.failed())?;
        Ok(())
    }

    pub fn disable<D: Driver + ?Sized>(&self, driver: &D) -> Result<()> {
        driver.disable_output(self.channel).map_err(self.failed())
    }

    fn failed(&self) -> impl Fn(DriverError) -> Error {
        let channel = self.channel;
        move |source| Error::Generation { channel, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        memory::RegionKind, sim::SimDriver, GenerationSource, TriggerMode, Waveform,
    };

    fn config() -> ChannelConfig {
        ChannelConfig {
            channel: Channel::Ch1,
            trigger_mode: TriggerMode::Ch1Rising,
            trigger_level: 0.0,
            buffer_duration_us: 100,
            buffer_samples: 12544,
            burst: BurstSettings {
                count: 1024,
                repetitions: 1,
                period_ticks: 10,
            },
            generation_source: GenerationSource::SameChannel,
        }
    }

    fn region() -> MemoryRegion {
        MemoryRegion {
            kind: RegionKind::Generation(Channel::Ch1),
            start: 0x1001_0000,
            len: 12544 * 2,
        }
    }

    #[test]
    fn configure_programs_burst_once() {
        let sim = SimDriver::default();
        let generator = Generator::new(&config());
        generator.configure(&sim, &region()).unwrap();

        let out = sim.output(Channel::Ch1);
        assert_eq!(out.region, Some((0x1001_0000, 0x1001_0000 + 12544 * 2)));
        assert_eq!(out.decimation, 1);
        assert!(out.dma_enabled);
        assert!(out.identity_scaling);
        assert!(out.burst_mode);
        assert_eq!(
            (out.burst_count, out.burst_repetitions, out.burst_period),
            (1024, 1, 10)
        );
        assert!(!out.output_enabled);
        assert_eq!(out.bursts, 0);
    }

    #[test]
    fn fire_writes_enables_and_triggers_once() {
        let sim = SimDriver::default();
        let generator = Generator::new(&config());
        generator.configure(&sim, &region()).unwrap();

        let waveform = Waveform::from(vec![0.25; 12544]);
        generator.fire(&sim, waveform.view()).unwrap();

        let out = sim.output(Channel::Ch1);
        assert_eq!(out.writes, 1);
        assert_eq!(out.last_waveform.len(), 12544);
        assert!(out.output_enabled);
        assert_eq!(out.bursts, 1);
        assert!(sim.output(Channel::Ch2).last_waveform.is_empty());
    }

    #[test]
    fn write_failure_skips_the_burst() {
        let sim = SimDriver::default();
        let generator = Generator::new(&config());
        generator.configure(&sim, &region()).unwrap();
        sim.fail_on(Some(Channel::Ch1), "write_waveform");

        let err = generator
            .fire(&sim, Waveform::new(128).view())
            .unwrap_err();
        assert!(matches!(err, Error::Generation { channel: Channel::Ch1, .. }));
        assert_eq!(sim.output(Channel::Ch1).bursts, 0);
    }

    #[test]
    fn oversized_waveform_is_rejected_by_the_region() {
        let sim = SimDriver::default();
        let generator = Generator::new(&config());
        generator.configure(&sim, &region()).unwrap();

        assert!(generator
            .fire(&sim, Waveform::new(12544 + 128).view())
            .is_err());
    }

    #[test]
    fn configure_failure_is_a_setup_error() {
        let sim = SimDriver::default();
        sim.fail_on(Some(Channel::Ch1), "set_burst_mode");
        let err = Generator::new(&config())
            .configure(&sim, &region())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::HardwareSetup {
                channel: Some(Channel::Ch1),
                ..
            }
        ));
    }
}
