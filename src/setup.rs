use crate::{
    driver::Driver,
    error::setup_err,
    memory::{BufferSizes, MemoryPlan},
    Channel, ChannelConfig, Generator, Result,
};
use log::{debug, info};

fn config_for(configs: &[ChannelConfig], ch: Channel) -> Option<&ChannelConfig> {
    configs.iter().find(|c| c.channel == ch)
}

/// Byte size of each DMA buffer. A generation region holds whichever capture
/// feeds it, which is the partner's under cross routing.
pub fn buffer_sizes(configs: &[ChannelConfig]) -> BufferSizes {
    let bytes = |ch: Channel| config_for(configs, ch).map_or(0, ChannelConfig::buffer_bytes);
    let gen_bytes = |ch: Channel| {
        config_for(configs, ch)
            .map_or(0, |c| bytes(c.generation_source.source_channel(ch)))
    };
    BufferSizes {
        acquisition: [bytes(Channel::Ch1), bytes(Channel::Ch2)],
        generation: [gen_bytes(Channel::Ch1), gen_bytes(Channel::Ch2)],
    }
}

/// Lay out every DMA buffer inside the driver's reserved region.
pub fn plan_memory<D: Driver + ?Sized>(driver: &D, configs: &[ChannelConfig]) -> Result<MemoryPlan> {
    let (base, size) = driver.reserved_memory_region().map_err(setup_err(None))?;
    info!("Reserved DMA region: {base:#010x}, {size} bytes");
    let plan = MemoryPlan::plan(base, size, buffer_sizes(configs))?;
    debug!("Memory plan:\n{plan}");
    Ok(plan)
}

/// Program acquisition and generation hardware for every configured channel.
/// Runs once, before any runner starts.
pub fn configure_instrument<D: Driver + ?Sized>(
    driver: &D,
    plan: &MemoryPlan,
    configs: &[ChannelConfig],
) -> Result<()> {
    driver.enable_split_trigger(true).map_err(setup_err(None))?;

    for config in configs {
        let ch = config.channel;
        let err = setup_err(Some(ch));
        let region = plan.acquisition(ch);

        driver.reset_channel(ch).map_err(&err)?;
        driver.set_acquisition_decimation(ch, 1).map_err(&err)?;
        // the whole window lies after the trigger
        driver
            .set_trigger_delay(ch, config.buffer_samples)
            .map_err(&err)?;
        driver
            .set_buffer_region(ch, region.start, config.buffer_samples)
            .map_err(&err)?;
        driver.enable_dma_acquisition(ch, true).map_err(&err)?;
        driver
            .set_trigger_level(config.trigger_mode.line(), config.trigger_level)
            .map_err(&err)?;
        info!(
            "{ch}: trigger {} at {:+.3} V, {} samples ({} us) at {:#010x}",
            config.trigger_mode,
            config.trigger_level,
            config.buffer_samples,
            config.buffer_duration_us,
            region.start
        );
    }

    for config in configs {
        let ch = config.channel;
        Generator::new(config).configure(driver, plan.generation(ch))?;
        info!(
            "{ch}: burst {} samples x {} every {} ticks, fed from {}",
            config.burst.count,
            config.burst.repetitions,
            config.burst.period_ticks,
            config.generation_source.source_channel(ch)
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::BurstSettings, driver::RpStatus, sim::SimDriver, Error, GenerationSource,
        TriggerLine, TriggerMode,
    };

    fn configs(ch2_samples: u32, ch1_source: GenerationSource) -> Vec<ChannelConfig> {
        let base = ChannelConfig {
            channel: Channel::Ch1,
            trigger_mode: TriggerMode::Ch1Rising,
            trigger_level: 0.2,
            buffer_duration_us: 100,
            buffer_samples: 12544,
            burst: BurstSettings {
                count: 1024,
                repetitions: 1,
                period_ticks: 0,
            },
            generation_source: ch1_source,
        };
        vec![
            base.clone(),
            ChannelConfig {
                channel: Channel::Ch2,
                trigger_mode: TriggerMode::Ch2Falling,
                trigger_level: -0.1,
                buffer_samples: ch2_samples,
                generation_source: GenerationSource::SameChannel,
                ..base
            },
        ]
    }

    #[test]
    fn cross_routed_generator_is_sized_for_partner() {
        let sizes = buffer_sizes(&configs(256, GenerationSource::CrossChannel));
        assert_eq!(sizes.acquisition, [25088, 512]);
        assert_eq!(sizes.generation, [512, 512]);
    }

    #[test]
    fn configures_every_channel() {
        let sim = SimDriver::default();
        let configs = configs(6272, GenerationSource::SameChannel);
        let plan = plan_memory(&sim, &configs).unwrap();
        configure_instrument(&sim, &plan, &configs).unwrap();

        assert!(sim.split_trigger_enabled());
        for config in &configs {
            let ch = config.channel;
            let setup = sim.acquisition_setup(ch);
            assert!(setup.reset);
            assert_eq!(setup.decimation, 1);
            assert_eq!(setup.trigger_delay, config.buffer_samples);
            assert_eq!(
                setup.region,
                Some((plan.acquisition(ch).start, config.buffer_samples))
            );
            assert!(setup.dma_enabled);

            let out = sim.output(ch);
            assert_eq!(
                out.region,
                Some((plan.generation(ch).start, plan.generation(ch).end()))
            );
            assert!(out.burst_mode);
            assert_eq!(out.burst_count, 1024);
        }
        assert_eq!(sim.trigger_level(TriggerLine::In1), Some(0.2));
        assert_eq!(sim.trigger_level(TriggerLine::In2), Some(-0.1));
    }

    #[test]
    fn setup_failure_names_channel() {
        let sim = SimDriver::default();
        sim.fail_on(Some(Channel::Ch2), "enable_dma_acquisition");
        let configs = configs(256, GenerationSource::SameChannel);
        let plan = plan_memory(&sim, &configs).unwrap();

        match configure_instrument(&sim, &plan, &configs).unwrap_err() {
            Error::HardwareSetup { channel, source } => {
                assert_eq!(channel, Some(Channel::Ch2));
                assert_eq!(source.op, "enable_dma_acquisition");
                assert_eq!(source.status, RpStatus::BusAccess);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn region_query_failure_is_a_setup_error() {
        let sim = SimDriver::default();
        sim.fail_on(None, "reserved_memory_region");
        let err = plan_memory(&sim, &configs(256, GenerationSource::SameChannel)).unwrap_err();
        assert!(matches!(err, Error::HardwareSetup { channel: None, .. }));
    }
}
