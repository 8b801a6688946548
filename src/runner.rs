use crate::{
    acquisition::{Acquisition, Capture},
    config::PollSettings,
    driver::Driver,
    state::RunState,
    stats::CycleOutcome,
    Channel, ChannelConfig, Error, GenerationSource, Generator, PublishedWaveform, Result,
    Waveform,
};
use crossbeam_channel::Sender;
use log::{debug, error, info, trace, warn};
use std::sync::Arc;

/// Messages a runner sends back to the supervisor.
#[derive(Debug)]
pub enum RunnerEvent {
    Cycle {
        channel: Channel,
        outcome: CycleOutcome,
        samples: usize,
    },
    Exited {
        channel: Channel,
        error: Option<String>,
    },
}

/// Snapshot slots for captures that the partner channel replays.
///
/// A slot exists only for channels whose partner is cross routed.
#[derive(Debug, Default)]
pub struct SharedCaptures {
    slots: [Option<Arc<PublishedWaveform>>; 2],
}

impl SharedCaptures {
    pub fn for_configs(configs: &[ChannelConfig]) -> Self {
        let mut shared = Self::default();
        for config in configs {
            if config.generation_source != GenerationSource::CrossChannel {
                continue;
            }
            let source = config.channel.partner();
            if let Some(src) = configs.iter().find(|c| c.channel == source) {
                shared.slots[source.index()] = Some(Arc::new(PublishedWaveform::new(
                    src.buffer_samples as usize,
                )));
            }
        }
        shared
    }

    /// Slot `ch` publishes into, if anyone reads it.
    pub fn publisher(&self, ch: Channel) -> Option<Arc<PublishedWaveform>> {
        self.slots[ch.index()].clone()
    }
}

#[derive(Debug)]
enum Source {
    Own,
    Partner {
        slot: Arc<PublishedWaveform>,
        staging: Waveform,
        /// Sequence of the last partner capture replayed.
        last_seen: u64,
    },
}

/// Record-then-replay loop for one channel pair.
pub struct ChannelRunner<D: Driver + ?Sized> {
    channel: Channel,
    driver: Arc<D>,
    acquisition: Acquisition,
    generator: Generator,
    capture: Waveform,
    source: Source,
    publish: Option<Arc<PublishedWaveform>>,
    run: RunState,
    events: Option<Sender<RunnerEvent>>,
}

impl<D: Driver + ?Sized> ChannelRunner<D> {
    pub fn new(
        driver: Arc<D>,
        config: &ChannelConfig,
        captures: &SharedCaptures,
        run: RunState,
        poll: PollSettings,
    ) -> Result<Self> {
        let ch = config.channel;
        let source = match config.generation_source {
            GenerationSource::SameChannel => Source::Own,
            GenerationSource::CrossChannel => {
                let slot = captures.publisher(ch.partner()).ok_or_else(|| {
                    Error::invalid_config(
                        format!("dac{}.signal_source", ch.index() + 1),
                        format!("{} is not acquiring", ch.partner()),
                    )
                })?;
                let staging = Waveform::new(slot.len());
                Source::Partner {
                    slot,
                    staging,
                    last_seen: 0,
                }
            }
        };

        Ok(Self {
            channel: ch,
            driver,
            acquisition: Acquisition::new(config, poll),
            generator: Generator::new(config),
            capture: Waveform::new(config.buffer_samples as usize),
            source,
            publish: captures.publisher(ch),
            run,
            events: None,
        })
    }

    pub fn with_events(mut self, events: Sender<RunnerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Repeat cycles until stopped or until acquisition fails, then leave the
    /// channel quiet.
    pub fn run(mut self) -> Result<()> {
        let ch = self.channel;
        info!("{ch}: runner started");

        let result = self.run_loop();
        self.shutdown();

        match &result {
            Ok(()) => info!("{ch}: runner stopped"),
            Err(e) => error!("{ch}: runner stopped: {e}"),
        }
        self.send(RunnerEvent::Exited {
            channel: ch,
            error: result.as_ref().err().map(ToString::to_string),
        });
        result
    }

    fn run_loop(&mut self) -> Result<()> {
        while !self.run.stop_requested() {
            let outcome = self.run_cycle()?;
            let samples = match outcome {
                CycleOutcome::Cancelled => 0,
                _ => self.capture.len(),
            };
            self.send(RunnerEvent::Cycle {
                channel: self.channel,
                outcome,
                samples,
            });
        }
        Ok(())
    }

    /// One acquire, validate, generate pass. Only acquisition failures are
    /// returned as errors; everything else is folded into the outcome.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome> {
        let ch = self.channel;
        match self
            .acquisition
            .capture(self.driver.as_ref(), &self.run, &mut self.capture)?
        {
            Capture::Cancelled => return Ok(CycleOutcome::Cancelled),
            Capture::Complete { write_pointer } => trace!(
                "{ch}: captured {} samples from {write_pointer} after {} trigger polls, peak {:.3} V",
                self.capture.len(),
                self.acquisition.trigger_polls(),
                self.capture.peak()
            ),
        }

        if let Some(index) = self.capture.first_non_finite() {
            let err = Error::InvalidSampleData { channel: ch, index };
            warn!("{err}, skipping generation");
            return Ok(CycleOutcome::InvalidSamples);
        }

        if let Some(slot) = &self.publish {
            slot.publish(&self.capture);
        }

        let waveform = match &mut self.source {
            Source::Own => self.capture.view(),
            Source::Partner {
                slot,
                staging,
                last_seen,
            } => match slot.copy_newer(*last_seen, staging) {
                Some(sequence) => {
                    *last_seen = sequence;
                    staging.view()
                }
                None => {
                    debug!("{ch}: no new {} capture to replay", ch.partner());
                    return Ok(CycleOutcome::NoSource);
                }
            },
        };

        match self.generator.fire(self.driver.as_ref(), waveform) {
            Ok(()) => Ok(CycleOutcome::Generated),
            Err(e) => {
                warn!("{e}, cycle abandoned");
                Ok(CycleOutcome::GenerationFailed)
            }
        }
    }

    fn shutdown(&mut self) {
        let ch = self.channel;
        if let Err(e) = self.driver.stop_acquisition(ch) {
            warn!("{ch}: cleanup: {e}");
        }
        if let Err(e) = self.generator.disable(self.driver.as_ref()) {
            warn!("{ch}: cleanup: {e}");
        }
    }

    fn send(&self, event: RunnerEvent) {
        if let Some(tx) = &self.events {
            // the supervisor may already be gone during shutdown
            let _ = tx.send(event);
        }
    }
}
