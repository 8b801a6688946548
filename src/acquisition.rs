//! Per-channel trigger/acquisition state machine.
//!
//! One capture walks `Idle → Armed → WaitingTrigger → WaitingFull → Stopped →
//! Read` and lands back in `Idle`. A stop request observed while polling drops
//! straight back to `Idle` without stopping or reading; the runner owns that
//! cleanup.

use crate::{
    config::PollSettings,
    driver::{Driver, DriverError, TriggerState},
    state::RunState,
    Channel, ChannelConfig, Error, Result, TriggerMode, Waveform,
};
use log::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcqState {
    Idle,
    Armed,
    WaitingTrigger,
    WaitingFull,
    Stopped,
    Read,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capture {
    /// The window was read; `write_pointer` is where the trigger landed.
    Complete { write_pointer: u32 },
    Cancelled,
}

#[derive(Debug)]
pub struct Acquisition {
    channel: Channel,
    trigger_mode: TriggerMode,
    poll: PollSettings,
    state: AcqState,
    trigger_polls: u64,
    fill_polls: u64,
}

impl Acquisition {
    pub fn new(config: &ChannelConfig, poll: PollSettings) -> Self {
        Self {
            channel: config.channel,
            trigger_mode: config.trigger_mode,
            poll,
            state: AcqState::Idle,
            trigger_polls: 0,
            fill_polls: 0,
        }
    }

    pub fn state(&self) -> AcqState {
        self.state
    }

    /// Trigger-state polls made by the most recent capture.
    pub fn trigger_polls(&self) -> u64 {
        self.trigger_polls
    }

    /// Fill-state polls made by the most recent capture.
    pub fn fill_polls(&self) -> u64 {
        self.fill_polls
    }

    /// Run one capture into `out`, which must already be sized to the
    /// channel's buffer.
    pub fn capture<D: Driver + ?Sized>(
        &mut self,
        driver: &D,
        run: &RunState,
        out: &mut Waveform,
    ) -> Result<Capture> {
        self.trigger_polls = 0;
        self.fill_polls = 0;
        let result = self.step_through(driver, run, out);
        self.state = AcqState::Idle;
        result
    }

    fn step_through<D: Driver + ?Sized>(
        &mut self,
        driver: &D,
        run: &RunState,
        out: &mut Waveform,
    ) -> Result<Capture> {
        let ch = self.channel;

        driver.start_acquisition(ch).map_err(self.failed())?;
        self.enter(AcqState::Armed);

        driver
            .set_trigger_source(ch, self.trigger_mode)
            .map_err(self.failed())?;
        self.enter(AcqState::WaitingTrigger);

        loop {
            if run.stop_requested() {
                return Ok(Capture::Cancelled);
            }
            self.trigger_polls += 1;
            match driver.trigger_state(ch).map_err(self.failed())? {
                TriggerState::Triggered => break,
                TriggerState::Waiting => {
                    run.sleep(self.poll.trigger_interval);
                }
            }
        }
        self.enter(AcqState::WaitingFull);

        loop {
            if run.stop_requested() {
                return Ok(Capture::Cancelled);
            }
            self.fill_polls += 1;
            if driver.buffer_full(ch).map_err(self.failed())? {
                break;
            }
            if self.poll.fill_interval.is_zero() {
                std::hint::spin_loop();
            } else {
                run.sleep(self.poll.fill_interval);
            }
        }

        driver.stop_acquisition(ch).map_err(self.failed())?;
        self.enter(AcqState::Stopped);

        let write_pointer = driver.write_pointer_at_trigger(ch).map_err(self.failed())?;
        driver
            .read_samples(ch, write_pointer, out.view_mut())
            .map_err(self.failed())?;
        self.enter(AcqState::Read);

        Ok(Capture::Complete { write_pointer })
    }

    fn enter(&mut self, state: AcqState) {
        trace!("{}: {:?} -> {:?}", self.channel, self.state, state);
        self.state = state;
    }

    fn failed(&self) -> impl Fn(DriverError) -> Error {
        let channel = self.channel;
        move |source| Error::Acquisition { channel, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::BurstSettings,
        driver::RpStatus,
        sim::{FillTiming, SimDriver, SimInput, SimSignal, TriggerTiming},
        GenerationSource,
    };
    use std::{
        sync::Arc,
        thread,
        time::{Duration, Instant},
    };

    const SAMPLES: u32 = 256;

    fn config(ch: Channel) -> ChannelConfig {
        ChannelConfig {
            channel: ch,
            trigger_mode: TriggerMode::Ch1Rising,
            trigger_level: 0.0,
            buffer_duration_us: 2,
            buffer_samples: SAMPLES,
            burst: BurstSettings {
                count: 128,
                repetitions: 1,
                period_ticks: 0,
            },
            generation_source: GenerationSource::SameChannel,
        }
    }

    fn prepared(ch: Channel, input: SimInput) -> SimDriver {
        let sim = SimDriver::default();
        sim.set_buffer_region(ch, 0x1000_0000, SAMPLES).unwrap();
        sim.enable_dma_acquisition(ch, true).unwrap();
        sim.set_input(ch, input);
        sim
    }

    fn fast_poll() -> PollSettings {
        PollSettings {
            trigger_interval: Duration::from_micros(50),
            fill_interval: Duration::ZERO,
        }
    }

    #[test]
    fn waits_exactly_n_plus_one_trigger_polls() {
        for waits in [0, 1, 7, 25] {
            let sim = prepared(
                Channel::Ch1,
                SimInput {
                    trigger: TriggerTiming::After(waits),
                    fill: FillTiming::After(3),
                    ..SimInput::default()
                },
            );
            let mut acq = Acquisition::new(&config(Channel::Ch1), fast_poll());
            let mut out = Waveform::new(SAMPLES as usize);

            let capture = acq.capture(&sim, &RunState::new(), &mut out).unwrap();
            assert!(matches!(capture, Capture::Complete { .. }));
            assert_eq!(acq.trigger_polls(), u64::from(waits) + 1);
            assert_eq!(acq.fill_polls(), 4);

            let stats = sim.adc_stats(Channel::Ch1);
            assert_eq!(stats.trigger_polls, waits as usize + 1);
            assert!(!stats.fill_polled_before_trigger);
            assert_eq!(stats.starts, 1);
            assert_eq!(stats.stops, 1);
            assert_eq!(stats.reads, 1);
            assert_eq!(acq.state(), AcqState::Idle);
        }
    }

    #[test]
    fn reads_the_whole_window_from_the_trigger_pointer() {
        let sim = prepared(
            Channel::Ch2,
            SimInput {
                signal: SimSignal::Samples((0..SAMPLES).map(|v| v as f32).collect()),
                ..SimInput::default()
            },
        );
        let mut acq = Acquisition::new(&config(Channel::Ch2), fast_poll());
        let mut out = Waveform::new(SAMPLES as usize);
        let Capture::Complete { write_pointer } =
            acq.capture(&sim, &RunState::new(), &mut out).unwrap()
        else {
            panic!("capture was cancelled");
        };

        assert_eq!(sim.adc_stats(Channel::Ch2).last_read_len, SAMPLES as usize);
        for (k, &v) in out.view().iter().enumerate() {
            let expected = (write_pointer as usize + k) % SAMPLES as usize;
            assert_eq!(v, expected as f32);
        }
    }

    #[test]
    fn stop_before_capture_reads_nothing() {
        let sim = prepared(Channel::Ch1, SimInput::default());
        let run = RunState::new();
        run.request_stop();
        let mut acq = Acquisition::new(&config(Channel::Ch1), fast_poll());
        let mut out = Waveform::new(SAMPLES as usize);

        assert_eq!(acq.capture(&sim, &run, &mut out).unwrap(), Capture::Cancelled);
        let stats = sim.adc_stats(Channel::Ch1);
        assert_eq!(stats.trigger_polls, 0);
        assert_eq!(stats.reads, 0);
        assert_eq!(acq.state(), AcqState::Idle);
    }

    fn cancel_while_blocked(input: SimInput, poll: PollSettings) -> (SimDriver, Duration) {
        let sim = Arc::new(prepared(Channel::Ch1, input));
        let run = RunState::new();

        let handle = {
            let sim = Arc::clone(&sim);
            let run = run.clone();
            thread::spawn(move || {
                let mut acq = Acquisition::new(&config(Channel::Ch1), poll);
                let mut out = Waveform::new(SAMPLES as usize);
                acq.capture(sim.as_ref(), &run, &mut out)
            })
        };

        thread::sleep(Duration::from_millis(30));
        let stop_at = Instant::now();
        run.request_stop();
        let capture = handle.join().unwrap().unwrap();
        let latency = stop_at.elapsed();
        assert_eq!(capture, Capture::Cancelled);

        let sim = Arc::try_unwrap(sim).unwrap();
        (sim, latency)
    }

    #[test]
    fn cancels_while_waiting_for_trigger() {
        let poll = PollSettings {
            trigger_interval: Duration::from_millis(200),
            fill_interval: Duration::ZERO,
        };
        let (sim, latency) = cancel_while_blocked(
            SimInput {
                trigger: TriggerTiming::Never,
                ..SimInput::default()
            },
            poll,
        );
        // woken early, well inside one polling interval
        assert!(latency < poll.trigger_interval, "took {latency:?}");
        let stats = sim.adc_stats(Channel::Ch1);
        assert!(stats.trigger_polls >= 1);
        assert_eq!(stats.fill_polls, 0);
        assert_eq!(stats.reads, 0);
    }

    #[test]
    fn cancels_while_waiting_for_fill() {
        let (sim, latency) = cancel_while_blocked(
            SimInput {
                fill: FillTiming::Never,
                ..SimInput::default()
            },
            fast_poll(),
        );
        assert!(latency < Duration::from_millis(50), "took {latency:?}");
        let stats = sim.adc_stats(Channel::Ch1);
        assert!(stats.fill_polls >= 1);
        assert_eq!(stats.stops, 0);
        assert_eq!(stats.reads, 0);
    }

    #[test]
    fn driver_failure_names_channel_and_operation() {
        let sim = prepared(Channel::Ch2, SimInput::default());
        sim.fail_on(Some(Channel::Ch2), "trigger_state");
        let mut acq = Acquisition::new(&config(Channel::Ch2), fast_poll());
        let mut out = Waveform::new(SAMPLES as usize);

        let err = acq.capture(&sim, &RunState::new(), &mut out).unwrap_err();
        match err {
            Error::Acquisition { channel, source } => {
                assert_eq!(channel, Channel::Ch2);
                assert_eq!(source.op, "trigger_state");
                assert_eq!(source.status, RpStatus::BusAccess);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(acq.state(), AcqState::Idle);
        assert_eq!(sim.adc_stats(Channel::Ch2).reads, 0);
    }
}
