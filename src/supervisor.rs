use crate::{
    config::SupervisorSettings,
    driver::Driver,
    runner::{ChannelRunner, RunnerEvent, SharedCaptures},
    state::RunState,
    stats::Counter,
    Channel, ChannelConfig, Error, Result,
};
use crossbeam_channel::{tick, unbounded, Receiver, RecvTimeoutError};
use log::{error, info, warn};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

const TICK: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Interrupted,
    RunnerFailed(Channel),
    AllRunnersExited,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Interrupted => write!(f, "interrupted"),
            StopReason::RunnerFailed(ch) => write!(f, "{ch} runner failed"),
            StopReason::AllRunnersExited => write!(f, "all runners exited"),
        }
    }
}

#[derive(Debug)]
pub struct ChannelReport {
    pub channel: Channel,
    pub counter: Counter,
    /// Why the runner ended, if it did not end by request.
    pub error: Option<String>,
    /// Still running when the shutdown timeout expired.
    pub detached: bool,
}

#[derive(Debug)]
pub struct SupervisorReport {
    pub reason: StopReason,
    pub channels: Vec<ChannelReport>,
}

impl SupervisorReport {
    pub fn channel(&self, ch: Channel) -> Option<&ChannelReport> {
        self.channels.iter().find(|c| c.channel == ch)
    }

    pub fn failed(&self) -> impl Iterator<Item = Channel> + '_ {
        self.channels
            .iter()
            .filter(|c| c.error.is_some())
            .map(|c| c.channel)
    }

    /// An operator stop is graceful even after a channel failed; the rest of
    /// the instrument kept running until then.
    pub fn is_graceful(&self) -> bool {
        self.reason == StopReason::Interrupted || self.failed().next().is_none()
    }
}

struct Slot {
    channel: Channel,
    handle: Option<JoinHandle<Result<()>>>,
    counter: Counter,
    running: bool,
    error: Option<String>,
    detached: bool,
}

impl Slot {
    fn new(channel: Channel, handle: JoinHandle<Result<()>>) -> Self {
        Self {
            channel,
            handle: Some(handle),
            counter: Counter::new(),
            running: true,
            error: None,
            detached: false,
        }
    }
}

/// Owns the configured instrument: starts one runner thread per channel,
/// watches them, and tears everything down.
pub struct Supervisor<D: Driver + ?Sized> {
    driver: Arc<D>,
    configs: Vec<ChannelConfig>,
    settings: SupervisorSettings,
    run: RunState,
}

impl<D: Driver + ?Sized + 'static> Supervisor<D> {
    pub fn new(driver: Arc<D>, configs: Vec<ChannelConfig>, settings: SupervisorSettings) -> Self {
        Self {
            driver,
            configs,
            settings,
            run: RunState::new(),
        }
    }

    /// Run until `interrupt` is raised or the runners give out. The driver is
    /// released exactly once before this returns, whether or not startup
    /// succeeded.
    pub fn run(self, interrupt: &AtomicBool) -> Result<SupervisorReport> {
        let captures = SharedCaptures::for_configs(&self.configs);
        let (tx, rx) = unbounded();

        let runners: Result<Vec<_>> = self
            .configs
            .iter()
            .map(|config| {
                ChannelRunner::new(
                    Arc::clone(&self.driver),
                    config,
                    &captures,
                    self.run.clone(),
                    self.settings.poll,
                )
                .map(|r| r.with_events(tx.clone()))
            })
            .collect();
        drop(tx);
        let runners = match runners {
            Ok(runners) => runners,
            Err(e) => {
                self.release();
                return Err(e);
            }
        };

        let mut slots = Vec::with_capacity(runners.len());
        let mut spawn_error = None;
        for runner in runners {
            let channel = runner.channel();
            let spawned = thread::Builder::new()
                .name(format!("runner-{}", channel.to_string().to_lowercase()))
                .spawn(move || runner.run());
            match spawned {
                Ok(handle) => slots.push(Slot::new(channel, handle)),
                Err(source) => {
                    spawn_error = Some(Error::RunnerSpawn { channel, source });
                    break;
                }
            }
        }

        let reason = match &spawn_error {
            None => self.watch(&rx, &mut slots, interrupt),
            Some(e) => {
                error!("{e}");
                StopReason::AllRunnersExited
            }
        };
        info!("Stopping runners: {reason}");

        self.shutdown(&rx, &mut slots);
        self.release();

        for slot in &slots {
            log_summary(slot);
        }
        if let Some(e) = spawn_error {
            return Err(e);
        }

        Ok(SupervisorReport {
            reason,
            channels: slots
                .into_iter()
                .map(|s| ChannelReport {
                    channel: s.channel,
                    counter: s.counter,
                    error: s.error,
                    detached: s.detached,
                })
                .collect(),
        })
    }

    fn watch(
        &self,
        rx: &Receiver<RunnerEvent>,
        slots: &mut [Slot],
        interrupt: &AtomicBool,
    ) -> StopReason {
        let ticker = tick(TICK);
        let mut last_stats = Instant::now();

        loop {
            let _ = ticker.recv();

            let mut failed = None;
            while let Ok(event) = rx.try_recv() {
                if let Some(ch) = record(slots, event) {
                    failed.get_or_insert(ch);
                }
            }

            if interrupt.load(Ordering::SeqCst) || self.run.stop_requested() {
                return StopReason::Interrupted;
            }
            if let Some(ch) = failed.filter(|_| self.settings.stop_on_runner_failure) {
                return StopReason::RunnerFailed(ch);
            }
            if slots.iter().all(|s| !s.running) {
                return StopReason::AllRunnersExited;
            }

            let interval = self.settings.stats_interval;
            if !interval.is_zero() && last_stats.elapsed() >= interval {
                for slot in slots.iter().filter(|s| s.running) {
                    log_stats(slot);
                }
                last_stats = Instant::now();
            }
        }
    }

    fn shutdown(&self, rx: &Receiver<RunnerEvent>, slots: &mut [Slot]) {
        self.run.request_stop();

        // no deadline at all if the timeout does not fit in an Instant
        let deadline = Instant::now().checked_add(self.settings.shutdown_timeout);
        while slots.iter().any(|s| s.running) {
            let event = match deadline {
                Some(deadline) => rx.recv_deadline(deadline),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match event {
                Ok(event) => {
                    record(slots, event);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        for slot in slots.iter_mut() {
            let Some(handle) = slot.handle.take() else {
                continue;
            };
            if slot.running && !handle.is_finished() {
                warn!(
                    "{}: runner did not stop within {:?}, detaching it",
                    slot.channel, self.settings.shutdown_timeout
                );
                slot.detached = true;
                continue;
            }
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    slot.error.get_or_insert_with(|| e.to_string());
                }
                Err(_) => {
                    error!("{}: runner thread panicked", slot.channel);
                    slot.error
                        .get_or_insert_with(|| "runner thread panicked".to_string());
                }
            }
            slot.running = false;
        }
    }

    fn release(&self) {
        match self.driver.release() {
            Ok(()) => info!("Instrument released"),
            Err(e) => warn!("Releasing the instrument: {e}"),
        }
    }
}

/// Apply one runner event. Returns the channel if its runner just failed.
fn record(slots: &mut [Slot], event: RunnerEvent) -> Option<Channel> {
    match event {
        RunnerEvent::Cycle {
            channel,
            outcome,
            samples,
        } => {
            if let Some(slot) = slots.iter_mut().find(|s| s.channel == channel) {
                slot.counter.record(outcome, samples);
            }
            None
        }
        RunnerEvent::Exited { channel, error } => {
            let slot = slots.iter_mut().find(|s| s.channel == channel)?;
            slot.running = false;
            let failed = error.is_some();
            slot.error = error;
            failed.then_some(channel)
        }
    }
}

fn log_stats(slot: &Slot) {
    let c = &slot.counter;
    info!(
        "{}: {} cycles ({} replayed, {} skipped, {} failed), {:.1} cycles/s, {:.2} MS/s",
        slot.channel,
        c.cycles,
        c.generated,
        c.skipped,
        c.failed,
        c.cycle_rate(),
        c.sample_rate()
    );
}

fn log_summary(slot: &Slot) {
    let c = &slot.counter;
    info!(
        "{}: {} cycles in {:.1} s ({:.1}/s average), {} replayed, {} skipped, {} failed",
        slot.channel,
        c.cycles,
        c.t_begin.elapsed().as_secs_f64(),
        c.average_cycle_rate(),
        c.generated,
        c.skipped,
        c.failed
    );
}
