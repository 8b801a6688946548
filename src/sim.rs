//! In-process stand-in for the instrument.
//!
//! Trigger and fill timing are scripted in terms of poll counts, so the
//! acquisition state machine can be exercised deterministically. Every call is
//! accounted for, and any operation can be made to fail on demand.

use crate::{
    driver::{Driver, DriverError, DriverResult, RpStatus, TriggerState},
    Channel, TriggerLine, TriggerMode, BYTES_PER_SAMPLE,
};
use ndarray::{ArrayView1, ArrayViewMut1};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    f32::consts::TAU,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
    thread,
    time::Duration,
};

#[derive(Clone, Debug, PartialEq)]
pub enum SimSignal {
    Constant(f32),
    Sine { frequency_hz: f32, amplitude: f32 },
    /// Repeats the given samples across the circular buffer.
    Samples(Vec<f32>),
}

impl SimSignal {
    fn at(&self, index: usize, rate_hz: u64) -> f32 {
        match self {
            SimSignal::Constant(v) => *v,
            SimSignal::Sine {
                frequency_hz,
                amplitude,
            } => amplitude * (TAU * frequency_hz * index as f32 / rate_hz as f32).sin(),
            SimSignal::Samples(samples) if samples.is_empty() => 0.0,
            SimSignal::Samples(samples) => samples[index % samples.len()],
        }
    }
}

/// How many times the trigger state reads "waiting" after arming.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerTiming {
    After(u32),
    Random { max_polls: u32 },
    Never,
}

/// How many times the fill state reads "not full" after triggering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FillTiming {
    After(u32),
    Never,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SimInput {
    pub signal: SimSignal,
    /// Peak amplitude of uniform noise added to every sample.
    pub noise: f32,
    pub trigger: TriggerTiming,
    pub fill: FillTiming,
}

impl Default for SimInput {
    fn default() -> Self {
        Self {
            signal: SimSignal::Constant(0.0),
            noise: 0.0,
            trigger: TriggerTiming::After(0),
            fill: FillTiming::After(0),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimSettings {
    pub base_rate_hz: u64,
    pub memory_base: u64,
    pub memory_size: u64,
    pub seed: u64,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            base_rate_hz: 125_000_000,
            memory_base: 0x1000_0000,
            memory_size: 0x0100_0000,
            seed: 0x5eed,
        }
    }
}

/// Call accounting for one acquisition channel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SimAdcStats {
    pub starts: usize,
    pub stops: usize,
    pub source_sets: usize,
    pub trigger_polls: usize,
    pub fill_polls: usize,
    pub reads: usize,
    pub last_read_len: usize,
    /// Set if the fill state was ever queried before the trigger fired.
    pub fill_polled_before_trigger: bool,
}

/// Acquisition configuration as the hardware last saw it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimAcquisitionSetup {
    pub reset: bool,
    pub decimation: u32,
    pub trigger_delay: u32,
    pub region: Option<(u64, u32)>,
    pub dma_enabled: bool,
}

/// Generator state as the hardware last saw it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SimOutput {
    pub region: Option<(u64, u64)>,
    pub decimation: u32,
    pub dma_enabled: bool,
    pub identity_scaling: bool,
    pub burst_mode: bool,
    pub burst_count: u32,
    pub burst_repetitions: u32,
    pub burst_period: u32,
    pub output_enabled: bool,
    pub last_waveform: Vec<f32>,
    pub writes: usize,
    pub bursts: usize,
    pub disables: usize,
}

#[derive(Debug)]
struct AdcState {
    input: SimInput,
    rng: StdRng,
    setup: SimAcquisitionSetup,
    armed: bool,
    source: Option<TriggerMode>,
    triggered: bool,
    waits_left: Option<u32>,
    fills_left: Option<u32>,
    write_pointer: u32,
    corrupt_next: Option<usize>,
    stats: SimAdcStats,
}

#[derive(Debug)]
pub struct SimDriver {
    settings: SimSettings,
    adcs: [Mutex<AdcState>; 2],
    dacs: [Mutex<SimOutput>; 2],
    faults: [Mutex<Vec<&'static str>>; 2],
    stalls: [Mutex<Option<(&'static str, Duration)>>; 2],
    global_faults: Mutex<Vec<&'static str>>,
    levels: Mutex<[Option<f32>; 2]>,
    split_trigger: AtomicBool,
    releases: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for SimDriver {
    fn default() -> Self {
        Self::new(SimSettings::default())
    }
}

impl SimDriver {
    pub fn new(settings: SimSettings) -> Self {
        let adc = |ch: Channel| {
            Mutex::new(AdcState {
                input: SimInput::default(),
                rng: StdRng::seed_from_u64(settings.seed.wrapping_add(ch.index() as u64)),
                setup: SimAcquisitionSetup::default(),
                armed: false,
                source: None,
                triggered: false,
                waits_left: None,
                fills_left: None,
                write_pointer: 0,
                corrupt_next: None,
                stats: SimAdcStats::default(),
            })
        };
        Self {
            settings,
            adcs: [adc(Channel::Ch1), adc(Channel::Ch2)],
            dacs: Default::default(),
            faults: Default::default(),
            stalls: Default::default(),
            global_faults: Mutex::new(Vec::new()),
            levels: Mutex::new([None; 2]),
            split_trigger: AtomicBool::new(false),
            releases: AtomicUsize::new(0),
        }
    }

    pub fn set_input(&self, ch: Channel, input: SimInput) {
        lock(&self.adcs[ch.index()]).input = input;
    }

    /// Make `op` fail on `ch` from now on. `None` targets operations that are
    /// not tied to a channel.
    pub fn fail_on(&self, ch: Option<Channel>, op: &'static str) {
        match ch {
            Some(ch) => lock(&self.faults[ch.index()]).push(op),
            None => lock(&self.global_faults).push(op),
        }
    }

    /// Make `op` on `ch` block for `delay` before it answers, ignoring stop
    /// requests.
    pub fn stall_on(&self, ch: Channel, op: &'static str, delay: Duration) {
        *lock(&self.stalls[ch.index()]) = Some((op, delay));
    }

    pub fn clear_faults(&self) {
        for f in &self.faults {
            lock(f).clear();
        }
        for s in &self.stalls {
            *lock(s) = None;
        }
        lock(&self.global_faults).clear();
    }

    /// Replace one sample of the next capture on `ch` with NaN.
    pub fn corrupt_next_capture(&self, ch: Channel, index: usize) {
        lock(&self.adcs[ch.index()]).corrupt_next = Some(index);
    }

    pub fn adc_stats(&self, ch: Channel) -> SimAdcStats {
        lock(&self.adcs[ch.index()]).stats.clone()
    }

    pub fn acquisition_setup(&self, ch: Channel) -> SimAcquisitionSetup {
        lock(&self.adcs[ch.index()]).setup
    }

    pub fn output(&self, ch: Channel) -> SimOutput {
        lock(&self.dacs[ch.index()]).clone()
    }

    pub fn trigger_level(&self, line: TriggerLine) -> Option<f32> {
        lock(&self.levels)[line_index(line)]
    }

    pub fn split_trigger_enabled(&self) -> bool {
        self.split_trigger.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    fn check(&self, ch: Channel, op: &'static str) -> DriverResult<()> {
        let stall = *lock(&self.stalls[ch.index()]);
        if let Some((_, delay)) = stall.filter(|(stalled, _)| *stalled == op) {
            thread::sleep(delay);
        }
        if lock(&self.faults[ch.index()]).contains(&op) {
            return Err(DriverError::new(op, RpStatus::BusAccess));
        }
        Ok(())
    }

    fn check_global(&self, op: &'static str) -> DriverResult<()> {
        if lock(&self.global_faults).contains(&op) {
            return Err(DriverError::new(op, RpStatus::BusAccess));
        }
        Ok(())
    }

    fn adc(&self, ch: Channel, op: &'static str) -> DriverResult<MutexGuard<'_, AdcState>> {
        self.check(ch, op)?;
        Ok(lock(&self.adcs[ch.index()]))
    }

    fn dac(&self, ch: Channel, op: &'static str) -> DriverResult<MutexGuard<'_, SimOutput>> {
        self.check(ch, op)?;
        Ok(lock(&self.dacs[ch.index()]))
    }
}

fn line_index(line: TriggerLine) -> usize {
    match line {
        TriggerLine::In1 => 0,
        TriggerLine::In2 => 1,
    }
}

impl Driver for SimDriver {
    fn reserved_memory_region(&self) -> DriverResult<(u64, u64)> {
        self.check_global("reserved_memory_region")?;
        Ok((self.settings.memory_base, self.settings.memory_size))
    }

    fn base_sample_rate_hz(&self) -> u64 {
        self.settings.base_rate_hz
    }

    fn reset_channel(&self, ch: Channel) -> DriverResult<()> {
        let mut adc = self.adc(ch, "reset_channel")?;
        adc.setup = SimAcquisitionSetup {
            reset: true,
            ..SimAcquisitionSetup::default()
        };
        adc.armed = false;
        adc.triggered = false;
        Ok(())
    }

    fn enable_split_trigger(&self, enable: bool) -> DriverResult<()> {
        self.check_global("enable_split_trigger")?;
        self.split_trigger.store(enable, Ordering::SeqCst);
        Ok(())
    }

    fn set_acquisition_decimation(&self, ch: Channel, factor: u32) -> DriverResult<()> {
        self.adc(ch, "set_acquisition_decimation")?.setup.decimation = factor;
        Ok(())
    }

    fn set_trigger_delay(&self, ch: Channel, samples: u32) -> DriverResult<()> {
        self.adc(ch, "set_trigger_delay")?.setup.trigger_delay = samples;
        Ok(())
    }

    fn set_buffer_region(&self, ch: Channel, address: u64, samples: u32) -> DriverResult<()> {
        let end = address + u64::from(samples) * BYTES_PER_SAMPLE;
        let limit = self.settings.memory_base + self.settings.memory_size;
        if address < self.settings.memory_base || end > limit {
            return Err(DriverError::new("set_buffer_region", RpStatus::OutOfRange));
        }
        self.adc(ch, "set_buffer_region")?.setup.region = Some((address, samples));
        Ok(())
    }

    fn enable_dma_acquisition(&self, ch: Channel, enable: bool) -> DriverResult<()> {
        self.adc(ch, "enable_dma_acquisition")?.setup.dma_enabled = enable;
        Ok(())
    }

    fn start_acquisition(&self, ch: Channel) -> DriverResult<()> {
        let mut guard = self.adc(ch, "start_acquisition")?;
        let adc = &mut *guard;
        if !adc.setup.dma_enabled || adc.setup.region.is_none() {
            return Err(DriverError::new("start_acquisition", RpStatus::Unsupported));
        }
        let waits = match adc.input.trigger {
            TriggerTiming::After(n) => Some(n),
            TriggerTiming::Random { max_polls } => Some(adc.rng.random_range(0..=max_polls)),
            TriggerTiming::Never => None,
        };
        adc.armed = true;
        adc.triggered = false;
        adc.source = None;
        adc.waits_left = waits;
        adc.fills_left = None;
        adc.stats.starts += 1;
        Ok(())
    }

    fn stop_acquisition(&self, ch: Channel) -> DriverResult<()> {
        let mut adc = self.adc(ch, "stop_acquisition")?;
        adc.armed = false;
        adc.stats.stops += 1;
        Ok(())
    }

    fn set_trigger_source(&self, ch: Channel, source: TriggerMode) -> DriverResult<()> {
        let mut adc = self.adc(ch, "set_trigger_source")?;
        adc.source = Some(source);
        adc.stats.source_sets += 1;
        Ok(())
    }

    fn set_trigger_level(&self, line: TriggerLine, level: f32) -> DriverResult<()> {
        self.check_global("set_trigger_level")?;
        if !(-1.0..=1.0).contains(&level) {
            return Err(DriverError::new("set_trigger_level", RpStatus::OutOfRange));
        }
        lock(&self.levels)[line_index(line)] = Some(level);
        Ok(())
    }

    fn trigger_state(&self, ch: Channel) -> DriverResult<TriggerState> {
        let mut guard = self.adc(ch, "trigger_state")?;
        let adc = &mut *guard;
        adc.stats.trigger_polls += 1;
        if adc.triggered {
            return Ok(TriggerState::Triggered);
        }
        if !adc.armed || adc.source.is_none() {
            return Ok(TriggerState::Waiting);
        }
        match adc.waits_left {
            Some(0) => {
                let capacity = adc.setup.region.map_or(1, |(_, samples)| samples.max(1));
                adc.write_pointer = adc.rng.random_range(0..capacity);
                adc.triggered = true;
                adc.fills_left = match adc.input.fill {
                    FillTiming::After(n) => Some(n),
                    FillTiming::Never => None,
                };
                Ok(TriggerState::Triggered)
            }
            Some(n) => {
                adc.waits_left = Some(n - 1);
                Ok(TriggerState::Waiting)
            }
            None => Ok(TriggerState::Waiting),
        }
    }

    fn buffer_full(&self, ch: Channel) -> DriverResult<bool> {
        let mut adc = self.adc(ch, "buffer_full")?;
        adc.stats.fill_polls += 1;
        if !adc.triggered {
            adc.stats.fill_polled_before_trigger = true;
            return Ok(false);
        }
        match adc.fills_left {
            Some(0) => Ok(true),
            Some(n) => {
                adc.fills_left = Some(n - 1);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    fn write_pointer_at_trigger(&self, ch: Channel) -> DriverResult<u32> {
        let adc = self.adc(ch, "write_pointer_at_trigger")?;
        if !adc.triggered {
            return Err(DriverError::new(
                "write_pointer_at_trigger",
                RpStatus::InvalidParameter,
            ));
        }
        Ok(adc.write_pointer)
    }

    fn read_samples(
        &self,
        ch: Channel,
        pointer: u32,
        mut out: ArrayViewMut1<'_, f32>,
    ) -> DriverResult<()> {
        let mut guard = self.adc(ch, "read_samples")?;
        let adc = &mut *guard;
        let capacity = match adc.setup.region {
            Some((_, samples)) if out.len() <= samples as usize => samples as usize,
            _ => return Err(DriverError::new("read_samples", RpStatus::BufferTooSmall)),
        };
        let rate = self.settings.base_rate_hz;
        let noise = adc.input.noise;
        let start = pointer as usize % capacity;
        for (k, sample) in out.iter_mut().enumerate() {
            let idx = (start + k) % capacity;
            let mut value = adc.input.signal.at(idx, rate);
            if noise > 0.0 {
                value += adc.rng.random_range(-noise..=noise);
            }
            *sample = value;
        }
        if let Some(index) = adc.corrupt_next.take() {
            if let Some(sample) = out.get_mut(index) {
                *sample = f32::NAN;
            }
        }
        adc.stats.reads += 1;
        adc.stats.last_read_len = out.len();
        Ok(())
    }

    fn reserve_generation_region(&self, ch: Channel, start: u64, end: u64) -> DriverResult<()> {
        let limit = self.settings.memory_base + self.settings.memory_size;
        if start < self.settings.memory_base || end > limit || end <= start {
            return Err(DriverError::new(
                "reserve_generation_region",
                RpStatus::OutOfRange,
            ));
        }
        self.dac(ch, "reserve_generation_region")?.region = Some((start, end));
        Ok(())
    }

    fn set_generation_decimation(&self, ch: Channel, factor: u32) -> DriverResult<()> {
        self.dac(ch, "set_generation_decimation")?.decimation = factor;
        Ok(())
    }

    fn enable_dma_generation(&self, ch: Channel, enable: bool) -> DriverResult<()> {
        self.dac(ch, "enable_dma_generation")?.dma_enabled = enable;
        Ok(())
    }

    fn set_amplitude_offset_identity(&self, ch: Channel) -> DriverResult<()> {
        self.dac(ch, "set_amplitude_offset_identity")?.identity_scaling = true;
        Ok(())
    }

    fn set_burst_mode(&self, ch: Channel) -> DriverResult<()> {
        self.dac(ch, "set_burst_mode")?.burst_mode = true;
        Ok(())
    }

    fn set_burst_count(&self, ch: Channel, count: u32) -> DriverResult<()> {
        self.dac(ch, "set_burst_count")?.burst_count = count;
        Ok(())
    }

    fn set_burst_repetitions(&self, ch: Channel, repetitions: u32) -> DriverResult<()> {
        self.dac(ch, "set_burst_repetitions")?.burst_repetitions = repetitions;
        Ok(())
    }

    fn set_burst_period(&self, ch: Channel, ticks: u32) -> DriverResult<()> {
        self.dac(ch, "set_burst_period")?.burst_period = ticks;
        Ok(())
    }

    fn write_waveform(&self, ch: Channel, data: ArrayView1<'_, f32>) -> DriverResult<()> {
        let mut dac = self.dac(ch, "write_waveform")?;
        let fits = dac
            .region
            .is_some_and(|(start, end)| data.len() as u64 * BYTES_PER_SAMPLE <= end - start);
        if !dac.dma_enabled || !fits {
            return Err(DriverError::new("write_waveform", RpStatus::BufferTooSmall));
        }
        dac.last_waveform = data.to_vec();
        dac.writes += 1;
        Ok(())
    }

    fn enable_output(&self, ch: Channel) -> DriverResult<()> {
        self.dac(ch, "enable_output")?.output_enabled = true;
        Ok(())
    }

    fn trigger_once(&self, ch: Channel) -> DriverResult<()> {
        let mut dac = self.dac(ch, "trigger_once")?;
        if !dac.output_enabled || !dac.burst_mode {
            return Err(DriverError::new("trigger_once", RpStatus::InvalidParameter));
        }
        dac.bursts += 1;
        Ok(())
    }

    fn disable_output(&self, ch: Channel) -> DriverResult<()> {
        let mut dac = self.dac(ch, "disable_output")?;
        dac.output_enabled = false;
        dac.disables += 1;
        Ok(())
    }

    fn release(&self) -> DriverResult<()> {
        self.check_global("release")?;
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
