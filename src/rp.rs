//! [`Driver`] over the vendor `librp` C library.
//!
//! The FPGA overlay must already be loaded; this only opens and releases the
//! library itself.

use crate::{
    driver::{Driver, DriverError, DriverResult, RpStatus, TriggerState},
    Channel, TriggerLine, TriggerMode,
};
use ndarray::{ArrayView1, ArrayViewMut1};
use std::sync::atomic::{AtomicBool, Ordering};

#[allow(non_upper_case_globals)]
#[allow(non_camel_case_types)]
#[allow(non_snake_case)]
#[allow(dead_code)]
mod ffi {
    include!(concat!(env!("OUT_DIR"), "/bindings.rs"));
}

use ffi::*;

fn check(op: &'static str, res: i32) -> DriverResult<()> {
    match RpStatus::from(res) {
        RpStatus::Ok => Ok(()),
        status => Err(DriverError::new(op, status)),
    }
}

fn channel(ch: Channel) -> rp_channel_t {
    match ch {
        Channel::Ch1 => RP_CH_1,
        Channel::Ch2 => RP_CH_2,
    }
}

fn trigger_source(mode: TriggerMode) -> rp_acq_trig_src_t {
    match mode {
        TriggerMode::Ch1Rising => RP_TRIG_SRC_CHA_PE,
        TriggerMode::Ch1Falling => RP_TRIG_SRC_CHA_NE,
        TriggerMode::Ch2Rising => RP_TRIG_SRC_CHB_PE,
        TriggerMode::Ch2Falling => RP_TRIG_SRC_CHB_NE,
    }
}

fn level_channel(line: TriggerLine) -> rp_channel_trigger_t {
    match line {
        TriggerLine::In1 => RP_T_CH_1,
        TriggerLine::In2 => RP_T_CH_2,
    }
}

fn address(op: &'static str, value: u64) -> DriverResult<u32> {
    u32::try_from(value).map_err(|_| DriverError::new(op, RpStatus::OutOfRange))
}

#[derive(Debug)]
pub struct RpDriver {
    released: AtomicBool,
}

impl RpDriver {
    pub fn open() -> DriverResult<Self> {
        check("rp_Init", unsafe { rp_Init() })?;
        Ok(Self {
            released: AtomicBool::new(false),
        })
    }
}

impl Drop for RpDriver {
    fn drop(&mut self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            unsafe { rp_Release() };
        }
    }
}

impl Driver for RpDriver {
    fn reserved_memory_region(&self) -> DriverResult<(u64, u64)> {
        let mut start = 0;
        let mut size = 0;
        check("rp_AcqAxiGetMemoryRegion", unsafe {
            rp_AcqAxiGetMemoryRegion(&mut start, &mut size)
        })?;
        Ok((u64::from(start), u64::from(size)))
    }

    fn base_sample_rate_hz(&self) -> u64 {
        u64::from(unsafe { rp_HPGetBaseSpeedHzOrDefault() })
    }

    fn reset_channel(&self, ch: Channel) -> DriverResult<()> {
        check("rp_AcqResetCh", unsafe { rp_AcqResetCh(channel(ch)) })
    }

    fn enable_split_trigger(&self, enable: bool) -> DriverResult<()> {
        check("rp_AcqSetSplitTrigger", unsafe {
            rp_AcqSetSplitTrigger(enable)
        })
    }

    fn set_acquisition_decimation(&self, ch: Channel, factor: u32) -> DriverResult<()> {
        check("rp_AcqAxiSetDecimationFactorCh", unsafe {
            rp_AcqAxiSetDecimationFactorCh(channel(ch), factor as _)
        })
    }

    fn set_trigger_delay(&self, ch: Channel, samples: u32) -> DriverResult<()> {
        check("rp_AcqAxiSetTriggerDelay", unsafe {
            rp_AcqAxiSetTriggerDelay(channel(ch), samples as _)
        })
    }

    fn set_buffer_region(&self, ch: Channel, start: u64, samples: u32) -> DriverResult<()> {
        let start = address("rp_AcqAxiSetBufferSamples", start)?;
        check("rp_AcqAxiSetBufferSamples", unsafe {
            rp_AcqAxiSetBufferSamples(channel(ch), start, samples)
        })
    }

    fn enable_dma_acquisition(&self, ch: Channel, enable: bool) -> DriverResult<()> {
        check("rp_AcqAxiEnable", unsafe {
            rp_AcqAxiEnable(channel(ch), enable)
        })
    }

    fn start_acquisition(&self, ch: Channel) -> DriverResult<()> {
        check("rp_AcqStartCh", unsafe { rp_AcqStartCh(channel(ch)) })
    }

    fn stop_acquisition(&self, ch: Channel) -> DriverResult<()> {
        check("rp_AcqStopCh", unsafe { rp_AcqStopCh(channel(ch)) })
    }

    fn set_trigger_source(&self, ch: Channel, source: TriggerMode) -> DriverResult<()> {
        check("rp_AcqSetTriggerSrcCh", unsafe {
            rp_AcqSetTriggerSrcCh(channel(ch), trigger_source(source))
        })
    }

    fn set_trigger_level(&self, line: TriggerLine, level: f32) -> DriverResult<()> {
        check("rp_AcqSetTriggerLevel", unsafe {
            rp_AcqSetTriggerLevel(level_channel(line), level)
        })
    }

    fn trigger_state(&self, ch: Channel) -> DriverResult<TriggerState> {
        let mut state = RP_TRIG_STATE_WAITING;
        check("rp_AcqGetTriggerStateCh", unsafe {
            rp_AcqGetTriggerStateCh(channel(ch), &mut state)
        })?;
        Ok(if state == RP_TRIG_STATE_TRIGGERED {
            TriggerState::Triggered
        } else {
            TriggerState::Waiting
        })
    }

    fn buffer_full(&self, ch: Channel) -> DriverResult<bool> {
        let mut full = false;
        check("rp_AcqAxiGetBufferFillState", unsafe {
            rp_AcqAxiGetBufferFillState(channel(ch), &mut full)
        })?;
        Ok(full)
    }

    fn write_pointer_at_trigger(&self, ch: Channel) -> DriverResult<u32> {
        let mut pos = 0;
        check("rp_AcqAxiGetWritePointerAtTrig", unsafe {
            rp_AcqAxiGetWritePointerAtTrig(channel(ch), &mut pos)
        })?;
        Ok(pos)
    }

    fn read_samples(
        &self,
        ch: Channel,
        pointer: u32,
        mut out: ArrayViewMut1<'_, f32>,
    ) -> DriverResult<()> {
        let op = "rp_AcqAxiGetDataV";
        let buf = out
            .as_slice_mut()
            .ok_or(DriverError::new(op, RpStatus::InvalidParameter))?;
        let mut size = u32::try_from(buf.len())
            .map_err(|_| DriverError::new(op, RpStatus::BufferTooSmall))?;
        check(op, unsafe {
            rp_AcqAxiGetDataV(channel(ch), pointer, &mut size, buf.as_mut_ptr())
        })?;
        if size as usize != buf.len() {
            return Err(DriverError::new(op, RpStatus::BufferTooSmall));
        }
        Ok(())
    }

    fn reserve_generation_region(&self, ch: Channel, start: u64, end: u64) -> DriverResult<()> {
        let op = "rp_GenAxiReserveMemory";
        let (start, end) = (address(op, start)?, address(op, end)?);
        check(op, unsafe {
            rp_GenAxiReserveMemory(channel(ch), start, end)
        })
    }

    fn set_generation_decimation(&self, ch: Channel, factor: u32) -> DriverResult<()> {
        check("rp_GenAxiSetDecimationFactor", unsafe {
            rp_GenAxiSetDecimationFactor(channel(ch), factor as _)
        })
    }

    fn enable_dma_generation(&self, ch: Channel, enable: bool) -> DriverResult<()> {
        check("rp_GenAxiSetEnable", unsafe {
            rp_GenAxiSetEnable(channel(ch), enable)
        })
    }

    fn set_amplitude_offset_identity(&self, ch: Channel) -> DriverResult<()> {
        check("rp_GenSetAmplitudeAndOffsetOrigin", unsafe {
            rp_GenSetAmplitudeAndOffsetOrigin(channel(ch))
        })
    }

    fn set_burst_mode(&self, ch: Channel) -> DriverResult<()> {
        check("rp_GenMode", unsafe {
            rp_GenMode(channel(ch), RP_GEN_MODE_BURST)
        })
    }

    fn set_burst_count(&self, ch: Channel, count: u32) -> DriverResult<()> {
        let count = i32::try_from(count)
            .map_err(|_| DriverError::new("rp_GenBurstCount", RpStatus::OutOfRange))?;
        check("rp_GenBurstCount", unsafe {
            rp_GenBurstCount(channel(ch), count)
        })
    }

    fn set_burst_repetitions(&self, ch: Channel, repetitions: u32) -> DriverResult<()> {
        let repetitions = i32::try_from(repetitions)
            .map_err(|_| DriverError::new("rp_GenBurstRepetitions", RpStatus::OutOfRange))?;
        check("rp_GenBurstRepetitions", unsafe {
            rp_GenBurstRepetitions(channel(ch), repetitions)
        })
    }

    fn set_burst_period(&self, ch: Channel, ticks: u32) -> DriverResult<()> {
        check("rp_GenBurstPeriod", unsafe {
            rp_GenBurstPeriod(channel(ch), ticks)
        })
    }

    fn write_waveform(&self, ch: Channel, data: ArrayView1<'_, f32>) -> DriverResult<()> {
        let op = "rp_GenAxiWriteWaveform";
        // the C signature takes a mutable pointer but only reads from it
        let owned;
        let samples: &[f32] = match data.as_slice() {
            Some(s) => s,
            None => {
                owned = data.to_vec();
                &owned
            }
        };
        let len =
            u32::try_from(samples.len()).map_err(|_| DriverError::new(op, RpStatus::OutOfRange))?;
        check(op, unsafe {
            rp_GenAxiWriteWaveform(channel(ch), samples.as_ptr() as *mut f32, len)
        })
    }

    fn enable_output(&self, ch: Channel) -> DriverResult<()> {
        check("rp_GenOutEnable", unsafe { rp_GenOutEnable(channel(ch)) })
    }

    fn trigger_once(&self, ch: Channel) -> DriverResult<()> {
        check("rp_GenTriggerOnly", unsafe { rp_GenTriggerOnly(channel(ch)) })
    }

    fn disable_output(&self, ch: Channel) -> DriverResult<()> {
        check("rp_GenOutDisable", unsafe { rp_GenOutDisable(channel(ch)) })
    }

    fn release(&self) -> DriverResult<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        check("rp_Release", unsafe { rp_Release() })
    }
}
