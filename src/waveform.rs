use ndarray::{Array1, ArrayView1, ArrayViewMut1};
use std::sync::{Mutex, PoisonError};

/// Fixed-length capture buffer, allocated once and overwritten every cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    samples: Array1<f32>,
}

impl Waveform {
    pub fn new(len: usize) -> Self {
        Self {
            samples: Array1::zeros(len),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn view(&self) -> ArrayView1<'_, f32> {
        self.samples.view()
    }

    pub fn view_mut(&mut self) -> ArrayViewMut1<'_, f32> {
        self.samples.view_mut()
    }

    /// Index of the first NaN or infinite sample, if any.
    pub fn first_non_finite(&self) -> Option<usize> {
        self.samples.iter().position(|v| !v.is_finite())
    }

    /// Largest absolute sample value.
    pub fn peak(&self) -> f32 {
        self.samples.fold(0.0f32, |acc, v| acc.max(v.abs()))
    }
}

impl From<Vec<f32>> for Waveform {
    fn from(samples: Vec<f32>) -> Self {
        Self {
            samples: Array1::from(samples),
        }
    }
}

#[derive(Debug)]
struct Snapshot {
    waveform: Waveform,
    sequence: u64,
}

/// Latest complete capture of one channel, readable by the partner channel.
///
/// The owning runner copies a capture in only after it has been read and
/// validated, so a reader never sees a half-written window.
#[derive(Debug)]
pub struct PublishedWaveform {
    inner: Mutex<Snapshot>,
}

impl PublishedWaveform {
    pub fn new(len: usize) -> Self {
        Self {
            inner: Mutex::new(Snapshot {
                waveform: Waveform::new(len),
                sequence: 0,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().waveform.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the published capture. Returns its sequence number.
    pub fn publish(&self, capture: &Waveform) -> u64 {
        let mut snapshot = self.lock();
        snapshot.waveform.samples.assign(&capture.samples);
        snapshot.sequence += 1;
        snapshot.sequence
    }

    /// Copy the latest capture into `out` if it is newer than `seen`, and
    /// return its sequence number. `seen == 0` accepts any published capture.
    pub fn copy_newer(&self, seen: u64, out: &mut Waveform) -> Option<u64> {
        let snapshot = self.lock();
        if snapshot.sequence <= seen {
            return None;
        }
        out.samples.assign(&snapshot.waveform.samples);
        Some(snapshot.sequence)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Snapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn finds_first_non_finite_sample() {
        let mut wf = Waveform::from(vec![0.0, 0.5, f32::NAN, f32::INFINITY]);
        assert_eq!(wf.first_non_finite(), Some(2));
        wf.view_mut()[2] = 0.1;
        assert_eq!(wf.first_non_finite(), Some(3));
        wf.view_mut()[3] = -0.7;
        assert_eq!(wf.first_non_finite(), None);
        assert_eq!(wf.peak(), 0.7);
    }

    #[test]
    fn nothing_to_copy_before_first_publish() {
        let slot = PublishedWaveform::new(4);
        let mut out = Waveform::new(4);
        assert_eq!(slot.copy_newer(0, &mut out), None);

        assert_eq!(slot.publish(&Waveform::from(vec![1.0, 2.0, 3.0, 4.0])), 1);
        assert_eq!(slot.copy_newer(0, &mut out), Some(1));
        assert_eq!(out.view().to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn already_seen_capture_is_not_copied_again() {
        let slot = PublishedWaveform::new(2);
        let mut out = Waveform::new(2);
        slot.publish(&Waveform::from(vec![1.0, 1.0]));
        assert_eq!(slot.copy_newer(0, &mut out), Some(1));

        out.view_mut().fill(0.0);
        assert_eq!(slot.copy_newer(1, &mut out), None);
        assert_eq!(out.view().to_vec(), vec![0.0, 0.0]);

        slot.publish(&Waveform::from(vec![2.0, 2.0]));
        assert_eq!(slot.copy_newer(1, &mut out), Some(2));
        assert_eq!(out.view().to_vec(), vec![2.0, 2.0]);
    }

    #[test]
    fn readers_only_see_whole_captures() {
        const LEN: usize = 4096;
        let slot = Arc::new(PublishedWaveform::new(LEN));
        let writer_slot = Arc::clone(&slot);

        let writer = thread::spawn(move || {
            let mut capture = Waveform::new(LEN);
            for round in 1..=200 {
                capture.view_mut().fill(round as f32);
                writer_slot.publish(&capture);
            }
        });

        let mut out = Waveform::new(LEN);
        for _ in 0..200 {
            if slot.copy_newer(0, &mut out).is_some() {
                let first = out.view()[0];
                assert!(out.view().iter().all(|&v| v == first), "torn read");
            }
        }
        writer.join().unwrap();
        assert_eq!(slot.copy_newer(0, &mut out), Some(200));
    }
}
