//! Placement of the four DMA buffers inside the reserved memory region.
//!
//! Regions are laid out in the fixed order acq-ch1, acq-ch2, gen-ch1, gen-ch2.
//! Each region after the first starts on a page boundary past the previous
//! region's end plus a safety gap, followed by two guard pages.

use crate::Channel;
use std::fmt;

pub const PAGE_SIZE: u64 = 4096;
pub const SAFETY_OFFSET: u64 = 64;
pub const GUARD_PAGES: u64 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("regions need memory up to {required_end:#x} but the reserved region ends at {limit:#x}")]
    OutOfMemory { required_end: u64, limit: u64 },
    #[error("reserved region base {0:#x} is not page aligned")]
    MisalignedBase(u64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionKind {
    Acquisition(Channel),
    Generation(Channel),
}

impl RegionKind {
    /// Placement order inside the reserved region.
    pub const ORDER: [RegionKind; 4] = [
        RegionKind::Acquisition(Channel::Ch1),
        RegionKind::Acquisition(Channel::Ch2),
        RegionKind::Generation(Channel::Ch1),
        RegionKind::Generation(Channel::Ch2),
    ];
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionKind::Acquisition(ch) => write!(f, "acq-{ch}"),
            RegionKind::Generation(ch) => write!(f, "gen-{ch}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryRegion {
    pub kind: RegionKind,
    pub start: u64,
    pub len: u64,
}

impl MemoryRegion {
    pub fn end(&self) -> u64 {
        self.start + self.len
    }

    pub fn overlaps(&self, other: &MemoryRegion) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// Byte sizes of the four buffers to place.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferSizes {
    pub acquisition: [u64; 2],
    pub generation: [u64; 2],
}

impl BufferSizes {
    fn in_order(&self) -> [u64; 4] {
        [
            self.acquisition[0],
            self.acquisition[1],
            self.generation[0],
            self.generation[1],
        ]
    }
}

/// Immutable placement of every DMA buffer. Computed once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryPlan {
    regions: [MemoryRegion; 4],
}

impl MemoryPlan {
    pub fn plan(base: u64, size: u64, sizes: BufferSizes) -> Result<Self, PlanError> {
        if base % PAGE_SIZE != 0 {
            return Err(PlanError::MisalignedBase(base));
        }
        let limit = base.saturating_add(size);
        let overflow = PlanError::OutOfMemory {
            required_end: u64::MAX,
            limit,
        };

        let lens = sizes.in_order();
        let mut starts = [base; 4];
        for i in 1..starts.len() {
            let after_prev = starts[i - 1]
                .checked_add(lens[i - 1])
                .and_then(|end| end.checked_add(SAFETY_OFFSET))
                .ok_or(overflow)?;
            starts[i] = after_prev
                .checked_next_multiple_of(PAGE_SIZE)
                .and_then(|aligned| aligned.checked_add(GUARD_PAGES * PAGE_SIZE))
                .ok_or(overflow)?;
        }

        let required_end = starts[3].checked_add(lens[3]).ok_or(overflow)?;
        if required_end > limit {
            return Err(PlanError::OutOfMemory {
                required_end,
                limit,
            });
        }

        let regions = std::array::from_fn(|i| MemoryRegion {
            kind: RegionKind::ORDER[i],
            start: starts[i],
            len: lens[i],
        });
        Ok(Self { regions })
    }

    pub fn acquisition(&self, ch: Channel) -> &MemoryRegion {
        &self.regions[ch.index()]
    }

    pub fn generation(&self, ch: Channel) -> &MemoryRegion {
        &self.regions[2 + ch.index()]
    }

    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }
}

impl fmt::Display for MemoryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.regions.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}: {:#010x}..{:#010x} ({} bytes)", r.kind, r.start, r.end(), r.len)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u64 = 0x1000_0000;

    fn uniform(bytes: u64) -> BufferSizes {
        BufferSizes {
            acquisition: [bytes; 2],
            generation: [bytes; 2],
        }
    }

    #[test]
    fn second_region_follows_guard_pages() {
        // 12544 samples * 2 bytes
        let plan = MemoryPlan::plan(BASE, 2 * 1024 * 1024, uniform(25088)).unwrap();
        assert_eq!(plan.acquisition(Channel::Ch1).start, BASE);
        // ceil(25088 + 64, 4096) = 28672, plus two guard pages
        assert_eq!(plan.acquisition(Channel::Ch2).start, BASE + 28672 + 8192);
        assert_eq!(
            plan.generation(Channel::Ch1).start,
            BASE + 2 * (28672 + 8192)
        );
        assert_eq!(
            plan.generation(Channel::Ch2).start,
            BASE + 3 * (28672 + 8192)
        );
    }

    #[test]
    fn regions_never_overlap_and_stay_aligned() {
        let sizes = [2u64, 128, 256, 4000, 4032, 4096, 25088, 100_000, 1 << 20];
        for &a in &sizes {
            for &b in &sizes {
                let plan = MemoryPlan::plan(
                    BASE,
                    64 * 1024 * 1024,
                    BufferSizes {
                        acquisition: [a, b],
                        generation: [b, a],
                    },
                )
                .unwrap();
                let regions = plan.regions();
                for (i, r) in regions.iter().enumerate() {
                    assert_eq!(r.start % PAGE_SIZE, 0, "{} misaligned", r.kind);
                    assert!(r.start >= BASE);
                    for other in &regions[i + 1..] {
                        assert!(!r.overlaps(other), "{} overlaps {}", r.kind, other.kind);
                        assert!(other.start >= r.end() + SAFETY_OFFSET);
                    }
                }
            }
        }
    }

    #[test]
    fn region_sizes_are_kept() {
        let sizes = BufferSizes {
            acquisition: [256, 512],
            generation: [512, 256],
        };
        let plan = MemoryPlan::plan(BASE, 1 << 20, sizes).unwrap();
        assert_eq!(plan.acquisition(Channel::Ch2).len, 512);
        assert_eq!(plan.generation(Channel::Ch1).len, 512);
        assert_eq!(
            plan.generation(Channel::Ch2).kind,
            RegionKind::Generation(Channel::Ch2)
        );
    }

    #[test]
    fn exact_fit_is_accepted() {
        let probe = MemoryPlan::plan(BASE, u64::MAX - BASE, uniform(4096)).unwrap();
        let needed = probe.generation(Channel::Ch2).end() - BASE;
        assert!(MemoryPlan::plan(BASE, needed, uniform(4096)).is_ok());
        assert_eq!(
            MemoryPlan::plan(BASE, needed - 1, uniform(4096)),
            Err(PlanError::OutOfMemory {
                required_end: BASE + needed,
                limit: BASE + needed - 1,
            })
        );
    }

    #[test]
    fn too_small_region_is_out_of_memory() {
        let err = MemoryPlan::plan(BASE, 64 * 1024, uniform(25088)).unwrap_err();
        assert!(matches!(err, PlanError::OutOfMemory { .. }));
    }

    #[test]
    fn address_overflow_is_out_of_memory() {
        let base = u64::MAX - (u64::MAX % PAGE_SIZE);
        let err = MemoryPlan::plan(base, 0, uniform(1 << 20)).unwrap_err();
        assert!(matches!(err, PlanError::OutOfMemory { .. }));
    }

    #[test]
    fn misaligned_base_is_rejected() {
        assert_eq!(
            MemoryPlan::plan(BASE + 64, 1 << 24, uniform(256)),
            Err(PlanError::MisalignedBase(BASE + 64))
        );
    }
}
