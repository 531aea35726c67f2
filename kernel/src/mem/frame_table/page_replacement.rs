//! Victim selection for the frame table.

use super::CoreMapEntry;
use core::sync::atomic::{AtomicBool, Ordering};

/// A page replacement policy.
pub trait PageReplacementPolicy {
    /// Returns the index of an allocated, unpinned frame to evict, or
    /// [`None`] if every allocated frame is pinned.
    ///
    /// `referenced` holds one recency bit per frame, which the policy may
    /// clear.
    fn select_victim(
        &mut self,
        core_map: &[CoreMapEntry],
        referenced: &[AtomicBool],
    ) -> Option<usize>;
}

/// The clock algorithm. The hand sweeps the core map; a referenced frame has
/// its bit cleared and is passed over once.
#[derive(Debug, Default)]
pub struct SecondChance {
    hand: usize,
}

impl PageReplacementPolicy for SecondChance {
    fn select_victim(
        &mut self,
        core_map: &[CoreMapEntry],
        referenced: &[AtomicBool],
    ) -> Option<usize> {
        let total_frames = core_map.len();
        if total_frames == 0 {
            return None;
        }

        // After one full sweep every candidate has had its bit cleared, so the
        // second sweep takes the first candidate it meets.
        for step in 0..2 * total_frames {
            let index = self.hand % total_frames;
            self.hand = (index + 1) % total_frames;

            let entry = core_map[index];
            if !entry.allocated() || entry.pinned() {
                continue;
            }
            if step < total_frames && referenced[index].swap(false, Ordering::AcqRel) {
                continue;
            }
            return Some(index);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::ops::Range;

    fn fill_coremap_range(core_map: &mut [CoreMapEntry], range: &Range<usize>) {
        for i in range.clone() {
            assert!(!core_map[i].allocated());
            core_map[i] = core_map[i].with_allocated(true);
        }
    }

    fn bits(values: &[bool]) -> Vec<AtomicBool> {
        values.iter().map(|&b| AtomicBool::new(b)).collect()
    }

    #[test]
    fn test_second_chance_skips_referenced() {
        let mut core_map = [CoreMapEntry::default(); 4];
        fill_coremap_range(&mut core_map, &(0..4));
        let referenced = bits(&[true, true, false, true]);

        let mut policy = SecondChance::default();
        assert_eq!(policy.select_victim(&core_map, &referenced), Some(2));
        assert!(!referenced[0].load(Ordering::Relaxed));
        assert!(!referenced[1].load(Ordering::Relaxed));
        assert!(referenced[3].load(Ordering::Relaxed));

        // The hand continues after the last victim.
        assert_eq!(policy.select_victim(&core_map, &referenced), Some(0));
    }

    #[test]
    fn test_second_chance_all_referenced() {
        let mut core_map = [CoreMapEntry::default(); 3];
        fill_coremap_range(&mut core_map, &(0..3));
        let referenced = bits(&[true, true, true]);

        let mut policy = SecondChance::default();
        assert_eq!(policy.select_victim(&core_map, &referenced), Some(0));
        assert!(referenced.iter().all(|bit| !bit.load(Ordering::Relaxed)));
    }

    #[test]
    fn test_second_chance_never_picks_pinned_or_free() {
        let mut core_map = [CoreMapEntry::default(); 6];
        fill_coremap_range(&mut core_map, &(1..5));
        for entry in &mut core_map[1..4] {
            *entry = entry.with_pinned(true);
        }
        let referenced = bits(&[false; 6]);

        let mut policy = SecondChance::default();
        for _ in 0..3 {
            assert_eq!(policy.select_victim(&core_map, &referenced), Some(4));
        }

        core_map[4] = core_map[4].with_pinned(true);
        assert_eq!(policy.select_victim(&core_map, &referenced), None);
    }

    #[test]
    fn test_second_chance_empty() {
        let mut policy = SecondChance::default();
        assert_eq!(policy.select_victim(&[], &[]), None);
    }
}
