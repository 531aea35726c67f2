//! The user frame pool: who owns each physical frame, which frames are
//! pinned, and the eviction protocol used when the pool runs dry.

pub mod page_replacement;

use crate::{
    error::{Resource, Result, VmError},
    mem::{Page, Vpn, PAGE_FRAME_SIZE},
    sync::{relax, Mutex},
    threading::process::Pid,
};
use alloc::{boxed::Box, vec::Vec};
use bitbybit::bitfield;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use log::{debug, trace};
use page_replacement::{PageReplacementPolicy, SecondChance};

#[bitfield(u8, default = 0)]
pub struct CoreMapEntry {
    #[bit(0, rw)]
    allocated: bool,
    #[bit(1, rw)]
    pinned: bool,
}

/// Index of a frame in the user pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(usize);

impl FrameId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

/// Back-reference from a frame to the page that currently holds it. Only
/// used to find whom to notify on eviction; the page table entry is the
/// owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameOwner {
    pub pid: Pid,
    pub vpn: Vpn,
}

/// Receives eviction notices from the frame table.
pub trait Evictor {
    /// Asks the owner of `frame` to save the page it keeps there and stop
    /// using the frame. `frame` is pinned for the duration of the call.
    fn evict(&self, owner: FrameOwner, frame: FrameId) -> Result<()>;
}

struct CoreMap {
    entries: Box<[CoreMapEntry]>,
    owners: Box<[Option<FrameOwner>]>,
    policy: Box<dyn PageReplacementPolicy + Send>,
    /// Where the next free-frame search starts.
    position: usize,
}

impl CoreMap {
    fn next_free(&mut self) -> Option<usize> {
        let total_frames = self.entries.len();
        let index = (0..total_frames)
            .map(|i| (self.position + i) % total_frames)
            .find(|&i| !self.entries[i].allocated())?;
        self.position = (index + 1) % total_frames;
        Some(index)
    }

    fn is_free(&self, index: usize) -> bool {
        self.owners[index].is_none() && !self.entries[index].pinned()
    }
}

pub struct FrameTable {
    core_map: Mutex<CoreMap>,
    /// Recency bits for the clock scan, set on every access to the frame.
    referenced: Box<[AtomicBool]>,
    memory: Box<[Mutex<Box<Page>>]>,
    evictions: AtomicUsize,
}

impl FrameTable {
    pub fn new(frame_count: usize) -> Self {
        Self::with_policy(frame_count, Box::new(SecondChance::default()))
    }

    pub fn with_policy(frame_count: usize, policy: Box<dyn PageReplacementPolicy + Send>) -> Self {
        Self {
            core_map: Mutex::new(CoreMap {
                entries: (0..frame_count).map(|_| CoreMapEntry::DEFAULT).collect(),
                owners: (0..frame_count).map(|_| None).collect(),
                policy,
                position: 0,
            }),
            referenced: (0..frame_count).map(|_| AtomicBool::new(false)).collect(),
            memory: (0..frame_count)
                .map(|_| Mutex::new(Box::new([0; PAGE_FRAME_SIZE])))
                .collect(),
            evictions: AtomicUsize::new(0),
        }
    }

    pub fn frame_count(&self) -> usize {
        self.memory.len()
    }

    pub fn free_frames(&self) -> usize {
        let core_map = self.core_map.lock();
        (0..core_map.entries.len())
            .filter(|&i| core_map.is_free(i))
            .count()
    }

    /// Number of frames taken from another page so far.
    pub fn evictions(&self) -> usize {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Returns a frame for `owner`, pinned. When no frame is free a victim is
    /// chosen and `evictor` asked to save its page first. Waits while every
    /// frame is pinned.
    ///
    /// # Errors
    ///
    /// Fails if the pool is empty, or with whatever the eviction of the
    /// victim failed with.
    pub fn acquire(&self, owner: FrameOwner, evictor: &dyn Evictor) -> Result<FrameId> {
        loop {
            let mut core_map = self.core_map.lock();
            if core_map.entries.is_empty() {
                return Err(VmError::Exhausted(Resource::Frames));
            }

            if let Some(index) = core_map.next_free() {
                core_map.entries[index] = CoreMapEntry::DEFAULT
                    .with_allocated(true)
                    .with_pinned(true);
                core_map.owners[index] = Some(owner);
                drop(core_map);
                self.referenced[index].store(true, Ordering::Release);
                trace!("frame {index} -> {owner:?}");
                return Ok(FrameId(index));
            }

            let CoreMap {
                entries, policy, ..
            } = &mut *core_map;
            let Some(index) = policy.select_victim(entries, &self.referenced) else {
                drop(core_map);
                relax();
                continue;
            };
            core_map.entries[index] = core_map.entries[index].with_pinned(true);
            let victim = core_map.owners[index];
            drop(core_map);

            let frame = FrameId(index);
            if let Some(victim) = victim {
                debug!("evicting {victim:?} from frame {index} for {owner:?}");
                if let Err(err) = evictor.evict(victim, frame) {
                    self.unpin(frame);
                    return Err(err);
                }
            }

            let mut core_map = self.core_map.lock();
            core_map.owners[index] = Some(owner);
            core_map.entries[index] = core_map.entries[index].with_allocated(true);
            drop(core_map);
            self.referenced[index].store(true, Ordering::Release);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            return Ok(frame);
        }
    }

    /// Gives `frame` back if `owner` still owns it. A frame pinned by someone
    /// else only loses its owner; it becomes free once unpinned.
    pub fn release(&self, frame: FrameId, owner: FrameOwner) -> bool {
        let mut core_map = self.core_map.lock();
        let index = frame.0;
        if core_map.owners[index] != Some(owner) {
            return false;
        }
        core_map.owners[index] = None;
        if !core_map.entries[index].pinned() {
            core_map.entries[index] = CoreMapEntry::DEFAULT;
        }
        true
    }

    /// Pins `frame`, waiting for any current pin to be dropped.
    pub fn pin(&self, frame: FrameId) {
        loop {
            let mut core_map = self.core_map.lock();
            let entry = core_map.entries[frame.0];
            if !entry.pinned() {
                core_map.entries[frame.0] = entry.with_allocated(true).with_pinned(true);
                return;
            }
            drop(core_map);
            relax();
        }
    }

    /// Pins `frame` only if it still belongs to `owner` and nobody else has
    /// it pinned.
    pub fn pin_owned(&self, frame: FrameId, owner: FrameOwner) -> bool {
        let mut core_map = self.core_map.lock();
        let entry = core_map.entries[frame.0];
        if core_map.owners[frame.0] != Some(owner) || entry.pinned() {
            return false;
        }
        core_map.entries[frame.0] = entry.with_pinned(true);
        true
    }

    pub fn unpin(&self, frame: FrameId) {
        let mut core_map = self.core_map.lock();
        let entry = core_map.entries[frame.0];
        debug_assert!(entry.pinned(), "frame {} is not pinned", frame.0);
        core_map.entries[frame.0] = if core_map.owners[frame.0].is_none() {
            CoreMapEntry::DEFAULT
        } else {
            entry.with_pinned(false)
        };
    }

    pub fn owner(&self, frame: FrameId) -> Option<FrameOwner> {
        self.core_map.lock().owners[frame.0]
    }

    pub fn is_pinned(&self, frame: FrameId) -> bool {
        self.core_map.lock().entries[frame.0].pinned()
    }

    /// Owned frames and their owners.
    pub fn owned_frames(&self) -> Vec<(FrameId, FrameOwner)> {
        let core_map = self.core_map.lock();
        core_map
            .owners
            .iter()
            .enumerate()
            .filter_map(|(i, owner)| Some((FrameId(i), (*owner)?)))
            .collect()
    }

    pub fn mark_accessed(&self, frame: FrameId) {
        self.referenced[frame.0].store(true, Ordering::Release);
    }

    pub fn with_page<R>(&self, frame: FrameId, f: impl FnOnce(&Page) -> R) -> R {
        f(&self.memory[frame.0].lock())
    }

    pub fn with_page_mut<R>(&self, frame: FrameId, f: impl FnOnce(&mut Page) -> R) -> R {
        f(&mut self.memory[frame.0].lock())
    }
}
