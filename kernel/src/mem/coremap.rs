//! The coremap: which address space holds each physical frame.
//!
//! Frames are handed out free-first from a bitmap. Only when none is free does
//! the replacement policy pick a victim, whose owner writes the page out to
//! swap before the frame is reassigned. All of this happens under one lock
//! hold, so the frame array, the free bitmap and the owners' page tables move
//! together.

use super::address_space::{AddressSpace, SpaceId, TranslationEntry};
use super::error::CoremapError;
use super::page_replacement::PageReplacementPolicy;
use super::{FrameIndex, Vpn};
use crate::sync::mutex::Mutex;
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use log::{debug, trace, warn};
use vmcore_shared::bit_array::Bitmap;

/// A physical frame as the coremap sees it.
#[derive(Clone, Default)]
pub struct Frame {
    owner: Option<Arc<dyn AddressSpace>>,
    /// Accesses to other frames since this one was last touched.
    age: u32,
}

impl Frame {
    pub fn owned(owner: Arc<dyn AddressSpace>) -> Self {
        Self {
            owner: Some(owner),
            age: 0,
        }
    }

    pub fn with_age(self, age: u32) -> Self {
        Self { age, ..self }
    }

    pub fn owner(&self) -> Option<&Arc<dyn AddressSpace>> {
        self.owner.as_ref()
    }

    pub fn age(&self) -> u32 {
        self.age
    }

    pub fn is_free(&self) -> bool {
        self.owner.is_none()
    }

    /// The owner of frame `index`, the page it backs and that page's entry.
    /// `None` for a free frame, or one whose owner maps nothing there.
    pub fn resident_page(
        &self,
        index: FrameIndex,
    ) -> Option<(&Arc<dyn AddressSpace>, Vpn, TranslationEntry)> {
        let owner = self.owner.as_ref()?;
        let vpn = owner.vpn_of_frame(index)?;
        let entry = owner.page_table_entry(vpn)?;
        Some((owner, vpn, entry))
    }
}

/// A page written out to make room for a new one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Eviction {
    pub space: SpaceId,
    pub vpn: Vpn,
    pub frame: FrameIndex,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Acquisition {
    pub frame: FrameIndex,
    pub evicted: Option<Eviction>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CoremapStats {
    pub acquisitions: u64,
    pub evictions: u64,
    pub releases: u64,
}

struct CoremapInner {
    frames: Box<[Frame]>,
    /// Set bit means the frame is owned. Always agrees with `Frame::owner`.
    used: Bitmap,
    policy: Box<dyn PageReplacementPolicy>,
    eviction: bool,
    stats: CoremapStats,
}

pub struct Coremap {
    inner: Mutex<CoremapInner>,
}

impl Coremap {
    /// A coremap over `num_frames` frames, all free.
    ///
    /// With `eviction` off, acquisition fails once every frame is owned
    /// instead of consulting `policy`.
    pub fn new(num_frames: usize, policy: Box<dyn PageReplacementPolicy>, eviction: bool) -> Self {
        assert!(num_frames > 0, "coremap needs at least one frame");

        debug!(
            target: "vm::coremap",
            "coremap frames={num_frames} policy={} eviction={eviction}",
            policy.name()
        );

        Self {
            inner: Mutex::new(CoremapInner {
                frames: vec![Frame::default(); num_frames].into_boxed_slice(),
                used: Bitmap::new(num_frames),
                policy,
                eviction,
                stats: CoremapStats::default(),
            }),
        }
    }

    pub fn num_frames(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn free_frames(&self) -> usize {
        self.inner.lock().used.count_clear()
    }

    pub fn policy_name(&self) -> &'static str {
        self.inner.lock().policy.name()
    }

    pub fn evicts(&self) -> bool {
        self.inner.lock().eviction
    }

    pub fn stats(&self) -> CoremapStats {
        self.inner.lock().stats
    }

    pub fn owner_of(&self, frame: FrameIndex) -> Option<SpaceId> {
        let inner = self.inner.lock();
        assert!(frame < inner.frames.len(), "owner of frame {frame} out of range");
        inner.frames[frame].owner.as_ref().map(|owner| owner.id())
    }

    /// Number of frames currently held by `space`.
    pub fn owned_by(&self, space: SpaceId) -> usize {
        self.inner
            .lock()
            .frames
            .iter()
            .filter(|frame| frame.owner.as_ref().is_some_and(|owner| owner.id() == space))
            .count()
    }

    pub fn age_of(&self, frame: FrameIndex) -> u32 {
        let inner = self.inner.lock();
        assert!(frame < inner.frames.len(), "age of frame {frame} out of range");
        inner.frames[frame].age
    }

    /// Hands `space` a frame of its own, evicting another page if none is
    /// free.
    ///
    /// A frame whose owner has not mapped it yet holds nothing worth saving,
    /// so if it is picked as a victim it is reclaimed without a swap-out.
    /// [`Coremap::acquire_and_fill`] acquires and maps under one lock hold.
    pub fn acquire_frame(&self, space: &Arc<dyn AddressSpace>) -> Result<Acquisition, CoremapError> {
        self.inner.lock().acquire(space)
    }

    /// Acquires a frame and fills it with `fill` before releasing the lock.
    /// If `fill` fails, the frame goes back to the free pool.
    pub fn acquire_and_fill<T, E, F>(
        &self,
        space: &Arc<dyn AddressSpace>,
        fill: F,
    ) -> Result<(Acquisition, T), E>
    where
        E: From<CoremapError>,
        F: FnOnce(FrameIndex) -> Result<T, E>,
    {
        let mut inner = self.inner.lock();
        let acquisition = inner.acquire(space)?;

        match fill(acquisition.frame) {
            Ok(filled) => Ok((acquisition, filled)),
            Err(err) => {
                warn!(target: "vm::coremap", "fill failed, frame={} returned", acquisition.frame);
                inner.release(acquisition.frame);
                Err(err)
            }
        }
    }

    /// Frees every frame held by `space`. Returns how many were freed.
    pub fn release_all(&self, space: SpaceId) -> usize {
        let mut inner = self.inner.lock();
        let owned: vec::Vec<FrameIndex> = inner
            .frames
            .iter()
            .enumerate()
            .filter(|(_, frame)| frame.owner.as_ref().is_some_and(|owner| owner.id() == space))
            .map(|(index, _)| index)
            .collect();

        for &frame in &owned {
            inner.release(frame);
        }

        debug!(target: "vm::coremap", "release_all space={space} frames={}", owned.len());
        owned.len()
    }

    /// Frees one frame. Returns `false` if it was already free.
    pub fn release(&self, frame: FrameIndex) -> bool {
        self.inner.lock().release(frame)
    }

    /// Records an access to `frame`: every other frame ages by one and this
    /// one's counter restarts from zero.
    pub fn notify_access(&self, frame: FrameIndex) {
        let mut inner = self.inner.lock();
        assert!(frame < inner.frames.len(), "access to frame {frame} out of range");

        for other in inner.frames.iter_mut() {
            other.age = other.age.saturating_add(1);
        }
        inner.frames[frame].age = 0;
    }

    /// Whether the free bitmap and the owner table agree on every frame.
    pub fn is_consistent(&self) -> bool {
        let inner = self.inner.lock();
        inner
            .frames
            .iter()
            .enumerate()
            .all(|(index, frame)| inner.used.test(index) != frame.is_free())
    }
}

impl CoremapInner {
    fn acquire(&mut self, space: &Arc<dyn AddressSpace>) -> Result<Acquisition, CoremapError> {
        let (frame, evicted) = match self.used.find() {
            Some(frame) => (frame, None),
            None if !self.eviction => {
                debug!(target: "vm::coremap", "out of frames space={}", space.id());
                return Err(CoremapError::OutOfFrames);
            }
            None => {
                let (victim, evicted) = self.evict();
                let Some(frame) = self.used.find() else {
                    panic!("frame {victim} still in use after eviction");
                };
                (frame, evicted)
            }
        };

        self.frames[frame] = Frame::owned(Arc::clone(space));
        self.stats.acquisitions += 1;

        trace!(
            target: "vm::coremap",
            "acquire policy={} frame={frame} space={}",
            self.policy.name(),
            space.id()
        );

        Ok(Acquisition { frame, evicted })
    }

    /// Writes the policy's victim out to swap and frees its frame. The
    /// eviction is `None` when the victim backed no page of its owner.
    fn evict(&mut self) -> (FrameIndex, Option<Eviction>) {
        let total = self.frames.len();
        let frame = self.policy.select_victim(&self.frames);
        assert!(frame < total, "victim search returned frame {frame} of {total}");

        let Some(owner) = self.frames[frame].owner.take() else {
            panic!("victim frame {frame} is free but the bitmap says otherwise");
        };
        self.used.clear(frame);
        self.frames[frame].age = 0;

        let Some(vpn) = owner.vpn_of_frame(frame) else {
            warn!(
                target: "vm::coremap",
                "reclaim unmapped frame={frame} space={}",
                owner.id()
            );
            return (frame, None);
        };

        trace!(
            target: "vm::coremap",
            "evict policy={} frame={frame} space={} vpn={vpn}",
            self.policy.name(),
            owner.id()
        );

        owner.swap_out(vpn);
        self.stats.evictions += 1;

        let eviction = Eviction {
            space: owner.id(),
            vpn,
            frame,
        };
        (frame, Some(eviction))
    }

    fn release(&mut self, frame: FrameIndex) -> bool {
        assert!(frame < self.frames.len(), "release of frame {frame} out of range");

        if self.frames[frame].owner.take().is_none() {
            warn!(target: "vm::coremap", "release of free frame={frame}");
            return false;
        }

        self.used.clear(frame);
        self.frames[frame].age = 0;
        self.stats.releases += 1;
        true
    }
}
