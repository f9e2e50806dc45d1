//! Victim selection for the coremap.
//!
//! A policy is chosen once at boot from [`ReplacementPolicyKind`] and owned by
//! the coremap for the rest of the kernel's life. Policies are only asked for
//! a victim when every frame is in use, but each one still returns a free
//! frame immediately if it meets one, so a selection always terminates within
//! a bounded number of sweeps.

use super::coremap::Frame;
use super::FrameIndex;
use crate::config::ReplacementPolicyKind;
use alloc::boxed::Box;
use log::trace;

pub trait PageReplacementPolicy: Send {
    fn name(&self) -> &'static str;

    /// Picks the frame to evict. `frames` is never empty.
    fn select_victim(&mut self, frames: &[Frame]) -> FrameIndex;
}

impl ReplacementPolicyKind {
    /// Instantiates the policy. `seed` only matters for [`RandomEviction`].
    pub fn build(self, seed: u64) -> Box<dyn PageReplacementPolicy> {
        match self {
            ReplacementPolicyKind::Clock => Box::<ClockEviction>::default(),
            ReplacementPolicyKind::Fifo => Box::<FifoEviction>::default(),
            ReplacementPolicyKind::Lru => Box::new(LruEviction),
            ReplacementPolicyKind::Random => Box::new(RandomEviction::new(seed)),
        }
    }
}

/// Second-chance sweep over the frames in index order.
///
/// Four passes, each visiting every frame once starting just past the hand:
/// 1. the first frame neither used nor dirty;
/// 2. the first frame unused but dirty, clearing the use bit of every used
///    frame passed over;
/// 3. the first clean frame;
/// 4. the first frame visited.
#[derive(Default)]
pub struct ClockEviction {
    hand: FrameIndex,
}

#[derive(Clone, Copy)]
enum ClockPass {
    UnusedClean,
    UnusedDirty,
    Clean,
    Any,
}

impl PageReplacementPolicy for ClockEviction {
    fn name(&self) -> &'static str {
        "clock"
    }

    fn select_victim(&mut self, frames: &[Frame]) -> FrameIndex {
        let total = frames.len();

        for pass in [
            ClockPass::UnusedClean,
            ClockPass::UnusedDirty,
            ClockPass::Clean,
            ClockPass::Any,
        ] {
            for _ in 0..total {
                self.hand = (self.hand + 1) % total;

                let Some((space, vpn, entry)) = frames[self.hand].resident_page(self.hand) else {
                    return self.hand;
                };

                let chosen = match pass {
                    ClockPass::UnusedClean => !entry.used() && !entry.dirty(),
                    ClockPass::UnusedDirty => {
                        if entry.used() {
                            space.clear_used(vpn);
                        }
                        !entry.used() && entry.dirty()
                    }
                    ClockPass::Clean => !entry.dirty(),
                    ClockPass::Any => true,
                };

                if chosen {
                    trace!(target: "vm::policy", "clock victim frame={} vpn={vpn}", self.hand);
                    return self.hand;
                }
            }
        }

        panic!("clock sweep found no victim among {total} frames");
    }
}

/// Evicts frames in index order regardless of their state.
#[derive(Default)]
pub struct FifoEviction {
    next: FrameIndex,
}

impl PageReplacementPolicy for FifoEviction {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn select_victim(&mut self, frames: &[Frame]) -> FrameIndex {
        let victim = self.next % frames.len();
        self.next = (victim + 1) % frames.len();
        victim
    }
}

/// Evicts the frame whose recency counter is largest. Ties go to the lowest
/// index.
pub struct LruEviction;

impl PageReplacementPolicy for LruEviction {
    fn name(&self) -> &'static str {
        "lru"
    }

    fn select_victim(&mut self, frames: &[Frame]) -> FrameIndex {
        let mut victim = 0;
        let mut oldest = frames[0].age();

        for (index, frame) in frames.iter().enumerate().skip(1) {
            if frame.age() > oldest {
                victim = index;
                oldest = frame.age();
            }
        }

        victim
    }
}

/// Picks a frame uniformly at random using a xorshift64* generator.
pub struct RandomEviction {
    state: u64,
}

impl RandomEviction {
    pub fn new(seed: u64) -> Self {
        // xorshift is stuck at zero forever.
        let state = if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed };
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        self.state ^= self.state >> 12;
        self.state ^= self.state << 25;
        self.state ^= self.state >> 27;
        self.state.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }
}

impl PageReplacementPolicy for RandomEviction {
    fn name(&self) -> &'static str {
        "random"
    }

    fn select_victim(&mut self, frames: &[Frame]) -> FrameIndex {
        let len = frames.len() as u64;
        FrameIndex::try_from(self.next_u64() % len).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::address_space::AddressSpace;
    use crate::mem::testing::SimSpace;
    use alloc::sync::Arc;
    use alloc::vec::Vec;

    /// One frame per `(used, dirty)` pair, frame `i` backing page `i` of `space`.
    fn frames_with_bits(space: &Arc<SimSpace>, bits: &[(bool, bool)]) -> Vec<Frame> {
        bits.iter()
            .enumerate()
            .map(|(index, &(used, dirty))| {
                space.map(index, index, used, dirty);
                let owner: Arc<dyn AddressSpace> = space.clone();
                Frame::owned(owner)
            })
            .collect()
    }

    fn ages(ages: &[u32]) -> Vec<Frame> {
        let space: Arc<dyn AddressSpace> = SimSpace::new(1, ages.len());
        ages.iter()
            .map(|&age| Frame::owned(space.clone()).with_age(age))
            .collect()
    }

    #[test]
    fn test_clock_prefers_unused_clean() {
        let space = SimSpace::new(1, 4);
        let frames = frames_with_bits(
            &space,
            &[(true, false), (false, false), (true, true), (false, true)],
        );
        let mut clock = ClockEviction::default();
        assert_eq!(clock.select_victim(&frames), 1);
        // Pass 1 never touches use bits.
        assert!(space.entry(0).used());
        assert!(space.entry(2).used());
    }

    #[test]
    fn test_clock_second_pass_clears_use_bits() {
        let space = SimSpace::new(1, 4);
        let frames = frames_with_bits(
            &space,
            &[(true, false), (true, false), (true, true), (false, true)],
        );
        let mut clock = ClockEviction::default();
        // Hand starts at 0, so pass 2 visits 1 then 2 before settling on 3.
        assert_eq!(clock.select_victim(&frames), 3);
        assert!(!space.entry(1).used());
        assert!(!space.entry(2).used());
        assert!(space.entry(0).used());
    }

    #[test]
    fn test_clock_falls_back_after_giving_second_chances() {
        let space = SimSpace::new(1, 4);
        let frames = frames_with_bits(
            &space,
            &[(true, false), (true, false), (true, true), (true, false)],
        );
        let mut clock = ClockEviction::default();
        // Pass 2 clears every use bit, including frame 0's, then pass 3 takes
        // the first clean frame after the hand.
        assert_eq!(clock.select_victim(&frames), 1);
        for vpn in 0..4 {
            assert!(!space.entry(vpn).used(), "page {vpn} kept its use bit");
        }
    }

    #[test]
    fn test_clock_second_call_resumes_past_last_victim() {
        let space = SimSpace::new(1, 4);
        let frames = frames_with_bits(
            &space,
            &[(true, false), (false, false), (true, true), (false, true)],
        );
        let mut clock = ClockEviction::default();
        assert_eq!(clock.select_victim(&frames), 1);

        // Frame 1 now holds a freshly used page.
        space.set_bits(1, true, false);
        assert_eq!(clock.select_victim(&frames), 3);
        // Pass 2 started past the hand and stopped at frame 3, so only frame 2
        // lost its use bit.
        assert!(!space.entry(2).used());
        assert!(space.entry(0).used());
        assert!(space.entry(1).used());
    }

    #[test]
    fn test_clock_all_dirty_takes_next_frame() {
        let space = SimSpace::new(1, 3);
        let frames = frames_with_bits(&space, &[(true, true), (true, true), (true, true)]);
        let mut clock = ClockEviction::default();
        assert_eq!(clock.select_victim(&frames), 1);
        assert_eq!(clock.select_victim(&frames), 2);
    }

    #[test]
    fn test_clock_hand_persists() {
        let space = SimSpace::new(1, 4);
        let frames = frames_with_bits(
            &space,
            &[(false, false), (false, false), (false, false), (false, false)],
        );
        let mut clock = ClockEviction::default();
        assert_eq!(clock.select_victim(&frames), 1);
        assert_eq!(clock.select_victim(&frames), 2);
        assert_eq!(clock.select_victim(&frames), 3);
        assert_eq!(clock.select_victim(&frames), 0);
    }

    #[test]
    fn test_clock_takes_free_frame() {
        let space = SimSpace::new(1, 3);
        let mut frames = frames_with_bits(&space, &[(true, true), (true, true), (true, true)]);
        frames[2] = Frame::default();
        let mut clock = ClockEviction::default();
        assert_eq!(clock.select_victim(&frames), 2);
    }

    #[test]
    fn test_fifo_wraps() {
        let frames = ages(&[0, 0, 0]);
        let mut fifo = FifoEviction::default();
        let picks: Vec<_> = (0..7).map(|_| fifo.select_victim(&frames)).collect();
        assert_eq!(picks, [0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_lru_picks_oldest() {
        let mut lru = LruEviction;
        assert_eq!(lru.select_victim(&ages(&[3, 9, 0, 4])), 1);
        assert_eq!(lru.select_victim(&ages(&[5, 2, 5, 1])), 0);
        assert_eq!(lru.select_victim(&ages(&[1, 4, 4, 0])), 1);
    }

    #[test]
    fn test_lru_all_zero_defaults_to_first() {
        let mut lru = LruEviction;
        assert_eq!(lru.select_victim(&ages(&[0, 0, 0])), 0);
    }

    #[test]
    fn test_random_reaches_every_frame() {
        let frames = ages(&[0; 8]);
        let mut random = RandomEviction::new(42);
        let mut seen = [0usize; 8];
        for _ in 0..10_000 {
            let victim = random.select_victim(&frames);
            assert!(victim < frames.len());
            seen[victim] += 1;
        }
        assert!(seen.iter().all(|&count| count > 0), "{seen:?}");
    }

    #[test]
    fn test_random_zero_seed_still_moves() {
        let frames = ages(&[0; 4]);
        let mut random = RandomEviction::new(0);
        let picks: Vec<_> = (0..64).map(|_| random.select_victim(&frames)).collect();
        assert!(picks.iter().any(|&p| p != picks[0]));
    }

    #[test]
    fn test_build_names() {
        for (kind, name) in [
            (ReplacementPolicyKind::Clock, "clock"),
            (ReplacementPolicyKind::Fifo, "fifo"),
            (ReplacementPolicyKind::Lru, "lru"),
            (ReplacementPolicyKind::Random, "random"),
        ] {
            assert_eq!(kind.build(1).name(), name);
        }
    }
}
