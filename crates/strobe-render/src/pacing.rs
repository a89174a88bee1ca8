// SPDX-License-Identifier: CEPL-1.0
//! Frame pacing: a fixed ring of frame slots plus the per-image last-use
//! table that keeps the CPU from touching a slot or an image the GPU still
//! owns.
//!
//! Per iteration the loop calls, in order:
//! 1. [`FramePacer::begin_frame`] waits for and resets the current slot's fence
//! 2. acquire (backend)
//! 3. [`FramePacer::reserve_image`] waits for whoever last rendered that image
//! 4. record + submit (backend), then [`FramePacer::mark_submitted`]
//! 5. present (backend), then [`FramePacer::advance`]

use tracing::trace;

use crate::error::{RenderError, RenderResult};

/// Frames the CPU may run ahead of the GPU. Fixed for the process lifetime.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// CPU-side fence operations. Waits are unbounded.
pub trait FenceOps {
    type Fence;

    fn wait_fence(&mut self, fence: &Self::Fence) -> RenderResult<()>;
    fn reset_fence(&mut self, fence: &Self::Fence) -> RenderResult<()>;
}

/// One entry of the frame-slot ring. Backends hang their semaphores and
/// per-frame data off the same value.
pub trait FrameSlot {
    type Fence;

    fn fence(&self) -> &Self::Fence;
}

/// Where a slot's fence stands from the CPU's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Submitted (or created signaled); must be waited before reuse.
    InFlight,
    /// Waited on, still signaled, not yet reset.
    Signaled,
    /// Waited and reset for the current iteration, nothing submitted yet.
    Open,
}

pub struct FramePacer<S> {
    slots: Vec<S>,
    states: Vec<SlotState>,
    current: usize,
    // `None` until an image is first rendered into after a rebuild.
    image_owner: Vec<Option<usize>>,
}

impl<S: FrameSlot> FramePacer<S> {
    /// Takes ownership of the ring. Slot fences must start signaled.
    pub fn new(slots: Vec<S>) -> RenderResult<Self> {
        if slots.is_empty() {
            return Err(RenderError::setup("frame pacer needs at least one slot"));
        }
        let states = vec![SlotState::InFlight; slots.len()];
        Ok(Self {
            slots,
            states,
            current: 0,
            image_owner: Vec::new(),
        })
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn current_slot(&self) -> &S {
        &self.slots[self.current]
    }

    pub fn slot(&self, index: usize) -> Option<&S> {
        self.slots.get(index)
    }

    pub fn state(&self, index: usize) -> Option<SlotState> {
        self.states.get(index).copied()
    }

    pub fn image_count(&self) -> usize {
        self.image_owner.len()
    }

    /// Slot that last rendered into `image`, if any.
    pub fn last_user(&self, image: usize) -> Option<usize> {
        self.image_owner.get(image).copied().flatten()
    }

    /// Make the current slot safe to reuse. Returns its index.
    ///
    /// A slot left open by an abandoned iteration (acquire went out of date)
    /// is handed back as is; its fence was already reset and nothing signals
    /// it until the next submit.
    pub fn begin_frame<F>(&mut self, fences: &mut F) -> RenderResult<usize>
    where
        F: FenceOps<Fence = S::Fence> + ?Sized,
    {
        let cur = self.current;
        let fence = self.slots[cur].fence();
        match self.states[cur] {
            SlotState::Open => trace!(slot = cur, "slot still open"),
            SlotState::InFlight => {
                fences.wait_fence(fence)?;
                fences.reset_fence(fence)?;
            }
            SlotState::Signaled => fences.reset_fence(fence)?,
        }
        self.states[cur] = SlotState::Open;
        Ok(cur)
    }

    /// Claim `image` for the current slot, first waiting on the slot that
    /// last rendered into it if that work may still be running.
    pub fn reserve_image<F>(&mut self, image: usize, fences: &mut F) -> RenderResult<()>
    where
        F: FenceOps<Fence = S::Fence> + ?Sized,
    {
        let cur = self.current;
        let Some(entry) = self.image_owner.get(image).copied() else {
            return Err(RenderError::device(
                "reserve_image",
                format!(
                    "image {image} outside last-use table of {}",
                    self.image_owner.len()
                ),
            ));
        };

        // The current slot's own fence was handled by begin_frame.
        if let Some(owner) = entry.filter(|&o| o != cur) {
            if self.states[owner] == SlotState::InFlight {
                trace!(image, owner, slot = cur, "waiting on previous image user");
                fences.wait_fence(self.slots[owner].fence())?;
                self.states[owner] = SlotState::Signaled;
            }
        }
        self.image_owner[image] = Some(cur);
        Ok(())
    }

    /// The current slot's fence now belongs to the GPU.
    pub fn mark_submitted(&mut self) {
        self.states[self.current] = SlotState::InFlight;
    }

    pub fn advance(&mut self) -> usize {
        self.current = (self.current + 1) % self.slots.len();
        self.current
    }

    /// Forget every image owner and size the table for a new chain.
    pub fn reset_images(&mut self, image_count: usize) {
        self.image_owner.clear();
        self.image_owner.resize(image_count, None);
    }

    pub fn into_slots(self) -> Vec<S> {
        self.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Slot(usize);

    impl FrameSlot for Slot {
        type Fence = usize;
        fn fence(&self) -> &usize {
            &self.0
        }
    }

    #[derive(Debug, PartialEq, Eq)]
    enum Op {
        Wait(usize),
        Reset(usize),
    }

    #[derive(Default)]
    struct Log(Vec<Op>, bool);

    impl Log {
        fn losing_device() -> Self {
            Self(Vec::new(), true)
        }
    }

    impl FenceOps for Log {
        type Fence = usize;
        fn wait_fence(&mut self, fence: &usize) -> RenderResult<()> {
            self.0.push(Op::Wait(*fence));
            if self.1 {
                return Err(RenderError::DeviceLost("wait_for_fences"));
            }
            Ok(())
        }
        fn reset_fence(&mut self, fence: &usize) -> RenderResult<()> {
            self.0.push(Op::Reset(*fence));
            Ok(())
        }
    }

    fn pacer(images: usize) -> FramePacer<Slot> {
        let mut p = FramePacer::new((0..MAX_FRAMES_IN_FLIGHT).map(Slot).collect()).unwrap();
        p.reset_images(images);
        p
    }

    #[test]
    fn empty_ring_is_rejected() {
        assert!(FramePacer::<Slot>::new(Vec::new()).is_err());
    }

    #[test]
    fn fresh_table_has_no_owners() {
        let p = pacer(3);
        assert_eq!(p.image_count(), 3);
        assert!((0..3).all(|i| p.last_user(i).is_none()));
    }

    #[test]
    fn begin_frame_waits_then_resets() {
        let mut p = pacer(3);
        let mut log = Log::default();
        assert_eq!(p.begin_frame(&mut log).unwrap(), 0);
        assert_eq!(log.0, vec![Op::Wait(0), Op::Reset(0)]);
        assert_eq!(p.state(0), Some(SlotState::Open));
    }

    #[test]
    fn abandoned_slot_is_not_waited_again() {
        let mut p = pacer(3);
        let mut log = Log::default();
        p.begin_frame(&mut log).unwrap();
        // acquire went out of date: no submit, no advance
        p.reset_images(3);
        p.begin_frame(&mut log).unwrap();
        assert_eq!(log.0, vec![Op::Wait(0), Op::Reset(0)]);
    }

    #[test]
    fn advance_wraps_around_the_ring() {
        let mut p = pacer(3);
        assert_eq!(p.advance(), 1);
        assert_eq!(p.advance(), 0);
    }

    #[test]
    fn first_reservation_never_waits() {
        let mut p = pacer(3);
        let mut log = Log::default();
        p.begin_frame(&mut log).unwrap();
        log.0.clear();
        p.reserve_image(2, &mut log).unwrap();
        assert!(log.0.is_empty());
        assert_eq!(p.last_user(2), Some(0));
    }

    #[test]
    fn image_reuse_waits_on_the_previous_slot() {
        let mut p = pacer(3);
        let mut log = Log::default();

        p.begin_frame(&mut log).unwrap();
        p.reserve_image(1, &mut log).unwrap();
        p.mark_submitted();
        p.advance();

        p.begin_frame(&mut log).unwrap();
        log.0.clear();
        p.reserve_image(1, &mut log).unwrap();
        assert_eq!(log.0, vec![Op::Wait(0)]);
        assert_eq!(p.last_user(1), Some(1));
        assert_eq!(p.state(0), Some(SlotState::Signaled));
    }

    #[test]
    fn a_waited_slot_is_reset_but_not_waited_again() {
        let mut p = pacer(3);
        let mut log = Log::default();

        p.begin_frame(&mut log).unwrap();
        p.reserve_image(1, &mut log).unwrap();
        p.mark_submitted();
        p.advance();
        p.begin_frame(&mut log).unwrap();
        p.reserve_image(1, &mut log).unwrap();
        p.mark_submitted();
        p.advance();

        log.0.clear();
        p.begin_frame(&mut log).unwrap();
        assert_eq!(log.0, vec![Op::Reset(0)]);
    }

    #[test]
    fn self_owned_image_does_not_deadlock() {
        let mut p = pacer(3);
        let mut log = Log::default();
        p.begin_frame(&mut log).unwrap();
        p.reserve_image(0, &mut log).unwrap();
        p.mark_submitted();
        p.advance();
        p.advance();

        p.begin_frame(&mut log).unwrap();
        log.0.clear();
        // slot 0 rendered image 0 last; its fence was waited in begin_frame
        p.reserve_image(0, &mut log).unwrap();
        assert!(log.0.is_empty());
    }

    #[test]
    fn every_reused_slot_is_waited_first() {
        let mut p = pacer(3);
        let mut log = Log::default();
        for frame in 0..10usize {
            let slot = p.begin_frame(&mut log).unwrap();
            assert_eq!(slot, frame % MAX_FRAMES_IN_FLIGHT);
            p.reserve_image(frame % 3, &mut log).unwrap();
            p.mark_submitted();
            p.advance();
        }
        // every reset of a fence is preceded by a wait on it since its last reset
        let mut waited = [false; MAX_FRAMES_IN_FLIGHT];
        for op in &log.0 {
            match *op {
                Op::Wait(f) => waited[f] = true,
                Op::Reset(f) => {
                    assert!(waited[f], "fence {f} reset without a wait");
                    waited[f] = false;
                }
            }
        }
    }

    #[test]
    fn out_of_range_image_is_an_error() {
        let mut p = pacer(2);
        let mut log = Log::default();
        p.begin_frame(&mut log).unwrap();
        assert!(p.reserve_image(5, &mut log).is_err());
    }

    #[test]
    fn rebuild_clears_owners() {
        let mut p = pacer(2);
        let mut log = Log::default();
        p.begin_frame(&mut log).unwrap();
        p.reserve_image(1, &mut log).unwrap();
        p.reset_images(4);
        assert_eq!(p.image_count(), 4);
        assert_eq!(p.last_user(1), None);
    }

    #[test]
    fn failed_slot_wait_leaves_the_fence_alone() {
        let mut p = pacer(3);
        let mut log = Log::losing_device();
        let err = p.begin_frame(&mut log).unwrap_err();
        assert!(err.is_device_lost());
        assert_eq!(log.0, vec![Op::Wait(0)]);
        assert_eq!(p.state(0), Some(SlotState::InFlight));
        assert_eq!(p.current(), 0);
    }

    #[test]
    fn failed_image_wait_keeps_the_previous_owner() {
        let mut p = pacer(3);
        let mut log = Log::default();
        p.begin_frame(&mut log).unwrap();
        p.reserve_image(1, &mut log).unwrap();
        p.mark_submitted();
        p.advance();
        p.begin_frame(&mut log).unwrap();

        let mut lost = Log::losing_device();
        assert!(p.reserve_image(1, &mut lost).unwrap_err().is_device_lost());
        assert_eq!(lost.0, vec![Op::Wait(0)]);
        assert_eq!(p.state(0), Some(SlotState::InFlight));
        assert_eq!(p.last_user(1), Some(0));
    }
}
