// SPDX-License-Identifier: CEPL-1.0
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use crate::error::RenderResult;
use crate::pacing::{FenceOps, FramePacer, FrameSlot, MAX_FRAMES_IN_FLIGHT};
use crate::policy::{ChainAction, ChainStep, SwapOutcome};
use crate::window::{PlatformWindow, RenderSize};

/// The GPU side of the loop. One implementation per graphics API.
///
/// Slot arguments are the pacer's current slot; `slot_index` is its ring
/// position, for backends that keep per-slot data outside the slot.
pub trait FrameBackend: FenceOps {
    type Slot: FrameSlot<Fence = Self::Fence>;

    /// Build one frame slot with its fence created signaled.
    fn create_slot(&mut self) -> RenderResult<Self::Slot>;

    fn has_chain(&self) -> bool;
    fn image_count(&self) -> usize;

    /// Acquire the next presentable image with an unbounded timeout,
    /// signaling the slot's image-acquired semaphore.
    fn acquire(&mut self, slot: &Self::Slot) -> RenderResult<SwapOutcome<u32>>;

    /// Per-frame data the GPU reads (uniforms). Runs before recording.
    fn update_frame(&mut self, slot_index: usize, image: u32) -> RenderResult<()>;

    /// Reset and record the image's command buffer from scratch.
    fn record(&mut self, slot_index: usize, image: u32) -> RenderResult<()>;

    /// Submit the image's commands: wait image-acquired, signal
    /// render-finished and the slot fence.
    fn submit(&mut self, slot: &Self::Slot, image: u32) -> RenderResult<()>;

    fn present(&mut self, slot: &Self::Slot, image: u32) -> RenderResult<SwapOutcome<()>>;

    /// Block until the device has finished all submitted work.
    fn wait_idle(&mut self) -> RenderResult<()>;

    /// Replace the chain and everything sized from it. The device is idle
    /// and `size` is non-zero.
    ///
    /// The surface can still report no presentable area (a minimized window
    /// whose resize has not reached the event queue yet). The backend then
    /// builds nothing and answers [`ChainStatus::NotPresentable`].
    fn rebuild(&mut self, size: RenderSize) -> RenderResult<ChainStatus>;

    /// Tear down the chain generation. Called once, after the final idle wait.
    fn release(&mut self);
}

/// Result of [`FrameBackend::rebuild`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainStatus {
    Ready,
    NotPresentable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Paused,
    Rebuilding,
    Exiting,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames: u64,
    pub rebuilds: u64,
    pub pauses: u64,
}

struct FpsCounter {
    frames: u32,
    since: Instant,
}

impl FpsCounter {
    fn new() -> Self {
        Self {
            frames: 0,
            since: Instant::now(),
        }
    }

    fn tick(&mut self) {
        self.frames = self.frames.saturating_add(1);
        let now = Instant::now();
        if now.duration_since(self.since).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.since = now;
        }
    }

    fn restart(&mut self) {
        self.frames = 0;
        self.since = Instant::now();
    }
}

pub struct RenderLoop<B: FrameBackend> {
    pacer: FramePacer<B::Slot>,
    backend: B,
    state: LoopState,
    // drawable size the live chain was built for
    built_for: Option<RenderSize>,
    stats: LoopStats,
    fps: FpsCounter,
}

impl<B: FrameBackend> RenderLoop<B> {
    pub fn new(mut backend: B) -> RenderResult<Self> {
        let slots = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| backend.create_slot())
            .collect::<RenderResult<Vec<_>>>()?;
        let mut pacer = FramePacer::new(slots)?;
        pacer.reset_images(backend.image_count());
        let state = if backend.has_chain() {
            LoopState::Running
        } else {
            LoopState::Rebuilding
        };
        Ok(Self {
            pacer,
            backend,
            state,
            built_for: None,
            stats: LoopStats::default(),
            fps: FpsCounter::new(),
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn pacer(&self) -> &FramePacer<B::Slot> {
        &self.pacer
    }

    /// Run until the window closes or a fatal error occurs. Either way the
    /// device is idled once and the chain generation released before return.
    pub fn run<W: PlatformWindow + ?Sized>(&mut self, window: &mut W) -> RenderResult<LoopStats> {
        info!(platform = window.platform_name(), "render loop starting");
        let outcome = self.drive(window);
        self.state = LoopState::Exiting;

        let idle = self.backend.wait_idle();
        self.backend.release();

        match (outcome, idle) {
            (Err(e), idle) => {
                if let Err(idle_err) = idle {
                    warn!("idle wait during shutdown failed: {idle_err}");
                }
                Err(e)
            }
            (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => {
                info!(
                    frames = self.stats.frames,
                    rebuilds = self.stats.rebuilds,
                    pauses = self.stats.pauses,
                    "render loop finished"
                );
                Ok(self.stats)
            }
        }
    }

    fn drive<W: PlatformWindow + ?Sized>(&mut self, window: &mut W) -> RenderResult<()> {
        loop {
            self.state = match self.state {
                LoopState::Running => self.step_running(window)?,
                LoopState::Paused => self.step_paused(window),
                LoopState::Rebuilding => self.step_rebuilding(window)?,
                LoopState::Exiting => return Ok(()),
            };
        }
    }

    fn step_running<W: PlatformWindow + ?Sized>(
        &mut self,
        window: &mut W,
    ) -> RenderResult<LoopState> {
        if !window.pump_events() {
            return Ok(LoopState::Exiting);
        }
        let size = window.drawable_size();
        if size.is_empty() || window.is_minimized() {
            info!("drawable is {}x{} → paused", size.width, size.height);
            self.stats.pauses += 1;
            return Ok(LoopState::Paused);
        }
        if !self.backend.has_chain() {
            return Ok(LoopState::Rebuilding);
        }
        if self.built_for.is_some_and(|built| built != size) {
            debug!("drawable resized to {}x{}", size.width, size.height);
            return Ok(LoopState::Rebuilding);
        }
        self.frame()
    }

    fn frame(&mut self) -> RenderResult<LoopState> {
        let slot = self.pacer.begin_frame(&mut self.backend)?;

        let acquired = self.backend.acquire(self.pacer.current_slot())?;
        let image = match (acquired.classify(ChainStep::Acquire), acquired.value()) {
            (ChainAction::Continue, Some(image)) => image,
            _ => {
                debug!(slot, "acquire: chain out of date");
                return Ok(LoopState::Rebuilding);
            }
        };
        if matches!(acquired, SwapOutcome::Suboptimal(_)) {
            trace!(image, "acquire: suboptimal, presenting anyway");
        }

        self.pacer.reserve_image(image as usize, &mut self.backend)?;
        self.backend.update_frame(slot, image)?;
        self.backend.record(slot, image)?;
        self.backend.submit(self.pacer.current_slot(), image)?;
        self.pacer.mark_submitted();

        let presented = self.backend.present(self.pacer.current_slot(), image)?;
        self.pacer.advance();
        self.stats.frames += 1;
        self.fps.tick();

        Ok(match presented.classify(ChainStep::Present) {
            ChainAction::Continue => LoopState::Running,
            ChainAction::Rebuild => {
                debug!(image, "present: chain stale");
                LoopState::Rebuilding
            }
        })
    }

    fn step_paused<W: PlatformWindow + ?Sized>(&mut self, window: &mut W) -> LoopState {
        window.wait_events();
        if !window.pump_events() {
            return LoopState::Exiting;
        }
        let size = window.drawable_size();
        if size.is_empty() || window.is_minimized() {
            return LoopState::Paused;
        }
        info!("drawable is {}x{} → resumed", size.width, size.height);
        self.fps.restart();
        LoopState::Running
    }

    fn step_rebuilding<W: PlatformWindow + ?Sized>(
        &mut self,
        window: &mut W,
    ) -> RenderResult<LoopState> {
        let size = window.drawable_size();
        if size.is_empty() || window.is_minimized() {
            self.stats.pauses += 1;
            return Ok(LoopState::Paused);
        }

        self.backend.wait_idle()?;
        let status = self.backend.rebuild(size)?;
        let images = self.backend.image_count();
        self.pacer.reset_images(images);
        if status == ChainStatus::NotPresentable {
            info!("surface has no area at {}x{} → paused", size.width, size.height);
            self.built_for = None;
            self.stats.pauses += 1;
            return Ok(LoopState::Paused);
        }
        self.built_for = Some(size);
        self.stats.rebuilds += 1;
        info!("chain rebuilt for {}x{} ({images} images)", size.width, size.height);
        Ok(LoopState::Running)
    }
}
