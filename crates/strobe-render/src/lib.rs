// SPDX-License-Identifier: CEPL-1.0
//! API-independent half of the renderer: frame pacing, the chain
//! invalidation policy and the render loop state machine.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod driver;
pub mod error;
pub mod pacing;
pub mod policy;
pub mod window;

pub use driver::{ChainStatus, FrameBackend, LoopState, LoopStats, RenderLoop};
pub use error::{RenderError, RenderResult};
pub use pacing::{FenceOps, FramePacer, FrameSlot, SlotState, MAX_FRAMES_IN_FLIGHT};
pub use policy::{classify, ChainAction, ChainStep, SwapOutcome};
pub use window::{PlatformWindow, RenderSize};
