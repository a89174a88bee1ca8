// SPDX-License-Identifier: CEPL-1.0
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A zero-area drawable cannot back a presentation chain.
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// What the render loop needs from a native window. Implementations are
/// picked at startup; the loop never looks at which one it got.
pub trait PlatformWindow: HasWindowHandle + HasDisplayHandle {
    /// Current drawable size in pixels. May be zero while minimized.
    fn drawable_size(&self) -> RenderSize;

    /// Drain pending events without blocking. Returns `false` once the
    /// window has been asked to close.
    fn pump_events(&mut self) -> bool;

    /// Block until at least one event arrives.
    fn wait_events(&mut self);

    fn is_minimized(&self) -> bool {
        self.drawable_size().is_empty()
    }

    fn platform_name(&self) -> &'static str;
}
