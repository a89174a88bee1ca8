// SPDX-License-Identifier: CEPL-1.0
//! winit-backed [`PlatformWindow`].
#![deny(unsafe_op_in_unsafe_fn)]
use std::time::Duration;

use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, RawDisplayHandle, WindowHandle,
};
use strobe_render::{PlatformWindow, RenderError, RenderResult, RenderSize};
use tracing::{debug, info};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Window, WindowAttributes, WindowId};

pub use winit;

/// Which window system to talk to. Only meaningful on Linux.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WindowBackend {
    #[default]
    Auto,
    X11,
    Wayland,
}

#[derive(Clone, Debug)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub backend: WindowBackend,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "strobe".into(),
            width: 1280,
            height: 720,
            backend: WindowBackend::Auto,
        }
    }
}

struct WindowState {
    attrs: WindowAttributes,
    window: Option<Window>,
    size: PhysicalSize<u32>,
    close_requested: bool,
    error: Option<String>,
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        match event_loop.create_window(self.attrs.clone()) {
            Ok(window) => {
                self.size = window.inner_size();
                self.window = Some(window);
            }
            Err(e) => {
                self.error = Some(e.to_string());
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if self.window.as_ref().is_some_and(|w| w.id() != window_id) {
            return;
        }
        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.close_requested = true;
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                info!("Escape pressed");
                self.close_requested = true;
            }
            WindowEvent::Resized(size) => {
                debug!("Resized → {}x{}", size.width, size.height);
                self.size = size;
            }
            _ => {}
        }
    }
}

pub struct WinitWindow {
    // window before event loop: it must go first
    state: WindowState,
    event_loop: EventLoop<()>,
    platform: &'static str,
}

impl WinitWindow {
    pub fn new(cfg: &WindowConfig) -> RenderResult<Self> {
        let event_loop = build_event_loop(cfg.backend)?;
        let attrs = Window::default_attributes()
            .with_title(cfg.title.clone())
            .with_inner_size(PhysicalSize::new(cfg.width, cfg.height));
        let mut this = Self {
            state: WindowState {
                attrs,
                window: None,
                size: PhysicalSize::new(0, 0),
                close_requested: false,
                error: None,
            },
            event_loop,
            platform: "unknown",
        };

        // the window is created on the first `resumed`
        for _ in 0..100 {
            if this.state.window.is_some() || this.state.error.is_some() {
                break;
            }
            let status = this
                .event_loop
                .pump_app_events(Some(Duration::from_millis(10)), &mut this.state);
            if let PumpStatus::Exit(code) = status {
                return Err(RenderError::Window(format!("event loop exited early ({code})")));
            }
        }
        if let Some(e) = this.state.error.take() {
            return Err(RenderError::Window(e));
        }
        let window = this
            .state
            .window
            .as_ref()
            .ok_or_else(|| RenderError::Window("window was never created".into()))?;

        this.platform = window
            .display_handle()
            .map(|h| platform_name(h.as_raw()))
            .unwrap_or("unknown");
        info!(
            "window {}x{} on {}",
            this.state.size.width, this.state.size.height, this.platform
        );
        Ok(this)
    }

    fn window(&self) -> Result<&Window, HandleError> {
        self.state.window.as_ref().ok_or(HandleError::Unavailable)
    }
}

#[cfg(any(
    target_os = "linux",
    target_os = "dragonfly",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
))]
fn build_event_loop(backend: WindowBackend) -> RenderResult<EventLoop<()>> {
    use winit::platform::wayland::EventLoopBuilderExtWayland;
    use winit::platform::x11::EventLoopBuilderExtX11;

    let mut builder = EventLoop::builder();
    match backend {
        WindowBackend::Auto => {}
        WindowBackend::X11 => {
            builder.with_x11();
        }
        WindowBackend::Wayland => {
            builder.with_wayland();
        }
    }
    builder
        .build()
        .map_err(|e| RenderError::Window(e.to_string()))
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "dragonfly",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
)))]
fn build_event_loop(backend: WindowBackend) -> RenderResult<EventLoop<()>> {
    if backend != WindowBackend::Auto {
        tracing::warn!("window backend {backend:?} ignored on this platform");
    }
    EventLoop::new().map_err(|e| RenderError::Window(e.to_string()))
}

fn platform_name(raw: RawDisplayHandle) -> &'static str {
    match raw {
        RawDisplayHandle::Xlib(_) | RawDisplayHandle::Xcb(_) => "x11",
        RawDisplayHandle::Wayland(_) => "wayland",
        RawDisplayHandle::Windows(_) => "win32",
        RawDisplayHandle::AppKit(_) => "appkit",
        RawDisplayHandle::Android(_) => "android",
        _ => "other",
    }
}

impl HasWindowHandle for WinitWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.window()?.window_handle()
    }
}

impl HasDisplayHandle for WinitWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.window()?.display_handle()
    }
}

impl PlatformWindow for WinitWindow {
    fn drawable_size(&self) -> RenderSize {
        RenderSize::new(self.state.size.width, self.state.size.height)
    }

    fn pump_events(&mut self) -> bool {
        let status = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.state);
        !matches!(status, PumpStatus::Exit(_)) && !self.state.close_requested
    }

    fn wait_events(&mut self) {
        // blocks until something arrives; the follow-up pump sees the result
        let _ = self.event_loop.pump_app_events(None, &mut self.state);
    }

    fn is_minimized(&self) -> bool {
        self.drawable_size().is_empty()
            || self
                .state
                .window
                .as_ref()
                .and_then(Window::is_minimized)
                .unwrap_or(false)
    }

    fn platform_name(&self) -> &'static str {
        self.platform
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_a_visible_window() {
        let cfg = WindowConfig::default();
        assert_eq!(cfg.backend, WindowBackend::Auto);
        assert!(!RenderSize::new(cfg.width, cfg.height).is_empty());
    }
}
