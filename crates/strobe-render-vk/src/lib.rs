// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend for the strobe render loop.
#![deny(clippy::missing_safety_doc)]
pub mod chain;
pub mod context;
pub mod error;
pub mod memory;
pub mod pipeline;
pub mod renderer;
pub mod scene;
pub mod sync;
pub mod texture;

pub use chain::{ChainPlan, Generation, PresentPreference, SurfaceSupport};
pub use pipeline::ShaderSet;
pub use renderer::{DrawContext, FrameHooks, FrameInfo, VkRenderer, VkRendererDesc};
pub use scene::Vertex;
pub use texture::TextureData;

pub use ash::vk;
