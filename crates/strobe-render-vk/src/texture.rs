// SPDX-License-Identifier: CEPL-1.0
//! Sampled RGBA8 textures: pixel data on the host, image + sampler on the
//! device.
use std::sync::Arc;

use ash::vk;
use strobe_render::{RenderError, RenderResult};
use tracing::debug;

use crate::context::DeviceContext;
use crate::error::VkResultExt;
use crate::memory::{upload_image_via_staging, Image};

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Tightly packed RGBA8 pixels, row major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl TextureData {
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> RenderResult<Self> {
        if width == 0 || height == 0 {
            return Err(RenderError::setup("texture has no pixels"));
        }
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(RenderError::setup(format!(
                "texture {width}x{height} needs {expected} bytes, got {}",
                rgba.len()
            )));
        }
        Ok(Self {
            width,
            height,
            rgba,
        })
    }

    /// White and dark grey squares of `cell` pixels, opaque.
    pub fn checkerboard(size: u32, cell: u32) -> Self {
        let cell = cell.max(1);
        let size = size.max(1);
        let mut rgba = Vec::with_capacity(size as usize * size as usize * 4);
        for y in 0..size {
            for x in 0..size {
                let on = ((x / cell) ^ (y / cell)) & 1 == 1;
                let c = if on { 255 } else { 32 };
                rgba.extend_from_slice(&[c, c, c, 255]);
            }
        }
        Self {
            width: size,
            height: size,
            rgba,
        }
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }
}

/// Device copy of a [`TextureData`] with a linear, repeating sampler.
pub struct Texture {
    ctx: Arc<DeviceContext>,
    pub image: Image,
    pub sampler: vk::Sampler,
}

impl Texture {
    /// # Safety
    /// `pool` must belong to the graphics family of `ctx`.
    pub unsafe fn new(
        ctx: &Arc<DeviceContext>,
        pool: vk::CommandPool,
        data: &TextureData,
    ) -> RenderResult<Self> {
        let image = Image::new_2d(
            ctx,
            data.extent(),
            TEXTURE_FORMAT,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::ImageAspectFlags::COLOR,
        )?;
        upload_image_via_staging(ctx, pool, &image, data.extent(), &data.rgba)?;

        let sci = sampler_info();
        let sampler = ctx.device.create_sampler(&sci, None).vk("create_sampler")?;
        debug!("texture {}x{} uploaded", data.width, data.height);
        Ok(Self {
            ctx: ctx.clone(),
            image,
            sampler,
        })
    }

    pub fn descriptor(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.image.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

fn sampler_info() -> vk::SamplerCreateInfo<'static> {
    vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: vk::Filter::LINEAR,
        min_filter: vk::Filter::LINEAR,
        mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        address_mode_u: vk::SamplerAddressMode::REPEAT,
        address_mode_v: vk::SamplerAddressMode::REPEAT,
        address_mode_w: vk::SamplerAddressMode::REPEAT,
        max_lod: 0.0,
        border_color: vk::BorderColor::INT_OPAQUE_BLACK,
        ..Default::default()
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        // image goes after, with the field
        unsafe { self.ctx.device.destroy_sampler(self.sampler, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(t: &TextureData, x: u32, y: u32) -> &[u8] {
        let i = ((y * t.width + x) * 4) as usize;
        &t.rgba[i..i + 4]
    }

    #[test]
    fn checkerboard_alternates_per_cell() {
        let t = TextureData::checkerboard(256, 32);
        assert_eq!(t.rgba.len(), 256 * 256 * 4);
        assert_eq!(pixel(&t, 0, 0), &[32, 32, 32, 255]);
        assert_eq!(pixel(&t, 31, 31), &[32, 32, 32, 255]);
        assert_eq!(pixel(&t, 32, 0), &[255, 255, 255, 255]);
        assert_eq!(pixel(&t, 0, 32), &[255, 255, 255, 255]);
        assert_eq!(pixel(&t, 32, 32), &[32, 32, 32, 255]);
        assert!(t.rgba.chunks(4).all(|p| p[3] == 255));
    }

    #[test]
    fn zero_cell_is_one_pixel_squares() {
        let t = TextureData::checkerboard(2, 0);
        assert_eq!(pixel(&t, 0, 0), &[32, 32, 32, 255]);
        assert_eq!(pixel(&t, 1, 0), &[255, 255, 255, 255]);
    }

    #[test]
    fn pixel_data_must_match_the_size() {
        assert!(TextureData::new(2, 2, vec![0; 16]).is_ok());
        assert!(TextureData::new(2, 2, vec![0; 12]).is_err());
        assert!(TextureData::new(0, 2, Vec::new()).is_err());
    }

    #[test]
    fn sampler_is_linear_and_repeating() {
        let s = sampler_info();
        assert_eq!(s.mag_filter, vk::Filter::LINEAR);
        assert_eq!(s.min_filter, vk::Filter::LINEAR);
        assert_eq!(s.mipmap_mode, vk::SamplerMipmapMode::LINEAR);
        assert_eq!(s.address_mode_u, vk::SamplerAddressMode::REPEAT);
        assert_eq!(s.address_mode_v, vk::SamplerAddressMode::REPEAT);
    }
}
