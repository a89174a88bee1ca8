// SPDX-License-Identifier: CEPL-1.0
//! Long-lived draw resources: the vertex buffer, the texture, and one uniform
//! block plus descriptor set per frame slot. None of it depends on the chain.
use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use strobe_render::{RenderError, RenderResult};

use crate::context::DeviceContext;
use crate::error::VkResultExt;
use crate::memory::{upload_via_staging, Buffer};
use crate::texture::{Texture, TextureData};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const fn new(pos: [f32; 3], color: [f32; 3], uv: [f32; 2]) -> Self {
        Self { pos, color, uv }
    }

    pub fn binding() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attributes() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::size_of::<[f32; 3]>() as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: std::mem::size_of::<[f32; 6]>() as u32,
            },
        ]
    }
}

pub struct Scene {
    ctx: Arc<DeviceContext>,
    pub vertices: Buffer,
    pub vertex_count: u32,
    pub texture: Texture,
    pub uniforms: Vec<Buffer>,
    pub set_layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    pub sets: Vec<vk::DescriptorSet>,
}

impl Scene {
    /// # Safety
    /// `cmd_pool` must belong to the graphics family of `ctx`.
    pub unsafe fn new(
        ctx: &Arc<DeviceContext>,
        cmd_pool: vk::CommandPool,
        vertices: &[Vertex],
        texture: &TextureData,
        uniform_size: vk::DeviceSize,
        slots: usize,
    ) -> RenderResult<Self> {
        if vertices.is_empty() {
            return Err(RenderError::setup("scene has no vertices"));
        }
        if uniform_size == 0 {
            return Err(RenderError::setup("uniform block size is zero"));
        }
        let device = &ctx.device;

        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        let vbuf = Buffer::new(
            ctx,
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        upload_via_staging(ctx, cmd_pool, &vbuf, bytes)?;
        let texture = Texture::new(ctx, cmd_pool, texture)?;

        let uniforms = (0..slots)
            .map(|_| Buffer::host_visible(ctx, uniform_size, vk::BufferUsageFlags::UNIFORM_BUFFER))
            .collect::<RenderResult<Vec<_>>>()?;

        let bindings = layout_bindings();
        let layout_ci = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            binding_count: bindings.len() as u32,
            p_bindings: bindings.as_ptr(),
            ..Default::default()
        };
        let set_layout = device
            .create_descriptor_set_layout(&layout_ci, None)
            .vk("create_descriptor_set_layout")?;

        let pool_sizes = pool_sizes(slots);
        let pool_ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: slots as u32,
            pool_size_count: pool_sizes.len() as u32,
            p_pool_sizes: pool_sizes.as_ptr(),
            ..Default::default()
        };
        let pool = match device.create_descriptor_pool(&pool_ci, None) {
            Ok(p) => p,
            Err(e) => {
                device.destroy_descriptor_set_layout(set_layout, None);
                return Err(crate::error::vk_error("create_descriptor_pool", e));
            }
        };

        let mut scene = Self {
            ctx: ctx.clone(),
            vertices: vbuf,
            vertex_count: vertices.len() as u32,
            texture,
            uniforms,
            set_layout,
            pool,
            sets: Vec::new(),
        };

        let layouts = vec![set_layout; slots];
        let alloc = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: pool,
            descriptor_set_count: slots as u32,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        scene.sets = device
            .allocate_descriptor_sets(&alloc)
            .vk("allocate_descriptor_sets")?;

        let infos: Vec<vk::DescriptorBufferInfo> = scene
            .uniforms
            .iter()
            .map(|u| vk::DescriptorBufferInfo {
                buffer: u.handle,
                offset: 0,
                range: uniform_size,
            })
            .collect();
        let image_info = scene.texture.descriptor();
        let writes: Vec<vk::WriteDescriptorSet> = scene
            .sets
            .iter()
            .zip(&infos)
            .flat_map(|(&set, info)| {
                [
                    vk::WriteDescriptorSet {
                        s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                        dst_set: set,
                        dst_binding: 0,
                        descriptor_count: 1,
                        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                        p_buffer_info: info,
                        ..Default::default()
                    },
                    vk::WriteDescriptorSet {
                        s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                        dst_set: set,
                        dst_binding: 1,
                        descriptor_count: 1,
                        descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                        p_image_info: &image_info,
                        ..Default::default()
                    },
                ]
            })
            .collect();
        device.update_descriptor_sets(&writes, &[]);

        Ok(scene)
    }
}

/// Binding 0: the slot's camera block. Binding 1: the texture.
fn layout_bindings() -> [vk::DescriptorSetLayoutBinding<'static>; 2] {
    [
        vk::DescriptorSetLayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::VERTEX,
            ..Default::default()
        },
        vk::DescriptorSetLayoutBinding {
            binding: 1,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            ..Default::default()
        },
    ]
}

fn pool_sizes(slots: usize) -> [vk::DescriptorPoolSize; 2] {
    [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: slots as u32,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: slots as u32,
        },
    ]
}

impl Drop for Scene {
    fn drop(&mut self) {
        unsafe {
            // frees the sets with it
            self.ctx.device.destroy_descriptor_pool(self.pool, None);
            self.ctx
                .device
                .destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_attributes() {
        assert_eq!(Vertex::binding().stride, 32);
        let attrs = Vertex::attributes();
        assert_eq!(attrs[1].offset, 12);
        assert_eq!(attrs[2].offset, 24);
        assert_eq!(attrs[2].location, 2);
        assert_eq!(attrs[2].format, vk::Format::R32G32_SFLOAT);
        let v = [Vertex::new([1.0, 2.0, 3.0], [0.5, 0.5, 0.5], [0.25, 0.75])];
        let bytes: &[u8] = bytemuck::cast_slice(&v);
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[..4], &1.0f32.to_ne_bytes());
        assert_eq!(&bytes[24..28], &0.25f32.to_ne_bytes());
    }

    #[test]
    fn texture_is_bound_for_the_fragment_stage() {
        let b = layout_bindings();
        assert_eq!(b[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(b[0].stage_flags, vk::ShaderStageFlags::VERTEX);
        assert_eq!(b[1].binding, 1);
        assert_eq!(b[1].descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(b[1].stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn pool_holds_both_descriptors_per_slot() {
        let sizes = pool_sizes(2);
        assert!(sizes.iter().all(|s| s.descriptor_count == 2));
        assert_eq!(sizes[1].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
    }
}
