// SPDX-License-Identifier: CEPL-1.0
//! The demo scene: a checkerboard cube, tinted per face, spinning in front
//! of the camera.
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use strobe_render_vk::{FrameHooks, FrameInfo, TextureData, Vertex};
use tracing::warn;

const HALF: f32 = 0.75;

const QUAD_UV: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];

const FACE_COLORS: [[f32; 3]; 6] = [
    [0.90, 0.30, 0.25],
    [0.95, 0.65, 0.20],
    [0.30, 0.80, 0.35],
    [0.25, 0.70, 0.85],
    [0.35, 0.40, 0.90],
    [0.80, 0.40, 0.85],
];

/// Matches the `Camera` block in `cube.vert`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Camera {
    pub mvp: [f32; 16],
}

/// 6 faces × 2 triangles, one tint per face, the whole texture on each face.
pub fn cube_vertices() -> Vec<Vertex> {
    let corner = |axis: usize, side: f32, u: f32, v: f32| {
        let mut p = [0.0; 3];
        p[axis] = side * HALF;
        p[(axis + 1) % 3] = u * HALF;
        p[(axis + 2) % 3] = v * HALF;
        p
    };

    let mut out = Vec::with_capacity(36);
    for axis in 0..3 {
        for (s, side) in [-1.0f32, 1.0].into_iter().enumerate() {
            let color = FACE_COLORS[axis * 2 + s];
            let quad = [
                corner(axis, side, -1.0, -1.0),
                corner(axis, side, 1.0, -1.0),
                corner(axis, side, 1.0, 1.0),
                corner(axis, side, -1.0, 1.0),
            ];
            for i in [0, 1, 2, 0, 2, 3] {
                out.push(Vertex::new(quad[i], color, QUAD_UV[i]));
            }
        }
    }
    out
}

/// 256² texels, 32 texel squares.
pub fn cube_texture() -> TextureData {
    TextureData::checkerboard(256, 32)
}

pub fn camera_at(seconds: f32, aspect: f32) -> Camera {
    let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 100.0);
    // Vulkan clip space has y pointing down
    proj.y_axis.y *= -1.0;
    let view = Mat4::from_translation(Vec3::new(0.0, 0.0, -4.0));
    let model = Mat4::from_rotation_y(seconds) * Mat4::from_rotation_x(seconds * 0.7);
    Camera {
        mvp: (proj * view * model).to_cols_array(),
    }
}

#[derive(Default)]
pub struct SpinningCube {
    warned: bool,
}

impl FrameHooks for SpinningCube {
    fn update_uniforms(&mut self, frame: &FrameInfo, uniforms: &mut [u8]) {
        let aspect = frame.extent.width as f32 / frame.extent.height.max(1) as f32;
        let camera = camera_at(frame.elapsed.as_secs_f32(), aspect);
        let bytes = bytemuck::bytes_of(&camera);
        match uniforms.get_mut(..bytes.len()) {
            Some(dst) => dst.copy_from_slice(bytes),
            None if !self.warned => {
                warn!("uniform block is {} bytes, camera needs {}", uniforms.len(), bytes.len());
                self.warned = true;
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn cube_is_36_vertices_on_the_faces() {
        let v = cube_vertices();
        assert_eq!(v.len(), 36);
        for vert in &v {
            assert!(vert.pos.iter().any(|c| c.abs() == HALF));
            assert!(vert.pos.iter().all(|c| c.abs() <= HALF));
        }
        // each face keeps a single colour and spans the texture
        for face in v.chunks(6) {
            assert!(face.iter().all(|x| x.color == face[0].color));
            assert!(face.iter().any(|x| x.uv == [0.0, 0.0]));
            assert!(face.iter().any(|x| x.uv == [1.0, 1.0]));
        }
    }

    #[test]
    fn cube_texture_is_a_square_checkerboard() {
        let t = cube_texture();
        assert_eq!((t.width, t.height), (256, 256));
        assert_ne!(t.rgba[..4], t.rgba[32 * 4..33 * 4]);
    }

    #[test]
    fn camera_block_is_one_mat4() {
        assert_eq!(std::mem::size_of::<Camera>(), 64);
    }

    #[test]
    fn origin_projects_inside_the_depth_range() {
        let cam = camera_at(0.0, 16.0 / 9.0);
        let clip = Mat4::from_cols_array(&cam.mvp) * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip / clip.w;
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn small_uniform_block_is_left_alone() {
        let mut cube = SpinningCube::default();
        let info = FrameInfo {
            slot: 0,
            image: 0,
            extent: strobe_render_vk::vk::Extent2D {
                width: 800,
                height: 600,
            },
            elapsed: std::time::Duration::ZERO,
            frame: 0,
        };
        let mut small = [7u8; 16];
        cube.update_uniforms(&info, &mut small);
        assert_eq!(small, [7u8; 16]);

        let mut block = [0u8; 64];
        cube.update_uniforms(&info, &mut block);
        assert!(block.iter().any(|&b| b != 0));
    }
}
