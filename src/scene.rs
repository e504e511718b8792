// Scene-side collaborators of the renderer
//
// The core only consumes three things from the outside world: camera matrices
// sampled once per frame, a static mesh, and a texture. This module provides
// small, deterministic versions of each for the demo host.

use glam::{Mat4, Vec3};
use serde::Deserialize;

use crate::backend::pipeline::Vertex;

/// View and projection sampled once per frame before the uniform update.
///
/// `projection` uses glam's right-handed, Y-up, [0, 1] depth convention; the
/// renderer flips Y when it builds the uniform record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraMatrices {
    pub view: Mat4,
    pub projection: Mat4,
}

impl Default for CameraMatrices {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        }
    }
}

/// Camera circling the Z axis and looking at the origin
#[derive(Debug, Clone, Copy)]
pub struct OrbitCamera {
    pub radius: f32,
    pub height: f32,
    /// Radians per second
    pub angular_speed: f32,
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            radius: 2.8,
            height: 2.0,
            angular_speed: 0.5,
            fov_y_degrees: 45.0,
            near: 0.1,
            far: 10.0,
        }
    }
}

impl OrbitCamera {
    pub fn eye(&self, elapsed_secs: f32) -> Vec3 {
        let angle = elapsed_secs * self.angular_speed;
        Vec3::new(self.radius * angle.cos(), self.radius * angle.sin(), self.height)
    }

    /// A zero-height framebuffer (minimized window) falls back to aspect 1.
    pub fn matrices(&self, elapsed_secs: f32, width: u32, height: u32) -> CameraMatrices {
        let aspect = if height == 0 {
            1.0
        } else {
            width as f32 / height as f32
        };

        CameraMatrices {
            view: Mat4::look_at_rh(self.eye(elapsed_secs), Vec3::ZERO, Vec3::Z),
            projection: Mat4::perspective_rh(
                self.fov_y_degrees.to_radians(),
                aspect,
                self.near,
                self.far,
            ),
        }
    }
}

/// Mesh kinds the demo knows how to build.
///
/// Resolved once when the scene is loaded; the frame loop only ever sees the
/// resulting vertex and index buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    Quad,
    Cube,
}

impl Shape {
    pub fn geometry(self) -> (Vec<Vertex>, Vec<u32>) {
        match self {
            Shape::Quad => quad(),
            Shape::Cube => cube(),
        }
    }
}

/// Tightly packed RGBA8 pixels
#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    /// Bytes needed for `width * height` RGBA8 pixels, `None` on overflow
    pub fn byte_len(width: u32, height: u32) -> Option<usize> {
        (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(4)
    }

    /// Two-tone checkerboard with `cells` squares per side
    pub fn checkerboard(size: u32, cells: u32) -> Self {
        let cell = (size / cells.max(1)).max(1);
        let mut pixels = Vec::with_capacity(Self::byte_len(size, size).unwrap_or(0));

        for y in 0..size {
            for x in 0..size {
                let light = ((x / cell) + (y / cell)) % 2 == 0;
                let value = if light { 235 } else { 70 };
                pixels.extend_from_slice(&[value, value, value, 255]);
            }
        }

        Self {
            width: size,
            height: size,
            pixels,
        }
    }
}

/// Everything the renderer uploads before the first frame
#[derive(Debug, Clone)]
pub struct StaticScene {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub texture: TextureData,
}

impl StaticScene {
    pub fn new(shape: Shape, texture_size: u32) -> Self {
        let (vertices, indices) = shape.geometry();
        Self {
            vertices,
            indices,
            texture: TextureData::checkerboard(texture_size, 8),
        }
    }
}

const FACE_UVS: [[f32; 2]; 4] = [[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]];

fn quad() -> (Vec<Vertex>, Vec<u32>) {
    let corners = [
        [-0.5, -0.5, 0.0],
        [0.5, -0.5, 0.0],
        [0.5, 0.5, 0.0],
        [-0.5, 0.5, 0.0],
    ];
    let colors = [
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [1.0, 1.0, 1.0],
    ];

    let vertices = (0..4)
        .map(|i| Vertex {
            position: corners[i],
            color: colors[i],
            tex_coord: FACE_UVS[i],
        })
        .collect();

    (vertices, vec![0, 1, 2, 2, 3, 0])
}

fn cube() -> (Vec<Vertex>, Vec<u32>) {
    const H: f32 = 0.5;

    // Corners per face, counter-clockwise when seen from outside the cube
    let faces: [([[f32; 3]; 4], [f32; 3]); 6] = [
        ([[-H, -H, H], [H, -H, H], [H, H, H], [-H, H, H]], [1.0, 1.0, 1.0]),
        ([[H, -H, -H], [-H, -H, -H], [-H, H, -H], [H, H, -H]], [0.9, 0.9, 0.3]),
        ([[H, -H, H], [H, -H, -H], [H, H, -H], [H, H, H]], [1.0, 0.4, 0.4]),
        ([[-H, -H, -H], [-H, -H, H], [-H, H, H], [-H, H, -H]], [0.4, 1.0, 0.4]),
        ([[-H, H, H], [H, H, H], [H, H, -H], [-H, H, -H]], [0.4, 0.4, 1.0]),
        ([[-H, -H, -H], [H, -H, -H], [H, -H, H], [-H, -H, H]], [0.4, 1.0, 1.0]),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (corners, color) in faces {
        let base = vertices.len() as u32;
        for (corner, uv) in corners.into_iter().zip(FACE_UVS) {
            vertices.push(Vertex {
                position: corner,
                color,
                tex_coord: uv,
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }

    (vertices, indices)
}
