use bytemuck::{Pod, Zeroable};
use glam::Mat2;
use std::mem::size_of;
use vulkanalia::prelude::v1_3::*;

pub const VERTEX_BUFFER_BIND_ID: u32 = 0;
pub const INSTANCE_BUFFER_BIND_ID: u32 = 1;

// Physics constants (pixi.js bunnymark values, tuned for 60 fps)
pub const GRAVITY: f32 = 0.5;
pub const BOUNCE_DAMPING: f32 = 0.85;
pub const MAX_BOUNCE_KICK: f32 = 6.0;
const REFERENCE_FPS: f32 = 60.0;

// Indices for a single quad (shared by every batch)
pub const QUAD_INDICES: &[u16] = &[0, 1, 2, 2, 3, 0];
pub const VERTICES_PER_QUAD: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

pub const TEXTURE_REGIONS: [Rect; 5] = [
    Rect::new(2.0, 47.0, 26.0, 37.0),
    Rect::new(2.0, 86.0, 26.0, 37.0),
    Rect::new(2.0, 125.0, 26.0, 37.0),
    Rect::new(2.0, 164.0, 26.0, 37.0),
    Rect::new(2.0, 2.0, 26.0, 37.0),
];

// Index into `TEXTURE_REGIONS`. Always in range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TextureRegion(u8);

impl TextureRegion {
    pub const COUNT: usize = TEXTURE_REGIONS.len();

    pub fn new(index: usize) -> Self {
        Self((index % Self::COUNT) as u8)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn next(self) -> Self {
        Self::new(self.index() + 1)
    }

    pub fn rect(self) -> Rect {
        TEXTURE_REGIONS[self.index()]
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    // xy = position relative to the sprite centre, zw = texture coordinates
    pub position_tex_coord: [f32; 4],
}

impl Vertex {
    pub const fn new(pos: [f32; 2], tex_coord: [f32; 2]) -> Self {
        Self {
            position_tex_coord: [pos[0], pos[1], tex_coord[0], tex_coord[1]],
        }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(VERTEX_BUFFER_BIND_ID)
            .stride(size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SpriteInstance {
    // column-major 2x2 scale * rotation matrix
    pub scale_rotation: [f32; 4],
    pub position: [f32; 2],
}

impl SpriteInstance {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(INSTANCE_BUFFER_BIND_ID)
            .stride(size_of::<SpriteInstance>() as u32)
            .input_rate(vk::VertexInputRate::INSTANCE)
            .build()
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription::builder()
                .binding(VERTEX_BUFFER_BIND_ID)
                .location(0)
                .format(vk::Format::R32G32B32A32_SFLOAT)
                .offset(0)
                .build(),
            vk::VertexInputAttributeDescription::builder()
                .binding(INSTANCE_BUFFER_BIND_ID)
                .location(1)
                .format(vk::Format::R32G32B32A32_SFLOAT)
                .offset(0)
                .build(),
            vk::VertexInputAttributeDescription::builder()
                .binding(INSTANCE_BUFFER_BIND_ID)
                .location(2)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(size_of::<[f32; 4]>() as u32)
                .build(),
        ]
    }
}

pub fn scale_rotation_matrix(scale: f32, rotation: f32) -> [f32; 4] {
    let (sin, cos) = rotation.sin_cos();
    let rotation = Mat2::from_cols_array(&[cos, -sin, sin, cos]);
    (Mat2::from_diagonal(glam::Vec2::splat(scale)) * rotation).to_cols_array()
}

// Area the sprites bounce inside, in pixels. The origin is the top-left corner.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub max_x: f32,
    pub max_y: f32,
}

impl Bounds {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            max_x: width as f32,
            max_y: height as f32,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Sprite {
    pub x: f32,
    pub y: f32,
    pub speed_x: f32,
    pub speed_y: f32,
    pub scale: f32,
    pub rotation: f32,
    pub region: TextureRegion,
}

impl Sprite {
    pub fn spawn(region: TextureRegion, rng: &mut fastrand::Rng) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            speed_x: rng.f32() * 10.0,
            speed_y: rng.f32() * 10.0 - 5.0,
            scale: uniform(rng, 0.5, 1.0),
            rotation: rng.f32() - 0.5,
            region,
        }
    }

    pub fn instance(&self) -> SpriteInstance {
        SpriteInstance {
            scale_rotation: scale_rotation_matrix(self.scale, self.rotation),
            position: [self.x, self.y],
        }
    }

    pub fn step(&mut self, step: &PhysicsStep, rng: &mut fastrand::Rng) {
        self.x += self.speed_x * step.d;
        self.y += self.speed_y * step.d;
        self.speed_y += step.gravity_d;

        if self.x > step.bounds.max_x {
            self.speed_x = -self.speed_x;
            self.x = step.bounds.max_x;
        } else if self.x < 0.0 {
            self.speed_x = -self.speed_x;
            self.x = 0.0;
        }

        if self.y > step.bounds.max_y {
            self.speed_y *= -BOUNCE_DAMPING;
            self.y = step.bounds.max_y;
            if rng.bool() {
                self.speed_y -= rng.f32() * MAX_BOUNCE_KICK;
            }
        } else if self.y < 0.0 {
            self.speed_y = 0.0;
            self.y = 0.0;
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PhysicsStep {
    pub d: f32,
    pub gravity_d: f32,
    pub bounds: Bounds,
}

impl PhysicsStep {
    pub fn new(dt: f32, bounds: Bounds) -> Self {
        let d = REFERENCE_FPS * dt;
        Self {
            d,
            gravity_d: GRAVITY * d,
            bounds,
        }
    }
}

fn uniform(rng: &mut fastrand::Rng, min: f32, max: f32) -> f32 {
    min + rng.f32() * (max - min)
}

pub fn quad_vertices(rect: Rect, sheet_width: f32, sheet_height: f32) -> [Vertex; 4] {
    let half_w = rect.width * 0.5;
    let half_h = rect.height * 0.5;
    let u0 = rect.x / sheet_width;
    let u1 = (rect.x + rect.width) / sheet_width;
    let v0 = rect.y / sheet_height;
    let v1 = (rect.y + rect.height) / sheet_height;
    [
        Vertex::new([half_w, half_h], [u1, v1]),
        Vertex::new([-half_w, half_h], [u0, v1]),
        Vertex::new([-half_w, -half_h], [u0, v0]),
        Vertex::new([half_w, -half_h], [u1, v0]),
    ]
}

// One quad per texture region, back to back, in region order
pub fn sheet_vertices(sheet_width: u32, sheet_height: u32) -> Vec<Vertex> {
    TEXTURE_REGIONS
        .iter()
        .flat_map(|rect| quad_vertices(*rect, sheet_width as f32, sheet_height as f32))
        .collect()
}

// Maps pixel coordinates (origin top-left, Y down) onto Vulkan clip space.
pub fn projection(width: u32, height: u32) -> [[f32; 4]; 4] {
    glam::Mat4::orthographic_rh(0.0, width.max(1) as f32, 0.0, height.max(1) as f32, -1.0, 1.0)
        .to_cols_array_2d()
}
