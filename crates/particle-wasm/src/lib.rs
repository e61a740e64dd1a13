use glam::Vec2;
use particle_core::math::Transform;
use particle_core::shapes::{Circle, Polygon, Shape};
use particle_core::world::SimpleWorld;
use particle_core::{
    GroupFlags, ParticleColor, ParticleFlags, ParticleGroupDef, ParticleSystem, ParticleSystemDef,
};
use wasm_bindgen::prelude::*;

/// GPU-compatible particle struct: 16 bytes, matches WGSL Particle
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct GpuParticle {
    position: [f32; 2], // 8 bytes
    radius: f32,        // 4 bytes
    color: u32,         // 4 bytes, RGBA8 little endian
}

#[wasm_bindgen]
pub struct ParticleWorld {
    system: ParticleSystem,
    world: SimpleWorld,
    gpu_buffer: Vec<GpuParticle>,
}

#[wasm_bindgen]
impl ParticleWorld {
    #[wasm_bindgen(constructor)]
    pub fn new(radius: f32, max_count: usize) -> Result<ParticleWorld, JsValue> {
        let def = ParticleSystemDef {
            radius,
            max_count,
            ..Default::default()
        };
        let system = ParticleSystem::new(def).map_err(|e| JsValue::from_str(&e.to_string()))?;
        web_sys::console::log_1(
            &format!("WASM ParticleWorld created: radius {}, capacity {}", radius, max_count).into(),
        );

        let mut world = ParticleWorld {
            system,
            world: SimpleWorld::new(Vec2::new(0.0, -10.0)),
            gpu_buffer: Vec::new(),
        };
        world.write_gpu_output();
        Ok(world)
    }

    /// Advance by `dt` seconds; returns the wall time spent in milliseconds.
    #[wasm_bindgen]
    pub fn step(&mut self, dt: f32) -> f32 {
        let start = js_sys::Date::now();
        self.system.step(&mut self.world, dt);
        self.write_gpu_output();
        let elapsed = js_sys::Date::now() - start;
        elapsed as f32
    }

    #[wasm_bindgen]
    pub fn get_gpu_buffer_ptr(&self) -> *const f32 {
        self.gpu_buffer.as_ptr() as *const f32
    }

    #[wasm_bindgen]
    pub fn get_gpu_buffer_byte_length(&self) -> usize {
        bytemuck::cast_slice::<GpuParticle, u8>(&self.gpu_buffer).len()
    }

    #[wasm_bindgen]
    pub fn particle_count(&self) -> usize {
        self.system.count()
    }

    #[wasm_bindgen]
    pub fn group_count(&self) -> usize {
        self.system.group_count()
    }

    #[wasm_bindgen]
    pub fn set_gravity(&mut self, x: f32, y: f32) {
        self.world.gravity = Vec2::new(x, y);
    }

    #[wasm_bindgen]
    pub fn set_paused(&mut self, paused: bool) {
        self.system.set_paused(paused);
    }

    #[wasm_bindgen]
    pub fn set_damping(&mut self, damping: f32) {
        self.system.set_damping(damping);
    }

    /// Static box obstacle centered at (`x`, `y`).
    #[wasm_bindgen]
    pub fn add_static_box(&mut self, hx: f32, hy: f32, x: f32, y: f32, angle: f32) {
        let polygon = Polygon::new_oriented_box(hx, hy, Vec2::new(x, y), angle);
        self.world.add_static(Shape::Polygon(polygon));
    }

    /// Fill a box with particles. `flags` and `group_flags` are the raw bit
    /// values of `ParticleFlags` and `GroupFlags`; `color` is RGBA8.
    #[wasm_bindgen]
    #[allow(clippy::too_many_arguments)]
    pub fn create_box_group(
        &mut self,
        hx: f32,
        hy: f32,
        x: f32,
        y: f32,
        angle: f32,
        flags: u32,
        group_flags: u32,
        color: u32,
    ) -> usize {
        let shape = Shape::Polygon(Polygon::new_box(hx, hy));
        self.create_group(shape, Vec2::new(x, y), angle, flags, group_flags, color)
    }

    #[wasm_bindgen]
    pub fn create_circle_group(
        &mut self,
        radius: f32,
        x: f32,
        y: f32,
        flags: u32,
        group_flags: u32,
        color: u32,
    ) -> usize {
        let shape = Shape::Circle(Circle::new(Vec2::ZERO, radius));
        self.create_group(shape, Vec2::new(x, y), 0.0, flags, group_flags, color)
    }

    /// Destroy particles within `radius` of (`x`, `y`); returns how many.
    #[wasm_bindgen]
    pub fn destroy_in_circle(&mut self, x: f32, y: f32, radius: f32) -> usize {
        let shape = Shape::Circle(Circle::new(Vec2::ZERO, radius));
        self.system
            .destroy_particles_in_shape(&shape, &Transform::new(Vec2::new(x, y), 0.0), false)
    }
}

impl ParticleWorld {
    fn create_group(
        &mut self,
        shape: Shape,
        position: Vec2,
        angle: f32,
        flags: u32,
        group_flags: u32,
        color: u32,
    ) -> usize {
        let [r, g, b, a] = color.to_le_bytes();
        let shapes = [shape];
        let def = ParticleGroupDef {
            flags: ParticleFlags::from_bits_truncate(flags),
            group_flags: GroupFlags::from_bits_truncate(group_flags),
            position,
            angle,
            color: ParticleColor::new(r, g, b, a),
            shapes: &shapes,
            ..Default::default()
        };
        let id = self.system.create_particle_group(&def);
        self.write_gpu_output();
        self.system.group(id).map_or(0, |g| g.count())
    }

    fn write_gpu_output(&mut self) {
        let radius = self.system.radius();
        let colors = self.system.colors();
        self.gpu_buffer.clear();
        self.gpu_buffer
            .extend(self.system.positions().iter().enumerate().map(|(i, p)| {
                let color = colors.map_or(ParticleColor::ZERO, |c| c[i]);
                GpuParticle {
                    position: [p.x, p.y],
                    radius,
                    color: u32::from_le_bytes([color.r, color.g, color.b, color.a]),
                }
            }));
    }
}
