use anyhow::{ensure, Result};

/// Particle spacing as a fraction of the diameter.
pub const PARTICLE_STRIDE: f32 = 0.75;
/// Weight above which a particle starts building pressure.
pub const MIN_PARTICLE_WEIGHT: f32 = 1.0;
/// Upper bound of pressure, in units of the critical pressure.
pub const MAX_PARTICLE_PRESSURE: f32 = 0.25;
/// Upper bound of the surface-tension velocity change, in units of the critical velocity.
pub const MAX_PARTICLE_FORCE: f32 = 0.5;
/// Longest triad edge, in diameters.
pub const MAX_TRIAD_DISTANCE: f32 = 2.0;
/// How far ahead barrier crossings are predicted, in time steps.
pub const BARRIER_COLLISION_TIME: f32 = 2.5;
/// Gap left between a particle and a fixture it collided with.
pub const LINEAR_SLOP: f32 = 0.005;

const MAX_RECOMMENDED_ITERATIONS: u32 = 8;
const RADIUS_THRESHOLD: f32 = 0.01;

/// System-wide particle configuration.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ParticleSystemDef {
    pub radius: f32,
    /// Mass per unit area of a particle.
    pub density: f32,
    pub gravity_scale: f32,
    /// Maximum live particles; 0 means unbounded.
    pub max_count: usize,
    /// Expire particles with a lifetime, and evict the oldest when full.
    pub destroy_by_age: bool,

    pub pressure_strength: f32,
    /// Damping of approaching particles along contact normals.
    pub damping_strength: f32,
    /// Global velocity damping applied at integration.
    pub linear_damping: f32,
    pub elastic_strength: f32,
    pub spring_strength: f32,
    pub viscous_strength: f32,
    pub surface_tension_pressure_strength: f32,
    pub surface_tension_normal_strength: f32,
    pub repulsive_strength: f32,
    pub powder_strength: f32,
    /// Pushes solid groups out of each other.
    pub ejection_strength: f32,
    pub static_pressure_strength: f32,
    pub static_pressure_relaxation: f32,
    pub static_pressure_iterations: u32,
    pub color_mixing_strength: f32,
    /// Pull toward the best-fit rigid pose, in `[0, 1]`.
    pub rigid_stiffness: f32,

    /// Sub-iterations per step. `None` derives a count from gravity and radius.
    pub iterations: Option<u32>,
}

impl Default for ParticleSystemDef {
    fn default() -> Self {
        Self {
            radius: 1.0,
            density: 1.0,
            gravity_scale: 1.0,
            max_count: 0,
            destroy_by_age: true,
            pressure_strength: 0.05,
            damping_strength: 1.0,
            linear_damping: 0.0,
            elastic_strength: 0.25,
            spring_strength: 0.25,
            viscous_strength: 0.25,
            surface_tension_pressure_strength: 0.2,
            surface_tension_normal_strength: 0.2,
            repulsive_strength: 1.0,
            powder_strength: 0.5,
            ejection_strength: 0.5,
            static_pressure_strength: 0.2,
            static_pressure_relaxation: 0.2,
            static_pressure_iterations: 8,
            color_mixing_strength: 0.5,
            rigid_stiffness: 1.0,
            iterations: None,
        }
    }
}

impl ParticleSystemDef {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.radius.is_finite() && self.radius > 0.0,
            "particle radius must be positive, got {}",
            self.radius
        );
        ensure!(
            self.density.is_finite() && self.density > 0.0,
            "particle density must be positive, got {}",
            self.density
        );
        for (name, value) in [
            ("pressure_strength", self.pressure_strength),
            ("damping_strength", self.damping_strength),
            ("linear_damping", self.linear_damping),
            ("elastic_strength", self.elastic_strength),
            ("spring_strength", self.spring_strength),
            ("viscous_strength", self.viscous_strength),
            ("surface_tension_pressure_strength", self.surface_tension_pressure_strength),
            ("surface_tension_normal_strength", self.surface_tension_normal_strength),
            ("repulsive_strength", self.repulsive_strength),
            ("powder_strength", self.powder_strength),
            ("ejection_strength", self.ejection_strength),
            ("static_pressure_strength", self.static_pressure_strength),
            ("static_pressure_relaxation", self.static_pressure_relaxation),
            ("color_mixing_strength", self.color_mixing_strength),
        ] {
            ensure!(
                value.is_finite() && value >= 0.0,
                "{name} must be a non-negative number, got {value}"
            );
        }
        ensure!(
            (0.0..=1.0).contains(&self.rigid_stiffness),
            "rigid_stiffness must be in [0, 1], got {}",
            self.rigid_stiffness
        );
        ensure!(
            self.color_mixing_strength <= 2.0,
            "color_mixing_strength above 2 overshoots, got {}",
            self.color_mixing_strength
        );
        if let Some(iterations) = self.iterations {
            ensure!(iterations > 0, "iterations must be at least 1");
        }
        Ok(())
    }

    pub fn diameter(&self) -> f32 {
        2.0 * self.radius
    }

    /// Lattice spacing used when filling shapes.
    pub fn stride(&self) -> f32 {
        PARTICLE_STRIDE * self.diameter()
    }

    pub fn particle_mass(&self) -> f32 {
        let stride = self.stride();
        self.density * stride * stride
    }

    pub fn particle_inv_mass(&self) -> f32 {
        1.0 / self.particle_mass()
    }
}

/// Recommended particle sub-iterations for a gravity magnitude, particle
/// radius and time step. Grows with `sqrt(gravity / radius) * dt`, clamped to
/// `1..=8`.
pub fn calculate_particle_iterations(gravity: f32, radius: f32, time_step: f32) -> u32 {
    let raw = ((gravity / (RADIUS_THRESHOLD * radius)).sqrt() * time_step).ceil();
    if raw.is_nan() {
        return 1;
    }
    (raw as i64).clamp(1, MAX_RECOMMENDED_ITERATIONS as i64) as u32
}
