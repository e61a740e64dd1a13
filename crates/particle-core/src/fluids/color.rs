use crate::config::ParticleSystemDef;
use crate::contact::ParticleContact;
use crate::particle::{ParticleBuffers, ParticleFlags};
use crate::solver::Scratch;

/// Blend colors of touching color-mixing particles.
///
/// Integer arithmetic: for strength `s = 128 * color_mixing_strength` each
/// contact moves `a` by `s_ab * (c_b - c_a) / 256` and `b` by the negation,
/// where `s_ab = s / max(n_a, n_b)` and `n` counts mixing contacts. Deltas
/// are summed from the pre-pass colors and round toward zero, so every
/// particle lands between its own color and its neighbors' and the channel
/// sum is conserved exactly.
pub(crate) fn solve_color_mixing(
    buffers: &mut ParticleBuffers,
    contacts: &[ParticleContact],
    def: &ParticleSystemDef,
    scratch: &mut Scratch,
) {
    let strength = (128.0 * def.color_mixing_strength) as i32;
    if strength == 0 {
        return;
    }
    let ParticleBuffers { flags, color, .. } = buffers;
    let Some(color) = color.as_mut() else {
        return;
    };
    let mixing = |c: &&ParticleContact| {
        flags[c.a].contains(ParticleFlags::COLOR_MIXING)
            && flags[c.b].contains(ParticleFlags::COLOR_MIXING)
    };

    let count = &mut scratch.contact_count[..color.len()];
    count.fill(0);
    for c in contacts.iter().filter(mixing) {
        count[c.a] += 1;
        count[c.b] += 1;
    }

    let delta = &mut scratch.color_delta[..color.len()];
    delta.fill([0; 4]);
    for c in contacts.iter().filter(mixing) {
        let share = strength / count[c.a].max(count[c.b]) as i32;
        let d = color[c.a].mix_delta(&color[c.b], share);
        for k in 0..4 {
            delta[c.a][k] += d[k];
            delta[c.b][k] -= d[k];
        }
    }

    for (c, d) in color.iter_mut().zip(delta.iter()) {
        if *d != [0; 4] {
            *c = c.add_delta(*d);
        }
    }
}
