//! Force-directed kernel — one tick over the node set.
//!
//! Forces accumulate into per-node vectors and integrate afterwards, so
//! pair visitation order cannot affect the result beyond floating-point
//! rounding. Two implementations share the same math: `step_scalar` is the
//! reference, `step_parallel` fans the force rows out over rayon and must
//! agree with the reference within `AGREEMENT_EPSILON` (the integration
//! pass is identical; only summation order differs).
//!
//! Numeric policy: any non-finite intermediate is scrubbed to zero before
//! it can reach the next tick. The kernel never emits NaN.

use rayon::prelude::*;
use starling_proto::Vec3;

use crate::node::Node;
use crate::params::PhysicsParams;

/// Natural spring length, metres.
const REST_LENGTH: f32 = 1.0;

/// Wire cap multiplier — positions clamp to ±(bounds_size · 1000).
const BOUNDS_SCALE: f32 = 1000.0;

/// Maximum per-axis divergence allowed between the scalar and parallel
/// paths after one tick.
pub const AGREEMENT_EPSILON: f32 = 1e-4;

/// Advance one tick with the scalar reference path.
pub fn step_scalar(nodes: &mut [Node], params: &PhysicsParams) {
    let frozen: &[Node] = nodes;
    let forces: Vec<Vec3> = (0..frozen.len())
        .map(|i| force_on(i, frozen, params))
        .collect();
    integrate(nodes, &forces, params);
}

/// Advance one tick computing force rows in parallel. Reads a frozen view
/// of the node set, then integrates sequentially — the swap to new state
/// is atomic at the tick boundary as far as callers can observe.
pub fn step_parallel(nodes: &mut [Node], params: &PhysicsParams) {
    let frozen: &[Node] = nodes;
    let forces: Vec<Vec3> = (0..frozen.len())
        .into_par_iter()
        .map(|i| force_on(i, frozen, params))
        .collect();
    integrate(nodes, &forces, params);
}

/// Total force on node `i`: pairwise repulsion, spring toward connected
/// partners, and centre pull for connected nodes.
fn force_on(i: usize, nodes: &[Node], params: &PhysicsParams) -> Vec3 {
    let node = &nodes[i];
    if !node.is_active() {
        return Vec3::ZERO;
    }

    let mut fx = 0.0f32;
    let mut fy = 0.0f32;
    let mut fz = 0.0f32;

    for (j, other) in nodes.iter().enumerate() {
        if j == i || !other.is_active() {
            continue;
        }

        let dx = node.position.x - other.position.x;
        let dy = node.position.y - other.position.y;
        let dz = node.position.z - other.position.z;
        let len = (dx * dx + dy * dy + dz * dz).sqrt();
        if len < 1e-6 {
            // Coincident nodes — no defined direction, skip the pair.
            continue;
        }

        let r = len.max(params.collision_radius);
        let (ux, uy, uz) = (dx / len, dy / len, dz / len);

        // Repulsion, quadratic falloff saturating at the collision radius.
        let repel = params.repulsion * node.mass as f32 * other.mass as f32 / (r * r);
        fx += ux * repel;
        fy += uy * repel;
        fz += uz * repel;

        // Spring restoration toward the partner for connected pairs.
        if node.is_connected() && other.is_connected() {
            let pull = params.spring * (r - REST_LENGTH);
            fx -= ux * pull;
            fy -= uy * pull;
            fz -= uz * pull;
        }
    }

    if node.is_connected() {
        fx -= params.attraction * node.position.x;
        fy -= params.attraction * node.position.y;
        fz -= params.attraction * node.position.z;
    }

    Vec3 { x: fx, y: fy, z: fz }
}

/// Apply accumulated forces: damped velocity update with a hard clamp,
/// then position update clamped to the wire cap.
fn integrate(nodes: &mut [Node], forces: &[Vec3], params: &PhysicsParams) {
    let bound = params.bounds_size * BOUNDS_SCALE;
    for (node, force) in nodes.iter_mut().zip(forces) {
        if !node.is_active() {
            continue;
        }

        node.velocity = Vec3 {
            x: axis((node.velocity.x + force.x) * params.damping, params.max_velocity),
            y: axis((node.velocity.y + force.y) * params.damping, params.max_velocity),
            z: axis((node.velocity.z + force.z) * params.damping, params.max_velocity),
        };
        node.position = Vec3 {
            x: axis(node.position.x + node.velocity.x, bound),
            y: axis(node.position.y + node.velocity.y, bound),
            z: axis(node.position.z + node.velocity.z, bound),
        };
    }
}

/// Clamp to ±limit, scrubbing non-finite values to zero.
fn axis(value: f32, limit: f32) -> f32 {
    if !value.is_finite() {
        0.0
    } else {
        value.clamp(-limit, limit)
    }
}
