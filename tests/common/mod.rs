//! Seed-reproducible body-distribution generators, used only by the
//! end-to-end scenario tests in §8. Not part of the library surface —
//! dataset generation is explicitly out of scope for the crate itself.

use distfmm::{Bodies, Body};
use distfmm::geometry::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub fn cube(n: usize, seed: u64) -> Bodies<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let x = Vec3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            );
            Body::new(x, 1.0 / n as f64, i)
        })
        .collect()
}

pub fn sphere(n: usize, seed: u64) -> Bodies<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let mut p;
            loop {
                p = Vec3::new(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                );
                if p.norm_sq() <= 1.0 {
                    break;
                }
            }
            Body::new(p, 1.0 / n as f64, i)
        })
        .collect()
}

/// Plummer model: classic stellar-dynamics test distribution, sampled by
/// inverse-CDF radius draw then uniform direction, matching the shape used
/// by `include/dataset.h`'s `plummer` generator.
pub fn plummer(n: usize, seed: u64) -> Bodies<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let u: f64 = rng.gen_range(1e-6..1.0 - 1e-6);
            let radius = (u.powf(-2.0 / 3.0) - 1.0).sqrt().recip();
            let costheta: f64 = rng.gen_range(-1.0..1.0);
            let phi: f64 = rng.gen_range(0.0..std::f64::consts::TAU);
            let sintheta = (1.0 - costheta * costheta).sqrt();
            let x = Vec3::new(
                radius * sintheta * phi.cos(),
                radius * sintheta * phi.sin(),
                radius * costheta,
            );
            Body::new(x, 1.0 / n as f64, i)
        })
        .collect()
}

/// A perfect `k x k x k` grid, so `N == 8^k` for `k` chosen to land exactly
/// on an octree depth boundary (scenario 4: every leaf holds exactly one body).
pub fn lattice(side: usize) -> Bodies<f64> {
    let mut bodies = Vec::with_capacity(side * side * side);
    let mut i = 0;
    for ix in 0..side {
        for iy in 0..side {
            for iz in 0..side {
                let x = Vec3::new(ix as f64, iy as f64, iz as f64);
                bodies.push(Body::new(x, 1.0, i));
                i += 1;
            }
        }
    }
    bodies
}
