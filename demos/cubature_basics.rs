//! Basic cubature usage: scalar and vector integrands, serial callbacks.
//!
//! Integrates a 3-D Gaussian with a native field, the same Gaussian as an
//! external callback, and the first moments of a 2-D density in one pass.
//!
//! Run with:
//!   cargo run --example cubature_basics

use galaxy_df::{integrate_ndim, Batch, Cubature, FnField, Region, Tolerances, UserFunction};

fn main() {
    // ∫ exp(-|x|²) d³x over [-6, 6]³ = π^(3/2)
    let exact = std::f64::consts::PI.powf(1.5);
    let region = Region::new(&[-6.0; 3], &[6.0; 3]).unwrap();

    let native = FnField::new(3, |p: &Batch, v: &mut Batch| {
        for (i, out) in v.column_mut(0).iter_mut().enumerate() {
            let [x, y, z] = p.row::<3>(i);
            *out = (-(x * x + y * y + z * z)).exp();
        }
    });
    let mut cubature = Cubature::new(Tolerances::relative(1e-10));
    let result = cubature.integrate(&native, &region).unwrap();

    println!("3-D Gaussian, native field");
    println!("  value:       {:.15}   (exact: {:.15})", result.scalar(), exact);
    println!("  error:       {:.2e}   (estimate: {:.2e})", (result.scalar() - exact).abs(), result.error_estimate());
    println!("  evaluations: {}", cubature.stats.evaluations);
    println!("  batches:     {}", cubature.stats.batches);
    println!("  regions:     {}", cubature.stats.regions);
    println!();

    let callback = UserFunction::new(3, |p: &Batch| {
        (0..p.rows())
            .map(|i| {
                let [x, y, z] = p.row::<3>(i);
                (-(x * x + y * y + z * z)).exp()
            })
            .collect()
    });
    let mut cubature = Cubature::new(Tolerances::relative(1e-10));
    let result = cubature.integrate(&callback, &region).unwrap();

    println!("3-D Gaussian, external callback (single-threaded)");
    println!("  value:       {:.15}", result.scalar());
    println!("  callback invocations: {}", cubature.stats.batches);
    println!("  points per invocation: {:.0}", cubature.stats.evaluations as f64 / cubature.stats.batches as f64);
    println!();

    // mass, <x> and <x²> of exp(-(x - 1)² - y²) in one vector-valued pass
    let moments = FnField::with_values(2, 3, |p: &Batch, v: &mut Batch| {
        for i in 0..p.rows() {
            let (x, y) = (p.get(i, 0), p.get(i, 1));
            let rho = (-(x - 1.0).powi(2) - y * y).exp();
            v.set(i, 0, rho);
            v.set(i, 1, rho * x);
            v.set(i, 2, rho * x * x);
        }
    });
    let result = integrate_ndim(&moments, &[-8.0, -8.0], &[8.0, 8.0], 1e-9).unwrap();
    let mass = result.value[0];
    let mean = result.value[1] / mass;
    let variance = result.value[2] / mass - mean * mean;

    println!("2-D shifted Gaussian moments");
    println!("  mass:     {:.12}   (exact: {:.12})", mass, std::f64::consts::PI);
    println!("  <x>:      {:.12}   (exact: 1)", mean);
    println!("  var(x):   {:.12}   (exact: 0.5)", variance);
    println!("  status:   {:?}", result.status);
}
