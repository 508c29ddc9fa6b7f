//! User-supplied density and DF profiles.
//!
//! Builds a multipole potential from a Plummer density given as an external
//! callback, compares it with the closed form, computes the mass of a
//! double-power-law DF both as a built-in model and as a user function, and
//! evaluates velocity moments of the DF in the multipole potential.
//!
//! Run with:
//!   cargo run --release --example user_profiles

use std::f64::consts::PI;

use galaxy_df::{
    Batch, DfConfig, DistributionFunction, GalaxyModel, Potential, PotentialConfig, UserFunction,
};

fn main() -> Result<(), galaxy_df::GalaxyError> {
    let (mass, scale_radius) = (3.0, 1.5);
    let plummer_density = move |r: f64| {
        3.0 * mass / (4.0 * PI * scale_radius * scale_radius * scale_radius)
            * (1.0 + (r / scale_radius).powi(2)).powf(-2.5)
    };

    let density = UserFunction::new(3, move |p: &Batch| {
        (0..p.rows())
            .map(|i| {
                let [x, y, z] = p.row::<3>(i);
                plummer_density((x * x + y * y + z * z).sqrt())
            })
            .collect()
    });
    let config = PotentialConfig::from_json(r#"{"type": "Multipole", "lmax": 0}"#)?;
    let potential = Potential::from_config(&config, Some(&density))?;

    println!("Plummer density (M = {mass}, a = {scale_radius}) -> multipole potential");
    println!(
        "  phi(0)     = {:.12}   (exact: {:.12})",
        potential.value([0.0; 3]),
        -mass / scale_radius
    );
    println!(
        "  rho(1,0,0) = {:.12}   (exact: {:.12})",
        potential.density([1.0, 0.0, 0.0]),
        plummer_density(1.0)
    );
    println!("  mass       = {:.12}", potential.total_mass());
    println!();

    let analytic = DistributionFunction::from_config(
        &DfConfig::double_power_law(2.0, 0.0, 5.0, 2.0 * PI.powi(3)),
        None,
    )?;
    let callback = UserFunction::new(3, |j: &Batch| {
        (0..j.rows())
            .map(|i| (j.get(i, 0) + j.get(i, 1) + j.get(i, 2).abs() + 2.0).powi(-5))
            .collect()
    });
    let user = DistributionFunction::from_config(&DfConfig::new("User"), Some(callback))?;

    let analytic_mass = analytic.total_mass(1e-8)?;
    let user_mass = user.total_mass(1e-8)?;
    println!("Double-power-law DF (J0 = 2, slopeIn = 0, slopeOut = 5)");
    println!(
        "  analytic mass = {:.12}   ({} evaluations)",
        analytic_mass.scalar(),
        analytic_mass.evaluations
    );
    println!(
        "  user mass     = {:.12}   ({} evaluations)",
        user_mass.scalar(),
        user_mass.evaluations
    );
    println!("  exact         = {:.12}", PI.powi(3) / 6.0);
    println!();

    let model = GalaxyModel::new(&potential, &user);
    println!("Moments of the user DF in the multipole potential");
    println!("  {:>6} {:>14} {:>10} {:>10}", "r", "density", "<v_r^2>", "<v_t^2>");
    for r in [0.0, 0.5, 1.0, 2.0, 5.0] {
        let moments = model.moments([r, 0.0, 0.0], 1e-5)?;
        println!(
            "  {:>6.2} {:>14.6e} {:>10.6} {:>10.6}",
            r, moments.density, moments.dispersion.radial, moments.dispersion.tangential
        );
    }
    Ok(())
}
