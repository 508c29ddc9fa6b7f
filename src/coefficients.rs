//! Embedded Cubature Rule Coefficients
//!
//! Nodes and weights for the two embedded rule pairs used by the adaptive
//! integrator:
//!
//! - Gauss-Kronrod 7(15) for one-dimensional regions, from
//!   Piessens, R. et al. (1983). "QUADPACK: A Subroutine Package for
//!   Automatic Integration". Springer, routine QK15.
//! - Genz-Malik 7(5) for regions of dimension 2 and higher, from
//!   Genz, A.C. & Malik, A.A. (1980). "An adaptive algorithm for numerical
//!   integration over an N-dimensional rectangular region".
//!   J. Comput. Appl. Math. 6, 295-302.
//!
//! In both pairs the difference between the higher- and lower-order
//! estimate serves as the local error estimate of a region.

/// Number of points of the Gauss-Kronrod rule
pub const GK_POINTS: usize = 15;

/// Kronrod abscissae on [-1, 1], positive half, outermost first.
/// `XGK[1]`, `XGK[3]`, `XGK[5]` and `XGK[7]` are the 7-point Gauss nodes.
pub const XGK: [f64; 8] = [
    0.991_455_371_120_812_639_206_854_697_526_329,
    0.949_107_912_342_758_524_526_189_684_047_851,
    0.864_864_423_359_769_072_789_712_788_640_926,
    0.741_531_185_599_394_439_863_864_773_280_788,
    0.586_087_235_467_691_130_294_144_845_693_013,
    0.405_845_151_377_397_166_906_606_412_076_961,
    0.207_784_955_007_898_467_600_689_403_773_245,
    0.0,
];

/// Weights of the 15-point Kronrod rule, matching `XGK`.
pub const WGK: [f64; 8] = [
    0.022_935_322_010_529_224_963_732_008_058_970,
    0.063_092_092_629_978_553_290_700_663_189_204,
    0.104_790_010_322_250_183_839_876_322_541_518,
    0.140_653_259_715_525_918_745_189_590_510_238,
    0.169_004_726_639_267_902_826_583_426_598_550,
    0.190_350_578_064_785_409_913_256_402_421_014,
    0.204_432_940_075_298_892_414_161_999_234_649,
    0.209_482_141_084_727_828_012_999_174_891_714,
];

/// Weights of the embedded 7-point Gauss rule at `XGK[1]`, `XGK[3]`,
/// `XGK[5]` and the centre.
pub const WG: [f64; 4] = [
    0.129_484_966_168_869_693_270_611_432_679_082,
    0.279_705_391_489_276_667_901_467_771_423_780,
    0.381_830_050_505_118_944_950_369_775_488_975,
    0.417_959_183_673_469_387_755_102_040_816_327,
];

/// Genz-Malik generator λ2 = sqrt(9/70)
pub const GM_LAMBDA2: f64 = 0.358_568_582_800_318_091_990_645_153_907_937_495_454_1;

/// Genz-Malik generator λ4 = sqrt(9/10), also used for λ3
pub const GM_LAMBDA4: f64 = 0.948_683_298_050_513_799_599_668_063_329_815_560_116_0;

/// Genz-Malik generator λ5 = sqrt(9/19)
pub const GM_LAMBDA5: f64 = 0.688_247_201_611_685_297_721_628_734_293_623_525_126_9;

/// Ratio λ2²/λ4² used in the fourth-difference split criterion
pub const GM_RATIO: f64 = (GM_LAMBDA2 * GM_LAMBDA2) / (GM_LAMBDA4 * GM_LAMBDA4);

/// Weight of the ±λ2 axis points (degree 7)
pub const GM_WEIGHT2: f64 = 980.0 / 6561.0;

/// Weight of the (±λ4, ±λ4) pair points (degree 7)
pub const GM_WEIGHT4: f64 = 200.0 / 19683.0;

/// Weight of the ±λ2 axis points (degree 5)
pub const GM_WEIGHT_E2: f64 = 245.0 / 486.0;

/// Weight of the (±λ4, ±λ4) pair points (degree 5)
pub const GM_WEIGHT_E4: f64 = 25.0 / 729.0;

/// Dimension-dependent Genz-Malik weights.
#[derive(Debug, Clone, Copy)]
pub struct GenzMalikWeights {
    /// Centre weight (degree 7)
    pub w1: f64,
    /// ±λ4 axis weight (degree 7)
    pub w3: f64,
    /// Corner weight (degree 7)
    pub w5: f64,
    /// Centre weight (degree 5)
    pub e1: f64,
    /// ±λ4 axis weight (degree 5)
    pub e3: f64,
}

impl GenzMalikWeights {
    /// Weights for an n-dimensional region.
    pub fn for_dimension(n: usize) -> Self {
        let d = n as f64;
        Self {
            w1: (12824.0 - 9120.0 * d + 400.0 * d * d) / 19683.0,
            w3: (1820.0 - 400.0 * d) / 19683.0,
            w5: 6859.0 / 19683.0 / 2f64.powi(n as i32),
            e1: (729.0 - 950.0 * d + 50.0 * d * d) / 729.0,
            e3: (265.0 - 100.0 * d) / 1458.0,
        }
    }
}

/// Number of Genz-Malik points in n dimensions: 1 + 4n + 2n(n-1) + 2^n.
pub fn genz_malik_points(n: usize) -> usize {
    1 + 4 * n + 2 * n * (n - 1) + (1usize << n)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-14;

    #[test]
    fn test_kronrod_weights_sum_to_two() {
        let sum: f64 = 2.0 * WGK[..7].iter().sum::<f64>() + WGK[7];
        assert!((sum - 2.0).abs() < TOL, "Kronrod weights sum to {}", sum);
    }

    #[test]
    fn test_gauss_weights_sum_to_two() {
        let sum: f64 = 2.0 * WG[..3].iter().sum::<f64>() + WG[3];
        assert!((sum - 2.0).abs() < TOL, "Gauss weights sum to {}", sum);
    }

    #[test]
    fn test_genz_malik_weights_sum_to_one() {
        for n in 2..=6 {
            let w = GenzMalikWeights::for_dimension(n);
            let nf = n as f64;
            let axis = 2.0 * nf;
            let pairs = 2.0 * nf * (nf - 1.0);
            let corners = 2f64.powi(n as i32);

            let seventh = w.w1 + axis * GM_WEIGHT2 + axis * w.w3 + pairs * GM_WEIGHT4 + corners * w.w5;
            let fifth = w.e1 + axis * GM_WEIGHT_E2 + axis * w.e3 + pairs * GM_WEIGHT_E4;
            assert!((seventh - 1.0).abs() < 1e-13, "n={}: degree-7 sum {}", n, seventh);
            assert!((fifth - 1.0).abs() < 1e-13, "n={}: degree-5 sum {}", n, fifth);
        }
    }

    #[test]
    fn test_generators() {
        assert!((GM_LAMBDA2 * GM_LAMBDA2 - 9.0 / 70.0).abs() < TOL);
        assert!((GM_LAMBDA4 * GM_LAMBDA4 - 9.0 / 10.0).abs() < TOL);
        assert!((GM_LAMBDA5 * GM_LAMBDA5 - 9.0 / 19.0).abs() < TOL);
        assert!((GM_RATIO - 1.0 / 7.0).abs() < TOL);
    }

    #[test]
    fn test_point_counts() {
        assert_eq!(genz_malik_points(2), 17);
        assert_eq!(genz_malik_points(3), 33);
        assert_eq!(genz_malik_points(6), 149);
    }
}
