use criterion::{black_box, criterion_group, criterion_main, Criterion};
use galaxy_df::{
    AnalyticPotential, Batch, Cubature, DistributionFunction, DoublePowerLaw, FnField,
    GalaxyModel, Potential, Region, Tolerances, UserFunction,
};

fn gaussian_field() -> impl Fn(&Batch, &mut Batch) + Send + Sync {
    |p: &Batch, v: &mut Batch| {
        for (i, out) in v.column_mut(0).iter_mut().enumerate() {
            let r2: f64 = (0..p.cols()).map(|j| p.get(i, j).powi(2)).sum();
            *out = (-r2).exp();
        }
    }
}

fn bench_gaussian_4d_parallel(c: &mut Criterion) {
    let f = FnField::new(4, gaussian_field());
    let region = Region::new(&[-4.0; 4], &[4.0; 4]).unwrap();

    c.bench_function("gaussian_4d_parallel", |b| {
        b.iter(|| {
            let mut cubature = Cubature::new(Tolerances::relative(1e-8));
            cubature.integrate(&f, black_box(&region)).unwrap()
        })
    });
}

fn bench_gaussian_4d_serial(c: &mut Criterion) {
    let f = UserFunction::new(4, |p: &Batch| {
        (0..p.rows())
            .map(|i| (-(0..4).map(|j| p.get(i, j).powi(2)).sum::<f64>()).exp())
            .collect()
    });
    let region = Region::new(&[-4.0; 4], &[4.0; 4]).unwrap();

    c.bench_function("gaussian_4d_serial", |b| {
        b.iter(|| {
            let mut cubature = Cubature::new(Tolerances::relative(1e-8));
            cubature.integrate(&f, black_box(&region)).unwrap()
        })
    });
}

fn bench_df_total_mass(c: &mut Criterion) {
    let df: DistributionFunction = DoublePowerLaw::new(1.0, 1.0, 6.0, 1.0).unwrap().into();

    c.bench_function("df_total_mass", |b| b.iter(|| black_box(&df).total_mass(1e-8).unwrap()));
}

fn bench_moments_isochrone(c: &mut Criterion) {
    let potential: Potential = AnalyticPotential::isochrone(1.0, 1.0).unwrap().into();
    let df: DistributionFunction = DoublePowerLaw::new(1.0, 0.0, 5.0, 1.0).unwrap().into();
    let model = GalaxyModel::new(&potential, &df);

    let mut group = c.benchmark_group("moments");
    group.sample_size(10);
    group.bench_function("isochrone_r1", |b| {
        b.iter(|| model.moments(black_box([0.0, 0.0, 1.0]), 1e-4).unwrap())
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_gaussian_4d_parallel,
    bench_gaussian_4d_serial,
    bench_df_total_mass,
    bench_moments_isochrone
);
criterion_main!(benches);
