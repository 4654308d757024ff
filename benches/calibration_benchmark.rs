// Cost of calibrating the global scale for each prior family, and of the
// horseshoe scale CDF on its own, across grid sizes.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use mrfsmooth::calibrate::{ZetaCalibrator, scale_cdf};
use mrfsmooth::difference::DifferenceOrder;
use mrfsmooth::likelihood::CellStatistics;
use mrfsmooth::model::PriorFamily;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const GRID_SIZES: [usize; 3] = [10, 50, 200];

fn synthetic_cells(cells: usize, seed: u64) -> Vec<CellStatistics> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..cells)
        .map(|_| CellStatistics::Count {
            events: rng.gen_range(0..40),
            exposure: rng.gen_range(0.5..5.0),
        })
        .collect()
}

fn bench_calibration(c: &mut Criterion) {
    let mut group = c.benchmark_group("zeta_calibration");
    let calibrator = ZetaCalibrator::default();
    for &cells in &GRID_SIZES {
        let statistics = synthetic_cells(cells, cells as u64);
        for prior in PriorFamily::ALL {
            group.bench_with_input(
                BenchmarkId::new(prior.tag(), cells),
                &statistics,
                |b, statistics| {
                    b.iter(|| {
                        calibrator
                            .calibrate(black_box(statistics), DifferenceOrder::First, prior)
                            .map(|calibration| calibration.zeta)
                    })
                },
            );
        }
    }
    group.finish();
}

fn bench_horseshoe_cdf(c: &mut Criterion) {
    c.bench_function("horseshoe_scale_cdf", |b| {
        b.iter(|| scale_cdf(PriorFamily::Horseshoe, black_box(0.37)))
    });
}

criterion_group!(benches, bench_calibration, bench_horseshoe_cdf);
criterion_main!(benches);
