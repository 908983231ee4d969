use chrono::NaiveDate;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use latshift::analyze_groups;
use latshift::circular::CircularPoint;
use latshift::config::PipelineConfig;
use latshift::fit::fit_group;
use latshift::types::{Observation, SpeciesGroup};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

fn random_group(index: usize, size: usize) -> SpeciesGroup {
    let mut rng = StdRng::seed_from_u64(0x1A7 + (index * 7919 + size) as u64);
    let date = NaiveDate::from_ymd_opt(2015, 6, 1).unwrap_or_default();
    let observations = (0..size)
        .map(|_| {
            let longitude = 20.0 + 3.0 * rng.sample::<f64, _>(StandardNormal);
            let p = CircularPoint::from_degrees(longitude);
            let day = rng.gen_range(13.0..19.0);
            Observation {
                species: format!("species {index}"),
                event_date: date,
                latitude: 45.0 + 0.3 * day + rng.sample::<f64, _>(StandardNormal),
                longitude,
                day,
                sin: p.sin,
                cos: p.cos,
                fake: rng.sample(StandardNormal),
            }
        })
        .collect();
    SpeciesGroup {
        species: format!("species {index}"),
        observations,
    }
}

fn benchmark_group_fit(c: &mut Criterion) {
    let config = PipelineConfig::default();

    let mut group = c.benchmark_group("fit_group");
    for size in [20_usize, 200, 2_000, 20_000] {
        let species = random_group(0, size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &species, |b, input| {
            b.iter(|| black_box(fit_group(black_box(input), &config).is_ok()));
        });
    }
    group.finish();

    let mut group = c.benchmark_group("analyze_groups");
    group.sample_size(10);
    for count in [100_usize, 1_000] {
        let groups: Vec<SpeciesGroup> = (0..count).map(|i| random_group(i, 80)).collect();
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &groups, |b, input| {
            b.iter(|| black_box(analyze_groups(input.clone(), &config).is_ok()));
        });
    }
    group.finish();
}

criterion_group!(group_fit, benchmark_group_fit);
criterion_main!(group_fit);
