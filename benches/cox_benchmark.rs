use colon_survival::km::log_rank_test;
use colon_survival::pipeline::run_analysis;
use colon_survival::{
    clean, fit_model, test_proportional_hazards, CoxModel, Dataset, EventType, FitOptions, KaplanMeier,
    RawRecord, ReportConfig, SurvivalData, TieMethod, Treatment, MULTIVARIABLE_COVARIATES,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// whole-day times so tied event times are common, like the trial data
fn generate_synthetic_data(n_samples: usize, n_features: usize, n_strata: usize) -> SurvivalData {
    let mut rng = StdRng::seed_from_u64(42);

    let mut covariates_vec = Vec::with_capacity(n_samples * n_features);
    for _ in 0..(n_samples * n_features) {
        covariates_vec.push(if rng.gen_bool(0.4) { 1.0 } else { 0.0 });
    }
    let covariates = Array2::from_shape_vec((n_samples, n_features), covariates_vec).unwrap();
    let true_coefficients = Array1::from(vec![0.5, -0.3, 0.2]);

    let mut times = Vec::with_capacity(n_samples);
    let mut events = Vec::with_capacity(n_samples);
    for i in 0..n_samples {
        let n_coef = n_features.min(3);
        let linear_pred: f64 = covariates
            .row(i)
            .slice(ndarray::s![0..n_coef])
            .dot(&true_coefficients.slice(ndarray::s![0..n_coef]));
        let time = (-rng.r#gen::<f64>().ln() / (0.001 * linear_pred.exp())).ceil();
        let censoring_time = rng.gen_range(500.0..3000.0_f64).ceil();
        times.push(time.min(censoring_time));
        events.push(time < censoring_time);
    }
    let strata = (0..n_samples).map(|i| i % n_strata.max(1)).collect();

    SurvivalData::with_strata(times, events, covariates, strata).unwrap()
}

fn synthetic_trial(n: u32) -> Dataset {
    let mut rng = StdRng::seed_from_u64(7);
    let mut records = Vec::new();
    for id in 1..=n {
        let rx = Treatment::ALL[rng.gen_range(0..3)];
        let node4 = u8::from(rng.gen_bool(0.3));
        let rate = if node4 == 1 { 0.001 } else { 0.0004 };
        let event_time = -rng.gen_range(0.001..1.0_f64).ln() / rate;
        let censor = rng.gen_range(1500.0..3200.0);
        let death = RawRecord {
            id,
            study: 1,
            rx,
            sex: rng.gen_range(0..=1),
            age: rng.gen_range(25..86),
            obstruct: u8::from(rng.gen_bool(0.2)),
            perfor: u8::from(rng.gen_bool(0.08)),
            adhere: u8::from(rng.gen_bool(0.15)),
            nodes: Some(rng.gen_range(0..15)),
            status: u8::from(event_time <= censor),
            differ: Some(rng.gen_range(1..=3)),
            extent: rng.gen_range(1..=4),
            surg: rng.gen_range(0..=1),
            node4,
            time: event_time.min(censor).round().max(1.0),
            etype: EventType::Death,
        };
        records.push(RawRecord { etype: EventType::Recurrence, ..death.clone() });
        records.push(death);
    }
    Dataset::from_records("bench", records)
}

fn benchmark_cox_fitting(c: &mut Criterion) {
    let mut group = c.benchmark_group("cox_fitting");

    for &n_samples in [200, 500, 1000].iter() {
        for ties in [TieMethod::Efron, TieMethod::Breslow] {
            let data = generate_synthetic_data(n_samples, 10, 1);
            group.bench_with_input(
                BenchmarkId::from_parameter(format!("{n_samples}_{ties:?}")),
                &data,
                |b, data| {
                    b.iter(|| {
                        let mut model = CoxModel::new().with_ties(ties);
                        model.fit(black_box(data)).unwrap();
                    });
                },
            );
        }
    }
    group.finish();
}

fn benchmark_stratified_fitting(c: &mut Criterion) {
    let mut group = c.benchmark_group("stratified_fitting");

    for &n_strata in [1, 2, 6].iter() {
        let data = generate_synthetic_data(900, 8, n_strata);
        group.bench_with_input(BenchmarkId::from_parameter(n_strata), &data, |b, data| {
            b.iter(|| {
                let mut model = CoxModel::new();
                model.fit(black_box(data)).unwrap();
            });
        });
    }
    group.finish();
}

fn benchmark_kaplan_meier(c: &mut Criterion) {
    let mut group = c.benchmark_group("kaplan_meier");

    let data = generate_synthetic_data(1000, 3, 1);
    let times = data.times().to_vec();
    let events = data.events().to_vec();
    let groups: Vec<usize> = (0..times.len()).map(|i| i % 3).collect();

    group.bench_function("fit_1000", |b| {
        b.iter(|| KaplanMeier::fit("bench", black_box(&times), black_box(&events)).unwrap());
    });
    group.bench_function("log_rank_3_groups", |b| {
        b.iter(|| log_rank_test(black_box(&times), black_box(&events), black_box(&groups), 3).unwrap());
    });
    group.finish();
}

fn benchmark_ph_test(c: &mut Criterion) {
    let mut group = c.benchmark_group("ph_test");
    group.sample_size(20);

    let dataset = synthetic_trial(900);
    let cleaned = clean(&dataset, EventType::Death).unwrap();
    let fit = fit_model(cleaned.records(), &MULTIVARIABLE_COVARIATES, &[], &FitOptions::default()).unwrap();
    let settings = ReportConfig::default().zph_settings();

    group.bench_function("multivariable_900", |b| {
        b.iter(|| test_proportional_hazards(black_box(&fit), &settings).unwrap());
    });
    group.finish();
}

fn benchmark_full_analysis(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_analysis");
    group.sample_size(10);

    let dataset = synthetic_trial(900);
    for parallel in [false, true] {
        let mut config = ReportConfig::default();
        config.analysis.parallel = parallel;
        group.bench_function(if parallel { "parallel" } else { "sequential" }, |b| {
            b.iter(|| run_analysis(black_box(&dataset), &config).unwrap());
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    benchmark_cox_fitting,
    benchmark_stratified_fitting,
    benchmark_kaplan_meier,
    benchmark_ph_test,
    benchmark_full_analysis
);

criterion_main!(benches);
