use criterion::{black_box, criterion_group, criterion_main, Criterion};
use swingfit::{
    build_template, detect_edges, fit_physical, fit_template, Direction, EdgeDetectConfig,
    FitConfig, PhysicalModel, PhysicalParams, PipelineConfig, Template, TemplateBuildConfig,
};

const PITCH: f64 = 160.0;
const WIDTHS: [f64; 5] = [120.0, 60.0, 80.0, 50.0, 50.0];

/// Five-finger pass with 8-sample edge ramps, centered at `t0`.
fn synthetic_frame(t0: f64, direction: Direction) -> Vec<u16> {
    let fingers: Vec<[f64; 2]> = WIDTHS
        .iter()
        .enumerate()
        .map(|(i, &w)| {
            let c = t0 + direction.sign() * (i as f64 - 2.0) * PITCH;
            [c - 0.5 * w, c + 0.5 * w]
        })
        .collect();
    (0..1024)
        .map(|i| {
            let t = i as f64;
            let blocked: f64 = fingers
                .iter()
                .map(|&[a, b]| ((t - a) / 8.0 + 0.5).min((b - t) / 8.0 + 0.5).clamp(0.0, 1.0))
                .sum();
            (40.0 + 820.0 * (1.0 - blocked.min(1.0))).round() as u16
        })
        .collect()
}

fn bench_detect_edges(c: &mut Criterion) {
    let frame = synthetic_frame(511.3, Direction::Forward);
    let config = EdgeDetectConfig::default();
    c.bench_function("detect_edges_1024", |b| {
        b.iter(|| detect_edges(black_box(&frame), &config))
    });
}

fn bench_fit_physical(c: &mut Criterion) {
    let config = PipelineConfig::default();
    let model = PhysicalModel::new(&config.fiducial, &config.pendulum, &config.sampling);
    let truth = PhysicalParams {
        t0: 512.3,
        lo: 50.0,
        hi: 850.0,
        beam_mm: 2.0,
        swing_deg: 4.5,
        length_mm: config.pendulum.length_mm,
    };
    let frame: Vec<u16> = model
        .predict(&truth, Direction::Forward, config.sampling.n_samples)
        .into_iter()
        .map(|v| v.round() as u16)
        .collect();
    let Ok(seed) = detect_edges(&frame, &config.edges) else {
        return;
    };
    let fit = FitConfig::default();
    c.bench_function("fit_physical_1024", |b| {
        b.iter(|| fit_physical(black_box(&frame), &seed, &model, &config.pendulum, &fit))
    });
}

fn bench_template(c: &mut Criterion) {
    let edges = EdgeDetectConfig::default();
    let frames: Vec<Vec<u16>> = (0..40)
        .map(|k| {
            let direction = if k % 2 == 0 {
                Direction::Forward
            } else {
                Direction::Reverse
            };
            synthetic_frame(500.0 + 0.7 * k as f64, direction)
        })
        .collect();
    let build = TemplateBuildConfig::default();
    c.bench_function("build_template_40", |b| {
        b.iter(|| build_template(frames.iter().map(Vec::as_slice), &edges, black_box(&build)))
    });

    let Ok(curve) = build_template(frames.iter().map(Vec::as_slice), &edges, &build) else {
        return;
    };
    let Ok(template) = Template::new(curve, 0) else {
        return;
    };
    let frame = synthetic_frame(515.7, Direction::Reverse);
    let Ok(seed) = detect_edges(&frame, &edges) else {
        return;
    };
    let fit = FitConfig::default();
    c.bench_function("fit_template_1024", |b| {
        b.iter(|| fit_template(black_box(&frame), &seed, &template, &fit))
    });
}

criterion_group!(
    hotpaths,
    bench_detect_edges,
    bench_fit_physical,
    bench_template
);
criterion_main!(hotpaths);
