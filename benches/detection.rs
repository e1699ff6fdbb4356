use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use earshot::classes::ClassScores;
use earshot::pipeline::{
    AudioFrame, Classifier, DetectorBank, HysteresisConfig, RmsClassifier, ScoredWindow, Windower,
    WindowerConfig,
};
use std::hint::black_box;
use std::time::{Duration, Instant};

const RATE: u32 = 16000;
const FRAME: usize = 320;

fn frames(count: usize) -> Vec<AudioFrame> {
    let origin = Instant::now();
    (0..count)
        .map(|i| {
            let samples = (0..FRAME)
                .map(|j| (((i * FRAME + j) % 200) as i16 - 100) * 80)
                .collect();
            AudioFrame::new(
                samples,
                RATE,
                origin + Duration::from_millis(20 * i as u64),
                i as u64,
            )
        })
        .collect()
}

/// Frames through the windower at the default 1 s window for several overlaps.
fn bench_windower(c: &mut Criterion) {
    let input = frames(500);
    let mut group = c.benchmark_group("windower");
    for overlap in [0.0f32, 0.5, 0.75] {
        let config = WindowerConfig::from_overlap(16000, FRAME, overlap).unwrap();
        group.bench_with_input(
            BenchmarkId::from_parameter(overlap),
            &config,
            |b, config| {
                b.iter(|| {
                    let mut windower = Windower::new(*config).unwrap();
                    let mut emitted = 0;
                    for frame in &input {
                        if windower.push(frame).is_some() {
                            emitted += 1;
                        }
                    }
                    black_box(emitted)
                })
            },
        );
    }
    group.finish();
}

/// One window's scores through a bank of state machines.
fn bench_detector_bank(c: &mut Criterion) {
    let mut group = c.benchmark_group("detector_bank");
    for classes in [7usize, 64, 521] {
        let configs = vec![HysteresisConfig::default(); classes];
        let origin = Instant::now();
        let windows: Vec<ScoredWindow> = (0..100)
            .map(|i| ScoredWindow {
                start: origin + Duration::from_millis(500 * i as u64),
                sequence: i as u64,
                scores: ClassScores::from_confidences(
                    (0..classes)
                        .map(|c| if (i / 10 + c) % 3 == 0 { 0.9 } else { 0.1 })
                        .collect(),
                ),
            })
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(classes), &windows, |b, windows| {
            b.iter(|| {
                let mut bank = DetectorBank::new(&configs);
                let mut events = 0;
                for window in windows {
                    events += bank.observe(window).len();
                }
                black_box(events)
            })
        });
    }
    group.finish();
}

fn bench_rms_classifier(c: &mut Criterion) {
    let classifier = RmsClassifier::new("alarm", 0.25);
    let mut windower = Windower::new(WindowerConfig::from_overlap(16000, FRAME, 0.5).unwrap())
        .unwrap();
    let window = frames(50)
        .iter()
        .find_map(|frame| windower.push(frame))
        .unwrap();
    c.bench_function("rms_classify_1s", |b| {
        b.iter(|| black_box(classifier.classify(black_box(&window)).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_windower,
    bench_detector_bank,
    bench_rms_classifier
);
criterion_main!(benches);
