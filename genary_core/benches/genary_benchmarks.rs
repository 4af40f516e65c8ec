use criterion::{black_box, criterion_group, criterion_main, Criterion};
use genary_core::aggregator::aggregate_day;
use genary_core::detector::detect_activations;
use genary_core::{classify, Snapshot, WatchList};

fn synthetic_snapshot(minute: usize) -> String {
    let mut rows = Vec::new();
    for unit in 0..40 {
        rows.push(serde_json::json!([
            "<b>儲能(Energy Storage System)</b>",
            "",
            format!("ESS-{unit}"),
            "10.0",
            format!("{}.5", (unit + minute) % 9),
            "0.1%",
            ""
        ]));
        rows.push(serde_json::json!([
            "儲能負載(Energy Storage Load)",
            "",
            format!("ESS-{unit}"),
            "10.0",
            format!("-{}.25", unit % 5),
            "0.1%",
            ""
        ]));
    }
    for name in ["核二Gas1", "興達#3(註12)", "大潭CC#1", "台中Gas1&amp;2"] {
        rows.push(serde_json::json!(["燃氣(LNG)", "", name, "280.0", "12.0", "4.3%", "運轉中"]));
    }
    rows.push(serde_json::json!(["燃煤(Coal)", "", "小計", "", "8000.0(35.5%)", "", ""]));
    serde_json::json!({ "": format!("2025-06-11 12:{:02}", minute % 60), "aaData": rows }).to_string()
}

fn benchmark_parse(c: &mut Criterion) {
    let raw = synthetic_snapshot(0);
    c.bench_function("snapshot_parse", |b| {
        b.iter(|| black_box(Snapshot::from_json("bench", black_box(&raw))))
    });
}

fn benchmark_classify(c: &mut Criterion) {
    c.bench_function("classify_row", |b| {
        b.iter(|| {
            black_box(classify(
                black_box("<A NAME='ess'></A><b>儲能(Energy Storage System)</b>"),
                black_box("ESS-1"),
            ))
        })
    });
}

fn benchmark_detect(c: &mut Criterion) {
    let snapshot = Snapshot::from_json("bench", &synthetic_snapshot(0)).unwrap();
    let watch_list = WatchList::default();
    c.bench_function("detect_activations", |b| {
        b.iter(|| black_box(detect_activations(&snapshot, &watch_list)))
    });
}

fn benchmark_aggregate_day(c: &mut Criterion) {
    // One day at the feed's ten-minute cadence.
    let day: Vec<Snapshot> = (0..144)
        .map(|i| Snapshot::from_json("bench", &synthetic_snapshot(i)).unwrap())
        .collect();
    c.bench_function("aggregate_day_144", |b| {
        b.iter(|| black_box(aggregate_day(&day)))
    });
}

criterion_group!(
    benches,
    benchmark_parse,
    benchmark_classify,
    benchmark_detect,
    benchmark_aggregate_day
);
criterion_main!(benches);
