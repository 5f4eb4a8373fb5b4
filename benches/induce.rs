use std::hint::black_box;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use dns_ids::flow::format_duration;
use dns_ids::id3::{self, DecisionTree};
use dns_ids::record::Dataset;

const NAMES: [&str; 6] = [
    "_dns-sd._udp.local.",
    "_services._dns-sd._udp.local.",
    "example.com.",
    "example.org.",
    "printer.local.",
    "mail.example.com.",
];

fn synthetic(rows: usize) -> Dataset {
    let mut rng = StdRng::seed_from_u64(42);
    let mut csv = String::from("IsMalicious,TimeSinceLastPacket,SourcePort,QClass,QType,QName,AA,TC,RD,RA\n");
    for _ in 0..rows {
        let name = NAMES[rng.gen_range(0..NAMES.len())];
        let malicious = name.contains("dns-sd") && rng.gen_bool(0.9);
        let gap = format_duration(Duration::from_millis(rng.gen_range(0..20) * 100));
        csv.push_str(&format!(
            "{malicious},{gap},{},1,{},{name},false,false,{},false\n",
            if malicious { 5353 } else { rng.gen_range(40000..40016) },
            if rng.gen_bool(0.5) { 1 } else { 12 },
            !malicious,
        ));
    }
    Dataset::from_reader(csv.as_bytes()).expect("synthetic dataset parses")
}

fn bench_induce(c: &mut Criterion) {
    let data = synthetic(2_000);
    c.bench_function("induce 2000 rows", |b| {
        b.iter(|| id3::induce(black_box(data.records()), black_box(data.attributes())))
    });
    c.bench_function("gains 2000 rows", |b| {
        b.iter(|| id3::gains(black_box(data.records()), black_box(data.attributes())))
    });
}

fn bench_classify(c: &mut Criterion) {
    let data = synthetic(2_000);
    let tree = DecisionTree::train(&data).expect("tree trains");
    c.bench_function("classify 2000 rows", |b| {
        b.iter(|| tree.accuracy(black_box(data.records())))
    });
}

criterion_group!(benches, bench_induce, bench_classify);
criterion_main!(benches);
