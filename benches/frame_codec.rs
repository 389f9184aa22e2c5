use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use duplex_voice::codec::{apply_edge_fades, decode_playback, encode_capture, from_wire_format, to_wire_format};

fn capture_block() -> Vec<f32> {
    (0..4096)
        .map(|i| (i as f32 * 440.0 * 2.0 * std::f32::consts::PI / 16000.0).sin() * 0.8)
        .collect()
}

fn bench_capture_path(c: &mut Criterion) {
    let block = capture_block();
    let mut group = c.benchmark_group("capture");
    group.throughput(Throughput::Elements(block.len() as u64));

    group.bench_function("encode_capture", |b| b.iter(|| encode_capture(black_box(&block))));
    group.bench_function("encode_and_wire", |b| {
        b.iter(|| to_wire_format(&encode_capture(black_box(&block))))
    });
    group.finish();
}

fn bench_playback_path(c: &mut Criterion) {
    let wire = to_wire_format(&encode_capture(&capture_block()));
    let mut group = c.benchmark_group("playback");
    group.throughput(Throughput::Elements(4096));

    group.bench_function("wire_decode_fade", |b| {
        b.iter(|| {
            let pcm = from_wire_format(black_box(&wire)).unwrap();
            let mut samples = decode_playback(&pcm).unwrap();
            apply_edge_fades(&mut samples, 64);
            samples
        })
    });
    group.finish();
}

criterion_group!(benches, bench_capture_path, bench_playback_path);
criterion_main!(benches);
