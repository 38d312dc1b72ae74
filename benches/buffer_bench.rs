use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use mq_archiver::transform::decode::decode_body;
use mq_archiver::transform::BatchBuffer;
use rand::{distributions::Alphanumeric, Rng};

fn rand_body(len: usize) -> Bytes {
    let s: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect();
    Bytes::from(s + "\n")
}

fn bench_fill_and_serialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_buffer_fill");
    for &n in &[1usize, 64, 1024, 16_384] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            // vary length a little to avoid degenerate layouts
            let bodies: Vec<Bytes> = (0..n).map(|i| rand_body(64 + (i % 193))).collect();

            b.iter(|| {
                let mut buf = BatchBuffer::new();
                for body in &bodies {
                    let text = decode_body(body).expect("utf8");
                    buf.append(&text).expect("room");
                }
                criterion::black_box(buf.serialize());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_fill_and_serialize);
criterion_main!(benches);
