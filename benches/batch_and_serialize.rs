//! Benchmarks the two stages of the outbound send path: batching raw
//! frames and serializing events through both `SerializerFactory` backends.

use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use eventwire::Event;
use eventwire::config::SerializerType;
use eventwire::performance::batcher::MessageBatcher;
use eventwire::performance::serializer::SerializerFactory;
use serde::Serialize;

#[derive(Serialize)]
struct OrderUpdate {
    order_id: String,
    price: f64,
    size: f64,
    side: &'static str,
}

impl Event for OrderUpdate {
    fn event_type(&self) -> &str {
        "order.update"
    }
}

fn sample_event(payload_len: usize) -> OrderUpdate {
    OrderUpdate {
        order_id: "0x".to_owned() + &"a".repeat(payload_len),
        price: 0.55,
        size: 100.0,
        side: "BUY",
    }
}

fn bench_batcher(c: &mut Criterion) {
    let mut group = c.benchmark_group("performance/batcher");

    for target_size in [8_usize, 32, 128] {
        group.throughput(Throughput::Elements(target_size as u64));
        group.bench_with_input(
            BenchmarkId::new("add_message_until_flush", target_size),
            &target_size,
            |b, &target_size| {
                b.iter(|| {
                    let batcher = MessageBatcher::new(target_size, Duration::from_secs(60));
                    for i in 0..target_size {
                        batcher.add_message(vec![std::hint::black_box(i as u8); 64]);
                    }
                    let _ = std::hint::black_box(batcher.get_batch());
                });
            },
        );
    }

    group.finish();
}

fn bench_serializer(c: &mut Criterion) {
    let mut group = c.benchmark_group("performance/serializer");

    for payload_len in [16_usize, 256, 4096] {
        let event = sample_event(payload_len);
        group.throughput(Throughput::Bytes(payload_len as u64));

        let standard = SerializerFactory::new(SerializerType::Standard, 8, payload_len + 128);
        group.bench_with_input(
            BenchmarkId::new("standard", payload_len),
            &event,
            |b, event| {
                b.iter(|| {
                    let _ = std::hint::black_box(standard.serialize(event).unwrap());
                });
            },
        );

        let optimized = SerializerFactory::new(SerializerType::Optimized, 8, payload_len + 128);
        group.bench_with_input(
            BenchmarkId::new("optimized", payload_len),
            &event,
            |b, event| {
                b.iter(|| {
                    let _ = std::hint::black_box(optimized.serialize(event).unwrap());
                });
            },
        );
    }

    group.finish();
}

criterion_group!(batch_and_serialize_benches, bench_batcher, bench_serializer);
criterion_main!(batch_and_serialize_benches);
