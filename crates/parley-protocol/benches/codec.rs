//! Codec benchmarks for parley-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use parley_protocol::{codec, ChatMessage, Frame, ServerEvent};

fn message_frame(content_len: usize) -> Frame {
    let message = ChatMessage::finalized("m-1", "conn-1", "Alice", "lobby", "x".repeat(content_len));
    Frame::event(Some(1), ServerEvent::ReceiveMessage { message })
}

fn bench_encode_small(c: &mut Criterion) {
    let frame = message_frame(64);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("message_64B", |b| b.iter(|| codec::encode(black_box(&frame))));
    group.finish();
}

fn bench_decode_small(c: &mut Criterion) {
    let encoded = codec::encode(&message_frame(64)).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("message_64B", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

fn bench_streaming_frame(c: &mut Criterion) {
    let message = ChatMessage::streaming("m-1", "conn-1", "Alice", "lobby");
    let frame = Frame::event(Some(1), ServerEvent::ReceiveStreamingMessage { message });

    c.bench_function("streaming_frame_roundtrip", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&frame)).unwrap();
            codec::decode(black_box(&encoded)).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_encode_small,
    bench_decode_small,
    bench_streaming_frame
);
criterion_main!(benches);
