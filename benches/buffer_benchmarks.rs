use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use safer_rawcap::{
    Adapter, Buffer, BufferPool, Filter, FilterType, Handle, LoopbackBackend, Packet, PacketAccess,
};
use std::sync::Arc;
use std::time::Duration;

fn bench_buffer_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_creation");

    for packets in [16u32, 512, 4096].iter() {
        group.bench_with_input(BenchmarkId::new("standard_frames", packets), packets, |b, &packets| {
            b.iter(|| black_box(Buffer::new(1514, packets).unwrap()))
        });

        group.bench_with_input(BenchmarkId::new("jumbo_frames", packets), packets, |b, &packets| {
            b.iter(|| black_box(Buffer::new(9018, packets).unwrap()))
        });
    }

    group.finish();
}

fn bench_buffer_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_operations");

    let mut packet = Packet::new(1514).unwrap();
    packet.payload_set(&[0x5A; 512]).unwrap();
    let buffer = Buffer::new(1514, 512).unwrap();

    group.bench_function("push_back_until_full", |b| {
        b.iter(|| {
            buffer.clear().unwrap();
            while buffer.push_back(&packet).unwrap() {}
            black_box(buffer.count().unwrap());
        })
    });

    group.bench_function("push_front", |b| {
        b.iter(|| {
            buffer.clear().unwrap();
            for _ in 0..64 {
                buffer.push_front(&packet).unwrap();
            }
        })
    });

    buffer.clear().unwrap();
    while buffer.push_back(&packet).unwrap() {}

    group.bench_function("iterate_packets", |b| {
        b.iter(|| {
            let access = buffer.access().unwrap();
            let bytes: usize = access.iter().map(|p| p.payload_length()).sum();
            black_box(bytes)
        })
    });

    group.bench_function("cursor_walk", |b| {
        b.iter(|| {
            let access = buffer.access().unwrap();
            let mut it = access.begin();
            let mut seen = 0;
            while !it.is_end() {
                seen += 1;
                it.advance();
            }
            black_box(seen)
        })
    });

    group.finish();
}

fn bench_filter_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter");

    let mut filter = Filter::new(FilterType::ByteMask).unwrap();
    let mask = [0x08, 0x00, 0x45];
    filter.mask_set(12, &mask, &[0x00, 0x00, 0x0F]).unwrap();
    filter.activate();

    let mut frame = vec![0u8; 1514];
    frame[12..15].copy_from_slice(&mask);

    group.bench_function("match", |b| b.iter(|| black_box(filter.matches(black_box(&frame)))));
    group.bench_function("capture_window", |b| {
        b.iter(|| black_box(filter.apply_capture_window(black_box(&frame)).len()))
    });

    group.finish();
}

fn bench_pool_recycling(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool");

    let pool = BufferPool::new(8, 1514, 512).unwrap();
    group.bench_function("get_and_return", |b| {
        b.iter(|| {
            let buffer = pool.get().unwrap();
            black_box(buffer.id());
        })
    });

    group.finish();
}

fn bench_single_packet_io(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_packet");
    group.measurement_time(Duration::from_secs(3));

    let backend = Arc::new(LoopbackBackend::new("bench"));
    let handle = Handle::open(&Adapter::from_shared(backend.clone())).unwrap();
    let mut packet = Packet::new(1514).unwrap();
    packet.payload_set(&[0; 256]).unwrap();

    group.bench_function("receive", |b| {
        b.iter(|| {
            backend.inject(vec![0; 256]);
            black_box(handle.receive_packet(&mut packet).unwrap())
        })
    });

    group.bench_function("transmit", |b| {
        b.iter(|| {
            black_box(handle.transmit_packet(&mut packet).unwrap());
            backend.take_sent();
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_buffer_creation,
    bench_buffer_operations,
    bench_filter_evaluation,
    bench_pool_recycling,
    bench_single_packet_io
);
criterion_main!(benches);
