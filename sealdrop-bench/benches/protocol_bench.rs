//! Request encoding/decoding benchmarks.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sealdrop_protocol::{ClientId, Decoder, Encoder, FileUpload, Request};

const SIZES: [usize; 3] = [1024, 64 * 1024, 1024 * 1024];

fn upload(size: usize) -> Request {
    Request::from(FileUpload::new(
        ClientId::from_bytes([7; 16]),
        "bench.bin",
        Bytes::from(vec![0x5A; size]),
    ))
}

fn bench_upload_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("upload_encode");

    for size in SIZES {
        let request = upload(size);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &request, |b, request| {
            b.iter(|| black_box(Encoder::encode_request(request)));
        });
    }

    group.finish();
}

fn bench_upload_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("upload_decode");

    for size in SIZES {
        let encoded = Encoder::encode_request(&upload(size));

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| {
                let mut decoder = Decoder::new();
                decoder.extend(encoded);
                black_box(decoder.decode_request().unwrap())
            });
        });
    }

    group.finish();
}

fn bench_upload_decode_chunked(c: &mut Criterion) {
    let mut group = c.benchmark_group("upload_decode_chunked");
    let size = 1024 * 1024;
    let encoded = Encoder::encode_request(&upload(size));

    for chunk in [1024, 8192, 65536] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &chunk, |b, &chunk| {
            b.iter(|| {
                let mut decoder = Decoder::new();
                let mut decoded = None;
                for piece in encoded.chunks(chunk) {
                    decoder.extend(piece);
                    if let Some(request) = decoder.decode_request().unwrap() {
                        decoded = Some(request);
                    }
                }
                black_box(decoded)
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_upload_encode,
    bench_upload_decode,
    bench_upload_decode_chunked
);
criterion_main!(benches);
