use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use mtom::{InfosetEvent, MtomReader, MtomWriter, ReaderConfig, WriterConfig};

fn document(payload: usize) -> Vec<InfosetEvent> {
    vec![
        InfosetEvent::start("Envelope", "http://www.w3.org/2003/05/soap-envelope"),
        InfosetEvent::start("Body", "http://www.w3.org/2003/05/soap-envelope"),
        InfosetEvent::start("upload", "urn:bench"),
        InfosetEvent::attribute("name", "blob.bin"),
        InfosetEvent::binary(vec![0xa5u8; payload]),
        InfosetEvent::EndElement,
        InfosetEvent::EndElement,
        InfosetEvent::EndElement,
        InfosetEvent::EndDocument,
    ]
}

fn encode(events: &[InfosetEvent]) -> Vec<u8> {
    let mut writer = MtomWriter::new(Vec::new(), WriterConfig::default().with_seed(7)).unwrap();
    writer.write_events(events).unwrap();
    writer.finish().unwrap();
    writer.into_inner().unwrap()
}

fn decode(message: &Bytes) -> Vec<InfosetEvent> {
    MtomReader::new(message.clone(), 0, message.len(), ReaderConfig::default())
        .unwrap()
        .read_to_end()
        .unwrap()
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("mtom");

    // Inlined as base64 (below the default threshold)
    let small = document(64);
    group.throughput(Throughput::Bytes(64));
    group.bench_function("encode_64b", |b| {
        b.iter(|| black_box(encode(&small)));
    });

    let medium = document(16 * 1024);
    group.throughput(Throughput::Bytes(16 * 1024));
    group.bench_function("encode_16kb", |b| {
        b.iter(|| black_box(encode(&medium)));
    });

    let large = document(1024 * 1024);
    group.throughput(Throughput::Bytes(1024 * 1024));
    group.bench_function("encode_1mb", |b| {
        b.iter(|| black_box(encode(&large)));
    });

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("mtom");

    for (label, size) in [("decode_64b", 64), ("decode_16kb", 16 * 1024), ("decode_1mb", 1024 * 1024)] {
        let message = Bytes::from(encode(&document(size)));
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(label, |b| {
            b.iter(|| black_box(decode(&message)));
        });
    }

    group.finish();
}

fn bench_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("mtom");

    let events = document(16 * 1024);
    group.throughput(Throughput::Bytes(16 * 1024));
    group.bench_function("roundtrip_16kb", |b| {
        b.iter(|| {
            let message = Bytes::from(encode(&events));
            black_box(decode(&message));
        });
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_roundtrip);
criterion_main!(benches);
