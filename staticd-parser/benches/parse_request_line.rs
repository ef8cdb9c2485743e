use criterion::{black_box, criterion_group, criterion_main, Criterion};
use staticd_parser::RequestLine;

const SHORT: &[u8] = b"GET / HTTP/1.1\r\n\r\n";
const MEDIUM: &[u8] = b"GET /assets/images/logo-dark-mode.png HTTP/1.1\r\n\r\n";
const HEAD: &[u8] = b"HEAD /index.html HTTP/1.1\r\n\r\n";

fn benchmark(c: &mut Criterion) {
    c.bench_function("parse_request_line/short", |b| {
        b.iter(|| RequestLine::parse(black_box(SHORT)))
    });
    c.bench_function("parse_request_line/medium_path", |b| {
        b.iter(|| RequestLine::parse(black_box(MEDIUM)))
    });
    c.bench_function("parse_request_line/head", |b| {
        b.iter(|| RequestLine::parse(black_box(HEAD)))
    });
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
