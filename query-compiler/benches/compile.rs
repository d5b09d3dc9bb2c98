use criterion::{Criterion, criterion_group, criterion_main};
use query_compiler::{FilterSelection, LogSource, compile_where, row_query};

fn benchmark(c: &mut Criterion) {
    let source = LogSource::Edge;
    let single = FilterSelection::from_json(r#"{"status_code": {"error": true}}"#).unwrap();
    let many = FilterSelection::from_json(
        r#"{"search_query": "timeout", "status_code": {"error": true, "warning": true}, "method": {"get": true, "post": true}, "product": {"storage": true}, "request.host": "example.com"}"#,
    )
    .unwrap();

    c.bench_function("compile single nested filter", |b| {
        b.iter(|| compile_where(&source, &single).build())
    });

    c.bench_function("compile many filters", |b| {
        b.iter(|| compile_where(&source, &many).build())
    });

    c.bench_function("row query with many filters", |b| {
        b.iter(|| row_query(&source, &many, 100))
    });
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
