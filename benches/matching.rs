use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dvr::matching::{normalize_url, requests_match};
use dvr::{Cassette, Interaction, Request, Response};

fn bench_requests_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("requests_match");
    let headers_to_check = vec!["Accept".to_string(), "Authorization".to_string()];

    for size in [100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let stored = Request::new("POST", "https://API.example.com/items?limit=5")
                .with_header("Accept", "application/json")
                .with_header("Authorization", "Bearer token")
                .with_body(vec![b'x'; size]);
            let live = Request::new("POST", "https://api.example.com/items?limit=5")
                .with_header("authorization", "Bearer token")
                .with_header("accept", "application/json")
                .with_body(vec![b'x'; size]);

            b.iter(|| requests_match(black_box(&stored), black_box(&live), &headers_to_check));
        });
    }

    group.finish();
}

fn bench_cassette_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("interaction_for_request");

    for count in [10, 100, 1_000] {
        let interactions = (0..count)
            .map(|i| {
                Interaction::new(
                    Request::get(&format!("https://api.example.com/items/{i}")),
                    Response::new(200),
                    None,
                )
            })
            .collect();
        let cassette = Cassette::new("bench", interactions);
        let last = Request::get(&format!("https://api.example.com/items/{}", count - 1));

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| cassette.interaction_for_request(black_box(&last), &[]));
        });
    }

    group.finish();
}

fn bench_normalize_url(c: &mut Criterion) {
    c.bench_function("normalize_url", |b| {
        b.iter(|| normalize_url(black_box("HTTPS://API.Example.com?b=2&a=1")));
    });
}

criterion_group!(benches, bench_requests_match, bench_cassette_lookup, bench_normalize_url);
criterion_main!(benches);
