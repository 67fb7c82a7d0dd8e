use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::net::Ipv4Addr;
use std::time::Duration;

use dns_auth::cache::{CacheKey, ResponseCache};
use dns_store::LocationId;
use dns_types::protocol::types::*;

fn domain(name: &str) -> DomainName {
    DomainName::from_dotted_string(name).unwrap()
}

fn question(name: &str) -> Question {
    Question {
        name: domain(name),
        qtype: QueryType::Record(RecordType::A),
        qclass: QueryClass::Record(RecordClass::IN),
    }
}

fn response(name: &str) -> Message {
    let mut message = Message::from_question(0, question(name)).make_response();
    message.answers.push(ResourceRecord {
        name: domain(name),
        rtype_with_data: RecordTypeWithData::A {
            address: Ipv4Addr::new(1, 2, 3, 4),
        },
        rclass: RecordClass::IN,
        ttl: 300,
    });
    message
}

fn populated_cache(size: usize) -> ResponseCache {
    let mut cache = ResponseCache::with_desired_size(size);
    let location = LocationId::empty();
    for i in 0..size {
        let name = format!("name{i}.example.com.");
        cache.insert(
            CacheKey::new(&location, &question(&name)),
            response(&name),
            Duration::from_secs(300),
        );
    }
    cache
}

#[allow(non_snake_case)]
fn bench__cache_get(c: &mut Criterion) {
    for size in [512, 4096] {
        let cache = populated_cache(size);
        let location = LocationId::empty();
        let key = CacheKey::new(&location, &question("name0.example.com."));

        c.bench_function(&format!("cache/get/{size}"), |b| {
            b.iter_batched(
                || cache.clone(),
                |mut cache| cache.get(&key),
                BatchSize::SmallInput,
            )
        });
    }
}

#[allow(non_snake_case)]
fn bench__cache_insert(c: &mut Criterion) {
    let cache = populated_cache(4096);
    let location = LocationId::empty();
    let key = CacheKey::new(&location, &question("fresh.example.com."));
    let message = response("fresh.example.com.");

    c.bench_function("cache/insert", |b| {
        b.iter_batched(
            || (cache.clone(), key.clone(), message.clone()),
            |(mut cache, key, message)| cache.insert(key, message, Duration::from_secs(300)),
            BatchSize::SmallInput,
        )
    });
}

#[allow(non_snake_case)]
fn bench__cache_prune(c: &mut Criterion) {
    // over-full, so pruning has real work to do
    let mut cache = ResponseCache::with_desired_size(1024);
    let location = LocationId::empty();
    for i in 0..8192 {
        let name = format!("name{i}.example.com.");
        cache.insert(
            CacheKey::new(&location, &question(&name)),
            response(&name),
            Duration::from_secs(300),
        );
    }

    c.bench_function("cache/prune", |b| {
        b.iter_batched(
            || cache.clone(),
            |mut cache| cache.prune(),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench__cache_get, bench__cache_insert, bench__cache_prune);
criterion_main!(benches);
