use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use hash_ledger::Ledger;
use std::time::Duration;

fn lcg(mut s: u64) -> impl Iterator<Item = u64> {
    std::iter::from_fn(move || {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        Some(s)
    })
}

fn key(n: u64) -> String {
    format!("k{:016x}", n)
}

fn bench_put_10k(c: &mut Criterion) {
    c.bench_function("ledger::put_10k", |b| {
        b.iter_batched(
            Ledger::new,
            |l| {
                for (i, x) in lcg(1).take(10_000).enumerate() {
                    l.put(&key(x), &i.to_string()).unwrap();
                }
                black_box(l)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_get_hit(c: &mut Criterion) {
    c.bench_function("ledger::get_hit", |b| {
        let l = Ledger::new();
        let keys: Vec<_> = lcg(7).take(20_000).map(key).collect();
        for (i, k) in keys.iter().enumerate() {
            l.put(k, &i.to_string()).unwrap();
        }
        let mut it = keys.iter().cycle();
        b.iter(|| {
            let k = it.next().unwrap();
            black_box(l.get(k).unwrap());
        })
    });
}

fn bench_get_previous_value(c: &mut Criterion) {
    c.bench_function("ledger::get_previous_value", |b| {
        let l = Ledger::new();
        let roots: Vec<_> = lcg(11)
            .take(5_000)
            .map(|x| (l.put(&key(x % 500), &x.to_string()).unwrap(), key(x % 500)))
            .collect();
        let mut it = roots.iter().cycle();
        b.iter(|| {
            let (r, k) = it.next().unwrap();
            black_box(l.get_previous_value(r, k).unwrap());
        })
    });
}

fn bench_erase_history_1k(c: &mut Criterion) {
    c.bench_function("ledger::erase_history_1k", |b| {
        b.iter_batched(
            || {
                let l = Ledger::new();
                for x in lcg(13).take(1_000) {
                    l.put(&key(x % 100), &x.to_string()).unwrap();
                }
                l
            },
            |l| {
                let history = l.history();
                for r in &history[..history.len() - 1] {
                    let _ = l.erase_root_hash(r);
                }
                black_box(l)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_config() -> Criterion {
    Criterion::default()
        .sample_size(30)
        .measurement_time(Duration::from_secs(8))
        .warm_up_time(Duration::from_secs(2))
}

criterion_group! {
    name = benches;
    config = bench_config();
    targets = bench_put_10k, bench_get_hit, bench_get_previous_value, bench_erase_history_1k
}
criterion_main!(benches);
