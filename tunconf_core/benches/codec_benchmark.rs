use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use tunconf_core::model::{build_set_request, decode_config, Interface, Key, Peer, PeerSettings};
use tunconf_core::proto::BufferWalker;

fn sample_peers(count: u8) -> Vec<Peer> {
    (0..count)
        .map(|i| {
            Peer::set(
                Key::new([i; 32]),
                PeerSettings {
                    persistent_keepalive: Some(25),
                    endpoint: Some(format!("203.0.113.{i}:51820").parse().unwrap()),
                    allowed_ips: vec![
                        format!("10.{i}.0.0/16").parse().unwrap(),
                        format!("fd00:{i:x}::/64").parse().unwrap(),
                    ],
                    ..Default::default()
                },
            )
        })
        .collect()
}

fn codec_benchmark(c: &mut Criterion) {
    let interface = Interface {
        private_key: Some(Key::new([0xAB; 32])),
        listen_port: Some(51820),
        replace_peers: true,
        ..Default::default()
    };
    let peers = sample_peers(100);

    c.bench_function("build_set_request_100_peers", |b| {
        b.iter(|| build_set_request(black_box(&interface), black_box(&peers)).unwrap())
    });

    let buffer = build_set_request(&interface, &peers).unwrap();

    c.bench_function("decode_config_100_peers", |b| {
        b.iter(|| decode_config(black_box(buffer.as_bytes())).unwrap())
    });

    c.bench_function("walk_100_peers", |b| {
        b.iter_batched(
            || buffer.as_bytes(),
            |bytes| {
                let walker = BufferWalker::new(black_box(bytes));
                let mut ips = 0;
                for entry in walker.peers().unwrap() {
                    ips += entry.unwrap().allowed_ips().count();
                }
                ips
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, codec_benchmark);
criterion_main!(benches);
