use cake_core::prelude::*;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;

fn fill(sched: &mut Scheduler<RecordingWatchdog>, n: u64, flows: u64) {
    for i in 0..n {
        let flow = i % flows;
        let key = FlowKey { src_ip: flow as u128, dst_ip: 1, src_port: 1000 + flow as u16, dst_port: 80, protocol: 6 };
        sched.enqueue(&key, Packet::new(PacketId(i), 1500, 0, false), TimeNs::ZERO);
    }
}

fn dequeue_unlimited_rate(c: &mut Criterion) {
    c.bench_function("dequeue_unlimited_rate_1000_packets", |b| {
        b.iter(|| {
            let params = CakeParams { base_rate: 0, diffserv_mode: CakeMode::BestEffort, ..Default::default() };
            let mut sched = Scheduler::init(&params, 1024, 1, RecordingWatchdog::default()).unwrap();
            fill(&mut sched, 1000, 16);
            let mut n = 0;
            while let Some(packet) = sched.dequeue(TimeNs::ZERO) {
                black_box(packet);
                n += 1;
            }
            black_box(n)
        });
    });
}

fn dequeue_paced(c: &mut Criterion) {
    c.bench_function("dequeue_paced_1000_packets", |b| {
        b.iter(|| {
            let params = CakeParams { base_rate: 10_000_000, diffserv_mode: CakeMode::Diffserv4, ..Default::default() };
            let mut sched = Scheduler::init(&params, 1024, 1, RecordingWatchdog::default()).unwrap();
            fill(&mut sched, 1000, 16);
            let mut now = TimeNs::ZERO;
            let mut n = 0;
            while n < 1000 {
                match sched.dequeue(now) {
                    Some(packet) => {
                        black_box(packet);
                        n += 1;
                    }
                    None => now = now + Duration::from_micros(50),
                }
            }
            black_box(n)
        });
    });
}

criterion_group!(benches, dequeue_unlimited_rate, dequeue_paced);
criterion_main!(benches);
