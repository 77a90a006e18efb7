use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use taskwatch::memory::InMemoryConnection;
use taskwatch::{DispatchTable, Monitor, TaskHandle, TaskInfo};

const STEPS: u8 = 32;

fn scripted_task(conn: &InMemoryConnection) -> TaskHandle {
    let task = conn.register_task("PowerOnVM_Task");
    // Progress ticks keep the status changing without changing state.
    let reports = (1..STEPS)
        .map(|p| TaskInfo::running(Some(p)))
        .chain(std::iter::once(TaskInfo::success()));
    conn.script(&task.id, reports).unwrap();
    task
}

fn bench_poll(c: &mut Criterion) {
    let mut group = c.benchmark_group("monitor/poll");
    group.throughput(Throughput::Elements(u64::from(STEPS)));
    group.bench_function("zero_interval", |b| {
        b.iter_custom(|iters| {
            let mut total = Duration::ZERO;
            for _ in 0..iters {
                // Fresh connection per iteration so every sample starts from a queued task.
                let conn = InMemoryConnection::new();
                let task = scripted_task(&conn);
                let monitor = Monitor::new(&conn);

                let start = Instant::now();
                monitor
                    .poll(&task, Some(Duration::ZERO), &mut DispatchTable::new())
                    .unwrap();
                total += start.elapsed();
            }
            total
        });
    });
    group.finish();
}

fn bench_wait(c: &mut Criterion) {
    let mut group = c.benchmark_group("monitor/wait");
    group.throughput(Throughput::Elements(u64::from(STEPS)));
    group.bench_function("status_object", |b| {
        b.iter_custom(|iters| {
            let mut total = Duration::ZERO;
            for _ in 0..iters {
                let conn = InMemoryConnection::new();
                let task = scripted_task(&conn);
                let monitor = Monitor::new(&conn);

                let mut running = 0u32;
                let mut table = DispatchTable::new().on_running(|_, _| {
                    running += 1;
                    Ok(())
                });
                let start = Instant::now();
                monitor.wait(&task, &mut table).unwrap();
                total += start.elapsed();
                drop(table);
                assert_eq!(running, 1);
            }
            total
        });
    });
    group.finish();
}

criterion_group!(monitor, bench_poll, bench_wait);
criterion_main!(monitor);
