// Delay scheduler and writer throughput benchmarks
use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mq_relay::delay::{DelayConfig, DelayHandler, DelayedItem, Delayer, InMemoryDelayStore, ManualClock};
use mq_relay::messaging::{BrokerWriter, Message, MessagingResult, Writer, WriterConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

struct NullSink;

#[async_trait]
impl BrokerWriter for NullSink {
    async fn write_messages(&self, messages: &mut [Message]) -> MessagingResult<()> {
        black_box(messages.len());
        Ok(())
    }

    async fn close(&self) -> MessagingResult<()> {
        Ok(())
    }
}

fn delay_tick_throughput(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("delay_tick_throughput");

    for due in [10usize, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(due), due, |b, &due| {
            b.to_async(&rt).iter(|| async move {
                let clock = Arc::new(ManualClock::new(1_700_000_000));
                let delayer = Delayer::new(Arc::new(InMemoryDelayStore::new()), DelayConfig::default())
                    .unwrap()
                    .with_clock(clock.clone());
                for i in 0..due {
                    delayer
                        .push("bench", &i, Duration::from_secs(1 + (i % 10) as u64))
                        .await
                        .unwrap();
                }
                clock.advance(10);

                let handler: Arc<dyn DelayHandler> = Arc::new(|item: DelayedItem| async move {
                    black_box(item);
                    Ok::<(), anyhow::Error>(())
                });
                black_box(delayer.tick(&handler).await)
            });
        });
    }
    group.finish();
}

fn writer_push_throughput(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("writer_push_throughput");

    for batch_size in [1usize, 100].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &batch_size| {
                b.to_async(&rt).iter(|| async move {
                    let writer = Writer::builder("bench", Arc::new(NullSink))
                        .config(WriterConfig {
                            batch_size,
                            ..Default::default()
                        })
                        .build()
                        .unwrap();
                    for i in 0..1000 {
                        writer.push(format!("payload-{}", i)).await.unwrap();
                    }
                    writer.close().await.unwrap();
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, delay_tick_throughput, writer_push_throughput);
criterion_main!(benches);
