use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use relevo::{
    classify, Clock, Connection, ConnectionWrapper, DriverError, PriorityFailover, Role,
    RoundRobin, Rows, Strategy, SystemClock,
};
use std::sync::Arc;

struct Idle;

#[async_trait]
impl Connection for Idle {
    async fn execute(&self, _statement: &str) -> Result<Rows, DriverError> {
        Ok(Rows::default())
    }

    async fn reconnect(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        true
    }
}

fn replicas(count: usize) -> Vec<Arc<ConnectionWrapper>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    (0..count)
        .map(|n| {
            Arc::new(
                ConnectionWrapper::new(
                    format!("replica/{}", n + 1),
                    Role::Replica,
                    Arc::new(Idle),
                    Arc::clone(&clock),
                )
                .with_weight(n % 3 + 1),
            )
        })
        .collect()
}

fn fill(mut strategy: impl Strategy, wrappers: &[Arc<ConnectionWrapper>]) -> impl Strategy {
    for wrapper in wrappers {
        strategy
            .connection_added(Arc::clone(wrapper))
            .expect("strategy accepts connection");
    }
    strategy
}

fn criterion_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("tokio runtime");
    let wrappers = replicas(8);

    let round_robin = fill(RoundRobin::new(true), &wrappers);
    let round_robin = &round_robin;
    c.bench_function("round_robin_next", |b| {
        b.to_async(&runtime).iter(|| async move {
            black_box(round_robin.next().await.ok());
        })
    });

    // Half the pool out of rotation forces the skip path
    for wrapper in wrappers.iter().step_by(2) {
        wrapper.blocklist_forever("bench");
    }
    c.bench_function("round_robin_next_half_blocklisted", |b| {
        b.to_async(&runtime).iter(|| async move {
            black_box(round_robin.next().await.ok());
        })
    });

    let failover = fill(PriorityFailover::new(), &wrappers);
    let failover = &failover;
    c.bench_function("failover_next", |b| {
        b.to_async(&runtime).iter(|| async move {
            black_box(failover.next().await.ok());
        })
    });

    let statements = [
        "SELECT * FROM posts WHERE id = 1",
        "WITH recent AS (SELECT id FROM posts) SELECT * FROM recent",
        "SELECT * FROM accounts WHERE id = 7 FOR UPDATE",
        "SELECT pg_advisory_lock(42)",
        "INSERT INTO posts (title) VALUES ('hello')",
        "SET statement_timeout = 100",
    ];
    c.bench_function("classify", |b| {
        b.iter(|| {
            for statement in &statements {
                black_box(classify(black_box(statement)));
            }
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
