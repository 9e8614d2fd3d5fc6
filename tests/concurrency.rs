//! Many threads reading through one session.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use plug_flow::{
    ComputeContext, Context, Plug, PlugError, Producer, Session, StructuralHasher, Value,
    ValueCache,
};

/// out = in + the "offset" context variable, via an intermediate plug.
struct Offset {
    input: Arc<Plug>,
    shifted: Arc<Plug>,
    output: Arc<Plug>,
    computes: AtomicUsize,
}

impl Offset {
    fn new() -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Offset>| {
            let producer: Weak<dyn Producer> = this.clone();
            Offset {
                input: Plug::input("offset.in", 100i64).build(),
                shifted: Plug::output("offset.shifted")
                    .producer(producer.clone())
                    .build(),
                output: Plug::output("offset.out").producer(producer).build(),
                computes: AtomicUsize::new(0),
            }
        })
    }
}

impl Producer for Offset {
    fn hash(
        &self,
        output: &Plug,
        ctx: &ComputeContext<'_>,
        hasher: &mut StructuralHasher,
    ) -> Result<(), PlugError> {
        hasher.append(output.name());
        if output.id() == self.output.id() {
            hasher.append_hash(ctx.hash(&self.shifted)?);
        } else {
            hasher.append_hash(ctx.hash(&self.input)?);
        }
        Ok(())
    }

    fn compute(&self, output: &Plug, ctx: &ComputeContext<'_>) -> Result<(), PlugError> {
        self.computes.fetch_add(1, Ordering::SeqCst);
        ctx.check_cancelled()?;
        if output.id() == self.output.id() {
            let shifted = ctx.read_as::<i64>(&self.shifted)?;
            ctx.set(output, *shifted * 10)
        } else {
            let offset = ctx.context().get::<i64>("offset").map_or(0, |o| *o);
            let input = ctx.read_as::<i64>(&self.input)?;
            ctx.set(output, *input + offset)
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_reads_in_many_contexts() {
    let session = Session::new();
    let node = Offset::new();

    let mut handles = Vec::new();
    for offset in 0..32i64 {
        let session = session.clone();
        let node = node.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let context = Context::new().with("offset", offset);
            let value = session.read_as_in::<i64>(&node.output, &context).unwrap();
            assert!(!session.in_compute());
            (offset, *value)
        }));
    }

    for handle in handles {
        let (offset, value) = handle.await.unwrap();
        assert_eq!(value, (100 + offset) * 10);
    }
    // Two plugs per context.
    assert_eq!(session.cache().len(), 64);
    assert_eq!(node.computes.load(Ordering::SeqCst), 64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_reads_of_one_value_agree() {
    let session = Session::new();
    let node = Offset::new();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let session = session.clone();
        let node = node.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            session.read_as::<i64>(&node.output).unwrap()
        }));
    }
    for handle in handles {
        assert_eq!(*handle.await.unwrap(), 1000);
    }
    // Concurrent misses may compute more than once, but once cached every
    // later read is a hit.
    let computed = node.computes.load(Ordering::SeqCst);
    session.read(&node.output).unwrap();
    assert_eq!(node.computes.load(Ordering::SeqCst), computed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_writes_while_reading() {
    let session = Session::new();
    let node = Offset::new();

    let reader = {
        let session = session.clone();
        let node = node.clone();
        tokio::task::spawn_blocking(move || {
            for _ in 0..200 {
                let value = *session.read_as::<i64>(&node.output).unwrap();
                assert_eq!(value % 10, 0);
                assert!((1000..=1100).contains(&value));
            }
        })
    };

    for value in 101..=110i64 {
        session.write(&node.input, Value::new(value)).unwrap();
        tokio::task::yield_now().await;
    }
    reader.await.unwrap();

    assert_eq!(*session.read_as::<i64>(&node.output).unwrap(), 1100);
    assert_eq!(session.undo_stack().undo_len(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_cache_under_pressure() {
    let cache = Arc::new(ValueCache::with_shards(4 * 1024, 4));
    let node = Offset::new();

    let mut handles = Vec::new();
    for worker in 0..4i64 {
        let session = Session::builder().cache(cache.clone()).build();
        let node = node.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            for i in 0..256i64 {
                let offset = worker * 1000 + i;
                let context = Context::new().with("offset", offset);
                let value = session.read_as_in::<i64>(&node.output, &context).unwrap();
                assert_eq!(*value, (100 + offset) * 10);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Each value costs 8 bytes; 2048 of them would not fit.
    cache.set_ceiling(cache.ceiling());
    assert!(cache.current_cost() <= cache.ceiling());
    assert!(cache.len() < 2 * 4 * 256);
}
