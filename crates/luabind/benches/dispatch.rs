//! Dispatch benchmarks for luabind.
//!
//! Measures the cost of crossing the boundary in both directions: script
//! code touching bound objects, and native code calling into script.

use std::cell::Cell;
use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use luabind::{mlua::Value, registry, ClassBuilder, Environment, Signal};

struct Accumulator {
    total: Cell<i64>,
    added: Signal<(i64,)>,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            total: Cell::new(0),
            added: Signal::new(),
        }
    }

    fn add(&self, amount: i64) -> i64 {
        self.total.set(self.total.get() + amount);
        self.added.emit(&(amount,));
        self.total.get()
    }
}

fn environment() -> (Environment, Rc<Accumulator>) {
    ClassBuilder::<Accumulator>::new("Accumulator")
        .property("total", |a: &Accumulator| a.total.get(), |a: &Accumulator, v: i64| a.total.set(v))
        .method("add", |a: &Accumulator, (amount,): (i64,)| a.add(amount))
        .signal("added", |a: &Accumulator| &a.added)
        .register()
        .unwrap();

    let env = Environment::new().unwrap();
    let accumulator = Rc::new(Accumulator::new());
    env.set("acc", accumulator.clone()).unwrap();
    (env, accumulator)
}

// ============================================================================
// Script -> native
// ============================================================================

fn bench_script_to_native(c: &mut Criterion) {
    let (env, _accumulator) = environment();
    let mut group = c.benchmark_group("script_to_native");
    const CALLS: u64 = 1_000;
    group.throughput(Throughput::Elements(CALLS));

    let read = env
        .load_string("local sum = 0 for i = 1, 1000 do sum = sum + acc.total end return sum")
        .unwrap();
    group.bench_function("property_read", |b| {
        b.iter(|| black_box(read.call::<i64>(()).unwrap()))
    });

    let write = env
        .load_string("for i = 1, 1000 do acc.total = i end")
        .unwrap();
    group.bench_function("property_write", |b| b.iter(|| write.call::<()>(()).unwrap()));

    let method = env
        .load_string("for i = 1, 1000 do acc:add(1) end")
        .unwrap();
    group.bench_function("method_call", |b| b.iter(|| method.call::<()>(()).unwrap()));

    group.finish();
}

// ============================================================================
// Native -> script
// ============================================================================

fn bench_native_to_script(c: &mut Criterion) {
    let (env, accumulator) = environment();
    env.run_string("function twice(x) return x * 2 end").unwrap();
    let mut group = c.benchmark_group("native_to_script");

    group.bench_function("call_global", |b| {
        b.iter(|| black_box(env.call_with::<i64, _>("twice", (black_box(21i64),)).unwrap()))
    });

    for slots in [1usize, 8, 64].iter() {
        let env = Environment::new().unwrap();
        env.set("acc", accumulator.clone()).unwrap();
        env.run_string(&format!(
            "seen = 0 for i = 1, {} do acc:connect('added', function(n) seen = seen + n end) end",
            slots
        ))
        .unwrap();

        group.throughput(Throughput::Elements(*slots as u64));
        group.bench_with_input(BenchmarkId::new("signal_emit", slots), slots, |b, _| {
            b.iter(|| accumulator.add(black_box(1)))
        });
    }

    group.finish();
}

// ============================================================================
// Registry
// ============================================================================

fn bench_registry(c: &mut Criterion) {
    let env = Environment::new().unwrap();
    let lua = env.lua();
    let mut group = c.benchmark_group("registry");

    group.bench_function("push_store_i64", |b| {
        b.iter(|| {
            let value = registry::push(lua, &black_box(42i64)).unwrap();
            black_box(registry::store::<i64>(lua, &value).unwrap())
        })
    });

    let list: Vec<i64> = (0..100).collect();
    group.bench_function("push_store_list_100", |b| {
        b.iter(|| {
            let value = registry::push(lua, &list).unwrap();
            black_box(registry::store::<Vec<i64>>(lua, &value).unwrap())
        })
    });

    group.bench_function("store_mismatch", |b| {
        b.iter(|| black_box(registry::store::<i64>(lua, &Value::Boolean(true)).is_err()))
    });

    group.finish();
}

criterion_group!(benches, bench_script_to_native, bench_native_to_script, bench_registry);
criterion_main!(benches);
