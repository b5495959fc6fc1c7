use luabind::{mlua, BindError, ClassBuilder, Environment, MemberAccess, Operator, Owned, Signal};
use pretty_assertions::assert_eq;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Once;

thread_local! {
    static FREED: Cell<u32> = Cell::new(0);
}

struct Counter {
    value: Cell<i64>,
    label: RefCell<String>,
    changed: Signal<(i64,)>,
}

impl Counter {
    fn with_value(value: i64) -> Self {
        Self {
            value: Cell::new(value),
            label: RefCell::new("counter".to_string()),
            changed: Signal::new(),
        }
    }

    fn value(&self) -> i64 {
        self.value.get()
    }

    fn set_value(&self, value: i64) {
        if self.value.replace(value) != value {
            self.changed.emit(&(value,));
        }
    }

    fn bump(&self, by: i64) -> i64 {
        self.set_value(self.value() + by);
        self.value()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
struct Money(i64);

struct Gadget;

fn setup() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        ClassBuilder::<Counter>::new("Counter")
            .property("value", Counter::value, Counter::set_value)
            .readonly("label", |c: &Counter| c.label.borrow().clone())
            .method("bump", |c: &Counter, (by,): (i64,)| c.bump(by))
            .method("end", |c: &Counter, (): ()| c.value())
            .alias("end", "finish")
            .method_multi("span", |c: &Counter, (): ()| (c.value() - 1, c.value() + 1))
            .try_method("divide", |c: &Counter, (by,): (i64,)| {
                if by == 0 {
                    Err(BindError::Script(mlua::Error::runtime("division by zero")))
                } else {
                    Ok(c.value() / by)
                }
            })
            .method_out("addScaled", 1i64, |c: &Counter, (delta,): (i64,), factor: &mut i64| {
                let applied = delta * *factor;
                *factor = applied;
                c.bump(applied)
            })
            .signal("changed", |c: &Counter| &c.changed)
            .constructor(|(start,): (Option<i64>,)| Counter::with_value(start.unwrap_or(0)))
            .on_free(|_: &Counter| FREED.with(|freed| freed.set(freed.get() + 1)))
            .register()
            .unwrap();

        ClassBuilder::<Money>::new("Money")
            .readonly("cents", |m: &Money| m.0)
            .operator(Operator::Add, |a: Money, b: Money| Money(a.0 + b.0))
            .operator(Operator::Mul, |a: Money, k: i64| Money(a.0 * k))
            .equality()
            .ordering()
            .by_value()
            .constructor(|(cents,): (i64,)| Money(cents))
            .register()
            .unwrap();

        ClassBuilder::<Gadget>::new("Gadget")
            .method("connect", |_: &Gadget, (): ()| "custom".to_string())
            .register()
            .unwrap();
    });
}

fn env() -> Environment {
    setup();
    let env = Environment::new().unwrap();
    env.expose::<Counter>().unwrap();
    env.expose::<Money>().unwrap();
    env
}

#[test]
fn test_property_read_and_write() {
    let env = env();
    let counter = Rc::new(Counter::with_value(2));
    env.set("counter", counter.clone()).unwrap();

    assert_eq!(env.run_string_with::<i64>("return counter.value").unwrap(), 2);
    env.run_string("counter.value = 24").unwrap();
    assert_eq!(counter.value(), 24);
}

#[test]
fn test_readonly_and_unknown_members() {
    let env = env();
    let counter = Rc::new(Counter::with_value(0));
    env.set("counter", counter.clone()).unwrap();

    let err = env.run_string("counter.label = 'renamed'").unwrap_err();
    assert!(matches!(
        err,
        BindError::MissingMember { access: MemberAccess::Write, ref member, .. } if member == "label"
    ));

    let err = env.run_string("return counter.a_missing_value").unwrap_err();
    assert!(matches!(
        err,
        BindError::MissingMember { access: MemberAccess::Read, ref member, .. } if member == "a_missing_value"
    ));

    let err = env.run_string("counter.bump = 1").unwrap_err();
    assert!(matches!(err, BindError::MissingMember { access: MemberAccess::Write, .. }));
}

#[test]
fn test_errors_are_catchable_from_script() {
    let env = env();
    let counter = Rc::new(Counter::with_value(0));
    env.set("counter", counter.clone()).unwrap();

    let message: String = env
        .run_string_with(
            r#"
            local ok, err = pcall(function() return counter.nothing end)
            assert(not ok)
            return tostring(err)
            "#,
        )
        .unwrap();
    assert!(message.contains("missing property"), "{}", message);
}

#[test]
fn test_alias_resolves_like_real_name() {
    let env = env();
    let counter = Rc::new(Counter::with_value(9));
    env.set("counter", counter.clone()).unwrap();

    let (by_alias, by_real): (i64, i64) = (
        env.run_string_with("return counter:finish()").unwrap(),
        env.run_string_with("return counter['end'](counter)").unwrap(),
    );
    assert_eq!(by_alias, 9);
    assert_eq!(by_real, 9);
}

#[test]
fn test_methods_and_multiple_results() {
    let env = env();
    let counter = Rc::new(Counter::with_value(10));
    env.set("counter", counter.clone()).unwrap();

    assert_eq!(env.run_string_with::<i64>("return counter:bump(5)").unwrap(), 15);
    let span: Vec<i64> = env
        .run_string_with("return { counter:span() }")
        .unwrap();
    assert_eq!(span, vec![14, 16]);

    let err = env.run_string("counter:divide(0)").unwrap_err();
    assert!(err.to_string().contains("division by zero"));
}

#[test]
fn test_dispatch_errors_name_position() {
    let env = env();
    let counter = Rc::new(Counter::with_value(0));
    env.set("counter", counter.clone()).unwrap();

    let err = env.run_string("counter:bump('x')").unwrap_err();
    assert!(matches!(
        err,
        BindError::Dispatch { position: 1, ref function, .. } if function == "bump"
    ));

    let err = env.run_string("counter:bump(1, 2)").unwrap_err();
    assert!(matches!(err, BindError::Dispatch { position: 2, .. }));

    let err = env.run_string("counter.bump(1)").unwrap_err();
    assert!(matches!(err, BindError::Dispatch { position: 0, .. }));
}

#[test]
fn test_out_argument_contract() {
    let env = env();
    let counter = Rc::new(Counter::with_value(0));
    env.set("counter", counter.clone()).unwrap();

    // In-arguments only: the out value starts from its default and comes back
    let results: Vec<i64> = env
        .run_string_with("return { counter:addScaled(3) }")
        .unwrap();
    assert_eq!(results, vec![3, 3]);

    // Full count: the caller's value is used and not returned again
    let results: Vec<i64> = env
        .run_string_with("return { counter:addScaled(3, 2) }")
        .unwrap();
    assert_eq!(results, vec![9]);

    let err = env.run_string("counter:addScaled()").unwrap_err();
    assert!(matches!(err, BindError::Dispatch { .. }));
    let err = env.run_string("counter:addScaled(1, 2, 3)").unwrap_err();
    assert!(matches!(err, BindError::Dispatch { .. }));
}

#[test]
fn test_same_object_same_proxy() {
    let env = env();
    let counter = Rc::new(Counter::with_value(0));
    env.set("a", counter.clone()).unwrap();
    env.set("b", counter.clone()).unwrap();

    assert!(env.run_string_with::<bool>("return rawequal(a, b)").unwrap());
    let text: String = env.run_string_with("return tostring(a)").unwrap();
    assert!(text.starts_with("Counter(0x"), "{}", text);
}

#[test]
fn test_constructor_accepts_dot_and_colon() {
    let env = env();
    let values: Vec<i64> = env
        .run_string_with("return { Counter.new(4).value, Counter:new(5).value, Counter.new().value }")
        .unwrap();
    assert_eq!(values, vec![4, 5, 0]);
}

#[test]
fn test_destroy_is_idempotent() {
    let env = env();
    let destroyed: bool = env
        .run_string_with(
            r#"
            counter = Counter.new(1)
            counter:destroy()
            counter:destroy()
            return counter:isDestroyed()
            "#,
        )
        .unwrap();
    assert!(destroyed);

    let err = env.run_string("return counter.value").unwrap_err();
    assert!(matches!(err, BindError::Destroyed { .. }));
    let err = env.run_string("counter:bump(1)").unwrap_err();
    assert!(matches!(err, BindError::Destroyed { .. }));
    let err = env.run_string("counter.value = 3").unwrap_err();
    assert!(matches!(err, BindError::Destroyed { .. }));

    let text: String = env.run_string_with("return tostring(counter)").unwrap();
    assert_eq!(text, "Counter(destroyed)");
}

#[test]
fn test_native_owned_object_outlived_by_proxy() {
    let env = env();
    let counter = Rc::new(Counter::with_value(1));
    env.set("counter", counter.clone()).unwrap();

    drop(counter);
    assert!(env.run_string_with::<bool>("return counter:isDestroyed()").unwrap());
    let err = env.run_string("return counter.value").unwrap_err();
    assert!(matches!(err, BindError::Destroyed { .. }));
}

#[test]
fn test_collection_runs_free_hook_once() {
    let env = env();
    let before = FREED.with(Cell::get);

    env.run_string("do local temp = Counter.new(3) end").unwrap();
    env.collect_garbage().unwrap();
    assert_eq!(FREED.with(Cell::get), before + 1);

    env.run_string("do local temp = Counter.new(3); temp:destroy() end").unwrap();
    env.collect_garbage().unwrap();
    assert_eq!(FREED.with(Cell::get), before + 2);
}

#[test]
fn test_native_owned_never_freed_by_collector() {
    let env = env();
    let before = FREED.with(Cell::get);
    let counter = Rc::new(Counter::with_value(3));

    env.set("counter", counter.clone()).unwrap();
    env.run_string("counter = nil").unwrap();
    env.collect_garbage().unwrap();

    assert_eq!(FREED.with(Cell::get), before);
    assert_eq!(Rc::strong_count(&counter), 1);
}

#[test]
fn test_owned_push_adopts_native_proxy() {
    let env = env();
    let before = FREED.with(Cell::get);
    let counter = Rc::new(Counter::with_value(6));
    env.set("a", counter.clone()).unwrap();
    env.set("b", Owned::from_rc(counter)).unwrap();

    assert!(env.run_string_with::<bool>("return rawequal(a, b)").unwrap());
    assert_eq!(env.run_string_with::<i64>("return b.value").unwrap(), 6);

    env.run_string("a, b = nil, nil").unwrap();
    env.collect_garbage().unwrap();
    assert_eq!(FREED.with(Cell::get), before + 1);
}

#[test]
fn test_signal_connection_and_remover() {
    let env = env();
    let counter = Rc::new(Counter::with_value(0));
    env.set("counter", counter.clone()).unwrap();

    env.run_string(
        r#"
        calls, last = 0, nil
        remove = counter:connect("changed", function(value)
            calls = calls + 1
            last = value
        end)
        "#,
    )
    .unwrap();
    assert_eq!(env.connection_count(), 1);

    counter.set_value(7);
    assert_eq!(env.get::<i64>("calls").unwrap(), 1);
    assert_eq!(env.get::<i64>("last").unwrap(), 7);

    env.run_string("remove(); remove()").unwrap();
    counter.set_value(8);
    assert_eq!(env.get::<i64>("calls").unwrap(), 1);
    assert_eq!(counter.changed.slot_count(), 0);
    assert_eq!(env.connection_count(), 0);
}

#[test]
fn test_script_owned_signal_and_remover() {
    let env = env();
    env.run_string(
        r#"
        counter = Counter.new(0)
        hits = 0
        remove = counter:connect("changed", function(value) hits = hits + value end)
        counter.value = 4
        remove()
        remove()
        counter.value = 5
        "#,
    )
    .unwrap();

    assert_eq!(env.get::<i64>("hits").unwrap(), 4);
    assert_eq!(env.connection_count(), 0);
}

#[test]
fn test_slot_capturing_its_source_is_collected() {
    let env = env();
    let before = FREED.with(Cell::get);
    env.run_string(
        r#"
        do
            local counter = Counter.new(1)
            counter:connect("changed", function() local _ = counter.value end)
        end
        "#,
    )
    .unwrap();
    assert_eq!(env.connection_count(), 1);

    env.collect_garbage().unwrap();
    env.collect_garbage().unwrap();
    assert_eq!(FREED.with(Cell::get), before + 1);
    assert_eq!(env.connection_count(), 0);
}

#[test]
fn test_remover_after_native_owner_dropped_source() {
    let env = env();
    let counter = Rc::new(Counter::with_value(0));
    env.set("counter", counter.clone()).unwrap();
    env.run_string("remove = counter:connect('changed', function() end)")
        .unwrap();

    drop(counter);
    env.run_string("remove(); remove()").unwrap();
    assert_eq!(env.connection_count(), 0);
    assert!(env.run_string_with::<bool>("return counter:isDestroyed()").unwrap());
}

#[test]
fn test_unknown_signal_is_missing_member() {
    let env = env();
    let counter = Rc::new(Counter::with_value(0));
    env.set("counter", counter.clone()).unwrap();

    let err = env
        .run_string("counter:connect('noSuchSignal', function() end)")
        .unwrap_err();
    assert!(matches!(err, BindError::MissingMember { ref member, .. } if member == "noSuchSignal"));
}

#[test]
fn test_failing_slot_is_swallowed() {
    let env = env();
    let counter = Rc::new(Counter::with_value(0));
    env.set("counter", counter.clone()).unwrap();
    env.run_string("counter:connect('changed', function() error('slot failed') end)")
        .unwrap();

    counter.set_value(1);
    assert_eq!(counter.value(), 1);
}

#[test]
fn test_destroy_disconnects() {
    let env = env();
    let counter = Rc::new(Counter::with_value(0));
    env.set("counter", counter.clone()).unwrap();
    env.run_string(
        r#"
        remove = counter:connect("changed", function() end)
        counter:destroy()
        remove()
        "#,
    )
    .unwrap();

    assert_eq!(counter.changed.slot_count(), 0);
    assert_eq!(env.connection_count(), 0);
}

#[test]
fn test_dropping_environment_disconnects() {
    let counter = Rc::new(Counter::with_value(0));
    {
        let env = env();
        env.set("counter", counter.clone()).unwrap();
        env.run_string("counter:connect('changed', function() end)")
            .unwrap();
        assert_eq!(counter.changed.slot_count(), 1);
    }
    assert_eq!(counter.changed.slot_count(), 0);
    counter.set_value(5);
}

#[test]
fn test_operators_and_comparisons() {
    let env = env();

    assert!(env
        .run_string_with::<bool>("return Money.new(2) + Money.new(3) == Money.new(5)")
        .unwrap());
    assert_eq!(
        env.run_string_with::<i64>("return (Money.new(4) * 3).cents").unwrap(),
        12
    );
    assert!(env
        .run_string_with::<bool>("return Money.new(1) < Money.new(2) and Money.new(2) <= Money.new(2)")
        .unwrap());

    let err = env.run_string("return Money.new(1) - Money.new(1)").unwrap_err();
    assert!(err.to_string().contains("does not support operator '-'"));

    let money: Money = env.run_string_with("return Money.new(7)").unwrap();
    assert_eq!(money, Money(7));
}

#[test]
fn test_counters_compare_by_identity() {
    let env = env();
    assert!(!env
        .run_string_with::<bool>("return Counter.new(1) == Counter.new(1)")
        .unwrap());
    let err = env
        .run_string("return Counter.new(1) < Counter.new(2)")
        .unwrap_err();
    assert!(err.to_string().contains("does not support ordering"));
}

#[test]
fn test_class_members_shadow_builtins() {
    setup();
    let env = Environment::new().unwrap();
    let gadget = Rc::new(Gadget);
    env.set("gadget", gadget.clone()).unwrap();

    let result: String = env.run_string_with("return gadget:connect()").unwrap();
    assert_eq!(result, "custom");
    assert!(!env.run_string_with::<bool>("return gadget:isDestroyed()").unwrap());
}
