//! Integration tests for the cycle collector
//!
//! Tests cover:
//! - Isolated cycles
//! - Externally referenced cycles
//! - Weak references to collected objects
//! - Resurrection from `destroy`
//! - Zero-count objects during analysis
//! - Native references reported by GC hooks
//! - Fatal `destroy` during analysis

use kestrel_core::{
    ContextHooks, GcError, GcPhase, HookCx, ObjectId, Program, ProgramBuilder, Runtime,
    RuntimeOptions, RuntimeResult, Value, VarType,
};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn node_program(name: &str, destroyed: &Arc<AtomicUsize>) -> ProgramBuilder {
    let destroyed = destroyed.clone();
    ProgramBuilder::new(name)
        .variable("next", VarType::Object)
        .variable("peer", VarType::WeakObject)
        .function("destroy", move |_, _, _| {
            destroyed.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Undefined)
        })
}

fn slot(program: &Program, name: &str) -> usize {
    program.find_identifier(name).unwrap()
}

fn link(rt: &mut Runtime, from: ObjectId, to: ObjectId) {
    rt.catch(|rt| rt.set_arrow(from, &Value::string("next"), Value::Object(to)))
        .unwrap()
        .unwrap();
}

fn cycle(rt: &mut Runtime, program: &Arc<Program>) -> (ObjectId, ObjectId) {
    let (a, b) = rt
        .catch(|rt| Ok((rt.clone_object(program, &[])?, rt.clone_object(program, &[])?)))
        .unwrap()
        .unwrap();
    link(rt, a, b);
    link(rt, b, a);
    (a, b)
}

#[test]
fn test_gc_collects_isolated_cycle() {
    init_logger();
    let destroyed = Arc::new(AtomicUsize::new(0));
    let program = node_program("node", &destroyed).finish().unwrap();
    let mut rt = Runtime::new();

    let (a, b) = cycle(&mut rt, &program);
    rt.release_reference(a);
    rt.release_reference(b);
    assert_eq!(rt.registry().live_len(), 2);

    let freed = rt.collect().unwrap();

    assert_eq!(freed, 2);
    assert_eq!(destroyed.load(Ordering::SeqCst), 2);
    assert!(!rt.exists(a));
    assert!(!rt.exists(b));
    assert_eq!(rt.registry().len(), 0);
    assert_eq!(rt.gc_stats().collections, 1);
    assert_eq!(rt.gc_stats().cycles_found, 1);
}

#[test]
fn test_gc_preserves_referenced_cycle() {
    init_logger();
    let destroyed = Arc::new(AtomicUsize::new(0));
    let program = node_program("node", &destroyed).finish().unwrap();
    let mut rt = Runtime::new();

    let (a, b) = cycle(&mut rt, &program);
    // Keep the caller's reference to `a` only.
    rt.release_reference(b);

    let freed = rt.collect().unwrap();

    assert_eq!(freed, 0);
    assert_eq!(destroyed.load(Ordering::SeqCst), 0);
    assert!(!rt.is_destructed(a));
    assert!(!rt.is_destructed(b));
    assert_eq!(rt.gc_stats().marked, 2);

    // Dropping the last outside reference makes the pair collectable.
    rt.release_reference(a);
    assert_eq!(rt.collect().unwrap(), 2);
    assert_eq!(destroyed.load(Ordering::SeqCst), 2);
}

#[test]
fn test_gc_preserves_cycle_reached_through_root() {
    let destroyed = Arc::new(AtomicUsize::new(0));
    let program = node_program("node", &destroyed).finish().unwrap();
    let mut rt = Runtime::new();

    let root = rt.catch(|rt| rt.clone_object(&program, &[])).unwrap().unwrap();
    let (a, b) = cycle(&mut rt, &program);
    link(&mut rt, root, a);
    rt.release_reference(a);
    rt.release_reference(b);

    assert_eq!(rt.collect().unwrap(), 0);
    assert_eq!(rt.registry().live_len(), 3);
}

#[test]
fn test_gc_nulls_weak_reference_to_collected_object() {
    init_logger();
    let destroyed = Arc::new(AtomicUsize::new(0));
    let program = node_program("node", &destroyed).finish().unwrap();
    let peer = slot(&program, "peer");
    let mut rt = Runtime::new();

    let watcher = rt.catch(|rt| rt.clone_object(&program, &[])).unwrap().unwrap();
    let (a, b) = cycle(&mut rt, &program);
    rt.catch(|rt| rt.set_variable(watcher, peer, Value::Object(a)))
        .unwrap()
        .unwrap();
    rt.release_reference(a);
    rt.release_reference(b);

    // The weak slot is not a root.
    assert_eq!(rt.collect().unwrap(), 2);

    let read = rt.catch(|rt| rt.get_variable(watcher, peer)).unwrap().unwrap();
    assert_eq!(read, Value::Undefined);
    let cell_index = program.identifier(peer).unwrap().cell.unwrap();
    let cell = rt.storage(watcher).unwrap().cell(cell_index).unwrap();
    assert_eq!(cell.weak_ref(), None);
}

#[test]
fn test_gc_resurrection_keeps_candidates_alive() {
    init_logger();
    let destroyed = Arc::new(AtomicUsize::new(0));
    let keeper_slot: Arc<Mutex<Option<(ObjectId, usize)>>> = Arc::new(Mutex::new(None));

    let keeper_program = ProgramBuilder::new("keeper")
        .variable("saved", VarType::Mixed)
        .finish()
        .unwrap();
    let plain = node_program("node", &destroyed).finish().unwrap();

    let counter = destroyed.clone();
    let target = keeper_slot.clone();
    let phoenix = ProgramBuilder::new("phoenix")
        .inherit(&plain)
        .function("destroy", move |rt, this, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            let Some((keeper, saved)) = *target.lock() else {
                return Ok(Value::Undefined);
            };
            rt.set_variable(keeper, saved, Value::Object(this))?;
            Ok(Value::Undefined)
        })
        .finish()
        .unwrap();

    let mut rt = Runtime::new();
    let keeper = rt
        .catch(|rt| rt.clone_object(&keeper_program, &[]))
        .unwrap()
        .unwrap();
    let saved = slot(&keeper_program, "saved");
    *keeper_slot.lock() = Some((keeper, saved));

    let (a, b) = rt
        .catch(|rt| Ok((rt.clone_object(&phoenix, &[])?, rt.clone_object(&plain, &[])?)))
        .unwrap()
        .unwrap();
    link(&mut rt, a, b);
    link(&mut rt, b, a);
    rt.release_reference(a);
    rt.release_reference(b);

    // `a` stores itself in the keeper; `b` survives through `a`.
    assert_eq!(rt.collect().unwrap(), 0);
    assert_eq!(destroyed.load(Ordering::SeqCst), 2);
    assert!(!rt.is_destructed(a));
    assert!(!rt.is_destructed(b));
    assert_eq!(rt.gc_stats().survivors, 2);

    // Once the keeper lets go the pair is collected without a second destroy.
    *keeper_slot.lock() = None;
    rt.catch(|rt| rt.set_variable(keeper, saved, Value::Undefined))
        .unwrap()
        .unwrap();
    assert_eq!(rt.collect().unwrap(), 2);
    assert_eq!(destroyed.load(Ordering::SeqCst), 2);
    assert!(!rt.exists(a));
    assert!(!rt.exists(b));
}

#[test]
fn test_zero_count_during_analysis_is_parked() {
    init_logger();
    let destroyed = Arc::new(AtomicUsize::new(0));
    let immediate = node_program("immediate", &destroyed)
        .destruct_immediate()
        .finish()
        .unwrap();
    let deferred = node_program("deferred", &destroyed).finish().unwrap();
    let mut rt = Runtime::new();

    let (x, y) = rt
        .catch(|rt| Ok((rt.clone_object(&immediate, &[])?, rt.clone_object(&deferred, &[])?)))
        .unwrap()
        .unwrap();

    rt.run_check_pass().unwrap();
    rt.release_reference(x);
    rt.release_reference(y);

    // Left in place while the graph is analyzed.
    let passes: [fn(&mut Runtime) -> Result<(), GcError>; 2] =
        [Runtime::run_mark_pass, Runtime::run_cycle_check_pass];
    for pass in passes {
        pass(&mut rt).unwrap();
        assert!(rt.exists(x));
        assert!(rt.exists(y));
        assert!(!rt.is_destructed(x));
        assert_eq!(destroyed.load(Ordering::SeqCst), 0);
    }
    assert_eq!(rt.pending_destructions(), 0);

    // Ordinary zero-count handling, not collector candidates.
    assert_eq!(rt.run_free_pass().unwrap(), 0);
    assert_eq!(destroyed.load(Ordering::SeqCst), 2);
    assert!(!rt.exists(x));
    assert!(!rt.exists(y));
    assert_eq!(rt.gc_phase(), GcPhase::Idle);
    assert_eq!(rt.idle_callback_count(), 0);
}

#[test]
fn test_gc_sees_native_references() {
    struct Holder;

    impl ContextHooks for Holder {
        fn exit(&self, cx: &mut HookCx<'_>) {
            if let Some(held) = cx.take_native::<ObjectId>() {
                cx.runtime().release_reference(held);
            }
        }

        fn gc_recurse(
            &self,
            native: Option<&(dyn Any + Send + 'static)>,
            visit: &mut dyn FnMut(ObjectId),
        ) {
            if let Some(held) = native.and_then(|n| n.downcast_ref::<ObjectId>()) {
                visit(*held);
            }
        }

        fn gc_check(
            &self,
            native: Option<&(dyn Any + Send + 'static)>,
            visit: &mut dyn FnMut(ObjectId),
        ) {
            self.gc_recurse(native, visit);
        }
    }

    let destroyed = Arc::new(AtomicUsize::new(0));
    let node = node_program("node", &destroyed).finish().unwrap();
    let holder = ProgramBuilder::new("holder")
        .hooks(Arc::new(Holder))
        .function("hold", |rt, this, args| -> RuntimeResult<Value> {
            if let Some(target) = args.first().and_then(Value::as_object) {
                rt.add_ref(target);
                if let Some(storage) = rt.storage_mut(this) {
                    storage.set_native(0, Box::new(target));
                }
            }
            Ok(Value::Undefined)
        })
        .finish()
        .unwrap();
    let mut rt = Runtime::new();

    // holder --native--> n --next--> holder
    let (h, n) = rt
        .catch(|rt| {
            let h = rt.clone_object(&holder, &[])?;
            let n = rt.clone_object(&node, &[])?;
            rt.call_method(h, "hold", &[Value::Object(n)])?;
            Ok((h, n))
        })
        .unwrap()
        .unwrap();
    link(&mut rt, n, h);
    rt.release_reference(h);
    rt.release_reference(n);

    assert_eq!(rt.collect().unwrap(), 2);
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(rt.registry().len(), 0);
}

#[test]
fn test_should_collect_after_threshold() {
    let options = RuntimeOptions {
        gc_threshold: 3,
        ..RuntimeOptions::default()
    };
    let mut rt = Runtime::with_options(options);
    let program = ProgramBuilder::new("p").finish().unwrap();

    for _ in 0..2 {
        rt.catch(|rt| rt.clone_object(&program, &[])).unwrap().unwrap();
    }
    assert!(!rt.should_collect());
    rt.catch(|rt| rt.clone_object(&program, &[])).unwrap().unwrap();
    assert!(rt.should_collect());

    rt.collect().unwrap();
    assert!(!rt.should_collect());
}

#[test]
#[should_panic(expected = "fatal: destroy called")]
fn test_destroy_during_analysis_is_fatal() {
    let options = RuntimeOptions::default().with_fatal_hook(|error| panic!("fatal: {}", error));
    let mut rt = Runtime::with_options(options);
    let destroyed = Arc::new(AtomicUsize::new(0));
    let program = node_program("node", &destroyed).finish().unwrap();
    let id = rt.catch(|rt| rt.clone_object(&program, &[])).unwrap().unwrap();

    rt.run_check_pass().unwrap();
    rt.run_mark_pass().unwrap();
    rt.destruct(id);
}
