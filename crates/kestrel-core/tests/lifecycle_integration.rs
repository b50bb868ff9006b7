//! Integration tests for the object lifecycle
//!
//! Tests cover:
//! - Constructor and hook ordering across inherited contexts
//! - Rollback of failed instantiation
//! - Deferred destruction through the idle callback
//! - Destruction cascades queued while flushing
//! - Immediate destruction and resurrection
//! - Shutdown with native modules
//! - Sharing a runtime between threads

use kestrel_core::{
    ContextHooks, HookCx, InterpreterLock, NativeModule, ObjectId, Program, ProgramBuilder,
    Runtime, RuntimeError, RuntimeResult, Value, VarType,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

type Journal = Arc<Mutex<Vec<String>>>;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

fn new_object(rt: &mut Runtime, program: &Arc<Program>) -> ObjectId {
    rt.catch(|rt| rt.clone_object(program, &[])).unwrap().unwrap()
}

/// Program whose `destroy` writes its name to the journal
fn logged(name: &str, log: &Journal) -> ProgramBuilder {
    let log = log.clone();
    let label = name.to_string();
    ProgramBuilder::new(name)
        .variable("child", VarType::Object)
        .function("destroy", move |_, _, _| {
            log.lock().push(format!("destroy {}", label));
            Ok(Value::Undefined)
        })
}

struct Tracer {
    name: &'static str,
    log: Journal,
    fail_init: bool,
}

impl ContextHooks for Tracer {
    fn init(&self, cx: &mut HookCx<'_>) -> RuntimeResult<()> {
        self.log.lock().push(format!("init {}", self.name));
        if self.fail_init {
            let rt = cx.runtime();
            return Err(rt.raise(RuntimeError::Custom(format!("{} refused", self.name))));
        }
        Ok(())
    }

    fn exit(&self, _cx: &mut HookCx<'_>) {
        self.log.lock().push(format!("exit {}", self.name));
    }
}

fn traced(name: &'static str, log: &Journal, fail_init: bool) -> ProgramBuilder {
    let initializer_log = log.clone();
    ProgramBuilder::new(name)
        .hooks(Arc::new(Tracer {
            name,
            log: log.clone(),
            fail_init,
        }))
        .function("__INIT", move |_, _, _| {
            initializer_log.lock().push(format!("__INIT {}", name));
            Ok(Value::Undefined)
        })
}

#[test]
fn test_construction_order_base_first() {
    init_logger();
    let log = journal();
    let base = traced("base", &log, false).finish().unwrap();
    let create_log = log.clone();
    let derived = traced("derived", &log, false)
        .inherit(&base)
        .function("create", move |_, _, args| {
            create_log.lock().push(format!("create {}", args.len()));
            Ok(Value::Undefined)
        })
        .finish()
        .unwrap();
    let mut rt = Runtime::new();

    let id = rt
        .catch(|rt| rt.clone_object(&derived, &[Value::Int(1), Value::Int(2)]))
        .unwrap()
        .unwrap();
    rt.destruct(id);

    assert_eq!(
        *log.lock(),
        vec![
            "init base",
            "init derived",
            "__INIT base",
            "__INIT derived",
            "create 2",
            "exit base",
            "exit derived",
        ]
    );
}

#[test]
fn test_failed_init_hook_rolls_back() {
    init_logger();
    let log = journal();
    let base = traced("base", &log, false).finish().unwrap();
    let derived = traced("derived", &log, true).inherit(&base).finish().unwrap();
    let mut rt = Runtime::new();

    let thrown = rt
        .catch(|rt| rt.clone_object(&derived, &[]))
        .unwrap()
        .unwrap_err();

    assert_eq!(thrown.message(), "derived refused");
    assert_eq!(rt.registry().len(), 0);
    assert_eq!(
        *log.lock(),
        vec!["init base", "init derived", "exit base", "exit derived"]
    );
}

#[test]
fn test_release_defers_until_idle() {
    init_logger();
    let log = journal();
    let program = logged("lazy", &log).finish().unwrap();
    let mut rt = Runtime::new();
    let id = new_object(&mut rt, &program);

    rt.release_reference(id);

    assert_eq!(rt.pending_destructions(), 1);
    assert!(!rt.is_destructed(id));
    assert!(log.lock().is_empty());
    assert_eq!(rt.idle_callback_count(), 1);

    rt.run_idle_callbacks();

    assert_eq!(*log.lock(), vec!["destroy lazy"]);
    assert_eq!(rt.pending_destructions(), 0);
    assert!(!rt.exists(id));
    assert_eq!(rt.idle_callback_count(), 0);
}

#[test]
fn test_flush_handles_objects_queued_by_destruction() {
    init_logger();
    let log = journal();
    let outer = logged("outer", &log).finish().unwrap();
    let inner = logged("inner", &log).finish().unwrap();
    let mut rt = Runtime::new();
    let a = new_object(&mut rt, &outer);
    let b = new_object(&mut rt, &inner);

    rt.catch(|rt| rt.set_arrow(a, &Value::string("child"), Value::Object(b)))
        .unwrap()
        .unwrap();
    rt.release_reference(b);
    rt.release_reference(a);
    assert_eq!(rt.pending_destructions(), 1);

    rt.run_idle_callbacks();

    assert_eq!(*log.lock(), vec!["destroy outer", "destroy inner"]);
    assert!(!rt.exists(a));
    assert!(!rt.exists(b));
    assert_eq!(rt.pending_destructions(), 0);
    assert_eq!(rt.idle_callback_count(), 0);
    assert!(rt.registry().verify_links().is_ok());
}

#[test]
fn test_pending_object_is_not_handed_out_or_destroyed_while_held() {
    init_logger();
    let log = journal();
    let target = logged("target", &log).finish().unwrap();
    let holder = ProgramBuilder::new("holder")
        .variable("weak", VarType::WeakObject)
        .variable("strong", VarType::Object)
        .finish()
        .unwrap();
    let mut rt = Runtime::new();
    let h = new_object(&mut rt, &holder);
    let t = new_object(&mut rt, &target);
    rt.catch(|rt| rt.set_arrow(h, &Value::string("weak"), Value::Object(t)))
        .unwrap()
        .unwrap();

    rt.release_reference(t);
    assert_eq!(rt.pending_destructions(), 1);
    assert_eq!(rt.refs(t), 0);

    // Weak reads do not revive an object waiting for destruction.
    let seen = rt
        .catch(|rt| rt.arrow(h, &Value::string("weak")))
        .unwrap()
        .unwrap();
    assert_eq!(seen, Value::Undefined);

    // A stale handle that takes a reference keeps the object alive.
    rt.catch(|rt| rt.set_arrow(h, &Value::string("strong"), Value::Object(t)))
        .unwrap()
        .unwrap();
    assert_eq!(rt.refs(t), 1);
    rt.run_idle_callbacks();

    assert!(log.lock().is_empty());
    assert!(!rt.is_destructed(t));
    assert_eq!(rt.refs(t), 1);
    assert_eq!(rt.pending_destructions(), 0);
    assert!(rt.registry().live_ids().contains(&t));
    assert!(rt.registry().verify_links().is_ok());
    assert_eq!(
        rt.catch(|rt| rt.arrow(h, &Value::string("weak"))).unwrap().unwrap(),
        Value::Object(t)
    );

    // Dropping the last reference queues it again as usual.
    rt.catch(|rt| rt.set_arrow(h, &Value::string("strong"), Value::Undefined))
        .unwrap()
        .unwrap();
    assert_eq!(rt.pending_destructions(), 1);
    rt.run_idle_callbacks();
    assert_eq!(*log.lock(), vec!["destroy target"]);
    assert!(!rt.exists(t));
}

#[test]
fn test_destruct_immediate_skips_pending_list() {
    let log = journal();
    let program = logged("eager", &log).destruct_immediate().finish().unwrap();
    let mut rt = Runtime::new();
    let id = new_object(&mut rt, &program);

    rt.release_reference(id);

    assert_eq!(*log.lock(), vec!["destroy eager"]);
    assert!(!rt.exists(id));
    assert_eq!(rt.pending_destructions(), 0);
    assert_eq!(rt.idle_callback_count(), 0);
}

#[test]
fn test_destroy_can_resurrect_immediate_object() {
    let keeper_program = ProgramBuilder::new("keeper")
        .variable("kept", VarType::Mixed)
        .finish()
        .unwrap();
    let keeper: Arc<Mutex<Option<ObjectId>>> = Arc::new(Mutex::new(None));
    let destroyed = Arc::new(AtomicUsize::new(0));
    let (seen, count) = (keeper.clone(), destroyed.clone());
    let phoenix = ProgramBuilder::new("phoenix")
        .destruct_immediate()
        .function("destroy", move |rt, this, _| {
            count.fetch_add(1, Ordering::SeqCst);
            let keeper = *seen.lock();
            if let Some(keeper) = keeper {
                rt.set_arrow(keeper, &Value::string("kept"), Value::Object(this))?;
            }
            Ok(Value::Undefined)
        })
        .finish()
        .unwrap();
    let mut rt = Runtime::new();
    let k = new_object(&mut rt, &keeper_program);
    *keeper.lock() = Some(k);
    let id = new_object(&mut rt, &phoenix);

    rt.release_reference(id);

    // Destructed, but still referenced from the keeper.
    assert!(rt.exists(id));
    assert!(rt.is_destructed(id));
    assert_eq!(rt.refs(id), 1);

    rt.catch(|rt| rt.set_arrow(k, &Value::string("kept"), Value::Undefined))
        .unwrap()
        .unwrap();
    assert!(!rt.exists(id));
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
}

struct Registrar {
    log: Journal,
}

impl NativeModule for Registrar {
    fn name(&self) -> &str {
        "registrar"
    }

    fn init(&mut self, _runtime: &mut Runtime) -> RuntimeResult<()> {
        self.log.lock().push("module init".to_string());
        Ok(())
    }

    fn exit(&mut self, runtime: &mut Runtime) {
        self.log
            .lock()
            .push(format!("module exit ({} live)", runtime.registry().live_len()));
    }
}

#[test]
fn test_shutdown_destroys_everything() {
    init_logger();
    let log = journal();
    let regular = logged("regular", &log).finish().unwrap();
    let sticky = logged("sticky", &log).no_explicit_destruct().finish().unwrap();
    let stacked = logged("stacked", &log).finish().unwrap();
    let mut rt = Runtime::new();
    rt.catch(|rt| rt.load_module(Box::new(Registrar { log: log.clone() })))
        .unwrap()
        .unwrap();

    let r = new_object(&mut rt, &regular);
    let s = new_object(&mut rt, &sticky);
    let on_stack = new_object(&mut rt, &stacked);
    rt.catch(|rt| rt.push_value(Value::Object(on_stack)))
        .unwrap()
        .unwrap();

    rt.shutdown();

    let entries = log.lock().clone();
    assert_eq!(entries.first().map(String::as_str), Some("module init"));
    assert_eq!(entries.last().map(String::as_str), Some("module exit (2 live)"));
    for name in ["regular", "sticky", "stacked"] {
        let line = format!("destroy {}", name);
        assert_eq!(entries.iter().filter(|entry| **entry == line).count(), 1);
    }

    assert!(rt.is_destructed(r));
    assert!(!rt.is_destructed(s));
    assert!(rt.object(s).unwrap().destroy_called());
    assert!(!rt.exists(on_stack));
    assert_eq!(rt.value_depth(), 0);
    assert!(rt.module_names().is_empty());
}

#[test]
fn test_threads_share_runtime_through_lock() {
    init_logger();
    let destroyed = Arc::new(AtomicUsize::new(0));
    let count = destroyed.clone();
    let program = ProgramBuilder::new("shared")
        .function("destroy", move |_, _, _| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Undefined)
        })
        .finish()
        .unwrap();
    let lock = Arc::new(InterpreterLock::new(Runtime::new()));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let lock = lock.clone();
            let program = program.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    let mut rt = lock.enter();
                    let id = rt
                        .catch(|rt| rt.clone_object(&program, &[]))
                        .unwrap()
                        .unwrap();
                    rt.release_reference(id);
                    InterpreterLock::allow_threads(&mut rt, thread::yield_now);
                    rt.run_idle_callbacks();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let rt = Arc::try_unwrap(lock).ok().unwrap().into_inner();
    assert_eq!(destroyed.load(Ordering::SeqCst), 100);
    assert_eq!(rt.registry().len(), 0);
}
