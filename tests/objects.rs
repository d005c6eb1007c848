use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use flowvisor::{
    Argument, AsyncContext, Escalation, FunctionContext, FunctionSpec, Kernel, KernelBuilder, KernelConfig, ObjectSpec, PassiveTeam,
    Scope, SourceContext, SourceFn, Sourced,
};
use parking_lot::Mutex;

fn passive() -> KernelBuilder {
    let cfg = KernelConfig {
        monitor_interval: Duration::from_millis(5),
        ..KernelConfig::default()
    };
    Kernel::builder(cfg).team("main", PassiveTeam::new())
}

/// Source that numbers every instance it creates.
fn numbered(counter: &Arc<AtomicUsize>) -> SourceFn<impl Fn(&SourceContext) -> anyhow::Result<Sourced> + Send + Sync + 'static> {
    let counter = Arc::clone(counter);
    SourceFn::new(move |_| Ok(Sourced::ready(counter.fetch_add(1, Ordering::SeqCst))))
}

type Rows = Arc<Mutex<Vec<(u64, usize, usize, usize)>>>;

/// Records the thread id and the function, thread and process scoped instances.
fn record(rows: &Rows) -> impl Fn(&mut FunctionContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static {
    let rows = Arc::clone(rows);
    move |ctx| {
        let row = (
            ctx.thread_id().get(),
            *ctx.object::<usize>(0)?,
            *ctx.object::<usize>(1)?,
            *ctx.object::<usize>(2)?,
        );
        rows.lock().push(row);
        Ok(())
    }
}

#[test]
fn test_async_sourcing_parks_and_resumes() {
    let seen = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&seen);

    let kernel = passive()
        .object(ObjectSpec::new(
            "remote",
            Scope::Process,
            SourceFn::new(|ctx| {
                let async_ctx = ctx.async_context();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(20));
                    async_ctx.loaded(Arc::new(42usize));
                });
                Ok(Sourced::Pending)
            }),
        ))
        .function(
            FunctionSpec::new("use_remote", "main", move |ctx| {
                sink.store(*ctx.object::<usize>(0)?, Ordering::SeqCst);
                Ok(())
            })
            .object("remote"),
        )
        .build()
        .unwrap();

    let handle = kernel.invoke_process("use_remote", Argument::none()).unwrap();
    assert!(handle.wait().is_ok());
    assert_eq!(seen.load(Ordering::SeqCst), 42);
}

#[test]
fn test_pending_object_times_out() {
    let entered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&entered);

    let kernel = passive()
        .object(
            ObjectSpec::new("never", Scope::Process, SourceFn::new(|_| Ok(Sourced::Pending)))
                .with_timeout(Duration::from_millis(30)),
        )
        .function(
            FunctionSpec::new("blocked", "main", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .object("never"),
        )
        .build()
        .unwrap();

    let handle = kernel.invoke_process("blocked", Argument::none()).unwrap();
    match handle.wait() {
        Err(Escalation::Timeout { object, timeout }) => {
            assert_eq!(&*object, "never");
            assert_eq!(timeout, Duration::from_millis(30));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(entered.load(Ordering::SeqCst), 0);
}

#[test]
fn test_sourcing_failure_escalates() {
    let kernel = passive()
        .object(ObjectSpec::new(
            "db",
            Scope::Process,
            SourceFn::new(|_| anyhow::bail!("connection refused")),
        ))
        .function(FunctionSpec::new("query", "main", |_| Ok(())).object("db"))
        .build()
        .unwrap();

    let handle = kernel.invoke_process("query", Argument::none()).unwrap();
    match handle.outcome().unwrap() {
        Err(Escalation::Sourcing { object, .. }) => assert_eq!(&*object, "db"),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

/// Object carrying its own completion handle, like a socket with I/O in flight.
struct Socket {
    io: AsyncContext,
}

fn socket_source() -> SourceFn<impl Fn(&SourceContext) -> anyhow::Result<Sourced> + Send + Sync + 'static> {
    SourceFn::new(|ctx| {
        Ok(Sourced::ready(Socket {
            io: ctx.async_context(),
        }))
    })
}

#[test]
fn test_pending_operation_parks_next_function_until_complete() {
    let completed = Arc::new(AtomicBool::new(false));
    let observed = Arc::new(AtomicBool::new(false));
    let (done, seen) = (Arc::clone(&completed), Arc::clone(&observed));

    let kernel = passive()
        .object(ObjectSpec::new("socket", Scope::Process, socket_source()))
        .function(
            FunctionSpec::new("write", "main", move |ctx| {
                let io = ctx.object::<Socket>(0)?.io.clone();
                anyhow::ensure!(io.start_operation(), "socket was not loaded");
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(20));
                    done.store(true, Ordering::SeqCst);
                    io.complete_operation(Ok(()));
                });
                Ok(())
            })
            .object("socket")
            .next("read"),
        )
        .function(
            FunctionSpec::new("read", "main", move |ctx| {
                ctx.object::<Socket>(0)?;
                seen.store(completed.load(Ordering::SeqCst), Ordering::SeqCst);
                Ok(())
            })
            .object("socket"),
        )
        .build()
        .unwrap();

    let handle = kernel.invoke_process("write", Argument::none()).unwrap();
    assert!(handle.wait().is_ok());
    assert!(observed.load(Ordering::SeqCst), "read ran before the operation completed");
}

#[test]
fn test_failed_operation_escalates_to_parked_function() {
    let entered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&entered);

    let kernel = passive()
        .object(ObjectSpec::new("socket", Scope::Process, socket_source()))
        .function(
            FunctionSpec::new("write", "main", |ctx| {
                let io = ctx.object::<Socket>(0)?.io.clone();
                anyhow::ensure!(io.start_operation(), "socket was not loaded");
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(20));
                    io.complete_operation(Err(anyhow::anyhow!("peer reset")));
                });
                Ok(())
            })
            .object("socket")
            .next("read"),
        )
        .function(
            FunctionSpec::new("read", "main", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .object("socket"),
        )
        .build()
        .unwrap();

    let handle = kernel.invoke_process("write", Argument::none()).unwrap();
    match handle.wait() {
        Err(escalation @ Escalation::Failure { .. }) => assert_eq!(escalation.to_string(), "peer reset"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(entered.load(Ordering::SeqCst), 0);
}

#[test]
fn test_async_sourcing_failure_escalates_to_parked_function() {
    let kernel = passive()
        .object(ObjectSpec::new(
            "remote",
            Scope::Process,
            SourceFn::new(|ctx| {
                let async_ctx = ctx.async_context();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(20));
                    async_ctx.failed(anyhow::anyhow!("dns lookup failed"));
                });
                Ok(Sourced::Pending)
            }),
        ))
        .function(FunctionSpec::new("use_remote", "main", |_| Ok(())).object("remote"))
        .build()
        .unwrap();

    let handle = kernel.invoke_process("use_remote", Argument::none()).unwrap();
    match handle.wait() {
        Err(Escalation::Sourcing { object, error }) => {
            assert_eq!(&*object, "remote");
            assert_eq!(error.to_string(), "dns lookup failed");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn test_dependency_ready_before_dependent_sources() {
    let kernel = passive()
        .object(ObjectSpec::new(
            "pool",
            Scope::Process,
            SourceFn::new(|ctx| {
                let async_ctx = ctx.async_context();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(10));
                    async_ctx.loaded(Arc::new(String::from("pool-1")));
                });
                Ok(Sourced::Pending)
            }),
        ))
        .object(
            ObjectSpec::new(
                "session",
                Scope::Function,
                SourceFn::new(|ctx| {
                    let pool = ctx
                        .dependency::<String>(0)
                        .ok_or_else(|| anyhow::anyhow!("pool missing"))?;
                    Ok(Sourced::ready(format!("{pool}/session")))
                }),
            )
            .depends_on("pool"),
        )
        .function(
            FunctionSpec::new("handle", "main", |ctx| {
                assert_eq!(ctx.object::<String>(0)?, "pool-1/session");
                Ok(())
            })
            .object("session"),
        )
        .build()
        .unwrap();

    let handle = kernel.invoke_process("handle", Argument::none()).unwrap();
    assert!(handle.wait().is_ok());
}

#[test]
fn test_scope_isolation_across_spawned_threads() {
    let per_call = Arc::new(AtomicUsize::new(0));
    let per_thread = Arc::new(AtomicUsize::new(100));
    let per_process = Arc::new(AtomicUsize::new(1000));
    let rows: Rows = Arc::new(Mutex::new(Vec::new()));

    let kernel = passive()
        .object(ObjectSpec::new("scratch", Scope::Function, numbered(&per_call)))
        .object(ObjectSpec::new("session", Scope::Thread, numbered(&per_thread)))
        .object(ObjectSpec::new("config", Scope::Process, numbered(&per_process)))
        .function(
            FunctionSpec::new("entry", "main", |ctx| {
                ctx.spawn_flow(0, Argument::none(), None)?;
                ctx.spawn_flow(0, Argument::none(), None)?;
                Ok(())
            })
            .flow("worker"),
        )
        .function(
            FunctionSpec::new("worker", "main", record(&rows))
                .object("scratch")
                .object("session")
                .object("config")
                .next("tail"),
        )
        .function(
            FunctionSpec::new("tail", "main", record(&rows))
                .object("scratch")
                .object("session")
                .object("config"),
        )
        .build()
        .unwrap();

    let handle = kernel.invoke_process("entry", Argument::none()).unwrap();
    assert!(handle.outcome().unwrap().is_ok());

    let rows = rows.lock().clone();
    assert_eq!(rows.len(), 4);

    let mut scratch: Vec<usize> = rows.iter().map(|r| r.1).collect();
    scratch.sort_unstable();
    scratch.dedup();
    assert_eq!(scratch.len(), 4, "function scope is private to each call");

    for (thread, _, session, _) in &rows {
        for (other, _, other_session, _) in &rows {
            assert_eq!(thread == other, session == other_session);
        }
    }
    assert!(rows.iter().all(|r| r.3 == 1000), "process scope is shared");
    assert_eq!(per_process.load(Ordering::SeqCst), 1001);
    assert_eq!(per_thread.load(Ordering::SeqCst), 102);
}

#[test]
fn test_interested_parent_receives_child_recycle_failure() {
    let order = Arc::new(Mutex::new(Vec::<String>::new()));
    let offered = Arc::new(Mutex::new(Vec::<String>::new()));
    let (child_order, parent_order, parent_offered) = (Arc::clone(&order), Arc::clone(&order), Arc::clone(&offered));

    let kernel = passive()
        .object(
            ObjectSpec::new(
                "child",
                Scope::Process,
                SourceFn::new(|_| Ok(Sourced::ready(()))).with_recycle(move |_| {
                    child_order.lock().push("child".into());
                    anyhow::bail!("flush failed")
                }),
            )
            .with_type("buffer"),
        )
        .object(
            ObjectSpec::new(
                "parent",
                Scope::Process,
                SourceFn::new(|_| Ok(Sourced::ready(()))).with_recycle(move |ctx| {
                    parent_order.lock().push("parent".into());
                    let mut offered = parent_offered.lock();
                    offered.extend(ctx.cleanup_escalations().iter().map(|c| c.object().to_string()));
                    Ok(())
                }),
            )
            .depends_on("child")
            .cleanup_interest("buffer"),
        )
        .function(FunctionSpec::new("use_parent", "main", |_| Ok(())).object("parent"))
        .build()
        .unwrap();

    let handle = kernel.invoke_process("use_parent", Argument::none()).unwrap();
    assert!(handle.outcome().unwrap().is_ok(), "interested parent handled the failure");
    assert_eq!(*order.lock(), vec!["child", "parent"]);
    assert_eq!(*offered.lock(), vec!["child"]);
}

#[test]
fn test_unhandled_recycle_failure_reported_once() {
    let order = Arc::new(Mutex::new(Vec::<String>::new()));
    let (child_order, parent_order) = (Arc::clone(&order), Arc::clone(&order));

    let kernel = passive()
        .object(ObjectSpec::new(
            "child",
            Scope::Process,
            SourceFn::new(|_| Ok(Sourced::ready(()))).with_recycle(move |_| {
                child_order.lock().push("child".into());
                anyhow::bail!("flush failed")
            }),
        ))
        .object(
            ObjectSpec::new(
                "parent",
                Scope::Process,
                SourceFn::new(|_| Ok(Sourced::ready(()))).with_recycle(move |_| {
                    parent_order.lock().push("parent".into());
                    Ok(())
                }),
            )
            .depends_on("child"),
        )
        .function(FunctionSpec::new("use_parent", "main", |_| Ok(())).object("parent"))
        .build()
        .unwrap();

    let handle = kernel.invoke_process("use_parent", Argument::none()).unwrap();
    match handle.outcome().unwrap() {
        Err(Escalation::Cleanup { escalations }) => {
            assert_eq!(escalations.len(), 1);
            assert_eq!(escalations[0].object(), "child");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(*order.lock(), vec!["parent", "child"]);
}

#[test]
fn test_failed_process_still_recycles() {
    let recycled = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&recycled);

    let kernel = passive()
        .object(ObjectSpec::new(
            "conn",
            Scope::Process,
            SourceFn::new(|_| Ok(Sourced::ready(()))).with_recycle(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        ))
        .function(FunctionSpec::new("entry", "main", |_| anyhow::bail!("boom")).object("conn"))
        .build()
        .unwrap();

    let handle = kernel.invoke_process("entry", Argument::none()).unwrap();
    assert!(matches!(handle.outcome().unwrap(), Err(Escalation::Failure { .. })));
    assert_eq!(recycled.load(Ordering::SeqCst), 1);
}
