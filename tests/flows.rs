use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use flowvisor::{
    Argument, Escalation, EscalationMatcher, FlowCallback, FlowError, FunctionSpec, Kernel, KernelBuilder,
    KernelConfig, PassiveTeam, WorkerTeam,
};
use parking_lot::Mutex;

fn passive() -> KernelBuilder {
    Kernel::builder(KernelConfig::default()).team("main", PassiveTeam::new())
}

#[test]
fn test_parallel_flow_receives_argument() {
    let stored = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&stored);

    let kernel = Kernel::builder(KernelConfig::default())
        .team("workers", WorkerTeam::new("workers", 2, 16))
        .function(
            FunctionSpec::new("entry", "workers", |ctx| {
                ctx.spawn_flow(0, Argument::new(10usize), None)?;
                Ok(())
            })
            .flow("store"),
        )
        .function(FunctionSpec::new("store", "workers", move |ctx| {
            let value = ctx.argument().get::<usize>().copied().unwrap_or_default();
            sink.store(value, Ordering::SeqCst);
            Ok(())
        }))
        .build()
        .unwrap();

    let handle = kernel.invoke_process("entry", Argument::none()).unwrap();
    assert!(handle.wait().is_ok());
    assert_eq!(stored.load(Ordering::SeqCst), 10);
}

#[test]
fn test_sub_flows_run_in_order_before_next() {
    let trace = Arc::new(Mutex::new(Vec::<String>::new()));
    let (t1, t2, t3) = (Arc::clone(&trace), Arc::clone(&trace), Arc::clone(&trace));

    let kernel = passive()
        .function(
            FunctionSpec::new("entry", "main", move |ctx| {
                t1.lock().push("entry".into());
                ctx.sub_flow(0, Argument::new("a"), None)?;
                ctx.sub_flow(0, Argument::new("b"), None)?;
                ctx.next(Argument::new(3u8))?;
                Ok(())
            })
            .flow("step")
            .next("done"),
        )
        .function(FunctionSpec::new("step", "main", move |ctx| {
            let label = ctx.argument().get::<&str>().copied().unwrap_or("?");
            t2.lock().push(label.to_string());
            Ok(())
        }))
        .function(FunctionSpec::new("done", "main", move |ctx| {
            let n = ctx.argument().get::<u8>().copied().unwrap_or_default();
            t3.lock().push(format!("done:{n}"));
            Ok(())
        }))
        .build()
        .unwrap();

    let handle = kernel.invoke_process("entry", Argument::none()).unwrap();
    assert!(handle.outcome().unwrap().is_ok());
    assert_eq!(*trace.lock(), vec!["entry", "a", "b", "done:3"]);
}

#[test]
fn test_next_without_declaration_is_rejected() {
    let kernel = passive()
        .function(FunctionSpec::new("lonely", "main", |ctx| {
            let err = ctx.next(Argument::none()).unwrap_err();
            assert!(matches!(err, FlowError::NoNext { .. }));
            let err = ctx.sub_flow(3, Argument::none(), None).unwrap_err();
            assert!(matches!(err, FlowError::UnknownFlow { index: 3, .. }));
            Ok(())
        }))
        .build()
        .unwrap();

    let handle = kernel.invoke_process("lonely", Argument::none()).unwrap();
    assert!(handle.outcome().unwrap().is_ok());
}

#[test]
fn test_sub_flow_failure_reaches_callback_then_invoker_once() {
    let callback_calls = Arc::new(AtomicUsize::new(0));
    let handler_calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&callback_calls);
    let recovered = Arc::clone(&handler_calls);

    let kernel = passive()
        .function(
            FunctionSpec::new("entry", "main", move |ctx| {
                let seen = Arc::clone(&seen);
                let callback = FlowCallback::new(move |failure| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    match failure {
                        Some(escalation) => Err(escalation),
                        None => Ok(()),
                    }
                });
                ctx.sub_flow(0, Argument::none(), Some(callback))?;
                Ok(())
            })
            .flow("failing")
            .handle(EscalationMatcher::Failure, "recover"),
        )
        .function(FunctionSpec::new("failing", "main", |_| anyhow::bail!("boom")))
        .function(FunctionSpec::new("recover", "main", move |ctx| {
            let escalation = ctx.escalation().expect("handler receives the escalation");
            assert_eq!(escalation.to_string(), "boom");
            recovered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .build()
        .unwrap();

    let handle = kernel.invoke_process("entry", Argument::none()).unwrap();
    assert!(handle.outcome().unwrap().is_ok());
    assert_eq!(callback_calls.load(Ordering::SeqCst), 1);
    assert_eq!(handler_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_callback_handles_sub_flow_failure_and_flow_continues() {
    let after = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&after);

    let kernel = passive()
        .function(
            FunctionSpec::new("entry", "main", |ctx| {
                ctx.sub_flow(0, Argument::none(), Some(FlowCallback::ignore()))?;
                Ok(())
            })
            .flow("failing")
            .next("after"),
        )
        .function(FunctionSpec::new("failing", "main", |_| anyhow::bail!("swallowed")))
        .function(FunctionSpec::new("after", "main", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .build()
        .unwrap();

    let handle = kernel.invoke_process("entry", Argument::none()).unwrap();
    assert!(handle.outcome().unwrap().is_ok());
    assert_eq!(after.load(Ordering::SeqCst), 1);
}

#[test]
fn test_handler_rethrow_moves_one_level_up() {
    let thread_level = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = Arc::clone(&thread_level);

    let kernel = passive()
        .function(
            FunctionSpec::new("entry", "main", |_| anyhow::bail!("boom")).handle(EscalationMatcher::Any, "rethrow"),
        )
        .function(FunctionSpec::new("rethrow", "main", |ctx| {
            let escalation = ctx.escalation().cloned().expect("handler receives the escalation");
            Err(escalation.into())
        }))
        .function(FunctionSpec::new("thread_handler", "main", move |ctx| {
            let escalation = ctx.escalation().expect("handler receives the escalation");
            sink.lock().push(escalation.to_string());
            Ok(())
        }))
        .thread_escalation(EscalationMatcher::Any, "thread_handler")
        .build()
        .unwrap();

    let handle = kernel.invoke_process("entry", Argument::none()).unwrap();
    assert!(handle.outcome().unwrap().is_ok());
    assert_eq!(*thread_level.lock(), vec!["boom"]);
}

#[test]
fn test_runtime_handler_recovers() {
    let kernel = passive()
        .function(
            FunctionSpec::new("entry", "main", |ctx| {
                ctx.on_escalation(EscalationMatcher::Failure, |_| Ok(()));
                ctx.sub_flow(0, Argument::none(), None)?;
                Ok(())
            })
            .flow("failing"),
        )
        .function(FunctionSpec::new("failing", "main", |_| anyhow::bail!("local")))
        .build()
        .unwrap();

    let handle = kernel.invoke_process("entry", Argument::none()).unwrap();
    assert!(handle.outcome().unwrap().is_ok());
}

#[test]
fn test_unhandled_failure_reaches_completion_callback() {
    let (tx, rx) = std::sync::mpsc::channel();
    let kernel = passive()
        .function(FunctionSpec::new("entry", "main", |_| anyhow::bail!("nobody handles this")))
        .build()
        .unwrap();

    let handle = kernel
        .invoke(flowvisor::Invocation::new("entry").on_complete(move |failure| {
            let _ = tx.send(failure.map(|e| e.to_string()));
        }))
        .unwrap();

    let outcome = handle.outcome().unwrap();
    assert!(matches!(outcome, Err(Escalation::Failure { .. })));
    assert_eq!(rx.recv().unwrap().as_deref(), Some("nobody handles this"));
}

#[test]
fn test_process_handler_precedence() {
    let kernel_level = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&kernel_level);

    let kernel = passive()
        .function(FunctionSpec::new("entry", "main", |_| anyhow::bail!("boom")))
        .process_escalation(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build()
        .unwrap();

    let handle = kernel.invoke_process("entry", Argument::none()).unwrap();
    assert!(handle.outcome().unwrap().is_ok());
    assert_eq!(kernel_level.load(Ordering::SeqCst), 1);

    let handle = kernel
        .invoke(flowvisor::Invocation::new("entry").with_escalation_handler(|e| Err(e.clone())))
        .unwrap();
    assert!(matches!(handle.outcome().unwrap(), Err(Escalation::Failure { .. })));
    assert_eq!(kernel_level.load(Ordering::SeqCst), 1);
}

#[test]
fn test_panicking_function_escalates() {
    let kernel = passive()
        .function(FunctionSpec::new("entry", "main", |_| panic!("kaboom")))
        .build()
        .unwrap();

    let handle = kernel.invoke_process("entry", Argument::none()).unwrap();
    match handle.outcome().unwrap() {
        Err(Escalation::Panicked { function, message }) => {
            assert_eq!(&*function, "entry");
            assert_eq!(&*message, "kaboom");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}
