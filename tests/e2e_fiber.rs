//! Fiber surface end-to-end: mailboxes, joining, composed failure traces.

mod common;

use polyphony::{payload_as, receive, receive_pending, run, snooze, spin, suspend, Error, ErrorKind};
use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn messages_arrive_in_send_order() {
    common::init_logging();
    run(async {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let consumer = spin(async move {
            for _ in 0..3 {
                let message = receive().await?;
                sink.borrow_mut()
                    .push(payload_as::<&str>(&message).copied().unwrap_or(""));
            }
            Ok(())
        });

        consumer.send("one");
        consumer.send("two");
        &consumer << "three";

        suspend().await?;
        assert_eq!(*seen.borrow(), vec!["one", "two", "three"]);
        Ok(())
    })
    .expect("runtime");
}

#[test]
fn receive_suspends_until_a_message_arrives() {
    common::init_logging();
    run(async {
        let consumer = spin(async {
            let message = receive().await?;
            Ok(payload_as::<i32>(&message).copied().unwrap_or(0))
        });

        snooze().await?; // consumer parks in receive
        consumer.send(9_i32);
        suspend().await?;

        assert_eq!(
            consumer.result().and_then(|o| o.value_as::<i32>().copied()),
            Some(9)
        );
        Ok(())
    })
    .expect("runtime");
}

#[test]
fn receive_pending_drains_everything_at_once() {
    common::init_logging();
    run(async {
        let me = polyphony::current();
        me.send(1_i32);
        me.send(2_i32);
        me.send(3_i32);

        let drained = receive_pending();
        let values: Vec<i32> = drained
            .iter()
            .filter_map(|p| payload_as::<i32>(p).copied())
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
        assert!(receive_pending().is_empty());
        Ok(())
    })
    .expect("runtime");
}

#[test]
fn join_returns_the_fiber_value() {
    common::init_logging();
    run(async {
        let worker = spin(async { Ok("payload".to_owned()) });
        let value = worker.join().await?;
        assert_eq!(
            value.as_ref().and_then(|v| v.downcast_ref::<String>()),
            Some(&"payload".to_owned())
        );
        Ok(())
    })
    .expect("runtime");
}

#[test]
fn join_on_a_dead_fiber_returns_immediately() {
    common::init_logging();
    run(async {
        let worker = spin(async { Ok(5_i32) });
        suspend().await?;
        assert!(!worker.is_running());
        let value = worker.join().await?;
        assert_eq!(value.as_ref().and_then(|v| v.downcast_ref::<i32>()), Some(&5));
        Ok(())
    })
    .expect("runtime");
}

#[test]
fn join_reraises_failure_with_composed_trace() {
    common::init_logging();
    run(async {
        let failing = spin(async { Err::<(), _>(Error::other("boom")) });
        let error = failing.join().await.expect_err("failure must re-raise");

        assert_eq!(error.kind(), ErrorKind::Other);
        assert_eq!(error.message(), Some("boom"));
        let trace = error.render_trace();
        assert!(trace.contains("--- spawned from ---"), "trace:\n{trace}");
        assert!(trace.contains("e2e_fiber.rs"), "trace:\n{trace}");
        Ok(())
    })
    .expect("runtime");
}

#[test]
fn trace_composes_across_multiple_levels() {
    common::init_logging();
    run(async {
        let middle = spin(async {
            let inner = spin(async { Err::<(), _>(Error::other("deep failure")) });
            inner.join().await?;
            Ok(())
        });
        let error = middle.join().await.expect_err("failure must bubble");

        let trace = error.render_trace();
        let boundaries = trace.matches("--- spawned from ---").count();
        assert_eq!(boundaries, 2, "trace:\n{trace}");
        assert_eq!(error.message(), Some("deep failure"));
        Ok(())
    })
    .expect("runtime");
}

#[test]
fn multiple_joiners_all_observe_the_result() {
    common::init_logging();
    run(async {
        let worker = spin(async {
            snooze().await?;
            Ok(11_i32)
        });
        let mut joiners = Vec::new();
        for _ in 0..3 {
            joiners.push(spin(async move {
                let value = worker.join().await?;
                Ok(value.as_ref().and_then(|v| v.downcast_ref::<i32>()).copied())
            }));
        }
        suspend().await?;
        for joiner in joiners {
            assert_eq!(
                joiner
                    .result()
                    .and_then(|o| o.value_as::<Option<i32>>().copied()),
                Some(Some(11))
            );
        }
        Ok(())
    })
    .expect("runtime");
}
