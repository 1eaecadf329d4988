//! Scheduling end-to-end: spawn ordering, fairness, root suspension.

mod common;

use polyphony::{run, snooze, spin, spin_tagged, suspend, Fiber, FiberState};
use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn spawned_fiber_result_visible_after_suspend() {
    common::init_logging();
    run(async {
        let fiber = spin(async { Ok(42_i32) });
        suspend().await?;
        let result = fiber.result().expect("fiber finished");
        assert_eq!(result.value_as::<i32>(), Some(&42));
        assert_eq!(fiber.state(), FiberState::Dead);
        Ok(())
    })
    .expect("runtime");
}

#[test]
fn enqueue_order_is_resume_order() {
    common::init_logging();
    run(async {
        let order = Rc::new(RefCell::new(Vec::new()));
        for name in ["a", "b", "c"] {
            let order = order.clone();
            spin(async move {
                order.borrow_mut().push(name);
                Ok(())
            });
        }
        suspend().await?;
        assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
        Ok(())
    })
    .expect("runtime");
}

#[test]
fn three_snoozers_interleave_round_robin() {
    common::init_logging();
    run(async {
        let values = Rc::new(RefCell::new(Vec::new()));
        for n in 0..3_u32 {
            let values = values.clone();
            spin(async move {
                for _ in 0..3 {
                    values.borrow_mut().push(n);
                    snooze().await?;
                }
                Ok(())
            });
        }
        suspend().await?;
        assert_eq!(*values.borrow(), vec![0, 1, 2, 0, 1, 2, 0, 1, 2]);
        Ok(())
    })
    .expect("runtime");
}

#[test]
fn spawner_runs_before_its_child() {
    common::init_logging();
    run(async {
        let order = Rc::new(RefCell::new(Vec::new()));
        let in_child = order.clone();
        spin(async move {
            in_child.borrow_mut().push("child");
            Ok(())
        });
        order.borrow_mut().push("spawner");
        suspend().await?;
        assert_eq!(*order.borrow(), vec!["spawner", "child"]);
        Ok(())
    })
    .expect("runtime");
}

#[test]
fn children_and_parent_links() {
    common::init_logging();
    run(async {
        let child = spin_tagged("worker", async {
            snooze().await?;
            Ok(())
        });
        assert_eq!(child.tag().as_deref(), Some("worker"));
        assert_eq!(child.parent(), Some(Fiber::current()));
        assert!(Fiber::current().children().contains(&child));
        assert!(child.is_running());

        suspend().await?;
        assert!(!child.is_running());
        // Dead children are detached from the parent's set.
        assert!(!Fiber::current().children().contains(&child));
        Ok(())
    })
    .expect("runtime");
}

#[test]
fn nested_runtime_is_a_usage_error() {
    common::init_logging();
    let result = run(async {
        let nested = run(async { Ok(()) });
        assert_eq!(
            nested.expect_err("nested run must fail").kind(),
            polyphony::ErrorKind::Usage
        );
        Ok(())
    });
    result.expect("outer runtime");
}

#[test]
fn scheduled_value_wakes_suspended_fiber() {
    common::init_logging();
    run(async {
        let waiter = spin(async {
            let value = suspend().await?;
            let n = value
                .as_ref()
                .and_then(|v| v.downcast_ref::<i32>())
                .copied()
                .unwrap_or(0);
            Ok(n)
        });
        snooze().await?; // let the waiter park
        waiter.schedule_value(7_i32);
        suspend().await?;
        assert_eq!(
            waiter.result().and_then(|o| o.value_as::<i32>().copied()),
            Some(7)
        );
        Ok(())
    })
    .expect("runtime");
}
