//! Cancellation end-to-end: scopes, timeouts, interrupt/stop/terminate.

mod common;

use polyphony::{
    cancel_after, move_on_after, move_on_after_with_value, run, sleep, snooze, spin, suspend,
    ErrorKind, FiberState,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

#[test]
fn interrupted_sleeper_dies_with_nil_result() {
    common::init_logging();
    run(async {
        let sleeper = spin(async {
            sleep(Duration::from_secs(1)).await?;
            Ok(42_i32)
        });
        spin(async move {
            sleeper.interrupt(None);
            Ok(())
        });
        suspend().await?;
        assert!(sleeper.result().is_some_and(|o| o.is_nil()));
        Ok(())
    })
    .expect("runtime");
}

#[test]
fn move_on_after_yields_fallback_quickly() {
    common::init_logging();
    let (value, elapsed) = common::timed(|| {
        run(async {
            move_on_after_with_value(Duration::from_millis(10), "bar", async {
                sleep(Duration::from_secs(1)).await?;
                Ok("foo")
            })
            .await
        })
        .expect("runtime")
    });
    assert_eq!(value, "bar");
    assert!(elapsed < Duration::from_millis(500), "timed out in {elapsed:?}");
}

#[test]
fn move_on_after_lets_a_fast_body_win() {
    common::init_logging();
    run(async {
        let value = move_on_after(Duration::from_secs(10), async { Ok(7_i32) }).await?;
        assert_eq!(value, Some(7));
        Ok(())
    })
    .expect("runtime");
}

#[test]
fn cancel_after_raises_at_the_boundary() {
    common::init_logging();
    let (kind, elapsed) = common::timed(|| {
        run(async {
            let result = cancel_after(Duration::from_millis(10), async {
                sleep(Duration::from_secs(1000)).await?;
                Ok(())
            })
            .await;
            Ok(result.expect_err("deadline must cancel").kind())
        })
        .expect("runtime")
    });
    assert_eq!(kind, ErrorKind::Cancelled);
    assert!(elapsed < Duration::from_millis(500));
}

#[test]
fn cancelled_error_is_catchable_in_user_code() {
    common::init_logging();
    run(async {
        let outcome = match cancel_after(Duration::from_millis(5), async {
            sleep(Duration::from_secs(100)).await?;
            Ok("finished")
        })
        .await
        {
            Ok(v) => v,
            Err(e) if e.is_cancelled() => "cancelled",
            Err(e) => return Err(e),
        };
        assert_eq!(outcome, "cancelled");
        Ok(())
    })
    .expect("runtime");
}

#[test]
fn stopped_sleeper_dies_on_the_next_turn() {
    common::init_logging();
    run(async {
        let sleeper = spin(async {
            sleep(Duration::from_secs(5)).await?;
            Ok(1_i32)
        });
        snooze().await?; // let it park in sleep
        sleeper.stop(None);
        snooze().await?; // one scheduler turn
        assert_eq!(sleeper.state(), FiberState::Dead);
        assert!(sleeper.result().is_some_and(|o| o.is_nil()));
        Ok(())
    })
    .expect("runtime");
}

#[test]
fn stop_carries_a_value_into_the_result() {
    common::init_logging();
    run(async {
        let sleeper = spin(async {
            sleep(Duration::from_secs(5)).await?;
            Ok(0_i32)
        });
        snooze().await?;
        sleeper.stop(Some(polyphony::payload("early")));
        suspend().await?;
        let result = sleeper.result().expect("dead");
        assert_eq!(result.value_as::<&str>(), Some(&"early"));
        Ok(())
    })
    .expect("runtime");
}

#[test]
fn terminate_skips_user_code_but_runs_destructors() {
    common::init_logging();

    struct SetOnDrop(Rc<RefCell<bool>>);
    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            *self.0.borrow_mut() = true;
        }
    }

    run(async {
        let dropped = Rc::new(RefCell::new(false));
        let reached_end = Rc::new(RefCell::new(false));

        let flag = dropped.clone();
        let end = reached_end.clone();
        let worker = spin(async move {
            let _guard = SetOnDrop(flag);
            sleep(Duration::from_secs(100)).await?;
            *end.borrow_mut() = true;
            Ok(())
        });

        snooze().await?;
        worker.terminate();
        suspend().await?;

        assert!(*dropped.borrow(), "destructor must run");
        assert!(!*reached_end.borrow(), "terminate is uncatchable");
        let result = worker.result().expect("dead");
        assert_eq!(result.error().map(polyphony::Error::kind), Some(ErrorKind::Terminated));
        Ok(())
    })
    .expect("runtime");
}

#[test]
fn terminate_cascades_to_children() {
    common::init_logging();
    run(async {
        let grandchild_alive = Rc::new(RefCell::new(None));
        let slot = grandchild_alive.clone();
        let parent = spin(async move {
            let grandchild = spin(async {
                sleep(Duration::from_secs(100)).await?;
                Ok(())
            });
            *slot.borrow_mut() = Some(grandchild);
            sleep(Duration::from_secs(100)).await?;
            Ok(())
        });

        snooze().await?;
        snooze().await?;
        parent.terminate();
        suspend().await?;

        let grandchild = grandchild_alive.borrow().expect("grandchild spawned");
        assert_eq!(parent.state(), FiberState::Dead);
        assert_eq!(grandchild.state(), FiberState::Dead);
        Ok(())
    })
    .expect("runtime");
}

#[test]
fn inner_scope_timeout_leaves_outer_scope_alone() {
    common::init_logging();
    run(async {
        let result = move_on_after(Duration::from_secs(10), async {
            let inner = move_on_after(Duration::from_millis(5), async {
                sleep(Duration::from_secs(1)).await?;
                Ok("inner")
            })
            .await?;
            assert_eq!(inner, None);
            Ok("outer survived")
        })
        .await?;
        assert_eq!(result, Some("outer survived"));
        Ok(())
    })
    .expect("runtime");
}
