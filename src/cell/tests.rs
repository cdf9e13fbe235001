use std::{
    future::Future,
    pin::pin,
    task::{Context, Poll},
    time::Duration,
};

use assert_call::{call, CallRecorder};
use futures::task::noop_waker;
use rt_local::{runtime::core::test, spawn_local, wait_for_idle};

use crate::{utils::timer::sleep, Edge, Filter, MapFn, WatchCell};

#[test]
fn get_set() {
    let cell = WatchCell::new(10);
    assert_eq!(cell.get(), 10);

    cell.set(20);
    assert_eq!(cell.get(), 20);

    cell.set(30);
    assert_eq!(cell.get(), 30);
}

#[test]
fn borrow_reads_without_clone() {
    let cell = WatchCell::new(String::from("abc"));
    assert_eq!(&*cell.borrow(), "abc");
}

#[test]
fn default_is_default_value() {
    let flag = WatchCell::<bool>::default();
    assert!(!flag.get());
}

#[test]
fn debug_shows_value() {
    let cell = WatchCell::new(10);
    assert_eq!(format!("{cell:?}"), "10");
}

#[test]
fn serde_roundtrips_as_plain_value() {
    let cell = WatchCell::new(10);
    let json = serde_json::to_string(&cell).unwrap();
    assert_eq!(json, "10");

    let cell: WatchCell<i32> = serde_json::from_str("20").unwrap();
    assert_eq!(cell.get(), 20);

    let json = serde_json::to_string(&cell.watch()).unwrap();
    assert_eq!(json, "20");
}

#[test]
async fn set_same_value_evaluates_no_condition() {
    let mut cr = CallRecorder::new();
    let cell = WatchCell::new(10);
    let c = cell.clone();
    let _t = spawn_local(async move {
        c.wait_value(Filter::when(|v: &i32| {
            call!("spy");
            *v > 100
        }))
        .await;
    });
    wait_for_idle().await;
    cr.verify("spy");

    cell.set(10);
    cr.verify(());

    cell.set(11);
    cr.verify("spy");
}

#[test]
fn wait_value_already_true_suspends_exactly_once() {
    let cell = WatchCell::new(10);
    let mut fut = pin!(cell.wait_value(10));

    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    assert!(fut.as_mut().poll(&mut cx).is_pending());
    assert_eq!(fut.as_mut().poll(&mut cx), Poll::Ready(10));
}

#[test]
async fn wait_value_parks_until_match() {
    let mut cr = CallRecorder::new();
    let cell = WatchCell::new(10);
    let c = cell.clone();
    let _t = spawn_local(async move {
        let v = c.wait_value(Filter::when(|v: &i32| *v > 20)).await;
        call!("got {v}");
    });
    wait_for_idle().await;
    cr.verify(());

    cell.set(15);
    wait_for_idle().await;
    cr.verify(());

    // Waking marks the task runnable; it has not run yet.
    cell.set(21);
    cr.verify(());
    wait_for_idle().await;
    cr.verify("got 21");
}

#[test]
async fn woken_waiter_reads_the_matching_value() {
    let mut cr = CallRecorder::new();
    let cell = WatchCell::new(10);
    let c = cell.clone();
    let _t = spawn_local(async move {
        let v = c.wait_value(0).await;
        call!("got {v}");
    });
    wait_for_idle().await;

    // The cell moves on before the waiter runs; the waiter still sees 0.
    cell.set(0);
    cell.set(30);
    wait_for_idle().await;
    cr.verify("got 0");
    assert_eq!(cell.get(), 30);
}

#[test]
async fn transition_snapshot_is_exact() {
    let mut cr = CallRecorder::new();
    let cell = WatchCell::new(10);
    let c = cell.clone();
    let _t = spawn_local(async move {
        let (new, old) = c.wait_transition(0).await;
        call!("{old}->{new}");
    });
    wait_for_idle().await;

    cell.set(0);
    cell.set(30);
    wait_for_idle().await;
    cr.verify("10->0");
}

#[test]
async fn wait_transition_any_sees_next_change() {
    let mut cr = CallRecorder::new();
    let cell = WatchCell::new(0);
    let c = cell.clone();
    let _t = spawn_local(async move {
        let (new, old) = c.wait_transition(Edge::any()).await;
        call!("{old}->{new}");
    });
    wait_for_idle().await;
    cell.set(1);
    wait_for_idle().await;
    cr.verify("0->1");
}

#[test]
async fn waiters_on_the_same_value_share_one_entry() {
    let mut cr = CallRecorder::new();
    let cell = WatchCell::new(0);
    let c0 = cell.clone();
    let _t0 = spawn_local(async move {
        let v = c0.wait_value(42).await;
        call!("w {v}");
    });
    let c1 = cell.clone();
    let _t1 = spawn_local(async move {
        let v = c1.wait_value(42).await;
        call!("w {v}");
    });
    wait_for_idle().await;
    assert_eq!(cell.level_count(), 1);

    cell.set(42);
    wait_for_idle().await;
    cr.verify(["w 42", "w 42"]);
    assert_eq!(cell.level_count(), 0);
}

#[test]
async fn distinct_values_and_closures_get_distinct_entries() {
    let cell = WatchCell::new(0);
    let c0 = cell.clone();
    let _t0 = spawn_local(async move {
        c0.wait_value(42).await;
    });
    let c1 = cell.clone();
    let _t1 = spawn_local(async move {
        c1.wait_value(43).await;
    });
    let c2 = cell.clone();
    let _t2 = spawn_local(async move {
        c2.wait_value(Filter::when(|v: &i32| *v == 42)).await;
    });
    wait_for_idle().await;
    assert_eq!(cell.level_count(), 3);
}

#[test]
async fn cancelled_waiter_releases_its_entry() {
    let cell = WatchCell::new(0);
    let c = cell.clone();
    let t = spawn_local(async move {
        c.wait_value(42).await;
    });
    wait_for_idle().await;
    assert_eq!(cell.level_count(), 1);

    drop(t);
    wait_for_idle().await;
    assert_eq!(cell.level_count(), 0);
}

#[test]
fn map_updates_synchronously() {
    let cell = WatchCell::new(1);
    let doubled = cell.map(|v: &i32| v * 2);
    assert_eq!(doubled.get(), 2);

    cell.set(10);
    assert_eq!(doubled.get(), 20);
}

#[test]
fn map_fn_handles_share_one_derived_cell() {
    let cell = WatchCell::new(2);
    let double = MapFn::new(|v: &i32| v * 2);
    let a = cell.map_fn(&double);
    let b = cell.map_fn(&double);
    assert_eq!(cell.map_count(), 1);

    cell.set(5);
    assert_eq!(a.get(), 10);
    assert_eq!(b.get(), 10);

    let c = cell.map(|v: &i32| v * 2);
    assert_eq!(cell.map_count(), 2);
    drop((a, b, c));
    assert_eq!(cell.map_count(), 0);
}

#[test]
fn dropped_map_stops_updating() {
    let cell = WatchCell::new(1);
    let doubled = cell.map(|v: &i32| v * 2);
    let w = doubled.watch();
    drop(doubled);
    assert_eq!(cell.map_count(), 0);

    cell.set(10);
    assert_eq!(w.get(), 2);
}

#[test]
fn map_chains_through_derived_cells() {
    let cell = WatchCell::new(1);
    let doubled = cell.map(|v: &i32| v * 2);
    let plus_one = doubled.map(|v: &i32| v + 1);
    assert_eq!(plus_one.get(), 3);

    cell.set(5);
    assert_eq!(plus_one.get(), 11);
}

#[test]
async fn waiter_on_mapped_value_wakes() {
    let mut cr = CallRecorder::new();
    let cell = WatchCell::new(1);
    let doubled = cell.map(|v: &i32| v * 2);
    let d = doubled.watch();
    let _t = spawn_local(async move {
        let v = d.wait_value(10).await;
        call!("got {v}");
    });
    wait_for_idle().await;

    cell.set(5);
    wait_for_idle().await;
    cr.verify("got 10");
}

#[test]
#[should_panic(expected = "cyclic update")]
fn set_from_own_condition_panics() {
    let cell = WatchCell::new(0);
    let c = cell.clone();
    let fut = cell.wait_value(Filter::when(move |v: &i32| {
        if *v > 0 {
            c.set(100);
        }
        false
    }));
    let mut fut = Box::pin(fut);

    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    assert!(fut.as_mut().poll(&mut cx).is_pending());

    cell.set(1);
}

#[test]
async fn wait_value_held_requires_continuous_match() {
    let mut cr = CallRecorder::new();
    let cell = WatchCell::new(false);
    let c = cell.clone();
    let _t = spawn_local(async move {
        let v = c.wait_value_held(true, Duration::from_millis(80)).await;
        call!("held {v}");
    });
    wait_for_idle().await;

    cell.set(true);
    sleep(Duration::from_millis(30)).await;
    cell.set(false);
    cr.verify(());

    // A dip to false restarts the hold from the next match.
    sleep(Duration::from_millis(30)).await;
    cell.set(true);
    sleep(Duration::from_millis(30)).await;
    cr.verify(());

    sleep(Duration::from_millis(80)).await;
    cr.verify("held true");
}

#[test]
async fn wait_value_held_zero_is_plain_wait() {
    let mut cr = CallRecorder::new();
    let cell = WatchCell::new(0);
    let c = cell.clone();
    let _t = spawn_local(async move {
        let v = c.wait_value_held(7, Duration::ZERO).await;
        call!("got {v}");
    });
    wait_for_idle().await;
    cell.set(7);
    wait_for_idle().await;
    cr.verify("got 7");
}

#[test]
async fn held_entries_are_released_after_the_wait() {
    let cell = WatchCell::new(0);
    let c = cell.clone();
    let _t = spawn_local(async move {
        c.wait_value_held(1, Duration::from_millis(20)).await;
    });
    wait_for_idle().await;
    cell.set(1);
    sleep(Duration::from_millis(60)).await;
    assert_eq!(cell.level_count(), 0);
}
