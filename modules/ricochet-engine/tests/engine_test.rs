//! Integration tests for the dispatch → reduce → route → redispatch loop.
//! Everything here is synchronous: handler output produced without awaiting
//! is dispatched before `Store::dispatch` returns.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use futures::{future, StreamExt};
use ricochet_engine::{
    combine_epics, handle_async, handle_each, Epic, EpicMiddleware, Event, EventChannel,
    KindReducer, Middleware, Next, ReducerBuilder, Store, StoreHandle, EPIC_END,
};

// ---------------------------------------------------------------------------
// Test event type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum AppEvent {
    Trigger,
    Increment { by: u32 },
    Milestone { count: u32 },
    Failed { handler: String },
    Noise,
    Fan,
    X,
    Y,
    Later,
    Z,
    End,
}

impl Event for AppEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AppEvent::Trigger => "counter/trigger",
            AppEvent::Increment { .. } => "counter/increment",
            AppEvent::Milestone { .. } => "counter/milestone",
            AppEvent::Failed { .. } => "counter/failed",
            AppEvent::Noise => "noise",
            AppEvent::Fan => "fan",
            AppEvent::X => "x",
            AppEvent::Y => "y",
            AppEvent::Later => "later",
            AppEvent::Z => "z",
            AppEvent::End => EPIC_END,
        }
    }
}

// ---------------------------------------------------------------------------
// Test state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct Counter {
    count: u32,
    milestones: Vec<u32>,
    failures: Vec<String>,
}

fn counter_reducer() -> KindReducer<AppEvent, Counter> {
    ReducerBuilder::new()
        .on("counter/increment", |state: &mut Counter, event: &AppEvent| {
            if let AppEvent::Increment { by } = event {
                state.count += by;
            }
        })
        .on("counter/milestone", |state: &mut Counter, event: &AppEvent| {
            if let AppEvent::Milestone { count } = event {
                state.milestones.push(*count);
            }
        })
        .on("counter/failed", |state: &mut Counter, event: &AppEvent| {
            if let AppEvent::Failed { handler } = event {
                state.failures.push(handler.clone());
            }
        })
        .build()
}

// ---------------------------------------------------------------------------
// Test epics
// ---------------------------------------------------------------------------

fn increments_by(by: u32, id: &str) -> Epic<AppEvent, Counter> {
    Epic::build([handle_each("counter/trigger", id, move |_event, _state| {
        Ok(vec![AppEvent::Increment { by }])
    })])
    .unwrap()
}

/// Increment → Milestone whenever the count reaches an even number.
fn milestones() -> Epic<AppEvent, Counter> {
    Epic::build([handle_each(
        "counter/increment",
        "milestones",
        |_event, state: Option<Arc<Counter>>| {
            let count = state.map(|s| s.count).unwrap_or_default();
            if count > 0 && count % 2 == 0 {
                Ok(vec![AppEvent::Milestone { count }])
            } else {
                Ok(vec![])
            }
        },
    )])
    .unwrap()
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

type Log = Arc<Mutex<Vec<AppEvent>>>;

/// Store wired to `middleware`, plus a log of every event the middleware
/// published.
fn harness(middleware: &EpicMiddleware<AppEvent, Counter>) -> (Store<AppEvent, Counter>, Log) {
    let store = Store::builder(counter_reducer(), Counter::default())
        .with_middleware(middleware.clone())
        .build();
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let _ = middleware
        .actions()
        .subscribe(move |event: &AppEvent| sink.lock().unwrap().push(event.clone()));
    (store, log)
}

fn count_of(log: &Log, kind: &str) -> usize {
    log.lock()
        .unwrap()
        .iter()
        .filter(|e| e.event_type() == kind)
        .count()
}

// =========================================================================
// Tests
// =========================================================================

#[test]
fn trigger_produces_exactly_one_increment() {
    let middleware = EpicMiddleware::new();
    let (store, log) = harness(&middleware);
    middleware.runner().run(increments_by(1, "inc")).unwrap();

    store.dispatch(AppEvent::Trigger);

    assert_eq!(
        *log.lock().unwrap(),
        vec![AppEvent::Trigger, AppEvent::Increment { by: 1 }]
    );
    assert_eq!(store.state().count, 1);
}

#[test]
fn outputs_of_one_dispatch_land_before_the_next_dispatch() {
    let middleware = EpicMiddleware::new();
    let (store, log) = harness(&middleware);
    let epic = Epic::build([
        handle_each("fan", "emit-x", |_event, _state| Ok(vec![AppEvent::X])),
        handle_each("fan", "emit-y", |_event, _state| Ok(vec![AppEvent::Y])),
        handle_each("later", "emit-z", |_event, _state| Ok(vec![AppEvent::Z])),
    ])
    .unwrap();
    middleware.runner().run(epic).unwrap();

    store.dispatch(AppEvent::Fan);
    store.dispatch(AppEvent::Later);

    let log = log.lock().unwrap();
    let position = |wanted: &AppEvent| log.iter().position(|e| e == wanted).unwrap();
    assert_eq!(log.len(), 5);
    assert_eq!(position(&AppEvent::Fan), 0);
    assert!(position(&AppEvent::X) < position(&AppEvent::Later));
    assert!(position(&AppEvent::Y) < position(&AppEvent::Later));
    assert_eq!(position(&AppEvent::Z), 4);
}

#[test]
fn event_without_handlers_produces_nothing() {
    let middleware = EpicMiddleware::new();
    let (store, log) = harness(&middleware);
    middleware.runner().run(increments_by(1, "inc")).unwrap();
    let before = store.state();

    store.dispatch(AppEvent::Noise);

    assert_eq!(*log.lock().unwrap(), vec![AppEvent::Noise]);
    assert!(Arc::ptr_eq(&before, &store.state()));
}

#[test]
fn state_channel_skips_dispatches_that_change_nothing() {
    let middleware = EpicMiddleware::new();
    let (store, _log) = harness(&middleware);
    let counts = Arc::new(Mutex::new(Vec::new()));
    let sink = counts.clone();
    let _ = middleware
        .states()
        .subscribe(move |state: &Arc<Counter>| sink.lock().unwrap().push(state.count));

    store.dispatch(AppEvent::Noise);
    store.dispatch(AppEvent::Increment { by: 3 });
    store.dispatch(AppEvent::Noise);

    assert_eq!(*counts.lock().unwrap(), vec![0, 3]);
}

#[test]
fn handlers_see_state_after_the_triggering_event_was_reduced() {
    let middleware = EpicMiddleware::new();
    let (store, log) = harness(&middleware);
    let epic = combine_epics([increments_by(1, "inc"), milestones()]).unwrap();
    middleware.runner().run(epic).unwrap();

    store.dispatch(AppEvent::Trigger);
    store.dispatch(AppEvent::Trigger);

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            AppEvent::Trigger,
            AppEvent::Increment { by: 1 },
            AppEvent::Trigger,
            AppEvent::Increment { by: 1 },
            AppEvent::Milestone { count: 2 },
        ]
    );
    assert_eq!(store.state().milestones, vec![2]);
}

#[test]
fn running_a_new_epic_replaces_the_previous_one() {
    let middleware = EpicMiddleware::new();
    let (store, log) = harness(&middleware);
    let runner = middleware.runner();

    runner.run(increments_by(1, "by-one")).unwrap();
    runner.run(increments_by(10, "by-ten")).unwrap();
    store.dispatch(AppEvent::Trigger);

    assert_eq!(store.state().count, 10);
    assert_eq!(count_of(&log, "counter/increment"), 1);
}

#[test]
fn running_the_same_epic_twice_is_like_running_it_once() {
    let middleware = EpicMiddleware::new();
    let (store, log) = harness(&middleware);
    let epic = increments_by(1, "inc");

    middleware.runner().run(epic.clone()).unwrap();
    middleware.runner().run(epic).unwrap();
    store.dispatch(AppEvent::Trigger);

    assert_eq!(store.state().count, 1);
    assert_eq!(count_of(&log, "counter/increment"), 1);
}

#[test]
fn epic_end_stops_handler_output_until_the_next_run() {
    let middleware = EpicMiddleware::new();
    let (store, log) = harness(&middleware);
    let runner = middleware.runner();
    runner.run(increments_by(1, "inc")).unwrap();

    store.dispatch(AppEvent::End);
    store.dispatch(AppEvent::Trigger);

    assert_eq!(store.state().count, 0);
    assert_eq!(
        *log.lock().unwrap(),
        vec![AppEvent::End, AppEvent::Trigger]
    );

    runner.run(increments_by(1, "inc")).unwrap();
    store.dispatch(AppEvent::Trigger);
    assert_eq!(store.state().count, 1);
}

#[test]
fn failing_handler_is_reported_and_the_rest_keep_running() {
    let middleware = EpicMiddleware::with_error_hook(|failure| {
        Some(AppEvent::Failed {
            handler: failure.handler_id.clone(),
        })
    });
    let (store, _log) = harness(&middleware);
    let epic = Epic::build([
        handle_each(
            "counter/trigger",
            "explode",
            |_event, _state| -> anyhow::Result<Vec<AppEvent>> { anyhow::bail!("refusing to count") },
        ),
        handle_each("counter/trigger", "inc", |_event, _state| {
            Ok(vec![AppEvent::Increment { by: 1 }])
        }),
    ])
    .unwrap();
    middleware.runner().run(epic).unwrap();

    store.dispatch(AppEvent::Trigger);
    store.dispatch(AppEvent::Trigger);

    let state = store.state();
    assert_eq!(state.count, 2);
    assert_eq!(state.failures, vec!["explode".to_string()]);
}

#[test]
fn handler_can_watch_every_dispatched_event() {
    let middleware = EpicMiddleware::new();
    let (store, log) = harness(&middleware);
    // Registered under "counter/trigger" but reacts to "noise" on the shared
    // actions channel.
    let watcher = handle_async(
        "counter/trigger",
        "noise-watcher",
        |_events, _states, actions: EventChannel<AppEvent>| {
            actions
                .stream()
                .filter(|event| future::ready(*event == AppEvent::Noise))
                .map(|_| Ok(AppEvent::Increment { by: 5 }))
                .boxed()
        },
    );
    middleware
        .runner()
        .run(Epic::build([watcher]).unwrap())
        .unwrap();

    store.dispatch(AppEvent::Noise);

    assert_eq!(store.state().count, 5);
    assert_eq!(
        *log.lock().unwrap(),
        vec![AppEvent::Noise, AppEvent::Increment { by: 5 }]
    );
}

#[test]
fn dropped_store_discards_late_output() {
    let middleware = EpicMiddleware::new();
    let (store, log) = harness(&middleware);
    middleware.runner().run(increments_by(1, "inc")).unwrap();

    drop(store);
    middleware.actions().publish(AppEvent::Trigger);

    assert_eq!(*log.lock().unwrap(), vec![AppEvent::Trigger]);
}

#[test]
fn handler_can_replace_the_running_epic() {
    let middleware = EpicMiddleware::new();
    let (store, log) = harness(&middleware);
    let runner = middleware.runner();
    let calls = Arc::new(AtomicUsize::new(0));

    let switch = {
        let runner = runner.clone();
        let calls = calls.clone();
        handle_each("counter/trigger", "switch", move |_event, _state| {
            calls.fetch_add(1, Ordering::SeqCst);
            runner.run(increments_by(10, "by-ten"))?;
            Ok(vec![
                AppEvent::Increment { by: 1 },
                AppEvent::Increment { by: 1 },
            ])
        })
    };
    runner.run(Epic::build([switch]).unwrap()).unwrap();

    // The replacement is installed before the second output is pulled.
    store.dispatch(AppEvent::Trigger);
    assert_eq!(store.state().count, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    store.dispatch(AppEvent::Trigger);
    assert_eq!(store.state().count, 11);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            AppEvent::Trigger,
            AppEvent::Increment { by: 1 },
            AppEvent::Trigger,
            AppEvent::Increment { by: 10 },
        ]
    );
}

/// Blocks the dispatching thread right after `kind` has been reduced.
struct PauseAfterReduce {
    kind: &'static str,
    reduced: Arc<Barrier>,
    resume: Arc<Barrier>,
}

impl Middleware<AppEvent, Counter> for PauseAfterReduce {
    fn dispatch(
        &self,
        _store: &StoreHandle<AppEvent, Counter>,
        event: AppEvent,
        next: Next<'_, AppEvent, Counter>,
    ) {
        let pause = event.event_type() == self.kind;
        next.run(event);
        if pause {
            self.reduced.wait();
            self.resume.wait();
        }
    }
}

#[test]
fn concurrent_dispatches_publish_in_reduction_order() {
    let middleware = EpicMiddleware::new();
    let reduced_order = Arc::new(Mutex::new(Vec::new()));
    let reduced = Arc::new(Barrier::new(2));
    let resume = Arc::new(Barrier::new(2));

    let sink = reduced_order.clone();
    let recording = move |state: &Arc<Counter>, event: &AppEvent| {
        sink.lock().unwrap().push(event.clone());
        state.clone()
    };
    let store = Store::builder(recording, Counter::default())
        .with_middleware(middleware.clone())
        .with_middleware(PauseAfterReduce {
            kind: "y",
            reduced: reduced.clone(),
            resume: resume.clone(),
        })
        .build();
    let published = Arc::new(Mutex::new(Vec::new()));
    let sink = published.clone();
    let _ = middleware
        .actions()
        .subscribe(move |event: &AppEvent| sink.lock().unwrap().push(event.clone()));

    thread::scope(|scope| {
        scope.spawn(|| store.dispatch(AppEvent::Y));
        // Y is reduced but not yet published.
        reduced.wait();
        store.dispatch(AppEvent::X);
        resume.wait();
    });

    assert_eq!(*reduced_order.lock().unwrap(), vec![AppEvent::Y, AppEvent::X]);
    assert_eq!(*published.lock().unwrap(), vec![AppEvent::Y, AppEvent::X]);
}
