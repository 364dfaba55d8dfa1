//! The demo domain: a counter driven by a timer.
//!
//! `Start` begins a stream of `Tick`s. Every third tick triggers an
//! increment, and every fifth increment records a milestone.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use ricochet_engine::{
    combine_epics, handle_async, handle_each, Epic, EngineError, Event, EventChannel,
    KindReducer, MemoSelector, ReducerBuilder, StateChannel, EPIC_END,
};

const TICKS_PER_TRIGGER: u32 = 3;
const MILESTONE_EVERY: u32 = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum CounterEvent {
    Start,
    Tick,
    Trigger,
    Increment { by: u32 },
    Milestone { count: u32 },
    EpicEnd,
}

impl Event for CounterEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CounterEvent::Start => "counter/start",
            CounterEvent::Tick => "counter/tick",
            CounterEvent::Trigger => "counter/trigger",
            CounterEvent::Increment { .. } => "counter/increment",
            CounterEvent::Milestone { .. } => "counter/milestone",
            CounterEvent::EpicEnd => EPIC_END,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CounterState {
    pub ticks: u32,
    pub count: u32,
    pub milestones: Vec<u32>,
}

pub fn reducer() -> KindReducer<CounterEvent, CounterState> {
    ReducerBuilder::new()
        .on("counter/tick", |state: &mut CounterState, _: &CounterEvent| {
            state.ticks += 1
        })
        .on("counter/increment", |state: &mut CounterState, event: &CounterEvent| {
            if let CounterEvent::Increment { by } = event {
                state.count += by;
            }
        })
        .on("counter/milestone", |state: &mut CounterState, event: &CounterEvent| {
            if let CounterEvent::Milestone { count } = event {
                state.milestones.push(*count);
            }
        })
        .build()
}

/// Average ticks per increment so far.
pub fn pace() -> MemoSelector<CounterState, Option<f64>> {
    MemoSelector::new(|state: &CounterState| {
        (state.count > 0).then(|| f64::from(state.ticks) / f64::from(state.count))
    })
}

fn timer(period: Duration) -> Result<Epic<CounterEvent, CounterState>, EngineError> {
    Epic::build([handle_async(
        "counter/start",
        "timer",
        move |events, _states: StateChannel<CounterState>, _actions: EventChannel<CounterEvent>| {
            events
                .flat_map(move |_| {
                    stream::unfold((), move |()| async move {
                        tokio::time::sleep(period).await;
                        Some((Ok::<_, anyhow::Error>(CounterEvent::Tick), ()))
                    })
                })
                .boxed()
        },
    )])
}

fn counting() -> Result<Epic<CounterEvent, CounterState>, EngineError> {
    Epic::build([
        handle_each(
            "counter/tick",
            "tick-trigger",
            |_event, state: Option<Arc<CounterState>>| {
                let ticks = state.map(|s| s.ticks).unwrap_or_default();
                Ok(if ticks % TICKS_PER_TRIGGER == 0 {
                    vec![CounterEvent::Trigger]
                } else {
                    vec![]
                })
            },
        ),
        handle_each(
            "counter/trigger",
            "trigger-increment",
            |_event, _state: Option<Arc<CounterState>>| Ok(vec![CounterEvent::Increment { by: 1 }]),
        ),
        handle_each(
            "counter/increment",
            "milestone",
            |_event, state: Option<Arc<CounterState>>| {
                let count = state.map(|s| s.count).unwrap_or_default();
                Ok(if count > 0 && count % MILESTONE_EVERY == 0 {
                    vec![CounterEvent::Milestone { count }]
                } else {
                    vec![]
                })
            },
        ),
    ])
}

/// Every epic the demo runs.
pub fn root_epic(tick: Duration) -> Result<Epic<CounterEvent, CounterState>, EngineError> {
    combine_epics([timer(tick)?, counting()?])
}
