//! Named host events and the one-shot event-wait adapter
//!
//! The host calls [`EventBus::emit`] when something happens. Listeners are
//! one-shot: each firing consumes every listener registered for that name, and
//! listeners added while a firing is dispatched wait for the next one.

use super::executor::{Scheduler, TaskFactory};
use super::task::yield_now;
use serde_json::Value;
use slab::Slab;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

type Listener = Box<dyn FnOnce(&[Value])>;

/// Registry of one-shot listeners keyed by event name
#[derive(Default)]
pub struct EventBus {
    listeners: RefCell<HashMap<String, Slab<Listener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `listener` the next time `name` fires
    pub fn once(&self, name: &str, listener: impl FnOnce(&[Value]) + 'static) {
        self.listeners
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .insert(Box::new(listener));
    }

    /// Fire `name`, returning how many listeners ran
    pub fn emit(&self, name: &str, args: Vec<Value>) -> usize {
        // Detach first so listeners can re-register without a double borrow
        let detached = self.listeners.borrow_mut().remove(name);
        let Some(listeners) = detached else {
            return 0;
        };
        let fired = listeners.len();
        for (_, listener) in listeners {
            listener(&args);
        }
        fired
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners.borrow().get(name).map_or(0, Slab::len)
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.borrow().values().all(Slab::is_empty)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.borrow();
        let mut counts: Vec<(&String, usize)> = listeners.iter().map(|(k, v)| (k, v.len())).collect();
        counts.sort();
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}

/// Suspend the current task until `name` next fires; returns its arguments
pub async fn next_event(bus: &EventBus, name: &str) -> Vec<Value> {
    let received: Rc<RefCell<Option<Vec<Value>>>> = Rc::new(RefCell::new(None));
    let slot = received.clone();
    bus.once(name, move |args| {
        *slot.borrow_mut() = Some(args.to_vec());
    });

    loop {
        if let Some(args) = received.borrow_mut().take() {
            return args;
        }
        yield_now().await;
    }
}

/// Event-wait adapter: `wait_for(..).start(name)` completes with the arguments
/// of the next firing of `name`, unchanged
pub fn wait_for(scheduler: &Scheduler, bus: Rc<EventBus>) -> TaskFactory<String, Vec<Value>> {
    scheduler.task(move |name: String| {
        let bus = bus.clone();
        async move { next_event(&bus, &name).await }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{Channel, Outcome, TaskState};
    use crate::platform::ManualClock;
    use serde_json::json;
    use std::cell::Cell;

    #[test]
    fn test_emit_without_listeners() {
        let bus = EventBus::new();
        assert_eq!(bus.emit("nothing", vec![]), 0);
        assert!(bus.is_empty());
    }

    #[test]
    fn test_listeners_are_one_shot() {
        let bus = EventBus::new();
        let calls = Rc::new(Cell::new(0));
        for _ in 0..3 {
            let calls = calls.clone();
            bus.once("ping", move |_| calls.set(calls.get() + 1));
        }
        assert_eq!(bus.listener_count("ping"), 3);

        assert_eq!(bus.emit("ping", vec![json!(1)]), 3);
        assert_eq!(bus.emit("ping", vec![json!(2)]), 0);
        assert_eq!(calls.get(), 3);
        assert_eq!(bus.listener_count("ping"), 0);
    }

    #[test]
    fn test_reregistering_listener_waits_for_next_firing() {
        let bus = Rc::new(EventBus::new());
        let seen = Rc::new(RefCell::new(Vec::new()));

        let (inner_bus, inner_seen) = (bus.clone(), seen.clone());
        bus.once("step", move |args| {
            inner_seen.borrow_mut().push(args[0].clone());
            let seen = inner_seen.clone();
            inner_bus.once("step", move |args| seen.borrow_mut().push(args[0].clone()));
        });

        bus.emit("step", vec![json!("a")]);
        assert_eq!(seen.borrow().len(), 1);
        bus.emit("step", vec![json!("b")]);
        assert_eq!(seen.borrow().as_slice(), &[json!("a"), json!("b")]);
    }

    #[test]
    fn test_wait_for_returns_event_arguments() {
        let sched = Scheduler::new(Rc::new(ManualClock::new()));
        let bus = Rc::new(EventBus::new());
        let handle = wait_for(&sched, bus.clone()).start("PlayerSpawn".to_string());

        // Firing before the task registered is missed
        bus.emit("PlayerSpawn", vec![json!("early")]);

        sched.tick(&Channel::PRIMARY);
        sched.tick(&Channel::PRIMARY);
        assert_eq!(handle.state(), TaskState::Suspended);
        assert_eq!(bus.listener_count("PlayerSpawn"), 1);

        let args = vec![json!("alice"), json!({ "x": 1, "y": 2 })];
        bus.emit("PlayerSpawn", args.clone());
        sched.tick(&Channel::PRIMARY);
        sched.tick(&Channel::PRIMARY);

        assert_eq!(handle.outcome(), Some(Outcome::Success(args)));
    }
}
