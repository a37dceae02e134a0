//! The event dispatcher: hook registry, priority event queue, and the
//! cooperative dispatch loop.
//!
//! # Hook storage
//!
//! Hooks live in two buckets. Hooks whose interests pin specific event
//! types go into a per-type list (seeded with every already-registered
//! untyped hook); hooks with no type restriction go into the untyped
//! bucket *and* into every existing per-type list. Each affected list is
//! re-sorted on registration so the `before`/`after` graph stays
//! satisfied; a cycle rolls the registration back.
//!
//! # Dispatch
//!
//! The queue orders events by descending priority, then ascending
//! sequence number (same-priority events run FIFO). The loop picks the
//! head event, runs its hooks strictly in collected order with at most
//! one hook in flight, and drops the event as soon as its cancellation
//! token is set.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::event::Event;
use crate::glob;
use crate::hook::{Hook, HookTiming};

// ---------------------------------------------------------------------------
// Hook ordering
// ---------------------------------------------------------------------------

struct SortItem {
    hook: Arc<Hook>,
    /// Name patterns this hook must run after.
    dependencies: Vec<String>,
}

fn any_name_matches(pattern: &str, items: &[SortItem]) -> bool {
    items.iter().any(|item| glob::pattern_match(pattern, item.hook.name()))
}

/// Orders hooks so that for every `before`/`after` edge `A -> B`, A comes
/// first. Returns `None` when the dependencies contain a cycle.
///
/// `after` patterns become dependencies directly; each `before` pattern
/// becomes an `after` dependency on every hook in the set that it matches.
/// A dependency pattern that matches nothing in the set is satisfied
/// trivially.
fn sort_hooks(hooks: &[Arc<Hook>]) -> Option<Vec<Arc<Hook>>> {
    let mut collected: VecDeque<SortItem> = hooks
        .iter()
        .map(|hook| SortItem { hook: hook.clone(), dependencies: hook.after().to_vec() })
        .collect();

    // convert "before" into "after" edges on the matching hooks
    for i in 0..collected.len() {
        let name = collected[i].hook.name().to_string();
        let before: Vec<String> = collected[i].hook.before().to_vec();
        for pattern in before {
            for j in 0..collected.len() {
                if j != i && glob::pattern_match(&pattern, collected[j].hook.name()) {
                    collected[j].dependencies.push(name.clone());
                }
            }
        }
    }

    let mut result: Vec<SortItem> = Vec::with_capacity(collected.len());
    while !collected.is_empty() {
        let mut remaining: VecDeque<SortItem> = VecDeque::new();
        let mut made_progress = false;

        while let Some(item) = collected.pop_front() {
            let satisfied = item.dependencies.iter().all(|dep| {
                any_name_matches(dep, &result)
                    || !(any_name_matches(dep, collected.make_contiguous())
                        || any_name_matches(dep, remaining.make_contiguous()))
            });
            if satisfied {
                result.push(item);
                made_progress = true;
            } else {
                remaining.push_back(item);
            }
        }

        if !made_progress {
            return None;
        }
        collected = remaining;
    }

    Some(result.into_iter().map(|item| item.hook).collect())
}

// ---------------------------------------------------------------------------
// EventDispatcher
// ---------------------------------------------------------------------------

struct QueuedEvent {
    event: Arc<Event>,
    hooks: VecDeque<Arc<Hook>>,
    seq: u64,
}

pub(crate) struct DispatcherShared {
    /// Per-event-type hook lists; each list also contains every untyped hook.
    typed_hooks: Mutex<HashMap<String, Vec<Arc<Hook>>>>,
    /// Hooks with no event-type restriction.
    untyped_hooks: Mutex<Vec<Arc<Hook>>>,
    queue: Mutex<Vec<QueuedEvent>>,
    seq: AtomicU64,
    wake: Notify,
}

/// The single-threaded cooperative scheduler owning the event queue and
/// hook registry. Clones share the same dispatcher.
#[derive(Clone)]
pub struct EventDispatcher {
    shared: Arc<DispatcherShared>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(DispatcherShared {
                typed_hooks: Mutex::new(HashMap::new()),
                untyped_hooks: Mutex::new(Vec::new()),
                queue: Mutex::new(Vec::new()),
                seq: AtomicU64::new(0),
                wake: Notify::new(),
            }),
        }
    }

    // -- Hook registry --

    /// Registers a hook.
    ///
    /// Fails when the hook is already registered, when another hook with
    /// the same name exists, or when the hook's `before`/`after`
    /// declarations would introduce an ordering cycle (in which case the
    /// registration is fully rolled back).
    pub fn register_hook(&self, hook: &Arc<Hook>) -> Result<()> {
        if hook.registration().is_some() {
            return Err(Error::invalid_argument(format!(
                "hook '{}' is already registered",
                hook.name()
            )));
        }

        let mut typed = self.shared.typed_hooks.lock().unwrap();
        let mut untyped = self.shared.untyped_hooks.lock().unwrap();

        let name_taken = untyped.iter().any(|h| h.name() == hook.name())
            || typed.values().flatten().any(|h| h.name() == hook.name());
        if name_taken {
            return Err(Error::validation(format!(
                "a hook named '{}' is already registered",
                hook.name()
            )));
        }

        let mut sort_failed = false;
        match hook.matching_event_types() {
            Some(event_types) => {
                for event_type in &event_types {
                    log::debug!(
                        target: "weft-dispatcher",
                        "registering hook {} for event type {event_type}",
                        hook.name()
                    );
                    // a new per-type list starts from the untyped hooks
                    let list =
                        typed.entry(event_type.clone()).or_insert_with(|| untyped.clone());
                    list.push(hook.clone());
                    match sort_hooks(list) {
                        Some(sorted) => *list = sorted,
                        None => {
                            sort_failed = true;
                            break;
                        }
                    }
                }
            }
            None => {
                log::debug!(
                    target: "weft-dispatcher",
                    "registering hook {} for all event types",
                    hook.name()
                );
                for list in typed.values_mut() {
                    list.push(hook.clone());
                    match sort_hooks(list) {
                        Some(sorted) => *list = sorted,
                        None => {
                            sort_failed = true;
                            break;
                        }
                    }
                }
                if !sort_failed {
                    untyped.push(hook.clone());
                    match sort_hooks(&untyped) {
                        Some(sorted) => *untyped = sorted,
                        None => sort_failed = true,
                    }
                }
            }
        }

        if sort_failed {
            for list in typed.values_mut() {
                list.retain(|h| !Arc::ptr_eq(h, hook));
            }
            untyped.retain(|h| !Arc::ptr_eq(h, hook));
            return Err(Error::validation(format!(
                "cannot register hook '{}' because of circular dependencies",
                hook.name()
            )));
        }

        hook.set_registration(Some(Arc::downgrade(&self.shared)));
        log::debug!(target: "weft-dispatcher", "registered hook {}", hook.name());
        Ok(())
    }

    /// Unregisters a hook, removing it from every list it appears in.
    pub fn unregister_hook(&self, hook: &Arc<Hook>) -> Result<()> {
        let registered_here = hook
            .registration()
            .map(|reg| reg.ptr_eq(&Arc::downgrade(&self.shared)))
            .unwrap_or(false);
        if !registered_here {
            return Err(Error::not_found(format!(
                "hook '{}' is not registered on this dispatcher",
                hook.name()
            )));
        }

        let mut typed = self.shared.typed_hooks.lock().unwrap();
        let mut untyped = self.shared.untyped_hooks.lock().unwrap();
        for list in typed.values_mut() {
            list.retain(|h| !Arc::ptr_eq(h, hook));
        }
        untyped.retain(|h| !Arc::ptr_eq(h, hook));
        hook.set_registration(None);
        Ok(())
    }

    /// The hooks consulted for events of `event_type`: the per-type list
    /// if one exists, the untyped list otherwise.
    pub fn hooks_for_event_type(&self, event_type: &str) -> Vec<Arc<Hook>> {
        let typed = self.shared.typed_hooks.lock().unwrap();
        match typed.get(event_type) {
            Some(list) => list.clone(),
            None => self.shared.untyped_hooks.lock().unwrap().clone(),
        }
    }

    // -- Event queue --

    /// Collects the hooks that run for `event`, in execution order.
    /// On-event hooks come first, then after-events (terminal) hooks;
    /// both groups are topologically sorted. `None` signals a cycle.
    fn collect_hooks(&self, event: &Event) -> Option<VecDeque<Arc<Hook>>> {
        let candidates = self.hooks_for_event_type(event.event_type());
        let matching: Vec<Arc<Hook>> =
            candidates.into_iter().filter(|hook| hook.runs_for_event(event)).collect();

        let (on_event, after): (Vec<_>, Vec<_>) =
            matching.into_iter().partition(|hook| hook.timing() == HookTiming::OnEvent);

        let mut hooks = VecDeque::new();
        hooks.extend(sort_hooks(&on_event)?);
        hooks.extend(sort_hooks(&after)?);
        Some(hooks)
    }

    /// Pushes an event for dispatching, but only if at least one hook
    /// runs for it; an event that no hook matches is discarded
    /// immediately. Returns the event, which stays valid for cancellation.
    pub fn push_event(&self, event: Event) -> Arc<Event> {
        let event = Arc::new(event);

        let hooks = match self.collect_hooks(&event) {
            Some(hooks) => hooks,
            None => {
                log::error!(
                    target: "weft-dispatcher",
                    "detected circular dependencies in the collected hooks for {}",
                    event.name()
                );
                return event;
            }
        };
        if hooks.is_empty() {
            log::trace!(
                target: "weft-dispatcher",
                "no hooks for event ({}), discarding",
                event.name()
            );
            return event;
        }

        let seq = self.shared.seq.fetch_add(1, Ordering::Relaxed);
        let item = QueuedEvent { event: event.clone(), hooks, seq };

        let mut queue = self.shared.queue.lock().unwrap();
        let priority = event.priority();
        let idx = queue.partition_point(|queued| {
            queued.event.priority() > priority
                || (queued.event.priority() == priority && queued.seq < seq)
        });
        queue.insert(idx, item);
        drop(queue);

        log::debug!(target: "weft-dispatcher", "pushed event ({})", event.name());
        self.shared.wake.notify_one();
        event
    }

    /// Number of events currently queued.
    pub fn pending_events(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    /// Takes the next `(event, hook)` pair to run, discarding cancelled
    /// and exhausted events along the way.
    fn take_next(&self) -> Option<(Arc<Event>, Arc<Hook>)> {
        let mut queue = self.shared.queue.lock().unwrap();
        loop {
            let front = queue.first_mut()?;
            if front.event.cancellation().is_cancelled() {
                log::debug!(
                    target: "weft-dispatcher",
                    "event ({}) cancelled, removing it",
                    front.event.name()
                );
                queue.remove(0);
                continue;
            }
            match front.hooks.pop_front() {
                Some(hook) => return Some((front.event.clone(), hook)),
                None => {
                    queue.remove(0);
                    continue;
                }
            }
        }
    }

    async fn run_one(&self, event: &Arc<Event>, hook: &Arc<Hook>) {
        log::trace!(
            target: "weft-dispatcher",
            "dispatching event ({}) running hook ({})",
            event.name(),
            hook.name()
        );
        if let Err(e) = hook.run(event).await {
            if e.is_cancellation() {
                log::debug!(target: "weft-dispatcher", "hook ({}) cancelled", hook.name());
            } else {
                // the event's remaining hooks still run
                log::warn!(target: "weft-dispatcher", "hook ({}) failed: {e}", hook.name());
            }
        }
    }

    /// Drives the dispatcher forever, sleeping while the queue is idle.
    /// At most one hook is in flight at any time.
    pub async fn run(&self) {
        loop {
            match self.take_next() {
                Some((event, hook)) => self.run_one(&event, &hook).await,
                None => self.shared.wake.notified().await,
            }
        }
    }

    /// Drives the dispatcher until the queue is empty, then returns.
    pub async fn run_until_idle(&self) {
        while let Some((event, hook)) = self.take_next() {
            self.run_one(&event, &hook).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::{TransitionCtl, STEP_CUSTOM_START, STEP_NONE};
    use crate::properties::Properties;

    const TEST_EVENT: &str = "test-event";

    fn logging_hook(
        name: &str,
        before: &[&str],
        after: &[&str],
        log: &Arc<Mutex<Vec<String>>>,
    ) -> Arc<Hook> {
        let log = log.clone();
        let label = name.to_string();
        let mut hook = Hook::simple(name, before, after, move |_| {
            log.lock().unwrap().push(label.clone());
            Ok(())
        });
        hook.add_event_type_interest(TEST_EVENT).unwrap();
        Arc::new(hook)
    }

    fn test_event(priority: i32, tag: &str) -> Event {
        Event::new(
            TEST_EVENT,
            priority,
            Some(Properties::from_pairs([("tag", tag)])),
            None,
            None,
        )
    }

    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    // ---------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------

    #[test]
    fn duplicate_names_are_rejected() {
        let dispatcher = EventDispatcher::new();
        let a = logging_hook("same", &[], &[], &Arc::new(Mutex::new(Vec::new())));
        let b = logging_hook("same", &[], &[], &Arc::new(Mutex::new(Vec::new())));
        dispatcher.register_hook(&a).unwrap();
        assert!(matches!(dispatcher.register_hook(&b), Err(Error::Validation { .. })));
    }

    #[test]
    fn double_registration_is_rejected() {
        let dispatcher = EventDispatcher::new();
        let hook = logging_hook("h", &[], &[], &Arc::new(Mutex::new(Vec::new())));
        dispatcher.register_hook(&hook).unwrap();
        assert!(matches!(
            dispatcher.register_hook(&hook),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn unregister_removes_from_all_lists() {
        let dispatcher = EventDispatcher::new();
        let hook = logging_hook("h", &[], &[], &Arc::new(Mutex::new(Vec::new())));
        dispatcher.register_hook(&hook).unwrap();
        assert_eq!(dispatcher.hooks_for_event_type(TEST_EVENT).len(), 1);

        dispatcher.unregister_hook(&hook).unwrap();
        assert!(dispatcher.hooks_for_event_type(TEST_EVENT).is_empty());
        assert!(!hook.is_registered());
        // a second unregister is an error
        assert!(dispatcher.unregister_hook(&hook).is_err());
    }

    #[test]
    fn untyped_hooks_join_every_typed_list() {
        let dispatcher = EventDispatcher::new();
        let typed = logging_hook("typed", &[], &[], &Arc::new(Mutex::new(Vec::new())));
        dispatcher.register_hook(&typed).unwrap();

        let mut untyped = Hook::simple("untyped", &[], &[], |_| Ok(()));
        let mut interest = crate::interest::ObjectInterest::new(crate::interest::ObjectType::Event);
        interest.add_constraint(
            crate::interest::ConstraintType::Property,
            "tag",
            crate::interest::ConstraintVerb::IsPresent,
            None,
        );
        untyped.add_interest(interest).unwrap();
        let untyped = Arc::new(untyped);
        dispatcher.register_hook(&untyped).unwrap();

        // the typed list now contains both hooks
        let names: Vec<String> = dispatcher
            .hooks_for_event_type(TEST_EVENT)
            .iter()
            .map(|h| h.name().to_string())
            .collect();
        assert!(names.contains(&"typed".to_string()));
        assert!(names.contains(&"untyped".to_string()));

        // unknown event types fall back to the untyped bucket
        let fallback = dispatcher.hooks_for_event_type("something-else");
        assert_eq!(fallback.len(), 1);
        assert_eq!(fallback[0].name(), "untyped");
    }

    // ---------------------------------------------------------------
    // Cycle rejection (scenario: D after E, E after D)
    // ---------------------------------------------------------------

    #[test]
    fn registration_cycle_rolls_back() {
        let dispatcher = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let d = logging_hook("D", &[], &["E"], &log);
        let e = logging_hook("E", &[], &["D"], &log);

        dispatcher.register_hook(&d).unwrap();
        let err = dispatcher.register_hook(&e).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));

        // D remains, E is absent from every list
        let names: Vec<String> = dispatcher
            .hooks_for_event_type(TEST_EVENT)
            .iter()
            .map(|h| h.name().to_string())
            .collect();
        assert_eq!(names, vec!["D".to_string()]);
        assert!(d.is_registered());
        assert!(!e.is_registered());
    }

    // ---------------------------------------------------------------
    // Hook ordering (scenario: A before C, B after A, C after B)
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn before_after_ordering() {
        let dispatcher = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = logging_hook("A", &["C"], &[], &log);
        let b = logging_hook("B", &[], &["A"], &log);
        let c = logging_hook("C", &[], &["B"], &log);

        // registration order must not matter for the constrained order
        dispatcher.register_hook(&c).unwrap();
        dispatcher.register_hook(&b).unwrap();
        dispatcher.register_hook(&a).unwrap();

        dispatcher.push_event(test_event(0, "x"));
        dispatcher.run_until_idle().await;

        assert_eq!(*log.lock().unwrap(), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn before_patterns_apply_to_all_matching_hooks() {
        let dispatcher = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = logging_hook("apply-linking", &[], &[], &log);
        let b = logging_hook("apply-routing", &[], &[], &log);
        // registered last, yet its before-glob pushes it ahead of both
        let setup = logging_hook("setup", &["apply-*"], &[], &log);

        dispatcher.register_hook(&a).unwrap();
        dispatcher.register_hook(&b).unwrap();
        dispatcher.register_hook(&setup).unwrap();

        dispatcher.push_event(test_event(0, "x"));
        dispatcher.run_until_idle().await;

        let order = log.lock().unwrap();
        assert_eq!(order.len(), 3);
        assert_eq!(order[0], "setup");
    }

    // ---------------------------------------------------------------
    // Queue semantics
    // ---------------------------------------------------------------

    #[test]
    fn event_without_hooks_is_not_queued() {
        let dispatcher = EventDispatcher::new();
        dispatcher.push_event(test_event(0, "x"));
        assert_eq!(dispatcher.pending_events(), 0);
    }

    #[tokio::test]
    async fn priority_order_with_fifo_ties() {
        let dispatcher = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = log.clone();
        let mut hook = Hook::simple("recorder", &[], &[], move |event| {
            log2.lock().unwrap().push(event.properties().get("tag").unwrap().to_string());
            Ok(())
        });
        hook.add_event_type_interest(TEST_EVENT).unwrap();
        dispatcher.register_hook(&Arc::new(hook)).unwrap();

        dispatcher.push_event(test_event(10, "e1"));
        dispatcher.push_event(test_event(100, "e2"));
        dispatcher.push_event(test_event(10, "e1'"));
        assert_eq!(dispatcher.pending_events(), 3);

        dispatcher.run_until_idle().await;
        assert_eq!(*log.lock().unwrap(), vec!["e2", "e1", "e1'"]);
    }

    #[tokio::test]
    async fn cancelled_event_runs_no_hooks() {
        let dispatcher = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let hook = logging_hook("recorder", &[], &[], &log);
        dispatcher.register_hook(&hook).unwrap();

        let event = dispatcher.push_event(test_event(0, "x"));
        event.stop_processing();
        dispatcher.run_until_idle().await;

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(dispatcher.pending_events(), 0);
    }

    #[tokio::test]
    async fn cancellation_mid_event_skips_remaining_hooks() {
        let dispatcher = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let log2 = log.clone();
        let mut stopper = Hook::simple("stopper", &["recorder"], &[], move |event| {
            log2.lock().unwrap().push("stopper".to_string());
            event.stop_processing();
            Ok(())
        });
        stopper.add_event_type_interest(TEST_EVENT).unwrap();
        dispatcher.register_hook(&Arc::new(stopper)).unwrap();
        dispatcher.register_hook(&logging_hook("recorder", &[], &[], &log)).unwrap();

        dispatcher.push_event(test_event(0, "x"));
        dispatcher.run_until_idle().await;

        assert_eq!(*log.lock().unwrap(), vec!["stopper"]);
    }

    #[tokio::test]
    async fn failing_hook_does_not_stop_the_event() {
        let dispatcher = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut failing = Hook::simple("failing", &["recorder"], &[], |_| {
            Err(Error::operation_failed("deliberate"))
        });
        failing.add_event_type_interest(TEST_EVENT).unwrap();
        dispatcher.register_hook(&Arc::new(failing)).unwrap();
        dispatcher.register_hook(&logging_hook("recorder", &[], &[], &log)).unwrap();

        dispatcher.push_event(test_event(0, "x"));
        dispatcher.run_until_idle().await;

        assert_eq!(*log.lock().unwrap(), vec!["recorder"]);
    }

    #[tokio::test]
    async fn after_events_hooks_run_last() {
        let dispatcher = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let log2 = log.clone();
        let mut terminal = Hook::simple("finalizer", &["*"], &[], move |_| {
            log2.lock().unwrap().push("finalizer".to_string());
            Ok(())
        })
        .with_timing(HookTiming::AfterEvents);
        terminal.add_event_type_interest(TEST_EVENT).unwrap();
        dispatcher.register_hook(&Arc::new(terminal)).unwrap();
        dispatcher.register_hook(&logging_hook("worker", &[], &[], &log)).unwrap();

        dispatcher.push_event(test_event(0, "x"));
        dispatcher.run_until_idle().await;

        // despite the before=["*"] declaration, the terminal hook runs last
        assert_eq!(*log.lock().unwrap(), vec!["worker", "finalizer"]);
    }

    // ---------------------------------------------------------------
    // Transition suspension (scenario 5)
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn suspended_transition_blocks_later_events() {
        use std::sync::atomic::AtomicBool;

        let dispatcher = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        // the first step 1 suspends: it stashes its ctl and does not advance
        let pending: Arc<Mutex<Option<TransitionCtl>>> = Arc::new(Mutex::new(None));
        let pending2 = pending.clone();
        let suspend_once = Arc::new(AtomicBool::new(true));
        let log2 = log.clone();
        let mut transition = Hook::transition(
            "two-step",
            &[],
            &[],
            |_, step| {
                Ok(match step {
                    STEP_NONE => STEP_CUSTOM_START,
                    STEP_CUSTOM_START => STEP_CUSTOM_START + 1,
                    _ => STEP_NONE,
                })
            },
            move |ctl, step| {
                log2.lock().unwrap().push(format!("step-{step}"));
                if step == STEP_CUSTOM_START && suspend_once.swap(false, Ordering::SeqCst) {
                    *pending2.lock().unwrap() = Some(ctl.clone());
                } else {
                    ctl.advance();
                }
                Ok(())
            },
        );
        transition.add_event_type_interest(TEST_EVENT).unwrap();
        dispatcher.register_hook(&Arc::new(transition)).unwrap();

        let runner = dispatcher.clone();
        let loop_task = tokio::spawn(async move { runner.run().await });

        dispatcher.push_event(test_event(0, "first"));
        settle().await;

        // first step ran and is now suspended
        assert_eq!(*log.lock().unwrap(), vec!["step-16"]);

        // a second event queues up but its hooks do not start
        // (the suspended first event is still at the head of the queue)
        dispatcher.push_event(test_event(0, "second"));
        settle().await;
        assert_eq!(dispatcher.pending_events(), 2);
        assert_eq!(log.lock().unwrap().len(), 1);

        // completing step 1 lets step 2 run, then the second event
        pending.lock().unwrap().take().unwrap().advance();
        settle().await;
        assert_eq!(
            *log.lock().unwrap(),
            vec!["step-16".to_string(), "step-17".to_string(), "step-16".to_string(),
                 "step-17".to_string()]
        );
        assert_eq!(dispatcher.pending_events(), 0);

        loop_task.abort();
    }
}
