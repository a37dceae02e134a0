//! Hooks: named, interest-filtered units of work executed in response to
//! events.
//!
//! A hook declares which events it runs for (a list of validated
//! [`ObjectInterest`]s), where it sits in the execution order (`before` /
//! `after` name patterns), and how it executes:
//!
//! - a **simple** hook is a single synchronous closure;
//! - a **transition** hook is a step machine driven by the dispatch loop:
//!   `get_next_step` picks the next step number, `execute_step` starts it,
//!   and the transition suspends until [`TransitionCtl::advance`] (or
//!   [`TransitionCtl::return_error`]) posts the step's completion back to
//!   the loop.
//!
//! Hooks additionally declare whether they run on the event or after all
//! of the event's on-event hooks have finished (terminal hooks, used for
//! finalization).

use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;

use crate::dispatcher::DispatcherShared;
use crate::error::{Error, Result};
use crate::event::{keys, Event};
use crate::interest::{
    ConstraintType, ConstraintValue, ConstraintVerb, ObjectInterest, ObjectType,
};

/// The initial and terminal step number of a transition.
pub const STEP_NONE: u32 = 0;
/// First step number available to hook-defined steps.
pub const STEP_CUSTOM_START: u32 = 0x10;

// ---------------------------------------------------------------------------
// TransitionCtl
// ---------------------------------------------------------------------------

/// Handle given to a transition hook's closures.
///
/// A step that starts asynchronous work clones the handle, returns, and
/// calls [`advance`](Self::advance) when the work completes; the dispatch
/// loop resumes the transition at that point. Synchronous steps call
/// `advance` before returning.
#[derive(Clone)]
pub struct TransitionCtl {
    event: Arc<Event>,
    tx: mpsc::UnboundedSender<Result<()>>,
}

impl TransitionCtl {
    /// The event this transition runs for.
    pub fn event(&self) -> &Arc<Event> {
        &self.event
    }

    /// Marks the current step as complete; the dispatch loop advances the
    /// transition to its next step.
    pub fn advance(&self) {
        let _ = self.tx.send(Ok(()));
    }

    /// Fails the transition; the dispatch loop logs the failure and moves
    /// on to the event's next hook.
    pub fn return_error(&self, error: Error) {
        let _ = self.tx.send(Err(error));
    }
}

// ---------------------------------------------------------------------------
// Hook
// ---------------------------------------------------------------------------

pub type SimpleFn = dyn Fn(&Arc<Event>) -> Result<()> + Send + Sync;
pub type GetNextStepFn = dyn Fn(&TransitionCtl, u32) -> Result<u32> + Send + Sync;
pub type ExecuteStepFn = dyn Fn(&TransitionCtl, u32) -> Result<()> + Send + Sync;

/// How a hook executes.
pub enum HookExec {
    /// One synchronous invocation.
    Simple(Arc<SimpleFn>),
    /// A multi-step state machine driven by the dispatch loop.
    Transition { get_next_step: Arc<GetNextStepFn>, execute_step: Arc<ExecuteStepFn> },
}

/// When a hook runs relative to the other hooks of its event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookTiming {
    /// Runs in its ordered position among the event's hooks.
    #[default]
    OnEvent,
    /// Runs after all on-event hooks of the event have finished.
    AfterEvents,
}

/// A named, interest-filtered unit of work registered on a dispatcher.
pub struct Hook {
    name: String,
    before: Vec<String>,
    after: Vec<String>,
    interests: Vec<ObjectInterest>,
    exec: HookExec,
    timing: HookTiming,
    dispatcher: Mutex<Option<Weak<DispatcherShared>>>,
}

impl Hook {
    /// Constructs a simple (synchronous) hook.
    ///
    /// `before` and `after` are glob patterns over hook names: this hook
    /// runs before any collected hook matching a `before` pattern and
    /// after any matching an `after` pattern.
    pub fn simple(
        name: &str,
        before: &[&str],
        after: &[&str],
        closure: impl Fn(&Arc<Event>) -> Result<()> + Send + Sync + 'static,
    ) -> Hook {
        Self::with_exec(name, before, after, HookExec::Simple(Arc::new(closure)))
    }

    /// Constructs a transition (multi-step asynchronous) hook.
    pub fn transition(
        name: &str,
        before: &[&str],
        after: &[&str],
        get_next_step: impl Fn(&TransitionCtl, u32) -> Result<u32> + Send + Sync + 'static,
        execute_step: impl Fn(&TransitionCtl, u32) -> Result<()> + Send + Sync + 'static,
    ) -> Hook {
        Self::with_exec(
            name,
            before,
            after,
            HookExec::Transition {
                get_next_step: Arc::new(get_next_step),
                execute_step: Arc::new(execute_step),
            },
        )
    }

    fn with_exec(name: &str, before: &[&str], after: &[&str], exec: HookExec) -> Hook {
        Hook {
            name: name.to_string(),
            before: before.iter().map(|s| s.to_string()).collect(),
            after: after.iter().map(|s| s.to_string()).collect(),
            interests: Vec::new(),
            exec,
            timing: HookTiming::OnEvent,
            dispatcher: Mutex::new(None),
        }
    }

    /// Marks this hook to run after all on-event hooks of its event.
    pub fn with_timing(mut self, timing: HookTiming) -> Hook {
        self.timing = timing;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn before(&self) -> &[String] {
        &self.before
    }

    pub fn after(&self) -> &[String] {
        &self.after
    }

    pub fn timing(&self) -> HookTiming {
        self.timing
    }

    /// Declares interest in events. The interest is validated here;
    /// an invalid interest is rejected and not stored.
    pub fn add_interest(&mut self, mut interest: ObjectInterest) -> Result<()> {
        interest.validate()?;
        self.interests.push(interest);
        Ok(())
    }

    /// Shorthand for an interest in events of one specific type.
    pub fn add_event_type_interest(&mut self, event_type: &str) -> Result<()> {
        let mut interest = ObjectInterest::new(ObjectType::Event);
        interest.add_constraint(
            ConstraintType::Property,
            keys::EVENT_TYPE,
            ConstraintVerb::Equals,
            Some(ConstraintValue::String(event_type.to_string())),
        );
        self.add_interest(interest)
    }

    // -- Registration bookkeeping (driven by the dispatcher) --

    pub(crate) fn set_registration(&self, dispatcher: Option<Weak<DispatcherShared>>) {
        *self.dispatcher.lock().unwrap() = dispatcher;
    }

    pub(crate) fn registration(&self) -> Option<Weak<DispatcherShared>> {
        self.dispatcher.lock().unwrap().clone()
    }

    pub fn is_registered(&self) -> bool {
        self.dispatcher.lock().unwrap().is_some()
    }

    // -- Event matching --

    /// The event types this hook explicitly declares interest in, or
    /// `None` when at least one interest carries no `event.type`
    /// equality constraint (an untyped hook, applying to every type).
    pub(crate) fn matching_event_types(&self) -> Option<Vec<String>> {
        let mut types: Vec<String> = Vec::new();
        if self.interests.is_empty() {
            return None;
        }
        for interest in &self.interests {
            let before = types.len();
            interest.collect_string_equalities(keys::EVENT_TYPE, &mut types);
            if types.len() == before {
                return None;
            }
        }
        types.dedup();
        Some(types)
    }

    /// Checks if this hook should execute for the given event.
    pub fn runs_for_event(&self, event: &Event) -> bool {
        let props = event.properties();
        let subject = event.subject();
        let subject_type =
            subject.as_ref().map(|s| s.object_type()).unwrap_or(ObjectType::Event);

        for interest in &self.interests {
            let parts = interest.matches_parts(
                subject_type,
                subject.as_deref(),
                Some(props),
                Some(props),
            );
            if parts.type_ok && parts.constraints_ok {
                return true;
            }
            // an interest declared on the generic event type still matches
            // when only the subject's concrete type disagreed
            if subject.is_some()
                && parts.constraints_ok
                && ObjectType::Event.is_a(interest.object_type())
            {
                return true;
            }
        }
        false
    }

    // -- Execution --

    /// Runs the hook for `event` to completion.
    ///
    /// Simple hooks run synchronously; transition hooks are driven through
    /// their step machine, suspending at each asynchronous step. The
    /// event's cancellation token is observed at every step boundary.
    pub(crate) async fn run(&self, event: &Arc<Event>) -> Result<()> {
        match &self.exec {
            HookExec::Simple(closure) => closure.as_ref()(event),
            HookExec::Transition { get_next_step, execute_step } => {
                let (tx, mut rx) = mpsc::unbounded_channel();
                let ctl = TransitionCtl { event: event.clone(), tx };
                let mut step = STEP_NONE;
                loop {
                    if event.cancellation().is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                    step = get_next_step.as_ref()(&ctl, step)?;
                    if step == STEP_NONE {
                        return Ok(());
                    }
                    execute_step.as_ref()(&ctl, step)?;
                    match rx.recv().await {
                        Some(Ok(())) => {}
                        Some(Err(e)) => return Err(e),
                        None => {
                            return Err(Error::operation_failed(
                                "transition dropped without completing its step",
                            ))
                        }
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("name", &self.name)
            .field("before", &self.before)
            .field("after", &self.after)
            .field("timing", &self.timing)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
