//! Inhibitors: concurrent veto predicates with a priority and a reason.
//!
//! [`InhibitorHandler::test`] evaluates every enabled inhibitor of a type
//! concurrently and, once all have settled, reports the reason of the
//! highest-priority inhibitor that tripped. Ties go to the inhibitor
//! registered first.

use std::cmp::Reverse;
use std::fmt;
use std::ops::Deref;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use cinder_core::{BoxError, BoxFuture, Handler, HandlerOptions, Module, ModuleCore, ModuleOptions, Payload};
use futures::FutureExt;
use futures::future;
use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, warn};

use crate::command::Command;
use crate::panic_message;

/// Stage an inhibitor runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InhibitorType {
    /// Every inbound message, before anything else.
    All,
    /// Messages that look like commands, before the command is resolved.
    PreCommand,
    /// A resolved command, before it runs.
    #[default]
    Command,
}

impl fmt::Display for InhibitorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::All => "all",
            Self::PreCommand => "pre-command",
            Self::Command => "command",
        })
    }
}

/// What an inhibitor that fails to evaluate counts as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InhibitorPolicy {
    /// The error is logged and the inhibitor counts as not tripped.
    #[default]
    FailOpen,
    /// The error is logged and the inhibitor counts as tripped.
    FailClosed,
}

/// Predicate of an inhibitor. `Ok(true)` trips it.
pub type InhibitFn = Arc<
    dyn Fn(Arc<Inhibitor>, Payload, Option<Arc<Command>>) -> BoxFuture<'static, Result<bool, BoxError>>
        + Send
        + Sync,
>;

/// Options for [`Inhibitor`].
#[derive(Debug, Clone, Default)]
pub struct InhibitorOptions {
    /// Identity options.
    pub module: ModuleOptions,
    /// Stage.
    pub kind: InhibitorType,
    /// Higher wins.
    pub priority: i32,
    /// Reported when this inhibitor wins.
    pub reason: String,
}

impl InhibitorOptions {
    /// Options with an explicit id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            module: ModuleOptions::new(id),
            ..Self::default()
        }
    }

    /// Sets the stage.
    pub fn kind(mut self, kind: InhibitorType) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the priority.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the reason.
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }
}

/// An async veto predicate.
pub struct Inhibitor {
    core: ModuleCore,
    kind: InhibitorType,
    priority: i32,
    reason: String,
    predicate: InhibitFn,
}

impl Inhibitor {
    /// Creates an inhibitor.
    pub fn new<F, Fut>(options: InhibitorOptions, predicate: F) -> Self
    where
        F: Fn(Arc<Inhibitor>, Payload, Option<Arc<Command>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
    {
        let predicate: InhibitFn = Arc::new(
            move |inhibitor: Arc<Inhibitor>,
                  message: Payload,
                  command: Option<Arc<Command>>|
                  -> BoxFuture<'static, Result<bool, BoxError>> {
                Box::pin(predicate(inhibitor, message, command))
            },
        );
        Self {
            core: ModuleCore::new(options.module),
            kind: options.kind,
            priority: options.priority,
            reason: options.reason,
            predicate,
        }
    }

    /// Stage.
    pub fn kind(&self) -> InhibitorType {
        self.kind
    }

    /// Priority.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Reason reported when this inhibitor wins.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Evaluates the predicate. A panic is returned as an error.
    pub async fn exec(self: &Arc<Self>, message: Payload, command: Option<Arc<Command>>) -> Result<bool, BoxError> {
        let this = Arc::clone(self);
        let evaluation = async move { (this.predicate)(Arc::clone(&this), message, command).await };
        match AssertUnwindSafe(evaluation)
            .catch_unwind()
            .instrument(self.core.span())
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => Err(panic_message(panic.as_ref()).into()),
        }
    }
}

impl Module for Inhibitor {
    type Shared = ();

    fn core(&self) -> &ModuleCore {
        &self.core
    }
}

/// Handler of [`Inhibitor`]s and the inhibition chain.
#[derive(Debug, Clone)]
pub struct InhibitorHandler {
    inner: Arc<Handler<Inhibitor>>,
    policy: InhibitorPolicy,
}

impl InhibitorHandler {
    /// Creates a fail-open handler.
    pub fn new(options: HandlerOptions) -> Self {
        Self::with_policy(options, InhibitorPolicy::default())
    }

    /// Creates a handler with an explicit error policy.
    pub fn with_policy(options: HandlerOptions, policy: InhibitorPolicy) -> Self {
        Self {
            inner: Handler::new(options),
            policy,
        }
    }

    /// Error policy.
    pub fn policy(&self) -> InhibitorPolicy {
        self.policy
    }

    /// The underlying handler.
    pub fn handler(&self) -> &Arc<Handler<Inhibitor>> {
        &self.inner
    }

    /// Runs the chain for `kind`. Returns the reason of the winning
    /// inhibitor, or `None` when nothing tripped.
    ///
    /// Nothing is evaluated when no enabled inhibitor has this type.
    pub async fn test(
        &self,
        kind: InhibitorType,
        message: Payload,
        command: Option<Arc<Command>>,
    ) -> Option<String> {
        let candidates: Vec<Arc<Inhibitor>> = self
            .inner
            .values()
            .into_iter()
            .filter(|i| i.kind == kind && i.core().is_enabled())
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let outcomes = future::join_all(
            candidates
                .iter()
                .map(|i| i.exec(Arc::clone(&message), command.clone())),
        )
        .await;

        let winner = candidates
            .iter()
            .zip(outcomes)
            .enumerate()
            .filter(|(_, (inhibitor, outcome))| self.tripped(inhibitor, outcome))
            .min_by_key(|(rank, (inhibitor, _))| (Reverse(inhibitor.priority), *rank))
            .map(|(_, (inhibitor, _))| inhibitor)?;

        debug!(
            kind = %kind,
            inhibitor = %winner.core().qualified_name(),
            priority = winner.priority,
            "Inhibited"
        );
        Some(winner.reason.clone())
    }

    fn tripped(&self, inhibitor: &Inhibitor, outcome: &Result<bool, BoxError>) -> bool {
        match outcome {
            Ok(tripped) => *tripped,
            Err(e) => {
                warn!(
                    inhibitor = %inhibitor.core().qualified_name(),
                    policy = ?self.policy,
                    error = %e,
                    "Inhibitor failed"
                );
                self.policy == InhibitorPolicy::FailClosed
            }
        }
    }
}

impl Deref for InhibitorHandler {
    type Target = Handler<Inhibitor>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_core::ModuleLifecycle;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn handler(policy: InhibitorPolicy) -> InhibitorHandler {
        InhibitorHandler::with_policy(HandlerOptions::new("inhibitors").without_registry(), policy)
    }

    fn fixed(id: &str, kind: InhibitorType, priority: i32, trips: bool) -> Inhibitor {
        Inhibitor::new(
            InhibitorOptions::new(id)
                .kind(kind)
                .priority(priority)
                .reason(format!("{id} says no")),
            move |_, _, _| async move { Ok::<_, BoxError>(trips) },
        )
    }

    fn message() -> Payload {
        Arc::new(String::from("!ping"))
    }

    #[tokio::test]
    async fn test_highest_priority_tripped_wins() {
        let chain = handler(InhibitorPolicy::FailOpen);
        chain.insert(fixed("a", InhibitorType::Command, 1, true)).unwrap();
        chain.insert(fixed("b", InhibitorType::Command, 5, true)).unwrap();
        chain.insert(fixed("c", InhibitorType::Command, 3, false)).unwrap();

        let reason = chain.test(InhibitorType::Command, message(), None).await;
        assert_eq!(reason.as_deref(), Some("b says no"));
    }

    #[tokio::test]
    async fn test_ties_go_to_first_registered() {
        let chain = handler(InhibitorPolicy::FailOpen);
        chain.insert(fixed("first", InhibitorType::All, 2, true)).unwrap();
        chain.insert(fixed("second", InhibitorType::All, 2, true)).unwrap();
        // Reloading an id keeps its place.
        chain.insert(fixed("first", InhibitorType::All, 2, true)).unwrap();

        let reason = chain.test(InhibitorType::All, message(), None).await;
        assert_eq!(reason.as_deref(), Some("first says no"));
    }

    #[tokio::test]
    async fn test_no_matching_type_invokes_nothing() {
        let chain = handler(InhibitorPolicy::FailOpen);
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        chain
            .insert(Inhibitor::new(
                InhibitorOptions::new("all").kind(InhibitorType::All),
                move |_, _, _| {
                    c.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, BoxError>(true) }
                },
            ))
            .unwrap();

        assert!(chain.test(InhibitorType::PreCommand, message(), None).await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_nothing_tripped() {
        let chain = handler(InhibitorPolicy::FailOpen);
        chain.insert(fixed("a", InhibitorType::Command, 1, false)).unwrap();
        assert!(chain.test(InhibitorType::Command, message(), None).await.is_none());
    }

    fn failing(id: &str) -> Inhibitor {
        Inhibitor::new(
            InhibitorOptions::new(id).priority(10).reason("broken"),
            |_, _, _| async { Err::<bool, BoxError>("database unavailable".into()) },
        )
    }

    #[tokio::test]
    async fn test_fail_open_ignores_errors() {
        let chain = handler(InhibitorPolicy::FailOpen);
        chain.insert(failing("broken")).unwrap();
        chain.insert(fixed("low", InhibitorType::Command, 1, true)).unwrap();

        let reason = chain.test(InhibitorType::Command, message(), None).await;
        assert_eq!(reason.as_deref(), Some("low says no"));
    }

    #[tokio::test]
    async fn test_fail_closed_vetoes_on_error() {
        let chain = handler(InhibitorPolicy::FailClosed);
        chain.insert(failing("broken")).unwrap();
        chain.insert(fixed("low", InhibitorType::Command, 1, true)).unwrap();

        let reason = chain.test(InhibitorType::Command, message(), None).await;
        assert_eq!(reason.as_deref(), Some("broken"));
    }

    fn panicking(id: &str) -> Inhibitor {
        fn explode() -> Result<bool, BoxError> {
            panic!("predicate exploded")
        }
        Inhibitor::new(
            InhibitorOptions::new(id).priority(9).reason(format!("{id} says no")),
            |_, _, _| async { explode() },
        )
    }

    #[tokio::test]
    async fn test_panicking_inhibitor_follows_policy() {
        let open = handler(InhibitorPolicy::FailOpen);
        open.insert(panicking("boom")).unwrap();
        open.insert(fixed("ok", InhibitorType::Command, 1, true)).unwrap();
        let reason = open.test(InhibitorType::Command, message(), None).await;
        assert_eq!(reason.as_deref(), Some("ok says no"));

        let closed = handler(InhibitorPolicy::FailClosed);
        closed.insert(panicking("boom")).unwrap();
        closed.insert(fixed("ok", InhibitorType::Command, 1, true)).unwrap();
        let reason = closed.test(InhibitorType::Command, message(), None).await;
        assert_eq!(reason.as_deref(), Some("boom says no"));

        let error = closed.get("boom").unwrap().exec(message(), None).await.unwrap_err();
        assert_eq!(error.to_string(), "predicate exploded");
    }

    #[tokio::test]
    async fn test_disabled_inhibitors_are_skipped() {
        let chain = handler(InhibitorPolicy::FailOpen);
        let high = chain.insert(fixed("high", InhibitorType::Command, 9, true)).unwrap();
        chain.insert(fixed("low", InhibitorType::Command, 1, true)).unwrap();
        high.disable();

        let reason = chain.test(InhibitorType::Command, message(), None).await;
        assert_eq!(reason.as_deref(), Some("low says no"));
    }

    #[tokio::test]
    async fn test_predicate_sees_command() {
        use crate::command::CommandOptions;

        let chain = handler(InhibitorPolicy::FailOpen);
        chain
            .insert(Inhibitor::new(
                InhibitorOptions::new("owner-only").reason("owner only"),
                |_, _, command: Option<Arc<Command>>| async move {
                    Ok::<_, BoxError>(command.is_some_and(|c| c.core().id() == "eval"))
                },
            ))
            .unwrap();

        let eval = Arc::new(Command::new(CommandOptions::new("eval")));
        let ping = Arc::new(Command::new(CommandOptions::new("ping")));
        assert!(chain.test(InhibitorType::Command, message(), Some(eval)).await.is_some());
        assert!(chain.test(InhibitorType::Command, message(), Some(ping)).await.is_none());
    }
}
