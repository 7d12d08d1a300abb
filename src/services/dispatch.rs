//! Error dispatcher and circuit breaker.
//!
//! Given an `ErrorContext` and the process-wide fixer/circuit-breaker
//! flags, decides whether a failure is routed to automated repair or
//! to human escalation. The decision order is fixed; the first
//! matching rule wins.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use crate::domain::models::{ErrorContext, ErrorKind};

/// Maximum automated repair attempts before a failure goes to a human.
pub const MAX_FIX_RETRIES: u32 = 3;

/// Error kinds that always go to a human, regardless of the
/// recoverability flag.
const HUMAN_ONLY_KINDS: &[ErrorKind] = &[
    ErrorKind::Permission,
    ErrorKind::Authentication,
    ErrorKind::BudgetExceeded,
    ErrorKind::CircuitBreaker,
];

/// Where a classified failure is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchDecision {
    /// Route to the automated fixer agent.
    UseFixer,
    /// Route to human escalation.
    UseHuman,
}

impl DispatchDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UseFixer => "use_fixer",
            Self::UseHuman => "use_human",
        }
    }
}

/// The error dispatcher. Owned by the run context; tests construct a
/// fresh one per test rather than sharing process globals.
#[derive(Debug)]
pub struct ErrorDispatcher {
    fixer_enabled: bool,
    circuit_breaker_open: AtomicBool,
}

impl ErrorDispatcher {
    pub fn new(fixer_enabled: bool) -> Self {
        Self {
            fixer_enabled,
            circuit_breaker_open: AtomicBool::new(false),
        }
    }

    /// Open the circuit: every subsequent failure escalates to a human
    /// until the circuit is closed again.
    pub fn open_circuit(&self) {
        warn!("Circuit breaker opened, all failures now escalate");
        self.circuit_breaker_open.store(true, Ordering::SeqCst);
    }

    /// Close the circuit.
    pub fn close_circuit(&self) {
        self.circuit_breaker_open.store(false, Ordering::SeqCst);
    }

    pub fn is_circuit_open(&self) -> bool {
        self.circuit_breaker_open.load(Ordering::SeqCst)
    }

    /// Decide where a failure goes. First match wins:
    /// 1. fixer disabled -> human
    /// 2. circuit open -> human
    /// 3. kind in the skip-list -> human (recoverability ignored)
    /// 4. non-recoverable -> human
    /// 5. retry budget exhausted -> human
    /// 6. otherwise -> fixer
    pub fn dispatch(&self, context: &ErrorContext) -> DispatchDecision {
        let decision = if !self.fixer_enabled {
            DispatchDecision::UseHuman
        } else if self.is_circuit_open() {
            DispatchDecision::UseHuman
        } else if HUMAN_ONLY_KINDS.contains(&context.kind) {
            DispatchDecision::UseHuman
        } else if !context.recoverable {
            DispatchDecision::UseHuman
        } else if context.retry_count >= MAX_FIX_RETRIES {
            DispatchDecision::UseHuman
        } else {
            DispatchDecision::UseFixer
        };

        debug!(
            kind = context.kind.as_str(),
            recoverable = context.recoverable,
            retry_count = context.retry_count,
            decision = decision.as_str(),
            "Dispatched error"
        );
        decision
    }
}

/// Static suggested-action lookup keyed by error kind, with
/// message-content heuristics prepending extra suggestions.
pub fn suggested_actions(kind: ErrorKind, message: &str) -> Vec<String> {
    let mut actions: Vec<String> = Vec::new();
    let lowered = message.to_lowercase();

    if lowered.contains("rate limit") {
        actions.push("Reduce worker count or raise the limiter ceilings".to_string());
    }
    if lowered.contains("authentication") {
        actions.push("Refresh executor credentials".to_string());
    }
    if lowered.contains("memory") {
        actions.push("Lower batch size to reduce executor memory pressure".to_string());
    }

    let base: &[&str] = match kind {
        ErrorKind::Timeout => &[
            "Increase the step timeout",
            "Split the task into smaller units",
        ],
        ErrorKind::Connection => &["Check network connectivity to the executor", "Retry"],
        ErrorKind::RateLimit => &["Wait for the rate window to roll", "Retry with backoff"],
        ErrorKind::MalformedOutput => &[
            "Re-run with an explicit output schema",
            "Inspect the raw executor output",
        ],
        ErrorKind::Assertion => &["Inspect the failing test output", "Re-run the fixer"],
        ErrorKind::Permission => &["Grant the executor the required permissions"],
        ErrorKind::Authentication => &["Re-authenticate the executor session"],
        ErrorKind::BudgetExceeded => &["Raise the budget ceiling or reduce scope"],
        ErrorKind::CircuitBreaker => &["Investigate repeated failures before reopening"],
        ErrorKind::Validation => &["Fix the plan or task structure and restart the phase"],
        ErrorKind::Deadlock => &["Break the dependency cycle or drop the blocked tasks"],
        ErrorKind::Unknown => &["Inspect the error log"],
    };
    actions.extend(base.iter().map(|s| (*s).to_string()));
    actions
}
