//! Workflow record — the single shared mutable aggregate for a run.
//!
//! Created once at run start, mutated exclusively by merging step
//! outputs through the reducer layer, never deleted. The persisted
//! shape is the serde form of this struct.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::error_context::ErrorContext;
use crate::domain::models::phase::{PhaseState, PhaseStatus, WorkflowPhase};
use crate::domain::models::task::Task;

/// Tagged routing decision carried on the record. Routers inspect this
/// instead of inferring control flow from exceptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteDecision {
    Continue,
    Retry,
    Escalate,
    Abort,
}

impl Default for RouteDecision {
    fn default() -> Self {
        Self::Continue
    }
}

impl RouteDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Retry => "retry",
            Self::Escalate => "escalate",
            Self::Abort => "abort",
        }
    }
}

/// Snapshot entry for a checkpoint: phase status and attempt counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSnapshot {
    pub status: PhaseStatus,
    pub attempts: u32,
}

/// A labeled point-in-time capture of phase and attempt state.
/// Restoring is performed by an external collaborator; this shape is
/// the contract such a restorer depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Monotonic id within the record
    pub id: u64,
    pub label: String,
    pub created_at: DateTime<Utc>,
    /// Phase that was current when the checkpoint was taken
    pub phase: u8,
    pub phase_snapshot: BTreeMap<u8, PhaseSnapshot>,
}

/// The single shared mutable workflow state for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    /// Project identity
    pub project: String,
    /// Run identifier
    pub run_id: Uuid,
    /// Current phase number, 1-5
    pub current_phase: u8,
    /// Per-phase state keyed by phase number
    pub phases: BTreeMap<u8, PhaseState>,
    /// All tasks ever created for this run (never removed)
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// Milestone names in plan order, used for scheduling tie-breaks
    #[serde(default)]
    pub milestones: Vec<String>,
    /// Completed task ids, first-seen order, capped
    #[serde(default)]
    pub completed_ids: Vec<String>,
    /// Failed task ids, first-seen order, capped
    #[serde(default)]
    pub failed_ids: Vec<String>,
    /// Task ids currently in flight (replace semantics, not history)
    #[serde(default)]
    pub in_flight_ids: Vec<String>,
    /// Append-only error log, capped at [`ERROR_LOG_CAP`]
    #[serde(default)]
    pub error_log: Vec<ErrorContext>,
    /// Routing decision for the next router inspection
    #[serde(default)]
    pub next_decision: RouteDecision,
    /// Planning phase output
    #[serde(default)]
    pub plan: Option<serde_json::Value>,
    /// Validation phase feedback
    #[serde(default)]
    pub validation_feedback: Option<serde_json::Value>,
    /// Implementation phase result
    #[serde(default)]
    pub implementation_result: Option<serde_json::Value>,
    /// Verification phase feedback
    #[serde(default)]
    pub verification_feedback: Option<serde_json::Value>,
    /// Reviewer agent name -> feedback text
    #[serde(default)]
    pub reviewer_feedback: HashMap<String, String>,
    /// Checkpoints taken during the run
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Maximum retained error-log entries; oldest evicted first.
pub const ERROR_LOG_CAP: usize = 100;

/// Maximum retained completed/failed ids; oldest evicted first.
pub const ID_HISTORY_CAP: usize = 500;

impl WorkflowRecord {
    /// Create a fresh record with phase 1 pending and empty collections.
    pub fn new(project: impl Into<String>) -> Self {
        let now = Utc::now();
        let phases = WorkflowPhase::all()
            .iter()
            .map(|p| (p.number(), PhaseState::default()))
            .collect();
        Self {
            project: project.into(),
            run_id: Uuid::new_v4(),
            current_phase: 1,
            phases,
            tasks: Vec::new(),
            milestones: Vec::new(),
            completed_ids: Vec::new(),
            failed_ids: Vec::new(),
            in_flight_ids: Vec::new(),
            error_log: Vec::new(),
            next_decision: RouteDecision::default(),
            plan: None,
            validation_feedback: None,
            implementation_result: None,
            verification_feedback: None,
            reviewer_feedback: HashMap::new(),
            checkpoints: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a record with a uniform per-phase attempt budget.
    pub fn with_phase_max_attempts(project: impl Into<String>, max_attempts: u32) -> Self {
        let mut record = Self::new(project);
        for state in record.phases.values_mut() {
            state.max_attempts = max_attempts;
        }
        record
    }

    /// State of the given phase number.
    pub fn phase(&self, number: u8) -> EngineResult<&PhaseState> {
        self.phases
            .get(&number)
            .ok_or(EngineError::PhaseNotFound(number))
    }

    /// State of the currently active phase.
    pub fn current_phase_state(&self) -> EngineResult<&PhaseState> {
        self.phase(self.current_phase)
    }

    /// Find a task by id.
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Whether every task id is in the completed set.
    pub fn all_tasks_completed(&self) -> bool {
        !self.tasks.is_empty()
            && self
                .tasks
                .iter()
                .all(|t| self.completed_ids.iter().any(|id| id == &t.id))
    }

    /// Latest error in the log, if any.
    pub fn last_error(&self) -> Option<&ErrorContext> {
        self.error_log.last()
    }

    /// Append a checkpoint capturing phase/attempt state. Returns the
    /// checkpoint id, monotonic within the record.
    pub fn checkpoint(&mut self, label: impl Into<String>) -> u64 {
        let id = self.checkpoints.last().map_or(1, |c| c.id + 1);
        let phase_snapshot = self
            .phases
            .iter()
            .map(|(n, s)| {
                (
                    *n,
                    PhaseSnapshot {
                        status: s.status,
                        attempts: s.attempts,
                    },
                )
            })
            .collect();
        self.checkpoints.push(Checkpoint {
            id,
            label: label.into(),
            created_at: Utc::now(),
            phase: self.current_phase,
            phase_snapshot,
        });
        self.updated_at = Utc::now();
        id
    }

    /// Safe-field snapshot used when constructing error contexts.
    pub fn snapshot_fields(&self) -> BTreeMap<String, serde_json::Value> {
        let mut fields = BTreeMap::new();
        fields.insert("project".to_string(), serde_json::json!(self.project));
        fields.insert(
            "current_phase".to_string(),
            serde_json::json!(self.current_phase),
        );
        fields.insert(
            "next_decision".to_string(),
            serde_json::json!(self.next_decision.as_str()),
        );
        fields.insert("task_count".to_string(), serde_json::json!(self.tasks.len()));
        fields.insert(
            "completed_count".to_string(),
            serde_json::json!(self.completed_ids.len()),
        );
        fields.insert(
            "failed_count".to_string(),
            serde_json::json!(self.failed_ids.len()),
        );
        fields.insert(
            "in_flight_count".to_string(),
            serde_json::json!(self.in_flight_ids.len()),
        );
        fields
    }

    /// Validate record invariants: unique task ids, dependencies exist,
    /// dependency graph is a DAG, completed/failed sets disjoint.
    pub fn validate(&self) -> EngineResult<()> {
        let mut ids: HashSet<&str> = HashSet::with_capacity(self.tasks.len());
        for task in &self.tasks {
            task.validate()?;
            if !ids.insert(task.id.as_str()) {
                return Err(EngineError::DuplicateTaskId(task.id.clone()));
            }
        }

        for task in &self.tasks {
            for dep in &task.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(EngineError::MissingDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        if let Some(cycle) = detect_cycle(&self.tasks) {
            return Err(EngineError::DependencyCycle(cycle));
        }

        if let Some(id) = self
            .completed_ids
            .iter()
            .find(|id| self.failed_ids.contains(id))
        {
            return Err(EngineError::ValidationFailed(format!(
                "task {id} is in both completed and failed sets"
            )));
        }

        Ok(())
    }
}

/// DFS-based cycle detection over the task dependency graph.
/// Returns the cycle path if one exists.
pub fn detect_cycle(tasks: &[Task]) -> Option<Vec<String>> {
    let graph: HashMap<&str, &[String]> = tasks
        .iter()
        .map(|t| (t.id.as_str(), t.depends_on.as_slice()))
        .collect();

    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for task in tasks {
        if !visited.contains(task.id.as_str())
            && visit(task.id.as_str(), &graph, &mut visited, &mut rec_stack, &mut path)
        {
            return Some(path.into_iter().map(String::from).collect());
        }
    }
    None
}

fn visit<'a>(
    node: &'a str,
    graph: &HashMap<&'a str, &'a [String]>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(deps) = graph.get(node) {
        for dep in deps.iter() {
            let dep = dep.as_str();
            if !graph.contains_key(dep) {
                continue; // missing deps are reported separately
            }
            if !visited.contains(dep) {
                if visit(dep, graph, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(dep) {
                if let Some(start) = path.iter().position(|&id| id == dep) {
                    path.drain(0..start);
                }
                return true;
            }
        }
    }

    rec_stack.remove(node);
    path.pop();
    false
}
