//! In-process authorization backend with scope inheritance, a principal visibility gate and
//! scripted faults. Used as the test double for the orchestrator and as reference semantics
//! for what a real backend is expected to do.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Barrier;

use super::AuthorizationBackend;
use crate::error::BackendError;
use crate::model::{normalize_scope, same_scope, scope_within, RoleAssignment};
use crate::tprintln;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Create,
    Delete,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub list: u32,
    pub create: u32,
    pub delete: u32,
}

#[derive(Default)]
struct State {
    records: Vec<RoleAssignment>,
    // None: every principal resolves
    visible: Option<HashSet<String>>,
    faults: HashMap<Operation, VecDeque<BackendError>>,
    counts: CallCounts,
    log: Vec<Operation>,
    list_gate: Option<Arc<Barrier>>,
}

impl State {
    fn record_call(&mut self, op: Operation) -> Option<BackendError> {
        match op {
            Operation::List => self.counts.list += 1,
            Operation::Create => self.counts.create += 1,
            Operation::Delete => self.counts.delete += 1,
        }
        self.log.push(op);
        self.faults.get_mut(&op).and_then(VecDeque::pop_front)
    }

    fn is_visible(&self, principal: &str) -> bool {
        match &self.visible {
            None => true,
            Some(set) => set.contains(&principal.to_ascii_lowercase()),
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<State>>,
}

impl InMemoryBackend {
    pub fn new() -> Self { Self::default() }

    /// Only principals passed to `make_visible` resolve; any other principal fails list and
    /// create calls with a principal-not-found error.
    pub fn with_principal_gate() -> Self {
        let backend = Self::default();
        backend.state.lock().visible = Some(HashSet::new());
        backend
    }

    pub fn make_visible(&self, principal_id: &str) {
        let mut st = self.state.lock();
        if let Some(set) = st.visible.as_mut() {
            set.insert(principal_id.to_ascii_lowercase());
        }
    }

    pub fn seed(&self, assignment: RoleAssignment) { self.state.lock().records.push(assignment); }

    /// Queue `times` copies of `error` to be returned by the next calls of `op`.
    pub fn fail_next(&self, op: Operation, error: BackendError, times: usize) {
        let mut st = self.state.lock();
        let queue = st.faults.entry(op).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Every list call waits on `gate` after reading its result and before returning.
    pub fn set_list_gate(&self, gate: Arc<Barrier>) { self.state.lock().list_gate = Some(gate); }

    pub fn clear_list_gate(&self) { self.state.lock().list_gate = None; }

    pub fn counts(&self) -> CallCounts { self.state.lock().counts }

    /// Calls in the order they arrived.
    pub fn call_log(&self) -> Vec<Operation> { self.state.lock().log.clone() }

    pub fn assignments(&self) -> Vec<RoleAssignment> { self.state.lock().records.clone() }
}

#[async_trait]
impl AuthorizationBackend for InMemoryBackend {
    async fn list_assignments(&self, scope: &str, principal_filter: Option<&str>) -> Result<Vec<RoleAssignment>, BackendError> {
        let (result, gate) = {
            let mut st = self.state.lock();
            let result = if let Some(err) = st.record_call(Operation::List) {
                Err(err)
            } else if principal_filter.is_some_and(|p| !st.is_visible(p)) {
                Err(BackendError::principal_not_found(format!(
                    "principal {} does not exist in the directory",
                    principal_filter.unwrap_or_default()
                )))
            } else {
                Ok(st
                    .records
                    .iter()
                    .filter(|r| scope_within(scope, &r.scope))
                    .filter(|r| principal_filter.map_or(true, |p| r.principal_id.eq_ignore_ascii_case(p)))
                    .cloned()
                    .collect::<Vec<_>>())
            };
            (result, st.list_gate.clone())
        };
        tprintln!("memory.list scope={} principal={:?} ok={}", scope, principal_filter, result.is_ok());
        if let Some(gate) = gate {
            gate.wait().await;
        }
        result
    }

    async fn create_assignment(&self, scope: &str, assignment_id: &str, assignment: &RoleAssignment) -> Result<(), BackendError> {
        let mut st = self.state.lock();
        if let Some(err) = st.record_call(Operation::Create) {
            return Err(err);
        }
        if !st.is_visible(&assignment.principal_id) {
            return Err(BackendError::principal_not_found(format!(
                "principal {} does not exist in the directory",
                assignment.principal_id
            )));
        }
        let existing = st
            .records
            .iter()
            .find(|r| same_scope(&r.scope, scope) && r.assignment_id.eq_ignore_ascii_case(assignment_id));
        if let Some(existing) = existing {
            if existing.key().matches(assignment) {
                return Err(BackendError::conflict(format!("role assignment {assignment_id} already exists")));
            }
            return Err(BackendError::new(
                crate::error::ErrorClass::Conflict,
                "RoleAssignmentUpdateNotPermitted",
                "assignment name reused for a different grant",
            ));
        }
        let mut record = assignment.clone();
        record.scope = normalize_scope(scope);
        record.assignment_id = assignment_id.to_string();
        record.created_on = Some(Utc::now());
        tprintln!("memory.create scope={} id={} principal={}", scope, assignment_id, record.principal_id);
        st.records.push(record);
        Ok(())
    }

    async fn delete_assignment(&self, scope: &str, assignment_id: &str) -> Result<(), BackendError> {
        let mut st = self.state.lock();
        if let Some(err) = st.record_call(Operation::Delete) {
            return Err(err);
        }
        let before = st.records.len();
        st.records
            .retain(|r| !(same_scope(&r.scope, scope) && r.assignment_id.eq_ignore_ascii_case(assignment_id)));
        if st.records.len() == before {
            return Err(BackendError::not_found(format!("role assignment {assignment_id} not found at {scope}")));
        }
        tprintln!("memory.delete scope={} id={}", scope, assignment_id);
        Ok(())
    }
}
