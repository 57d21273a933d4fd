//! Workflow graph vocabulary and definition validation.
//!
//! States and transitions are configuration rows; this module holds the
//! pure checks the engine and the administration layer run over them.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::DbId;

// ---------------------------------------------------------------------------
// StateType
// ---------------------------------------------------------------------------

/// Position of a state in the workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateType {
    Initial,
    Normal,
    Terminal,
}

impl StateType {
    /// Return the wire-format string for this variant.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Normal => "normal",
            Self::Terminal => "terminal",
        }
    }

    /// Parse from a wire-format string.
    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "initial" => Ok(Self::Initial),
            "normal" => Ok(Self::Normal),
            "terminal" => Ok(Self::Terminal),
            _ => Err(CoreError::Validation(format!(
                "Invalid state_type: '{s}'. Must be one of: initial, normal, terminal"
            ))),
        }
    }
}

impl std::fmt::Display for StateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RecordType
// ---------------------------------------------------------------------------

/// Kind of record a workflow governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Incident,
    Request,
    Complaint,
    Query,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incident => "incident",
            Self::Request => "request",
            Self::Complaint => "complaint",
            Self::Query => "query",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "incident" => Ok(Self::Incident),
            "request" => Ok(Self::Request),
            "complaint" => Ok(Self::Complaint),
            "query" => Ok(Self::Query),
            _ => Err(CoreError::Validation(format!(
                "Invalid record_type: '{s}'. Must be one of: incident, request, complaint, query"
            ))),
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Gates and naming rules
// ---------------------------------------------------------------------------

/// Maximum length of a workflow or state code.
pub const MAX_CODE_LENGTH: usize = 50;

fn code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9_-]*$").unwrap_or_else(|e| panic!("code pattern: {e}"))
    })
}

/// Validate a workflow or state code (lowercase slug, at most 50 chars).
pub fn validate_code(code: &str) -> Result<(), CoreError> {
    if code.is_empty() || code.len() > MAX_CODE_LENGTH {
        return Err(CoreError::Validation(format!(
            "Code must be between 1 and {MAX_CODE_LENGTH} characters"
        )));
    }
    if !code_pattern().is_match(code) {
        return Err(CoreError::Validation(format!(
            "Invalid code '{code}': use lowercase letters, digits, '_' or '-'"
        )));
    }
    Ok(())
}

/// Role gate: an empty allow-list is unrestricted, otherwise the actor must
/// hold at least one of the listed roles.
pub fn is_role_permitted(allowed_role_ids: &[DbId], actor_role_ids: &[DbId]) -> bool {
    allowed_role_ids.is_empty() || allowed_role_ids.iter().any(|r| actor_role_ids.contains(r))
}

/// Whether a terminal state represents a resolution rather than a plain
/// closure. Matches on the state's code or display name.
pub fn denotes_resolved(code: &str, name: &str) -> bool {
    code.eq_ignore_ascii_case("resolved") || name.trim().eq_ignore_ascii_case("resolved")
}

// ---------------------------------------------------------------------------
// Graph validation
// ---------------------------------------------------------------------------

/// Minimal view of a state for graph checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphState {
    pub id: DbId,
    pub workflow_id: DbId,
    pub state_type: StateType,
}

/// Minimal view of a transition for graph checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphEdge {
    pub id: DbId,
    pub workflow_id: DbId,
    pub from_state_id: DbId,
    pub to_state_id: DbId,
    pub is_active: bool,
}

/// Outcome of a successful graph validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphReport {
    pub initial_state_id: DbId,
    /// States reachable from the initial state over active transitions.
    pub reachable: BTreeSet<DbId>,
    /// States that exist but can never be entered.
    pub unreachable: BTreeSet<DbId>,
}

/// Validate the shape of one workflow's graph.
///
/// Requires exactly one initial state and every transition to connect two
/// distinct states of the same workflow. Unreachable states are reported,
/// not rejected.
pub fn validate_graph(
    workflow_id: DbId,
    states: &[GraphState],
    edges: &[GraphEdge],
) -> Result<GraphReport, CoreError> {
    let by_id: HashMap<DbId, &GraphState> = states.iter().map(|s| (s.id, s)).collect();

    if let Some(foreign) = states.iter().find(|s| s.workflow_id != workflow_id) {
        return Err(CoreError::Validation(format!(
            "State {} belongs to workflow {}, not {workflow_id}",
            foreign.id, foreign.workflow_id
        )));
    }

    let initials: Vec<DbId> = states
        .iter()
        .filter(|s| s.state_type == StateType::Initial)
        .map(|s| s.id)
        .collect();
    let initial_state_id = match initials.as_slice() {
        [only] => *only,
        [] => {
            return Err(CoreError::Validation(
                "Workflow has no initial state".to_string(),
            ))
        }
        many => {
            return Err(CoreError::Validation(format!(
                "Workflow has {} initial states; exactly one is required",
                many.len()
            )))
        }
    };

    let mut adjacency: HashMap<DbId, Vec<DbId>> = HashMap::new();
    for edge in edges {
        if edge.workflow_id != workflow_id {
            return Err(CoreError::Validation(format!(
                "Transition {} belongs to workflow {}, not {workflow_id}",
                edge.id, edge.workflow_id
            )));
        }
        for endpoint in [edge.from_state_id, edge.to_state_id] {
            if !by_id.contains_key(&endpoint) {
                return Err(CoreError::Validation(format!(
                    "Transition {} references state {endpoint} outside workflow {workflow_id}",
                    edge.id
                )));
            }
        }
        if edge.from_state_id == edge.to_state_id {
            return Err(CoreError::Validation(format!(
                "Transition {} starts and ends on state {}",
                edge.id, edge.from_state_id
            )));
        }
        if edge.is_active {
            adjacency
                .entry(edge.from_state_id)
                .or_default()
                .push(edge.to_state_id);
        }
    }

    let mut reachable = BTreeSet::from([initial_state_id]);
    let mut queue = VecDeque::from([initial_state_id]);
    while let Some(current) = queue.pop_front() {
        for next in adjacency.get(&current).into_iter().flatten() {
            if reachable.insert(*next) {
                queue.push_back(*next);
            }
        }
    }

    let unreachable = states
        .iter()
        .map(|s| s.id)
        .filter(|id| !reachable.contains(id))
        .collect();

    Ok(GraphReport {
        initial_state_id,
        reachable,
        unreachable,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn state(id: DbId, state_type: StateType) -> GraphState {
        GraphState {
            id,
            workflow_id: 1,
            state_type,
        }
    }

    fn edge(id: DbId, from: DbId, to: DbId) -> GraphEdge {
        GraphEdge {
            id,
            workflow_id: 1,
            from_state_id: from,
            to_state_id: to,
            is_active: true,
        }
    }

    #[test]
    fn state_type_round_trips_through_wire_format() {
        for t in [StateType::Initial, StateType::Normal, StateType::Terminal] {
            assert_eq!(StateType::from_str(t.as_str()).unwrap(), t);
        }
        assert_matches!(StateType::from_str("final"), Err(CoreError::Validation(_)));
    }

    #[test]
    fn empty_role_gate_is_unrestricted() {
        assert!(is_role_permitted(&[], &[]));
        assert!(is_role_permitted(&[], &[5]));
    }

    #[test]
    fn role_gate_requires_intersection() {
        assert!(is_role_permitted(&[1, 2], &[2, 9]));
        assert!(!is_role_permitted(&[1, 2], &[3]));
        assert!(!is_role_permitted(&[1], &[]));
    }

    #[test]
    fn resolved_detection_uses_code_or_name() {
        assert!(denotes_resolved("resolved", "Done"));
        assert!(denotes_resolved("done", "Resolved"));
        assert!(!denotes_resolved("closed", "Closed"));
        assert!(!denotes_resolved("unresolved", "Not resolved"));
    }

    #[test]
    fn codes_must_be_lowercase_slugs() {
        assert!(validate_code("it-incidents_v2").is_ok());
        assert!(validate_code("").is_err());
        assert!(validate_code("Has Space").is_err());
        assert!(validate_code(&"a".repeat(51)).is_err());
    }

    #[test]
    fn linear_graph_is_fully_reachable() {
        let states = [
            state(1, StateType::Initial),
            state(2, StateType::Normal),
            state(3, StateType::Terminal),
        ];
        let edges = [edge(10, 1, 2), edge(11, 2, 3)];
        let report = validate_graph(1, &states, &edges).unwrap();
        assert_eq!(report.initial_state_id, 1);
        assert_eq!(report.reachable, BTreeSet::from([1, 2, 3]));
        assert!(report.unreachable.is_empty());
    }

    #[test]
    fn orphan_state_is_reported_unreachable() {
        let states = [
            state(1, StateType::Initial),
            state(2, StateType::Normal),
            state(3, StateType::Normal),
        ];
        let edges = [edge(10, 1, 2), edge(11, 3, 2)];
        let report = validate_graph(1, &states, &edges).unwrap();
        assert_eq!(report.unreachable, BTreeSet::from([3]));
    }

    #[test]
    fn inactive_edges_do_not_make_states_reachable() {
        let states = [state(1, StateType::Initial), state(2, StateType::Terminal)];
        let mut inactive = edge(10, 1, 2);
        inactive.is_active = false;
        let report = validate_graph(1, &states, &[inactive]).unwrap();
        assert_eq!(report.unreachable, BTreeSet::from([2]));
    }

    #[test]
    fn missing_or_duplicate_initial_state_is_rejected() {
        let none = [state(1, StateType::Normal)];
        assert_matches!(validate_graph(1, &none, &[]), Err(CoreError::Validation(_)));

        let two = [state(1, StateType::Initial), state(2, StateType::Initial)];
        assert_matches!(validate_graph(1, &two, &[]), Err(CoreError::Validation(msg)) if msg.contains("2 initial"));
    }

    #[test]
    fn cross_workflow_edge_is_rejected() {
        let states = [state(1, StateType::Initial), state(2, StateType::Normal)];
        let outside = edge(10, 1, 99);
        assert_matches!(
            validate_graph(1, &states, &[outside]),
            Err(CoreError::Validation(msg)) if msg.contains("state 99")
        );

        let mut foreign = edge(11, 1, 2);
        foreign.workflow_id = 7;
        assert!(validate_graph(1, &states, &[foreign]).is_err());
    }

    #[test]
    fn self_loop_is_rejected() {
        let states = [state(1, StateType::Initial)];
        assert!(validate_graph(1, &states, &[edge(10, 1, 1)]).is_err());
    }
}
