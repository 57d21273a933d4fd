//! Checks a stored workflow definition before it is put to use.

use std::sync::Arc;

use triage_core::action::ActionConfig;
use triage_core::error::CoreError;
use triage_core::requirement::RequirementType;
use triage_core::types::DbId;
use triage_core::workflow::{validate_code, validate_graph, GraphEdge, GraphReport, GraphState, StateType};

use crate::error::WorkflowResult;
use crate::store::WorkflowStore;

#[derive(Clone)]
pub struct DefinitionService {
    workflows: Arc<dyn WorkflowStore>,
}

impl DefinitionService {
    pub fn new(workflows: Arc<dyn WorkflowStore>) -> Self {
        Self { workflows }
    }

    /// Validate codes, graph shape, requirement types and action configs.
    ///
    /// Unreachable states are reported on the returned [`GraphReport`]
    /// rather than rejected.
    pub async fn validate_workflow(&self, workflow_id: DbId) -> WorkflowResult<GraphReport> {
        let workflow = self
            .workflows
            .find_workflow(workflow_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "workflow",
                id: workflow_id,
            })?;
        validate_code(&workflow.code)?;

        let states = self.workflows.list_states(workflow_id).await?;
        let transitions = self.workflows.list_transitions(workflow_id).await?;

        let mut graph_states = Vec::with_capacity(states.len());
        for state in &states {
            validate_code(&state.code)?;
            graph_states.push(GraphState {
                id: state.id,
                workflow_id: state.workflow_id,
                state_type: StateType::from_str(&state.state_type)?,
            });
        }
        let edges: Vec<GraphEdge> = transitions
            .iter()
            .map(|t| GraphEdge {
                id: t.id,
                workflow_id: t.workflow_id,
                from_state_id: t.from_state_id,
                to_state_id: t.to_state_id,
                is_active: t.is_active,
            })
            .collect();

        let report = validate_graph(workflow_id, &graph_states, &edges)?;

        for transition in &transitions {
            let Some(relations) = self.workflows.find_transition(transition.id).await? else {
                continue;
            };
            for requirement in &relations.requirements {
                RequirementType::from_str(&requirement.requirement_type)?;
            }
            for action in &relations.actions {
                ActionConfig::decode(&action.action_type, &action.config).map_err(|e| {
                    CoreError::Validation(format!(
                        "Transition '{}' action {}: {e}",
                        transition.name, action.id
                    ))
                })?;
            }
        }

        if !report.unreachable.is_empty() {
            tracing::warn!(
                workflow_id,
                unreachable = ?report.unreachable,
                "Workflow has unreachable states"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;
    use triage_db::models::workflow::{CreateTransition, CreateTransitionAction, CreateWorkflowState};

    use super::*;
    use crate::error::WorkflowError;
    use crate::memory::{fixtures, MemoryStore};

    #[tokio::test]
    async fn basic_workflow_is_fully_reachable() {
        let store = Arc::new(MemoryStore::new());
        let flow = fixtures::basic_workflow(&store);

        let report = DefinitionService::new(store.clone())
            .validate_workflow(flow.workflow.id)
            .await
            .unwrap();
        assert_eq!(report.initial_state_id, flow.open.id);
        assert_eq!(report.reachable.len(), 4);
        assert!(report.unreachable.is_empty());
    }

    #[tokio::test]
    async fn orphan_states_are_reported() {
        let store = Arc::new(MemoryStore::new());
        let flow = fixtures::basic_workflow(&store);
        let orphan = store.add_state(&CreateWorkflowState {
            workflow_id: flow.workflow.id,
            name: "Parked".into(),
            code: "parked".into(),
            state_type: "normal".into(),
            sla_hours: None,
            viewable_role_ids: Vec::new(),
        });

        let report = DefinitionService::new(store.clone())
            .validate_workflow(flow.workflow.id)
            .await
            .unwrap();
        assert!(report.unreachable.contains(&orphan.id));
    }

    #[tokio::test]
    async fn self_loops_and_bad_actions_are_rejected() {
        let store = Arc::new(MemoryStore::new());
        let flow = fixtures::basic_workflow(&store);
        let service = DefinitionService::new(store.clone());

        store.add_action(&CreateTransitionAction {
            transition_id: flow.start.id,
            name: None,
            action_type: "webhook".into(),
            config: json!({"url": "ftp://example.com"}),
            execution_order: None,
            is_async: None,
        });
        assert_matches!(
            service.validate_workflow(flow.workflow.id).await,
            Err(WorkflowError::Core(CoreError::Validation(m))) if m.contains("Transition 'Start work'")
        );

        let other = fixtures::basic_workflow(&store);
        store.add_transition(&CreateTransition {
            workflow_id: other.workflow.id,
            name: "Loop".into(),
            from_state_id: other.open.id,
            to_state_id: other.open.id,
            ..Default::default()
        });
        assert_matches!(
            service.validate_workflow(other.workflow.id).await,
            Err(WorkflowError::Core(CoreError::Validation(_)))
        );
    }

    #[tokio::test]
    async fn missing_workflow_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        assert_matches!(
            DefinitionService::new(store).validate_workflow(1).await,
            Err(WorkflowError::Core(CoreError::NotFound { entity: "workflow", .. }))
        );
    }
}
