//! Resolves who a transition assigns an incident to.

use std::sync::Arc;

use triage_core::assignment::{AssignmentOutcome, AssignmentPolicy};
use triage_core::error::CoreError;
use triage_core::types::DbId;
use triage_db::models::incident::Incident;
use triage_db::models::user::UserMatchQuery;
use triage_db::models::workflow::Transition;

use crate::error::WorkflowResult;
use crate::store::UserDirectory;

/// Applies a transition's assignment policy to an incident.
///
/// "No match" never fails: it resolves to [`AssignmentOutcome::unchanged`].
#[derive(Clone)]
pub struct AssignmentResolver {
    users: Arc<dyn UserDirectory>,
}

impl AssignmentResolver {
    pub fn new(users: Arc<dyn UserDirectory>) -> Self {
        Self { users }
    }

    pub async fn resolve(
        &self,
        transition: &Transition,
        incident: &Incident,
        requested_user_id: Option<DbId>,
    ) -> WorkflowResult<AssignmentOutcome> {
        let policy = AssignmentPolicy::from_transition(
            transition.assign_user_id,
            transition.assignment_role_id,
            transition.manual_select_user,
            transition.auto_match_user,
        );

        match policy {
            AssignmentPolicy::Static { user_id } => Ok(AssignmentOutcome::single(user_id)),
            AssignmentPolicy::ManualSelect { role_id } => {
                self.manual_select(role_id, requested_user_id).await
            }
            AssignmentPolicy::AutoMatch { role_id } => self.auto_match(role_id, incident).await,
            AssignmentPolicy::Unchanged => Ok(AssignmentOutcome::unchanged()),
        }
    }

    async fn manual_select(
        &self,
        role_id: DbId,
        requested_user_id: Option<DbId>,
    ) -> WorkflowResult<AssignmentOutcome> {
        let Some(user_id) = requested_user_id else {
            return Ok(AssignmentOutcome::unchanged());
        };
        let members = self
            .users
            .find_matching(&UserMatchQuery::role_only(role_id))
            .await?;
        if !members.iter().any(|u| u.id == user_id) {
            return Err(CoreError::Validation(format!(
                "User {user_id} is not an active member of the assignment role"
            ))
            .into());
        }
        Ok(AssignmentOutcome::single(user_id))
    }

    async fn auto_match(&self, role_id: DbId, incident: &Incident) -> WorkflowResult<AssignmentOutcome> {
        let criteria = UserMatchQuery {
            role_id,
            classification_id: incident.classification_id,
            location_id: incident.location_id,
            department_id: incident.department_id,
            exclude_user_id: incident.assignee_id,
        };
        let mut matches = self.users.find_matching(&criteria).await?;

        if matches.is_empty() {
            tracing::debug!(
                incident_id = incident.id,
                role_id,
                "No users match full criteria, falling back to role membership"
            );
            matches = self
                .users
                .find_matching(&UserMatchQuery::role_only(role_id))
                .await?;
        }

        if matches.is_empty() {
            tracing::debug!(incident_id = incident.id, role_id, "No assignable users found");
            return Ok(AssignmentOutcome::unchanged());
        }

        Ok(AssignmentOutcome::from_candidates(
            matches.into_iter().map(|u| u.id).collect(),
        ))
    }
}
