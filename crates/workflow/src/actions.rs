//! Transition action execution.
//!
//! Actions run after a transition commits, ordered by `execution_order`
//! (ties keep declaration order). Synchronous actions run inline and their
//! failures come back as diagnostics; async actions are detached onto a
//! [`TaskTracker`] and only logged. No action failure stops a later action
//! or touches the committed transition.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::TaskTracker;
use triage_core::action::{
    ActionConfig, ActionType, EmailConfig, FieldUpdate, FieldUpdateConfig, NotificationConfig,
    WebhookConfig,
};
use triage_core::error::CoreError;
use triage_core::recipients::RecipientToken;
use triage_core::revision::FieldChange;
use triage_core::template::PlaceholderContext;
use triage_core::types::DbId;
use triage_db::models::incident::Incident;
use triage_db::models::workflow::TransitionAction;
use triage_events::WebhookRequest;

use crate::config::EngineConfig;
use crate::outcome::{SideEffectFailure, SideEffectStage};
use crate::revision::RevisionWriter;
use crate::store::{Collaborators, IncidentStore, UserDirectory};
use crate::transport::{EmailMessage, NotificationMessage, Transport};

/// What an action run knows about the transition that triggered it.
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// The incident as committed by the transition.
    pub incident: Incident,
    pub transition_name: String,
    pub from_state: String,
    pub to_state: String,
    pub performed_by: DbId,
}

/// Context shared by every action of one run.
struct PreparedRun {
    incident: Incident,
    performed_by: DbId,
    placeholders: PlaceholderContext,
}

#[derive(Clone)]
pub struct ActionExecutor {
    incidents: Arc<dyn IncidentStore>,
    users: Arc<dyn UserDirectory>,
    transport: Arc<dyn Transport>,
    revisions: RevisionWriter,
    tracker: TaskTracker,
    webhook_timeout: Duration,
}

impl ActionExecutor {
    pub fn new(collaborators: &Collaborators, config: &EngineConfig) -> Self {
        Self {
            incidents: Arc::clone(&collaborators.incidents),
            users: Arc::clone(&collaborators.users),
            transport: Arc::clone(&collaborators.transport),
            revisions: RevisionWriter::new(Arc::clone(&collaborators.revisions)),
            tracker: TaskTracker::new(),
            webhook_timeout: config.webhook_timeout,
        }
    }

    /// Run the active actions. Returns failures of synchronous actions.
    pub async fn execute(
        &self,
        actions: &[TransitionAction],
        context: ActionContext,
    ) -> Vec<SideEffectFailure> {
        let mut ordered: Vec<&TransitionAction> = actions.iter().filter(|a| a.is_active).collect();
        if ordered.is_empty() {
            return Vec::new();
        }
        ordered.sort_by_key(|a| a.execution_order);

        let run = Arc::new(self.prepare(context).await);
        let mut failures = Vec::new();

        for action in ordered {
            if action.is_async {
                let this = self.clone();
                let action = action.clone();
                let run = Arc::clone(&run);
                self.tracker.spawn(async move {
                    if let Err(failure) = this.run_action(&action, &run).await {
                        tracing::warn!(
                            incident_id = run.incident.id,
                            action_id = action.id,
                            action_type = %action.action_type,
                            stage = %failure.stage,
                            error = %failure.message,
                            "Async transition action failed"
                        );
                    }
                });
                continue;
            }

            if let Err(failure) = self.run_action(action, &run).await {
                tracing::warn!(
                    incident_id = run.incident.id,
                    action_id = action.id,
                    action_type = %action.action_type,
                    stage = %failure.stage,
                    error = %failure.message,
                    "Transition action failed"
                );
                failures.push(failure);
            }
        }

        failures
    }

    /// Wait for every detached async action to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Number of async actions still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    // -- preparation --------------------------------------------------------

    async fn prepare(&self, context: ActionContext) -> PreparedRun {
        let performer = self.display_name(Some(context.performed_by)).await;
        let assignee = self.display_name(context.incident.assignee_id).await;
        let placeholders = PlaceholderContext {
            incident_number: context.incident.incident_number.clone(),
            incident_title: context.incident.title.clone(),
            priority: context.incident.priority.to_string(),
            severity: context.incident.severity.to_string(),
            transition_name: context.transition_name,
            from_state: context.from_state,
            current_state: context.to_state.clone(),
            to_state: context.to_state,
            performed_by: performer.unwrap_or_else(|| "System".to_string()),
            assignee: assignee.unwrap_or_else(|| "Unassigned".to_string()),
        };
        PreparedRun {
            incident: context.incident,
            performed_by: context.performed_by,
            placeholders,
        }
    }

    async fn display_name(&self, user_id: Option<DbId>) -> Option<String> {
        let user_id = user_id?;
        match self.users.find_user(user_id).await {
            Ok(user) => user.map(|u| u.display_name().to_string()),
            Err(e) => {
                tracing::debug!(user_id, error = %e, "Placeholder user lookup failed");
                None
            }
        }
    }

    // -- dispatch -----------------------------------------------------------

    async fn run_action(
        &self,
        action: &TransitionAction,
        run: &PreparedRun,
    ) -> Result<(), SideEffectFailure> {
        let fail = |stage, e: CoreError| {
            SideEffectFailure::for_action(stage, action.id, &action.action_type, e.to_string())
        };

        let config = ActionConfig::decode(&action.action_type, &action.config)
            .map_err(|e| fail(SideEffectStage::Action, e))?;

        match config {
            ActionConfig::Notification(cfg) => self
                .notify(&cfg, run)
                .await
                .map_err(|e| fail(SideEffectStage::Action, e)),
            ActionConfig::Email(cfg) => self
                .email(&cfg, run)
                .await
                .map_err(|e| fail(SideEffectStage::Action, e)),
            ActionConfig::Webhook(cfg) => self
                .webhook(&cfg, run)
                .await
                .map_err(|e| fail(SideEffectStage::Action, e)),
            ActionConfig::FieldUpdate(cfg) => self.field_update(action, &cfg, run).await,
        }
    }

    async fn notify(&self, cfg: &NotificationConfig, run: &PreparedRun) -> Result<(), CoreError> {
        let recipients = self.resolve_user_ids(&cfg.recipients, &run.incident).await?;
        if recipients.is_empty() {
            return Err(action_failure(ActionType::Notification, "No recipients resolved"));
        }
        let message = NotificationMessage {
            incident_id: run.incident.id,
            actor_id: run.performed_by,
            recipient_user_ids: recipients,
            title: run.placeholders.render(&cfg.title),
            message: run.placeholders.render(&cfg.message),
        };
        self.transport
            .notify(&message)
            .await
            .map_err(|e| action_failure(ActionType::Notification, e))
    }

    async fn email(&self, cfg: &EmailConfig, run: &PreparedRun) -> Result<(), CoreError> {
        let to = self.resolve_addresses(&cfg.recipients, &run.incident).await?;
        if to.is_empty() {
            return Err(action_failure(ActionType::Email, "No recipient addresses resolved"));
        }
        let message = EmailMessage {
            incident_id: run.incident.id,
            to,
            subject: run.placeholders.render(&cfg.subject),
            body: run.placeholders.render(&cfg.body),
        };
        self.transport
            .send_email(&message)
            .await
            .map_err(|e| action_failure(ActionType::Email, e))
    }

    async fn webhook(&self, cfg: &WebhookConfig, run: &PreparedRun) -> Result<(), CoreError> {
        let request = WebhookRequest {
            url: cfg.url.clone(),
            method: cfg.method(),
            headers: cfg.headers.clone(),
            body: cfg.body.as_ref().map(|b| run.placeholders.render_json(b)),
            retries: cfg.retries,
        };

        let status = tokio::time::timeout(self.webhook_timeout, self.transport.call_webhook(&request))
            .await
            .map_err(|_| {
                action_failure(
                    ActionType::Webhook,
                    format!("Timed out after {}s", self.webhook_timeout.as_secs()),
                )
            })?
            .map_err(|e| action_failure(ActionType::Webhook, e))?;

        if status >= 400 {
            return Err(action_failure(
                ActionType::Webhook,
                format!("Webhook returned HTTP {status}"),
            ));
        }
        tracing::debug!(incident_id = run.incident.id, status, url = %request.url, "Webhook delivered");
        Ok(())
    }

    async fn field_update(
        &self,
        action: &TransitionAction,
        cfg: &FieldUpdateConfig,
        run: &PreparedRun,
    ) -> Result<(), SideEffectFailure> {
        let fail = |stage, message: String| {
            SideEffectFailure::for_action(stage, action.id, &action.action_type, message)
        };
        let update = cfg
            .to_update()
            .map_err(|e| fail(SideEffectStage::Action, e.to_string()))?;

        let before = self
            .incidents
            .find_incident(run.incident.id)
            .await
            .map_err(|e| fail(SideEffectStage::Action, e.to_string()))?
            .ok_or_else(|| fail(SideEffectStage::Action, "Incident no longer exists".into()))?;

        self.incidents
            .apply_field_update(run.incident.id, &update)
            .await
            .map_err(|e| fail(SideEffectStage::Action, e.to_string()))?
            .ok_or_else(|| fail(SideEffectStage::Action, "Incident no longer exists".into()))?;

        let Some(change) =
            FieldChange::if_changed(update.field(), current_value(&before, &update), update.value_json())
        else {
            return Ok(());
        };
        self.revisions
            .record_field_changes(run.incident.id, &[change], Some(run.performed_by))
            .await
            .map_err(|e| fail(SideEffectStage::Revision, e.to_string()))?;
        Ok(())
    }

    // -- recipients ---------------------------------------------------------

    /// Resolve tokens to user ids. `email:` tokens are skipped.
    async fn resolve_user_ids(
        &self,
        tokens: &[String],
        incident: &Incident,
    ) -> Result<Vec<DbId>, CoreError> {
        let mut ids = Vec::new();
        for raw in tokens {
            match RecipientToken::parse(raw)? {
                RecipientToken::Assignee => ids.extend(incident.assignee_id),
                RecipientToken::Reporter => ids.extend(incident.reporter_id),
                RecipientToken::User(id) => ids.push(id),
                RecipientToken::Role(code) => {
                    let members = self
                        .users
                        .find_by_role_code(&code)
                        .await
                        .map_err(|e| action_failure(ActionType::Notification, e))?;
                    ids.extend(members.into_iter().map(|u| u.id));
                }
                RecipientToken::Email(address) => {
                    tracing::warn!(
                        incident_id = incident.id,
                        %address,
                        "Email recipient ignored by notification action"
                    );
                }
            }
        }
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    /// Resolve tokens to addresses, first occurrence order.
    async fn resolve_addresses(
        &self,
        tokens: &[String],
        incident: &Incident,
    ) -> Result<Vec<String>, CoreError> {
        let mut addresses: Vec<String> = Vec::new();
        for raw in tokens {
            let found = match RecipientToken::parse(raw)? {
                RecipientToken::Email(address) => vec![address],
                RecipientToken::Assignee => self.user_address(incident.assignee_id).await?,
                RecipientToken::Reporter => self.user_address(incident.reporter_id).await?,
                RecipientToken::User(id) => self.user_address(Some(id)).await?,
                RecipientToken::Role(code) => self
                    .users
                    .find_by_role_code(&code)
                    .await
                    .map_err(|e| action_failure(ActionType::Email, e))?
                    .into_iter()
                    .filter(|u| !u.email.trim().is_empty())
                    .map(|u| u.email)
                    .collect(),
            };
            for address in found {
                if !addresses.contains(&address) {
                    addresses.push(address);
                }
            }
        }
        Ok(addresses)
    }

    async fn user_address(&self, user_id: Option<DbId>) -> Result<Vec<String>, CoreError> {
        let Some(user_id) = user_id else {
            return Ok(Vec::new());
        };
        let user = self
            .users
            .find_user(user_id)
            .await
            .map_err(|e| action_failure(ActionType::Email, e))?;
        Ok(user
            .filter(|u| u.is_active && !u.email.trim().is_empty())
            .map(|u| u.email)
            .into_iter()
            .collect())
    }
}

fn action_failure(kind: ActionType, message: impl std::fmt::Display) -> CoreError {
    CoreError::ActionFailure {
        action_type: kind.as_str().to_string(),
        message: message.to_string(),
    }
}

fn current_value(incident: &Incident, update: &FieldUpdate) -> serde_json::Value {
    match update {
        FieldUpdate::Priority(_) => serde_json::json!(incident.priority),
        FieldUpdate::Severity(_) => serde_json::json!(incident.severity),
        FieldUpdate::AssigneeId(_) => serde_json::json!(incident.assignee_id),
        FieldUpdate::DepartmentId(_) => serde_json::json!(incident.department_id),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use triage_core::revision::action_types;
    use triage_db::models::incident::IncidentPatch;
    use triage_db::models::workflow::CreateTransitionAction;

    use super::*;
    use crate::memory::{fixtures, FailPoint, MemoryStore, RecordingTransport};
    use crate::store::RevisionStore;

    struct Harness {
        store: Arc<MemoryStore>,
        transport: Arc<RecordingTransport>,
        flow: fixtures::BasicFlow,
        executor: ActionExecutor,
    }

    fn harness_with(config: EngineConfig) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(RecordingTransport::new());
        let flow = fixtures::basic_workflow(&store);
        let collaborators = Collaborators::from_store(store.clone(), transport.clone());
        Harness {
            executor: ActionExecutor::new(&collaborators, &config),
            store,
            transport,
            flow,
        }
    }

    fn harness() -> Harness {
        harness_with(EngineConfig::default())
    }

    fn action(h: &Harness, kind: &str, config: serde_json::Value, order: i32, is_async: bool) -> TransitionAction {
        h.store.add_action(&CreateTransitionAction {
            transition_id: h.flow.start.id,
            name: Some(format!("{kind} #{order}")),
            action_type: kind.to_string(),
            config,
            execution_order: Some(order),
            is_async: Some(is_async),
        })
    }

    fn context(incident: Incident, performed_by: DbId) -> ActionContext {
        ActionContext {
            incident,
            transition_name: "Start work".into(),
            from_state: "Open".into(),
            to_state: "In Progress".into(),
            performed_by,
        }
    }

    #[tokio::test]
    async fn notification_renders_placeholders_for_resolved_users() {
        let h = harness();
        let alice = h.store.add_user("alice", None, None);
        let reporter = h.store.add_user("rita", None, None);
        let mut incident = fixtures::open_incident(&h.store, &h.flow).await.unwrap();
        incident.assignee_id = Some(alice.id);
        incident.reporter_id = Some(reporter.id);

        let actions = vec![action(
            &h,
            "notification",
            json!({
                "recipients": ["assignee", "reporter", "user:900", "assignee"],
                "title": "{{incident_number}} moved",
                "message": "{{performed_by}} moved it from {{from_state}} to {{to_state}} ({{unknown}})"
            }),
            0,
            false,
        )];

        let failures = h.executor.execute(&actions, context(incident.clone(), alice.id)).await;
        assert!(failures.is_empty(), "{failures:?}");

        let sent = h.transport.notifications();
        assert_eq!(sent.len(), 1);
        let mut expected = vec![alice.id, reporter.id, 900];
        expected.sort_unstable();
        assert_eq!(sent[0].recipient_user_ids, expected);
        assert_eq!(sent[0].title, format!("{} moved", incident.incident_number));
        assert_eq!(
            sent[0].message,
            "alice moved it from Open to In Progress ({{unknown}})"
        );
    }

    #[tokio::test]
    async fn email_resolves_addresses_and_role_members() {
        let h = harness();
        let role = h.store.add_role("service-desk");
        let bob = h.store.add_user("bob", None, None);
        let carol = h.store.add_user("carol", None, None);
        h.store.grant_role(bob.id, role);
        h.store.grant_role(carol.id, role);
        let incident = fixtures::open_incident(&h.store, &h.flow).await.unwrap();

        let actions = vec![action(
            &h,
            "email",
            json!({
                "recipients": ["role:service-desk", "email:ops@example.com", format!("user:{}", bob.id)],
                "subject": "[{{incident_number}}] {{incident_title}}",
                "body": "Now {{current_state}}, priority {{priority}}"
            }),
            0,
            false,
        )];

        let failures = h.executor.execute(&actions, context(incident.clone(), bob.id)).await;
        assert!(failures.is_empty(), "{failures:?}");

        let emails = h.transport.emails();
        assert_eq!(emails.len(), 1);
        assert_eq!(
            emails[0].to,
            vec![
                "bob@example.com".to_string(),
                "carol@example.com".to_string(),
                "ops@example.com".to_string()
            ]
        );
        assert_eq!(
            emails[0].subject,
            format!("[{}] Mail server unreachable", incident.incident_number)
        );
        assert_eq!(emails[0].body, "Now In Progress, priority 3");
    }

    #[tokio::test]
    async fn actions_run_in_execution_order_and_failures_do_not_stop_later_ones() {
        let h = harness();
        let user = h.store.add_user("alice", None, None);
        let incident = fixtures::open_incident(&h.store, &h.flow).await.unwrap();
        h.transport.respond_with_status(503);

        let second = action(
            &h,
            "notification",
            json!({"recipients": ["user:1"], "title": "second", "message": ""}),
            2,
            false,
        );
        let first_webhook = action(
            &h,
            "webhook",
            json!({"url": "https://hooks.example.com/a", "body": {"n": "{{incident_number}}"}}),
            1,
            false,
        );
        let tie = action(
            &h,
            "notification",
            json!({"recipients": ["user:1"], "title": "tie", "message": ""}),
            2,
            false,
        );

        let failures = h
            .executor
            .execute(&[second, first_webhook.clone(), tie], context(incident.clone(), user.id))
            .await;

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].stage, SideEffectStage::Action);
        assert_eq!(failures[0].action_id, Some(first_webhook.id));
        assert!(failures[0].message.contains("503"));

        let webhooks = h.transport.webhooks();
        assert_eq!(webhooks[0].method, "POST");
        assert_eq!(webhooks[0].body, Some(json!({"n": incident.incident_number})));

        let titles: Vec<String> = h.transport.notifications().into_iter().map(|n| n.title).collect();
        assert_eq!(titles, vec!["second".to_string(), "tie".to_string()]);
    }

    #[tokio::test]
    async fn inactive_actions_are_skipped() {
        let h = harness();
        let incident = fixtures::open_incident(&h.store, &h.flow).await.unwrap();
        let mut inactive = action(
            &h,
            "notification",
            json!({"recipients": ["user:1"], "title": "t", "message": "m"}),
            0,
            false,
        );
        inactive.is_active = false;

        let failures = h.executor.execute(&[inactive], context(incident, 1)).await;
        assert!(failures.is_empty());
        assert!(h.transport.notifications().is_empty());
    }

    #[tokio::test]
    async fn bad_config_and_empty_recipients_fail_only_that_action() {
        let h = harness();
        let incident = fixtures::open_incident(&h.store, &h.flow).await.unwrap();
        let unsupported = action(&h, "field_update", json!({"field": "title", "value": "x"}), 0, false);
        let bad_token = action(
            &h,
            "notification",
            json!({"recipients": ["group:7"], "title": "t", "message": "m"}),
            1,
            false,
        );
        let nobody = action(
            &h,
            "notification",
            json!({"recipients": ["assignee"], "title": "t", "message": "m"}),
            2,
            false,
        );
        let fine = action(
            &h,
            "notification",
            json!({"recipients": ["user:3"], "title": "ok", "message": "m"}),
            3,
            false,
        );

        let failures = h
            .executor
            .execute(&[unsupported, bad_token, nobody, fine], context(incident, 1))
            .await;

        assert_eq!(failures.len(), 3);
        assert!(failures.iter().all(|f| f.stage == SideEffectStage::Action));
        assert_eq!(h.transport.notifications().len(), 1);
    }

    #[tokio::test]
    async fn email_transport_failure_is_reported() {
        let h = harness();
        h.transport.fail_emails();
        let incident = fixtures::open_incident(&h.store, &h.flow).await.unwrap();
        let email = action(
            &h,
            "email",
            json!({"recipients": ["email:a@example.com"], "subject": "s", "body": "b"}),
            0,
            false,
        );

        let failures = h.executor.execute(&[email], context(incident, 1)).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].action_type.as_deref(), Some("email"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_webhook_times_out_as_action_failure() {
        let h = harness_with(EngineConfig {
            webhook_timeout: Duration::from_secs(2),
        });
        h.transport.delay_webhooks(Duration::from_secs(10));
        let incident = fixtures::open_incident(&h.store, &h.flow).await.unwrap();
        let hook = action(&h, "webhook", json!({"url": "http://slow.example.com"}), 0, false);

        let failures = h.executor.execute(&[hook], context(incident, 1)).await;
        assert_eq!(failures.len(), 1);
        assert!(failures[0].message.contains("Timed out"));
        assert!(h.transport.webhooks().is_empty());
    }

    #[tokio::test]
    async fn field_update_applies_and_records_revision() {
        let h = harness();
        let incident = fixtures::open_incident(&h.store, &h.flow).await.unwrap();
        let update = action(&h, "field_update", json!({"field": "priority", "value": 1}), 0, false);

        let failures = h.executor.execute(&[update], context(incident.clone(), 4)).await;
        assert!(failures.is_empty(), "{failures:?}");

        assert_eq!(h.store.incident(incident.id).unwrap().priority, 1);
        let revisions = h.store.list_revisions(incident.id).await.unwrap();
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].action_type, action_types::FIELD_CHANGED);
        let changes = revisions[0].field_changes().unwrap();
        assert_eq!(changes[0].old_value, json!(3));
        assert_eq!(changes[0].new_value, json!(1));
    }

    #[tokio::test]
    async fn assignee_field_update_replaces_the_assignee_set() {
        let h = harness();
        let incident = fixtures::open_incident(&h.store, &h.flow).await.unwrap();
        h.store
            .update_fields(
                incident.id,
                &IncidentPatch {
                    assignee_id: Some(5),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(h.store.list_assignees(incident.id).await.unwrap(), vec![5]);

        let reassign = action(&h, "field_update", json!({"field": "assignee_id", "value": 42}), 0, false);
        let failures = h.executor.execute(&[reassign], context(incident.clone(), 4)).await;
        assert!(failures.is_empty(), "{failures:?}");
        assert_eq!(h.store.incident(incident.id).unwrap().assignee_id, Some(42));
        assert_eq!(h.store.list_assignees(incident.id).await.unwrap(), vec![42]);

        let clear = action(&h, "field_update", json!({"field": "assignee_id", "value": null}), 1, false);
        let failures = h.executor.execute(&[clear], context(incident.clone(), 4)).await;
        assert!(failures.is_empty(), "{failures:?}");
        assert!(h.store.list_assignees(incident.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn field_update_revision_failure_is_a_revision_diagnostic() {
        let h = harness();
        h.store.fail_on(FailPoint::AppendRevision);
        let incident = fixtures::open_incident(&h.store, &h.flow).await.unwrap();
        let update = action(&h, "field_update", json!({"field": "severity", "value": "5"}), 0, false);

        let failures = h.executor.execute(&[update], context(incident.clone(), 4)).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].stage, SideEffectStage::Revision);
        assert_eq!(h.store.incident(incident.id).unwrap().severity, 5);
    }

    #[tokio::test]
    async fn async_failures_never_reach_the_caller_and_drain_waits() {
        let h = harness();
        h.transport.respond_with_status(500);
        let incident = fixtures::open_incident(&h.store, &h.flow).await.unwrap();
        let hook = action(&h, "webhook", json!({"url": "https://hooks.example.com"}), 0, true);

        let failures = h.executor.execute(&[hook], context(incident, 1)).await;
        assert!(failures.is_empty());

        h.executor.drain().await;
        assert_eq!(h.executor.in_flight(), 0);
        assert_eq!(h.transport.webhooks().len(), 1);
    }
}
