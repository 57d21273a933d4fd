//! End-to-end transition scenarios against the in-memory store.

use std::collections::BTreeSet;
use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use serde_json::json;
use triage_core::error::CoreError;
use triage_core::revision::action_types;
use triage_core::types::{DbId, Timestamp};
use triage_core::workflow::RecordType;
use triage_db::models::incident::IncidentPatch;
use triage_db::models::workflow::{
    CreateTransition, CreateTransitionAction, CreateTransitionRequirement, Transition,
};
use triage_workflow::memory::{fixtures, MemoryStore, RecordingTransport};
use triage_workflow::store::{IncidentStore, RevisionStore};
use triage_workflow::{
    Clock, Collaborators, EngineConfig, IncidentService, NewIncident, SlaMonitor,
    SlaMonitorConfig, TransitionEngine, TransitionRequest, WorkflowError,
};

const CLASSIFICATION: DbId = 500;
const LOCATION: DbId = 600;
const DEPARTMENT: DbId = 700;

struct World {
    store: Arc<MemoryStore>,
    transport: Arc<RecordingTransport>,
    flow: fixtures::BasicFlow,
    collaborators: Collaborators,
    engine: TransitionEngine,
    role_id: DbId,
}

impl World {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(RecordingTransport::new());
        let flow = fixtures::basic_workflow(&store);
        let collaborators = Collaborators::from_store(store.clone(), transport.clone());
        let engine = TransitionEngine::new(&collaborators, &EngineConfig::default());
        let role_id = store.add_role("network-team");
        Self {
            store,
            transport,
            flow,
            collaborators,
            engine,
            role_id,
        }
    }

    /// A role member matching (or not) the incident's full criteria.
    fn responder(&self, name: &str, matching: bool) -> DbId {
        let (department, location) = if matching {
            (Some(DEPARTMENT), Some(LOCATION))
        } else {
            (Some(DEPARTMENT + 1), None)
        };
        let user = self.store.add_user(name, department, location);
        self.store.grant_role(user.id, self.role_id);
        if matching {
            self.store.grant_classification(user.id, CLASSIFICATION);
        }
        user.id
    }

    /// `Open -> In Progress`, comment required, auto-assigned from the role,
    /// notifying the assignee and firing an async webhook.
    fn start_with_auto_assign(&self) -> Transition {
        let t = self.store.add_transition(&CreateTransition {
            workflow_id: self.flow.workflow.id,
            name: "Begin investigation".into(),
            from_state_id: self.flow.open.id,
            to_state_id: self.flow.in_progress.id,
            assignment_role_id: Some(self.role_id),
            auto_match_user: true,
            ..Default::default()
        });
        self.store.add_requirement(&CreateTransitionRequirement {
            transition_id: t.id,
            requirement_type: "comment".into(),
            is_mandatory: true,
            error_message: Some("Describe the first step".into()),
            sort_order: Some(1),
        });
        self.store.add_action(&CreateTransitionAction {
            transition_id: t.id,
            name: Some("Tell the assignee".into()),
            action_type: "notification".into(),
            config: json!({
                "recipients": ["assignee"],
                "title": "{{incident_number}} assigned to {{assignee}}",
                "message": "{{performed_by}}: {{from_state}} -> {{to_state}}"
            }),
            execution_order: Some(1),
            is_async: Some(false),
        });
        self.store.add_action(&CreateTransitionAction {
            transition_id: t.id,
            name: Some("Mirror to tracker".into()),
            action_type: "webhook".into(),
            config: json!({
                "url": "https://tracker.example.com/hooks/incidents",
                "method": "put",
                "headers": {"X-Source": "triage"},
                "body": {"number": "{{incident_number}}", "state": "{{current_state}}"}
            }),
            execution_order: Some(2),
            is_async: Some(true),
        });
        t
    }

    async fn incident_with_criteria(&self) -> triage_db::models::incident::Incident {
        let mut incident = fixtures::open_incident(&self.store, &self.flow).await.unwrap();
        incident.classification_id = Some(CLASSIFICATION);
        incident.location_id = Some(LOCATION);
        incident.department_id = Some(DEPARTMENT);
        self.store.put_incident(incident.clone());
        incident
    }
}

fn request(incident_id: DbId, transition_id: DbId, comment: &str) -> TransitionRequest {
    TransitionRequest {
        comment: Some(comment.to_string()),
        ..TransitionRequest::new(incident_id, transition_id, 1)
    }
}

#[tokio::test]
async fn open_to_in_progress_with_comment_and_auto_assignment() {
    let world = World::new();
    let t1 = world.start_with_auto_assign();
    let c = world.responder("carol", true);
    let a = world.responder("alice", true);
    let b = world.responder("bob", true);
    world.responder("outsider", false);
    let dispatcher = world.store.add_user("dispatcher", None, None);
    let incident = world.incident_with_criteria().await;
    let before = Utc::now();

    let mut req = request(incident.id, t1.id, "started");
    req.actor_id = dispatcher.id;
    let outcome = world.engine.execute(req).await.unwrap();

    let moved = &outcome.incident;
    assert!(outcome.is_clean(), "{:?}", outcome.diagnostics);
    assert_eq!(moved.current_state_id, world.flow.in_progress.id);
    assert!(!moved.sla_breached);
    let deadline = moved.sla_deadline.unwrap();
    assert!(deadline >= before + Duration::hours(8));
    assert!(deadline <= Utc::now() + Duration::hours(8));

    let mut expected = vec![a, b, c];
    expected.sort_unstable();
    assert_eq!(moved.assignee_id, Some(expected[0]));
    assert_eq!(world.store.list_assignees(incident.id).await.unwrap(), expected);

    assert_eq!(world.store.list_history(incident.id).await.unwrap().len(), 1);
    let comments = world.store.comments(incident.id);
    assert_eq!(comments.len(), 1);
    assert!(comments[0].is_internal);

    let revisions = world.store.list_revisions(incident.id).await.unwrap();
    assert_eq!(revisions.len(), 1);
    assert_eq!(revisions[0].action_type, action_types::STATUS_CHANGED);

    let notifications = world.transport.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].recipient_user_ids, vec![expected[0]]);
    assert_eq!(notifications[0].message, "dispatcher: Open -> In Progress");

    world.engine.executor().drain().await;
    let webhooks = world.transport.webhooks();
    assert_eq!(webhooks.len(), 1);
    assert_eq!(webhooks[0].method, "PUT");
    assert_eq!(
        webhooks[0].body,
        Some(json!({"number": incident.incident_number, "state": "In Progress"}))
    );

    let again = world.engine.execute(request(incident.id, t1.id, "started")).await;
    assert_matches!(again, Err(WorkflowError::Core(CoreError::InvalidTransition(_))));
    assert_eq!(world.store.list_history(incident.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn auto_assignment_falls_back_to_role_members() {
    let world = World::new();
    let t1 = world.start_with_auto_assign();
    let x = world.responder("xavier", false);
    let y = world.responder("yara", false);
    let incident = world.incident_with_criteria().await;

    let outcome = world
        .engine
        .execute(request(incident.id, t1.id, "started"))
        .await
        .unwrap();

    assert_eq!(outcome.incident.assignee_id, Some(x.min(y)));
    assert_eq!(
        world.store.list_assignees(incident.id).await.unwrap(),
        vec![x.min(y), x.max(y)]
    );
}

#[tokio::test]
async fn nobody_to_assign_still_transitions() {
    let world = World::new();
    let t1 = world.start_with_auto_assign();
    let incident = world.incident_with_criteria().await;

    let outcome = world
        .engine
        .execute(request(incident.id, t1.id, "started"))
        .await
        .unwrap();

    assert_eq!(outcome.incident.current_state_id, world.flow.in_progress.id);
    assert_eq!(outcome.incident.assignee_id, None);
    // The "assignee" recipient resolves to nobody.
    assert_eq!(outcome.diagnostics.len(), 1);
}

#[tokio::test]
async fn empty_comment_is_rejected_with_configured_message() {
    let world = World::new();
    let t1 = world.start_with_auto_assign();
    world.responder("alice", true);
    let incident = world.incident_with_criteria().await;

    let result = world.engine.execute(request(incident.id, t1.id, "")).await;

    assert_matches!(
        result,
        Err(WorkflowError::Core(CoreError::RequirementNotMet(m))) if m == "Describe the first step"
    );
    let unchanged = world.store.incident(incident.id).unwrap();
    assert_eq!(unchanged.current_state_id, world.flow.open.id);
    assert_eq!(unchanged.assignee_id, None);
    assert!(world.store.list_history(incident.id).await.unwrap().is_empty());
    assert!(world.transport.notifications().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_transitions_commit_once() {
    let world = World::new();
    let incident = fixtures::open_incident(&world.store, &world.flow).await.unwrap();

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let engine = world.engine.clone();
            let req = TransitionRequest::new(incident.id, world.flow.start.id, 1);
            tokio::spawn(async move { engine.execute(req).await })
        })
        .collect();

    let mut committed = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => committed += 1,
            Err(WorkflowError::Core(
                CoreError::InvalidTransition(_) | CoreError::ConcurrencyConflict(_),
            )) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(committed, 1);
    assert_eq!(world.store.list_history(incident.id).await.unwrap().len(), 1);
    assert_eq!(
        world.store.list_revisions(incident.id).await.unwrap().len(),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_mutations_number_revisions_without_gaps() {
    let world = World::new();
    let service = IncidentService::new(&world.collaborators);
    let incident = service
        .create(NewIncident::new("Switch stack flapping", RecordType::Incident), 1)
        .await
        .unwrap();

    let incident_id = incident.id;
    let mut tasks = Vec::new();
    for i in 0..20i64 {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                service
                    .add_comment(incident_id, &format!("update {i}"), false, 2)
                    .await
                    .map(|_| ())
            } else {
                let patch = IncidentPatch {
                    custom_fields: Some(json!({ "step": i })),
                    ..Default::default()
                };
                service.update_fields(incident_id, patch, 2).await.map(|_| ())
            }
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let numbers: Vec<i32> = service
        .revisions(incident.id)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.revision_number)
        .collect();
    assert_eq!(numbers, (1..=21).collect::<Vec<_>>());
}

struct FixedClock(Timestamp);

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        self.0
    }
}

#[tokio::test]
async fn breach_is_flagged_once_and_cleared_by_transition() {
    let world = World::new();
    let incident = fixtures::open_incident(&world.store, &world.flow).await.unwrap();
    let monitor = SlaMonitor::new(
        world.store.clone(),
        Arc::new(FixedClock(Utc::now() + Duration::hours(30))),
        SlaMonitorConfig::default(),
    );

    assert_eq!(monitor.scan_once().await.unwrap().marked, 1);
    let after_second_scan = monitor.scan_once().await.unwrap();
    assert_eq!(after_second_scan.marked, 0);
    assert!(world.store.incident(incident.id).unwrap().sla_breached);

    let outcome = world
        .engine
        .execute(TransitionRequest::new(incident.id, world.flow.start.id, 1))
        .await
        .unwrap();
    assert!(!outcome.incident.sla_breached);

    let overdue: BTreeSet<DbId> = world
        .store
        .find_sla_overdue(Utc::now())
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.id)
        .collect();
    assert!(!overdue.contains(&incident.id));
}
