pub mod history_repo;
pub mod incident_repo;
pub mod revision_repo;
pub mod transition_repo;
pub mod user_repo;
pub mod workflow_repo;
pub mod workflow_state_repo;

pub use history_repo::{AttachmentRepo, CommentRepo, FeedbackRepo, TransitionHistoryRepo};
pub use incident_repo::IncidentRepo;
pub use revision_repo::RevisionRepo;
pub use transition_repo::TransitionRepo;
pub use user_repo::UserRepo;
pub use workflow_repo::WorkflowRepo;
pub use workflow_state_repo::WorkflowStateRepo;
