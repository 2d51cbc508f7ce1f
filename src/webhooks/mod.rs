//! Inbound webhooks: signature verification, typed events and parsing.

pub mod events;
pub mod parser;
pub mod signature;

pub use events::{
    CommitState, InstallationAction, InstallationEvent, InstallationRepositoriesEvent,
    PullRequestEvent, PushEvent, RepoRef, RepositorySelection, StatusEvent, WebhookEvent,
    WorkflowConclusion, WorkflowJobEvent, WorkflowJobStatus,
};
pub use parser::{ParseError, SUPPORTED_EVENTS, parse_webhook};
pub use signature::{SignatureError, WebhookSecret};
