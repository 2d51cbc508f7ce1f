//! Workspace metadata embedded in commit messages.
//!
//! When the platform lands a workspace on trunk it writes a
//! `workspace_id=<id>` line into the commit message. The push reconciler
//! reads it back to link the imported change to the workspace it came from.

use crate::types::WorkspaceId;

const WORKSPACE_KEY: &str = "workspace_id=";

/// The workspace ID embedded in a commit message, if any.
///
/// The last well-formed line wins, so a message that quotes another commit's
/// metadata still resolves to its own trailer.
pub fn parse_workspace_id(message: &str) -> Option<WorkspaceId> {
    message
        .lines()
        .filter_map(|line| line.trim().strip_prefix(WORKSPACE_KEY))
        .map(str::trim)
        .filter(|id| !id.is_empty() && !id.contains(char::is_whitespace))
        .last()
        .map(WorkspaceId::new)
}

/// First line of a commit message or description, for titles.
pub fn first_line(text: &str) -> &str {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
}
