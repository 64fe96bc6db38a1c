//! Repository metadata attached to a session.

use serde::{Deserialize, Serialize};

/// Where the agent behind a session is working.
///
/// Unlike the message history, this is free-form and set by the agent
/// when it registers; viewers use it to label sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    /// Absolute path of the repository checkout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<String>,
    /// Short repository name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_name: Option<String>,
    /// Branch currently checked out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl SessionMeta {
    /// Overwrite fields that `update` provides with a non-empty value.
    ///
    /// Missing or empty fields leave the current value in place.
    pub fn merge(&mut self, update: Self) {
        fn take(slot: &mut Option<String>, value: Option<String>) {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                *slot = Some(value);
            }
        }

        take(&mut self.repo_path, update.repo_path);
        take(&mut self.repo_name, update.repo_name);
        take(&mut self.branch, update.branch);
    }
}
