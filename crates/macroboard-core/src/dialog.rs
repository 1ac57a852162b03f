//! Confirmation and prompt requests.
//!
//! At most one request is pending. Whoever presents it answers through
//! [`DialogController::confirm`], [`DialogController::submit`] or
//! [`DialogController::cancel`]; the action runs against the controller only
//! on a positive answer.

use serde_json::Value;
use tracing::{debug, info};

use crate::app::App;
use crate::datetime::Clock;
use crate::error::{BoardError, BoardResult};
use crate::model::{GroupId, TaskId};
use crate::storage::KeyValueStore;
use crate::store::ResetScope;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmAction {
    DeleteGroup(GroupId),
    DeleteTask { group_id: GroupId, task_id: TaskId },
    /// Holds the already-parsed import payload.
    ReplaceAll(Value),
    ResetCompleted(ResetScope),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptAction {
    RenameGroup(GroupId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DialogRequest {
    Confirm {
        message: String,
        action: ConfirmAction,
    },
    Prompt {
        message: String,
        initial: String,
        action: PromptAction,
    },
}

impl DialogRequest {
    pub fn message(&self) -> &str {
        match self {
            DialogRequest::Confirm { message, .. } | DialogRequest::Prompt { message, .. } => {
                message
            }
        }
    }
}

/// What a confirmed action produced.
#[derive(Debug, Clone, PartialEq)]
pub enum DialogOutcome {
    Cancelled,
    GroupDeleted(String),
    TaskDeleted(String),
    Replaced(usize),
    Reset(usize),
    Renamed(usize),
}

#[derive(Debug, Default)]
pub struct DialogController {
    pending: Option<DialogRequest>,
}

impl DialogController {
    pub fn pending(&self) -> Option<&DialogRequest> {
        self.pending.as_ref()
    }

    /// Replaces any request still waiting for an answer.
    pub fn request(&mut self, request: DialogRequest) -> &DialogRequest {
        if let Some(previous) = &self.pending {
            debug!(message = previous.message(), "dropping unanswered dialog");
        }
        self.pending.insert(request)
    }

    pub fn cancel(&mut self) -> DialogOutcome {
        if let Some(request) = self.pending.take() {
            info!(message = request.message(), "dialog cancelled");
        }
        DialogOutcome::Cancelled
    }

    /// Runs the pending confirmation.
    #[tracing::instrument(skip_all)]
    pub fn confirm<S, C>(&mut self, app: &mut App<S, C>) -> BoardResult<DialogOutcome>
    where
        S: KeyValueStore,
        C: Clock,
    {
        let action = match self.pending.take() {
            Some(DialogRequest::Confirm { action, .. }) => action,
            Some(other) => {
                self.pending = Some(other);
                return Err(BoardError::validation("pending dialog expects a value"));
            }
            None => return Err(BoardError::validation("no dialog is pending")),
        };

        match action {
            ConfirmAction::DeleteGroup(id) => {
                app.delete_group(&id).map(|g| DialogOutcome::GroupDeleted(g.name))
            }
            ConfirmAction::DeleteTask { group_id, task_id } => app
                .delete_task(&group_id, &task_id)
                .map(|t| DialogOutcome::TaskDeleted(t.name)),
            ConfirmAction::ReplaceAll(payload) => {
                app.replace_all(payload).map(DialogOutcome::Replaced)
            }
            ConfirmAction::ResetCompleted(scope) => {
                app.reset_completed(&scope).map(DialogOutcome::Reset)
            }
        }
    }

    /// Answers the pending prompt with `value`.
    #[tracing::instrument(skip(self, app))]
    pub fn submit<S, C>(&mut self, app: &mut App<S, C>, value: &str) -> BoardResult<DialogOutcome>
    where
        S: KeyValueStore,
        C: Clock,
    {
        let action = match self.pending.take() {
            Some(DialogRequest::Prompt { action, .. }) => action,
            Some(other) => {
                self.pending = Some(other);
                return Err(BoardError::validation("pending dialog expects a confirmation"));
            }
            None => return Err(BoardError::validation("no dialog is pending")),
        };

        match action {
            PromptAction::RenameGroup(id) => {
                app.rename_group(&id, value).map(DialogOutcome::Renamed)
            }
        }
    }
}
