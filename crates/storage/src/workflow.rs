use async_trait::async_trait;
use cadre_data_model::EmailWorkflow;
use ulid::Ulid;

use crate::RepositoryError;

/// Repository for configured `EmailWorkflow` rows, consulted by the
/// Workflow Dispatcher (`SPEC_FULL.md` §4.3) whenever a trigger event fires.
#[async_trait]
pub trait EmailWorkflowRepository: Send {
    async fn lookup(&mut self, id: Ulid) -> Result<Option<EmailWorkflow>, RepositoryError>;

    /// Enabled workflows for `trigger_event`, ordered by `priority ASC`.
    async fn find_enabled_for_trigger(
        &mut self,
        trigger_event: &str,
    ) -> Result<Vec<EmailWorkflow>, RepositoryError>;
}
