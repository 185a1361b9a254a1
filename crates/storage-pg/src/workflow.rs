use async_trait::async_trait;
use cadre_data_model::{EmailWorkflow, TemplateVars};
use cadre_storage::{EmailWorkflowRepository, RepositoryError};
use serde_json::Value;
use sqlx::PgConnection;
use ulid::Ulid;
use uuid::Uuid;

use crate::{map_sqlx_err, ExecuteExt};

pub struct PgEmailWorkflowRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgEmailWorkflowRepository<'c> {
    #[must_use]
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct WorkflowRow {
    id: Uuid,
    name: String,
    trigger_event: String,
    template_name: String,
    priority: i32,
    delay_minutes: Option<i32>,
    default_vars: Value,
    is_enabled: bool,
    is_system: bool,
}

impl From<WorkflowRow> for EmailWorkflow {
    fn from(r: WorkflowRow) -> Self {
        let default_vars: TemplateVars = serde_json::from_value(r.default_vars).unwrap_or_default();
        Self {
            id: r.id.into(),
            name: r.name,
            trigger_event: r.trigger_event,
            template_name: r.template_name,
            priority: r.priority,
            delay_minutes: r.delay_minutes,
            default_vars,
            is_enabled: r.is_enabled,
            is_system: r.is_system,
        }
    }
}

#[async_trait]
impl<'c> EmailWorkflowRepository for PgEmailWorkflowRepository<'c> {
    #[tracing::instrument(name = "db.email_workflow.lookup", skip_all, fields(db.statement, workflow.id = %id), err)]
    async fn lookup(&mut self, id: Ulid) -> Result<Option<EmailWorkflow>, RepositoryError> {
        let row = sqlx::query_as!(WorkflowRow, r#"SELECT * FROM email_workflows WHERE id = $1"#, Uuid::from(id))
            .traced()
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(map_sqlx_err)?;

        Ok(row.map(Into::into))
    }

    #[tracing::instrument(name = "db.email_workflow.find_enabled_for_trigger", skip_all, fields(db.statement, workflow.trigger_event = trigger_event), err)]
    async fn find_enabled_for_trigger(
        &mut self,
        trigger_event: &str,
    ) -> Result<Vec<EmailWorkflow>, RepositoryError> {
        let rows = sqlx::query_as!(
            WorkflowRow,
            r#"
                SELECT * FROM email_workflows
                WHERE trigger_event = $1 AND is_enabled
                ORDER BY priority ASC
            "#,
            trigger_event,
        )
        .traced()
        .fetch_all(&mut *self.conn)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
