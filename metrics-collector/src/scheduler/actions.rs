//! What scheduled jobs do: email graphs or warm the graph cache.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

use super::config::{ActionConfig, EmailAction, ScheduleConfig};
use crate::errors::{MailError, MetricsError, Result, ScheduleError};
use crate::load::{Artifact, GraphFormat};
use crate::orchestrator::{LoggingProgress, Orchestrator};
use crate::transform::Transform;

/// An email with rendered graphs attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    /// Recipient.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Plain text body.
    pub body: String,
    /// Rendered graphs.
    pub attachments: Vec<Artifact>,
}

/// Delivers emails.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Sends `message`.
    async fn send(&self, message: EmailMessage) -> std::result::Result<(), MailError>;
}

/// Mailer that only logs what it would send.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMailer;

#[async_trait]
impl Mailer for LoggingMailer {
    async fn send(&self, message: EmailMessage) -> std::result::Result<(), MailError> {
        info!(
            to = %message.to,
            subject = %message.subject,
            attachments = message.attachments.len(),
            "Sending email"
        );
        Ok(())
    }
}

/// Builds the pipeline's transform for `config`, extracting the period first.
///
/// Remembered parameters fill in whatever the configuration does not set.
fn prepare(orchestrator: &Orchestrator, config: &ScheduleConfig) -> Result<Box<dyn Transform>> {
    let mut params = orchestrator.stored_params(&config.pipeline_id);
    params.extend(config.extract_params.clone());
    let extracts = orchestrator.get_extract_objects(&config.pipeline_id, &params)?;
    orchestrator.process_dates(&extracts, &config.from, &config.to, Some(&LoggingProgress))?;
    orchestrator.get_transform_object(&config.pipeline_id, extracts)
}

fn render_all(
    orchestrator: &Orchestrator,
    config: &ScheduleConfig,
    format: GraphFormat,
) -> Result<Vec<Artifact>> {
    let mut transform = prepare(orchestrator, config)?;
    orchestrator
        .get_all_graphs(&config.from, &config.to, &config.pipeline_id, transform.as_mut(), format)?
        .map(|artifact| artifact.map_err(MetricsError::from))
        .collect()
}

fn warm_cache(orchestrator: &Orchestrator, config: &ScheduleConfig) -> Result<usize> {
    let mut transform = prepare(orchestrator, config)?;
    let mut warmed = 0;
    for graph in orchestrator.graph_names(&config.pipeline_id)? {
        for format in [GraphFormat::Html, GraphFormat::Png] {
            orchestrator.get_graph(
                &graph,
                &config.from,
                &config.to,
                &config.pipeline_id,
                transform.as_mut(),
                format,
            )?;
            warmed += 1;
        }
    }
    Ok(warmed)
}

async fn blocking<T, F>(orchestrator: &Orchestrator, config: &ScheduleConfig, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Orchestrator, &ScheduleConfig) -> Result<T> + Send + 'static,
{
    let orchestrator = orchestrator.clone();
    let config = config.clone();
    tokio::task::spawn_blocking(move || work(&orchestrator, &config))
        .await
        .map_err(|e| ScheduleError::Runtime(e.to_string()))?
}

async fn send_email(
    orchestrator: &Orchestrator,
    config: &ScheduleConfig,
    email: &EmailAction,
    mailer: &dyn Mailer,
) -> Result<()> {
    let attachments = blocking(orchestrator, config, |o, c| render_all(o, c, GraphFormat::Png)).await?;
    let message = EmailMessage {
        to: email.to_email.clone(),
        subject: email.subject.clone(),
        body: email.body.clone(),
        attachments,
    };
    if let Err(e) = mailer.send(message).await {
        error!(to = %email.to_email, error = %e, "Email delivery failed");
    }
    Ok(())
}

/// Runs the action of `config`.
///
/// Extraction and rendering run on the blocking pool. A failed email delivery
/// is logged, not returned.
pub async fn run_action(
    config: &ScheduleConfig,
    orchestrator: &Orchestrator,
    mailer: Arc<dyn Mailer>,
) -> Result<()> {
    info!(schedule = %config, "Running scheduled action");
    match &config.action {
        ActionConfig::Email(email) => send_email(orchestrator, config, email, mailer.as_ref()).await,
        ActionConfig::Cache(_) => {
            let warmed = blocking(orchestrator, config, warm_cache).await?;
            info!(pipeline = %config.pipeline_id, graphs = warmed, "Graph cache warmed");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::registry::Registry;
    use crate::scheduler::config::CacheAction;
    use crate::testing::{sample_document, sample_schedule, StaticExtract, StaticGraphLoader};
    use crate::transform::{ColumnSchema, ConcatTransform};
    use tempfile::TempDir;

    fn orchestrator(dir: &TempDir, extract: &StaticExtract) -> Orchestrator {
        let registry = Registry::builder()
            .register(extract.clone().into_registration("Garmin", ["health"]))
            .register(ConcatTransform::registration("HealthTransform", ["health"], ColumnSchema::new()))
            .register(StaticGraphLoader::registration("HealthGraphs", ["health"], ["steps", "sleep"]))
            .build()
            .unwrap();
        Orchestrator::new(Arc::new(registry), Settings::default().with_data_dir(dir.path()))
    }

    #[tokio::test]
    async fn test_email_action_sends_png_graphs() {
        let dir = TempDir::new().unwrap();
        let extract = StaticExtract::new(sample_document());
        let orchestrator = orchestrator(&dir, &extract);

        let mut mailer = MockMailer::new();
        mailer
            .expect_send()
            .withf(|m| {
                m.to == "me@example.com"
                    && m.attachments.len() == 2
                    && m.attachments.iter().all(|a| a.format == GraphFormat::Png)
            })
            .times(1)
            .returning(|_| Ok(()));

        run_action(&sample_schedule("health"), &orchestrator, Arc::new(mailer))
            .await
            .unwrap();
        assert_eq!(extract.calls(), 3);
    }

    #[tokio::test]
    async fn test_mail_failure_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&dir, &StaticExtract::new(sample_document()));

        let mut mailer = MockMailer::new();
        mailer
            .expect_send()
            .times(1)
            .returning(|_| Err(MailError("smtp down".to_string())));

        assert!(run_action(&sample_schedule("health"), &orchestrator, Arc::new(mailer))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_cache_action_warms_every_graph() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&dir, &StaticExtract::new(sample_document()));
        let mut config = sample_schedule("health");
        config.action = ActionConfig::Cache(CacheAction {});

        run_action(&config, &orchestrator, Arc::new(LoggingMailer)).await.unwrap();
        assert_eq!(orchestrator.memo().len(), 4);
    }

    #[tokio::test]
    async fn test_unknown_pipeline_fails() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&dir, &StaticExtract::new(sample_document()));
        let config = sample_schedule("nope");
        assert!(run_action(&config, &orchestrator, Arc::new(LoggingMailer)).await.is_err());
    }
}
