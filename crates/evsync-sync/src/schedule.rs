use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

use crate::{IngestPipeline, TriggerOutcome};

pub async fn build_scheduler(pipeline: Arc<IngestPipeline>, cron: &str) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron, move |_uuid, _l| {
        let pipeline = pipeline.clone();
        Box::pin(async move {
            if let TriggerOutcome::Ran(Ok(metrics)) = pipeline.trigger().await {
                info!(inserted = metrics.inserted, updated = metrics.updated, "scheduled ingest finished");
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}

/// Runs until ctrl-c. Ticks that land on an active run are skipped by the pipeline itself.
pub async fn run_scheduled(pipeline: Arc<IngestPipeline>, cron: &str, run_on_start: bool) -> Result<()> {
    let mut sched = build_scheduler(pipeline.clone(), cron).await?;
    sched.start().await.context("starting scheduler")?;
    info!(cron, "scheduler started");

    if run_on_start {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            pipeline.trigger().await;
        });
    }

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown requested");
    sched.shutdown().await.context("stopping scheduler")?;
    Ok(())
}
