use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use sortbot_judge::store::JobQueue;
use sortbot_judge::testcases::{seed_if_empty, BatterySource};
use sortbot_judge::{EvaluationError, EvaluatorConfig, Evaluator, PythonExecutor, RedisStore, RunOptions};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sortbot_judge=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = EvaluatorConfig::from_env()?;
    info!(
        "Evaluator config: timeout={}ms, memory={}MB, sandbox={}, max_parallel={}, python={}",
        config.timeout_ms,
        config.max_memory_mb,
        config.sandbox_enabled,
        config.max_parallel,
        config.python_bin
    );

    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into());

    info!("Starting Sort Bot Worker...");

    let store = Arc::new(RedisStore::connect(&redis_url).await?);

    let source = BatterySource::from_lookup(|k| std::env::var(k).ok());
    let seeded = seed_if_empty(store.as_ref(), &source).await?;
    if seeded == 0 {
        info!("Test battery already present");
    }

    let executor = Arc::new(PythonExecutor::from_config(&config));
    let evaluator = Evaluator::new(store, executor, RunOptions::from(&config));

    let mut queue = JobQueue::connect(&redis_url).await?;
    info!("Waiting for jobs...");

    loop {
        let job = queue.pop_job().await?;
        info!("Received evaluate job: submission_id={}", job.submission_id);

        match evaluator.run_submission(job.submission_id).await {
            Ok(report) => info!(
                "Evaluate job finished: submission_id={}, status={}, score={:?}",
                report.submission_id, report.status, report.score
            ),
            Err(e @ EvaluationError::NotPending { .. }) => {
                warn!("Skipping job: {}", e)
            }
            Err(e) => error!(
                "Failed to process evaluate job {}: {}",
                job.submission_id, e
            ),
        }
    }
}
