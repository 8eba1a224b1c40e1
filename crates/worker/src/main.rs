use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use finishflow::api;
use finishflow::config::Config;
use finishflow::db;
use finishflow::distributors::PgDistributorStore;
use finishflow::email::LogEmailSender;
use finishflow::engagement::{EngagementRecorder, PgEngagementStore};
use finishflow::jobs::{build_registry, JobContext, JobRunner, JobStore, PgJobStore};
use finishflow::producer::JobProducer;
use finishflow::telemetry;

// upper bound on sweeps in a single cron invocation
const RUN_ONCE_MAX_ROUNDS: usize = 100;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();
    let cfg = Config::from_env()?;

    tracing::info!(
        worker_id = %cfg.worker_id,
        lease_seconds = cfg.lease_seconds,
        batch_size = cfg.batch_size,
        sweep_interval_ms = cfg.sweep_interval_ms,
        run_once = cfg.run_once,
        api = cfg.admin_addr.as_deref().unwrap_or("disabled"),
        auth = if cfg.admin_token.is_some() || cfg.director_token.is_some() { "enabled" } else { "disabled" },
        migrate_on_startup = cfg.migrate_on_startup,
        "finishflow worker starting"
    );

    let pool = db::make_pool(&cfg.database_url).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
    }

    let jobs: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
    let recorder = EngagementRecorder::new(Arc::new(PgEngagementStore::new(pool.clone())));

    let ctx = JobContext {
        worker_id: cfg.worker_id.clone(),
        sender: Arc::new(LogEmailSender),
        recorder: recorder.clone(),
        recipient_concurrency: cfg.recipient_concurrency,
    };
    let runner = JobRunner::new(
        jobs.clone(),
        build_registry(cfg.handler_timeout(), cfg.batch_size),
        ctx,
        cfg.runner(),
    );

    if cfg.run_once {
        let reclaimed = runner.reclaim_expired(Utc::now()).await?;
        let report = runner.drain(Utc::now(), RUN_ONCE_MAX_ROUNDS).await?;
        tracing::info!(
            reclaimed,
            claimed = report.claimed,
            completed = report.completed,
            retried = report.retried,
            dead = report.dead,
            "single sweep finished"
        );
        return Ok(());
    }

    // ---- API task ----
    let api_state = api::ApiState {
        jobs: jobs.clone(),
        producer: JobProducer::new(jobs.clone(), cfg.default_max_attempts),
        engagement: recorder,
        distributors: Arc::new(PgDistributorStore::new(pool.clone())),
        auth: api::AdminAuth::new(cfg.admin_token.clone(), cfg.director_token.clone()),
    };
    let app = api::router(api_state);
    let api_addr = cfg.admin_addr.clone();

    let api_handle = tokio::spawn(async move {
        if let Some(addr) = api_addr {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            tracing::info!("admin api listening on http://{addr}");
            axum::serve(listener, app).await?;
        } else {
            std::future::pending::<()>().await;
        }
        Ok::<(), anyhow::Error>(())
    });

    // ---- Sweep loop task ----
    let interval = Duration::from_millis(cfg.sweep_interval_ms);
    let worker_handle = tokio::spawn(async move {
        loop {
            // 1) recover jobs from crashed workers
            if let Err(e) = runner.reclaim_expired(Utc::now()).await {
                tracing::error!(error = %e, "lease reaping failed");
            }

            // 2) run what is due; keep going while batches come back full
            match runner.sweep(Utc::now()).await {
                Ok(report) if report.claimed > 0 => continue,
                Ok(_) => {}
                Err(e) => tracing::error!(worker_id = %runner.worker_id(), error = %e, "sweep failed"),
            }

            tokio::time::sleep(interval).await;
        }
        #[allow(unreachable_code)]
        Ok::<(), anyhow::Error>(())
    });

    tokio::select! {
        res = api_handle => res??,
        res = worker_handle => res??,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
    }

    Ok(())
}
