use std::env;
use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use finishflow::config::Config;
use finishflow::db;
use finishflow::distributors::{Distributor, DistributorStore, PgDistributorStore};
use finishflow::email::LogEmailSender;
use finishflow::engagement::{EngagementRecorder, PgEngagementStore};
use finishflow::jobs::payload::EmailJob;
use finishflow::jobs::store::{JobFilter, JobStore};
use finishflow::jobs::timeline::build_timeline;
use finishflow::jobs::{build_registry, JobContext, JobRunner, JobStatus, PgJobStore};
use finishflow::producer::JobProducer;
use finishflow::telemetry;

const USAGE: &str = "finishflowctl <command>\n\
Commands:\n\
- reset              truncate jobs, attempts, engagement events and distributors\n\
- seed <n>           enqueue n reorder emails and a few distributors\n\
- counts             job counts per status\n\
- dlq                list dead jobs\n\
- replay <job_id>    enqueue a copy of a dead job\n\
- timeline <job_id>  attempts and status for one job\n\
- sweep              run due jobs once (dry-run email sender)\n\
\n\
Uses DATABASE_URL.\n";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();
    let args: Vec<String> = env::args().collect();

    let Some(cmd) = args.get(1) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    let cfg = Config::from_env()?;
    let pool = db::make_pool(&cfg.database_url).await?;
    let jobs: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));

    match cmd.as_str() {
        "reset" => reset(&pool).await?,
        "seed" => {
            let n: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(10);
            seed(&cfg, &pool, jobs, n).await?;
        }
        "counts" => {
            let c = jobs.status_counts().await?;
            println!(
                "jobs: pending={} processing={} completed={} failed={} dead={}",
                c.pending, c.processing, c.completed, c.failed, c.dead
            );
        }
        "dlq" => {
            let dead = jobs
                .list(&JobFilter {
                    status: Some(JobStatus::Dead),
                    ..JobFilter::default()
                })
                .await?;
            for j in dead {
                println!(
                    "{} {} attempts={}/{} reason={} last_error={}",
                    j.id,
                    j.job_type,
                    j.attempts,
                    j.max_attempts,
                    j.dead_reason.as_deref().unwrap_or("-"),
                    j.last_error_code.as_deref().unwrap_or("-"),
                );
            }
        }
        "replay" => {
            let job_id = job_id_arg(&args, "replay")?;
            let producer = JobProducer::new(jobs, cfg.default_max_attempts);
            let job = producer.replay(job_id, None).await?;
            println!("replayed {job_id} as {}", job.id);
        }
        "timeline" => {
            let job_id = job_id_arg(&args, "timeline")?;
            match build_timeline(jobs.as_ref(), job_id).await? {
                Some(tl) => println!("{}", serde_json::to_string_pretty(&tl)?),
                None => println!("job {job_id} not found"),
            }
        }
        "sweep" => {
            let ctx = JobContext {
                worker_id: cfg.worker_id.clone(),
                sender: Arc::new(LogEmailSender),
                recorder: EngagementRecorder::new(Arc::new(PgEngagementStore::new(pool.clone()))),
                recipient_concurrency: cfg.recipient_concurrency,
            };
            let runner = JobRunner::new(
                jobs,
                build_registry(cfg.handler_timeout(), cfg.batch_size),
                ctx,
                cfg.runner(),
            );
            let reclaimed = runner.reclaim_expired(Utc::now()).await?;
            let report = runner.drain(Utc::now(), 100).await?;
            println!(
                "reclaimed={reclaimed} claimed={} completed={} retried={} dead={} lost={}",
                report.claimed, report.completed, report.retried, report.dead, report.lost
            );
        }
        other => {
            eprintln!("Unknown command: {other}\n\n{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}

fn job_id_arg(args: &[String], cmd: &str) -> anyhow::Result<Uuid> {
    let raw = args
        .get(2)
        .ok_or_else(|| anyhow::anyhow!("usage: finishflowctl {cmd} <job_id>"))?;
    Ok(raw.parse()?)
}

async fn reset(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        TRUNCATE TABLE
            job_attempts,
            engagement_events,
            distributors,
            jobs
        CASCADE
        "#,
    )
    .execute(pool)
    .await?;

    println!("reset OK");
    Ok(())
}

async fn seed(
    cfg: &Config,
    pool: &PgPool,
    jobs: Arc<dyn JobStore>,
    n: usize,
) -> anyhow::Result<()> {
    let producer = JobProducer::new(jobs, cfg.default_max_attempts);

    for i in 1..=n {
        let job = producer
            .enqueue_reorder_email(EmailJob {
                company_id: format!("C{i}"),
                contact_ids: vec![format!("K{i}a"), format!("K{i}b")],
                offer_key: "reorder_reminder".into(),
                campaign_key: Some("seed".into()),
                subject: None,
                preview: None,
            })
            .await?;
        println!("+ inserted {} id={}", job.job_type, job.id);
    }

    let distributors = PgDistributorStore::new(pool.clone());
    for (code, name) in [
        ("DST-001", "North Bindery Supply"),
        ("DST-002", "Coastal Finishing"),
        ("DST-003", "Plains Print Parts"),
    ] {
        distributors
            .upsert(Distributor {
                code: code.into(),
                name: name.into(),
                pricing_tier: "standard".into(),
                updated_at: Utc::now(),
            })
            .await?;
    }
    println!("+ upserted 3 distributors");
    Ok(())
}
