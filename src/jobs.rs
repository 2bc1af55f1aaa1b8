//! Generation jobs: creation, polling, and the background task.
//!
//! Each request gets one detached tokio task. The task talks to the request
//! handler only through the persisted job row, which the client polls.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{StoryError, StoryResult};
use crate::generator::{persist_story, StoryGenerator, StoryModel};
use crate::schema::GenerationJob;
use crate::store::{self, Database};

/// Insert a new Pending job.
pub async fn create_job(db: &Database, session_id: &str, theme: &str) -> StoryResult<GenerationJob> {
    let job = GenerationJob::new(session_id, theme);
    let row = job.clone();
    db.run(move |conn| store::insert_job(conn, &row)).await?;
    info!("Created job {} for session {}", job.job_id, job.session_id);
    Ok(job)
}

pub async fn get_job(db: &Database, job_id: &str) -> StoryResult<GenerationJob> {
    let id = job_id.to_string();
    db.run(move |conn| store::get_job(conn, &id))
        .await?
        .ok_or_else(|| StoryError::not_found("job", job_id))
}

/// Run the generation for `job_id` in the background. No retry, no cancel.
pub fn spawn_generation(db: Database, model: Arc<dyn StoryModel>, job_id: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_generation(&db, model.as_ref(), &job_id).await;
    })
}

/// Drive one job from Pending to a terminal state.
///
/// Failures are recorded on the job as `Kind: message` and never returned.
pub async fn run_generation(db: &Database, model: &dyn StoryModel, job_id: &str) {
    let mut job = match start_job(db, job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            warn!("Job {} vanished before processing", job_id);
            return;
        }
        Err(e) => {
            error!("Could not start job {}: {}", job_id, e);
            return;
        }
    };

    let err = match complete_job(db, model, &job).await {
        Ok(()) => return,
        Err(e) => e,
    };
    warn!("Job {} failed: {}", job.job_id, err.job_message());
    if let Err(e) = job.mark_failed(err.job_message()) {
        error!("Job {} in unexpected state: {}", job.job_id, e);
        return;
    }

    let row = job.clone();
    if let Err(e) = db.run(move |conn| store::update_job(conn, &row)).await {
        error!("Could not record failure of job {}: {}", job.job_id, e);
    }
}

/// Load the job and move it to Processing.
async fn start_job(db: &Database, job_id: &str) -> StoryResult<Option<GenerationJob>> {
    let id = job_id.to_string();
    db.run(move |conn| {
        let Some(mut job) = store::get_job(conn, &id)? else {
            return Ok(None);
        };
        job.mark_processing()?;
        store::update_job(conn, &job)?;
        Ok(Some(job))
    })
    .await
}

/// Ask the model for a story, then save it and mark the job Completed.
///
/// The story, its nodes and the job row share one transaction, so a job is
/// never left Processing next to a committed story.
async fn complete_job(db: &Database, model: &dyn StoryModel, job: &GenerationJob) -> StoryResult<()> {
    let raw = StoryGenerator::new(model).request_story(&job.theme).await?;
    let mut done = job.clone();
    db.run(move |conn| {
        let tx = conn.transaction()?;
        let story = persist_story(&tx, &done.session_id, &raw)?;
        done.mark_completed(story.id)?;
        store::update_job(&tx, &done)?;
        tx.commit()?;
        info!("Job {} completed with story {}", done.job_id, story.id);
        Ok(())
    })
    .await
}
