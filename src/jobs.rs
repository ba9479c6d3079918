//! Job status polling: waiting for an encode to finish and deleting a job in
//! whatever state it is in.
//!
//! The service offers no push notifications, so both loops re-fetch the job
//! and sleep between observations. Both are bounded by a [`PollPolicy`].

use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::config::PollPolicy;
use crate::error::{MediaError, Result};
use crate::models::{overall_progress, Job, JobProgress, JobState};
use crate::service::MediaServiceApi;

/// Attempt and deadline bookkeeping for one polling loop.
struct PollBudget<'a> {
    operation: &'a str,
    policy: PollPolicy,
    started: Instant,
    attempts: u32,
}

impl<'a> PollBudget<'a> {
    fn new(operation: &'a str, policy: PollPolicy) -> Self {
        Self {
            operation,
            policy,
            started: Instant::now(),
            attempts: 0,
        }
    }

    fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Fail once the attempt count or the deadline is exhausted.
    fn ensure_remaining(&self) -> Result<()> {
        let elapsed = self.started.elapsed();
        let out_of_attempts = self
            .policy
            .max_attempts
            .map_or(false, |max| self.attempts >= max);
        let out_of_time = self.policy.timeout.map_or(false, |limit| elapsed >= limit);

        if out_of_attempts || out_of_time {
            return Err(MediaError::Timeout {
                operation: self.operation.to_string(),
                attempts: self.attempts,
                elapsed,
            });
        }
        Ok(())
    }
}

async fn fetch_job(api: &dyn MediaServiceApi, job_id: &str) -> Result<Job> {
    api.get_job(job_id)
        .await?
        .ok_or_else(|| MediaError::not_found(format!("Job {}", job_id)))
}

/// Delete a job regardless of its current state.
///
/// Terminal jobs are deleted right away. Active jobs are canceled and
/// re-checked immediately; canceling jobs are re-checked after
/// `policy.interval` until they settle. An unrecognized state aborts without
/// deleting anything.
pub async fn delete_job(api: &dyn MediaServiceApi, job_id: &str, policy: PollPolicy) -> Result<()> {
    let operation = format!("Deleting job {}", job_id);
    let mut budget = PollBudget::new(&operation, policy);

    loop {
        budget.record_attempt();
        let job = fetch_job(api, job_id).await?;
        debug!("Job {} is {}", job_id, job.state);

        match job.state {
            JobState::Unrecognized(code) => {
                return Err(MediaError::InvalidState {
                    job_id: job_id.to_string(),
                    code,
                });
            }
            state if state.is_terminal() => {
                api.delete_job(job_id).await?;
                info!("Job {} deleted (final state {})", job_id, state);
                return Ok(());
            }
            state if state.is_active() => {
                info!("Canceling job {} ({})", job_id, state);
                api.cancel_job(job_id).await?;
                budget.ensure_remaining()?;
            }
            _ => {
                budget.ensure_remaining()?;
                sleep(policy.interval).await;
            }
        }
    }
}

/// Poll a submitted job until it finishes.
///
/// `on_progress` fires whenever the observed state or overall progress
/// changes. Jobs ending in `Error` or `Canceled` fail with `JobFailed`.
pub async fn wait_for_job<F>(
    api: &dyn MediaServiceApi,
    job_id: &str,
    policy: PollPolicy,
    mut on_progress: F,
) -> Result<Job>
where
    F: FnMut(&JobProgress),
{
    let operation = format!("Waiting for job {}", job_id);
    let mut budget = PollBudget::new(&operation, policy);
    let mut last_seen: Option<(JobState, f64)> = None;

    loop {
        budget.record_attempt();
        let job = fetch_job(api, job_id).await?;
        let tasks = api.job_tasks(job_id).await?;
        let percent = overall_progress(&tasks);

        if last_seen != Some((job.state, percent)) {
            on_progress(&JobProgress {
                job_id: job_id.to_string(),
                state: job.state,
                percent,
            });
            last_seen = Some((job.state, percent));
        }

        match job.state {
            JobState::Finished => return Ok(job),
            JobState::Error | JobState::Canceled => {
                let details: Vec<String> = tasks
                    .iter()
                    .flat_map(|task| task.error_details.iter())
                    .map(|detail| {
                        if detail.code.is_empty() {
                            detail.message.clone()
                        } else {
                            format!("{}: {}", detail.code, detail.message)
                        }
                    })
                    .collect();
                return Err(MediaError::JobFailed {
                    job_id: job_id.to_string(),
                    state: job.state.to_string(),
                    details: if details.is_empty() { None } else { Some(details.join("; ")) },
                });
            }
            JobState::Unrecognized(code) => {
                return Err(MediaError::InvalidState {
                    job_id: job_id.to_string(),
                    code,
                });
            }
            JobState::Queued | JobState::Scheduled | JobState::Processing | JobState::Canceling => {
                budget.ensure_remaining()?;
                sleep(policy.interval).await;
            }
        }
    }
}
