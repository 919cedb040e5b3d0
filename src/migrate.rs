//! Concurrent apply phase: classify every submission's current flair and
//! switch matched submissions to their new template.

use crate::pattern::CompositePattern;
use crate::reddit::{FlairApi, RedditError, SubmissionFlair, INFO_BATCH_SIZE};
use crate::templates::TemplateIndex;
use futures_util::FutureExt;
use log::{debug, error, info, warn};
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Startup state shared read-only by every unit of work.
#[derive(Debug)]
pub struct MigrationPlan {
    pub subreddit: String,
    pub pattern: CompositePattern,
    pub index: TemplateIndex,
}

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub concurrency: usize,
    pub dry_run: bool,
}

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("no flair template is indexed for legacy label {0:?}")]
    MissingTemplate(String),
    #[error("failed to load current flair: {0}")]
    Fetch(String),
    #[error("failed to set flair: {0}")]
    Update(#[source] RedditError),
    #[error("flair worker panicked: {0}")]
    Panicked(String),
}

#[derive(Debug)]
pub enum PostOutcome {
    Updated { label: String, template_id: String },
    AlreadyCurrent { label: String },
    Planned { label: String, template_id: String },
    Unmatched { flair_text: String },
    NoFlair,
    NotFound,
    Failed(ApplyError),
}

#[derive(Debug, Default)]
pub struct MigrationReport {
    pub updated: usize,
    pub already_current: usize,
    pub planned: usize,
    pub no_flair: usize,
    pub not_found: usize,
    /// `(fullname, flair text)` of submissions left untouched.
    pub unmatched: Vec<(String, String)>,
    pub failures: Vec<(String, ApplyError)>,
}

impl MigrationReport {
    fn record(&mut self, fullname: String, outcome: PostOutcome) {
        match outcome {
            PostOutcome::Updated { .. } => self.updated += 1,
            PostOutcome::AlreadyCurrent { .. } => self.already_current += 1,
            PostOutcome::Planned { .. } => self.planned += 1,
            PostOutcome::Unmatched { flair_text } => self.unmatched.push((fullname, flair_text)),
            PostOutcome::NoFlair => self.no_flair += 1,
            PostOutcome::NotFound => self.not_found += 1,
            PostOutcome::Failed(e) => self.failures.push((fullname, e)),
        }
    }

    pub fn total(&self) -> usize {
        self.updated
            + self.already_current
            + self.planned
            + self.no_flair
            + self.not_found
            + self.unmatched.len()
            + self.failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn log_summary(&self) {
        info!("=== Flair migration summary ===");
        info!("Submissions processed: {}", self.total());
        info!("  Updated: {}", self.updated);
        info!("  Already current: {}", self.already_current);
        if self.planned > 0 {
            info!("  Planned (dry run): {}", self.planned);
        }
        info!("  Unmatched: {}", self.unmatched.len());
        info!("  No flair: {}", self.no_flair);
        info!("  Not found: {}", self.not_found);
        info!("  Failed: {}", self.failures.len());
        for (fullname, e) in &self.failures {
            error!("  {}: {}", fullname, e);
        }
    }
}

/// Resolves `fullnames` in `/api/info` batches and runs one unit of work per
/// flaired submission, at most `options.concurrency` at a time. A failing unit
/// is recorded in the report and never cancels its siblings; the function
/// returns once every unit has finished.
pub async fn apply_flairs<A>(
    api: Arc<A>,
    plan: Arc<MigrationPlan>,
    fullnames: &[String],
    options: &ApplyOptions,
) -> MigrationReport
where
    A: FlairApi + ?Sized + 'static,
{
    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut tasks = JoinSet::new();
    let mut report = MigrationReport::default();

    for batch in fullnames.chunks(INFO_BATCH_SIZE) {
        let posts = match api.submission_info(batch).await {
            Ok(posts) => posts,
            Err(e) => {
                error!("Failed to load {} submissions starting at {}: {}", batch.len(), batch[0], e);
                let message = e.to_string();
                for fullname in batch {
                    report.record(fullname.clone(), PostOutcome::Failed(ApplyError::Fetch(message.clone())));
                }
                continue;
            }
        };

        let returned: HashSet<&str> = posts.iter().map(|p| p.name.as_str()).collect();
        for fullname in batch.iter().filter(|f| !returned.contains(f.as_str())) {
            debug!("Submission {} no longer exists", fullname);
            report.record(fullname.clone(), PostOutcome::NotFound);
        }

        for post in posts {
            if post.link_flair_text.is_none() {
                report.record(post.name, PostOutcome::NoFlair);
                continue;
            }

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore closed");
            let api = Arc::clone(&api);
            let plan = Arc::clone(&plan);
            let dry_run = options.dry_run;
            tasks.spawn(async move {
                let fullname = post.name.clone();
                let outcome = AssertUnwindSafe(migrate_submission(api.as_ref(), &plan, post, dry_run))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| PostOutcome::Failed(ApplyError::Panicked(panic_message(panic))));
                drop(permit);
                (fullname, outcome)
            });
        }
    }

    // Units catch their own panics and nothing aborts them, so every join
    // carries the fullname it ran for.
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((fullname, outcome)) => report.record(fullname, outcome),
            Err(e) => error!("Flair worker task was cancelled: {}", e),
        }
    }

    report
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn migrate_submission<A>(api: &A, plan: &MigrationPlan, post: SubmissionFlair, dry_run: bool) -> PostOutcome
where
    A: FlairApi + ?Sized,
{
    let Some(text) = post.link_flair_text else {
        return PostOutcome::NoFlair;
    };

    let Some(label) = plan.pattern.classify_flair(&text) else {
        warn!("Couldn't match submission {}: {}", post.name, text);
        return PostOutcome::Unmatched { flair_text: text };
    };

    let Some(template) = plan.index.get(label) else {
        error!("Submission {} matched {} but no template exists for it", post.name, label);
        return PostOutcome::Failed(ApplyError::MissingTemplate(label.to_string()));
    };

    if post.link_flair_template_id.as_deref() == Some(template.id.as_str()) && text == template.text {
        return PostOutcome::AlreadyCurrent {
            label: label.to_string(),
        };
    }

    if dry_run {
        info!(
            "[dry-run] {}: {:?} -> {:?} ({})",
            post.name, text, template.text, template.id
        );
        return PostOutcome::Planned {
            label: label.to_string(),
            template_id: template.id.clone(),
        };
    }

    match api.select_flair(&plan.subreddit, &post.name, template).await {
        Ok(()) => {
            debug!("{}: {:?} -> {:?} ({})", post.name, text, template.text, template.id);
            PostOutcome::Updated {
                label: label.to_string(),
                template_id: template.id.clone(),
            }
        }
        Err(e) => {
            error!("Failed to set flair on {}: {}", post.name, e);
            PostOutcome::Failed(ApplyError::Update(e))
        }
    }
}
