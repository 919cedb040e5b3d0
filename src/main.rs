use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use flair_migrator::config::DEFAULT_CONFIG_PATH;
use flair_migrator::submissions::load_submission_ids;
use flair_migrator::{
    apply_flairs, ApplyOptions, CompositePattern, Config, ConfigError, FlairApi, MigrationPlan, MigrationReport,
    PushshiftClient, RedditClient, SubmissionSource, TemplateIndex,
};
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;

/// errno ENOENT, used as the exit status when the config file is missing.
const EXIT_CONFIG_NOT_FOUND: i32 = 2;

#[derive(Parser, Debug)]
#[command(author, version, about = "Migrate a subreddit's link flairs from legacy labels to new flair templates", long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(long = "config", env = "FLAIR_MIGRATOR_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Classify and log planned changes without updating any flair
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Maximum concurrent flair updates (overrides migration.concurrency)
    #[arg(long = "concurrency")]
    concurrency: Option<usize>,

    /// Only migrate submissions created after this UNIX timestamp (overrides subreddit.earliest)
    #[arg(long = "earliest")]
    earliest: Option<i64>,

    /// Submission id file (one per line) to use instead of searching Pushshift
    #[arg(long = "submissions")]
    submissions: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(ConfigError::NotFound(path)) => {
            eprintln!(
                "Couldn't open the configuration file {}. \
                 Pass --config or run from the directory containing `{}`. \
                 You may need to complete and rename the example file `configs_example.json`.",
                path.display(),
                DEFAULT_CONFIG_PATH
            );
            std::process::exit(EXIT_CONFIG_NOT_FOUND);
        }
        Err(e) => {
            eprintln!("FATAL ERROR: {e}");
            std::process::exit(1);
        }
    };

    match run(&args, config).await {
        Ok(report) if report.is_success() => info!("Operations complete!"),
        Ok(report) => {
            error!(
                "Operations finished with {} failed submissions; re-run to retry them",
                report.failures.len()
            );
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("FATAL ERROR: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn run(args: &Args, config: Config) -> Result<MigrationReport> {
    let dry_run = args.dry_run || config.migration.dry_run;
    let concurrency = args.concurrency.unwrap_or(config.migration.concurrency).max(1);
    let subreddit = config.subreddit.name.clone();

    let pattern = CompositePattern::compile(&config.link_flair_map, &config.migration.match_options())
        .context("Failed to compile link_flair_map")?;
    debug!("Composite flair pattern: {}", pattern.as_str());

    info!("Building link flair mapping...");
    let reddit = Arc::new(
        RedditClient::login(config.reddit.clone())
            .await
            .context("Failed to authenticate with Reddit")?,
    );
    let templates = reddit
        .link_flair_templates(&subreddit)
        .await
        .with_context(|| format!("Failed to list link flair templates for r/{subreddit}"))?;
    let index = TemplateIndex::build(&templates, &pattern, config.migration.unmatched_templates)
        .context("Failed to build link flair mapping")?;
    if index.is_empty() {
        bail!("No flair template of r/{subreddit} matches any legacy label; nothing to migrate");
    }
    for (label, template) in index.iter() {
        debug!("Legacy label {} -> template {:?} ({})", label, template.text, template.id);
    }
    for label in index.missing_labels(&pattern) {
        warn!("No flair template matches legacy label {label}; submissions carrying it will fail");
    }
    info!("{} flairs detected, retrieving all submissions...", index.len());

    let fullnames = match &args.submissions {
        Some(path) => load_submission_ids(path)
            .await
            .context("Failed to load submission ids")?,
        None => {
            let after = match args.earliest.or(config.subreddit.earliest) {
                Some(after) => after,
                None => reddit
                    .subreddit_created_utc(&subreddit)
                    .await
                    .with_context(|| format!("Failed to read creation time of r/{subreddit}"))?,
            };
            info!("Searching r/{} submissions created after {}", subreddit, format_timestamp(after));
            let source = PushshiftClient::new(config.pushshift.clone())?;
            source
                .submission_fullnames(&subreddit, after)
                .await
                .context("Failed to retrieve submissions")?
        }
    };
    info!("{} submissions retrieved, applying new flairs...", fullnames.len());
    if dry_run {
        info!("Dry run: no flair will be changed");
    }

    let plan = Arc::new(MigrationPlan {
        subreddit,
        pattern,
        index,
    });
    let options = ApplyOptions { concurrency, dry_run };
    let report = apply_flairs(reddit, plan, &fullnames, &options).await;
    report.log_summary();
    Ok(report)
}

fn format_timestamp(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}
