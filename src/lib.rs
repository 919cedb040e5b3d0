//! Bulk migration of a subreddit's link flairs from legacy labels to new
//! flair templates.

pub mod config;
pub mod emoji;
pub mod migrate;
pub mod pattern;
pub mod reddit;
pub mod submissions;
pub mod templates;

pub use config::{Config, ConfigError};
pub use migrate::{apply_flairs, ApplyOptions, MigrationPlan, MigrationReport, PostOutcome};
pub use pattern::{CompositePattern, LegacyLabelMap, MatchOptions, PatternError};
pub use reddit::{FlairApi, RedditClient, RedditError, SubmissionFlair};
pub use submissions::{PushshiftClient, SubmissionSource, SubmissionsError};
pub use templates::{FlairTemplate, IndexError, TemplateIndex, UnmatchedTemplates};
