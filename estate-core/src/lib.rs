pub mod error;
pub mod model;
pub mod normalize;
pub mod relate;
pub mod report;
pub mod run;
pub mod store;

pub use error::{NormalizeError, RunError, StoreError};
pub use model::{
    AnalysisStatus, ConfigAnalysis, ConfigItem, ConfigSource, Relationship, ScrapeConfig,
    ScrapeConfigDraft, Upserted,
};
pub use normalize::PayloadNormalizer;
pub use report::{ReportFormat, generate_run_report, render_run_report};
pub use relate::{extract_parent, resolve_relationships};
pub use run::{RunSummary, Runner};
pub use store::{CascadeSummary, MergeSummary, ReferenceTable, Store, StoreOptions};
