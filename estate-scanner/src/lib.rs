pub mod aws;
pub mod azure;
pub mod connection;
pub mod context;
pub mod error;
pub mod http;
pub mod pager;
pub mod result;
pub mod scraper;
pub mod spec;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use connection::{Connection, ConnectionResolver, StaticConnectionResolver};
pub use context::ScrapeContext;
pub use error::{ErrorKind, ErrorScope, ResultError, ScanError};
pub use pager::Pager;
pub use result::{
    AnalysisResult, ConfigResult, ExternalId, RelationshipResult, ResultSet, ScrapeResults,
};
pub use scraper::{Provider, Registry, Scraper};
pub use spec::ScrapeSpec;
