use crate::connection::ConnectionResolver;
use crate::spec::ScrapeSpec;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Read-only bundle handed to every scraper in a run.
#[derive(Clone)]
pub struct ScrapeContext {
    spec: Arc<ScrapeSpec>,
    resolver: Arc<dyn ConnectionResolver>,
    trace: bool,
    cancel: CancellationToken,
}

impl ScrapeContext {
    pub fn new(spec: ScrapeSpec, resolver: Arc<dyn ConnectionResolver>) -> Self {
        Self {
            spec: Arc::new(spec),
            resolver,
            trace: false,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn spec(&self) -> &ScrapeSpec {
        &self.spec
    }

    pub fn resolver(&self) -> &dyn ConnectionResolver {
        self.resolver.as_ref()
    }

    pub fn is_trace(&self) -> bool {
        self.trace
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
