use crate::aws::AwsScraper;
use crate::azure::AzureScraper;
use crate::context::ScrapeContext;
use crate::result::ResultSet;
use crate::spec::ScrapeSpec;
use async_trait::async_trait;
use futures::future::join_all;
use tracing::info;

/// A provider scraper.
///
/// `scrape` never fails outright: connection problems, category failures and
/// cancellation all come back as error-bearing results inside the sets.
#[async_trait]
pub trait Scraper: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_scrape(&self, spec: &ScrapeSpec) -> bool;

    /// One result set per configured provider block.
    async fn scrape(&self, ctx: &ScrapeContext) -> Vec<ResultSet>;
}

/// The closed set of providers estate knows how to scrape.
pub enum Provider {
    Azure(AzureScraper),
    Aws(AwsScraper),
    /// Any other implementation, used to stand in for a provider in tests.
    Custom(Box<dyn Scraper>),
}

#[async_trait]
impl Scraper for Provider {
    fn name(&self) -> &'static str {
        match self {
            Provider::Azure(s) => s.name(),
            Provider::Aws(s) => s.name(),
            Provider::Custom(s) => s.name(),
        }
    }

    fn can_scrape(&self, spec: &ScrapeSpec) -> bool {
        match self {
            Provider::Azure(s) => s.can_scrape(spec),
            Provider::Aws(s) => s.can_scrape(spec),
            Provider::Custom(s) => s.can_scrape(spec),
        }
    }

    async fn scrape(&self, ctx: &ScrapeContext) -> Vec<ResultSet> {
        match self {
            Provider::Azure(s) => s.scrape(ctx).await,
            Provider::Aws(s) => s.scrape(ctx).await,
            Provider::Custom(s) => s.scrape(ctx).await,
        }
    }
}

/// Providers in declaration order.
pub struct Registry {
    providers: Vec<Provider>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(vec![
            Provider::Azure(AzureScraper::default()),
            Provider::Aws(AwsScraper::default()),
        ])
    }
}

impl Registry {
    pub fn new(providers: Vec<Provider>) -> Self {
        Self { providers }
    }

    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    /// Run every provider that accepts the scrape spec concurrently. Result sets come
    /// back in provider declaration order regardless of completion order.
    pub async fn scrape(&self, ctx: &ScrapeContext) -> Vec<ResultSet> {
        let runs = self
            .providers
            .iter()
            .filter(|p| p.can_scrape(ctx.spec()))
            .map(|provider| async move {
                info!(provider = provider.name(), "scraping");
                let sets = provider.scrape(ctx).await;
                info!(
                    provider = provider.name(),
                    items = sets.iter().map(|s| s.results.len()).sum::<usize>(),
                    "provider finished"
                );
                sets
            });
        join_all(runs).await.into_iter().flatten().collect()
    }
}
