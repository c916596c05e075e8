//! In-memory pagers and client factories for exercising scrapers without a network.

use crate::error::{Result, ScanError};
use crate::pager::Pager;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;

type Hook = Box<dyn FnOnce() + Send>;

enum Step {
    Page(Vec<Value>),
    Fail(String),
}

/// Serves a fixed sequence of pages and failures.
#[derive(Default)]
pub struct StaticPager {
    steps: VecDeque<(Step, Option<Hook>)>,
}

impl StaticPager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, items: Vec<Value>) -> Self {
        self.steps.push_back((Step::Page(items), None));
        self
    }

    pub fn fail(mut self, reason: &str) -> Self {
        self.steps.push_back((Step::Fail(reason.to_string()), None));
        self
    }

    /// Run `hook` right after the most recently added step is served.
    pub fn after(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        if let Some(last) = self.steps.back_mut() {
            last.1 = Some(Box::new(hook));
        }
        self
    }
}

#[async_trait]
impl Pager for StaticPager {
    fn has_more(&self) -> bool {
        !self.steps.is_empty()
    }

    async fn next_page(&mut self) -> Result<Vec<Value>> {
        let (step, hook) = self
            .steps
            .pop_front()
            .ok_or_else(|| ScanError::Other("no more pages".to_string()))?;
        if let Some(hook) = hook {
            hook();
        }
        match step {
            Step::Page(items) => Ok(items),
            Step::Fail(reason) => Err(ScanError::Other(reason)),
        }
    }
}
