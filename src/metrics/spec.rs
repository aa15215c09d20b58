use serde::Serialize;

use crate::error::{Error, Result};
use crate::events::Terminal;
use crate::query::Granularity;

/// Which timestamp places a request in a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketAnchor {
    Created,
    Terminal,
}

/// Declarative description of a duration metric.
///
/// One aggregation path serves every metric; a `MetricSpec` only says which
/// timestamp pair to measure and which intervals a chart may offer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSpec {
    pub name: String,
    pub title: String,
    pub description: String,
    pub terminal: Terminal,
    pub bucket_on: BucketAnchor,
    pub granularities: Vec<Granularity>,
    pub default_granularity: Granularity,
}

impl MetricSpec {
    pub fn builder(name: impl Into<String>) -> MetricSpecBuilder {
        MetricSpecBuilder::new(name)
    }

    /// Created to closed, bucketed on the close date.
    pub fn review_cycle_duration() -> Self {
        Self {
            name: "review-cycle".into(),
            title: "Review Cycle Duration".into(),
            description: "Days from a pull request being opened to being closed.".into(),
            terminal: Terminal::Closed,
            bucket_on: BucketAnchor::Terminal,
            granularities: Granularity::ALL.to_vec(),
            default_granularity: Granularity::Month,
        }
    }

    /// Created to merged; only accepted change requests have a value.
    pub fn change_request_duration() -> Self {
        Self {
            name: "change-duration".into(),
            title: "Change Requests Duration".into(),
            description: "Days from a change request being opened to being accepted and merged.".into(),
            terminal: Terminal::Merged,
            bucket_on: BucketAnchor::Terminal,
            granularities: Granularity::ALL.to_vec(),
            default_granularity: Granularity::Month,
        }
    }

    /// Look up a predefined metric by name.
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "review-cycle" => Some(Self::review_cycle_duration()),
            "change-duration" => Some(Self::change_request_duration()),
            _ => None,
        }
    }

    pub fn check_granularity(&self, g: Granularity) -> Result<()> {
        if self.granularities.contains(&g) {
            Ok(())
        } else {
            Err(Error::UnsupportedGranularity {
                metric: self.name.clone(),
                granularity: g.token().to_string(),
            })
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricSpecBuilder {
    name: String,
    title: Option<String>,
    description: String,
    terminal: Terminal,
    bucket_on: BucketAnchor,
    granularities: Vec<Granularity>,
    default_granularity: Option<Granularity>,
}

impl MetricSpecBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            description: String::new(),
            terminal: Terminal::Closed,
            bucket_on: BucketAnchor::Terminal,
            granularities: Granularity::ALL.to_vec(),
            default_granularity: None,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn terminal(mut self, terminal: Terminal) -> Self {
        self.terminal = terminal;
        self
    }

    pub fn bucket_on(mut self, anchor: BucketAnchor) -> Self {
        self.bucket_on = anchor;
        self
    }

    pub fn granularities(mut self, granularities: &[Granularity]) -> Self {
        self.granularities = granularities.to_vec();
        self
    }

    pub fn default_granularity(mut self, g: Granularity) -> Self {
        self.default_granularity = Some(g);
        self
    }

    pub fn build(self) -> Result<MetricSpec> {
        let mut granularities = self.granularities;
        granularities.sort();
        granularities.dedup();

        let default_granularity = match self.default_granularity {
            Some(g) => g,
            None if granularities.contains(&Granularity::Month) => Granularity::Month,
            None => *granularities
                .first()
                .ok_or_else(|| Error::Config(format!("metric {} allows no granularity", self.name)))?,
        };
        if !granularities.contains(&default_granularity) {
            return Err(Error::Config(format!(
                "metric {}: default granularity {default_granularity} is not among the allowed ones",
                self.name
            )));
        }

        Ok(MetricSpec {
            title: self.title.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            description: self.description,
            terminal: self.terminal,
            bucket_on: self.bucket_on,
            granularities,
            default_granularity,
        })
    }
}
