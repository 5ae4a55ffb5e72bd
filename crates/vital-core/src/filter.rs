//! Filters over probes, results and events.
//!
//! One predicate type serves listener subscriptions, history queries, bulk
//! unregistration and bulk execution. Every filter sees a [`FilterContext`]:
//! the entry name, the probe (if the entry is a probe), the result (if any),
//! and the tags.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::ops::Not;
use std::sync::Arc;

use crate::probe::ProbeRef;
use crate::types::{CheckResult, HealthStatus};

/// What a filter is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct FilterContext<'a> {
    /// Probe or aggregator name; `None` for engine-wide events.
    pub name: Option<&'a str>,
    pub probe: Option<&'a ProbeRef>,
    pub result: Option<&'a CheckResult>,
    pub tags: &'a BTreeSet<String>,
}

impl<'a> FilterContext<'a> {
    pub fn new(
        name: Option<&'a str>,
        probe: Option<&'a ProbeRef>,
        result: Option<&'a CheckResult>,
        tags: &'a BTreeSet<String>,
    ) -> Self {
        Self {
            name,
            probe,
            result,
            tags,
        }
    }
}

type Predicate = dyn Fn(&FilterContext<'_>) -> bool + Send + Sync;

/// A composable, cheaply clonable predicate.
#[derive(Clone)]
pub struct Filter {
    predicate: Arc<Predicate>,
    description: Option<Arc<str>>,
}

impl Filter {
    /// Filter from an arbitrary predicate.
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&FilterContext<'_>) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            description: None,
        }
    }

    /// Custom filter that reports `description` in its `Debug` output.
    pub fn described<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&FilterContext<'_>) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            description: Some(Arc::from(description.into())),
        }
    }

    /// Matches everything.
    pub fn all() -> Self {
        Self::described("all", |_| true)
    }

    pub fn matches(&self, context: &FilterContext<'_>) -> bool {
        (self.predicate)(context)
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::custom(move |ctx| ctx.name == Some(name.as_str()))
    }

    pub fn by_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: HashSet<String> = names.into_iter().map(Into::into).collect();
        Self::custom(move |ctx| ctx.name.is_some_and(|n| names.contains(n)))
    }

    /// Matches entries whose result has `status`. Entries without a result
    /// never match.
    pub fn by_status(status: HealthStatus) -> Self {
        Self::custom(move |ctx| ctx.result.is_some_and(|r| r.status() == status))
    }

    pub fn by_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = HealthStatus>,
    {
        let statuses: HashSet<HealthStatus> = statuses.into_iter().collect();
        Self::custom(move |ctx| ctx.result.is_some_and(|r| statuses.contains(&r.status())))
    }

    pub fn by_tag(tag: impl Into<String>) -> Self {
        let tag = tag.into();
        Self::custom(move |ctx| ctx.tags.contains(&tag))
    }

    /// Matches when the entry carries at least one of `tags`.
    pub fn by_any_tag<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags: Vec<String> = tags.into_iter().map(Into::into).collect();
        Self::custom(move |ctx| tags.iter().any(|t| ctx.tags.contains(t)))
    }

    /// Matches when the entry carries every one of `tags`.
    pub fn by_all_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags: Vec<String> = tags.into_iter().map(Into::into).collect();
        Self::custom(move |ctx| tags.iter().all(|t| ctx.tags.contains(t)))
    }

    pub fn and(self, other: Filter) -> Self {
        and(self, other)
    }

    pub fn or(self, other: Filter) -> Self {
        or(self, other)
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::all()
    }
}

impl Not for Filter {
    type Output = Filter;

    fn not(self) -> Filter {
        Filter::custom(move |ctx| !self.matches(ctx))
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "Filter({description})"),
            None => f.write_str("Filter(custom)"),
        }
    }
}

/// Both filters must match.
pub fn and(left: Filter, right: Filter) -> Filter {
    Filter::custom(move |ctx| left.matches(ctx) && right.matches(ctx))
}

/// Either filter may match.
pub fn or(left: Filter, right: Filter) -> Filter {
    Filter::custom(move |ctx| left.matches(ctx) || right.matches(ctx))
}

/// Inverts a filter.
pub fn not(filter: Filter) -> Filter {
    !filter
}

/// Matches if any filter matches. An empty set matches nothing.
pub fn any_of<I>(filters: I) -> Filter
where
    I: IntoIterator<Item = Filter>,
{
    let filters: Vec<Filter> = filters.into_iter().collect();
    Filter::custom(move |ctx| filters.iter().any(|f| f.matches(ctx)))
}

/// Matches if every filter matches. An empty set matches everything.
pub fn all_of<I>(filters: I) -> Filter
where
    I: IntoIterator<Item = Filter>,
{
    let filters: Vec<Filter> = filters.into_iter().collect();
    Filter::custom(move |ctx| filters.iter().all(|f| f.matches(ctx)))
}

/// Accumulates criteria and combines them with AND.
#[derive(Debug, Clone, Default)]
pub struct FilterBuilder {
    filters: Vec<Filter>,
}

impl FilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.filters.push(Filter::by_name(name));
        self
    }

    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters.push(Filter::by_names(names));
        self
    }

    pub fn with_status(mut self, status: HealthStatus) -> Self {
        self.filters.push(Filter::by_status(status));
        self
    }

    pub fn with_statuses<I>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = HealthStatus>,
    {
        self.filters.push(Filter::by_statuses(statuses));
        self
    }

    pub fn with_any_tag<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters.push(Filter::by_any_tag(tags));
        self
    }

    pub fn with_all_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters.push(Filter::by_all_tags(tags));
        self
    }

    pub fn with_custom<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&FilterContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.filters.push(Filter::custom(predicate));
        self
    }

    pub fn build(self) -> Filter {
        all_of(self.filters)
    }
}
