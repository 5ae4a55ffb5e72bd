//! The probe contract.
//!
//! A probe is anything with a [`ProbeDescriptor`] (name + tags) and an async
//! `check()` that yields a [`CheckResult`] or fails with any error. The engine
//! shares probes as [`ProbeRef`] and looks them up by name.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::error::{CoreResult, validate_name, validate_tag};
use crate::types::CheckResult;

/// Boxed, sendable future used at object-safe async seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Shared handle to a registered probe.
pub type ProbeRef = Arc<dyn Probe>;

/// Returned by a probe that noticed it was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Error)]
#[error("execution was interrupted")]
pub struct Interrupted;

/// Name and tags of a probe.
///
/// The name is fixed at construction; tags may change after registration.
#[derive(Debug)]
pub struct ProbeDescriptor {
    name: String,
    tags: RwLock<BTreeSet<String>>,
}

impl ProbeDescriptor {
    /// Descriptor with no tags.
    pub fn new(name: impl Into<String>) -> CoreResult<Self> {
        Self::with_tags(name, std::iter::empty::<String>())
    }

    /// Descriptor with an initial tag set. Every tag must be non-blank.
    pub fn with_tags<I, S>(name: impl Into<String>, tags: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        validate_name(&name)?;

        let mut set = BTreeSet::new();
        for tag in tags {
            let tag = tag.into();
            validate_tag(&tag)?;
            set.insert(tag);
        }

        Ok(Self {
            name,
            tags: RwLock::new(set),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the current tags.
    pub fn tags(&self) -> BTreeSet<String> {
        self.tags
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(tag)
    }

    /// Add a tag. Returns `false` if it was already present.
    pub fn add_tag(&self, tag: impl Into<String>) -> CoreResult<bool> {
        let tag = tag.into();
        validate_tag(&tag)?;
        Ok(self
            .tags
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(tag))
    }

    /// Remove a tag. Returns `false` if it was not present.
    pub fn remove_tag(&self, tag: &str) -> bool {
        self.tags
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(tag)
    }
}

/// A health probe.
///
/// `check()` may fail with any error; the executor turns failures into
/// results. Return [`Interrupted`] to report cooperative cancellation.
pub trait Probe: Send + Sync + 'static {
    fn descriptor(&self) -> &ProbeDescriptor;

    fn check(&self) -> BoxFuture<'_, anyhow::Result<CheckResult>>;

    fn name(&self) -> &str {
        self.descriptor().name()
    }

    fn tags(&self) -> BTreeSet<String> {
        self.descriptor().tags()
    }
}

impl fmt::Debug for dyn Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Probe")
            .field("name", &self.name())
            .field("tags", &self.tags())
            .finish()
    }
}

/// Adapts an async closure into a [`Probe`].
pub struct FnProbe<F> {
    descriptor: ProbeDescriptor,
    check_fn: F,
}

impl<F, Fut> FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<CheckResult>> + Send + 'static,
{
    pub fn new(descriptor: ProbeDescriptor, check_fn: F) -> Self {
        Self {
            descriptor,
            check_fn,
        }
    }
}

impl<F, Fut> Probe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<CheckResult>> + Send + 'static,
{
    fn descriptor(&self) -> &ProbeDescriptor {
        &self.descriptor
    }

    fn check(&self) -> BoxFuture<'_, anyhow::Result<CheckResult>> {
        Box::pin((self.check_fn)())
    }
}

/// Build a shared probe from a name, tags and an async closure.
pub fn probe_fn<I, S, F, Fut>(name: &str, tags: I, check_fn: F) -> CoreResult<ProbeRef>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<CheckResult>> + Send + 'static,
{
    let descriptor = ProbeDescriptor::with_tags(name, tags)?;
    Ok(Arc::new(FnProbe::new(descriptor, check_fn)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::types::HealthStatus;

    #[test]
    fn descriptor_rejects_blank_name_and_tags() {
        assert!(matches!(
            ProbeDescriptor::new(" "),
            Err(CoreError::InvalidArgument(_))
        ));
        assert!(ProbeDescriptor::with_tags("db", ["sql", ""]).is_err());
    }

    #[test]
    fn tags_are_mutable_after_construction() {
        let descriptor = ProbeDescriptor::with_tags("db", ["sql"]).unwrap();
        assert!(descriptor.has_tag("sql"));

        assert!(descriptor.add_tag("primary").unwrap());
        assert!(!descriptor.add_tag("primary").unwrap());
        assert!(descriptor.add_tag("").is_err());

        assert!(descriptor.remove_tag("sql"));
        assert!(!descriptor.remove_tag("sql"));
        assert_eq!(
            descriptor.tags().into_iter().collect::<Vec<_>>(),
            vec!["primary".to_string()]
        );
    }

    #[tokio::test]
    async fn fn_probe_runs_closure() {
        let probe = probe_fn("cache", ["kv"], || async {
            Ok(CheckResult::of(HealthStatus::Degraded))
        })
        .unwrap();

        assert_eq!(probe.name(), "cache");
        assert!(probe.tags().contains("kv"));
        let result = probe.check().await.unwrap();
        assert_eq!(result.status(), HealthStatus::Degraded);
    }

    #[test]
    fn debug_prints_name() {
        let probe = probe_fn("db", ["sql"], || async { Ok(CheckResult::healthy()) }).unwrap();
        let rendered = format!("{probe:?}");
        assert!(rendered.contains("db"));
    }
}
