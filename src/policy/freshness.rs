//! The freshness policy engine.
//!
//! Turns an intercepted archive URL into an allow/block verdict:
//!
//! 1. Hosts other than the recognized registry hosts are out of scope (allow).
//! 2. Paths that are not a classifiable tarball are out of scope (allow).
//! 3. Otherwise the version's publish time is looked up and compared with
//!    the threshold. Younger than `min_age_days` blocks; exactly
//!    `min_age_days` old passes.
//!
//! Lookup failures are returned as errors; what to do about them is the
//! caller's decision.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use url::Url;

use super::error::PolicyError;
use super::registry::{MetadataSource, PublishRecord, RegistryClient};
use super::tarball::{PackageReference, parse_tarball_path};
use crate::config::ProxyRunConfig;

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Forward the fetch.
    Allow,
    /// Reject the fetch and abort the run.
    Block,
}

/// A decision plus the human-readable reason for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessVerdict {
    /// Allow or block.
    pub decision: Decision,
    /// Why.
    pub reason: String,
    /// The artifact the decision is about, when the URL was classifiable.
    pub reference: Option<PackageReference>,
    /// Whole days since publication, when a lookup happened.
    pub age_days: Option<i64>,
}

impl FreshnessVerdict {
    fn out_of_scope(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Allow,
            reason: reason.into(),
            reference: None,
            age_days: None,
        }
    }

    /// Whether the fetch may proceed.
    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allow
    }
}

/// Pure threshold rule: block iff `age < min_age_days`.
///
/// A publish time in the future yields a negative age and blocks.
pub fn decide(age: TimeDelta, min_age_days: u32) -> Decision {
    if age < TimeDelta::days(i64::from(min_age_days)) {
        Decision::Block
    } else {
        Decision::Allow
    }
}

/// Freshness policy for one run.
///
/// Holds only read-only configuration plus an insert-once record cache, so
/// one instance can be shared by every connection the gateway serves.
pub struct FreshnessPolicy {
    registry: Url,
    registry_hosts: HashSet<String>,
    min_age_days: u32,
    source: Arc<dyn MetadataSource>,
    records: RwLock<HashMap<PackageReference, PublishRecord>>,
}

impl FreshnessPolicy {
    /// Create a policy.
    ///
    /// The registry URL's own host is always recognized; `extra_hosts` adds
    /// mirrors whose tarballs should be checked too.
    pub fn new(
        registry: Url,
        extra_hosts: &[String],
        min_age_days: u32,
        source: Arc<dyn MetadataSource>,
    ) -> Self {
        let mut registry_hosts: HashSet<String> =
            extra_hosts.iter().map(|h| h.to_ascii_lowercase()).collect();
        if let Some(host) = registry.host_str() {
            registry_hosts.insert(host.to_ascii_lowercase());
        }

        Self {
            registry,
            registry_hosts,
            min_age_days,
            source,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Build the policy the gateway uses for a run, backed by the HTTP client.
    pub fn from_run_config(run: &ProxyRunConfig) -> Result<Self, PolicyError> {
        let registry =
            Url::parse(&run.registry_base_url).map_err(|e| PolicyError::InvalidRegistryUrl {
                url: run.registry_base_url.clone(),
                reason: e.to_string(),
            })?;
        let client = RegistryClient::new(std::time::Duration::from_secs(run.lookup_timeout_secs))?;

        Ok(Self::new(
            registry,
            &run.registry_hosts,
            run.min_age_days,
            Arc::new(client),
        ))
    }

    /// Freshness threshold in days.
    pub fn min_age_days(&self) -> u32 {
        self.min_age_days
    }

    /// Whether tarball fetches from this host are subject to the policy.
    pub fn is_registry_host(&self, host: &str) -> bool {
        self.registry_hosts.contains(&host.to_ascii_lowercase())
    }

    /// The artifact a fetch URL names, if it is a classifiable tarball.
    ///
    /// On the configured registry's own host the registry's base path is
    /// stripped first, so `https://npm.example.com/api/npm/lodash/-/...`
    /// names `lodash` when the registry is `https://npm.example.com/api/npm/`.
    pub fn reference_for(&self, url: &Url) -> Option<PackageReference> {
        let prefix = self.registry.path().trim_end_matches('/');
        let same_host = match (url.host_str(), self.registry.host_str()) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        };

        let path = url.path();
        let path = if same_host && !prefix.is_empty() {
            match path.strip_prefix(prefix) {
                Some(rest) if rest.starts_with('/') => rest,
                _ => path,
            }
        } else {
            path
        };
        parse_tarball_path(path)
    }

    /// Evaluate a fetch URL against the current time.
    pub async fn evaluate(&self, url: &str) -> Result<FreshnessVerdict, PolicyError> {
        self.evaluate_at(url, Utc::now()).await
    }

    /// Evaluate a fetch URL as of `now`.
    pub async fn evaluate_at(
        &self,
        url: &str,
        now: DateTime<Utc>,
    ) -> Result<FreshnessVerdict, PolicyError> {
        let Ok(parsed) = Url::parse(url) else {
            return Ok(FreshnessVerdict::out_of_scope("unparseable URL"));
        };

        let Some(host) = parsed.host_str() else {
            return Ok(FreshnessVerdict::out_of_scope("URL has no host"));
        };
        if !self.is_registry_host(host) {
            trace!(host = %host, "host outside policy scope");
            return Ok(FreshnessVerdict::out_of_scope(format!(
                "{host} is not a registry host"
            )));
        }

        let Some(reference) = self.reference_for(&parsed) else {
            trace!(path = parsed.path(), "path is not a classifiable tarball");
            return Ok(FreshnessVerdict::out_of_scope("not a classifiable tarball path"));
        };

        let record = self.publish_record(&reference).await?;
        let age = now.signed_duration_since(record.published_at.with_timezone(&Utc));
        let age_days = age.num_days();

        let decision = decide(age, self.min_age_days);
        let reason = match decision {
            Decision::Allow => format!(
                "Package {} version {} was published {} days ago (minimum {} days)",
                reference.name, reference.version, age_days, self.min_age_days
            ),
            Decision::Block => format!(
                "Package {} version {} was published less than {} days ago ({})",
                reference.name,
                reference.version,
                self.min_age_days,
                record.published_at.to_rfc3339()
            ),
        };

        debug!(package = %reference, ?decision, age_days = age_days, "freshness verdict");

        Ok(FreshnessVerdict {
            decision,
            reason,
            reference: Some(reference),
            age_days: Some(age_days),
        })
    }

    /// The publish record for a reference, fetched at most once per run.
    async fn publish_record(
        &self,
        reference: &PackageReference,
    ) -> Result<PublishRecord, PolicyError> {
        let cached = self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(reference)
            .cloned();
        if let Some(record) = cached {
            trace!(package = %reference, "publish record cache hit");
            return Ok(record);
        }

        let times = self
            .source
            .fetch_publish_times(&reference.name, &self.registry)
            .await?;

        let published_at = times.get(&reference.version).copied().ok_or_else(|| {
            PolicyError::lookup_failed(
                &reference.name,
                format!("version {} not found in registry metadata", reference.version),
            )
        })?;

        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let record = records
            .entry(reference.clone())
            .or_insert_with(|| PublishRecord {
                package: reference.name.clone(),
                version: reference.version.clone(),
                published_at,
            });
        Ok(record.clone())
    }
}
