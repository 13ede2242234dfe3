//! Registry metadata client.
//!
//! Fetches the package document from an npm-compatible registry and returns
//! its `time` map (version -> publish timestamp). One request per call, no
//! retries; the caller owns any retry policy.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use url::Url;

use super::error::PolicyError;

/// Publish timestamps keyed by version.
pub type PublishTimes = HashMap<String, DateTime<FixedOffset>>;

/// The publish time of one artifact. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRecord {
    /// Package name.
    pub package: String,
    /// Package version.
    pub version: String,
    /// When the registry says this version was published.
    pub published_at: DateTime<FixedOffset>,
}

/// Source of publish-time metadata.
///
/// Implementations must be safe to call concurrently.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetch the version -> publish time map for a package.
    async fn fetch_publish_times(
        &self,
        package: &str,
        registry: &Url,
    ) -> Result<PublishTimes, PolicyError>;
}

/// Subset of the registry package document we read.
#[derive(Debug, Deserialize)]
struct PackageDocument {
    #[serde(default)]
    time: Option<HashMap<String, serde_json::Value>>,
}

/// HTTP client for registry metadata.
pub struct RegistryClient {
    client: reqwest::Client,
}

impl RegistryClient {
    /// Build a client with the given per-request timeout.
    ///
    /// The client ignores proxy environment variables so that lookups
    /// never loop back through the gateway.
    pub fn new(timeout: Duration) -> Result<Self, PolicyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .user_agent(concat!("freshgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PolicyError::Client(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl MetadataSource for RegistryClient {
    async fn fetch_publish_times(
        &self,
        package: &str,
        registry: &Url,
    ) -> Result<PublishTimes, PolicyError> {
        let url = metadata_url(registry, package)?;
        debug!(url = %url, "fetching package metadata");

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| PolicyError::lookup_failed(package, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PolicyError::lookup_failed(
                package,
                format!("registry returned {status}"),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| PolicyError::lookup_failed(package, e.to_string()))?;

        parse_publish_times(package, &body)
    }
}

/// Metadata document URL for a package.
///
/// The scope separator is escaped (`@scope%2fpkg`) as the registry API
/// expects.
pub fn metadata_url(registry: &Url, package: &str) -> Result<Url, PolicyError> {
    let mut base = registry.as_str().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    base.push_str(&package.replace('/', "%2f"));

    Url::parse(&base).map_err(|e| PolicyError::InvalidRegistryUrl {
        url: base,
        reason: e.to_string(),
    })
}

/// Extract the `time` map from a package document.
///
/// Entries that are not RFC 3339 timestamps are skipped.
pub fn parse_publish_times(package: &str, body: &str) -> Result<PublishTimes, PolicyError> {
    let document: PackageDocument = serde_json::from_str(body)
        .map_err(|e| PolicyError::lookup_failed(package, format!("malformed metadata: {e}")))?;

    let time = document
        .time
        .ok_or_else(|| PolicyError::lookup_failed(package, "metadata has no time map"))?;

    let mut times = PublishTimes::with_capacity(time.len());
    for (version, value) in time {
        match value.as_str().map(DateTime::parse_from_rfc3339) {
            Some(Ok(ts)) => {
                times.insert(version, ts);
            }
            _ => trace!(package = %package, version = %version, "skipping unparseable time entry"),
        }
    }

    Ok(times)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_url_unscoped() {
        let registry = Url::parse("https://registry.npmjs.org/").unwrap();
        let url = metadata_url(&registry, "lodash").unwrap();
        assert_eq!(url.as_str(), "https://registry.npmjs.org/lodash");
    }

    #[test]
    fn test_metadata_url_scoped_without_trailing_slash() {
        let registry = Url::parse("https://npm.example.com/api/npm").unwrap();
        let url = metadata_url(&registry, "@types/node").unwrap();
        assert_eq!(url.as_str(), "https://npm.example.com/api/npm/@types%2fnode");
    }

    #[test]
    fn test_parse_publish_times() {
        let body = r#"{
            "name": "left-pad",
            "time": {
                "created": "2014-03-14T03:51:39.431Z",
                "modified": "2022-06-19T09:13:32.110Z",
                "1.0.0": "2014-03-14T03:51:39.431Z",
                "1.3.0": "2016-04-08T16:35:19.574+02:00",
                "broken": "not a date",
                "odd": 42
            }
        }"#;

        let times = parse_publish_times("left-pad", body).unwrap();

        assert!(times.contains_key("1.0.0"));
        assert_eq!(times["1.3.0"].offset().local_minus_utc(), 2 * 3600);
        assert!(!times.contains_key("broken"));
        assert!(!times.contains_key("odd"));
    }

    #[test]
    fn test_parse_rejects_malformed_body() {
        let err = parse_publish_times("x", "<html>").unwrap_err();
        assert!(matches!(err, PolicyError::RegistryLookupFailed { .. }));
    }

    #[test]
    fn test_parse_rejects_missing_time_map() {
        let err = parse_publish_times("x", r#"{"name":"x"}"#).unwrap_err();
        assert!(err.to_string().contains("no time map"));
    }

    #[tokio::test]
    async fn test_unreachable_registry_is_lookup_failure() {
        let client = RegistryClient::new(Duration::from_millis(500)).unwrap();
        // Port 9 on loopback (discard) is not expected to serve HTTP
        let registry = Url::parse("http://127.0.0.1:9/").unwrap();

        let err = client
            .fetch_publish_times("lodash", &registry)
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::RegistryLookupFailed { .. }));
    }
}
