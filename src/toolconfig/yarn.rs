//! yarn configuration rendering, for both configuration formats.
//!
//! yarn 2+ ("berry") reads `.yarnrc.yml` and the equivalent `YARN_*`
//! environment variables. yarn 1 ("classic") reads a `key "value"` file and
//! cannot speak TLS to a proxy, so its proxy URL is plain HTTP and
//! `strict-ssl` is turned off.

use crate::config::ProxyRunConfig;

/// Filename of the emitted yarn 2+ config.
pub const BERRY_RC_FILE: &str = ".yarnrc.yml";

/// Filename of the emitted yarn 1 config.
pub const CLASSIC_RC_FILE: &str = "freshgate.yarnrc";

/// yarn 2+ settings as `(yml key, env var, value)`.
///
/// yarn 2+ rejects unknown `.yarnrc.yml` keys, so only its own setting names
/// appear here.
fn berry_settings(run: &ProxyRunConfig) -> Vec<(&'static str, &'static str, String)> {
    let proxy = run.proxy_url();
    vec![
        ("httpProxy", "YARN_HTTP_PROXY", proxy.clone()),
        ("httpsProxy", "YARN_HTTPS_PROXY", proxy),
        (
            "enableStrictSsl",
            "YARN_ENABLE_STRICT_SSL",
            "true".to_string(),
        ),
        (
            "caFilePath",
            "YARN_CA_FILE_PATH",
            run.ca_bundle_path.display().to_string(),
        ),
        (
            "httpTimeout",
            "YARN_HTTP_TIMEOUT",
            run.network_timeout_ms.to_string(),
        ),
        ("networkConcurrency", "YARN_NETWORK_CONCURRENCY", "1".to_string()),
        ("httpRetry", "YARN_HTTP_RETRY", "0".to_string()),
        (
            "npmRegistryServer",
            "YARN_NPM_REGISTRY_SERVER",
            run.registry_base_url.trim_end_matches('/').to_string(),
        ),
    ]
}

/// Render `.yarnrc.yml` for yarn 2+.
pub fn render_berry(run: &ProxyRunConfig) -> String {
    let mut out = String::new();
    for (key, _, value) in berry_settings(run) {
        out.push_str(key);
        out.push_str(": ");
        if value.parse::<u64>().is_ok() || value == "true" || value == "false" {
            out.push_str(&value);
        } else {
            out.push_str(&quote(&value));
        }
        out.push('\n');
    }
    out
}

/// The same yarn 2+ settings as environment overrides.
pub fn berry_env(run: &ProxyRunConfig) -> Vec<(String, String)> {
    berry_settings(run)
        .into_iter()
        .map(|(_, var, value)| (var.to_string(), value))
        .collect()
}

/// Render the legacy `.yarnrc` for yarn 1.
pub fn render_classic(run: &ProxyRunConfig) -> String {
    let proxy = run.plain_proxy_url();
    let entries: [(&str, String); 8] = [
        ("registry", run.registry_base_url.clone()),
        ("proxy", proxy.clone()),
        ("https-proxy", proxy),
        ("strict-ssl", "false".to_string()),
        ("cafile", run.ca_bundle_path.display().to_string()),
        ("network-timeout", run.network_timeout_ms.to_string()),
        ("network-concurrency", "1".to_string()),
        ("network-retry-count", "0".to_string()),
    ];

    let mut out = String::new();
    for (key, value) in entries {
        out.push_str(key);
        out.push(' ');
        if value.parse::<u64>().is_ok() || value == "true" || value == "false" {
            out.push_str(&value);
        } else {
            out.push_str(&quote(&value));
        }
        out.push('\n');
    }
    out
}

/// Double-quote a value, escaping backslashes and quotes.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::toolconfig::ToolTarget;
    use std::path::Path;

    fn run_for(tool: ToolTarget) -> ProxyRunConfig {
        let config = Config::embedded_defaults().unwrap();
        ProxyRunConfig::from_config(&config, tool, Path::new("/run/x"))
    }

    #[test]
    fn test_render_berry() {
        let rendered = render_berry(&run_for(ToolTarget::YarnBerry));

        assert!(rendered.contains("httpProxy: \"https://127.0.0.1:8080\"\n"));
        assert!(rendered.contains("httpsProxy: \"https://127.0.0.1:8080\"\n"));
        assert!(rendered.contains("enableStrictSsl: true\n"));
        assert!(rendered.contains("caFilePath: \"/run/x/ca/bundle.pem\"\n"));
        assert!(rendered.contains("httpTimeout: 60000\n"));
        assert!(!rendered.contains("strictSsl:"));
        assert!(!rendered.contains("networkTimeout:"));
        assert!(rendered.contains("networkConcurrency: 1\n"));
        assert!(rendered.contains("httpRetry: 0\n"));
        assert!(rendered.contains("npmRegistryServer: \"https://registry.npmjs.org\"\n"));
    }

    #[test]
    fn test_berry_env_matches_file() {
        let env = berry_env(&run_for(ToolTarget::YarnBerry));

        assert!(env.contains(&("YARN_HTTPS_PROXY".to_string(), "https://127.0.0.1:8080".to_string())));
        assert!(env.contains(&("YARN_ENABLE_STRICT_SSL".to_string(), "true".to_string())));
        assert!(env.contains(&("YARN_HTTP_TIMEOUT".to_string(), "60000".to_string())));
        assert!(env.contains(&("YARN_NETWORK_CONCURRENCY".to_string(), "1".to_string())));
    }

    #[test]
    fn test_render_classic_downgrades_to_plain_http() {
        let rendered = render_classic(&run_for(ToolTarget::YarnClassic));

        assert!(rendered.contains("registry \"https://registry.npmjs.org/\"\n"));
        assert!(rendered.contains("proxy \"http://127.0.0.1:8080\"\n"));
        assert!(rendered.contains("https-proxy \"http://127.0.0.1:8080\"\n"));
        assert!(rendered.contains("strict-ssl false\n"));
        assert!(rendered.contains("network-timeout 60000\n"));
        assert!(rendered.contains("network-concurrency 1\n"));
        assert!(rendered.contains("network-retry-count 0\n"));
        assert!(!rendered.contains("https://127.0.0.1"));
    }
}
