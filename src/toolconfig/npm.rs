//! npm `.npmrc` rendering.

use crate::config::ProxyRunConfig;

/// Filename of the emitted npm user config.
pub const NPMRC_FILE: &str = "freshgate.npmrc";

/// Render the npm user config for a run.
///
/// Retries and back-off are zeroed and sockets capped at one so that every
/// tarball fetch reaches the gateway exactly once, in order.
pub fn render(run: &ProxyRunConfig) -> String {
    let proxy = run.proxy_url();
    let entries: [(&str, String); 11] = [
        ("registry", run.registry_base_url.clone()),
        ("proxy", proxy.clone()),
        ("https-proxy", proxy),
        ("strict-ssl", "true".to_string()),
        ("cafile", run.ca_bundle_path.display().to_string()),
        ("noproxy", String::new()),
        ("fetch-retries", "0".to_string()),
        ("prefer-online", "true".to_string()),
        ("fetch-retry-mintimeout", "0".to_string()),
        ("fetch-retry-maxtimeout", "0".to_string()),
        ("maxsockets", "1".to_string()),
    ];

    let mut out = String::new();
    for (key, value) in entries {
        out.push_str(key);
        out.push('=');
        out.push_str(&value);
        out.push('\n');
    }
    out
}
