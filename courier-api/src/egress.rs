use tracing;

/// Attachment URLs the gateway will later fetch must point at allowlisted
/// hosts (exact match or subdomain). Violations are surfaced in the logs;
/// nothing in the mock-provider build performs the fetch itself.
pub fn warn_on_disallowed_hosts(allowlist: &[String], attachments: &[String]) {
    for url in attachments {
        match host_of(url) {
            Some(host) if host_allowed(allowlist, &host) => {}
            Some(host) => {
                tracing::warn!(%url, %host, "attachment host outside the egress allowlist");
            }
            None => {
                tracing::warn!(%url, "attachment url has no parseable host");
            }
        }
    }
}

fn host_allowed(allowlist: &[String], host: &str) -> bool {
    allowlist.iter().any(|allowed| {
        let allowed = allowed.trim().to_ascii_lowercase();
        !allowed.is_empty() && (host == allowed || host.ends_with(&format!(".{allowed}")))
    })
}

fn host_of(url: &str) -> Option<String> {
    let rest = url.split_once("://").map(|(_, r)| r)?;
    let authority = rest.split(['/', '?', '#']).next()?;
    // Strip userinfo, then any port.
    let host = authority.rsplit('@').next()?;
    let host = host.split(':').next()?;
    (!host.is_empty()).then(|| host.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::{host_allowed, host_of};

    #[test]
    fn extracts_hosts() {
        assert_eq!(host_of("https://example.com/cat.jpg"), Some("example.com".to_string()));
        assert_eq!(host_of("https://cdn.example.com:8443/x?y=1"), Some("cdn.example.com".to_string()));
        assert_eq!(host_of("https://user:pw@example.com/x"), Some("example.com".to_string()));
        assert_eq!(host_of("no-scheme/path"), None);
    }

    #[test]
    fn allowlist_matches_exact_and_subdomains() {
        let allow = vec!["example.com".to_string()];
        assert!(host_allowed(&allow, "example.com"));
        assert!(host_allowed(&allow, "cdn.example.com"));
        assert!(!host_allowed(&allow, "evil-example.com"));
        assert!(!host_allowed(&allow, "example.com.evil.io"));
    }
}
