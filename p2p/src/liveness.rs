//! The process-wide "is the internet reachable at all" signal consulted by
//! the header-sync loop's ping-skip rule and the worker loop's backoff.

use std::time::Duration;

/// A small set of well-known URLs probed with HEAD/GET to distinguish "this
/// peer is unreachable" from "we have no internet connection at all".
#[async_trait::async_trait]
pub trait LivenessProbe: Send + Sync {
    /// Whether any of the probe URLs answered within `timeout`.
    async fn is_online(&self, timeout: Duration) -> bool;
}

/// The production probe, backed by `reqwest`.
pub struct HttpLivenessProbe {
    client: reqwest::Client,
    urls: Vec<&'static str>,
}

impl Default for HttpLivenessProbe {
    fn default() -> Self {
        HttpLivenessProbe {
            client: reqwest::Client::new(),
            urls: vec![
                "https://www.google.com/generate_204",
                "https://www.cloudflare.com/cdn-cgi/trace",
            ],
        }
    }
}

#[async_trait::async_trait]
impl LivenessProbe for HttpLivenessProbe {
    async fn is_online(&self, timeout: Duration) -> bool {
        for url in &self.urls {
            let attempt = self.client.head(*url).timeout(timeout).send();
            if tokio::time::timeout(timeout, attempt)
                .await
                .ok()
                .and_then(|r| r.ok())
                .map(|r| r.status().is_success() || r.status().is_redirection())
                .unwrap_or(false)
            {
                return true;
            }
        }
        false
    }
}
