// Shared transport configuration for building reqwest::Client instances.
//
// The REST client, the portal flow, and the consumer-app flow share
// timeout and user-agent settings through this module. The app flow
// additionally needs a private cookie jar and manual redirect handling.

use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::redirect::Policy;

use crate::error::Error;

const USER_AGENT: &str = concat!("onecta-rs/", env!("CARGO_PKG_VERSION"));

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub timeout: Duration,
    pub cookie_jar: Option<Arc<Jar>>,
    /// Follow 3xx responses automatically. The consumer-app login reads
    /// `Location` headers itself, so it turns this off.
    pub follow_redirects: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            cookie_jar: None,
            follow_redirects: true,
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT);

        if !self.follow_redirects {
            builder = builder.redirect(Policy::none());
        }

        if let Some(ref jar) = self.cookie_jar {
            builder = builder.cookie_provider(Arc::clone(jar));
        }

        builder.build().map_err(Error::Transport)
    }

    /// Create a config that leaves redirects for the caller to inspect.
    pub fn without_redirects(mut self) -> Self {
        self.follow_redirects = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_compose() {
        let config = TransportConfig {
            cookie_jar: Some(Arc::new(Jar::default())),
            ..TransportConfig::default()
        }
        .without_redirects();
        assert!(config.cookie_jar.is_some());
        assert!(!config.follow_redirects);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.build_client().is_ok());
    }
}
