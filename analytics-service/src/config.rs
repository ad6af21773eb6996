//! Service settings, read from the environment once at startup.

use std::env;
use std::str::FromStr;

/// Port the HTTP server binds to.
pub(crate) const ANALYTICS_SERVICE_PORT: &str = "ANALYTICS_SERVICE_PORT";
/// Default bind port.
pub(crate) const ANALYTICS_SERVICE_PORT_DEFAULT: u16 = 8080;
/// Base URL of the downstream ad service used by the propagation demo.
pub(crate) const AD_SERVICE_URL: &str = "AD_SERVICE_URL";
/// Default downstream base URL.
pub(crate) const AD_SERVICE_URL_DEFAULT: &str = "http://ad-service:8080";

/// Environment-driven service settings.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Port the HTTP server listens on.
    pub port: u16,
    /// Base URL of the downstream service for the trace-propagation demo.
    pub ad_service_url: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            port: ANALYTICS_SERVICE_PORT_DEFAULT,
            ad_service_url: AD_SERVICE_URL_DEFAULT.to_owned(),
        }
    }
}

impl ServiceConfig {
    /// Read the configuration from the environment, falling back to
    /// defaults for missing or unparsable values.
    pub fn from_env() -> Self {
        let mut config = ServiceConfig::default();

        if let Some(port) = env::var(ANALYTICS_SERVICE_PORT)
            .ok()
            .and_then(|port| u16::from_str(&port).ok())
        {
            config.port = port;
        }

        if let Ok(url) = env::var(AD_SERVICE_URL) {
            if !url.trim().is_empty() {
                config.ad_service_url = url.trim_end_matches('/').to_owned();
            }
        }

        config
    }
}
