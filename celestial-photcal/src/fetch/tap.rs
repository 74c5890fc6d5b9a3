//! Blocking IVOA TAP client.

use std::time::Duration;

use reqwest::blocking::Client;

use crate::store::CatalogEntry;

use super::{FetchError, FieldFetcher, FieldRequest, Provider};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Basic-auth credentials, passed through to the service untouched.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Fetches fields from a survey's synchronous TAP service with an ADQL
/// region query and CSV output.
#[derive(Debug, Clone)]
pub struct TapFetcher {
    provider: Provider,
    endpoint: String,
    timeout: Duration,
    credentials: Option<Credentials>,
}

impl TapFetcher {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            endpoint: provider.endpoint().to_string(),
            timeout: DEFAULT_TIMEOUT,
            credentials: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl FieldFetcher for TapFetcher {
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn fetch(&self, request: &FieldRequest) -> Result<Vec<CatalogEntry>, FetchError> {
        let query = self.provider.adql(request)?;
        log::debug!("{} query: {}", self.provider, query);

        let client = Client::builder().timeout(self.timeout).build()?;
        let mut http = client.post(&self.endpoint).form(&[
            ("REQUEST", "doQuery"),
            ("LANG", "ADQL"),
            ("FORMAT", "csv"),
            ("QUERY", query.as_str()),
        ]);
        if let Some(creds) = &self.credentials {
            http = http.basic_auth(&creds.username, Some(&creds.password));
        }

        let response = http.send()?;
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(FetchError::Status {
                service: self.provider.name().to_string(),
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let entries = self.provider.parse_csv(&body, request)?;
        log::info!("{} returned {} sources", self.provider, entries.len());
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let fetcher = TapFetcher::new(Provider::SkyMapperDr2)
            .with_endpoint("http://localhost:1/tap/sync")
            .with_timeout(Duration::from_secs(5));
        assert_eq!(fetcher.name(), "skymapper-dr2");
        assert_eq!(fetcher.endpoint(), "http://localhost:1/tap/sync");
        assert_eq!(fetcher.provider(), Provider::SkyMapperDr2);
    }

    #[test]
    fn test_credentials_are_redacted() {
        let creds = Credentials {
            username: "observer".into(),
            password: "hunter2".into(),
        };
        let shown = format!("{creds:?}");
        assert!(shown.contains("observer"));
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn test_connection_failure_is_http_error() {
        use crate::sky::{Region, SkyPosition};

        let fetcher = TapFetcher::new(Provider::GaiaDr3)
            .with_endpoint("http://127.0.0.1:9/tap/sync")
            .with_timeout(Duration::from_secs(2));
        let request = FieldRequest {
            region: Region::cap(SkyPosition::new(10.0, 10.0), 0.1).unwrap(),
            bands: vec!["G".into()],
        };
        assert!(matches!(fetcher.fetch(&request), Err(FetchError::Http(_))));
    }
}
