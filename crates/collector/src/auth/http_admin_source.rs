//! An `AdminListSource` adapter against an external identity service: a
//! plain `GET` returning a JSON array of admin usernames. Grounded on
//! `metrics_store::prometheus`'s `reqwest`-based external HTTP client
//! shape — the same "thin client over one external read-only endpoint"
//! pattern, applied to a different collaborator.

use async_trait::async_trait;
use std::time::Duration;

use super::AdminListSource;
use crate::error::{Error, Result};

pub struct HttpAdminListSource {
    client: reqwest::Client,
    url: String,
}

impl HttpAdminListSource {
    pub fn new(url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Upstream(e.to_string()))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl AdminListSource for HttpAdminListSource {
    async fn admins(&self) -> Result<Vec<String>> {
        self.client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::Upstream(e.to_string()))?
            .json::<Vec<String>>()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn parses_username_array() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/admins"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vec!["alice", "bob"]))
            .mount(&server)
            .await;

        let source = HttpAdminListSource::new(format!("{}/admins", server.uri())).unwrap();
        let admins = source.admins().await.unwrap();
        assert_eq!(admins, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[tokio::test]
    async fn error_status_surfaces_as_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/admins"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let source = HttpAdminListSource::new(format!("{}/admins", server.uri())).unwrap();
        assert!(source.admins().await.is_err());
    }
}
