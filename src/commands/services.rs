//! Construction of the network and archive services commands depend on.

use anyhow::Result;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::archive::ArchiveExtractorImpl;
use crate::catalog::HttpCatalogSource;
use crate::http::HttpClient;

/// User agent sent with every request.
pub fn user_agent() -> String {
    format!("modman-cli/{}", env!("CARGO_PKG_VERSION"))
}

pub fn build_http_client() -> Result<HttpClient> {
    let client = Client::builder().user_agent(user_agent()).build()?;
    Ok(HttpClient::new(client))
}

pub fn build_catalog_source(http: &HttpClient, cancel: &CancellationToken) -> HttpCatalogSource {
    HttpCatalogSource::new(http.clone(), cancel.clone())
}

/// Build an archive extractor (stateless, no configuration needed)
pub fn build_extractor() -> ArchiveExtractorImpl {
    ArchiveExtractorImpl::new()
}
