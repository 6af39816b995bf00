use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt, stream};
use log::{debug, info};
use reqwest::Url;
use tokio_util::sync::CancellationToken;

use super::{Catalog, CatalogEntry, ReleaseList};
use crate::error::ModError;
use crate::http::HttpClient;

/// Release lists fetched at the same time.
const FETCH_CONCURRENCY: usize = 8;

/// Where catalogs come from.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetch the complete catalog published at `url`. Partial results are never returned.
    async fn fetch(&self, url: &str) -> Result<Catalog>;
}

/// Fetches the two-level catalog format over HTTP.
pub struct HttpCatalogSource {
    http: HttpClient,
    cancel: CancellationToken,
}

impl HttpCatalogSource {
    pub fn new(http: HttpClient, cancel: CancellationToken) -> Self {
        Self { http, cancel }
    }

    async fn fetch_releases(&self, base: &Url, entry: CatalogEntry) -> Result<ReleaseList> {
        let list_url = base
            .join(&entry.url)
            .with_context(|| format!("Invalid release list URL {:?} for {}", entry.url, entry.name))?;

        let mut list: ReleaseList = self
            .http
            .get_json(list_url.as_str(), &self.cancel)
            .await
            .with_context(|| format!("Failed to fetch releases of {}", entry.name))?;

        if list.name != entry.name {
            bail!(
                "Release list at {} describes {}, expected {}",
                list_url,
                list.name,
                entry.name
            );
        }

        for release in &mut list.releases {
            release.url = list_url
                .join(&release.url)
                .with_context(|| format!("Invalid download URL {:?}", release.url))?
                .to_string();
        }
        debug!("{}: {} release(s)", list.name, list.releases.len());
        Ok(list)
    }
}

#[async_trait]
impl CatalogSource for HttpCatalogSource {
    #[tracing::instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<Catalog> {
        let base = Url::parse(url)
            .map_err(|e| ModError::invalid_argument(format!("Invalid catalog URL {}: {}", url, e)))?;

        info!("Fetching catalog from {}...", url);
        let entries: Vec<CatalogEntry> = self
            .http
            .get_json(url, &self.cancel)
            .await
            .context("Failed to fetch the catalog")?;

        let base = &base;
        let lists: Vec<ReleaseList> = stream::iter(entries)
            .map(|entry| self.fetch_releases(base, entry))
            .buffer_unordered(FETCH_CONCURRENCY)
            .try_collect()
            .await?;

        let mut catalog = Catalog::new();
        for list in lists {
            for release in list.releases {
                catalog.insert(list.name.clone(), release);
            }
        }
        info!("Catalog lists {} release(s).", catalog.len());
        Ok(catalog)
    }
}
