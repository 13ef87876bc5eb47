//! Retrieves media lists and business hours from the document store.
//!
//! Every remote read goes through the injected `RetryPolicy`. Fresh results
//! are written to the local cache; the cache is also what callers fall back
//! on when the store cannot be reached.

use log::{debug, info, warn};
use std::sync::Arc;

use super::cache_store::{CacheKey, CacheStore};
use super::errors::FetchError;
use super::firestore_client::{DocumentStore, StoreDocument};
use super::model::{BusinessHours, ContentLists, MenuItem};
use super::retry::RetryPolicy;

pub const VIDEOS_COLLECTION: &str = "videos";
pub const IMAGES_COLLECTION: &str = "menuImages";
pub const HOURS_COLLECTION: &str = "business_hours";
pub const HOURS_DOCUMENT: &str = "hours";

/// Where a set of business hours handed to a caller came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HoursSource {
    Cached,
    Fresh,
    /// The configured default window; nothing real was available.
    Fallback,
}

pub struct ContentFetcher {
    store: Arc<dyn DocumentStore>,
    cache: Arc<CacheStore>,
    retry: RetryPolicy,
    fallback_hours: BusinessHours,
}

impl ContentFetcher {
    pub fn new(store: Arc<dyn DocumentStore>, cache: Arc<CacheStore>, retry: RetryPolicy, fallback_hours: BusinessHours) -> Self {
        Self { store, cache, retry, fallback_hours }
    }

    /// Lists a collection, retrying transient failures.
    pub async fn fetch_collection(&self, name: &str) -> Result<Vec<StoreDocument>, FetchError> {
        let label = format!("Fetch of collection '{}'", name);
        self.retry.run(&label, || self.store.list_collection(name)).await
    }

    /// Last known media lists, if both are cached and fresh.
    pub fn cached_content(&self) -> Option<ContentLists> {
        let menu_items = self.cache.get::<Vec<MenuItem>>(CacheKey::MenuItems)?;
        let video_sources = self.cache.get::<Vec<String>>(CacheKey::VideoSources)?;
        debug!(
            "Using cached content from {}: {} image(s), {} video(s)",
            menu_items.fetched_at,
            menu_items.payload.len(),
            video_sources.payload.len()
        );
        Some(ContentLists { menu_items: menu_items.payload, video_sources: video_sources.payload })
    }

    /// Fetches both media collections and refreshes the cache with them.
    pub async fn fetch_content(&self) -> Result<ContentLists, FetchError> {
        let (videos, images) =
            tokio::try_join!(self.fetch_collection(VIDEOS_COLLECTION), self.fetch_collection(IMAGES_COLLECTION))?;

        let video_sources: Vec<String> =
            videos.iter().filter_map(|doc| required_str(doc, VIDEOS_COLLECTION, "url")).collect();
        let menu_items: Vec<MenuItem> = images
            .iter()
            .filter_map(|doc| required_str(doc, IMAGES_COLLECTION, "imageURL"))
            .map(|image_url| MenuItem { image_url })
            .collect();

        info!("Fetched content: {} image(s), {} video(s)", menu_items.len(), video_sources.len());
        self.cache.set(CacheKey::VideoSources, &video_sources);
        self.cache.set(CacheKey::MenuItems, &menu_items);
        Ok(ContentLists { menu_items, video_sources })
    }

    pub fn cached_business_hours(&self) -> Option<BusinessHours> {
        self.cache.get::<BusinessHours>(CacheKey::BusinessHours).map(|entry| entry.payload)
    }

    /// Delivers business hours to `on_hours`, cache first.
    ///
    /// With cached hours the callback fires right away and the fresh fetch only
    /// refreshes the cache. Without them the callback fires once, with the fresh
    /// hours or, if those cannot be had, with the fallback window. The source is
    /// passed along so a caller holding older hours can ignore the fallback.
    pub async fn fetch_business_hours<F>(&self, mut on_hours: F)
    where
        F: FnMut(BusinessHours, HoursSource) + Send,
    {
        let cached = self.cached_business_hours();
        if let Some(hours) = cached {
            debug!("Serving cached business hours {}", hours);
            on_hours(hours, HoursSource::Cached);
        }

        match self.fetch_hours_record().await {
            Ok(hours) => {
                info!("Fetched business hours {}", hours);
                self.cache.set(CacheKey::BusinessHours, &hours);
                if cached.is_none() {
                    on_hours(hours, HoursSource::Fresh);
                }
            }
            Err(e) if cached.is_none() => {
                warn!("No business hours available ({}), using fallback {}", e, self.fallback_hours);
                on_hours(self.fallback_hours, HoursSource::Fallback);
            }
            Err(e) => {
                warn!("Business hours refresh failed, keeping cached hours: {}", e);
            }
        }
    }

    async fn fetch_hours_record(&self) -> Result<BusinessHours, FetchError> {
        let document = self
            .retry
            .run("Fetch of business hours", || self.store.get_document(HOURS_COLLECTION, HOURS_DOCUMENT))
            .await?
            .ok_or_else(|| FetchError::MalformedRecord(format!("{}/{} does not exist", HOURS_COLLECTION, HOURS_DOCUMENT)))?;
        let open_time = document
            .field_i64("openTime")
            .ok_or_else(|| FetchError::MalformedRecord("business hours record has no openTime".into()))?;
        let close_time = document
            .field_i64("closeTime")
            .ok_or_else(|| FetchError::MalformedRecord("business hours record has no closeTime".into()))?;
        BusinessHours::from_packed(open_time, close_time)
    }
}

fn required_str(doc: &StoreDocument, collection: &str, field: &str) -> Option<String> {
    match doc.field_str(field) {
        Some(value) if !value.is_empty() => Some(value.to_string()),
        _ => {
            let err = FetchError::MalformedRecord(format!("{}/{} has no '{}'", collection, doc.id, field));
            warn!("Skipping record: {}", err);
            None
        }
    }
}
