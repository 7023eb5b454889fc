use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::GeocodingConfig;

/// Location details returned by a reverse-geocoding lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub address: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub postcode: Option<String>,
}

impl Place {
    pub fn is_empty(&self) -> bool {
        self.address.is_none() && self.city.is_none() && self.country.is_none() && self.postcode.is_none()
    }
}

/// Reverse-geocoding failure. Only [`GeocodeError::Timeout`] is retried.
#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("geocoding request timed out")]
    Timeout,
    #[error("geocoding failed: {0}")]
    Other(String),
}

/// A reverse-geocoding backend.
///
/// Implement this trait to plug in another provider; [`NominatimGeocoder`]
/// is the default.
#[async_trait::async_trait]
pub trait ReverseGeocoder: Send + Sync {
    /// The display name of this backend.
    fn name(&self) -> &str;
    /// Look up the place at the given coordinates. `Ok(None)` means the
    /// backend answered but knows nothing about the location.
    async fn reverse(&self, latitude: f64, longitude: f64) -> Result<Option<Place>, GeocodeError>;
}

/// OpenStreetMap Nominatim reverse geocoder.
pub struct NominatimGeocoder {
    base_url: String,
    client: Client,
}

impl NominatimGeocoder {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .context("Failed to build geocoding HTTP client")?;
        Ok(Self {
            base_url: "https://nominatim.openstreetmap.org".to_string(),
            client,
        })
    }
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    display_name: Option<String>,
    #[serde(default)]
    address: NominatimAddress,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NominatimAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    country: Option<String>,
    postcode: Option<String>,
}

impl NominatimResponse {
    fn into_place(self) -> Option<Place> {
        if self.error.is_some() {
            return None;
        }
        let NominatimAddress { city, town, village, country, postcode } = self.address;
        let place = Place {
            address: self.display_name,
            city: city.or(town).or(village),
            country,
            postcode,
        };
        (!place.is_empty()).then_some(place)
    }
}

#[async_trait::async_trait]
impl ReverseGeocoder for NominatimGeocoder {
    fn name(&self) -> &str {
        "Nominatim"
    }

    async fn reverse(&self, latitude: f64, longitude: f64) -> Result<Option<Place>, GeocodeError> {
        let url = format!(
            "{}/reverse?format=jsonv2&addressdetails=1&lat={latitude}&lon={longitude}",
            self.base_url
        );

        let resp = self.client.get(&url).send().await.map_err(classify)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(GeocodeError::Other(format!("Nominatim API error ({status})")));
        }

        let body: NominatimResponse = resp.json().await.map_err(classify)?;
        Ok(body.into_place())
    }
}

fn classify(e: reqwest::Error) -> GeocodeError {
    if e.is_timeout() {
        GeocodeError::Timeout
    } else {
        GeocodeError::Other(e.to_string())
    }
}

/// Durable `"lat,lon"` → [`Place`] cache backed by a JSON file.
///
/// Every new entry rewrites the file through a temp file and a rename, so
/// a reader never sees a torn file and concurrent writers resolve to the
/// last one. Entries are idempotent, which makes that acceptable.
pub struct GeoCache {
    path: Option<PathBuf>,
    entries: Mutex<HashMap<String, Place>>,
}

impl GeoCache {
    /// A cache that lives only for the current run.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Load the cache file. A missing or unreadable file yields an empty cache.
    pub fn load(path: &Path) -> Self {
        let entries = match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(map) => map,
                Err(e) => {
                    log::error!("Ignoring corrupt geocoding cache {}: {e}", path.display());
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                log::error!("Failed to read geocoding cache {}: {e}", path.display());
                HashMap::new()
            }
        };
        log::debug!("Geocoding cache: {} entries", entries.len());
        Self {
            path: Some(path.to_path_buf()),
            entries: Mutex::new(entries),
        }
    }

    pub fn key(latitude: f64, longitude: f64) -> String {
        format!("{latitude},{longitude}")
    }

    pub fn get(&self, latitude: f64, longitude: f64) -> Option<Place> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(&Self::key(latitude, longitude)).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert an entry and persist the whole cache.
    pub fn insert(&self, latitude: f64, longitude: f64, place: Place) -> Result<()> {
        let snapshot = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.insert(Self::key(latitude, longitude), place);
            serde_json::to_string_pretty(&*entries).context("Failed to serialize geocoding cache")?
        };

        let Some(path) = &self.path else {
            return Ok(());
        };
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).context("Failed to create cache temp file")?;
        tmp.write_all(snapshot.as_bytes())
            .context("Failed to write geocoding cache")?;
        tmp.persist(path).context("Failed to replace geocoding cache")?;
        Ok(())
    }
}

/// Cached reverse geocoding with a bounded retry on timeouts.
pub struct LocationLookup {
    geocoder: Box<dyn ReverseGeocoder>,
    cache: GeoCache,
    max_retries: u32,
    retry_delay: Duration,
}

impl LocationLookup {
    pub fn new(geocoder: Box<dyn ReverseGeocoder>, cache: GeoCache, max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            geocoder,
            cache,
            max_retries,
            retry_delay,
        }
    }

    /// Build the Nominatim-backed lookup described by the configuration.
    pub fn from_config(config: &GeocodingConfig, cache_dir: &Path) -> Result<Self> {
        let geocoder = NominatimGeocoder::new(&config.user_agent, Duration::from_secs(config.timeout_secs))?;
        let cache = GeoCache::load(&cache_dir.join("geo_cache.json"));
        Ok(Self::new(
            Box::new(geocoder),
            cache,
            config.max_retries,
            Duration::from_secs(config.retry_delay_secs),
        ))
    }

    pub fn cache(&self) -> &GeoCache {
        &self.cache
    }

    /// Resolve the place at the given coordinates.
    ///
    /// Timeouts are retried up to `max_retries` attempts in total with a fixed
    /// delay between them; any other failure ends the lookup at once. Either
    /// way the result is "no location info", never an error.
    pub async fn locate(&self, latitude: f64, longitude: f64) -> Option<Place> {
        if let Some(place) = self.cache.get(latitude, longitude) {
            log::debug!("Geocoding cache hit for {latitude},{longitude}");
            return Some(place);
        }

        let attempts = self.max_retries.max(1);
        for attempt in 1..=attempts {
            match self.geocoder.reverse(latitude, longitude).await {
                Ok(Some(place)) => {
                    if let Err(e) = self.cache.insert(latitude, longitude, place.clone()) {
                        log::error!("Failed to save geocoding cache: {e:#}");
                    }
                    return Some(place);
                }
                Ok(None) => {
                    log::info!("{}: no place found at {latitude},{longitude}", self.geocoder.name());
                    return None;
                }
                Err(GeocodeError::Timeout) => {
                    log::warn!(
                        "{} timed out for {latitude},{longitude} (attempt {attempt}/{attempts})",
                        self.geocoder.name()
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
                Err(e) => {
                    log::error!("{} lookup for {latitude},{longitude} failed: {e}", self.geocoder.name());
                    return None;
                }
            }
        }

        None
    }
}
