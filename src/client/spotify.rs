//! Spotify Web API client.
//!
//! Epistemic foundation:
//! - K_i: The client-credentials flow needs no user authorization
//! - K_i: Audio-features requests carry at most 100 ids
//! - B_i: The API will respond within timeout (might fail)
//! - B_i: The response will be valid JSON (might fail)
//! - I^B: Network availability unknowable → retry with backoff

use crate::client::{retry_after_secs, RateLimiter};
use crate::models::{
    track_id, AudioFeatures, Credentials, MpdkitError, Result, SpotifyError,
    AUDIO_FEATURES_BATCH_LIMIT,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// A track id with features available for every app tier, used by the
/// connectivity probes.
pub const PROBE_TRACK_ID: &str = "4uLU6hMCjMI75M1A2tKUQC";

/// Refresh the token this long before it actually expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Cached bearer token.
#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.expires_at > Instant::now() + TOKEN_EXPIRY_MARGIN
    }
}

/// Spotify API error response.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Batch audio-features response.
///
/// K_i: The array is positional with respect to the requested ids, and an
/// entry is null when the track has no features.
#[derive(Debug, Deserialize)]
struct AudioFeaturesResponse {
    audio_features: Vec<Option<AudioFeatures>>,
}

/// Minimal track metadata returned by lookup and search probes.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackInfo {
    pub name: String,
    pub artists: Vec<ArtistRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtistRef {
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: SearchTracks,
}

#[derive(Debug, Deserialize)]
struct SearchTracks {
    items: Vec<TrackInfo>,
}

/// Health status of a probed endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Result of probing a single endpoint.
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub endpoint: String,
    pub status: HealthStatus,
    pub latency: Duration,
    pub message: Option<String>,
}

/// Spotify Web API client.
///
/// Features:
/// - Client-credentials token flow with cached refresh
/// - Automatic rate limit handling with adaptive backoff
/// - Retry with exponential backoff
pub struct SpotifyClient {
    client: reqwest::Client,
    credentials: Credentials,
    api_base_url: String,
    auth_url: String,
    timeout: Duration,
    max_retries: u32,
    rate_limiter: Arc<RateLimiter>,
    token: RwLock<Option<CachedToken>>,
}

impl SpotifyClient {
    /// Create a new Spotify client.
    pub fn new(
        credentials: Credentials,
        api_base_url: Option<String>,
        auth_url: Option<String>,
        timeout_secs: Option<u64>,
        max_retries: Option<u32>,
        rate_limiter: Option<Arc<RateLimiter>>,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs.unwrap_or(30));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(MpdkitError::Network)?;

        Ok(Self {
            client,
            credentials,
            api_base_url: api_base_url
                .unwrap_or_else(|| "https://api.spotify.com/v1".to_string()),
            auth_url: auth_url
                .unwrap_or_else(|| "https://accounts.spotify.com/api/token".to_string()),
            timeout,
            max_retries: max_retries.unwrap_or(3),
            rate_limiter: rate_limiter.unwrap_or_else(|| Arc::new(RateLimiter::new())),
            token: RwLock::new(None),
        })
    }

    /// Get the rate limiter.
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Get a valid bearer token, refreshing if the cached one is stale.
    async fn access_token(&self) -> Result<String> {
        {
            let guard = self.token.read().await;
            if let Some(token) = guard.as_ref().filter(|t| t.is_fresh()) {
                return Ok(token.access_token.clone());
            }
        }
        self.refresh_token().await
    }

    /// Drop the cached token so the next request re-authenticates.
    async fn invalidate_token(&self) {
        *self.token.write().await = None;
    }

    /// Run the client-credentials flow against the token endpoint.
    ///
    /// B_i(credentials valid) → Result
    async fn refresh_token(&self) -> Result<String> {
        let mut guard = self.token.write().await;

        // Another task may have refreshed while we waited for the lock
        if let Some(token) = guard.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.access_token.clone());
        }

        let response = self
            .client
            .post(&self.auth_url)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MpdkitError::Timeout(self.timeout)
                } else {
                    MpdkitError::Network(e)
                }
            })?;

        let status = response.status().as_u16();
        self.rate_limiter
            .record_request("token", status, response.headers());

        // Spotify answers invalid_client with 400, expired grants with 401
        if status == 400 || status == 401 {
            return Err(SpotifyError::AuthenticationFailed.into());
        }
        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SpotifyError::ApiError { status, message }.into());
        }

        let body: TokenResponse = response.json().await.map_err(|e| {
            MpdkitError::SpotifyApi(SpotifyError::InvalidResponse(format!(
                "token response: {e}"
            )))
        })?;

        debug!(expires_in = body.expires_in, "Access token refreshed");
        *guard = Some(CachedToken {
            access_token: body.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(body.expires_in),
        });

        Ok(body.access_token)
    }

    /// GET a JSON resource with rate limiting, retries, and token refresh.
    ///
    /// B_i(API available) → Result
    /// B_i(valid response) → Result
    /// I^B(rate limits) → adaptive backoff
    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}/{}", self.api_base_url.trim_end_matches('/'), path);
        let mut last_error: Option<MpdkitError> = None;
        let mut refreshed = false;

        for attempt in 0..self.max_retries {
            // Wait if rate limited
            self.rate_limiter.wait_if_needed(endpoint).await;

            let token = match self.access_token().await {
                Ok(t) => t,
                Err(e) if e.is_retryable() => {
                    last_error = Some(e);
                    if attempt < self.max_retries - 1 {
                        tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            let response = self
                .client
                .get(&url)
                .bearer_auth(&token)
                .query(query)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    if e.is_timeout() {
                        last_error = Some(MpdkitError::Timeout(self.timeout));
                    } else {
                        last_error = Some(MpdkitError::Network(e));
                    }
                    if attempt < self.max_retries - 1 {
                        let backoff = Duration::from_secs(2u64.pow(attempt));
                        debug!(
                            attempt = attempt,
                            backoff_secs = backoff.as_secs(),
                            "Retrying after network error"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    continue;
                }
            };

            let status = response.status().as_u16();
            let headers = response.headers().clone();

            // Update rate limiter state
            self.rate_limiter.record_request(endpoint, status, &headers);

            // Handle rate limiting
            if status == 429 {
                let retry_after = retry_after_secs(&headers).unwrap_or(1.0);
                last_error = Some(MpdkitError::RateLimited {
                    retry_after_secs: retry_after,
                });

                if attempt < self.max_retries - 1 {
                    debug!(
                        attempt = attempt,
                        retry_after_secs = retry_after,
                        "Rate limited, waiting"
                    );
                    tokio::time::sleep(Duration::from_secs_f64(retry_after)).await;
                }
                continue;
            }

            // An expired token earns one refresh, then 401 is terminal
            if status == 401 {
                if !refreshed {
                    refreshed = true;
                    self.invalidate_token().await;
                    continue;
                }
                last_error = Some(SpotifyError::AuthenticationFailed.into());
                break;
            }

            if status == 403 {
                last_error = Some(SpotifyError::Forbidden.into());
                break;
            }

            if status == 404 {
                last_error = Some(SpotifyError::NotFound(path.to_string()).into());
                break;
            }

            if !response.status().is_success() {
                let error_body = response.text().await.unwrap_or_default();
                let message =
                    match serde_json::from_str::<ApiErrorResponse>(&error_body) {
                        Ok(api_error) => api_error.error.message,
                        Err(_) => error_body,
                    };
                last_error = Some(SpotifyError::ApiError { status, message }.into());

                if attempt < self.max_retries - 1 {
                    tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                }
                continue;
            }

            // Parse successful response
            return response.json().await.map_err(|e| {
                MpdkitError::SpotifyApi(SpotifyError::InvalidResponse(format!(
                    "{path}: {e}"
                )))
            });
        }

        Err(last_error.unwrap_or_else(|| {
            SpotifyError::MaxRetriesExceeded {
                attempts: self.max_retries,
                last_error: "Unknown error".to_string(),
            }
            .into()
        }))
    }

    /// Fetch audio features for a batch of track URIs.
    ///
    /// B_i(fetch succeeds) → Result; a `None` value means Spotify has no
    /// features for that track. Chunking to the 100-id limit is the
    /// caller's job; larger batches are rejected.
    pub async fn audio_features_batch(
        &self,
        uris: &[String],
    ) -> Result<HashMap<String, Option<AudioFeatures>>> {
        if uris.is_empty() {
            return Ok(HashMap::new());
        }
        if uris.len() > AUDIO_FEATURES_BATCH_LIMIT {
            return Err(MpdkitError::InvalidInput(format!(
                "audio-features batch of {} exceeds the {}-id limit",
                uris.len(),
                AUDIO_FEATURES_BATCH_LIMIT
            )));
        }

        let ids: Vec<&str> = uris.iter().map(|u| track_id(u)).collect();
        let body: AudioFeaturesResponse = self
            .get_json("audio-features", "audio-features", &[("ids", ids.join(","))])
            .await?;

        Ok(zip_features(uris, body.audio_features))
    }

    /// Look up a single track by id.
    pub async fn track(&self, id: &str) -> Result<TrackInfo> {
        self.get_json("tracks", &format!("tracks/{id}"), &[]).await
    }

    /// Search for a track, returning the top hit if any.
    pub async fn search_track(&self, query: &str) -> Result<Option<TrackInfo>> {
        let body: SearchResponse = self
            .get_json(
                "search",
                "search",
                &[
                    ("q", query.to_string()),
                    ("type", "track".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(body.tracks.items.into_iter().next())
    }

    /// Probe the token, search, track-lookup, and audio-features endpoints.
    ///
    /// B_i(endpoint reachable) → verified per endpoint; a failed probe never
    /// aborts the remaining ones.
    pub async fn health_check(&self) -> Vec<HealthCheckResult> {
        let mut results = Vec::with_capacity(4);

        let start = Instant::now();
        results.push(match self.access_token().await {
            Ok(_) => HealthCheckResult {
                endpoint: "token".to_string(),
                status: HealthStatus::Healthy,
                latency: start.elapsed(),
                message: None,
            },
            Err(e) => HealthCheckResult {
                endpoint: "token".to_string(),
                status: HealthStatus::Unhealthy,
                latency: start.elapsed(),
                message: Some(e.to_string()),
            },
        });

        let start = Instant::now();
        results.push(match self.search_track("test").await {
            Ok(hit) => HealthCheckResult {
                endpoint: "search".to_string(),
                status: HealthStatus::Healthy,
                latency: start.elapsed(),
                message: hit.map(|t| format!("top hit: {}", t.name)),
            },
            Err(e) => HealthCheckResult {
                endpoint: "search".to_string(),
                status: HealthStatus::Unhealthy,
                latency: start.elapsed(),
                message: Some(e.to_string()),
            },
        });

        let start = Instant::now();
        results.push(match self.track(PROBE_TRACK_ID).await {
            Ok(track) => HealthCheckResult {
                endpoint: "tracks".to_string(),
                status: HealthStatus::Healthy,
                latency: start.elapsed(),
                message: Some(format!(
                    "{} by {}",
                    track.name,
                    track
                        .artists
                        .first()
                        .map(|a| a.name.as_str())
                        .unwrap_or("unknown")
                )),
            },
            Err(e) => HealthCheckResult {
                endpoint: "tracks".to_string(),
                status: HealthStatus::Unhealthy,
                latency: start.elapsed(),
                message: Some(e.to_string()),
            },
        });

        let start = Instant::now();
        let probe_uri = format!("spotify:track:{PROBE_TRACK_ID}");
        results.push(match self.audio_features_batch(&[probe_uri.clone()]).await {
            Ok(features) => {
                let found = features.get(&probe_uri).map(|f| f.is_some()).unwrap_or(false);
                HealthCheckResult {
                    endpoint: "audio-features".to_string(),
                    status: if found {
                        HealthStatus::Healthy
                    } else {
                        HealthStatus::Unhealthy
                    },
                    latency: start.elapsed(),
                    message: (!found).then(|| "no features returned".to_string()),
                }
            }
            Err(e) => HealthCheckResult {
                endpoint: "audio-features".to_string(),
                status: HealthStatus::Unhealthy,
                latency: start.elapsed(),
                message: Some(e.to_string()),
            },
        });

        results
    }
}

/// Zip a positional audio-features response back onto the requested URIs.
///
/// Invariant: the API answers positionally. A short response (seen on
/// partial failures) leaves trailing URIs mapped to `None`.
fn zip_features(
    uris: &[String],
    features: Vec<Option<AudioFeatures>>,
) -> HashMap<String, Option<AudioFeatures>> {
    let mut result = HashMap::with_capacity(uris.len());
    let mut features = features.into_iter();
    for uri in uris {
        result.insert(uri.clone(), features.next().flatten());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(tempo: f64) -> AudioFeatures {
        AudioFeatures {
            acousticness: 0.1,
            danceability: 0.5,
            energy: 0.9,
            instrumentalness: 0.0,
            liveness: 0.3,
            loudness: -5.0,
            speechiness: 0.05,
            tempo,
            valence: 0.6,
            key: 5,
            mode: 1,
            time_signature: 4,
        }
    }

    #[test]
    fn test_zip_features_positional_with_nulls() {
        let uris = vec![
            "spotify:track:a".to_string(),
            "spotify:track:b".to_string(),
            "spotify:track:c".to_string(),
        ];
        let response = vec![Some(features(120.0)), None, Some(features(90.0))];

        let zipped = zip_features(&uris, response);
        assert_eq!(zipped.len(), 3);
        assert!(zipped["spotify:track:a"].is_some());
        assert!(zipped["spotify:track:b"].is_none());
        assert_eq!(zipped["spotify:track:c"].as_ref().unwrap().tempo, 90.0);
    }

    #[test]
    fn test_zip_features_short_response() {
        let uris = vec!["spotify:track:a".to_string(), "spotify:track:b".to_string()];
        let zipped = zip_features(&uris, vec![Some(features(100.0))]);
        assert!(zipped["spotify:track:a"].is_some());
        assert!(zipped["spotify:track:b"].is_none());
    }

    #[tokio::test]
    async fn test_batch_limit_enforced() {
        let client = SpotifyClient::new(
            Credentials {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
            },
            None,
            None,
            None,
            None,
            None,
        )
        .unwrap();

        let uris: Vec<String> = (0..101).map(|i| format!("spotify:track:t{i}")).collect();
        let err = client.audio_features_batch(&uris).await.unwrap_err();
        assert!(matches!(err, MpdkitError::InvalidInput(_)));
    }

    #[test]
    fn test_token_freshness_margin() {
        let stale = CachedToken {
            access_token: "t".to_string(),
            expires_at: Instant::now() + Duration::from_secs(30),
        };
        assert!(!stale.is_fresh());

        let fresh = CachedToken {
            access_token: "t".to_string(),
            expires_at: Instant::now() + Duration::from_secs(3600),
        };
        assert!(fresh.is_fresh());
    }
}
