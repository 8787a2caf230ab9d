//! Provider routing: health-probe the local daemon, fall back to cloud.
//!
//! Constructed clients are cached process-wide, keyed by the active provider,
//! connection parameters, and a short prefix of the resolved credential so a
//! rotated key invalidates the entry.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::provider::client::{ChatClient, CloudClient, FallbackClient, LocalClient};

/// Health-probe bound for the local daemon.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Bound for the loaded-model query used during sub-agent model resolution.
/// Independent of the health probe.
pub const MODEL_RESOLVE_TIMEOUT: Duration = Duration::from_millis(1500);

const DEFAULT_LOCAL_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_CLOUD_URL: &str = "https://api.openai.com";

/// Which backend the user pinned, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderPreference {
    /// Probe local first, fall back to cloud.
    #[default]
    Auto,
    /// Local daemon only.
    Local,
    /// Cloud only; probing is skipped entirely.
    Cloud,
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub preference: ProviderPreference,
    pub local_base_url: String,
    /// Additional local hosts tried by the daemon layer; part of the cache
    /// key so host-list edits rebuild the client.
    pub fallback_hosts: Vec<String>,
    pub cloud_base_url: String,
    pub cloud_api_key: Option<String>,
    /// Override for the health-probe bound (tests use a short one).
    pub probe_timeout: Duration,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            preference: ProviderPreference::Auto,
            local_base_url: DEFAULT_LOCAL_URL.to_string(),
            fallback_hosts: Vec::new(),
            cloud_base_url: DEFAULT_CLOUD_URL.to_string(),
            cloud_api_key: None,
            probe_timeout: PROBE_TIMEOUT,
        }
    }
}

impl ProviderSettings {
    /// Composite cache key. The credential contributes only an 8-char prefix:
    /// enough to detect rotation without holding the key in the map.
    fn cache_key(&self) -> String {
        let key_prefix = self
            .cloud_api_key
            .as_deref()
            .map(|k| k.chars().take(8).collect::<String>())
            .unwrap_or_default();
        format!(
            "{:?}|{}|{}|{}|{}",
            self.preference,
            self.local_base_url,
            self.fallback_hosts.join(","),
            self.cloud_base_url,
            key_prefix
        )
    }
}

static CLIENT_CACHE: LazyLock<Mutex<HashMap<String, Arc<dyn ChatClient>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn build_client(settings: &ProviderSettings) -> Arc<dyn ChatClient> {
    match settings.preference {
        ProviderPreference::Cloud => Arc::new(CloudClient::new(
            settings.cloud_base_url.clone(),
            settings.cloud_api_key.clone().unwrap_or_default(),
        )),
        ProviderPreference::Local => Arc::new(LocalClient::new(settings.local_base_url.clone())),
        ProviderPreference::Auto => {
            let local: Arc<dyn ChatClient> =
                Arc::new(LocalClient::new(settings.local_base_url.clone()));
            match settings.cloud_api_key.as_deref() {
                Some(key) if !key.is_empty() => {
                    let cloud = Arc::new(CloudClient::new(
                        settings.cloud_base_url.clone(),
                        key.to_string(),
                    ));
                    Arc::new(FallbackClient::new(local, cloud))
                }
                _ => local,
            }
        }
    }
}

/// Return the cached client for these settings, constructing it on first use.
pub fn get_provider(settings: &ProviderSettings) -> Arc<dyn ChatClient> {
    let key = settings.cache_key();
    let mut cache = CLIENT_CACHE.lock();
    if let Some(client) = cache.get(&key) {
        return client.clone();
    }
    let client = build_client(settings);
    debug!(kind = client.describe(), "Constructed provider client");
    cache.insert(key, client.clone());
    client
}

async fn local_daemon_reachable(settings: &ProviderSettings) -> bool {
    let url = format!(
        "{}/healthz",
        settings.local_base_url.trim_end_matches('/')
    );
    let http = reqwest::Client::new();
    match tokio::time::timeout(settings.probe_timeout, http.get(&url).send()).await {
        Ok(Ok(response)) => response.status().is_success(),
        Ok(Err(e)) => {
            debug!(error = %e, "Local daemon probe failed");
            false
        }
        Err(_) => {
            debug!("Local daemon probe timed out");
            false
        }
    }
}

/// Resolve a usable client, probing the local daemon first.
///
/// An explicit cloud pin skips probing; an explicit local pin never falls
/// back. Otherwise: local reachable returns the (possibly fallback-wrapped)
/// local client; unreachable with a cloud credential silently returns the
/// cloud client; neither is a configuration error listing the concrete
/// remediation steps.
pub async fn probe_provider(settings: &ProviderSettings) -> Result<Arc<dyn ChatClient>> {
    if settings.preference == ProviderPreference::Cloud {
        return Ok(get_provider(settings));
    }

    if local_daemon_reachable(settings).await {
        return Ok(get_provider(settings));
    }

    if settings.preference == ProviderPreference::Local {
        return Err(OrchestratorError::configuration(format!(
            "local provider is pinned but the daemon at {} is unreachable; \
             start it or remove the pin",
            settings.local_base_url
        )));
    }

    if settings
        .cloud_api_key
        .as_deref()
        .is_some_and(|key| !key.is_empty())
    {
        info!("Local daemon unreachable, using cloud provider");
        let cloud = ProviderSettings {
            preference: ProviderPreference::Cloud,
            ..settings.clone()
        };
        Ok(get_provider(&cloud))
    } else {
        Err(OrchestratorError::configuration(format!(
            "no inference backend available; either (1) start the local daemon at {}, \
             (2) set a cloud API credential, or (3) point at a different host",
            settings.local_base_url
        )))
    }
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

/// A model id is local-compatible when it is not a cloud-provider alias.
/// Cloud aliases carry an org prefix (`anthropic/claude-...`) or a known
/// cloud family prefix, neither of which the local daemon can load.
pub fn is_local_compatible(model: &str) -> bool {
    !model.contains('/')
        && !model.starts_with("claude-")
        && !model.starts_with("gpt-")
        && !model.is_empty()
}

/// Pick a model id a child agent can actually run against the local daemon.
///
/// The parent's configured model is reused when already local-compatible.
/// Otherwise the daemon's model list is queried (short timeout, independent
/// of the health probe) for the first currently-loaded model; on failure or
/// timeout the parent's configured model is kept so the call still has a
/// model id to send.
pub async fn resolve_subagent_model(settings: &ProviderSettings, parent_model: &str) -> String {
    if is_local_compatible(parent_model) {
        return parent_model.to_string();
    }

    let url = format!(
        "{}/v1/models",
        settings.local_base_url.trim_end_matches('/')
    );
    let http = reqwest::Client::new();
    let fetched = tokio::time::timeout(MODEL_RESOLVE_TIMEOUT, async {
        http.get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<ModelList>()
            .await
    })
    .await;

    match fetched {
        Ok(Ok(list)) => match list.data.into_iter().next() {
            Some(entry) => {
                info!(model = %entry.id, parent = parent_model, "Resolved local model for sub-agent");
                entry.id
            }
            None => {
                warn!("Local daemon reports no loaded models, keeping parent model");
                parent_model.to_string()
            }
        },
        _ => {
            debug!("Model resolution query failed or timed out, keeping parent model");
            parent_model.to_string()
        }
    }
}
