//! Plugin router: externally registered HTTP services that may answer a
//! message before the model sees it.
//!
//! Plugins are tried one at a time in registration order. A plugin
//! accepts a message by replying `200` with `{"success": true, "data":
//! "<text>"}`; anything else (transport error, timeout, other status,
//! malformed body, `success: false`, empty data) moves on to the next
//! plugin. The router itself never fails: no acceptance means `None` and
//! the orchestrator proceeds to the model.
//!
//! The plugin list comes from a [`PluginSource`]. [`InstalledPlugins`]
//! reads the `installed.json` file maintained by the plugin manager.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::memory::{Turn, turns_to_messages};
use crate::telemetry;
use crate::types::Message;
use crate::{ParleyError, Result};

/// Per-plugin invoke timeout.
pub const DEFAULT_PLUGIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Name of the plugin manager's registry file inside the plugin directory.
pub const INSTALLED_FILE: &str = "installed.json";

/// A registered plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    pub id: String,
    pub name: String,
    /// Full URL the router POSTs to.
    pub invoke_endpoint: String,
    pub enabled: bool,
}

impl PluginDescriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        invoke_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            invoke_endpoint: invoke_endpoint.into(),
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Supplies the current plugin list, in registration order.
#[async_trait]
pub trait PluginSource: Send + Sync {
    async fn plugins(&self) -> Arc<Vec<PluginDescriptor>>;
}

/// A fixed plugin list.
#[derive(Debug, Clone, Default)]
pub struct StaticPlugins(Arc<Vec<PluginDescriptor>>);

impl StaticPlugins {
    pub fn new(plugins: Vec<PluginDescriptor>) -> Self {
        Self(Arc::new(plugins))
    }
}

#[async_trait]
impl PluginSource for StaticPlugins {
    async fn plugins(&self) -> Arc<Vec<PluginDescriptor>> {
        self.0.clone()
    }
}

/// Entry in `installed.json`.
#[derive(Debug, Deserialize)]
struct InstalledEntry {
    id: String,
    name: String,
    #[serde(default)]
    repository: Option<String>,
    #[serde(default = "enabled_by_default")]
    enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

/// Plugins listed in `<dir>/installed.json`.
///
/// The file is owned by the plugin manager and may change at any time, so
/// the parsed list is cached for a short TTL rather than loaded once.
pub struct InstalledPlugins {
    path: PathBuf,
    cache: Cache<(), Arc<Vec<PluginDescriptor>>>,
}

impl InstalledPlugins {
    /// Watch `dir/installed.json`, re-reading it at most once per `ttl`.
    pub fn new(dir: impl AsRef<Path>, ttl: Duration) -> Self {
        Self {
            path: dir.as_ref().join(INSTALLED_FILE),
            cache: Cache::builder().max_capacity(1).time_to_live(ttl).build(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop the cached list so the next lookup re-reads the file.
    pub async fn invalidate(&self) {
        self.cache.invalidate(&()).await;
    }

    async fn load(&self) -> Vec<PluginDescriptor> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "no installed plugins");
                return Vec::new();
            }
        };
        match parse_installed(&content) {
            Ok(plugins) => plugins,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring unreadable plugin registry");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl PluginSource for InstalledPlugins {
    async fn plugins(&self) -> Arc<Vec<PluginDescriptor>> {
        self.cache
            .get_with((), async { Arc::new(self.load().await) })
            .await
    }
}

/// Parse an `installed.json` document. Entries without a repository are
/// skipped.
pub fn parse_installed(content: &str) -> Result<Vec<PluginDescriptor>> {
    let entries: Vec<InstalledEntry> = serde_json::from_str(content)?;
    Ok(entries
        .into_iter()
        .filter_map(|entry| {
            let repository = entry.repository.filter(|r| !r.trim().is_empty())?;
            Some(PluginDescriptor {
                invoke_endpoint: format!(
                    "{}/api/plugin/{}/invoke",
                    repository.trim_end_matches('/'),
                    entry.id
                ),
                id: entry.id,
                name: entry.name,
                enabled: entry.enabled,
            })
        })
        .collect())
}

/// Body POSTed to a plugin.
#[derive(Debug, Serialize)]
struct InvokeRequest<'a> {
    message: &'a str,
    history: Vec<Message>,
    model: &'a str,
    user_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// A plugin's accepted answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginReply {
    /// Name of the plugin that answered.
    pub plugin: String,
    pub text: String,
}

/// Tries enabled plugins in order; first acceptance wins.
pub struct PluginRouter {
    source: Arc<dyn PluginSource>,
    http: Client,
    timeout: Duration,
    annotate: bool,
}

impl PluginRouter {
    pub fn new(source: Arc<dyn PluginSource>) -> Self {
        Self::with_http_client(source, Client::new())
    }

    /// Use a caller-supplied HTTP client (connection pool sharing, proxies).
    pub fn with_http_client(source: Arc<dyn PluginSource>, http: Client) -> Self {
        Self {
            source,
            http,
            timeout: DEFAULT_PLUGIN_TIMEOUT,
            annotate: false,
        }
    }

    /// Router with no plugins.
    pub fn empty() -> Self {
        Self::new(Arc::new(StaticPlugins::default()))
    }

    /// Set the per-plugin invoke timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Prefix accepted replies with `[handled by plugin {name}] `.
    pub fn annotate(mut self, annotate: bool) -> Self {
        self.annotate = annotate;
        self
    }

    /// Offer a message to each enabled plugin until one accepts.
    #[instrument(name = "plugins.try", skip_all, fields(model = %model))]
    pub async fn try_plugins(
        &self,
        message: &str,
        history: &[Turn],
        model: &str,
        user_id: Option<i64>,
    ) -> Option<PluginReply> {
        let plugins = self.source.plugins().await;
        if plugins.iter().all(|p| !p.enabled) {
            return None;
        }

        let request = InvokeRequest {
            message,
            history: turns_to_messages(history),
            model,
            user_id,
        };

        for plugin in plugins.iter().filter(|p| p.enabled) {
            match self.invoke(plugin, &request).await {
                Ok(Some(data)) => {
                    metrics::counter!(telemetry::PLUGIN_CALLS_TOTAL,
                        "plugin" => plugin.name.clone(),
                        "status" => "accepted",
                    )
                    .increment(1);
                    info!(plugin = %plugin.name, "plugin handled message");
                    let text = if self.annotate {
                        format!("[handled by plugin {}] {data}", plugin.name)
                    } else {
                        data
                    };
                    return Some(PluginReply {
                        plugin: plugin.name.clone(),
                        text,
                    });
                }
                Ok(None) => {
                    metrics::counter!(telemetry::PLUGIN_CALLS_TOTAL,
                        "plugin" => plugin.name.clone(),
                        "status" => "declined",
                    )
                    .increment(1);
                    debug!(plugin = %plugin.name, "plugin declined message");
                }
                Err(e) => {
                    metrics::counter!(telemetry::PLUGIN_CALLS_TOTAL,
                        "plugin" => plugin.name.clone(),
                        "status" => "error",
                    )
                    .increment(1);
                    warn!(error = %e, "skipping plugin");
                }
            }
        }
        None
    }

    /// `Ok(Some(text))` accepted, `Ok(None)` declined.
    async fn invoke(
        &self,
        plugin: &PluginDescriptor,
        request: &InvokeRequest<'_>,
    ) -> Result<Option<String>> {
        let unavailable = |reason: String| ParleyError::PluginUnavailable {
            plugin: plugin.name.clone(),
            reason,
        };

        let response = self
            .http
            .post(&plugin.invoke_endpoint)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(unavailable(format!("HTTP {status}")));
        }

        let body: InvokeResponse = response
            .json()
            .await
            .map_err(|e| unavailable(format!("malformed reply: {e}")))?;

        Ok(match body.data {
            Some(serde_json::Value::String(text)) if body.success && !text.is_empty() => {
                Some(text)
            }
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_installed_derives_endpoints() {
        let plugins = parse_installed(
            r#"[
                {"id": "weather", "name": "Weather", "repository": "http://plugins.local/"},
                {"id": "calc", "name": "Calc", "repository": "http://calc.local", "enabled": false},
                {"id": "orphan", "name": "Orphan"},
                {"id": "blank", "name": "Blank", "repository": ""}
            ]"#,
        )
        .unwrap();

        assert_eq!(plugins.len(), 2);
        assert_eq!(
            plugins[0].invoke_endpoint,
            "http://plugins.local/api/plugin/weather/invoke"
        );
        assert!(plugins[0].enabled);
        assert_eq!(plugins[1].id, "calc");
        assert!(!plugins[1].enabled);
    }

    #[test]
    fn parse_installed_rejects_non_array() {
        assert!(matches!(
            parse_installed(r#"{"id": "x"}"#),
            Err(ParleyError::Json(_))
        ));
    }

    #[tokio::test]
    async fn missing_file_yields_no_plugins() {
        let dir = tempfile::tempdir().unwrap();
        let source = InstalledPlugins::new(dir.path(), Duration::from_secs(60));
        assert!(source.plugins().await.is_empty());
    }

    #[tokio::test]
    async fn installed_list_is_cached_until_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        let source = InstalledPlugins::new(dir.path(), Duration::from_secs(60));
        std::fs::write(
            source.path(),
            r#"[{"id": "a", "name": "A", "repository": "http://a"}]"#,
        )
        .unwrap();
        assert_eq!(source.plugins().await.len(), 1);

        std::fs::write(source.path(), "[]").unwrap();
        assert_eq!(source.plugins().await.len(), 1);

        source.invalidate().await;
        assert!(source.plugins().await.is_empty());
    }

    #[test]
    fn request_body_shape() {
        let request = InvokeRequest {
            message: "hi",
            history: turns_to_messages(&[Turn::new("q", "a")]),
            model: "gpt-4",
            user_id: Some(7),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "message": "hi",
                "history": [
                    {"role": "user", "content": "q"},
                    {"role": "assistant", "content": "a"}
                ],
                "model": "gpt-4",
                "user_id": 7
            })
        );
    }

    #[tokio::test]
    async fn empty_router_answers_nothing() {
        let router = PluginRouter::empty();
        assert!(router.try_plugins("hi", &[], "m", None).await.is_none());
    }
}
