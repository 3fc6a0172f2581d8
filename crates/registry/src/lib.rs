//! Tool registry and dispatcher.
//!
//! Discovers module manifests over HTTP, caches them (in-process and in
//! the bus with a TTL), filters the tool view by permission and persona
//! allow-list, and dispatches canonical tool calls to module `/execute`
//! endpoints. Dispatch never throws: timeouts, unreachable modules, and
//! non-2xx responses all come back as structured error [`ToolResult`]s
//! so the agent loop stays in control of failure surfaces.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use ma_bus::Bus;
use ma_domain::error::Result;
use ma_domain::permission::PermissionLevel;
use ma_domain::tool::{ModuleManifest, ToolCall, ToolDefinition, ToolResult};

/// Manifest cache TTL in the bus.
const MANIFEST_CACHE_TTL_SECS: u64 = 3600;
/// Timeout for `/manifest` discovery calls.
const DISCOVER_TIMEOUT_SECS: u64 = 10;
/// Timeout for `/execute` dispatch calls.
const EXECUTE_TIMEOUT_SECS: u64 = 30;

fn manifest_cache_key(module: &str) -> String {
    format!("module_manifest:{module}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pure filtering / parsing helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Split a namespaced tool name into `(module, tool)` on the first dot.
pub fn split_tool_name(name: &str) -> Option<(&str, &str)> {
    name.split_once('.')
}

/// Permission- and allow-list-filtered tool view.
///
/// A tool is included iff its module is allowed and the user's level is
/// at least the tool's required level.
pub fn filter_tools(
    manifests: &HashMap<String, ModuleManifest>,
    user_permission: PermissionLevel,
    allowed_modules: &[String],
) -> Vec<ToolDefinition> {
    let mut tools = Vec::new();
    for (module_name, manifest) in manifests {
        if !allowed_modules.iter().any(|m| m == module_name) {
            continue;
        }
        for tool in &manifest.tools {
            if user_permission >= tool.required_permission {
                tools.push(tool.clone());
            }
        }
    }
    tools.sort_by(|a, b| a.name.cmp(&b.name));
    tools
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ModuleRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ModuleRegistry {
    /// Module name → base URL, from configuration.
    module_urls: HashMap<String, String>,
    manifests: RwLock<HashMap<String, ModuleManifest>>,
    bus: Bus,
    /// Inter-service bearer token for `/execute` calls.
    auth_token: Option<String>,
    discover_client: reqwest::Client,
    execute_client: reqwest::Client,
}

impl ModuleRegistry {
    pub fn new(
        module_urls: HashMap<String, String>,
        bus: Bus,
        auth_token: Option<String>,
    ) -> Result<Arc<Self>> {
        let discover_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(DISCOVER_TIMEOUT_SECS))
            .build()
            .map_err(|e| ma_domain::Error::Http(e.to_string()))?;
        let execute_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(EXECUTE_TIMEOUT_SECS))
            .build()
            .map_err(|e| ma_domain::Error::Http(e.to_string()))?;
        Ok(Arc::new(Self {
            module_urls,
            manifests: RwLock::new(HashMap::new()),
            bus,
            auth_token,
            discover_client,
            execute_client,
        }))
    }

    /// Query every configured module for its manifest, refreshing both
    /// the in-process map and the bus cache. Unreachable modules keep
    /// their previous manifest (if any) and are logged.
    pub async fn discover_all(&self) {
        for (module_name, url) in &self.module_urls {
            match self.fetch_manifest(url).await {
                Ok(manifest) => {
                    tracing::info!(
                        module = %module_name,
                        tools = manifest.tools.len(),
                        "module discovered"
                    );
                    if let Err(e) = self
                        .bus
                        .cache_set_json(
                            &manifest_cache_key(module_name),
                            &manifest,
                            MANIFEST_CACHE_TTL_SECS,
                        )
                        .await
                    {
                        tracing::warn!(module = %module_name, error = %e, "manifest cache write failed");
                    }
                    self.manifests.write().insert(module_name.clone(), manifest);
                }
                Err(e) => {
                    tracing::warn!(module = %module_name, error = %e, "module unreachable during discovery");
                }
            }
        }
    }

    /// Populate the in-process map from the bus cache, for fast startup
    /// before the first discovery round completes. Misses are safe.
    pub async fn load_from_cache(&self) {
        for module_name in self.module_urls.keys() {
            match self
                .bus
                .cache_get_json::<ModuleManifest>(&manifest_cache_key(module_name))
                .await
            {
                Ok(Some(manifest)) => {
                    self.manifests.write().insert(module_name.clone(), manifest);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(module = %module_name, error = %e, "manifest cache read failed");
                }
            }
        }
    }

    async fn fetch_manifest(&self, base_url: &str) -> Result<ModuleManifest> {
        let resp = self
            .discover_client
            .get(format!("{}/manifest", base_url.trim_end_matches('/')))
            .send()
            .await
            .map_err(|e| ma_domain::Error::ModuleUnreachable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ma_domain::Error::ModuleUnreachable(format!(
                "manifest returned HTTP {}",
                resp.status().as_u16()
            )));
        }
        resp.json::<ModuleManifest>()
            .await
            .map_err(|e| ma_domain::Error::Validation(format!("invalid manifest: {e}")))
    }

    /// The tools visible to a user under a persona's module allow-list.
    pub fn tools_for(
        &self,
        user_permission: PermissionLevel,
        allowed_modules: &[String],
    ) -> Vec<ToolDefinition> {
        filter_tools(&self.manifests.read(), user_permission, allowed_modules)
    }

    /// Look up a tool definition by its namespaced name.
    pub fn tool_definition(&self, tool_name: &str) -> Option<ToolDefinition> {
        let (module, _) = split_tool_name(tool_name)?;
        let manifests = self.manifests.read();
        manifests
            .get(module)?
            .tools
            .iter()
            .find(|t| t.name == tool_name)
            .cloned()
    }

    /// Dispatch a canonical tool call to the owning module's `/execute`.
    ///
    /// Always returns a [`ToolResult`]; never an error.
    pub async fn execute(&self, call: &ToolCall, user_id: Option<Uuid>) -> ToolResult {
        let Some((module, _tool)) = split_tool_name(&call.tool_name) else {
            return ToolResult::err(
                &call.tool_name,
                format!(
                    "invalid tool name format: {}. Expected 'module.tool_name'",
                    call.tool_name
                ),
            );
        };

        let Some(url) = self.module_urls.get(module) else {
            return ToolResult::err(&call.tool_name, format!("unknown module: {module}"));
        };

        let body = serde_json::json!({
            "tool_name": call.tool_name,
            "arguments": call.arguments,
            "user_id": user_id,
        });

        let mut request = self
            .execute_client
            .post(format!("{}/execute", url.trim_end_matches('/')))
            .json(&body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let resp = match request.send().await {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                return ToolResult::err(
                    &call.tool_name,
                    format!("tool execution timed out ({EXECUTE_TIMEOUT_SECS}s)"),
                );
            }
            Err(e) => {
                return ToolResult::err(
                    &call.tool_name,
                    format!("module {module} unreachable: {e}"),
                );
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return ToolResult::err(
                &call.tool_name,
                format!("module returned status {}: {}", status.as_u16(), text),
            );
        }

        match resp.json::<ToolResult>().await {
            Ok(result) => result,
            Err(e) => ToolResult::err(
                &call.tool_name,
                format!("module returned an undecodable result: {e}"),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ma_domain::tool::ToolParameter;

    fn manifest(module: &str, tools: Vec<(&str, PermissionLevel)>) -> ModuleManifest {
        ModuleManifest {
            module_name: module.into(),
            description: String::new(),
            tools: tools
                .into_iter()
                .map(|(name, perm)| ToolDefinition {
                    name: name.into(),
                    description: String::new(),
                    parameters: vec![ToolParameter {
                        name: "query".into(),
                        param_type: "string".into(),
                        description: String::new(),
                        required: true,
                        r#enum: None,
                    }],
                    required_permission: perm,
                })
                .collect(),
        }
    }

    fn sample_manifests() -> HashMap<String, ModuleManifest> {
        let mut m = HashMap::new();
        m.insert(
            "research".into(),
            manifest(
                "research",
                vec![
                    ("research.web_search", PermissionLevel::User),
                    ("research.deep_dive", PermissionLevel::Admin),
                ],
            ),
        );
        m.insert(
            "deployer".into(),
            manifest("deployer", vec![("deployer.ship", PermissionLevel::Owner)]),
        );
        m
    }

    #[test]
    fn split_requires_namespace() {
        assert_eq!(split_tool_name("research.web_search"), Some(("research", "web_search")));
        assert!(split_tool_name("bare_name").is_none());
    }

    #[test]
    fn filter_respects_permission_order() {
        let manifests = sample_manifests();
        let allowed = vec!["research".to_string(), "deployer".to_string()];

        let user_view = filter_tools(&manifests, PermissionLevel::User, &allowed);
        assert_eq!(
            user_view.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            vec!["research.web_search"]
        );

        let owner_view = filter_tools(&manifests, PermissionLevel::Owner, &allowed);
        assert_eq!(owner_view.len(), 3);
    }

    #[test]
    fn filter_respects_module_allow_list() {
        let manifests = sample_manifests();
        let allowed = vec!["deployer".to_string()];
        let view = filter_tools(&manifests, PermissionLevel::Owner, &allowed);
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].name, "deployer.ship");
    }

    #[test]
    fn guest_sees_nothing_here() {
        let manifests = sample_manifests();
        let allowed = vec!["research".to_string()];
        assert!(filter_tools(&manifests, PermissionLevel::Guest, &allowed).is_empty());
    }
}
