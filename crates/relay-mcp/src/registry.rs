//! Tool registry: the merged, namespaced tool surface of all ready providers.

use crate::handle::ToolProviderHandle;
use std::collections::HashMap;

/// Position of a handle in its session's declaration order.
///
/// A lookup key only; it never owns or keeps the handle alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(pub usize);

/// A tool as exposed to the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    /// Unique name within the registry.
    pub qualified_name: String,
    /// Name the owning provider knows the tool by.
    pub tool_name: String,
    /// Owning provider's name.
    pub server: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub handle: HandleId,
}

/// Insertion-ordered mapping of qualified name to descriptor.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Merge the cached tool lists of every ready handle.
    ///
    /// Handles are visited in the given order, tools in provider order. A name
    /// that is already taken is namespaced as `server.tool`; if that is taken
    /// too, `.2`, `.3`, ... is appended until it is free.
    pub fn build(handles: &[ToolProviderHandle]) -> Self {
        let mut registry = Self::default();

        for (position, handle) in handles.iter().enumerate() {
            if !handle.is_ready() {
                tracing::debug!(
                    "MCP server '{}' contributes no tools ({})",
                    handle.name(),
                    handle.state()
                );
                continue;
            }

            for tool in handle.cached_tools() {
                let qualified_name = registry.free_name(handle.name(), &tool.name);
                if qualified_name != tool.name {
                    tracing::debug!(
                        "Tool '{}' from '{}' collides, registered as '{qualified_name}'",
                        tool.name,
                        handle.name()
                    );
                }
                registry.insert(ToolDescriptor {
                    qualified_name,
                    tool_name: tool.name.clone(),
                    server: handle.name().to_string(),
                    description: tool.description.clone(),
                    input_schema: tool.input_schema.clone(),
                    handle: HandleId(position),
                });
            }
        }

        registry
    }

    pub fn get(&self, qualified_name: &str) -> Option<&ToolDescriptor> {
        self.index.get(qualified_name).map(|&i| &self.tools[i])
    }

    pub fn contains(&self, qualified_name: &str) -> bool {
        self.index.contains_key(qualified_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Number of tools a given handle contributed.
    pub fn count_for(&self, handle: HandleId) -> usize {
        self.tools.iter().filter(|t| t.handle == handle).count()
    }

    fn free_name(&self, server: &str, tool: &str) -> String {
        if !self.contains(tool) {
            return tool.to_string();
        }
        let namespaced = format!("{server}.{tool}");
        if !self.contains(&namespaced) {
            return namespaced;
        }
        (2..)
            .map(|n| format!("{namespaced}.{n}"))
            .find(|candidate| !self.contains(candidate))
            .unwrap_or(namespaced)
    }

    fn insert(&mut self, descriptor: ToolDescriptor) {
        self.index
            .insert(descriptor.qualified_name.clone(), self.tools.len());
        self.tools.push(descriptor);
    }
}

impl<'a> IntoIterator for &'a ToolRegistry {
    type Item = &'a ToolDescriptor;
    type IntoIter = std::slice::Iter<'a, ToolDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.tools.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::McpToolInfo;
    use crate::config::ServerSpec;
    use crate::error::McpError;
    use crate::handle::{Connection, Launcher};
    use futures_util::future::BoxFuture;
    use std::time::Duration;

    struct FixedTools(Vec<String>);

    impl Connection for FixedTools {
        fn tools(&self) -> BoxFuture<'_, Result<Vec<McpToolInfo>, McpError>> {
            let tools = self
                .0
                .iter()
                .map(|name| McpToolInfo {
                    name: name.clone(),
                    description: format!("{name} tool"),
                    input_schema: serde_json::json!({"type": "object"}),
                })
                .collect();
            Box::pin(async move { Ok(tools) })
        }

        fn invoke<'a>(
            &'a self,
            _tool_name: &'a str,
            _arguments: serde_json::Value,
        ) -> BoxFuture<'a, Result<crate::client::McpToolResult, McpError>> {
            Box::pin(async { Err(McpError::Protocol("not used".into())) })
        }

        fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), McpError>> {
            Box::pin(async { Ok(()) })
        }
    }

    /// Servers advertise the tools named in their args; command "fail" refuses.
    struct CommandListLauncher;

    impl Launcher for CommandListLauncher {
        fn launch<'a>(
            &'a self,
            spec: &'a ServerSpec,
        ) -> BoxFuture<'a, Result<Box<dyn Connection>, McpError>> {
            Box::pin(async move {
                if spec.command == "fail" {
                    return Err(McpError::Protocol("refused".into()));
                }
                Ok(Box::new(FixedTools(spec.args.clone())) as Box<dyn Connection>)
            })
        }
    }

    async fn ready(name: &str, tools: &[&str]) -> ToolProviderHandle {
        let spec = ServerSpec::new(name, "ok").with_args(tools.iter().copied());
        let mut handle = ToolProviderHandle::new(spec);
        handle
            .start(&CommandListLauncher, Duration::from_secs(1))
            .await
            .unwrap();
        handle
    }

    async fn failed(name: &str) -> ToolProviderHandle {
        let mut handle = ToolProviderHandle::new(ServerSpec::new(name, "fail"));
        let _ = handle.start(&CommandListLauncher, Duration::from_secs(1)).await;
        handle
    }

    fn names(registry: &ToolRegistry) -> Vec<&str> {
        registry.iter().map(|t| t.qualified_name.as_str()).collect()
    }

    #[tokio::test]
    async fn unique_names_are_kept_raw() {
        let handles = vec![
            ready("files", &["read", "write"]).await,
            ready("web", &["fetch"]).await,
        ];
        let registry = ToolRegistry::build(&handles);
        assert_eq!(names(&registry), ["read", "write", "fetch"]);
        assert_eq!(registry.get("fetch").unwrap().handle, HandleId(1));
        assert_eq!(registry.get("fetch").unwrap().server, "web");
    }

    #[tokio::test]
    async fn collision_is_namespaced_by_server() {
        let handles = vec![
            ready("docs", &["search"]).await,
            ready("web", &["search"]).await,
        ];
        let registry = ToolRegistry::build(&handles);
        assert_eq!(names(&registry), ["search", "web.search"]);
        let second = registry.get("web.search").unwrap();
        assert_eq!(second.tool_name, "search");
        assert_eq!(second.handle, HandleId(1));
    }

    #[tokio::test]
    async fn secondary_collision_gets_numeric_suffix() {
        // "web" exposes a tool literally named "web.search" and another "search".
        let handles = vec![
            ready("docs", &["search"]).await,
            ready("web", &["web.search", "search", "search"]).await,
        ];
        let registry = ToolRegistry::build(&handles);
        assert_eq!(
            names(&registry),
            ["search", "web.search", "web.search.2", "web.search.3"]
        );
        assert_eq!(registry.len(), 4);
    }

    #[tokio::test]
    async fn non_ready_handles_contribute_nothing() {
        let handles = vec![
            ready("a", &["one"]).await,
            failed("b").await,
            ready("c", &["three"]).await,
        ];
        let registry = ToolRegistry::build(&handles);
        assert_eq!(names(&registry), ["one", "three"]);
        assert_eq!(registry.count_for(HandleId(1)), 0);
        assert_eq!(registry.count_for(HandleId(2)), 1);
    }

    #[tokio::test]
    async fn build_is_deterministic() {
        let handles = vec![
            ready("a", &["x", "y", "x"]).await,
            ready("b", &["y", "x"]).await,
        ];
        let first = ToolRegistry::build(&handles);
        let second = ToolRegistry::build(&handles);
        assert_eq!(names(&first), names(&second));
        assert_eq!(
            first.iter().cloned().collect::<Vec<_>>(),
            second.iter().cloned().collect::<Vec<_>>()
        );
    }

    #[test]
    fn empty_registry() {
        let registry = ToolRegistry::build(&[]);
        assert!(registry.is_empty());
        assert!(registry.get("anything").is_none());
    }
}
