//! Mapping between registry tool names and function names the API accepts.
//!
//! Chat-completions APIs only take `[A-Za-z0-9_-]{1,64}`; registry names may
//! contain dots (collision namespacing) or anything a server chose.

use std::collections::HashMap;

const MAX_WIRE_NAME: usize = 64;

/// Bidirectional registry ⇄ wire name table for one turn.
#[derive(Debug, Clone, Default)]
pub struct ToolNameMap {
    to_wire: HashMap<String, String>,
    to_registry: HashMap<String, String>,
}

impl ToolNameMap {
    /// Assign a unique wire name to every registry name, in order.
    pub fn new<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut map = Self::default();
        for name in names {
            if map.to_wire.contains_key(name) {
                continue;
            }
            let base = sanitize(name);
            let mut wire = base.clone();
            let mut n = 2;
            while map.to_registry.contains_key(&wire) {
                let suffix = format!("_{n}");
                let keep = MAX_WIRE_NAME - suffix.len();
                wire = format!("{}{suffix}", &base[..base.len().min(keep)]);
                n += 1;
            }
            if wire != name {
                tracing::debug!("Tool '{name}' is sent to the model as '{wire}'");
            }
            map.to_registry.insert(wire.clone(), name.to_string());
            map.to_wire.insert(name.to_string(), wire);
        }
        map
    }

    pub fn wire_name(&self, registry_name: &str) -> Option<&str> {
        self.to_wire.get(registry_name).map(String::as_str)
    }

    /// Registry name for a function name the model called.
    pub fn resolve(&self, wire_name: &str) -> Option<&str> {
        self.to_registry.get(wire_name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.to_wire.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_wire.is_empty()
    }
}

fn sanitize(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() {
        out.push_str("tool");
    }
    // All ASCII at this point, so byte truncation is safe
    out.truncate(MAX_WIRE_NAME);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names_pass_through() {
        let map = ToolNameMap::new(["read_file", "fetch-url"]);
        assert_eq!(map.wire_name("read_file"), Some("read_file"));
        assert_eq!(map.resolve("fetch-url"), Some("fetch-url"));
    }

    #[test]
    fn dots_become_underscores_and_map_back() {
        let map = ToolNameMap::new(["search", "web.search"]);
        assert_eq!(map.wire_name("web.search"), Some("web_search"));
        assert_eq!(map.resolve("web_search"), Some("web.search"));
    }

    #[test]
    fn sanitized_clash_gets_suffix() {
        let map = ToolNameMap::new(["web.search", "web_search", "web search"]);
        assert_eq!(map.wire_name("web.search"), Some("web_search"));
        assert_eq!(map.wire_name("web_search"), Some("web_search_2"));
        assert_eq!(map.wire_name("web search"), Some("web_search_3"));
        assert_eq!(map.resolve("web_search_2"), Some("web_search"));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn long_names_are_truncated_to_64() {
        let long = "x".repeat(80);
        let longer = format!("{long}y");
        let map = ToolNameMap::new([long.as_str(), longer.as_str()]);
        assert_eq!(map.wire_name(&long).unwrap().len(), 64);
        let second = map.wire_name(&longer).unwrap();
        assert_eq!(second.len(), 64);
        assert!(second.ends_with("_2"));
    }

    #[test]
    fn non_ascii_is_replaced() {
        let map = ToolNameMap::new(["météo"]);
        assert_eq!(map.wire_name("météo"), Some("m_t_o"));
    }

    #[test]
    fn unknown_wire_name_does_not_resolve() {
        let map = ToolNameMap::new(["a"]);
        assert_eq!(map.resolve("b"), None);
        assert!(!map.is_empty());
    }
}
