//! Joins out-of-band resource usage to servers by display name.

use serde_json::Value;

use crate::names::{NameMatch, match_names};
use crate::payload::NumericField;
use crate::snapshot::ServerDetail;

/// One leaf of the monitor's output.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceUsage {
    pub label: String,
    pub server_name: String,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
}

/// Flattened monitor output, ordered by label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceSnapshot {
    pub entries: Vec<ResourceUsage>,
}

impl ResourceSnapshot {
    /// Collect every `{server_name, resources}` leaf, either at the top
    /// level or one level down (`group -> type -> leaf`). Entries without a
    /// server name are ignored, as are entries the monitor flagged as
    /// failed (`success: false` or `server_status: "error"`).
    pub fn from_value(value: &Value) -> Self {
        let mut entries = Vec::new();
        if let Some(top) = value.as_object() {
            for (label, node) in top {
                if is_leaf(node) {
                    entries.extend(leaf(label, node));
                    continue;
                }
                let Some(inner) = node.as_object() else {
                    continue;
                };
                for (kind, child) in inner {
                    entries.extend(leaf(&format!("{label}.{kind}"), child));
                }
            }
        }
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

fn is_leaf(node: &Value) -> bool {
    node.get("server_name").is_some_and(Value::is_string)
}

fn leaf(label: &str, node: &Value) -> Option<ResourceUsage> {
    let server_name = node.get("server_name")?.as_str()?.to_string();
    let resources = node.get("resources");
    let failed = node.get("success").and_then(Value::as_bool) == Some(false)
        || resources
            .and_then(|r| r.get("server_status"))
            .and_then(Value::as_str)
            .is_some_and(|status| status.eq_ignore_ascii_case("error"));
    if failed {
        tracing::debug!(label, server = %server_name, "Skipping failed monitor entry");
        return None;
    }
    let metric = |key: &str| resources.and_then(|r| NumericField::field(r, key).value());
    Some(ResourceUsage {
        label: label.to_string(),
        server_name,
        cpu_percent: metric("cpu_usage_percent"),
        memory_percent: metric("memory_usage_percent"),
    })
}

/// Copy CPU and memory percentages onto matching servers. An exact
/// normalized match is preferred over a word-order match; within each
/// kind the first entry in the snapshot wins. Unmatched servers are left
/// untouched.
pub fn attribute(servers: &mut [ServerDetail], snapshot: &ResourceSnapshot) -> usize {
    let mut matched = 0;
    for server in servers.iter_mut() {
        let find = |kind: NameMatch| {
            snapshot
                .entries
                .iter()
                .find(|e| match_names(&server.name, &e.server_name) == Some(kind))
        };
        let hit = find(NameMatch::Exact)
            .map(|e| (NameMatch::Exact, e))
            .or_else(|| find(NameMatch::Signature).map(|e| (NameMatch::Signature, e)));
        if let Some((how, entry)) = hit {
            tracing::debug!(
                server = %server.name,
                label = %entry.label,
                matched = ?how,
                "Attributed resource usage"
            );
            server.cpu_percent = entry.cpu_percent;
            server.memory_percent = entry.memory_percent;
            matched += 1;
        }
    }
    matched
}
