//! Fleet nodes and the registry they are selected from.
//!
//! The registry is produced fresh on every invocation, either from a file or
//! from the output of a deployment tool, and is never mutated afterwards.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;

use itertools::Itertools;
use serde::{Deserialize, Deserializer};
use tracing::debug;
use void::Void;

use crate::error::FlotillaError;
use crate::serde::{optional_port, ordered_entries, string_or_mapping};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Registry key.
    pub name: String,
    /// Operator-assigned labels.
    pub tags: Vec<String>,
    /// Address handed to ssh. `None` for nodes that are not provisioned yet.
    pub target_host: Option<String>,
    pub target_port: Option<u16>,
    pub target_user: Option<String>,
}

impl Node {
    pub fn new(name: impl Into<String>, target_host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: Vec::new(),
            target_host: Some(target_host.into()),
            target_port: None,
            target_user: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.target_port = Some(port);
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.target_user = Some(user.into());
        self
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(host) = &self.target_host {
            write!(f, " (")?;
            if let Some(user) = &self.target_user {
                write!(f, "{}@", user)?;
            }
            write!(f, "{}", host)?;
            if let Some(port) = self.target_port {
                write!(f, ":{}", port)?;
            }
            write!(f, ")")?;
        }
        if !self.tags.is_empty() {
            write!(f, " [{}]", self.tags.iter().join(", "))?;
        }
        Ok(())
    }
}

/// Name-keyed set of nodes that iterates in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeRegistry {
    nodes: Vec<Node>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry, rejecting repeated names.
    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Result<Self, FlotillaError> {
        let mut registry = Self::new();
        for node in nodes {
            registry.insert(node)?;
        }
        Ok(registry)
    }

    pub fn insert(&mut self, node: Node) -> Result<(), FlotillaError> {
        if self.get(&node.name).is_some() {
            return Err(FlotillaError::DuplicateNode(node.name));
        }
        self.nodes.push(node);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.name == name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Node> {
        self.nodes.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|node| node.name.as_str())
    }

    /// Width used to left-align node names in reports.
    ///
    /// Falls back to the width of `ERROR` so that an empty selection still
    /// lines up with the summary.
    pub fn pad_width(&self) -> usize {
        self.names()
            .map(str::len)
            .max()
            .unwrap_or("ERROR".len())
    }

    /// Keeps the nodes for which `predicate` holds. Names stay unique, so no
    /// re-validation is needed.
    pub(crate) fn retain_cloned(&self, predicate: impl Fn(&Node) -> bool) -> Self {
        Self {
            nodes: self
                .nodes
                .iter()
                .filter(|node| predicate(node))
                .cloned()
                .collect(),
        }
    }
}

impl<'a> IntoIterator for &'a NodeRegistry {
    type Item = &'a Node;
    type IntoIter = std::slice::Iter<'a, Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}

#[derive(Debug, Deserialize)]
struct NodeSpec(#[serde(deserialize_with = "string_or_mapping")] NodeSpecInner);

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeSpecInner {
    #[serde(default)]
    target_host: Option<String>,
    #[serde(default, deserialize_with = "optional_port")]
    target_port: Option<u16>,
    #[serde(default)]
    target_user: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

impl FromStr for NodeSpecInner {
    type Err = Void;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self {
            target_host: Some(s.to_string()),
            ..Default::default()
        })
    }
}

impl<'de> Deserialize<'de> for NodeRegistry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let entries: Vec<(String, NodeSpec)> = ordered_entries(deserializer)?;
        let nodes = entries
            .into_iter()
            .map(|(name, NodeSpec(spec))| Node {
                name,
                tags: spec.tags.unwrap_or_default(),
                target_host: spec.target_host,
                target_port: spec.target_port,
                target_user: spec.target_user,
            })
            .collect();
        Ok(Self { nodes })
    }
}

/// Parses a node document.
///
/// Accepts either `{ nodes: { <name>: <node>, .. }, .. }` (the shape of a
/// deployment tool's output, other top-level keys are ignored) or a bare
/// mapping of nodes. A node is a bare host string or a mapping with
/// `targetHost`, `targetPort`, `targetUser` and `tags`.
pub fn parse_registry(text: &str) -> Result<NodeRegistry, FlotillaError> {
    let document: serde_yaml::Value = serde_yaml::from_str(text)?;
    if document.is_null() {
        return Ok(NodeRegistry::new());
    }
    let nodes = match document.get("nodes") {
        Some(nodes) if nodes.is_mapping() => nodes.clone(),
        Some(nodes) if nodes.is_null() => return Ok(NodeRegistry::new()),
        _ => document,
    };
    Ok(serde_yaml::from_value(nodes)?)
}

/// Where the node registry comes from.
#[derive(Debug, Clone)]
pub enum NodeSource {
    /// A YAML or JSON document on disk.
    File(PathBuf),
    /// A local command whose stdout is the document.
    Command(Vec<String>),
}

impl NodeSource {
    pub async fn load(&self) -> Result<NodeRegistry, FlotillaError> {
        let text = match self {
            NodeSource::File(path) => {
                tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| FlotillaError::RegistryIo {
                        path: path.clone(),
                        source,
                    })?
            }
            NodeSource::Command(argv) => run_source_command(argv).await?,
        };
        let registry = parse_registry(&text)?;
        debug!(
            "Nodes detected:\n{}",
            registry.iter().map(|node| format!("  {}", node)).join("\n")
        );
        Ok(registry)
    }
}

async fn run_source_command(argv: &[String]) -> Result<String, FlotillaError> {
    let Some((program, args)) = argv.split_first() else {
        return Ok(String::new());
    };
    let output = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;
    if !output.status.success() {
        return Err(FlotillaError::SourceCommand {
            command: argv.join(" "),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
