//! Selecting nodes with `--on` patterns.
//!
//! A selector is a comma-separated list of regular expressions. Each one is
//! matched from the start of a node's name and of each of its tags, and a node
//! is selected when any pattern matches either. A leading `@` on a term is
//! accepted and stripped.

use regex::Regex;
use tracing::{info, warn};

use crate::error::FlotillaError;
use crate::node::{Node, NodeRegistry};

/// One compiled selector term.
#[derive(Debug, Clone)]
pub struct Rule {
    pattern: Regex,
}

impl Rule {
    pub fn new(pattern: &str) -> Result<Self, FlotillaError> {
        // Anchor at the start only; `web` selects `web-01` but not `xweb-01`.
        let pattern = Regex::new(&format!("^(?:{})", pattern)).map_err(|source| {
            FlotillaError::Selector {
                term: pattern.to_string(),
                source,
            }
        })?;
        Ok(Self { pattern })
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.pattern.is_match(name)
    }

    pub fn matches_tag<S: AsRef<str>>(&self, tags: &[S]) -> bool {
        tags.iter().any(|tag| self.pattern.is_match(tag.as_ref()))
    }

    fn matches(&self, node: &Node) -> bool {
        self.matches_name(&node.name) || self.matches_tag(&node.tags)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    rules: Vec<Rule>,
}

impl NodeFilter {
    pub fn parse(selector: &str) -> Result<Self, FlotillaError> {
        let rules = selector
            .trim()
            .split(',')
            .map(str::trim)
            .map(|term| term.strip_prefix('@').unwrap_or(term))
            .filter(|term| !term.is_empty())
            .map(Rule::new)
            .collect::<Result<Vec<_>, _>>()?;

        if rules.is_empty() {
            warn!("Filter \"{}\" is blank and will match nothing", selector);
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn matches(&self, node: &Node) -> bool {
        if self.rules.is_empty() {
            return false;
        }
        self.rules.iter().any(|rule| rule.matches(node))
    }

    /// Returns the matching subset of `nodes`, in registry order.
    pub fn apply(&self, nodes: &NodeRegistry) -> NodeRegistry {
        // A blank selector must never widen into "everything".
        if self.rules.is_empty() {
            return NodeRegistry::new();
        }
        nodes.retain_cloned(|node| self.matches(node))
    }
}

/// Resolves the `--on` argument against the registry and logs the selection.
///
/// `None` selects every node; that decision is made here, before the filter
/// is ever consulted.
pub fn select_nodes(
    nodes: &NodeRegistry,
    selector: Option<&str>,
) -> Result<NodeRegistry, FlotillaError> {
    let selected = match selector {
        Some(selector) => NodeFilter::parse(selector)?.apply(nodes),
        None => nodes.clone(),
    };

    info!("Enumerating nodes..");
    if selected.is_empty() {
        warn!("No hosts selected (0 skipped).");
    } else {
        info!("Selected {} out of {} hosts.", selected.len(), nodes.len());
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> NodeRegistry {
        NodeRegistry::from_nodes(vec![
            Node::new("a", "10.0.0.1").with_tags(["web"]),
            Node::new("b", "10.0.0.2").with_tags(["db"]),
        ])
        .unwrap()
    }

    fn names(nodes: &NodeRegistry) -> Vec<&str> {
        nodes.names().collect()
    }

    #[test]
    fn test_blank_selector_matches_nothing() {
        let nodes = registry();
        for selector in ["", "   ", ",", " , ,", "@", " @ , @"] {
            let filter = NodeFilter::parse(selector).unwrap();
            assert!(filter.rules().is_empty(), "selector {:?}", selector);
            assert!(filter.apply(&nodes).is_empty(), "selector {:?}", selector);
        }
    }

    #[test]
    fn test_name_and_tag_union() {
        let nodes = registry();
        assert_eq!(names(&NodeFilter::parse("a").unwrap().apply(&nodes)), vec!["a"]);
        assert_eq!(names(&NodeFilter::parse("@web").unwrap().apply(&nodes)), vec!["a"]);
        assert_eq!(
            names(&NodeFilter::parse("a,@db").unwrap().apply(&nodes)),
            vec!["a", "b"]
        );
    }

    #[test]
    fn test_at_prefix_also_matches_names() {
        let nodes = registry();
        assert_eq!(names(&NodeFilter::parse("@b").unwrap().apply(&nodes)), vec!["b"]);
    }

    #[test]
    fn test_prefix_anchored() {
        let nodes = NodeRegistry::from_nodes(vec![
            Node::new("web-01", "h1"),
            Node::new("xweb-01", "h2"),
        ])
        .unwrap();
        assert_eq!(
            names(&NodeFilter::parse("web").unwrap().apply(&nodes)),
            vec!["web-01"]
        );
    }

    #[test]
    fn test_alternation_stays_anchored() {
        let rule = Rule::new("web|db").unwrap();
        assert!(rule.matches_name("db-01"));
        assert!(!rule.matches_name("old-db-01"));
    }

    #[test]
    fn test_regex_terms() {
        let nodes = NodeRegistry::from_nodes(vec![
            Node::new("web-01", "h1"),
            Node::new("web-02", "h2"),
            Node::new("web-10", "h3"),
        ])
        .unwrap();
        assert_eq!(
            names(&NodeFilter::parse(" web-0[12] ").unwrap().apply(&nodes)),
            vec!["web-01", "web-02"]
        );
    }

    #[test]
    fn test_order_follows_registry() {
        let nodes = registry();
        assert_eq!(
            names(&NodeFilter::parse("b,a").unwrap().apply(&nodes)),
            vec!["a", "b"]
        );
    }

    #[test]
    fn test_matching_several_rules_selects_once() {
        let nodes = registry();
        let selected = NodeFilter::parse("a,@web,.*").unwrap().apply(&nodes);
        assert_eq!(names(&selected), vec!["a", "b"]);
    }

    #[test]
    fn test_invalid_regex_is_an_error() {
        match NodeFilter::parse("ok,web[") {
            Err(FlotillaError::Selector { term, .. }) => assert_eq!(term, "web["),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_rule_matches_tag() {
        let rule = Rule::new("eu").unwrap();
        assert!(rule.matches_tag(&["us-east", "eu-west"]));
        assert!(!rule.matches_tag(&["us-east"]));
        assert!(!rule.matches_tag::<&str>(&[]));
    }

    #[test]
    fn test_select_nodes_without_selector_keeps_everything() {
        let nodes = registry();
        assert_eq!(select_nodes(&nodes, None).unwrap(), nodes);
        assert!(select_nodes(&nodes, Some("")).unwrap().is_empty());
    }
}
