//! What can be done to a single node.
//!
//! Each action turns every error it meets into an `Outcome::Failure` for its
//! node; nothing is propagated to the caller.

use handlebars::Handlebars;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::FlotillaError;
use crate::node::Node;
use crate::poller::{read_boot_id, Poller};
use crate::report::{Outcome, Progress};
use crate::transport::{RemoteCommand, Transport};

/// Exit status of ssh when the connection drops, which `reboot` usually causes.
pub const SSH_DISCONNECTED: i32 = 255;

/// Runs `uptime` on the node. A failure reads `unavailable`, followed by
/// what ssh or the node said.
pub async fn uptime(transport: &dyn Transport, node: &Node) -> Outcome {
    match transport.run(node, &RemoteCommand::new(["uptime"]), None).await {
        Ok(output) if output.success() => Outcome::Success(output.stdout),
        Ok(output) => {
            let stderr = output.stderr.trim_end();
            debug!("{}: uptime failed ({}): {}", node.name, output.status(), stderr);
            if stderr.is_empty() {
                Outcome::Failure(format!("unavailable ({})", output.status()))
            } else {
                Outcome::Failure(format!("unavailable ({})", stderr))
            }
        }
        Err(e) => {
            debug!("{}: uptime failed: {}", node.name, e);
            Outcome::Failure(format!("unavailable ({})", e))
        }
    }
}

/// Runs `argv` on the node, streaming its stdout to `progress`.
///
/// The payload is the captured stdout; a failure carries stderr.
pub async fn execute(
    transport: &dyn Transport,
    node: &Node,
    argv: Vec<String>,
    progress: &Progress,
) -> Outcome {
    match transport.run(node, &RemoteCommand::new(argv), Some(progress)).await {
        Ok(output) if output.success() => Outcome::Success(output.stdout),
        Ok(output) => {
            let stderr = output.stderr.trim_end();
            if stderr.is_empty() {
                Outcome::Failure(format!("Failed: {}", output.status()))
            } else {
                Outcome::Failure(format!("Failed: {}", stderr))
            }
        }
        Err(e) => Outcome::Failure(format!("Failed: {}", e)),
    }
}

/// Waits until the node answers over ssh. The payload is its boot id.
pub async fn wait_for_node(transport: &dyn Transport, node: &Node, poller: &Poller) -> Outcome {
    match poller.wait_reachable(transport, node).await {
        Ok(boot_id) => {
            info!("{}: reachable", node.name);
            Outcome::Success(boot_id)
        }
        Err(e) => Outcome::Failure(format!("Unreachable: {}", e)),
    }
}

/// Reboots the node and, when `wait` is set, waits until it has booted again.
pub async fn reboot(
    transport: &dyn Transport,
    node: &Node,
    poller: &Poller,
    wait: bool,
    progress: &Progress,
) -> Outcome {
    progress.status("Rebooting");

    if !wait {
        return match initiate_reboot(transport, node).await {
            Ok(()) => Outcome::Success("Reboot initiated".to_string()),
            Err(reason) => Outcome::Failure(reason),
        };
    }

    let old_id = read_boot_id(transport, node).await;
    debug!("{}: boot id before reboot: {:?}", node.name, old_id);

    if let Err(reason) = initiate_reboot(transport, node).await {
        return Outcome::Failure(reason);
    }

    progress.status("Waiting for reboot");
    match poller.wait_rebooted(transport, node, old_id.as_deref()).await {
        Ok(new_id) => {
            debug!("{}: boot id after reboot: {}", node.name, new_id);
            Outcome::Success("Rebooted".to_string())
        }
        Err(e) => Outcome::Failure(format!("Did not come back: {}", e)),
    }
}

async fn initiate_reboot(transport: &dyn Transport, node: &Node) -> Result<(), String> {
    let output = transport
        .run(node, &RemoteCommand::new(["reboot"]), None)
        .await
        .map_err(|e| format!("Failed to reboot: {}", e))?;
    // The connection going away mid-command is what a successful reboot
    // usually looks like.
    match output.code {
        Some(0) | Some(SSH_DISCONNECTED) => Ok(()),
        _ => {
            let stderr = output.stderr.trim_end();
            if stderr.is_empty() {
                Err(format!("Failed to reboot ({})", output.status()))
            } else {
                Err(format!("Failed to reboot: {}", stderr))
            }
        }
    }
}

/// Node attributes available to command templates.
#[derive(Debug, Serialize)]
struct TemplateContext<'a> {
    name: &'a str,
    host: Option<&'a str>,
    port: Option<u16>,
    user: Option<&'a str>,
    tags: &'a [String],
}

pub fn template_registry() -> Handlebars<'static> {
    let mut registry = Handlebars::new();
    registry.set_strict_mode(true);
    // Commands are shell, not HTML.
    registry.register_escape_fn(handlebars::no_escape);
    handlebars_misc_helpers::register(&mut registry);
    registry
}

/// Fills `{{name}}`, `{{host}}`, `{{port}}`, `{{user}}` and `{{tags}}` in each
/// argument.
pub fn render_argv(
    registry: &Handlebars,
    argv: &[String],
    node: &Node,
) -> Result<Vec<String>, FlotillaError> {
    let context = TemplateContext {
        name: &node.name,
        host: node.target_host.as_deref(),
        port: node.target_port,
        user: node.target_user.as_deref(),
        tags: &node.tags,
    };
    argv.iter()
        .map(|arg| Ok(registry.render_template(arg, &context)?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_argv() {
        let registry = template_registry();
        let node = Node::new("web-01", "10.0.0.1").with_tags(["web", "eu"]);
        let argv = vec![
            "hostnamectl".to_string(),
            "set-hostname".to_string(),
            "{{name}}".to_string(),
            "{{host}}-{{#each tags}}{{this}}{{/each}}".to_string(),
            "a && b > {{name}}.log".to_string(),
        ];
        assert_eq!(
            render_argv(&registry, &argv, &node).unwrap(),
            vec![
                "hostnamectl",
                "set-hostname",
                "web-01",
                "10.0.0.1-webeu",
                "a && b > web-01.log"
            ]
        );
    }

    #[test]
    fn test_render_argv_unknown_variable() {
        let registry = template_registry();
        let node = Node::new("web-01", "10.0.0.1");
        let argv = vec!["echo {{nope}}".to_string()];
        assert!(matches!(
            render_argv(&registry, &argv, &node),
            Err(FlotillaError::Template(_))
        ));
    }

    #[test]
    fn test_render_argv_plain_arguments_untouched() {
        let registry = template_registry();
        let node = Node::new("a", "h");
        let argv = vec!["ls".to_string(), "-la".to_string(), "/tmp".to_string()];
        assert_eq!(render_argv(&registry, &argv, &node).unwrap(), argv);
    }
}
