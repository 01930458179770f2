//! The fleet-wide commands.
//!
//! Each command fans one action out over the selected nodes, prints progress
//! while the actions run, and prints one line per node plus a summary once
//! they have all finished.

use std::sync::Arc;

use tracing::warn;

use crate::actions;
use crate::node::{Node, NodeRegistry};
use crate::poller::Poller;
use crate::report::{stdout_writer, Outcome, Outcomes, Progress, Reporter, SharedWriter};
use crate::runner::run_for_each;
use crate::transport::Transport;

pub struct Fleet {
    transport: Arc<dyn Transport>,
    poller: Poller,
    out: SharedWriter,
}

impl Fleet {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            poller: Poller::default(),
            out: stdout_writer(),
        }
    }

    pub fn with_poller(mut self, poller: Poller) -> Self {
        self.poller = poller;
        self
    }

    /// Sends the report somewhere other than stdout.
    pub fn with_output(mut self, out: SharedWriter) -> Self {
        self.out = out;
        self
    }

    /// Prints each node's `uptime`, or why it is unavailable.
    pub async fn check(&self, nodes: &NodeRegistry) -> Outcomes {
        let reporter = Reporter::new(nodes);
        let transport = Arc::clone(&self.transport);
        let outcomes = run_for_each(nodes, |node| {
            let transport = Arc::clone(&transport);
            async move { actions::uptime(transport.as_ref(), &node).await }
        })
        .await;
        self.report(&reporter, &outcomes);
        outcomes
    }

    /// Runs `argv` on every node, printing output as it arrives.
    ///
    /// With `template`, each argument is first rendered against the node.
    pub async fn exec(&self, nodes: &NodeRegistry, argv: Vec<String>, template: bool) -> Outcomes {
        let reporter = Arc::new(Reporter::new(nodes).show_payload(false));
        let (tx, printer) = Arc::clone(&reporter).spawn_printer(Arc::clone(&self.out));
        let transport = Arc::clone(&self.transport);
        let registry = Arc::new(actions::template_registry());

        let outcomes = run_for_each(nodes, |node: Node| {
            let transport = Arc::clone(&transport);
            let registry = Arc::clone(&registry);
            let progress = Progress::new(node.name.clone(), tx.clone());
            let argv = argv.clone();
            async move {
                let argv = if template {
                    match actions::render_argv(&registry, &argv, &node) {
                        Ok(argv) => argv,
                        Err(e) => return Outcome::Failure(format!("Failed: {}", e)),
                    }
                } else {
                    argv
                };
                actions::execute(transport.as_ref(), &node, argv, &progress).await
            }
        })
        .await;

        drop(tx);
        let _ = printer.await;
        self.report(&reporter, &outcomes);
        outcomes
    }

    /// Reboots every node; with `wait`, returns once all have booted again.
    pub async fn reboot(&self, nodes: &NodeRegistry, wait: bool) -> Outcomes {
        let reporter = Arc::new(Reporter::new(nodes));
        let (tx, printer) = Arc::clone(&reporter).spawn_printer(Arc::clone(&self.out));
        let transport = Arc::clone(&self.transport);
        let poller = self.poller;

        let outcomes = run_for_each(nodes, |node: Node| {
            let transport = Arc::clone(&transport);
            let progress = Progress::new(node.name.clone(), tx.clone());
            async move { actions::reboot(transport.as_ref(), &node, &poller, wait, &progress).await }
        })
        .await;

        drop(tx);
        let _ = printer.await;
        self.report(&reporter, &outcomes);
        outcomes
    }

    /// Returns once every node answers over ssh.
    pub async fn wait(&self, nodes: &NodeRegistry) -> Outcomes {
        let reporter = Reporter::new(nodes);
        let transport = Arc::clone(&self.transport);
        let poller = self.poller;
        let outcomes = run_for_each(nodes, |node| {
            let transport = Arc::clone(&transport);
            async move { actions::wait_for_node(transport.as_ref(), &node, &poller).await }
        })
        .await;
        self.report(&reporter, &outcomes);
        outcomes
    }

    fn report(&self, reporter: &Reporter, outcomes: &Outcomes) {
        let Ok(mut guard) = self.out.lock() else {
            warn!("Report output is unavailable");
            return;
        };
        if let Err(e) = reporter.write_report(outcomes, &mut *guard) {
            warn!("Failed to write report: {}", e);
        }
    }
}
