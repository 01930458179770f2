//! Fanning one action out over a set of nodes.
//!
//! Every node gets its own tokio task. Tasks share nothing but the transport
//! they are handed; each produces exactly one `Outcome`, and a failing or
//! panicking task only affects its own node.

use std::future::Future;

use futures::future::join_all;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error};

use crate::node::{Node, NodeRegistry};
use crate::report::{Outcome, Outcomes};

/// Tasks that are aborted when dropped, so that interrupting a run cannot
/// leave work running in the background.
struct TaskSet {
    tasks: Vec<(String, JoinHandle<Outcome>)>,
}

impl TaskSet {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            tasks: Vec::with_capacity(capacity),
        }
    }

    fn push(&mut self, name: String, handle: JoinHandle<Outcome>) {
        self.tasks.push((name, handle));
    }

    async fn join(mut self) -> Outcomes {
        let results = join_all(self.tasks.iter_mut().map(|(_, handle)| handle)).await;
        let outcomes = self
            .tasks
            .iter()
            .zip(results)
            .map(|((name, _), result)| (name.clone(), task_outcome(name, result)))
            .collect();
        Outcomes::new(outcomes)
    }
}

impl Drop for TaskSet {
    fn drop(&mut self) {
        for (_, handle) in &self.tasks {
            handle.abort();
        }
    }
}

fn task_outcome(name: &str, result: Result<Outcome, JoinError>) -> Outcome {
    match result {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => {
            error!("{}: action panicked", name);
            Outcome::Failure("Internal error: action panicked".to_string())
        }
        Err(_) => Outcome::Failure("Cancelled".to_string()),
    }
}

/// Runs `action` once for every node, all at the same time, and waits for all
/// of them.
///
/// The outcomes come back in registry order regardless of which node finished
/// first. Dropping the returned future aborts every task that is still
/// running.
pub async fn run_for_each<F, Fut>(nodes: &NodeRegistry, action: F) -> Outcomes
where
    F: Fn(Node) -> Fut,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    let mut tasks = TaskSet::with_capacity(nodes.len());
    for node in nodes {
        debug!("{}: starting", node.name);
        tasks.push(node.name.clone(), tokio::spawn(action(node.clone())));
    }
    tasks.join().await
}
