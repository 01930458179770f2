//! Flotilla: Run commands across a fleet of nodes over SSH.

// Serde helper module.
mod serde;
// Per-node actions.
pub mod actions;
// Command line arguments and configuration.
pub mod config;
// Error handling.
pub mod error;
// Selecting nodes by name and tag.
pub mod filter;
// Fleet-wide commands.
pub mod fleet;
// Ctrl-C and SIGTERM.
pub mod interrupt;
// Log setup.
pub mod logging;
// How to parse and represent nodes.
pub mod node;
// Waiting for nodes to come (back) up.
pub mod poller;
// Outcomes, progress and the printed report.
pub mod report;
// Concurrent fan-out over nodes.
pub mod runner;
// Running commands on nodes over ssh.
pub mod transport;

pub use config::{Command, Config};
pub use error::FlotillaError;
pub use filter::{select_nodes, NodeFilter, Rule};
pub use fleet::Fleet;
pub use node::{parse_registry, Node, NodeRegistry, NodeSource};
pub use poller::Poller;
pub use report::{Outcome, Outcomes, Progress, Reporter, SharedWriter};
pub use runner::run_for_each;
pub use transport::{RemoteCommand, RemoteOutput, SshTransport, Transport, TransportConfig};
