//! Configuration for Flotilla.
//!
//! Holds clap structs for command line arguments and flags, and turns them
//! into the node source, transport and poller the commands run with.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::node::NodeSource;
use crate::poller::Poller;
use crate::transport::TransportConfig;

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Config {
    /// Node registry file (YAML or JSON)
    #[arg(long, short = 'n', env = "FLOTILLA_NODES", default_value = "nodes.yaml", global = true)]
    pub nodes: PathBuf,

    /// Shell command printing the node registry, used instead of --nodes
    /// (e.g. 'terraform output -json teraflops')
    #[arg(long, value_name = "COMMAND", global = true)]
    pub nodes_command: Option<String>,

    /// ssh config file passed to every ssh invocation
    #[arg(long, env = "SSH_CONFIG_FILE", global = true)]
    pub ssh_config: Option<PathBuf>,

    /// Connect timeout in seconds for reachability probes
    #[arg(long, default_value = "10", global = true)]
    pub connect_timeout: u64,

    /// Exit with a non-zero status when any node fails
    #[arg(long, global = true)]
    pub fail_on_error: bool,

    /// More logging (-v: debug, -vv: trace)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(long, short, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the selected nodes
    List {
        #[command(flatten)]
        select: Selection,
    },
    /// Connect to each node and print the output of `uptime`
    Check {
        #[command(flatten)]
        select: Selection,
    },
    /// Execute a command on each node
    #[command(alias = "ssh-for-each")]
    Exec {
        #[command(flatten)]
        select: Selection,

        /// Render {{name}}, {{host}}, {{port}}, {{user}} and {{tags}} in the
        /// command for each node
        #[arg(long)]
        template: bool,

        /// Command to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Reboot nodes and wait until they are up again
    Reboot {
        #[command(flatten)]
        select: Selection,

        /// Do not wait until the nodes are up again
        #[arg(long)]
        no_wait: bool,

        #[command(flatten)]
        poll: PollArgs,
    },
    /// Wait until nodes accept ssh connections
    Wait {
        #[command(flatten)]
        select: Selection,

        #[command(flatten)]
        poll: PollArgs,
    },
    /// Log in on a node
    Ssh {
        /// Name of the node
        node: String,
    },
}

#[derive(Args, Debug, Default)]
pub struct Selection {
    /// Select nodes by comma-separated patterns matched against names and
    /// tags (e.g. 'web-,@db')
    #[arg(long, value_name = "NODES")]
    pub on: Option<String>,
}

#[derive(Args, Debug)]
pub struct PollArgs {
    /// Seconds between two probes of the same node
    #[arg(long, default_value = "2")]
    pub poll_interval: u64,

    /// Give up on a node after this many probes (default: never)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_attempts: Option<u64>,
}

impl PollArgs {
    pub fn poller(&self) -> Poller {
        let poller = Poller::new(Duration::from_secs(self.poll_interval));
        match self.max_attempts {
            Some(max) => poller.with_max_attempts(max as usize),
            None => poller,
        }
    }
}

impl Config {
    pub fn node_source(&self) -> NodeSource {
        match &self.nodes_command {
            Some(command) => NodeSource::Command(vec![
                "sh".to_string(),
                "-c".to_string(),
                command.clone(),
            ]),
            None => NodeSource::File(self.nodes.clone()),
        }
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            config_file: self.ssh_config.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exec() {
        let config = Config::try_parse_from([
            "flotilla",
            "ssh-for-each",
            "--on",
            "web,@db",
            "--",
            "systemctl",
            "restart",
            "nginx",
        ])
        .unwrap();
        match config.command {
            Command::Exec {
                select, command, template, ..
            } => {
                assert_eq!(select.on.as_deref(), Some("web,@db"));
                assert_eq!(command, vec!["systemctl", "restart", "nginx"]);
                assert!(!template);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_exec_hyphen_arguments() {
        let config = Config::try_parse_from(["flotilla", "exec", "ls", "-la"]).unwrap();
        match config.command {
            Command::Exec { command, .. } => assert_eq!(command, vec!["ls", "-la"]),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_reboot_defaults() {
        let config = Config::try_parse_from(["flotilla", "reboot"]).unwrap();
        match config.command {
            Command::Reboot { no_wait, poll, select } => {
                assert!(!no_wait);
                assert!(select.on.is_none());
                assert_eq!(poll.poller(), Poller::default());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_bounded_wait() {
        let config = Config::try_parse_from([
            "flotilla",
            "wait",
            "--poll-interval",
            "5",
            "--max-attempts",
            "3",
        ])
        .unwrap();
        match config.command {
            Command::Wait { poll, .. } => {
                let poller = poll.poller();
                assert_eq!(poller.interval, Duration::from_secs(5));
                assert_eq!(poller.max_attempts, Some(3));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_zero_max_attempts_is_rejected() {
        assert!(Config::try_parse_from(["flotilla", "wait", "--max-attempts", "0"]).is_err());
        assert!(Config::try_parse_from(["flotilla", "reboot", "--max-attempts", "1"]).is_ok());
    }

    #[test]
    fn test_transport_config() {
        let config = Config::try_parse_from([
            "flotilla",
            "check",
            "--ssh-config",
            "/tmp/ssh_config",
            "--connect-timeout",
            "3",
        ])
        .unwrap();
        let transport = config.transport();
        assert_eq!(transport.program, "ssh");
        assert_eq!(transport.config_file, Some(PathBuf::from("/tmp/ssh_config")));
        assert_eq!(transport.connect_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_nodes_command_wins() {
        let config = Config::try_parse_from([
            "flotilla",
            "list",
            "--nodes-command",
            "terraform output -json teraflops",
        ])
        .unwrap();
        match config.node_source() {
            NodeSource::Command(argv) => {
                assert_eq!(argv, vec!["sh", "-c", "terraform output -json teraflops"])
            }
            other => panic!("unexpected source: {:?}", other),
        }
    }

    #[test]
    fn test_exec_requires_command() {
        assert!(Config::try_parse_from(["flotilla", "exec"]).is_err());
    }
}
