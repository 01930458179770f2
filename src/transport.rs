//! Running commands on nodes over ssh.
//!
//! `TransportConfig` builds the ssh command line for a node; `SshTransport`
//! spawns it and drains stdout and stderr concurrently. Everything that talks
//! to nodes goes through the `Transport` trait so it can be replaced in tests.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tracing::debug;

use crate::error::FlotillaError;
use crate::node::Node;
use crate::report::Progress;

/// Options common to every non-interactive invocation.
const BASE_OPTIONS: [&str; 4] = [
    "-o",
    "StrictHostKeyChecking=accept-new",
    "-o",
    "BatchMode=yes",
];

/// How to reach nodes. Passed in explicitly, never read from the environment.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// The ssh executable.
    pub program: String,
    /// Passed as `-F`.
    pub config_file: Option<PathBuf>,
    /// Used only by liveness probes.
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            config_file: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl TransportConfig {
    /// Command line that runs `argv` on `node` without a tty.
    pub fn build(
        &self,
        node: &Node,
        argv: &[String],
        extra_flags: &[String],
    ) -> Result<Vec<String>, FlotillaError> {
        let mut cmd = vec![self.program.clone()];
        cmd.extend(BASE_OPTIONS.iter().map(|s| s.to_string()));
        cmd.push("-T".to_string());
        cmd.extend(extra_flags.iter().cloned());
        self.push_target(&mut cmd, node)?;
        cmd.extend(argv.iter().cloned());
        Ok(cmd)
    }

    /// Command line for an interactive login.
    pub fn build_login(&self, node: &Node) -> Result<Vec<String>, FlotillaError> {
        let mut cmd = vec![self.program.clone()];
        cmd.extend(BASE_OPTIONS.iter().map(|s| s.to_string()));
        self.push_target(&mut cmd, node)?;
        Ok(cmd)
    }

    pub fn connect_timeout_flags(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
        ]
    }

    fn push_target(&self, cmd: &mut Vec<String>, node: &Node) -> Result<(), FlotillaError> {
        let host = node
            .target_host
            .as_ref()
            .ok_or_else(|| FlotillaError::MissingHost(node.name.clone()))?;
        if let Some(config_file) = &self.config_file {
            cmd.push("-F".to_string());
            cmd.push(config_file.display().to_string());
        }
        if let Some(port) = node.target_port {
            cmd.push("-p".to_string());
            cmd.push(port.to_string());
        }
        if let Some(user) = &node.target_user {
            cmd.push("-l".to_string());
            cmd.push(user.clone());
        }
        cmd.push(host.clone());
        Ok(())
    }
}

/// A command to run on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub argv: Vec<String>,
    /// Apply the short connect timeout. Only liveness probes set this.
    pub connect_timeout: bool,
}

impl RemoteCommand {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            connect_timeout: false,
        }
    }

    pub fn with_connect_timeout(mut self) -> Self {
        self.connect_timeout = true;
        self
    }
}

/// What came back from a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl RemoteOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Human-readable exit status.
    pub fn status(&self) -> String {
        match self.code {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Runs `command` on `node` and waits for it to exit.
    ///
    /// When `progress` is given, stdout lines are forwarded to it as they
    /// arrive, in addition to being captured.
    async fn run(
        &self,
        node: &Node,
        command: &RemoteCommand,
        progress: Option<&Progress>,
    ) -> Result<RemoteOutput, FlotillaError>;
}

pub struct SshTransport {
    config: TransportConfig,
}

impl SshTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Opens an interactive session on `node`, inheriting the terminal.
    pub async fn login(&self, node: &Node) -> Result<ExitStatus, FlotillaError> {
        let argv = self.config.build_login(node)?;
        debug!("{} $ {}", node.name, argv.join(" "));
        let mut child = tokio::process::Command::new(&argv[0])
            .args(&argv[1..])
            .kill_on_drop(true)
            .spawn()?;
        Ok(child.wait().await?)
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn run(
        &self,
        node: &Node,
        command: &RemoteCommand,
        progress: Option<&Progress>,
    ) -> Result<RemoteOutput, FlotillaError> {
        let extra_flags = if command.connect_timeout {
            self.config.connect_timeout_flags()
        } else {
            Vec::new()
        };
        let argv = self.config.build(node, &command.argv, &extra_flags)?;
        debug!("{} $ {}", node.name, argv.join(" "));

        // Killed on drop so that an interrupted run leaves nothing behind.
        let mut child = tokio::process::Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (stdout, stderr) = join(
            async {
                match stdout {
                    Some(stdout) => stream_lines(stdout, progress).await,
                    None => Ok(Vec::new()),
                }
            },
            async {
                let mut buf = Vec::new();
                if let Some(mut stderr) = stderr {
                    stderr.read_to_end(&mut buf).await?;
                }
                Ok::<_, std::io::Error>(buf)
            },
        )
        .await;
        let status = child.wait().await?;

        Ok(RemoteOutput {
            code: status.code(),
            stdout: String::from_utf8_lossy(&stdout?).into_owned(),
            stderr: String::from_utf8_lossy(&stderr?).into_owned(),
        })
    }
}

/// Captures everything `stream` produces, forwarding each line to `progress`.
async fn stream_lines<B: AsyncRead + Unpin>(
    stream: B,
    progress: Option<&Progress>,
) -> std::io::Result<Vec<u8>> {
    let mut reader = BufReader::new(stream);
    let mut captured = Vec::new();
    let mut buf = Vec::with_capacity(reader.buffer().len());
    let mut after_cr = false;
    loop {
        read_until2(&mut reader, b'\r', b'\n', &mut buf).await?;
        // An empty buffer means that EOF was reached.
        if buf.is_empty() {
            break;
        }
        captured.extend_from_slice(&buf);
        if let Some(progress) = progress {
            // The `\n` of a `\r\n` pair arrives as its own empty line.
            if !(after_cr && buf == b"\n") {
                let line = String::from_utf8_lossy(&buf);
                progress.line(line.trim_end_matches(['\r', '\n']));
            }
        }
        after_cr = buf.last() == Some(&b'\r');
        buf.clear();
    }
    Ok(captured)
}

/// Reads into `buf` until either delimiter (inclusive) or EOF.
async fn read_until2<B: AsyncRead + Unpin>(
    reader: &mut BufReader<B>,
    delimiter1: u8,
    delimiter2: u8,
    buf: &mut Vec<u8>,
) -> std::io::Result<()> {
    loop {
        let (done, used) = {
            let available = reader.fill_buf().await?;
            if let Some(i) = memchr::memchr2(delimiter1, delimiter2, available) {
                buf.extend_from_slice(&available[..=i]);
                (true, i + 1)
            } else {
                buf.extend_from_slice(available);
                (false, available.len())
            }
        };
        reader.consume(used);
        if done || used == 0 {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(argv: &[&str]) -> Vec<String> {
        argv.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_build_minimal() {
        let config = TransportConfig::default();
        let node = Node::new("web-01", "10.0.0.1");
        let cmd = config.build(&node, &args(&["uptime"]), &[]).unwrap();
        assert_eq!(
            cmd,
            args(&[
                "ssh",
                "-o",
                "StrictHostKeyChecking=accept-new",
                "-o",
                "BatchMode=yes",
                "-T",
                "10.0.0.1",
                "uptime",
            ])
        );
    }

    #[test]
    fn test_build_full() {
        let config = TransportConfig {
            config_file: Some(PathBuf::from("/tmp/ssh_config")),
            connect_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let node = Node::new("web-01", "10.0.0.1")
            .with_port(2222)
            .with_user("root");
        let cmd = config
            .build(
                &node,
                &args(&["cat", "/proc/sys/kernel/random/boot_id"]),
                &config.connect_timeout_flags(),
            )
            .unwrap();
        assert_eq!(
            cmd,
            args(&[
                "ssh",
                "-o",
                "StrictHostKeyChecking=accept-new",
                "-o",
                "BatchMode=yes",
                "-T",
                "-o",
                "ConnectTimeout=5",
                "-F",
                "/tmp/ssh_config",
                "-p",
                "2222",
                "-l",
                "root",
                "10.0.0.1",
                "cat",
                "/proc/sys/kernel/random/boot_id",
            ])
        );
    }

    #[test]
    fn test_build_login_has_no_tty_flag() {
        let config = TransportConfig::default();
        let cmd = config
            .build_login(&Node::new("a", "a.example.com").with_user("admin"))
            .unwrap();
        assert!(!cmd.contains(&"-T".to_string()));
        assert_eq!(cmd.last().map(String::as_str), Some("a.example.com"));
    }

    #[test]
    fn test_build_without_host() {
        let mut node = Node::new("pending", "unused");
        node.target_host = None;
        let result = TransportConfig::default().build(&node, &args(&["true"]), &[]);
        assert!(matches!(result, Err(FlotillaError::MissingHost(name)) if name == "pending"));
    }

    #[tokio::test]
    async fn test_read_until2_splits_on_both_delimiters() {
        let mut reader = BufReader::new(&b"one\rtwo\nthree"[..]);
        let mut buf = Vec::new();
        read_until2(&mut reader, b'\r', b'\n', &mut buf).await.unwrap();
        assert_eq!(buf, b"one\r");
        buf.clear();
        read_until2(&mut reader, b'\r', b'\n', &mut buf).await.unwrap();
        assert_eq!(buf, b"two\n");
        buf.clear();
        read_until2(&mut reader, b'\r', b'\n', &mut buf).await.unwrap();
        assert_eq!(buf, b"three");
        buf.clear();
        read_until2(&mut reader, b'\r', b'\n', &mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_stream_lines_captures_everything() {
        let captured = stream_lines(&b"a\r\nb\n"[..], None).await.unwrap();
        assert_eq!(captured, b"a\r\nb\n");
    }
}
