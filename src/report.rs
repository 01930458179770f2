//! Per-node outcomes and how they are printed.
//!
//! Every line starts with the node name padded to the longest name in the
//! selection, followed by ` | `, so output from many nodes reads as columns.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

use colored::{ColoredString, Colorize};
use colourado::{ColorPalette, PaletteType};
use tokio::task::JoinHandle;

use crate::node::NodeRegistry;

/// Result of running one action against one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Action-specific payload, such as captured stdout or a boot id.
    Success(String),
    /// Why the action failed.
    Failure(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }
}

/// Outcomes of one fan-out, in registry order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcomes(Vec<(String, Outcome)>);

impl Outcomes {
    pub(crate) fn new(outcomes: Vec<(String, Outcome)>) -> Self {
        Self(outcomes)
    }

    pub fn get(&self, name: &str) -> Option<&Outcome> {
        self.0
            .iter()
            .find(|(node, _)| node == name)
            .map(|(_, outcome)| outcome)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Outcome)> {
        self.0.iter().map(|(name, outcome)| (name.as_str(), outcome))
    }

    pub fn failures(&self) -> usize {
        self.0.iter().filter(|(_, outcome)| outcome.is_failure()).count()
    }
}

/// Something a node reported while its action was still running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A line of the remote command's output.
    Line { node: String, text: String },
    /// A step of the action, e.g. `Rebooting`.
    Status { node: String, text: String },
}

/// Per-node handle for sending progress to the printer.
#[derive(Debug, Clone)]
pub struct Progress {
    node: String,
    tx: flume::Sender<ProgressEvent>,
}

impl Progress {
    pub fn new(node: impl Into<String>, tx: flume::Sender<ProgressEvent>) -> Self {
        Self {
            node: node.into(),
            tx,
        }
    }

    pub fn line(&self, text: &str) {
        self.send(ProgressEvent::Line {
            node: self.node.clone(),
            text: text.to_string(),
        });
    }

    pub fn status(&self, text: &str) {
        self.send(ProgressEvent::Status {
            node: self.node.clone(),
            text: text.to_string(),
        });
    }

    fn send(&self, event: ProgressEvent) {
        // The printer only goes away once every action has finished.
        let _ = self.tx.send(event);
    }
}

/// Where report lines go. Shared between the printer task and the final
/// report so that lines are never interleaved.
pub type SharedWriter = Arc<Mutex<dyn Write + Send>>;

pub fn stdout_writer() -> SharedWriter {
    Arc::new(Mutex::new(std::io::stdout()))
}

fn green(text: &str) -> ColoredString {
    text.green()
}

fn red(text: &str) -> ColoredString {
    text.red()
}

pub struct Reporter {
    width: usize,
    colors: HashMap<String, (u8, u8, u8)>,
    show_payload: bool,
}

impl Reporter {
    pub fn new(nodes: &NodeRegistry) -> Self {
        let mut colors = HashMap::with_capacity(nodes.len());
        if !nodes.is_empty() {
            let palette = ColorPalette::new(nodes.len() as u32, PaletteType::Pastel, false);
            for (name, color) in nodes.names().zip(palette.colors) {
                let r = (color.red * 255.0) as u8;
                let g = (color.green * 255.0) as u8;
                let b = (color.blue * 255.0) as u8;
                colors.insert(name.to_string(), (r, g, b));
            }
        }
        Self {
            width: nodes.pad_width(),
            colors,
            show_payload: true,
        }
    }

    /// Whether success lines show the payload or just `Succeeded`. Turned off
    /// when the output was already streamed.
    pub fn show_payload(mut self, show: bool) -> Self {
        self.show_payload = show;
        self
    }

    pub fn width(&self) -> usize {
        self.width
    }

    fn label(&self, name: &str) -> String {
        format!("{:<width$}", name, width = self.width)
    }

    fn continuation(&self, lines: std::str::Lines<'_>, paint: fn(&str) -> ColoredString) -> String {
        lines
            .map(|line| format!("\n{} | {}", self.label(""), paint(line.trim_end())))
            .collect()
    }

    /// The line reported for one node once its action is done.
    pub fn render_line(&self, name: &str, outcome: &Outcome) -> String {
        let (label, paint): (ColoredString, fn(&str) -> ColoredString) = match outcome {
            Outcome::Success(_) => (self.label(name).green().bold(), green),
            Outcome::Failure(_) => (self.label(name).red().bold(), red),
        };
        let text = match outcome {
            Outcome::Success(_) if !self.show_payload => "Succeeded",
            Outcome::Success(text) | Outcome::Failure(text) => text.trim_end(),
        };
        let mut lines = text.lines();
        let first = lines.next().unwrap_or("");
        format!(
            "{} | {}{}",
            label,
            paint(first.trim_end()),
            self.continuation(lines, paint)
        )
    }

    /// The closing line, aligned with the node lines.
    pub fn render_summary(&self, outcomes: &Outcomes) -> String {
        let failures = outcomes.failures();
        let text = if failures == 0 {
            "All done!".green()
        } else {
            format!("Done, {} of {} failed.", failures, outcomes.len()).red()
        };
        format!("{} | {}", self.label(""), text)
    }

    /// A progress line, with the node name in its own color.
    pub fn render_progress(&self, event: &ProgressEvent) -> String {
        let (node, text) = match event {
            ProgressEvent::Line { node, text } => (node, text.normal()),
            ProgressEvent::Status { node, text } => (node, text.italic()),
        };
        let label = match self.colors.get(node) {
            Some(&(r, g, b)) => self.label(node).truecolor(r, g, b).bold(),
            None => self.label(node).bold(),
        };
        format!("{} | {}", label, text)
    }

    pub fn write_report<W: Write + ?Sized>(
        &self,
        outcomes: &Outcomes,
        out: &mut W,
    ) -> std::io::Result<()> {
        for (name, outcome) in outcomes.iter() {
            writeln!(out, "{}", self.render_line(name, outcome))?;
        }
        writeln!(out, "{}", self.render_summary(outcomes))?;
        out.flush()
    }

    /// Spawns the task that prints progress events as they arrive. The
    /// returned sender is cloned into per-node `Progress` handles; the task
    /// ends once every clone is dropped.
    pub fn spawn_printer(
        self: Arc<Self>,
        out: SharedWriter,
    ) -> (flume::Sender<ProgressEvent>, JoinHandle<()>) {
        let (tx, rx) = flume::unbounded::<ProgressEvent>();
        let reporter = self;
        let printer = tokio::spawn(async move {
            while let Ok(event) = rx.recv_async().await {
                let line = reporter.render_progress(&event);
                if let Ok(mut guard) = out.lock() {
                    let _ = writeln!(guard, "{}", line);
                    let _ = guard.flush();
                }
            }
        });
        (tx, printer)
    }
}
