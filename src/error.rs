use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlotillaError {
    #[error("Invalid selector term '{term}': {source}")]
    Selector {
        term: String,
        #[source]
        source: regex::Error,
    },
    #[error("Failed to read node registry {}: {source}", path.display())]
    RegistryIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse node registry: {0}")]
    RegistryParse(#[from] serde_yaml::Error),
    #[error("Node registry command '{command}' failed ({status}): {stderr}")]
    SourceCommand {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("Node '{0}' appears more than once in the registry")]
    DuplicateNode(String),
    #[error("No such node: {0}")]
    UnknownNode(String),
    #[error("Node '{0}' has no target host")]
    MissingHost(String),
    #[error("Failed to execute local command: {0}")]
    LocalCommandError(#[from] std::io::Error),
    #[error("Failed to render command template: {0}")]
    Template(#[from] handlebars::RenderError),
    #[error("Gave up after {0} attempts")]
    PollExhausted(usize),
}
