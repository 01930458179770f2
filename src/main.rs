use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use flotilla::config::{Command, Config};
use flotilla::interrupt::Interrupts;
use flotilla::{logging, select_nodes, Fleet, FlotillaError, SshTransport};

async fn run(cli: &Config) -> Result<ExitCode, FlotillaError> {
    let registry = cli.node_source().load().await?;
    let transport = SshTransport::new(cli.transport());

    let (select, outcomes) = match &cli.command {
        Command::Ssh { node } => {
            let node = registry
                .get(node)
                .ok_or_else(|| FlotillaError::UnknownNode(node.clone()))?;
            let status = transport.login(node).await?;
            // ssh's own exit status is the answer.
            return Ok(match status.code() {
                Some(code) => ExitCode::from(code.clamp(0, 255) as u8),
                None => ExitCode::FAILURE,
            });
        }
        Command::List { select } => {
            for node in &select_nodes(&registry, select.on.as_deref())? {
                println!("{}", node);
            }
            return Ok(ExitCode::SUCCESS);
        }
        Command::Check { select } => {
            let nodes = select_nodes(&registry, select.on.as_deref())?;
            let fleet = Fleet::new(Arc::new(transport));
            (select, fleet.check(&nodes).await)
        }
        Command::Exec {
            select,
            command,
            template,
        } => {
            let nodes = select_nodes(&registry, select.on.as_deref())?;
            let fleet = Fleet::new(Arc::new(transport));
            (select, fleet.exec(&nodes, command.clone(), *template).await)
        }
        Command::Reboot {
            select,
            no_wait,
            poll,
        } => {
            let nodes = select_nodes(&registry, select.on.as_deref())?;
            let fleet = Fleet::new(Arc::new(transport)).with_poller(poll.poller());
            (select, fleet.reboot(&nodes, !no_wait).await)
        }
        Command::Wait { select, poll } => {
            let nodes = select_nodes(&registry, select.on.as_deref())?;
            let fleet = Fleet::new(Arc::new(transport)).with_poller(poll.poller());
            (select, fleet.wait(&nodes).await)
        }
    };

    let failures = outcomes.failures();
    if failures > 0 {
        info!(
            "{} of {} nodes failed (selector: {})",
            failures,
            outcomes.len(),
            select.on.as_deref().unwrap_or("all")
        );
        if cli.fail_on_error {
            return Ok(ExitCode::FAILURE);
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Config::parse();
    logging::init(cli.verbose, cli.quiet);

    let mut interrupts = Interrupts::watch();

    // Dropping `run` aborts every node task and kills their ssh processes.
    tokio::select! {
        result = run(&cli) => match result {
            Ok(code) => code,
            Err(e) => {
                error!("{}", e);
                ExitCode::FAILURE
            }
        },
        interrupt = interrupts.recv() => {
            error!("{}", interrupt);
            ExitCode::from(interrupt.exit_code())
        }
    }
}
