//! Operator interrupts: Ctrl-C and, on Unix, SIGTERM.
//!
//! Whoever awaits `Interrupts::recv` races it against the run, so that the
//! run future is dropped (and its ssh children killed) before exiting.

use std::fmt;

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    CtrlC,
    Terminate,
}

impl Interrupt {
    /// 128 plus the signal number, as a shell would report it.
    pub fn exit_code(self) -> u8 {
        match self {
            Interrupt::CtrlC => 130,
            Interrupt::Terminate => 143,
        }
    }
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupt::CtrlC => write!(f, "Interrupted"),
            Interrupt::Terminate => write!(f, "Terminated"),
        }
    }
}

pub struct Interrupts {
    #[cfg(unix)]
    terminate: Option<tokio::signal::unix::Signal>,
}

impl Interrupts {
    /// Installs the SIGTERM handler right away, so a signal arriving before
    /// the first `recv` is not lost. Must be called inside a tokio runtime.
    pub fn watch() -> Self {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let terminate = match signal(SignalKind::terminate()) {
                Ok(terminate) => Some(terminate),
                Err(e) => {
                    warn!("Failed to set up SIGTERM handler: {}", e);
                    None
                }
            };
            Self { terminate }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }

    pub async fn recv(&mut self) -> Interrupt {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
                Interrupt::CtrlC
            }
            _ = self.terminated() => Interrupt::Terminate,
        }
    }

    #[cfg(unix)]
    async fn terminated(&mut self) {
        match self.terminate.as_mut() {
            Some(terminate) => {
                if terminate.recv().await.is_none() {
                    std::future::pending::<()>().await;
                }
            }
            None => std::future::pending::<()>().await,
        }
    }

    #[cfg(not(unix))]
    async fn terminated(&mut self) {
        std::future::pending::<()>().await
    }
}
