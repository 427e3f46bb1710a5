//! The cancellation token threaded through the orchestrator and every
//! worker (spec §5 "Cancellation semantics", §9 "A context/cancellation
//! token propagated down; `runStep` wires it to SIGTERM on the child
//! subprocess").

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A cheaply cloneable flag. Cloning shares the same underlying flag, so
/// cancelling any clone cancels all of them.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Install SIGINT/SIGTERM handlers that cancel `token` (spec §4.7.1).
/// Spawns a background thread that blocks on the signal iterator for the
/// lifetime of the process; intended to be called once at startup.
#[cfg(unix)]
pub fn install_signal_handlers(token: CancellationToken) -> std::io::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    std::thread::spawn(move || {
        for sig in signals.forever() {
            match sig {
                SIGINT => {
                    tracing::info!("received SIGINT, cancelling");
                    token.cancel();
                }
                SIGTERM => {
                    tracing::info!("received SIGTERM, cancelling");
                    token.cancel();
                }
                _ => {}
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
pub fn install_signal_handlers(_token: CancellationToken) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let a = CancellationToken::new();
        let b = a.clone();
        assert!(!b.is_cancelled());
        a.cancel();
        assert!(b.is_cancelled());
    }
}
