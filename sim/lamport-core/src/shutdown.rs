use tokio_util::sync::CancellationToken;

/// A handle which can be used to stop a running machine.
/// Cloned handles are connected: stopping any one of them stops them all.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Creates a new active shutdown.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handle that is stopped whenever `self` is, but which can also
    /// be stopped on its own without affecting `self`.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Signals every connected handle. Calling this more than once is harmless.
    pub fn shut_down(&self) {
        self.token.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Waits until the shutdown is signalled. Returns immediately if it
    /// already was.
    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await
    }
}

/// Why a machine's tick loop stopped.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ExitStatus {
    /// The configured run duration elapsed.
    Elapsed,
    /// The machine was stopped through its [`Shutdown`] before the duration
    /// elapsed.
    Stopped,
}
