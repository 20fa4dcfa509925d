use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("serial I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("no response within {0} ms")]
    Timeout(u64),
    #[error("device rejected command: {0}")]
    Device(String),
    #[error("connection closed")]
    Closed,
}

/// A synchronous command round trip to the controller board.
///
/// Only one command is ever outstanding; callers await each response before
/// issuing the next.
pub trait CommandExecutor {
    fn execute(
        &mut self,
        command: &str,
    ) -> impl std::future::Future<Output = Result<String, TransportError>>;
}
