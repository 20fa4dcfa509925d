use log::debug;

use crate::commands::Command;
use crate::executor::{CommandExecutor, TransportError};

/// Shared command channel to several addressed peripherals.
///
/// Selecting a device costs a round trip, so the last selected address is
/// cached and `sel` is only sent when the target changes.
pub struct DeviceBus<E> {
    executor: E,
    current: Option<u8>,
}

impl<E: CommandExecutor> DeviceBus<E> {
    pub fn new(executor: E) -> Self {
        DeviceBus {
            executor,
            current: None,
        }
    }

    #[cfg(test)]
    pub fn current_address(&self) -> Option<u8> {
        self.current
    }

    pub async fn ensure_selected(&mut self, address: u8) -> Result<(), TransportError> {
        if self.current == Some(address) {
            return Ok(());
        }
        // Unknown until the board acknowledges.
        self.current = None;
        self.round_trip(&Command::Select(address)).await?;
        self.current = Some(address);
        Ok(())
    }

    pub async fn send(&mut self, address: u8, command: &Command) -> Result<String, TransportError> {
        self.ensure_selected(address).await?;
        self.round_trip(command).await
    }

    async fn round_trip(&mut self, command: &Command) -> Result<String, TransportError> {
        let line = command.to_string();
        let response = self.executor.execute(&line).await?;
        debug!("{} -> {:?}", line, response);
        Ok(response)
    }

    #[cfg(test)]
    pub fn executor(&self) -> &E {
        &self.executor
    }
}
