//! Serial transport to the DUELink controller board.
//!
//! The board runs a line-oriented REPL: a command is written followed by a
//! newline and the board answers with zero or more lines, then a `>` prompt.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use log::{debug, info};

use crate::config::SerialConfig;
use crate::executor::{CommandExecutor, TransportError};

const PROMPT: u8 = b'>';
const ESCAPE: u8 = 0x1b;
const MAX_RESPONSE: usize = 4096;

/// GHI Electronics DUELink USB ids.
pub const DUELINK_VID: u16 = 0x1b9f;
pub const DUELINK_PID: u16 = 0xf300;

/// Byte stream to the board that can drop unread input.
pub trait BoardPort: Read + Write {
    fn discard_input(&mut self) -> std::io::Result<()>;
}

impl BoardPort for Box<dyn serialport::SerialPort> {
    fn discard_input(&mut self) -> std::io::Result<()> {
        self.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }
}

pub struct SerialLink<P> {
    port: P,
    timeout_ms: u64,
}

impl SerialLink<Box<dyn serialport::SerialPort>> {
    pub fn open(port_name: &str, config: &SerialConfig) -> anyhow::Result<Self> {
        info!("Connecting to {} at {} baud", port_name, config.baud_rate());
        let mut port = serialport::new(port_name, config.baud_rate())
            .timeout(config.timeout())
            .flow_control(serialport::FlowControl::None)
            .open()?;
        // CDC devices hold output until DTR is raised.
        port.write_data_terminal_ready(true)?;
        Ok(SerialLink::new(port, config.timeout()))
    }
}

impl<P: BoardPort> SerialLink<P> {
    pub fn new(port: P, timeout: Duration) -> Self {
        SerialLink {
            port,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Interrupts whatever the board is running and waits for its prompt.
    ///
    /// Anything already buffered is dropped first, otherwise a stale prompt
    /// would be taken as the reply to the escape and every later response
    /// would be off by one.
    pub fn synchronize(&mut self) -> Result<(), TransportError> {
        self.port.discard_input()?;
        self.port.write_all(&[ESCAPE])?;
        self.port.flush()?;
        let banner = self.read_until_prompt()?;
        debug!("Board ready ({} bytes before prompt)", banner.len());
        Ok(())
    }

    fn transact(&mut self, command: &str) -> Result<String, TransportError> {
        self.port.write_all(command.as_bytes())?;
        self.port.write_all(b"\n")?;
        self.port.flush()?;

        let raw = self.read_until_prompt()?;
        parse_response(command, &raw)
    }

    fn read_until_prompt(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut raw = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.port.read(&mut byte) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(_) if byte[0] == PROMPT => return Ok(raw),
                Ok(_) => {
                    raw.push(byte[0]);
                    if raw.len() > MAX_RESPONSE {
                        return Err(TransportError::Device(format!(
                            "no prompt after {} bytes",
                            raw.len()
                        )));
                    }
                }
                Err(err) if err.kind() == ErrorKind::TimedOut => {
                    return Err(TransportError::Timeout(self.timeout_ms));
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Picks the reply out of the text preceding the prompt, skipping the echo.
fn parse_response(command: &str, raw: &[u8]) -> Result<String, TransportError> {
    let text = String::from_utf8_lossy(raw);
    let line = text
        .split('\n')
        .map(str::trim)
        .filter(|l| !l.is_empty() && *l != command)
        .last()
        .unwrap_or_default();

    match line.strip_prefix('!') {
        Some(message) => Err(TransportError::Device(message.trim().to_string())),
        None => Ok(line.to_string()),
    }
}

impl<P: BoardPort> CommandExecutor for SerialLink<P> {
    async fn execute(&mut self, command: &str) -> Result<String, TransportError> {
        // Serial I/O blocks; keep it on this task so commands stay strictly
        // one at a time.
        tokio::task::block_in_place(|| self.transact(command))
    }
}

/// First attached DUELink board, if any.
pub fn find_duelink_port() -> Option<String> {
    let ports = serialport::available_ports().ok()?;
    ports.into_iter().find_map(|port| match &port.port_type {
        serialport::SerialPortType::UsbPort(info)
            if info.vid == DUELINK_VID && info.pid == DUELINK_PID =>
        {
            Some(port.port_name)
        }
        _ => None,
    })
}

pub fn list_ports() -> anyhow::Result<()> {
    let ports = serialport::available_ports()?;
    println!("Available serial ports:");
    if ports.is_empty() {
        println!("  (none)");
    }
    for port in ports {
        match &port.port_type {
            serialport::SerialPortType::UsbPort(info) => {
                let marker = if info.vid == DUELINK_VID && info.pid == DUELINK_PID {
                    " [DUELink]"
                } else {
                    ""
                };
                println!(
                    "  {} - USB (VID: 0x{:04x}, PID: 0x{:04x}){}",
                    port.port_name, info.vid, info.pid, marker
                );
                if let Some(manufacturer) = &info.manufacturer {
                    println!("      Manufacturer: {}", manufacturer);
                }
                if let Some(product) = &info.product {
                    println!("      Product: {}", product);
                }
            }
            other => println!("  {} - {:?}", port.port_name, other),
        }
    }
    Ok(())
}
