use std::io;
use std::io::{ BufRead, BufReader, Read, Write };
use std::time::Duration;

use serialport::SerialPort;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Lap tracking hardware not found at {port}")]
    NotFound {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Serial I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Line oriented access to the lap counter.
///
/// `read_line` blocks for at most the transport's read timeout and returns
/// `Ok(None)` when nothing complete arrived in that window.
pub trait LineTransport: Send {
    fn read_line(&mut self) -> io::Result<Option<String>>;
    fn write_command(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// Splits a byte stream into trimmed lines. A line cut off by a read timeout
/// is kept and completed by later reads.
pub struct LineReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R) -> LineReader<R> {
        LineReader { reader: BufReader::new(inner), pending: Vec::new() }
    }

    pub fn get_mut(&mut self) -> &mut R {
        self.reader.get_mut()
    }

    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        match self.reader.read_until(b'\n', &mut self.pending) {
            Ok(0) => Ok(None),
            Ok(_) if self.pending.ends_with(b"\n") => {
                let raw = std::mem::take(&mut self.pending);
                Ok(Some(String::from_utf8_lossy(&raw).trim().to_string()))
            },
            Ok(_) => Ok(None),
            // read_until leaves the bytes it got before the error in `pending`.
            Err(err) if err.kind() == io::ErrorKind::TimedOut || err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }
}

pub struct SerialConnection {
    port_name: String,
    lines: LineReader<Box<dyn SerialPort>>,
}

impl SerialConnection {
    pub fn open(port_name: &str, baud_rate: u32, read_timeout: Duration) -> Result<SerialConnection, ConnectionError> {
        debug!("Opening serial connection to {} at {} baud", port_name, baud_rate);

        let port = serialport::new(port_name, baud_rate)
            .timeout(read_timeout)
            .open()
            .map_err(|source| ConnectionError::NotFound { port: port_name.to_string(), source })?;

        info!("Successfully connected to hardware at {}", port_name);
        Ok(SerialConnection {
            port_name: port_name.to_string(),
            lines: LineReader::new(port),
        })
    }
}

impl Drop for SerialConnection {
    fn drop(&mut self) {
        debug!("Closing serial connection to {}", self.port_name);
    }
}

impl LineTransport for SerialConnection {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let line = self.lines.read_line()?;
        if let Some(line) = &line {
            debug!("Read line from serial: {:?}", line);
        }
        Ok(line)
    }

    fn write_command(&mut self, bytes: &[u8]) -> io::Result<()> {
        let port = self.lines.get_mut();
        port.write_all(bytes)?;
        port.flush()
    }
}
