use super::P1Error;
use crate::config::SerialConfig;
use log::{info, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};

/// Blocking source of telegram lines, one call per line
pub struct LineReader<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, buffer: Vec::with_capacity(128) }
    }

    /// Wait for the next complete line. End of stream means the port went
    /// away, which nobody can recover from here.
    pub async fn next_line(&mut self) -> Result<String, P1Error> {
        loop {
            self.buffer.clear();
            let read = self.reader.read_until(b'\n', &mut self.buffer).await?;
            if read == 0 {
                return Err(P1Error::TransportClosed);
            }

            match std::str::from_utf8(&self.buffer) {
                Ok(line) => return Ok(line.trim().to_string()),
                Err(e) => warn!("Dropping line that is not valid UTF-8: {}", e),
            }
        }
    }
}

/// P1 ports are 8N1, only the speed differs between DSMR versions
pub fn open_serial(config: &SerialConfig) -> Result<LineReader<BufReader<SerialStream>>, P1Error> {
    let port = tokio_serial::new(&config.device, config.baudrate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .open_native_async()
        .map_err(|e| P1Error::SerialOpen {
            device: config.device.clone(),
            source: e,
        })?;

    info!("Serial port {} opened with {} baud", config.device, config.baudrate);
    Ok(LineReader::new(BufReader::new(port)))
}
