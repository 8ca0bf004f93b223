use serialport::SerialPort;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::config::ScopeConfig;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Timeout error: no data from the instrument within {after:?}")]
    Timeout { after: Duration },

    #[error("Connection closed by the instrument")]
    Closed,

    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Cannot parse response '{response}' to '{command}' as numbers")]
    Parse { command: String, response: String },
}

impl TransportError {
    /// Errors worth one more read after a pause.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Io(_))
    }
}

/// Byte-level link to one instrument.
///
/// Implementors provide raw reads and writes; the SCPI conveniences
/// (`write`, `query`, `query_ascii_values`) are built on top of them.
pub trait InstrumentTransport {
    fn write_raw(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// One blocking read. Returns whatever the instrument delivered, at least one byte.
    fn read_raw(&mut self) -> Result<Vec<u8>, TransportError>;

    fn timeout(&self) -> Duration;

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError>;

    fn query_delay(&self) -> Duration;

    /// Send one newline-terminated command.
    fn write(&mut self, command: &str) -> Result<(), TransportError> {
        log::debug!("-> {}", command);
        let mut line = Vec::with_capacity(command.len() + 1);
        line.extend_from_slice(command.as_bytes());
        line.push(b'\n');
        self.write_raw(&line)
    }

    /// Read until the response ends with a newline.
    ///
    /// A read holding nothing but line terminators is the pad byte of an
    /// earlier binary block, not an answer, and is skipped.
    fn read_message(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut message = self.read_raw()?;
        while message.iter().all(|b| matches!(b, b'\n' | b'\r')) {
            message = self.read_raw()?;
        }
        while message.last() != Some(&b'\n') {
            message.extend(self.read_raw()?);
        }
        Ok(message)
    }

    fn query(&mut self, command: &str) -> Result<String, TransportError> {
        self.write(command)?;
        let delay = self.query_delay();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        let response = String::from_utf8(self.read_message()?)?;
        let response = response.trim().to_string();
        log::debug!("<- {}", response);
        Ok(response)
    }

    fn query_ascii_values(&mut self, command: &str) -> Result<Vec<f64>, TransportError> {
        let response = self.query(command)?;
        parse_ascii_values(command, &response)
    }
}

impl<T: InstrumentTransport + ?Sized> InstrumentTransport for Box<T> {
    fn write_raw(&mut self, data: &[u8]) -> Result<(), TransportError> {
        (**self).write_raw(data)
    }

    fn read_raw(&mut self) -> Result<Vec<u8>, TransportError> {
        (**self).read_raw()
    }

    fn timeout(&self) -> Duration {
        (**self).timeout()
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        (**self).set_timeout(timeout)
    }

    fn query_delay(&self) -> Duration {
        (**self).query_delay()
    }
}

/// Split a comma separated SCPI answer into numbers.
pub fn parse_ascii_values(command: &str, response: &str) -> Result<Vec<f64>, TransportError> {
    response
        .trim()
        .split(',')
        .map(|field| field.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| TransportError::Parse {
            command: command.to_string(),
            response: response.to_string(),
        })
}

/// Streams that can bound how long a read blocks.
pub trait TimeoutControl {
    fn apply_timeout(&mut self, timeout: Duration) -> Result<(), TransportError>;
}

impl TimeoutControl for Box<dyn SerialPort> {
    fn apply_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        self.set_timeout(timeout)?;
        Ok(())
    }
}

impl TimeoutControl for TcpStream {
    fn apply_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        // A zero duration is rejected by the socket API
        let timeout = timeout.max(Duration::from_millis(1));
        self.set_read_timeout(Some(timeout))?;
        self.set_write_timeout(Some(timeout))?;
        Ok(())
    }
}

impl TimeoutControl for File {
    fn apply_timeout(&mut self, _timeout: Duration) -> Result<(), TransportError> {
        // The usbtmc kernel driver enforces its own transfer timeout
        Ok(())
    }
}

/// Transport over any byte stream: a serial port, a raw SCPI socket or a
/// `/dev/usbtmcN` character device.
pub struct StreamTransport<S> {
    stream: S,
    timeout: Duration,
    query_delay: Duration,
    read_chunk: usize,
}

impl<S: Read + Write + TimeoutControl> StreamTransport<S> {
    pub fn new(mut stream: S, config: &ScopeConfig) -> Result<Self, TransportError> {
        let timeout = config.timeout();
        stream.apply_timeout(timeout)?;
        Ok(Self {
            stream,
            timeout,
            query_delay: config.query_delay(),
            read_chunk: config.read_chunk_bytes.max(1),
        })
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl StreamTransport<Box<dyn SerialPort>> {
    pub fn open_serial(port: &str, config: &ScopeConfig) -> Result<Self, TransportError> {
        log::debug!("Opening serial port {} at {} baud", port, config.serial_baud);
        let serial = serialport::new(port, config.serial_baud)
            .timeout(config.timeout())
            .open()?;
        serial.clear(serialport::ClearBuffer::All)?;
        Self::new(serial, config)
    }
}

impl StreamTransport<TcpStream> {
    pub fn open_socket<A: ToSocketAddrs>(addr: A, config: &ScopeConfig) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        log::debug!("Connected to {:?}", stream.peer_addr());
        stream.set_nodelay(true)?;
        Self::new(stream, config)
    }
}

impl StreamTransport<File> {
    pub fn open_usbtmc<P: AsRef<Path>>(path: P, config: &ScopeConfig) -> Result<Self, TransportError> {
        log::debug!("Opening {}", path.as_ref().display());
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::new(file, config)
    }
}

impl<S: Read + Write + TimeoutControl> InstrumentTransport for StreamTransport<S> {
    fn write_raw(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(data)?;
        self.stream.flush()?;
        Ok(())
    }

    fn read_raw(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut buffer = vec![0u8; self.read_chunk];
        loop {
            match self.stream.read(&mut buffer) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => {
                    buffer.truncate(n);
                    return Ok(buffer);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    return Err(TransportError::Timeout {
                        after: self.timeout,
                    })
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        self.stream.apply_timeout(timeout)?;
        self.timeout = timeout;
        Ok(())
    }

    fn query_delay(&self) -> Duration {
        self.query_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Stream that hands out prepared reads one by one.
    struct ChunkedStream {
        reads: VecDeque<io::Result<Vec<u8>>>,
        written: Vec<u8>,
        timeout: Option<Duration>,
    }

    impl ChunkedStream {
        fn new(reads: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                reads: reads.into(),
                written: Vec::new(),
                timeout: None,
            }
        }
    }

    impl Read for ChunkedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    if n < data.len() {
                        self.reads.push_front(Ok(data[n..].to_vec()));
                    }
                    Ok(n)
                }
                Some(Err(e)) => Err(e),
                None => Err(io::Error::new(ErrorKind::TimedOut, "nothing queued")),
            }
        }
    }

    impl Write for ChunkedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl TimeoutControl for ChunkedStream {
        fn apply_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
            self.timeout = Some(timeout);
            Ok(())
        }
    }

    fn transport(reads: Vec<io::Result<Vec<u8>>>) -> StreamTransport<ChunkedStream> {
        let config = ScopeConfig::default().with_query_delay(Duration::ZERO);
        StreamTransport::new(ChunkedStream::new(reads), &config).unwrap()
    }

    #[test]
    fn test_write_appends_newline() {
        let mut t = transport(vec![]);
        t.write(":RUN").unwrap();
        assert_eq!(t.into_inner().written, b":RUN\n");
    }

    #[test]
    fn test_query_reassembles_split_line() {
        let mut t = transport(vec![Ok(b"RIGOL TECH".to_vec()), Ok(b"NOLOGIES\n".to_vec())]);
        assert_eq!(t.query("*IDN?").unwrap(), "RIGOL TECHNOLOGIES");
    }

    #[test]
    fn test_query_skips_leftover_block_terminator() {
        let mut t = transport(vec![Ok(b"\n".to_vec()), Ok(b"4\n".to_vec())]);
        assert_eq!(t.query(":SYST:RAM?").unwrap(), "4");
    }

    #[test]
    fn test_query_ascii_values() {
        let mut t = transport(vec![Ok(b"1.000000e-03, -2.5,4\n".to_vec())]);
        assert_eq!(
            t.query_ascii_values(":TIM:SCAL?").unwrap(),
            vec![1.0e-3, -2.5, 4.0]
        );
    }

    #[test]
    fn test_query_ascii_values_rejects_text() {
        let mut t = transport(vec![Ok(b"STOP\n".to_vec())]);
        assert!(matches!(
            t.query_ascii_values(":TRIG:STAT?"),
            Err(TransportError::Parse { .. })
        ));
    }

    #[test]
    fn test_read_timeout_is_transient() {
        let mut t = transport(vec![Err(io::Error::new(ErrorKind::WouldBlock, "slow"))]);
        let err = t.read_raw().unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn test_end_of_stream_is_not_transient() {
        let mut t = transport(vec![Ok(Vec::new())]);
        let err = t.read_raw().unwrap_err();
        assert!(matches!(err, TransportError::Closed));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_read_chunk_bounds_single_read() {
        let config = ScopeConfig {
            read_chunk_bytes: 4,
            ..ScopeConfig::default()
        };
        let stream = ChunkedStream::new(vec![Ok(b"0123456789".to_vec())]);
        let mut t = StreamTransport::new(stream, &config).unwrap();
        assert_eq!(t.read_raw().unwrap(), b"0123");
        assert_eq!(t.read_raw().unwrap(), b"4567");
    }

    #[test]
    fn test_set_timeout_reaches_stream() {
        let mut t = transport(vec![]);
        t.set_timeout(Duration::from_millis(750)).unwrap();
        assert_eq!(t.timeout(), Duration::from_millis(750));
        assert_eq!(t.into_inner().timeout, Some(Duration::from_millis(750)));
    }
}
