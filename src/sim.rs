//! In-memory stand-in for a four channel Rigol scope.
//!
//! Commands are reduced to their SCPI short form (lowercase letters dropped)
//! before being logged and answered, so `:WAVeform:SOURce CHANnel1` is
//! recorded as `:WAV:SOUR CHAN1`.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use crate::block::{encode_block, BlockHeader};
use crate::transport::{InstrumentTransport, TransportError};

const SETUP_PREFIX: &[u8] = b":SYSTem:SETup ";

pub(crate) struct SimulatedScope {
    /// Every command received, in short form
    pub commands: Vec<String>,
    /// `(start, stop)` wire addresses of every `:WAV:DATA?`
    pub data_requests: Vec<(usize, usize)>,
    pending: VecDeque<u8>,

    pub channels: u8,
    pub displayed: Vec<u8>,
    pub memory: BTreeMap<u8, Vec<u8>>,
    pub x_increment: f64,
    pub x_origin: f64,
    pub y_increment: f64,
    pub y_origin: f64,
    pub y_reference: f64,

    /// Answers to `:TRIG:POS?`, then `idle_trigger_position` forever
    pub trigger_positions: VecDeque<i64>,
    pub idle_trigger_position: i64,
    /// Answers to `:TRIG:STAT?`, then the current run state
    pub statuses: VecDeque<&'static str>,
    status: &'static str,
    pub ignore_stop: bool,

    pub settings: BTreeMap<String, String>,
    pub setup: Vec<u8>,
    pub image: Vec<u8>,

    /// Wire start addresses whose block is preceded by garbage
    pub corrupt_windows: Vec<usize>,
    /// Wire start addresses answered with one byte too few
    pub short_windows: Vec<usize>,
    pub trailing_newline: bool,
    /// Largest piece handed out per read
    pub read_size: Option<usize>,

    source: u8,
    start: usize,
    stop: usize,
}

impl SimulatedScope {
    pub fn new() -> Self {
        Self::with_points(1200)
    }

    pub fn with_points(points: usize) -> Self {
        let memory = (1..=4u8)
            .map(|ch| {
                let samples = (0..points)
                    .map(|i| (usize::from(ch) * 20 + i % 100) as u8)
                    .collect();
                (ch, samples)
            })
            .collect();
        let mut image = b"\x89PNG\r\n\x1a\n".to_vec();
        image.extend((0..64u8).map(|b| b.wrapping_mul(3)));
        Self {
            commands: Vec::new(),
            data_requests: Vec::new(),
            pending: VecDeque::new(),
            channels: 4,
            displayed: vec![1, 2],
            memory,
            x_increment: 1e-6,
            x_origin: -(points as f64 / 2.0) * 1e-6,
            y_increment: 0.04,
            y_origin: 0.0,
            y_reference: 127.0,
            trigger_positions: VecDeque::new(),
            idle_trigger_position: (points / 2) as i64,
            statuses: VecDeque::new(),
            status: "RUN",
            ignore_stop: false,
            settings: BTreeMap::new(),
            setup: b"SETUP-BLOB".to_vec(),
            image,
            corrupt_windows: Vec::new(),
            short_windows: Vec::new(),
            trailing_newline: true,
            read_size: None,
            source: 1,
            start: 1,
            stop: points,
        }
    }

    /// Bytes queued but not read yet.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn points(&self) -> usize {
        self.memory.get(&self.source).map_or(0, Vec::len)
    }

    pub fn preamble_line(&self) -> String {
        format!(
            "0,2,{},1,{:e},{:e},0,{:e},{:e},{:e}",
            self.points(),
            self.x_increment,
            self.x_origin,
            self.y_increment,
            self.y_origin,
            self.y_reference
        )
    }

    fn short_form(text: &str) -> String {
        text.chars().filter(|c| !c.is_ascii_lowercase()).collect()
    }

    fn respond(&mut self, line: impl std::fmt::Display) {
        self.pending.extend(format!("{}\n", line).into_bytes());
    }

    fn respond_block(&mut self, payload: &[u8]) {
        let mut block = encode_block(payload, 9).unwrap_or_default();
        if self.trailing_newline {
            block.push(b'\n');
        }
        self.pending.extend(block);
    }

    fn channel_default(&self, header: &str) -> String {
        let channel = header
            .strip_prefix(":CHAN")
            .and_then(|rest| rest.split(':').next())
            .and_then(|n| n.parse::<u8>().ok());
        match (channel, header.rsplit(':').next()) {
            (Some(ch), Some("DISP")) => u8::from(self.displayed.contains(&ch)).to_string(),
            (Some(_), Some("SCAL")) => "1.000000e+00".to_string(),
            _ => "0".to_string(),
        }
    }

    fn send_window(&mut self) {
        let (start, stop) = (self.start, self.stop);
        self.data_requests.push((start, stop));
        let samples = &self.memory[&self.source];
        let end = stop.min(samples.len());
        let mut payload = samples[(start - 1).min(end)..end].to_vec();
        if self.corrupt_windows.contains(&start) {
            // junk in front of an otherwise valid block
            self.pending.extend(b"ERR\n");
        }
        if self.short_windows.contains(&start) {
            payload.pop();
        }
        self.respond_block(&payload);
    }

    fn handle(&mut self, line: &str) {
        let (header, argument) = line.trim().split_once(' ').unwrap_or((line.trim(), ""));
        let header = Self::short_form(header);
        let argument = Self::short_form(argument);
        self.commands.push(format!("{} {}", header, argument).trim_end().to_string());

        match header.as_str() {
            "*IDN?" => self.respond("RIGOL TECHNOLOGIES,DS1104Z,DS1ZA000000001,00.04.04.SP3"),
            ":SYST:RAM?" => self.respond(self.channels),
            ":SYST:ERR?" => self.respond("-113,\"Undefined header\""),
            ":ACQ:SRAT?" => self.respond("1.000000e+09"),
            ":TRIG:POS?" => {
                let position = self
                    .trigger_positions
                    .pop_front()
                    .unwrap_or(self.idle_trigger_position);
                self.respond(position);
            }
            ":TRIG:STAT?" => {
                let status = self.statuses.pop_front().unwrap_or(self.status);
                self.respond(status);
            }
            ":STOP" if !self.ignore_stop => self.status = "STOP",
            ":RUN" => self.status = "RUN",
            ":SING" => self.status = "WAIT",
            ":TFOR" => self.status = "TD",
            ":STOP" | ":CLE" | ":WAV:MODE" | ":WAV:FORM" => {}
            ":WAV:SOUR" => {
                self.source = argument.trim_start_matches("CHAN").parse().unwrap_or(1);
            }
            ":WAV:STAR" => self.start = argument.parse().unwrap_or(1),
            ":WAV:STOP" => self.stop = argument.parse().unwrap_or(0),
            ":WAV:PRE?" => self.respond(self.preamble_line()),
            ":WAV:DATA?" => self.send_window(),
            ":SYST:SET?" => {
                let setup = self.setup.clone();
                self.respond_block(&setup);
            }
            ":DISP:DATA?" => {
                let image = self.image.clone();
                self.respond_block(&image);
            }
            query if query.ends_with('?') => {
                let key = query.trim_end_matches('?');
                let answer = self
                    .settings
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| self.channel_default(key));
                self.respond(answer);
            }
            _ => {
                self.settings.insert(header.clone(), argument);
            }
        }
    }

    fn restore_setup(&mut self, data: &[u8]) {
        let block = &data[SETUP_PREFIX.len()..];
        if let Ok(Some(header)) = BlockHeader::parse(block) {
            let start = header.encoded_len();
            self.setup = block[start..start + header.length].to_vec();
            self.commands.push(format!(":SYST:SET <{} bytes>", header.length));
        }
    }
}

impl InstrumentTransport for SimulatedScope {
    fn write_raw(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if data.starts_with(SETUP_PREFIX) {
            self.restore_setup(data);
            return Ok(());
        }
        let text = String::from_utf8_lossy(data).into_owned();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            self.handle(line);
        }
        Ok(())
    }

    fn read_raw(&mut self) -> Result<Vec<u8>, TransportError> {
        if self.pending.is_empty() {
            return Err(TransportError::Timeout {
                after: self.timeout(),
            });
        }
        let n = self.read_size.unwrap_or(usize::MAX).min(self.pending.len());
        Ok(self.pending.drain(..n).collect())
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(1)
    }

    fn set_timeout(&mut self, _timeout: Duration) -> Result<(), TransportError> {
        Ok(())
    }

    fn query_delay(&self) -> Duration {
        Duration::ZERO
    }
}
