use polars::prelude::{DataFrame, PolarsError};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

use crate::block::{encode_block, read_block, BlockError, ProtocolError, SETUP_LENGTH_DIGITS};
use crate::config::ScopeConfig;
use crate::screenshot::{ImageFormat, ScreenshotOptions};
use crate::settings::{
    AcquireSetting, AcquireSettings, ChannelParam, ChannelSettings, ScpiParam, Settings,
};
use crate::transport::{InstrumentTransport, TransportError};
use crate::trigger::{RunRequest, RunStep, TriggerStatus, TriggerWait, TRIGGER_NOT_READY};
use crate::waveform::{
    build_table, calibrate, CalibratedWaveform, ChannelTrace, IndexRange, PreambleError,
    RawWaveform, WaveformPreamble,
};

#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Preamble error: {0}")]
    Preamble(#[from] PreambleError),

    #[error("DataFrame error: {0}")]
    Polars(#[from] PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Channel {channel} does not exist, the instrument has {available}")]
    InvalidChannel { channel: u8, available: u8 },

    #[error("Unexpected response '{response}' to '{command}'")]
    UnexpectedResponse { command: String, response: String },

    #[error("Samples {} to {} of CHAN{channel} could not be read: {source}", .window.wire_start(), .window.wire_stop())]
    ChunkFailed {
        channel: u8,
        window: IndexRange,
        source: Box<ScopeError>,
    },

    #[error("No image format matches '{0}'")]
    UnsupportedImageFormat(String),

    #[error("Instrument did not report STOP within {0:?}")]
    StopNotConfirmed(Duration),
}

impl From<BlockError> for ScopeError {
    fn from(e: BlockError) -> Self {
        match e {
            BlockError::Protocol(e) => Self::Protocol(e),
            BlockError::Transport(e) => Self::Transport(e),
        }
    }
}

/// Whether waveform tables carry volts against seconds or codes against indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaveMode {
    #[default]
    Calibrated,
    Raw,
}

/// Answer to `*IDN?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub firmware: String,
}

impl FromStr for Identity {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<_> = s.trim().splitn(4, ',').map(str::trim).collect();
        match fields.as_slice() {
            [manufacturer, model, serial_number, firmware] => Ok(Self {
                manufacturer: (*manufacturer).to_string(),
                model: (*model).to_string(),
                serial_number: (*serial_number).to_string(),
                firmware: (*firmware).to_string(),
            }),
            _ => Err(ScopeError::UnexpectedResponse {
                command: "*IDN?".to_string(),
                response: s.to_string(),
            }),
        }
    }
}

/// One entry of the instrument's error queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScpiError {
    pub code: i32,
    pub message: String,
}

impl ScpiError {
    pub fn is_error(&self) -> bool {
        self.code != 0
    }
}

impl FromStr for ScpiError {
    type Err = ScopeError;

    /// Parse `-113,"Undefined header"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unexpected = || ScopeError::UnexpectedResponse {
            command: ":SYSTem:ERRor?".to_string(),
            response: s.to_string(),
        };
        let (code, message) = s.trim().split_once(',').ok_or_else(unexpected)?;
        Ok(Self {
            code: code.trim().parse().map_err(|_| unexpected())?,
            message: message.trim().trim_matches('"').to_string(),
        })
    }
}

/// Everything needed to interpret one channel's waveform data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveParameters {
    pub preamble: WaveformPreamble,
    /// Sample index of the trigger point, `-2` while not triggered
    pub trigger_position: i64,
    pub time_scale: f64,
    pub time_offset: f64,
    pub volt_scale: f64,
    pub volt_offset: f64,
}

/// A session with one oscilloscope.
///
/// Owns the transport exclusively; every call is a blocking round trip.
pub struct Oscilloscope<T> {
    transport: T,
    config: ScopeConfig,
    channel_count: Option<u8>,
}

impl<T: InstrumentTransport> Oscilloscope<T> {
    pub fn new(transport: T, config: ScopeConfig) -> Self {
        Self {
            transport,
            config,
            channel_count: None,
        }
    }

    pub fn config(&self) -> &ScopeConfig {
        &self.config
    }

    /// Switch between aborting and gap-tolerant waveform retrieval.
    pub fn set_strict(&mut self, strict: bool) {
        self.config.strict = strict;
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    fn query_number(&mut self, command: &str) -> Result<f64, ScopeError> {
        self.transport
            .query_ascii_values(command)?
            .first()
            .copied()
            .ok_or_else(|| ScopeError::UnexpectedResponse {
                command: command.to_string(),
                response: String::new(),
            })
    }

    /// Read a binary block answer to a command already sent.
    pub fn read_block(&mut self) -> Result<Vec<u8>, ScopeError> {
        Ok(read_block(&mut self.transport)?)
    }

    pub fn identify(&mut self) -> Result<Identity, ScopeError> {
        self.transport.query("*IDN?")?.parse()
    }

    /// Number of analog channels, asked once and then cached.
    pub fn channel_count(&mut self) -> Result<u8, ScopeError> {
        if let Some(count) = self.channel_count {
            return Ok(count);
        }
        let value = self.query_number(":SYSTem:RAM?")?;
        if !(1.0..=16.0).contains(&value) {
            return Err(ScopeError::UnexpectedResponse {
                command: ":SYSTem:RAM?".to_string(),
                response: value.to_string(),
            });
        }
        let count = value as u8;
        log::debug!("Instrument has {} analog channels", count);
        self.channel_count = Some(count);
        Ok(count)
    }

    /// Forget the cached channel count, e.g. after reconnecting to another model.
    pub fn invalidate_channel_count(&mut self) {
        self.channel_count = None;
    }

    fn check_channel(&mut self, channel: u8) -> Result<(), ScopeError> {
        let available = self.channel_count()?;
        if channel == 0 || channel > available {
            return Err(ScopeError::InvalidChannel { channel, available });
        }
        Ok(())
    }

    /// Channels currently shown on screen.
    pub fn displayed_channels(&mut self) -> Result<Vec<u8>, ScopeError> {
        let mut displayed = Vec::new();
        for channel in 1..=self.channel_count()? {
            if self.query_number(&format!(":CHANnel{}:DISPlay?", channel))? == 1.0 {
                displayed.push(channel);
            }
        }
        Ok(displayed)
    }

    fn apply_settings<P: ScpiParam>(
        &mut self,
        prefix: &str,
        settings: &Settings<P>,
    ) -> Result<BTreeMap<P, String>, ScopeError> {
        let mut readback = BTreeMap::new();
        if settings.is_empty() {
            log::debug!("No {}parameters requested", prefix);
            return Ok(readback);
        }
        for (param, value) in settings.requests() {
            let header = format!("{}{}", prefix, param.mnemonic());
            if let Some(value) = value {
                self.transport.write(&format!("{} {}", header, value))?;
            }
            let answer = self.transport.query(&format!("{}?", header))?;
            readback.insert(param, answer);
        }
        Ok(readback)
    }

    /// Apply channel settings and return the read-back value of every parameter touched.
    pub fn configure_channel(
        &mut self,
        channel: u8,
        settings: &ChannelSettings,
    ) -> Result<BTreeMap<ChannelParam, String>, ScopeError> {
        self.check_channel(channel)?;
        self.apply_settings(&format!(":CHANnel{}:", channel), settings)
    }

    pub fn configure_channels(
        &mut self,
        channels: &[u8],
        settings: &ChannelSettings,
    ) -> Result<BTreeMap<u8, BTreeMap<ChannelParam, String>>, ScopeError> {
        let mut result = BTreeMap::new();
        for &channel in channels {
            result.insert(channel, self.configure_channel(channel, settings)?);
        }
        Ok(result)
    }

    /// Apply timebase / acquisition settings, reading each one back.
    pub fn configure_acquisition(
        &mut self,
        settings: &AcquireSettings,
    ) -> Result<BTreeMap<AcquireSetting, String>, ScopeError> {
        self.apply_settings("", settings)
    }

    /// Pop the oldest entry of the instrument's error queue.
    pub fn error(&mut self) -> Result<ScpiError, ScopeError> {
        self.transport.query(":SYSTem:ERRor?")?.parse()
    }

    /// Samples per second.
    pub fn sample_rate(&mut self) -> Result<f64, ScopeError> {
        self.query_number(":ACQuire:SRATe?")
    }

    pub fn trigger_status(&mut self) -> Result<TriggerStatus, ScopeError> {
        let answer = self.transport.query(":TRIGger:STATus?")?;
        answer.parse().map_err(|_| ScopeError::UnexpectedResponse {
            command: ":TRIGger:STATus?".to_string(),
            response: answer,
        })
    }

    pub fn trigger_position(&mut self) -> Result<i64, ScopeError> {
        Ok(self.query_number(":TRIGger:POSition?")? as i64)
    }

    /// Stop acquiring and wait until the instrument confirms it.
    pub fn stop(&mut self) -> Result<(), ScopeError> {
        self.transport.write(":STOP")?;
        let start = Instant::now();
        loop {
            let status = self.trigger_status()?;
            if status == TriggerStatus::Stopped {
                return Ok(());
            }
            log::trace!("Waiting for STOP, instrument reports {}", status.as_str());
            if start.elapsed() > self.config.stop_timeout() {
                return Err(ScopeError::StopNotConfirmed(self.config.stop_timeout()));
            }
            thread::sleep(self.config.stop_poll());
        }
    }

    /// Clear the screen and throw away any answer still in flight.
    pub fn clear(&mut self) -> Result<(), ScopeError> {
        self.transport.write(":CLEar")?;
        thread::sleep(self.config.clear_settle());
        match self.transport.read_raw() {
            Ok(stale) => log::debug!("Discarded {} stale bytes", stale.len()),
            Err(e) => log::trace!("Nothing pending after clear: {}", e),
        }
        Ok(())
    }

    /// Start an acquisition. Returns whether the instrument triggered; a
    /// request without a wait always returns `true`.
    pub fn run(&mut self, request: RunRequest) -> Result<bool, ScopeError> {
        for step in request.steps() {
            match step {
                RunStep::Send(command) => self.transport.write(command)?,
                RunStep::Settle => thread::sleep(self.config.force_settle()),
            }
        }
        match request.trigger_wait() {
            TriggerWait::No => Ok(true),
            TriggerWait::Forever => self.wait_for_trigger(None),
            TriggerWait::UpTo(timeout) => self.wait_for_trigger(Some(timeout)),
        }
    }

    /// Poll the trigger position at the configured interval.
    pub fn wait_for_trigger(&mut self, timeout: Option<Duration>) -> Result<bool, ScopeError> {
        let interval = self.config.trigger_poll();
        self.wait_for_trigger_every(timeout, interval)
    }

    /// Poll until the trigger position stops reading "not triggered".
    /// Returns `false` once `timeout` has elapsed.
    pub fn wait_for_trigger_every(
        &mut self,
        timeout: Option<Duration>,
        interval: Duration,
    ) -> Result<bool, ScopeError> {
        let start = Instant::now();
        thread::sleep(self.config.trigger_settle());
        while self.trigger_position()? == TRIGGER_NOT_READY {
            if let Some(timeout) = timeout {
                if start.elapsed() > timeout {
                    log::debug!("No trigger within {:?}", timeout);
                    return Ok(false);
                }
            }
            thread::sleep(interval);
        }
        Ok(true)
    }

    /// Select `channel` for byte-wise raw reads and fetch its parameters.
    pub fn wave_parameters(&mut self, channel: u8) -> Result<WaveParameters, ScopeError> {
        self.check_channel(channel)?;
        self.transport.write(":WAVeform:MODE RAW")?;
        self.transport.write(":WAVeform:FORMat BYTE")?;
        self.transport
            .write(&format!(":WAVeform:SOURce CHANnel{}", channel))?;
        let preamble: WaveformPreamble = self.transport.query(":WAVeform:PREamble?")?.parse()?;
        Ok(WaveParameters {
            preamble,
            trigger_position: self.trigger_position()?,
            time_scale: self.query_number(":TIMebase:SCALe?")?,
            time_offset: self.query_number(":TIMebase:OFFSet?")?,
            volt_scale: self.query_number(&format!(":CHANnel{}:SCALe?", channel))?,
            volt_offset: self.query_number(&format!(":CHANnel{}:OFFSet?", channel))?,
        })
    }

    fn fetch_window(&mut self, window: IndexRange) -> Result<Vec<u8>, ScopeError> {
        self.transport
            .write(&format!(":WAVeform:STARt {}", window.wire_start()))?;
        self.transport
            .write(&format!(":WAVeform:STOP {}", window.wire_stop()))?;
        self.transport.write(":WAVeform:DATA?")?;
        self.read_block()
    }

    /// Throw away input still queued after a failed window, so the next
    /// window starts on a block header. Stops at the first read error.
    fn discard_pending(&mut self) {
        let mut discarded = 0;
        while let Ok(stale) = self.transport.read_raw() {
            discarded += stale.len();
        }
        if discarded > 0 {
            log::debug!("Discarded {} bytes to resynchronise", discarded);
        }
    }

    /// Read one channel's sample codes, window by window.
    ///
    /// `time_window` is in seconds relative to the trigger point; `None`
    /// reads the whole memory. A window that fails is left as a gap unless
    /// the session is strict.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn read_raw_waveform(
        &mut self,
        channel: u8,
        time_window: Option<(f64, f64)>,
    ) -> Result<(WaveParameters, RawWaveform), ScopeError> {
        crate::profile_scope!("read_raw_waveform");

        let params = self.wave_parameters(channel)?;
        let preamble = &params.preamble;
        let range = match time_window {
            Some(window) => IndexRange::from_time_window(
                window,
                params.trigger_position,
                preamble.x_increment,
                preamble.points,
            ),
            None => IndexRange::full(preamble.points),
        };
        log::debug!(
            "Reading samples {}..{} of CHAN{} in windows of {}",
            range.start,
            range.end,
            channel,
            self.config.chunk_points
        );

        let mut raw = RawWaveform::new(range);
        for window in range.chunks(self.config.chunk_points) {
            let fetched = self
                .fetch_window(window)
                .and_then(|bytes| Ok(raw.insert(window, &bytes)?));
            match fetched {
                Ok(()) => {}
                Err(e) if self.config.strict => {
                    return Err(ScopeError::ChunkFailed {
                        channel,
                        window,
                        source: Box::new(e),
                    })
                }
                Err(e) => {
                    log::warn!(
                        "Dropping samples {} to {} of CHAN{}: {}",
                        window.wire_start(),
                        window.wire_stop(),
                        channel,
                        e
                    );
                    raw.mark_gap(window);
                    self.discard_pending();
                }
            }
        }
        Ok((params, raw))
    }

    /// Read one channel as `(seconds, volts)` pairs.
    pub fn calibrated_wave(
        &mut self,
        channel: u8,
        time_window: Option<(f64, f64)>,
    ) -> Result<CalibratedWaveform, ScopeError> {
        let (params, raw) = self.read_raw_waveform(channel, time_window)?;
        Ok(calibrate(&raw, &params.preamble))
    }

    /// Read several channels into one table.
    ///
    /// `channels` defaults to the displayed ones. See
    /// [`build_table`](crate::waveform::build_table) for the column layout.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn get_wave(
        &mut self,
        channels: Option<&[u8]>,
        time_window: Option<(f64, f64)>,
        mode: WaveMode,
    ) -> Result<DataFrame, ScopeError> {
        let channels = match channels {
            Some(channels) => channels.to_vec(),
            None => self.displayed_channels()?,
        };
        let mut traces = Vec::with_capacity(channels.len());
        for channel in channels {
            let (params, raw) = self.read_raw_waveform(channel, time_window)?;
            traces.push(ChannelTrace {
                channel,
                preamble: params.preamble,
                raw,
            });
        }
        Ok(build_table(&traces, mode == WaveMode::Raw)?)
    }

    /// Save the complete instrument configuration as an opaque blob.
    pub fn setup(&mut self) -> Result<Vec<u8>, ScopeError> {
        self.transport.write(":SYSTem:SETup?")?;
        self.read_block()
    }

    /// Restore a blob previously returned by [`setup`](Self::setup).
    pub fn restore_setup(&mut self, setup: &[u8]) -> Result<(), ScopeError> {
        let mut message = b":SYSTem:SETup ".to_vec();
        message.extend(encode_block(setup, SETUP_LENGTH_DIGITS)?);
        message.push(b'\n');
        log::debug!("-> :SYSTem:SETup <{} bytes>", setup.len());
        self.transport.write_raw(&message)?;
        Ok(())
    }

    /// Capture the screen and return the image bytes.
    pub fn screenshot(&mut self, options: &ScreenshotOptions) -> Result<Vec<u8>, ScopeError> {
        self.transport.write(&options.command())?;
        self.read_block()
    }

    /// Capture the screen into `path`, or a fresh temporary file when `None`.
    ///
    /// Without an explicit format the file extension decides; an extension
    /// no format matches is an error.
    pub fn save_screenshot(
        &mut self,
        path: Option<&Path>,
        options: &ScreenshotOptions,
    ) -> Result<PathBuf, ScopeError> {
        let mut options = *options;
        if options.format.is_none() {
            if let Some(path) = path.filter(|p| p.extension().is_some()) {
                let format = ImageFormat::from_path(path)
                    .ok_or_else(|| ScopeError::UnsupportedImageFormat(path.display().to_string()))?;
                options.format = Some(format);
            }
        }
        let image = self.screenshot(&options)?;

        match path {
            Some(path) => {
                fs::write(path, &image)?;
                Ok(path.to_path_buf())
            }
            None => {
                let extension = options
                    .format
                    .or_else(|| ImageFormat::sniff(&image))
                    .map_or("img", |f| f.extension());
                let mut file = tempfile::Builder::new()
                    .prefix("screenshot-")
                    .suffix(&format!(".{}", extension))
                    .tempfile()?;
                file.write_all(&image)?;
                let (_, path) = file.keep().map_err(|e| e.error)?;
                log::debug!("Screenshot written to {}", path.display());
                Ok(path)
            }
        }
    }
}
