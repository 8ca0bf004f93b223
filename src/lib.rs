//! # RigolScope RS
//!
//! A Rust library for driving SCPI oscilloscopes such as the Rigol DS1000Z
//! series over USBTMC, a serial line or a raw SCPI socket.
//!
//! The interesting part is the waveform path: the instrument answers
//! `:WAV:DATA?` with an IEEE 488.2 binary block that may arrive split over
//! many transport reads, sometimes with a stray trailing newline, and large
//! acquisitions have to be fetched window by window. This crate reassembles
//! those blocks, stitches the windows together and converts sample codes to
//! seconds and volts using the instrument's preamble.
//!
//! ## Features
//!
//! - **Discovery**: USBTMC devices (via udev), serial ports and configured
//!   socket hosts, named with VISA-style resource strings
//! - **Block protocol**: chunked reassembly with a single retry on transient errors
//! - **Chunked retrieval**: deep memory read in bounded windows, strict or lenient
//! - **DataFrame output**: waveforms come back as `polars` frames
//! - **Instrument control**: run/stop/single/force, trigger waits, channel and
//!   timebase settings, setup save/restore, screenshots
//!
//! ## Examples
//!
//! ### Capture the displayed channels
//!
//! ```rust,no_run
//! use rigolscope_rs::{ScopeConfig, ScopeConnector, WaveMode};
//!
//! let config = ScopeConfig::default();
//! let mut scope = ScopeConnector::connect("USB", &config)?;
//!
//! let table = scope.get_wave(None, None, WaveMode::Calibrated)?;
//! println!("Captured {} samples", table.height());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Single shot with a forced trigger
//!
//! ```rust,no_run
//! use rigolscope_rs::{RunRequest, ScopeConfig, ScopeConnector};
//! use std::time::Duration;
//!
//! let mut scope = ScopeConnector::connect("USB", &ScopeConfig::default())?;
//! let triggered = scope.run(
//!     RunRequest::single()
//!         .forced()
//!         .wait_up_to(Duration::from_secs(2)),
//! )?;
//! println!("triggered: {}", triggered);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Channel setup
//!
//! ```rust,no_run
//! use rigolscope_rs::{ChannelSettings, ScopeConfig, ScopeConnector};
//!
//! let mut scope = ScopeConnector::connect("USB", &ScopeConfig::default())?;
//! let readback = scope.configure_channel(
//!     1,
//!     &ChannelSettings::new().scale(0.5).coupling("DC").display(true),
//! )?;
//! for (param, value) in readback {
//!     println!("{:?} = {}", param, value);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#[cfg(feature = "cpu-profiling")]
macro_rules! profile_scope {
    ($name:literal) => {
        let _profile_span =
            tracy_client::Client::start().span(tracy_client::span_location!($name), 0);
    };
}

#[cfg(not(feature = "cpu-profiling"))]
macro_rules! profile_scope {
    ($name:literal) => {};
}

pub(crate) use profile_scope;

pub mod block;
pub mod config;
pub mod discovery;
pub mod scope;
pub mod screenshot;
pub mod settings;
pub mod transport;
pub mod trigger;
pub mod waveform;

#[cfg(test)]
mod sim;

// Re-export the main types for convenience
pub use block::{read_block, BlockError, BlockHeader, ProtocolError};

pub use config::{ConfigError, ScopeConfig};

pub use discovery::{DiscoveryError, InstrumentResource, ResourceKind, ScopeConnector};

pub use scope::{Identity, Oscilloscope, ScopeError, ScpiError, WaveMode, WaveParameters};

pub use screenshot::{ImageFormat, ScreenshotOptions};

pub use settings::{
    AcquireSetting, AcquireSettings, ChannelParam, ChannelSettings, ScpiParam, Settings,
};

pub use transport::{InstrumentTransport, StreamTransport, TransportError};

pub use trigger::{RunRequest, TriggerStatus};

pub use waveform::{
    build_table, calibrate, write_csv, CalibratedWaveform, ChannelTrace, IndexRange,
    PreambleError, RawWaveform, WaveformPreamble,
};
