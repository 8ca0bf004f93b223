//! Set-and-read-back requests for channel and acquisition parameters.
//!
//! Every parameter named in a request is read back after any write, so the
//! caller always sees what the instrument actually accepted (it rounds
//! scales to the nearest supported step, for instance).

use std::fmt::Display;

/// A parameter addressable by a SCPI mnemonic.
pub trait ScpiParam: Copy + Ord + std::fmt::Debug + 'static {
    /// Every parameter, in the order an "all parameters" read walks them.
    const ALL: &'static [Self];

    fn mnemonic(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChannelParam {
    BwLimit,
    Coupling,
    Display,
    Invert,
    Offset,
    Range,
    TCal,
    Scale,
    Probe,
    Units,
    Vernier,
}

impl ScpiParam for ChannelParam {
    const ALL: &'static [Self] = &[
        Self::BwLimit,
        Self::Coupling,
        Self::Display,
        Self::Invert,
        Self::Offset,
        Self::Range,
        Self::TCal,
        Self::Scale,
        Self::Probe,
        Self::Units,
        Self::Vernier,
    ];

    fn mnemonic(&self) -> &'static str {
        match self {
            Self::BwLimit => "BWLimit",
            Self::Coupling => "COUPling",
            Self::Display => "DISPlay",
            Self::Invert => "INVert",
            Self::Offset => "OFFSet",
            Self::Range => "RANGe",
            Self::TCal => "TCAL",
            Self::Scale => "SCALe",
            Self::Probe => "PROBe",
            Self::Units => "UNITs",
            Self::Vernier => "VERNier",
        }
    }
}

/// Timebase and acquisition parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AcquireSetting {
    TimeOffset,
    TimeScale,
    TimeDelayEnable,
    TimeDelayOffset,
    TimeDelayScale,
    /// `AUTO` or a point count such as 12000, 120000, 1200000, 12000000, 24000000
    MemoryDepth,
}

impl ScpiParam for AcquireSetting {
    const ALL: &'static [Self] = &[
        Self::TimeOffset,
        Self::TimeScale,
        Self::TimeDelayEnable,
        Self::TimeDelayOffset,
        Self::TimeDelayScale,
        Self::MemoryDepth,
    ];

    fn mnemonic(&self) -> &'static str {
        match self {
            Self::TimeOffset => ":TIMebase:OFFSet",
            Self::TimeScale => ":TIMebase:SCALe",
            Self::TimeDelayEnable => ":TIMebase:DELay:ENABle",
            Self::TimeDelayOffset => ":TIMebase:DELay:OFFSet",
            Self::TimeDelayScale => ":TIMebase:DELay:SCALe",
            Self::MemoryDepth => ":ACQuire:MDEPth",
        }
    }
}

/// Parameters to write (`Some`) or only read back (`None`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings<P> {
    entries: Vec<(P, Option<String>)>,
    all: bool,
}

pub type ChannelSettings = Settings<ChannelParam>;
pub type AcquireSettings = Settings<AcquireSetting>;

impl<P: ScpiParam> Settings<P> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            all: false,
        }
    }

    /// Write `value` to `param`. A later call for the same parameter wins.
    pub fn set(mut self, param: P, value: impl Display) -> Self {
        self.upsert(param, Some(value.to_string()));
        self
    }

    /// Read `param` back without changing it.
    pub fn read(mut self, param: P) -> Self {
        if !self.entries.iter().any(|(p, _)| *p == param) {
            self.entries.push((param, None));
        }
        self
    }

    /// Also read back every parameter not otherwise named.
    pub fn all_params(mut self) -> Self {
        self.all = true;
        self
    }

    fn upsert(&mut self, param: P, value: Option<String>) {
        match self.entries.iter_mut().find(|(p, _)| *p == param) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((param, value)),
        }
    }

    /// The requests in order: named parameters first, then the rest if
    /// `all_params` was given.
    pub fn requests(&self) -> Vec<(P, Option<&str>)> {
        let mut requests: Vec<_> = self
            .entries
            .iter()
            .map(|(p, v)| (*p, v.as_deref()))
            .collect();
        if self.all {
            for param in P::ALL {
                if !self.entries.iter().any(|(p, _)| p == param) {
                    requests.push((*param, None));
                }
            }
        }
        requests
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && !self.all
    }
}

impl<P: ScpiParam> Default for Settings<P> {
    fn default() -> Self {
        Self::new()
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

impl Settings<ChannelParam> {
    /// Volts per division.
    pub fn scale(self, volts: f64) -> Self {
        self.set(ChannelParam::Scale, volts)
    }

    pub fn offset(self, volts: f64) -> Self {
        self.set(ChannelParam::Offset, volts)
    }

    /// `AC`, `DC` or `GND`.
    pub fn coupling(self, coupling: &str) -> Self {
        self.set(ChannelParam::Coupling, coupling)
    }

    pub fn display(self, on: bool) -> Self {
        self.set(ChannelParam::Display, on_off(on))
    }

    pub fn invert(self, on: bool) -> Self {
        self.set(ChannelParam::Invert, on_off(on))
    }

    /// `20M` or `OFF`.
    pub fn bw_limit(self, limit: &str) -> Self {
        self.set(ChannelParam::BwLimit, limit)
    }

    pub fn probe(self, ratio: f64) -> Self {
        self.set(ChannelParam::Probe, ratio)
    }
}

impl Settings<AcquireSetting> {
    /// Seconds per division.
    pub fn time_scale(self, seconds: f64) -> Self {
        self.set(AcquireSetting::TimeScale, seconds)
    }

    pub fn time_offset(self, seconds: f64) -> Self {
        self.set(AcquireSetting::TimeOffset, seconds)
    }

    pub fn memory_depth(self, depth: impl Display) -> Self {
        self.set(AcquireSetting::MemoryDepth, depth)
    }
}
