use polars::prelude::*;
use std::path::Path;
use std::str::FromStr;

pub const TIME_COLUMN_NAME: &str = "time";
pub const INDEX_COLUMN_NAME: &str = "index";

/// Number of fields in a `:WAV:PRE?` answer.
const PREAMBLE_FIELDS: usize = 10;

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum PreambleError {
    #[error("Preamble has {0} fields, expected 10")]
    FieldCount(usize),

    #[error("Preamble field {index} is not a number: '{value}'")]
    NotNumeric { index: usize, value: String },

    #[error("Preamble x increment must be positive, got {0}")]
    InvalidXIncrement(f64),
}

/// Acquisition metadata reported by `:WAV:PRE?`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveformPreamble {
    /// 0 = BYTE, 1 = WORD, 2 = ASCii
    pub format: i32,
    /// 0 = NORMal, 1 = MAXimum, 2 = RAW
    pub kind: i32,
    pub points: usize,
    pub count: u32,
    pub x_increment: f64,
    pub x_origin: f64,
    pub x_reference: f64,
    pub y_increment: f64,
    pub y_origin: f64,
    pub y_reference: f64,
}

impl WaveformPreamble {
    pub fn time_at(&self, index: usize) -> f64 {
        index as f64 * self.x_increment + self.x_origin
    }

    pub fn voltage_of(&self, code: u8) -> f64 {
        (f64::from(code) - (self.y_origin + self.y_reference)) * self.y_increment
    }

    /// Whether two acquisitions share a time base.
    pub fn same_time_axis(&self, other: &Self) -> bool {
        self.x_increment == other.x_increment && self.x_origin == other.x_origin
    }
}

impl FromStr for WaveformPreamble {
    type Err = PreambleError;

    /// Parse the first line of a preamble answer, e.g.
    /// `0,2,1200,1,1.000000e-09,-6.000000e-07,0,4.132813e-02,0,122`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.lines().next().unwrap_or_default();
        let fields = line.split(',').map(str::trim).collect::<Vec<_>>();
        if fields.len() < PREAMBLE_FIELDS {
            return Err(PreambleError::FieldCount(fields.len()));
        }
        let mut values = [0f64; PREAMBLE_FIELDS];
        for (index, (slot, field)) in values.iter_mut().zip(&fields).enumerate() {
            *slot = field.parse().map_err(|_| PreambleError::NotNumeric {
                index,
                value: (*field).to_string(),
            })?;
        }
        let [format, kind, points, count, x_increment, x_origin, x_reference, y_increment, y_origin, y_reference] =
            values;
        if x_increment.is_nan() || x_increment <= 0.0 {
            return Err(PreambleError::InvalidXIncrement(x_increment));
        }
        Ok(Self {
            format: format as i32,
            kind: kind as i32,
            points: points.max(0.0) as usize,
            count: count.max(0.0) as u32,
            x_increment,
            x_origin,
            x_reference,
            y_increment,
            y_origin,
            y_reference,
        })
    }
}

/// Zero-based, half-open range of sample indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexRange {
    pub start: usize,
    pub end: usize,
}

impl IndexRange {
    /// An `end` before `start` collapses to an empty range at `start`.
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    pub fn full(points: usize) -> Self {
        Self::new(0, points)
    }

    /// Map a time window relative to the trigger onto sample indices,
    /// clamped to `[0, points]`.
    pub fn from_time_window(
        (t_start, t_end): (f64, f64),
        trigger_position: i64,
        x_increment: f64,
        points: usize,
    ) -> Self {
        let to_index = |t: f64| {
            let index = (trigger_position as f64 + t / x_increment).round();
            index.clamp(0.0, points as f64) as usize
        };
        Self::new(to_index(t_start), to_index(t_end))
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, index: usize) -> bool {
        (self.start..self.end).contains(&index)
    }

    /// First sample on the wire; the instrument counts from 1.
    pub fn wire_start(&self) -> usize {
        self.start + 1
    }

    /// Last sample on the wire, inclusive.
    pub fn wire_stop(&self) -> usize {
        self.end
    }

    /// Consecutive windows of at most `chunk_points` samples covering the range.
    pub fn chunks(&self, chunk_points: usize) -> impl Iterator<Item = Self> {
        let end = self.end;
        let step = chunk_points.max(1);
        (self.start..end)
            .step_by(step)
            .map(move |start| Self::new(start, (start + step).min(end)))
    }
}

/// Sample codes for one channel over a requested range.
///
/// Windows that could not be fetched are recorded as gaps; their samples stay
/// zero and are skipped by calibration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawWaveform {
    range: IndexRange,
    samples: Vec<u8>,
    gaps: Vec<IndexRange>,
}

impl RawWaveform {
    pub fn new(range: IndexRange) -> Self {
        Self {
            range,
            samples: vec![0; range.len()],
            gaps: Vec::new(),
        }
    }

    /// Store the bytes of one fetched window.
    pub fn insert(&mut self, window: IndexRange, bytes: &[u8]) -> Result<(), crate::ProtocolError> {
        if bytes.len() != window.len() {
            return Err(crate::ProtocolError::LengthMismatch {
                expected: window.len(),
                actual: bytes.len(),
            });
        }
        let offset = window.start - self.range.start;
        self.samples[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn mark_gap(&mut self, window: IndexRange) {
        self.gaps.push(window);
    }

    pub fn range(&self) -> IndexRange {
        self.range
    }

    pub fn samples(&self) -> &[u8] {
        &self.samples
    }

    pub fn gaps(&self) -> &[IndexRange] {
        &self.gaps
    }

    pub fn is_complete(&self) -> bool {
        self.gaps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// `(index, code)` for every sample that was actually received.
    pub fn present(&self) -> impl Iterator<Item = (usize, u8)> + '_ {
        self.samples
            .iter()
            .enumerate()
            .map(|(offset, &code)| (self.range.start + offset, code))
            .filter(|(index, _)| !self.gaps.iter().any(|gap| gap.contains(*index)))
    }

    fn code_at(&self, index: usize) -> Option<u8> {
        if self.gaps.iter().any(|gap| gap.contains(index)) {
            None
        } else {
            Some(self.samples[index - self.range.start])
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CalibratedWaveform {
    /// `(seconds, volts)` per received sample
    pub points: Vec<(f64, f64)>,
}

impl CalibratedWaveform {
    pub fn times(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|(t, _)| *t)
    }

    pub fn voltages(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|(_, v)| *v)
    }
}

/// Convert sample codes to `(time, voltage)` pairs.
pub fn calibrate(raw: &RawWaveform, preamble: &WaveformPreamble) -> CalibratedWaveform {
    crate::profile_scope!("calibrate");

    CalibratedWaveform {
        points: raw
            .present()
            .map(|(index, code)| (preamble.time_at(index), preamble.voltage_of(code)))
            .collect(),
    }
}

/// One channel's contribution to a waveform table.
#[derive(Debug, Clone)]
pub struct ChannelTrace {
    pub channel: u8,
    pub preamble: WaveformPreamble,
    pub raw: RawWaveform,
}

impl ChannelTrace {
    pub fn column_name(&self) -> String {
        format!("CHAN{}", self.channel)
    }
}

fn pad<T: Clone>(mut values: Vec<Option<T>>, height: usize) -> Vec<Option<T>> {
    values.resize(height, None);
    values
}

/// Stack channel traces into one frame.
///
/// Traces sharing range and time base get a single `time` (or `index`)
/// column; otherwise each channel carries its own `time_CHANn` column and
/// shorter columns are padded with nulls. Samples lost to a failed window
/// are null.
pub fn build_table(traces: &[ChannelTrace], raw: bool) -> PolarsResult<DataFrame> {
    crate::profile_scope!("build_table");

    let height = traces.iter().map(|t| t.raw.len()).max().unwrap_or(0);
    let shared_axis = traces.windows(2).all(|pair| {
        pair[0].raw.range() == pair[1].raw.range()
            && (raw || pair[0].preamble.same_time_axis(&pair[1].preamble))
    });
    let axis_name = if raw { INDEX_COLUMN_NAME } else { TIME_COLUMN_NAME };

    let axis_column = |trace: &ChannelTrace, name: String| -> Column {
        let range = trace.raw.range().start..trace.raw.range().end;
        if raw {
            let values = range.map(|i| Some(i as i64)).collect();
            Series::new(name.into(), pad(values, height)).into()
        } else {
            let values = range.map(|i| Some(trace.preamble.time_at(i))).collect();
            Series::new(name.into(), pad(values, height)).into()
        }
    };

    let mut columns: Vec<Column> = Vec::with_capacity(traces.len() * 2);
    if shared_axis {
        if let Some(first) = traces.first() {
            columns.push(axis_column(first, axis_name.to_string()));
        }
    }
    for trace in traces {
        if !shared_axis {
            columns.push(axis_column(trace, format!("{}_{}", axis_name, trace.column_name())));
        }
        let range = trace.raw.range().start..trace.raw.range().end;
        let column: Column = if raw {
            let values = range
                .map(|i| trace.raw.code_at(i).map(i32::from))
                .collect();
            Series::new(trace.column_name().into(), pad(values, height)).into()
        } else {
            let values = range
                .map(|i| trace.raw.code_at(i).map(|code| trace.preamble.voltage_of(code)))
                .collect();
            Series::new(trace.column_name().into(), pad(values, height)).into()
        };
        columns.push(column);
    }
    DataFrame::new(columns)
}

/// Write a waveform table as CSV with a header row.
pub fn write_csv<P: AsRef<Path>>(table: &mut DataFrame, path: P) -> PolarsResult<()> {
    let file = std::fs::File::create(path)?;
    CsvWriter::new(file).include_header(true).finish(table)
}
