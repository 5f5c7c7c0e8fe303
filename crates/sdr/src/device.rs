// Copyright 2025-2026 CEMAXECUTER LLC

//! Radio collaborator interface: streamers, timing, sensors and front-end
//! tuning, shaped after the UHD multi_usrp API.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sample::Sample;

/// Failure of a radio call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceError {
    #[error("{call} failed: error {code}")]
    Uhd { call: &'static str, code: i32 },
    #[error("board {board} out of range ({num_boards} boards)")]
    NoSuchBoard { board: usize, num_boards: usize },
    #[error("channel {chan} out of range ({num_channels} channels)")]
    NoSuchChannel { chan: usize, num_channels: usize },
    #[error("sensor '{name}' not found")]
    NoSuchSensor { name: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Stream direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Tx,
    Rx,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Tx => f.write_str("TX"),
            Direction::Rx => f.write_str("RX"),
        }
    }
}

/// Device time, split like uhd::time_spec_t to keep precision for long runs.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimeSpec {
    pub full_secs: i64,
    pub frac_secs: f64,
}

impl TimeSpec {
    pub const ZERO: TimeSpec = TimeSpec { full_secs: 0, frac_secs: 0.0 };

    pub fn from_secs(secs: f64) -> Self {
        let full = secs.floor();
        Self {
            full_secs: full as i64,
            frac_secs: secs - full,
        }
    }

    pub fn from_duration(d: Duration) -> Self {
        Self {
            full_secs: d.as_secs() as i64,
            frac_secs: d.subsec_nanos() as f64 / 1e9,
        }
    }

    pub fn as_secs(&self) -> f64 {
        self.full_secs as f64 + self.frac_secs
    }
}

/// Per-send transmit attributes
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TxMetadata {
    pub start_of_burst: bool,
    pub end_of_burst: bool,
    /// Send at this device time instead of immediately
    pub time_spec: Option<TimeSpec>,
}

/// Receive error classification, numbered as in uhd_rx_metadata_error_code_t
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RxErrorCode {
    #[default]
    None,
    Timeout,
    LateCommand,
    BrokenChain,
    Overflow,
    Alignment,
    BadPacket,
    /// Code not known to this build
    Unknown(i32),
}

impl RxErrorCode {
    pub fn from_raw(code: i32) -> Self {
        match code {
            0x0 => RxErrorCode::None,
            0x1 => RxErrorCode::Timeout,
            0x2 => RxErrorCode::LateCommand,
            0x4 => RxErrorCode::BrokenChain,
            0x8 => RxErrorCode::Overflow,
            0xc => RxErrorCode::Alignment,
            0xf => RxErrorCode::BadPacket,
            other => RxErrorCode::Unknown(other),
        }
    }
}

impl fmt::Display for RxErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RxErrorCode::None => f.write_str("none"),
            RxErrorCode::Timeout => f.write_str("timeout"),
            RxErrorCode::LateCommand => f.write_str("late command"),
            RxErrorCode::BrokenChain => f.write_str("broken chain"),
            RxErrorCode::Overflow => f.write_str("overflow"),
            RxErrorCode::Alignment => f.write_str("alignment"),
            RxErrorCode::BadPacket => f.write_str("bad packet"),
            RxErrorCode::Unknown(code) => write!(f, "unknown error 0x{:x}", code),
        }
    }
}

/// Per-recv receive attributes, filled in by the streamer
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RxMetadata {
    pub error_code: RxErrorCode,
    pub time_spec: Option<TimeSpec>,
    pub out_of_sequence: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Stream `num_samps` samples, then stop
    NumSampsAndDone,
    StartContinuous,
    StopContinuous,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamCmd {
    pub mode: StreamMode,
    pub num_samps: usize,
    pub stream_now: bool,
    pub time_spec: TimeSpec,
}

impl StreamCmd {
    pub fn stop() -> Self {
        Self {
            mode: StreamMode::StopContinuous,
            num_samps: 0,
            stream_now: true,
            time_spec: TimeSpec::ZERO,
        }
    }
}

/// Streamer construction arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamArgs {
    pub cpu_format: String,
    /// Over-the-wire format, e.g. "sc16" or "sc8"
    pub otw_format: String,
    pub channels: Vec<usize>,
}

/// A sensor reading. Boolean sensors carry "true"/"false" in `value` and a
/// descriptive word for the state in `unit`, as UHD does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorValue {
    pub name: String,
    pub value: String,
    pub unit: String,
}

impl SensorValue {
    pub fn boolean(name: &str, value: bool, utrue: &str, ufalse: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            unit: if value { utrue } else { ufalse }.to_string(),
        }
    }

    pub fn to_bool(&self) -> bool {
        self.value == "true"
    }

    pub fn to_pp_string(&self) -> String {
        if self.value == "true" || self.value == "false" {
            format!("{}: {}", self.name, self.unit)
        } else {
            format!("{}: {} {}", self.name, self.value, self.unit)
        }
    }
}

/// Tune request for a front-end LO
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuneRequest {
    pub target_freq: f64,
    /// Use integer-N tuning ("mode_n=integer")
    pub integer_n: bool,
}

impl TuneRequest {
    pub fn new(target_freq: f64) -> Self {
        Self {
            target_freq,
            integer_n: false,
        }
    }
}

/// Transmit stream. `send` blocks up to `timeout` and returns how many
/// samples the device accepted.
pub trait TxStreamer<S: Sample>: Send {
    fn send(&mut self, buf: &[S], md: &TxMetadata, timeout: Duration) -> Result<usize, DeviceError>;

    fn max_num_samps(&self) -> usize;
}

/// Receive stream bound to one or more channels.
pub trait RxStreamer<S: Sample>: Send {
    fn issue_stream_cmd(&mut self, cmd: &StreamCmd) -> Result<(), DeviceError>;

    /// Receive into one buffer per channel. Blocks up to `timeout`; the
    /// outcome is classified in `md.error_code`. Returns samples per channel.
    fn recv(
        &mut self,
        buffs: &mut [&mut [S]],
        md: &mut RxMetadata,
        timeout: Duration,
    ) -> Result<usize, DeviceError>;

    fn num_channels(&self) -> usize;

    fn max_num_samps(&self) -> usize;
}

/// One-shot front-end configuration, used before any streaming starts.
pub trait Frontend {
    fn set_subdev_spec(&mut self, dir: Direction, spec: &str, board: usize) -> Result<(), DeviceError>;

    fn set_rate(&mut self, dir: Direction, rate: f64, chan: usize) -> Result<(), DeviceError>;
    fn rate(&self, dir: Direction, chan: usize) -> Result<f64, DeviceError>;

    fn set_freq(&mut self, dir: Direction, req: &TuneRequest, chan: usize) -> Result<(), DeviceError>;
    fn freq(&self, dir: Direction, chan: usize) -> Result<f64, DeviceError>;

    fn set_gain(&mut self, dir: Direction, gain: f64, chan: usize) -> Result<(), DeviceError>;
    fn gain(&self, dir: Direction, chan: usize) -> Result<f64, DeviceError>;

    fn set_bandwidth(&mut self, dir: Direction, bw: f64, chan: usize) -> Result<(), DeviceError>;
    fn bandwidth(&self, dir: Direction, chan: usize) -> Result<f64, DeviceError>;

    fn set_antenna(&mut self, dir: Direction, ant: &str, chan: usize) -> Result<(), DeviceError>;
}

/// A multi-board radio: clock/time distribution, sensors and streamers.
pub trait Radio: Frontend {
    type TxStream<S: Sample>: TxStreamer<S>;
    type RxStream<S: Sample>: RxStreamer<S>;

    fn num_boards(&self) -> usize;

    /// Human-readable device summary
    fn pp_string(&self) -> String;

    fn set_clock_source(&mut self, source: &str, board: usize) -> Result<(), DeviceError>;
    fn clock_source(&self, board: usize) -> Result<String, DeviceError>;

    fn set_time_source(&mut self, source: &str, board: usize) -> Result<(), DeviceError>;
    fn time_source(&self, board: usize) -> Result<String, DeviceError>;

    fn time_now(&self, board: usize) -> Result<TimeSpec, DeviceError>;

    /// Set device time on one board, or on every board when `board` is None.
    fn set_time_now(&mut self, time: TimeSpec, board: Option<usize>) -> Result<(), DeviceError>;

    fn mboard_sensor_names(&self, board: usize) -> Result<Vec<String>, DeviceError>;
    fn mboard_sensor(&self, name: &str, board: usize) -> Result<SensorValue, DeviceError>;

    fn channel_sensor_names(&self, dir: Direction, chan: usize) -> Result<Vec<String>, DeviceError>;
    fn channel_sensor(&self, dir: Direction, name: &str, chan: usize) -> Result<SensorValue, DeviceError>;

    fn tx_stream<S: Sample>(&mut self, args: &StreamArgs) -> Result<Self::TxStream<S>, DeviceError>;
    fn rx_stream<S: Sample>(&mut self, args: &StreamArgs) -> Result<Self::RxStream<S>, DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_spec_split() {
        let t = TimeSpec::from_secs(2.25);
        assert_eq!(t.full_secs, 2);
        assert!((t.frac_secs - 0.25).abs() < 1e-12);
        assert!((t.as_secs() - 2.25).abs() < 1e-12);

        let d = TimeSpec::from_duration(Duration::from_millis(800));
        assert_eq!(d.full_secs, 0);
        assert!((d.frac_secs - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_rx_error_codes() {
        assert_eq!(RxErrorCode::from_raw(0x0), RxErrorCode::None);
        assert_eq!(RxErrorCode::from_raw(0x1), RxErrorCode::Timeout);
        assert_eq!(RxErrorCode::from_raw(0x8), RxErrorCode::Overflow);
        assert_eq!(RxErrorCode::from_raw(0xf), RxErrorCode::BadPacket);
        assert_eq!(RxErrorCode::from_raw(0x3), RxErrorCode::Unknown(3));
    }

    #[test]
    fn test_boolean_sensor() {
        let s = SensorValue::boolean("mimo_locked", false, "locked", "unlocked");
        assert!(!s.to_bool());
        assert_eq!(s.to_pp_string(), "mimo_locked: unlocked");
        let s = SensorValue::boolean("lo_locked", true, "locked", "unlocked");
        assert!(s.to_bool());
    }
}
