// Copyright 2025-2026 CEMAXECUTER LLC

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use txrx_sdr::SampleFormat;

use crate::error::StreamError;

/// Everything a session needs besides the radio itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub format: SampleFormat,
    /// Samples per send/recv call; 0 picks ten times the streamer maximum
    pub samples_per_buffer: usize,
    pub clock: ClockConfig,
    /// Transmit side; None runs a receive-only session
    pub tx: Option<TxConfig>,
    pub rx: RxConfig,
    /// Install a SIGINT handler for continuous captures
    pub handle_interrupt: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            format: SampleFormat::Sc16,
            samples_per_buffer: 0,
            clock: ClockConfig::default(),
            tx: None,
            rx: RxConfig::default(),
            handle_interrupt: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    pub master: usize,
    /// Boards slaved to the master over the MIMO cable
    pub slaves: Vec<usize>,
    /// Wait after switching references before reading lock sensors
    pub settle_ms: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            master: 0,
            slaves: Vec::new(),
            settle_ms: 50,
        }
    }
}

impl ClockConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxConfig {
    pub file: PathBuf,
    /// Rewind and replay the file until stopped
    pub repeat: bool,
    /// Accepted but not applied between repeats
    pub delay_secs: f64,
    /// Timestamp offset of the first send
    pub warmup_secs: f64,
    pub send_timeout_secs: f64,
    pub otw: String,
    pub channels: Vec<usize>,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::new(),
            repeat: false,
            delay_secs: 0.0,
            warmup_secs: 0.8,
            send_timeout_secs: 0.1,
            otw: "sc16".to_string(),
            channels: vec![0],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RxConfig {
    /// Base output name; suffixed per channel when several are recorded
    pub file: PathBuf,
    pub channels: Vec<usize>,
    /// Total samples to capture; 0 streams until stopped
    pub num_samples: usize,
    /// Delay before the stream command takes effect
    pub settling_secs: f64,
    pub otw: String,
}

impl Default for RxConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("rx.dat"),
            channels: vec![0],
            num_samples: 0,
            settling_secs: 0.2,
            otw: "sc16".to_string(),
        }
    }
}

fn seconds(name: &str, secs: f64) -> Result<Duration, StreamError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| StreamError::Config(format!("{} must be a non-negative number of seconds, got {}", name, secs)))
}

impl SessionConfig {
    pub fn load(path: &Path) -> Result<Self, StreamError> {
        let text = fs::read_to_string(path).map_err(|e| StreamError::io(path, e))?;
        serde_json::from_str(&text)
            .map_err(|e| StreamError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Continuous captures run until stopped from outside.
    pub fn is_continuous(&self) -> bool {
        self.rx.num_samples == 0
    }

    /// Check the settings against a radio with `num_boards` boards.
    pub fn validate(&self, num_boards: usize) -> Result<(), StreamError> {
        if self.rx.channels.is_empty() {
            return Err(StreamError::Config("no RX channels selected".to_string()));
        }
        if self.rx.file.as_os_str().is_empty() {
            return Err(StreamError::Config("no RX output file".to_string()));
        }
        check_unique("RX channel", &self.rx.channels)?;
        seconds("RX settling time", self.rx.settling_secs)?;

        if let Some(tx) = &self.tx {
            if tx.file.as_os_str().is_empty() {
                return Err(StreamError::Config("no TX input file".to_string()));
            }
            if tx.channels.len() != 1 {
                return Err(StreamError::Config(format!(
                    "TX plays one file on one channel, got {} channels",
                    tx.channels.len()
                )));
            }
            seconds("TX repeat delay", tx.delay_secs)?;
            seconds("TX warm-up", tx.warmup_secs)?;
            seconds("TX send timeout", tx.send_timeout_secs)?;
        }

        let clock = &self.clock;
        if clock.slaves.contains(&clock.master) {
            return Err(StreamError::Config(format!(
                "board {} is both master and slave",
                clock.master
            )));
        }
        check_unique("slave board", &clock.slaves)?;
        for &board in std::iter::once(&clock.master).chain(&clock.slaves) {
            if board >= num_boards {
                return Err(StreamError::Config(format!(
                    "board {} out of range ({} boards)",
                    board, num_boards
                )));
            }
        }
        Ok(())
    }

    pub fn settling(&self) -> Duration {
        Duration::try_from_secs_f64(self.rx.settling_secs).unwrap_or_default()
    }
}

impl TxConfig {
    pub fn warmup(&self) -> Duration {
        Duration::try_from_secs_f64(self.warmup_secs).unwrap_or_default()
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.send_timeout_secs).unwrap_or_default()
    }

    pub fn delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.delay_secs).unwrap_or_default()
    }
}

fn check_unique(what: &str, items: &[usize]) -> Result<(), StreamError> {
    let mut seen = HashSet::new();
    for &item in items {
        if !seen.insert(item) {
            return Err(StreamError::Config(format!("{} {} listed twice", what, item)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(file: &str) -> TxConfig {
        TxConfig {
            file: PathBuf::from(file),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.format, SampleFormat::Sc16);
        assert_eq!(cfg.rx.file, PathBuf::from("rx.dat"));
        assert_eq!(cfg.rx.channels, vec![0]);
        assert_eq!(cfg.settling(), Duration::from_millis(200));
        assert_eq!(cfg.clock.settle(), Duration::from_millis(50));
        assert!(cfg.is_continuous());
        assert!(cfg.handle_interrupt);

        let t = tx("tx.dat");
        assert_eq!(t.warmup(), Duration::from_millis(800));
        assert_eq!(t.send_timeout(), Duration::from_millis(100));
        assert!(cfg.validate(1).is_ok());
    }

    #[test]
    fn test_partial_json() {
        let json = r#"{
            "format": "fc32",
            "tx": { "file": "tx.dat", "repeat": true },
            "rx": { "channels": [0, 1], "num_samples": 2500 },
            "clock": { "slaves": [1] }
        }"#;
        let cfg: SessionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.format, SampleFormat::Fc32);
        let t = cfg.tx.as_ref().unwrap();
        assert!(t.repeat);
        assert_eq!(t.warmup_secs, 0.8);
        assert_eq!(cfg.rx.num_samples, 2500);
        assert_eq!(cfg.rx.file, PathBuf::from("rx.dat"));
        assert_eq!(cfg.clock.master, 0);
        assert_eq!(cfg.clock.settle_ms, 50);
        assert!(!cfg.is_continuous());
        assert!(cfg.validate(2).is_ok());
    }

    #[test]
    fn test_unknown_format_rejected() {
        let err = serde_json::from_str::<SessionConfig>(r#"{"format": "complex128"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_validation_errors() {
        let invalid = |cfg: SessionConfig, boards: usize| {
            let err = cfg.validate(boards).unwrap_err();
            assert!(err.is_configuration(), "{}", err);
        };

        let mut cfg = SessionConfig::default();
        cfg.rx.channels.clear();
        invalid(cfg, 1);

        let mut cfg = SessionConfig::default();
        cfg.clock.slaves = vec![0];
        invalid(cfg, 2);

        let mut cfg = SessionConfig::default();
        cfg.clock.slaves = vec![1, 1];
        invalid(cfg, 2);

        let mut cfg = SessionConfig::default();
        cfg.clock.slaves = vec![1];
        invalid(cfg, 1);

        let mut cfg = SessionConfig::default();
        cfg.rx.settling_secs = -0.5;
        invalid(cfg, 1);

        let mut cfg = SessionConfig::default();
        cfg.tx = Some(tx(""));
        invalid(cfg, 1);

        let mut cfg = SessionConfig::default();
        cfg.tx = Some(TxConfig {
            delay_secs: -1.0,
            ..tx("tx.dat")
        });
        invalid(cfg, 1);

        let mut cfg = SessionConfig::default();
        cfg.tx = Some(TxConfig {
            channels: vec![0, 1],
            ..tx("tx.dat")
        });
        let err = cfg.validate(1).unwrap_err();
        assert!(err.to_string().contains("2 channels"), "{}", err);

        let mut cfg = SessionConfig::default();
        cfg.tx = Some(TxConfig {
            channels: vec![],
            ..tx("tx.dat")
        });
        invalid(cfg, 1);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SessionConfig::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, StreamError::Io { .. }));
    }
}
