// Copyright 2025-2026 CEMAXECUTER LLC

//! Shared time base across boards: the master runs from its internal
//! reference, slaves take clock and time over the MIMO cable.

use std::thread;
use std::time::Duration;

use serde::Serialize;
use txrx_sdr::{Direction, Radio, TimeSpec};

use crate::config::ClockConfig;
use crate::error::StreamError;

pub const INTERNAL: &str = "internal";
pub const MIMO: &str = "mimo";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockRole {
    Master,
    Slave,
}

impl ClockRole {
    fn reference(self) -> &'static str {
        match self {
            ClockRole::Master => INTERNAL,
            ClockRole::Slave => MIMO,
        }
    }
}

/// One board's place in the time domain. `locked` and `time_secs` are
/// filled in by synchronization and left alone afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClockDomain {
    pub board: usize,
    pub role: ClockRole,
    pub locked: Option<bool>,
    /// Device time read back once the boards settled
    pub time_secs: Option<f64>,
}

pub struct ClockSynchronizer {
    domains: Vec<ClockDomain>,
    settle: Duration,
}

impl ClockSynchronizer {
    pub fn new(config: &ClockConfig) -> Self {
        let mut domains = vec![ClockDomain {
            board: config.master,
            role: ClockRole::Master,
            locked: None,
            time_secs: None,
        }];
        domains.extend(config.slaves.iter().map(|&board| ClockDomain {
            board,
            role: ClockRole::Slave,
            locked: None,
            time_secs: None,
        }));
        Self {
            domains,
            settle: config.settle(),
        }
    }

    pub fn domains(&self) -> &[ClockDomain] {
        &self.domains
    }

    pub fn master(&self) -> usize {
        self.domains[0].board
    }

    fn has_slaves(&self) -> bool {
        self.domains.len() > 1
    }

    fn read_times<R: Radio>(&mut self, radio: &R, state: &str) -> Result<(), StreamError> {
        for domain in &mut self.domains {
            let now = radio.time_now(domain.board)?;
            let source = radio.time_source(domain.board)?;
            log::info!(
                "board {} time ({}): {:.6}s, time source {}",
                domain.board,
                state,
                now.as_secs(),
                source
            );
            domain.time_secs = Some(now.as_secs());
        }
        Ok(())
    }

    /// Switch references, zero the master clock, settle, then require
    /// `mimo_locked` on every board when any slave is present. Device
    /// times are logged before and after.
    pub fn synchronize<R: Radio>(&mut self, radio: &mut R) -> Result<(), StreamError> {
        self.read_times(radio, "not synced")?;
        for domain in &self.domains {
            let reference = domain.role.reference();
            match domain.role {
                ClockRole::Master => {
                    radio.set_clock_source(reference, domain.board)?;
                    radio.set_time_source(reference, domain.board)?;
                }
                ClockRole::Slave => {
                    radio.set_time_source(reference, domain.board)?;
                    radio.set_clock_source(reference, domain.board)?;
                }
            }
            log::info!("board {}: {:?}, clock/time source {}", domain.board, domain.role, reference);
        }

        radio.set_time_now(TimeSpec::ZERO, Some(self.master()))?;
        thread::sleep(self.settle);
        self.read_times(radio, "synced")?;

        if !self.has_slaves() {
            log::debug!("single board, skipping MIMO lock check");
            return Ok(());
        }

        for domain in &mut self.domains {
            let names = radio.mboard_sensor_names(domain.board)?;
            if !names.iter().any(|n| n == "mimo_locked") {
                domain.locked = Some(false);
                return Err(StreamError::Lock {
                    target: format!("board {}", domain.board),
                    sensor: "mimo_locked".to_string(),
                    reading: "sensor missing".to_string(),
                });
            }

            let sensor = radio.mboard_sensor("mimo_locked", domain.board)?;
            log::info!("checking board {}: {}", domain.board, sensor.to_pp_string());
            let locked = sensor.to_bool();
            domain.locked = Some(locked);
            if !locked {
                return Err(StreamError::Lock {
                    target: format!("board {}", domain.board),
                    sensor: sensor.name,
                    reading: sensor.unit,
                });
            }
        }
        Ok(())
    }
}

/// Require `lo_locked` on a channel that exposes it. Channels without
/// the sensor pass.
pub fn verify_lo_locked<R: Radio>(radio: &R, dir: Direction, chan: usize) -> Result<(), StreamError> {
    let names = radio.channel_sensor_names(dir, chan)?;
    if !names.iter().any(|n| n == "lo_locked") {
        log::debug!("{} channel {} has no lo_locked sensor", dir, chan);
        return Ok(());
    }

    let sensor = radio.channel_sensor(dir, "lo_locked", chan)?;
    log::info!("checking {}: {}", dir, sensor.to_pp_string());
    if sensor.to_bool() {
        Ok(())
    } else {
        Err(StreamError::Lock {
            target: format!("{} channel {}", dir, chan),
            sensor: sensor.name,
            reading: sensor.unit,
        })
    }
}
