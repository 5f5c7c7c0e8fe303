// Copyright 2025-2026 CEMAXECUTER LLC

//! Deterministic in-process radio. Streams are paced by call count rather
//! than wall-clock sample rate; every call is recorded for inspection.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::device::{
    DeviceError, Direction, Frontend, Radio, RxErrorCode, RxMetadata, RxStreamer, SensorValue,
    StreamArgs, StreamCmd, StreamMode, TimeSpec, TuneRequest, TxMetadata, TxStreamer,
};
use crate::sample::Sample;

/// Callback run after every recv call with the running call count.
#[derive(Clone)]
pub struct RecvHook(pub Arc<dyn Fn(usize) + Send + Sync>);

impl RecvHook {
    pub fn new(f: impl Fn(usize) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }
}

impl fmt::Debug for RecvHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RecvHook")
    }
}

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub num_boards: usize,
    /// Channels per direction across all boards
    pub num_channels: usize,
    /// `mimo_locked` per board; missing entries read as locked
    pub mimo_locked: Vec<bool>,
    /// `lo_locked` on every TX/RX channel; None hides the sensor
    pub lo_locked: Option<bool>,
    pub max_num_samps: usize,
    pub rx_samples_per_call: usize,
    /// Error codes returned by successive recv calls before normal data
    pub rx_error_script: Vec<RxErrorCode>,
    /// After this many recv calls every further call times out
    pub rx_call_budget: Option<usize>,
    /// Accept at most this many samples per send
    pub tx_accept_limit: Option<usize>,
    /// Sleep per recv call
    pub rx_call_delay: Duration,
    pub rx_hook: Option<RecvHook>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            num_boards: 1,
            num_channels: 2,
            mimo_locked: Vec::new(),
            lo_locked: Some(true),
            max_num_samps: 2040,
            rx_samples_per_call: 1000,
            rx_error_script: Vec::new(),
            rx_call_budget: None,
            tx_accept_limit: None,
            rx_call_delay: Duration::ZERO,
            rx_hook: None,
        }
    }
}

/// Everything the simulated radio was asked to do, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    ClockSource { board: usize, source: String },
    TimeSource { board: usize, source: String },
    SetTimeNow { board: Option<usize>, time: TimeSpec },
    TimeRead { board: usize },
    SensorRead { board: usize, name: String },
    TxStreamCreated { channels: Vec<usize> },
    RxStreamCreated { channels: Vec<usize> },
    Send { num_samples: usize, accepted: usize, md: TxMetadata },
    StreamCmd(StreamCmd),
    Recv { num_samples: usize, error_code: RxErrorCode, timeout: Duration },
}

type EventLog = Arc<Mutex<Vec<SimEvent>>>;

#[derive(Debug, Clone, Default)]
struct ChannelSettings {
    rate: f64,
    freq: f64,
    gain: f64,
    bandwidth: f64,
    antenna: String,
}

#[derive(Debug, Clone)]
struct BoardState {
    clock_source: String,
    time_source: String,
    time_set: TimeSpec,
    time_set_at: Instant,
}

pub struct SimRadio {
    config: SimConfig,
    boards: Vec<BoardState>,
    settings: HashMap<(Direction, usize), ChannelSettings>,
    subdevs: HashMap<(Direction, usize), String>,
    events: EventLog,
}

impl SimRadio {
    pub fn new(config: SimConfig) -> Self {
        let now = Instant::now();
        let boards = (0..config.num_boards)
            .map(|_| BoardState {
                clock_source: "internal".to_string(),
                time_source: "none".to_string(),
                time_set: TimeSpec::ZERO,
                time_set_at: now,
            })
            .collect();
        Self {
            config,
            boards,
            settings: HashMap::new(),
            subdevs: HashMap::new(),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Snapshot of recorded calls, including those made by streamers.
    pub fn events(&self) -> Vec<SimEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn subdev_spec(&self, dir: Direction, board: usize) -> Option<&str> {
        self.subdevs.get(&(dir, board)).map(String::as_str)
    }

    fn record(&self, event: SimEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn board(&self, board: usize) -> Result<&BoardState, DeviceError> {
        self.boards.get(board).ok_or(DeviceError::NoSuchBoard {
            board,
            num_boards: self.boards.len(),
        })
    }

    fn board_mut(&mut self, board: usize) -> Result<&mut BoardState, DeviceError> {
        let num_boards = self.boards.len();
        self.boards
            .get_mut(board)
            .ok_or(DeviceError::NoSuchBoard { board, num_boards })
    }

    fn check_channel(&self, chan: usize) -> Result<(), DeviceError> {
        if chan < self.config.num_channels {
            Ok(())
        } else {
            Err(DeviceError::NoSuchChannel {
                chan,
                num_channels: self.config.num_channels,
            })
        }
    }

    fn settings(&mut self, dir: Direction, chan: usize) -> Result<&mut ChannelSettings, DeviceError> {
        self.check_channel(chan)?;
        Ok(self.settings.entry((dir, chan)).or_insert_with(|| ChannelSettings {
            rate: 1e6,
            antenna: if dir == Direction::Tx { "TX/RX" } else { "RX2" }.to_string(),
            ..Default::default()
        }))
    }

    fn setting<T>(&self, dir: Direction, chan: usize, f: impl Fn(&ChannelSettings) -> T, default: T) -> Result<T, DeviceError> {
        self.check_channel(chan)?;
        Ok(self.settings.get(&(dir, chan)).map(f).unwrap_or(default))
    }
}

impl Frontend for SimRadio {
    fn set_subdev_spec(&mut self, dir: Direction, spec: &str, board: usize) -> Result<(), DeviceError> {
        self.board(board)?;
        self.subdevs.insert((dir, board), spec.to_string());
        Ok(())
    }

    fn set_rate(&mut self, dir: Direction, rate: f64, chan: usize) -> Result<(), DeviceError> {
        self.settings(dir, chan)?.rate = rate;
        Ok(())
    }

    fn rate(&self, dir: Direction, chan: usize) -> Result<f64, DeviceError> {
        self.setting(dir, chan, |s| s.rate, 1e6)
    }

    fn set_freq(&mut self, dir: Direction, req: &TuneRequest, chan: usize) -> Result<(), DeviceError> {
        self.settings(dir, chan)?.freq = req.target_freq;
        Ok(())
    }

    fn freq(&self, dir: Direction, chan: usize) -> Result<f64, DeviceError> {
        self.setting(dir, chan, |s| s.freq, 0.0)
    }

    fn set_gain(&mut self, dir: Direction, gain: f64, chan: usize) -> Result<(), DeviceError> {
        self.settings(dir, chan)?.gain = gain;
        Ok(())
    }

    fn gain(&self, dir: Direction, chan: usize) -> Result<f64, DeviceError> {
        self.setting(dir, chan, |s| s.gain, 0.0)
    }

    fn set_bandwidth(&mut self, dir: Direction, bw: f64, chan: usize) -> Result<(), DeviceError> {
        self.settings(dir, chan)?.bandwidth = bw;
        Ok(())
    }

    fn bandwidth(&self, dir: Direction, chan: usize) -> Result<f64, DeviceError> {
        self.setting(dir, chan, |s| s.bandwidth, 0.0)
    }

    fn set_antenna(&mut self, dir: Direction, ant: &str, chan: usize) -> Result<(), DeviceError> {
        self.settings(dir, chan)?.antenna = ant.to_string();
        Ok(())
    }
}

impl Radio for SimRadio {
    type TxStream<S: Sample> = SimTxStream<S>;
    type RxStream<S: Sample> = SimRxStream<S>;

    fn num_boards(&self) -> usize {
        self.boards.len()
    }

    fn pp_string(&self) -> String {
        format!(
            "Simulated radio: {} board(s), {} channel(s) per direction",
            self.boards.len(),
            self.config.num_channels
        )
    }

    fn set_clock_source(&mut self, source: &str, board: usize) -> Result<(), DeviceError> {
        self.board_mut(board)?.clock_source = source.to_string();
        self.record(SimEvent::ClockSource { board, source: source.to_string() });
        Ok(())
    }

    fn clock_source(&self, board: usize) -> Result<String, DeviceError> {
        Ok(self.board(board)?.clock_source.clone())
    }

    fn set_time_source(&mut self, source: &str, board: usize) -> Result<(), DeviceError> {
        self.board_mut(board)?.time_source = source.to_string();
        self.record(SimEvent::TimeSource { board, source: source.to_string() });
        Ok(())
    }

    fn time_source(&self, board: usize) -> Result<String, DeviceError> {
        Ok(self.board(board)?.time_source.clone())
    }

    fn time_now(&self, board: usize) -> Result<TimeSpec, DeviceError> {
        let b = self.board(board)?;
        let now = TimeSpec::from_secs(b.time_set.as_secs() + b.time_set_at.elapsed().as_secs_f64());
        self.record(SimEvent::TimeRead { board });
        Ok(now)
    }

    fn set_time_now(&mut self, time: TimeSpec, board: Option<usize>) -> Result<(), DeviceError> {
        let now = Instant::now();
        match board {
            Some(idx) => {
                let b = self.board_mut(idx)?;
                b.time_set = time;
                b.time_set_at = now;
            }
            None => {
                for b in &mut self.boards {
                    b.time_set = time;
                    b.time_set_at = now;
                }
            }
        }
        self.record(SimEvent::SetTimeNow { board, time });
        Ok(())
    }

    fn mboard_sensor_names(&self, board: usize) -> Result<Vec<String>, DeviceError> {
        self.board(board)?;
        Ok(vec!["mimo_locked".to_string(), "ref_locked".to_string()])
    }

    fn mboard_sensor(&self, name: &str, board: usize) -> Result<SensorValue, DeviceError> {
        self.board(board)?;
        self.record(SimEvent::SensorRead { board, name: name.to_string() });
        match name {
            "mimo_locked" => {
                let locked = self.config.mimo_locked.get(board).copied().unwrap_or(true);
                Ok(SensorValue::boolean(name, locked, "locked", "unlocked"))
            }
            "ref_locked" => Ok(SensorValue::boolean(name, true, "locked", "unlocked")),
            _ => Err(DeviceError::NoSuchSensor { name: name.to_string() }),
        }
    }

    fn channel_sensor_names(&self, _dir: Direction, chan: usize) -> Result<Vec<String>, DeviceError> {
        self.check_channel(chan)?;
        Ok(match self.config.lo_locked {
            Some(_) => vec!["lo_locked".to_string()],
            None => Vec::new(),
        })
    }

    fn channel_sensor(&self, _dir: Direction, name: &str, chan: usize) -> Result<SensorValue, DeviceError> {
        self.check_channel(chan)?;
        match (name, self.config.lo_locked) {
            ("lo_locked", Some(locked)) => Ok(SensorValue::boolean(name, locked, "locked", "unlocked")),
            _ => Err(DeviceError::NoSuchSensor { name: name.to_string() }),
        }
    }

    fn tx_stream<S: Sample>(&mut self, args: &StreamArgs) -> Result<SimTxStream<S>, DeviceError> {
        for &chan in &args.channels {
            self.check_channel(chan)?;
        }
        self.record(SimEvent::TxStreamCreated { channels: args.channels.clone() });
        Ok(SimTxStream {
            events: self.events.clone(),
            accept_limit: self.config.tx_accept_limit,
            max_num_samps: self.config.max_num_samps,
            _format: PhantomData,
        })
    }

    fn rx_stream<S: Sample>(&mut self, args: &StreamArgs) -> Result<SimRxStream<S>, DeviceError> {
        if args.channels.is_empty() {
            return Err(DeviceError::InvalidArgument("no RX channels".to_string()));
        }
        for &chan in &args.channels {
            self.check_channel(chan)?;
        }
        self.record(SimEvent::RxStreamCreated { channels: args.channels.clone() });
        Ok(SimRxStream {
            events: self.events.clone(),
            channels: args.channels.clone(),
            samples_per_call: self.config.rx_samples_per_call,
            max_num_samps: self.config.max_num_samps,
            script: self.config.rx_error_script.iter().copied().collect(),
            call_budget: self.config.rx_call_budget,
            call_delay: self.config.rx_call_delay,
            hook: self.config.rx_hook.clone(),
            calls: 0,
            mode: None,
            remaining: 0,
            start: TimeSpec::ZERO,
            counter: 0,
            _format: PhantomData,
        })
    }
}

pub struct SimTxStream<S: Sample> {
    events: EventLog,
    accept_limit: Option<usize>,
    max_num_samps: usize,
    _format: PhantomData<S>,
}

impl<S: Sample> TxStreamer<S> for SimTxStream<S> {
    fn send(&mut self, buf: &[S], md: &TxMetadata, _timeout: Duration) -> Result<usize, DeviceError> {
        let accepted = match self.accept_limit {
            Some(limit) => buf.len().min(limit),
            None => buf.len(),
        };
        self.events.lock().unwrap().push(SimEvent::Send {
            num_samples: buf.len(),
            accepted,
            md: *md,
        });
        Ok(accepted)
    }

    fn max_num_samps(&self) -> usize {
        self.max_num_samps
    }
}

pub struct SimRxStream<S: Sample> {
    events: EventLog,
    channels: Vec<usize>,
    samples_per_call: usize,
    max_num_samps: usize,
    script: VecDeque<RxErrorCode>,
    call_budget: Option<usize>,
    call_delay: Duration,
    hook: Option<RecvHook>,
    calls: usize,
    mode: Option<StreamMode>,
    /// Samples left in a NumSampsAndDone request
    remaining: usize,
    /// Start time of the last stream command, stamped on its first block
    start: TimeSpec,
    counter: u64,
    _format: PhantomData<S>,
}

impl<S: Sample> SimRxStream<S> {
    fn record_recv(&self, num_samples: usize, error_code: RxErrorCode, timeout: Duration) {
        self.events.lock().unwrap().push(SimEvent::Recv {
            num_samples,
            error_code,
            timeout,
        });
    }

    fn produce(&mut self, buffs: &mut [&mut [S]], md: &mut RxMetadata, timeout: Duration) -> usize {
        let exhausted = self.call_budget.is_some_and(|budget| self.calls > budget);
        let done = self.mode == Some(StreamMode::NumSampsAndDone) && self.remaining == 0;
        if self.mode.is_none() || exhausted || done {
            thread::sleep(timeout);
            md.error_code = RxErrorCode::Timeout;
            self.record_recv(0, RxErrorCode::Timeout, timeout);
            return 0;
        }

        if let Some(code) = self.script.pop_front() {
            if code != RxErrorCode::None {
                md.error_code = code;
                self.record_recv(0, code, timeout);
                return 0;
            }
        }

        let len = buffs.iter().map(|b| b.len()).min().unwrap_or(0);
        let n = self.samples_per_call.min(len);
        for (idx, buf) in buffs.iter_mut().enumerate() {
            let chan = self.channels[idx] as f64;
            for (k, s) in buf[..n].iter_mut().enumerate() {
                let ramp = ((self.counter + k as u64) % 1000) as f64 / 1000.0;
                *s = S::from_iq(ramp, chan / 10.0);
            }
        }
        if self.counter == 0 {
            md.time_spec = Some(self.start);
        }
        self.counter += n as u64;
        if self.mode == Some(StreamMode::NumSampsAndDone) {
            self.remaining = self.remaining.saturating_sub(n);
        }

        self.record_recv(n, RxErrorCode::None, timeout);
        n
    }
}

impl<S: Sample> RxStreamer<S> for SimRxStream<S> {
    fn issue_stream_cmd(&mut self, cmd: &StreamCmd) -> Result<(), DeviceError> {
        self.events.lock().unwrap().push(SimEvent::StreamCmd(*cmd));
        match cmd.mode {
            StreamMode::StopContinuous => self.mode = None,
            mode => {
                self.mode = Some(mode);
                self.remaining = cmd.num_samps;
                self.start = cmd.time_spec;
            }
        }
        Ok(())
    }

    fn recv(
        &mut self,
        buffs: &mut [&mut [S]],
        md: &mut RxMetadata,
        timeout: Duration,
    ) -> Result<usize, DeviceError> {
        if buffs.len() != self.channels.len() {
            return Err(DeviceError::InvalidArgument(format!(
                "{} buffers for {} channels",
                buffs.len(),
                self.channels.len()
            )));
        }
        *md = RxMetadata::default();
        self.calls += 1;

        if !self.call_delay.is_zero() {
            thread::sleep(self.call_delay);
        }

        let n = self.produce(buffs, md, timeout);
        if let Some(hook) = &self.hook {
            (hook.0)(self.calls);
        }
        Ok(n)
    }

    fn num_channels(&self) -> usize {
        self.channels.len()
    }

    fn max_num_samps(&self) -> usize {
        self.max_num_samps
    }
}
