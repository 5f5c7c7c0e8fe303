// Copyright 2025-2026 CEMAXECUTER LLC

//! Session controller: clock setup, stream and file creation, then the
//! transmit and receive workers run side by side until the capture ends.

use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use num_complex::Complex;
use serde::Serialize;
use txrx_sdr::{
    channel_filename, ChannelFileSink, Direction, FileSampleSource, Radio, RxStreamer, Sample,
    SampleFormat, StreamArgs, TimeSpec, TxStreamer,
};

use crate::clock::{verify_lo_locked, ClockDomain, ClockSynchronizer};
use crate::config::SessionConfig;
use crate::error::StreamError;
use crate::rx::{RxReport, RxWorker, RxWorkerConfig};
use crate::stop::{InterruptListener, StopSignal};
use crate::tx::{TxReport, TxWorker, TxWorkerConfig};

/// Per-recv timeout after the first call
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub format: SampleFormat,
    pub samples_per_buffer: usize,
    pub clock: Vec<ClockDomain>,
    pub tx: Option<TxReport>,
    pub rx: RxReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Worker {
    Tx,
    Rx,
}

/// Reports a worker's exit to the controller when dropped, so a panic is
/// reported as a failure.
struct ExitNotice {
    worker: Worker,
    ok: bool,
    events: Sender<(Worker, bool)>,
}

impl ExitNotice {
    fn new(worker: Worker, events: Sender<(Worker, bool)>) -> Self {
        Self {
            worker,
            ok: false,
            events,
        }
    }
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        let _ = self.events.send((self.worker, self.ok));
    }
}

pub struct Session {
    config: SessionConfig,
    /// Signal of the in-progress or next run; replaced when a run returns
    stop: Mutex<StopSignal>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            stop: Mutex::new(StopSignal::new()),
        }
    }

    /// Handle for stopping the current run (or the next one, between runs)
    /// from another thread.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.lock().unwrap().clone()
    }

    pub fn run<R: Radio>(&self, radio: &mut R) -> Result<SessionReport, StreamError> {
        let stop = self.stop_signal();
        let result = self.run_with(radio, &stop);
        *self.stop.lock().unwrap() = StopSignal::new();
        result
    }

    fn run_with<R: Radio>(&self, radio: &mut R, stop: &StopSignal) -> Result<SessionReport, StreamError> {
        self.config.validate(radio.num_boards())?;
        match self.config.format {
            SampleFormat::Sc16 => self.run_typed::<Complex<i16>, R>(radio, stop),
            SampleFormat::Fc32 => self.run_typed::<Complex<f32>, R>(radio, stop),
            SampleFormat::Fc64 => self.run_typed::<Complex<f64>, R>(radio, stop),
        }
    }

    fn run_typed<S: Sample, R: Radio>(
        &self,
        radio: &mut R,
        stop: &StopSignal,
    ) -> Result<SessionReport, StreamError> {
        let cfg = &self.config;

        let mut sync = ClockSynchronizer::new(&cfg.clock);
        sync.synchronize(radio)?;
        if let Some(tx) = &cfg.tx {
            verify_lo_locked(radio, Direction::Tx, tx.channels[0])?;
        }
        verify_lo_locked(radio, Direction::Rx, cfg.rx.channels[0])?;

        let tx_stream = match &cfg.tx {
            Some(tx) => Some(radio.tx_stream::<S>(&StreamArgs {
                cpu_format: S::FORMAT.cpu_format().to_string(),
                otw_format: tx.otw.clone(),
                channels: tx.channels.clone(),
            })?),
            None => None,
        };
        let rx_stream = radio.rx_stream::<S>(&StreamArgs {
            cpu_format: S::FORMAT.cpu_format().to_string(),
            otw_format: cfg.rx.otw.clone(),
            channels: cfg.rx.channels.clone(),
        })?;

        let spb = match cfg.samples_per_buffer {
            0 => {
                let max = match &tx_stream {
                    Some(stream) => stream.max_num_samps(),
                    None => rx_stream.max_num_samps(),
                };
                max * 10
            }
            n => n,
        };
        log::info!(
            "{} samples per buffer, {} ({} bytes per sample)",
            spb,
            S::FORMAT,
            S::FORMAT.bytes_per_sample()
        );

        let tx_worker = match (&cfg.tx, tx_stream) {
            (Some(tx), Some(stream)) => {
                let source = FileSampleSource::<S>::open(&tx.file, spb)
                    .map_err(|e| StreamError::io(&tx.file, e))?;
                Some(TxWorker::new(
                    source,
                    stream,
                    TxWorkerConfig {
                        channel: tx.channels[0],
                        block_size: spb,
                        repeat: tx.repeat,
                        delay: tx.delay(),
                        warmup: tx.warmup(),
                        send_timeout: tx.send_timeout(),
                    },
                ))
            }
            _ => None,
        };

        let num_channels = cfg.rx.channels.len();
        let mut sinks = Vec::with_capacity(num_channels);
        for (idx, &chan) in cfg.rx.channels.iter().enumerate() {
            let path = channel_filename(&cfg.rx.file, num_channels, idx);
            let sink = ChannelFileSink::<S>::create(&path, chan).map_err(|e| StreamError::io(&path, e))?;
            sinks.push(sink);
        }
        let rx_worker = RxWorker::new(
            rx_stream,
            sinks,
            RxWorkerConfig {
                block_size: spb,
                num_samples: cfg.rx.num_samples,
                settling: cfg.settling(),
                recv_timeout: RECV_TIMEOUT,
                rate: radio.rate(Direction::Rx, cfg.rx.channels[0])?,
            },
        )?;

        let _interrupt = if cfg.is_continuous() && cfg.handle_interrupt {
            log::info!("press Ctrl+C to stop streaming...");
            Some(InterruptListener::install(stop.clone()).map_err(StreamError::Signal)?)
        } else {
            None
        };

        radio.set_time_now(TimeSpec::ZERO, None)?;
        let (tx, rx) = self.supervise(stop, tx_worker, rx_worker)?;

        Ok(SessionReport {
            format: S::FORMAT,
            samples_per_buffer: spb,
            clock: sync.domains().to_vec(),
            tx,
            rx,
        })
    }

    /// Run both workers in one scope. Receive exit or a transmit failure
    /// ends the session; a transmit pass that simply finished leaves the
    /// receiver running. Both workers are joined before returning, and
    /// when both fail the earlier failure is reported.
    fn supervise<S, T, R>(
        &self,
        stop: &StopSignal,
        tx_worker: Option<TxWorker<S, T>>,
        rx_worker: RxWorker<S, R>,
    ) -> Result<(Option<TxReport>, RxReport), StreamError>
    where
        S: Sample,
        T: TxStreamer<S>,
        R: RxStreamer<S>,
    {
        let (events_tx, events_rx) = channel::unbounded();

        let (tx_result, rx_result, exits) = thread::scope(|s| {
            let tx_handle = tx_worker.map(|worker| {
                let events = events_tx.clone();
                s.spawn(move || {
                    let mut notice = ExitNotice::new(Worker::Tx, events);
                    let result = worker.run(stop);
                    notice.ok = result.is_ok();
                    result
                })
            });
            let rx_handle = {
                let events = events_tx.clone();
                s.spawn(move || {
                    let mut notice = ExitNotice::new(Worker::Rx, events);
                    let result = rx_worker.run(stop);
                    notice.ok = result.is_ok();
                    result
                })
            };
            drop(events_tx);

            let mut exits = Vec::with_capacity(2);
            for (worker, ok) in events_rx.iter() {
                exits.push((worker, ok));
                if worker == Worker::Rx || !ok {
                    break;
                }
                log::debug!("TX finished, receiver keeps running");
            }
            if stop.trigger() {
                log::debug!("stopping workers");
            }

            let tx_result = tx_handle.map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(StreamError::WorkerPanicked("TX")))
            });
            let rx_result = rx_handle
                .join()
                .unwrap_or_else(|_| Err(StreamError::WorkerPanicked("RX")));
            exits.extend(events_rx.try_iter());
            (tx_result, rx_result, exits)
        });

        let first_failure = exits.iter().find(|(_, ok)| !ok).map(|(worker, _)| *worker);
        match (tx_result.transpose(), rx_result) {
            (Ok(tx), Ok(rx)) => Ok((tx, rx)),
            (Err(e), Ok(_)) | (Ok(_), Err(e)) => Err(e),
            (Err(tx_err), Err(rx_err)) => {
                if first_failure == Some(Worker::Rx) {
                    log::error!("TX also failed: {}", tx_err);
                    Err(rx_err)
                } else {
                    log::error!("RX also failed: {}", rx_err);
                    Err(tx_err)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClockConfig, RxConfig, TxConfig};
    use crate::rx::RxExit;
    use std::io::Write;
    use std::path::Path;
    use txrx_sdr::sim::{RecvHook, SimConfig, SimEvent, SimRadio};
    use txrx_sdr::TxMetadata;

    fn rx_config(dir: &Path, channels: Vec<usize>, num_samples: usize) -> RxConfig {
        RxConfig {
            file: dir.join("rx.dat"),
            channels,
            num_samples,
            settling_secs: 0.01,
            ..Default::default()
        }
    }

    fn session_config(rx: RxConfig) -> SessionConfig {
        SessionConfig {
            samples_per_buffer: 1000,
            clock: ClockConfig {
                settle_ms: 0,
                ..Default::default()
            },
            rx,
            handle_interrupt: false,
            ..Default::default()
        }
    }

    fn tx_file(dir: &Path, n: usize) -> std::path::PathBuf {
        let path = dir.join("tx.dat");
        let samples: Vec<Complex<i16>> = (0..n).map(|i| Complex::new(i as i16, 0)).collect();
        let mut bytes = Vec::new();
        Complex::<i16>::write_le(&samples, &mut bytes);
        std::fs::File::create(&path).unwrap().write_all(&bytes).unwrap();
        path
    }

    fn file_len(path: &Path) -> u64 {
        std::fs::metadata(path).unwrap().len()
    }

    fn sends(radio: &SimRadio) -> Vec<TxMetadata> {
        radio
            .events()
            .into_iter()
            .filter_map(|e| match e {
                SimEvent::Send { md, .. } => Some(md),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_continuous_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(session_config(rx_config(dir.path(), vec![0, 1], 0)));
        let stop = session.stop_signal();
        let mut radio = SimRadio::new(SimConfig {
            rx_hook: Some(RecvHook::new(move |calls| {
                if calls == 5 {
                    stop.trigger();
                }
            })),
            ..Default::default()
        });

        let report = session.run(&mut radio).unwrap();
        assert_eq!(report.rx.exit, RxExit::Stopped);
        assert_eq!(report.rx.calls, 5);
        assert_eq!(file_len(&dir.path().join("rx.00.dat")), 5000 * 4);
        assert_eq!(file_len(&dir.path().join("rx.01.dat")), 5000 * 4);
        assert!(!dir.path().join("rx.dat").exists());
    }

    #[test]
    fn test_rerun_after_stop_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(session_config(rx_config(dir.path(), vec![0], 0)));
        let stop = session.stop_signal();
        let mut radio = SimRadio::new(SimConfig {
            rx_hook: Some(RecvHook::new(move |calls| {
                if calls == 2 {
                    stop.trigger();
                }
            })),
            ..Default::default()
        });
        let first = session.run(&mut radio).unwrap();
        assert_eq!(first.rx.exit, RxExit::Stopped);
        assert!(!session.stop_signal().is_set());

        // A second continuous run answers to the handle taken between runs
        let stop = session.stop_signal();
        let mut radio = SimRadio::new(SimConfig {
            rx_hook: Some(RecvHook::new(move |calls| {
                if calls == 4 {
                    stop.trigger();
                }
            })),
            ..Default::default()
        });
        let second = session.run(&mut radio).unwrap();
        assert_eq!(second.rx.exit, RxExit::Stopped);
        assert_eq!(second.rx.calls, 4);
        assert_eq!(file_len(&dir.path().join("rx.dat")), 4000 * 4);
    }

    #[test]
    fn test_finite_rerun_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(session_config(rx_config(dir.path(), vec![0], 2000)));
        for _ in 0..2 {
            let mut radio = SimRadio::new(SimConfig::default());
            let report = session.run(&mut radio).unwrap();
            assert_eq!(report.rx.exit, RxExit::Completed);
            assert_eq!(report.rx.samples, 2000);
            assert_eq!(file_len(&dir.path().join("rx.dat")), 2000 * 4);
        }
    }

    #[test]
    fn test_tx_on_second_channel() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = session_config(rx_config(dir.path(), vec![0], 1000));
        cfg.tx = Some(TxConfig {
            file: tx_file(dir.path(), 100),
            channels: vec![1],
            ..Default::default()
        });
        let mut radio = SimRadio::new(SimConfig::default());
        Session::new(cfg).run(&mut radio).unwrap();

        assert!(radio
            .events()
            .iter()
            .any(|e| matches!(e, SimEvent::TxStreamCreated { channels } if channels == &vec![1])));
    }

    #[test]
    fn test_finite_capture_overshoots() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = session_config(rx_config(dir.path(), vec![0], 2500));
        cfg.format = SampleFormat::Fc64;
        let mut radio = SimRadio::new(SimConfig::default());

        let report = Session::new(cfg).run(&mut radio).unwrap();
        assert_eq!(report.format, SampleFormat::Fc64);
        assert_eq!(report.rx.exit, RxExit::Completed);
        assert_eq!(report.rx.calls, 3);
        assert_eq!(report.rx.samples, 3000);
        assert_eq!(file_len(&dir.path().join("rx.dat")), 3000 * 16);
        assert!(report.tx.is_none());
    }

    #[test]
    fn test_tx_file_played_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = session_config(rx_config(dir.path(), vec![0], 0));
        cfg.samples_per_buffer = 100;
        cfg.tx = Some(TxConfig {
            file: tx_file(dir.path(), 300),
            ..Default::default()
        });
        let session = Session::new(cfg);
        let stop = session.stop_signal();
        // The receiver outlives the three sends by a wide margin
        let mut radio = SimRadio::new(SimConfig {
            rx_call_delay: Duration::from_millis(10),
            rx_hook: Some(RecvHook::new(move |calls| {
                if calls == 30 {
                    stop.trigger();
                }
            })),
            ..Default::default()
        });

        let report = session.run(&mut radio).unwrap();
        let tx = report.tx.unwrap();
        assert_eq!((tx.sends, tx.samples, tx.passes), (3, 300, 1));

        let sends = sends(&radio);
        assert_eq!(sends.len(), 3);
        let eob: Vec<bool> = sends.iter().map(|md| md.end_of_burst).collect();
        assert_eq!(eob, vec![false, false, true]);
        assert_eq!(sends[0].time_spec, Some(TimeSpec::from_secs(0.8)));
        assert_eq!(report.rx.samples, 30 * 100);
    }

    #[test]
    fn test_lock_failure_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = tempfile::tempdir().unwrap();
        let mut cfg = session_config(rx_config(dir.path(), vec![0, 1], 0));
        cfg.clock.slaves = vec![1];
        cfg.tx = Some(TxConfig {
            file: tx_file(input.path(), 300),
            ..Default::default()
        });
        let mut radio = SimRadio::new(SimConfig {
            num_boards: 2,
            mimo_locked: vec![true, false],
            ..Default::default()
        });

        let err = Session::new(cfg).run(&mut radio).unwrap_err();
        assert!(matches!(err, StreamError::Lock { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(!radio.events().iter().any(|e| matches!(
            e,
            SimEvent::TxStreamCreated { .. }
                | SimEvent::RxStreamCreated { .. }
                | SimEvent::StreamCmd(_)
                | SimEvent::Send { .. }
        )));
    }

    #[test]
    fn test_time_reset_before_streaming() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = session_config(rx_config(dir.path(), vec![0], 1000));
        cfg.tx = Some(TxConfig {
            file: tx_file(dir.path(), 100),
            ..Default::default()
        });
        let mut radio = SimRadio::new(SimConfig::default());
        Session::new(cfg).run(&mut radio).unwrap();

        let events = radio.events();
        let position = |f: &dyn Fn(&SimEvent) -> bool| events.iter().position(f).unwrap();
        let reset = position(&|e: &SimEvent| matches!(e, SimEvent::SetTimeNow { board: None, .. }));
        let created = position(&|e: &SimEvent| matches!(e, SimEvent::RxStreamCreated { .. }));
        let started = position(&|e: &SimEvent| matches!(e, SimEvent::StreamCmd(_)));
        assert!(created < reset);
        assert!(reset < started);
        if let Some(send) = events.iter().position(|e| matches!(e, SimEvent::Send { .. })) {
            assert!(reset < send);
        }
    }

    #[test]
    fn test_short_send_stops_receiver() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = session_config(rx_config(dir.path(), vec![0], 0));
        cfg.samples_per_buffer = 100;
        cfg.tx = Some(TxConfig {
            file: tx_file(dir.path(), 300),
            ..Default::default()
        });
        let mut radio = SimRadio::new(SimConfig {
            tx_accept_limit: Some(10),
            rx_call_delay: Duration::from_millis(1),
            ..Default::default()
        });

        let err = Session::new(cfg).run(&mut radio).unwrap_err();
        assert!(matches!(err, StreamError::SendShortfall { requested: 100, sent: 10 }));
        let last_cmd = radio
            .events()
            .into_iter()
            .filter_map(|e| match e {
                SimEvent::StreamCmd(cmd) => Some(cmd),
                _ => None,
            })
            .last()
            .unwrap();
        assert_eq!(last_cmd.mode, txrx_sdr::StreamMode::StopContinuous);
        assert!(dir.path().join("rx.dat").exists());
    }

    #[test]
    fn test_default_buffer_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = session_config(rx_config(dir.path(), vec![0], 1000));
        cfg.samples_per_buffer = 0;
        let mut radio = SimRadio::new(SimConfig::default());

        let report = Session::new(cfg).run(&mut radio).unwrap();
        assert_eq!(report.samples_per_buffer, 20400);
    }

    #[test]
    fn test_invalid_config_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = session_config(rx_config(dir.path(), Vec::new(), 0));
        let mut radio = SimRadio::new(SimConfig::default());

        let err = Session::new(cfg).run(&mut radio).unwrap_err();
        assert!(err.is_configuration());
        assert!(radio.events().is_empty());
    }
}
