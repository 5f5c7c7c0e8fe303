// Copyright 2025-2026 CEMAXECUTER LLC

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use txrx_sdr::{
    ChannelFileSink, RxErrorCode, RxMetadata, RxStreamer, Sample, StreamCmd, StreamMode, TimeSpec,
};

use crate::error::StreamError;
use crate::stop::StopSignal;

#[derive(Debug, Clone, PartialEq)]
pub struct RxWorkerConfig {
    /// Samples per channel per recv
    pub block_size: usize,
    /// Stop after at least this many samples; 0 streams until stopped
    pub num_samples: usize,
    /// Stream command start time, also added to the first recv timeout
    pub settling: Duration,
    pub recv_timeout: Duration,
    /// Sample rate, only used to size the overflow advice
    pub rate: f64,
}

impl RxWorkerConfig {
    pub fn stream_cmd(&self) -> StreamCmd {
        StreamCmd {
            mode: if self.num_samples > 0 {
                StreamMode::NumSampsAndDone
            } else {
                StreamMode::StartContinuous
            },
            num_samps: self.num_samples,
            stream_now: false,
            time_spec: TimeSpec::from_duration(self.settling),
        }
    }
}

/// Why the receive loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RxExit {
    /// Requested sample count reached
    Completed,
    /// Stop signal observed
    Stopped,
    /// No data within the recv timeout
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelFile {
    pub channel: usize,
    pub path: PathBuf,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RxReport {
    pub calls: u64,
    /// Samples written per channel
    pub samples: u64,
    pub overflows: u64,
    /// Overflow warnings logged; at most one per run
    pub overflow_warnings: u64,
    /// Device time of the first received sample, when the device reports one
    pub first_sample_secs: Option<f64>,
    pub exit: RxExit,
    pub files: Vec<ChannelFile>,
}

/// Drains a receive stream into one file per channel.
pub struct RxWorker<S: Sample, R: RxStreamer<S>> {
    stream: R,
    sinks: Vec<ChannelFileSink<S>>,
    config: RxWorkerConfig,
}

impl<S: Sample, R: RxStreamer<S>> RxWorker<S, R> {
    /// `sinks` are matched to the stream's channels in order.
    pub fn new(stream: R, sinks: Vec<ChannelFileSink<S>>, config: RxWorkerConfig) -> Result<Self, StreamError> {
        if sinks.len() != stream.num_channels() {
            return Err(StreamError::Config(format!(
                "{} output files for {} receive channels",
                sinks.len(),
                stream.num_channels()
            )));
        }
        Ok(Self {
            stream,
            sinks,
            config,
        })
    }

    /// Stream until the count is reached, the stop signal is set, a recv
    /// times out, or an error occurs. The stream is stopped and every file
    /// closed on all of these paths.
    pub fn run(mut self, stop: &StopSignal) -> Result<RxReport, StreamError> {
        let mut report = RxReport {
            calls: 0,
            samples: 0,
            overflows: 0,
            overflow_warnings: 0,
            first_sample_secs: None,
            exit: RxExit::Stopped,
            files: Vec::with_capacity(self.sinks.len()),
        };

        let outcome = self.stream_loop(stop, &mut report);
        if let Err(e) = &outcome {
            log::error!("RX failed: {}", e);
        }

        let stopped = self.stream.issue_stream_cmd(&StreamCmd::stop());
        if let Err(e) = &stopped {
            log::error!("failed to stop RX stream: {}", e);
        }

        let mut closed = Ok(());
        for sink in self.sinks {
            let channel = sink.channel();
            let path = sink.path().to_path_buf();
            match sink.close() {
                Ok(bytes) => report.files.push(ChannelFile { channel, path, bytes }),
                Err(e) => {
                    log::error!("closing {}: {}", path.display(), e);
                    if closed.is_ok() {
                        closed = Err(StreamError::io(&path, e));
                    }
                }
            }
        }

        report.exit = outcome?;
        stopped?;
        closed?;

        log::info!(
            "RX done ({:?}): {} samples per channel in {} calls, {} overflow(s)",
            report.exit,
            report.samples,
            report.calls,
            report.overflows
        );
        Ok(report)
    }

    fn stream_loop(&mut self, stop: &StopSignal, report: &mut RxReport) -> Result<RxExit, StreamError> {
        let cfg = &self.config;
        let num_channels = self.sinks.len();
        let mut buffs: Vec<Vec<S>> = (0..num_channels)
            .map(|_| vec![S::default(); cfg.block_size])
            .collect();
        let mut md = RxMetadata::default();

        let cmd = cfg.stream_cmd();
        log::info!(
            "RX {:?} of {} samples at t={:.3}s on {} channel(s)",
            cmd.mode,
            cmd.num_samps,
            cmd.time_spec.as_secs(),
            num_channels
        );
        self.stream.issue_stream_cmd(&cmd)?;

        let mut timeout = cfg.settling + cfg.recv_timeout;
        loop {
            if stop.is_set() {
                return Ok(RxExit::Stopped);
            }
            if cfg.num_samples > 0 && report.samples >= cfg.num_samples as u64 {
                return Ok(RxExit::Completed);
            }

            let mut refs: Vec<&mut [S]> = buffs.iter_mut().map(|b| b.as_mut_slice()).collect();
            let received = self.stream.recv(&mut refs, &mut md, timeout)?;
            timeout = cfg.recv_timeout;
            report.calls += 1;

            match md.error_code {
                RxErrorCode::None => {}
                RxErrorCode::Timeout => {
                    log::warn!("timeout while streaming");
                    return Ok(RxExit::Timeout);
                }
                RxErrorCode::Overflow => {
                    report.overflows += 1;
                    if report.overflow_warnings == 0 {
                        report.overflow_warnings += 1;
                        let mbps = cfg.rate * (S::SIZE * num_channels) as f64 / 1e6;
                        log::warn!(
                            "overflow: samples were dropped and will be missing from the files. \
                             The output medium must sustain {:.1} MB/s. This warning is shown once.",
                            mbps
                        );
                    }
                    continue;
                }
                code => {
                    return Err(StreamError::Receiver { code });
                }
            }

            if md.out_of_sequence {
                log::debug!("out-of-sequence packet after {} samples", report.samples);
            }
            if report.samples == 0 && received > 0 {
                if let Some(t) = md.time_spec {
                    log::debug!("first sample at device time {:.6}s", t.as_secs());
                    report.first_sample_secs = Some(t.as_secs());
                }
            }

            for (sink, buf) in self.sinks.iter_mut().zip(&buffs) {
                sink.append(&buf[..received])
                    .map_err(|e| StreamError::io(sink.path(), e))?;
            }
            report.samples += received as u64;
            log::trace!("received {} samples, total {}", received, report.samples);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex;
    use txrx_sdr::sim::{SimConfig, SimEvent, SimRadio, SimRxStream};
    use txrx_sdr::{channel_filename, Radio, StreamArgs};

    type Fc32 = Complex<f32>;

    fn config(num_samples: usize) -> RxWorkerConfig {
        RxWorkerConfig {
            block_size: 1000,
            num_samples,
            settling: Duration::from_millis(20),
            recv_timeout: Duration::from_millis(10),
            rate: 1e6,
        }
    }

    fn setup(
        sim: SimConfig,
        channels: Vec<usize>,
        dir: &tempfile::TempDir,
    ) -> (SimRadio, SimRxStream<Fc32>, Vec<ChannelFileSink<Fc32>>) {
        let mut radio = SimRadio::new(sim);
        let args = StreamArgs {
            cpu_format: "fc32".to_string(),
            otw_format: "sc16".to_string(),
            channels: channels.clone(),
        };
        let stream = radio.rx_stream::<Fc32>(&args).unwrap();
        let base = dir.path().join("rx.dat");
        let sinks = channels
            .iter()
            .enumerate()
            .map(|(idx, &chan)| {
                ChannelFileSink::create(channel_filename(&base, channels.len(), idx), chan).unwrap()
            })
            .collect();
        (radio, stream, sinks)
    }

    fn stream_cmds(radio: &SimRadio) -> Vec<StreamCmd> {
        radio
            .events()
            .into_iter()
            .filter_map(|e| match e {
                SimEvent::StreamCmd(cmd) => Some(cmd),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_finite_count_overshoots_last_block() {
        let dir = tempfile::tempdir().unwrap();
        let (radio, stream, sinks) = setup(SimConfig::default(), vec![0], &dir);
        let worker = RxWorker::new(stream, sinks, config(2500)).unwrap();

        let report = worker.run(&StopSignal::new()).unwrap();
        assert_eq!(report.exit, RxExit::Completed);
        assert_eq!(report.calls, 3);
        assert_eq!(report.samples, 3000);
        assert_eq!(report.files.len(), 1);
        assert_eq!(report.files[0].path, dir.path().join("rx.dat"));
        assert_eq!(std::fs::metadata(&report.files[0].path).unwrap().len(), 3000 * 8);

        let cmds = stream_cmds(&radio);
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].mode, StreamMode::NumSampsAndDone);
        assert_eq!(cmds[0].num_samps, 2500);
        assert!(!cmds[0].stream_now);
        assert_eq!(cmds[0].time_spec, TimeSpec::from_duration(Duration::from_millis(20)));
        assert_eq!(cmds[1].mode, StreamMode::StopContinuous);
    }

    #[test]
    fn test_first_recv_timeout_includes_settling() {
        let dir = tempfile::tempdir().unwrap();
        let (radio, stream, sinks) = setup(SimConfig::default(), vec![0], &dir);
        RxWorker::new(stream, sinks, config(2000))
            .unwrap()
            .run(&StopSignal::new())
            .unwrap();

        let timeouts: Vec<Duration> = radio
            .events()
            .into_iter()
            .filter_map(|e| match e {
                SimEvent::Recv { timeout, .. } => Some(timeout),
                _ => None,
            })
            .collect();
        assert_eq!(timeouts, vec![Duration::from_millis(30), Duration::from_millis(10)]);
    }

    #[test]
    fn test_overflow_dropped_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let sim = SimConfig {
            rx_error_script: vec![RxErrorCode::Overflow, RxErrorCode::None, RxErrorCode::Overflow],
            ..Default::default()
        };
        let (_radio, stream, sinks) = setup(sim, vec![0, 1], &dir);
        let report = RxWorker::new(stream, sinks, config(2000))
            .unwrap()
            .run(&StopSignal::new())
            .unwrap();

        assert_eq!(report.overflows, 2);
        assert_eq!(report.overflow_warnings, 1);
        assert_eq!(report.calls, 4);
        assert_eq!(report.samples, 2000);
        for (idx, file) in report.files.iter().enumerate() {
            assert_eq!(file.channel, idx);
            assert_eq!(file.path, dir.path().join(format!("rx.{:02}.dat", idx)));
            assert_eq!(file.bytes, 2000 * 8);
        }
    }

    #[test]
    fn test_overflow_warning_shown_once() {
        let dir = tempfile::tempdir().unwrap();
        let sim = SimConfig {
            rx_error_script: vec![
                RxErrorCode::Overflow,
                RxErrorCode::Overflow,
                RxErrorCode::None,
                RxErrorCode::Overflow,
            ],
            ..Default::default()
        };
        let (_radio, stream, sinks) = setup(sim, vec![0], &dir);
        let report = RxWorker::new(stream, sinks, config(2000))
            .unwrap()
            .run(&StopSignal::new())
            .unwrap();

        assert_eq!(report.overflows, 3);
        assert_eq!(report.overflow_warnings, 1);
        assert_eq!(report.calls, 5);
        assert_eq!(report.exit, RxExit::Completed);
    }

    #[test]
    fn test_first_sample_time_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (_radio, stream, sinks) = setup(SimConfig::default(), vec![0], &dir);
        let report = RxWorker::new(stream, sinks, config(3000))
            .unwrap()
            .run(&StopSignal::new())
            .unwrap();

        // Stamped with the delayed start of the stream command
        let t = report.first_sample_secs.unwrap();
        assert!((t - 0.02).abs() < 1e-9, "{}", t);
        assert_eq!(report.overflow_warnings, 0);
    }

    #[test]
    fn test_timeout_ends_stream() {
        let dir = tempfile::tempdir().unwrap();
        let sim = SimConfig {
            rx_call_budget: Some(2),
            ..Default::default()
        };
        let (radio, stream, sinks) = setup(sim, vec![0], &dir);
        let report = RxWorker::new(stream, sinks, config(0))
            .unwrap()
            .run(&StopSignal::new())
            .unwrap();

        assert_eq!(report.exit, RxExit::Timeout);
        assert_eq!(report.calls, 3);
        assert_eq!(report.files[0].bytes, 2000 * 8);
        let cmds = stream_cmds(&radio);
        assert_eq!(cmds[0].mode, StreamMode::StartContinuous);
        assert_eq!(cmds.last().unwrap().mode, StreamMode::StopContinuous);
    }

    #[test]
    fn test_receiver_error_still_closes() {
        let dir = tempfile::tempdir().unwrap();
        let sim = SimConfig {
            rx_error_script: vec![RxErrorCode::None, RxErrorCode::BadPacket],
            ..Default::default()
        };
        let (radio, stream, sinks) = setup(sim, vec![0], &dir);
        let err = RxWorker::new(stream, sinks, config(0))
            .unwrap()
            .run(&StopSignal::new())
            .unwrap_err();

        assert!(matches!(err, StreamError::Receiver { code: RxErrorCode::BadPacket }));
        assert_eq!(stream_cmds(&radio).last().unwrap().mode, StreamMode::StopContinuous);
        // The block before the error was flushed on close
        let len = std::fs::metadata(dir.path().join("rx.dat")).unwrap().len();
        assert_eq!(len, 1000 * 8);
    }

    #[test]
    fn test_sink_count_must_match_channels() {
        let dir = tempfile::tempdir().unwrap();
        let (_radio, stream, mut sinks) = setup(SimConfig::default(), vec![0, 1], &dir);
        sinks.pop();
        let err = RxWorker::new(stream, sinks, config(0)).err().unwrap();
        assert!(err.is_configuration());
    }
}
