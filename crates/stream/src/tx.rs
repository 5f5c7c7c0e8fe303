// Copyright 2025-2026 CEMAXECUTER LLC

use std::time::Duration;

use serde::Serialize;
use txrx_sdr::{FileSampleSource, Sample, SampleBlock, TimeSpec, TxMetadata, TxStreamer};

use crate::error::StreamError;
use crate::stop::StopSignal;

#[derive(Debug, Clone, PartialEq)]
pub struct TxWorkerConfig {
    /// Channel the file is played on
    pub channel: usize,
    /// Samples per send
    pub block_size: usize,
    pub repeat: bool,
    /// Not applied between passes; only reported
    pub delay: Duration,
    /// Device-time offset of the very first send
    pub warmup: Duration,
    pub send_timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TxReport {
    pub sends: u64,
    pub samples: u64,
    /// Completed passes over the file
    pub passes: u64,
}

/// Plays a sample file into a transmit stream, one burst per pass.
pub struct TxWorker<S: Sample, T: TxStreamer<S>> {
    source: FileSampleSource<S>,
    stream: T,
    config: TxWorkerConfig,
}

impl<S: Sample, T: TxStreamer<S>> TxWorker<S, T> {
    pub fn new(source: FileSampleSource<S>, stream: T, config: TxWorkerConfig) -> Self {
        Self {
            source,
            stream,
            config,
        }
    }

    pub fn run(mut self, stop: &StopSignal) -> Result<TxReport, StreamError> {
        let cfg = self.config.clone();
        let mut block = SampleBlock::new(cfg.channel, cfg.block_size);
        let mut report = TxReport::default();
        let mut first_send = true;

        if cfg.repeat && !cfg.delay.is_zero() {
            log::warn!("repeat delay of {:?} is not applied between passes", cfg.delay);
        }

        'passes: loop {
            let mut start_of_burst = true;
            let mut pass_samples = 0u64;

            loop {
                if stop.is_set() {
                    if !start_of_burst {
                        self.close_burst()?;
                    }
                    break 'passes;
                }

                let read = self
                    .source
                    .read_block(&mut block)
                    .map_err(|e| StreamError::io(self.source.path(), e))?;

                let (time_spec, timeout) = if first_send {
                    (
                        Some(TimeSpec::from_duration(cfg.warmup)),
                        cfg.warmup + cfg.send_timeout,
                    )
                } else {
                    (None, cfg.send_timeout)
                };
                let md = TxMetadata {
                    start_of_burst,
                    end_of_burst: read.end_of_stream,
                    time_spec,
                };

                let sent = self.stream.send(block.samples(), &md, timeout)?;
                report.sends += 1;
                report.samples += sent as u64;
                pass_samples += sent as u64;
                log::trace!(
                    "ch{}: sent {}/{} samples, eob={}",
                    block.channel,
                    sent,
                    read.num_samples,
                    md.end_of_burst
                );

                if sent < read.num_samples {
                    log::error!(
                        "the tx_stream timed out sending {} samples ({} sent)",
                        read.num_samples,
                        sent
                    );
                    return Err(StreamError::SendShortfall {
                        requested: read.num_samples,
                        sent,
                    });
                }

                first_send = false;
                start_of_burst = false;
                if read.end_of_stream {
                    break;
                }
            }

            report.passes += 1;
            log::debug!("TX pass {} done, {} samples", report.passes, pass_samples);

            if !cfg.repeat || stop.is_set() {
                break;
            }
            if pass_samples == 0 {
                log::warn!("{} holds no samples, not repeating", self.source.path().display());
                break;
            }
            self.source
                .rewind()
                .map_err(|e| StreamError::io(self.source.path(), e))?;
        }

        log::info!(
            "TX done: {} samples in {} sends, {} pass(es)",
            report.samples,
            report.sends,
            report.passes
        );
        Ok(report)
    }

    /// Terminate a burst cut short by the stop signal.
    fn close_burst(&mut self) -> Result<(), StreamError> {
        let md = TxMetadata {
            end_of_burst: true,
            ..Default::default()
        };
        self.stream.send(&[], &md, self.config.send_timeout)?;
        log::debug!("TX stopped mid-burst, sent end of burst");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex;
    use std::io::Write;
    use txrx_sdr::sim::{SimConfig, SimEvent, SimRadio, SimTxStream};
    use txrx_sdr::{Radio, StreamArgs};

    use std::time::Instant;

    type Sc16 = Complex<i16>;

    fn sample_file(n: usize) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        let samples: Vec<Sc16> = (0..n).map(|i| Complex::new(i as i16, -(i as i16))).collect();
        let mut bytes = Vec::new();
        Sc16::write_le(&samples, &mut bytes);
        f.write_all(&bytes).unwrap();
        f.flush().unwrap();
        f
    }

    fn config(block_size: usize, repeat: bool) -> TxWorkerConfig {
        TxWorkerConfig {
            channel: 0,
            block_size,
            repeat,
            delay: Duration::ZERO,
            warmup: Duration::from_millis(800),
            send_timeout: Duration::from_millis(100),
        }
    }

    fn stream(radio: &mut SimRadio) -> SimTxStream<Sc16> {
        let args = StreamArgs {
            cpu_format: "sc16".to_string(),
            otw_format: "sc16".to_string(),
            channels: vec![0],
        };
        radio.tx_stream::<Sc16>(&args).unwrap()
    }

    fn sends(radio: &SimRadio) -> Vec<(usize, TxMetadata)> {
        radio
            .events()
            .into_iter()
            .filter_map(|e| match e {
                SimEvent::Send { num_samples, md, .. } => Some((num_samples, md)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_single_pass_bursts() {
        let file = sample_file(300);
        let mut radio = SimRadio::new(SimConfig::default());
        let source = FileSampleSource::open(file.path(), 100).unwrap();
        let worker = TxWorker::new(source, stream(&mut radio), config(100, false));

        let report = worker.run(&StopSignal::new()).unwrap();
        assert_eq!(report, TxReport { sends: 3, samples: 300, passes: 1 });

        let sends = sends(&radio);
        assert_eq!(sends.len(), 3);
        let eob: Vec<bool> = sends.iter().map(|(_, md)| md.end_of_burst).collect();
        assert_eq!(eob, vec![false, false, true]);
        assert!(sends[0].1.start_of_burst);
        assert!(!sends[1].1.start_of_burst);
        assert_eq!(sends[0].1.time_spec, Some(TimeSpec::from_secs(0.8)));
        assert!(sends[1..].iter().all(|(_, md)| md.time_spec.is_none()));
    }

    #[test]
    fn test_short_send_is_fatal() {
        let file = sample_file(300);
        let mut radio = SimRadio::new(SimConfig {
            tx_accept_limit: Some(60),
            ..Default::default()
        });
        let source = FileSampleSource::open(file.path(), 100).unwrap();
        let worker = TxWorker::new(source, stream(&mut radio), config(100, false));

        let err = worker.run(&StopSignal::new()).unwrap_err();
        assert!(matches!(err, StreamError::SendShortfall { requested: 100, sent: 60 }));
        assert_eq!(sends(&radio).len(), 1);
    }

    #[test]
    fn test_repeat_rewinds_until_stopped() {
        let file = sample_file(250);
        let stop = StopSignal::new();
        let mut radio = SimRadio::new(SimConfig::default());
        let source = FileSampleSource::open(file.path(), 100).unwrap();
        let mut cfg = config(100, true);
        cfg.delay = Duration::from_secs(5);

        let stream = StopAfter {
            inner: stream(&mut radio),
            remaining: 7,
            stop: stop.clone(),
        };
        let started = Instant::now();
        let report = TxWorker::new(source, stream, cfg).run(&stop).unwrap();
        // No delay is slept between passes
        assert!(started.elapsed() < Duration::from_secs(1));

        // Two full passes of three sends, one send into the third, then the
        // closing end-of-burst
        assert_eq!(report.passes, 2);
        let sends = sends(&radio);
        assert_eq!(sends.len(), 8);
        let sizes: Vec<usize> = sends.iter().map(|(n, _)| *n).collect();
        assert_eq!(sizes, vec![100, 100, 50, 100, 100, 50, 100, 0]);
        assert!(sends[3].1.start_of_burst);
        assert!(sends[3].1.time_spec.is_none());
        assert!(sends[7].1.end_of_burst);
    }

    /// Triggers the stop signal after a number of sends.
    struct StopAfter {
        inner: SimTxStream<Sc16>,
        remaining: usize,
        stop: StopSignal,
    }

    impl TxStreamer<Sc16> for StopAfter {
        fn send(&mut self, buf: &[Sc16], md: &TxMetadata, timeout: Duration) -> Result<usize, txrx_sdr::DeviceError> {
            let n = self.inner.send(buf, md, timeout)?;
            self.remaining = self.remaining.saturating_sub(1);
            if self.remaining == 0 {
                self.stop.trigger();
            }
            Ok(n)
        }

        fn max_num_samps(&self) -> usize {
            self.inner.max_num_samps()
        }
    }
}
