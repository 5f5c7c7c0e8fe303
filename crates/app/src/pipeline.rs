// Copyright 2025-2026 CEMAXECUTER LLC

use std::time::Duration;

use txrx_sdr::sim::{SimConfig, SimRadio};
use txrx_sdr::{DeviceError, Direction, Frontend, Radio, TuneRequest};
use txrx_stream::{Session, SessionConfig, SessionReport, StreamError, TxConfig};

use crate::Cli;

/// Front-end settings for one direction, taken from the command line.
#[derive(Debug, Clone, PartialEq)]
struct FrontendSettings {
    rate: f64,
    freq: f64,
    integer_n: bool,
    gain: Option<f64>,
    bandwidth: Option<f64>,
    antenna: Option<String>,
    subdev: Option<String>,
}

/// Session settings from `--config` (if any) with command-line flags on top.
pub fn build_config(cli: &Cli) -> Result<SessionConfig, StreamError> {
    let mut cfg = match &cli.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };

    if let Some(name) = &cli.sample_type {
        cfg.format = name.parse()?;
    }
    if let Some(spb) = cli.spb {
        cfg.samples_per_buffer = spb;
    }
    if let Some(master) = cli.master {
        cfg.clock.master = master;
    }
    if let Some(slaves) = &cli.slaves {
        cfg.clock.slaves = slaves.clone();
    }

    if let Some(file) = &cli.file_write {
        cfg.rx.file = file.clone();
    }
    if let Some(channels) = &cli.rx_channels {
        cfg.rx.channels = channels.clone();
    }
    if let Some(n) = cli.nsamps {
        cfg.rx.num_samples = n;
    }
    if let Some(settling) = cli.settling {
        cfg.rx.settling_secs = settling;
    }

    if let Some(file) = &cli.file_tx {
        cfg.tx.get_or_insert_with(TxConfig::default).file = file.clone();
    }
    if let Some(tx) = cfg.tx.as_mut() {
        tx.repeat |= cli.repeat;
        if let Some(delay) = cli.delay {
            tx.delay_secs = delay;
        }
        if let Some(channels) = &cli.tx_channels {
            tx.channels = channels.clone();
        }
        if let Some(otw) = &cli.otw {
            tx.otw = otw.clone();
        }
    }
    if let Some(otw) = &cli.otw {
        cfg.rx.otw = otw.clone();
    }

    Ok(cfg)
}

fn required(value: Option<f64>, what: &str, flag: &str) -> Result<f64, StreamError> {
    match value {
        Some(v) if v > 0.0 => Ok(v),
        Some(v) => Err(StreamError::Config(format!("{} must be positive, got {}", what, v))),
        None => Err(StreamError::Config(format!("please specify the {} with --{}", what, flag))),
    }
}

fn frontend_settings(cli: &Cli, dir: Direction) -> Result<FrontendSettings, StreamError> {
    Ok(match dir {
        Direction::Tx => FrontendSettings {
            rate: required(cli.tx_rate, "transmit sample rate", "tx-rate")?,
            freq: required(cli.tx_freq, "transmit center frequency", "tx-freq")?,
            integer_n: cli.tx_int_n,
            gain: cli.tx_gain,
            bandwidth: cli.tx_bw,
            antenna: cli.tx_ant.clone(),
            subdev: cli.tx_subdev.clone(),
        },
        Direction::Rx => FrontendSettings {
            rate: required(cli.rx_rate, "receive sample rate", "rx-rate")?,
            freq: required(cli.rx_freq, "receive center frequency", "rx-freq")?,
            integer_n: cli.rx_int_n,
            gain: cli.rx_gain,
            bandwidth: cli.rx_bw,
            antenna: cli.rx_ant.clone(),
            subdev: cli.rx_subdev.clone(),
        },
    })
}

fn configure_direction<R: Frontend>(
    radio: &mut R,
    dir: Direction,
    channels: &[usize],
    settings: &FrontendSettings,
) -> Result<(), DeviceError> {
    for &chan in channels {
        log::info!("configuring {} channel {}", dir, chan);

        radio.set_rate(dir, settings.rate, chan)?;
        log::info!(
            "{} rate: {:.3} Msps (actual {:.3})",
            dir,
            settings.rate / 1e6,
            radio.rate(dir, chan)? / 1e6
        );

        let tune = TuneRequest {
            integer_n: settings.integer_n,
            ..TuneRequest::new(settings.freq)
        };
        radio.set_freq(dir, &tune, chan)?;
        log::info!(
            "{} freq: {:.3} MHz (actual {:.3})",
            dir,
            settings.freq / 1e6,
            radio.freq(dir, chan)? / 1e6
        );

        if let Some(gain) = settings.gain {
            radio.set_gain(dir, gain, chan)?;
            log::info!("{} gain: {} dB (actual {})", dir, gain, radio.gain(dir, chan)?);
        }
        if let Some(bw) = settings.bandwidth {
            radio.set_bandwidth(dir, bw, chan)?;
            log::info!(
                "{} bandwidth: {:.3} MHz (actual {:.3})",
                dir,
                bw / 1e6,
                radio.bandwidth(dir, chan)? / 1e6
            );
        }
        if let Some(ant) = &settings.antenna {
            radio.set_antenna(dir, ant, chan)?;
        }
    }
    Ok(())
}

/// Subdevice specs, then rate, frequency, gain, bandwidth and antenna for
/// every channel in use.
fn configure_frontend<R: Radio>(
    radio: &mut R,
    cfg: &SessionConfig,
    tx: Option<&FrontendSettings>,
    rx: &FrontendSettings,
) -> Result<(), DeviceError> {
    let master = cfg.clock.master;
    let rx_board = cfg.clock.slaves.first().copied().unwrap_or(master);

    if let Some(spec) = tx.and_then(|s| s.subdev.as_deref()) {
        log::info!("TX subdevice {} on board {}", spec, master);
        radio.set_subdev_spec(Direction::Tx, spec, master)?;
    }
    if let Some(spec) = &rx.subdev {
        log::info!("RX subdevice {} on board {}", spec, rx_board);
        radio.set_subdev_spec(Direction::Rx, spec, rx_board)?;
    }

    if let (Some(settings), Some(tx_cfg)) = (tx, &cfg.tx) {
        configure_direction(radio, Direction::Tx, &tx_cfg.channels, settings)?;
    }
    configure_direction(radio, Direction::Rx, &cfg.rx.channels, rx)
}

fn sim_config(cli: &Cli, cfg: &SessionConfig, rx_rate: f64) -> Result<SimConfig, StreamError> {
    let defaults = SimConfig::default();
    let boards_named = if cli.rx_args.is_empty() { 1 } else { 2 };
    let boards_used = cfg.clock.slaves.iter().chain([&cfg.clock.master]).max().map_or(1, |b| b + 1);
    let channels_used = cfg
        .rx
        .channels
        .iter()
        .chain(cfg.tx.iter().flat_map(|tx| tx.channels.iter()))
        .max()
        .map_or(1, |c| c + 1);

    // Paced like hardware running at the receive rate
    let rx_call_delay = Duration::try_from_secs_f64(defaults.rx_samples_per_call as f64 / rx_rate)
        .map_err(|e| StreamError::Config(format!("RX rate {} cannot pace the simulator: {}", rx_rate, e)))?;

    Ok(SimConfig {
        num_boards: boards_named.max(boards_used),
        num_channels: defaults.num_channels.max(channels_used),
        rx_call_delay,
        ..defaults
    })
}

/// Run one streaming session from command-line settings.
pub fn run(cli: &Cli) -> Result<SessionReport, StreamError> {
    let mut cfg = build_config(cli)?;
    let tx = match cfg.tx {
        Some(_) => Some(frontend_settings(cli, Direction::Tx)?),
        None => None,
    };
    let rx = frontend_settings(cli, Direction::Rx)?;
    let slaves_given = cli.slaves.is_some() || cli.config.is_some();

    if cli.sim {
        let mut radio = SimRadio::new(sim_config(cli, &cfg, rx.rate)?);
        if !slaves_given {
            default_slaves(&mut cfg, radio.num_boards());
        }
        return run_on(&mut radio, cfg, tx.as_ref(), &rx);
    }

    run_hardware(cli, cfg, slaves_given, tx.as_ref(), &rx)
}

#[cfg(feature = "usrp")]
fn run_hardware(
    cli: &Cli,
    mut cfg: SessionConfig,
    slaves_given: bool,
    tx: Option<&FrontendSettings>,
    rx: &FrontendSettings,
) -> Result<SessionReport, StreamError> {
    use txrx_sdr::usrp::UsrpRadio;

    let mut boards = vec![cli.tx_args.as_str()];
    if !cli.rx_args.is_empty() {
        boards.push(cli.rx_args.as_str());
    }
    let args = UsrpRadio::multi_board_args(&boards);
    log::info!("creating the usrp device with: {}", args);
    let mut radio = UsrpRadio::open(&args)?;
    if !slaves_given {
        default_slaves(&mut cfg, radio.num_boards());
    }
    run_on(&mut radio, cfg, tx, rx)
}

#[cfg(not(feature = "usrp"))]
fn run_hardware(
    _cli: &Cli,
    _cfg: SessionConfig,
    _slaves_given: bool,
    _tx: Option<&FrontendSettings>,
    _rx: &FrontendSettings,
) -> Result<SessionReport, StreamError> {
    Err(StreamError::Config(
        "built without UHD support; rebuild with --features usrp or pass --sim".to_string(),
    ))
}

/// Every board other than the master follows it.
fn default_slaves(cfg: &mut SessionConfig, num_boards: usize) {
    let master = cfg.clock.master;
    cfg.clock.slaves = (0..num_boards).filter(|&b| b != master).collect();
}

fn run_on<R: Radio>(
    radio: &mut R,
    cfg: SessionConfig,
    tx: Option<&FrontendSettings>,
    rx: &FrontendSettings,
) -> Result<SessionReport, StreamError> {
    log::info!("using devices: {}", radio.pp_string());
    cfg.validate(radio.num_boards())?;
    configure_frontend(radio, &cfg, tx, rx)?;

    let report = Session::new(cfg).run(radio)?;

    if let Some(tx) = &report.tx {
        log::info!("TX: {} samples, {} sends, {} pass(es)", tx.samples, tx.sends, tx.passes);
    }
    log::info!(
        "RX: {} samples per channel, {} calls, {} overflow(s), ended {:?}",
        report.rx.samples,
        report.rx.calls,
        report.rx.overflows,
        report.rx.exit
    );
    for file in &report.rx.files {
        log::info!("  channel {}: {} ({} bytes)", file.channel, file.path.display(), file.bytes);
    }
    Ok(report)
}
