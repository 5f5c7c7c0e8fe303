// Copyright 2025-2026 CEMAXECUTER LLC

mod pipeline;

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "txrx-to-file")]
#[command(about = "Synchronized multi-board TX from file / RX to file")]
pub struct Cli {
    /// Device address args of the transmit (master) board
    #[arg(long, default_value = "")]
    tx_args: String,

    /// Device address args of the receive (slave) board
    #[arg(long, default_value = "")]
    rx_args: String,

    /// Raw IQ file to transmit; receive only when omitted
    #[arg(long)]
    file_tx: Option<PathBuf>,

    /// Raw IQ output file [default: rx.dat]
    #[arg(long)]
    file_write: Option<PathBuf>,

    /// Sample type in files: short, float or double [default: short]
    #[arg(long = "type")]
    sample_type: Option<String>,

    /// Total samples to receive, 0 streams until Ctrl+C [default: 0]
    #[arg(long)]
    nsamps: Option<usize>,

    /// Settling time in seconds before receiving [default: 0.2]
    #[arg(long)]
    settling: Option<f64>,

    /// Samples per buffer, 0 for ten times the streamer maximum [default: 0]
    #[arg(long)]
    spb: Option<usize>,

    /// Transmit sample rate in samples/s
    #[arg(long)]
    tx_rate: Option<f64>,

    /// Receive sample rate in samples/s
    #[arg(long)]
    rx_rate: Option<f64>,

    /// Transmit RF center frequency in Hz
    #[arg(long)]
    tx_freq: Option<f64>,

    /// Receive RF center frequency in Hz
    #[arg(long)]
    rx_freq: Option<f64>,

    /// Transmit gain in dB
    #[arg(long)]
    tx_gain: Option<f64>,

    /// Receive gain in dB
    #[arg(long)]
    rx_gain: Option<f64>,

    /// Transmit antenna
    #[arg(long)]
    tx_ant: Option<String>,

    /// Receive antenna
    #[arg(long)]
    rx_ant: Option<String>,

    /// Transmit subdevice spec, applied to the master board
    #[arg(long)]
    tx_subdev: Option<String>,

    /// Receive subdevice spec, applied to the first slave board
    #[arg(long)]
    rx_subdev: Option<String>,

    /// Analog transmit filter bandwidth in Hz
    #[arg(long)]
    tx_bw: Option<f64>,

    /// Analog receive filter bandwidth in Hz
    #[arg(long)]
    rx_bw: Option<f64>,

    /// Over-the-wire sample format, sc8 or sc16 [default: sc16]
    #[arg(long)]
    otw: Option<String>,

    /// TX channel; a single channel is supported [default: 0]
    #[arg(long, value_delimiter = ',')]
    tx_channels: Option<Vec<usize>>,

    /// Comma-separated RX channel list [default: 0]
    #[arg(long, value_delimiter = ',')]
    rx_channels: Option<Vec<usize>>,

    /// Tune TX with integer-N tuning
    #[arg(long)]
    tx_int_n: bool,

    /// Tune RX with integer-N tuning
    #[arg(long)]
    rx_int_n: bool,

    /// Delay between repeated transmissions in seconds (accepted, not applied)
    #[arg(long)]
    delay: Option<f64>,

    /// Repeatedly transmit the file
    #[arg(long)]
    repeat: bool,

    /// Master board index [default: 0]
    #[arg(long)]
    master: Option<usize>,

    /// Comma-separated slave boards [default: every other board]
    #[arg(long, value_delimiter = ',')]
    slaves: Option<Vec<usize>>,

    /// Session settings as JSON; flags given on the command line override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use the built-in simulated radio instead of hardware
    #[arg(long)]
    sim: bool,

    /// Print the session report as JSON when done
    #[arg(long)]
    report: bool,

    /// Verbose output
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match pipeline::run(&cli) {
        Ok(report) => {
            if cli.report {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{}", json),
                    Err(e) => log::error!("failed to encode report: {}", e),
                }
            }
            log::info!("done");
        }
        Err(e) if e.is_configuration() => {
            eprintln!("error: {}", e);
            std::process::exit(!0);
        }
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    }
}
