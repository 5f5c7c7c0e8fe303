// Copyright 2025-2026 CEMAXECUTER LLC

use std::ffi::{CStr, CString};
use std::marker::PhantomData;
use std::os::raw::{c_char, c_double, c_int, c_void};
use std::ptr;
use std::time::Duration;

use crate::device::{
    DeviceError, Direction, Frontend, Radio, RxErrorCode, RxMetadata, RxStreamer, SensorValue,
    StreamArgs, StreamCmd, StreamMode, TimeSpec, TuneRequest, TxMetadata, TxStreamer,
};
use crate::sample::Sample;

// UHD C API FFI bindings (manual, minimal)

type UhdError = c_int;
const UHD_ERROR_NONE: UhdError = 0;

// Opaque handle types
type UhdUsrpHandle = *mut c_void;
type UhdRxStreamerHandle = *mut c_void;
type UhdTxStreamerHandle = *mut c_void;
type UhdRxMetadataHandle = *mut c_void;
type UhdTxMetadataHandle = *mut c_void;
type UhdStringVectorHandle = *mut c_void;
type UhdSensorValueHandle = *mut c_void;
type UhdSubdevSpecHandle = *mut c_void;

// Tune request policy
const UHD_TUNE_REQUEST_POLICY_AUTO: c_int = 65;

// Stream modes
const UHD_STREAM_MODE_START_CONTINUOUS: c_int = 97;
const UHD_STREAM_MODE_STOP_CONTINUOUS: c_int = 111;
const UHD_STREAM_MODE_NUM_SAMPS_AND_DONE: c_int = 100;

/// Apply to every motherboard
const ALL_MBOARDS: usize = usize::MAX;

const STRBUF_LEN: usize = 1024;

#[repr(C)]
struct UhdTuneRequest {
    target_freq: c_double,
    rf_freq_policy: c_int,
    rf_freq: c_double,
    dsp_freq_policy: c_int,
    dsp_freq: c_double,
    args: *mut c_char,
}

#[repr(C)]
struct UhdTuneResult {
    clipped_rf_freq: c_double,
    target_rf_freq: c_double,
    actual_rf_freq: c_double,
    target_dsp_freq: c_double,
    actual_dsp_freq: c_double,
}

#[repr(C)]
struct UhdStreamArgs {
    cpu_format: *mut c_char,
    otw_format: *mut c_char,
    args: *mut c_char,
    channel_list: *mut usize,
    n_channels: c_int,
}

#[repr(C)]
struct UhdStreamCmd {
    stream_mode: c_int,
    num_samps: usize,
    stream_now: bool,
    time_spec_full_secs: i64,
    time_spec_frac_secs: c_double,
}

extern "C" {
    // String vector
    fn uhd_string_vector_make(h: *mut UhdStringVectorHandle) -> UhdError;
    fn uhd_string_vector_free(h: *mut UhdStringVectorHandle) -> UhdError;
    fn uhd_string_vector_size(h: UhdStringVectorHandle, size_out: *mut usize) -> UhdError;
    fn uhd_string_vector_at(
        h: UhdStringVectorHandle,
        index: usize,
        value_out: *mut c_char,
        strbuffer_len: usize,
    ) -> UhdError;

    // Sensor values
    fn uhd_sensor_value_make(h: *mut UhdSensorValueHandle) -> UhdError;
    fn uhd_sensor_value_free(h: *mut UhdSensorValueHandle) -> UhdError;
    fn uhd_sensor_value_name(h: UhdSensorValueHandle, out: *mut c_char, len: usize) -> UhdError;
    fn uhd_sensor_value_value(h: UhdSensorValueHandle, out: *mut c_char, len: usize) -> UhdError;
    fn uhd_sensor_value_unit(h: UhdSensorValueHandle, out: *mut c_char, len: usize) -> UhdError;

    // Subdevice spec
    fn uhd_subdev_spec_make(h: *mut UhdSubdevSpecHandle, markup: *const c_char) -> UhdError;
    fn uhd_subdev_spec_free(h: *mut UhdSubdevSpecHandle) -> UhdError;

    // USRP
    fn uhd_usrp_make(h: *mut UhdUsrpHandle, args: *const c_char) -> UhdError;
    fn uhd_usrp_free(h: *mut UhdUsrpHandle) -> UhdError;
    fn uhd_usrp_get_pp_string(h: UhdUsrpHandle, out: *mut c_char, len: usize) -> UhdError;
    fn uhd_usrp_get_num_mboards(h: UhdUsrpHandle, num_mboards_out: *mut usize) -> UhdError;

    fn uhd_usrp_set_clock_source(h: UhdUsrpHandle, source: *const c_char, mboard: usize) -> UhdError;
    fn uhd_usrp_get_clock_source(h: UhdUsrpHandle, mboard: usize, out: *mut c_char, len: usize) -> UhdError;
    fn uhd_usrp_set_time_source(h: UhdUsrpHandle, source: *const c_char, mboard: usize) -> UhdError;
    fn uhd_usrp_get_time_source(h: UhdUsrpHandle, mboard: usize, out: *mut c_char, len: usize) -> UhdError;
    fn uhd_usrp_get_time_now(
        h: UhdUsrpHandle,
        mboard: usize,
        full_secs_out: *mut i64,
        frac_secs_out: *mut c_double,
    ) -> UhdError;
    fn uhd_usrp_set_time_now(h: UhdUsrpHandle, full_secs: i64, frac_secs: c_double, mboard: usize) -> UhdError;

    fn uhd_usrp_get_mboard_sensor_names(
        h: UhdUsrpHandle,
        mboard: usize,
        names_out: *mut UhdStringVectorHandle,
    ) -> UhdError;
    fn uhd_usrp_get_mboard_sensor(
        h: UhdUsrpHandle,
        name: *const c_char,
        mboard: usize,
        sensor_value_out: *mut UhdSensorValueHandle,
    ) -> UhdError;
    fn uhd_usrp_get_tx_sensor_names(h: UhdUsrpHandle, chan: usize, names_out: *mut UhdStringVectorHandle) -> UhdError;
    fn uhd_usrp_get_tx_sensor(
        h: UhdUsrpHandle,
        name: *const c_char,
        chan: usize,
        sensor_value_out: *mut UhdSensorValueHandle,
    ) -> UhdError;
    fn uhd_usrp_get_rx_sensor_names(h: UhdUsrpHandle, chan: usize, names_out: *mut UhdStringVectorHandle) -> UhdError;
    fn uhd_usrp_get_rx_sensor(
        h: UhdUsrpHandle,
        name: *const c_char,
        chan: usize,
        sensor_value_out: *mut UhdSensorValueHandle,
    ) -> UhdError;

    fn uhd_usrp_set_tx_subdev_spec(h: UhdUsrpHandle, spec: UhdSubdevSpecHandle, mboard: usize) -> UhdError;
    fn uhd_usrp_set_rx_subdev_spec(h: UhdUsrpHandle, spec: UhdSubdevSpecHandle, mboard: usize) -> UhdError;

    fn uhd_usrp_set_tx_rate(h: UhdUsrpHandle, rate: c_double, chan: usize) -> UhdError;
    fn uhd_usrp_get_tx_rate(h: UhdUsrpHandle, chan: usize, rate_out: *mut c_double) -> UhdError;
    fn uhd_usrp_set_rx_rate(h: UhdUsrpHandle, rate: c_double, chan: usize) -> UhdError;
    fn uhd_usrp_get_rx_rate(h: UhdUsrpHandle, chan: usize, rate_out: *mut c_double) -> UhdError;

    fn uhd_usrp_set_tx_freq(
        h: UhdUsrpHandle,
        tune_request: *mut UhdTuneRequest,
        chan: usize,
        tune_result: *mut UhdTuneResult,
    ) -> UhdError;
    fn uhd_usrp_get_tx_freq(h: UhdUsrpHandle, chan: usize, freq_out: *mut c_double) -> UhdError;
    fn uhd_usrp_set_rx_freq(
        h: UhdUsrpHandle,
        tune_request: *mut UhdTuneRequest,
        chan: usize,
        tune_result: *mut UhdTuneResult,
    ) -> UhdError;
    fn uhd_usrp_get_rx_freq(h: UhdUsrpHandle, chan: usize, freq_out: *mut c_double) -> UhdError;

    fn uhd_usrp_set_tx_gain(h: UhdUsrpHandle, gain: c_double, chan: usize, gain_name: *const c_char) -> UhdError;
    fn uhd_usrp_get_tx_gain(h: UhdUsrpHandle, chan: usize, gain_name: *const c_char, gain_out: *mut c_double) -> UhdError;
    fn uhd_usrp_set_rx_gain(h: UhdUsrpHandle, gain: c_double, chan: usize, gain_name: *const c_char) -> UhdError;
    fn uhd_usrp_get_rx_gain(h: UhdUsrpHandle, chan: usize, gain_name: *const c_char, gain_out: *mut c_double) -> UhdError;

    fn uhd_usrp_set_tx_bandwidth(h: UhdUsrpHandle, bw: c_double, chan: usize) -> UhdError;
    fn uhd_usrp_get_tx_bandwidth(h: UhdUsrpHandle, chan: usize, bw_out: *mut c_double) -> UhdError;
    fn uhd_usrp_set_rx_bandwidth(h: UhdUsrpHandle, bw: c_double, chan: usize) -> UhdError;
    fn uhd_usrp_get_rx_bandwidth(h: UhdUsrpHandle, chan: usize, bw_out: *mut c_double) -> UhdError;

    fn uhd_usrp_set_tx_antenna(h: UhdUsrpHandle, ant: *const c_char, chan: usize) -> UhdError;
    fn uhd_usrp_set_rx_antenna(h: UhdUsrpHandle, ant: *const c_char, chan: usize) -> UhdError;

    fn uhd_usrp_get_tx_stream(h: UhdUsrpHandle, stream_args: *mut UhdStreamArgs, h_out: UhdTxStreamerHandle) -> UhdError;
    fn uhd_usrp_get_rx_stream(h: UhdUsrpHandle, stream_args: *mut UhdStreamArgs, h_out: UhdRxStreamerHandle) -> UhdError;

    // TX Streamer
    fn uhd_tx_streamer_make(h: *mut UhdTxStreamerHandle) -> UhdError;
    fn uhd_tx_streamer_free(h: *mut UhdTxStreamerHandle) -> UhdError;
    fn uhd_tx_streamer_max_num_samps(h: UhdTxStreamerHandle, max_num_samps_out: *mut usize) -> UhdError;
    fn uhd_tx_streamer_send(
        h: UhdTxStreamerHandle,
        buffs: *mut *const c_void,
        samps_per_buff: usize,
        md: *mut UhdTxMetadataHandle,
        timeout: c_double,
        items_sent: *mut usize,
    ) -> UhdError;

    // TX Metadata
    fn uhd_tx_metadata_make(
        handle: *mut UhdTxMetadataHandle,
        has_time_spec: bool,
        full_secs: i64,
        frac_secs: c_double,
        start_of_burst: bool,
        end_of_burst: bool,
    ) -> UhdError;
    fn uhd_tx_metadata_free(handle: *mut UhdTxMetadataHandle) -> UhdError;

    // RX Streamer
    fn uhd_rx_streamer_make(h: *mut UhdRxStreamerHandle) -> UhdError;
    fn uhd_rx_streamer_free(h: *mut UhdRxStreamerHandle) -> UhdError;
    fn uhd_rx_streamer_num_channels(h: UhdRxStreamerHandle, num_channels_out: *mut usize) -> UhdError;
    fn uhd_rx_streamer_max_num_samps(h: UhdRxStreamerHandle, max_num_samps_out: *mut usize) -> UhdError;
    fn uhd_rx_streamer_recv(
        h: UhdRxStreamerHandle,
        buffs: *mut *mut c_void,
        samps_per_buff: usize,
        md: *mut UhdRxMetadataHandle,
        timeout: c_double,
        one_packet: bool,
        items_recvd: *mut usize,
    ) -> UhdError;
    fn uhd_rx_streamer_issue_stream_cmd(h: UhdRxStreamerHandle, stream_cmd: *const UhdStreamCmd) -> UhdError;

    // RX Metadata
    fn uhd_rx_metadata_make(handle: *mut UhdRxMetadataHandle) -> UhdError;
    fn uhd_rx_metadata_free(handle: *mut UhdRxMetadataHandle) -> UhdError;
    fn uhd_rx_metadata_has_time_spec(h: UhdRxMetadataHandle, result_out: *mut bool) -> UhdError;
    fn uhd_rx_metadata_time_spec(h: UhdRxMetadataHandle, full_secs_out: *mut i64, frac_secs_out: *mut c_double) -> UhdError;
    fn uhd_rx_metadata_out_of_sequence(h: UhdRxMetadataHandle, result_out: *mut bool) -> UhdError;
    fn uhd_rx_metadata_error_code(h: UhdRxMetadataHandle, error_code_out: *mut c_int) -> UhdError;
}

fn check(call: &'static str, err: UhdError) -> Result<(), DeviceError> {
    if err == UHD_ERROR_NONE {
        Ok(())
    } else {
        Err(DeviceError::Uhd { call, code: err })
    }
}

fn c_string(s: &str) -> Result<CString, DeviceError> {
    CString::new(s).map_err(|e| DeviceError::InvalidArgument(format!("CString error: {}", e)))
}

/// Run a UHD getter that writes a C string into a caller buffer.
fn read_string(call: &'static str, f: impl FnOnce(*mut c_char, usize) -> UhdError) -> Result<String, DeviceError> {
    let mut buf = vec![0u8; STRBUF_LEN];
    check(call, f(buf.as_mut_ptr() as *mut c_char, buf.len()))?;
    // SAFETY: UHD NUL-terminates within strbuffer_len
    let s = unsafe { CStr::from_ptr(buf.as_ptr() as *const c_char) };
    Ok(s.to_string_lossy().to_string())
}

/// Drain and free a UHD string vector.
unsafe fn take_string_vector(mut sv: UhdStringVectorHandle) -> Vec<String> {
    let mut count: usize = 0;
    uhd_string_vector_size(sv, &mut count);

    let mut out = Vec::with_capacity(count);
    let mut buf = vec![0u8; STRBUF_LEN];
    for i in 0..count {
        if uhd_string_vector_at(sv, i, buf.as_mut_ptr() as *mut c_char, buf.len()) == UHD_ERROR_NONE {
            out.push(
                CStr::from_ptr(buf.as_ptr() as *const c_char)
                    .to_string_lossy()
                    .to_string(),
            );
        }
    }
    uhd_string_vector_free(&mut sv);
    out
}

/// Read and free a UHD sensor value.
unsafe fn take_sensor(mut h: UhdSensorValueHandle) -> Result<SensorValue, DeviceError> {
    let result = (|| {
        Ok(SensorValue {
            name: read_string("uhd_sensor_value_name", |p, n| unsafe { uhd_sensor_value_name(h, p, n) })?,
            value: read_string("uhd_sensor_value_value", |p, n| unsafe { uhd_sensor_value_value(h, p, n) })?,
            unit: read_string("uhd_sensor_value_unit", |p, n| unsafe { uhd_sensor_value_unit(h, p, n) })?,
        })
    })();
    uhd_sensor_value_free(&mut h);
    result
}

/// A UHD multi_usrp device spanning one or more motherboards.
/// Multi-board devices are addressed as `addr0=...,addr1=...`.
pub struct UsrpRadio {
    usrp: UhdUsrpHandle,
    num_boards: usize,
}

unsafe impl Send for UsrpRadio {}

impl UsrpRadio {
    pub fn open(args: &str) -> Result<Self, DeviceError> {
        let dev_args = c_string(args)?;
        let mut usrp: UhdUsrpHandle = ptr::null_mut();

        unsafe {
            log::info!("opening USRP with args '{}'", args);
            check("uhd_usrp_make", uhd_usrp_make(&mut usrp, dev_args.as_ptr()))?;

            let mut num_boards: usize = 0;
            if let Err(e) = check("uhd_usrp_get_num_mboards", uhd_usrp_get_num_mboards(usrp, &mut num_boards)) {
                uhd_usrp_free(&mut usrp);
                return Err(e);
            }

            Ok(Self { usrp, num_boards })
        }
    }

    /// Build a multi-board address string from per-board arguments,
    /// e.g. `["addr=192.168.10.2", "addr=192.168.10.3"]` ->
    /// `addr0=192.168.10.2,addr1=192.168.10.3`. A bare value is taken as
    /// an IP address.
    pub fn multi_board_args(boards: &[&str]) -> String {
        boards
            .iter()
            .enumerate()
            .map(|(i, b)| {
                let (key, value) = b.split_once('=').unwrap_or(("addr", b));
                format!("{}{}={}", key.trim(), i, value.trim())
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    fn stream_args(args: &StreamArgs) -> Result<(CString, CString, CString), DeviceError> {
        Ok((c_string(&args.cpu_format)?, c_string(&args.otw_format)?, c_string("")?))
    }
}

impl Drop for UsrpRadio {
    fn drop(&mut self) {
        unsafe {
            uhd_usrp_free(&mut self.usrp);
        }
    }
}

impl Frontend for UsrpRadio {
    fn set_subdev_spec(&mut self, dir: Direction, spec: &str, board: usize) -> Result<(), DeviceError> {
        let markup = c_string(spec)?;
        unsafe {
            let mut h: UhdSubdevSpecHandle = ptr::null_mut();
            check("uhd_subdev_spec_make", uhd_subdev_spec_make(&mut h, markup.as_ptr()))?;
            let err = match dir {
                Direction::Tx => uhd_usrp_set_tx_subdev_spec(self.usrp, h, board),
                Direction::Rx => uhd_usrp_set_rx_subdev_spec(self.usrp, h, board),
            };
            uhd_subdev_spec_free(&mut h);
            check("uhd_usrp_set_subdev_spec", err)
        }
    }

    fn set_rate(&mut self, dir: Direction, rate: f64, chan: usize) -> Result<(), DeviceError> {
        unsafe {
            match dir {
                Direction::Tx => check("uhd_usrp_set_tx_rate", uhd_usrp_set_tx_rate(self.usrp, rate, chan)),
                Direction::Rx => check("uhd_usrp_set_rx_rate", uhd_usrp_set_rx_rate(self.usrp, rate, chan)),
            }
        }
    }

    fn rate(&self, dir: Direction, chan: usize) -> Result<f64, DeviceError> {
        let mut rate: c_double = 0.0;
        unsafe {
            match dir {
                Direction::Tx => check("uhd_usrp_get_tx_rate", uhd_usrp_get_tx_rate(self.usrp, chan, &mut rate))?,
                Direction::Rx => check("uhd_usrp_get_rx_rate", uhd_usrp_get_rx_rate(self.usrp, chan, &mut rate))?,
            }
        }
        Ok(rate)
    }

    fn set_freq(&mut self, dir: Direction, req: &TuneRequest, chan: usize) -> Result<(), DeviceError> {
        let mode_n = c_string("mode_n=integer")?;
        let mut tune_req = UhdTuneRequest {
            target_freq: req.target_freq,
            rf_freq_policy: UHD_TUNE_REQUEST_POLICY_AUTO,
            rf_freq: 0.0,
            dsp_freq_policy: UHD_TUNE_REQUEST_POLICY_AUTO,
            dsp_freq: 0.0,
            args: if req.integer_n {
                mode_n.as_ptr() as *mut c_char
            } else {
                ptr::null_mut()
            },
        };
        let mut tune_result = UhdTuneResult {
            clipped_rf_freq: 0.0,
            target_rf_freq: 0.0,
            actual_rf_freq: 0.0,
            target_dsp_freq: 0.0,
            actual_dsp_freq: 0.0,
        };

        unsafe {
            let err = match dir {
                Direction::Tx => uhd_usrp_set_tx_freq(self.usrp, &mut tune_req, chan, &mut tune_result),
                Direction::Rx => uhd_usrp_set_rx_freq(self.usrp, &mut tune_req, chan, &mut tune_result),
            };
            check("uhd_usrp_set_freq", err)?;
        }

        log::debug!(
            "USRP {} tuned: RF={:.1} MHz, DSP={:.1} kHz",
            dir,
            tune_result.actual_rf_freq / 1e6,
            tune_result.actual_dsp_freq / 1e3,
        );
        Ok(())
    }

    fn freq(&self, dir: Direction, chan: usize) -> Result<f64, DeviceError> {
        let mut freq: c_double = 0.0;
        unsafe {
            match dir {
                Direction::Tx => check("uhd_usrp_get_tx_freq", uhd_usrp_get_tx_freq(self.usrp, chan, &mut freq))?,
                Direction::Rx => check("uhd_usrp_get_rx_freq", uhd_usrp_get_rx_freq(self.usrp, chan, &mut freq))?,
            }
        }
        Ok(freq)
    }

    fn set_gain(&mut self, dir: Direction, gain: f64, chan: usize) -> Result<(), DeviceError> {
        let empty = c_string("")?;
        unsafe {
            match dir {
                Direction::Tx => check("uhd_usrp_set_tx_gain", uhd_usrp_set_tx_gain(self.usrp, gain, chan, empty.as_ptr())),
                Direction::Rx => check("uhd_usrp_set_rx_gain", uhd_usrp_set_rx_gain(self.usrp, gain, chan, empty.as_ptr())),
            }
        }
    }

    fn gain(&self, dir: Direction, chan: usize) -> Result<f64, DeviceError> {
        let empty = c_string("")?;
        let mut gain: c_double = 0.0;
        unsafe {
            match dir {
                Direction::Tx => check(
                    "uhd_usrp_get_tx_gain",
                    uhd_usrp_get_tx_gain(self.usrp, chan, empty.as_ptr(), &mut gain),
                )?,
                Direction::Rx => check(
                    "uhd_usrp_get_rx_gain",
                    uhd_usrp_get_rx_gain(self.usrp, chan, empty.as_ptr(), &mut gain),
                )?,
            }
        }
        Ok(gain)
    }

    fn set_bandwidth(&mut self, dir: Direction, bw: f64, chan: usize) -> Result<(), DeviceError> {
        unsafe {
            match dir {
                Direction::Tx => check("uhd_usrp_set_tx_bandwidth", uhd_usrp_set_tx_bandwidth(self.usrp, bw, chan)),
                Direction::Rx => check("uhd_usrp_set_rx_bandwidth", uhd_usrp_set_rx_bandwidth(self.usrp, bw, chan)),
            }
        }
    }

    fn bandwidth(&self, dir: Direction, chan: usize) -> Result<f64, DeviceError> {
        let mut bw: c_double = 0.0;
        unsafe {
            match dir {
                Direction::Tx => check("uhd_usrp_get_tx_bandwidth", uhd_usrp_get_tx_bandwidth(self.usrp, chan, &mut bw))?,
                Direction::Rx => check("uhd_usrp_get_rx_bandwidth", uhd_usrp_get_rx_bandwidth(self.usrp, chan, &mut bw))?,
            }
        }
        Ok(bw)
    }

    fn set_antenna(&mut self, dir: Direction, ant: &str, chan: usize) -> Result<(), DeviceError> {
        let ant_c = c_string(ant)?;
        unsafe {
            match dir {
                Direction::Tx => check("uhd_usrp_set_tx_antenna", uhd_usrp_set_tx_antenna(self.usrp, ant_c.as_ptr(), chan)),
                Direction::Rx => check("uhd_usrp_set_rx_antenna", uhd_usrp_set_rx_antenna(self.usrp, ant_c.as_ptr(), chan)),
            }
        }
    }
}

impl Radio for UsrpRadio {
    type TxStream<S: Sample> = UsrpTxStream<S>;
    type RxStream<S: Sample> = UsrpRxStream<S>;

    fn num_boards(&self) -> usize {
        self.num_boards
    }

    fn pp_string(&self) -> String {
        read_string("uhd_usrp_get_pp_string", |p, n| unsafe { uhd_usrp_get_pp_string(self.usrp, p, n) })
            .unwrap_or_else(|e| e.to_string())
    }

    fn set_clock_source(&mut self, source: &str, board: usize) -> Result<(), DeviceError> {
        let src = c_string(source)?;
        unsafe { check("uhd_usrp_set_clock_source", uhd_usrp_set_clock_source(self.usrp, src.as_ptr(), board)) }
    }

    fn clock_source(&self, board: usize) -> Result<String, DeviceError> {
        read_string("uhd_usrp_get_clock_source", |p, n| unsafe {
            uhd_usrp_get_clock_source(self.usrp, board, p, n)
        })
    }

    fn set_time_source(&mut self, source: &str, board: usize) -> Result<(), DeviceError> {
        let src = c_string(source)?;
        unsafe { check("uhd_usrp_set_time_source", uhd_usrp_set_time_source(self.usrp, src.as_ptr(), board)) }
    }

    fn time_source(&self, board: usize) -> Result<String, DeviceError> {
        read_string("uhd_usrp_get_time_source", |p, n| unsafe {
            uhd_usrp_get_time_source(self.usrp, board, p, n)
        })
    }

    fn time_now(&self, board: usize) -> Result<TimeSpec, DeviceError> {
        let mut full_secs: i64 = 0;
        let mut frac_secs: c_double = 0.0;
        unsafe {
            check(
                "uhd_usrp_get_time_now",
                uhd_usrp_get_time_now(self.usrp, board, &mut full_secs, &mut frac_secs),
            )?;
        }
        Ok(TimeSpec { full_secs, frac_secs })
    }

    fn set_time_now(&mut self, time: TimeSpec, board: Option<usize>) -> Result<(), DeviceError> {
        unsafe {
            check(
                "uhd_usrp_set_time_now",
                uhd_usrp_set_time_now(self.usrp, time.full_secs, time.frac_secs, board.unwrap_or(ALL_MBOARDS)),
            )
        }
    }

    fn mboard_sensor_names(&self, board: usize) -> Result<Vec<String>, DeviceError> {
        unsafe {
            let mut sv: UhdStringVectorHandle = ptr::null_mut();
            check("uhd_string_vector_make", uhd_string_vector_make(&mut sv))?;
            let err = uhd_usrp_get_mboard_sensor_names(self.usrp, board, &mut sv);
            let names = take_string_vector(sv);
            check("uhd_usrp_get_mboard_sensor_names", err)?;
            Ok(names)
        }
    }

    fn mboard_sensor(&self, name: &str, board: usize) -> Result<SensorValue, DeviceError> {
        let name_c = c_string(name)?;
        unsafe {
            let mut h: UhdSensorValueHandle = ptr::null_mut();
            check("uhd_sensor_value_make", uhd_sensor_value_make(&mut h))?;
            let err = uhd_usrp_get_mboard_sensor(self.usrp, name_c.as_ptr(), board, &mut h);
            if err != UHD_ERROR_NONE {
                uhd_sensor_value_free(&mut h);
                return Err(DeviceError::Uhd { call: "uhd_usrp_get_mboard_sensor", code: err });
            }
            take_sensor(h)
        }
    }

    fn channel_sensor_names(&self, dir: Direction, chan: usize) -> Result<Vec<String>, DeviceError> {
        unsafe {
            let mut sv: UhdStringVectorHandle = ptr::null_mut();
            check("uhd_string_vector_make", uhd_string_vector_make(&mut sv))?;
            let err = match dir {
                Direction::Tx => uhd_usrp_get_tx_sensor_names(self.usrp, chan, &mut sv),
                Direction::Rx => uhd_usrp_get_rx_sensor_names(self.usrp, chan, &mut sv),
            };
            let names = take_string_vector(sv);
            check("uhd_usrp_get_sensor_names", err)?;
            Ok(names)
        }
    }

    fn channel_sensor(&self, dir: Direction, name: &str, chan: usize) -> Result<SensorValue, DeviceError> {
        let name_c = c_string(name)?;
        unsafe {
            let mut h: UhdSensorValueHandle = ptr::null_mut();
            check("uhd_sensor_value_make", uhd_sensor_value_make(&mut h))?;
            let err = match dir {
                Direction::Tx => uhd_usrp_get_tx_sensor(self.usrp, name_c.as_ptr(), chan, &mut h),
                Direction::Rx => uhd_usrp_get_rx_sensor(self.usrp, name_c.as_ptr(), chan, &mut h),
            };
            if err != UHD_ERROR_NONE {
                uhd_sensor_value_free(&mut h);
                return Err(DeviceError::Uhd { call: "uhd_usrp_get_sensor", code: err });
            }
            take_sensor(h)
        }
    }

    fn tx_stream<S: Sample>(&mut self, args: &StreamArgs) -> Result<UsrpTxStream<S>, DeviceError> {
        let (cpu_fmt, otw_fmt, stream_args_str) = Self::stream_args(args)?;
        let mut channels = args.channels.clone();

        unsafe {
            let mut tx_handle: UhdTxStreamerHandle = ptr::null_mut();
            check("uhd_tx_streamer_make", uhd_tx_streamer_make(&mut tx_handle))?;

            let mut stream_args = UhdStreamArgs {
                cpu_format: cpu_fmt.as_ptr() as *mut c_char,
                otw_format: otw_fmt.as_ptr() as *mut c_char,
                args: stream_args_str.as_ptr() as *mut c_char,
                channel_list: channels.as_mut_ptr(),
                n_channels: channels.len() as c_int,
            };

            let err = uhd_usrp_get_tx_stream(self.usrp, &mut stream_args, tx_handle);
            if err != UHD_ERROR_NONE {
                uhd_tx_streamer_free(&mut tx_handle);
                return Err(DeviceError::Uhd { call: "uhd_usrp_get_tx_stream", code: err });
            }

            let mut max_samps: usize = 0;
            uhd_tx_streamer_max_num_samps(tx_handle, &mut max_samps);
            log::info!("USRP TX max_num_samps: {}", max_samps);

            Ok(UsrpTxStream {
                handle: tx_handle,
                max_samps,
                _format: PhantomData,
            })
        }
    }

    fn rx_stream<S: Sample>(&mut self, args: &StreamArgs) -> Result<UsrpRxStream<S>, DeviceError> {
        let (cpu_fmt, otw_fmt, stream_args_str) = Self::stream_args(args)?;
        let mut channels = args.channels.clone();

        unsafe {
            let mut rx_handle: UhdRxStreamerHandle = ptr::null_mut();
            check("uhd_rx_streamer_make", uhd_rx_streamer_make(&mut rx_handle))?;

            let mut md: UhdRxMetadataHandle = ptr::null_mut();
            let err = uhd_rx_metadata_make(&mut md);
            if err != UHD_ERROR_NONE {
                uhd_rx_streamer_free(&mut rx_handle);
                return Err(DeviceError::Uhd { call: "uhd_rx_metadata_make", code: err });
            }

            let mut stream_args = UhdStreamArgs {
                cpu_format: cpu_fmt.as_ptr() as *mut c_char,
                otw_format: otw_fmt.as_ptr() as *mut c_char,
                args: stream_args_str.as_ptr() as *mut c_char,
                channel_list: channels.as_mut_ptr(),
                n_channels: channels.len() as c_int,
            };

            let err = uhd_usrp_get_rx_stream(self.usrp, &mut stream_args, rx_handle);
            if err != UHD_ERROR_NONE {
                uhd_rx_metadata_free(&mut md);
                uhd_rx_streamer_free(&mut rx_handle);
                return Err(DeviceError::Uhd { call: "uhd_usrp_get_rx_stream", code: err });
            }

            let mut max_samps: usize = 0;
            uhd_rx_streamer_max_num_samps(rx_handle, &mut max_samps);
            let mut num_channels: usize = 0;
            uhd_rx_streamer_num_channels(rx_handle, &mut num_channels);
            log::info!("USRP RX max_num_samps: {} ({} channels)", max_samps, num_channels);

            Ok(UsrpRxStream {
                handle: rx_handle,
                md,
                max_samps,
                num_channels,
                ptrs: Vec::with_capacity(num_channels),
                _format: PhantomData,
            })
        }
    }
}

pub struct UsrpTxStream<S: Sample> {
    handle: UhdTxStreamerHandle,
    max_samps: usize,
    _format: PhantomData<S>,
}

// A streamer is used by exactly one worker thread at a time.
unsafe impl<S: Sample> Send for UsrpTxStream<S> {}

impl<S: Sample> TxStreamer<S> for UsrpTxStream<S> {
    fn send(&mut self, buf: &[S], md: &TxMetadata, timeout: Duration) -> Result<usize, DeviceError> {
        let time = md.time_spec.unwrap_or(TimeSpec::ZERO);
        let mut items_sent: usize = 0;

        unsafe {
            let mut md_handle: UhdTxMetadataHandle = ptr::null_mut();
            check(
                "uhd_tx_metadata_make",
                uhd_tx_metadata_make(
                    &mut md_handle,
                    md.time_spec.is_some(),
                    time.full_secs,
                    time.frac_secs,
                    md.start_of_burst,
                    md.end_of_burst,
                ),
            )?;

            let mut buf_ptr = buf.as_ptr() as *const c_void;
            let err = uhd_tx_streamer_send(
                self.handle,
                &mut buf_ptr,
                buf.len(),
                &mut md_handle,
                timeout.as_secs_f64(),
                &mut items_sent,
            );
            uhd_tx_metadata_free(&mut md_handle);
            check("uhd_tx_streamer_send", err)?;
        }

        Ok(items_sent)
    }

    fn max_num_samps(&self) -> usize {
        self.max_samps
    }
}

impl<S: Sample> Drop for UsrpTxStream<S> {
    fn drop(&mut self) {
        unsafe {
            uhd_tx_streamer_free(&mut self.handle);
        }
    }
}

pub struct UsrpRxStream<S: Sample> {
    handle: UhdRxStreamerHandle,
    md: UhdRxMetadataHandle,
    max_samps: usize,
    num_channels: usize,
    /// Per-call channel pointer array, reused to avoid allocation
    ptrs: Vec<*mut c_void>,
    _format: PhantomData<S>,
}

unsafe impl<S: Sample> Send for UsrpRxStream<S> {}

impl<S: Sample> RxStreamer<S> for UsrpRxStream<S> {
    fn issue_stream_cmd(&mut self, cmd: &StreamCmd) -> Result<(), DeviceError> {
        let stream_cmd = UhdStreamCmd {
            stream_mode: match cmd.mode {
                StreamMode::NumSampsAndDone => UHD_STREAM_MODE_NUM_SAMPS_AND_DONE,
                StreamMode::StartContinuous => UHD_STREAM_MODE_START_CONTINUOUS,
                StreamMode::StopContinuous => UHD_STREAM_MODE_STOP_CONTINUOUS,
            },
            num_samps: cmd.num_samps,
            stream_now: cmd.stream_now,
            time_spec_full_secs: cmd.time_spec.full_secs,
            time_spec_frac_secs: cmd.time_spec.frac_secs,
        };
        unsafe {
            check(
                "uhd_rx_streamer_issue_stream_cmd",
                uhd_rx_streamer_issue_stream_cmd(self.handle, &stream_cmd),
            )
        }
    }

    fn recv(
        &mut self,
        buffs: &mut [&mut [S]],
        md: &mut RxMetadata,
        timeout: Duration,
    ) -> Result<usize, DeviceError> {
        if buffs.len() != self.num_channels {
            return Err(DeviceError::InvalidArgument(format!(
                "{} buffers for {} channels",
                buffs.len(),
                self.num_channels
            )));
        }
        let samps_per_buff = buffs.iter().map(|b| b.len()).min().unwrap_or(0);
        self.ptrs.clear();
        self.ptrs
            .extend(buffs.iter_mut().map(|b| b.as_mut_ptr() as *mut c_void));

        let mut num_rx: usize = 0;
        unsafe {
            check(
                "uhd_rx_streamer_recv",
                uhd_rx_streamer_recv(
                    self.handle,
                    self.ptrs.as_mut_ptr(),
                    samps_per_buff,
                    &mut self.md,
                    timeout.as_secs_f64(),
                    false,
                    &mut num_rx,
                ),
            )?;

            let mut error_code: c_int = 0;
            uhd_rx_metadata_error_code(self.md, &mut error_code);
            md.error_code = RxErrorCode::from_raw(error_code);

            let mut has_time = false;
            uhd_rx_metadata_has_time_spec(self.md, &mut has_time);
            md.time_spec = if has_time {
                let mut full_secs: i64 = 0;
                let mut frac_secs: c_double = 0.0;
                uhd_rx_metadata_time_spec(self.md, &mut full_secs, &mut frac_secs);
                Some(TimeSpec { full_secs, frac_secs })
            } else {
                None
            };

            let mut oos = false;
            uhd_rx_metadata_out_of_sequence(self.md, &mut oos);
            md.out_of_sequence = oos;
        }

        Ok(num_rx)
    }

    fn num_channels(&self) -> usize {
        self.num_channels
    }

    fn max_num_samps(&self) -> usize {
        self.max_samps
    }
}

impl<S: Sample> Drop for UsrpRxStream<S> {
    fn drop(&mut self) {
        unsafe {
            uhd_rx_metadata_free(&mut self.md);
            uhd_rx_streamer_free(&mut self.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_board_args() {
        assert_eq!(
            UsrpRadio::multi_board_args(&["addr=192.168.10.2", "addr=192.168.10.3"]),
            "addr0=192.168.10.2,addr1=192.168.10.3"
        );
        assert_eq!(UsrpRadio::multi_board_args(&["192.168.10.2"]), "addr0=192.168.10.2");
        assert_eq!(
            UsrpRadio::multi_board_args(&["serial=F5A1", "serial=F5B2"]),
            "serial0=F5A1,serial1=F5B2"
        );
    }
}
