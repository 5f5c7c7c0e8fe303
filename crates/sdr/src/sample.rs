// Copyright 2025-2026 CEMAXECUTER LLC

use std::fmt;
use std::str::FromStr;

use byteorder::{ByteOrder, LittleEndian};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

/// Host-side complex sample element type, fixed for a whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Complex int16 (SC16): pairs of i16, little-endian
    #[serde(alias = "short")]
    Sc16,
    /// Complex float32 (FC32): pairs of f32, little-endian
    #[serde(alias = "float")]
    Fc32,
    /// Complex float64 (FC64): pairs of f64, little-endian
    #[serde(alias = "double")]
    Fc64,
}

impl SampleFormat {
    /// UHD host ("cpu") format string
    pub fn cpu_format(self) -> &'static str {
        match self {
            SampleFormat::Sc16 => "sc16",
            SampleFormat::Fc32 => "fc32",
            SampleFormat::Fc64 => "fc64",
        }
    }

    /// Bytes per complex sample in files and host buffers
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::Sc16 => 4,
            SampleFormat::Fc32 => 8,
            SampleFormat::Fc64 => 16,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cpu_format())
    }
}

/// Unrecognised element type name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sample type '{0}' (use short, float, or double)")]
pub struct UnknownSampleFormat(pub String);

impl FromStr for SampleFormat {
    type Err = UnknownSampleFormat;

    /// Accepts the operator names (`short`, `float`, `double`) and the
    /// UHD names (`sc16`, `fc32`, `fc64`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "short" | "sc16" => Ok(SampleFormat::Sc16),
            "float" | "fc32" => Ok(SampleFormat::Fc32),
            "double" | "fc64" => Ok(SampleFormat::Fc64),
            other => Err(UnknownSampleFormat(other.to_string())),
        }
    }
}

/// Capability shared by every host sample type: its size on disk and the
/// raw little-endian byte layout (I then Q).
pub trait Sample: Copy + Default + Send + Sync + fmt::Debug + 'static {
    const FORMAT: SampleFormat;
    const SIZE: usize;

    /// Decode `out.len()` samples from `bytes` (at least `out.len() * SIZE` long).
    fn read_le(bytes: &[u8], out: &mut [Self]);

    /// Append the encoding of `samples` to `out`.
    fn write_le(samples: &[Self], out: &mut Vec<u8>);

    /// Build a sample from normalized I/Q components in [-1, 1].
    fn from_iq(i: f64, q: f64) -> Self;
}

impl Sample for Complex<i16> {
    const FORMAT: SampleFormat = SampleFormat::Sc16;
    const SIZE: usize = 4;

    fn read_le(bytes: &[u8], out: &mut [Self]) {
        for (s, chunk) in out.iter_mut().zip(bytes.chunks_exact(Self::SIZE)) {
            *s = Complex::new(
                LittleEndian::read_i16(&chunk[0..2]),
                LittleEndian::read_i16(&chunk[2..4]),
            );
        }
    }

    fn write_le(samples: &[Self], out: &mut Vec<u8>) {
        let mut buf = [0u8; 4];
        for s in samples {
            LittleEndian::write_i16(&mut buf[0..2], s.re);
            LittleEndian::write_i16(&mut buf[2..4], s.im);
            out.extend_from_slice(&buf);
        }
    }

    fn from_iq(i: f64, q: f64) -> Self {
        // Scale [-1, 1] to the full int16 range
        Complex::new(
            (i * 32767.0).clamp(-32768.0, 32767.0) as i16,
            (q * 32767.0).clamp(-32768.0, 32767.0) as i16,
        )
    }
}

impl Sample for Complex<f32> {
    const FORMAT: SampleFormat = SampleFormat::Fc32;
    const SIZE: usize = 8;

    fn read_le(bytes: &[u8], out: &mut [Self]) {
        for (s, chunk) in out.iter_mut().zip(bytes.chunks_exact(Self::SIZE)) {
            *s = Complex::new(
                LittleEndian::read_f32(&chunk[0..4]),
                LittleEndian::read_f32(&chunk[4..8]),
            );
        }
    }

    fn write_le(samples: &[Self], out: &mut Vec<u8>) {
        let mut buf = [0u8; 8];
        for s in samples {
            LittleEndian::write_f32(&mut buf[0..4], s.re);
            LittleEndian::write_f32(&mut buf[4..8], s.im);
            out.extend_from_slice(&buf);
        }
    }

    fn from_iq(i: f64, q: f64) -> Self {
        Complex::new(i as f32, q as f32)
    }
}

impl Sample for Complex<f64> {
    const FORMAT: SampleFormat = SampleFormat::Fc64;
    const SIZE: usize = 16;

    fn read_le(bytes: &[u8], out: &mut [Self]) {
        for (s, chunk) in out.iter_mut().zip(bytes.chunks_exact(Self::SIZE)) {
            *s = Complex::new(
                LittleEndian::read_f64(&chunk[0..8]),
                LittleEndian::read_f64(&chunk[8..16]),
            );
        }
    }

    fn write_le(samples: &[Self], out: &mut Vec<u8>) {
        let mut buf = [0u8; 16];
        for s in samples {
            LittleEndian::write_f64(&mut buf[0..8], s.re);
            LittleEndian::write_f64(&mut buf[8..16], s.im);
            out.extend_from_slice(&buf);
        }
    }

    fn from_iq(i: f64, q: f64) -> Self {
        Complex::new(i, q)
    }
}

/// Fixed-capacity block of samples bound to one channel.
#[derive(Debug, Clone)]
pub struct SampleBlock<S: Sample> {
    pub channel: usize,
    /// Backing storage; its length is the block capacity
    pub data: Vec<S>,
    /// Number of valid samples at the front of `data`
    pub num_samples: usize,
}

impl<S: Sample> SampleBlock<S> {
    pub fn new(channel: usize, capacity: usize) -> Self {
        Self {
            channel,
            data: vec![S::default(); capacity],
            num_samples: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The valid samples
    pub fn samples(&self) -> &[S] {
        &self.data[..self.num_samples]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_names() {
        assert_eq!("short".parse::<SampleFormat>().unwrap(), SampleFormat::Sc16);
        assert_eq!("float".parse::<SampleFormat>().unwrap(), SampleFormat::Fc32);
        assert_eq!("double".parse::<SampleFormat>().unwrap(), SampleFormat::Fc64);
        assert_eq!("fc32".parse::<SampleFormat>().unwrap(), SampleFormat::Fc32);
        let err = "int8".parse::<SampleFormat>().unwrap_err();
        assert_eq!(err, UnknownSampleFormat("int8".to_string()));
    }

    #[test]
    fn test_sizes_match_format() {
        assert_eq!(<Complex<i16> as Sample>::SIZE, SampleFormat::Sc16.bytes_per_sample());
        assert_eq!(<Complex<f32> as Sample>::SIZE, SampleFormat::Fc32.bytes_per_sample());
        assert_eq!(<Complex<f64> as Sample>::SIZE, SampleFormat::Fc64.bytes_per_sample());
    }

    #[test]
    fn test_sc16_byte_layout() {
        let mut out = Vec::new();
        Complex::<i16>::write_le(&[Complex::new(1, -2)], &mut out);
        // I first, then Q, little-endian
        assert_eq!(out, vec![0x01, 0x00, 0xFE, 0xFF]);
    }

    #[test]
    fn test_fc32_decode() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0.5f32.to_le_bytes());
        bytes.extend_from_slice(&(-0.25f32).to_le_bytes());
        let mut out = [Complex::<f32>::default(); 1];
        Complex::<f32>::read_le(&bytes, &mut out);
        assert_eq!(out[0], Complex::new(0.5, -0.25));
    }

    #[test]
    fn test_from_iq_clamps_int16() {
        let s = Complex::<i16>::from_iq(2.0, -2.0);
        assert_eq!(s, Complex::new(32767, -32768));
    }
}
