//! Core data types shared by pipelines, stages and device sessions
//!
//! This module defines the sample formats a stage can declare on its input
//! and output, and the [`Block`] record that travels through conduits.
//!
//! # Wire encoding
//!
//! External-process stages and the capture data port exchange raw bytes.
//! All multi-byte samples are little-endian; complex samples are interleaved
//! `re, im`. Event blocks are encoded as one JSON document per line.

use serde::{Deserialize, Serialize};

/// Complex sample type used by the in-process DSP stages
pub type Complex32 = rustfft::num_complex::Complex<f32>;

/// Complex 16-bit integer sample (`cs16`)
pub type ComplexShort = rustfft::num_complex::Complex<i16>;

/// Sample format declared by a stage input or output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    /// Unstructured bytes (text output of decoders, compressed audio, ...)
    Char,
    /// Signed 16-bit real samples
    Short,
    /// 32-bit float real samples
    Float,
    /// Interleaved signed 16-bit I/Q
    ComplexShort,
    /// Interleaved 32-bit float I/Q
    #[default]
    ComplexFloat,
    /// Structured events emitted by parser stages
    Event,
}

impl Format {
    /// Size of one sample in bytes, `None` for formats without fixed framing
    pub fn sample_size(&self) -> Option<usize> {
        match self {
            Format::Char => Some(1),
            Format::Short => Some(2),
            Format::Float => Some(4),
            Format::ComplexShort => Some(4),
            Format::ComplexFloat => Some(8),
            Format::Event => None,
        }
    }

    /// Whether samples of this format carry I/Q pairs
    pub fn is_complex(&self) -> bool {
        matches!(self, Format::ComplexShort | Format::ComplexFloat)
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Format::Char => "char",
            Format::Short => "short",
            Format::Float => "float",
            Format::ComplexShort => "complex_short",
            Format::ComplexFloat => "complex_float",
            Format::Event => "event",
        };
        write!(f, "{}", name)
    }
}

/// A typed block of records travelling through a conduit
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Bytes(Vec<u8>),
    Short(Vec<i16>),
    Float(Vec<f32>),
    ComplexShort(Vec<ComplexShort>),
    ComplexFloat(Vec<Complex32>),
    Events(Vec<serde_json::Value>),
}

impl Block {
    /// Format of the records in this block
    pub fn format(&self) -> Format {
        match self {
            Block::Bytes(_) => Format::Char,
            Block::Short(_) => Format::Short,
            Block::Float(_) => Format::Float,
            Block::ComplexShort(_) => Format::ComplexShort,
            Block::ComplexFloat(_) => Format::ComplexFloat,
            Block::Events(_) => Format::Event,
        }
    }

    /// Number of records (samples, bytes or events)
    pub fn len(&self) -> usize {
        match self {
            Block::Bytes(v) => v.len(),
            Block::Short(v) => v.len(),
            Block::Float(v) => v.len(),
            Block::ComplexShort(v) => v.len(),
            Block::ComplexFloat(v) => v.len(),
            Block::Events(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encode the block for a byte-oriented endpoint (child stdin, sockets)
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Block::Bytes(v) => v.clone(),
            Block::Short(v) => v.iter().flat_map(|s| s.to_le_bytes()).collect(),
            Block::Float(v) => v.iter().flat_map(|s| s.to_le_bytes()).collect(),
            Block::ComplexShort(v) => v
                .iter()
                .flat_map(|c| {
                    let mut out = [0u8; 4];
                    out[..2].copy_from_slice(&c.re.to_le_bytes());
                    out[2..].copy_from_slice(&c.im.to_le_bytes());
                    out
                })
                .collect(),
            Block::ComplexFloat(v) => v
                .iter()
                .flat_map(|c| {
                    let mut out = [0u8; 8];
                    out[..4].copy_from_slice(&c.re.to_le_bytes());
                    out[4..].copy_from_slice(&c.im.to_le_bytes());
                    out
                })
                .collect(),
            Block::Events(events) => {
                let mut out = Vec::new();
                for event in events {
                    if let Ok(line) = serde_json::to_vec(event) {
                        out.extend_from_slice(&line);
                        out.push(b'\n');
                    }
                }
                out
            }
        }
    }
}

/// Incremental decoder turning a byte stream into blocks of one format
///
/// Partial samples (and partial lines for events) are kept until the next
/// call, so reads of arbitrary size from a pipe or socket never split a sample.
#[derive(Debug)]
pub struct BlockDecoder {
    format: Format,
    pending: Vec<u8>,
}

impl BlockDecoder {
    pub fn new(format: Format) -> Self {
        Self {
            format,
            pending: Vec::new(),
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Number of buffered bytes not yet forming a complete record
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Feed raw bytes, returning a block when at least one full record is available
    pub fn push(&mut self, bytes: &[u8]) -> Option<Block> {
        if self.format == Format::Char {
            return (!bytes.is_empty()).then(|| Block::Bytes(bytes.to_vec()));
        }

        self.pending.extend_from_slice(bytes);

        if self.format == Format::Event {
            return self.take_events();
        }

        let size = self.format.sample_size()?;
        let usable = self.pending.len() - self.pending.len() % size;
        if usable == 0 {
            return None;
        }
        let data: Vec<u8> = self.pending.drain(..usable).collect();
        let chunks = data.chunks_exact(size);

        let block = match self.format {
            Format::Short => Block::Short(chunks.map(|c| i16::from_le_bytes([c[0], c[1]])).collect()),
            Format::Float => {
                Block::Float(chunks.map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect())
            }
            Format::ComplexShort => Block::ComplexShort(
                chunks
                    .map(|c| {
                        ComplexShort::new(
                            i16::from_le_bytes([c[0], c[1]]),
                            i16::from_le_bytes([c[2], c[3]]),
                        )
                    })
                    .collect(),
            ),
            Format::ComplexFloat => Block::ComplexFloat(
                chunks
                    .map(|c| {
                        Complex32::new(
                            f32::from_le_bytes([c[0], c[1], c[2], c[3]]),
                            f32::from_le_bytes([c[4], c[5], c[6], c[7]]),
                        )
                    })
                    .collect(),
            ),
            Format::Char | Format::Event => return None,
        };
        Some(block)
    }

    fn take_events(&mut self) -> Option<Block> {
        let end = self.pending.iter().rposition(|&b| b == b'\n')?;
        let lines: Vec<u8> = self.pending.drain(..=end).collect();
        let events: Vec<serde_json::Value> = lines
            .split(|&b| b == b'\n')
            .filter(|line| !line.is_empty())
            .filter_map(|line| match serde_json::from_slice(line) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::trace!("Dropping malformed event line: {}", e);
                    None
                }
            })
            .collect();
        (!events.is_empty()).then_some(Block::Events(events))
    }
}
