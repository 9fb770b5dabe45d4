//! Line-oriented parser stage
//!
//! Consumes the text output of an external decoder and turns each line into a
//! structured event through a pluggable [`LineDecoder`]. The receiver's dial
//! frequency is made available to decoders that tag their events with it.

use crate::pipeline::stage::{Processor, StageKind};
use crate::types::{Block, Format};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lines longer than this are discarded
const MAX_LINE: usize = 64 * 1024;

/// Turns one line of decoder output into an event
pub trait LineDecoder: Send {
    fn decode(&mut self, line: &str, dial_frequency: Option<u64>) -> Option<Value>;
}

impl<F> LineDecoder for F
where
    F: FnMut(&str, Option<u64>) -> Option<Value> + Send,
{
    fn decode(&mut self, line: &str, dial_frequency: Option<u64>) -> Option<Value> {
        self(line, dial_frequency)
    }
}

/// Decoder for tools that print one JSON object per line
///
/// Objects without a `freq` field get the dial frequency added.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLineDecoder;

impl LineDecoder for JsonLineDecoder {
    fn decode(&mut self, line: &str, dial_frequency: Option<u64>) -> Option<Value> {
        let mut value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!("Ignoring non-JSON line ({}): {}", e, line);
                return None;
            }
        };
        if let (Some(object), Some(freq)) = (value.as_object_mut(), dial_frequency) {
            object.entry("freq").or_insert(Value::from(freq));
        }
        Some(value)
    }
}

/// Live handle to the dial frequency seen by a parser
#[derive(Debug, Clone, Default)]
pub struct ParserControl {
    dial_frequency: Arc<AtomicU64>,
}

impl ParserControl {
    pub fn set_dial_frequency(&self, frequency: Option<u64>) {
        self.dial_frequency.store(frequency.unwrap_or(0), Ordering::Relaxed);
    }

    pub fn dial_frequency(&self) -> Option<u64> {
        match self.dial_frequency.load(Ordering::Relaxed) {
            0 => None,
            f => Some(f),
        }
    }
}

pub struct LineParser {
    name: String,
    decoder: Box<dyn LineDecoder>,
    control: ParserControl,
    pending: Vec<u8>,
}

impl LineParser {
    pub fn new(name: impl Into<String>, decoder: impl LineDecoder + 'static) -> Self {
        Self {
            name: name.into(),
            decoder: Box::new(decoder),
            control: ParserControl::default(),
            pending: Vec::new(),
        }
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, JsonLineDecoder)
    }

    pub fn control(&self) -> ParserControl {
        self.control.clone()
    }

    fn parse(&mut self, bytes: &[u8]) -> Vec<Value> {
        self.pending.extend_from_slice(bytes);
        let Some(end) = self.pending.iter().rposition(|&b| b == b'\n') else {
            if self.pending.len() > MAX_LINE {
                tracing::warn!("Parser '{}' discarding over-long line", self.name);
                self.pending.clear();
            }
            return Vec::new();
        };

        let dial = self.control.dial_frequency();
        let lines: Vec<u8> = self.pending.drain(..=end).collect();
        lines
            .split(|&b| b == b'\n')
            .filter_map(|raw| {
                let line = String::from_utf8_lossy(raw);
                let line = line.trim_end_matches('\r').trim();
                if line.is_empty() {
                    None
                } else {
                    self.decoder.decode(line, dial)
                }
            })
            .collect()
    }
}

impl Processor for LineParser {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Parser
    }

    fn input_format(&self) -> Format {
        Format::Char
    }

    fn output_format(&self) -> Format {
        Format::Event
    }

    fn process(&mut self, input: Block) -> Option<Block> {
        let Block::Bytes(bytes) = input else {
            return None;
        };
        let events = self.parse(&bytes);
        (!events.is_empty()).then_some(Block::Events(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_lines_split_across_blocks() {
        let mut parser = LineParser::json("rtl_433");
        assert!(parser.process(Block::Bytes(b"{\"model\":".to_vec())).is_none());
        let out = parser
            .process(Block::Bytes(b"\"acurite\"}\r\ngarbage\n".to_vec()))
            .unwrap();
        assert_eq!(out, Block::Events(vec![json!({"model": "acurite"})]));
    }

    #[test]
    fn test_dial_frequency_tagging() {
        let mut parser = LineParser::json("ism");
        parser.control().set_dial_frequency(Some(433_920_000));
        let out = parser
            .process(Block::Bytes(b"{\"id\":1}\n{\"id\":2,\"freq\":5}\n".to_vec()))
            .unwrap();
        assert_eq!(
            out,
            Block::Events(vec![
                json!({"id": 1, "freq": 433_920_000u64}),
                json!({"id": 2, "freq": 5}),
            ])
        );
    }

    #[test]
    fn test_closure_decoder() {
        let mut parser = LineParser::new("pocsag", |line: &str, _dial: Option<u64>| {
            line.strip_prefix("POCSAG1200: ")
                .map(|msg| json!({"mode": "POCSAG1200", "text": msg}))
        });
        let out = parser
            .process(Block::Bytes(b"POCSAG1200: hello\nFLEX: x\n".to_vec()))
            .unwrap();
        assert_eq!(
            out,
            Block::Events(vec![json!({"mode": "POCSAG1200", "text": "hello"})])
        );
    }
}
