//! Dynamic label reconstruction from X-PAD segments.
//!
//! DOC: ETSI EN 300 401
//! Clause 7.4.5.2 - Dynamic label
//!
//! A label is split into up to 8 segments of up to 16 characters. Each
//! segment carries its own CRC and may itself be split across several
//! X-PAD subfields.

use crate::algorithms::crc::CRC16_CCITT_INVERTED;
use crate::constants::charsets::convert_charset_to_utf8;

const TARGET: &str = "dynamic-label";

const MAX_SEGMENTS: usize = 8;
const SEGMENT_HEADER_BYTES: usize = 2;
const SEGMENT_CRC_BYTES: usize = 2;
const MAX_SEGMENT_CHARS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DynamicLabelEvent {
    /// A complete label was assembled.
    Label { text: String, charset: u8 },
    /// The broadcaster commanded the display to clear.
    Clear,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicLabelCounters {
    pub total_labels: u64,
    pub crc_errors: u64,
    pub discarded_segments: u64,
}

pub struct DynamicLabelAssembler {
    /// Bytes of the label segment currently being received.
    segment_buffer: Vec<u8>,
    is_receiving_segment: bool,
    /// Accumulated character segments of the current label.
    segments: [Option<Vec<u8>>; MAX_SEGMENTS],
    total_segments: Option<usize>,
    toggle: Option<bool>,
    charset: u8,
    pub counters: DynamicLabelCounters,
}

impl Default for DynamicLabelAssembler {
    fn default() -> Self {
        Self {
            segment_buffer: Vec::with_capacity(SEGMENT_HEADER_BYTES + MAX_SEGMENT_CHARS + SEGMENT_CRC_BYTES),
            is_receiving_segment: false,
            segments: Default::default(),
            total_segments: None,
            toggle: None,
            charset: 0,
            counters: DynamicLabelCounters::default(),
        }
    }
}

impl DynamicLabelAssembler {
    /// Consumes one X-PAD subfield. `is_start` marks application type 2
    /// (start of a label segment); continuations are type 3.
    pub fn process_subfield(&mut self, is_start: bool, buf: &[u8]) -> Option<DynamicLabelEvent> {
        if is_start {
            if self.is_receiving_segment && !self.segment_buffer.is_empty() {
                self.counters.discarded_segments += 1;
                tracing::debug!(target: TARGET, "discarding partial label segment of {} bytes", self.segment_buffer.len());
            }
            self.segment_buffer.clear();
            self.is_receiving_segment = true;
        } else if !self.is_receiving_segment {
            // continuation without a start: padding or lost sync
            return None;
        }

        self.segment_buffer.extend_from_slice(buf);
        self.try_complete_segment()
    }

    fn try_complete_segment(&mut self) -> Option<DynamicLabelEvent> {
        if self.segment_buffer.len() < SEGMENT_HEADER_BYTES + SEGMENT_CRC_BYTES {
            return None;
        }
        let header = self.segment_buffer[0];
        let is_command = header & 0b0001_0000 != 0;
        let nb_chars = if is_command { 0 } else { (header & 0x0F) as usize + 1 };
        let needed = SEGMENT_HEADER_BYTES + nb_chars + SEGMENT_CRC_BYTES;
        if self.segment_buffer.len() < needed {
            return None;
        }

        let segment: Vec<u8> = self.segment_buffer.drain(..needed).collect();
        self.is_receiving_segment = false;
        if !CRC16_CCITT_INVERTED.validate(&segment) {
            self.counters.crc_errors += 1;
            tracing::debug!(target: TARGET, "label segment crc16 mismatch");
            return None;
        }
        self.process_segment(&segment)
    }

    fn process_segment(&mut self, segment: &[u8]) -> Option<DynamicLabelEvent> {
        let header = segment[0];
        let toggle = header & 0b1000_0000 != 0;
        let is_first = header & 0b0100_0000 != 0;
        let is_last = header & 0b0010_0000 != 0;
        let is_command = header & 0b0001_0000 != 0;

        // a toggled flag announces a new label
        if self.toggle != Some(toggle) {
            self.reset_label();
            self.toggle = Some(toggle);
        }

        if is_command {
            let command = header & 0x0F;
            return match command {
                0b0001 => {
                    self.reset_label();
                    Some(DynamicLabelEvent::Clear)
                }
                command => {
                    tracing::debug!(target: TARGET, "unknown label command {}", command);
                    None
                }
            };
        }

        let segment_number = if is_first {
            self.charset = segment[1] >> 4;
            0
        } else {
            ((segment[1] & 0b0111_0000) >> 4) as usize
        };
        if segment_number >= MAX_SEGMENTS {
            self.counters.discarded_segments += 1;
            return None;
        }

        let chars = &segment[SEGMENT_HEADER_BYTES..segment.len() - SEGMENT_CRC_BYTES];
        self.segments[segment_number] = Some(chars.to_vec());
        if is_last {
            self.total_segments = Some(segment_number + 1);
        }

        let total = self.total_segments?;
        let is_complete = self.segments.iter().take(total).all(|segment| segment.is_some());
        if !is_complete {
            return None;
        }

        let mut label_bytes = Vec::with_capacity(total * MAX_SEGMENT_CHARS);
        for segment in self.segments.iter().take(total) {
            label_bytes.extend_from_slice(segment.as_ref().unwrap());
        }
        let text = convert_charset_to_utf8(&label_bytes, self.charset);
        let charset = self.charset;
        self.counters.total_labels += 1;
        tracing::info!(target: TARGET, "dynamic label [{}] {:?}", charset, text);
        self.reset_label();
        Some(DynamicLabelEvent::Label { text, charset })
    }

    fn reset_label(&mut self) {
        self.segments = Default::default();
        self.total_segments = None;
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Serialises one label segment with header, chars and CRC.
    pub fn build_label_segment(
        toggle: bool,
        is_first: bool,
        is_last: bool,
        segment_number: usize,
        charset: u8,
        chars: &[u8],
    ) -> Vec<u8> {
        assert!(!chars.is_empty() && chars.len() <= MAX_SEGMENT_CHARS);
        let mut header = (chars.len() - 1) as u8;
        if toggle { header |= 0b1000_0000; }
        if is_first { header |= 0b0100_0000; }
        if is_last { header |= 0b0010_0000; }
        let second = if is_first {
            charset << 4
        } else {
            ((segment_number as u8) & 0x07) << 4
        };
        let mut segment = vec![header, second];
        segment.extend_from_slice(chars);
        let crc = CRC16_CCITT_INVERTED.process(&segment);
        segment.extend_from_slice(&crc.to_be_bytes());
        segment
    }
}
