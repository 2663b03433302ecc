//! Programme associated data extraction from DAB+ access units.
//!
//! DOC: ETSI EN 300 401
//! Clause 7.4.1 - F-PAD, clause 7.4.3/7.4.4 - X-PAD and content indicators
//! DOC: ETSI EN 301 234
//! Clause 5.2.2 - MOT over X-PAD data groups
//!
//! The PAD rides at the start of each access unit inside an AAC
//! data_stream_element. The X-PAD bytes are transmitted in reverse order;
//! the trailing two bytes are the F-PAD.

use crate::algorithms::crc::CRC16_CCITT_INVERTED;
use crate::mot::processor::MotProcessor;
use crate::msc::data_group::parse_data_group;
use crate::pad::dynamic_label::{DynamicLabelAssembler, DynamicLabelEvent};
use crate::pad::PadEvent;

const TARGET: &str = "pad-processor";

/// Clause 7.4.4, table 28: X-PAD content indicator length codes.
const CI_LENGTH_TABLE: [usize; 8] = [4, 6, 8, 12, 16, 24, 32, 48];
const FPAD_BYTES: usize = 2;
const SHORT_XPAD_BYTES: usize = 4;
const MAX_CI_BYTES: usize = 4;

/// X-PAD application types of interest.
mod app_type {
    pub const END_MARKER: u8 = 0;
    pub const DATA_GROUP_LENGTH: u8 = 1;
    pub const LABEL_START: u8 = 2;
    pub const LABEL_CONTINUATION: u8 = 3;
    pub const MOT_START: u8 = 12;
    pub const MOT_CONTINUATION: u8 = 13;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PadCounters {
    pub total_access_units: u64,
    pub dgli_crc_errors: u64,
    pub data_group_errors: u64,
    pub discarded_data_groups: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataGroupState {
    /// No data group length indicator seen yet.
    WaitLength,
    /// Length known, waiting for a MOT start subfield.
    WaitStart,
    ReadData,
}

pub struct PadProcessor {
    label_assembler: DynamicLabelAssembler,
    mot_processor: MotProcessor,
    data_group_state: DataGroupState,
    data_group_buffer: Vec<u8>,
    data_group_required: usize,
    /// Application type continued by CI-less X-PAD fields.
    last_app_type: Option<u8>,
    pub counters: PadCounters,
}

impl Default for PadProcessor {
    fn default() -> Self {
        Self {
            label_assembler: DynamicLabelAssembler::default(),
            mot_processor: MotProcessor::default(),
            data_group_state: DataGroupState::WaitLength,
            data_group_buffer: Vec::new(),
            data_group_required: 0,
            last_app_type: None,
            counters: PadCounters::default(),
        }
    }
}

impl PadProcessor {
    pub fn label_counters(&self) -> crate::pad::dynamic_label::DynamicLabelCounters {
        self.label_assembler.counters
    }

    /// Extracts and processes the PAD of one access unit, returning any
    /// completed labels and MOT entities.
    pub fn process_access_unit(&mut self, au: &[u8]) -> Vec<PadEvent> {
        self.counters.total_access_units += 1;
        let Some((xpad_reversed, fpad)) = extract_pad(au) else {
            return Vec::new();
        };
        // X-PAD bytes run backwards relative to the AU byte order
        let xpad: Vec<u8> = xpad_reversed.iter().rev().copied().collect();
        self.process_pad(&xpad, fpad)
    }

    /// Processes an already extracted PAD field.
    pub fn process_pad(&mut self, xpad: &[u8], fpad: [u8; 2]) -> Vec<PadEvent> {
        let xpad_indicator = (fpad[0] & 0b0011_0000) >> 4;
        let ci_flag = fpad[1] & 0b0000_0010 != 0;

        let mut events = Vec::new();
        match xpad_indicator {
            // no X-PAD
            0b00 => {}
            // short X-PAD: 4 bytes, one subfield
            0b01 => {
                if xpad.len() < SHORT_XPAD_BYTES {
                    tracing::debug!(target: TARGET, "short X-PAD truncated to {} bytes", xpad.len());
                    return events;
                }
                if ci_flag {
                    let app = xpad[0] & 0b0001_1111;
                    self.dispatch_subfield(app, &xpad[1..SHORT_XPAD_BYTES], &mut events);
                } else if let Some(app) = self.continuation_app_type() {
                    self.dispatch_subfield(app, &xpad[..SHORT_XPAD_BYTES], &mut events);
                }
            }
            // variable size X-PAD
            0b10 => {
                if ci_flag {
                    self.process_variable_xpad(xpad, &mut events);
                } else if let Some(app) = self.continuation_app_type() {
                    self.dispatch_subfield(app, xpad, &mut events);
                }
            }
            indicator => {
                tracing::debug!(target: TARGET, "reserved X-PAD indicator {:02b}", indicator);
            }
        }
        events
    }

    /// Clause 7.4.4: a list of up to 4 content indicators, terminated by
    /// the end marker app type, followed by the announced subfields.
    fn process_variable_xpad(&mut self, xpad: &[u8], events: &mut Vec<PadEvent>) {
        let mut contents: Vec<(u8, usize)> = Vec::with_capacity(MAX_CI_BYTES);
        let mut position = 0usize;
        while position < xpad.len() && position < MAX_CI_BYTES {
            let ci = xpad[position];
            position += 1;
            let app = ci & 0b0001_1111;
            if app == app_type::END_MARKER {
                break;
            }
            let length = CI_LENGTH_TABLE[(ci >> 5) as usize];
            contents.push((app, length));
        }

        for (app, length) in contents {
            let Some(subfield) = xpad.get(position..position + length) else {
                tracing::debug!(target: TARGET, "X-PAD subfield overruns the field ({}+{} > {})", position, length, xpad.len());
                return;
            };
            position += length;
            self.dispatch_subfield(app, subfield, events);
        }
    }

    fn continuation_app_type(&self) -> Option<u8> {
        // a CI-less X-PAD continues the previous application
        match self.last_app_type? {
            app_type::LABEL_START | app_type::LABEL_CONTINUATION => Some(app_type::LABEL_CONTINUATION),
            app_type::MOT_START | app_type::MOT_CONTINUATION => Some(app_type::MOT_CONTINUATION),
            app => Some(app),
        }
    }

    fn dispatch_subfield(&mut self, app: u8, subfield: &[u8], events: &mut Vec<PadEvent>) {
        self.last_app_type = Some(app);
        match app {
            app_type::DATA_GROUP_LENGTH => self.process_data_group_length(subfield),
            app_type::LABEL_START | app_type::LABEL_CONTINUATION => {
                let is_start = app == app_type::LABEL_START;
                match self.label_assembler.process_subfield(is_start, subfield) {
                    Some(DynamicLabelEvent::Label { text, charset }) => {
                        events.push(PadEvent::DynamicLabel { text, charset });
                    }
                    Some(DynamicLabelEvent::Clear) => events.push(PadEvent::DynamicLabelClear),
                    None => {}
                }
            }
            app_type::MOT_START | app_type::MOT_CONTINUATION => {
                let is_start = app == app_type::MOT_START;
                self.process_mot_subfield(is_start, subfield, events);
            }
            app => {
                tracing::trace!(target: TARGET, "ignoring X-PAD application type {}", app);
            }
        }
    }

    /// Clause 7.4.5.1.1: MSC data group length indicator, 14 bits + CRC.
    fn process_data_group_length(&mut self, subfield: &[u8]) {
        if subfield.len() < 4 {
            tracing::debug!(target: TARGET, "data group length indicator truncated");
            return;
        }
        if !CRC16_CCITT_INVERTED.validate(&subfield[..4]) {
            self.counters.dgli_crc_errors += 1;
            tracing::debug!(target: TARGET, "data group length indicator crc16 mismatch");
            return;
        }
        let length = ((usize::from(subfield[0]) & 0x3F) << 8) | usize::from(subfield[1]);

        if self.data_group_state != DataGroupState::WaitLength && !self.data_group_buffer.is_empty() {
            tracing::debug!(
                target: TARGET,
                "overwriting incomplete data group {}/{}",
                self.data_group_buffer.len(), self.data_group_required,
            );
            self.counters.discarded_data_groups += 1;
        }
        self.data_group_buffer.clear();
        if length == 0 {
            self.data_group_state = DataGroupState::WaitLength;
            return;
        }
        self.data_group_required = length;
        self.data_group_state = DataGroupState::WaitStart;
    }

    fn process_mot_subfield(&mut self, is_start: bool, subfield: &[u8], events: &mut Vec<PadEvent>) {
        // nothing to collect until a length indicator arrives
        if self.data_group_state == DataGroupState::WaitLength {
            return;
        }
        if self.data_group_state == DataGroupState::WaitStart && !is_start {
            return;
        }

        if is_start {
            if self.data_group_state == DataGroupState::ReadData && !self.data_group_buffer.is_empty() {
                tracing::debug!(
                    target: TARGET,
                    "discarding partial data group {}/{}",
                    self.data_group_buffer.len(), self.data_group_required,
                );
                self.counters.discarded_data_groups += 1;
                self.data_group_buffer.clear();
            }
            self.data_group_state = DataGroupState::ReadData;
        }

        let remaining = self.data_group_required - self.data_group_buffer.len();
        let consumed = remaining.min(subfield.len());
        self.data_group_buffer.extend_from_slice(&subfield[..consumed]);
        // subfields are padded out; anything beyond the group is filler

        if self.data_group_buffer.len() < self.data_group_required {
            return;
        }

        match parse_data_group(&self.data_group_buffer) {
            Ok(group) => {
                if group.segment_field.is_none() || group.transport_id.is_none() {
                    tracing::debug!(target: TARGET, "MOT data group missing segment or transport id field");
                    self.counters.data_group_errors += 1;
                } else {
                    for entity in self.mot_processor.process_data_group(&group) {
                        events.push(PadEvent::MotEntity(entity));
                    }
                }
            }
            Err(error) => {
                tracing::debug!(target: TARGET, "dropping data group: {:?}", error);
                self.counters.data_group_errors += 1;
            }
        }
        self.data_group_buffer.clear();
        self.data_group_state = DataGroupState::WaitLength;
    }
}

/// Pulls the PAD bytes out of an access unit's leading
/// data_stream_element. Returns the reversed X-PAD span and the F-PAD.
fn extract_pad(au: &[u8]) -> Option<(&[u8], [u8; 2])> {
    // syntactic element id 4 = data_stream_element, in the top 3 bits
    if au.len() < 3 || au[0] >> 5 != 0b100 {
        return None;
    }
    let mut pad_start = 2usize;
    let mut pad_length = usize::from(au[1]);
    if pad_length == 255 {
        pad_length += usize::from(au[2]);
        pad_start += 1;
    }
    if pad_length < FPAD_BYTES || au.len() < pad_start + pad_length {
        tracing::debug!(target: TARGET, "data_stream_element of {} bytes is malformed", pad_length);
        return None;
    }
    let xpad = &au[pad_start..pad_start + pad_length - FPAD_BYTES];
    let fpad_bytes = &au[pad_start + pad_length - FPAD_BYTES..pad_start + pad_length];
    Some((xpad, [fpad_bytes[0], fpad_bytes[1]]))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Wraps reversed X-PAD content and an F-PAD into a minimal access
    /// unit with a leading data_stream_element.
    pub fn build_access_unit(xpad: &[u8], ci_flag: bool, audio_payload: &[u8]) -> Vec<u8> {
        let mut pad = Vec::with_capacity(xpad.len() + FPAD_BYTES);
        // transmitted X-PAD is byte reversed
        pad.extend(xpad.iter().rev());
        // F-PAD: variable size X-PAD indicator
        pad.push(0b0010_0000);
        pad.push(if ci_flag { 0b0000_0010 } else { 0 });

        let mut au = Vec::with_capacity(pad.len() + 2 + audio_payload.len());
        au.push(0b100_00000);
        assert!(pad.len() < 255);
        au.push(pad.len() as u8);
        au.extend_from_slice(&pad);
        au.extend_from_slice(audio_payload);
        au
    }

    /// A variable X-PAD with one content indicator list.
    pub fn build_xpad(subfields: &[(u8, &[u8])]) -> Vec<u8> {
        assert!(subfields.len() < MAX_CI_BYTES);
        let mut xpad = Vec::new();
        let mut padded: Vec<(usize, Vec<u8>)> = Vec::new();
        for (app, data) in subfields {
            let length_index = CI_LENGTH_TABLE
                .iter()
                .position(|&length| length >= data.len())
                .expect("subfield too large for any CI length");
            let mut padded_data = data.to_vec();
            padded_data.resize(CI_LENGTH_TABLE[length_index], 0);
            xpad.push(((length_index as u8) << 5) | (app & 0x1F));
            padded.push((length_index, padded_data));
        }
        xpad.push(app_type::END_MARKER);
        for (_, data) in padded {
            xpad.extend_from_slice(&data);
        }
        xpad
    }

    /// Builds the 4 byte data group length indicator subfield.
    pub fn build_dgli(length: usize) -> Vec<u8> {
        let mut dgli = vec![((length >> 8) as u8) & 0x3F, (length & 0xFF) as u8];
        let crc = CRC16_CCITT_INVERTED.process(&dgli);
        dgli.extend_from_slice(&crc.to_be_bytes());
        dgli
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::mot::processor::test_support::build_mot_header;
    use crate::msc::data_group::{build_data_group, SegmentField};
    use crate::pad::dynamic_label::test_support::build_label_segment;

    #[test]
    fn dynamic_label_over_xpad() {
        let mut processor = PadProcessor::default();
        let segment = build_label_segment(false, true, true, 0, 0, b"Hello DAB");
        let xpad = build_xpad(&[(2, &segment)]);
        let au = build_access_unit(&xpad, true, &[0x11; 8]);

        let events = processor.process_access_unit(&au);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            PadEvent::DynamicLabel { text, charset: 0 } if text == "Hello DAB"
        ));
    }

    fn mot_segment_group(data_group_type: u8, transport_id: u16, segment_number: u16, is_last: bool, payload: &[u8]) -> Vec<u8> {
        let mut segment = Vec::with_capacity(payload.len() + 2);
        segment.push((payload.len() >> 8) as u8 & 0x1F);
        segment.push((payload.len() & 0xFF) as u8);
        segment.extend_from_slice(payload);
        build_data_group(
            data_group_type,
            (segment_number & 0x0F) as u8,
            SegmentField { is_last_segment: is_last, segment_number },
            transport_id,
            &segment,
        )
    }

    /// Feeds one data group through DGLI + MOT start/continuation
    /// subfields split across several access units.
    fn feed_data_group(processor: &mut PadProcessor, group: &[u8]) -> Vec<PadEvent> {
        let mut events = Vec::new();
        let dgli = build_dgli(group.len());
        let first_chunk_len = group.len().min(16);
        let xpad = build_xpad(&[(1, &dgli), (12, &group[..first_chunk_len])]);
        events.extend(processor.process_access_unit(&build_access_unit(&xpad, true, &[0; 4])));
        let mut position = first_chunk_len;
        while position < group.len() {
            let chunk_len = (group.len() - position).min(32);
            let xpad = build_xpad(&[(13, &group[position..position + chunk_len])]);
            events.extend(processor.process_access_unit(&build_access_unit(&xpad, true, &[0; 4])));
            position += chunk_len;
        }
        events
    }

    #[test]
    fn slideshow_entity_over_three_xpad_segments() {
        // minimal JPEG-ish body split over 3 MOT body segments
        let body: Vec<u8> = [0xFF, 0xD8].iter().copied().chain(0u8..40).chain([0xFF, 0xD9]).collect();
        let header_bytes = build_mot_header(body.len() as u32, 2, 1, "test.jpg");

        let mut processor = PadProcessor::default();
        let mut events = Vec::new();
        events.extend(feed_data_group(&mut processor, &mot_segment_group(3, 0x55, 0, true, &header_bytes)));
        let third = body.len() / 3;
        events.extend(feed_data_group(&mut processor, &mot_segment_group(4, 0x55, 0, false, &body[..third])));
        events.extend(feed_data_group(&mut processor, &mot_segment_group(4, 0x55, 1, false, &body[third..2 * third])));
        events.extend(feed_data_group(&mut processor, &mot_segment_group(4, 0x55, 2, true, &body[2 * third..])));

        let entities: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                PadEvent::MotEntity(entity) => Some(entity),
                _ => None,
            })
            .collect();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].transport_id, 0x55);
        assert_eq!(entities[0].body, body);
        assert_eq!(entities[0].header.content_name.as_ref().unwrap().1, "test.jpg");
    }

    #[test]
    fn corrupted_segment_never_completes_the_entity() {
        let body: Vec<u8> = (0u8..60).collect();
        let header_bytes = build_mot_header(body.len() as u32, 2, 1, "x.jpg");

        let mut processor = PadProcessor::default();
        let mut events = Vec::new();
        events.extend(feed_data_group(&mut processor, &mot_segment_group(3, 0x9, 0, true, &header_bytes)));
        let mut corrupted = mot_segment_group(4, 0x9, 0, false, &body[..30]);
        let flip = corrupted.len() / 2;
        corrupted[flip] ^= 0x80;
        events.extend(feed_data_group(&mut processor, &corrupted));
        events.extend(feed_data_group(&mut processor, &mot_segment_group(4, 0x9, 1, true, &body[30..])));

        assert!(events.iter().all(|event| !matches!(event, PadEvent::MotEntity(_))));
        assert_eq!(processor.counters.data_group_errors, 1);
    }

    #[test]
    fn audio_without_dse_yields_no_events() {
        let mut processor = PadProcessor::default();
        let au = vec![0x21, 0x00, 0x55, 0x66];
        assert!(processor.process_access_unit(&au).is_empty());
    }
}
