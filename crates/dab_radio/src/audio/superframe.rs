//! DAB+ audio superframe reassembly.
//!
//! DOC: ETSI TS 102 563
//! Clause 5.2 - Audio super framing syntax
//! Clause 6 - Transport error coding and interleaving
//!
//! Five logical frames form one superframe protected by a column
//! interleaved RS(120,110) code. The superframe header carries the AAC
//! configuration and a table of access unit boundaries, each access unit
//! ending in its own CRC.

use crate::algorithms::crc::{CRC16_CCITT_INVERTED, CRC16_FIRECODE};
use crate::algorithms::reed_solomon::ReedSolomon;

const TARGET: &str = "aac-superframe";

/// Logical frames per superframe.
const TOTAL_DAB_FRAMES: usize = 5;
/// Consecutive failed superframes before firecode sync is dropped.
const NB_DESYNC_MAX_COUNT: u32 = 10;

const NB_RS_MESSAGE_BYTES: usize = 120;
const NB_RS_DATA_BYTES: usize = 110;
const NB_RS_PARITY_BYTES: usize = 10;
/// The RS(120,110) code is the 2^8 Galois field RS(255,245) shortened by
/// padding 135 zero symbols to the left of the message.
const NB_RS_PADDING_BYTES: usize = 255 - NB_RS_MESSAGE_BYTES;
/// Clause 6.1: G(x) = x^8 + x^4 + x^3 + x^2 + 1
const GALOIS_FIELD_POLY: usize = 0b1_0001_1101;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegSurround {
    NotUsed,
    Surround51,
    SurroundOther,
    Rfa,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperFrameHeader {
    pub sampling_rate: u32,
    pub is_stereo: bool,
    pub sbr_flag: bool,
    pub ps_flag: bool,
    pub mpeg_surround: MpegSurround,
}

/// One validated access unit within a superframe.
#[derive(Debug, Clone, Copy)]
pub struct AccessUnit<'a> {
    pub index: usize,
    pub total: usize,
    pub data: &'a [u8],
}

pub struct SuperframeOutput<'a> {
    pub header: SuperFrameHeader,
    pub access_units: Vec<AccessUnit<'a>>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SuperframeCounters {
    pub total_superframes: u64,
    pub firecode_errors: u64,
    pub rs_errors: u64,
    pub rs_corrected_bytes: u64,
    pub au_crc_errors: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitFrameStart,
    CollectFrames,
}

/// Accumulates logical frames and emits validated access units.
pub struct SuperframeProcessor {
    rs_decoder: ReedSolomon,
    rs_column_buffer: [u8; NB_RS_MESSAGE_BYTES],
    superframe_buffer: Vec<u8>,
    state: State,
    curr_dab_frame: usize,
    prev_nb_frame_bytes: usize,
    is_synced: bool,
    nb_desync_count: u32,
    pub counters: SuperframeCounters,
}

impl Default for SuperframeProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl SuperframeProcessor {
    pub fn new() -> Self {
        let rs_decoder = ReedSolomon::new(8, GALOIS_FIELD_POLY, 0, 1, NB_RS_PARITY_BYTES, NB_RS_PADDING_BYTES)
            .expect("DAB+ Reed-Solomon parameters are valid");
        Self {
            rs_decoder,
            rs_column_buffer: [0u8; NB_RS_MESSAGE_BYTES],
            superframe_buffer: Vec::new(),
            state: State::WaitFrameStart,
            curr_dab_frame: 0,
            prev_nb_frame_bytes: 0,
            is_synced: false,
            nb_desync_count: 0,
            counters: SuperframeCounters::default(),
        }
    }

    /// Consumes one decoded logical frame. At most one superframe is
    /// produced per five frames consumed.
    pub fn process_frame(&mut self, frame: &[u8]) -> Option<SuperframeOutput<'_>> {
        if frame.is_empty() {
            tracing::warn!(target: TARGET, "received an empty logical frame");
            return None;
        }
        if frame.len() % (NB_RS_MESSAGE_BYTES / TOTAL_DAB_FRAMES) != 0 {
            tracing::warn!(target: TARGET, "logical frame of {} bytes doesn't divide into RS columns", frame.len());
            return None;
        }

        // a changed subchannel configuration resets accumulation
        if self.prev_nb_frame_bytes != frame.len() {
            self.prev_nb_frame_bytes = frame.len();
            self.superframe_buffer.resize(frame.len() * TOTAL_DAB_FRAMES, 0);
            self.curr_dab_frame = 0;
            self.state = State::WaitFrameStart;
        }

        // too many failed superframes: fall back to firecode search
        if self.nb_desync_count >= NB_DESYNC_MAX_COUNT {
            self.nb_desync_count = 0;
            self.is_synced = false;
        }
        if self.is_synced {
            self.state = State::CollectFrames;
        }

        if self.state == State::WaitFrameStart {
            if !check_firecode(frame) {
                self.counters.firecode_errors += 1;
                return None;
            }
            self.state = State::CollectFrames;
        }

        let offset = self.curr_dab_frame * frame.len();
        self.superframe_buffer[offset..offset + frame.len()].copy_from_slice(frame);
        self.curr_dab_frame += 1;

        if self.curr_dab_frame < TOTAL_DAB_FRAMES {
            return None;
        }
        self.curr_dab_frame = 0;
        self.state = State::WaitFrameStart;
        self.process_superframe(frame.len())
    }

    fn process_superframe(&mut self, nb_frame_bytes: usize) -> Option<SuperframeOutput<'_>> {
        let nb_columns = (nb_frame_bytes * TOTAL_DAB_FRAMES) / NB_RS_MESSAGE_BYTES;

        if !self.reed_solomon_correct(nb_columns) {
            self.nb_desync_count += 1;
            return None;
        }
        if !check_firecode(&self.superframe_buffer) {
            self.counters.firecode_errors += 1;
            self.nb_desync_count += 1;
            return None;
        }
        self.nb_desync_count = 0;
        self.is_synced = true;
        self.counters.total_superframes += 1;

        // Clause 5.2, table 2: he_aac_super_frame_header()
        let buf = &self.superframe_buffer;
        let descriptor = buf[2];
        let dac_rate         = (descriptor & 0b01000000) != 0;
        let sbr_flag         = (descriptor & 0b00100000) != 0;
        let aac_channel_mode = (descriptor & 0b00010000) != 0;
        let ps_flag          = (descriptor & 0b00001000) != 0;
        let mpeg_config      = descriptor & 0b00000111;

        let header = SuperFrameHeader {
            sampling_rate: if dac_rate { 48000 } else { 32000 },
            is_stereo: aac_channel_mode,
            sbr_flag,
            ps_flag,
            mpeg_surround: match mpeg_config {
                0b000 => MpegSurround::NotUsed,
                0b001 => MpegSurround::Surround51,
                0b111 => MpegSurround::SurroundOther,
                _ => MpegSurround::Rfa,
            },
        };

        // access units per superframe follow from the AAC configuration
        let num_aus: usize = match (dac_rate, sbr_flag) {
            (false, true) => 2,
            (true, true) => 3,
            (false, false) => 4,
            (true, false) => 6,
        };

        // 12 bit start addresses for all but the first access unit
        let mut au_start = [0usize; 7];
        let nb_au_fields = num_aus - 1;
        let nb_au_start_bytes = (nb_au_fields * 12).div_ceil(8);
        for (i, au) in au_start.iter_mut().enumerate().skip(1).take(nb_au_fields) {
            let bit_offset = (i - 1) * 12;
            let byte = 3 + bit_offset / 8;
            let value = if bit_offset % 8 == 0 {
                (u16::from(buf[byte]) << 4) | (u16::from(buf[byte + 1]) >> 4)
            } else {
                (u16::from(buf[byte] & 0x0F) << 8) | u16::from(buf[byte + 1])
            };
            *au = value as usize;
        }
        au_start[0] = 3 + nb_au_start_bytes;
        au_start[num_aus] = NB_RS_DATA_BYTES * nb_columns;

        tracing::debug!(
            target: TARGET,
            "superframe rate={}Hz sbr={} stereo={} ps={} aus={}",
            header.sampling_rate, header.sbr_flag, header.is_stereo, header.ps_flag, num_aus,
        );

        let mut access_units = Vec::with_capacity(num_aus);
        for i in 0..num_aus {
            let start = au_start[i];
            let end = au_start[i + 1];
            if start >= end || end > NB_RS_DATA_BYTES * nb_columns {
                tracing::warn!(target: TARGET, "access unit {} has invalid bounds {}..{}", i, start, end);
                self.counters.au_crc_errors += 1;
                continue;
            }
            let au_buf = &buf[start..end];
            if au_buf.len() < 2 {
                self.counters.au_crc_errors += 1;
                continue;
            }
            if !CRC16_CCITT_INVERTED.validate(au_buf) {
                tracing::debug!(target: TARGET, "access unit {}/{} crc16 mismatch", i, num_aus);
                self.counters.au_crc_errors += 1;
                continue;
            }
            access_units.push(AccessUnit {
                index: i,
                total: num_aus,
                data: &au_buf[..au_buf.len() - 2],
            });
        }

        Some(SuperframeOutput { header, access_units })
    }

    /// Deinterleaves each RS column, corrects it and writes repairs back.
    /// Returns false when any column is uncorrectable.
    fn reed_solomon_correct(&mut self, nb_columns: usize) -> bool {
        for column in 0..nb_columns {
            for j in 0..NB_RS_MESSAGE_BYTES {
                self.rs_column_buffer[j] = self.superframe_buffer[column + j * nb_columns];
            }
            match self.rs_decoder.decode(&mut self.rs_column_buffer) {
                Some(corrections) => {
                    self.counters.rs_corrected_bytes += corrections.len() as u64;
                    for position in corrections {
                        self.superframe_buffer[column + position * nb_columns] =
                            self.rs_column_buffer[position];
                    }
                }
                None => {
                    tracing::debug!(target: TARGET, "rs column {}/{} uncorrectable", column, nb_columns);
                    self.counters.rs_errors += 1;
                    return false;
                }
            }
        }
        true
    }
}

/// Clause 5.2: the firecode in bytes 0..2 covers bytes 2..11.
pub fn check_firecode(frame: &[u8]) -> bool {
    if frame.len() < 11 {
        return false;
    }
    let crc_rx = u16::from_be_bytes([frame[0], frame[1]]);
    let crc_pred = CRC16_FIRECODE.process(&frame[2..11]);
    crc_rx == crc_pred
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Builds the five logical frames of a valid superframe carrying the
    /// given access unit payloads.
    pub fn build_superframe(
        nb_frame_bytes: usize,
        dac_rate: bool,
        sbr_flag: bool,
        is_stereo: bool,
        ps_flag: bool,
        au_payloads: &[Vec<u8>],
    ) -> Vec<Vec<u8>> {
        let nb_columns = (nb_frame_bytes * TOTAL_DAB_FRAMES) / NB_RS_MESSAGE_BYTES;
        let nb_data_bytes = NB_RS_DATA_BYTES * nb_columns;
        let num_aus = au_payloads.len();

        let mut data = vec![0u8; nb_data_bytes];
        // header: firecode placeholder + descriptor + au starts
        let mut descriptor = 0u8;
        if dac_rate { descriptor |= 0b01000000; }
        if sbr_flag { descriptor |= 0b00100000; }
        if is_stereo { descriptor |= 0b00010000; }
        if ps_flag { descriptor |= 0b00001000; }
        data[2] = descriptor;

        let nb_au_fields = num_aus - 1;
        let nb_au_start_bytes = (nb_au_fields * 12 + 7) / 8;
        let mut au_start = vec![0usize; num_aus + 1];
        au_start[0] = 3 + nb_au_start_bytes;
        for i in 0..num_aus {
            au_start[i + 1] = au_start[i] + au_payloads[i].len() + 2;
        }
        assert!(au_start[num_aus] <= nb_data_bytes, "payloads overflow the superframe");

        // pack the 12 bit start addresses
        for i in 1..num_aus {
            let bit_offset = (i - 1) * 12;
            let byte = 3 + bit_offset / 8;
            let value = au_start[i] as u16;
            if bit_offset % 8 == 0 {
                data[byte] = (value >> 4) as u8;
                data[byte + 1] |= ((value & 0x0F) << 4) as u8;
            } else {
                data[byte] |= (value >> 8) as u8 & 0x0F;
                data[byte + 1] = (value & 0xFF) as u8;
            }
        }

        for (payload, window) in au_payloads.iter().zip(au_start.windows(2)) {
            let start = window[0];
            data[start..start + payload.len()].copy_from_slice(payload);
            let crc = CRC16_CCITT_INVERTED.process(payload);
            data[start + payload.len()..start + payload.len() + 2].copy_from_slice(&crc.to_be_bytes());
        }

        // firecode over the assembled header
        let firecode = CRC16_FIRECODE.process(&data[2..11]);
        data[0..2].copy_from_slice(&firecode.to_be_bytes());

        // append RS parity column-wise
        let rs = ReedSolomon::new(8, GALOIS_FIELD_POLY, 0, 1, NB_RS_PARITY_BYTES, NB_RS_PADDING_BYTES).unwrap();
        let mut superframe = vec![0u8; nb_frame_bytes * TOTAL_DAB_FRAMES];
        let mut column_data = [0u8; NB_RS_DATA_BYTES];
        let mut parity = [0u8; NB_RS_PARITY_BYTES];
        for column in 0..nb_columns {
            for j in 0..NB_RS_DATA_BYTES {
                column_data[j] = data[column + j * nb_columns];
            }
            rs.encode(&column_data, &mut parity);
            for j in 0..NB_RS_DATA_BYTES {
                superframe[column + j * nb_columns] = column_data[j];
            }
            for (j, &byte) in parity.iter().enumerate() {
                superframe[column + (NB_RS_DATA_BYTES + j) * nb_columns] = byte;
            }
        }

        superframe
            .chunks_exact(nb_frame_bytes)
            .map(|chunk| chunk.to_vec())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::build_superframe;
    use super::*;

    const NB_FRAME_BYTES: usize = 96; // 32 kbps subchannel

    #[test]
    fn reassembles_access_units_with_expected_header() {
        // 48 kHz, SBR, stereo: 3 access units
        let payloads = vec![
            (0u8..100).collect::<Vec<u8>>(),
            (50u8..170).collect::<Vec<u8>>(),
            (10u8..90).collect::<Vec<u8>>(),
        ];
        let frames = build_superframe(NB_FRAME_BYTES, true, true, true, false, &payloads);

        let mut processor = SuperframeProcessor::new();
        let mut outputs = 0;
        for (i, frame) in frames.iter().enumerate() {
            let result = processor.process_frame(frame);
            if i < frames.len() - 1 {
                assert!(result.is_none());
                continue;
            }
            let output = result.expect("superframe should decode on the fifth frame");
            assert_eq!(output.header, SuperFrameHeader {
                sampling_rate: 48000,
                is_stereo: true,
                sbr_flag: true,
                ps_flag: false,
                mpeg_surround: MpegSurround::NotUsed,
            });
            assert_eq!(output.access_units.len(), 3);
            for (au, payload) in output.access_units.iter().zip(payloads.iter()) {
                assert_eq!(au.total, 3);
                assert_eq!(au.data, &payload[..]);
            }
            outputs += 1;
        }
        assert_eq!(outputs, 1);
        assert_eq!(processor.counters.total_superframes, 1);
        assert_eq!(processor.counters.au_crc_errors, 0);
    }

    #[test]
    fn reed_solomon_repairs_byte_errors() {
        let payloads = vec![(0u8..120).collect::<Vec<u8>>(), (5u8..200).collect::<Vec<u8>>()];
        // 32 kHz with SBR: 2 access units
        let mut frames = build_superframe(NB_FRAME_BYTES, false, true, true, false, &payloads);
        // corrupt a few bytes across different frames (distinct columns)
        frames[1][10] ^= 0xFF;
        frames[2][33] ^= 0x55;
        frames[4][80] ^= 0x0F;

        let mut processor = SuperframeProcessor::new();
        let mut output_seen = false;
        for frame in &frames {
            if let Some(output) = processor.process_frame(frame) {
                assert_eq!(output.access_units.len(), 2);
                for (au, payload) in output.access_units.iter().zip(payloads.iter()) {
                    assert_eq!(au.data, &payload[..]);
                }
                output_seen = true;
            }
        }
        assert!(output_seen);
        assert!(processor.counters.rs_corrected_bytes >= 3);
    }

    #[test]
    fn bad_first_frame_is_ignored_until_firecode_locks() {
        let payloads = vec![(0u8..60).collect::<Vec<u8>>(), (3u8..90).collect::<Vec<u8>>()];
        let frames = build_superframe(NB_FRAME_BYTES, false, true, false, false, &payloads);

        let mut processor = SuperframeProcessor::new();
        // garbage before the true superframe start
        let garbage = vec![0xA5u8; NB_FRAME_BYTES];
        assert!(processor.process_frame(&garbage).is_none());
        assert_eq!(processor.counters.firecode_errors, 1);

        let mut output_seen = false;
        for frame in &frames {
            if processor.process_frame(frame).is_some() {
                output_seen = true;
            }
        }
        assert!(output_seen);
    }
}
