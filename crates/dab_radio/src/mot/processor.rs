//! Builds complete MOT entities from MSC data group segments.
//!
//! DOC: ETSI EN 301 234
//! Clause 5.1.1 - Segmentation header
//! Clause 6.1 - Header mode
//! Clause 6.2 - MOT parameters

use super::assembler::MotAssembler;
use super::{MotEntity, MotHeader, MotHeaderParameter, MotTime, TransportId};
use crate::constants::charsets::convert_charset_to_utf8;
use crate::misc_info::convert_mjd_to_ymd;
use crate::msc::data_group::DataGroup;
use std::collections::HashMap;

const TARGET: &str = "mot-processor";

/// DOC: ETSI EN 301 234, clause 5.2.2: data group types over X-PAD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotDataType {
    Header,
    UnscrambledBody,
    UncompressedDirectory,
}

impl MotDataType {
    pub fn from_data_group_type(data_group_type: u8) -> Option<Self> {
        match data_group_type {
            3 => Some(Self::Header),
            4 => Some(Self::UnscrambledBody),
            6 => Some(Self::UncompressedDirectory),
            1 | 5 | 7 => {
                // conditional access and compressed directories are out of reach
                tracing::debug!(target: TARGET, "unsupported MOT data group type {}", data_group_type);
                None
            }
            _ => None,
        }
    }
}

#[derive(Default)]
struct AssemblerTable {
    header: MotAssembler,
    body: MotAssembler,
    directory: MotAssembler,
    is_emitted: bool,
    is_directory_emitted: bool,
}

/// Interleaved MOT streams can carry several transport ids at once; the
/// oldest untouched id is evicted when the table outgrows its bound.
pub struct MotProcessor {
    assemblers: HashMap<TransportId, AssemblerTable>,
    /// Clause 7.2.3: per-object headers announced by a MOT directory,
    /// waiting for their bodies.
    directory_headers: HashMap<TransportId, MotHeader>,
    access_order: Vec<TransportId>,
    max_transport_objects: usize,
}

impl Default for MotProcessor {
    fn default() -> Self {
        Self::new(10)
    }
}

impl MotProcessor {
    pub fn new(max_transport_objects: usize) -> Self {
        Self {
            assemblers: HashMap::new(),
            directory_headers: HashMap::new(),
            access_order: Vec::new(),
            max_transport_objects,
        }
    }

    /// Feeds one parsed MSC data group carrying a MOT segment.
    /// Returns the entities this segment completed: at most one in
    /// header mode, possibly several when a directory closes the gap for
    /// already assembled bodies.
    pub fn process_data_group(&mut self, group: &DataGroup) -> Vec<MotEntity> {
        let Some(data_type) = MotDataType::from_data_group_type(group.data_group_type) else {
            return Vec::new();
        };
        let (Some(segment_field), Some(transport_id)) = (group.segment_field, group.transport_id) else {
            return Vec::new();
        };

        // Clause 5.1.1: each segment starts with a segmentation header
        let data = group.data_field;
        if data.len() < 2 {
            tracing::warn!(target: TARGET, "segment too short for its segmentation header");
            return Vec::new();
        }
        let segment_size = ((usize::from(data[0]) & 0b0001_1111) << 8) | usize::from(data[1]);
        let segment_data = &data[2..];
        if segment_data.len() < segment_size {
            tracing::warn!(target: TARGET, "segmentation header declares {} bytes but {} remain", segment_size, segment_data.len());
            return Vec::new();
        }
        let segment_data = &segment_data[..segment_size];

        self.touch(transport_id);
        {
            let table = self.assemblers.entry(transport_id).or_default();
            let assembler = match data_type {
                MotDataType::Header => &mut table.header,
                MotDataType::UnscrambledBody => &mut table.body,
                MotDataType::UncompressedDirectory => &mut table.directory,
            };
            if segment_field.is_last_segment {
                assembler.set_total_segments(segment_field.segment_number as usize + 1);
            }
            assembler.add_segment(segment_field.segment_number as usize, segment_data);
        }

        let mut completed = Vec::new();
        if data_type == MotDataType::UncompressedDirectory {
            self.absorb_directory(transport_id);
        } else if let Some(entity) = self.try_emit(transport_id) {
            completed.push(entity);
        }
        completed.extend(self.emit_directory_bodies());
        self.evict_stale();
        completed
    }

    /// A newly completed directory supersedes the previous carousel
    /// listing; its object headers wait for their bodies.
    fn absorb_directory(&mut self, transport_id: TransportId) {
        let Some(table) = self.assemblers.get_mut(&transport_id) else {
            return;
        };
        if table.is_directory_emitted || !table.directory.is_complete() {
            return;
        }
        table.is_directory_emitted = true;
        let directory_bytes = table.directory.assemble();
        let Some(entries) = parse_mot_directory(&directory_bytes) else {
            tracing::warn!(target: TARGET, "discarding malformed MOT directory tid={}", transport_id);
            return;
        };
        tracing::info!(target: TARGET, "MOT directory tid={} lists {} objects", transport_id, entries.len());
        self.directory_headers.clear();
        for (object_id, header) in entries {
            self.directory_headers.insert(object_id, header);
        }
    }

    /// Header-mode completion: header and body share the transport id.
    fn try_emit(&mut self, transport_id: TransportId) -> Option<MotEntity> {
        let table = self.assemblers.get_mut(&transport_id)?;
        if table.is_emitted || !table.header.is_complete() || !table.body.is_complete() {
            return None;
        }
        let header_bytes = table.header.assemble();
        let body = table.body.assemble();
        table.is_emitted = true;

        let header = parse_mot_header(&header_bytes)?;
        Some(finish_entity(transport_id, header, body))
    }

    /// Directory-mode completion: any assembled body whose transport id
    /// is listed in the current directory.
    fn emit_directory_bodies(&mut self) -> Vec<MotEntity> {
        let ready: Vec<TransportId> = self
            .assemblers
            .iter()
            .filter(|(transport_id, table)| {
                !table.is_emitted
                    && table.body.is_complete()
                    && self.directory_headers.contains_key(transport_id)
            })
            .map(|(&transport_id, _)| transport_id)
            .collect();

        let mut completed = Vec::with_capacity(ready.len());
        for transport_id in ready {
            let Some(header) = self.directory_headers.remove(&transport_id) else {
                continue;
            };
            let Some(table) = self.assemblers.get_mut(&transport_id) else {
                continue;
            };
            table.is_emitted = true;
            let body = table.body.assemble();
            completed.push(finish_entity(transport_id, header, body));
        }
        completed
    }

    fn touch(&mut self, transport_id: TransportId) {
        self.access_order.retain(|&id| id != transport_id);
        self.access_order.push(transport_id);
    }

    fn evict_stale(&mut self) {
        while self.access_order.len() > self.max_transport_objects {
            let oldest = self.access_order.remove(0);
            tracing::debug!(target: TARGET, "evicting stale transport id {}", oldest);
            self.assemblers.remove(&oldest);
        }
    }
}

fn finish_entity(transport_id: TransportId, header: MotHeader, body: Vec<u8>) -> MotEntity {
    if header.body_size as usize != body.len() {
        tracing::warn!(target: TARGET, "assembled body of {} bytes but header declares {}", body.len(), header.body_size);
    }
    tracing::info!(
        target: TARGET,
        "complete MOT entity tid={} type={}/{} name={:?} body={} bytes",
        transport_id, header.content_type, header.content_subtype,
        header.content_name.as_ref().map(|(_, name)| name.as_str()),
        body.len(),
    );
    MotEntity { transport_id, header, body }
}

/// DOC: ETSI EN 301 234, clause 7.2.3 - the MOT directory
/// Fixed fields, an extension block, then per-object transport ids with
/// their full headers.
pub fn parse_mot_directory(buf: &[u8]) -> Option<Vec<(TransportId, MotHeader)>> {
    const FIXED_FIELDS_SIZE: usize = 13;
    if buf.len() < FIXED_FIELDS_SIZE {
        tracing::warn!(target: TARGET, "MOT directory of {} bytes is shorter than its fixed fields", buf.len());
        return None;
    }
    let number_of_objects = u16::from_be_bytes([buf[4], buf[5]]) as usize;
    let extension_length = u16::from_be_bytes([buf[11], buf[12]]) as usize;

    let mut position = FIXED_FIELDS_SIZE + extension_length;
    let mut entries = Vec::with_capacity(number_of_objects);
    for _ in 0..number_of_objects {
        let id_bytes = buf.get(position..position + 2)?;
        let transport_id = u16::from_be_bytes([id_bytes[0], id_bytes[1]]);
        position += 2;

        // the entry's header carries its own size in the header core
        let core = buf.get(position..position + 7)?;
        let header_size =
            ((u16::from(core[3] & 0x0F) << 9) | (u16::from(core[4]) << 1) | (u16::from(core[5]) >> 7)) as usize;
        let header_bytes = buf.get(position..position + header_size)?;
        let header = parse_mot_header(header_bytes)?;
        position += header_size;
        entries.push((transport_id, header));
    }
    Some(entries)
}

/// Parses the MOT header core and its extension parameters.
pub fn parse_mot_header(buf: &[u8]) -> Option<MotHeader> {
    // Clause 6.1: header core is 7 bytes
    if buf.len() < 7 {
        tracing::warn!(target: TARGET, "MOT header of {} bytes is shorter than its core", buf.len());
        return None;
    }
    let body_size = (u32::from(buf[0]) << 20)
        | (u32::from(buf[1]) << 12)
        | (u32::from(buf[2]) << 4)
        | (u32::from(buf[3]) >> 4);
    let header_size = (u16::from(buf[3] & 0x0F) << 9) | (u16::from(buf[4]) << 1) | (u16::from(buf[5]) >> 7);
    let content_type = (buf[5] >> 1) & 0b0011_1111;
    let content_subtype = (u16::from(buf[5] & 0b1) << 8) | u16::from(buf[6]);

    let mut header = MotHeader {
        body_size,
        header_size,
        content_type,
        content_subtype,
        ..Default::default()
    };

    if header_size as usize != buf.len() {
        tracing::debug!(target: TARGET, "header size field {} != assembled {}", header_size, buf.len());
    }

    // extension parameters fill the rest of the header
    let mut position = 7usize;
    let end = buf.len().min(header_size as usize);
    while position < end {
        let pli = buf[position] >> 6;
        let param_id = buf[position] & 0b0011_1111;
        position += 1;
        let data_length = match pli {
            0 => 0usize,
            1 => 1,
            2 => 4,
            _ => {
                // variable length: an escaped data field length indicator
                let first = *buf.get(position)?;
                position += 1;
                if first & 0x80 != 0 {
                    let second = *buf.get(position)?;
                    position += 1;
                    (usize::from(first & 0x7F) << 8) | usize::from(second)
                } else {
                    usize::from(first)
                }
            }
        };
        let data = buf.get(position..position + data_length)?;
        position += data_length;
        apply_header_parameter(&mut header, param_id, data);
    }
    Some(header)
}

fn apply_header_parameter(header: &mut MotHeader, param_id: u8, data: &[u8]) {
    match param_id {
        // Clause 6.2.2.1.1: ContentName
        0x0C => {
            if data.is_empty() {
                tracing::warn!(target: TARGET, "empty content name parameter");
                return;
            }
            let charset = data[0] >> 4;
            let name = convert_charset_to_utf8(&data[1..], charset);
            header.content_name = Some((charset, name.trim_end_matches('\0').to_string()));
        }
        // Clause 6.2.4: ExpirationTime / TriggerTime
        0x04 => header.expire_time = parse_mot_time(data),
        0x05 => header.trigger_time = parse_mot_time(data),
        param_id => {
            header.user_app_parameters.push(MotHeaderParameter {
                param_id,
                data: data.to_vec(),
            });
        }
    }
}

/// Clause 6.2.4.1: UTC time, absolute form.
fn parse_mot_time(data: &[u8]) -> Option<MotTime> {
    if data.len() < 4 {
        tracing::warn!(target: TARGET, "time parameter of {} bytes is too short", data.len());
        return None;
    }
    let validity = data[0] & 0x80 != 0;
    if !validity {
        // "now": no absolute time transmitted
        return None;
    }
    let mjd = ((u32::from(data[0]) & 0x7F) << 10) | (u32::from(data[1]) << 2) | (u32::from(data[2]) >> 6);
    let utc_flag = data[2] & 0b0000_1000 != 0;
    let hours_hi = data[2] & 0b0000_0111;
    let (year, month, day) = convert_mjd_to_ymd(mjd);
    let mut time = MotTime {
        year,
        month,
        day,
        ..Default::default()
    };
    if utc_flag {
        if data.len() < 6 {
            tracing::warn!(target: TARGET, "long form time parameter of {} bytes is too short", data.len());
            return None;
        }
        time.hours = (hours_hi << 2) | (data[3] >> 6);
        time.minutes = data[3] & 0b0011_1111;
        time.seconds = data[4] >> 2;
        time.milliseconds = (u16::from(data[4] & 0b11) << 8) | u16::from(data[5]);
    } else {
        time.hours = (hours_hi << 2) | (data[3] >> 6);
        time.minutes = data[3] & 0b0011_1111;
    }
    Some(time)
}


#[cfg(test)]
mod tests {
    use super::test_support::build_mot_header;
    use super::*;
    use crate::msc::data_group::{build_data_group, parse_data_group, SegmentField};

    fn segment_group(
        data_group_type: u8,
        transport_id: u16,
        segment_number: u16,
        is_last: bool,
        payload: &[u8],
    ) -> Vec<u8> {
        // prepend the MOT segmentation header
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

    #[test]
    fn header_round_trips() {
        let header_bytes = build_mot_header(1234, 0b000010, 0b0001, "photo.jpg");
        let header = parse_mot_header(&header_bytes).unwrap();
        assert_eq!(header.body_size, 1234);
        assert_eq!(header.content_type, 0b000010);
        assert_eq!(header.content_subtype, 0b0001);
        assert_eq!(header.content_name, Some((15, "photo.jpg".to_string())));
    }

    #[test]
    fn entity_completes_from_segmented_header_and_body() {
        let body: Vec<u8> = (0u8..200).collect();
        let header_bytes = build_mot_header(body.len() as u32, 2, 1, "img.jpg");

        let mut processor = MotProcessor::default();
        let groups = [
            segment_group(3, 0x42, 0, true, &header_bytes),
            segment_group(4, 0x42, 0, false, &body[..120]),
            segment_group(4, 0x42, 1, true, &body[120..]),
        ];
        let mut entities = Vec::new();
        for group in &groups {
            let parsed = parse_data_group(group).unwrap();
            entities.extend(processor.process_data_group(&parsed));
        }
        assert_eq!(entities.len(), 1, "entity should complete on the last body segment");
        let entity = &entities[0];
        assert_eq!(entity.transport_id, 0x42);
        assert_eq!(entity.body, body);
        assert_eq!(entity.header.content_name.as_ref().unwrap().1, "img.jpg");
    }

    #[test]
    fn entity_is_emitted_once() {
        let body = vec![9u8; 40];
        let header_bytes = build_mot_header(body.len() as u32, 2, 3, "a.png");
        let mut processor = MotProcessor::default();
        let header_group = segment_group(3, 7, 0, true, &header_bytes);
        let body_group = segment_group(4, 7, 0, true, &body);

        let parsed_header = parse_data_group(&header_group).unwrap();
        let parsed_body = parse_data_group(&body_group).unwrap();
        assert!(processor.process_data_group(&parsed_header).is_empty());
        assert_eq!(processor.process_data_group(&parsed_body).len(), 1);
        // a repeated transmission must not emit again
        assert!(processor.process_data_group(&parsed_body).is_empty());
    }

    /// Serialises a directory listing the given object headers.
    fn build_mot_directory(objects: &[(u16, Vec<u8>)]) -> Vec<u8> {
        let entries_size: usize = objects.iter().map(|(_, header)| 2 + header.len()).sum();
        let directory_size = 13 + entries_size;
        let mut buf = Vec::with_capacity(directory_size);
        buf.extend_from_slice(&(directory_size as u32).to_be_bytes());
        buf.extend_from_slice(&(objects.len() as u16).to_be_bytes());
        buf.extend_from_slice(&[0, 0, 0]); // data carousel period
        buf.extend_from_slice(&[0, 0]); // rfu + segment size
        buf.extend_from_slice(&0u16.to_be_bytes()); // no extension
        for (transport_id, header) in objects {
            buf.extend_from_slice(&transport_id.to_be_bytes());
            buf.extend_from_slice(header);
        }
        buf
    }

    #[test]
    fn directory_mode_releases_listed_bodies() {
        let body_a = vec![0x11u8; 30];
        let body_b: Vec<u8> = (0u8..70).collect();
        let directory = build_mot_directory(&[
            (0x100, build_mot_header(body_a.len() as u32, 2, 1, "a.jpg")),
            (0x101, build_mot_header(body_b.len() as u32, 2, 3, "b.png")),
        ]);

        let mut processor = MotProcessor::default();
        // one body arrives before the directory, one after
        let binding = segment_group(4, 0x100, 0, true, &body_a);
        let parsed = parse_data_group(&binding).unwrap();
        assert!(processor.process_data_group(&parsed).is_empty());

        let binding = segment_group(6, 0x50, 0, true, &directory);
        let parsed = parse_data_group(&binding).unwrap();
        let entities = processor.process_data_group(&parsed);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].transport_id, 0x100);
        assert_eq!(entities[0].body, body_a);
        assert_eq!(entities[0].header.content_name.as_ref().unwrap().1, "a.jpg");

        let binding = segment_group(4, 0x101, 0, true, &body_b);
        let parsed = parse_data_group(&binding).unwrap();
        let entities = processor.process_data_group(&parsed);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].transport_id, 0x101);
        assert_eq!(entities[0].body, body_b);
    }

    #[test]
    fn old_transport_ids_are_evicted() {
        let mut processor = MotProcessor::new(2);
        for transport_id in 0..4u16 {
            let group = segment_group(4, transport_id, 0, false, &[1, 2, 3]);
            let parsed = parse_data_group(&group).unwrap();
            processor.process_data_group(&parsed);
        }
        assert!(processor.assemblers.len() <= 2);
    }
}
