//! Splits validated FIBs into FIGs and folds their contents into the
//! staging database.
//!
//! DOC: ETSI EN 300 401
//! Clause 5.2.2 - Fast Information Group
//! Clauses 6.x/8.x - FIG type 0 extensions, clause 8.1.13+ - labels

use crate::constants::charsets::convert_charset_to_utf8;
use crate::constants::protection_profiles::{EepOption, Protection};
use crate::database::updater::DatabaseUpdater;
use crate::database::{ServiceId, ServiceType};
use crate::misc_info::{convert_mjd_to_ymd, DabDateTime, DabMiscInfo};

const TARGET: &str = "fig-processor";

#[derive(Debug, Default, Clone, Copy)]
pub struct FigCounters {
    pub total_figs: u64,
    pub total_malformed: u64,
    pub total_unsupported: u64,
}

/// Stateless FIG interpreter; parsing results go straight to the updater
/// and the miscellaneous info block passed into each call.
#[derive(Default)]
pub struct FigProcessor {
    pub counters: FigCounters,
}

/// Big-endian bit cursor over a FIG payload.
struct BitReader<'a> {
    buf: &'a [u8],
    bit_index: usize,
}

impl<'a> BitReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, bit_index: 0 }
    }

    fn remaining_bits(&self) -> usize {
        self.buf.len() * 8 - self.bit_index
    }

    fn byte_position(&self) -> usize {
        self.bit_index.div_ceil(8)
    }

    fn read(&mut self, nb_bits: usize) -> Option<u32> {
        assert!(nb_bits <= 32);
        if self.remaining_bits() < nb_bits {
            return None;
        }
        let mut value = 0u32;
        for _ in 0..nb_bits {
            let byte = self.buf[self.bit_index / 8];
            let bit = (byte >> (7 - self.bit_index % 8)) & 1;
            value = (value << 1) | u32::from(bit);
            self.bit_index += 1;
        }
        Some(value)
    }
}

impl FigProcessor {
    /// Processes one FIB worth of FIGs. The FIB must already have passed
    /// its CRC check; the trailing 2 CRC bytes are ignored here.
    pub fn process_fib(
        &mut self,
        fib: &[u8],
        updater: &mut DatabaseUpdater,
        misc_info: &mut DabMiscInfo,
    ) {
        let data = &fib[..fib.len().saturating_sub(2)];
        let mut position = 0usize;
        while position < data.len() {
            let header = data[position];
            // the end marker fills the remainder of the FIB
            if header == 0xFF {
                break;
            }
            let fig_type = header >> 5;
            let fig_length = (header & 0b11111) as usize;
            if fig_length == 0 {
                break;
            }
            position += 1;
            let Some(payload) = data.get(position..position + fig_length) else {
                tracing::warn!(target: TARGET, "FIG type {} overruns its FIB ({} > {})", fig_type, position + fig_length, data.len());
                self.counters.total_malformed += 1;
                break;
            };
            self.counters.total_figs += 1;
            match fig_type {
                0 => self.process_fig_0(payload, updater, misc_info),
                1 => self.process_fig_1(payload, updater),
                2 | 5 | 6 | 7 => {
                    tracing::trace!(target: TARGET, "skipping FIG type {}", fig_type);
                    self.counters.total_unsupported += 1;
                }
                fig_type => {
                    tracing::debug!(target: TARGET, "unknown FIG type {}", fig_type);
                    self.counters.total_unsupported += 1;
                }
            }
            position += fig_length;
        }
    }

    fn process_fig_0(&mut self, payload: &[u8], updater: &mut DatabaseUpdater, misc_info: &mut DabMiscInfo) {
        let mut reader = BitReader::new(payload);
        let Some(header) = reader.read(8) else {
            self.counters.total_malformed += 1;
            return;
        };
        let _cn_flag = (header >> 7) & 1;
        let oe_flag = (header >> 6) & 1;
        let pd_flag = ((header >> 5) & 1) != 0;
        let extension = (header & 0b11111) as u8;

        if oe_flag != 0 {
            // other-ensemble information is only noted, never merged
            tracing::trace!(target: TARGET, "skipping OE FIG 0/{}", extension);
            return;
        }

        let ok = match extension {
            0 => self.parse_ensemble_information(&mut reader, updater, misc_info),
            1 => self.parse_subchannel_organisation(&mut reader, updater),
            2 => self.parse_basic_service_organisation(&mut reader, pd_flag, updater),
            3 => self.parse_packet_component(&mut reader, updater),
            4 => {
                tracing::trace!(target: TARGET, "FIG 0/4 (component with CA) ignored");
                true
            }
            8 => self.parse_component_global_definition(&mut reader, pd_flag, updater),
            10 => self.parse_date_and_time(&mut reader, misc_info),
            13 => self.parse_user_application_information(&mut reader, pd_flag),
            17 => self.parse_programme_type(&mut reader, updater),
            21 | 24 => {
                // frequency information / OE services: cross-references only
                tracing::trace!(target: TARGET, "FIG 0/{} cross-reference skipped", extension);
                self.counters.total_unsupported += 1;
                true
            }
            extension => {
                tracing::trace!(target: TARGET, "unsupported FIG 0/{}", extension);
                self.counters.total_unsupported += 1;
                true
            }
        };
        if !ok {
            tracing::warn!(target: TARGET, "malformed FIG 0/{}", extension);
            self.counters.total_malformed += 1;
        }
    }

    /// FIG 0/0 - Ensemble information (clause 6.4)
    fn parse_ensemble_information(
        &mut self,
        reader: &mut BitReader,
        updater: &mut DatabaseUpdater,
        misc_info: &mut DabMiscInfo,
    ) -> bool {
        let Some(ensemble_id) = reader.read(16) else { return false };
        let Some(_change_flags) = reader.read(2) else { return false };
        let Some(_alarm_flag) = reader.read(1) else { return false };
        let Some(cif_count_hi) = reader.read(5) else { return false };
        let Some(cif_count_lo) = reader.read(8) else { return false };
        updater.on_ensemble(ensemble_id as u16);
        misc_info.cif_counter = Some((cif_count_hi * 250 + cif_count_lo) as u16);
        true
    }

    /// FIG 0/1 - Sub-channel organisation (clause 6.2.1)
    fn parse_subchannel_organisation(&mut self, reader: &mut BitReader, updater: &mut DatabaseUpdater) -> bool {
        while reader.remaining_bits() >= 24 {
            let subchannel_id = reader.read(6).unwrap() as u8;
            let start_address = reader.read(10).unwrap() as u16;
            let is_long_form = reader.read(1).unwrap() != 0;
            if is_long_form {
                let Some(option) = reader.read(3) else { return false };
                let Some(protection_level) = reader.read(2) else { return false };
                let Some(subchannel_size) = reader.read(10) else { return false };
                let option = match option {
                    0b000 => EepOption::A,
                    0b001 => EepOption::B,
                    option => {
                        tracing::warn!(target: TARGET, "unknown EEP option {:03b}", option);
                        return false;
                    }
                };
                updater.on_subchannel(
                    subchannel_id,
                    start_address,
                    subchannel_size as u16,
                    Protection::Eep { option, level: protection_level as u8 + 1 },
                );
            } else {
                let Some(_table_switch) = reader.read(1) else { return false };
                let Some(table_index) = reader.read(6) else { return false };
                let table_index = table_index as u8;
                let Some(entry) = crate::constants::protection_profiles::get_uep_table_entry(table_index) else {
                    tracing::warn!(target: TARGET, "UEP table index {} out of range", table_index);
                    return false;
                };
                updater.on_subchannel(
                    subchannel_id,
                    start_address,
                    entry.subchannel_size_cu as u16,
                    Protection::Uep { table_index },
                );
            }
        }
        true
    }

    /// FIG 0/2 - Basic service and service component definition (clause 6.3.1)
    fn parse_basic_service_organisation(
        &mut self,
        reader: &mut BitReader,
        pd_flag: bool,
        updater: &mut DatabaseUpdater,
    ) -> bool {
        let sid_bits = if pd_flag { 32 } else { 16 };
        while reader.remaining_bits() >= sid_bits + 8 {
            let service_id = reader.read(sid_bits).unwrap() as ServiceId;
            let Some(_local_flag) = reader.read(1) else { return false };
            let Some(_ca_id) = reader.read(3) else { return false };
            let Some(nb_components) = reader.read(4) else { return false };

            for component_index in 0..nb_components {
                let Some(tm_id) = reader.read(2) else { return false };
                match tm_id {
                    // MSC stream audio
                    0b00 => {
                        let Some(audio_service_type) = reader.read(6) else { return false };
                        let Some(subchannel_id) = reader.read(6) else { return false };
                        let Some(is_primary) = reader.read(1) else { return false };
                        let Some(_ca_flag) = reader.read(1) else { return false };
                        // DOC: ETSI TS 101 756, table 2a: ASCTy
                        let service_type = match audio_service_type {
                            0 => Some(ServiceType::Mp2),
                            63 => Some(ServiceType::DabPlus),
                            ascty => {
                                tracing::debug!(target: TARGET, "unknown ASCTy {}", ascty);
                                None
                            }
                        };
                        if let Some(service_type) = service_type {
                            updater.on_audio_component(
                                service_id,
                                component_index as u8,
                                subchannel_id as u8,
                                service_type,
                                is_primary != 0,
                            );
                        }
                    }
                    // MSC stream data
                    0b01 => {
                        let Some(data_service_type) = reader.read(6) else { return false };
                        let Some(subchannel_id) = reader.read(6) else { return false };
                        let Some(is_primary) = reader.read(1) else { return false };
                        let Some(_ca_flag) = reader.read(1) else { return false };
                        updater.on_data_stream_component(
                            service_id,
                            component_index as u8,
                            subchannel_id as u8,
                            data_service_type as u8,
                            is_primary != 0,
                        );
                    }
                    // MSC packet data, referenced by SCId
                    0b11 => {
                        let Some(global_id) = reader.read(12) else { return false };
                        let Some(_rfa) = reader.read(1) else { return false };
                        let Some(_ca_flag) = reader.read(1) else { return false };
                        updater.on_packet_component(service_id, component_index as u8, global_id as u16);
                    }
                    // FIDC is deprecated
                    _ => {
                        let Some(_skip) = reader.read(14) else { return false };
                        tracing::trace!(target: TARGET, "skipping FIDC component");
                    }
                }
            }
        }
        true
    }

    /// FIG 0/3 - Service component in packet mode (clause 6.3.2)
    fn parse_packet_component(&mut self, reader: &mut BitReader, updater: &mut DatabaseUpdater) -> bool {
        while reader.remaining_bits() >= 40 {
            let global_id = reader.read(12).unwrap() as u16;
            let Some(_rfa) = reader.read(3) else { return false };
            let Some(ca_org_flag) = reader.read(1) else { return false };
            let Some(_dg_flag) = reader.read(1) else { return false };
            let Some(_rfu) = reader.read(1) else { return false };
            let Some(data_service_type) = reader.read(6) else { return false };
            let Some(subchannel_id) = reader.read(6) else { return false };
            let Some(_packet_address) = reader.read(10) else { return false };
            if ca_org_flag != 0 {
                let Some(_ca_org) = reader.read(16) else { return false };
            }
            updater.on_packet_component_parameters(global_id, subchannel_id as u8, data_service_type as u8);
        }
        true
    }

    /// FIG 0/8 - Service component global definition (clause 6.3.5)
    fn parse_component_global_definition(
        &mut self,
        reader: &mut BitReader,
        pd_flag: bool,
        updater: &mut DatabaseUpdater,
    ) -> bool {
        let sid_bits = if pd_flag { 32 } else { 16 };
        while reader.remaining_bits() >= sid_bits + 16 {
            let service_id = reader.read(sid_bits).unwrap() as ServiceId;
            let Some(ext_flag) = reader.read(1) else { return false };
            let Some(_rfa) = reader.read(3) else { return false };
            let Some(component_index) = reader.read(4) else { return false };
            let Some(ls_flag) = reader.read(1) else { return false };
            let (subchannel_id, global_id) = if ls_flag != 0 {
                let Some(_rfa) = reader.read(3) else { return false };
                let Some(global_id) = reader.read(12) else { return false };
                (None, Some(global_id as u16))
            } else {
                let Some(msc_fic_flag) = reader.read(1) else { return false };
                let Some(subchannel_id) = reader.read(6) else { return false };
                if msc_fic_flag != 0 {
                    // FIDC identities are deprecated
                    (None, None)
                } else {
                    (Some(subchannel_id as u8), None)
                }
            };
            if ext_flag != 0 {
                let Some(_rfa) = reader.read(8) else { return false };
            }
            updater.on_component_global_definition(service_id, component_index as u8, subchannel_id, global_id);
        }
        true
    }

    /// FIG 0/10 - Date and time (clause 8.1.3.1)
    fn parse_date_and_time(&mut self, reader: &mut BitReader, misc_info: &mut DabMiscInfo) -> bool {
        let Some(_rfu) = reader.read(1) else { return false };
        let Some(mjd) = reader.read(17) else { return false };
        let Some(_lsi) = reader.read(1) else { return false };
        let Some(_conf_ind) = reader.read(1) else { return false };
        let Some(utc_flag) = reader.read(1) else { return false };
        let Some(hours) = reader.read(5) else { return false };
        let Some(minutes) = reader.read(6) else { return false };
        let (seconds, milliseconds) = if utc_flag != 0 {
            let Some(seconds) = reader.read(6) else { return false };
            let Some(milliseconds) = reader.read(10) else { return false };
            (seconds as u8, milliseconds as u16)
        } else {
            (0, 0)
        };
        let (year, month, day) = convert_mjd_to_ymd(mjd);
        misc_info.datetime = Some(DabDateTime {
            year,
            month,
            day,
            hours: hours as u8,
            minutes: minutes as u8,
            seconds,
            milliseconds,
        });
        true
    }

    /// FIG 0/13 - User application information (clause 6.3.6)
    fn parse_user_application_information(&mut self, reader: &mut BitReader, pd_flag: bool) -> bool {
        let sid_bits = if pd_flag { 32 } else { 16 };
        let Some(service_id) = reader.read(sid_bits) else { return false };
        let Some(_component_index) = reader.read(4) else { return false };
        let Some(nb_user_apps) = reader.read(4) else { return false };
        for _ in 0..nb_user_apps {
            let Some(user_app_type) = reader.read(11) else { return false };
            let Some(nb_data_bytes) = reader.read(5) else { return false };
            for _ in 0..nb_data_bytes {
                let Some(_data) = reader.read(8) else { return false };
            }
            tracing::trace!(
                target: TARGET,
                "service {:08X} announces user application {}", service_id, user_app_type,
            );
        }
        true
    }

    /// FIG 0/17 - Programme type (clause 8.1.5)
    fn parse_programme_type(&mut self, reader: &mut BitReader, updater: &mut DatabaseUpdater) -> bool {
        while reader.remaining_bits() >= 32 {
            let service_id = reader.read(16).unwrap() as ServiceId;
            let Some(_sd_flag) = reader.read(1) else { return false };
            let Some(_ps_flag) = reader.read(1) else { return false };
            let Some(language_flag) = reader.read(1) else { return false };
            let Some(cc_flag) = reader.read(1) else { return false };
            let Some(_rfa) = reader.read(4) else { return false };
            if language_flag != 0 {
                let Some(language) = reader.read(8) else { return false };
                updater.on_service_language(service_id, language as u8);
            }
            let Some(_rfa2) = reader.read(3) else { return false };
            let Some(international_code) = reader.read(5) else { return false };
            if cc_flag != 0 {
                let Some(_complementary) = reader.read(8) else { return false };
            }
            updater.on_programme_type(service_id, international_code as u8);
        }
        true
    }

    fn process_fig_1(&mut self, payload: &[u8], updater: &mut DatabaseUpdater) {
        let mut reader = BitReader::new(payload);
        let Some(header) = reader.read(8) else {
            self.counters.total_malformed += 1;
            return;
        };
        let charset = (header >> 4) as u8;
        let _oe_flag = (header >> 3) & 1;
        let extension = (header & 0b111) as u8;

        let label_for = |reader: &mut BitReader, payload: &[u8]| -> Option<String> {
            // 16 label bytes then a 16 bit abbreviation mask
            let start = reader.byte_position();
            let label_bytes = payload.get(start..start + 16)?;
            let label = convert_charset_to_utf8(label_bytes, charset);
            Some(label.trim_end().to_string())
        };

        let ok = match extension {
            // ensemble label
            0 => (|| {
                let _ensemble_id = reader.read(16)?;
                let label = label_for(&mut reader, payload)?;
                updater.on_ensemble_label(label);
                Some(())
            })()
            .is_some(),
            // programme service label
            1 => (|| {
                let service_id = reader.read(16)?;
                let label = label_for(&mut reader, payload)?;
                updater.on_service_label(service_id as ServiceId, label);
                Some(())
            })()
            .is_some(),
            // service component label
            4 => (|| {
                let pd_flag = reader.read(1)? != 0;
                let _rfa = reader.read(3)?;
                let component_index = reader.read(4)?;
                let sid_bits = if pd_flag { 32 } else { 16 };
                let service_id = reader.read(sid_bits)?;
                let label = label_for(&mut reader, payload)?;
                updater.on_component_label(service_id as ServiceId, component_index as u8, label);
                Some(())
            })()
            .is_some(),
            // data service label
            5 => (|| {
                let service_id = reader.read(32)?;
                let label = label_for(&mut reader, payload)?;
                updater.on_service_label(service_id as ServiceId, label);
                Some(())
            })()
            .is_some(),
            extension => {
                tracing::trace!(target: TARGET, "unsupported FIG 1/{}", extension);
                self.counters.total_unsupported += 1;
                true
            }
        };
        if !ok {
            tracing::warn!(target: TARGET, "malformed FIG 1/{}", extension);
            self.counters.total_malformed += 1;
        }
    }
}
