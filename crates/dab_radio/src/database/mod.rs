//! Ensemble database entities accumulated from the fast information
//! channel. Fields are optional until their FIG has been observed; each
//! record knows when it is complete enough to act on.

pub mod updater;

use crate::constants::protection_profiles::{get_schedule, get_uep_table_entry, Protection};
use std::collections::BTreeMap;

pub type ServiceId = u32;
pub type SubchannelId = u8;
pub type ServiceComponentId = u8;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Ensemble {
    /// 16 bit ensemble identifier: country id in the top nibble.
    pub id: u16,
    pub extended_country_code: Option<u8>,
    pub label: Option<String>,
}

impl Ensemble {
    pub fn country_id(&self) -> u8 {
        ((self.id >> 12) & 0xF) as u8
    }

    pub fn is_complete(&self) -> bool {
        self.id != 0 && self.label.is_some()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    #[default]
    StreamAudio,
    StreamData,
    PacketData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceType {
    /// HE-AAC audio in superframes (DAB+).
    DabPlus,
    /// MPEG-1/2 layer II audio (classic DAB).
    Mp2,
    /// A data service component, with its signalled DSCTy.
    Data(u8),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Service {
    pub id: ServiceId,
    pub country_id: u8,
    pub label: Option<String>,
    pub programme_type: Option<u8>,
    pub language: Option<u8>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServiceComponent {
    pub service_id: ServiceId,
    pub component_id: ServiceComponentId,
    pub subchannel_id: Option<SubchannelId>,
    pub transport_mode: Option<TransportMode>,
    pub service_type: Option<ServiceType>,
    pub label: Option<String>,
    pub is_primary: bool,
    /// 12 bit service component identifier used by packet mode FIGs.
    pub global_id: Option<u16>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Subchannel {
    pub id: SubchannelId,
    pub start_address_cu: Option<u16>,
    pub length_cu: Option<u16>,
    pub protection: Option<Protection>,
}

impl Subchannel {
    pub fn is_complete(&self) -> bool {
        self.start_address_cu.is_some() && self.length_cu.is_some() && self.protection.is_some()
    }

    /// Bitrate implied by the protection profile, when resolvable.
    pub fn bitrate_kbps(&self) -> Option<u32> {
        let protection = self.protection?;
        match protection {
            Protection::Uep { table_index } => {
                get_uep_table_entry(table_index).map(|entry| entry.bitrate_kbps)
            }
            Protection::Eep { .. } => {
                let length = self.length_cu? as usize;
                get_schedule(protection, length).map(|schedule| schedule.bitrate_kbps)
            }
        }
    }
}

/// The accumulated view of one ensemble. Cloned wholesale when promoted
/// from staging to stable.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DabDatabase {
    pub ensemble: Ensemble,
    pub services: BTreeMap<ServiceId, Service>,
    pub service_components: BTreeMap<(ServiceId, ServiceComponentId), ServiceComponent>,
    pub subchannels: BTreeMap<SubchannelId, Subchannel>,
}

impl DabDatabase {
    pub fn get_subchannel(&self, id: SubchannelId) -> Option<&Subchannel> {
        self.subchannels.get(&id)
    }

    /// Finds the service component carried by a subchannel.
    pub fn get_service_component_by_subchannel(&self, id: SubchannelId) -> Option<&ServiceComponent> {
        self.service_components
            .values()
            .find(|component| component.subchannel_id == Some(id))
    }

    pub fn is_service_component_complete(&self, component: &ServiceComponent) -> bool {
        let Some(subchannel_id) = component.subchannel_id else {
            return false;
        };
        let subchannel_ok = self
            .get_subchannel(subchannel_id)
            .map(|subchannel| subchannel.is_complete())
            .unwrap_or(false);
        subchannel_ok && component.transport_mode.is_some() && component.service_type.is_some()
    }

    pub fn is_service_complete(&self, service: &Service) -> bool {
        if service.label.is_none() {
            return false;
        }
        self.service_components
            .values()
            .filter(|component| component.service_id == service.id)
            .any(|component| self.is_service_component_complete(component))
    }

    /// Validity invariant: subchannel allocations may not overlap.
    pub fn has_overlapping_subchannels(&self) -> bool {
        let mut ranges: Vec<(u16, u16)> = self
            .subchannels
            .values()
            .filter_map(|subchannel| {
                Some((subchannel.start_address_cu?, subchannel.length_cu?))
            })
            .collect();
        ranges.sort_unstable();
        ranges
            .windows(2)
            .any(|pair| pair[0].0 + pair[0].1 > pair[1].0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::protection_profiles::EepOption;

    fn complete_subchannel(id: SubchannelId, start: u16) -> Subchannel {
        Subchannel {
            id,
            start_address_cu: Some(start),
            length_cu: Some(54),
            protection: Some(Protection::Eep { option: EepOption::B, level: 3 }),
        }
    }

    #[test]
    fn completion_propagates_from_subchannel_to_service() {
        let mut db = DabDatabase::default();
        db.ensemble.id = 0x8ABC;
        db.ensemble.label = Some("Test Mux".to_string());
        assert!(db.ensemble.is_complete());

        db.services.insert(0x4001, Service {
            id: 0x4001,
            label: Some("Station".to_string()),
            ..Default::default()
        });
        db.service_components.insert((0x4001, 0), ServiceComponent {
            service_id: 0x4001,
            component_id: 0,
            subchannel_id: Some(3),
            transport_mode: Some(TransportMode::StreamAudio),
            service_type: Some(ServiceType::DabPlus),
            is_primary: true,
            ..Default::default()
        });

        // incomplete until the referenced subchannel is complete
        let service = db.services[&0x4001].clone();
        assert!(!db.is_service_complete(&service));

        db.subchannels.insert(3, complete_subchannel(3, 0));
        assert!(db.is_service_complete(&service));
        assert_eq!(db.subchannels[&3].bitrate_kbps(), Some(96));
    }

    #[test]
    fn overlap_detection() {
        let mut db = DabDatabase::default();
        db.subchannels.insert(1, complete_subchannel(1, 0));
        db.subchannels.insert(2, complete_subchannel(2, 54));
        assert!(!db.has_overlapping_subchannels());
        db.subchannels.insert(3, complete_subchannel(3, 40));
        assert!(db.has_overlapping_subchannels());
    }
}
