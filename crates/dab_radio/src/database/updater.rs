//! Mutation layer between the FIG parser and the staging database.
//! The parser reports observed fields; the updater folds them into the
//! staging records and keeps completion statistics that drive promotion.

use super::{
    DabDatabase, Service, ServiceComponent, ServiceComponentId, ServiceId, ServiceType, Subchannel,
    SubchannelId, TransportMode,
};
use crate::constants::protection_profiles::Protection;

/// Counts of observed and completed records. Promotion to the stable
/// database waits until these stop changing for a configured number of
/// FIC groups.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseStatistics {
    pub total_ensembles: usize,
    pub total_services: usize,
    pub total_service_components: usize,
    pub total_subchannels: usize,
    pub complete_ensembles: usize,
    pub complete_services: usize,
    pub complete_service_components: usize,
    pub complete_subchannels: usize,
}

/// Holds the staging database and applies FIG-level updates to it.
#[derive(Default)]
pub struct DatabaseUpdater {
    staging: DabDatabase,
}

impl DatabaseUpdater {
    pub fn staging(&self) -> &DabDatabase {
        &self.staging
    }

    pub fn reset(&mut self) {
        self.staging = DabDatabase::default();
    }

    /// FIG 0/0: ensemble identification.
    pub fn on_ensemble(&mut self, ensemble_id: u16) {
        if self.staging.ensemble.id != 0 && self.staging.ensemble.id != ensemble_id {
            tracing::warn!(target: "database", "ensemble id changed {:04X} -> {:04X}", self.staging.ensemble.id, ensemble_id);
        }
        self.staging.ensemble.id = ensemble_id;
    }

    /// FIG 1/0: ensemble label.
    pub fn on_ensemble_label(&mut self, label: String) {
        self.staging.ensemble.label = Some(label);
    }

    pub fn on_ensemble_ecc(&mut self, extended_country_code: u8) {
        self.staging.ensemble.extended_country_code = Some(extended_country_code);
    }

    fn service_entry(&mut self, service_id: ServiceId) -> &mut Service {
        self.staging.services.entry(service_id).or_insert_with(|| Service {
            id: service_id,
            country_id: ((service_id >> 12) & 0xF) as u8,
            ..Default::default()
        })
    }

    fn component_entry(
        &mut self,
        service_id: ServiceId,
        component_id: ServiceComponentId,
    ) -> &mut ServiceComponent {
        self.staging
            .service_components
            .entry((service_id, component_id))
            .or_insert_with(|| ServiceComponent {
                service_id,
                component_id,
                ..Default::default()
            })
    }

    fn subchannel_entry(&mut self, subchannel_id: SubchannelId) -> &mut Subchannel {
        self.staging
            .subchannels
            .entry(subchannel_id)
            .or_insert_with(|| Subchannel { id: subchannel_id, ..Default::default() })
    }

    /// FIG 0/1: subchannel organisation.
    pub fn on_subchannel(
        &mut self,
        subchannel_id: SubchannelId,
        start_address_cu: u16,
        length_cu: u16,
        protection: Protection,
    ) {
        let subchannel = self.subchannel_entry(subchannel_id);
        subchannel.start_address_cu = Some(start_address_cu);
        subchannel.length_cu = Some(length_cu);
        subchannel.protection = Some(protection);
    }

    /// FIG 0/2: audio stream component.
    pub fn on_audio_component(
        &mut self,
        service_id: ServiceId,
        component_index: ServiceComponentId,
        subchannel_id: SubchannelId,
        service_type: ServiceType,
        is_primary: bool,
    ) {
        self.service_entry(service_id);
        let component = self.component_entry(service_id, component_index);
        component.subchannel_id = Some(subchannel_id);
        component.transport_mode = Some(TransportMode::StreamAudio);
        component.service_type = Some(service_type);
        component.is_primary = is_primary;
    }

    /// FIG 0/2: data stream component.
    pub fn on_data_stream_component(
        &mut self,
        service_id: ServiceId,
        component_index: ServiceComponentId,
        subchannel_id: SubchannelId,
        data_service_type: u8,
        is_primary: bool,
    ) {
        self.service_entry(service_id);
        let component = self.component_entry(service_id, component_index);
        component.subchannel_id = Some(subchannel_id);
        component.transport_mode = Some(TransportMode::StreamData);
        component.service_type = Some(ServiceType::Data(data_service_type));
        component.is_primary = is_primary;
    }

    /// FIG 0/2: packet mode component referenced by its global SCId.
    pub fn on_packet_component(
        &mut self,
        service_id: ServiceId,
        component_index: ServiceComponentId,
        global_id: u16,
    ) {
        self.service_entry(service_id);
        let component = self.component_entry(service_id, component_index);
        component.transport_mode = Some(TransportMode::PacketData);
        component.global_id = Some(global_id);
    }

    /// FIG 0/3: packet mode service component parameters.
    pub fn on_packet_component_parameters(
        &mut self,
        global_id: u16,
        subchannel_id: SubchannelId,
        data_service_type: u8,
    ) {
        let component = self
            .staging
            .service_components
            .values_mut()
            .find(|component| component.global_id == Some(global_id));
        let Some(component) = component else {
            tracing::debug!(target: "database", "FIG 0/3 for unknown SCId {}", global_id);
            return;
        };
        component.subchannel_id = Some(subchannel_id);
        component.service_type = Some(ServiceType::Data(data_service_type));
    }

    /// FIG 0/8: binds a service's component index to a subchannel or SCId.
    pub fn on_component_global_definition(
        &mut self,
        service_id: ServiceId,
        component_index: ServiceComponentId,
        subchannel_id: Option<SubchannelId>,
        global_id: Option<u16>,
    ) {
        self.service_entry(service_id);
        let component = self.component_entry(service_id, component_index);
        if let Some(subchannel_id) = subchannel_id {
            component.subchannel_id = Some(subchannel_id);
        }
        if let Some(global_id) = global_id {
            component.global_id = Some(global_id);
        }
    }

    /// FIG 0/17: programme type.
    pub fn on_programme_type(&mut self, service_id: ServiceId, programme_type: u8) {
        self.service_entry(service_id).programme_type = Some(programme_type);
    }

    pub fn on_service_language(&mut self, service_id: ServiceId, language: u8) {
        self.service_entry(service_id).language = Some(language);
    }

    /// FIG 1/1, 1/5: service label.
    pub fn on_service_label(&mut self, service_id: ServiceId, label: String) {
        self.service_entry(service_id).label = Some(label);
    }

    /// FIG 1/4: service component label.
    pub fn on_component_label(
        &mut self,
        service_id: ServiceId,
        component_index: ServiceComponentId,
        label: String,
    ) {
        self.component_entry(service_id, component_index).label = Some(label);
    }

    /// Summarises completion progress for the promotion cool-down.
    pub fn compute_statistics(&self) -> DatabaseStatistics {
        let db = &self.staging;
        DatabaseStatistics {
            total_ensembles: usize::from(db.ensemble.id != 0),
            total_services: db.services.len(),
            total_service_components: db.service_components.len(),
            total_subchannels: db.subchannels.len(),
            complete_ensembles: usize::from(db.ensemble.is_complete()),
            complete_services: db
                .services
                .values()
                .filter(|service| db.is_service_complete(service))
                .count(),
            complete_service_components: db
                .service_components
                .values()
                .filter(|component| db.is_service_component_complete(component))
                .count(),
            complete_subchannels: db
                .subchannels
                .values()
                .filter(|subchannel| subchannel.is_complete())
                .count(),
        }
    }

    /// Structural copy of the staging database for promotion.
    pub fn snapshot(&self) -> DabDatabase {
        self.staging.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::protection_profiles::EepOption;

    #[test]
    fn statistics_track_completion() {
        let mut updater = DatabaseUpdater::default();
        updater.on_ensemble(0x8001);
        updater.on_audio_component(0x4111, 0, 2, ServiceType::DabPlus, true);

        let stats = updater.compute_statistics();
        assert_eq!(stats.total_services, 1);
        assert_eq!(stats.complete_services, 0);
        assert_eq!(stats.complete_ensembles, 0);

        updater.on_ensemble_label("Mux One".to_string());
        updater.on_service_label(0x4111, "Station One".to_string());
        updater.on_subchannel(2, 0, 72, Protection::Eep { option: EepOption::A, level: 3 });

        let stats = updater.compute_statistics();
        assert_eq!(stats.complete_ensembles, 1);
        assert_eq!(stats.complete_subchannels, 1);
        assert_eq!(stats.complete_service_components, 1);
        assert_eq!(stats.complete_services, 1);
    }

    #[test]
    fn packet_components_resolve_via_global_id() {
        let mut updater = DatabaseUpdater::default();
        updater.on_packet_component(0xE1C00098, 1, 0x123);
        updater.on_packet_component_parameters(0x123, 9, 60);
        let component = &updater.staging().service_components[&(0xE1C00098, 1)];
        assert_eq!(component.subchannel_id, Some(9));
        assert_eq!(component.service_type, Some(ServiceType::Data(60)));
    }

    #[test]
    fn snapshot_is_equal_to_staging() {
        let mut updater = DatabaseUpdater::default();
        updater.on_ensemble(0x8002);
        updater.on_ensemble_label("Mux Two".to_string());
        let snapshot = updater.snapshot();
        assert_eq!(&snapshot, updater.staging());
    }
}
