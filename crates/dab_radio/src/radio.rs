//! The radio decoder: drives the FIC chain and the per-subchannel MSC
//! decoders over each demodulated frame, and owns the staging and stable
//! ensemble databases.

use crate::audio_channel::{AudioChannel, Channel};
use crate::dab_radio_parameters::{get_dab_radio_parameters, DabRadioParameters};
use crate::database::updater::{DatabaseStatistics, DatabaseUpdater};
use crate::database::{DabDatabase, SubchannelId, TransportMode};
use crate::fic::fic_decoder::FicDecoder;
use crate::fic::fig_processor::FigProcessor;
use crate::misc_info::DabMiscInfo;
use dab_core::dab_transmission_modes::DabTransmissionMode;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

const TARGET: &str = "basic-radio";

#[derive(Debug, Error)]
pub enum RadioConfigError {
    #[error("failed to build radio worker pool: {0}")]
    ThreadPool(String),
    #[error("cooldown of 0 groups would promote incomplete databases")]
    ZeroCooldown,
}

#[derive(Debug, Clone)]
pub struct BasicRadioSettings {
    /// Worker threads for per-subchannel MSC decode. 0 selects the
    /// available hardware parallelism.
    pub total_threads: usize,
    /// Number of consecutive unchanged FIC groups before the staging
    /// database is promoted.
    pub nb_cooldown_max: u32,
}

impl Default for BasicRadioSettings {
    fn default() -> Self {
        Self {
            total_threads: 0,
            nb_cooldown_max: 10,
        }
    }
}

type ChannelCreateSink = Box<dyn FnMut(SubchannelId, &mut AudioChannel) + Send>;
type DatabaseUpdateSink = Box<dyn FnMut(&DabDatabase) + Send>;

pub struct BasicRadio {
    params: DabRadioParameters,
    settings: BasicRadioSettings,
    fic_decoder: FicDecoder,
    fig_processor: FigProcessor,
    updater: DatabaseUpdater,
    pub misc_info: DabMiscInfo,
    stable_database: Arc<Mutex<DabDatabase>>,
    channels: BTreeMap<SubchannelId, Channel>,
    pool: rayon::ThreadPool,
    // promotion cool-down state
    previous_statistics: DatabaseStatistics,
    is_awaiting_update: bool,
    nb_cooldown: u32,
    channel_create_sinks: Vec<ChannelCreateSink>,
    database_update_sinks: Vec<DatabaseUpdateSink>,
}

impl BasicRadio {
    pub fn new(
        transmission_mode: DabTransmissionMode,
        settings: BasicRadioSettings,
    ) -> Result<Self, RadioConfigError> {
        if settings.nb_cooldown_max == 0 {
            return Err(RadioConfigError::ZeroCooldown);
        }
        let params = get_dab_radio_parameters(transmission_mode);
        let total_threads = match settings.total_threads {
            0 => std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            n => n,
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(total_threads)
            .build()
            .map_err(|err| RadioConfigError::ThreadPool(err.to_string()))?;

        let nb_fibs_per_group = params.nb_fibs_in_fic / params.nb_cifs_in_msc;
        Ok(Self {
            fic_decoder: FicDecoder::new(params.nb_bits_per_fib_group, nb_fibs_per_group),
            fig_processor: FigProcessor::default(),
            updater: DatabaseUpdater::default(),
            misc_info: DabMiscInfo::default(),
            stable_database: Arc::new(Mutex::new(DabDatabase::default())),
            channels: BTreeMap::new(),
            pool,
            previous_statistics: DatabaseStatistics::default(),
            is_awaiting_update: false,
            nb_cooldown: 0,
            channel_create_sinks: Vec::new(),
            database_update_sinks: Vec::new(),
            params,
            settings,
        })
    }

    pub fn params(&self) -> &DabRadioParameters {
        &self.params
    }

    /// Shared handle to the stable database. Readers take the lock
    /// briefly; the radio takes it only during promotion.
    pub fn database(&self) -> Arc<Mutex<DabDatabase>> {
        self.stable_database.clone()
    }

    /// Invoked once per newly sighted DAB+ audio subchannel so observers
    /// can install handlers before any event fires.
    pub fn on_audio_channel_create(
        &mut self,
        sink: impl FnMut(SubchannelId, &mut AudioChannel) + Send + 'static,
    ) {
        self.channel_create_sinks.push(Box::new(sink));
    }

    /// Invoked after every promotion of the stable database.
    pub fn on_database_update(&mut self, sink: impl FnMut(&DabDatabase) + Send + 'static) {
        self.database_update_sinks.push(Box::new(sink));
    }

    pub fn get_audio_channel(&mut self, id: SubchannelId) -> Option<&mut AudioChannel> {
        match self.channels.get_mut(&id) {
            Some(Channel::DabPlusAudio(channel)) => Some(channel),
            _ => None,
        }
    }

    /// Decodes one demodulated OFDM frame worth of soft bits.
    pub fn process(&mut self, frame_bits: &[i8]) {
        assert!(
            frame_bits.len() == self.params.nb_bits_per_frame,
            "expected {} soft bits per frame but got {}",
            self.params.nb_bits_per_frame,
            frame_bits.len(),
        );
        let (fic_bits, msc_bits) = frame_bits.split_at(self.params.nb_bits_in_fic);

        // FIC first: the database step below depends on it
        let nb_groups = self.params.nb_cifs_in_msc;
        let nb_group_bits = self.params.nb_bits_per_fib_group;
        for group_index in 0..nb_groups {
            let group = &fic_bits[group_index * nb_group_bits..(group_index + 1) * nb_group_bits];
            let fic_decoder = &mut self.fic_decoder;
            let fig_processor = &mut self.fig_processor;
            let updater = &mut self.updater;
            let misc_info = &mut self.misc_info;
            for fib in fic_decoder.decode_fib_group(group) {
                fig_processor.process_fib(fib, updater, misc_info);
            }
        }

        // fan the MSC out over the worker pool; each channel owns its
        // state for the duration of the frame
        let nb_cifs = self.params.nb_cifs_in_msc;
        let nb_bits_per_cif = self.params.nb_bits_per_cif;
        let channels = &mut self.channels;
        self.pool.install(|| {
            channels.par_iter_mut().for_each(|(_, channel)| {
                channel.process(msc_bits, nb_cifs, nb_bits_per_cif);
            });
        });

        self.update_database();
    }

    /// Promotes the staging database once its completion statistics have
    /// been stable for the configured number of FIC groups.
    fn update_database(&mut self) {
        let statistics = self.updater.compute_statistics();
        let is_changed = statistics != self.previous_statistics;
        self.previous_statistics = statistics;

        if is_changed {
            self.is_awaiting_update = true;
            self.nb_cooldown = 0;
            return;
        }
        if self.is_awaiting_update {
            self.nb_cooldown += 1;
            tracing::debug!(target: TARGET, "cooldown={}/{}", self.nb_cooldown, self.settings.nb_cooldown_max);
        }
        if self.nb_cooldown != self.settings.nb_cooldown_max {
            return;
        }
        self.is_awaiting_update = false;
        self.nb_cooldown = 0;

        tracing::info!(
            target: TARGET,
            "promoting database: {} services ({} complete), {} subchannels",
            statistics.total_services, statistics.complete_services, statistics.total_subchannels,
        );
        let snapshot = self.updater.snapshot();
        if snapshot.has_overlapping_subchannels() {
            tracing::warn!(target: TARGET, "promoted ensemble has overlapping subchannel allocations");
        }
        {
            let mut stable = self.stable_database.lock().unwrap();
            *stable = snapshot.clone();
        }
        for sink in &mut self.database_update_sinks {
            sink(&snapshot);
        }
        self.create_channels(&snapshot);
    }

    /// Creates decoder state for every complete service component whose
    /// subchannel has not been sighted before.
    fn create_channels(&mut self, database: &DabDatabase) {
        for component in database.service_components.values() {
            if !database.is_service_component_complete(component) {
                continue;
            }
            // packet mode reassembly is not carried; stream components only
            if component.transport_mode == Some(TransportMode::PacketData) {
                continue;
            }
            let (Some(subchannel_id), Some(service_type)) = (component.subchannel_id, component.service_type) else {
                continue;
            };
            if self.channels.contains_key(&subchannel_id) {
                continue;
            }
            let Some(subchannel) = database.get_subchannel(subchannel_id) else {
                continue;
            };
            let Some(mut channel) = Channel::create(subchannel, service_type) else {
                continue;
            };
            tracing::info!(target: TARGET, "created channel for subchannel {}", subchannel_id);
            if let Channel::DabPlusAudio(ref mut audio_channel) = channel {
                for sink in &mut self.channel_create_sinks {
                    sink(subchannel_id, audio_channel);
                }
            }
            self.channels.insert(subchannel_id, channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::crc::CRC16_CCITT_INVERTED;
    use crate::constants::protection_profiles::Protection;

    fn make_fib(figs: &[Vec<u8>]) -> [u8; 32] {
        let mut fib = [0xFFu8; 32];
        let mut position = 0usize;
        for fig in figs {
            fib[position..position + fig.len()].copy_from_slice(fig);
            position += fig.len();
        }
        let crc = CRC16_CCITT_INVERTED.process(&fib[..30]);
        fib[30..].copy_from_slice(&crc.to_be_bytes());
        fib
    }

    fn fig(fig_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![(fig_type << 5) | payload.len() as u8];
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn database_promotes_after_cooldown() {
        let settings = BasicRadioSettings { total_threads: 1, nb_cooldown_max: 3 };
        let mut radio = BasicRadio::new(DabTransmissionMode::I, settings).unwrap();

        let updates = Arc::new(Mutex::new(Vec::new()));
        radio.on_database_update({
            let updates = updates.clone();
            move |db: &DabDatabase| updates.lock().unwrap().push(db.clone())
        });

        // feed FIGs directly; the FIC path is exercised elsewhere
        let fib = make_fib(&[
            fig(0, &[0x00, 0xAB, 0xCD, 0x00, 0x00]),
            {
                let mut label = vec![0b0000_0_000, 0xAB, 0xCD];
                label.extend_from_slice(b"Ensemble One    ");
                label.extend_from_slice(&[0, 0]);
                fig(1, &label)
            },
        ]);
        radio.fig_processor.process_fib(&fib, &mut radio.updater, &mut radio.misc_info);

        // frame 1 records the change; promotion fires after 3 more
        // identical summaries
        for _ in 0..3 {
            radio.update_database();
            assert!(updates.lock().unwrap().is_empty());
        }
        radio.update_database();
        let updates = updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].ensemble.id, 0xABCD);
        assert_eq!(updates[0].ensemble.label.as_deref(), Some("Ensemble One"));
        let stable = radio.database();
        assert_eq!(stable.lock().unwrap().ensemble.id, 0xABCD);
    }

    #[test]
    fn channels_are_created_for_complete_dab_plus_components() {
        let settings = BasicRadioSettings { total_threads: 1, nb_cooldown_max: 1 };
        let mut radio = BasicRadio::new(DabTransmissionMode::I, settings).unwrap();

        let created = Arc::new(Mutex::new(Vec::new()));
        radio.on_audio_channel_create({
            let created = created.clone();
            move |id, _channel: &mut AudioChannel| created.lock().unwrap().push(id)
        });

        radio.updater.on_ensemble(0x8111);
        radio.updater.on_ensemble_label("Mux".to_string());
        radio.updater.on_service_label(0x4242, "Station".to_string());
        radio.updater.on_audio_component(0x4242, 0, 11, crate::database::ServiceType::DabPlus, true);
        radio.updater.on_subchannel(11, 0, 54, Protection::Eep {
            option: crate::constants::protection_profiles::EepOption::B,
            level: 3,
        });

        radio.update_database(); // change seen
        radio.update_database(); // cooldown reached, promote + create
        assert_eq!(created.lock().unwrap().as_slice(), &[11]);
        assert!(radio.get_audio_channel(11).is_some());
        // a second promotion must not recreate the channel
        radio.update_database();
        assert_eq!(created.lock().unwrap().len(), 1);
    }
}
