//! Per-subchannel decoding pipelines. Each active subchannel owns its MSC
//! decoder state, and audio subchannels add superframe reassembly, PAD
//! extraction and the observer fan-out for one station.

use crate::audio::superframe::{SuperFrameHeader, SuperframeProcessor};
use crate::database::{ServiceType, Subchannel, SubchannelId};
use crate::mot::slideshow::{process_mot_entity, Slideshow};
use crate::mot::MotEntity;
use crate::msc::msc_decoder::MscDecoder;
use crate::pad::pad_processor::PadProcessor;
use crate::pad::PadEvent;

const TARGET: &str = "audio-channel";

/// PCM stream parameters reported alongside decoded audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub is_stereo: bool,
    pub bytes_per_sample: usize,
}

/// Seam for the external AAC decoder library. When installed, decoded
/// PCM is fanned out through `on_audio_data`; without it the channel
/// still produces access units, labels and slideshows.
pub trait AacFrameDecoder: Send {
    /// Called whenever the superframe header changes.
    fn configure(&mut self, header: SuperFrameHeader);
    /// Decodes one access unit into interleaved signed 16 bit PCM.
    fn decode_frame(&mut self, access_unit: &[u8]) -> Option<(AudioParams, Vec<u8>)>;
}

type AccessUnitSink = Box<dyn FnMut(SuperFrameHeader, usize, usize, &[u8]) + Send>;
type AudioDataSink = Box<dyn FnMut(AudioParams, &[u8]) + Send>;
type DynamicLabelSink = Box<dyn FnMut(&str) + Send>;
type SlideshowSink = Box<dyn FnMut(&Slideshow) + Send>;
type MotEntitySink = Box<dyn FnMut(&MotEntity) + Send>;

/// DAB+ audio subchannel pipeline.
pub struct AudioChannel {
    pub subchannel_id: SubchannelId,
    msc_decoder: MscDecoder,
    superframe: SuperframeProcessor,
    pad: PadProcessor,
    aac_decoder: Option<Box<dyn AacFrameDecoder>>,
    last_header: Option<SuperFrameHeader>,
    dynamic_label: String,
    access_unit_sinks: Vec<AccessUnitSink>,
    audio_data_sinks: Vec<AudioDataSink>,
    dynamic_label_sinks: Vec<DynamicLabelSink>,
    slideshow_sinks: Vec<SlideshowSink>,
    mot_entity_sinks: Vec<MotEntitySink>,
}

impl AudioChannel {
    pub fn new(subchannel: &Subchannel) -> Option<Self> {
        let msc_decoder = MscDecoder::new(subchannel)?;
        Some(Self {
            subchannel_id: subchannel.id,
            msc_decoder,
            superframe: SuperframeProcessor::new(),
            pad: PadProcessor::default(),
            aac_decoder: None,
            last_header: None,
            dynamic_label: String::new(),
            access_unit_sinks: Vec::new(),
            audio_data_sinks: Vec::new(),
            dynamic_label_sinks: Vec::new(),
            slideshow_sinks: Vec::new(),
            mot_entity_sinks: Vec::new(),
        })
    }

    pub fn set_aac_decoder(&mut self, decoder: Box<dyn AacFrameDecoder>) {
        self.aac_decoder = Some(decoder);
    }

    /// Raw validated access units: (header, au_index, total_aus, data).
    pub fn on_access_unit(&mut self, sink: impl FnMut(SuperFrameHeader, usize, usize, &[u8]) + Send + 'static) {
        self.access_unit_sinks.push(Box::new(sink));
    }

    /// Decoded PCM from the installed AAC decoder.
    pub fn on_audio_data(&mut self, sink: impl FnMut(AudioParams, &[u8]) + Send + 'static) {
        self.audio_data_sinks.push(Box::new(sink));
    }

    pub fn on_dynamic_label(&mut self, sink: impl FnMut(&str) + Send + 'static) {
        self.dynamic_label_sinks.push(Box::new(sink));
    }

    pub fn on_slideshow(&mut self, sink: impl FnMut(&Slideshow) + Send + 'static) {
        self.slideshow_sinks.push(Box::new(sink));
    }

    /// MOT objects that are not slideshows.
    pub fn on_mot_entity(&mut self, sink: impl FnMut(&MotEntity) + Send + 'static) {
        self.mot_entity_sinks.push(Box::new(sink));
    }

    pub fn dynamic_label(&self) -> &str {
        &self.dynamic_label
    }

    pub fn superframe_header(&self) -> Option<SuperFrameHeader> {
        self.last_header
    }

    /// Decodes this channel's share of one frame's MSC soft bits.
    pub fn process(&mut self, msc_bits: &[i8], nb_cifs: usize, nb_bits_per_cif: usize) {
        assert!(msc_bits.len() == nb_cifs * nb_bits_per_cif);
        for cif_index in 0..nb_cifs {
            let cif = &msc_bits[cif_index * nb_bits_per_cif..(cif_index + 1) * nb_bits_per_cif];
            let Some(frame_bytes) = self.msc_decoder.decode_cif(cif) else {
                // deinterleaver is still priming
                continue;
            };
            let frame_bytes = frame_bytes.to_vec();

            let Some(output) = self.superframe.process_frame(&frame_bytes) else {
                continue;
            };
            let header = output.header;
            if self.last_header != Some(header) {
                tracing::info!(
                    target: TARGET,
                    "subchannel {}: audio configuration {}Hz stereo={} sbr={} ps={}",
                    self.subchannel_id, header.sampling_rate, header.is_stereo, header.sbr_flag, header.ps_flag,
                );
                if let Some(decoder) = self.aac_decoder.as_mut() {
                    decoder.configure(header);
                }
                self.last_header = Some(header);
            }

            // collect owned copies so PAD processing can run after the
            // superframe borrow ends
            let access_units: Vec<(usize, usize, Vec<u8>)> = output
                .access_units
                .iter()
                .map(|au| (au.index, au.total, au.data.to_vec()))
                .collect();

            for (index, total, data) in &access_units {
                for sink in &mut self.access_unit_sinks {
                    sink(header, *index, *total, data);
                }
                if let Some(decoder) = self.aac_decoder.as_mut() {
                    if let Some((params, pcm)) = decoder.decode_frame(data) {
                        for sink in &mut self.audio_data_sinks {
                            sink(params, &pcm);
                        }
                    }
                }
                for event in self.pad.process_access_unit(data) {
                    match event {
                        PadEvent::DynamicLabel { text, .. } => {
                            self.dynamic_label = text;
                            for sink in &mut self.dynamic_label_sinks {
                                sink(&self.dynamic_label);
                            }
                        }
                        PadEvent::DynamicLabelClear => {
                            self.dynamic_label.clear();
                            for sink in &mut self.dynamic_label_sinks {
                                sink(&self.dynamic_label);
                            }
                        }
                        PadEvent::MotEntity(entity) => match process_mot_entity(&entity) {
                            Some(slideshow) => {
                                for sink in &mut self.slideshow_sinks {
                                    sink(&slideshow);
                                }
                            }
                            None => {
                                for sink in &mut self.mot_entity_sinks {
                                    sink(&entity);
                                }
                            }
                        },
                    }
                }
            }
        }
    }
}

type DataFrameSink = Box<dyn FnMut(&[u8]) + Send>;

/// Stream-mode data subchannel: decoded logical frames are handed to the
/// subscriber without further interpretation.
pub struct DataChannel {
    pub subchannel_id: SubchannelId,
    msc_decoder: MscDecoder,
    data_sinks: Vec<DataFrameSink>,
}

impl DataChannel {
    pub fn new(subchannel: &Subchannel) -> Option<Self> {
        Some(Self {
            subchannel_id: subchannel.id,
            msc_decoder: MscDecoder::new(subchannel)?,
            data_sinks: Vec::new(),
        })
    }

    pub fn on_data_frame(&mut self, sink: impl FnMut(&[u8]) + Send + 'static) {
        self.data_sinks.push(Box::new(sink));
    }

    pub fn process(&mut self, msc_bits: &[i8], nb_cifs: usize, nb_bits_per_cif: usize) {
        for cif_index in 0..nb_cifs {
            let cif = &msc_bits[cif_index * nb_bits_per_cif..(cif_index + 1) * nb_bits_per_cif];
            if let Some(frame_bytes) = self.msc_decoder.decode_cif(cif) {
                let frame_bytes = frame_bytes.to_vec();
                for sink in &mut self.data_sinks {
                    sink(&frame_bytes);
                }
            }
        }
    }
}

/// The channel kinds a subchannel can be bound to.
pub enum Channel {
    DabPlusAudio(AudioChannel),
    StreamData(DataChannel),
}

impl Channel {
    /// Builds the channel kind matching a service component's type.
    pub fn create(subchannel: &Subchannel, service_type: ServiceType) -> Option<Self> {
        match service_type {
            ServiceType::DabPlus => AudioChannel::new(subchannel).map(Self::DabPlusAudio),
            ServiceType::Mp2 => {
                // classic DAB audio needs an MP2 decoder we do not carry
                tracing::info!(target: TARGET, "subchannel {} is MP2 audio; not decoded", subchannel.id);
                None
            }
            ServiceType::Data(_) => DataChannel::new(subchannel).map(Self::StreamData),
        }
    }

    pub fn subchannel_id(&self) -> SubchannelId {
        match self {
            Self::DabPlusAudio(channel) => channel.subchannel_id,
            Self::StreamData(channel) => channel.subchannel_id,
        }
    }

    pub fn process(&mut self, msc_bits: &[i8], nb_cifs: usize, nb_bits_per_cif: usize) {
        match self {
            Self::DabPlusAudio(channel) => channel.process(msc_bits, nb_cifs, nb_bits_per_cif),
            Self::StreamData(channel) => channel.process(msc_bits, nb_cifs, nb_bits_per_cif),
        }
    }
}
