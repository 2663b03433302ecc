//! Full DAB receiver: raw IQ in, decoded ensemble out.
//!
//! Runs the producer/demodulator/decoder pipeline over a capture or live
//! stream and logs the ensemble database, dynamic labels and slideshows
//! as they decode. Audio access units are surfaced to observers; PCM
//! output requires an external AAC decoder wired through the
//! `AacFrameDecoder` trait.

use clap::Parser;
use dab_core::dab_transmission_modes::DabTransmissionMode;
use dab_ofdm::dab_ofdm_demodulator::create_dab_ofdm_demodulator;
use dab_pipeline::pipeline::{PipelineSettings, RadioPipeline, SampleFormat};
use dab_radio::database::DabDatabase;
use dab_radio::radio::{BasicRadio, BasicRadioSettings};
use ofdm::ofdm_demodulator::OfdmDemodulatorSettings;
use std::io::Read;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// DAB transmission mode. Valid modes are [1,2,3,4]
    #[arg(short, long, default_value_t = 1)]
    mode: u32,
    /// Input filepath; stdin when omitted
    #[arg(short, long)]
    input: Option<String>,
    /// Number of complex samples to read per chunk
    #[arg(short = 'b', long, default_value_t = 65536)]
    block_size: usize,
    /// Input samples are interleaved f32 I/Q instead of u8
    #[arg(long)]
    float_samples: bool,
    /// Number of demodulator worker threads (0 = auto)
    #[arg(long, default_value_t = 0)]
    demod_threads: usize,
    /// Number of radio worker threads (0 = auto)
    #[arg(long, default_value_t = 0)]
    radio_threads: usize,
    /// Disable coarse frequency correction
    #[arg(long)]
    disable_coarse_freq: bool,
    /// FIC groups of unchanged statistics before the database goes live
    #[arg(long, default_value_t = 10)]
    cooldown: u32,
}

fn print_database(db: &DabDatabase) {
    tracing::info!(
        "ensemble {:04X} {:?}: {} services, {} subchannels",
        db.ensemble.id,
        db.ensemble.label.as_deref().unwrap_or("?"),
        db.services.len(),
        db.subchannels.len(),
    );
    for service in db.services.values() {
        let components: Vec<String> = db
            .service_components
            .values()
            .filter(|component| component.service_id == service.id)
            .map(|component| {
                let bitrate = component
                    .subchannel_id
                    .and_then(|id| db.get_subchannel(id))
                    .and_then(|subchannel| subchannel.bitrate_kbps());
                format!(
                    "subch={:?} type={:?} bitrate={:?}kbps",
                    component.subchannel_id, component.service_type, bitrate,
                )
            })
            .collect();
        tracing::info!(
            "  service {:08X} {:?} pty={:?} [{}]",
            service.id,
            service.label.as_deref().unwrap_or("?"),
            service.programme_type,
            components.join(", "),
        );
    }
}

fn main() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let transmission_mode = DabTransmissionMode::try_from(args.mode).map_err(|err| err.to_string())?;

    let source: Box<dyn Read + Send> = match &args.input {
        None => Box::new(std::io::stdin()),
        Some(path) => match std::fs::File::open(path) {
            Ok(file) => Box::new(file),
            Err(err) => return Err(format!("Failed to open input file {}: {}", path, err)),
        },
    };

    let demod_settings = OfdmDemodulatorSettings {
        coarse_frequency_is_enabled: !args.disable_coarse_freq,
        total_threads: args.demod_threads,
        ..Default::default()
    };
    let demodulator =
        create_dab_ofdm_demodulator(transmission_mode, demod_settings).map_err(|err| err.to_string())?;

    let radio_settings = BasicRadioSettings {
        total_threads: args.radio_threads,
        nb_cooldown_max: args.cooldown,
    };
    let mut radio = BasicRadio::new(transmission_mode, radio_settings).map_err(|err| err.to_string())?;

    radio.on_database_update(print_database);
    radio.on_audio_channel_create(|subchannel_id, channel| {
        tracing::info!("audio channel up on subchannel {}", subchannel_id);
        channel.on_dynamic_label(move |label| {
            tracing::info!("subchannel {} label: {}", subchannel_id, label);
        });
        channel.on_slideshow(move |slideshow| {
            tracing::info!(
                "subchannel {} slideshow tid={} {:?} {:?} ({} bytes)",
                subchannel_id, slideshow.transport_id, slideshow.image_type,
                slideshow.name, slideshow.image_data.len(),
            );
        });
        channel.on_mot_entity(move |entity| {
            tracing::info!(
                "subchannel {} MOT object tid={} type={}/{} ({} bytes)",
                subchannel_id, entity.transport_id, entity.header.content_type,
                entity.header.content_subtype, entity.body.len(),
            );
        });
        channel.on_access_unit(move |header, index, total, data| {
            tracing::trace!(
                "subchannel {} AU {}/{} {} bytes @ {}Hz",
                subchannel_id, index, total, data.len(), header.sampling_rate,
            );
        });
    });

    let pipeline_settings = PipelineSettings {
        chunk_samples: args.block_size,
        sample_format: if args.float_samples { SampleFormat::Float32 } else { SampleFormat::Uint8 },
    };
    let pipeline = RadioPipeline::start(source, demodulator, radio, pipeline_settings);
    let (demodulator, radio) = pipeline.wait();

    tracing::info!(
        "finished: {} frames read, {} desyncs",
        demodulator.total_frames_read,
        demodulator.total_frames_desync,
    );
    let database = radio.database();
    print_database(&database.lock().unwrap());
    Ok(())
}
