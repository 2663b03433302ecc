//! Full radio decode over synthetic frames: the FIC path from soft bits
//! to the promoted service database.

use dab_core::dab_transmission_modes::DabTransmissionMode;
use dab_radio::algorithms::additive_scrambler::AdditiveScrambler;
use dab_radio::algorithms::crc::CRC16_CCITT_INVERTED;
use dab_radio::algorithms::viterbi::encode_mother_code;
use dab_radio::constants::puncture_codes::{get_puncture_code, PUNCTURE_CODE_TAIL};
use dab_radio::radio::{BasicRadio, BasicRadioSettings};
use std::sync::{Arc, Mutex};

/// Builds a FIB: FIGs, end-marker filler, then the CRC.
fn build_fib(figs: &[Vec<u8>]) -> [u8; 32] {
    let mut fib = [0xFFu8; 32];
    let mut position = 0usize;
    for fig in figs {
        fib[position..position + fig.len()].copy_from_slice(fig);
        position += fig.len();
    }
    assert!(position <= 30);
    let crc = CRC16_CCITT_INVERTED.process(&fib[..30]);
    fib[30..].copy_from_slice(&crc.to_be_bytes());
    fib
}

fn build_fig(fig_type: u8, payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() <= 29);
    let mut fig = vec![(fig_type << 5) | payload.len() as u8];
    fig.extend_from_slice(payload);
    fig
}

/// Transmitter side of the FIC: scramble, convolve, puncture with the
/// mode I schedule.
fn encode_fib_group(fibs: &[[u8; 32]; 3]) -> Vec<i8> {
    let mut payload = Vec::with_capacity(96);
    for fib in fibs {
        payload.extend_from_slice(fib);
    }
    let mut scrambler = AdditiveScrambler::new(0xFFFF);
    scrambler.descramble(&mut payload);
    let symbols = encode_mother_code(&payload);

    let mut soft = Vec::with_capacity(2304);
    let mut symbol_index = 0usize;
    let push_block = |code: &[u8], depunctured: usize, soft: &mut Vec<i8>, symbol_index: &mut usize| {
        for i in 0..depunctured {
            if code[i % code.len()] != 0 {
                soft.push(if symbols[*symbol_index] == 1 { 127 } else { -127 });
            }
            *symbol_index += 1;
        }
    };
    push_block(get_puncture_code(16), 21 * 128, &mut soft, &mut symbol_index);
    push_block(get_puncture_code(15), 3 * 128, &mut soft, &mut symbol_index);
    push_block(&PUNCTURE_CODE_TAIL, 24, &mut soft, &mut symbol_index);
    assert_eq!(soft.len(), 2304);
    soft
}

/// One mode I frame of soft bits with the given FIB group repeated over
/// all four FIC groups and a silent MSC.
fn build_frame(fib_group: &[i8]) -> Vec<i8> {
    let nb_bits_per_frame = 75 * 3072;
    let mut frame = vec![0i8; nb_bits_per_frame];
    for group_index in 0..4 {
        frame[group_index * 2304..(group_index + 1) * 2304].copy_from_slice(fib_group);
    }
    frame
}

#[test]
fn ensemble_id_reaches_the_stable_database() {
    let nb_cooldown_max = 4u32;
    let settings = BasicRadioSettings { total_threads: 1, nb_cooldown_max };
    let mut radio = BasicRadio::new(DabTransmissionMode::I, settings).unwrap();

    let updates = Arc::new(Mutex::new(0u32));
    radio.on_database_update({
        let updates = updates.clone();
        move |db| {
            assert_eq!(db.ensemble.id, 0xABCD);
            *updates.lock().unwrap() += 1;
        }
    });

    // FIG 0/0 with ensemble id 0xABCD
    let fig_0_0 = build_fig(0, &[0x00, 0xAB, 0xCD, 0x00, 0x2A]);
    let fib = build_fib(&[fig_0_0]);
    let filler = build_fib(&[]);
    let group = encode_fib_group(&[fib, filler, filler]);
    let frame = build_frame(&group);

    // the change lands on frame 1; promotion follows the cool-down
    for _ in 0..(nb_cooldown_max + 2) {
        radio.process(&frame);
    }

    assert_eq!(*updates.lock().unwrap(), 1, "stable database promoted exactly once");
    let database = radio.database();
    let database = database.lock().unwrap();
    assert_eq!(database.ensemble.id, 0xABCD);
    assert_eq!(radio.misc_info.cif_counter, Some(0x2A));
}

#[test]
fn service_and_subchannel_definitions_promote_together() {
    let settings = BasicRadioSettings { total_threads: 1, nb_cooldown_max: 3 };
    let mut radio = BasicRadio::new(DabTransmissionMode::I, settings).unwrap();

    // ensemble + subchannel 3 (UEP index 6) + DAB+ service + labels
    let fig_0_0 = build_fig(0, &[0x00, 0x8F, 0x11, 0x00, 0x00]);
    let fig_0_1 = build_fig(0, &[0x01, (3 << 2), 0x00, 0b0_0_000110]);
    let fig_0_2 = build_fig(0, &[0x02, 0x51, 0x23, 0x01, 0x3F, (3 << 2) | 0b10]);
    let mut service_label = vec![0b0000_0_001, 0x51, 0x23];
    service_label.extend_from_slice(b"Pulse FM        ");
    service_label.extend_from_slice(&[0x00, 0x00]);
    let fig_1_1 = build_fig(1, &service_label);
    let mut ensemble_label = vec![0b0000_0_000, 0x8F, 0x11];
    ensemble_label.extend_from_slice(b"National Mux    ");
    ensemble_label.extend_from_slice(&[0x00, 0x00]);
    let fig_1_0 = build_fig(1, &ensemble_label);

    let fib_a = build_fib(&[fig_0_0, fig_0_1, fig_0_2]);
    let fib_b = build_fib(&[fig_1_0]);
    let fib_c = build_fib(&[fig_1_1]);
    let group = encode_fib_group(&[fib_a, fib_b, fib_c]);
    let frame = build_frame(&group);

    let created = Arc::new(Mutex::new(Vec::new()));
    radio.on_audio_channel_create({
        let created = created.clone();
        move |id, _| created.lock().unwrap().push(id)
    });

    for _ in 0..6 {
        radio.process(&frame);
    }

    let database = radio.database();
    let database = database.lock().unwrap();
    assert_eq!(database.ensemble.label.as_deref(), Some("National Mux"));
    let service = &database.services[&0x5123];
    assert_eq!(service.label.as_deref(), Some("Pulse FM"));
    let subchannel = &database.subchannels[&3];
    assert!(subchannel.is_complete());
    assert_eq!(subchannel.bitrate_kbps(), Some(48));
    // the DAB+ component got its decoder state on promotion
    assert_eq!(created.lock().unwrap().as_slice(), &[3]);
}
