//! DOC: ETSI EN 300 401
//! Clause 6.2.1 - Sub-channel organization (UEP sub-channel size table)
//! Clause 11.3.1 - Unequal error protection profiles
//! Clause 11.3.2 - Equal error protection profiles
//!
//! A protection profile describes how one logical frame of a subchannel
//! was punctured: a list of 128-bit de-punctured blocks with their
//! puncturing vectors, a tail, and optional padding bits.

use crate::constants::puncture_codes::{punctured_bit_count, PUNCTURE_CODES, PUNCTURE_CODE_TAIL};

/// Bits per capacity unit in the MSC.
pub const BITS_PER_CU: usize = 64;
/// De-punctured bits per protection block.
pub const BITS_PER_BLOCK: usize = 128;

/// Protection configuration as signalled in FIG 0/1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    /// Short form: index into the UEP sub-channel size table.
    Uep { table_index: u8 },
    /// Long form: EEP option and protection level 1..=4.
    Eep { option: EepOption, level: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EepOption {
    A,
    B,
}

/// A run of consecutive 128-bit de-punctured blocks sharing one
/// puncturing vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRun {
    pub nb_blocks: usize,
    pub puncture_index: usize,
}

/// Fully resolved puncturing schedule for one subchannel logical frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PunctureSchedule {
    pub block_runs: Vec<BlockRun>,
    pub bitrate_kbps: u32,
    /// Punctured bits consumed from the subchannel, excluding padding.
    pub total_punctured_bits: usize,
    /// Unused bits at the end of the subchannel allocation.
    pub padding_bits: usize,
    /// De-punctured bits fed to the Viterbi decoder, tail included.
    pub total_depunctured_bits: usize,
    /// Decoded payload bytes per logical frame (tail excluded).
    pub nb_decoded_bytes: usize,
}

impl PunctureSchedule {
    fn new(block_runs: Vec<BlockRun>, bitrate_kbps: u32, subchannel_size_cu: usize) -> Self {
        let total_blocks: usize = block_runs.iter().map(|run| run.nb_blocks).sum();
        let total_depunctured_bits = total_blocks * BITS_PER_BLOCK + PUNCTURE_CODE_TAIL.len();
        let total_punctured_bits: usize = block_runs
            .iter()
            .map(|run| {
                punctured_bit_count(
                    &PUNCTURE_CODES[run.puncture_index - 1],
                    run.nb_blocks * BITS_PER_BLOCK,
                )
            })
            .sum::<usize>()
            + punctured_bit_count(&PUNCTURE_CODE_TAIL, PUNCTURE_CODE_TAIL.len());
        let subchannel_bits = subchannel_size_cu * BITS_PER_CU;
        assert!(subchannel_bits >= total_punctured_bits, "profile overruns its subchannel allocation");
        let padding_bits = subchannel_bits - total_punctured_bits;
        // decoded bits = depunctured/4, minus the 6 tail bits
        let nb_decoded_bytes = (total_depunctured_bits / 4 - 6) / 8;
        Self {
            block_runs,
            bitrate_kbps,
            total_punctured_bits,
            padding_bits,
            total_depunctured_bits,
            nb_decoded_bytes,
        }
    }
}

/// One row of the UEP sub-channel size table (clause 6.2.1, table 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UepTableEntry {
    pub subchannel_size_cu: usize,
    pub protection_level: u8,
    pub bitrate_kbps: u32,
}

/// Indexed by the 6-bit table index of the FIG 0/1 short form.
pub static UEP_SIZE_TABLE: [UepTableEntry; 64] = {
    const fn entry(subchannel_size_cu: usize, protection_level: u8, bitrate_kbps: u32) -> UepTableEntry {
        UepTableEntry { subchannel_size_cu, protection_level, bitrate_kbps }
    }
    [
        entry(16, 5, 32),  entry(21, 4, 32),  entry(24, 3, 32),  entry(29, 2, 32),  entry(35, 1, 32),
        entry(24, 5, 48),  entry(29, 4, 48),  entry(35, 3, 48),  entry(42, 2, 48),  entry(52, 1, 48),
        entry(29, 5, 56),  entry(35, 4, 56),  entry(42, 3, 56),  entry(52, 2, 56),
        entry(32, 5, 64),  entry(42, 4, 64),  entry(48, 3, 64),  entry(58, 2, 64),  entry(70, 1, 64),
        entry(40, 5, 80),  entry(52, 4, 80),  entry(58, 3, 80),  entry(70, 2, 80),  entry(84, 1, 80),
        entry(48, 5, 96),  entry(58, 4, 96),  entry(70, 3, 96),  entry(84, 2, 96),  entry(104, 1, 96),
        entry(58, 5, 112), entry(70, 4, 112), entry(84, 3, 112), entry(104, 2, 112),
        entry(64, 5, 128), entry(84, 4, 128), entry(96, 3, 128), entry(116, 2, 128), entry(140, 1, 128),
        entry(80, 5, 160), entry(104, 4, 160), entry(116, 3, 160), entry(140, 2, 160), entry(168, 1, 160),
        entry(96, 5, 192), entry(116, 4, 192), entry(140, 3, 192), entry(168, 2, 192), entry(208, 1, 192),
        entry(116, 5, 224), entry(140, 4, 224), entry(168, 3, 224), entry(208, 2, 224), entry(232, 1, 224),
        entry(128, 5, 256), entry(168, 4, 256), entry(192, 3, 256), entry(232, 2, 256), entry(280, 1, 256),
        entry(160, 5, 320), entry(208, 4, 320), entry(280, 2, 320),
        entry(192, 5, 384), entry(280, 3, 384), entry(416, 1, 384),
    ]
};

/// UEP protection profile: four block runs and their puncturing vectors
/// (clause 11.3.1, table 31). Runs with zero blocks are unused.
struct UepProfile {
    bitrate_kbps: u32,
    protection_level: u8,
    blocks: [usize; 4],
    puncture_indices: [usize; 4],
}

const fn uep(bitrate_kbps: u32, protection_level: u8, blocks: [usize; 4], puncture_indices: [usize; 4]) -> UepProfile {
    UepProfile { bitrate_kbps, protection_level, blocks, puncture_indices }
}

static UEP_PROFILES: [UepProfile; 64] = [
    uep(32, 5, [3, 4, 17, 0], [5, 3, 2, 0]),
    uep(32, 4, [3, 3, 18, 0], [11, 6, 5, 0]),
    uep(32, 3, [3, 4, 14, 3], [15, 9, 6, 8]),
    uep(32, 2, [3, 4, 14, 3], [22, 13, 8, 13]),
    uep(32, 1, [3, 5, 13, 3], [24, 17, 12, 17]),
    uep(48, 5, [4, 3, 26, 3], [5, 4, 2, 3]),
    uep(48, 4, [3, 4, 26, 3], [9, 6, 4, 6]),
    uep(48, 3, [3, 4, 26, 3], [15, 10, 6, 9]),
    uep(48, 2, [3, 4, 26, 3], [24, 14, 8, 15]),
    uep(48, 1, [3, 5, 25, 3], [24, 18, 13, 18]),
    uep(56, 5, [6, 10, 23, 3], [5, 4, 2, 3]),
    uep(56, 4, [6, 10, 23, 3], [9, 6, 4, 5]),
    uep(56, 3, [6, 12, 21, 3], [16, 7, 6, 9]),
    uep(56, 2, [6, 10, 23, 3], [23, 13, 8, 13]),
    uep(64, 5, [6, 9, 31, 2], [5, 3, 2, 3]),
    uep(64, 4, [6, 9, 33, 0], [11, 6, 5, 0]),
    uep(64, 3, [6, 12, 27, 3], [16, 8, 6, 9]),
    uep(64, 2, [6, 10, 29, 3], [23, 13, 8, 13]),
    uep(64, 1, [6, 11, 28, 3], [24, 18, 12, 18]),
    uep(80, 5, [6, 10, 41, 3], [6, 3, 2, 3]),
    uep(80, 4, [6, 10, 41, 3], [11, 6, 5, 6]),
    uep(80, 3, [6, 11, 40, 3], [16, 8, 6, 7]),
    uep(80, 2, [6, 10, 41, 3], [23, 13, 8, 13]),
    uep(80, 1, [6, 10, 41, 3], [24, 17, 12, 18]),
    uep(96, 5, [7, 9, 53, 3], [5, 4, 2, 4]),
    uep(96, 4, [7, 10, 52, 3], [9, 6, 4, 6]),
    uep(96, 3, [6, 12, 51, 3], [16, 9, 6, 10]),
    uep(96, 2, [6, 10, 53, 3], [22, 12, 9, 12]),
    uep(96, 1, [6, 13, 50, 3], [24, 18, 13, 19]),
    uep(112, 5, [14, 17, 50, 3], [5, 4, 2, 5]),
    uep(112, 4, [11, 21, 49, 3], [9, 6, 4, 8]),
    uep(112, 3, [11, 23, 47, 3], [16, 8, 6, 9]),
    uep(112, 2, [11, 21, 49, 3], [23, 12, 9, 14]),
    uep(128, 5, [12, 19, 62, 3], [5, 3, 2, 4]),
    uep(128, 4, [11, 21, 61, 3], [11, 6, 5, 7]),
    uep(128, 3, [11, 22, 60, 3], [16, 9, 6, 10]),
    uep(128, 2, [11, 21, 61, 3], [22, 12, 9, 14]),
    uep(128, 1, [11, 20, 62, 3], [24, 17, 13, 19]),
    uep(160, 5, [11, 19, 87, 3], [5, 4, 2, 4]),
    uep(160, 4, [11, 23, 83, 3], [11, 6, 5, 9]),
    uep(160, 3, [11, 24, 82, 3], [16, 8, 6, 11]),
    uep(160, 2, [11, 21, 85, 3], [22, 11, 9, 13]),
    uep(160, 1, [11, 22, 84, 3], [24, 18, 12, 19]),
    uep(192, 5, [11, 20, 110, 3], [6, 4, 2, 5]),
    uep(192, 4, [11, 22, 108, 3], [10, 6, 4, 9]),
    uep(192, 3, [11, 24, 106, 3], [16, 10, 6, 11]),
    uep(192, 2, [11, 20, 110, 3], [22, 13, 9, 13]),
    uep(192, 1, [11, 21, 109, 3], [24, 20, 13, 24]),
    uep(224, 5, [12, 22, 131, 3], [8, 6, 2, 6]),
    uep(224, 4, [12, 26, 127, 3], [12, 8, 4, 11]),
    uep(224, 3, [11, 20, 134, 3], [16, 10, 7, 9]),
    uep(224, 2, [11, 22, 132, 3], [24, 16, 10, 15]),
    uep(224, 1, [11, 24, 130, 3], [24, 20, 12, 20]),
    uep(256, 5, [11, 24, 154, 3], [6, 5, 2, 5]),
    uep(256, 4, [11, 24, 154, 3], [12, 9, 5, 10]),
    uep(256, 3, [11, 27, 151, 3], [16, 10, 7, 10]),
    uep(256, 2, [11, 22, 156, 3], [24, 14, 10, 13]),
    uep(256, 1, [11, 26, 152, 3], [24, 19, 14, 18]),
    uep(320, 5, [11, 26, 200, 3], [8, 5, 2, 6]),
    uep(320, 4, [11, 25, 201, 3], [13, 9, 5, 10]),
    uep(320, 2, [11, 26, 200, 3], [24, 17, 9, 17]),
    uep(384, 5, [11, 27, 247, 3], [8, 6, 2, 7]),
    uep(384, 3, [11, 24, 250, 3], [16, 9, 7, 10]),
    uep(384, 1, [12, 28, 245, 3], [24, 20, 14, 23]),
];

/// Resolves a FIG 0/1 short-form table index into its size table row.
pub fn get_uep_table_entry(table_index: u8) -> Option<&'static UepTableEntry> {
    UEP_SIZE_TABLE.get(table_index as usize)
}

/// Builds the puncturing schedule for a UEP table index.
pub fn get_uep_schedule(table_index: u8) -> Option<PunctureSchedule> {
    let entry = get_uep_table_entry(table_index)?;
    let profile = UEP_PROFILES.iter().find(|profile| {
        profile.bitrate_kbps == entry.bitrate_kbps && profile.protection_level == entry.protection_level
    })?;

    let block_runs = profile
        .blocks
        .iter()
        .zip(profile.puncture_indices.iter())
        .filter(|(&nb_blocks, _)| nb_blocks > 0)
        .map(|(&nb_blocks, &puncture_index)| BlockRun { nb_blocks, puncture_index })
        .collect();
    Some(PunctureSchedule::new(block_runs, entry.bitrate_kbps, entry.subchannel_size_cu))
}

/// Builds the puncturing schedule for an EEP subchannel of
/// `subchannel_size_cu` capacity units.
pub fn get_eep_schedule(option: EepOption, level: u8, subchannel_size_cu: usize) -> Option<PunctureSchedule> {
    if !(1..=4).contains(&level) {
        return None;
    }
    let level_index = (level - 1) as usize;

    match option {
        EepOption::A => {
            // Clause 11.3.2: size = n * {12, 8, 6, 4} CU, bitrate = 8n kbps
            let size_multiplier = [12usize, 8, 6, 4][level_index];
            if subchannel_size_cu % size_multiplier != 0 {
                return None;
            }
            let n = subchannel_size_cu / size_multiplier;
            if n == 0 {
                return None;
            }
            let (blocks, puncture_indices): ([usize; 2], [usize; 2]) = match level {
                1 => ([6 * n - 3, 3], [24, 23]),
                // the n=1 profile for level 2 is a special case in the standard
                2 if n == 1 => ([5, 1], [13, 12]),
                2 => ([2 * n - 3, 4 * n + 3], [14, 13]),
                3 => ([6 * n - 3, 3], [8, 7]),
                _ => ([4 * n - 3, 2 * n + 3], [3, 2]),
            };
            let block_runs = blocks
                .iter()
                .zip(puncture_indices.iter())
                .map(|(&nb_blocks, &puncture_index)| BlockRun { nb_blocks, puncture_index })
                .collect();
            Some(PunctureSchedule::new(block_runs, 8 * n as u32, subchannel_size_cu))
        }
        EepOption::B => {
            // Clause 11.3.2: size = n * {27, 21, 18, 15} CU, bitrate = 32n kbps
            let size_multiplier = [27usize, 21, 18, 15][level_index];
            if subchannel_size_cu % size_multiplier != 0 {
                return None;
            }
            let n = subchannel_size_cu / size_multiplier;
            if n == 0 {
                return None;
            }
            let puncture_indices = match level {
                1 => [10, 9],
                2 => [6, 5],
                3 => [4, 3],
                _ => [2, 1],
            };
            let block_runs = vec![
                BlockRun { nb_blocks: 24 * n - 3, puncture_index: puncture_indices[0] },
                BlockRun { nb_blocks: 3, puncture_index: puncture_indices[1] },
            ];
            Some(PunctureSchedule::new(block_runs, 32 * n as u32, subchannel_size_cu))
        }
    }
}

/// Builds the schedule for any signalled protection configuration.
pub fn get_schedule(protection: Protection, subchannel_size_cu: usize) -> Option<PunctureSchedule> {
    match protection {
        Protection::Uep { table_index } => {
            let schedule = get_uep_schedule(table_index)?;
            let entry = get_uep_table_entry(table_index)?;
            if entry.subchannel_size_cu != subchannel_size_cu {
                tracing::warn!(
                    target: "msc-decoder",
                    "UEP table index {} expects {} CU but subchannel has {}",
                    table_index, entry.subchannel_size_cu, subchannel_size_cu,
                );
                return None;
            }
            Some(schedule)
        }
        Protection::Eep { option, level } => get_eep_schedule(option, level, subchannel_size_cu),
    }
}
