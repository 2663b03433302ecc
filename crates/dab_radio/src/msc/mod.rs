pub mod cif_deinterleaver;
pub mod data_group;
pub mod msc_decoder;
