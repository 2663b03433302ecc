pub mod dab_parameters;
pub mod dab_transmission_modes;
