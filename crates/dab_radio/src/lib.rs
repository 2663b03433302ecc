pub mod algorithms;
pub mod audio;
pub mod audio_channel;
pub mod constants;
pub mod dab_radio_parameters;
pub mod database;
pub mod fic;
pub mod misc_info;
pub mod mot;
pub mod msc;
pub mod pad;
pub mod radio;
