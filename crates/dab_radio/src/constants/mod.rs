pub mod charsets;
pub mod mot_content_types;
pub mod protection_profiles;
pub mod puncture_codes;
