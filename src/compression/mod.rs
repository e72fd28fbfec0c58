pub mod compress;
pub mod vbyte;
