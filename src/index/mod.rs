pub mod key;
pub mod key_map;
pub mod diff;
pub mod forward;
pub mod secondary;
pub mod registration;
pub mod init;
pub mod id_iterator;
pub mod stub_index;
