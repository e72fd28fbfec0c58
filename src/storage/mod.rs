pub mod layout;
pub mod file_lock;
pub mod persistent_map;
pub mod version_file;
