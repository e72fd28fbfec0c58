pub mod version_map;
