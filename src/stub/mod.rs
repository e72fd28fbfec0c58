pub mod tree;
pub mod element;
pub mod builder;
pub mod id_list;
pub mod payload;
pub mod serialized;
pub mod codec;
