pub mod chunk;
pub mod header;
