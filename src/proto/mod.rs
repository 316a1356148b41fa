pub mod catalog;
pub mod codec;
pub mod command;
pub mod wire;
