//! Protocol module - AW USB control codes and data blocks.

pub mod command;
pub mod constants;
pub mod params;

pub use command::{CommandCode, CommandHeader};
pub use constants::*;
pub use params::ParamBlock;
