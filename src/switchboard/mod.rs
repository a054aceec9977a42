//! Switch banks: bit packing, per-board state and the set of boards on the panel

pub mod codec;
pub mod controller;
pub mod registry;
