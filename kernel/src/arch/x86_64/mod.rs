//! x86_64 bare-metal backend.

pub mod cpu;
