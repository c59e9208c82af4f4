//! A multi-pass assembler for the NMOS 6502, aimed at NES/Famicom
//! development, featuring:
//! - flat binary and IPS patch output
//! - textual equates, macros, repeats and conditional assembly
//! - forward references resolved over converging passes
//! - FCEUX/Mesen/Lua symbol exports and CDL coverage files

pub mod assembler;
pub mod logging;
