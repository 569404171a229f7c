//! Core positioning algorithms

pub mod multilateration;

pub use multilateration::{Multilateration, Solution};
