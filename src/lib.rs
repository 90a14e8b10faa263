#![no_std]
//! This is a platform agnostic driver for the NAND flash controller of the WonderMedia WM8xxx SoCs
//! (WM8505, WM8650, WM8750, WM8850, WM8880).
//!
//! The controller sequences NAND commands itself, moves page data through a single-descriptor DMA
//! engine and checks it with a hardware BCH engine. Errors the engine reports are corrected by the
//! driver, in interrupt context.
//!
//! The integrator provides:
//! * the register window, usually through [`register::Mmio`]
//! * a [`SharedState`], usually a `static` placed in DMA-coherent memory
//! * the two interrupts, forwarded to an [`InterruptHandler`]
//! * a delay source from [embedded-hal](https://github.com/rust-embedded/embedded-hal), blocking or async
//!
//! A [`blocking::Nand`] or [`asynchronous::AsyncNand`] starts unconfigured, which is enough to
//! identify the chip, and is then configured with the validated [`Geometry`].

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod address;
pub mod asynchronous;
pub mod blocking;
pub mod completion;
pub mod config;
mod controller;
pub mod dma;
pub mod ecc;
pub mod error;
pub mod geometry;
pub mod interrupt;
pub mod raw;
pub mod register;
pub mod shared;

pub use crate::config::{Config, Timing};
pub use crate::error::Error;
pub use crate::geometry::Geometry;
pub use crate::interrupt::InterruptHandler;
pub use crate::shared::{EccStats, SharedState};

/// Capacity of the DMA buffer, the largest supported page
pub const DMA_BUFFER_SIZE: usize = 16384;
