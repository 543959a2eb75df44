//! # Transcription Module
//!
//! Audio in, MIDI out.
//!
//! ## Key Components:
//! - **backend**: the `InferenceBackend` trait, fixed `PredictOptions`, and the external
//!   basic-pitch compatible command backend
//! - **model**: the built-in spectral note model (candle)
//! - **midi**: MIDI file writing for detected notes
//! - **engine**: the adapter that runs a backend and locates its MIDI artifact
//!
//! ## Fixed inference parameters:
//! - onset threshold 0.5, frame threshold 0.3
//! - pretrained model reference `icassp_2022`
//! - MIDI output on, intermediate model outputs off

pub mod backend;
pub mod engine;
pub mod midi;
pub mod model;

pub use backend::{InferenceBackend, PredictOptions};
pub use engine::TranscriptionEngine;
