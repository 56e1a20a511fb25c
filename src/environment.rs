//! This module defines the interfaces between the agent and the game:
//! the raw emulator seen by the preprocessing wrappers, and the stacked
//! grayscale observations seen by the agent.

use std::rc::Rc;

use crate::error::{DqnError, Result};

/// A single preprocessed grayscale frame, row-major.
/// Frames are shared between consecutive observations.
pub type Frame = Rc<[u8]>;

/// An RGB image as produced by the emulator.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub width: usize,
    pub height: usize,
    /// Interleaved RGB bytes, row-major.
    pub pixels: Vec<u8>,
}

impl RawFrame {
    pub fn new(width: usize, height: usize, pixels: Vec<u8>) -> Result<Self> {
        if pixels.len() != width * height * 3 {
            return Err(DqnError::Environment(format!(
                "expected {} RGB bytes for a {width}x{height} frame, got {}",
                width * height * 3,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Pixel-wise maximum of two frames of the same size.
    /// Removes the flickering of sprites drawn on alternate frames.
    pub fn max_with(&self, other: &RawFrame) -> Result<RawFrame> {
        if (self.width, self.height) != (other.width, other.height)
            || self.pixels.len() != other.pixels.len()
        {
            return Err(DqnError::Environment(format!(
                "cannot merge a {}x{} frame with a {}x{} frame",
                self.width, self.height, other.width, other.height
            )));
        }
        let pixels = self
            .pixels
            .iter()
            .zip(&other.pixels)
            .map(|(a, b)| *a.max(b))
            .collect();
        Ok(RawFrame {
            width: self.width,
            height: self.height,
            pixels,
        })
    }
}

/// Result of advancing the emulator by one frame.
#[derive(Debug, Clone)]
pub struct RawStep {
    pub frame: RawFrame,
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
    pub lives: u32,
}

impl RawStep {
    /// The game is over, either by its own rules or by a time limit.
    pub fn game_over(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// A raw Atari game, one emulator frame per step.
pub trait Emulator {
    fn reset(&mut self, seed: Option<u64>) -> Result<RawFrame>;
    fn step(&mut self, action: usize) -> Result<RawStep>;
    fn num_actions(&self) -> usize;
    fn action_meanings(&self) -> Result<Vec<String>>;
    /// Lives remaining as of the last reset or step.
    fn lives(&self) -> u32;
    fn render(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// A stack of the most recent grayscale frames, channel-first.
#[derive(Debug, Clone)]
pub struct Observation {
    frames: Vec<Frame>,
    height: usize,
    width: usize,
}

impl Observation {
    pub fn new(frames: Vec<Frame>, height: usize, width: usize) -> Result<Self> {
        if frames.is_empty() {
            return Err(DqnError::Environment(
                "an observation needs at least one frame".to_string(),
            ));
        }
        if let Some(bad) = frames.iter().find(|frame| frame.len() != height * width) {
            return Err(DqnError::Environment(format!(
                "frame has {} pixels, expected {height}x{width}",
                bad.len()
            )));
        }
        Ok(Self {
            frames,
            height,
            width,
        })
    }

    /// `[channels, height, width]`
    pub fn shape(&self) -> [usize; 3] {
        [self.frames.len(), self.height, self.width]
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Append the stack to `out` as floats scaled into `[0, 1]`.
    pub fn write_scaled(&self, out: &mut Vec<f32>) {
        for frame in &self.frames {
            out.extend(frame.iter().map(|&pixel| f32::from(pixel) / 255.0));
        }
    }
}

/// Outcome of one agent step.
#[derive(Debug, Clone)]
pub struct Step {
    pub observation: Observation,
    pub reward: f32,
    pub done: bool,
}

/// The environment as the agent sees it.
pub trait Environment {
    fn reset(&mut self) -> Result<Observation>;
    fn step(&mut self, action: usize) -> Result<Step>;
    fn num_actions(&self) -> usize;
    fn observation_shape(&self) -> [usize; 3];
    fn render(&mut self) -> Result<()> {
        Ok(())
    }
}
