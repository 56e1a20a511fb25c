//! DeepMind-style Atari preprocessing.
//!
//! `DeepMindEnv` turns a raw [`Emulator`] into the [`Environment`] the agent
//! trains on. From the emulator outwards it applies: random no-ops on reset,
//! frame skipping with max-pooling over the last two frames, episodic life,
//! fire-on-reset, grayscale warping, reward clipping and frame stacking.

use std::collections::VecDeque;
use std::rc::Rc;

use image::imageops::{self, FilterType};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, trace};

use crate::config::WrapperConfig;
use crate::environment::{Emulator, Environment, Frame, Observation, RawFrame, Step};
use crate::error::{DqnError, Result};

const NOOP_ACTION: usize = 0;
const FIRE_ACTION: usize = 1;

pub struct DeepMindEnv<E> {
    emulator: E,
    config: WrapperConfig,
    rng: StdRng,
    frames: VecDeque<Frame>,
    lives: u32,
    real_done: bool,
    use_fire: bool,
    seed: Option<u64>,
}

/// Games like Breakout wait for FIRE before launching the ball.
pub fn needs_fire_reset(action_meanings: &[String]) -> bool {
    action_meanings.len() >= 3 && action_meanings[FIRE_ACTION] == "FIRE"
}

/// Convert an RGB frame to grayscale and resize it to `width x height`.
pub fn warp_frame(frame: RawFrame, width: usize, height: usize) -> Result<Frame> {
    let rgb = image::RgbImage::from_raw(frame.width as u32, frame.height as u32, frame.pixels)
        .ok_or_else(|| {
            DqnError::Environment(format!(
                "frame buffer does not match {}x{}",
                frame.width, frame.height
            ))
        })?;
    let gray = imageops::grayscale(&rgb);
    let resized = imageops::resize(&gray, width as u32, height as u32, FilterType::Triangle);
    Ok(Rc::from(resized.into_raw()))
}

/// Bin a reward to its sign.
pub fn clip_reward(reward: f64) -> f32 {
    if reward > 0.0 {
        1.0
    } else if reward < 0.0 {
        -1.0
    } else {
        0.0
    }
}

impl<E: Emulator> DeepMindEnv<E> {
    /// `seed` is handed to the emulator on the first reset and seeds the
    /// no-op sampler.
    pub fn new(emulator: E, config: WrapperConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        let use_fire = config.fire_reset && needs_fire_reset(&emulator.action_meanings()?);
        debug!(use_fire, frame_skip = config.frame_skip, "wrapping emulator");

        Ok(Self {
            emulator,
            rng: StdRng::seed_from_u64(seed),
            frames: VecDeque::with_capacity(config.frame_stack),
            config,
            lives: 0,
            real_done: true,
            use_fire,
            seed: Some(seed),
        })
    }

    pub fn emulator(&self) -> &E {
        &self.emulator
    }

    pub fn into_inner(self) -> E {
        self.emulator
    }

    /// Repeat `action` for `frame_skip` emulator frames.
    /// Returns the max of the last two frames, the summed reward and whether
    /// the game ended.
    fn skip_step(&mut self, action: usize) -> Result<(RawFrame, f64, bool)> {
        let mut total_reward = 0.0;
        let mut previous: Option<RawFrame> = None;
        let mut last: Option<RawFrame> = None;
        let mut game_over = false;

        for _ in 0..self.config.frame_skip {
            let step = self.emulator.step(action)?;
            total_reward += step.reward;
            game_over = step.game_over();
            previous = last.replace(step.frame);
            if game_over {
                break;
            }
        }

        let frame = match (previous, last) {
            (Some(previous), Some(last)) => last.max_with(&previous)?,
            (None, Some(last)) => last,
            _ => unreachable!("frame_skip is validated to be at least 1"),
        };
        Ok((frame, total_reward, game_over))
    }

    /// Real reset followed by a random number of no-op frames.
    fn noop_reset(&mut self) -> Result<RawFrame> {
        let mut frame = self.emulator.reset(self.seed.take())?;
        if self.config.noop_max == 0 {
            return Ok(frame);
        }

        let noops = self.rng.random_range(1..=self.config.noop_max);
        trace!(noops, "no-op reset");
        for _ in 0..noops {
            let step = self.emulator.step(NOOP_ACTION)?;
            frame = if step.game_over() {
                self.emulator.reset(None)?
            } else {
                step.frame
            };
        }
        Ok(frame)
    }

    /// Only resets the game once all lives are gone; otherwise continues
    /// from the state where the life was lost.
    fn life_reset(&mut self) -> Result<RawFrame> {
        let frame = if !self.config.episodic_life || self.real_done {
            self.noop_reset()?
        } else {
            let (frame, _, game_over) = self.skip_step(NOOP_ACTION)?;
            if game_over {
                self.noop_reset()?
            } else {
                frame
            }
        };
        self.real_done = false;
        self.lives = self.emulator.lives();
        Ok(frame)
    }

    fn life_step(&mut self, action: usize) -> Result<(RawFrame, f64, bool)> {
        let (frame, reward, game_over) = self.skip_step(action)?;
        self.real_done = game_over;

        let mut done = game_over;
        if self.config.episodic_life {
            let lives = self.emulator.lives();
            if lives < self.lives && lives > 0 {
                done = true;
            }
            self.lives = lives;
        }
        Ok((frame, reward, done))
    }

    fn fire_reset(&mut self) -> Result<RawFrame> {
        let mut frame = self.life_reset()?;
        if !self.use_fire {
            return Ok(frame);
        }

        for action in [FIRE_ACTION, 2] {
            let (next, _, done) = self.life_step(action)?;
            frame = if done { self.life_reset()? } else { next };
        }
        Ok(frame)
    }

    fn observation(&self) -> Result<Observation> {
        Observation::new(
            self.frames.iter().cloned().collect(),
            self.config.frame_height,
            self.config.frame_width,
        )
    }

    fn warp(&self, frame: RawFrame) -> Result<Frame> {
        warp_frame(frame, self.config.frame_width, self.config.frame_height)
    }
}

impl<E: Emulator> Environment for DeepMindEnv<E> {
    fn reset(&mut self) -> Result<Observation> {
        let raw = self.fire_reset()?;
        let frame = self.warp(raw)?;

        self.frames.clear();
        for _ in 0..self.config.frame_stack {
            self.frames.push_back(frame.clone());
        }
        self.observation()
    }

    fn step(&mut self, action: usize) -> Result<Step> {
        let num_actions = self.emulator.num_actions();
        if action >= num_actions {
            return Err(DqnError::InvalidAction {
                action,
                num_actions,
            });
        }

        let (raw, reward, done) = self.life_step(action)?;
        let frame = self.warp(raw)?;
        self.frames.push_back(frame);
        while self.frames.len() > self.config.frame_stack {
            self.frames.pop_front();
        }

        let reward = if self.config.clip_rewards {
            clip_reward(reward)
        } else {
            reward as f32
        };

        Ok(Step {
            observation: self.observation()?,
            reward,
            done,
        })
    }

    fn num_actions(&self) -> usize {
        self.emulator.num_actions()
    }

    fn observation_shape(&self) -> [usize; 3] {
        [
            self.config.frame_stack,
            self.config.frame_height,
            self.config.frame_width,
        ]
    }

    fn render(&mut self) -> Result<()> {
        self.emulator.render()
    }
}
