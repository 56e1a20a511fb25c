//! The training loop.
//!
//! Episodes run until the mean reward over the last `reward_history_len`
//! episodes exceeds `solved_reward`, or until an optional frame budget is
//! spent. Every `update_after_actions` frames the agent takes a gradient
//! step; every `update_target_network` frames the target network is synced
//! and a checkpoint is written.

use tensorboard_rs::summary_writer::SummaryWriter;
use tracing::{debug, info};

use crate::agent::DqnAgent;
use crate::checkpoint::{save_checkpoint, CheckpointMetadata};
use crate::config::TrainConfig;
use crate::environment::Environment;
use crate::error::{DqnError, Result};
use crate::replay_buffer::Transition;
use crate::stats::RewardHistory;

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub frames: u64,
    pub episodes: u64,
    pub running_reward: f64,
    pub solved: bool,
}

pub struct Trainer<E> {
    env: E,
    agent: DqnAgent,
    config: TrainConfig,
    history: RewardHistory,
    frame_count: u64,
    episode_count: u64,
    running_reward: f64,
    writer: Option<SummaryWriter>,
    render: bool,
}

impl<E: Environment> Trainer<E> {
    pub fn new(env: E, agent: DqnAgent, config: TrainConfig) -> Result<Self> {
        config.validate()?;
        if env.num_actions() != agent.num_actions() {
            return Err(DqnError::Config(format!(
                "environment has {} actions but the agent was built for {}",
                env.num_actions(),
                agent.num_actions()
            )));
        }

        Ok(Self {
            env,
            agent,
            history: RewardHistory::new(config.reward_history_len),
            config,
            frame_count: 0,
            episode_count: 0,
            running_reward: 0.0,
            writer: None,
            render: false,
        })
    }

    /// Resume the frame counter, e.g. when continuing from a checkpoint.
    /// Exploration still starts from `epsilon_max`.
    pub fn with_start_frame(mut self, frame_count: u64) -> Self {
        self.frame_count = frame_count;
        self
    }

    pub fn with_writer(mut self, writer: SummaryWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn with_render(mut self, render: bool) -> Self {
        self.render = render;
        self
    }

    pub fn agent(&self) -> &DqnAgent {
        &self.agent
    }

    pub fn into_parts(self) -> (E, DqnAgent) {
        (self.env, self.agent)
    }

    pub fn run(&mut self, max_frames: Option<u64>) -> Result<TrainingSummary> {
        info!(
            env_id = %self.config.env_id,
            start_frame = self.frame_count,
            ?max_frames,
            "starting training"
        );

        let mut solved = false;
        loop {
            let Some(episode_reward) = self.run_episode(max_frames)? else {
                break;
            };

            self.history.push(episode_reward);
            self.running_reward = self.history.mean();
            self.episode_count += 1;
            debug!(
                episode = self.episode_count,
                episode_reward,
                running_reward = self.running_reward,
                epsilon = self.agent.epsilon(),
                "episode finished"
            );
            self.log_scalar("rewards/episode_reward", episode_reward, self.episode_count);
            self.log_scalar("rewards/running_reward", self.running_reward, self.episode_count);
            self.log_scalar("train/epsilon", self.agent.epsilon(), self.episode_count);

            if self.running_reward > self.config.solved_reward {
                info!("Solved at episode {}!", self.episode_count);
                solved = true;
                break;
            }
            if budget_spent(self.frame_count, max_frames) {
                break;
            }
        }

        if let Some(writer) = self.writer.as_mut() {
            writer.flush();
        }

        Ok(TrainingSummary {
            frames: self.frame_count,
            episodes: self.episode_count,
            running_reward: self.running_reward,
            solved,
        })
    }

    /// Play one episode. Returns `None` when the frame budget ran out before
    /// the episode finished.
    fn run_episode(&mut self, max_frames: Option<u64>) -> Result<Option<f64>> {
        let mut state = self.env.reset()?;
        let mut episode_reward = 0.0;

        for _timestep in 1..self.config.max_steps_per_episode {
            if budget_spent(self.frame_count, max_frames) {
                return Ok(None);
            }
            if self.render {
                self.env.render()?;
            }
            self.frame_count += 1;

            let action = self.agent.act(&state, self.frame_count)?;
            let step = self.env.step(action)?;
            episode_reward += f64::from(step.reward);

            self.agent.remember(Transition {
                state,
                action,
                reward: step.reward,
                next_state: step.observation.clone(),
                done: step.done,
            });
            state = step.observation;

            if self.frame_count % self.config.update_after_actions == 0 {
                if let Some(loss) = self.agent.train_step()? {
                    let train_steps = self.agent.train_steps();
                    self.log_scalar("train/loss", loss, train_steps);
                }
            }

            if self.frame_count % self.config.update_target_network == 0 {
                self.agent.update_target_network()?;
                info!(
                    "running reward: {:.2} at episode {}, frame count {}",
                    self.running_reward, self.episode_count, self.frame_count
                );
                self.checkpoint()?;
            }

            if step.done {
                break;
            }
        }

        Ok(Some(episode_reward))
    }

    fn checkpoint(&self) -> Result<()> {
        let metadata = CheckpointMetadata::new(
            &self.config.env_id,
            self.frame_count,
            self.episode_count,
            self.running_reward,
            self.agent.epsilon(),
        );
        save_checkpoint(
            &self.agent,
            &self.config.checkpoint_dir,
            &self.config.checkpoint_prefix,
            &metadata,
        )?;
        Ok(())
    }

    fn log_scalar(&mut self, tag: &str, value: f64, step: u64) {
        if let Some(writer) = self.writer.as_mut() {
            writer.add_scalar(tag, value as f32, step as usize);
        }
    }
}

fn budget_spent(frame_count: u64, max_frames: Option<u64>) -> bool {
    max_frames.is_some_and(|max| frame_count >= max)
}

/// Play `episodes` games greedily and return the reward of each.
pub fn evaluate<E: Environment>(
    env: &mut E,
    agent: &DqnAgent,
    episodes: usize,
    max_steps: u64,
    render: bool,
) -> Result<Vec<f64>> {
    let mut rewards = Vec::with_capacity(episodes);
    for game in 0..episodes {
        let mut state = env.reset()?;
        let mut reward_game = 0.0;
        for _ in 0..max_steps {
            if render {
                env.render()?;
            }
            let action = agent.greedy_action(&state)?;
            let step = env.step(action)?;
            reward_game += f64::from(step.reward);
            state = step.observation;
            if step.done {
                break;
            }
        }
        info!("Reward {} for game {}", reward_game, game);
        rewards.push(reward_game);
    }
    Ok(rewards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::environment::{Observation, Step};
    use std::rc::Rc;
    use tch::Device;

    /// Constant frames, a reward of 1 per step and a fixed episode length.
    struct CountingEnv {
        episode_len: Option<u64>,
        steps: u64,
        resets: u64,
    }

    impl CountingEnv {
        fn new(episode_len: Option<u64>) -> Self {
            Self {
                episode_len,
                steps: 0,
                resets: 0,
            }
        }

        fn observation(&self) -> Observation {
            let frame: Rc<[u8]> = Rc::from(vec![(self.steps % 256) as u8; 36 * 36]);
            Observation::new(vec![frame; 4], 36, 36).unwrap()
        }
    }

    impl Environment for CountingEnv {
        fn reset(&mut self) -> Result<Observation> {
            self.steps = 0;
            self.resets += 1;
            Ok(self.observation())
        }

        fn step(&mut self, action: usize) -> Result<Step> {
            assert!(action < 2);
            self.steps += 1;
            Ok(Step {
                observation: self.observation(),
                reward: 1.0,
                done: self.episode_len.is_some_and(|len| self.steps >= len),
            })
        }

        fn num_actions(&self) -> usize {
            2
        }

        fn observation_shape(&self) -> [usize; 3] {
            [4, 36, 36]
        }
    }

    fn test_config(checkpoint_dir: &std::path::Path) -> TrainConfig {
        TrainConfig {
            max_steps_per_episode: 4,
            update_after_actions: 1,
            update_target_network: 5,
            reward_history_len: 2,
            solved_reward: 1_000.0,
            checkpoint_dir: checkpoint_dir.to_path_buf(),
            agent: AgentConfig {
                batch_size: 2,
                replay_capacity: 8,
                epsilon_random_frames: 0,
                epsilon_greedy_frames: 10,
                ..AgentConfig::default()
            },
            ..TrainConfig::default()
        }
    }

    fn trainer(env: CountingEnv, config: TrainConfig) -> Trainer<CountingEnv> {
        let agent = DqnAgent::new(config.agent.clone(), [4, 36, 36], 2, Device::Cpu, 0).unwrap();
        Trainer::new(env, agent, config).unwrap()
    }

    #[test]
    fn test_episode_is_capped_by_max_steps() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(CountingEnv::new(None), test_config(dir.path()));

        let summary = trainer.run(Some(9)).unwrap();
        assert_eq!(summary.frames, 9);
        assert_eq!(summary.episodes, 3);
        assert_eq!(summary.running_reward, 3.0);
        assert!(!summary.solved);
    }

    #[test]
    fn test_checkpoints_follow_target_updates() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(CountingEnv::new(Some(2)), test_config(dir.path()));

        trainer.run(Some(12)).unwrap();
        assert!(dir.path().join("saved_model_5.ot").exists());
        assert!(dir.path().join("saved_model_10.ot").exists());
        assert!(dir.path().join("saved_model_10.meta.json").exists());
        assert!(trainer.agent().train_steps() > 0);
    }

    #[test]
    fn test_stops_once_solved() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrainConfig {
            solved_reward: 1.5,
            ..test_config(dir.path())
        };
        let mut trainer = trainer(CountingEnv::new(Some(2)), config);

        let summary = trainer.run(None).unwrap();
        assert!(summary.solved);
        assert_eq!(summary.episodes, 1);
        assert_eq!(summary.frames, 2);
    }

    #[test]
    fn test_start_frame_offsets_counter() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer =
            trainer(CountingEnv::new(Some(2)), test_config(dir.path())).with_start_frame(3);

        let summary = trainer.run(Some(7)).unwrap();
        assert_eq!(summary.frames, 7);
        assert_eq!(summary.episodes, 2);
        assert!(dir.path().join("saved_model_5.ot").exists());
    }

    #[test]
    fn test_rejects_mismatched_action_space() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let agent = DqnAgent::new(config.agent.clone(), [4, 36, 36], 3, Device::Cpu, 0).unwrap();
        assert!(Trainer::new(CountingEnv::new(None), agent, config).is_err());
    }

    #[test]
    fn test_evaluate_plays_requested_games() {
        let config = AgentConfig {
            batch_size: 2,
            replay_capacity: 8,
            ..AgentConfig::default()
        };
        let agent = DqnAgent::new(config, [4, 36, 36], 2, Device::Cpu, 0).unwrap();
        let mut env = CountingEnv::new(Some(3));

        let rewards = evaluate(&mut env, &agent, 2, 100, false).unwrap();
        assert_eq!(rewards, vec![3.0, 3.0]);
        assert_eq!(env.resets, 2);
    }

    #[test]
    fn test_evaluate_plays_whole_games_with_raw_scores() {
        use crate::wrappers::{
            tests::{small_config, ScriptedEmulator},
            DeepMindEnv,
        };

        let mut emulator = ScriptedEmulator::new();
        emulator.start_lives = 3;
        emulator.life_every = 4;
        emulator.reward_per_frame = 2.0;
        let mut env = DeepMindEnv::new(emulator, small_config().for_evaluation(), 0).unwrap();
        let config = AgentConfig {
            batch_size: 2,
            replay_capacity: 8,
            ..AgentConfig::default()
        };
        let agent = DqnAgent::new(config, [4, 36, 36], 4, Device::Cpu, 0).unwrap();

        // Three lives of four frames each, one agent step per life.
        let rewards = evaluate(&mut env, &agent, 1, 100, false).unwrap();
        assert_eq!(rewards, vec![24.0]);
        assert_eq!(env.emulator().actions.len(), 12);
        assert_eq!(env.emulator().resets, 1);
    }
}
