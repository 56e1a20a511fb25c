//! The DQN agent: an online Q-network trained from replayed transitions and
//! a periodically synchronised target network providing the bootstrap
//! values.

use std::path::Path;

use rand::{rngs::StdRng, Rng, SeedableRng};
use tch::{
    nn::{self, Module, OptimizerConfig, VarStore},
    Device, Kind, Reduction, Tensor,
};
use tracing::{debug, info};

use crate::config::AgentConfig;
use crate::environment::Observation;
use crate::error::{DqnError, Result};
use crate::exploration::EpsilonGreedy;
use crate::qnetwork::QNetwork;
use crate::replay_buffer::{ReplayBuffer, Transition};

pub struct DqnAgent {
    q_network: QNetwork,
    target_network: QNetwork,
    vs_main: VarStore,
    vs_target: VarStore,
    optimizer: nn::Optimizer,
    replay_buffer: ReplayBuffer,
    exploration: EpsilonGreedy,
    rng: StdRng,
    config: AgentConfig,
    observation_shape: [usize; 3],
    train_steps: u64,
}

/// Bellman targets `r + gamma * max_a Q'(s', a)`, with terminal transitions
/// pinned to -1.
pub fn q_targets(rewards: &Tensor, future_q: &Tensor, dones: &Tensor, gamma: f64) -> Tensor {
    let updated = rewards + future_q.max_dim(1, false).0 * gamma;
    updated * (dones.ones_like() - dones) - dones
}

impl DqnAgent {
    pub fn new(
        config: AgentConfig,
        observation_shape: [usize; 3],
        num_actions: usize,
        device: Device,
        seed: u64,
    ) -> Result<Self> {
        config.validate()?;
        if num_actions == 0 {
            return Err(DqnError::Config(
                "the action space must not be empty".to_string(),
            ));
        }
        tch::manual_seed(seed as i64);

        let vs_main = VarStore::new(device);
        let q_network = QNetwork::new(&vs_main.root(), observation_shape, num_actions)?;

        let mut vs_target = VarStore::new(device);
        let target_network = QNetwork::new(&vs_target.root(), observation_shape, num_actions)?;
        vs_target.copy(&vs_main)?;
        vs_target.freeze();

        let optimizer = nn::Adam::default().build(&vs_main, config.learning_rate)?;
        debug!(?device, ?observation_shape, num_actions, "created agent");

        Ok(Self {
            q_network,
            target_network,
            vs_main,
            vs_target,
            optimizer,
            replay_buffer: ReplayBuffer::new(config.replay_capacity),
            exploration: EpsilonGreedy::new(&config),
            rng: StdRng::seed_from_u64(seed),
            config,
            observation_shape,
            train_steps: 0,
        })
    }

    pub fn device(&self) -> Device {
        self.vs_main.device()
    }

    pub fn num_actions(&self) -> usize {
        self.q_network.num_actions()
    }

    pub fn epsilon(&self) -> f64 {
        self.exploration.epsilon()
    }

    pub fn train_steps(&self) -> u64 {
        self.train_steps
    }

    /// Epsilon-greedy action for the current frame. Epsilon decays by one
    /// step on every call.
    pub fn act(&mut self, observation: &Observation, frame_count: u64) -> Result<usize> {
        let num_actions = self.num_actions();
        let draw: f64 = self.rng.random();
        let action = if self.exploration.should_explore(frame_count, draw) {
            self.rng.random_range(0..num_actions)
        } else {
            self.greedy_action(observation)?
        };
        self.exploration.decay();
        Ok(action)
    }

    /// Action with the highest predicted Q-value.
    pub fn greedy_action(&self, observation: &Observation) -> Result<usize> {
        let input = self.observations_tensor(&[observation])?;
        let q_values = tch::no_grad(|| self.q_network.forward(&input));
        Ok(q_values.argmax(1, false).int64_value(&[0]) as usize)
    }

    pub fn remember(&mut self, transition: Transition) {
        self.replay_buffer.push(transition);
    }

    /// Training only starts once the buffer holds more than one batch.
    pub fn can_train(&self) -> bool {
        self.replay_buffer.len() > self.config.batch_size
    }

    /// One gradient step on a uniformly sampled batch.
    /// Returns the Huber loss, or `None` while the buffer is too small.
    pub fn train_step(&mut self) -> Result<Option<f64>> {
        if !self.can_train() {
            return Ok(None);
        }
        let device = self.device();

        let (states, next_states, actions, rewards, dones) = {
            let batch = self
                .replay_buffer
                .sample(&mut self.rng, self.config.batch_size);

            let states: Vec<&Observation> = batch.iter().map(|t| &t.state).collect();
            let next_states: Vec<&Observation> = batch.iter().map(|t| &t.next_state).collect();
            let actions: Vec<i64> = batch.iter().map(|t| t.action as i64).collect();
            let rewards: Vec<f32> = batch.iter().map(|t| t.reward).collect();
            let dones: Vec<f32> = batch
                .iter()
                .map(|t| if t.done { 1.0 } else { 0.0 })
                .collect();

            (
                self.observations_tensor(&states)?,
                self.observations_tensor(&next_states)?,
                Tensor::from_slice(&actions).to(device),
                Tensor::from_slice(&rewards).to(device),
                Tensor::from_slice(&dones).to(device),
            )
        };

        let future_q = tch::no_grad(|| self.target_network.forward(&next_states));
        let targets = q_targets(&rewards, &future_q, &dones, self.config.gamma);

        let q_action = self
            .q_network
            .forward(&states)
            .gather(1, &actions.unsqueeze(1), false)
            .squeeze_dim(1);
        let loss = q_action.huber_loss(&targets, Reduction::Mean, 1.0);

        self.optimizer.zero_grad();
        loss.backward();
        self.clip_gradients()?;
        self.optimizer.step();

        self.train_steps += 1;
        Ok(Some(loss.double_value(&[])))
    }

    /// Rescale every gradient whose L2 norm exceeds `clip_norm`.
    fn clip_gradients(&self) -> Result<()> {
        let clip_norm = self.config.clip_norm;
        tch::no_grad(|| -> Result<()> {
            for var in self.vs_main.trainable_variables() {
                let mut grad = var.grad();
                if !grad.defined() {
                    continue;
                }
                let norm = grad.norm().double_value(&[]);
                if norm > clip_norm {
                    let _ = grad.f_mul_scalar_(clip_norm / norm)?;
                }
            }
            Ok(())
        })
    }

    /// Copy the online weights into the target network.
    pub fn update_target_network(&mut self) -> Result<()> {
        self.vs_target.copy(&self.vs_main)?;
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.vs_main.save(path)?;
        Ok(())
    }

    /// Load online weights and synchronise the target network with them.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.vs_main.load(path.as_ref())?;
        self.update_target_network()?;
        info!("loaded weights from {}", path.as_ref().display());
        Ok(())
    }

    fn observations_tensor(&self, observations: &[&Observation]) -> Result<Tensor> {
        let [channels, height, width] = self.observation_shape;
        let mut flat = Vec::with_capacity(observations.len() * channels * height * width);
        for observation in observations {
            if observation.shape() != self.observation_shape {
                return Err(DqnError::Shape {
                    expected: self.observation_shape,
                    actual: observation.shape(),
                });
            }
            observation.write_scaled(&mut flat);
        }

        Ok(Tensor::from_slice(&flat)
            .view([
                observations.len() as i64,
                channels as i64,
                height as i64,
                width as i64,
            ])
            .to_kind(Kind::Float)
            .to(self.device()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    const SHAPE: [usize; 3] = [4, 36, 36];

    fn test_config() -> AgentConfig {
        AgentConfig {
            batch_size: 4,
            replay_capacity: 16,
            epsilon_random_frames: 10,
            epsilon_greedy_frames: 100,
            ..AgentConfig::default()
        }
    }

    fn observation(value: u8) -> Observation {
        let frame: Rc<[u8]> = Rc::from(vec![value; 36 * 36]);
        Observation::new(vec![frame; 4], 36, 36).unwrap()
    }

    fn agent() -> DqnAgent {
        DqnAgent::new(test_config(), SHAPE, 3, Device::Cpu, 0).unwrap()
    }

    fn fill(agent: &mut DqnAgent, count: usize) {
        for i in 0..count {
            agent.remember(Transition {
                state: observation(i as u8 * 10),
                action: i % 3,
                reward: 1.0,
                next_state: observation(i as u8 * 10 + 5),
                done: i % 4 == 0,
            });
        }
    }

    fn backward_on_batch(agent: &mut DqnAgent) {
        let input = agent
            .observations_tensor(&[&observation(120), &observation(40)])
            .unwrap();
        agent.optimizer.zero_grad();
        agent.q_network.forward(&input).sum(Kind::Float).backward();
    }

    fn gradients(agent: &DqnAgent) -> Vec<Tensor> {
        agent
            .vs_main
            .trainable_variables()
            .iter()
            .map(|var| var.grad().copy())
            .collect()
    }

    #[test]
    fn test_q_targets_pin_terminal_transitions() {
        let rewards = Tensor::from_slice(&[1.0f32, 0.5]);
        let future = Tensor::from_slice(&[2.0f32, 4.0, 3.0, 1.0]).view([2, 2]);
        let dones = Tensor::from_slice(&[0.0f32, 1.0]);

        let targets = q_targets(&rewards, &future, &dones, 0.5);
        assert!((targets.double_value(&[0]) - 3.0).abs() < 1e-6);
        assert!((targets.double_value(&[1]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_act_returns_valid_action_and_decays_epsilon() {
        let mut agent = agent();
        let obs = observation(0);
        for frame in 0..20 {
            let action = agent.act(&obs, frame).unwrap();
            assert!(action < 3);
        }
        assert!((agent.epsilon() - (1.0 - 20.0 * 0.9 / 100.0)).abs() < 1e-9);
    }

    #[test]
    fn test_train_step_waits_for_more_than_one_batch() {
        let mut agent = agent();
        fill(&mut agent, 4);
        assert!(agent.train_step().unwrap().is_none());

        fill(&mut agent, 1);
        let loss = agent.train_step().unwrap().expect("buffer exceeds batch");
        assert!(loss.is_finite());
        assert_eq!(agent.train_steps(), 1);
    }

    #[test]
    fn test_target_network_follows_online_after_sync() {
        let mut agent = agent();
        fill(&mut agent, 8);
        agent.train_step().unwrap();

        let input = agent.observations_tensor(&[&observation(30)]).unwrap();
        let diff = |agent: &DqnAgent| {
            tch::no_grad(|| {
                (agent.q_network.forward(&input) - agent.target_network.forward(&input))
                    .abs()
                    .max()
                    .double_value(&[])
            })
        };
        assert!(diff(&agent) > 0.0);

        agent.update_target_network().unwrap();
        assert_eq!(diff(&agent), 0.0);
    }

    #[test]
    fn test_save_and_load_restore_greedy_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.ot");

        let mut trained = agent();
        fill(&mut trained, 8);
        trained.train_step().unwrap();
        trained.save(&path).unwrap();

        let mut restored = DqnAgent::new(test_config(), SHAPE, 3, Device::Cpu, 99).unwrap();
        restored.load(&path).unwrap();

        let obs = observation(70);
        assert_eq!(
            trained.greedy_action(&obs).unwrap(),
            restored.greedy_action(&obs).unwrap()
        );
    }

    #[test]
    fn test_greedy_action_rejects_wrong_shape() {
        let agent = agent();
        let frame: Rc<[u8]> = Rc::from(vec![0u8; 40 * 40]);
        let obs = Observation::new(vec![frame; 4], 40, 40).unwrap();
        assert!(matches!(
            agent.greedy_action(&obs),
            Err(DqnError::Shape { .. })
        ));
    }

    #[test]
    fn test_clip_gradients_bounds_each_tensor_norm() {
        let clip_norm = 1e-3;
        let config = AgentConfig {
            clip_norm,
            ..test_config()
        };
        let mut agent = DqnAgent::new(config, SHAPE, 3, Device::Cpu, 0).unwrap();
        backward_on_batch(&mut agent);

        let before = gradients(&agent);
        assert!(before
            .iter()
            .any(|grad| grad.norm().double_value(&[]) > clip_norm));

        agent.clip_gradients().unwrap();
        for (old, new) in before.iter().zip(gradients(&agent)) {
            let old_norm = old.norm().double_value(&[]);
            let new_norm = new.norm().double_value(&[]);
            if old_norm > clip_norm {
                assert!((new_norm - clip_norm).abs() < 1e-6, "norm {new_norm}");
            } else {
                assert_eq!(new_norm, old_norm);
            }
        }
    }

    #[test]
    fn test_clip_gradients_leaves_small_gradients_alone() {
        let config = AgentConfig {
            clip_norm: 1e9,
            ..test_config()
        };
        let mut agent = DqnAgent::new(config, SHAPE, 3, Device::Cpu, 0).unwrap();
        backward_on_batch(&mut agent);

        let before = gradients(&agent);
        agent.clip_gradients().unwrap();
        for (old, new) in before.iter().zip(gradients(&agent)) {
            assert_eq!((old - new).abs().max().double_value(&[]), 0.0);
        }
    }
}
