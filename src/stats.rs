use std::collections::VecDeque;

/// The most recent episode rewards, used for the running reward.
#[derive(Debug, Clone)]
pub struct RewardHistory {
    rewards: VecDeque<f64>,
    capacity: usize,
}

impl RewardHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            rewards: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, reward: f64) {
        self.rewards.push_back(reward);
        if self.rewards.len() > self.capacity {
            self.rewards.pop_front();
        }
    }

    /// Mean of the kept rewards, 0 when nothing has been recorded.
    pub fn mean(&self) -> f64 {
        if self.rewards.is_empty() {
            return 0.0;
        }
        self.rewards.iter().sum::<f64>() / self.rewards.len() as f64
    }

    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }
}
