use std::collections::VecDeque;

use rand::Rng;

use crate::environment::Observation;

#[derive(Debug, Clone)]
pub struct Transition {
    pub state: Observation,
    pub action: usize,
    pub reward: f32,
    pub next_state: Observation,
    pub done: bool,
}

/// Bounded FIFO of past transitions.
#[derive(Debug)]
pub struct ReplayBuffer {
    transitions: VecDeque<Transition>,
    capacity: usize,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            transitions: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a transition, dropping the oldest one once over capacity.
    pub fn push(&mut self, transition: Transition) {
        self.transitions.push_back(transition);
        if self.transitions.len() > self.capacity {
            self.transitions.pop_front();
        }
    }

    /// Draw `batch_size` transitions uniformly, with replacement.
    /// Returns an empty batch when the buffer is empty.
    pub fn sample<R: Rng>(&self, rng: &mut R, batch_size: usize) -> Vec<&Transition> {
        if self.transitions.is_empty() {
            return Vec::new();
        }
        (0..batch_size)
            .map(|_| &self.transitions[rng.random_range(0..self.transitions.len())])
            .collect()
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use std::rc::Rc;

    fn transition(action: usize) -> Transition {
        let frame: Rc<[u8]> = Rc::from(vec![action as u8; 4]);
        let obs = Observation::new(vec![frame], 2, 2).unwrap();
        Transition {
            state: obs.clone(),
            action,
            reward: 0.0,
            next_state: obs,
            done: false,
        }
    }

    #[test]
    fn test_push_drops_oldest_when_full() {
        let mut buffer = ReplayBuffer::new(3);
        for action in 0..5 {
            buffer.push(transition(action));
        }
        assert_eq!(buffer.len(), 3);
        let actions: Vec<usize> = buffer.transitions.iter().map(|t| t.action).collect();
        assert_eq!(actions, vec![2, 3, 4]);
    }

    #[test]
    fn test_sample_returns_requested_batch_with_replacement() {
        let mut buffer = ReplayBuffer::new(10);
        buffer.push(transition(0));
        buffer.push(transition(1));

        let mut rng = StdRng::seed_from_u64(1);
        let batch = buffer.sample(&mut rng, 8);
        assert_eq!(batch.len(), 8);
        assert!(batch.iter().all(|t| t.action < 2));
    }

    #[test]
    fn test_sample_from_empty_buffer() {
        let buffer = ReplayBuffer::new(4);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(buffer.is_empty());
        assert!(buffer.sample(&mut rng, 4).is_empty());
    }
}
