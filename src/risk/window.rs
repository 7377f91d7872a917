//! Bounded FIFO of recent predictions and their realised outcomes.

use std::collections::VecDeque;

use crate::core::Direction;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub predicted: Direction,
    pub outcome: Direction,
    pub ret: f64,
}

impl Prediction {
    pub fn is_correct(&self) -> bool {
        self.predicted == self.outcome
    }
}

#[derive(Debug, Clone)]
pub struct PredictionWindow {
    capacity: usize,
    entries: VecDeque<Prediction>,
}

impl PredictionWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Append, evicting the oldest entry once full.
    pub fn push(&mut self, prediction: Prediction) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(prediction);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn returns(&self) -> impl Iterator<Item = f64> + '_ {
        self.entries.iter().map(|p| p.ret)
    }

    pub fn correct(&self) -> usize {
        self.entries.iter().filter(|p| p.is_correct()).count()
    }
}
