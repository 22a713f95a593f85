pub mod model;
pub mod traces;

/// Observation sequences read from one file, in file order.
#[derive(Debug, Clone, Default)]
pub struct Observations {
    pub sequences: Vec<Vec<f64>>,
}

impl Observations {
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Whether every sequence has the same number of frames.
    pub fn is_rectangular(&self) -> bool {
        self.sequences
            .windows(2)
            .all(|w| w[0].len() == w[1].len())
    }
}
