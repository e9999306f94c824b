use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EarlyStopDecision {
    /// The loss improved on the best so far; the caller persists the model.
    Improved { previous: f64 },
    NoImprovement { counter: usize },
    Stop,
}

/// Stops training once the validation loss has failed to improve for
/// `patience` consecutive epochs.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    delta: f64,
    counter: usize,
    best: Option<f64>,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            delta: 0.0,
            counter: 0,
            best: None,
        }
    }

    pub fn with_delta(mut self, delta: f64) -> Self {
        self.delta = delta;
        self
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    pub fn counter(&self) -> usize {
        self.counter
    }

    pub fn check(&mut self, val_loss: f64) -> EarlyStopDecision {
        match self.best {
            Some(best) if val_loss >= best - self.delta => {
                self.counter += 1;
                info!("EarlyStopping counter: {} out of {}", self.counter, self.patience);
                if self.counter >= self.patience {
                    EarlyStopDecision::Stop
                } else {
                    EarlyStopDecision::NoImprovement {
                        counter: self.counter,
                    }
                }
            }
            previous => {
                self.best = Some(val_loss);
                self.counter = 0;
                EarlyStopDecision::Improved {
                    previous: previous.unwrap_or(f64::INFINITY),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_improves() {
        let mut stopping = EarlyStopping::new(3);

        assert_eq!(
            stopping.check(1.0),
            EarlyStopDecision::Improved {
                previous: f64::INFINITY
            }
        );
        assert_eq!(stopping.best(), Some(1.0));
    }

    #[test]
    fn stops_exactly_after_patience_non_improving_epochs() {
        let patience = 4;
        let mut stopping = EarlyStopping::new(patience);

        let losses: Vec<f64> = (0..patience + 1).map(|i| 1.0 + i as f64).collect();
        let stopped_at = losses
            .iter()
            .position(|loss| stopping.check(*loss) == EarlyStopDecision::Stop)
            .map(|index| index + 1);

        assert_eq!(stopped_at, Some(patience + 1));
        assert_eq!(stopping.counter(), patience);
    }

    #[test]
    fn improvement_resets_counter() {
        let mut stopping = EarlyStopping::new(2);

        stopping.check(1.0);
        assert_eq!(stopping.check(1.5), EarlyStopDecision::NoImprovement { counter: 1 });
        assert_eq!(stopping.check(0.5), EarlyStopDecision::Improved { previous: 1.0 });
        assert_eq!(stopping.counter(), 0);
    }

    #[test]
    fn delta_requires_a_margin() {
        let mut stopping = EarlyStopping::new(5).with_delta(0.1);

        stopping.check(1.0);

        assert_eq!(stopping.check(0.95), EarlyStopDecision::NoImprovement { counter: 1 });
    }
}
