use crate::error::{EngineErr, Result};

/// Fixed three-layer network shape plus its update constants.
///
/// `layer_sizes` is `[input, hidden, output]`. The biases are per-layer
/// constants added to every weighted sum of the corresponding layer; they
/// carry no trainable weights.
#[derive(Debug, Clone, Copy)]
pub struct NetworkShape {
    pub layer_sizes: [usize; 3],
    pub learning_rate: f32,
    pub hidden_bias: f32,
    pub output_bias: f32,
}

impl NetworkShape {
    pub fn input(&self) -> usize {
        self.layer_sizes[0]
    }

    pub fn hidden(&self) -> usize {
        self.layer_sizes[1]
    }

    pub fn output(&self) -> usize {
        self.layer_sizes[2]
    }

    /// Total weight count: one input->hidden matrix plus one hidden->output
    /// matrix, both row-major by destination neuron.
    pub fn weight_count(&self) -> usize {
        self.input() * self.hidden() + self.hidden() * self.output()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        for (size, layer) in self.layer_sizes.into_iter().zip(["input", "hidden", "output"]) {
            if size == 0 {
                return Err(EngineErr::EmptyLayer { layer });
            }
        }

        Ok(())
    }
}

/// Execution bounds for one training run.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub shape: NetworkShape,
    pub worker_count: usize,
}

impl EngineConfig {
    /// Checks the configuration before any thread or buffer is created.
    ///
    /// # Errors
    /// Returns `ZeroWorkers` or `EmptyLayer`; both are fatal, the pool must
    /// not be built from a bad configuration.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(EngineErr::ZeroWorkers);
        }

        self.shape.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> NetworkShape {
        NetworkShape {
            layer_sizes: [2, 3, 1],
            learning_rate: 0.5,
            hidden_bias: 1.,
            output_bias: 1.,
        }
    }

    #[test]
    fn test_weight_count_covers_both_matrices() {
        assert_eq!(shape().weight_count(), 2 * 3 + 3 * 1);
    }

    #[test]
    fn test_zero_workers_is_fatal() {
        let config = EngineConfig {
            shape: shape(),
            worker_count: 0,
        };
        assert!(matches!(config.validate(), Err(EngineErr::ZeroWorkers)));
    }

    #[test]
    fn test_empty_layer_is_fatal() {
        let mut bad = shape();
        bad.layer_sizes[1] = 0;
        let config = EngineConfig {
            shape: bad,
            worker_count: 2,
        };
        assert!(matches!(
            config.validate(),
            Err(EngineErr::EmptyLayer { layer: "hidden" })
        ));
    }
}
