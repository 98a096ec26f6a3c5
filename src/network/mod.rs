mod arena;
mod partition;

use std::ops::Range;

use rand::Rng;

pub(crate) use arena::PhaseBuf;
pub(crate) use partition::partition;

use crate::{
    config::NetworkShape,
    error::{EngineErr, Result},
};

pub(crate) fn sigmoid(z: f32) -> f32 {
    1. / (1. + (-z).exp())
}

/// One MLP instance: flat weights, flat per-layer activations and the delta
/// buffers backpropagation fills in.
///
/// Buffer layout: activations are `[input | hidden | output]`; weights are
/// the input->hidden matrix followed by the hidden->output matrix, row-major
/// by destination neuron. The per-layer bias is a constant added to every
/// weighted sum, it carries no trainable weight.
///
/// The network is created once per run and mutated in place: workers write
/// disjoint activation/delta ranges inside a phase, the master writes
/// weights and inputs only between phases. The gates order one against the
/// other.
pub struct Network {
    shape: NetworkShape,
    weights: PhaseBuf,
    activations: PhaseBuf,
    hidden_deltas: PhaseBuf,
    output_deltas: PhaseBuf,
}

impl Network {
    /// Creates a network with weights drawn uniformly from `-0.5..0.5`.
    ///
    /// # Errors
    /// Returns `EmptyLayer` if any layer has zero neurons.
    pub fn new<R: Rng>(shape: NetworkShape, rng: &mut R) -> Result<Self> {
        let weights = (0..shape.weight_count())
            .map(|_| rng.random_range(-0.5..0.5))
            .collect();
        Self::from_weights(shape, weights)
    }

    /// Creates a network from caller-provided weights.
    ///
    /// # Errors
    /// Returns `EmptyLayer` on a degenerate shape, or `ShapeMismatch` when
    /// `weights` doesn't have exactly `in*hid + hid*out` entries.
    pub fn from_weights(shape: NetworkShape, weights: Vec<f32>) -> Result<Self> {
        shape.validate()?;
        if weights.len() != shape.weight_count() {
            return Err(EngineErr::ShapeMismatch {
                what: "weights",
                got: weights.len(),
                expected: shape.weight_count(),
            });
        }

        let net = Self {
            shape,
            weights: PhaseBuf::new(weights.len()),
            activations: PhaseBuf::new(shape.input() + shape.hidden() + shape.output()),
            hidden_deltas: PhaseBuf::new(shape.hidden()),
            output_deltas: PhaseBuf::new(shape.output()),
        };

        // SAFETY: `net` hasn't been shared with any thread yet.
        unsafe { net.weights.slice_mut(0..weights.len()) }.copy_from_slice(&weights);
        Ok(net)
    }

    pub fn shape(&self) -> &NetworkShape {
        &self.shape
    }

    /// Copies the current weights out.
    ///
    /// Call only between phases, while every worker is parked at the start
    /// checkpoint.
    pub fn weights_snapshot(&self) -> Vec<f32> {
        // SAFETY: Between phases the master is the only party touching the
        //         weight buffer.
        unsafe { self.weights.slice(0..self.shape.weight_count()) }.to_vec()
    }

    /// Writes a feature vector into the input segment. Master-only, between
    /// phases.
    ///
    /// # Errors
    /// Returns `ShapeMismatch` when `features` isn't input-sized.
    pub(crate) fn set_input(&self, features: &[f32]) -> Result<()> {
        if features.len() != self.shape.input() {
            return Err(EngineErr::ShapeMismatch {
                what: "features",
                got: features.len(),
                expected: self.shape.input(),
            });
        }

        // SAFETY: Workers are parked outside any phase, the master owns the
        //         whole arena.
        unsafe { self.activations.slice_mut(0..features.len()) }.copy_from_slice(features);
        Ok(())
    }

    /// Copies the output activations out. Master-only, after the forward
    /// phase has been collected.
    pub(crate) fn output(&self) -> Vec<f32> {
        let base = self.shape.input() + self.shape.hidden();
        // SAFETY: The forward completion toll has been paid, so every
        //         worker's output writes are published and none is pending.
        unsafe { self.activations.slice(base..base + self.shape.output()) }.to_vec()
    }

    /// Adds an accumulated weight update in place. Master-only, between
    /// phases; the learning rate is already baked into `update`.
    ///
    /// # Errors
    /// Returns `ShapeMismatch` when `update` isn't weight-sized.
    pub(crate) fn apply_update(&self, update: &[f32]) -> Result<()> {
        if update.len() != self.shape.weight_count() {
            return Err(EngineErr::ShapeMismatch {
                what: "weight update",
                got: update.len(),
                expected: self.shape.weight_count(),
            });
        }

        // SAFETY: Workers are parked outside any phase, the master owns the
        //         weight buffer. The next start grant publishes the change.
        let weights = unsafe { self.weights.slice_mut(0..update.len()) };
        weights.iter_mut().zip(update).for_each(|(w, u)| *w += u);
        Ok(())
    }

    /// Sigmoid-activates the hidden neurons in `range`.
    ///
    /// Caller must own `range` within the hidden layer for this phase.
    pub(crate) fn forward_hidden(&self, range: Range<usize>) {
        let input_n = self.shape.input();
        let hidden_base = input_n;

        // SAFETY: The input segment was written before this phase opened,
        //         the hidden slice is this caller's disjoint assignment and
        //         no weight write happens inside a phase.
        let input = unsafe { self.activations.slice(0..input_n) };
        let hidden = unsafe {
            self.activations
                .slice_mut(hidden_base + range.start..hidden_base + range.end)
        };
        let weights = unsafe { self.weights.slice(0..self.shape.weight_count()) };

        for (j, slot) in range.zip(hidden) {
            let row = &weights[j * input_n..(j + 1) * input_n];
            let sum: f32 = row.iter().zip(input).map(|(w, a)| w * a).sum();
            *slot = sigmoid(sum + self.shape.hidden_bias);
        }
    }

    /// Sigmoid-activates the output neurons in `range`.
    ///
    /// Caller must own `range` within the output layer, and every hidden
    /// activation must already be published (the intra-forward checkpoint).
    pub(crate) fn forward_output(&self, range: Range<usize>) {
        let (input_n, hidden_n) = (self.shape.input(), self.shape.hidden());
        let output_base = input_n + hidden_n;
        let ho_base = input_n * hidden_n;

        // SAFETY: Hidden activations were published by the hidden-done
        //         grant; the output slice is this caller's assignment.
        let hidden = unsafe { self.activations.slice(input_n..input_n + hidden_n) };
        let output = unsafe {
            self.activations
                .slice_mut(output_base + range.start..output_base + range.end)
        };
        let weights = unsafe { self.weights.slice(0..self.shape.weight_count()) };

        for (k, slot) in range.zip(output) {
            let row = &weights[ho_base + k * hidden_n..ho_base + (k + 1) * hidden_n];
            let sum: f32 = row.iter().zip(hidden).map(|(w, a)| w * a).sum();
            *slot = sigmoid(sum + self.shape.output_bias);
        }
    }

    /// Computes output deltas for `range` against `target` and accumulates
    /// the hidden->output weight contributions into `grad`
    /// (`learning_rate * delta * upstream_activation`).
    ///
    /// `grad` is the caller's private buffer; `range` is its output-layer
    /// assignment.
    pub(crate) fn backward_output(&self, range: Range<usize>, target: &[f32], grad: &mut [f32]) {
        let (input_n, hidden_n) = (self.shape.input(), self.shape.hidden());
        let output_base = input_n + hidden_n;
        let ho_base = input_n * hidden_n;
        let rate = self.shape.learning_rate;

        // SAFETY: Activations are stable during backward; the delta slice
        //         is this caller's disjoint assignment.
        let hidden = unsafe { self.activations.slice(input_n..input_n + hidden_n) };
        let deltas = unsafe { self.output_deltas.slice_mut(range.clone()) };

        for (k, delta) in range.zip(deltas) {
            // SAFETY: `output_base + k` lies in this caller's output range.
            let out = unsafe { self.activations.get(output_base + k) };
            let d = (target[k] - out) * out * (1. - out);
            *delta = d;

            let row = &mut grad[ho_base + k * hidden_n..ho_base + (k + 1) * hidden_n];
            for (slot, h) in row.iter_mut().zip(hidden) {
                *slot += rate * d * h;
            }
        }
    }

    /// Computes hidden deltas for `range` by folding the downstream output
    /// deltas back through the hidden->output weights, and accumulates the
    /// input->hidden weight contributions into `grad`.
    ///
    /// Every output delta must already be published (the intra-backward
    /// checkpoint).
    pub(crate) fn backward_hidden(&self, range: Range<usize>, grad: &mut [f32]) {
        let (input_n, hidden_n, output_n) =
            (self.shape.input(), self.shape.hidden(), self.shape.output());
        let ho_base = input_n * hidden_n;
        let rate = self.shape.learning_rate;

        // SAFETY: Output deltas were published by the output-delta grant;
        //         the hidden-delta slice is this caller's assignment.
        let input = unsafe { self.activations.slice(0..input_n) };
        let output_deltas = unsafe { self.output_deltas.slice(0..output_n) };
        let deltas = unsafe { self.hidden_deltas.slice_mut(range.clone()) };
        let weights = unsafe { self.weights.slice(0..self.shape.weight_count()) };

        for (j, delta) in range.zip(deltas) {
            // SAFETY: `input_n + j` lies in this caller's hidden range.
            let h = unsafe { self.activations.get(input_n + j) };
            let downstream: f32 = output_deltas
                .iter()
                .enumerate()
                .map(|(k, d)| d * weights[ho_base + k * hidden_n + j])
                .sum();
            let d = downstream * h * (1. - h);
            *delta = d;

            let row = &mut grad[j * input_n..(j + 1) * input_n];
            for (slot, a) in row.iter_mut().zip(input) {
                *slot += rate * d * a;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> NetworkShape {
        NetworkShape {
            layer_sizes: [2, 2, 1],
            learning_rate: 1.,
            hidden_bias: 0.,
            output_bias: 0.,
        }
    }

    fn net() -> Network {
        // ih = [[0.1, 0.2], [0.3, 0.4]], ho = [[0.5, 0.6]]
        Network::from_weights(shape(), vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]).unwrap()
    }

    #[test]
    fn test_weight_length_is_enforced() {
        assert!(matches!(
            Network::from_weights(shape(), vec![0.; 5]),
            Err(EngineErr::ShapeMismatch {
                what: "weights",
                got: 5,
                expected: 6,
            })
        ));
    }

    #[test]
    fn test_forward_matches_hand_computation() {
        let net = net();
        net.set_input(&[1., 0.5]).unwrap();
        net.forward_hidden(0..2);
        net.forward_output(0..1);

        let h0 = sigmoid(0.1 * 1. + 0.2 * 0.5);
        let h1 = sigmoid(0.3 * 1. + 0.4 * 0.5);
        let out = sigmoid(0.5 * h0 + 0.6 * h1);
        assert!((net.output()[0] - out).abs() < 1e-6);
    }

    #[test]
    fn test_backward_matches_the_delta_rule() {
        let net = net();
        net.set_input(&[1., 0.5]).unwrap();
        net.forward_hidden(0..2);
        net.forward_output(0..1);

        let mut grad = vec![0.; 6];
        net.backward_output(0..1, &[1.], &mut grad);
        net.backward_hidden(0..2, &mut grad);

        let h0 = sigmoid(0.1 * 1. + 0.2 * 0.5);
        let h1 = sigmoid(0.3 * 1. + 0.4 * 0.5);
        let out = sigmoid(0.5 * h0 + 0.6 * h1);
        let d_out = (1. - out) * out * (1. - out);
        let d_h0 = d_out * 0.5 * h0 * (1. - h0);
        let d_h1 = d_out * 0.6 * h1 * (1. - h1);

        let expected = [d_h0 * 1., d_h0 * 0.5, d_h1 * 1., d_h1 * 0.5, d_out * h0, d_out * h1];
        for (got, want) in grad.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "got {got}, want {want}");
        }
    }

    #[test]
    fn test_apply_update_adds_in_place() {
        let net = net();
        net.apply_update(&[1., 0., 0., 0., 0., -1.]).unwrap();

        let expected = [1.1, 0.2, 0.3, 0.4, 0.5, -0.4];
        for (got, want) in net.weights_snapshot().iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "got {got}, want {want}");
        }

        assert!(matches!(
            net.apply_update(&[0.; 3]),
            Err(EngineErr::ShapeMismatch { .. })
        ));
    }
}
