//! Two-layer LSTM binary classifier
//!
//! Architecture: LSTM(h1, sequences) -> Dropout -> LSTM(h2, last state) -> Dropout
//! -> Dense(k, ReLU) -> Dense(1, sigmoid). Trained with full BPTT,
//! binary cross-entropy and Adam. Gate order inside every weight block is
//! input, forget, cell, output.

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::optimizer::Adam;
use super::{ModelError, NetworkConfig};

const PROB_EPS: f64 = 1e-7;

#[inline]
fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    let col = a.view().insert_axis(Axis(1));
    let row = b.view().insert_axis(Axis(0));
    col.dot(&row)
}

fn glorot(rows: usize, cols: usize, rng: &mut StdRng) -> Array2<f64> {
    let limit = (6.0 / (rows + cols) as f64).sqrt();
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-limit..limit))
}

/// Binary cross-entropy on a clamped probability
pub fn bce(p: f64, y: f64) -> f64 {
    let p = p.clamp(PROB_EPS, 1.0 - PROB_EPS);
    -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
}

// ============================================================================
// LSTM layer
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmLayer {
    pub hidden: usize,
    /// (4H x D)
    pub w: Array2<f64>,
    /// (4H x H)
    pub u: Array2<f64>,
    /// (4H)
    pub b: Array1<f64>,
}

struct StepCache {
    x: Array1<f64>,
    h_prev: Array1<f64>,
    c_prev: Array1<f64>,
    i: Array1<f64>,
    f: Array1<f64>,
    g: Array1<f64>,
    o: Array1<f64>,
    tanh_c: Array1<f64>,
}

#[derive(Debug, Clone)]
pub struct LstmGrads {
    pub w: Array2<f64>,
    pub u: Array2<f64>,
    pub b: Array1<f64>,
}

impl LstmGrads {
    fn zeros_like(layer: &LstmLayer) -> Self {
        Self {
            w: Array2::zeros(layer.w.raw_dim()),
            u: Array2::zeros(layer.u.raw_dim()),
            b: Array1::zeros(layer.b.raw_dim()),
        }
    }

    fn add(&mut self, other: &LstmGrads) {
        self.w += &other.w;
        self.u += &other.u;
        self.b += &other.b;
    }

    fn scale_and_clip(&mut self, factor: f64, clip: f64) {
        for v in self
            .w
            .iter_mut()
            .chain(self.u.iter_mut())
            .chain(self.b.iter_mut())
        {
            *v = (*v * factor).clamp(-clip, clip);
        }
    }
}

impl LstmLayer {
    pub fn new(input: usize, hidden: usize, rng: &mut StdRng) -> Self {
        let w = glorot(4 * hidden, input, rng);
        let rec_limit = (1.0 / hidden as f64).sqrt();
        let u = Array2::from_shape_fn((4 * hidden, hidden), |_| {
            rng.gen_range(-rec_limit..rec_limit)
        });
        let mut b = Array1::zeros(4 * hidden);
        b.slice_mut(s![hidden..2 * hidden]).fill(1.0);
        Self { hidden, w, u, b }
    }

    pub fn input_size(&self) -> usize {
        self.w.ncols()
    }

    fn forward(&self, xs: &[Array1<f64>]) -> (Vec<Array1<f64>>, Vec<StepCache>) {
        let h = self.hidden;
        let mut h_prev: Array1<f64> = Array1::zeros(h);
        let mut c_prev: Array1<f64> = Array1::zeros(h);
        let mut outputs = Vec::with_capacity(xs.len());
        let mut caches = Vec::with_capacity(xs.len());

        for x in xs {
            let z = self.w.dot(x) + self.u.dot(&h_prev) + &self.b;
            let i = z.slice(s![0..h]).mapv(sigmoid);
            let f = z.slice(s![h..2 * h]).mapv(sigmoid);
            let g = z.slice(s![2 * h..3 * h]).mapv(f64::tanh);
            let o = z.slice(s![3 * h..4 * h]).mapv(sigmoid);

            let c = &f * &c_prev + &i * &g;
            let tanh_c = c.mapv(f64::tanh);
            let h_t = &o * &tanh_c;

            caches.push(StepCache {
                x: x.clone(),
                h_prev: h_prev.clone(),
                c_prev: c_prev.clone(),
                i,
                f,
                g,
                o,
                tanh_c,
            });
            outputs.push(h_t.clone());
            h_prev = h_t;
            c_prev = c;
        }
        (outputs, caches)
    }

    /// BPTT. `dhs[t]` is the gradient arriving at h_t from above.
    /// Returns parameter gradients and the gradient w.r.t. every input x_t.
    fn backward(&self, caches: &[StepCache], dhs: &[Array1<f64>]) -> (LstmGrads, Vec<Array1<f64>>) {
        let h = self.hidden;
        let mut grads = LstmGrads::zeros_like(self);
        let mut dxs = vec![Array1::zeros(self.input_size()); caches.len()];
        let mut dh_next: Array1<f64> = Array1::zeros(h);
        let mut dc_next: Array1<f64> = Array1::zeros(h);
        let mut dz: Array1<f64> = Array1::zeros(4 * h);

        for t in (0..caches.len()).rev() {
            let cache = &caches[t];
            let dh = &dhs[t] + &dh_next;

            let d_o = &dh * &cache.tanh_c;
            let dc = &dh * &cache.o * &cache.tanh_c.mapv(|v| 1.0 - v * v) + &dc_next;
            let di = &dc * &cache.g;
            let dg = &dc * &cache.i;
            let df = &dc * &cache.c_prev;
            dc_next = &dc * &cache.f;

            dz.slice_mut(s![0..h])
                .assign(&(&di * &cache.i.mapv(|v| v * (1.0 - v))));
            dz.slice_mut(s![h..2 * h])
                .assign(&(&df * &cache.f.mapv(|v| v * (1.0 - v))));
            dz.slice_mut(s![2 * h..3 * h])
                .assign(&(&dg * &cache.g.mapv(|v| 1.0 - v * v)));
            dz.slice_mut(s![3 * h..4 * h])
                .assign(&(&d_o * &cache.o.mapv(|v| v * (1.0 - v))));

            grads.w += &outer(&dz, &cache.x);
            grads.u += &outer(&dz, &cache.h_prev);
            grads.b += &dz;

            dxs[t] = self.w.t().dot(&dz);
            dh_next = self.u.t().dot(&dz);
        }
        (grads, dxs)
    }
}

// ============================================================================
// Dense layer
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dense {
    /// (out x in)
    pub w: Array2<f64>,
    pub b: Array1<f64>,
}

impl Dense {
    pub fn new(input: usize, output: usize, rng: &mut StdRng) -> Self {
        Self {
            w: glorot(output, input, rng),
            b: Array1::zeros(output),
        }
    }

    fn forward(&self, x: &Array1<f64>) -> Array1<f64> {
        self.w.dot(x) + &self.b
    }
}

// ============================================================================
// Network
// ============================================================================

/// Per-sample dropout masks, already scaled by 1 / keep
struct DropoutMasks {
    seq: Vec<Array1<f64>>,
    last: Array1<f64>,
}

struct ForwardCache {
    caches1: Vec<StepCache>,
    caches2: Vec<StepCache>,
    h2_dropped: Array1<f64>,
    a1: Array1<f64>,
    r: Array1<f64>,
    p: f64,
}

#[derive(Debug, Clone)]
pub struct NetworkGrads {
    pub lstm1: LstmGrads,
    pub lstm2: LstmGrads,
    pub dense1_w: Array2<f64>,
    pub dense1_b: Array1<f64>,
    pub dense2_w: Array2<f64>,
    pub dense2_b: Array1<f64>,
}

impl NetworkGrads {
    fn zeros_like(net: &LstmNetwork) -> Self {
        Self {
            lstm1: LstmGrads::zeros_like(&net.lstm1),
            lstm2: LstmGrads::zeros_like(&net.lstm2),
            dense1_w: Array2::zeros(net.dense1.w.raw_dim()),
            dense1_b: Array1::zeros(net.dense1.b.raw_dim()),
            dense2_w: Array2::zeros(net.dense2.w.raw_dim()),
            dense2_b: Array1::zeros(net.dense2.b.raw_dim()),
        }
    }

    fn add(&mut self, other: &NetworkGrads) {
        self.lstm1.add(&other.lstm1);
        self.lstm2.add(&other.lstm2);
        self.dense1_w += &other.dense1_w;
        self.dense1_b += &other.dense1_b;
        self.dense2_w += &other.dense2_w;
        self.dense2_b += &other.dense2_b;
    }

    fn scale_and_clip(&mut self, factor: f64, clip: f64) {
        self.lstm1.scale_and_clip(factor, clip);
        self.lstm2.scale_and_clip(factor, clip);
        for v in self
            .dense1_w
            .iter_mut()
            .chain(self.dense1_b.iter_mut())
            .chain(self.dense2_w.iter_mut())
            .chain(self.dense2_b.iter_mut())
        {
            *v = (*v * factor).clamp(-clip, clip);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmNetwork {
    pub n_features: usize,
    pub dropout: f64,
    pub lstm1: LstmLayer,
    pub lstm2: LstmLayer,
    pub dense1: Dense,
    pub dense2: Dense,
}

impl LstmNetwork {
    pub fn new(n_features: usize, config: &NetworkConfig, rng: &mut StdRng) -> Self {
        let lstm1 = LstmLayer::new(n_features, config.hidden1, rng);
        let lstm2 = LstmLayer::new(config.hidden1, config.hidden2, rng);
        let dense1 = Dense::new(config.hidden2, config.dense_units, rng);
        let dense2 = Dense::new(config.dense_units, 1, rng);
        Self {
            n_features,
            dropout: config.dropout,
            lstm1,
            lstm2,
            dense1,
            dense2,
        }
    }

    /// Same layer sizes as `config` would build
    pub fn matches(&self, n_features: usize, config: &NetworkConfig) -> bool {
        self.n_features == n_features
            && self.lstm1.hidden == config.hidden1
            && self.lstm2.hidden == config.hidden2
            && self.dense1.b.len() == config.dense_units
    }

    pub fn parameter_count(&self) -> usize {
        self.lstm1.w.len()
            + self.lstm1.u.len()
            + self.lstm1.b.len()
            + self.lstm2.w.len()
            + self.lstm2.u.len()
            + self.lstm2.b.len()
            + self.dense1.w.len()
            + self.dense1.b.len()
            + self.dense2.w.len()
            + self.dense2.b.len()
    }

    fn rows(seq: ArrayView2<'_, f64>) -> Vec<Array1<f64>> {
        seq.outer_iter().map(|r: ArrayView1<'_, f64>| r.to_owned()).collect()
    }

    fn forward(&self, seq: ArrayView2<'_, f64>, masks: Option<&DropoutMasks>) -> ForwardCache {
        let xs = Self::rows(seq);
        let (h1s, caches1) = self.lstm1.forward(&xs);
        let h1s = match masks {
            Some(m) => h1s.iter().zip(&m.seq).map(|(h, k)| h * k).collect(),
            None => h1s,
        };
        let (h2s, caches2) = self.lstm2.forward(&h1s);
        let h2_last = h2s
            .last()
            .cloned()
            .unwrap_or_else(|| Array1::zeros(self.lstm2.hidden));
        let h2_dropped = match masks {
            Some(m) => &h2_last * &m.last,
            None => h2_last,
        };
        let a1 = self.dense1.forward(&h2_dropped);
        let r = a1.mapv(|v| v.max(0.0));
        let z = self.dense2.forward(&r);
        let p = sigmoid(z[0]);
        ForwardCache {
            caches1,
            caches2,
            h2_dropped,
            a1,
            r,
            p,
        }
    }

    fn backward(
        &self,
        cache: &ForwardCache,
        label: f64,
        masks: Option<&DropoutMasks>,
    ) -> NetworkGrads {
        let dz = Array1::from_elem(1, cache.p - label);
        let dense2_w = outer(&dz, &cache.r);
        let dense2_b = dz.clone();

        let dr = self.dense2.w.t().dot(&dz);
        let da1 = &dr * &cache.a1.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
        let dense1_w = outer(&da1, &cache.h2_dropped);
        let dense1_b = da1.clone();

        let mut dh2 = self.dense1.w.t().dot(&da1);
        if let Some(m) = masks {
            dh2 = &dh2 * &m.last;
        }

        let steps = cache.caches2.len();
        let mut dhs2 = vec![Array1::zeros(self.lstm2.hidden); steps];
        if let Some(last) = dhs2.last_mut() {
            *last = dh2;
        }
        let (lstm2, dx2) = self.lstm2.backward(&cache.caches2, &dhs2);

        let dhs1: Vec<Array1<f64>> = match masks {
            Some(m) => dx2.iter().zip(&m.seq).map(|(d, k)| d * k).collect(),
            None => dx2,
        };
        let (lstm1, _) = self.lstm1.backward(&cache.caches1, &dhs1);

        NetworkGrads {
            lstm1,
            lstm2,
            dense1_w,
            dense1_b,
            dense2_w,
            dense2_b,
        }
    }

    fn sample_masks(&self, steps: usize, rng: &mut StdRng) -> Option<DropoutMasks> {
        if self.dropout <= 0.0 {
            return None;
        }
        let keep = 1.0 - self.dropout;
        let mut draw = |n: usize| {
            Array1::from_shape_fn(n, |_| if rng.gen::<f64>() < keep { 1.0 / keep } else { 0.0 })
        };
        let seq = (0..steps).map(|_| draw(self.lstm1.hidden)).collect();
        let last = draw(self.lstm2.hidden);
        Some(DropoutMasks { seq, last })
    }

    /// P(label = 1) for one (T x D) sequence, no dropout
    pub fn predict(&self, seq: ArrayView2<'_, f64>) -> f64 {
        self.forward(seq, None).p
    }

    /// Loss and gradients for one sample without dropout
    pub fn loss_and_grads(&self, seq: ArrayView2<'_, f64>, label: f64) -> (f64, NetworkGrads) {
        let cache = self.forward(seq, None);
        let grads = self.backward(&cache, label, None);
        (bce(cache.p, label), grads)
    }

    fn apply(&mut self, grads: &NetworkGrads, adam: &mut Adam) {
        adam.begin_step();
        adam.update(0, &mut self.lstm1.w, &grads.lstm1.w);
        adam.update(1, &mut self.lstm1.u, &grads.lstm1.u);
        adam.update(2, &mut self.lstm1.b, &grads.lstm1.b);
        adam.update(3, &mut self.lstm2.w, &grads.lstm2.w);
        adam.update(4, &mut self.lstm2.u, &grads.lstm2.u);
        adam.update(5, &mut self.lstm2.b, &grads.lstm2.b);
        adam.update(6, &mut self.dense1.w, &grads.dense1_w);
        adam.update(7, &mut self.dense1.b, &grads.dense1_b);
        adam.update(8, &mut self.dense2.w, &grads.dense2_w);
        adam.update(9, &mut self.dense2.b, &grads.dense2_b);
    }

    /// One shuffled pass over the samples. Returns the mean training loss.
    pub fn train_epoch(
        &mut self,
        sequences: &[Array2<f64>],
        labels: &[f64],
        batch_size: usize,
        grad_clip: f64,
        adam: &mut Adam,
        rng: &mut StdRng,
    ) -> Result<f64, ModelError> {
        if sequences.len() != labels.len() {
            return Err(ModelError::ShapeMismatch {
                expected: sequences.len(),
                got: labels.len(),
            });
        }
        if sequences.is_empty() {
            return Err(ModelError::NotEnoughData { needed: 1, got: 0 });
        }
        if let Some(seq) = sequences.iter().find(|s| s.ncols() != self.n_features) {
            return Err(ModelError::ShapeMismatch {
                expected: self.n_features,
                got: seq.ncols(),
            });
        }

        let mut order: Vec<usize> = (0..sequences.len()).collect();
        order.shuffle(rng);

        let mut total_loss = 0.0;
        for batch in order.chunks(batch_size.max(1)) {
            let mut acc = NetworkGrads::zeros_like(self);
            for &idx in batch {
                let seq = sequences[idx].view();
                let masks = self.sample_masks(seq.nrows(), rng);
                let cache = self.forward(seq, masks.as_ref());
                let grads = self.backward(&cache, labels[idx], masks.as_ref());
                total_loss += bce(cache.p, labels[idx]);
                acc.add(&grads);
            }
            acc.scale_and_clip(1.0 / batch.len() as f64, grad_clip);
            self.apply(&acc, adam);
        }

        let mean = total_loss / sequences.len() as f64;
        if !mean.is_finite() {
            return Err(ModelError::Diverged);
        }
        Ok(mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn tiny_config() -> NetworkConfig {
        NetworkConfig {
            hidden1: 3,
            hidden2: 2,
            dense_units: 2,
            dropout: 0.0,
            learning_rate: 0.01,
            batch_size: 8,
            grad_clip: 5.0,
            seed: 7,
        }
    }

    fn param(net: &mut LstmNetwork, which: usize) -> &mut f64 {
        match which {
            0 => &mut net.lstm1.w[[0, 0]],
            1 => &mut net.lstm1.u[[5, 1]],
            2 => &mut net.lstm1.b[4],
            3 => &mut net.lstm2.w[[3, 2]],
            4 => &mut net.lstm2.u[[7, 1]],
            5 => &mut net.dense1.w[[1, 0]],
            6 => &mut net.dense2.w[[0, 1]],
            _ => &mut net.dense2.b[0],
        }
    }

    fn grad(g: &NetworkGrads, which: usize) -> f64 {
        match which {
            0 => g.lstm1.w[[0, 0]],
            1 => g.lstm1.u[[5, 1]],
            2 => g.lstm1.b[4],
            3 => g.lstm2.w[[3, 2]],
            4 => g.lstm2.u[[7, 1]],
            5 => g.dense1_w[[1, 0]],
            6 => g.dense2_w[[0, 1]],
            _ => g.dense2_b[0],
        }
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut net = LstmNetwork::new(2, &tiny_config(), &mut rng);
        let seq = Array2::from_shape_fn((4, 2), |_| rng.gen_range(-1.0..1.0));
        let label = 1.0;

        let (_, analytic) = net.loss_and_grads(seq.view(), label);
        let eps = 1e-6;
        for which in 0..8 {
            let original = *param(&mut net, which);
            *param(&mut net, which) = original + eps;
            let (plus, _) = net.loss_and_grads(seq.view(), label);
            *param(&mut net, which) = original - eps;
            let (minus, _) = net.loss_and_grads(seq.view(), label);
            *param(&mut net, which) = original;

            let numeric = (plus - minus) / (2.0 * eps);
            let exact = grad(&analytic, which);
            let tol = 1e-6 + 1e-4 * numeric.abs().max(exact.abs());
            assert!(
                (numeric - exact).abs() < tol,
                "param {which}: numeric {numeric} vs analytic {exact}"
            );
        }
    }

    #[test]
    fn test_training_reduces_loss() {
        let mut rng = StdRng::seed_from_u64(3);
        let cfg = NetworkConfig {
            hidden1: 8,
            hidden2: 4,
            dense_units: 4,
            dropout: 0.0,
            learning_rate: 0.01,
            batch_size: 16,
            grad_clip: 1.0,
            seed: 3,
        };
        let mut net = LstmNetwork::new(1, &cfg, &mut rng);

        let mut sequences = Vec::new();
        let mut labels = Vec::new();
        for _ in 0..200 {
            let level: f64 = rng.gen_range(0.0..1.0);
            sequences.push(Array2::from_elem((5, 1), level));
            labels.push(if level > 0.5 { 1.0 } else { 0.0 });
        }

        let mut adam = Adam::new(cfg.learning_rate);
        let mut losses = Vec::new();
        for _ in 0..30 {
            losses.push(
                net.train_epoch(&sequences, &labels, cfg.batch_size, cfg.grad_clip, &mut adam, &mut rng)
                    .unwrap(),
            );
        }
        assert!(losses[29] < losses[0], "losses: {losses:?}");
    }

    #[test]
    fn test_predict_is_probability_and_deterministic() {
        let mut rng = StdRng::seed_from_u64(5);
        let net = LstmNetwork::new(3, &NetworkConfig::default(), &mut rng);
        let seq = Array2::from_shape_fn((10, 3), |(t, j)| (t + j) as f64 / 10.0);
        let p = net.predict(seq.view());
        assert!(p > 0.0 && p < 1.0);
        assert_eq!(p, net.predict(seq.view()));
    }

    #[test]
    fn test_parameter_count() {
        let mut rng = StdRng::seed_from_u64(1);
        let net = LstmNetwork::new(2, &tiny_config(), &mut rng);
        // lstm1 12x2 + 12x3 + 12, lstm2 8x3 + 8x2 + 8, dense 2x2 + 2, 1x2 + 1
        assert_eq!(net.parameter_count(), 72 + 48 + 6 + 3);
    }

    #[test]
    fn test_train_epoch_rejects_wrong_width() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut net = LstmNetwork::new(2, &tiny_config(), &mut rng);
        let mut adam = Adam::new(0.01);
        let err = net
            .train_epoch(&[Array2::zeros((4, 3))], &[1.0], 8, 1.0, &mut adam, &mut rng)
            .unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { expected: 2, got: 3 }));
    }
}
