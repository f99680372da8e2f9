//! Adam optimiser over ndarray parameters

use ndarray::{Array, ArrayD, Dimension, IxDyn, Zip};
use std::collections::HashMap;

/// Adam with per-slot first/second moment buffers
#[derive(Debug, Clone)]
pub struct Adam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    t: i32,
    moments: HashMap<usize, (ArrayD<f64>, ArrayD<f64>)>,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            t: 0,
            moments: HashMap::new(),
        }
    }

    /// Advance the timestep; call once per mini-batch before `update`
    pub fn begin_step(&mut self) {
        self.t += 1;
    }

    pub fn steps(&self) -> i32 {
        self.t
    }

    /// Apply one update to `param` using `grad`. `slot` identifies the parameter.
    pub fn update<D: Dimension>(
        &mut self,
        slot: usize,
        param: &mut Array<f64, D>,
        grad: &Array<f64, D>,
    ) {
        let (lr, b1, b2, eps) = (self.learning_rate, self.beta1, self.beta2, self.epsilon);
        let t = self.t.max(1);
        let bias1 = 1.0 - b1.powi(t);
        let bias2 = 1.0 - b2.powi(t);

        let (m, v) = self.moments.entry(slot).or_insert_with(|| {
            (
                ArrayD::zeros(IxDyn(param.shape())),
                ArrayD::zeros(IxDyn(param.shape())),
            )
        });

        Zip::from(param.view_mut().into_dyn())
            .and(m)
            .and(v)
            .and(grad.view().into_dyn())
            .for_each(|p, m, v, &g| {
                *m = b1 * *m + (1.0 - b1) * g;
                *v = b2 * *v + (1.0 - b2) * g * g;
                let m_hat = *m / bias1;
                let v_hat = *v / bias2;
                *p -= lr * m_hat / (v_hat.sqrt() + eps);
            });
    }
}
