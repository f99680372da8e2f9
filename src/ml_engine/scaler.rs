//! Min-max feature scaler

use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::ModelError;

/// Per-column min-max scaling to [0, 1]. Constant columns map to 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub min: Array1<f64>,
    pub max: Array1<f64>,
}

impl MinMaxScaler {
    /// Fit on the rows of `data`
    pub fn fit(data: ArrayView2<'_, f64>) -> Result<Self, ModelError> {
        if data.nrows() == 0 {
            return Err(ModelError::NotEnoughData { needed: 1, got: 0 });
        }
        let min = data.fold_axis(Axis(0), f64::INFINITY, |&a, &b| a.min(b));
        let max = data.fold_axis(Axis(0), f64::NEG_INFINITY, |&a, &b| a.max(b));
        Ok(Self { min, max })
    }

    pub fn n_features(&self) -> usize {
        self.min.len()
    }

    pub fn transform(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>, ModelError> {
        if data.ncols() != self.n_features() {
            return Err(ModelError::ShapeMismatch {
                expected: self.n_features(),
                got: data.ncols(),
            });
        }
        let mut out = data.to_owned();
        for (j, mut col) in out.axis_iter_mut(Axis(1)).enumerate() {
            let range = self.max[j] - self.min[j];
            if range.abs() < f64::EPSILON {
                col.fill(0.0);
            } else {
                let lo = self.min[j];
                col.mapv_inplace(|v| (v - lo) / range);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_fit_transform() {
        let data = array![[1.0, 10.0, 5.0], [3.0, 20.0, 5.0], [2.0, 15.0, 5.0]];
        let scaler = MinMaxScaler::fit(data.view()).unwrap();
        let scaled = scaler.transform(data.view()).unwrap();
        assert_eq!(scaled[[0, 0]], 0.0);
        assert_eq!(scaled[[1, 0]], 1.0);
        assert_eq!(scaled[[2, 1]], 0.5);
        // Constant column
        assert_eq!(scaled[[1, 2]], 0.0);
    }

    #[test]
    fn test_transform_outside_fit_range_is_not_clipped() {
        let train = array![[0.0], [10.0]];
        let scaler = MinMaxScaler::fit(train.view()).unwrap();
        let live = array![[20.0]];
        assert_eq!(scaler.transform(live.view()).unwrap()[[0, 0]], 2.0);
    }

    #[test]
    fn test_shape_mismatch() {
        let scaler = MinMaxScaler::fit(array![[0.0, 1.0]].view()).unwrap();
        assert!(matches!(
            scaler.transform(array![[0.0]].view()),
            Err(ModelError::ShapeMismatch { .. })
        ));
    }
}
