// Scalar-slice implementations of the core traits

use crate::core::traits::{Indexing, InnerProduct};
use num_traits::Float;

impl<T: Float + From<f64>> InnerProduct<[T]> for () {
    type Scalar = T;
    fn dot(&self, x: &[T], y: &[T]) -> T {
        assert_eq!(x.len(), y.len());
        x.iter()
            .zip(y.iter())
            .map(|(xi, yi)| *xi * *yi)
            .fold(T::zero(), |acc, v| acc + v)
    }
    fn norm(&self, x: &[T]) -> T {
        x.iter()
            .map(|xi| *xi * *xi)
            .fold(T::zero(), |acc, v| acc + v)
            .sqrt()
    }
}

impl<T> Indexing for Vec<T> {
    fn nrows(&self) -> usize {
        self.len()
    }
}

impl<T> Indexing for [T] {
    fn nrows(&self) -> usize {
        self.len()
    }
}
