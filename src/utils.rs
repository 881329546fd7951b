//! Common utilities used across the crate.

use rayon::prelude::*;

/// Whether parallel execution is allowed.
///
/// This is a simple boolean flag passed into lowered tensor modules.
/// When `Parallel`, modules may fan batch rows out over `rayon`.
/// When `Sequential`, modules must iterate in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parallelism {
    Sequential,
    Parallel,
}

impl Parallelism {
    /// Returns `true` if parallel execution is allowed.
    #[inline]
    pub fn is_parallel(self) -> bool {
        matches!(self, Parallelism::Parallel)
    }

    /// Apply `f` to each `chunk_size`-sized chunk of `data` along with its
    /// chunk index, in parallel when allowed.
    ///
    /// The chunk index equals the batch row index when `data` is a
    /// row-major buffer and `chunk_size` is the row width.
    #[inline]
    pub fn maybe_par_chunks_mut<T, F>(self, data: &mut [T], chunk_size: usize, f: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync,
    {
        assert!(chunk_size > 0, "chunk_size must be > 0");
        if self.is_parallel() {
            data.par_chunks_mut(chunk_size)
                .enumerate()
                .for_each(|(i, chunk)| f(i, chunk));
        } else {
            data.chunks_mut(chunk_size)
                .enumerate()
                .for_each(|(i, chunk)| f(i, chunk));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parallelism_flags() {
        assert!(Parallelism::Parallel.is_parallel());
        assert!(!Parallelism::Sequential.is_parallel());
    }

    #[test]
    fn chunked_iteration_matches_sequential() {
        let mut seq = vec![0.0f32; 12];
        let mut par = vec![0.0f32; 12];
        Parallelism::Sequential.maybe_par_chunks_mut(&mut seq, 3, |i, row| {
            for v in row.iter_mut() {
                *v = i as f32;
            }
        });
        Parallelism::Parallel.maybe_par_chunks_mut(&mut par, 3, |i, row| {
            for v in row.iter_mut() {
                *v = i as f32;
            }
        });
        assert_eq!(seq, par);
        assert_eq!(seq[0..3], [0.0, 0.0, 0.0]);
        assert_eq!(seq[9..12], [3.0, 3.0, 3.0]);
    }
}
