// src/cg.rs
//
// Preconditioned conjugate gradients as an explicit state machine.
//
// The iterator knows nothing about tolerances: each `step()` performs one PCG update and
// reports the new residual norm; the caller decides when to stop. A breakdown (non-positive
// curvature d^T A d, or non-finite scalars) ends the iteration with `None`.

/// Anything that maps a vector to a vector of the same length.
pub trait LinearOperator {
    fn apply(&self, x: &[f64]) -> Vec<f64>;
}

impl<F> LinearOperator for F
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    fn apply(&self, x: &[f64]) -> Vec<f64> {
        self(x)
    }
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub(crate) fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

/// State after one iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CgStep {
    /// 1-based count of completed iterations.
    pub iteration: usize,
    /// Euclidean norm of the recursively updated residual.
    pub residual_norm: f64,
    /// r^T M r after the update.
    pub delta: f64,
}

pub struct ConjugateGradient<A, M> {
    op: A,
    precond: M,
    x: Vec<f64>,
    r: Vec<f64>,
    d: Vec<f64>,
    delta: f64,
    iteration: usize,
    broken_down: bool,
}

impl<A: LinearOperator, M: LinearOperator> ConjugateGradient<A, M> {
    /// r = b - A x0, d = M r. A zero start vector is used when `x0` is None.
    pub fn new(op: A, b: &[f64], precond: M, x0: Option<Vec<f64>>) -> Self {
        let (x, r) = match x0 {
            Some(x) => {
                debug_assert_eq!(x.len(), b.len());
                let ax = op.apply(&x);
                let r = b.iter().zip(&ax).map(|(bi, ai)| bi - ai).collect();
                (x, r)
            }
            None => (vec![0.0; b.len()], b.to_vec()),
        };
        let d = precond.apply(&r);
        let delta = dot(&r, &d);

        Self {
            op,
            precond,
            x,
            r,
            d,
            delta,
            iteration: 0,
            broken_down: false,
        }
    }

    pub fn step(&mut self) -> Option<CgStep> {
        if self.broken_down {
            return None;
        }

        let q = self.op.apply(&self.d);
        let curvature = dot(&self.d, &q);
        let alpha = self.delta / curvature;
        if curvature.is_nan() || curvature <= 0.0 || !alpha.is_finite() {
            log::warn!(
                "cg: breakdown at iteration {} (d^T A d = {curvature:.3e})",
                self.iteration + 1
            );
            self.broken_down = true;
            return None;
        }

        for ((xi, ri), (di, qi)) in self.x.iter_mut().zip(&mut self.r).zip(self.d.iter().zip(&q)) {
            *xi += alpha * di;
            *ri -= alpha * qi;
        }

        let s = self.precond.apply(&self.r);
        let delta_new = dot(&self.r, &s);
        if !delta_new.is_finite() {
            log::warn!("cg: non-finite preconditioned residual at iteration {}", self.iteration + 1);
            self.broken_down = true;
            return None;
        }

        let beta = delta_new / self.delta;
        for (di, si) in self.d.iter_mut().zip(&s) {
            *di = si + beta * *di;
        }
        self.delta = delta_new;
        self.iteration += 1;

        Some(CgStep {
            iteration: self.iteration,
            residual_norm: norm(&self.r),
            delta: self.delta,
        })
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn residual(&self) -> &[f64] {
        &self.r
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn into_solution(self) -> Vec<f64> {
        self.x
    }
}
