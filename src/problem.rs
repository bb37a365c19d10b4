use faer::{Col, sparse::SparseColMat};

use crate::linalg::{sparse_ops, vector_ops};
use crate::{E, I, SolverError};

/// A convex quadratic program:
///
/// ```text
/// min  0.5 x' P x + q' x
/// s.t. l <= A x <= u
/// ```
///
/// `P` is symmetric positive semidefinite and must be given as its upper
/// triangle in CSC form (see [`sparse_ops::upper_triangle`] to extract one
/// from a full symmetric matrix). Bounds may be `f64::INFINITY` /
/// `f64::NEG_INFINITY` to disable a side; rows with `l == u` are equality
/// constraints.
///
/// The structure is immutable once built. Values of `q`, `l`, `u` and the
/// numeric entries of `P`, `A` can be changed through the solver's update
/// operations.
#[allow(non_snake_case)]
pub struct QuadraticProgram {
    /// Quadratic cost, upper triangle (sparse, column-major).
    pub(crate) P: SparseColMat<I, E>,
    /// Linear cost coefficients.
    pub(crate) q: Col<E>,
    /// Constraint matrix (sparse, column-major).
    pub(crate) A: SparseColMat<I, E>,
    /// Lower constraint bounds.
    pub(crate) l: Col<E>,
    /// Upper constraint bounds.
    pub(crate) u: Col<E>,
}

#[allow(non_snake_case)]
impl QuadraticProgram {
    /// Creates a new quadratic program from the objective, constraints, and
    /// bounds, validating dimensions and values.
    pub fn new(
        P: SparseColMat<I, E>,
        q: Col<E>,
        A: SparseColMat<I, E>,
        l: Col<E>,
        u: Col<E>,
    ) -> Result<Self, SolverError> {
        let n = q.nrows();
        let m = A.nrows();

        if n == 0 {
            return Err(SolverError::InvalidData {
                reason: "number of variables must be positive",
            });
        }
        if P.nrows() != n || P.ncols() != n {
            return Err(SolverError::DimensionMismatch {
                expected: n,
                actual: P.ncols(),
            });
        }
        if A.ncols() != n {
            return Err(SolverError::DimensionMismatch {
                expected: n,
                actual: A.ncols(),
            });
        }
        if l.nrows() != m || u.nrows() != m {
            return Err(SolverError::DimensionMismatch {
                expected: m,
                actual: l.nrows().max(u.nrows()),
            });
        }
        if !sparse_ops::is_upper_triangular(P.as_ref()) {
            return Err(SolverError::InvalidData {
                reason: "P must be stored as its upper triangle",
            });
        }
        if !sparse_ops::values_finite(P.as_ref()) {
            return Err(SolverError::InvalidData {
                reason: "P contains non-finite values",
            });
        }
        if !sparse_ops::values_finite(A.as_ref()) {
            return Err(SolverError::InvalidData {
                reason: "A contains non-finite values",
            });
        }
        if !vector_ops::all_finite(q.as_ref()) {
            return Err(SolverError::InvalidData {
                reason: "q contains non-finite values",
            });
        }
        validate_bounds(l.as_ref(), u.as_ref())?;

        Ok(Self { P, q, A, l, u })
    }

    /// Returns the number of variables.
    pub fn get_n_vars(&self) -> usize {
        self.q.nrows()
    }

    /// Returns the number of constraints (rows of `A`).
    pub fn get_n_cons(&self) -> usize {
        self.A.nrows()
    }

    /// Returns `(n_vars, n_cons)`.
    pub fn get_dims(&self) -> (usize, usize) {
        (self.get_n_vars(), self.get_n_cons())
    }

    pub fn get_linear_cost(&self) -> &Col<E> {
        &self.q
    }

    pub fn get_quadratic_cost(&self) -> &SparseColMat<I, E> {
        &self.P
    }

    pub fn get_constraint_matrix(&self) -> &SparseColMat<I, E> {
        &self.A
    }

    pub fn get_lower_bounds(&self) -> &Col<E> {
        &self.l
    }

    pub fn get_upper_bounds(&self) -> &Col<E> {
        &self.u
    }
}

pub(crate) fn validate_bounds(
    l: faer::ColRef<'_, E>,
    u: faer::ColRef<'_, E>,
) -> Result<(), SolverError> {
    for i in 0..l.nrows() {
        if l[i].is_nan() || u[i].is_nan() {
            return Err(SolverError::InvalidData {
                reason: "bounds contain NaN",
            });
        }
        if l[i] > u[i] {
            return Err(SolverError::InvalidData {
                reason: "lower bound exceeds upper bound",
            });
        }
        if l[i] == E::INFINITY || u[i] == E::NEG_INFINITY {
            return Err(SolverError::InvalidData {
                reason: "bounds admit no feasible value",
            });
        }
    }
    Ok(())
}
