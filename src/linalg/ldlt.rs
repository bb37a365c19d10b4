//! Sparse LDL^T factorization of symmetric quasi-definite KKT matrices.
//!
//! Every system factored here carries explicit diagonal regularization
//! (`sigma` and `-1/rho` blocks in the iteration, `+delta`/`-delta` in
//! polishing), so an LDL^T without pivoting exists under any symmetric
//! permutation and a fill-reducing ordering can be fixed once up front.
//! Construction orders, analyzes, and factors in one shot; the step-parameter
//! and matrix-value update paths go through [`SimplicialLdlt::refactorize`],
//! which reuses the ordering and the symbolic structure and only redoes the
//! numeric factor.

use faer::dyn_stack::{MemBuffer, MemStack, StackReq};
use faer::linalg::cholesky::ldlt::factor::LdltRegularization;
use faer::perm::Perm;
use faer::prelude::{Reborrow, ReborrowMut};
use faer::sparse::linalg::{amd, cholesky::simplicial};
use faer::sparse::{SparseColMat, SparseColMatRef, SymbolicSparseColMat};
use faer::{Mat, MatMut, MatRef, Par};

use crate::{E, I};

#[derive(Debug, derive_more::Display, derive_more::Error, PartialEq, Clone, Copy)]
pub enum LdltError {
    #[display("Fill-reducing ordering failed")]
    Ordering,

    #[display("Symbolic factorization failed")]
    Symbolic,

    #[display("Numeric factorization failed")]
    Numeric,

    #[display("Factorization workspace allocation failed")]
    OutOfMemory,
}

/// Simplicial LDL^T of a symmetric matrix given by its **upper** triangle.
///
/// The ordering and the symbolic structure are fixed at construction;
/// `refactorize` accepts any matrix with the same sparsity pattern. A value
/// of this type is always in a solvable state.
pub struct SimplicialLdlt {
    dim: usize,
    ordering: Perm<I>,
    symbolic: simplicial::SymbolicSimplicialCholesky<I>,
    l_values: Vec<E>,
}

impl SimplicialLdlt {
    /// Orders, analyzes, and factors the given matrix.
    pub fn try_new(mat: SparseColMatRef<'_, I, E>) -> Result<Self, LdltError> {
        let dim = mat.ncols();
        let nnz = mat.compute_nnz();

        // Approximate-minimum-degree ordering on the sparsity pattern. The
        // regularized KKT matrix is strongly factorizable, so the ordering
        // can be chosen for fill alone.
        let ordering = {
            let mut fwd = vec![0usize; dim];
            let mut inv = vec![0usize; dim];
            let mut work = scratch(amd::order_scratch::<I>(dim, nnz))?;
            amd::order(
                &mut fwd,
                &mut inv,
                mat.symbolic(),
                amd::Control::default(),
                MemStack::new(&mut work),
            )
            .map_err(|_| LdltError::Ordering)?;
            // SAFETY: `amd::order` wrote a valid permutation and its inverse.
            unsafe { Perm::new_unchecked(fwd.into_boxed_slice(), inv.into_boxed_slice()) }
        };

        let permuted = permute_upper(mat, &ordering)?;

        // The elimination tree and per-column counts of the permuted pattern
        // determine the symbolic factor.
        let symbolic = {
            let mut etree = vec![0isize; dim];
            let mut col_counts = vec![0usize; dim];
            let mut work = scratch(StackReq::any_of(&[
                simplicial::prefactorize_symbolic_cholesky_scratch::<I>(dim, nnz),
                simplicial::factorize_simplicial_symbolic_cholesky_scratch::<I>(dim),
            ]))?;
            let stack = MemStack::new(&mut work);

            simplicial::prefactorize_symbolic_cholesky(
                &mut etree,
                &mut col_counts,
                permuted.symbolic(),
                stack,
            );
            simplicial::factorize_simplicial_symbolic_cholesky(
                permuted.symbolic(),
                // SAFETY: the elimination tree comes straight from the
                // prefactorization above.
                unsafe { simplicial::EliminationTreeRef::from_inner(&etree) },
                &col_counts,
                stack,
            )
            .map_err(|_| LdltError::Symbolic)?
        };

        let mut this = Self {
            dim,
            ordering,
            symbolic,
            l_values: Vec::new(),
        };
        this.factor_values(&permuted)?;
        Ok(this)
    }

    /// Refactors with new numeric values on the pattern fixed at
    /// construction.
    pub fn refactorize(&mut self, mat: SparseColMatRef<'_, I, E>) -> Result<(), LdltError> {
        let permuted = permute_upper(mat, &self.ordering)?;
        self.factor_values(&permuted)
    }

    fn factor_values(&mut self, permuted: &SparseColMat<I, E>) -> Result<(), LdltError> {
        self.l_values.clear();
        self.l_values
            .try_reserve_exact(self.symbolic.len_val())
            .map_err(|_| LdltError::OutOfMemory)?;
        self.l_values.resize(self.symbolic.len_val(), 0.);

        let mut work = scratch(simplicial::factorize_simplicial_numeric_ldlt_scratch::<I, E>(
            self.dim,
        ))?;
        simplicial::factorize_simplicial_numeric_ldlt::<I, E>(
            &mut self.l_values,
            permuted.rb(),
            LdltRegularization::default(),
            &self.symbolic,
            MemStack::new(&mut work),
        )
        .map_err(|_| LdltError::Numeric)?;
        Ok(())
    }

    /// Solves `K x = b` in place for one or more right-hand sides.
    pub fn solve_in_place(&self, mut rhs: MatMut<'_, E>) -> Result<(), LdltError> {
        let factor =
            simplicial::SimplicialLdltRef::<'_, I, E>::new(&self.symbolic, &self.l_values);

        let mut work = scratch(StackReq::all_of(&[
            faer::perm::permute_rows_in_place_scratch::<I, E>(self.dim, rhs.ncols()),
            self.symbolic.solve_in_place_scratch::<E>(self.dim),
        ]))?;
        let stack = MemStack::new(&mut work);

        faer::perm::permute_rows_in_place(rhs.rb_mut(), self.ordering.as_ref(), stack);
        factor.solve_in_place_with_conj(faer::Conj::No, rhs.rb_mut(), Par::Seq, stack);
        faer::perm::permute_rows_in_place(rhs.rb_mut(), self.ordering.as_ref().inverse(), stack);
        Ok(())
    }

    /// Solves `K x = b` into a fresh matrix.
    pub fn solve(&self, rhs: MatRef<'_, E>) -> Result<Mat<E>, LdltError> {
        let mut sol = rhs.to_owned();
        self.solve_in_place(sol.as_mut())?;
        Ok(sol)
    }
}

fn scratch(req: StackReq) -> Result<MemBuffer, LdltError> {
    MemBuffer::try_new(req).map_err(|_| LdltError::OutOfMemory)
}

/// Applies the ordering to a stored upper triangle, yielding the permuted
/// upper triangle the simplicial kernels consume. Columns may come out
/// unsorted, which the kernels accept.
fn permute_upper(
    mat: SparseColMatRef<'_, I, E>,
    ordering: &Perm<I>,
) -> Result<SparseColMat<I, E>, LdltError> {
    let dim = mat.ncols();
    let nnz = mat.compute_nnz();

    let mut col_ptr = vec![0usize; dim + 1];
    let mut row_idx = vec![0usize; nnz];
    let mut values = vec![0.0f64; nnz];

    let mut work = scratch(faer::sparse::utils::permute_self_adjoint_scratch::<I>(dim))?;
    faer::sparse::utils::permute_self_adjoint_to_unsorted(
        &mut values,
        &mut col_ptr,
        &mut row_idx,
        mat,
        ordering.as_ref(),
        faer::Side::Upper,
        faer::Side::Upper,
        MemStack::new(&mut work),
    );

    // SAFETY: the self-adjoint permutation of a valid upper triangle stays
    // structurally valid.
    Ok(SparseColMat::<I, E>::new(
        unsafe { SymbolicSparseColMat::new_unchecked(dim, dim, col_ptr, None, row_idx) },
        values,
    ))
}
