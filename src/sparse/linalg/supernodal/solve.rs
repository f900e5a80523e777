//! supernodal triangular solve.
//!
//! `solve(B)` permutes the right-hand sides into the factorization
//! ordering, runs the forward trapezoidal sweep up the assembly forest, the
//! diagonal scaling for the LDL families, and the backward sweep down the
//! forest, then permutes the solution back. panel updates switch between an
//! out-of-place GEMM and element-wise application depending on the
//! supernode size thresholds. the multi-threaded variant partitions the
//! forest into independent root subtrees, each with its own workspace.

use super::super::FactorizationType;
use super::{SupernodalLdlRef, SymbolicSupernodalLdl};
use crate::linalg::matmul::{matmul, matmul_adjoint_lhs};
use crate::linalg::triangular_solve::{
	solve_lower_triangular_in_place, solve_lower_triangular_transpose_in_place, solve_unit_lower_triangular_in_place,
	solve_unit_lower_triangular_transpose_in_place,
};
use crate::linalg::{Accum, Conj};
use crate::{ComplexField, Index, MatMut, Par};
use dyn_stack::{MemStack, StackReq};
use equator::assert;
use reborrow::*;

/// thresholds above which a supernode's panel update is performed through
/// an out-of-place GEMM rather than element-wise
#[derive(Copy, Clone, Debug)]
pub struct SolveParams {
	pub forward_out_of_place_supernode_threshold: usize,
	pub backward_out_of_place_supernode_threshold: usize,
}

impl Default for SolveParams {
	#[inline]
	fn default() -> Self {
		Self {
			forward_out_of_place_supernode_threshold: 10,
			backward_out_of_place_supernode_threshold: 10,
		}
	}
}

/// size of the workspace required by [`solve_in_place`]
pub fn solve_in_place_scratch<I: Index, T: ComplexField>(symbolic: &SymbolicSupernodalLdl<I>, num_rhs: usize) -> StackReq {
	StackReq::all_of(&[
		// permuted right-hand sides
		StackReq::new::<T>(symbolic.nrows() * num_rhs),
		// panel update workspace
		StackReq::new::<T>((symbolic.max_degree() + symbolic.max_supernode_size()) * num_rhs),
	])
}

/// solves `A x = rhs` in place against a completed factorization.
///
/// `supernode_permutation` must be the pivot permutation produced by the
/// numeric phase when supernodal pivoting was enabled, and `None` otherwise
#[allow(clippy::too_many_arguments)]
#[track_caller]
pub fn solve_in_place<I: Index, T: ComplexField>(
	factor: SupernodalLdlRef<'_, I, T>,
	kind: FactorizationType,
	supernode_permutation: Option<&[I]>,
	rhs: MatMut<'_, T>,
	params: &SolveParams,
	par: Par,
	stack: &mut MemStack,
) {
	let symbolic = factor.symbolic();
	let n = symbolic.nrows();
	let k = rhs.ncols();
	assert!(rhs.nrows() == n);
	if let Some(perm) = &supernode_permutation {
		assert!(perm.len() == n);
	}

	let permutation = symbolic.permutation();
	let (x_storage, stack) = unsafe { stack.make_raw::<T>(n * k) };
	let (workspace, _) = unsafe { stack.make_raw::<T>((symbolic.max_degree() + symbolic.max_supernode_size()) * k) };

	let mut rhs = rhs;
	if permutation.is_identity() {
		solve_core(factor, kind, supernode_permutation, rhs.rb_mut(), params, par, workspace);
	} else {
		let mut x = MatMut::from_column_major_slice_mut(&mut x_storage[..n * k], n, k);
		for j in 0..k {
			for orig in 0..n {
				x[(permutation.apply(orig), j)] = rhs[(orig, j)];
			}
		}
		solve_core(factor, kind, supernode_permutation, x.rb_mut(), params, par, workspace);
		for j in 0..k {
			for orig in 0..n {
				rhs[(orig, j)] = x[(permutation.apply(orig), j)];
			}
		}
	}
}

fn solve_core<I: Index, T: ComplexField>(
	factor: SupernodalLdlRef<'_, I, T>,
	kind: FactorizationType,
	supernode_permutation: Option<&[I]>,
	x: MatMut<'_, T>,
	params: &SolveParams,
	par: Par,
	workspace: &mut [T],
) {
	let symbolic = factor.symbolic();
	let n_supernodes = symbolic.n_supernodes();
	let roots = &symbolic.assembly_forest().roots;

	if matches!(par, Par::Rayon(_)) && roots.len() > 1 {
		// independent root subtrees touch disjoint row sets of `x`
		let trees: Vec<Vec<usize>> = roots.iter().map(|&root| subtree_nodes(symbolic, root.zx())).collect();
		let k = x.ncols();
		let nrows = x.nrows();
		let col_stride = x.col_stride();
		let mut x = x;
		let shared = SharedRhs {
			ptr: x.as_mut_ptr(),
			nrows,
			ncols: k,
			col_stride,
		};
		let workspace_len = (symbolic.max_degree() + symbolic.max_supernode_size()) * k;

		rayon::scope(|scope| {
			for tree in &trees {
				let shared = shared;
				scope.spawn(move |_| {
					let shared = shared;
					let x = unsafe { MatMut::from_raw_parts_mut(shared.ptr, shared.nrows, shared.ncols, shared.col_stride) };
					let mut workspace = vec![T::zero(); workspace_len];
					solve_supernode_range(factor, kind, supernode_permutation, x, params, Par::Seq, &mut workspace, tree);
				});
			}
		});
	} else {
		let supernodes: Vec<usize> = (0..n_supernodes).collect();
		solve_supernode_range(factor, kind, supernode_permutation, x, params, par, workspace, &supernodes);
	}
}

#[derive(Copy, Clone)]
struct SharedRhs<T> {
	ptr: *mut T,
	nrows: usize,
	ncols: usize,
	col_stride: usize,
}
unsafe impl<T: Send> Send for SharedRhs<T> {}
unsafe impl<T: Sync> Sync for SharedRhs<T> {}

// supernodes of the subtree rooted at `root`, in ascending (topological)
// order
fn subtree_nodes<I: Index>(symbolic: &SymbolicSupernodalLdl<I>, root: usize) -> Vec<usize> {
	let forest = symbolic.assembly_forest();
	let mut nodes = Vec::new();
	let mut frontier = vec![root];
	while let Some(node) = frontier.pop() {
		nodes.push(node);
		frontier.extend(forest.children(node).iter().map(|&child| child.zx()));
	}
	nodes.sort_unstable();
	nodes
}

// forward, diagonal, and backward sweeps restricted to one list of
// supernodes in ascending order
#[allow(clippy::too_many_arguments)]
fn solve_supernode_range<I: Index, T: ComplexField>(
	factor: SupernodalLdlRef<'_, I, T>,
	kind: FactorizationType,
	supernode_permutation: Option<&[I]>,
	x: MatMut<'_, T>,
	params: &SolveParams,
	par: Par,
	workspace: &mut [T],
	supernodes: &[usize],
) {
	let mut x = x;
	for &supernode in supernodes {
		lower_trapezoidal_solve(factor, kind, supernode_permutation, supernode, x.rb_mut(), params, par, workspace);
	}
	for &supernode in supernodes {
		diagonal_solve(factor, kind, supernode, x.rb_mut());
	}
	for &supernode in supernodes.iter().rev() {
		lower_transpose_trapezoidal_solve(factor, kind, supernode_permutation, supernode, x.rb_mut(), params, par, workspace);
	}
}

#[allow(clippy::too_many_arguments)]
fn lower_trapezoidal_solve<I: Index, T: ComplexField>(
	factor: SupernodalLdlRef<'_, I, T>,
	kind: FactorizationType,
	supernode_permutation: Option<&[I]>,
	supernode: usize,
	x: MatMut<'_, T>,
	params: &SolveParams,
	par: Par,
	workspace: &mut [T],
) {
	let symbolic = factor.symbolic();
	let size = symbolic.supernode_size(supernode);
	let degree = symbolic.degree(supernode);
	let start = symbolic.supernode_start(supernode);
	let k = x.ncols();

	let mut x = x;

	// the pivoted factorization stores `L D L^H` of `P_s A(s, s) P_s^T`, so
	// the right-hand sides of this supernode are gathered through `P_s`
	if let Some(perm) = supernode_permutation {
		let perm = &perm[start..start + size];
		let gather = &mut workspace[..size];
		for j in 0..k {
			for (i, slot) in gather.iter_mut().enumerate() {
				*slot = x[(start + perm[i].zx(), j)];
			}
			for (i, &value) in gather.iter().enumerate() {
				x[(start + i, j)] = value;
			}
		}
	}

	let diag = factor.diag_block(supernode);
	{
		let mut x_top = x.rb_mut().subrows_mut(start, size);
		match kind {
			FactorizationType::Cholesky => solve_lower_triangular_in_place(diag, Conj::No, x_top.rb_mut(), par),
			_ => solve_unit_lower_triangular_in_place(diag, Conj::No, x_top.rb_mut(), par),
		}
	}

	if degree == 0 {
		return;
	}

	let panel = factor.panel(supernode);
	let structure = symbolic.structure(supernode);

	if size >= params.forward_out_of_place_supernode_threshold {
		let (update, _) = workspace.split_at_mut(degree * k);
		let mut update = MatMut::from_column_major_slice_mut(update, degree, k);
		{
			let x_top = x.rb().subrows(start, size);
			matmul(update.rb_mut(), Accum::Replace, panel, x_top, -T::one(), par);
		}
		for j in 0..k {
			for (idx, &row) in structure.iter().enumerate() {
				x[(row.zx(), j)] += update[(idx, j)];
			}
		}
	} else {
		for j in 0..k {
			for col in 0..size {
				let eta = x[(start + col, j)];
				if eta == T::zero() {
					continue;
				}
				for (idx, &row) in structure.iter().enumerate() {
					x[(row.zx(), j)] -= panel[(idx, col)] * eta;
				}
			}
		}
	}
}

fn diagonal_solve<I: Index, T: ComplexField>(factor: SupernodalLdlRef<'_, I, T>, kind: FactorizationType, supernode: usize, x: MatMut<'_, T>) {
	if let FactorizationType::Cholesky = kind {
		return;
	}

	let symbolic = factor.symbolic();
	let size = symbolic.supernode_size(supernode);
	let start = symbolic.supernode_start(supernode);
	let diag = factor.diag_block(supernode);
	let k = x.ncols();

	let mut x = x;
	for j in 0..k {
		for i in 0..size {
			let d_inv = diag[(i, i)].recip();
			x[(start + i, j)] = x[(start + i, j)] * d_inv;
		}
	}
}

#[allow(clippy::too_many_arguments)]
fn lower_transpose_trapezoidal_solve<I: Index, T: ComplexField>(
	factor: SupernodalLdlRef<'_, I, T>,
	kind: FactorizationType,
	supernode_permutation: Option<&[I]>,
	supernode: usize,
	x: MatMut<'_, T>,
	params: &SolveParams,
	par: Par,
	workspace: &mut [T],
) {
	let symbolic = factor.symbolic();
	let size = symbolic.supernode_size(supernode);
	let degree = symbolic.degree(supernode);
	let start = symbolic.supernode_start(supernode);
	let k = x.ncols();
	let conj = kind.conj();

	let mut x = x;
	let diag = factor.diag_block(supernode);
	let panel = factor.panel(supernode);
	let structure = symbolic.structure(supernode);

	if degree > 0 {
		if size >= params.backward_out_of_place_supernode_threshold {
			let (gathered, _) = workspace.split_at_mut(degree * k);
			let mut gathered = MatMut::from_column_major_slice_mut(gathered, degree, k);
			for j in 0..k {
				for (idx, &row) in structure.iter().enumerate() {
					gathered[(idx, j)] = x[(row.zx(), j)];
				}
			}
			let mut x_top = x.rb_mut().subrows_mut(start, size);
			matmul_adjoint_lhs(x_top.rb_mut(), Accum::Add, panel, conj, gathered.rb(), -T::one(), par);
		} else {
			for j in 0..k {
				for col in 0..size {
					let mut acc = T::zero();
					for (idx, &row) in structure.iter().enumerate() {
						acc += conj.apply(panel[(idx, col)]) * x[(row.zx(), j)];
					}
					x[(start + col, j)] -= acc;
				}
			}
		}
	}

	{
		let mut x_top = x.rb_mut().subrows_mut(start, size);
		match kind {
			FactorizationType::Cholesky => solve_lower_triangular_transpose_in_place(diag, Conj::Yes, x_top.rb_mut(), par),
			FactorizationType::LdlAdjoint => solve_unit_lower_triangular_transpose_in_place(diag, Conj::Yes, x_top.rb_mut(), par),
			FactorizationType::LdlTranspose => solve_unit_lower_triangular_transpose_in_place(diag, Conj::No, x_top.rb_mut(), par),
		}
	}

	// undo the supernode pivoting: the solved block holds `P_s x_s`
	if let Some(perm) = supernode_permutation {
		let perm = &perm[start..start + size];
		let scatter = &mut workspace[..size];
		for j in 0..k {
			for (i, slot) in scatter.iter_mut().enumerate() {
				*slot = x[(start + i, j)];
			}
			for (i, &value) in scatter.iter().enumerate() {
				x[(start + perm[i].zx(), j)] = value;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::super::tests_support;
	use super::super::{
		NumericParams, factorize_supernodal_numeric_left_looking, factorize_supernodal_numeric_right_looking,
		factorize_supernodal_numeric_scratch, factorize_supernodal_symbolic,
	};
	use super::*;
	use equator::assert;
	use crate::Mat;
	use crate::sparse::{CoordinateMatrix, SymmetricOrdering};
	use dyn_stack::MemBuffer;
	use rand::rngs::StdRng;
	use rand::{Rng, SeedableRng};

	fn residual_norm(matrix: &CoordinateMatrix<i64, f64>, x: &Mat<f64>, b: &Mat<f64>) -> f64 {
		let n = matrix.num_rows();
		let k = b.ncols();
		let mut max_err = 0.0f64;
		for j in 0..k {
			for row in 0..n {
				let mut acc = 0.0;
				for entry in matrix.row_entries(row) {
					acc += entry.value * x[(entry.column.zx(), j)];
				}
				max_err = max_err.max((acc - b[(row, j)]).abs());
			}
		}
		max_err
	}

	fn factor_and_solve(kind: FactorizationType, perm: Option<Vec<i64>>, pivoted: bool) {
		let matrix = tests_support::grid_laplacian_f64(6, 7, 1.0);
		let n = matrix.num_rows();
		let ordering = match perm {
			Some(perm) => SymmetricOrdering::from_forward(perm),
			None => SymmetricOrdering::identity(),
		};
		let symbolic = factorize_supernodal_symbolic(&matrix, &ordering, None).unwrap();

		let mut lower_values = vec![0.0f64; symbolic.len_lower_val()];
		let mut diag_values = vec![0.0f64; symbolic.len_diag_val()];
		let mut supernode_permutation = pivoted.then(|| vec![0i64; n]);
		let params = NumericParams {
			factorization_type: kind,
			..NumericParams::<i64, f64>::default()
		};

		let mut mem = MemBuffer::new(factorize_supernodal_numeric_scratch::<i64, f64>(&symbolic));
		let result = factorize_supernodal_numeric_left_looking(
			&matrix,
			&symbolic,
			&mut lower_values,
			&mut diag_values,
			supernode_permutation.as_deref_mut(),
			&params,
			crate::Par::Seq,
			MemStack::new(&mut mem),
		);
		assert!(result.is_success(n));

		let factor = SupernodalLdlRef::new(&symbolic, &lower_values, &diag_values);

		let mut rng = StdRng::seed_from_u64(42);
		let b = Mat::from_fn(n, 2, |_, _| rng.gen::<f64>() - 0.5);
		let mut x = b.clone();

		let mut mem = MemBuffer::new(solve_in_place_scratch::<i64, f64>(&symbolic, 2));
		solve_in_place(
			factor,
			kind,
			supernode_permutation.as_deref(),
			x.as_mut(),
			&SolveParams::default(),
			crate::Par::Seq,
			MemStack::new(&mut mem),
		);

		assert!(residual_norm(&matrix, &x, &b) < 1e-10);
	}

	#[test]
	fn test_solve_cholesky() {
		factor_and_solve(FactorizationType::Cholesky, None, false);
	}

	#[test]
	fn test_solve_ldl_adjoint() {
		factor_and_solve(FactorizationType::LdlAdjoint, None, false);
	}

	#[test]
	fn test_solve_ldl_transpose() {
		factor_and_solve(FactorizationType::LdlTranspose, None, false);
	}

	#[test]
	fn test_solve_with_permutation() {
		let n = 42;
		// interleave odd and even indices for a nontrivial reordering
		let perm: Vec<i64> = (0..n).map(|i| if i % 2 == 0 { i / 2 } else { n / 2 + i / 2 }).collect();
		factor_and_solve(FactorizationType::LdlAdjoint, Some(perm), false);
	}

	#[test]
	fn test_solve_with_supernodal_pivoting() {
		factor_and_solve(FactorizationType::LdlAdjoint, None, true);
	}

	#[test]
	fn test_solve_right_looking_factor() {
		let matrix = tests_support::grid_laplacian_f64(9, 8, 2.0);
		let n = matrix.num_rows();
		let symbolic = factorize_supernodal_symbolic(&matrix, &SymmetricOrdering::identity(), None).unwrap();

		let mut lower_values = vec![0.0f64; symbolic.len_lower_val()];
		let mut diag_values = vec![0.0f64; symbolic.len_diag_val()];
		let params = NumericParams::<i64, f64>::default();
		let result = factorize_supernodal_numeric_right_looking(
			&matrix,
			&symbolic,
			&mut lower_values,
			&mut diag_values,
			None,
			&params,
			f64::INFINITY,
			crate::Par::Seq,
		);
		assert!(result.is_success(n));

		let factor = SupernodalLdlRef::new(&symbolic, &lower_values, &diag_values);

		let mut rng = StdRng::seed_from_u64(7);
		let b = Mat::from_fn(n, 3, |_, _| rng.gen::<f64>());
		let mut x = b.clone();
		let mut mem = MemBuffer::new(solve_in_place_scratch::<i64, f64>(&symbolic, 3));
		solve_in_place(
			factor,
			FactorizationType::LdlAdjoint,
			None,
			x.as_mut(),
			&SolveParams::default(),
			crate::Par::Seq,
			MemStack::new(&mut mem),
		);
		assert!(residual_norm(&matrix, &x, &b) < 1e-10);
	}
}
