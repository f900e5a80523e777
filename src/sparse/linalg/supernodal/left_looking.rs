//! left-looking supernodal factorization.
//!
//! each supernode, visited in topological order, first applies the pending
//! updates of its descendants. descendants are tracked through intrusive
//! linked lists: every partially consumed supernode lives in the list of
//! the ancestor owning its next unconsumed structure run, and moves to the
//! following ancestor once that run is applied. the `rel_rows` and
//! `intersect_ptrs` cursors walk each descendant's structure and its
//! run-length encoding in lockstep, so no binary searches happen during
//! updates.

use super::super::{FactorizationType, LdlResult};
use super::{
	FactorStorage, NumericParams, SymbolicSupernodalLdl, initialize_block_column, permute_panel_columns,
};
use crate::ftz::FlushToZeroGuard;
use crate::linalg::cholesky::{factor_in_place, factor_regularized_in_place, form_scaled_transpose, pivoted_ldl_adjoint_in_place, solve_against_diagonal_block};
use crate::linalg::matmul::{matmul, matmul_lower};
use crate::linalg::Accum;
use crate::sparse::CoordinateMatrix;
use crate::{ComplexField, Index, MatMut, Par};
use dyn_stack::MemStack;
use equator::assert;
use reborrow::*;

/// computes the numeric supernodal factorization with the left-looking
/// (descendant-driven) loop invariant.
///
/// `supernode_permutation`, when present, enables per-supernode diagonal
/// pivoting (valid for the $LDL^H$ family) and receives the local pivot
/// permutation of every supernode. the workspace is queried by
/// [`super::factorize_supernodal_numeric_scratch`]
#[allow(clippy::too_many_arguments)]
pub fn factorize_supernodal_numeric_left_looking<I: Index, T: ComplexField>(
	matrix: &CoordinateMatrix<I, T>,
	symbolic: &SymbolicSupernodalLdl<I>,
	lower_values: &mut [T],
	diag_values: &mut [T],
	mut supernode_permutation: Option<&mut [I]>,
	params: &NumericParams<'_, I, T::Real>,
	par: Par,
	stack: &mut MemStack,
) -> LdlResult<I, T::Real> {
	let n = symbolic.nrows();
	let n_supernodes = symbolic.n_supernodes();
	let max_size = symbolic.max_supernode_size();
	let max_degree = symbolic.max_degree();
	let kind = params.factorization_type;

	assert!(all(
		matrix.num_rows() == n,
		matrix.num_columns() == n,
		lower_values.len() == symbolic.len_lower_val(),
		diag_values.len() == symbolic.len_diag_val()
	));
	if let Some(perm) = &supernode_permutation {
		assert!(perm.len() == n);
	}

	let _flush_to_zero = FlushToZeroGuard::new();
	let storage = FactorStorage::new(symbolic, lower_values, diag_values);

	let (pattern_flags, stack) = unsafe { stack.make_raw::<I>(n) };
	let (rel_ind, stack) = unsafe { stack.make_raw::<I>(max_size + max_degree) };
	let (rel_rows, stack) = unsafe { stack.make_raw::<I>(n_supernodes) };
	let (intersect_ptrs, stack) = unsafe { stack.make_raw::<I>(n_supernodes) };
	let (heads, stack) = unsafe { stack.make_raw::<I>(n_supernodes) };
	let (lists, stack) = unsafe { stack.make_raw::<I>(n_supernodes) };
	let (scaled_transpose, stack) = unsafe { stack.make_raw::<T>(max_size * max_size) };
	let (workspace, _) = unsafe { stack.make_raw::<T>(max_size * Ord::max(max_size, max_degree)) };

	pattern_flags.fill(I::truncate(0));
	heads.fill(I::NONE);
	lists.fill(I::NONE);

	let mut result = LdlResult::<I, T::Real>::default();

	for supernode in 0..n_supernodes {
		let size = symbolic.supernode_size(supernode);
		let degree = symbolic.degree(supernode);
		let start = symbolic.supernode_start(supernode);

		let mut diag_block = unsafe { storage.diag_mut(supernode) };
		let mut panel = unsafe { storage.panel_mut(supernode) };

		initialize_block_column(supernode, matrix, symbolic, kind, diag_block.rb_mut(), panel.rb_mut());

		left_looking_supernode_update(
			supernode,
			symbolic,
			&storage,
			kind,
			diag_block.rb_mut(),
			panel.rb_mut(),
			pattern_flags,
			rel_ind,
			rel_rows,
			intersect_ptrs,
			heads,
			lists,
			scaled_transpose,
			workspace,
			par,
		);

		// factor the diagonal block in place
		let num_supernode_pivots = match supernode_permutation.as_deref_mut() {
			Some(perm) => pivoted_ldl_adjoint_in_place(diag_block.rb_mut(), &mut perm[start..start + size]),
			None => match &params.regularization {
				Some(reg) => factor_regularized_in_place(
					kind,
					diag_block.rb_mut(),
					params.block_size,
					&reg.with_offset(start),
					&mut result.dynamic_regularization,
					par,
				),
				None => factor_in_place(kind, diag_block.rb_mut(), params.block_size, params.tile_size, par),
			},
		};
		result.num_successful_pivots += num_supernode_pivots;
		if num_supernode_pivots < size {
			return result;
		}
		result.incorporate_supernode(size, degree);

		if degree == 0 {
			continue;
		}

		if let Some(perm) = supernode_permutation.as_deref_mut() {
			permute_panel_columns(panel.rb_mut(), &perm[start..start + size], &mut workspace[..degree * size]);
		}
		solve_against_diagonal_block(kind, diag_block.rb(), panel.rb_mut(), par);
	}

	result
}

// applies the pending descendant updates to one supernode's diagonal block
// and panel, then registers the supernode with its parent's descendant list
#[allow(clippy::too_many_arguments)]
pub(crate) fn left_looking_supernode_update<I: Index, T: ComplexField>(
	supernode: usize,
	symbolic: &SymbolicSupernodalLdl<I>,
	storage: &FactorStorage<'_, I, T>,
	kind: FactorizationType,
	diag_block: MatMut<'_, T>,
	panel: MatMut<'_, T>,
	pattern_flags: &mut [I],
	rel_ind: &mut [I],
	rel_rows: &mut [I],
	intersect_ptrs: &mut [I],
	heads: &mut [I],
	lists: &mut [I],
	scaled_transpose: &mut [T],
	workspace: &mut [T],
	par: Par,
) {
	let member_to_index = symbolic.member_to_index();
	let size = symbolic.supernode_size(supernode);
	let degree = symbolic.degree(supernode);
	let offset = symbolic.supernode_start(supernode);
	let structure = symbolic.structure(supernode);

	let mut diag_block = diag_block;
	let mut panel = panel;

	// scatter the panel structure so descendant rows can be located in
	// constant time
	for (i, &row) in structure.iter().enumerate() {
		pattern_flags[row.zx()] = I::truncate(i);
	}

	rel_rows[supernode] = I::truncate(0);
	intersect_ptrs[supernode] = I::truncate(0);

	let mut next_descendant = heads[supernode];
	while next_descendant != I::NONE {
		let descendant = next_descendant.zx();
		debug_assert!(descendant < supernode);

		let descendant_panel = unsafe { storage.panel(descendant) };
		let descendant_diag = unsafe { storage.diag(descendant) };
		let descendant_size = symbolic.supernode_size(descendant);
		let descendant_degree = symbolic.degree(descendant);

		let descendant_main_rel_row = rel_rows[descendant].zx();
		let intersect_size = symbolic.intersect_sizes(descendant)[intersect_ptrs[descendant].zx()].zx();
		debug_assert!(intersect_size > 0);

		let descendant_structure = &symbolic.structure(descendant)[descendant_main_rel_row..];
		debug_assert!(member_to_index[descendant_structure[0].zx()].zx() == supernode);
		debug_assert!(member_to_index[descendant_structure[intersect_size - 1].zx()].zx() == supernode);

		let descendant_main_matrix = descendant_panel.submatrix(descendant_main_rel_row, 0, intersect_size, descendant_size);

		// Z := D(J, J) L(K, J)^H (or its cholesky/transpose analogue), so
		// every update below is a plain product against Z
		let mut z = MatMut::from_column_major_slice_mut(&mut scaled_transpose[..descendant_size * intersect_size], descendant_size, intersect_size);
		form_scaled_transpose(kind, descendant_diag, descendant_main_matrix, z.rb_mut());
		let z = z.rb();

		let descendant_below_rel_row = descendant_main_rel_row + intersect_size;
		let descendant_main_degree = descendant_degree - descendant_main_rel_row;
		let descendant_degree_remaining = descendant_degree - descendant_below_rel_row;

		let inplace_diag_update = intersect_size == size;
		let inplace_subdiag_update = inplace_diag_update && descendant_degree_remaining == degree;

		if !inplace_subdiag_update {
			for i_rel in 0..intersect_size {
				rel_ind[i_rel] = I::truncate(descendant_structure[i_rel].zx() - offset);
			}
		}

		// L(K, K) -= L(K, J) Z(J, K)
		if inplace_diag_update {
			matmul_lower(diag_block.rb_mut(), Accum::Add, descendant_main_matrix, z, -T::one(), par);
		} else {
			let mut update = MatMut::from_column_major_slice_mut(&mut workspace[..intersect_size * intersect_size], intersect_size, intersect_size);
			matmul_lower(update.rb_mut(), Accum::Replace, descendant_main_matrix, z, -T::one(), par);
			let update = update.rb();
			for j_rel in 0..intersect_size {
				let j = rel_ind[j_rel].zx();
				for i_rel in j_rel..intersect_size {
					let i = rel_ind[i_rel].zx();
					diag_block[(i, j)] += update[(i_rel, j_rel)];
				}
			}
		}

		intersect_ptrs[descendant].incr();
		rel_rows[descendant] = I::truncate(descendant_below_rel_row);

		// read the link before the descendant is re-inserted elsewhere
		next_descendant = lists[descendant];

		if descendant_degree_remaining > 0 {
			let descendant_below_matrix =
				descendant_panel.submatrix(descendant_below_rel_row, 0, descendant_degree_remaining, descendant_size);

			// L(KNext:n, K) -= L(KNext:n, J) Z(J, K)
			if inplace_subdiag_update {
				matmul(panel.rb_mut(), Accum::Add, descendant_below_matrix, z, -T::one(), par);
			} else {
				let mut update = MatMut::from_column_major_slice_mut(
					&mut workspace[..descendant_degree_remaining * intersect_size],
					descendant_degree_remaining,
					intersect_size,
				);
				matmul(update.rb_mut(), Accum::Replace, descendant_below_matrix, z, -T::one(), par);
				let update = update.rb();

				for i_rel in intersect_size..descendant_main_degree {
					rel_ind[i_rel] = pattern_flags[descendant_structure[i_rel].zx()];
				}
				for j_rel in 0..intersect_size {
					let j = rel_ind[j_rel].zx();
					debug_assert!(j < size);
					for i_rel in 0..descendant_degree_remaining {
						let i = rel_ind[i_rel + intersect_size].zx();
						debug_assert!(i < degree);
						panel[(i, j)] += update[(i_rel, j_rel)];
					}
				}
			}

			// move the descendant into the list of its next ancestor
			let next_ancestor = member_to_index[descendant_structure[intersect_size].zx()].zx();
			lists[descendant] = heads[next_ancestor];
			heads[next_ancestor] = I::truncate(descendant);
		}
	}

	if degree > 0 {
		let parent = member_to_index[structure[0].zx()].zx();
		lists[supernode] = heads[parent];
		heads[parent] = I::truncate(supernode);
	}
	heads[supernode] = I::NONE;
}

#[cfg(test)]
mod tests {
	use super::super::tests_support;
	use super::*;
	use equator::assert;
	use crate::sparse::SymmetricOrdering;
	use crate::sparse::linalg::supernodal::{SupernodalLdlRef, factorize_supernodal_numeric_scratch, factorize_supernodal_symbolic};
	use dyn_stack::{MemBuffer, MemStack};

	#[test]
	fn test_left_looking_cholesky_reconstruction() {
		let matrix = tests_support::grid_laplacian_f64(5, 4, 1.0);
		let n = matrix.num_rows();
		let symbolic = factorize_supernodal_symbolic(&matrix, &SymmetricOrdering::identity(), None).unwrap();

		let mut lower_values = vec![0.0f64; symbolic.len_lower_val()];
		let mut diag_values = vec![0.0f64; symbolic.len_diag_val()];
		let params = NumericParams {
			factorization_type: FactorizationType::Cholesky,
			..NumericParams::<i64, f64>::default()
		};

		let mut mem = MemBuffer::new(factorize_supernodal_numeric_scratch::<i64, f64>(&symbolic));
		let result = factorize_supernodal_numeric_left_looking(
			&matrix,
			&symbolic,
			&mut lower_values,
			&mut diag_values,
			None,
			&params,
			Par::Seq,
			MemStack::new(&mut mem),
		);
		assert!(result.is_success(n));

		let factor = SupernodalLdlRef::new(&symbolic, &lower_values, &diag_values);
		let err = tests_support::reconstruction_error_llt(&matrix, factor);
		assert!(err < 1e-12);
	}

	#[test]
	fn test_left_looking_permuted_ldlt() {
		let matrix = tests_support::grid_laplacian_f64(4, 5, 0.5);
		let n = matrix.num_rows();

		// reversal permutation exercises the permuted initialization path
		let perm: Vec<i64> = (0..n as i64).rev().collect();
		let ordering = SymmetricOrdering::from_forward(perm);
		let symbolic = factorize_supernodal_symbolic(&matrix, &ordering, None).unwrap();

		let mut lower_values = vec![0.0f64; symbolic.len_lower_val()];
		let mut diag_values = vec![0.0f64; symbolic.len_diag_val()];
		let params = NumericParams::<i64, f64>::default();

		let mut mem = MemBuffer::new(factorize_supernodal_numeric_scratch::<i64, f64>(&symbolic));
		let result = factorize_supernodal_numeric_left_looking(
			&matrix,
			&symbolic,
			&mut lower_values,
			&mut diag_values,
			None,
			&params,
			Par::Seq,
			MemStack::new(&mut mem),
		);
		assert!(result.is_success(n));

		let factor = SupernodalLdlRef::new(&symbolic, &lower_values, &diag_values);
		let err = tests_support::reconstruction_error_ldlt(&matrix, factor);
		assert!(err < 1e-12);
	}

	#[test]
	fn test_left_looking_with_relaxation_matches_unrelaxed() {
		let matrix = tests_support::grid_laplacian_f64(6, 6, 1.0);
		let n = matrix.num_rows();

		let relax = crate::sparse::linalg::SupernodalRelaxation::default();
		let symbolic = factorize_supernodal_symbolic(&matrix, &SymmetricOrdering::identity(), Some(&relax)).unwrap();

		let mut lower_values = vec![0.0f64; symbolic.len_lower_val()];
		let mut diag_values = vec![0.0f64; symbolic.len_diag_val()];
		let params = NumericParams::<i64, f64>::default();

		let mut mem = MemBuffer::new(factorize_supernodal_numeric_scratch::<i64, f64>(&symbolic));
		let result = factorize_supernodal_numeric_left_looking(
			&matrix,
			&symbolic,
			&mut lower_values,
			&mut diag_values,
			None,
			&params,
			Par::Seq,
			MemStack::new(&mut mem),
		);
		assert!(result.is_success(n));

		let factor = SupernodalLdlRef::new(&symbolic, &lower_values, &diag_values);
		let err = tests_support::reconstruction_error_ldlt(&matrix, factor);
		assert!(err < 1e-12);
	}
}
