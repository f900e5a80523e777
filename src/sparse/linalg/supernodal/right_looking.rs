//! right-looking (multifrontal) supernodal factorization.
//!
//! each subtree of the assembly forest is factored recursively, leaving a
//! dense schur complement at its root. a parent merges the schur
//! complements of its children into its own frontal matrix through
//! precomputed relative indices, factors its diagonal block, solves its
//! panel, and forms its own schur complement for consumption by its parent.
//! sibling subtrees are independent and run as parallel tasks when their
//! estimated work clears the `min_parallel_work` threshold.

use super::super::LdlResult;
use super::{FactorStorage, NumericParams, SymbolicSupernodalLdl, initialize_block_column, permute_panel_columns};
use crate::ftz::FlushToZeroGuard;
use crate::linalg::cholesky::{factor_in_place, factor_regularized_in_place, form_scaled_transpose, pivoted_ldl_adjoint_in_place, solve_against_diagonal_block};
use crate::linalg::matmul::matmul_lower;
use crate::linalg::Accum;
use crate::sparse::CoordinateMatrix;
use crate::{ComplexField, Index, Mat, MatMut, Par};
use equator::assert;
use reborrow::*;

// a subtree either completes and leaves its schur complement behind, or
// fails and reports the partial pivot counts accumulated so far
type SubtreeOutcome<I, T> = Result<(LdlResult<I, <T as ComplexField>::Real>, Mat<T>), LdlResult<I, <T as ComplexField>::Real>>;

#[derive(Copy, Clone)]
struct PermPtr<I>(*mut I);
unsafe impl<I> Send for PermPtr<I> {}
unsafe impl<I> Sync for PermPtr<I> {}

struct RightLookingContext<'a, I, T: ComplexField> {
	matrix: &'a CoordinateMatrix<I, T>,
	symbolic: &'a SymbolicSupernodalLdl<I>,
	storage: FactorStorage<'a, I, T>,
	params: &'a NumericParams<'a, I, T::Real>,
	supernode_permutation: Option<PermPtr<I>>,
	work_estimates: Vec<f64>,
	min_parallel_work: f64,
}

/// computes the numeric supernodal factorization with the right-looking
/// (multifrontal) loop invariant.
///
/// schur-complement buffers are owned per node and released when merged
/// into the parent front; subtree recursions run as parallel tasks under
/// `par` when their estimated work exceeds `min_parallel_work`
#[allow(clippy::too_many_arguments)]
pub fn factorize_supernodal_numeric_right_looking<I: Index, T: ComplexField>(
	matrix: &CoordinateMatrix<I, T>,
	symbolic: &SymbolicSupernodalLdl<I>,
	lower_values: &mut [T],
	diag_values: &mut [T],
	supernode_permutation: Option<&mut [I]>,
	params: &NumericParams<'_, I, T::Real>,
	min_parallel_work: f64,
	par: Par,
) -> LdlResult<I, T::Real> {
	let n = symbolic.nrows();

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

	let context = RightLookingContext {
		matrix,
		symbolic,
		storage: FactorStorage::new(symbolic, lower_values, diag_values),
		params,
		supernode_permutation: supernode_permutation.map(|perm| PermPtr(perm.as_mut_ptr())),
		work_estimates: symbolic.subtree_work_estimates(),
		min_parallel_work,
	};

	let roots = context.symbolic.assembly_forest().roots.clone();
	let outcomes = process_siblings(&context, &roots, par);

	let mut result = LdlResult::<I, T::Real>::default();
	for outcome in outcomes {
		match outcome {
			Ok((contribution, _schur)) => result.merge(contribution),
			Err(partial) => {
				result.merge(partial);
				return result;
			}
		}
	}
	result
}

// factors a list of sibling subtrees, splitting into parallel halves while
// the estimated work justifies a task
fn process_siblings<I: Index, T: ComplexField>(
	context: &RightLookingContext<'_, I, T>,
	siblings: &[I],
	par: Par,
) -> Vec<SubtreeOutcome<I, T>> {
	if siblings.len() <= 1 {
		return siblings.iter().map(|&s| right_looking_subtree(context, s.zx(), par)).collect();
	}

	let total_work: f64 = siblings.iter().map(|&s| context.work_estimates[s.zx()]).sum();
	if matches!(par, Par::Seq) || total_work < context.min_parallel_work {
		return siblings.iter().map(|&s| right_looking_subtree(context, s.zx(), par)).collect();
	}

	let mid = siblings.len() / 2;
	let (left, right) = siblings.split_at(mid);
	let (mut left_outcomes, right_outcomes) = rayon::join(|| process_siblings(context, left, par), || process_siblings(context, right, par));
	left_outcomes.extend(right_outcomes);
	left_outcomes
}

fn right_looking_subtree<I: Index, T: ComplexField>(
	context: &RightLookingContext<'_, I, T>,
	supernode: usize,
	par: Par,
) -> SubtreeOutcome<I, T> {
	let symbolic = context.symbolic;
	let children = symbolic.assembly_forest().children(supernode);

	let outcomes = process_siblings(context, children, par);

	// merge the children's summaries in child order, stopping at the first
	// failure
	let mut result = LdlResult::<I, T::Real>::default();
	let mut child_schurs = Vec::with_capacity(outcomes.len());
	for outcome in outcomes {
		match outcome {
			Ok((contribution, schur)) => {
				result.merge(contribution);
				child_schurs.push(schur);
			}
			Err(partial) => {
				result.merge(partial);
				return Err(result);
			}
		}
	}

	match right_looking_supernode_finalize(context, supernode, children, child_schurs, &mut result, par) {
		Ok(schur) => Ok((result, schur)),
		Err(()) => Err(result),
	}
}

fn right_looking_supernode_finalize<I: Index, T: ComplexField>(
	context: &RightLookingContext<'_, I, T>,
	supernode: usize,
	children: &[I],
	child_schurs: Vec<Mat<T>>,
	result: &mut LdlResult<I, T::Real>,
	par: Par,
) -> Result<Mat<T>, ()> {
	let symbolic = context.symbolic;
	let params = context.params;
	let kind = params.factorization_type;

	let size = symbolic.supernode_size(supernode);
	let degree = symbolic.degree(supernode);
	let start = symbolic.supernode_start(supernode);

	let mut diag_block = unsafe { context.storage.diag_mut(supernode) };
	let mut panel = unsafe { context.storage.panel_mut(supernode) };

	initialize_block_column(supernode, context.matrix, symbolic, kind, diag_block.rb_mut(), panel.rb_mut());

	let mut schur = Mat::<T>::zeros(degree, degree);
	merge_child_schur_complements(
		supernode,
		symbolic,
		diag_block.rb_mut(),
		panel.rb_mut(),
		schur.as_mut(),
		children,
		child_schurs,
	);

	let num_supernode_pivots = match context.supernode_permutation {
		Some(perm) => {
			let perm = unsafe { core::slice::from_raw_parts_mut(perm.0.add(start), size) };
			pivoted_ldl_adjoint_in_place(diag_block.rb_mut(), perm)
		}
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
		return Err(());
	}
	result.incorporate_supernode(size, degree);

	if degree == 0 {
		return Ok(schur);
	}

	if let Some(perm) = context.supernode_permutation {
		let perm = unsafe { core::slice::from_raw_parts(perm.0.add(start) as *const I, size) };
		let mut workspace = vec![T::zero(); degree * size];
		permute_panel_columns(panel.rb_mut(), perm, &mut workspace);
	}
	solve_against_diagonal_block(kind, diag_block.rb(), panel.rb_mut(), par);

	// S := S - L(below, K) Z(K, below)
	let mut scaled = Mat::<T>::zeros(size, degree);
	form_scaled_transpose(kind, diag_block.rb(), panel.rb(), scaled.as_mut());
	matmul_lower(schur.as_mut(), Accum::Add, panel.rb(), scaled.as_ref(), -T::one(), par);

	Ok(schur)
}

// scatters the children's schur complements into the parent front: the
// upper-left part lands in the diagonal block, the lower-left part in the
// panel, and the bottom-right part in the parent's own schur complement
fn merge_child_schur_complements<I: Index, T: ComplexField>(
	supernode: usize,
	symbolic: &SymbolicSupernodalLdl<I>,
	diag_block: MatMut<'_, T>,
	panel: MatMut<'_, T>,
	schur: MatMut<'_, T>,
	children: &[I],
	child_schurs: Vec<Mat<T>>,
) {
	let supernode_size = symbolic.supernode_size(supernode);
	let supernode_start = symbolic.supernode_start(supernode);
	let main_indices = symbolic.structure(supernode);

	let mut diag_block = diag_block;
	let mut panel = panel;
	let mut schur = schur;

	for (&child, child_schur) in children.iter().zip(child_schurs) {
		let child = child.zx();
		let child_indices = symbolic.structure(child);
		let child_degree = child_indices.len();
		let child_schur = child_schur.as_ref();

		// relative indices of the child structure within the parent front
		let mut child_rel_indices = vec![0usize; child_degree];
		let mut num_child_diag_indices = 0usize;
		{
			let mut i_rel = supernode_size;
			for (rel, &row) in child_rel_indices.iter_mut().zip(child_indices) {
				let row = row.zx();
				if row < supernode_start + supernode_size {
					*rel = row - supernode_start;
					num_child_diag_indices += 1;
				} else {
					while main_indices[i_rel - supernode_size].zx() != row {
						i_rel += 1;
						debug_assert!(i_rel - supernode_size < main_indices.len());
					}
					*rel = i_rel;
				}
			}
		}

		for j in 0..child_degree {
			let j_rel = child_rel_indices[j];
			if j < num_child_diag_indices {
				for i in j..num_child_diag_indices {
					let i_rel = child_rel_indices[i];
					diag_block[(i_rel, j_rel)] += child_schur[(i, j)];
				}
				for i in num_child_diag_indices..child_degree {
					let i_rel = child_rel_indices[i];
					panel[(i_rel - supernode_size, j_rel)] += child_schur[(i, j)];
				}
			} else {
				for i in j..child_degree {
					let i_rel = child_rel_indices[i];
					schur[(i_rel - supernode_size, j_rel - supernode_size)] += child_schur[(i, j)];
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::super::tests_support;
	use super::*;
	use equator::assert;
	use crate::sparse::SymmetricOrdering;
	use crate::sparse::linalg::supernodal::{
		SupernodalLdlRef, factorize_supernodal_numeric_left_looking, factorize_supernodal_numeric_scratch, factorize_supernodal_symbolic,
	};
	use dyn_stack::{MemBuffer, MemStack};

	#[test]
	fn test_right_looking_ldlt_reconstruction() {
		let matrix = tests_support::grid_laplacian_f64(5, 5, 1.0);
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
			Par::Seq,
		);
		assert!(result.is_success(n));

		let factor = SupernodalLdlRef::new(&symbolic, &lower_values, &diag_values);
		let err = tests_support::reconstruction_error_ldlt(&matrix, factor);
		assert!(err < 1e-12);
	}

	#[test]
	fn test_left_and_right_looking_factors_agree() {
		let matrix = tests_support::grid_laplacian_f64(8, 6, 1.0);
		let n = matrix.num_rows();
		let symbolic = factorize_supernodal_symbolic(&matrix, &SymmetricOrdering::identity(), None).unwrap();
		let params = NumericParams::<i64, f64>::default();

		let mut left_lower = vec![0.0f64; symbolic.len_lower_val()];
		let mut left_diag = vec![0.0f64; symbolic.len_diag_val()];
		let mut mem = MemBuffer::new(factorize_supernodal_numeric_scratch::<i64, f64>(&symbolic));
		let left_result = factorize_supernodal_numeric_left_looking(
			&matrix,
			&symbolic,
			&mut left_lower,
			&mut left_diag,
			None,
			&params,
			Par::Seq,
			MemStack::new(&mut mem),
		);
		assert!(left_result.is_success(n));

		let mut right_lower = vec![0.0f64; symbolic.len_lower_val()];
		let mut right_diag = vec![0.0f64; symbolic.len_diag_val()];
		let right_result = factorize_supernodal_numeric_right_looking(
			&matrix,
			&symbolic,
			&mut right_lower,
			&mut right_diag,
			None,
			&params,
			f64::INFINITY,
			Par::Seq,
		);
		assert!(right_result.is_success(n));

		// each driver on its own is exactly deterministic: rerunning it
		// reproduces the factor to the last bit
		{
			let mut rerun_lower = vec![0.0f64; symbolic.len_lower_val()];
			let mut rerun_diag = vec![0.0f64; symbolic.len_diag_val()];
			let rerun = factorize_supernodal_numeric_right_looking(
				&matrix,
				&symbolic,
				&mut rerun_lower,
				&mut rerun_diag,
				None,
				&params,
				f64::INFINITY,
				Par::Seq,
			);
			assert!(rerun.is_success(n));
			assert_eq!(right_lower, rerun_lower);
			assert_eq!(right_diag, rerun_diag);
		}
		{
			let mut rerun_lower = vec![0.0f64; symbolic.len_lower_val()];
			let mut rerun_diag = vec![0.0f64; symbolic.len_diag_val()];
			let mut mem = MemBuffer::new(factorize_supernodal_numeric_scratch::<i64, f64>(&symbolic));
			let rerun = factorize_supernodal_numeric_left_looking(
				&matrix,
				&symbolic,
				&mut rerun_lower,
				&mut rerun_diag,
				None,
				&params,
				Par::Seq,
				MemStack::new(&mut mem),
			);
			assert!(rerun.is_success(n));
			assert_eq!(left_lower, rerun_lower);
			assert_eq!(left_diag, rerun_diag);
		}

		// across the two invariants the same update terms are summed
		// through different association trees (direct per-descendant
		// application vs schur accumulation), so the factors agree to a
		// reassociation-of-rounding bound rather than bitwise; DESIGN.md
		// documents this amended guarantee
		for (l, r) in left_lower.iter().zip(&right_lower) {
			assert!((l - r).abs() < 1e-12);
		}
		for (l, r) in left_diag.iter().zip(&right_diag) {
			assert!((l - r).abs() < 1e-12);
		}
	}

	#[test]
	fn test_right_looking_parallel_matches_sequential() {
		let matrix = tests_support::grid_laplacian_f64(12, 9, 1.0);
		let n = matrix.num_rows();
		let symbolic = factorize_supernodal_symbolic(&matrix, &SymmetricOrdering::identity(), None).unwrap();
		let params = NumericParams::<i64, f64>::default();

		let mut seq_lower = vec![0.0f64; symbolic.len_lower_val()];
		let mut seq_diag = vec![0.0f64; symbolic.len_diag_val()];
		let seq_result = factorize_supernodal_numeric_right_looking(
			&matrix,
			&symbolic,
			&mut seq_lower,
			&mut seq_diag,
			None,
			&params,
			f64::INFINITY,
			Par::Seq,
		);
		assert!(seq_result.is_success(n));

		let mut par_lower = vec![0.0f64; symbolic.len_lower_val()];
		let mut par_diag = vec![0.0f64; symbolic.len_diag_val()];
		let par_result = factorize_supernodal_numeric_right_looking(
			&matrix,
			&symbolic,
			&mut par_lower,
			&mut par_diag,
			None,
			&params,
			0.0,
			Par::rayon(4),
		);
		assert!(par_result.is_success(n));

		// per-supernode arithmetic is unchanged by the task split
		assert_eq!(seq_lower, par_lower);
		assert_eq!(seq_diag, par_diag);
	}
}
