//! supernodal hermitian DPP sampling.
//!
//! the sampler is the supernodal $LDL^H$ factorization with its diagonal
//! kernel replaced by the coin-flip variant: every pivot of a diagonal
//! block decides membership of its index with probability `min(1, Re(d))`,
//! and an excluded pivot continues as `d - 1`. everything else — the
//! descendant updates, panel solves, and structure bookkeeping — is shared
//! with the factorization. sampled indices are reported in the original
//! (unpermuted) numbering, sorted.

use super::supernodal::left_looking::left_looking_supernode_update;
use super::supernodal::{FactorStorage, SupernodalLdlRef, SymbolicSupernodalLdl, initialize_block_column};
use super::FactorizationType;
use crate::ftz::FlushToZeroGuard;
use crate::linalg::cholesky::solve_against_diagonal_block;
use crate::linalg::dpp::sample_lower_hermitian_dpp;
use crate::sparse::CoordinateMatrix;
use crate::{ComplexField, Index, Par, RealField};
use dyn_stack::{MemStack, StackReq};
use equator::assert;
use rand::Rng;
use reborrow::*;

/// size of the workspace required by [`sample_supernodal_ldl`]; identical
/// to the factorization workspace
pub fn sample_supernodal_ldl_scratch<I: Index, T: ComplexField>(symbolic: &SymbolicSupernodalLdl<I>) -> StackReq {
	super::supernodal::factorize_supernodal_numeric_scratch::<I, T>(symbolic)
}

/// draws one exact sample from the hermitian DPP with marginal kernel given
/// by the (permuted) input matrix, leaving the coin-flip factorization in
/// the value buffers.
///
/// returns the sampled indices in the original numbering, sorted
#[allow(clippy::too_many_arguments)]
pub fn sample_supernodal_ldl<I: Index, T: ComplexField, R: Rng>(
	matrix: &CoordinateMatrix<I, T>,
	symbolic: &SymbolicSupernodalLdl<I>,
	lower_values: &mut [T],
	diag_values: &mut [T],
	maximum_likelihood: bool,
	block_size: usize,
	rng: &mut R,
	stack: &mut MemStack,
) -> Vec<usize> {
	let n = symbolic.nrows();
	let n_supernodes = symbolic.n_supernodes();
	let max_size = symbolic.max_supernode_size();
	let max_degree = symbolic.max_degree();
	let kind = FactorizationType::LdlAdjoint;

	assert!(all(
		matrix.num_rows() == n,
		matrix.num_columns() == n,
		lower_values.len() == symbolic.len_lower_val(),
		diag_values.len() == symbolic.len_diag_val()
	));

	let _flush_to_zero = FlushToZeroGuard::new();
	let storage = FactorStorage::new(symbolic, lower_values, diag_values);
	let permutation = symbolic.permutation();

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

	let mut sample = Vec::with_capacity(n);

	for supernode in 0..n_supernodes {
		let start = symbolic.supernode_start(supernode);
		let degree = symbolic.degree(supernode);

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
			Par::Seq,
		);

		// sample and factor the diagonal block
		let supernode_sample = sample_lower_hermitian_dpp(block_size, maximum_likelihood, diag_block.rb_mut(), rng);
		for index in supernode_sample {
			let row = start + index;
			sample.push(permutation.apply_inverse(row));
		}

		if degree > 0 {
			solve_against_diagonal_block(kind, diag_block.rb(), panel.rb_mut(), Par::Seq);
		}
	}

	sample.sort_unstable();
	sample
}

/// log-likelihood of a completed coin-flip factorization: the sum of
/// `log|d|` over the diagonal of the factor
pub fn supernodal_log_likelihood<I: Index, T: ComplexField>(factor: SupernodalLdlRef<'_, I, T>) -> T::Real {
	let symbolic = factor.symbolic();
	let mut acc = <T::Real as ComplexField>::zero();
	for supernode in 0..symbolic.n_supernodes() {
		let diag = factor.diag_block(supernode);
		for j in 0..diag.ncols() {
			acc += diag[(j, j)].abs().ln();
		}
	}
	acc
}

#[cfg(test)]
mod tests {
	use super::super::supernodal::{factorize_supernodal_symbolic, tests_support};
	use super::*;
	use equator::assert;
	use crate::linalg::dpp::sample_lower_hermitian_dpp_unblocked;
	use crate::sparse::SymmetricOrdering;
	use crate::Mat;
	use dyn_stack::MemBuffer;
	use rand::rngs::StdRng;
	use rand::SeedableRng;

	// shifted 2-d negative laplacian kernel, scaled
	fn laplacian_kernel(x_size: usize, y_size: usize, shift: f64, scale: f64) -> CoordinateMatrix<i64, f64> {
		let mut matrix = tests_support::grid_laplacian_f64(x_size, y_size, 1.0 + shift);
		for entry in matrix.entries_mut() {
			entry.value *= scale;
		}
		matrix
	}

	#[test]
	fn test_ml_sample_matches_dense_elimination() {
		let (x_size, y_size) = (8, 8);
		let matrix = laplacian_kernel(x_size, y_size, 0.0, 0.75);
		let n = matrix.num_rows();

		let symbolic = factorize_supernodal_symbolic(&matrix, &SymmetricOrdering::identity(), None).unwrap();
		let mut lower_values = vec![0.0f64; symbolic.len_lower_val()];
		let mut diag_values = vec![0.0f64; symbolic.len_diag_val()];

		let mut rng = StdRng::seed_from_u64(17);
		let mut mem = MemBuffer::new(sample_supernodal_ldl_scratch::<i64, f64>(&symbolic));
		let sample = sample_supernodal_ldl(
			&matrix,
			&symbolic,
			&mut lower_values,
			&mut diag_values,
			true,
			64,
			&mut rng,
			MemStack::new(&mut mem),
		);

		// the maximum-likelihood coin is deterministic, so the dense
		// elimination of the same kernel must select the same indices
		let mut dense = Mat::<f64>::zeros(n, n);
		for entry in matrix.entries() {
			dense[(entry.row.zx(), entry.column.zx())] = entry.value;
		}
		let mut dense_sample = Vec::new();
		let mut rng = StdRng::seed_from_u64(17);
		sample_lower_hermitian_dpp_unblocked(true, dense.as_mut(), &mut rng, &mut dense_sample);

		assert_eq!(sample, dense_sample);

		// every pivot of this kernel stays above its smallest eigenvalue
		// (about 0.93), so the deterministic coin keeps every index
		assert_eq!(sample.len(), n);
	}

	#[test]
	fn test_log_likelihood_matches_factor_diagonal() {
		let matrix = laplacian_kernel(8, 8, 0.0, 0.75);

		let symbolic = factorize_supernodal_symbolic(&matrix, &SymmetricOrdering::identity(), None).unwrap();
		let mut lower_values = vec![0.0f64; symbolic.len_lower_val()];
		let mut diag_values = vec![0.0f64; symbolic.len_diag_val()];

		let mut rng = StdRng::seed_from_u64(3);
		let mut mem = MemBuffer::new(sample_supernodal_ldl_scratch::<i64, f64>(&symbolic));
		let _sample = sample_supernodal_ldl(
			&matrix,
			&symbolic,
			&mut lower_values,
			&mut diag_values,
			true,
			64,
			&mut rng,
			MemStack::new(&mut mem),
		);

		let factor = SupernodalLdlRef::new(&symbolic, &lower_values, &diag_values);
		let reported = supernodal_log_likelihood(factor);

		// recompute from the stored diagonal blocks
		let mut expected = 0.0f64;
		for supernode in 0..symbolic.n_supernodes() {
			let diag = factor.diag_block(supernode);
			for j in 0..diag.ncols() {
				expected += diag[(j, j)].abs().ln();
			}
		}
		assert!((reported - expected).abs() < 1e-10);
	}

	#[test]
	fn test_random_sample_is_reproducible() {
		let matrix = laplacian_kernel(6, 6, 0.0, 0.2);

		let symbolic = factorize_supernodal_symbolic(&matrix, &SymmetricOrdering::identity(), None).unwrap();

		let mut draw = |seed: u64| {
			let mut lower_values = vec![0.0f64; symbolic.len_lower_val()];
			let mut diag_values = vec![0.0f64; symbolic.len_diag_val()];
			let mut rng = StdRng::seed_from_u64(seed);
			let mut mem = MemBuffer::new(sample_supernodal_ldl_scratch::<i64, f64>(&symbolic));
			sample_supernodal_ldl(
				&matrix,
				&symbolic,
				&mut lower_values,
				&mut diag_values,
				false,
				64,
				&mut rng,
				MemStack::new(&mut mem),
			)
		};

		assert_eq!(draw(5), draw(5));

		// samples are valid index sets
		let sample = draw(9);
		for window in sample.windows(2) {
			assert!(window[0] < window[1]);
		}
	}
}
