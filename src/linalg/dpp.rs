//! dense determinantal point process sampling kernels.
//!
//! these are the coin-flip variants of the in-place factorizations: the
//! elimination is the same as the corresponding `LDL^H` (or LU) sweep, but
//! each diagonal pivot `d` first decides, with probability `min(1, Re(d))`,
//! whether its index belongs to the sample. an excluded pivot proceeds with
//! `d - 1`, which cancels the associated eigen-component from the remaining
//! schur complement. under maximum likelihood the draw is replaced by the
//! deterministic rule `u = 1/2`.

use super::matmul::{matmul, matmul_lower};
use super::triangular_solve::{
	solve_diag_unit_lower_transpose_on_right, solve_unit_lower_triangular_in_place, solve_upper_triangular_on_right,
};
use super::{Accum, Conj, cholesky::FactorizationType, cholesky::form_scaled_transpose};
use crate::{ComplexField, Mat, MatMut, Par, RealField};
use equator::assert;
use rand::Rng;
use reborrow::*;

#[inline]
fn coin_flip<T: ComplexField, R: Rng>(maximum_likelihood: bool, delta: T::Real, rng: &mut R) -> bool {
	let half = <T::Real as ComplexField>::from_f64(0.5);
	if maximum_likelihood {
		delta >= half
	} else {
		let u = <T::Real as ComplexField>::from_f64(rng.gen::<f64>());
		u < delta
	}
}

/// unblocked hermitian coin-flip elimination; kept indices (relative to this
/// block) are appended to `sample`
pub fn sample_lower_hermitian_dpp_unblocked<T: ComplexField, R: Rng>(
	maximum_likelihood: bool,
	A: MatMut<'_, T>,
	rng: &mut R,
	sample: &mut Vec<usize>,
) {
	let n = A.nrows();
	let mut A = A;
	for i in 0..n {
		let mut delta = A[(i, i)].real();
		if coin_flip::<T, R>(maximum_likelihood, delta, rng) {
			sample.push(i);
		} else {
			delta = delta - <T::Real as ComplexField>::one();
		}
		A[(i, i)] = T::from_real(delta);

		let delta_inv = delta.recip();
		for k in i + 1..n {
			A[(k, i)] = A[(k, i)].scale_real(delta_inv);
		}
		for j in i + 1..n {
			let eta = A[(j, i)].conj().scale_real(delta);
			if eta == T::zero() {
				continue;
			}
			let col_i = unsafe { core::slice::from_raw_parts(A.rb().as_ptr().add(i * A.col_stride()), n) };
			let col_j = A.col_mut(j);
			for k in j..n {
				col_j[k] -= col_i[k] * eta;
			}
		}
	}
}

/// blocked hermitian coin-flip elimination over the lower triangle of `A`;
/// returns the sorted sampled indices
#[track_caller]
pub fn sample_lower_hermitian_dpp<T: ComplexField, R: Rng>(
	block_size: usize,
	maximum_likelihood: bool,
	A: MatMut<'_, T>,
	rng: &mut R,
) -> Vec<usize> {
	assert!(A.nrows() == A.ncols());
	let n = A.nrows();
	let block_size = block_size.max(1);
	let mut A = A;

	let mut sample = Vec::with_capacity(n);
	let mut block_sample = Vec::new();
	let mut scaled = Mat::<T>::zeros(block_size, n.saturating_sub(block_size));

	let mut i = 0;
	while i < n {
		let bs = Ord::min(n - i, block_size);

		let (top, bot) = A.rb_mut().split_at_row_mut(i);
		let _ = top;
		let (_, rest) = bot.split_at_col_mut(i);
		let (mut diag, mut panel, trailing) = {
			let (left, right) = rest.split_at_col_mut(bs);
			let (diag, panel) = left.split_at_row_mut(bs);
			let (_, trailing) = right.split_at_row_mut(bs);
			(diag, panel, trailing)
		};

		block_sample.clear();
		sample_lower_hermitian_dpp_unblocked(maximum_likelihood, diag.rb_mut(), rng, &mut block_sample);
		for &index in &block_sample {
			sample.push(i + index);
		}
		if i + bs == n {
			break;
		}

		solve_diag_unit_lower_transpose_on_right(diag.rb(), Conj::Yes, panel.rb_mut(), Par::Seq);

		let rem = n - i - bs;
		let mut z = scaled.as_mut().submatrix_mut(0, 0, bs, rem);
		form_scaled_transpose(FactorizationType::LdlAdjoint, diag.rb(), panel.rb(), z.rb_mut());
		matmul_lower(trailing, Accum::Add, panel.rb(), z.rb(), -T::one(), Par::Seq);

		i += bs;
	}
	sample.sort_unstable();
	sample
}

/// unblocked LU-style coin-flip elimination of a general square kernel
pub fn sample_non_hermitian_dpp_unblocked<T: ComplexField, R: Rng>(
	maximum_likelihood: bool,
	A: MatMut<'_, T>,
	rng: &mut R,
	sample: &mut Vec<usize>,
) {
	let n = A.nrows();
	let mut A = A;
	for i in 0..n {
		let mut delta = A[(i, i)];
		if coin_flip::<T, R>(maximum_likelihood, delta.real(), rng) {
			sample.push(i);
		} else {
			delta = delta - T::one();
		}
		A[(i, i)] = delta;

		// scale the column of L
		let delta_inv = delta.recip();
		for k in i + 1..n {
			A[(k, i)] = A[(k, i)] * delta_inv;
		}

		// rank-one update of the trailing matrix against the row of U
		for j in i + 1..n {
			let eta = A[(i, j)];
			if eta == T::zero() {
				continue;
			}
			let col_i = unsafe { core::slice::from_raw_parts(A.rb().as_ptr().add(i * A.col_stride()), n) };
			let col_j = A.col_mut(j);
			for k in i + 1..n {
				col_j[k] -= col_i[k] * eta;
			}
		}
	}
}

/// blocked LU-style coin-flip elimination of a general square kernel;
/// returns the sorted sampled indices
#[track_caller]
pub fn sample_non_hermitian_dpp<T: ComplexField, R: Rng>(block_size: usize, maximum_likelihood: bool, A: MatMut<'_, T>, rng: &mut R) -> Vec<usize> {
	assert!(A.nrows() == A.ncols());
	let n = A.nrows();
	let block_size = block_size.max(1);
	let mut A = A;

	let mut sample = Vec::with_capacity(n);
	let mut block_sample = Vec::new();

	let mut i = 0;
	while i < n {
		let bs = Ord::min(n - i, block_size);

		let (_, bot_right) = {
			let (top, bot) = A.rb_mut().split_at_row_mut(i);
			let _ = top;
			bot.split_at_col_mut(i)
		};
		let (left, right) = bot_right.split_at_col_mut(bs);
		let (mut diag, mut lower) = left.split_at_row_mut(bs);
		let (mut upper, trailing) = right.split_at_row_mut(bs);

		block_sample.clear();
		sample_non_hermitian_dpp_unblocked(maximum_likelihood, diag.rb_mut(), rng, &mut block_sample);
		for &index in &block_sample {
			sample.push(i + index);
		}
		if i + bs == n {
			break;
		}

		// L21 := A21 U11^-1, U12 := L11^-1 A12
		solve_upper_triangular_on_right(diag.rb(), lower.rb_mut(), Par::Seq);
		solve_unit_lower_triangular_in_place(diag.rb(), Conj::No, upper.rb_mut(), Par::Seq);

		// A22 -= L21 U12
		matmul(trailing, Accum::Add, lower.rb(), upper.rb(), -T::one(), Par::Seq);

		i += bs;
	}
	sample.sort_unstable();
	sample
}

/// log-likelihood of a completed coin-flip elimination: the sum of
/// `log|d_k|` over the diagonal of the factored kernel
pub fn dpp_log_likelihood<T: ComplexField>(diag: impl Iterator<Item = T>) -> T::Real {
	let mut acc = <T::Real as ComplexField>::zero();
	for d in diag {
		acc += d.abs().ln();
	}
	acc
}
