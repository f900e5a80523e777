//! matrix multiplication kernels.
//!
//! the supernodal updates only ever need a handful of shapes: a general
//! `C (+)= α A B`, the same with the left operand used through its adjoint,
//! a variant that touches only the lower triangle of a square destination,
//! and the hermitian rank-k outer product. the transposed operand of the LDL
//! trailing update is always materialized by the caller as a scaled
//! transpose, so no strided-transpose view is needed here.

use super::{Accum, Conj};
use crate::{ComplexField, MatMut, MatRef, Par};
use equator::assert;

const MIN_PAR_COLS: usize = 8;
const MIN_PAR_FLOPS: usize = 256 * 1024;

#[inline]
fn flops(m: usize, n: usize, k: usize) -> usize {
	m.saturating_mul(n).saturating_mul(k)
}

/// `dst (+)= alpha * lhs * rhs`
#[track_caller]
pub fn matmul<T: ComplexField>(dst: MatMut<'_, T>, accum: Accum, lhs: MatRef<'_, T>, rhs: MatRef<'_, T>, alpha: T, par: Par) {
	assert!(all(dst.nrows() == lhs.nrows(), dst.ncols() == rhs.ncols(), lhs.ncols() == rhs.nrows()));

	let mut dst = dst;
	if let Accum::Replace = accum {
		dst.fill(T::zero());
	}
	matmul_impl(dst, lhs, rhs, alpha, par);
}

fn matmul_impl<T: ComplexField>(dst: MatMut<'_, T>, lhs: MatRef<'_, T>, rhs: MatRef<'_, T>, alpha: T, par: Par) {
	let n = dst.ncols();
	if matches!(par, Par::Rayon(_)) && n >= MIN_PAR_COLS && flops(dst.nrows(), n, lhs.ncols()) >= MIN_PAR_FLOPS {
		let (dst_left, dst_right) = dst.split_at_col_mut(n / 2);
		let (rhs_left, rhs_right) = (rhs.subcols(0, n / 2), rhs.subcols(n / 2, n - n / 2));
		rayon::join(
			|| matmul_impl(dst_left, lhs, rhs_left, alpha, par),
			|| matmul_impl(dst_right, lhs, rhs_right, alpha, par),
		);
		return;
	}

	let mut dst = dst;
	let zero = T::zero();
	for j in 0..n {
		for k in 0..lhs.ncols() {
			let beta = alpha * rhs[(k, j)];
			if beta == zero {
				continue;
			}
			let lhs_col = lhs.col(k);
			let dst_col = dst.col_mut(j);
			for (d, &l) in dst_col.iter_mut().zip(lhs_col) {
				*d += l * beta;
			}
		}
	}
}

/// `dst (+)= alpha * op(lhs)^T * rhs`, where `op` optionally conjugates, so
/// that `conj_lhs == Conj::Yes` uses the adjoint of `lhs`
#[track_caller]
pub fn matmul_adjoint_lhs<T: ComplexField>(
	dst: MatMut<'_, T>,
	accum: Accum,
	lhs: MatRef<'_, T>,
	conj_lhs: Conj,
	rhs: MatRef<'_, T>,
	alpha: T,
	par: Par,
) {
	assert!(all(dst.nrows() == lhs.ncols(), dst.ncols() == rhs.ncols(), lhs.nrows() == rhs.nrows()));

	let n = dst.ncols();
	if matches!(par, Par::Rayon(_)) && n >= MIN_PAR_COLS && flops(dst.nrows(), n, lhs.nrows()) >= MIN_PAR_FLOPS {
		let (dst_left, dst_right) = dst.split_at_col_mut(n / 2);
		let (rhs_left, rhs_right) = (rhs.subcols(0, n / 2), rhs.subcols(n / 2, n - n / 2));
		rayon::join(
			|| matmul_adjoint_lhs(dst_left, accum, lhs, conj_lhs, rhs_left, alpha, par),
			|| matmul_adjoint_lhs(dst_right, accum, lhs, conj_lhs, rhs_right, alpha, par),
		);
		return;
	}

	let mut dst = dst;
	for j in 0..n {
		let rhs_col = rhs.col(j);
		for i in 0..lhs.ncols() {
			let lhs_col = lhs.col(i);
			let mut acc = T::zero();
			for (&l, &r) in lhs_col.iter().zip(rhs_col) {
				acc += conj_lhs.apply(l) * r;
			}
			let acc = alpha * acc;
			match accum {
				Accum::Replace => dst[(i, j)] = acc,
				Accum::Add => dst[(i, j)] += acc,
			}
		}
	}
}

/// `dst (+)= alpha * lhs * rhs`, writing only the lower triangle of the
/// square destination
#[track_caller]
pub fn matmul_lower<T: ComplexField>(dst: MatMut<'_, T>, accum: Accum, lhs: MatRef<'_, T>, rhs: MatRef<'_, T>, alpha: T, par: Par) {
	assert!(all(
		dst.nrows() == dst.ncols(),
		dst.nrows() == lhs.nrows(),
		dst.ncols() == rhs.ncols(),
		lhs.ncols() == rhs.nrows()
	));
	let _ = par;

	let n = dst.ncols();
	let zero = T::zero();
	let mut dst = dst;
	for j in 0..n {
		if let Accum::Replace = accum {
			dst.col_mut(j)[j..].fill(T::zero());
		}
		for k in 0..lhs.ncols() {
			let beta = alpha * rhs[(k, j)];
			if beta == zero {
				continue;
			}
			let lhs_col = &lhs.col(k)[j..];
			let dst_col = &mut dst.col_mut(j)[j..];
			for (d, &l) in dst_col.iter_mut().zip(lhs_col) {
				*d += l * beta;
			}
		}
	}
}

/// `dst += alpha * lhs * op(lhs)^T` on the lower triangle of the square
/// destination, with `op` conjugating when `conj_lhs == Conj::Yes` (the
/// hermitian rank-k update)
#[track_caller]
pub fn rank_update_lower<T: ComplexField>(dst: MatMut<'_, T>, lhs: MatRef<'_, T>, conj_lhs: Conj, alpha: T::Real, par: Par) {
	assert!(all(dst.nrows() == dst.ncols(), dst.nrows() == lhs.nrows()));
	let _ = par;

	let n = dst.ncols();
	let zero = T::zero();
	let mut dst = dst;
	for j in 0..n {
		for k in 0..lhs.ncols() {
			let beta = conj_lhs.apply(lhs[(j, k)]).scale_real(alpha);
			if beta == zero {
				continue;
			}
			let lhs_col = &lhs.col(k)[j..];
			let dst_col = &mut dst.col_mut(j)[j..];
			for (d, &l) in dst_col.iter_mut().zip(lhs_col) {
				*d += l * beta;
			}
		}
	}
}
