//! in-place blocked factorizations of a dense symmetric block.
//!
//! the three kernel families factor the lower triangle of a column-major
//! view: `L L^H` (cholesky), `L D L^H` with real diagonal, and `L D L^T`
//! with (possibly complex) diagonal. each returns the number of successful
//! pivots: on failure at column `k`, the first `k` columns are committed and
//! the trailing submatrix is left unspecified.
//!
//! the dynamically regularized variants shift dead-zone pivots to a
//! threshold and log the shifts; the diagonally pivoted variant selects the
//! largest trailing diagonal entry at each step and reports the row
//! permutation it applied.

use super::matmul::{matmul, matmul_lower};
use super::triangular_solve::{solve_diag_unit_lower_transpose_on_right, solve_lower_transpose_on_right};
use super::Conj;
use crate::{ComplexField, Index, Mat, MatMut, MatRef, Par};
use equator::assert;
use reborrow::*;

/// family of symmetric factorizations applied to diagonal blocks
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum FactorizationType {
	/// `L L^H`, requires a positive-definite input
	Cholesky,
	/// `L D L^H` with unit lower `L` and real diagonal `D`
	#[default]
	LdlAdjoint,
	/// `L D L^T` with unit lower `L` and diagonal `D`
	LdlTranspose,
}

impl FactorizationType {
	/// conjugation applied to the left factor when transposing it
	#[inline]
	pub fn conj(self) -> Conj {
		match self {
			FactorizationType::Cholesky | FactorizationType::LdlAdjoint => Conj::Yes,
			FactorizationType::LdlTranspose => Conj::No,
		}
	}
}

/// dynamic regularization configuration handed to the dense kernels.
///
/// pivots falling strictly inside `(-negative_threshold, positive_threshold)`
/// (restricted by the per-row signature when one is given) are shifted to the
/// boundary and the signed shift is recorded against the original row index
#[derive(Copy, Clone, Debug)]
pub struct DynamicRegularization<'a, I, R> {
	pub positive_threshold: R,
	pub negative_threshold: R,
	/// sign of the expected pivot per original row; `None` means all positive
	pub signatures: Option<&'a [i8]>,
	/// mapping from permuted to original row indices
	pub inverse_permutation: Option<&'a [I]>,
	/// global index of this block's first column
	pub offset: usize,
}

impl<'a, I, R> DynamicRegularization<'a, I, R> {
	#[inline]
	pub(crate) fn with_offset(self, offset: usize) -> Self
	where
		Self: Copy,
	{
		Self { offset, ..self }
	}
}

/// factors the lower triangle of `A` in place, returning the number of
/// successful pivots
#[track_caller]
pub fn factor_in_place<T: ComplexField>(kind: FactorizationType, A: MatMut<'_, T>, block_size: usize, tile_size: usize, par: Par) -> usize {
	assert!(A.nrows() == A.ncols());
	let n = A.nrows();
	if matches!(par, Par::Rayon(_)) && tile_size > 0 && n >= 2 * tile_size {
		factor_tiled(kind, A, tile_size, block_size, par)
	} else {
		factor_blocked(kind, A, block_size, Par::Seq)
	}
}

/// single-threaded blocked factorization
pub fn factor_blocked<T: ComplexField>(kind: FactorizationType, A: MatMut<'_, T>, block_size: usize, par: Par) -> usize {
	let n = A.nrows();
	let block_size = block_size.max(1);
	let mut A = A;

	let mut scaled = Mat::<T>::zeros(block_size, n.saturating_sub(block_size));

	let mut i = 0;
	while i < n {
		let bs = Ord::min(n - i, block_size);

		let (_, _, _, trailing) = split_lower(A.rb_mut(), i);
		let (mut diag, mut panel, trailing) = split_front(trailing, bs);

		let num_diag_pivots = factor_unblocked(kind, diag.rb_mut());
		if num_diag_pivots < bs {
			return i + num_diag_pivots;
		}
		if i + bs == n {
			break;
		}

		solve_against_diagonal_block(kind, diag.rb(), panel.rb_mut(), par);

		let rem = n - i - bs;
		let mut z = scaled.as_mut().submatrix_mut(0, 0, bs, rem);
		form_scaled_transpose(kind, diag.rb(), panel.rb(), z.rb_mut());

		matmul_lower(trailing, super::Accum::Add, panel.rb(), z.rb(), -T::one(), par);

		i += bs;
	}
	n
}

// parallel variant: the panel solve parallelizes over rows internally, and
// the trailing update forks one task per column stripe of the tile grid
fn factor_tiled<T: ComplexField>(kind: FactorizationType, A: MatMut<'_, T>, tile_size: usize, block_size: usize, par: Par) -> usize {
	let n = A.nrows();
	let mut A = A;

	let mut scaled = Mat::<T>::zeros(tile_size, n.saturating_sub(tile_size));

	let mut i = 0;
	while i < n {
		let ts = Ord::min(n - i, tile_size);

		let (_, _, _, trailing) = split_lower(A.rb_mut(), i);
		let (mut diag, mut panel, mut trailing) = split_front(trailing, ts);

		let num_diag_pivots = factor_blocked(kind, diag.rb_mut(), block_size, Par::Seq);
		if num_diag_pivots < ts {
			return i + num_diag_pivots;
		}
		if i + ts == n {
			break;
		}

		solve_against_diagonal_block(kind, diag.rb(), panel.rb_mut(), par);

		let rem = n - i - ts;
		let mut z = scaled.as_mut().submatrix_mut(0, 0, ts, rem);
		form_scaled_transpose(kind, diag.rb(), panel.rb(), z.rb_mut());
		let z = z.rb();
		let panel = panel.rb();

		let base = SendPtr(trailing.as_mut_ptr());
		let stride = trailing.col_stride();
		rayon::scope(|scope| {
			let mut j = 0;
			while j < rem {
				let js = Ord::min(rem - j, tile_size);
				let base = base;
				scope.spawn(move |_| {
					let base = base;
					// column stripe [j, j + js) of the trailing matrix
					let stripe_rows = rem - j;
					let stripe = unsafe { MatMut::from_raw_parts_mut(base.0.add(j + j * stride), stripe_rows, js, stride) };
					let (stripe_diag, stripe_below) = stripe.split_at_row_mut(js);

					let lhs_diag = panel.subrows(j, js);
					let rhs = z.subcols(j, js);
					matmul_lower(stripe_diag, super::Accum::Add, lhs_diag, rhs, -T::one(), Par::Seq);
					if stripe_rows > js {
						let lhs_below = panel.subrows(j + js, stripe_rows - js);
						matmul(stripe_below, super::Accum::Add, lhs_below, rhs, -T::one(), Par::Seq);
					}
				});
				j += js;
			}
		});

		i += ts;
	}
	n
}

#[derive(Copy, Clone)]
struct SendPtr<T>(*mut T);
unsafe impl<T> Send for SendPtr<T> {}
unsafe impl<T> Sync for SendPtr<T> {}

// splits off the leading `i` columns that have already been factored
fn split_lower<T>(A: MatMut<'_, T>, i: usize) -> (MatMut<'_, T>, MatMut<'_, T>, MatMut<'_, T>, MatMut<'_, T>) {
	let (top, bot) = A.split_at_row_mut(i);
	let (tl, tr) = top.split_at_col_mut(i);
	let (bl, br) = bot.split_at_col_mut(i);
	(tl, tr, bl, br)
}

// splits a trailing matrix into its leading diagonal block, the panel below
// it, and the remaining trailing matrix
fn split_front<T>(A: MatMut<'_, T>, bs: usize) -> (MatMut<'_, T>, MatMut<'_, T>, MatMut<'_, T>) {
	let (left, right) = A.split_at_col_mut(bs);
	let (diag, panel) = left.split_at_row_mut(bs);
	let (_, trailing) = right.split_at_row_mut(bs);
	(diag, panel, trailing)
}

/// unblocked factorization of a small block
pub fn factor_unblocked<T: ComplexField>(kind: FactorizationType, A: MatMut<'_, T>) -> usize {
	match kind {
		FactorizationType::Cholesky => cholesky_unblocked(A),
		FactorizationType::LdlAdjoint => ldl_adjoint_unblocked(A),
		FactorizationType::LdlTranspose => ldl_transpose_unblocked(A),
	}
}

fn cholesky_unblocked<T: ComplexField>(A: MatMut<'_, T>) -> usize {
	let n = A.nrows();
	let mut A = A;
	for i in 0..n {
		let delta = A[(i, i)].real();
		if !(delta > <T::Real as ComplexField>::zero()) {
			A[(i, i)] = T::from_real(delta);
			return i;
		}

		let delta_sqrt = delta.sqrt();
		A[(i, i)] = T::from_real(delta_sqrt);

		let delta_sqrt_inv = delta_sqrt.recip();
		for k in i + 1..n {
			A[(k, i)] = A[(k, i)].scale_real(delta_sqrt_inv);
		}

		for j in i + 1..n {
			let eta = A[(j, i)].conj();
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
	n
}

fn ldl_adjoint_unblocked<T: ComplexField>(A: MatMut<'_, T>) -> usize {
	let n = A.nrows();
	let mut A = A;
	for i in 0..n {
		let delta = A[(i, i)].real();
		A[(i, i)] = T::from_real(delta);
		if delta == <T::Real as ComplexField>::zero() || !delta.is_finite() {
			return i;
		}

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
	n
}

fn ldl_transpose_unblocked<T: ComplexField>(A: MatMut<'_, T>) -> usize {
	let n = A.nrows();
	let mut A = A;
	for i in 0..n {
		let delta = A[(i, i)];
		if delta == T::zero() || !delta.is_finite() {
			return i;
		}

		let delta_inv = delta.recip();
		for k in i + 1..n {
			A[(k, i)] = A[(k, i)] * delta_inv;
		}

		for j in i + 1..n {
			let eta = delta * A[(j, i)];
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
	n
}

/// solves the subdiagonal panel against the factored diagonal block from the
/// right: `L^H` for cholesky, `D L^H` for $LDL^H$, `D L^T` for $LDL^\top$
pub fn solve_against_diagonal_block<T: ComplexField>(kind: FactorizationType, diag: MatRef<'_, T>, panel: MatMut<'_, T>, par: Par) {
	if panel.nrows() == 0 {
		return;
	}
	match kind {
		FactorizationType::Cholesky => solve_lower_transpose_on_right(diag, Conj::Yes, panel, par),
		FactorizationType::LdlAdjoint => solve_diag_unit_lower_transpose_on_right(diag, Conj::Yes, panel, par),
		FactorizationType::LdlTranspose => solve_diag_unit_lower_transpose_on_right(diag, Conj::No, panel, par),
	}
}

/// forms `Z` from the solved panel: `Z = L^H` for cholesky, `Z = D L^H` for
/// $LDL^H$, and `Z = D L^T` for $LDL^\top$, so that the trailing update is
/// always `A -= L Z`
#[track_caller]
pub fn form_scaled_transpose<T: ComplexField>(kind: FactorizationType, diag: MatRef<'_, T>, l: MatRef<'_, T>, z: MatMut<'_, T>) {
	assert!(all(z.nrows() == l.ncols(), z.ncols() == l.nrows()));
	let mut z = z;
	match kind {
		FactorizationType::Cholesky => {
			for j in 0..l.ncols() {
				for i in 0..l.nrows() {
					z[(j, i)] = l[(i, j)].conj();
				}
			}
		}
		FactorizationType::LdlAdjoint => {
			for j in 0..l.ncols() {
				let delta = diag[(j, j)];
				for i in 0..l.nrows() {
					z[(j, i)] = delta * l[(i, j)].conj();
				}
			}
		}
		FactorizationType::LdlTranspose => {
			for j in 0..l.ncols() {
				let delta = diag[(j, j)];
				for i in 0..l.nrows() {
					z[(j, i)] = delta * l[(i, j)];
				}
			}
		}
	}
}

/// dynamically regularized factorization; dead-zone pivots are shifted and
/// appended to `log` as `(original_row, signed_shift)` pairs
pub fn factor_regularized_in_place<I: Index, T: ComplexField>(
	kind: FactorizationType,
	A: MatMut<'_, T>,
	block_size: usize,
	reg: &DynamicRegularization<'_, I, T::Real>,
	log: &mut Vec<(I, T::Real)>,
	par: Par,
) -> usize {
	let n = A.nrows();
	let block_size = block_size.max(1);
	let mut A = A;

	let mut scaled = Mat::<T>::zeros(block_size, n.saturating_sub(block_size));

	let mut i = 0;
	while i < n {
		let bs = Ord::min(n - i, block_size);

		let (_, _, _, trailing) = split_lower(A.rb_mut(), i);
		let (mut diag, mut panel, trailing) = split_front(trailing, bs);

		let num_diag_pivots = factor_regularized_unblocked(kind, diag.rb_mut(), &reg.with_offset(reg.offset + i), log);
		if num_diag_pivots < bs {
			return i + num_diag_pivots;
		}
		if i + bs == n {
			break;
		}

		solve_against_diagonal_block(kind, diag.rb(), panel.rb_mut(), par);

		let rem = n - i - bs;
		let mut z = scaled.as_mut().submatrix_mut(0, 0, bs, rem);
		form_scaled_transpose(kind, diag.rb(), panel.rb(), z.rb_mut());

		matmul_lower(trailing, super::Accum::Add, panel.rb(), z.rb(), -T::one(), par);

		i += bs;
	}
	n
}

fn factor_regularized_unblocked<I: Index, T: ComplexField>(
	kind: FactorizationType,
	A: MatMut<'_, T>,
	reg: &DynamicRegularization<'_, I, T::Real>,
	log: &mut Vec<(I, T::Real)>,
) -> usize {
	let n = A.nrows();
	let zero = <T::Real as ComplexField>::zero();
	let mut A = A;
	for i in 0..n {
		let mut delta = A[(i, i)].real();

		let orig_index = match reg.inverse_permutation {
			Some(iperm) => iperm[i + reg.offset].zx(),
			None => i + reg.offset,
		};
		// cholesky pivots are positive by definition, so the signature
		// vector only directs the LDL families; without the gate a negative
		// signature would log a shift toward a pivot cholesky must reject
		let signature = match kind {
			FactorizationType::Cholesky => 1,
			_ => match reg.signatures {
				Some(signatures) => signatures[orig_index],
				None => {
					if delta >= zero {
						1
					} else {
						-1
					}
				}
			},
		};

		if signature >= 0 {
			if delta <= -reg.positive_threshold {
				return i;
			} else if delta < reg.positive_threshold {
				log.push((I::truncate(orig_index), reg.positive_threshold - delta));
				delta = reg.positive_threshold;
			}
		} else {
			if delta >= reg.negative_threshold {
				return i;
			} else if delta > -reg.negative_threshold {
				log.push((I::truncate(orig_index), -reg.negative_threshold - delta));
				delta = -reg.negative_threshold;
			}
		}

		match kind {
			FactorizationType::Cholesky => {
				if !(delta > zero) {
					return i;
				}
				let delta_sqrt = delta.sqrt();
				A[(i, i)] = T::from_real(delta_sqrt);
				let delta_sqrt_inv = delta_sqrt.recip();
				for k in i + 1..n {
					A[(k, i)] = A[(k, i)].scale_real(delta_sqrt_inv);
				}
				for j in i + 1..n {
					let eta = A[(j, i)].conj();
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
			FactorizationType::LdlAdjoint | FactorizationType::LdlTranspose => {
				A[(i, i)] = T::from_real(delta);
				let delta_inv = delta.recip();
				for k in i + 1..n {
					A[(k, i)] = A[(k, i)].scale_real(delta_inv);
				}
				for j in i + 1..n {
					let lj = A[(j, i)];
					let eta = match kind {
						FactorizationType::LdlTranspose => lj.scale_real(delta),
						_ => lj.conj().scale_real(delta),
					};
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
	}
	n
}

/// diagonally pivoted $LDL^H$: the largest trailing diagonal magnitude is
/// selected at each step, and `perm` receives the applied row permutation
/// (`perm[i]` is the input row now stored at row `i`)
#[track_caller]
pub fn pivoted_ldl_adjoint_in_place<I: Index, T: ComplexField>(A: MatMut<'_, T>, perm: &mut [I]) -> usize {
	let n = A.nrows();
	assert!(all(A.nrows() == A.ncols(), perm.len() == n));
	let mut A = A;

	for (i, p) in perm.iter_mut().enumerate() {
		*p = I::truncate(i);
	}

	for i in 0..n {
		let mut pivot = i;
		let mut pivot_mag = A[(i, i)].real().abs();
		for j in i + 1..n {
			let mag = A[(j, j)].real().abs();
			if mag > pivot_mag {
				pivot = j;
				pivot_mag = mag;
			}
		}
		if pivot != i {
			swap_symmetric_lower(A.rb_mut(), i, pivot);
			perm.swap(i, pivot);
		}

		let delta = A[(i, i)].real();
		A[(i, i)] = T::from_real(delta);
		if delta == <T::Real as ComplexField>::zero() || !delta.is_finite() {
			return i;
		}

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
	n
}

// swaps rows/columns `a < b` of a hermitian matrix stored in its lower
// triangle
fn swap_symmetric_lower<T: ComplexField>(A: MatMut<'_, T>, a: usize, b: usize) {
	debug_assert!(a < b);
	let n = A.nrows();
	let mut A = A;

	for j in 0..a {
		let tmp = A[(a, j)];
		A[(a, j)] = A[(b, j)];
		A[(b, j)] = tmp;
	}

	let tmp = A[(a, a)];
	A[(a, a)] = A[(b, b)];
	A[(b, b)] = tmp;

	for i in a + 1..b {
		let tmp = A[(i, a)];
		A[(i, a)] = A[(b, i)].conj();
		A[(b, i)] = tmp.conj();
	}

	A[(b, a)] = A[(b, a)].conj();

	for i in b + 1..n {
		let tmp = A[(i, a)];
		A[(i, a)] = A[(i, b)];
		A[(i, b)] = tmp;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use equator::assert;
	use crate::scalar::c64;

	fn spd_example(n: usize) -> Mat<f64> {
		// I + 0.5 e e^T, against which every family succeeds
		Mat::from_fn(n, n, |i, j| if i == j { 1.5 } else { 0.5 })
	}

	fn reconstruct_llt(n: usize, f: &Mat<f64>) -> Mat<f64> {
		let mut out = Mat::<f64>::zeros(n, n);
		for i in 0..n {
			for j in 0..n {
				let mut acc = 0.0;
				for k in 0..n {
					let lik = if i >= k { f[(i, k)] } else { 0.0 };
					let ljk = if j >= k { f[(j, k)] } else { 0.0 };
					acc += lik * ljk;
				}
				out[(i, j)] = acc;
			}
		}
		out
	}

	fn reconstruct_ldlt(n: usize, f: &Mat<f64>) -> Mat<f64> {
		let mut out = Mat::<f64>::zeros(n, n);
		for i in 0..n {
			for j in 0..n {
				let mut acc = 0.0;
				for k in 0..n {
					let lik = if i > k {
						f[(i, k)]
					} else if i == k {
						1.0
					} else {
						0.0
					};
					let ljk = if j > k {
						f[(j, k)]
					} else if j == k {
						1.0
					} else {
						0.0
					};
					acc += lik * f[(k, k)] * ljk;
				}
				out[(i, j)] = acc;
			}
		}
		out
	}

	#[test]
	fn test_cholesky_blocked() {
		let n = 13;
		let a = spd_example(n);
		let mut f = a.clone();
		let pivots = factor_blocked(FactorizationType::Cholesky, f.as_mut(), 4, Par::Seq);
		assert!(pivots == n);

		let r = reconstruct_llt(n, &f);
		for i in 0..n {
			for j in 0..=i {
				assert!((r[(i, j)] - a[(i, j)]).abs() < 1e-12);
			}
		}
	}

	#[test]
	fn test_ldl_adjoint_blocked_matches_unblocked() {
		let n = 11;
		let a = spd_example(n);

		let mut f_blocked = a.clone();
		let mut f_unblocked = a.clone();
		assert!(factor_blocked(FactorizationType::LdlAdjoint, f_blocked.as_mut(), 3, Par::Seq) == n);
		assert!(factor_unblocked(FactorizationType::LdlAdjoint, f_unblocked.as_mut()) == n);

		for i in 0..n {
			for j in 0..=i {
				assert!((f_blocked[(i, j)] - f_unblocked[(i, j)]).abs() < 1e-12);
			}
		}

		let r = reconstruct_ldlt(n, &f_blocked);
		for i in 0..n {
			for j in 0..=i {
				assert!((r[(i, j)] - a[(i, j)]).abs() < 1e-12);
			}
		}
	}

	#[test]
	fn test_ldl_transpose_complex_symmetric() {
		let n = 6;
		// complex symmetric (not hermitian) positive-real-part example
		let a = Mat::<c64>::from_fn(n, n, |i, j| {
			if i == j {
				c64::new(4.0, 0.5)
			} else {
				c64::new(0.25, 0.1 * (i + j) as f64)
			}
		});
		let mut f = a.clone();
		assert!(factor_blocked(FactorizationType::LdlTranspose, f.as_mut(), 2, Par::Seq) == n);

		// reconstruct L D L^T and compare against the lower triangle of a
		for i in 0..n {
			for j in 0..=i {
				let mut acc = c64::new(0.0, 0.0);
				for k in 0..n {
					let lik = if i > k {
						f[(i, k)]
					} else if i == k {
						c64::new(1.0, 0.0)
					} else {
						c64::new(0.0, 0.0)
					};
					let ljk = if j > k {
						f[(j, k)]
					} else if j == k {
						c64::new(1.0, 0.0)
					} else {
						c64::new(0.0, 0.0)
					};
					acc += lik * f[(k, k)] * ljk;
				}
				assert!((acc - a[(i, j)]).abs() < 1e-12);
			}
		}
	}

	#[test]
	fn test_cholesky_failure_pivot() {
		let n = 4;
		let mut a = Mat::<f64>::zeros(n, n);
		for i in 0..n {
			a[(i, i)] = 1.0;
		}
		// make the trailing 2x2 block singular after one step
		a[(2, 2)] = 0.0;
		let pivots = factor_blocked(FactorizationType::Cholesky, a.as_mut(), 2, Par::Seq);
		assert!(pivots == 2);
	}

	#[test]
	fn test_regularized_recovers_singular() {
		let n = 5;
		let mut a = Mat::<f64>::zeros(n, n);
		for i in 0..n {
			a[(i, i)] = 1.0;
		}
		a[(3, 3)] = 0.0;

		let mut log = Vec::new();
		let reg = DynamicRegularization::<i64, f64> {
			positive_threshold: 1e-8,
			negative_threshold: 1e-8,
			signatures: None,
			inverse_permutation: None,
			offset: 0,
		};
		let pivots = factor_regularized_in_place(FactorizationType::LdlAdjoint, a.as_mut(), 2, &reg, &mut log, Par::Seq);
		assert!(pivots == n);
		assert!(log.len() == 1);
		assert!(log[0].0 == 3);
		assert!((log[0].1 - 1e-8).abs() < 1e-20);
	}

	#[test]
	fn test_pivoted_ldl() {
		let n = 7;
		let a = Mat::<f64>::from_fn(n, n, |i, j| if i == j { (i + 1) as f64 } else { 0.125 });
		let mut f = a.clone();
		let mut perm = vec![0i64; n];
		assert!(pivoted_ldl_adjoint_in_place(f.as_mut(), &mut perm) == n);

		// first pivot must be the largest diagonal entry
		assert!(perm[0] == (n - 1) as i64);

		// P A P^T == L D L^H
		let r = reconstruct_ldlt(n, &f);
		for i in 0..n {
			for j in 0..=i {
				let expected = a[(perm[i] as usize, perm[j] as usize)];
				assert!((r[(i, j)] - expected).abs() < 1e-12);
			}
		}
	}
}
