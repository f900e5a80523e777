//! dense triangular solves.
//!
//! left-side solves are used on the right-hand sides during the sparse
//! forward and backward sweeps; right-side solves are used on supernode
//! panels, where the triangular operand is the factored diagonal block and
//! the panel is divided by `L^H`, `D L^H`, or `D L^T` from the right.

use super::Conj;
use crate::{ComplexField, MatMut, MatRef, Par};
use equator::assert;
use reborrow::*;

const MIN_PAR_RHS: usize = 4;

/// `x := op(l)^-1 x` with `l` lower triangular
#[track_caller]
pub fn solve_lower_triangular_in_place<T: ComplexField>(l: MatRef<'_, T>, conj_l: Conj, x: MatMut<'_, T>, par: Par) {
	solve_lower_impl(l, conj_l, false, x, par);
}

/// `x := op(l)^-1 x` with `l` unit lower triangular (diagonal implicitly one)
#[track_caller]
pub fn solve_unit_lower_triangular_in_place<T: ComplexField>(l: MatRef<'_, T>, conj_l: Conj, x: MatMut<'_, T>, par: Par) {
	solve_lower_impl(l, conj_l, true, x, par);
}

fn solve_lower_impl<T: ComplexField>(l: MatRef<'_, T>, conj_l: Conj, unit: bool, x: MatMut<'_, T>, par: Par) {
	let n = l.nrows();
	assert!(all(l.nrows() == l.ncols(), x.nrows() == n));

	let k = x.ncols();
	if matches!(par, Par::Rayon(_)) && k >= MIN_PAR_RHS && n >= 64 {
		let (x_left, x_right) = x.split_at_col_mut(k / 2);
		rayon::join(
			|| solve_lower_impl(l, conj_l, unit, x_left, par),
			|| solve_lower_impl(l, conj_l, unit, x_right, par),
		);
		return;
	}

	let mut x = x;
	for j in 0..k {
		for col in 0..n {
			let l_col = l.col(col);
			let xj = if unit {
				x[(col, j)]
			} else {
				let xj = x[(col, j)] * conj_l.apply(l_col[col]).recip();
				x[(col, j)] = xj;
				xj
			};
			if xj == T::zero() {
				continue;
			}
			let x_col = &mut x.col_mut(j)[col + 1..];
			for (xi, &lij) in x_col.iter_mut().zip(&l_col[col + 1..]) {
				*xi -= conj_l.apply(lij) * xj;
			}
		}
	}
}

/// `x := (op(l)^T)^-1 x` with `l` lower triangular, so that
/// `conj_l == Conj::Yes` solves against the adjoint of `l`
#[track_caller]
pub fn solve_lower_triangular_transpose_in_place<T: ComplexField>(l: MatRef<'_, T>, conj_l: Conj, x: MatMut<'_, T>, par: Par) {
	solve_lower_transpose_impl(l, conj_l, false, x, par);
}

/// `x := (op(l)^T)^-1 x` with `l` unit lower triangular
#[track_caller]
pub fn solve_unit_lower_triangular_transpose_in_place<T: ComplexField>(l: MatRef<'_, T>, conj_l: Conj, x: MatMut<'_, T>, par: Par) {
	solve_lower_transpose_impl(l, conj_l, true, x, par);
}

fn solve_lower_transpose_impl<T: ComplexField>(l: MatRef<'_, T>, conj_l: Conj, unit: bool, x: MatMut<'_, T>, par: Par) {
	let n = l.nrows();
	assert!(all(l.nrows() == l.ncols(), x.nrows() == n));

	let k = x.ncols();
	if matches!(par, Par::Rayon(_)) && k >= MIN_PAR_RHS && n >= 64 {
		let (x_left, x_right) = x.split_at_col_mut(k / 2);
		rayon::join(
			|| solve_lower_transpose_impl(l, conj_l, unit, x_left, par),
			|| solve_lower_transpose_impl(l, conj_l, unit, x_right, par),
		);
		return;
	}

	let mut x = x;
	for j in 0..k {
		for col in (0..n).rev() {
			let l_col = l.col(col);
			let mut acc = x[(col, j)];
			{
				let x_col = &x.rb().col(j)[col + 1..];
				for (&xi, &lic) in x_col.iter().zip(&l_col[col + 1..]) {
					acc -= conj_l.apply(lic) * xi;
				}
			}
			x[(col, j)] = if unit { acc } else { acc * conj_l.apply(l_col[col]).recip() };
		}
	}
}

/// `x := x * (op(l)^T)^-1` with `l` lower triangular (used to solve a panel
/// against `L^H` or `L^T` from the right)
#[track_caller]
pub fn solve_lower_transpose_on_right<T: ComplexField>(l: MatRef<'_, T>, conj_l: Conj, x: MatMut<'_, T>, par: Par) {
	solve_on_right_impl(l, conj_l, RightSolveKind::NonUnit, x, par);
}

/// `x := x * (op(l)^T)^-1` with `l` unit lower triangular
#[track_caller]
pub fn solve_unit_lower_transpose_on_right<T: ComplexField>(l: MatRef<'_, T>, conj_l: Conj, x: MatMut<'_, T>, par: Par) {
	solve_on_right_impl(l, conj_l, RightSolveKind::Unit, x, par);
}

/// `x := x * (d * op(l)^T)^-1` where `l` is unit lower triangular with its
/// diagonal entries holding `d` (the combined LDL panel solve)
#[track_caller]
pub fn solve_diag_unit_lower_transpose_on_right<T: ComplexField>(l: MatRef<'_, T>, conj_l: Conj, x: MatMut<'_, T>, par: Par) {
	solve_on_right_impl(l, conj_l, RightSolveKind::DiagTimesUnit, x, par);
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum RightSolveKind {
	NonUnit,
	Unit,
	DiagTimesUnit,
}

fn solve_on_right_impl<T: ComplexField>(l: MatRef<'_, T>, conj_l: Conj, kind: RightSolveKind, x: MatMut<'_, T>, par: Par) {
	let n = l.nrows();
	assert!(all(l.nrows() == l.ncols(), x.ncols() == n));

	let m = x.nrows();
	if matches!(par, Par::Rayon(_)) && m >= 256 && n >= 2 {
		let (x_top, x_bot) = x.split_at_row_mut(m / 2);
		rayon::join(
			|| solve_on_right_impl(l, conj_l, kind, x_top, par),
			|| solve_on_right_impl(l, conj_l, kind, x_bot, par),
		);
		return;
	}

	// the operand `op(l)^T` (resp. `d op(l)^T`) is upper triangular, so the
	// columns of `x` are resolved left to right
	let mut x = x;
	for j in 0..n {
		for k in 0..j {
			let l_col_k = l.col(k);
			// entry (k, j) of the upper-triangular operand is op(l[j, k]),
			// scaled by d_k for the combined solve
			let u_kj = match kind {
				RightSolveKind::NonUnit | RightSolveKind::Unit => conj_l.apply(l_col_k[j]),
				RightSolveKind::DiagTimesUnit => l_col_k[k] * conj_l.apply(l_col_k[j]),
			};
			if u_kj == T::zero() {
				continue;
			}
			let (x_k, x_j) = disjoint_cols(x.rb_mut(), k, j);
			for (xj, &xk) in x_j.iter_mut().zip(&*x_k) {
				*xj -= xk * u_kj;
			}
		}
		match kind {
			RightSolveKind::Unit => {}
			RightSolveKind::NonUnit => {
				let d_inv = conj_l.apply(l.col(j)[j]).recip();
				for xj in x.col_mut(j) {
					*xj = *xj * d_inv;
				}
			}
			RightSolveKind::DiagTimesUnit => {
				let d_inv = l.col(j)[j].recip();
				for xj in x.col_mut(j) {
					*xj = *xj * d_inv;
				}
			}
		}
	}
}

/// `x := x * u^-1` with `u` upper triangular, used by the LU-style
/// non-hermitian DPP elimination
#[track_caller]
pub fn solve_upper_triangular_on_right<T: ComplexField>(u: MatRef<'_, T>, x: MatMut<'_, T>, par: Par) {
	let n = u.nrows();
	assert!(all(u.nrows() == u.ncols(), x.ncols() == n));

	let m = x.nrows();
	if matches!(par, Par::Rayon(_)) && m >= 256 && n >= 2 {
		let (x_top, x_bot) = x.split_at_row_mut(m / 2);
		rayon::join(
			|| solve_upper_triangular_on_right(u, x_top, par),
			|| solve_upper_triangular_on_right(u, x_bot, par),
		);
		return;
	}

	let mut x = x;
	for j in 0..n {
		let u_col = u.col(j);
		for k in 0..j {
			let u_kj = u_col[k];
			if u_kj == T::zero() {
				continue;
			}
			let (x_k, x_j) = disjoint_cols(x.rb_mut(), k, j);
			for (xj, &xk) in x_j.iter_mut().zip(&*x_k) {
				*xj -= xk * u_kj;
			}
		}
		let d_inv = u_col[j].recip();
		for xj in x.col_mut(j) {
			*xj = *xj * d_inv;
		}
	}
}

#[inline]
fn disjoint_cols<'a, T>(x: MatMut<'a, T>, k: usize, j: usize) -> (&'a [T], &'a mut [T]) {
	debug_assert!(k != j);
	let nrows = x.nrows();
	let stride = x.col_stride();
	let mut x = x;
	let ptr = x.as_mut_ptr();
	unsafe {
		(
			core::slice::from_raw_parts(ptr.add(k * stride), nrows),
			core::slice::from_raw_parts_mut(ptr.add(j * stride), nrows),
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use equator::assert;
	use crate::linalg::matmul::matmul;
	use crate::linalg::Accum;
	use crate::Mat;

	fn lower_example() -> Mat<f64> {
		Mat::from_fn(4, 4, |i, j| {
			if i == j {
				2.0 + i as f64
			} else if i > j {
				0.25 * (i as f64 - j as f64)
			} else {
				0.0
			}
		})
	}

	#[test]
	fn test_left_solves_roundtrip() {
		let l = lower_example();
		let x0 = Mat::from_fn(4, 2, |i, j| (i + 4 * j) as f64 + 1.0);

		let mut b = Mat::<f64>::zeros(4, 2);
		matmul(b.as_mut(), Accum::Replace, l.as_ref(), x0.as_ref(), 1.0, Par::Seq);
		solve_lower_triangular_in_place(l.as_ref(), Conj::No, b.as_mut(), Par::Seq);
		for j in 0..2 {
			for i in 0..4 {
				assert!((b[(i, j)] - x0[(i, j)]).abs() < 1e-12);
			}
		}
	}

	#[test]
	fn test_transpose_solve_roundtrip() {
		let l = lower_example();
		let x0 = Mat::from_fn(4, 2, |i, j| (i * 2 + j) as f64 - 3.0);

		// b = l^T x0
		let mut b = Mat::<f64>::zeros(4, 2);
		for j in 0..2 {
			for i in 0..4 {
				let mut acc = 0.0;
				for k in i..4 {
					acc += l[(k, i)] * x0[(k, j)];
				}
				b[(i, j)] = acc;
			}
		}
		solve_lower_triangular_transpose_in_place(l.as_ref(), Conj::No, b.as_mut(), Par::Seq);
		for j in 0..2 {
			for i in 0..4 {
				assert!((b[(i, j)] - x0[(i, j)]).abs() < 1e-12);
			}
		}
	}

	#[test]
	fn test_right_solve_roundtrip() {
		let l = lower_example();
		let x0 = Mat::from_fn(3, 4, |i, j| (i + 3 * j) as f64 * 0.5 + 1.0);

		// b = x0 * l^T
		let mut b = Mat::<f64>::zeros(3, 4);
		for j in 0..4 {
			for i in 0..3 {
				let mut acc = 0.0;
				for k in j..4 {
					acc += x0[(i, k)] * l[(k, j)];
				}
				b[(i, j)] = acc;
			}
		}
		solve_lower_transpose_on_right(l.as_ref(), Conj::No, b.as_mut(), Par::Seq);
		for j in 0..4 {
			for i in 0..3 {
				assert!((b[(i, j)] - x0[(i, j)]).abs() < 1e-12);
			}
		}
	}
}
