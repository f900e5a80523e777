//! scalar (simplicial) factorization.
//!
//! the up-looking algorithm computes one row of the factor at a time: the
//! reach of the row's pattern in the elimination tree names the columns the
//! row touches, a dense accumulator collects the row values, and each
//! reached column contributes a single committed entry. this beats the
//! supernodal path when the factor is very sparse, which is what the
//! adaptive supernodal strategy checks for.

use super::symbolic::elimination_forest_and_degrees;
use super::{FactorizationType, LdlResult};
use crate::linalg::cholesky::DynamicRegularization;
use crate::sparse::{CoordinateMatrix, Permutation, SymmetricOrdering};
use crate::{ComplexField, Index, MatMut, SparseLdlError, try_zeroed};
use dyn_stack::{MemStack, StackReq};
use equator::assert;
use reborrow::*;

/// symbolic structure of a scalar factorization; each column's first stored
/// entry is its diagonal
#[derive(Clone, Debug)]
pub struct SymbolicSimplicialLdl<I> {
	dimension: usize,
	permutation: Permutation<I>,
	col_ptr: Vec<I>,
	row_idx: Vec<I>,
	etree: Vec<I>,
}

impl<I: Index> SymbolicSimplicialLdl<I> {
	#[inline]
	pub fn nrows(&self) -> usize {
		self.dimension
	}
	#[inline]
	pub fn ncols(&self) -> usize {
		self.dimension
	}

	/// number of stored factor entries, diagonal included
	#[inline]
	pub fn len_val(&self) -> usize {
		self.col_ptr[self.dimension].zx()
	}

	#[inline]
	pub fn permutation(&self) -> &Permutation<I> {
		&self.permutation
	}

	#[inline]
	pub fn etree(&self) -> &[I] {
		&self.etree
	}
}

/// view over a completed scalar factor
#[derive(Copy, Clone)]
pub struct SimplicialLdlRef<'a, I, T> {
	symbolic: &'a SymbolicSimplicialLdl<I>,
	values: &'a [T],
}

impl<'a, I: Index, T> SimplicialLdlRef<'a, I, T> {
	#[track_caller]
	pub fn new(symbolic: &'a SymbolicSimplicialLdl<I>, values: &'a [T]) -> Self {
		assert!(values.len() == symbolic.len_val());
		Self { symbolic, values }
	}

	#[inline]
	pub fn symbolic(self) -> &'a SymbolicSimplicialLdl<I> {
		self.symbolic
	}

	#[inline]
	pub fn values(self) -> &'a [T] {
		self.values
	}
}

/// computes the elimination tree and column structure of the scalar factor
pub fn factorize_simplicial_symbolic<I: Index, T: ComplexField>(
	matrix: &CoordinateMatrix<I, T>,
	ordering: &SymmetricOrdering<I>,
) -> Result<SymbolicSimplicialLdl<I>, SparseLdlError> {
	let n = matrix.num_rows();
	assert!(matrix.num_rows() == matrix.num_columns());

	let permutation = ordering.permutation.clone();
	let (etree, degrees) = elimination_forest_and_degrees(matrix, &permutation);

	let mut col_ptr = try_zeroed::<I>(n + 1)?;
	let mut total = I::truncate(0);
	for column in 0..n {
		col_ptr[column] = total;
		// one slot for the diagonal plus the off-diagonal count
		total += degrees[column] + I::truncate(1);
	}
	col_ptr[n] = total;

	let mut row_idx = try_zeroed::<I>(total.zx())?;
	let mut cursor: Vec<I> = col_ptr[..n].to_vec();
	let mut visited = vec![I::NONE; n];
	let mut reach_stack = vec![I::truncate(0); n];

	for k in 0..n {
		// the diagonal entry leads each column
		row_idx[cursor[k].zx()] = I::truncate(k);
		cursor[k].incr();

		let reach = ereach(&mut reach_stack, matrix, &permutation, &etree, k, &mut visited);
		for &j in reach {
			let j = j.zx();
			row_idx[cursor[j].zx()] = I::truncate(k);
			cursor[j].incr();
		}
	}

	Ok(SymbolicSimplicialLdl {
		dimension: n,
		permutation,
		col_ptr,
		row_idx,
		etree,
	})
}

// reach of row `k` in the partially processed elimination tree: the columns
// of the row's pattern together with their tree ancestors below `k`, in an
// order that finalizes every column before it is consumed
fn ereach<'a, I: Index, T: ComplexField>(
	stack_buf: &'a mut [I],
	matrix: &CoordinateMatrix<I, T>,
	permutation: &Permutation<I>,
	etree: &[I],
	k: usize,
	visited: &mut [I],
) -> &'a [I] {
	let n = stack_buf.len();
	let have_permutation = !permutation.is_identity();
	let k_idx = I::truncate(k);

	let mut top = n;
	visited[k] = k_idx;

	let orig_row = permutation.apply_inverse(k);
	for entry in matrix.row_entries(orig_row) {
		let mut i = if have_permutation { permutation.apply(entry.column.zx()) } else { entry.column.zx() };
		if i >= k {
			if have_permutation {
				continue;
			} else {
				break;
			}
		}

		let mut len = 0usize;
		while visited[i] != k_idx {
			stack_buf[len] = I::truncate(i);
			len += 1;
			visited[i] = k_idx;
			i = etree[i].zx();
		}

		stack_buf.copy_within(..len, top - len);
		top -= len;
	}

	&stack_buf[top..]
}

/// size of the workspace required by [`factorize_simplicial_numeric`]
pub fn factorize_simplicial_numeric_scratch<I: Index, T: ComplexField>(n: usize) -> StackReq {
	StackReq::all_of(&[
		StackReq::new::<T>(n),
		StackReq::new::<I>(n),
		StackReq::new::<I>(n),
		StackReq::new::<I>(n),
	])
}

/// computes the numeric values of the scalar factorization
pub fn factorize_simplicial_numeric<I: Index, T: ComplexField>(
	matrix: &CoordinateMatrix<I, T>,
	symbolic: &SymbolicSimplicialLdl<I>,
	values: &mut [T],
	kind: FactorizationType,
	regularization: Option<&DynamicRegularization<'_, I, T::Real>>,
	stack: &mut MemStack,
) -> LdlResult<I, T::Real> {
	let n = symbolic.dimension;
	assert!(all(matrix.num_rows() == n, matrix.num_columns() == n, values.len() == symbolic.len_val()));

	let permutation = &symbolic.permutation;
	let have_permutation = !permutation.is_identity();
	let etree = &symbolic.etree;
	let col_ptr = &symbolic.col_ptr;
	let row_idx = &symbolic.row_idx;

	let (x, stack) = unsafe { stack.make_raw::<T>(n) };
	let (reach_stack, stack) = unsafe { stack.make_raw::<I>(n) };
	let (visited, stack) = unsafe { stack.make_raw::<I>(n) };
	let (cursor, _) = unsafe { stack.make_raw::<I>(n) };

	x.fill(T::zero());
	visited.fill(I::NONE);
	cursor.copy_from_slice(&col_ptr[..n]);

	let mut result = LdlResult::<I, T::Real>::default();
	result.largest_supernode = 1;

	let zero_real = <T::Real as ComplexField>::zero();

	for k in 0..n {
		let reach = ereach(reach_stack, matrix, permutation, etree, k, visited);

		// gather the row of the permuted input, diagonal included
		let orig_row = permutation.apply_inverse(k);
		for entry in matrix.row_entries(orig_row) {
			let column = if have_permutation { permutation.apply(entry.column.zx()) } else { entry.column.zx() };
			if column > k {
				if have_permutation {
					continue;
				} else {
					break;
				}
			}
			x[column] = x[column] + entry.value;
		}

		let mut d = x[k];
		x[k] = T::zero();

		for &j in reach {
			let j = j.zx();
			let j_start = col_ptr[j].zx();

			let xj = x[j];
			x[j] = T::zero();

			let diag_j = values[j_start];
			let (lkj, eta) = match kind {
				FactorizationType::Cholesky => {
					let lkj = xj.scale_real(diag_j.real().recip());
					(lkj, lkj)
				}
				FactorizationType::LdlAdjoint => (xj.scale_real(diag_j.real().recip()), xj),
				FactorizationType::LdlTranspose => (xj * diag_j.recip(), xj),
			};

			// apply the committed column of the descendant to the active row
			let row_pos = cursor[j].zx() + 1;
			for (idx, &lij) in row_idx[j_start + 1..row_pos].iter().zip(&values[j_start + 1..row_pos]) {
				let i = idx.zx();
				match kind {
					FactorizationType::LdlTranspose => x[i] = x[i] - lij * eta,
					_ => x[i] = x[i] - lij.conj() * eta,
				}
			}

			match kind {
				FactorizationType::LdlTranspose => d = d - lkj * eta,
				_ => d = d - T::from_real((lkj * eta.conj()).real()),
			}

			values[row_pos] = lkj;
			cursor[j].incr();
		}

		let k_start = col_ptr[k].zx();
		debug_assert!(cursor[k].zx() == k_start);

		let mut delta = d.real();
		if let Some(reg) = regularization {
			let orig_index = match reg.inverse_permutation {
				Some(iperm) => iperm[k].zx(),
				None => k,
			};
			// cholesky pivots are positive by definition; the signature
			// vector only directs the LDL families
			let signature = match kind {
				FactorizationType::Cholesky => 1,
				_ => match reg.signatures {
					Some(signatures) => signatures[orig_index],
					None => {
						if delta >= zero_real {
							1
						} else {
							-1
						}
					}
				},
			};
			if signature >= 0 {
				if delta <= -reg.positive_threshold {
					return result;
				} else if delta < reg.positive_threshold {
					result.dynamic_regularization.push((I::truncate(orig_index), reg.positive_threshold - delta));
					delta = reg.positive_threshold;
				}
			} else {
				if delta >= reg.negative_threshold {
					return result;
				} else if delta > -reg.negative_threshold {
					result
						.dynamic_regularization
						.push((I::truncate(orig_index), -reg.negative_threshold - delta));
					delta = -reg.negative_threshold;
				}
			}
			d = T::from_real(delta);
		}

		match kind {
			FactorizationType::Cholesky => {
				if !(delta > zero_real) {
					return result;
				}
				values[k_start] = T::from_real(delta.sqrt());
			}
			FactorizationType::LdlAdjoint => {
				if delta == zero_real || !delta.is_finite() {
					return result;
				}
				values[k_start] = T::from_real(delta);
			}
			FactorizationType::LdlTranspose => {
				if d == T::zero() || !d.is_finite() {
					return result;
				}
				values[k_start] = d;
			}
		}

		result.num_successful_pivots += 1;
		result.incorporate_supernode(1, col_ptr[k + 1].zx() - k_start - 1);
	}

	result
}

/// size of the workspace required by [`solve_in_place`]
pub fn solve_in_place_scratch<I: Index, T: ComplexField>(n: usize, num_rhs: usize) -> StackReq {
	StackReq::new::<T>(n * num_rhs)
}

/// solves `A x = rhs` in place against a completed scalar factorization
#[track_caller]
pub fn solve_in_place<I: Index, T: ComplexField>(
	factor: SimplicialLdlRef<'_, I, T>,
	kind: FactorizationType,
	rhs: MatMut<'_, T>,
	stack: &mut MemStack,
) {
	let symbolic = factor.symbolic();
	let n = symbolic.nrows();
	let k = rhs.ncols();
	assert!(rhs.nrows() == n);

	let permutation = &symbolic.permutation;
	let (x_storage, _) = unsafe { stack.make_raw::<T>(n * k) };

	let mut rhs = rhs;
	if permutation.is_identity() {
		solve_core(factor, kind, rhs.rb_mut());
	} else {
		let mut x = MatMut::from_column_major_slice_mut(&mut x_storage[..n * k], n, k);
		for j in 0..k {
			for orig in 0..n {
				x[(permutation.apply(orig), j)] = rhs[(orig, j)];
			}
		}
		solve_core(factor, kind, x.rb_mut());
		for j in 0..k {
			for orig in 0..n {
				rhs[(orig, j)] = x[(permutation.apply(orig), j)];
			}
		}
	}
}

fn solve_core<I: Index, T: ComplexField>(factor: SimplicialLdlRef<'_, I, T>, kind: FactorizationType, x: MatMut<'_, T>) {
	let symbolic = factor.symbolic();
	let values = factor.values();
	let n = symbolic.nrows();
	let col_ptr = &symbolic.col_ptr;
	let row_idx = &symbolic.row_idx;
	let k = x.ncols();
	let is_cholesky = matches!(kind, FactorizationType::Cholesky);

	let mut x = x;
	for rhs_col in 0..k {
		// forward substitution
		for column in 0..n {
			let start = col_ptr[column].zx();
			let end = col_ptr[column + 1].zx();

			let mut xc = x[(column, rhs_col)];
			if is_cholesky {
				xc = xc.scale_real(values[start].real().recip());
				x[(column, rhs_col)] = xc;
			}
			if xc == T::zero() {
				continue;
			}
			for (idx, &lic) in row_idx[start + 1..end].iter().zip(&values[start + 1..end]) {
				let i = idx.zx();
				x[(i, rhs_col)] = x[(i, rhs_col)] - lic * xc;
			}
		}

		// diagonal scaling
		if !is_cholesky {
			for column in 0..n {
				let d = values[col_ptr[column].zx()];
				x[(column, rhs_col)] = x[(column, rhs_col)] * d.recip();
			}
		}

		// backward substitution
		for column in (0..n).rev() {
			let start = col_ptr[column].zx();
			let end = col_ptr[column + 1].zx();

			let mut acc = x[(column, rhs_col)];
			for (idx, &lic) in row_idx[start + 1..end].iter().zip(&values[start + 1..end]) {
				let i = idx.zx();
				let lic = match kind {
					FactorizationType::LdlTranspose => lic,
					_ => lic.conj(),
				};
				acc = acc - lic * x[(i, rhs_col)];
			}
			if is_cholesky {
				acc = acc.scale_real(values[start].real().recip());
			}
			x[(column, rhs_col)] = acc;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use equator::assert;
	use crate::Mat;
	use dyn_stack::MemBuffer;
	use rand::rngs::StdRng;
	use rand::{Rng, SeedableRng};

	fn arrow_matrix(n: usize) -> CoordinateMatrix<i64, f64> {
		// arrowhead matrices keep the scalar factor extremely sparse
		let mut matrix = CoordinateMatrix::new(n, n);
		matrix.reserve_entry_additions(3 * n);
		for i in 0..n {
			matrix.queue_entry_addition(i, i, 4.0);
		}
		for i in 0..n - 1 {
			matrix.queue_entry_addition(n - 1, i, 1.0);
			matrix.queue_entry_addition(i, n - 1, 1.0);
		}
		matrix.flush_entry_queues();
		matrix
	}

	#[test]
	fn test_simplicial_ldl_solve() {
		let n = 25;
		let matrix = arrow_matrix(n);
		let symbolic = factorize_simplicial_symbolic(&matrix, &SymmetricOrdering::identity()).unwrap();

		// arrowhead: only the last column has off-diagonal structure
		assert_eq!(symbolic.len_val(), 2 * n - 1);

		let mut values = vec![0.0f64; symbolic.len_val()];
		let mut mem = MemBuffer::new(factorize_simplicial_numeric_scratch::<i64, f64>(n));
		let result = factorize_simplicial_numeric(
			&matrix,
			&symbolic,
			&mut values,
			FactorizationType::LdlAdjoint,
			None,
			MemStack::new(&mut mem),
		);
		assert!(result.is_success(n));

		let factor = SimplicialLdlRef::new(&symbolic, &values);
		let mut rng = StdRng::seed_from_u64(11);
		let b = Mat::from_fn(n, 1, |_, _| rng.gen::<f64>());
		let mut x = b.clone();
		let mut mem = MemBuffer::new(solve_in_place_scratch::<i64, f64>(n, 1));
		solve_in_place(factor, FactorizationType::LdlAdjoint, x.as_mut(), MemStack::new(&mut mem));

		for row in 0..n {
			let mut acc = 0.0;
			for entry in matrix.row_entries(row) {
				acc += entry.value * x[(entry.column.zx(), 0)];
			}
			assert!((acc - b[(row, 0)]).abs() < 1e-12);
		}
	}

	#[test]
	fn test_simplicial_cholesky_matches_ldl() {
		let n = 16;
		let matrix = arrow_matrix(n);
		let symbolic = factorize_simplicial_symbolic(&matrix, &SymmetricOrdering::identity()).unwrap();

		let mut llt = vec![0.0f64; symbolic.len_val()];
		let mut ldlt = vec![0.0f64; symbolic.len_val()];
		let mut mem = MemBuffer::new(factorize_simplicial_numeric_scratch::<i64, f64>(n));
		assert!(
			factorize_simplicial_numeric(&matrix, &symbolic, &mut llt, FactorizationType::Cholesky, None, MemStack::new(&mut mem),)
				.is_success(n)
		);
		assert!(
			factorize_simplicial_numeric(&matrix, &symbolic, &mut ldlt, FactorizationType::LdlAdjoint, None, MemStack::new(&mut mem),)
				.is_success(n)
		);

		// L_llt = L_ldlt * sqrt(D)
		for column in 0..n {
			let start = symbolic.col_ptr[column].zx();
			let end = symbolic.col_ptr[column + 1].zx();
			let d_sqrt = ldlt[start].sqrt();
			assert!((llt[start] - d_sqrt).abs() < 1e-13);
			for offset in start + 1..end {
				assert!((llt[offset] - ldlt[offset] * d_sqrt).abs() < 1e-13);
			}
		}
	}

	#[test]
	fn test_simplicial_failure_reports_pivot() {
		let n = 5;
		let mut matrix = CoordinateMatrix::<i64, f64>::new(n, n);
		for i in 0..n {
			matrix.add_entry(i, i, if i == 3 { -1.0 } else { 1.0 });
		}

		let symbolic = factorize_simplicial_symbolic(&matrix, &SymmetricOrdering::identity()).unwrap();
		let mut values = vec![0.0f64; symbolic.len_val()];
		let mut mem = MemBuffer::new(factorize_simplicial_numeric_scratch::<i64, f64>(n));
		let result = factorize_simplicial_numeric(
			&matrix,
			&symbolic,
			&mut values,
			FactorizationType::Cholesky,
			None,
			MemStack::new(&mut mem),
		);
		assert_eq!(result.num_successful_pivots, 3);
	}
}
