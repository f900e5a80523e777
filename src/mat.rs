//! column-major dense matrix views.
//!
//! [`MatRef`] and [`MatMut`] are lightweight views over column-major storage
//! with an explicit leading dimension (`col_stride`), which is what the dense
//! block kernels operate on: a supernode's panel is a view into the factor's
//! flat value buffer, and a tile of a panel is a view with a larger leading
//! dimension than its row count. [`Mat`] owns its storage and is used for
//! workspaces and by the dense DPP samplers.

use crate::ComplexField;
use core::marker::PhantomData;
use equator::assert;
use reborrow::*;

/// immutable view over a column-major matrix
pub struct MatRef<'a, T> {
	ptr: *const T,
	nrows: usize,
	ncols: usize,
	col_stride: usize,
	__marker: PhantomData<&'a T>,
}

/// mutable view over a column-major matrix
pub struct MatMut<'a, T> {
	ptr: *mut T,
	nrows: usize,
	ncols: usize,
	col_stride: usize,
	__marker: PhantomData<&'a mut T>,
}

/// owning column-major matrix with `col_stride == nrows`
#[derive(Clone, Debug)]
pub struct Mat<T> {
	data: Vec<T>,
	nrows: usize,
	ncols: usize,
}

unsafe impl<T: Sync> Send for MatRef<'_, T> {}
unsafe impl<T: Sync> Sync for MatRef<'_, T> {}
unsafe impl<T: Send> Send for MatMut<'_, T> {}
unsafe impl<T: Sync> Sync for MatMut<'_, T> {}

impl<T> Copy for MatRef<'_, T> {}
impl<T> Clone for MatRef<'_, T> {
	#[inline(always)]
	fn clone(&self) -> Self {
		*self
	}
}

impl<'short, T> Reborrow<'short> for MatRef<'_, T> {
	type Target = MatRef<'short, T>;

	#[inline(always)]
	fn rb(&'short self) -> Self::Target {
		*self
	}
}
impl<'short, T> ReborrowMut<'short> for MatRef<'_, T> {
	type Target = MatRef<'short, T>;

	#[inline(always)]
	fn rb_mut(&'short mut self) -> Self::Target {
		*self
	}
}
impl<'short, T> Reborrow<'short> for MatMut<'_, T> {
	type Target = MatRef<'short, T>;

	#[inline(always)]
	fn rb(&'short self) -> Self::Target {
		MatRef {
			ptr: self.ptr,
			nrows: self.nrows,
			ncols: self.ncols,
			col_stride: self.col_stride,
			__marker: PhantomData,
		}
	}
}
impl<'short, T> ReborrowMut<'short> for MatMut<'_, T> {
	type Target = MatMut<'short, T>;

	#[inline(always)]
	fn rb_mut(&'short mut self) -> Self::Target {
		MatMut {
			ptr: self.ptr,
			nrows: self.nrows,
			ncols: self.ncols,
			col_stride: self.col_stride,
			__marker: PhantomData,
		}
	}
}
impl<'a, T> IntoConst for MatMut<'a, T> {
	type Target = MatRef<'a, T>;

	#[inline(always)]
	fn into_const(self) -> Self::Target {
		MatRef {
			ptr: self.ptr,
			nrows: self.nrows,
			ncols: self.ncols,
			col_stride: self.col_stride,
			__marker: PhantomData,
		}
	}
}

impl<'a, T> MatRef<'a, T> {
	/// creates a view over a full column-major slice
	///
	/// # panics
	/// panics if `slice.len() != nrows * ncols`
	#[inline]
	#[track_caller]
	pub fn from_column_major_slice(slice: &'a [T], nrows: usize, ncols: usize) -> Self {
		assert!(slice.len() == nrows * ncols);
		Self {
			ptr: slice.as_ptr(),
			nrows,
			ncols,
			col_stride: nrows,
			__marker: PhantomData,
		}
	}

	/// creates a view from raw parts
	///
	/// # safety
	/// `ptr` must be valid for reads of `col_stride * ncols` elements, with
	/// `col_stride >= nrows`, for the duration of `'a`
	#[inline]
	pub unsafe fn from_raw_parts(ptr: *const T, nrows: usize, ncols: usize, col_stride: usize) -> Self {
		Self {
			ptr,
			nrows,
			ncols,
			col_stride,
			__marker: PhantomData,
		}
	}

	#[inline(always)]
	pub fn nrows(&self) -> usize {
		self.nrows
	}
	#[inline(always)]
	pub fn ncols(&self) -> usize {
		self.ncols
	}
	#[inline(always)]
	pub fn col_stride(&self) -> usize {
		self.col_stride
	}
	#[inline(always)]
	pub fn as_ptr(&self) -> *const T {
		self.ptr
	}

	/// contiguous slice over column `j`
	#[inline]
	#[track_caller]
	pub fn col(&self, j: usize) -> &'a [T] {
		assert!(j < self.ncols);
		unsafe { core::slice::from_raw_parts(self.ptr.add(j * self.col_stride), self.nrows) }
	}

	#[inline(always)]
	#[track_caller]
	pub unsafe fn get_unchecked(&self, i: usize, j: usize) -> &'a T {
		debug_assert!(i < self.nrows && j < self.ncols);
		&*self.ptr.add(i + j * self.col_stride)
	}

	/// submatrix starting at `(row, col)` with dimensions `(nrows, ncols)`
	#[inline]
	#[track_caller]
	pub fn submatrix(self, row: usize, col: usize, nrows: usize, ncols: usize) -> Self {
		assert!(all(row + nrows <= self.nrows, col + ncols <= self.ncols));
		Self {
			ptr: unsafe { self.ptr.add(row + col * self.col_stride) },
			nrows,
			ncols,
			col_stride: self.col_stride,
			__marker: PhantomData,
		}
	}

	/// splits into the rows before `row` and the rows at or after it
	#[inline]
	#[track_caller]
	pub fn split_at_row(self, row: usize) -> (Self, Self) {
		assert!(row <= self.nrows);
		(
			self.submatrix(0, 0, row, self.ncols),
			self.submatrix(row, 0, self.nrows - row, self.ncols),
		)
	}

	#[inline]
	#[track_caller]
	pub fn subrows(self, row: usize, nrows: usize) -> Self {
		self.submatrix(row, 0, nrows, self.ncols)
	}

	#[inline]
	#[track_caller]
	pub fn subcols(self, col: usize, ncols: usize) -> Self {
		self.submatrix(0, col, self.nrows, ncols)
	}
}

impl<'a, T> MatMut<'a, T> {
	/// creates a mutable view over a full column-major slice
	///
	/// # panics
	/// panics if `slice.len() != nrows * ncols`
	#[inline]
	#[track_caller]
	pub fn from_column_major_slice_mut(slice: &'a mut [T], nrows: usize, ncols: usize) -> Self {
		assert!(slice.len() == nrows * ncols);
		Self {
			ptr: slice.as_mut_ptr(),
			nrows,
			ncols,
			col_stride: nrows,
			__marker: PhantomData,
		}
	}

	/// creates a mutable view from raw parts
	///
	/// # safety
	/// `ptr` must be valid for reads and writes of `col_stride * ncols`
	/// elements, with `col_stride >= nrows`, for the duration of `'a`, and no
	/// other view may alias the addressed elements
	#[inline]
	pub unsafe fn from_raw_parts_mut(ptr: *mut T, nrows: usize, ncols: usize, col_stride: usize) -> Self {
		Self {
			ptr,
			nrows,
			ncols,
			col_stride,
			__marker: PhantomData,
		}
	}

	#[inline(always)]
	pub fn nrows(&self) -> usize {
		self.nrows
	}
	#[inline(always)]
	pub fn ncols(&self) -> usize {
		self.ncols
	}
	#[inline(always)]
	pub fn col_stride(&self) -> usize {
		self.col_stride
	}
	#[inline(always)]
	pub fn as_mut_ptr(&mut self) -> *mut T {
		self.ptr
	}

	/// contiguous mutable slice over column `j`
	#[inline]
	#[track_caller]
	pub fn col_mut(&mut self, j: usize) -> &mut [T] {
		assert!(j < self.ncols);
		unsafe { core::slice::from_raw_parts_mut(self.ptr.add(j * self.col_stride), self.nrows) }
	}

	#[inline(always)]
	#[track_caller]
	pub unsafe fn get_unchecked_mut(&mut self, i: usize, j: usize) -> &mut T {
		debug_assert!(i < self.nrows && j < self.ncols);
		&mut *self.ptr.add(i + j * self.col_stride)
	}

	/// submatrix starting at `(row, col)` with dimensions `(nrows, ncols)`
	#[inline]
	#[track_caller]
	pub fn submatrix_mut(self, row: usize, col: usize, nrows: usize, ncols: usize) -> Self {
		assert!(all(row + nrows <= self.nrows, col + ncols <= self.ncols));
		Self {
			ptr: unsafe { self.ptr.add(row + col * self.col_stride) },
			nrows,
			ncols,
			col_stride: self.col_stride,
			__marker: PhantomData,
		}
	}

	/// splits into the rows before `row` and the rows at or after it
	#[inline]
	#[track_caller]
	pub fn split_at_row_mut(self, row: usize) -> (Self, Self) {
		assert!(row <= self.nrows);
		let ncols = self.ncols;
		let nrows = self.nrows;
		let col_stride = self.col_stride;
		let top_ptr = self.ptr;
		let bot_ptr = unsafe { self.ptr.add(row) };
		(
			Self {
				ptr: top_ptr,
				nrows: row,
				ncols,
				col_stride,
				__marker: PhantomData,
			},
			Self {
				ptr: bot_ptr,
				nrows: nrows - row,
				ncols,
				col_stride,
				__marker: PhantomData,
			},
		)
	}

	/// splits into the columns before `col` and the columns at or after it
	#[inline]
	#[track_caller]
	pub fn split_at_col_mut(self, col: usize) -> (Self, Self) {
		assert!(col <= self.ncols);
		let ncols = self.ncols;
		let nrows = self.nrows;
		let col_stride = self.col_stride;
		let left_ptr = self.ptr;
		let right_ptr = unsafe { self.ptr.add(col * col_stride) };
		(
			Self {
				ptr: left_ptr,
				nrows,
				ncols: col,
				col_stride,
				__marker: PhantomData,
			},
			Self {
				ptr: right_ptr,
				nrows,
				ncols: ncols - col,
				col_stride,
				__marker: PhantomData,
			},
		)
	}

	#[inline]
	#[track_caller]
	pub fn subrows_mut(self, row: usize, nrows: usize) -> Self {
		let ncols = self.ncols;
		self.submatrix_mut(row, 0, nrows, ncols)
	}

	#[inline]
	#[track_caller]
	pub fn subcols_mut(self, col: usize, ncols: usize) -> Self {
		let nrows = self.nrows;
		self.submatrix_mut(0, col, nrows, ncols)
	}
}

impl<T: ComplexField> MatMut<'_, T> {
	/// fills the view with `value`
	#[inline]
	pub fn fill(&mut self, value: T) {
		for j in 0..self.ncols {
			self.col_mut(j).fill(value);
		}
	}

	/// copies the contents of `src`, which must have the same dimensions
	#[inline]
	#[track_caller]
	pub fn copy_from(&mut self, src: MatRef<'_, T>) {
		assert!(all(self.nrows == src.nrows(), self.ncols == src.ncols()));
		for j in 0..self.ncols {
			self.col_mut(j).copy_from_slice(src.col(j));
		}
	}
}

impl<T> core::ops::Index<(usize, usize)> for MatRef<'_, T> {
	type Output = T;

	#[inline(always)]
	#[track_caller]
	fn index(&self, (i, j): (usize, usize)) -> &T {
		assert!(all(i < self.nrows, j < self.ncols));
		unsafe { &*self.ptr.add(i + j * self.col_stride) }
	}
}

impl<T> core::ops::Index<(usize, usize)> for MatMut<'_, T> {
	type Output = T;

	#[inline(always)]
	#[track_caller]
	fn index(&self, (i, j): (usize, usize)) -> &T {
		assert!(all(i < self.nrows, j < self.ncols));
		unsafe { &*self.ptr.add(i + j * self.col_stride) }
	}
}

impl<T> core::ops::IndexMut<(usize, usize)> for MatMut<'_, T> {
	#[inline(always)]
	#[track_caller]
	fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut T {
		assert!(all(i < self.nrows, j < self.ncols));
		unsafe { &mut *self.ptr.add(i + j * self.col_stride) }
	}
}

impl<T: ComplexField> Mat<T> {
	/// zero matrix with the given dimensions
	#[inline]
	pub fn zeros(nrows: usize, ncols: usize) -> Self {
		Self {
			data: vec![T::zero(); nrows * ncols],
			nrows,
			ncols,
		}
	}

	/// matrix with entries produced by `f(i, j)`
	pub fn from_fn(nrows: usize, ncols: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
		let mut data = Vec::with_capacity(nrows * ncols);
		for j in 0..ncols {
			for i in 0..nrows {
				data.push(f(i, j));
			}
		}
		Self { data, nrows, ncols }
	}

	/// resizes in place, dropping the current contents
	pub fn resize_with_zeros(&mut self, nrows: usize, ncols: usize) {
		self.data.clear();
		self.data.resize(nrows * ncols, T::zero());
		self.nrows = nrows;
		self.ncols = ncols;
	}
}

impl<T> Mat<T> {
	#[inline(always)]
	pub fn nrows(&self) -> usize {
		self.nrows
	}
	#[inline(always)]
	pub fn ncols(&self) -> usize {
		self.ncols
	}

	#[inline]
	pub fn as_ref(&self) -> MatRef<'_, T> {
		MatRef {
			ptr: self.data.as_ptr(),
			nrows: self.nrows,
			ncols: self.ncols,
			col_stride: self.nrows,
			__marker: PhantomData,
		}
	}

	#[inline]
	pub fn as_mut(&mut self) -> MatMut<'_, T> {
		MatMut {
			ptr: self.data.as_mut_ptr(),
			nrows: self.nrows,
			ncols: self.ncols,
			col_stride: self.nrows,
			__marker: PhantomData,
		}
	}
}

impl<T> core::ops::Index<(usize, usize)> for Mat<T> {
	type Output = T;

	#[inline(always)]
	#[track_caller]
	fn index(&self, (i, j): (usize, usize)) -> &T {
		assert!(all(i < self.nrows, j < self.ncols));
		&self.data[i + j * self.nrows]
	}
}

impl<T> core::ops::IndexMut<(usize, usize)> for Mat<T> {
	#[inline(always)]
	#[track_caller]
	fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut T {
		assert!(all(i < self.nrows, j < self.ncols));
		&mut self.data[i + j * self.nrows]
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use equator::assert;

	#[test]
	fn test_views() {
		let mut m = Mat::<f64>::from_fn(4, 3, |i, j| (i + 10 * j) as f64);
		assert_eq!(m[(2, 1)], 12.0);

		let view = m.as_ref();
		let sub = view.submatrix(1, 1, 2, 2);
		assert_eq!(sub[(0, 0)], 11.0);
		assert_eq!(sub[(1, 1)], 22.0);

		let (top, bot) = view.split_at_row(2);
		assert_eq!(top.nrows(), 2);
		assert_eq!(bot[(0, 0)], 2.0);

		let mut mv = m.as_mut();
		mv[(0, 0)] = -1.0;
		assert_eq!(m[(0, 0)], -1.0);
	}
}
