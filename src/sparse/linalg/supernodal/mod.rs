//! supernodal factorization: storage, numeric drivers, and solve.
//!
//! the symbolic object owns every index array of the factorization: the
//! effective permutation (fill-reducing ordering composed with the
//! relaxation reordering), the scalar elimination forest, the supernode
//! partition, the assembly forest, and the row structure of each
//! supernode's panel with its run-length-encoded partition by ancestor.
//! numeric values live in two flat caller-owned buffers, one for the
//! column-major panels and one for the dense diagonal blocks.

pub mod left_looking;
pub mod right_looking;
pub mod solve;

pub use left_looking::factorize_supernodal_numeric_left_looking;
pub use right_looking::factorize_supernodal_numeric_right_looking;
pub use solve::{solve_in_place, solve_in_place_scratch};

use super::symbolic::{
	self, AssemblyForest, SupernodalRelaxation, SupernodalStructure, elimination_forest_and_degrees, fill_structure_indices,
	form_fundamental_supernodes, relax_supernodes, scalar_fill_structure, supernodal_degrees, supernode_parents,
	supernode_starts_and_member_to_index,
};
use super::FactorizationType;
use crate::linalg::cholesky::DynamicRegularization;
use crate::sparse::{CoordinateMatrix, Permutation, SymmetricOrdering};
use crate::{ComplexField, Index, MatMut, MatRef, SparseLdlError, try_collect, try_zeroed};
use dyn_stack::StackReq;
use equator::assert;
use reborrow::*;

/// symbolic structure of a supernodal factorization
#[derive(Clone, Debug)]
pub struct SymbolicSupernodalLdl<I> {
	dimension: usize,
	permutation: Permutation<I>,
	parents: Vec<I>,
	supernode_sizes: Vec<I>,
	supernode_starts: Vec<I>,
	member_to_index: Vec<I>,
	assembly_forest: AssemblyForest<I>,
	structure: SupernodalStructure<I>,
	col_ptr_val: Vec<I>,
	diag_ptr_val: Vec<I>,
	max_supernode_size: usize,
	max_degree: usize,
}

impl<I: Index> SymbolicSupernodalLdl<I> {
	#[inline]
	pub fn nrows(&self) -> usize {
		self.dimension
	}
	#[inline]
	pub fn ncols(&self) -> usize {
		self.dimension
	}
	#[inline]
	pub fn n_supernodes(&self) -> usize {
		self.supernode_sizes.len()
	}

	/// effective row permutation, including the relaxation reordering
	#[inline]
	pub fn permutation(&self) -> &Permutation<I> {
		&self.permutation
	}

	/// scalar elimination forest in the effective ordering
	#[inline]
	pub fn parents(&self) -> &[I] {
		&self.parents
	}

	#[inline]
	pub fn assembly_forest(&self) -> &AssemblyForest<I> {
		&self.assembly_forest
	}

	#[inline]
	pub fn member_to_index(&self) -> &[I] {
		&self.member_to_index
	}

	#[inline]
	pub fn supernode_size(&self, supernode: usize) -> usize {
		self.supernode_sizes[supernode].zx()
	}

	#[inline]
	pub fn supernode_start(&self, supernode: usize) -> usize {
		self.supernode_starts[supernode].zx()
	}

	#[inline]
	pub fn degree(&self, supernode: usize) -> usize {
		self.structure.degree(supernode)
	}

	/// sorted row indices of the supernode's panel
	#[inline]
	pub fn structure(&self, supernode: usize) -> &[I] {
		self.structure.structure(supernode)
	}

	/// lengths of the contiguous runs `structure(supernode)` splits into,
	/// one run per ancestor supernode
	#[inline]
	pub fn intersect_sizes(&self, supernode: usize) -> &[I] {
		self.structure.intersect_sizes(supernode)
	}

	#[inline]
	pub fn max_supernode_size(&self) -> usize {
		self.max_supernode_size
	}

	#[inline]
	pub fn max_degree(&self) -> usize {
		self.max_degree
	}

	/// length of the panel value buffer
	#[inline]
	pub fn len_lower_val(&self) -> usize {
		self.col_ptr_val[self.n_supernodes()].zx()
	}

	/// length of the diagonal-block value buffer
	#[inline]
	pub fn len_diag_val(&self) -> usize {
		self.diag_ptr_val[self.n_supernodes()].zx()
	}

	#[inline]
	pub(crate) fn panel_val_range(&self, supernode: usize) -> core::ops::Range<usize> {
		self.col_ptr_val[supernode].zx()..self.col_ptr_val[supernode + 1].zx()
	}

	#[inline]
	pub(crate) fn diag_val_range(&self, supernode: usize) -> core::ops::Range<usize> {
		self.diag_ptr_val[supernode].zx()..self.diag_ptr_val[supernode + 1].zx()
	}

	/// mean number of rows per supernodal front, used by the adaptive
	/// supernodal-strategy heuristic
	pub fn mean_front_size(&self) -> f64 {
		let n_supernodes = self.n_supernodes();
		if n_supernodes == 0 {
			return 0.0;
		}
		let mut total = 0usize;
		for supernode in 0..n_supernodes {
			total += self.supernode_size(supernode) + self.degree(supernode);
		}
		total as f64 / n_supernodes as f64
	}

	/// per-supernode inclusive subtree work estimates, used to gate task
	/// spawning in the parallel right-looking driver
	pub(crate) fn subtree_work_estimates(&self) -> Vec<f64> {
		let n_supernodes = self.n_supernodes();
		let mut work = vec![0.0f64; n_supernodes];
		for &supernode in &self.assembly_forest.postorder() {
			let supernode = supernode.zx();
			let size = self.supernode_size(supernode) as f64;
			let degree = self.degree(supernode) as f64;
			work[supernode] += size * size * size / 3.0 + size * size * degree + size * degree * degree;
			let parent = self.assembly_forest.parents[supernode];
			if parent != I::NONE {
				let subtree_work = work[supernode];
				work[parent.zx()] += subtree_work;
			}
		}
		work
	}
}

/// view over a complete supernodal factor
#[derive(Copy, Clone)]
pub struct SupernodalLdlRef<'a, I, T> {
	symbolic: &'a SymbolicSupernodalLdl<I>,
	lower_values: &'a [T],
	diag_values: &'a [T],
}

impl<'a, I: Index, T> SupernodalLdlRef<'a, I, T> {
	/// creates a factor reference from the symbolic part and the two value
	/// buffers
	///
	/// # panics
	/// panics if the buffer lengths do not match the symbolic object
	#[track_caller]
	pub fn new(symbolic: &'a SymbolicSupernodalLdl<I>, lower_values: &'a [T], diag_values: &'a [T]) -> Self {
		assert!(all(
			lower_values.len() == symbolic.len_lower_val(),
			diag_values.len() == symbolic.len_diag_val()
		));
		Self {
			symbolic,
			lower_values,
			diag_values,
		}
	}

	#[inline]
	pub fn symbolic(self) -> &'a SymbolicSupernodalLdl<I> {
		self.symbolic
	}

	/// the `degree x size` panel of the supernode
	#[inline]
	pub fn panel(self, supernode: usize) -> MatRef<'a, T> {
		let degree = self.symbolic.degree(supernode);
		let size = self.symbolic.supernode_size(supernode);
		MatRef::from_column_major_slice(&self.lower_values[self.symbolic.panel_val_range(supernode)], degree, size)
	}

	/// the `size x size` diagonal block of the supernode
	#[inline]
	pub fn diag_block(self, supernode: usize) -> MatRef<'a, T> {
		let size = self.symbolic.supernode_size(supernode);
		MatRef::from_column_major_slice(&self.diag_values[self.symbolic.diag_val_range(supernode)], size, size)
	}
}

/// computes the symbolic structure of the supernodal factorization of the
/// permuted matrix.
///
/// an externally supplied supernode partition in `ordering` is honored;
/// otherwise fundamental supernodes are formed, and relaxed under the given
/// thresholds when requested. relaxation composes its reordering into the
/// effective permutation reported by the result
pub fn factorize_supernodal_symbolic<I: Index, T: ComplexField>(
	matrix: &CoordinateMatrix<I, T>,
	ordering: &SymmetricOrdering<I>,
	relaxation: Option<&SupernodalRelaxation>,
) -> Result<SymbolicSupernodalLdl<I>, SparseLdlError> {
	let num_rows = matrix.num_rows();
	assert!(matrix.num_rows() == matrix.num_columns());
	assert!(ordering.permutation.is_identity() || ordering.permutation.len() == num_rows);

	let mut permutation = ordering.permutation.clone();
	let (mut parents, degrees) = elimination_forest_and_degrees(matrix, &permutation);

	let mut supernode_sizes = match &ordering.supernode_sizes {
		Some(sizes) => sizes.clone(),
		None => form_fundamental_supernodes(&parents, &degrees),
	};
	let (mut supernode_starts, mut member_to_index) = supernode_starts_and_member_to_index(&supernode_sizes, num_rows);
	let mut supernode_parent_links = supernode_parents(&parents, &supernode_starts, &member_to_index);

	if let Some(control) = relaxation {
		let scalar_structure = scalar_fill_structure(matrix, &permutation, &parents, &degrees);
		let supernode_degrees = symbolic::fundamental_supernode_degrees(&degrees, &supernode_sizes, &supernode_starts);
		let relaxed = relax_supernodes(
			&parents,
			&supernode_sizes,
			&supernode_starts,
			&supernode_parent_links,
			&supernode_degrees,
			&member_to_index,
			&scalar_structure,
			control,
		);

		permutation = if permutation.is_identity() {
			Permutation::new_checked(relaxed.permutation.clone(), relaxed.inverse_permutation.clone())
		} else {
			let composed = try_collect(permutation.forward().iter().map(|&p| relaxed.permutation[p.zx()]))?;
			Permutation::from_forward(composed)
		};

		parents = relaxed.parents;
		supernode_sizes = relaxed.supernode_sizes;
		supernode_starts = relaxed.supernode_starts;
		member_to_index = relaxed.member_to_index;
		supernode_parent_links = relaxed.supernode_parents;
	}

	let supernode_degrees = supernodal_degrees(matrix, &permutation, &parents, &member_to_index);
	let structure = fill_structure_indices(matrix, &permutation, &parents, &member_to_index, &supernode_degrees);
	let assembly_forest = AssemblyForest::from_parents(supernode_parent_links);

	let n_supernodes = supernode_sizes.len();
	let mut col_ptr_val = try_zeroed::<I>(n_supernodes + 1)?;
	let mut diag_ptr_val = try_zeroed::<I>(n_supernodes + 1)?;
	let mut max_supernode_size = 0usize;
	let mut max_degree = 0usize;
	{
		let mut lower_total = 0usize;
		let mut diag_total = 0usize;
		for supernode in 0..n_supernodes {
			let size = supernode_sizes[supernode].zx();
			let degree = structure.degree(supernode);
			col_ptr_val[supernode] = I::truncate(lower_total);
			diag_ptr_val[supernode] = I::truncate(diag_total);
			lower_total = lower_total.checked_add(degree * size).ok_or(SparseLdlError::IndexOverflow)?;
			diag_total = diag_total.checked_add(size * size).ok_or(SparseLdlError::IndexOverflow)?;
			max_supernode_size = Ord::max(max_supernode_size, size);
			max_degree = Ord::max(max_degree, degree);
		}
		if lower_total > I::MAX.zx() || diag_total > I::MAX.zx() {
			return Err(SparseLdlError::IndexOverflow);
		}
		col_ptr_val[n_supernodes] = I::truncate(lower_total);
		diag_ptr_val[n_supernodes] = I::truncate(diag_total);
	}

	Ok(SymbolicSupernodalLdl {
		dimension: num_rows,
		permutation,
		parents,
		supernode_sizes,
		supernode_starts,
		member_to_index,
		assembly_forest,
		structure,
		col_ptr_val,
		diag_ptr_val,
		max_supernode_size,
		max_degree,
	})
}

/// tuning and regularization parameters of the numeric phase
#[derive(Copy, Clone, Debug)]
pub struct NumericParams<'a, I, R> {
	pub factorization_type: FactorizationType,
	pub block_size: usize,
	pub tile_size: usize,
	pub regularization: Option<DynamicRegularization<'a, I, R>>,
}

impl<I, R> Default for NumericParams<'_, I, R> {
	#[inline]
	fn default() -> Self {
		Self {
			factorization_type: FactorizationType::default(),
			block_size: 64,
			tile_size: 128,
			regularization: None,
		}
	}
}

/// size of the workspace required by the numeric factorization drivers
pub fn factorize_supernodal_numeric_scratch<I: Index, T: ComplexField>(symbolic: &SymbolicSupernodalLdl<I>) -> StackReq {
	let n = symbolic.nrows();
	let n_supernodes = symbolic.n_supernodes();
	let max_size = symbolic.max_supernode_size();
	let max_degree = symbolic.max_degree();

	StackReq::all_of(&[
		// pattern flags mapping global rows to panel-relative rows
		StackReq::new::<I>(n),
		// relative index buffer for out-of-place updates
		StackReq::new::<I>(max_size + max_degree),
		// rel_rows and intersect_ptrs cursors
		StackReq::new::<I>(n_supernodes),
		StackReq::new::<I>(n_supernodes),
		// intrusive descendant lists (heads and next links)
		StackReq::new::<I>(n_supernodes),
		StackReq::new::<I>(n_supernodes),
		// scaled transpose buffer
		StackReq::new::<T>(max_size * max_size),
		// out-of-place update workspace
		StackReq::new::<T>(max_size * Ord::max(max_size, max_degree)),
	])
}

// raw access to the two flat value buffers, handed out per supernode.
// the numeric drivers guarantee each supernode's blocks are mutated by at
// most one task at a time, and descendants are only read after the task
// that wrote them completed
pub(crate) struct FactorStorage<'a, I, T> {
	symbolic: &'a SymbolicSupernodalLdl<I>,
	lower_ptr: *mut T,
	diag_ptr: *mut T,
}

unsafe impl<I, T: Send> Send for FactorStorage<'_, I, T> {}
unsafe impl<I, T: Send> Sync for FactorStorage<'_, I, T> {}

impl<'a, I: Index, T: ComplexField> FactorStorage<'a, I, T> {
	#[track_caller]
	pub fn new(symbolic: &'a SymbolicSupernodalLdl<I>, lower_values: &'a mut [T], diag_values: &'a mut [T]) -> Self {
		assert!(all(
			lower_values.len() == symbolic.len_lower_val(),
			diag_values.len() == symbolic.len_diag_val()
		));
		Self {
			symbolic,
			lower_ptr: lower_values.as_mut_ptr(),
			diag_ptr: diag_values.as_mut_ptr(),
		}
	}

	/// # safety
	/// no other live view of the same supernode's panel may exist
	#[inline]
	pub unsafe fn panel_mut(&self, supernode: usize) -> MatMut<'a, T> {
		let degree = self.symbolic.degree(supernode);
		let size = self.symbolic.supernode_size(supernode);
		let offset = self.symbolic.col_ptr_val[supernode].zx();
		MatMut::from_raw_parts_mut(self.lower_ptr.add(offset), degree, size, degree)
	}

	/// # safety
	/// no live mutable view of the same supernode's panel may exist
	#[inline]
	pub unsafe fn panel(&self, supernode: usize) -> MatRef<'a, T> {
		let degree = self.symbolic.degree(supernode);
		let size = self.symbolic.supernode_size(supernode);
		let offset = self.symbolic.col_ptr_val[supernode].zx();
		MatRef::from_raw_parts(self.lower_ptr.add(offset) as *const T, degree, size, degree)
	}

	/// # safety
	/// no other live view of the same supernode's diagonal block may exist
	#[inline]
	pub unsafe fn diag_mut(&self, supernode: usize) -> MatMut<'a, T> {
		let size = self.symbolic.supernode_size(supernode);
		let offset = self.symbolic.diag_ptr_val[supernode].zx();
		MatMut::from_raw_parts_mut(self.diag_ptr.add(offset), size, size, size)
	}

	/// # safety
	/// no live mutable view of the same supernode's diagonal block may exist
	#[inline]
	pub unsafe fn diag(&self, supernode: usize) -> MatRef<'a, T> {
		let size = self.symbolic.supernode_size(supernode);
		let offset = self.symbolic.diag_ptr_val[supernode].zx();
		MatRef::from_raw_parts(self.diag_ptr.add(offset) as *const T, size, size, size)
	}
}

// scatters the permuted input values of one block column into its diagonal
// block and panel. only the rows of the supernode's member columns are read;
// panel entries come from the upper part of those rows through the symmetry
// of the input
pub(crate) fn initialize_block_column<I: Index, T: ComplexField>(
	supernode: usize,
	matrix: &CoordinateMatrix<I, T>,
	symbolic: &SymbolicSupernodalLdl<I>,
	kind: FactorizationType,
	diag_block: MatMut<'_, T>,
	panel: MatMut<'_, T>,
) {
	let permutation = &symbolic.permutation;
	let have_permutation = !permutation.is_identity();
	let supernode_start = symbolic.supernode_start(supernode);
	let supernode_end = supernode_start + symbolic.supernode_size(supernode);
	let structure = symbolic.structure(supernode);

	let mut diag_block = diag_block;
	let mut panel = panel;
	diag_block.fill(T::zero());
	panel.fill(T::zero());

	for row in supernode_start..supernode_end {
		let orig_row = permutation.apply_inverse(row);
		for entry in matrix.row_entries(orig_row) {
			let column = if have_permutation { permutation.apply(entry.column.zx()) } else { entry.column.zx() };

			if column <= row {
				if column >= supernode_start {
					diag_block[(row - supernode_start, column - supernode_start)] = entry.value;
				}
			} else {
				// (column, row) through symmetry
				let value = match kind {
					FactorizationType::LdlTranspose => entry.value,
					_ => entry.value.conj(),
				};
				if column < supernode_end {
					diag_block[(column - supernode_start, row - supernode_start)] = value;
				} else {
					let rel = structure.partition_point(|&r| r.zx() < column);
					debug_assert!(rel < structure.len() && structure[rel].zx() == column);
					panel[(rel, row - supernode_start)] = value;
				}
			}
		}
	}
}

// gathers panel columns through the supernode's pivot permutation:
// `new[:, j] = old[:, perm[j]]`
pub(crate) fn permute_panel_columns<I: Index, T: ComplexField>(panel: MatMut<'_, T>, perm: &[I], workspace: &mut [T]) {
	let nrows = panel.nrows();
	let ncols = panel.ncols();
	debug_assert!(workspace.len() >= nrows * ncols);
	let mut panel = panel;

	for j in 0..ncols {
		workspace[j * nrows..(j + 1) * nrows].copy_from_slice(panel.rb().col(perm[j].zx()));
	}
	for j in 0..ncols {
		panel.col_mut(j).copy_from_slice(&workspace[j * nrows..(j + 1) * nrows]);
	}
}

#[cfg(test)]
pub(crate) mod tests_support {
	use super::*;
	use equator::assert;
	use crate::Mat;

	/// 5-point stencil laplacian with a diagonal shift, SPD for `shift > 0`
	pub fn grid_laplacian_f64(x_size: usize, y_size: usize, shift: f64) -> CoordinateMatrix<i64, f64> {
		let n = x_size * y_size;
		let mut matrix = CoordinateMatrix::new(n, n);
		matrix.reserve_entry_additions(5 * n);
		for x in 0..x_size {
			for y in 0..y_size {
				let row = x + y * x_size;
				if y > 0 {
					matrix.queue_entry_addition(row, x + (y - 1) * x_size, -1.0);
				}
				if x > 0 {
					matrix.queue_entry_addition(row, (x - 1) + y * x_size, -1.0);
				}
				matrix.queue_entry_addition(row, row, 4.0 + shift);
				if x + 1 < x_size {
					matrix.queue_entry_addition(row, (x + 1) + y * x_size, -1.0);
				}
				if y + 1 < y_size {
					matrix.queue_entry_addition(row, x + (y + 1) * x_size, -1.0);
				}
			}
		}
		matrix.flush_entry_queues();
		matrix
	}

	/// expands a supernodal factor into a dense unit-lower `L` and the
	/// diagonal vector `d` (for cholesky, `L` carries the scaling and `d`
	/// is all ones)
	pub fn expand_factor(factor: SupernodalLdlRef<'_, i64, f64>, cholesky: bool) -> (Mat<f64>, Vec<f64>) {
		let symbolic = factor.symbolic();
		let n = symbolic.nrows();
		let mut l = Mat::<f64>::zeros(n, n);
		let mut d = vec![1.0f64; n];

		for s in 0..symbolic.n_supernodes() {
			let start = symbolic.supernode_start(s);
			let size = symbolic.supernode_size(s);
			let diag = factor.diag_block(s);
			let panel = factor.panel(s);
			for j in 0..size {
				if cholesky {
					l[(start + j, start + j)] = diag[(j, j)];
				} else {
					d[start + j] = diag[(j, j)];
					l[(start + j, start + j)] = 1.0;
				}
				for i in j + 1..size {
					l[(start + i, start + j)] = diag[(i, j)];
				}
				for (idx, &row) in symbolic.structure(s).iter().enumerate() {
					l[(row.zx(), start + j)] = panel[(idx, j)];
				}
			}
		}
		(l, d)
	}

	fn reconstruction_error(matrix: &CoordinateMatrix<i64, f64>, factor: SupernodalLdlRef<'_, i64, f64>, cholesky: bool) -> f64 {
		let symbolic = factor.symbolic();
		let n = symbolic.nrows();
		let permutation = symbolic.permutation();
		let (l, d) = expand_factor(factor, cholesky);

		let mut max_err = 0.0f64;
		for i in 0..n {
			for j in 0..=i {
				let mut acc = 0.0;
				for k in 0..=j {
					acc += l[(i, k)] * d[k] * l[(j, k)];
				}
				let expected = matrix.entry(permutation.apply_inverse(i), permutation.apply_inverse(j));
				max_err = max_err.max((acc - expected).abs());
			}
		}
		max_err
	}

	pub fn reconstruction_error_llt(matrix: &CoordinateMatrix<i64, f64>, factor: SupernodalLdlRef<'_, i64, f64>) -> f64 {
		reconstruction_error(matrix, factor, true)
	}

	pub fn reconstruction_error_ldlt(matrix: &CoordinateMatrix<i64, f64>, factor: SupernodalLdlRef<'_, i64, f64>) -> f64 {
		reconstruction_error(matrix, factor, false)
	}
}
