//! sparse matrix container and orderings.
//!
//! [`CoordinateMatrix`] stores a lexicographically sorted sequence of
//! `(row, column, value)` entries together with a row-offsets vector, a
//! superset of the CSR format that keeps both indices explicit. additions
//! and removals are queued and applied in batches so the sort and the
//! offset recomputation are amortized:
//!
//! ```
//! use sparse_ldl::sparse::CoordinateMatrix;
//!
//! let mut matrix = CoordinateMatrix::<i64, f64>::new(5, 5);
//! matrix.reserve_entry_additions(6);
//! matrix.queue_entry_addition(3, 4, 1.0);
//! matrix.queue_entry_addition(2, 3, 2.0);
//! matrix.queue_entry_addition(2, 0, -1.0);
//! matrix.queue_entry_addition(4, 2, -2.0);
//! matrix.queue_entry_addition(4, 4, 3.0);
//! matrix.queue_entry_addition(3, 2, 4.0);
//! matrix.flush_entry_queues();
//! assert_eq!(matrix.num_entries(), 6);
//! ```

pub mod linalg;

use crate::{ComplexField, Index};
use equator::assert;

/// a single `(row, column, value)` triple
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MatrixEntry<I, T> {
	pub row: I,
	pub column: I,
	pub value: T,
}

impl<I, T> MatrixEntry<I, T> {
	#[inline]
	pub fn new(row: I, column: I, value: T) -> Self {
		Self { row, column, value }
	}
}

/// which part of the input entries a constructor keeps
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum EntryMask {
	/// all entries
	#[default]
	Full,
	/// entries with `row >= column`
	LowerTriangle,
	/// entries with `row <= column`
	UpperTriangle,
}

impl EntryMask {
	#[inline]
	fn keeps<I: Index>(self, row: I, column: I) -> bool {
		match self {
			EntryMask::Full => true,
			EntryMask::LowerTriangle => row >= column,
			EntryMask::UpperTriangle => row <= column,
		}
	}
}

/// coordinate-format sparse matrix with batched mutation queues
#[derive(Clone, Debug)]
pub struct CoordinateMatrix<I, T> {
	num_rows: usize,
	num_columns: usize,
	entries: Vec<MatrixEntry<I, T>>,
	row_entry_offsets: Vec<I>,
	entries_to_add: Vec<MatrixEntry<I, T>>,
	entries_to_remove: Vec<(I, I)>,
}

impl<I: Index, T: ComplexField> CoordinateMatrix<I, T> {
	/// empty matrix with the given dimensions
	#[inline]
	pub fn new(num_rows: usize, num_columns: usize) -> Self {
		let mut this = Self {
			num_rows: 0,
			num_columns: 0,
			entries: Vec::new(),
			row_entry_offsets: Vec::new(),
			entries_to_add: Vec::new(),
			entries_to_remove: Vec::new(),
		};
		this.resize(num_rows, num_columns);
		this
	}

	/// builds a matrix from a list of entries, keeping those selected by
	/// `mask` and summing duplicates
	pub fn from_entries(num_rows: usize, num_columns: usize, entries: &[MatrixEntry<I, T>], mask: EntryMask) -> Self {
		let mut this = Self::new(num_rows, num_columns);
		this.reserve_entry_additions(entries.len());
		for entry in entries {
			if mask.keeps(entry.row, entry.column) {
				this.queue_entry_addition(entry.row.zx(), entry.column.zx(), entry.value);
			}
		}
		this.flush_entry_queues();
		this
	}

	#[inline]
	pub fn num_rows(&self) -> usize {
		self.num_rows
	}
	#[inline]
	pub fn num_columns(&self) -> usize {
		self.num_columns
	}
	#[inline]
	pub fn num_entries(&self) -> usize {
		self.entries.len()
	}

	/// removes all entries and sets both dimensions
	pub fn resize(&mut self, num_rows: usize, num_columns: usize) {
		assert!(all(num_rows <= I::MAX.zx(), num_columns <= I::MAX.zx()));
		self.num_rows = num_rows;
		self.num_columns = num_columns;
		self.entries.clear();
		self.entries_to_add.clear();
		self.entries_to_remove.clear();
		self.row_entry_offsets.clear();
		self.row_entry_offsets.resize(num_rows + 1, I::truncate(0));
	}

	/// reserves room for `max_entry_additions` queued additions
	#[inline]
	pub fn reserve_entry_additions(&mut self, max_entry_additions: usize) {
		self.entries_to_add.reserve(max_entry_additions);
	}

	/// reserves room for `max_entry_removals` queued removals
	#[inline]
	pub fn reserve_entry_removals(&mut self, max_entry_removals: usize) {
		self.entries_to_remove.reserve(max_entry_removals);
	}

	/// appends an entry to the addition queue without sorting or updating
	/// the row offsets
	#[inline]
	#[track_caller]
	pub fn queue_entry_addition(&mut self, row: usize, column: usize, value: T) {
		assert!(all(row < self.num_rows, column < self.num_columns));
		self.entries_to_add.push(MatrixEntry::new(I::truncate(row), I::truncate(column), value));
	}

	/// appends a location to the removal queue
	#[inline]
	#[track_caller]
	pub fn queue_entry_removal(&mut self, row: usize, column: usize) {
		assert!(all(row < self.num_rows, column < self.num_columns));
		self.entries_to_remove.push((I::truncate(row), I::truncate(column)));
	}

	#[inline]
	pub fn entry_queues_are_empty(&self) -> bool {
		self.entries_to_add.is_empty() && self.entries_to_remove.is_empty()
	}

	/// applies all queued removals and additions: the entry sequence ends up
	/// lexicographically sorted with same-location entries summed, and the
	/// row offsets are recomputed in a single pass
	pub fn flush_entry_queues(&mut self) {
		if self.entry_queues_are_empty() {
			return;
		}

		if !self.entries_to_remove.is_empty() {
			let removals = &mut self.entries_to_remove;
			removals.sort_unstable();
			removals.dedup();
			self.entries
				.retain(|entry| removals.binary_search(&(entry.row, entry.column)).is_err());
			removals.clear();
		}

		if !self.entries_to_add.is_empty() {
			self.entries_to_add.sort_by_key(|entry| (entry.row, entry.column));

			let old = core::mem::take(&mut self.entries);
			let additions = core::mem::take(&mut self.entries_to_add);
			self.entries.reserve(old.len() + additions.len());

			let mut old_iter = old.into_iter().peekable();
			let mut add_iter = additions.into_iter().peekable();

			loop {
				let take_old = match (old_iter.peek(), add_iter.peek()) {
					(Some(old_entry), Some(new_entry)) => (old_entry.row, old_entry.column) <= (new_entry.row, new_entry.column),
					(Some(_), None) => true,
					(None, Some(_)) => false,
					(None, None) => break,
				};
				let mut entry = if take_old { old_iter.next().unwrap() } else { add_iter.next().unwrap() };

				// absorb duplicates of the same location from both streams
				loop {
					if let Some(next) = old_iter.peek() {
						if (next.row, next.column) == (entry.row, entry.column) {
							entry.value += old_iter.next().unwrap().value;
							continue;
						}
					}
					if let Some(next) = add_iter.peek() {
						if (next.row, next.column) == (entry.row, entry.column) {
							entry.value += add_iter.next().unwrap().value;
							continue;
						}
					}
					break;
				}

				self.entries.push(entry);
			}
		}

		self.update_row_entry_offsets();
	}

	/// adds a single entry immediately; prefer batching through the queues
	pub fn add_entry(&mut self, row: usize, column: usize, value: T) {
		self.queue_entry_addition(row, column, value);
		self.flush_entry_queues();
	}

	/// removes a single entry immediately; prefer batching through the queues
	pub fn remove_entry(&mut self, row: usize, column: usize) {
		self.queue_entry_removal(row, column);
		self.flush_entry_queues();
	}

	fn update_row_entry_offsets(&mut self) {
		let offsets = &mut self.row_entry_offsets;
		offsets.clear();
		offsets.resize(self.num_rows + 1, I::truncate(0));
		for entry in &self.entries {
			offsets[entry.row.zx() + 1].incr();
		}
		let mut sum = I::truncate(0);
		for offset in offsets.iter_mut() {
			sum += *offset;
			*offset = sum;
		}
	}

	/// position in the entry sequence where row `row` begins
	#[inline]
	#[track_caller]
	pub fn row_entry_offset(&self, row: usize) -> usize {
		self.row_entry_offsets[row].zx()
	}

	/// number of entries stored in row `row`
	#[inline]
	#[track_caller]
	pub fn num_row_entries(&self, row: usize) -> usize {
		self.row_entry_offsets[row + 1].zx() - self.row_entry_offsets[row].zx()
	}

	/// the entries of row `row`, sorted by column
	#[inline]
	#[track_caller]
	pub fn row_entries(&self, row: usize) -> &[MatrixEntry<I, T>] {
		&self.entries[self.row_entry_offsets[row].zx()..self.row_entry_offsets[row + 1].zx()]
	}

	/// value at `(row, column)`, or zero if no entry is stored there
	pub fn entry(&self, row: usize, column: usize) -> T {
		let row_entries = self.row_entries(row);
		match row_entries.binary_search_by_key(&I::truncate(column), |entry| entry.column) {
			Ok(position) => row_entries[position].value,
			Err(_) => T::zero(),
		}
	}

	/// all entries, sorted lexicographically by `(row, column)`
	#[inline]
	pub fn entries(&self) -> &[MatrixEntry<I, T>] {
		&self.entries
	}

	/// mutable access to the entries; only the values should be modified
	#[inline]
	pub fn entries_mut(&mut self) -> &mut [MatrixEntry<I, T>] {
		&mut self.entries
	}

	/// copies the entries out as a plain vector
	pub fn to_entries(&self) -> Vec<MatrixEntry<I, T>> {
		self.entries.clone()
	}

	/// largest absolute entry value, zero for an empty matrix
	pub fn max_abs(&self) -> T::Real {
		let mut max = <T::Real as ComplexField>::zero();
		for entry in &self.entries {
			let abs = entry.value.abs();
			if abs > max {
				max = abs;
			}
		}
		max
	}
}

/// permutation given by a forward and an inverse vector; an empty pair is
/// the identity
#[derive(Clone, Debug, Default)]
pub struct Permutation<I> {
	perm: Vec<I>,
	iperm: Vec<I>,
}

impl<I: Index> Permutation<I> {
	/// the identity permutation of any size
	#[inline]
	pub fn identity() -> Self {
		Self { perm: Vec::new(), iperm: Vec::new() }
	}

	/// builds from a forward permutation, computing the inverse
	///
	/// # panics
	/// panics if `perm` is not a permutation of `0..perm.len()`
	#[track_caller]
	pub fn from_forward(perm: Vec<I>) -> Self {
		let n = perm.len();
		let mut iperm = vec![I::NONE; n];
		for (i, &p) in perm.iter().enumerate() {
			assert!(p.sx() < n);
			assert!(iperm[p.zx()] == I::NONE);
			iperm[p.zx()] = I::truncate(i);
		}
		Self { perm, iperm }
	}

	/// builds from both vectors, checking `iperm[perm[i]] == i`
	#[track_caller]
	pub fn new_checked(perm: Vec<I>, iperm: Vec<I>) -> Self {
		let n = perm.len();
		assert!(iperm.len() == n);
		for (i, &p) in perm.iter().enumerate() {
			assert!(p.sx() < n);
			assert!(iperm[p.zx()].zx() == i);
		}
		Self { perm, iperm }
	}

	#[inline]
	pub fn is_identity(&self) -> bool {
		self.perm.is_empty()
	}

	#[inline]
	pub fn len(&self) -> usize {
		self.perm.len()
	}

	#[inline]
	pub fn is_empty(&self) -> bool {
		self.perm.is_empty()
	}

	/// forward image of `i`, which is `i` itself for the identity
	#[inline]
	pub fn apply(&self, i: usize) -> usize {
		if self.perm.is_empty() { i } else { self.perm[i].zx() }
	}

	/// inverse image of `i`
	#[inline]
	pub fn apply_inverse(&self, i: usize) -> usize {
		if self.iperm.is_empty() { i } else { self.iperm[i].zx() }
	}

	#[inline]
	pub fn forward(&self) -> &[I] {
		&self.perm
	}

	#[inline]
	pub fn inverse(&self) -> &[I] {
		&self.iperm
	}
}

/// ordering information handed to the factorization by an external
/// fill-reducing component: a permutation and, optionally, precomputed
/// supernode sizes matching that permutation
#[derive(Clone, Debug, Default)]
pub struct SymmetricOrdering<I> {
	pub permutation: Permutation<I>,
	pub supernode_sizes: Option<Vec<I>>,
}

impl<I: Index> SymmetricOrdering<I> {
	/// identity ordering with no supernodal grouping
	#[inline]
	pub fn identity() -> Self {
		Self {
			permutation: Permutation::identity(),
			supernode_sizes: None,
		}
	}

	/// ordering from a forward permutation
	#[inline]
	pub fn from_forward(perm: Vec<I>) -> Self {
		Self {
			permutation: Permutation::from_forward(perm),
			supernode_sizes: None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use equator::assert;

	#[test]
	fn test_flush_produces_sorted_summed_entries() {
		let mut matrix = CoordinateMatrix::<i64, f64>::new(5, 5);
		matrix.reserve_entry_additions(7);
		matrix.queue_entry_addition(3, 4, 1.0);
		matrix.queue_entry_addition(2, 3, 2.0);
		matrix.queue_entry_addition(2, 0, -1.0);
		matrix.queue_entry_addition(4, 2, -2.0);
		matrix.queue_entry_addition(4, 4, 3.0);
		matrix.queue_entry_addition(3, 2, 4.0);
		matrix.queue_entry_addition(2, 3, 0.5);
		matrix.flush_entry_queues();

		let entries = matrix.entries();
		let expected = [(2, 0, -1.0), (2, 3, 2.5), (3, 2, 4.0), (3, 4, 1.0), (4, 2, -2.0), (4, 4, 3.0)];
		assert_eq!(entries.len(), expected.len());
		for (entry, &(r, c, v)) in entries.iter().zip(&expected) {
			assert_eq!((entry.row, entry.column), (r, c));
			assert!((entry.value - v).abs() == 0.0);
		}

		assert_eq!(matrix.row_entry_offset(0), 0);
		assert_eq!(matrix.num_row_entries(2), 2);
		assert_eq!(matrix.num_row_entries(3), 2);
		assert_eq!(matrix.entry(2, 3), 2.5);
		assert_eq!(matrix.entry(0, 0), 0.0);
	}

	#[test]
	fn test_removal_then_addition() {
		let mut matrix = CoordinateMatrix::<i32, f64>::new(4, 4);
		matrix.add_entry(1, 1, 2.0);
		matrix.add_entry(2, 1, -1.0);

		matrix.queue_entry_removal(2, 1);
		matrix.queue_entry_addition(3, 3, 5.0);
		matrix.flush_entry_queues();

		assert_eq!(matrix.num_entries(), 2);
		assert_eq!(matrix.entry(2, 1), 0.0);
		assert_eq!(matrix.entry(3, 3), 5.0);
	}

	#[test]
	fn test_insertion_order_invariance() {
		let n = 71;
		let mut entries = Vec::new();
		for i in 0..n {
			for j in 0..n {
				if (i * 7 + j * 3) % 5 == 0 {
					entries.push((i, j, (i + 2 * j) as f64));
				}
			}
		}
		assert!(entries.len() > 1000);

		let mut forward = CoordinateMatrix::<i64, f64>::new(n, n);
		forward.reserve_entry_additions(entries.len());
		for &(i, j, v) in &entries {
			forward.queue_entry_addition(i, j, v);
		}
		forward.flush_entry_queues();

		let mut backward = CoordinateMatrix::<i64, f64>::new(n, n);
		backward.reserve_entry_additions(entries.len());
		for &(i, j, v) in entries.iter().rev() {
			backward.queue_entry_addition(i, j, v);
		}
		backward.flush_entry_queues();

		assert_eq!(forward.entries(), backward.entries());
	}
}
