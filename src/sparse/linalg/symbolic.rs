//! symbolic analysis of a sparse symmetric matrix.
//!
//! the analysis turns the (permuted) input pattern into the elimination
//! forest, per-column degrees, a fundamental (optionally relaxed) supernode
//! partition, the supernodal assembly forest, and the row structure of the
//! lower factor together with its run-length-encoded partition by ancestor
//! supernode. nothing in this module reads numerical values.

use crate::sparse::{CoordinateMatrix, Permutation};
use crate::{ComplexField, Index};
use equator::assert;

/// per-column pattern of the lower-triangular factor
#[derive(Clone, Debug)]
pub struct LowerStructure<I> {
	/// length `num_rows + 1`
	pub column_offsets: Vec<I>,
	/// row indices of each column's strictly-below-diagonal entries
	pub indices: Vec<I>,
}

impl<I: Index> LowerStructure<I> {
	#[inline]
	pub fn column(&self, column: usize) -> &[I] {
		&self.indices[self.column_offsets[column].zx()..self.column_offsets[column + 1].zx()]
	}

	#[inline]
	pub fn degree(&self, column: usize) -> usize {
		self.column_offsets[column + 1].zx() - self.column_offsets[column].zx()
	}
}

/// parent links and packed child lists over supernodes (or columns)
#[derive(Clone, Debug)]
pub struct AssemblyForest<I> {
	pub parents: Vec<I>,
	pub children: Vec<I>,
	pub child_offsets: Vec<I>,
	pub roots: Vec<I>,
}

impl<I: Index> AssemblyForest<I> {
	/// builds the packed child lists and the roots from parent links
	pub fn from_parents(parents: Vec<I>) -> Self {
		let num_nodes = parents.len();
		let mut child_offsets = vec![I::truncate(0); num_nodes + 1];
		let mut roots = Vec::new();

		for (node, &parent) in parents.iter().enumerate() {
			if parent == I::NONE {
				roots.push(I::truncate(node));
			} else {
				child_offsets[parent.zx() + 1].incr();
			}
		}
		let mut sum = I::truncate(0);
		for offset in child_offsets.iter_mut() {
			sum += *offset;
			*offset = sum;
		}

		let mut children = vec![I::truncate(0); child_offsets[num_nodes].zx()];
		let mut cursor = child_offsets.clone();
		for (node, &parent) in parents.iter().enumerate() {
			if parent != I::NONE {
				let slot = cursor[parent.zx()];
				children[slot.zx()] = I::truncate(node);
				cursor[parent.zx()].incr();
			}
		}

		Self {
			parents,
			children,
			child_offsets,
			roots,
		}
	}

	#[inline]
	pub fn num_nodes(&self) -> usize {
		self.parents.len()
	}

	#[inline]
	pub fn children(&self, node: usize) -> &[I] {
		&self.children[self.child_offsets[node].zx()..self.child_offsets[node + 1].zx()]
	}

	/// postorder over the forest, children before parents
	pub fn postorder(&self) -> Vec<I> {
		let mut order = Vec::with_capacity(self.num_nodes());
		// (node, next child index to visit)
		let mut stack = Vec::new();
		for &root in &self.roots {
			stack.push((root.zx(), 0usize));
			while let Some((node, child_index)) = stack.pop() {
				let children = self.children(node);
				if child_index < children.len() {
					stack.push((node, child_index + 1));
					stack.push((children[child_index].zx(), 0));
				} else {
					order.push(I::truncate(node));
				}
			}
		}
		order
	}
}

/// computes the elimination forest and the number of off-diagonal nonzeros
/// in each column of the factor.
///
/// for each row, every strictly-lower entry contributes the path from its
/// column up to the root of the partially built forest; unset parent
/// pointers along the way are set to the current row
pub fn elimination_forest_and_degrees<I: Index, T: ComplexField>(
	matrix: &CoordinateMatrix<I, T>,
	perm: &Permutation<I>,
) -> (Vec<I>, Vec<I>) {
	let num_rows = matrix.num_rows();
	assert!(matrix.num_rows() == matrix.num_columns());

	let have_permutation = !perm.is_identity();
	let mut parents = vec![I::NONE; num_rows];
	let mut degrees = vec![I::truncate(0); num_rows];
	let mut pattern_flags = vec![I::NONE; num_rows];

	for row in 0..num_rows {
		let row_idx = I::truncate(row);
		pattern_flags[row] = row_idx;

		let orig_row = perm.apply_inverse(row);
		for entry in matrix.row_entries(orig_row) {
			let mut column = if have_permutation { perm.apply(entry.column.zx()) } else { entry.column.zx() };

			if column >= row {
				if have_permutation {
					continue;
				} else {
					// entries are sorted, nothing lower remains
					break;
				}
			}

			while pattern_flags[column] != row_idx {
				pattern_flags[column] = row_idx;
				degrees[column].incr();

				if parents[column] == I::NONE {
					parents[column] = row_idx;
				}
				column = parents[column].zx();
			}
		}
	}

	(parents, degrees)
}

/// fills the per-column row lists of the scalar lower factor
pub fn scalar_fill_structure<I: Index, T: ComplexField>(
	matrix: &CoordinateMatrix<I, T>,
	perm: &Permutation<I>,
	parents: &[I],
	degrees: &[I],
) -> LowerStructure<I> {
	let num_rows = matrix.num_rows();
	let have_permutation = !perm.is_identity();

	let mut column_offsets = vec![I::truncate(0); num_rows + 1];
	let mut num_entries = I::truncate(0);
	for column in 0..num_rows {
		column_offsets[column] = num_entries;
		num_entries += degrees[column];
	}
	column_offsets[num_rows] = num_entries;

	let mut indices = vec![I::truncate(0); num_entries.zx()];
	let mut cursor: Vec<I> = column_offsets[..num_rows].to_vec();
	let mut pattern_flags = vec![I::NONE; num_rows];

	for row in 0..num_rows {
		let row_idx = I::truncate(row);
		pattern_flags[row] = row_idx;

		let orig_row = perm.apply_inverse(row);
		for entry in matrix.row_entries(orig_row) {
			let mut column = if have_permutation { perm.apply(entry.column.zx()) } else { entry.column.zx() };

			if column >= row {
				if have_permutation {
					continue;
				} else {
					break;
				}
			}

			while pattern_flags[column] != row_idx {
				pattern_flags[column] = row_idx;
				indices[cursor[column].zx()] = row_idx;
				cursor[column].incr();
				column = parents[column].zx();
			}
		}
	}

	LowerStructure { column_offsets, indices }
}

/// groups consecutive columns into fundamental supernodes: a column joins
/// its predecessor's supernode when it is the parent of that column alone
/// and their structures differ only by the column itself
pub fn form_fundamental_supernodes<I: Index>(parents: &[I], degrees: &[I]) -> Vec<I> {
	let num_rows = parents.len();
	if num_rows == 0 {
		return Vec::new();
	}

	let mut child_count = vec![I::truncate(0); num_rows];
	for &parent in parents {
		if parent != I::NONE {
			child_count[parent.zx()].incr();
		}
	}

	let one = I::truncate(1);
	let mut sizes = vec![one];
	for column in 1..num_rows {
		let prev = column - 1;
		let is_parent_of_prev = parents[prev].sx() == column;
		let is_parent_of_only_prev = child_count[column] == one;
		let same_pattern_as_prev = degrees[prev] == degrees[column] + one;

		if is_parent_of_prev && is_parent_of_only_prev && same_pattern_as_prev {
			let last = sizes.len() - 1;
			sizes[last] += one;
		} else {
			sizes.push(one);
		}
	}
	sizes
}

/// prefix offsets (`len num_supernodes + 1`) and the member-to-supernode map
pub fn supernode_starts_and_member_to_index<I: Index>(sizes: &[I], num_rows: usize) -> (Vec<I>, Vec<I>) {
	let num_supernodes = sizes.len();
	let mut starts = vec![I::truncate(0); num_supernodes + 1];
	let mut member_to_index = vec![I::truncate(0); num_rows];

	let mut offset = 0usize;
	for (supernode, &size) in sizes.iter().enumerate() {
		starts[supernode] = I::truncate(offset);
		for member in member_to_index[offset..offset + size.zx()].iter_mut() {
			*member = I::truncate(supernode);
		}
		offset += size.zx();
	}
	starts[num_supernodes] = I::truncate(offset);
	assert!(offset == num_rows);

	(starts, member_to_index)
}

/// parent links over supernodes induced by the scalar forest
pub fn supernode_parents<I: Index>(parents: &[I], starts: &[I], member_to_index: &[I]) -> Vec<I> {
	let num_supernodes = starts.len() - 1;
	let mut supernode_parents = vec![I::NONE; num_supernodes];
	for supernode in 0..num_supernodes {
		let last_member = starts[supernode + 1].zx() - 1;
		let parent = parents[last_member];
		if parent != I::NONE {
			supernode_parents[supernode] = member_to_index[parent.zx()];
		}
	}
	supernode_parents
}

/// degrees of the supernodes: the number of structure rows below each
/// supernode's diagonal block, taken from the last member column
pub fn fundamental_supernode_degrees<I: Index>(degrees: &[I], sizes: &[I], starts: &[I]) -> Vec<I> {
	let num_supernodes = sizes.len();
	let mut supernode_degrees = vec![I::truncate(0); num_supernodes];
	for supernode in 0..num_supernodes {
		let last_member = starts[supernode + 1].zx() - 1;
		supernode_degrees[supernode] = degrees[last_member];
	}
	supernode_degrees
}

/// thresholds controlling supernode relaxation
#[derive(Copy, Clone, Debug)]
pub struct SupernodalRelaxation {
	/// absolute budget of explicit zeros a merged supernode may contain
	pub allowable_supernode_zeros: usize,
	/// alternatively, the allowed ratio of explicit zeros to expanded
	/// entries
	pub allowable_supernode_zero_ratio: f64,
}

impl Default for SupernodalRelaxation {
	#[inline]
	fn default() -> Self {
		Self {
			allowable_supernode_zeros: 128,
			allowable_supernode_zero_ratio: 0.01,
		}
	}
}

/// result of relaxing a fundamental supernode partition; the permutation is
/// the relaxation-only reordering, to be composed with the fill-reducing
/// permutation by the caller
#[derive(Clone, Debug)]
pub struct RelaxedSupernodes<I> {
	pub permutation: Vec<I>,
	pub inverse_permutation: Vec<I>,
	pub parents: Vec<I>,
	pub supernode_parents: Vec<I>,
	pub supernode_degrees: Vec<I>,
	pub supernode_sizes: Vec<I>,
	pub supernode_starts: Vec<I>,
	pub member_to_index: Vec<I>,
}

struct MergableStatus {
	mergable: bool,
	num_merged_zeros: usize,
}

// tests whether merging `child` into `parent` stays within the explicit-zero
// budget; the zero count introduced by the merge is
// `(missing_intersections + missing_structure) * child_size`
fn mergable_supernode<I: Index>(
	child_tail: usize,
	parent_tail: usize,
	child_size: usize,
	parent_size: usize,
	num_child_explicit_zeros: usize,
	num_parent_explicit_zeros: usize,
	orig_member_to_index: &[I],
	scalar_structure: &LowerStructure<I>,
	control: &SupernodalRelaxation,
) -> MergableStatus {
	let parent = orig_member_to_index[parent_tail].zx();
	let child_degree = scalar_structure.degree(child_tail);
	let parent_degree = scalar_structure.degree(parent_tail);

	// intersections of the child structure with the parent supernode sit at
	// the front of the child structure
	let mut num_child_parent_intersections = 0usize;
	for &row in scalar_structure.column(child_tail) {
		if orig_member_to_index[row.zx()].zx() == parent {
			num_child_parent_intersections += 1;
		} else {
			break;
		}
	}
	let num_missing_parent_intersections = parent_size - num_child_parent_intersections;

	// the structure below the parent supernode contains the child's
	// remaining structure, so a size comparison suffices
	let remaining_child_degree = child_degree - num_child_parent_intersections;
	let num_missing_structure_indices = parent_degree - remaining_child_degree;

	let num_new_zeros = (num_missing_parent_intersections + num_missing_structure_indices) * child_size;
	let num_old_zeros = num_child_explicit_zeros + num_parent_explicit_zeros;
	let num_zeros = num_new_zeros + num_old_zeros;

	if num_zeros <= control.allowable_supernode_zeros {
		return MergableStatus {
			mergable: true,
			num_merged_zeros: num_zeros,
		};
	}

	let num_expanded_entries = (child_size * (child_size + 1)) / 2
		+ parent_size * child_size
		+ remaining_child_degree * child_size
		+ (parent_size * (parent_size + 1)) / 2
		+ parent_degree * parent_size;
	if (num_zeros as f64) <= control.allowable_supernode_zero_ratio * num_expanded_entries as f64 {
		return MergableStatus {
			mergable: true,
			num_merged_zeros: num_zeros,
		};
	}

	MergableStatus {
		mergable: false,
		num_merged_zeros: num_zeros,
	}
}

#[allow(clippy::too_many_arguments)]
fn merge_children<I: Index>(
	parent: usize,
	orig_supernode_starts: &[I],
	orig_supernode_sizes: &[I],
	orig_member_to_index: &[I],
	forest: &AssemblyForest<I>,
	scalar_structure: &LowerStructure<I>,
	control: &SupernodalRelaxation,
	supernode_sizes: &mut [I],
	num_explicit_zeros: &mut [I],
	last_merged_child: &mut [I],
	merge_parents: &mut [I],
) {
	let children = forest.children(parent);

	loop {
		// collect the children that remain mergable
		let mut merging_child = I::NONE;
		let mut merging_zeros = 0usize;
		let mut largest_mergable_size = 0usize;

		for &child in children {
			let child = child.zx();
			if merge_parents[child] != I::NONE {
				continue;
			}

			let child_size = supernode_sizes[child].zx();
			if child_size <= largest_mergable_size && merging_child != I::NONE {
				continue;
			}

			let child_tail = orig_supernode_starts[child].zx() + orig_supernode_sizes[child].zx() - 1;
			let parent_tail = orig_supernode_starts[parent].zx() + orig_supernode_sizes[parent].zx() - 1;

			let status = mergable_supernode(
				child_tail,
				parent_tail,
				child_size,
				supernode_sizes[parent].zx(),
				num_explicit_zeros[child].zx(),
				num_explicit_zeros[parent].zx(),
				orig_member_to_index,
				scalar_structure,
				control,
			);
			if status.mergable {
				merging_child = I::truncate(child);
				merging_zeros = status.num_merged_zeros;
				largest_mergable_size = child_size;
			}
		}

		if merging_child == I::NONE {
			break;
		}
		let child = merging_child.zx();

		// absorb the child size into the parent
		supernode_sizes[parent] = supernode_sizes[parent] + supernode_sizes[child];
		supernode_sizes[child] = I::truncate(0);
		num_explicit_zeros[parent] = I::truncate(merging_zeros);

		// link the merge chains so members can be packed contiguously later
		merge_parents[child] = if last_merged_child[parent] == I::NONE {
			I::truncate(parent)
		} else {
			last_merged_child[parent]
		};
		last_merged_child[parent] = if last_merged_child[child] == I::NONE {
			I::truncate(child)
		} else {
			last_merged_child[child]
		};
	}
}

/// merges fundamental supernodes into their parents while the explicit-zero
/// budget allows, and rewrites the ordering so members of each relaxed
/// supernode are contiguous
#[allow(clippy::too_many_arguments)]
pub fn relax_supernodes<I: Index>(
	orig_parents: &[I],
	orig_supernode_sizes: &[I],
	orig_supernode_starts: &[I],
	orig_supernode_parents: &[I],
	orig_supernode_degrees: &[I],
	orig_member_to_index: &[I],
	scalar_structure: &LowerStructure<I>,
	control: &SupernodalRelaxation,
) -> RelaxedSupernodes<I> {
	let num_rows = orig_parents.len();
	let num_supernodes = orig_supernode_sizes.len();

	let forest = AssemblyForest::from_parents(orig_supernode_parents.to_vec());

	let mut supernode_sizes = orig_supernode_sizes.to_vec();
	let mut num_explicit_zeros = vec![I::truncate(0); num_supernodes];
	let mut last_merged_child = vec![I::NONE; num_supernodes];
	let mut merge_parents = vec![I::NONE; num_supernodes];

	for supernode in 0..num_supernodes {
		merge_children(
			supernode,
			orig_supernode_starts,
			orig_supernode_sizes,
			orig_member_to_index,
			&forest,
			scalar_structure,
			control,
			&mut supernode_sizes,
			&mut num_explicit_zeros,
			&mut last_merged_child,
			&mut merge_parents,
		);
	}

	// map surviving supernodes to their relaxed indices
	let mut original_to_relaxed = vec![I::NONE; num_supernodes];
	let mut num_relaxed_supernodes = 0usize;
	for supernode in 0..num_supernodes {
		if merge_parents[supernode] != I::NONE {
			continue;
		}
		original_to_relaxed[supernode] = I::truncate(num_relaxed_supernodes);
		num_relaxed_supernodes += 1;
	}

	// relaxed parents and degrees; the degree of a merge tree is that of its
	// root
	let mut relaxed_supernode_parents = vec![I::NONE; num_relaxed_supernodes];
	let mut relaxed_supernode_degrees = vec![I::truncate(0); num_relaxed_supernodes];
	let mut relaxed_offset = 0usize;
	for supernode in 0..num_supernodes {
		if merge_parents[supernode] != I::NONE {
			continue;
		}
		relaxed_supernode_degrees[relaxed_offset] = orig_supernode_degrees[supernode];

		let mut parent = orig_supernode_parents[supernode];
		if parent == I::NONE {
			relaxed_supernode_parents[relaxed_offset] = I::NONE;
		} else {
			while merge_parents[parent.zx()] != I::NONE {
				parent = merge_parents[parent.zx()];
			}
			relaxed_supernode_parents[relaxed_offset] = original_to_relaxed[parent.zx()];
		}
		relaxed_offset += 1;
	}

	// pack the members of each merge sequence contiguously, leaf first
	let mut relaxation_inverse_permutation = vec![I::truncate(0); num_rows];
	let mut relaxed_supernode_sizes = vec![I::truncate(0); num_relaxed_supernodes];
	let mut relaxed_supernode_starts = vec![I::truncate(0); num_relaxed_supernodes + 1];
	let mut relaxed_member_to_index = vec![I::truncate(0); num_rows];
	{
		let mut pack_offset = 0usize;
		for supernode in 0..num_supernodes {
			if merge_parents[supernode] != I::NONE {
				continue;
			}
			let relaxed_supernode = original_to_relaxed[supernode].zx();

			let leaf_of_merge = if last_merged_child[supernode] == I::NONE {
				supernode
			} else {
				last_merged_child[supernode].zx()
			};

			relaxed_supernode_starts[relaxed_supernode] = I::truncate(pack_offset);
			let mut supernode_size = 0usize;
			let mut supernode_to_pack = leaf_of_merge;
			loop {
				let start = orig_supernode_starts[supernode_to_pack].zx();
				let size = orig_supernode_sizes[supernode_to_pack].zx();
				for j in 0..size {
					relaxed_member_to_index[pack_offset] = I::truncate(relaxed_supernode);
					relaxation_inverse_permutation[pack_offset] = I::truncate(start + j);
					pack_offset += 1;
				}
				supernode_size += size;

				if merge_parents[supernode_to_pack] == I::NONE {
					break;
				}
				supernode_to_pack = merge_parents[supernode_to_pack].zx();
			}
			relaxed_supernode_sizes[relaxed_supernode] = I::truncate(supernode_size);
		}
		assert!(pack_offset == num_rows);
		relaxed_supernode_starts[num_relaxed_supernodes] = I::truncate(num_rows);
	}

	let mut relaxation_permutation = vec![I::truncate(0); num_rows];
	for row in 0..num_rows {
		relaxation_permutation[relaxation_inverse_permutation[row].zx()] = I::truncate(row);
	}

	// permute the scalar forest into the relaxed ordering
	let mut relaxed_parents = vec![I::NONE; num_rows];
	for row in 0..num_rows {
		let orig_parent = orig_parents[row];
		if orig_parent != I::NONE {
			relaxed_parents[relaxation_permutation[row].zx()] = relaxation_permutation[orig_parent.zx()];
		}
	}

	RelaxedSupernodes {
		permutation: relaxation_permutation,
		inverse_permutation: relaxation_inverse_permutation,
		parents: relaxed_parents,
		supernode_parents: relaxed_supernode_parents,
		supernode_degrees: relaxed_supernode_degrees,
		supernode_sizes: relaxed_supernode_sizes,
		supernode_starts: relaxed_supernode_starts,
		member_to_index: relaxed_member_to_index,
	}
}

/// number of structure rows below each supernode's diagonal block, counted
/// from the union of the member columns' patterns
pub fn supernodal_degrees<I: Index, T: ComplexField>(
	matrix: &CoordinateMatrix<I, T>,
	perm: &Permutation<I>,
	parents: &[I],
	member_to_index: &[I],
) -> Vec<I> {
	let num_rows = matrix.num_rows();
	let num_supernodes = member_to_index.last().map(|last| last.zx() + 1).unwrap_or(0);
	let have_permutation = !perm.is_identity();

	let mut pattern_flags = vec![I::NONE; num_rows];
	let mut supernode_pattern_flags = vec![I::NONE; num_supernodes];
	let mut supernode_degrees = vec![I::truncate(0); num_supernodes];

	for row in 0..num_rows {
		let row_idx = I::truncate(row);
		let main_supernode = member_to_index[row].zx();
		pattern_flags[row] = row_idx;
		supernode_pattern_flags[main_supernode] = row_idx;

		let orig_row = perm.apply_inverse(row);
		for entry in matrix.row_entries(orig_row) {
			let mut descendant = if have_permutation { perm.apply(entry.column.zx()) } else { entry.column.zx() };

			if descendant >= row {
				if have_permutation {
					continue;
				} else {
					break;
				}
			}

			while pattern_flags[descendant] != row_idx {
				pattern_flags[descendant] = row_idx;

				let descendant_supernode = member_to_index[descendant].zx();
				debug_assert!(descendant_supernode <= main_supernode);
				if descendant_supernode < main_supernode && supernode_pattern_flags[descendant_supernode] != row_idx {
					supernode_pattern_flags[descendant_supernode] = row_idx;
					supernode_degrees[descendant_supernode].incr();
				}

				descendant = parents[descendant].zx();
			}
		}
	}

	supernode_degrees
}

/// sorted structure rows per supernode, plus the run-length encoding of each
/// structure by the ancestor supernode owning the run
#[derive(Clone, Debug)]
pub struct SupernodalStructure<I> {
	/// length `num_supernodes + 1`; offsets into `row_indices`
	pub structure_offsets: Vec<I>,
	pub row_indices: Vec<I>,
	/// length `num_supernodes + 1`; offsets into `intersect_sizes`
	pub intersect_offsets: Vec<I>,
	pub intersect_sizes: Vec<I>,
}

impl<I: Index> SupernodalStructure<I> {
	#[inline]
	pub fn structure(&self, supernode: usize) -> &[I] {
		&self.row_indices[self.structure_offsets[supernode].zx()..self.structure_offsets[supernode + 1].zx()]
	}

	#[inline]
	pub fn intersect_sizes(&self, supernode: usize) -> &[I] {
		&self.intersect_sizes[self.intersect_offsets[supernode].zx()..self.intersect_offsets[supernode + 1].zx()]
	}

	#[inline]
	pub fn degree(&self, supernode: usize) -> usize {
		self.structure_offsets[supernode + 1].zx() - self.structure_offsets[supernode].zx()
	}
}

/// fills the sorted row structure of every supernode and its partition into
/// contiguous runs per ancestor supernode
pub fn fill_structure_indices<I: Index, T: ComplexField>(
	matrix: &CoordinateMatrix<I, T>,
	perm: &Permutation<I>,
	parents: &[I],
	member_to_index: &[I],
	supernode_degrees: &[I],
) -> SupernodalStructure<I> {
	let num_rows = matrix.num_rows();
	let num_supernodes = supernode_degrees.len();
	let have_permutation = !perm.is_identity();

	let mut structure_offsets = vec![I::truncate(0); num_supernodes + 1];
	let mut total = I::truncate(0);
	for supernode in 0..num_supernodes {
		structure_offsets[supernode] = total;
		total += supernode_degrees[supernode];
	}
	structure_offsets[num_supernodes] = total;

	let mut row_indices = vec![I::truncate(0); total.zx()];
	let mut cursor: Vec<I> = structure_offsets[..num_supernodes].to_vec();

	let mut pattern_flags = vec![I::NONE; num_rows];
	let mut supernode_pattern_flags = vec![I::NONE; num_supernodes];

	for row in 0..num_rows {
		let row_idx = I::truncate(row);
		let main_supernode = member_to_index[row].zx();
		pattern_flags[row] = row_idx;
		supernode_pattern_flags[main_supernode] = row_idx;

		let orig_row = perm.apply_inverse(row);
		for entry in matrix.row_entries(orig_row) {
			let mut descendant = if have_permutation { perm.apply(entry.column.zx()) } else { entry.column.zx() };

			if descendant >= row {
				if have_permutation {
					continue;
				} else {
					break;
				}
			}

			while pattern_flags[descendant] != row_idx {
				pattern_flags[descendant] = row_idx;

				let descendant_supernode = member_to_index[descendant].zx();
				if descendant_supernode == main_supernode {
					break;
				}
				if supernode_pattern_flags[descendant_supernode] != row_idx {
					supernode_pattern_flags[descendant_supernode] = row_idx;
					row_indices[cursor[descendant_supernode].zx()] = row_idx;
					cursor[descendant_supernode].incr();
				}

				descendant = parents[descendant].zx();
			}
		}
	}

	// run-length encode each structure by the supernode owning the rows,
	// which removes the binary searches from the numeric updates
	let mut intersect_offsets = vec![I::truncate(0); num_supernodes + 1];
	let mut intersect_sizes = Vec::new();
	for supernode in 0..num_supernodes {
		intersect_offsets[supernode] = I::truncate(intersect_sizes.len());
		let structure = &row_indices[structure_offsets[supernode].zx()..structure_offsets[supernode + 1].zx()];
		let mut position = 0usize;
		while position < structure.len() {
			let owner = member_to_index[structure[position].zx()];
			let mut run = 1usize;
			while position + run < structure.len() && member_to_index[structure[position + run].zx()] == owner {
				run += 1;
			}
			intersect_sizes.push(I::truncate(run));
			position += run;
		}
	}
	intersect_offsets[num_supernodes] = I::truncate(intersect_sizes.len());

	SupernodalStructure {
		structure_offsets,
		row_indices,
		intersect_offsets,
		intersect_sizes,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use equator::assert;

	// the 11x11 pattern from Davis' "Direct Methods for Sparse Linear
	// Systems", frequently used to exercise elimination trees
	fn davis_matrix() -> CoordinateMatrix<i64, f64> {
		let mut matrix = CoordinateMatrix::new(11, 11);
		let lower = [
			(5usize, 0usize),
			(6, 0),
			(2, 1),
			(7, 1),
			(9, 2),
			(10, 2),
			(5, 3),
			(9, 3),
			(7, 4),
			(10, 4),
			(8, 5),
			(9, 5),
			(10, 6),
			(9, 7),
			(10, 7),
			(10, 9),
		];
		matrix.reserve_entry_additions(11 + 2 * lower.len());
		for i in 0..11 {
			matrix.queue_entry_addition(i, i, 10.0);
		}
		for &(i, j) in &lower {
			matrix.queue_entry_addition(i, j, 1.0);
			matrix.queue_entry_addition(j, i, 1.0);
		}
		matrix.flush_entry_queues();
		matrix
	}

	#[test]
	fn test_elimination_forest() {
		let matrix = davis_matrix();
		let (parents, degrees) = elimination_forest_and_degrees(&matrix, &Permutation::identity());

		assert_eq!(parents, vec![5, 2, 7, 5, 7, 6, 8, 9, 9, 10, -1]);
		// off-diagonal counts per column of L
		assert_eq!(degrees, vec![2, 2, 3, 2, 2, 3, 3, 2, 2, 1, 0]);
	}

	#[test]
	fn test_forest_path_property() {
		let matrix = davis_matrix();
		let (parents, _) = elimination_forest_and_degrees(&matrix, &Permutation::identity());

		// every strictly-lower entry (i, j) has i on the path from j to a root
		for entry in matrix.entries() {
			let (i, j) = (entry.row.zx(), entry.column.zx());
			if j >= i {
				continue;
			}
			let mut node = j;
			let mut found = false;
			while node != usize::MAX {
				if node == i {
					found = true;
					break;
				}
				let parent = parents[node];
				node = if parent == -1 { usize::MAX } else { parent.zx() };
			}
			assert!(found);
		}
	}

	#[test]
	fn test_fundamental_supernodes_partition() {
		let matrix = davis_matrix();
		let (parents, degrees) = elimination_forest_and_degrees(&matrix, &Permutation::identity());
		let sizes = form_fundamental_supernodes(&parents, &degrees);

		let total: i64 = sizes.iter().sum();
		assert_eq!(total, 11);
		for &size in &sizes {
			assert!(size >= 1);
		}

		let (starts, member_to_index) = supernode_starts_and_member_to_index(&sizes, 11);
		assert_eq!(starts.len(), sizes.len() + 1);
		for (row, &supernode) in member_to_index.iter().enumerate() {
			let supernode = supernode.zx();
			assert!(starts[supernode].zx() <= row && row < starts[supernode + 1].zx());
		}
	}

	#[test]
	fn test_supernodal_structure_is_sorted_and_rle_consistent() {
		let matrix = davis_matrix();
		let perm = Permutation::identity();
		let (parents, degrees) = elimination_forest_and_degrees(&matrix, &perm);
		let sizes = form_fundamental_supernodes(&parents, &degrees);
		let (starts, member_to_index) = supernode_starts_and_member_to_index(&sizes, 11);
		let _ = starts;
		let supernode_degrees = supernodal_degrees(&matrix, &perm, &parents, &member_to_index);
		let structure = fill_structure_indices(&matrix, &perm, &parents, &member_to_index, &supernode_degrees);

		for supernode in 0..sizes.len() {
			let rows = structure.structure(supernode);
			for window in rows.windows(2) {
				assert!(window[0] < window[1]);
			}
			let rle: i64 = structure.intersect_sizes(supernode).iter().sum();
			assert_eq!(rle.zx(), rows.len());

			// each run stays within one supernode
			let mut position = 0usize;
			for &run in structure.intersect_sizes(supernode) {
				let owner = member_to_index[rows[position].zx()];
				for k in 0..run.zx() {
					assert_eq!(member_to_index[rows[position + k].zx()], owner);
				}
				position += run.zx();
			}
		}
	}

	#[test]
	fn test_relaxation_zero_budget_only_merges_for_free() {
		let matrix = davis_matrix();
		let perm = Permutation::identity();
		let (parents, degrees) = elimination_forest_and_degrees(&matrix, &perm);
		let scalar_structure = scalar_fill_structure(&matrix, &perm, &parents, &degrees);
		let sizes = form_fundamental_supernodes(&parents, &degrees);
		let (starts, member_to_index) = supernode_starts_and_member_to_index(&sizes, 11);
		let sup_parents = supernode_parents(&parents, &starts, &member_to_index);
		let sup_degrees = fundamental_supernode_degrees(&degrees, &sizes, &starts);

		let control = SupernodalRelaxation {
			allowable_supernode_zeros: 0,
			allowable_supernode_zero_ratio: 0.0,
		};
		let relaxed = relax_supernodes(
			&parents,
			&sizes,
			&starts,
			&sup_parents,
			&sup_degrees,
			&member_to_index,
			&scalar_structure,
			&control,
		);

		// merges that introduce no zeros are still accepted; the partition
		// can only coarsen
		assert!(relaxed.supernode_sizes.len() <= sizes.len());
		let total: i64 = relaxed.supernode_sizes.iter().sum();
		assert_eq!(total, 11);
	}

	#[test]
	fn test_relaxation_generous_budget_merges() {
		let matrix = davis_matrix();
		let perm = Permutation::identity();
		let (parents, degrees) = elimination_forest_and_degrees(&matrix, &perm);
		let scalar_structure = scalar_fill_structure(&matrix, &perm, &parents, &degrees);
		let sizes = form_fundamental_supernodes(&parents, &degrees);
		let (starts, member_to_index) = supernode_starts_and_member_to_index(&sizes, 11);
		let sup_parents = supernode_parents(&parents, &starts, &member_to_index);
		let sup_degrees = fundamental_supernode_degrees(&degrees, &sizes, &starts);

		let control = SupernodalRelaxation {
			allowable_supernode_zeros: 1_000_000,
			allowable_supernode_zero_ratio: 1.0,
		};
		let relaxed = relax_supernodes(
			&parents,
			&sizes,
			&starts,
			&sup_parents,
			&sup_degrees,
			&member_to_index,
			&scalar_structure,
			&control,
		);

		// an unbounded budget collapses each tree into its root supernode
		assert_eq!(relaxed.supernode_sizes.len(), 1);
		assert_eq!(relaxed.supernode_sizes[0], 11);

		// the relaxation permutation is a proper permutation
		let mut seen = vec![false; 11];
		for &p in &relaxed.permutation {
			assert!(!seen[p.zx()]);
			seen[p.zx()] = true;
		}
	}
}
