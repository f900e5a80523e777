//! sparse symmetric factorization and DPP sampling.
//!
//! the pipeline is: an externally supplied fill-reducing ordering, the
//! [`symbolic`] analysis (elimination forest, supernodes, structure), the
//! [`supernodal`] (or [`simplicial`]) numeric factorization, and the
//! supernodal solve. [`solvers`] ties the stages together behind
//! `SparseLdl` and `Dpp`, which is where most callers should start.

pub mod dpp;
pub mod simplicial;
pub mod solvers;
pub mod supernodal;
pub mod symbolic;

pub use crate::linalg::cholesky::FactorizationType;
pub use symbolic::SupernodalRelaxation;

use crate::Index;
use crate::scalar::RealField;

/// loop invariant of the supernodal numeric factorization
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum LdlAlgorithm {
	/// apply pending descendant updates when visiting a supernode
	LeftLooking,
	/// propagate schur complements up the assembly forest
	RightLooking,
	/// right-looking when threads are available, left-looking otherwise
	#[default]
	Adaptive,
}

/// whether to use supernodes at all
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum SupernodalStrategy {
	/// scalar up-looking factorization without supernodes
	Scalar,
	/// supernodal factorization
	Supernodal,
	/// choose from the mean front size of the symbolic analysis
	#[default]
	Adaptive,
}

/// summary of a numeric factorization.
///
/// `num_successful_pivots` equals the matrix dimension on success; a smaller
/// value identifies the first failing column. numerical failure is reported
/// through this struct, never by panicking
#[derive(Clone, Debug)]
pub struct LdlResult<I, R> {
	pub num_successful_pivots: usize,
	pub largest_supernode: usize,
	pub num_factorization_entries: usize,
	pub num_factorization_flops: f64,
	/// `(original_row, signed_shift)` pairs appended by dynamic
	/// regularization, in elimination order
	pub dynamic_regularization: Vec<(I, R)>,
}

impl<I: Index, R: RealField> Default for LdlResult<I, R> {
	#[inline]
	fn default() -> Self {
		Self {
			num_successful_pivots: 0,
			largest_supernode: 0,
			num_factorization_entries: 0,
			num_factorization_flops: 0.0,
			dynamic_regularization: Vec::new(),
		}
	}
}

impl<I: Index, R: RealField> LdlResult<I, R> {
	/// whether all `dimension` pivots succeeded
	#[inline]
	pub fn is_success(&self, dimension: usize) -> bool {
		self.num_successful_pivots == dimension
	}

	pub(crate) fn incorporate_supernode(&mut self, supernode_size: usize, degree: usize) {
		self.largest_supernode = Ord::max(self.largest_supernode, supernode_size);
		self.num_factorization_entries += (supernode_size * (supernode_size + 1)) / 2 + degree * supernode_size;

		let size = supernode_size as f64;
		let degree = degree as f64;
		self.num_factorization_flops += size * size * size / 3.0 + size * size * degree + size * degree * degree;
	}

	pub(crate) fn merge(&mut self, other: LdlResult<I, R>) {
		self.num_successful_pivots += other.num_successful_pivots;
		self.largest_supernode = Ord::max(self.largest_supernode, other.largest_supernode);
		self.num_factorization_entries += other.num_factorization_entries;
		self.num_factorization_flops += other.num_factorization_flops;
		self.dynamic_regularization.extend(other.dynamic_regularization);
	}
}
