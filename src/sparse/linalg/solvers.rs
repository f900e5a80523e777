//! high-level factorization, solve, and sampling surfaces.
//!
//! [`SparseLdl`] runs ordering → symbolic analysis → numeric factorization
//! behind a single call and owns the factor storage; [`Dpp`] wraps the
//! supernodal coin-flip sampler around a kernel matrix; [`NonHermitianDpp`]
//! samples a dense square kernel through the LU-style elimination.

use super::dpp::{sample_supernodal_ldl, sample_supernodal_ldl_scratch, supernodal_log_likelihood};
use super::simplicial::{
	self, SimplicialLdlRef, SymbolicSimplicialLdl, factorize_simplicial_numeric, factorize_simplicial_symbolic,
};
use super::supernodal::solve::SolveParams;
use super::supernodal::{
	NumericParams, SupernodalLdlRef, SymbolicSupernodalLdl, factorize_supernodal_numeric_left_looking,
	factorize_supernodal_numeric_right_looking, factorize_supernodal_numeric_scratch, factorize_supernodal_symbolic,
};
use super::symbolic::elimination_forest_and_degrees;
use super::{FactorizationType, LdlAlgorithm, LdlResult, SupernodalStrategy, SupernodalRelaxation};
use crate::linalg::cholesky::DynamicRegularization;
use crate::linalg::dpp::{dpp_log_likelihood, sample_non_hermitian_dpp};
use crate::sparse::{CoordinateMatrix, SymmetricOrdering};
use crate::{ComplexField, Index, Mat, MatMut, Par, RealField, SparseLdlError};
use dyn_stack::{MemBuffer, MemStack, StackReq};
use equator::assert;
use rand::SeedableRng;
use rand::rngs::StdRng;

// ratio of flops to factor entries above which the supernodal path wins
const SUPERNODAL_INTENSITY_THRESHOLD: f64 = 40.0;

/// dynamic regularization configuration; the thresholds are
/// `eps^exponent`, scaled by the largest input magnitude when `relative`
#[derive(Clone, Debug)]
pub struct DynamicRegularizationControl {
	pub enabled: bool,
	pub relative: bool,
	pub positive_threshold_exponent: f64,
	pub negative_threshold_exponent: f64,
	/// sign of the expected pivot per original row; `None` means positive
	pub signatures: Option<Vec<i8>>,
}

impl Default for DynamicRegularizationControl {
	#[inline]
	fn default() -> Self {
		Self {
			enabled: false,
			relative: true,
			positive_threshold_exponent: 0.5,
			negative_threshold_exponent: 0.5,
			signatures: None,
		}
	}
}

/// configuration of the factorization pipeline
#[derive(Clone, Debug)]
pub struct Control {
	pub factorization_type: FactorizationType,
	pub algorithm: LdlAlgorithm,
	pub supernodal_strategy: SupernodalStrategy,
	pub relax_supernodes: bool,
	pub relaxation: SupernodalRelaxation,
	pub block_size: usize,
	pub tile_size: usize,
	pub dynamic_regularization: DynamicRegularizationControl,
	pub supernodal_pivoting: bool,
	pub forward_solve_out_of_place_supernode_threshold: usize,
	pub backward_solve_out_of_place_supernode_threshold: usize,
	/// estimated subtree flops below which the right-looking driver stops
	/// spawning tasks
	pub min_parallel_work: f64,
}

impl Default for Control {
	#[inline]
	fn default() -> Self {
		Self {
			factorization_type: FactorizationType::default(),
			algorithm: LdlAlgorithm::default(),
			supernodal_strategy: SupernodalStrategy::default(),
			relax_supernodes: false,
			relaxation: SupernodalRelaxation::default(),
			block_size: 64,
			tile_size: 128,
			dynamic_regularization: DynamicRegularizationControl::default(),
			supernodal_pivoting: false,
			forward_solve_out_of_place_supernode_threshold: 10,
			backward_solve_out_of_place_supernode_threshold: 10,
			min_parallel_work: 1e5,
		}
	}
}

impl Control {
	fn solve_params(&self) -> SolveParams {
		SolveParams {
			forward_out_of_place_supernode_threshold: self.forward_solve_out_of_place_supernode_threshold,
			backward_out_of_place_supernode_threshold: self.backward_solve_out_of_place_supernode_threshold,
		}
	}

	fn regularization_thresholds<R: RealField>(&self, max_abs: R) -> (R, R) {
		let eps = R::epsilon();
		let mut positive = eps.powf(R::from_f64(self.dynamic_regularization.positive_threshold_exponent));
		let mut negative = eps.powf(R::from_f64(self.dynamic_regularization.negative_threshold_exponent));
		if self.dynamic_regularization.relative {
			positive = positive * max_abs;
			negative = negative * max_abs;
		}
		(positive, negative)
	}
}

enum LdlInner<I, T: ComplexField> {
	Supernodal {
		symbolic: SymbolicSupernodalLdl<I>,
		lower_values: Vec<T>,
		diag_values: Vec<T>,
		supernode_permutation: Option<Vec<I>>,
	},
	Simplicial {
		symbolic: SymbolicSimplicialLdl<I>,
		values: Vec<T>,
	},
}

/// sparse symmetric factorization with solve and refactorization support
pub struct SparseLdl<I, T: ComplexField> {
	control: Control,
	dimension: usize,
	inner: LdlInner<I, T>,
	solve_mem: MemBuffer,
	solve_num_rhs: usize,
}

impl<I: Index, T: ComplexField> SparseLdl<I, T> {
	/// runs the symbolic analysis and the numeric factorization of the
	/// permuted input.
	///
	/// the returned summary reports success through
	/// `num_successful_pivots == matrix.num_rows()`; on numerical failure
	/// the factor is unusable but the symbolic analysis may be retried
	/// through [`Self::refactor`] with different control settings applied
	/// to the same object
	pub fn factor(
		matrix: &CoordinateMatrix<I, T>,
		ordering: &SymmetricOrdering<I>,
		control: Control,
		par: Par,
	) -> Result<(Self, LdlResult<I, T::Real>), SparseLdlError> {
		let n = matrix.num_rows();
		assert!(matrix.num_rows() == matrix.num_columns());
		if control.supernodal_pivoting {
			assert!(control.factorization_type == FactorizationType::LdlAdjoint);
			assert!(!control.dynamic_regularization.enabled);
		}

		let use_supernodal = match control.supernodal_strategy {
			SupernodalStrategy::Scalar => false,
			SupernodalStrategy::Supernodal => true,
			SupernodalStrategy::Adaptive => {
				// estimate the arithmetic intensity of the scalar factor
				let (_, degrees) = elimination_forest_and_degrees(matrix, &ordering.permutation);
				let mut entries = 0.0f64;
				let mut flops = 0.0f64;
				for &degree in &degrees {
					let count = (degree.zx() + 1) as f64;
					entries += count;
					flops += count * count;
				}
				flops > SUPERNODAL_INTENSITY_THRESHOLD * entries
			}
		};

		let inner = if use_supernodal {
			let relaxation = control.relax_supernodes.then_some(&control.relaxation);
			let symbolic = factorize_supernodal_symbolic(matrix, ordering, relaxation)?;
			let mut lower_values = Vec::new();
			lower_values.try_reserve_exact(symbolic.len_lower_val()).map_err(crate::nomem)?;
			lower_values.resize(symbolic.len_lower_val(), T::zero());
			let mut diag_values = Vec::new();
			diag_values.try_reserve_exact(symbolic.len_diag_val()).map_err(crate::nomem)?;
			diag_values.resize(symbolic.len_diag_val(), T::zero());
			let supernode_permutation = control.supernodal_pivoting.then(|| vec![I::truncate(0); n]);

			LdlInner::Supernodal {
				symbolic,
				lower_values,
				diag_values,
				supernode_permutation,
			}
		} else {
			let symbolic = factorize_simplicial_symbolic(matrix, ordering)?;
			let mut values = Vec::new();
			values.try_reserve_exact(symbolic.len_val()).map_err(crate::nomem)?;
			values.resize(symbolic.len_val(), T::zero());
			LdlInner::Simplicial { symbolic, values }
		};

		let mut this = Self {
			control,
			dimension: n,
			inner,
			solve_mem: MemBuffer::new(StackReq::empty()),
			solve_num_rhs: 0,
		};
		let result = this.refactor(matrix, par);
		Ok((this, result))
	}

	/// reruns the numeric phase on a matrix with the same sparsity pattern,
	/// reusing the symbolic analysis and all allocations
	pub fn refactor(&mut self, matrix: &CoordinateMatrix<I, T>, par: Par) -> LdlResult<I, T::Real> {
		assert!(all(matrix.num_rows() == self.dimension, matrix.num_columns() == self.dimension));

		let control = self.control.clone();
		let control = &control;
		let (positive_threshold, negative_threshold) = control.regularization_thresholds::<T::Real>(matrix.max_abs());

		match &mut self.inner {
			LdlInner::Supernodal {
				symbolic,
				lower_values,
				diag_values,
				supernode_permutation,
			} => {
				let regularization = control.dynamic_regularization.enabled.then(|| DynamicRegularization {
					positive_threshold,
					negative_threshold,
					signatures: control.dynamic_regularization.signatures.as_deref(),
					inverse_permutation: (!symbolic.permutation().is_identity()).then(|| symbolic.permutation().inverse()),
					offset: 0,
				});
				let params = NumericParams {
					factorization_type: control.factorization_type,
					block_size: control.block_size,
					tile_size: control.tile_size,
					regularization,
				};

				let use_right_looking = match control.algorithm {
					LdlAlgorithm::LeftLooking => false,
					LdlAlgorithm::RightLooking => true,
					LdlAlgorithm::Adaptive => matches!(par, Par::Rayon(_)),
				};

				if use_right_looking {
					factorize_supernodal_numeric_right_looking(
						matrix,
						symbolic,
						lower_values,
						diag_values,
						supernode_permutation.as_deref_mut(),
						&params,
						control.min_parallel_work,
						par,
					)
				} else {
					let mut mem = MemBuffer::new(factorize_supernodal_numeric_scratch::<I, T>(symbolic));
					factorize_supernodal_numeric_left_looking(
						matrix,
						symbolic,
						lower_values,
						diag_values,
						supernode_permutation.as_deref_mut(),
						&params,
						par,
						MemStack::new(&mut mem),
					)
				}
			}
			LdlInner::Simplicial { symbolic, values } => {
				let regularization = control.dynamic_regularization.enabled.then(|| DynamicRegularization {
					positive_threshold,
					negative_threshold,
					signatures: control.dynamic_regularization.signatures.as_deref(),
					inverse_permutation: (!symbolic.permutation().is_identity()).then(|| symbolic.permutation().inverse()),
					offset: 0,
				});
				let mut mem = MemBuffer::new(simplicial::factorize_simplicial_numeric_scratch::<I, T>(self.dimension));
				factorize_simplicial_numeric(
					matrix,
					symbolic,
					values,
					control.factorization_type,
					regularization.as_ref(),
					MemStack::new(&mut mem),
				)
			}
		}
	}

	/// solves `A x = rhs` in place
	#[track_caller]
	pub fn solve_in_place(&mut self, rhs: MatMut<'_, T>, par: Par) {
		let k = rhs.ncols();
		assert!(rhs.nrows() == self.dimension);

		let req = match &self.inner {
			LdlInner::Supernodal { symbolic, .. } => super::supernodal::solve_in_place_scratch::<I, T>(symbolic, k),
			LdlInner::Simplicial { .. } => simplicial::solve_in_place_scratch::<I, T>(self.dimension, k),
		};
		if self.solve_num_rhs < k {
			self.solve_mem = MemBuffer::new(req);
			self.solve_num_rhs = k;
		}
		let stack = MemStack::new(&mut self.solve_mem);

		match &self.inner {
			LdlInner::Supernodal {
				symbolic,
				lower_values,
				diag_values,
				supernode_permutation,
			} => {
				let factor = SupernodalLdlRef::new(symbolic, lower_values, diag_values);
				super::supernodal::solve_in_place(
					factor,
					self.control.factorization_type,
					supernode_permutation.as_deref(),
					rhs,
					&self.control.solve_params(),
					par,
					stack,
				);
			}
			LdlInner::Simplicial { symbolic, values } => {
				let factor = SimplicialLdlRef::new(symbolic, values);
				simplicial::solve_in_place(factor, self.control.factorization_type, rhs, stack);
			}
		}
	}

	/// solves `A x = rhs`, returning the solution
	pub fn solve(&mut self, rhs: &Mat<T>, par: Par) -> Mat<T> {
		let mut out = rhs.clone();
		self.solve_in_place(out.as_mut(), par);
		out
	}

	#[inline]
	pub fn nrows(&self) -> usize {
		self.dimension
	}

	#[inline]
	pub fn control(&self) -> &Control {
		&self.control
	}

	/// whether the factorization went through the supernodal path
	#[inline]
	pub fn is_supernodal(&self) -> bool {
		matches!(self.inner, LdlInner::Supernodal { .. })
	}
}

/// hermitian determinantal point process sampler backed by the supernodal
/// coin-flip factorization
pub struct Dpp<I, T: ComplexField> {
	matrix: CoordinateMatrix<I, T>,
	symbolic: SymbolicSupernodalLdl<I>,
	lower_values: Vec<T>,
	diag_values: Vec<T>,
	block_size: usize,
	rng: StdRng,
}

impl<I: Index, T: ComplexField> Dpp<I, T> {
	/// prepares the sampler: the symbolic analysis is done once, every
	/// sample refills the numeric factor from the kernel matrix
	pub fn new(
		matrix: CoordinateMatrix<I, T>,
		ordering: &SymmetricOrdering<I>,
		control: &Control,
		random_seed: u64,
	) -> Result<Self, SparseLdlError> {
		assert!(matrix.num_rows() == matrix.num_columns());
		let relaxation = control.relax_supernodes.then_some(&control.relaxation);
		let symbolic = factorize_supernodal_symbolic(&matrix, ordering, relaxation)?;

		let mut lower_values = Vec::new();
		lower_values.try_reserve_exact(symbolic.len_lower_val()).map_err(crate::nomem)?;
		lower_values.resize(symbolic.len_lower_val(), T::zero());
		let mut diag_values = Vec::new();
		diag_values.try_reserve_exact(symbolic.len_diag_val()).map_err(crate::nomem)?;
		diag_values.resize(symbolic.len_diag_val(), T::zero());

		Ok(Self {
			matrix,
			symbolic,
			lower_values,
			diag_values,
			block_size: control.block_size,
			rng: StdRng::seed_from_u64(random_seed),
		})
	}

	/// draws one exact sample, returned as sorted original indices
	pub fn sample(&mut self, maximum_likelihood: bool) -> Vec<usize> {
		let mut mem = MemBuffer::new(sample_supernodal_ldl_scratch::<I, T>(&self.symbolic));
		sample_supernodal_ldl(
			&self.matrix,
			&self.symbolic,
			&mut self.lower_values,
			&mut self.diag_values,
			maximum_likelihood,
			self.block_size,
			&mut self.rng,
			MemStack::new(&mut mem),
		)
	}

	/// log-likelihood of the most recent sample, from the diagonal of the
	/// completed coin-flip factor
	pub fn log_likelihood(&self) -> T::Real {
		let factor = SupernodalLdlRef::new(&self.symbolic, &self.lower_values, &self.diag_values);
		supernodal_log_likelihood(factor)
	}
}

/// non-hermitian determinantal point process sampler over a dense square
/// kernel
pub struct NonHermitianDpp<T: ComplexField> {
	kernel: Mat<T>,
	factored: Mat<T>,
	block_size: usize,
	rng: StdRng,
}

impl<T: ComplexField> NonHermitianDpp<T> {
	#[track_caller]
	pub fn new(kernel: Mat<T>, block_size: usize, random_seed: u64) -> Self {
		assert!(kernel.nrows() == kernel.ncols());
		let factored = kernel.clone();
		Self {
			kernel,
			factored,
			block_size,
			rng: StdRng::seed_from_u64(random_seed),
		}
	}

	/// draws one exact sample, returned as sorted indices
	pub fn sample(&mut self, maximum_likelihood: bool) -> Vec<usize> {
		self.factored.as_mut().copy_from(self.kernel.as_ref());
		sample_non_hermitian_dpp(self.block_size, maximum_likelihood, self.factored.as_mut(), &mut self.rng)
	}

	/// log-likelihood of the most recent sample
	pub fn log_likelihood(&self) -> T::Real {
		let n = self.factored.nrows();
		let factored = self.factored.as_ref();
		dpp_log_likelihood((0..n).map(|i| factored[(i, i)]))
	}
}
