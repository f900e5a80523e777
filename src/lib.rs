//! sparse direct symmetric factorization and determinantal point process (DPP)
//! sampling.
//!
//! given a sparse matrix $A$ that is hermitian (or complex-symmetric) and a
//! fill-reducing permutation $P$, this crate computes one of three triangular
//! factorizations of $P A P^\top$:
//!
//! - **cholesky**: $P A P^\top = L L^H$, requiring positive definiteness,
//! - **$LDL^H$**: unit lower-triangular $L$ and real diagonal $D$,
//! - **$LDL^\top$**: unit lower-triangular $L$ and (possibly complex)
//!   diagonal $D$.
//!
//! the same elimination, with its diagonal kernel replaced by a coin-flip
//! variant, draws exact samples from the hermitian DPP whose marginal kernel
//! is $A$, as well as from a non-hermitian DPP given a dense square kernel.
//!
//! the entry points are [`sparse::linalg::solvers::SparseLdl`] for
//! factorization and solves, and [`sparse::linalg::solvers::Dpp`] for
//! sampling. lower-level symbolic and numeric stages are exposed in
//! [`sparse::linalg`] for callers that want to drive them separately.

#![allow(non_snake_case)]

use bytemuck::Pod;

pub mod linalg;
pub mod mat;
pub mod scalar;
pub mod sparse;

mod ftz;

pub use mat::{Mat, MatMut, MatRef};
pub use scalar::{ComplexField, RealField};

/// errors that can occur while assembling a factorization
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum SparseLdlError {
	/// the needed index arrays do not fit in the chosen index type
	IndexOverflow,
	/// an allocation failed
	OutOfMemory,
}

impl core::fmt::Display for SparseLdlError {
	#[inline]
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		core::fmt::Debug::fmt(self, f)
	}
}
impl core::error::Error for SparseLdlError {}

/// the amount of parallelism made available to a driver
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Par {
	/// sequential execution on the calling thread
	Seq,
	/// execution on a rayon thread pool with the given number of workers
	Rayon(core::num::NonZeroUsize),
}

impl Par {
	/// parallelism over `nthreads` rayon workers, with `0` meaning the
	/// current global pool size
	#[inline]
	pub fn rayon(nthreads: usize) -> Self {
		if nthreads == 0 {
			Self::Rayon(core::num::NonZeroUsize::new(rayon::current_num_threads().max(1)).unwrap())
		} else {
			Self::Rayon(core::num::NonZeroUsize::new(nthreads).unwrap())
		}
	}

	/// number of worker threads this amount of parallelism corresponds to
	#[inline]
	pub fn degree(&self) -> usize {
		match self {
			Par::Seq => 1,
			Par::Rayon(n) => n.get(),
		}
	}
}

mod seal {
	pub trait Seal {}
	impl Seal for i32 {}
	impl Seal for i64 {}
}

/// signed index type usable for sparse structure arrays.
///
/// forest arrays use `NONE` (equal to `-1`) as the absent-parent marker,
/// which is why the index types are signed
pub trait Index:
	seal::Seal
	+ core::ops::Add<Output = Self>
	+ core::ops::Sub<Output = Self>
	+ core::ops::AddAssign
	+ core::ops::SubAssign
	+ Copy
	+ Pod
	+ Eq
	+ Ord
	+ Send
	+ Sync
	+ 'static
	+ core::fmt::Debug
{
	/// largest representable index
	const MAX: Self;
	/// absent-link marker, `-1`
	const NONE: Self;

	/// converts from `usize`, wrapping on overflow
	#[must_use]
	fn truncate(value: usize) -> Self;

	/// zero extension to `usize`; the value must be nonnegative
	#[must_use]
	fn zx(self) -> usize;

	/// sign extension to `usize`
	#[must_use]
	fn sx(self) -> usize;

	#[inline]
	fn incr(&mut self) {
		*self += Self::truncate(1);
	}
	#[inline]
	fn decr(&mut self) {
		*self -= Self::truncate(1);
	}

	/// sum of a slice of nonnegative values, or `None` on overflow
	#[must_use]
	fn sum_nonnegative(slice: &[Self]) -> Option<Self>;
}

#[cfg(any(target_pointer_width = "32", target_pointer_width = "64"))]
impl Index for i32 {
	const MAX: Self = Self::MAX;
	const NONE: Self = -1;

	#[inline(always)]
	fn truncate(value: usize) -> Self {
		const _: () = {
			core::assert!(i32::BITS <= usize::BITS);
		};
		value as isize as Self
	}

	#[inline(always)]
	fn zx(self) -> usize {
		self as u32 as usize
	}

	#[inline(always)]
	fn sx(self) -> usize {
		self as isize as usize
	}

	#[inline]
	fn sum_nonnegative(slice: &[Self]) -> Option<Self> {
		let mut total = 0i64;
		for &v in slice {
			total += v as i64;
		}
		(total <= Self::MAX as i64).then_some(total as Self)
	}
}

#[cfg(target_pointer_width = "64")]
impl Index for i64 {
	const MAX: Self = Self::MAX;
	const NONE: Self = -1;

	#[inline(always)]
	fn truncate(value: usize) -> Self {
		const _: () = {
			core::assert!(i64::BITS <= usize::BITS);
		};
		value as isize as Self
	}

	#[inline(always)]
	fn zx(self) -> usize {
		self as u64 as usize
	}

	#[inline(always)]
	fn sx(self) -> usize {
		self as isize as usize
	}

	#[inline]
	fn sum_nonnegative(slice: &[Self]) -> Option<Self> {
		let mut total = 0i64;
		for &v in slice {
			total = total.checked_add(v)?;
		}
		Some(total)
	}
}

#[inline]
#[track_caller]
pub(crate) fn try_zeroed<I: Pod>(n: usize) -> Result<Vec<I>, SparseLdlError> {
	let mut v = Vec::new();
	v.try_reserve_exact(n).map_err(nomem)?;
	unsafe {
		core::ptr::write_bytes::<I>(v.as_mut_ptr(), 0u8, n);
		v.set_len(n);
	}
	Ok(v)
}

#[inline]
#[track_caller]
pub(crate) fn try_collect<I: IntoIterator>(iter: I) -> Result<Vec<I::Item>, SparseLdlError>
where
	I::IntoIter: ExactSizeIterator,
{
	let iter = iter.into_iter();
	let mut v = Vec::new();
	v.try_reserve_exact(iter.len()).map_err(nomem)?;
	v.extend(iter);
	Ok(v)
}

#[inline]
pub(crate) fn nomem<T>(_: T) -> SparseLdlError {
	SparseLdlError::OutOfMemory
}
