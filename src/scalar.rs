//! scalar abstraction for the dense and sparse kernels.
//!
//! the factorization code is generic over [`ComplexField`], which covers both
//! real and complex scalars in single and double precision. real scalars are
//! additionally [`RealField`], which is what diagonal entries and
//! regularization thresholds are expressed in.

use bytemuck::Pod;
use num_complex::Complex;

/// field of real scalars, totally ordered
pub trait RealField: ComplexField<Real = Self> + PartialOrd {
	/// machine epsilon
	fn epsilon() -> Self;
	/// smallest positive normal value
	fn min_positive() -> Self;

	/// natural logarithm
	fn ln(self) -> Self;
	/// raises `self` to a real power
	fn powf(self, exponent: Self) -> Self;
	/// conversion to `f64`, possibly losing precision
	fn to_f64(self) -> f64;
}

/// field of real or complex scalars
pub trait ComplexField:
	Copy
	+ Pod
	+ PartialEq
	+ Send
	+ Sync
	+ core::fmt::Debug
	+ 'static
	+ core::ops::Add<Output = Self>
	+ core::ops::Sub<Output = Self>
	+ core::ops::Mul<Output = Self>
	+ core::ops::Neg<Output = Self>
	+ core::ops::AddAssign
	+ core::ops::SubAssign
	+ core::ops::MulAssign
{
	/// real counterpart of this scalar type
	type Real: RealField;

	/// whether the type has a nonzero imaginary component
	const IS_COMPLEX: bool;

	fn zero() -> Self;
	fn one() -> Self;
	fn nan() -> Self;

	fn from_f64(value: f64) -> Self;
	fn from_real(re: Self::Real) -> Self;

	fn real(self) -> Self::Real;
	fn imag(self) -> Self::Real;
	fn conj(self) -> Self;

	fn abs(self) -> Self::Real;
	fn abs2(self) -> Self::Real;

	fn sqrt(self) -> Self;
	fn recip(self) -> Self;

	/// multiplication by a real scalar
	fn scale_real(self, rhs: Self::Real) -> Self;

	fn is_finite(self) -> bool;
}

macro_rules! impl_real {
	($ty: ty) => {
		impl ComplexField for $ty {
			type Real = $ty;

			const IS_COMPLEX: bool = false;

			#[inline(always)]
			fn zero() -> Self {
				0.0
			}
			#[inline(always)]
			fn one() -> Self {
				1.0
			}
			#[inline(always)]
			fn nan() -> Self {
				<$ty>::NAN
			}

			#[inline(always)]
			fn from_f64(value: f64) -> Self {
				value as $ty
			}
			#[inline(always)]
			fn from_real(re: Self::Real) -> Self {
				re
			}

			#[inline(always)]
			fn real(self) -> Self::Real {
				self
			}
			#[inline(always)]
			fn imag(self) -> Self::Real {
				0.0
			}
			#[inline(always)]
			fn conj(self) -> Self {
				self
			}

			#[inline(always)]
			fn abs(self) -> Self::Real {
				<$ty>::abs(self)
			}
			#[inline(always)]
			fn abs2(self) -> Self::Real {
				self * self
			}

			#[inline(always)]
			fn sqrt(self) -> Self {
				<$ty>::sqrt(self)
			}
			#[inline(always)]
			fn recip(self) -> Self {
				<$ty>::recip(self)
			}

			#[inline(always)]
			fn scale_real(self, rhs: Self::Real) -> Self {
				self * rhs
			}

			#[inline(always)]
			fn is_finite(self) -> bool {
				<$ty>::is_finite(self)
			}
		}

		impl RealField for $ty {
			#[inline(always)]
			fn epsilon() -> Self {
				<$ty>::EPSILON
			}
			#[inline(always)]
			fn min_positive() -> Self {
				<$ty>::MIN_POSITIVE
			}

			#[inline(always)]
			fn ln(self) -> Self {
				<$ty>::ln(self)
			}
			#[inline(always)]
			fn powf(self, exponent: Self) -> Self {
				<$ty>::powf(self, exponent)
			}
			#[inline(always)]
			fn to_f64(self) -> f64 {
				self as f64
			}
		}
	};
}

macro_rules! impl_complex {
	($ty: ty) => {
		impl ComplexField for Complex<$ty> {
			type Real = $ty;

			const IS_COMPLEX: bool = true;

			#[inline(always)]
			fn zero() -> Self {
				Complex::new(0.0, 0.0)
			}
			#[inline(always)]
			fn one() -> Self {
				Complex::new(1.0, 0.0)
			}
			#[inline(always)]
			fn nan() -> Self {
				Complex::new(<$ty>::NAN, <$ty>::NAN)
			}

			#[inline(always)]
			fn from_f64(value: f64) -> Self {
				Complex::new(value as $ty, 0.0)
			}
			#[inline(always)]
			fn from_real(re: Self::Real) -> Self {
				Complex::new(re, 0.0)
			}

			#[inline(always)]
			fn real(self) -> Self::Real {
				self.re
			}
			#[inline(always)]
			fn imag(self) -> Self::Real {
				self.im
			}
			#[inline(always)]
			fn conj(self) -> Self {
				Complex::new(self.re, -self.im)
			}

			#[inline(always)]
			fn abs(self) -> Self::Real {
				self.norm_sqr().sqrt()
			}
			#[inline(always)]
			fn abs2(self) -> Self::Real {
				self.norm_sqr()
			}

			#[inline(always)]
			fn sqrt(self) -> Self {
				Complex::sqrt(self)
			}
			#[inline(always)]
			fn recip(self) -> Self {
				let denom = self.norm_sqr().recip();
				Complex::new(self.re * denom, -self.im * denom)
			}

			#[inline(always)]
			fn scale_real(self, rhs: Self::Real) -> Self {
				Complex::new(self.re * rhs, self.im * rhs)
			}

			#[inline(always)]
			fn is_finite(self) -> bool {
				self.re.is_finite() && self.im.is_finite()
			}
		}
	};
}

impl_real!(f32);
impl_real!(f64);
impl_complex!(f32);
impl_complex!(f64);

/// single precision complex scalar
#[allow(non_camel_case_types)]
pub type c32 = Complex<f32>;
/// double precision complex scalar
#[allow(non_camel_case_types)]
pub type c64 = Complex<f64>;
