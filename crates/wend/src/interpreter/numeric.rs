//! Arithmetic with WebAssembly semantics where Rust's operators differ:
//! trapping integer division, NaN-propagating min/max, and checked
//! float-to-int truncation.

use super::trap::Trap;

pub(crate) trait Float: Copy + PartialOrd {
    const NAN: Self;
    fn is_nan(self) -> bool;
    fn is_zero(self) -> bool;
    fn is_sign_negative(self) -> bool;
    fn float_min(self, other: Self) -> Self;
    fn float_max(self, other: Self) -> Self;
}

impl Float for f32 {
    const NAN: Self = f32::NAN;
    fn is_nan(self) -> bool { self.is_nan() }
    fn is_zero(self) -> bool { self == 0.0 }
    fn is_sign_negative(self) -> bool { self.is_sign_negative() }
    fn float_min(self, other: Self) -> Self { self.min(other) }
    fn float_max(self, other: Self) -> Self { self.max(other) }
}

impl Float for f64 {
    const NAN: Self = f64::NAN;
    fn is_nan(self) -> bool { self.is_nan() }
    fn is_zero(self) -> bool { self == 0.0 }
    fn is_sign_negative(self) -> bool { self.is_sign_negative() }
    fn float_min(self, other: Self) -> Self { self.min(other) }
    fn float_max(self, other: Self) -> Self { self.max(other) }
}

/// `fN.min`: NaN if either operand is NaN, and `-0 < +0`.
pub(crate) fn wasm_min<F: Float>(a: F, b: F) -> F {
    if a.is_nan() || b.is_nan() {
        return F::NAN;
    }
    if a.is_zero() && b.is_zero() {
        return if a.is_sign_negative() { a } else { b };
    }
    a.float_min(b)
}

/// `fN.max`: NaN if either operand is NaN, and `+0 > -0`.
pub(crate) fn wasm_max<F: Float>(a: F, b: F) -> F {
    if a.is_nan() || b.is_nan() {
        return F::NAN;
    }
    if a.is_zero() && b.is_zero() {
        return if a.is_sign_negative() { b } else { a };
    }
    a.float_max(b)
}

macro_rules! int_div {
    ($div_s:ident, $rem_s:ident, $div_u:ident, $rem_u:ident, $ty:ty, $uty:ty) => {
        pub(crate) fn $div_s(a: $ty, b: $ty) -> Result<$ty, Trap> {
            if b == 0 {
                return Err(Trap::IntegerDivideByZero);
            }
            if a == <$ty>::MIN && b == -1 {
                return Err(Trap::IntegerOverflow);
            }
            Ok(a / b)
        }

        pub(crate) fn $rem_s(a: $ty, b: $ty) -> Result<$ty, Trap> {
            if b == 0 {
                return Err(Trap::IntegerDivideByZero);
            }
            Ok(a.wrapping_rem(b))
        }

        pub(crate) fn $div_u(a: $ty, b: $ty) -> Result<$ty, Trap> {
            if b == 0 {
                return Err(Trap::IntegerDivideByZero);
            }
            Ok(((a as $uty) / (b as $uty)) as $ty)
        }

        pub(crate) fn $rem_u(a: $ty, b: $ty) -> Result<$ty, Trap> {
            if b == 0 {
                return Err(Trap::IntegerDivideByZero);
            }
            Ok(((a as $uty) % (b as $uty)) as $ty)
        }
    };
}

int_div!(i32_div_s, i32_rem_s, i32_div_u, i32_rem_u, i32, u32);
int_div!(i64_div_s, i64_rem_s, i64_div_u, i64_rem_u, i64, u64);

// Bounds are the first truncated values outside the target range; all are
// exactly representable in both float widths.
macro_rules! trunc {
    ($name:ident, $float:ty, $int:ty, $min:expr, $max:expr) => {
        pub(crate) fn $name(x: $float) -> Result<$int, Trap> {
            if x.is_nan() {
                return Err(Trap::InvalidConversionToInteger);
            }
            let t = x.trunc();
            if t < $min || t >= $max {
                return Err(Trap::IntegerOverflow);
            }
            Ok(t as $int)
        }
    };
}

trunc!(i32_trunc_f32_s, f32, i32, -2147483648.0, 2147483648.0);
trunc!(i32_trunc_f32_u, f32, u32, 0.0, 4294967296.0);
trunc!(i32_trunc_f64_s, f64, i32, -2147483648.0, 2147483648.0);
trunc!(i32_trunc_f64_u, f64, u32, 0.0, 4294967296.0);
trunc!(i64_trunc_f32_s, f32, i64, -9223372036854775808.0, 9223372036854775808.0);
trunc!(i64_trunc_f32_u, f32, u64, 0.0, 18446744073709551616.0);
trunc!(i64_trunc_f64_s, f64, i64, -9223372036854775808.0, 9223372036854775808.0);
trunc!(i64_trunc_f64_u, f64, u64, 0.0, 18446744073709551616.0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_max_zero_signs() {
        assert!(wasm_min(0.0f32, -0.0).is_sign_negative());
        assert!(wasm_min(-0.0f64, 0.0).is_sign_negative());
        assert!(wasm_max(-0.0f32, 0.0).is_sign_positive());
        assert!(wasm_max(0.0f64, -0.0).is_sign_positive());
        assert!(wasm_min(f32::NAN, 1.0).is_nan());
        assert!(wasm_max(1.0f64, f64::NAN).is_nan());
        assert_eq!(wasm_min(1.0f32, 2.0), 1.0);
        assert_eq!(wasm_max(1.0f64, 2.0), 2.0);
    }

    #[test]
    fn division_traps() {
        assert_eq!(i32_div_s(7, 0), Err(Trap::IntegerDivideByZero));
        assert_eq!(i64_rem_u(7, 0), Err(Trap::IntegerDivideByZero));
        assert_eq!(i32_div_s(i32::MIN, -1), Err(Trap::IntegerOverflow));
        assert_eq!(i64_rem_s(i64::MIN, -1), Ok(0));
        assert_eq!(i32_div_u(-1, 2), Ok(i32::MAX));
        assert_eq!(i32_rem_s(-7, 2), Ok(-1));
    }

    #[test]
    fn truncation_bounds() {
        assert_eq!(i32_trunc_f32_s(-2147483648.0), Ok(i32::MIN));
        assert_eq!(i32_trunc_f32_s(2147483648.0), Err(Trap::IntegerOverflow));
        assert_eq!(i32_trunc_f64_s(-2147483648.9), Ok(i32::MIN));
        assert_eq!(i32_trunc_f64_u(-0.9), Ok(0));
        assert_eq!(i32_trunc_f64_u(-1.0), Err(Trap::IntegerOverflow));
        assert_eq!(i64_trunc_f64_u(f64::INFINITY), Err(Trap::IntegerOverflow));
        assert_eq!(
            i64_trunc_f32_s(f32::NAN),
            Err(Trap::InvalidConversionToInteger)
        );
        assert_eq!(i32_trunc_f32_u(4294967040.0), Ok(4294967040));
    }
}
