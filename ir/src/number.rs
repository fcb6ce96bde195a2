use std::cmp::Ordering;
use std::fmt;

use half::f16;

/// Scalar kind discriminator for [Number].
///
/// The discriminant order doubles as the promotion rank: when two numbers
/// of different kinds meet in a binary operation, the lower-ranked operand
/// is converted to the higher-ranked kind first.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum NumberType {
    Unknown = 0,
    I8 = 1,
    U8 = 2,
    I16 = 3,
    U16 = 4,
    I32 = 5,
    U32 = 6,
    I64 = 7,
    U64 = 8,
    F16 = 9,
    F32 = 10,
    F64 = 11,
}

impl NumberType {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Unknown),
            1 => Some(Self::I8),
            2 => Some(Self::U8),
            3 => Some(Self::I16),
            4 => Some(Self::U16),
            5 => Some(Self::I32),
            6 => Some(Self::U32),
            7 => Some(Self::I64),
            8 => Some(Self::U64),
            9 => Some(Self::F16),
            10 => Some(Self::F32),
            11 => Some(Self::F64),
            _ => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::I8
                | Self::U8
                | Self::I16
                | Self::U16
                | Self::I32
                | Self::U32
                | Self::I64
                | Self::U64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::F16 | Self::F32 | Self::F64)
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::I64) || self.is_float()
    }

    fn suffix(&self) -> &'static str {
        match self {
            Self::Unknown => "",
            Self::I8 => "i8",
            Self::U8 => "u8",
            Self::I16 => "i16",
            Self::U16 => "u16",
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::I64 => "i64",
            Self::U64 => "u64",
            Self::F16 => "f16",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }
}

/// The tagged scalar of the IR: a kind discriminator plus 64 bits of raw
/// storage. Constants in instruction operands, interpreter registers and
/// serialized immediates are all [Number]s.
///
/// The value's bit pattern is stored zero-extended in `bits`; accessors
/// reinterpret the low bytes according to `kind`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Number {
    kind: NumberType,
    bits: u64,
}

macro_rules! number_ctor {
    ($name:ident, $ty:ty, $kind:ident, $value:ident => $to_bits:expr) => {
        pub fn $name($value: $ty) -> Self {
            Self {
                kind: NumberType::$kind,
                bits: $to_bits,
            }
        }
    };
}

impl Number {
    pub const UNKNOWN: Number = Number {
        kind: NumberType::Unknown,
        bits: 0,
    };

    number_ctor!(from_i8, i8, I8, v => v as u8 as u64);
    number_ctor!(from_u8, u8, U8, v => v as u64);
    number_ctor!(from_i16, i16, I16, v => v as u16 as u64);
    number_ctor!(from_u16, u16, U16, v => v as u64);
    number_ctor!(from_i32, i32, I32, v => v as u32 as u64);
    number_ctor!(from_u32, u32, U32, v => v as u64);
    number_ctor!(from_i64, i64, I64, v => v as u64);
    number_ctor!(from_u64, u64, U64, v => v);
    number_ctor!(from_f16, f16, F16, v => v.to_bits() as u64);
    number_ctor!(from_f32, f32, F32, v => v.to_bits() as u64);
    number_ctor!(from_f64, f64, F64, v => v.to_bits());

    pub fn from_bool(value: bool) -> Self {
        Self::from_u8(value as u8)
    }

    /// Reconstructs a number from its serialized `{kind, bits}` pair.
    pub fn from_raw(kind: NumberType, bits: u64) -> Self {
        Self { kind, bits }
    }

    #[inline(always)]
    pub fn kind(&self) -> NumberType {
        self.kind
    }

    #[inline(always)]
    pub fn raw_bits(&self) -> u64 {
        self.bits
    }

    pub fn as_i8(&self) -> i8 {
        self.bits as u8 as i8
    }

    pub fn as_u8(&self) -> u8 {
        self.bits as u8
    }

    pub fn as_i16(&self) -> i16 {
        self.bits as u16 as i16
    }

    pub fn as_u16(&self) -> u16 {
        self.bits as u16
    }

    pub fn as_i32(&self) -> i32 {
        self.bits as u32 as i32
    }

    pub fn as_u32(&self) -> u32 {
        self.bits as u32
    }

    pub fn as_i64(&self) -> i64 {
        self.bits as i64
    }

    pub fn as_u64(&self) -> u64 {
        self.bits
    }

    pub fn as_f16(&self) -> f16 {
        f16::from_bits(self.bits as u16)
    }

    pub fn as_f32(&self) -> f32 {
        f32::from_bits(self.bits as u32)
    }

    pub fn as_f64(&self) -> f64 {
        f64::from_bits(self.bits)
    }

    pub fn is_unknown(&self) -> bool {
        self.kind == NumberType::Unknown
    }

    pub fn is_zero(&self) -> bool {
        match self.kind {
            NumberType::Unknown => false,
            NumberType::F16 => self.as_f16() == f16::ZERO,
            NumberType::F32 => self.as_f32() == 0.0,
            NumberType::F64 => self.as_f64() == 0.0,
            _ => self.widen_int() == 0,
        }
    }

    pub fn to_bool(&self) -> bool {
        !self.is_zero() && !self.is_unknown()
    }

    /// Signed-or-zero-extended integral view. Meaningless for float kinds.
    fn widen_int(&self) -> i128 {
        match self.kind {
            NumberType::I8 => self.as_i8() as i128,
            NumberType::U8 => self.as_u8() as i128,
            NumberType::I16 => self.as_i16() as i128,
            NumberType::U16 => self.as_u16() as i128,
            NumberType::I32 => self.as_i32() as i128,
            NumberType::U32 => self.as_u32() as i128,
            NumberType::I64 => self.as_i64() as i128,
            NumberType::U64 => self.as_u64() as i128,
            _ => 0,
        }
    }

    fn widen_float(&self) -> f64 {
        match self.kind {
            NumberType::F16 => self.as_f16().to_f64(),
            NumberType::F32 => self.as_f32() as f64,
            NumberType::F64 => self.as_f64(),
            _ => self.widen_int() as f64,
        }
    }

    /// C-style value conversion between kinds: integral narrowing wraps,
    /// float to int truncates toward zero.
    pub fn cast(&self, target: NumberType) -> Number {
        if self.kind == target {
            return *self;
        }
        if self.is_unknown() || target == NumberType::Unknown {
            return Number::UNKNOWN;
        }
        if target.is_float() {
            let value = self.widen_float();
            return match target {
                NumberType::F16 => Number::from_f16(f16::from_f64(value)),
                NumberType::F32 => Number::from_f32(value as f32),
                _ => Number::from_f64(value),
            };
        }
        let value = if self.kind.is_float() {
            self.widen_float() as i128
        } else {
            self.widen_int()
        };
        match target {
            NumberType::I8 => Number::from_i8(value as i8),
            NumberType::U8 => Number::from_u8(value as u8),
            NumberType::I16 => Number::from_i16(value as i16),
            NumberType::U16 => Number::from_u16(value as u16),
            NumberType::I32 => Number::from_i32(value as i32),
            NumberType::U32 => Number::from_u32(value as u32),
            NumberType::I64 => Number::from_i64(value as i64),
            _ => Number::from_u64(value as u64),
        }
    }

    /// Like [cast](Self::cast), but reports `None` when an integral target
    /// cannot represent the source value exactly (range overflow, or a NaN
    /// source). Float targets saturate the usual way and never overflow.
    pub fn checked_cast(&self, target: NumberType) -> Option<Number> {
        if target.is_integer() {
            let value = if self.kind.is_float() {
                let f = self.widen_float();
                if f.is_nan() {
                    return None;
                }
                f.trunc() as i128
            } else {
                self.widen_int()
            };
            let (lo, hi): (i128, i128) = match target {
                NumberType::I8 => (i8::MIN as i128, i8::MAX as i128),
                NumberType::U8 => (0, u8::MAX as i128),
                NumberType::I16 => (i16::MIN as i128, i16::MAX as i128),
                NumberType::U16 => (0, u16::MAX as i128),
                NumberType::I32 => (i32::MIN as i128, i32::MAX as i128),
                NumberType::U32 => (0, u32::MAX as i128),
                NumberType::I64 => (i64::MIN as i128, i64::MAX as i128),
                _ => (0, u64::MAX as i128),
            };
            if value < lo || value > hi {
                return None;
            }
        }
        Some(self.cast(target))
    }

    fn promoted(self, other: Number) -> Option<(NumberType, Number, Number)> {
        if self.is_unknown() || other.is_unknown() {
            return None;
        }
        let kind = self.kind.max(other.kind);
        Some((kind, self.cast(kind), other.cast(kind)))
    }

    /// Value comparison with implicit promotion. `None` if either side is
    /// unknown.
    pub fn compare(&self, other: &Number) -> Option<Ordering> {
        let (kind, a, b) = self.promoted(*other)?;
        match kind {
            NumberType::Unknown => None,
            NumberType::F16 => a.as_f16().partial_cmp(&b.as_f16()),
            NumberType::F32 => a.as_f32().partial_cmp(&b.as_f32()),
            NumberType::F64 => a.as_f64().partial_cmp(&b.as_f64()),
            _ => Some(a.widen_int().cmp(&b.widen_int())),
        }
    }

    pub fn eq_value(&self, other: &Number) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }
}

macro_rules! number_arith {
    ($name:ident, $int_op:ident, $float_op:tt) => {
        pub fn $name(self, rhs: Number) -> Number {
            let (kind, a, b) = match self.promoted(rhs) {
                Some(p) => p,
                None => return Number::UNKNOWN,
            };
            match kind {
                NumberType::Unknown => Number::UNKNOWN,
                NumberType::I8 => Number::from_i8(a.as_i8().$int_op(b.as_i8())),
                NumberType::U8 => Number::from_u8(a.as_u8().$int_op(b.as_u8())),
                NumberType::I16 => Number::from_i16(a.as_i16().$int_op(b.as_i16())),
                NumberType::U16 => Number::from_u16(a.as_u16().$int_op(b.as_u16())),
                NumberType::I32 => Number::from_i32(a.as_i32().$int_op(b.as_i32())),
                NumberType::U32 => Number::from_u32(a.as_u32().$int_op(b.as_u32())),
                NumberType::I64 => Number::from_i64(a.as_i64().$int_op(b.as_i64())),
                NumberType::U64 => Number::from_u64(a.as_u64().$int_op(b.as_u64())),
                NumberType::F16 => Number::from_f16(f16::from_f32(
                    a.as_f16().to_f32() $float_op b.as_f16().to_f32(),
                )),
                NumberType::F32 => Number::from_f32(a.as_f32() $float_op b.as_f32()),
                NumberType::F64 => Number::from_f64(a.as_f64() $float_op b.as_f64()),
            }
        }
    };
}

macro_rules! number_bitwise {
    ($name:ident, $op:tt) => {
        pub fn $name(self, rhs: Number) -> Number {
            let (kind, a, b) = match self.promoted(rhs) {
                Some(p) => p,
                None => return Number::UNKNOWN,
            };
            if !kind.is_integer() {
                return Number::UNKNOWN;
            }
            match kind {
                NumberType::I8 => Number::from_i8(a.as_i8() $op b.as_i8()),
                NumberType::U8 => Number::from_u8(a.as_u8() $op b.as_u8()),
                NumberType::I16 => Number::from_i16(a.as_i16() $op b.as_i16()),
                NumberType::U16 => Number::from_u16(a.as_u16() $op b.as_u16()),
                NumberType::I32 => Number::from_i32(a.as_i32() $op b.as_i32()),
                NumberType::U32 => Number::from_u32(a.as_u32() $op b.as_u32()),
                NumberType::I64 => Number::from_i64(a.as_i64() $op b.as_i64()),
                _ => Number::from_u64(a.as_u64() $op b.as_u64()),
            }
        }
    };
}

macro_rules! number_shift {
    ($name:ident, $op:ident) => {
        /// Shifts are only defined on integral kinds; anything else yields
        /// an unknown number.
        pub fn $name(self, rhs: Number) -> Number {
            if !self.kind.is_integer() || !rhs.kind.is_integer() {
                return Number::UNKNOWN;
            }
            let amount = rhs.widen_int() as u32;
            match self.kind {
                NumberType::I8 => Number::from_i8(self.as_i8().$op(amount)),
                NumberType::U8 => Number::from_u8(self.as_u8().$op(amount)),
                NumberType::I16 => Number::from_i16(self.as_i16().$op(amount)),
                NumberType::U16 => Number::from_u16(self.as_u16().$op(amount)),
                NumberType::I32 => Number::from_i32(self.as_i32().$op(amount)),
                NumberType::U32 => Number::from_u32(self.as_u32().$op(amount)),
                NumberType::I64 => Number::from_i64(self.as_i64().$op(amount)),
                _ => Number::from_u64(self.as_u64().$op(amount)),
            }
        }
    };
}

impl Number {
    number_arith!(add_num, wrapping_add, +);
    number_arith!(sub_num, wrapping_sub, -);
    number_arith!(mul_num, wrapping_mul, *);

    pub fn div_num(self, rhs: Number) -> Number {
        let (kind, a, b) = match self.promoted(rhs) {
            Some(p) => p,
            None => return Number::UNKNOWN,
        };
        if kind.is_integer() && b.is_zero() {
            return Number::UNKNOWN;
        }
        match kind {
            NumberType::Unknown => Number::UNKNOWN,
            NumberType::I8 => Number::from_i8(a.as_i8().wrapping_div(b.as_i8())),
            NumberType::U8 => Number::from_u8(a.as_u8().wrapping_div(b.as_u8())),
            NumberType::I16 => Number::from_i16(a.as_i16().wrapping_div(b.as_i16())),
            NumberType::U16 => Number::from_u16(a.as_u16().wrapping_div(b.as_u16())),
            NumberType::I32 => Number::from_i32(a.as_i32().wrapping_div(b.as_i32())),
            NumberType::U32 => Number::from_u32(a.as_u32().wrapping_div(b.as_u32())),
            NumberType::I64 => Number::from_i64(a.as_i64().wrapping_div(b.as_i64())),
            NumberType::U64 => Number::from_u64(a.as_u64().wrapping_div(b.as_u64())),
            NumberType::F16 => {
                Number::from_f16(f16::from_f32(a.as_f16().to_f32() / b.as_f16().to_f32()))
            }
            NumberType::F32 => Number::from_f32(a.as_f32() / b.as_f32()),
            NumberType::F64 => Number::from_f64(a.as_f64() / b.as_f64()),
        }
    }

    pub fn rem_num(self, rhs: Number) -> Number {
        let (kind, a, b) = match self.promoted(rhs) {
            Some(p) => p,
            None => return Number::UNKNOWN,
        };
        if kind.is_integer() && b.is_zero() {
            return Number::UNKNOWN;
        }
        match kind {
            NumberType::Unknown => Number::UNKNOWN,
            NumberType::I8 => Number::from_i8(a.as_i8().wrapping_rem(b.as_i8())),
            NumberType::U8 => Number::from_u8(a.as_u8().wrapping_rem(b.as_u8())),
            NumberType::I16 => Number::from_i16(a.as_i16().wrapping_rem(b.as_i16())),
            NumberType::U16 => Number::from_u16(a.as_u16().wrapping_rem(b.as_u16())),
            NumberType::I32 => Number::from_i32(a.as_i32().wrapping_rem(b.as_i32())),
            NumberType::U32 => Number::from_u32(a.as_u32().wrapping_rem(b.as_u32())),
            NumberType::I64 => Number::from_i64(a.as_i64().wrapping_rem(b.as_i64())),
            NumberType::U64 => Number::from_u64(a.as_u64().wrapping_rem(b.as_u64())),
            NumberType::F16 => {
                Number::from_f16(f16::from_f32(a.as_f16().to_f32() % b.as_f16().to_f32()))
            }
            NumberType::F32 => Number::from_f32(a.as_f32() % b.as_f32()),
            NumberType::F64 => Number::from_f64(a.as_f64() % b.as_f64()),
        }
    }

    number_bitwise!(bitand_num, &);
    number_bitwise!(bitor_num, |);
    number_bitwise!(bitxor_num, ^);
    number_shift!(shl_num, wrapping_shl);
    number_shift!(shr_num, wrapping_shr);

    /// Arithmetic negation. Unsigned kinds have no negative counterpart and
    /// yield an unknown number.
    pub fn neg_num(self) -> Number {
        match self.kind {
            NumberType::I8 => Number::from_i8(self.as_i8().wrapping_neg()),
            NumberType::I16 => Number::from_i16(self.as_i16().wrapping_neg()),
            NumberType::I32 => Number::from_i32(self.as_i32().wrapping_neg()),
            NumberType::I64 => Number::from_i64(self.as_i64().wrapping_neg()),
            NumberType::F16 => Number::from_f16(-self.as_f16()),
            NumberType::F32 => Number::from_f32(-self.as_f32()),
            NumberType::F64 => Number::from_f64(-self.as_f64()),
            _ => Number::UNKNOWN,
        }
    }

    pub fn not_num(self) -> Number {
        match self.kind {
            NumberType::I8 => Number::from_i8(!self.as_i8()),
            NumberType::U8 => Number::from_u8(!self.as_u8()),
            NumberType::I16 => Number::from_i16(!self.as_i16()),
            NumberType::U16 => Number::from_u16(!self.as_u16()),
            NumberType::I32 => Number::from_i32(!self.as_i32()),
            NumberType::U32 => Number::from_u32(!self.as_u32()),
            NumberType::I64 => Number::from_i64(!self.as_i64()),
            NumberType::U64 => Number::from_u64(!self.as_u64()),
            _ => Number::UNKNOWN,
        }
    }
}

impl Default for Number {
    fn default() -> Self {
        Number::UNKNOWN
    }
}

macro_rules! number_op_trait {
    ($trait:ident, $trait_method:ident, $method:ident) => {
        impl std::ops::$trait for Number {
            type Output = Number;
            fn $trait_method(self, rhs: Number) -> Number {
                self.$method(rhs)
            }
        }
    };
}

number_op_trait!(Add, add, add_num);
number_op_trait!(Sub, sub, sub_num);
number_op_trait!(Mul, mul, mul_num);
number_op_trait!(Div, div, div_num);
number_op_trait!(Rem, rem, rem_num);
number_op_trait!(BitAnd, bitand, bitand_num);
number_op_trait!(BitOr, bitor, bitor_num);
number_op_trait!(BitXor, bitxor, bitxor_num);
number_op_trait!(Shl, shl, shl_num);
number_op_trait!(Shr, shr, shr_num);

impl std::ops::Neg for Number {
    type Output = Number;
    fn neg(self) -> Number {
        self.neg_num()
    }
}

impl std::ops::Not for Number {
    type Output = Number;
    fn not(self) -> Number {
        self.not_num()
    }
}

impl From<bool> for Number {
    fn from(value: bool) -> Self {
        Number::from_bool(value)
    }
}

impl From<i32> for Number {
    fn from(value: i32) -> Self {
        Number::from_i32(value)
    }
}

impl From<u32> for Number {
    fn from(value: u32) -> Self {
        Number::from_u32(value)
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Number::from_i64(value)
    }
}

impl From<u64> for Number {
    fn from(value: u64) -> Self {
        Number::from_u64(value)
    }
}

impl From<f32> for Number {
    fn from(value: f32) -> Self {
        Number::from_f32(value)
    }
}

impl From<f64> for Number {
    fn from(value: f64) -> Self {
        Number::from_f64(value)
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            NumberType::Unknown => f.write_str("undef"),
            NumberType::F16 => write!(f, "{}{}", self.as_f16(), self.kind.suffix()),
            NumberType::F32 => write!(f, "{}{}", self.as_f32(), self.kind.suffix()),
            NumberType::F64 => write!(f, "{}{}", self.as_f64(), self.kind.suffix()),
            _ => write!(f, "{}{}", self.widen_int(), self.kind.suffix()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_picks_the_wider_kind() {
        let a = Number::from_i32(40);
        let b = Number::from_i64(2);
        let sum = a + b;
        assert_eq!(sum.kind(), NumberType::I64);
        assert_eq!(sum.as_i64(), 42);
    }

    #[test]
    fn integer_arithmetic_wraps() {
        let a = Number::from_u8(250);
        let b = Number::from_u8(10);
        assert_eq!((a + b).as_u8(), 4);
    }

    #[test]
    fn float_shift_is_unknown() {
        let a = Number::from_f32(1.5);
        let b = Number::from_i32(2);
        assert!((a << b).is_unknown());
        assert!((b << a).is_unknown());
    }

    #[test]
    fn division_by_integer_zero_is_unknown() {
        let a = Number::from_i32(10);
        assert!((a / Number::from_i32(0)).is_unknown());
        assert!((a % Number::from_i32(0)).is_unknown());
    }

    #[test]
    fn cross_kind_comparison() {
        let a = Number::from_i32(7);
        let b = Number::from_f64(7.0);
        assert!(a.eq_value(&b));
        assert_eq!(
            Number::from_i32(-1).compare(&Number::from_i32(3)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn checked_cast_detects_overflow() {
        assert!(Number::from_i32(300).checked_cast(NumberType::U8).is_none());
        assert!(Number::from_f32(1e20).checked_cast(NumberType::I32).is_none());
        let ok = Number::from_i32(42).checked_cast(NumberType::U8).unwrap();
        assert_eq!(ok.as_u8(), 42);
    }

    #[test]
    fn unsigned_negation_is_unknown() {
        assert!((-Number::from_u32(1)).is_unknown());
        assert_eq!((-Number::from_i32(5)).as_i32(), -5);
    }
}
