//! Types of IR values.
//!
//! The type system is deliberately small: the integers a 64-bit machine
//! register file can hold (plus `i1` for condition bits and `i128`/`i256`
//! for full vector registers), the two IEEE scalar floats, an opaque byte
//! pointer, and packed vectors over the scalar lane types.

use core::fmt;

/// The scalar type of one lane of a vector type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum LaneType {
    /// 8-bit integer lane.
    I8,
    /// 16-bit integer lane.
    I16,
    /// 32-bit integer lane.
    I32,
    /// 64-bit integer lane.
    I64,
    /// 32-bit float lane.
    F32,
    /// 64-bit float lane.
    F64,
}

impl LaneType {
    /// The width of one lane in bits.
    pub fn bits(self) -> u32 {
        match self {
            LaneType::I8 => 8,
            LaneType::I16 => 16,
            LaneType::I32 => 32,
            LaneType::I64 => 64,
            LaneType::F32 => 32,
            LaneType::F64 => 64,
        }
    }

    /// True for the floating-point lane types.
    pub fn is_float(self) -> bool {
        matches!(self, LaneType::F32 | LaneType::F64)
    }

    /// The scalar `Type` with this lane's representation.
    pub fn scalar(self) -> Type {
        match self {
            LaneType::I8 => Type::I8,
            LaneType::I16 => Type::I16,
            LaneType::I32 => Type::I32,
            LaneType::I64 => Type::I64,
            LaneType::F32 => Type::F32,
            LaneType::F64 => Type::F64,
        }
    }
}

impl fmt::Display for LaneType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LaneType::I8 => write!(f, "i8"),
            LaneType::I16 => write!(f, "i16"),
            LaneType::I32 => write!(f, "i32"),
            LaneType::I64 => write!(f, "i64"),
            LaneType::F32 => write!(f, "f32"),
            LaneType::F64 => write!(f, "f64"),
        }
    }
}

/// The type of an IR value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Type {
    /// No value; the "result type" of instructions without results.
    Void,
    /// A single condition bit.
    I1,
    /// 8-bit integer.
    I8,
    /// 16-bit integer.
    I16,
    /// 32-bit integer.
    I32,
    /// 64-bit integer.
    I64,
    /// 128-bit integer; canonical backing of a 128-bit vector register.
    I128,
    /// 256-bit integer; canonical backing of a 256-bit vector register.
    I256,
    /// IEEE-754 single-precision float.
    F32,
    /// IEEE-754 double-precision float.
    F64,
    /// Opaque byte pointer.
    Ptr,
    /// A packed vector of `u8` lanes of the given lane type.
    Vector(LaneType, u8),
}

impl Type {
    /// The integer type with the given width, if it exists.
    pub fn int(bits: u32) -> Option<Type> {
        match bits {
            1 => Some(Type::I1),
            8 => Some(Type::I8),
            16 => Some(Type::I16),
            32 => Some(Type::I32),
            64 => Some(Type::I64),
            128 => Some(Type::I128),
            256 => Some(Type::I256),
            _ => None,
        }
    }

    /// A vector type with the given lane type and lane count.
    pub fn vector(lane: LaneType, lanes: u8) -> Type {
        debug_assert!(lanes.is_power_of_two());
        Type::Vector(lane, lanes)
    }

    /// Total width of the type in bits. `Void` is 0 bits, `Ptr` 64.
    pub fn bits(self) -> u32 {
        match self {
            Type::Void => 0,
            Type::I1 => 1,
            Type::I8 => 8,
            Type::I16 => 16,
            Type::I32 => 32,
            Type::I64 => 64,
            Type::I128 => 128,
            Type::I256 => 256,
            Type::F32 => 32,
            Type::F64 => 64,
            Type::Ptr => 64,
            Type::Vector(lane, lanes) => lane.bits() * u32::from(lanes),
        }
    }

    /// Total width of the type in bytes, used for natural alignment.
    pub fn bytes(self) -> u32 {
        (self.bits() + 7) / 8
    }

    /// True for the scalar integer types, including `i1`.
    pub fn is_int(self) -> bool {
        matches!(
            self,
            Type::I1 | Type::I8 | Type::I16 | Type::I32 | Type::I64 | Type::I128 | Type::I256
        )
    }

    /// True for the scalar floating-point types.
    pub fn is_float(self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    /// True for vector types.
    pub fn is_vector(self) -> bool {
        matches!(self, Type::Vector(..))
    }

    /// The lane type of a vector, or the type itself viewed as a lane.
    pub fn lane_type(self) -> Option<LaneType> {
        match self {
            Type::Vector(lane, _) => Some(lane),
            Type::I8 => Some(LaneType::I8),
            Type::I16 => Some(LaneType::I16),
            Type::I32 => Some(LaneType::I32),
            Type::I64 => Some(LaneType::I64),
            Type::F32 => Some(LaneType::F32),
            Type::F64 => Some(LaneType::F64),
            _ => None,
        }
    }

    /// Number of lanes; 1 for scalars.
    pub fn lane_count(self) -> u8 {
        match self {
            Type::Vector(_, lanes) => lanes,
            _ => 1,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::I1 => write!(f, "i1"),
            Type::I8 => write!(f, "i8"),
            Type::I16 => write!(f, "i16"),
            Type::I32 => write!(f, "i32"),
            Type::I64 => write!(f, "i64"),
            Type::I128 => write!(f, "i128"),
            Type::I256 => write!(f, "i256"),
            Type::F32 => write!(f, "f32"),
            Type::F64 => write!(f, "f64"),
            Type::Ptr => write!(f, "ptr"),
            Type::Vector(lane, lanes) => write!(f, "{lane}x{lanes}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths() {
        assert_eq!(Type::I64.bits(), 64);
        assert_eq!(Type::Ptr.bits(), 64);
        assert_eq!(Type::vector(LaneType::F32, 4).bits(), 128);
        assert_eq!(Type::vector(LaneType::I8, 32).bits(), 256);
        assert_eq!(Type::I1.bytes(), 1);
    }

    #[test]
    fn int_lookup() {
        assert_eq!(Type::int(32), Some(Type::I32));
        assert_eq!(Type::int(256), Some(Type::I256));
        assert_eq!(Type::int(24), None);
    }

    #[test]
    fn display() {
        assert_eq!(Type::vector(LaneType::F32, 4).to_string(), "f32x4");
        assert_eq!(Type::Ptr.to_string(), "ptr");
    }
}
