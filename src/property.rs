//! Decoding a single typed property value out of a bitstream.
//!
//! The descriptor's flags pick the encoding: integers may be fixed width
//! or varint, floats come in half a dozen coordinate flavors, and arrays
//! defer to the element descriptor bound during flattening. Each decode
//! path has a skip twin that advances the stream by the same amount.

use crate::bitstream::Bitstream;
use crate::errors::PropertyError;
use crate::parsing_utils::decode_windows1252;
use crate::sendprop::{
    SPROP_CELL_COORD, SPROP_CELL_COORD_INTEGRAL, SPROP_CELL_COORD_LOWPRECISION, SPROP_COORD,
    SPROP_COORD_MP, SPROP_COORD_MP_INTEGRAL, SPROP_COORD_MP_LOWPRECISION,
    SPROP_ENCODED_AGAINST_TICKCOUNT, SPROP_NORMAL, SPROP_NOSCALE, SPROP_UNSIGNED, SendProp,
    SendPropType,
};
use serde::Serialize;

/// Maximum byte length of a string property.
pub const MAX_STRING_LENGTH: u32 = 0x200; // 512

/// Maximum element count of an array property.
pub const MAX_ARRAY_ELEMENTS: u32 = 100;

/// A decoded property value.
///
/// The variant is fully determined by the descriptor's type and its
/// UNSIGNED flag, so a given property keeps its variant across updates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PropValue {
    Int(i32),
    UInt(u32),
    Float(f32),
    Vector([f32; 3]),
    VectorXY([f32; 2]),
    String(String),
    Array(Vec<Property>),
    Int64(i64),
    UInt64(u64),
}

impl PropValue {
    fn variant_name(&self) -> &'static str {
        match self {
            PropValue::Int(_) => "int",
            PropValue::UInt(_) => "uint",
            PropValue::Float(_) => "float",
            PropValue::Vector(_) => "vector",
            PropValue::VectorXY(_) => "vector_xy",
            PropValue::String(_) => "string",
            PropValue::Array(_) => "array",
            PropValue::Int64(_) => "int64",
            PropValue::UInt64(_) => "uint64",
        }
    }
}

/// A live property: one decoded value slot of an entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Property {
    value: PropValue,
}

macro_rules! accessor {
    ($fn_name:ident, $variant:ident, $ty:ty, $requested:literal) => {
        pub fn $fn_name(&self) -> Result<$ty, PropertyError> {
            match &self.value {
                PropValue::$variant(v) => Ok(*v),
                other => Err(PropertyError::BadCast {
                    requested: $requested,
                    actual: other.variant_name(),
                }),
            }
        }
    };
}

impl Property {
    /// Decodes a fresh value for `prop` from the stream.
    pub fn decode(stream: &mut Bitstream, prop: &SendProp) -> Result<Property, PropertyError> {
        Ok(Property {
            value: decode_value(stream, prop)?,
        })
    }

    /// Re-decodes this property in place.
    pub fn update(&mut self, stream: &mut Bitstream, prop: &SendProp) -> Result<(), PropertyError> {
        self.value = decode_value(stream, prop)?;
        Ok(())
    }

    /// Advances the stream past one value of `prop` without decoding it.
    pub fn skip(stream: &mut Bitstream, prop: &SendProp) -> Result<(), PropertyError> {
        skip_value(stream, prop)
    }

    pub fn value(&self) -> &PropValue {
        &self.value
    }

    accessor!(as_int, Int, i32, "int");
    accessor!(as_uint, UInt, u32, "uint");
    accessor!(as_float, Float, f32, "float");
    accessor!(as_vec3, Vector, [f32; 3], "vector");
    accessor!(as_vec2, VectorXY, [f32; 2], "vector_xy");
    accessor!(as_int64, Int64, i64, "int64");
    accessor!(as_uint64, UInt64, u64, "uint64");

    pub fn as_string(&self) -> Result<&str, PropertyError> {
        match &self.value {
            PropValue::String(v) => Ok(v),
            other => Err(PropertyError::BadCast {
                requested: "string",
                actual: other.variant_name(),
            }),
        }
    }

    pub fn as_array(&self) -> Result<&[Property], PropertyError> {
        match &self.value {
            PropValue::Array(v) => Ok(v),
            other => Err(PropertyError::BadCast {
                requested: "array",
                actual: other.variant_name(),
            }),
        }
    }
}

fn decode_value(stream: &mut Bitstream, prop: &SendProp) -> Result<PropValue, PropertyError> {
    match prop.prop_type() {
        SendPropType::Int => decode_int(stream, prop),
        SendPropType::Float => Ok(PropValue::Float(decode_float(stream, prop)?)),
        SendPropType::Vector => decode_vector(stream, prop),
        SendPropType::VectorXY => decode_vector_xy(stream, prop),
        SendPropType::String => decode_string(stream),
        SendPropType::Array => decode_array(stream, prop),
        SendPropType::Int64 => decode_int64(stream, prop),
        SendPropType::DataTable => Err(PropertyError::InvalidType(
            SendPropType::DataTable as u32,
        )),
    }
}

fn skip_value(stream: &mut Bitstream, prop: &SendProp) -> Result<(), PropertyError> {
    match prop.prop_type() {
        SendPropType::Int => skip_int(stream, prop),
        SendPropType::Float => skip_float(stream, prop),
        SendPropType::Vector => skip_vector(stream, prop),
        SendPropType::VectorXY => skip_vector_xy(stream, prop),
        SendPropType::String => skip_string(stream),
        SendPropType::Array => skip_array(stream, prop),
        SendPropType::Int64 => skip_int64(stream, prop),
        SendPropType::DataTable => Err(PropertyError::InvalidType(
            SendPropType::DataTable as u32,
        )),
    }
}

fn decode_int(stream: &mut Bitstream, prop: &SendProp) -> Result<PropValue, PropertyError> {
    let flags = prop.flags();

    if flags & SPROP_ENCODED_AGAINST_TICKCOUNT != 0 {
        return if flags & SPROP_UNSIGNED != 0 {
            Ok(PropValue::UInt(stream.read_var_u32()?))
        } else {
            Ok(PropValue::Int(stream.read_var_s32()?))
        };
    }

    if flags & SPROP_UNSIGNED != 0 {
        Ok(PropValue::UInt(stream.read_uint(prop.num_bits())?))
    } else {
        Ok(PropValue::Int(stream.read_sint(prop.num_bits())?))
    }
}

fn skip_int(stream: &mut Bitstream, prop: &SendProp) -> Result<(), PropertyError> {
    if prop.has_flag(SPROP_ENCODED_AGAINST_TICKCOUNT) {
        stream.skip_var_u32()?;
    } else {
        stream.seek_forward(prop.num_bits());
    }
    Ok(())
}

fn decode_float(stream: &mut Bitstream, prop: &SendProp) -> Result<f32, PropertyError> {
    let flags = prop.flags();

    if flags & SPROP_COORD != 0 {
        return Ok(stream.read_coord()?);
    }

    if flags & SPROP_COORD_MP != 0 {
        let integral = flags & SPROP_COORD_MP_INTEGRAL != 0;
        let low_precision = flags & SPROP_COORD_MP_LOWPRECISION != 0;
        return Ok(stream.read_coord_mp(integral, low_precision)?);
    }

    if flags & SPROP_NOSCALE != 0 {
        return Ok(f32::from_bits(stream.read(32)?));
    }

    if flags & SPROP_NORMAL != 0 {
        return Ok(stream.read_normal()?);
    }

    if flags & (SPROP_CELL_COORD | SPROP_CELL_COORD_INTEGRAL | SPROP_CELL_COORD_LOWPRECISION) != 0
    {
        let integral = flags & SPROP_CELL_COORD_INTEGRAL != 0;
        let low_precision = flags & SPROP_CELL_COORD_LOWPRECISION != 0;
        return Ok(stream.read_cell_coord(prop.num_bits(), integral, low_precision)?);
    }

    // Plain bounded float: an integer scaled into [low, high]
    let dividend = stream.read(prop.num_bits())?;
    let divisor = (1u64 << prop.num_bits()) - 1;
    let f = dividend as f32 / divisor as f32;
    Ok(f * (prop.high_value() - prop.low_value()) + prop.low_value())
}

fn skip_float(stream: &mut Bitstream, prop: &SendProp) -> Result<(), PropertyError> {
    let flags = prop.flags();

    if flags & SPROP_COORD != 0 {
        stream.skip_coord()?;
    } else if flags & SPROP_COORD_MP != 0 {
        let integral = flags & SPROP_COORD_MP_INTEGRAL != 0;
        let low_precision = flags & SPROP_COORD_MP_LOWPRECISION != 0;
        stream.skip_coord_mp(integral, low_precision)?;
    } else if flags & SPROP_NOSCALE != 0 {
        stream.seek_forward(32);
    } else if flags & SPROP_NORMAL != 0 {
        stream.skip_normal();
    } else if flags & (SPROP_CELL_COORD | SPROP_CELL_COORD_INTEGRAL | SPROP_CELL_COORD_LOWPRECISION)
        != 0
    {
        let integral = flags & SPROP_CELL_COORD_INTEGRAL != 0;
        let low_precision = flags & SPROP_CELL_COORD_LOWPRECISION != 0;
        stream.skip_cell_coord(prop.num_bits(), integral, low_precision);
    } else {
        stream.seek_forward(prop.num_bits());
    }
    Ok(())
}

fn decode_vector(stream: &mut Bitstream, prop: &SendProp) -> Result<PropValue, PropertyError> {
    let x = decode_float(stream, prop)?;
    let y = decode_float(stream, prop)?;

    let z = if prop.has_flag(SPROP_NORMAL) {
        // Normals carry only a sign bit; the magnitude follows from the
        // unit length constraint
        let sign = stream.read(1)? == 1;
        let remainder = 1.0 - x * x - y * y;
        let z = if remainder < 0.0 { 0.0 } else { remainder.sqrt() };
        if sign {
            -z
        } else {
            z
        }
    } else {
        decode_float(stream, prop)?
    };

    Ok(PropValue::Vector([x, y, z]))
}

fn skip_vector(stream: &mut Bitstream, prop: &SendProp) -> Result<(), PropertyError> {
    skip_float(stream, prop)?;
    skip_float(stream, prop)?;
    if prop.has_flag(SPROP_NORMAL) {
        stream.seek_forward(1);
    } else {
        skip_float(stream, prop)?;
    }
    Ok(())
}

fn decode_vector_xy(stream: &mut Bitstream, prop: &SendProp) -> Result<PropValue, PropertyError> {
    let x = decode_float(stream, prop)?;
    let y = decode_float(stream, prop)?;
    Ok(PropValue::VectorXY([x, y]))
}

fn skip_vector_xy(stream: &mut Bitstream, prop: &SendProp) -> Result<(), PropertyError> {
    skip_float(stream, prop)?;
    skip_float(stream, prop)
}

fn decode_string(stream: &mut Bitstream) -> Result<PropValue, PropertyError> {
    let length = stream.read(9)?;
    if length > MAX_STRING_LENGTH {
        return Err(PropertyError::InvalidStringLength(length));
    }

    let mut buf = vec![0u8; length as usize];
    stream.read_bits(&mut buf, 8 * length as usize)?;
    Ok(PropValue::String(decode_windows1252(&buf)))
}

fn skip_string(stream: &mut Bitstream) -> Result<(), PropertyError> {
    let length = stream.read(9)?;
    if length > MAX_STRING_LENGTH {
        return Err(PropertyError::InvalidStringLength(length));
    }
    stream.seek_forward(8 * length as usize);
    Ok(())
}

/// Bits needed for an array's element count, `floor(log2(n)) + 1`.
fn count_bits(mut elements: u32) -> usize {
    let mut bits = 0;
    while elements != 0 {
        bits += 1;
        elements >>= 1;
    }
    bits
}

fn decode_array(stream: &mut Bitstream, prop: &SendProp) -> Result<PropValue, PropertyError> {
    let count = stream.read(count_bits(prop.num_elements()))?;
    if count > MAX_ARRAY_ELEMENTS {
        return Err(PropertyError::InvalidElementCount(count));
    }

    let element = prop.array_element()?;
    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        values.push(Property::decode(stream, element)?);
    }
    Ok(PropValue::Array(values))
}

fn skip_array(stream: &mut Bitstream, prop: &SendProp) -> Result<(), PropertyError> {
    let count = stream.read(count_bits(prop.num_elements()))?;
    if count > MAX_ARRAY_ELEMENTS {
        return Err(PropertyError::InvalidElementCount(count));
    }

    let element = prop.array_element()?;
    for _ in 0..count {
        Property::skip(stream, element)?;
    }
    Ok(())
}

fn decode_int64(stream: &mut Bitstream, prop: &SendProp) -> Result<PropValue, PropertyError> {
    let flags = prop.flags();

    if flags & SPROP_ENCODED_AGAINST_TICKCOUNT != 0 {
        return if flags & SPROP_UNSIGNED != 0 {
            Ok(PropValue::UInt64(stream.read_var_u64()?))
        } else {
            Ok(PropValue::Int64(stream.read_var_s64()?))
        };
    }

    let mut extra_bits = prop
        .num_bits()
        .checked_sub(32)
        .ok_or(PropertyError::InvalidInt64Type)?;
    let negate = if flags & SPROP_UNSIGNED == 0 {
        extra_bits = extra_bits
            .checked_sub(1)
            .ok_or(PropertyError::InvalidInt64Type)?;
        stream.read(1)? == 1
    } else {
        false
    };

    let low = stream.read(32)? as i64;
    let high = stream.read(extra_bits)? as i64;
    let value = (high << 32) | low;

    if flags & SPROP_UNSIGNED != 0 {
        Ok(PropValue::UInt64(value as u64))
    } else {
        Ok(PropValue::Int64(if negate { -value } else { value }))
    }
}

fn skip_int64(stream: &mut Bitstream, prop: &SendProp) -> Result<(), PropertyError> {
    if prop.has_flag(SPROP_ENCODED_AGAINST_TICKCOUNT) {
        stream.skip_var_u64()?;
    } else {
        stream.seek_forward(prop.num_bits());
    }
    Ok(())
}
