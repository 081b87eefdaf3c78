//! Byte marshalling primitives for Lua scripts.
//!
//! Game memory comes back from the host API as raw bytes; these helpers turn
//! them into numbers and back. Target consoles are big-endian, so every
//! conversion is big-endian regardless of the machine running the host.
//!
//! # Usage in Lua
//!
//! ```lua
//! local raw = Ratchetron:ReadMemory(GAME_PID, 0x00B00000, 4)
//! local bolts = bytestoint(raw)
//! Ratchetron:WriteMemory(GAME_PID, 0x00B00000, inttobytes(bolts + 1000, 4))
//!
//! local speed = bytestofloat(Ratchetron:ReadMemory(GAME_PID, 0x00B0A010, 4))
//! Ratchetron:WriteMemory(GAME_PID, 0x00B0A010, floattobytes(speed * 2))
//! ```
//!
//! Byte arrays are Lua sequences of integers in `0..=255`. Binary strings are
//! also accepted as input.
//!
//! # Error Handling
//!
//! Invalid lengths, out-of-range or fractional bytes, tables with holes and
//! fractional integer arguments raise a Lua error carrying a
//! [`MarshallingError`]. Nothing is silently truncated.

use anyhow::{anyhow, Result};
use mlua::{FromLua, IntoLua, Lua, Table, Value};

use crate::error::MarshallingError;

/// Output width of `inttobytes` when no size is given.
const DEFAULT_INT_SIZE: i64 = 4;

/// Raw bytes crossing the Lua boundary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ByteArray(pub Vec<u8>);

impl FromLua for ByteArray {
    fn from_lua(value: Value, _lua: &Lua) -> mlua::Result<Self> {
        match value {
            Value::Table(table) => bytes_from_table(&table).map(Self),
            Value::String(s) => Ok(Self(s.as_bytes().to_vec())),
            other => Err(mlua::Error::RuntimeError(format!(
                "expected a table of bytes or a string, got {}",
                other.type_name()
            ))),
        }
    }
}

/// Read a 1-based sequence of integers in `0..=255`.
///
/// Every slot up to the border must hold an exact integer, and the table must
/// have no keys beyond it.
fn bytes_from_table(table: &Table) -> mlua::Result<Vec<u8>> {
    let length = table.raw_len();
    let mut bytes = Vec::with_capacity(length);
    for index in 1..=length {
        let item: Value = table.raw_get(index)?;
        let value = exact_integer(&item).ok_or_else(|| {
            mlua::Error::external(MarshallingError::NotAByte {
                index,
                found: describe(&item),
            })
        })?;
        let byte = u8::try_from(value).map_err(|_| {
            mlua::Error::external(MarshallingError::ByteOutOfRange { index, value })
        })?;
        bytes.push(byte);
    }

    let entries = table.pairs::<Value, Value>().count();
    if entries != length {
        return Err(mlua::Error::external(MarshallingError::NotASequence {
            length,
            entries,
        }));
    }
    Ok(bytes)
}

/// The integer a Lua number holds exactly, if any.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::float_cmp)]
fn exact_integer(value: &Value) -> Option<i64> {
    match *value {
        Value::Integer(i) => Some(i),
        // i64::MAX as f64 rounds up to 2^63, which is itself out of range.
        Value::Number(n) if n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64 => {
            Some(n as i64)
        }
        _ => None,
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Number(n) => n.to_string(),
        other => other.type_name().to_string(),
    }
}

fn integer_arg(
    function: &'static str,
    argument: &'static str,
    value: &Value,
) -> Result<i64, MarshallingError> {
    exact_integer(value).ok_or_else(|| MarshallingError::NotAnInteger {
        function,
        argument,
        found: describe(value),
    })
}

impl IntoLua for ByteArray {
    fn into_lua(self, lua: &Lua) -> mlua::Result<Value> {
        lua.create_sequence_from(self.0).map(Value::Table)
    }
}

/// Decode a big-endian integer.
///
/// One byte is unsigned; two bytes are a signed 16-bit value; four bytes are
/// a signed 32-bit value.
pub fn bytes_to_int(bytes: &[u8]) -> Result<i32, MarshallingError> {
    match *bytes {
        [b] => Ok(i32::from(b)),
        [hi, lo] => Ok(i32::from(i16::from_be_bytes([hi, lo]))),
        [a, b, c, d] => Ok(i32::from_be_bytes([a, b, c, d])),
        _ => Err(MarshallingError::InvalidLength {
            function: "bytestoint",
            expected: "1, 2 or 4",
            actual: bytes.len(),
        }),
    }
}

/// Encode the low `size` bytes of `value`, most significant first.
pub fn int_to_bytes(value: i64, size: i64) -> Result<Vec<u8>, MarshallingError> {
    let width = match size {
        1..=4 => size as usize,
        _ => return Err(MarshallingError::InvalidSize(size)),
    };
    let be = value.to_be_bytes();
    Ok(be[be.len() - width..].to_vec())
}

/// Decode a big-endian IEEE-754 single.
pub fn bytes_to_float(bytes: &[u8]) -> Result<f32, MarshallingError> {
    let raw: [u8; 4] = bytes
        .try_into()
        .map_err(|_| MarshallingError::InvalidLength {
            function: "bytestofloat",
            expected: "4",
            actual: bytes.len(),
        })?;
    Ok(f32::from_be_bytes(raw))
}

/// Encode a big-endian IEEE-754 single.
#[must_use]
pub fn float_to_bytes(value: f32) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

/// Register the marshalling functions as globals.
///
/// - `bytestoint(bytes)` -> integer
/// - `inttobytes(value, size)` -> bytes
/// - `bytestofloat(bytes)` -> number
/// - `floattobytes(value)` -> bytes
///
/// # Errors
///
/// Returns an error if Lua function creation fails.
pub fn register(lua: &Lua) -> Result<()> {
    let globals = lua.globals();

    let to_int = lua
        .create_function(|_, bytes: ByteArray| {
            bytes_to_int(&bytes.0).map_err(mlua::Error::external)
        })
        .map_err(|e| anyhow!("Failed to create bytestoint function: {e}"))?;
    globals
        .set("bytestoint", to_int)
        .map_err(|e| anyhow!("Failed to set bytestoint: {e}"))?;

    let from_int = lua
        .create_function(|_, (value, size): (Value, Option<Value>)| {
            let value = integer_arg("inttobytes", "value", &value).map_err(mlua::Error::external)?;
            let size = size
                .map(|size| integer_arg("inttobytes", "size", &size))
                .transpose()
                .map_err(mlua::Error::external)?
                .unwrap_or(DEFAULT_INT_SIZE);
            int_to_bytes(value, size)
                .map(ByteArray)
                .map_err(mlua::Error::external)
        })
        .map_err(|e| anyhow!("Failed to create inttobytes function: {e}"))?;
    globals
        .set("inttobytes", from_int)
        .map_err(|e| anyhow!("Failed to set inttobytes: {e}"))?;

    let to_float = lua
        .create_function(|_, bytes: ByteArray| {
            bytes_to_float(&bytes.0).map_err(mlua::Error::external)
        })
        .map_err(|e| anyhow!("Failed to create bytestofloat function: {e}"))?;
    globals
        .set("bytestofloat", to_float)
        .map_err(|e| anyhow!("Failed to set bytestofloat: {e}"))?;

    let from_float = lua
        .create_function(|_, value: f32| Ok(ByteArray(float_to_bytes(value))))
        .map_err(|e| anyhow!("Failed to create floattobytes function: {e}"))?;
    globals
        .set("floattobytes", from_float)
        .map_err(|e| anyhow!("Failed to set floattobytes: {e}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_int_big_endian() {
        assert_eq!(bytes_to_int(&[0x00, 0x01]), Ok(1));
        assert_eq!(bytes_to_int(&[0x12, 0x34, 0x56, 0x78]), Ok(0x1234_5678));
    }

    #[test]
    fn test_bytes_to_int_sign_by_width() {
        assert_eq!(bytes_to_int(&[0xff]), Ok(255));
        assert_eq!(bytes_to_int(&[0xff, 0xfe]), Ok(-2));
        assert_eq!(bytes_to_int(&[0xff, 0xff, 0xff, 0xff]), Ok(-1));
    }

    #[test]
    fn test_bytes_to_int_rejects_other_lengths() {
        for len in [0usize, 3, 5, 8] {
            let err = bytes_to_int(&vec![0; len]).expect_err("Should reject length");
            assert_eq!(
                err,
                MarshallingError::InvalidLength {
                    function: "bytestoint",
                    expected: "1, 2 or 4",
                    actual: len,
                }
            );
        }
    }

    #[test]
    fn test_int_to_bytes_takes_low_bytes() {
        assert_eq!(int_to_bytes(258, 2), Ok(vec![0x01, 0x02]));
        assert_eq!(int_to_bytes(0x1234_5678, 4), Ok(vec![0x12, 0x34, 0x56, 0x78]));
        assert_eq!(int_to_bytes(0x1234_5678, 1), Ok(vec![0x78]));
        assert_eq!(int_to_bytes(-1, 3), Ok(vec![0xff, 0xff, 0xff]));
    }

    #[test]
    fn test_int_to_bytes_rejects_bad_size() {
        assert_eq!(int_to_bytes(1, 0), Err(MarshallingError::InvalidSize(0)));
        assert_eq!(int_to_bytes(1, 5), Err(MarshallingError::InvalidSize(5)));
    }

    #[test]
    fn test_int_round_trip_recovers_low_bytes() {
        for value in [0i64, 1, 127, 128, 255, 256, -1, -32768, 65535, 0x7fff_ffff, -0x8000_0000] {
            assert_eq!(bytes_to_int(&int_to_bytes(value, 1).expect("size 1")), Ok((value & 0xff) as i32));
            assert_eq!(
                bytes_to_int(&int_to_bytes(value, 2).expect("size 2")),
                Ok(i32::from(value as i16))
            );
            assert_eq!(
                bytes_to_int(&int_to_bytes(value, 4).expect("size 4")),
                Ok(value as i32)
            );
        }
    }

    #[test]
    fn test_float_round_trip_is_bit_exact() {
        for value in [0.0f32, -0.0, 1.5, -273.15, f32::MIN_POSITIVE, f32::MAX, f32::MIN, 1e-45] {
            let back = bytes_to_float(&float_to_bytes(value)).expect("Should decode");
            assert_eq!(back.to_bits(), value.to_bits());
        }
        assert_eq!(float_to_bytes(1.0), vec![0x3f, 0x80, 0x00, 0x00]);
    }

    #[test]
    fn test_bytes_to_float_requires_four_bytes() {
        assert!(bytes_to_float(&[0x3f, 0x80, 0x00]).is_err());
        assert!(bytes_to_float(&[0; 8]).is_err());
    }

    #[test]
    fn test_lua_functions() {
        let lua = Lua::new();
        register(&lua).expect("Should register byte primitives");

        let value: i64 = lua
            .load("return bytestoint({0x00, 0x01})")
            .eval()
            .expect("bytestoint should be callable");
        assert_eq!(value, 1);

        let (len, hi, lo): (i64, i64, i64) = lua
            .load("local b = inttobytes(258, 2) return #b, b[1], b[2]")
            .eval()
            .expect("inttobytes should be callable");
        assert_eq!((len, hi, lo), (2, 1, 2));

        let float: f64 = lua
            .load("return bytestofloat(floattobytes(2.5))")
            .eval()
            .expect("float round trip should work");
        assert!((float - 2.5).abs() < f64::EPSILON);

        let from_string: i64 = lua
            .load(r#"return bytestoint("\0\2")"#)
            .eval()
            .expect("strings should be accepted");
        assert_eq!(from_string, 2);
    }

    #[test]
    fn test_lua_invalid_length_raises() {
        let lua = Lua::new();
        register(&lua).expect("Should register byte primitives");

        let (ok, message): (bool, String) = lua
            .load("local ok, err = pcall(bytestoint, {1, 2, 3}) return ok, tostring(err)")
            .eval()
            .expect("pcall should return");
        assert!(!ok);
        assert!(message.contains("expected 1, 2 or 4 bytes, got 3"), "{message}");
    }

    #[test]
    fn test_lua_out_of_range_byte_raises() {
        let lua = Lua::new();
        register(&lua).expect("Should register byte primitives");

        let ok: bool = lua
            .load("return (pcall(bytestoint, {1, 256}))")
            .eval()
            .expect("pcall should return");
        assert!(!ok);
    }

    /// `pcall` a chunk expression, returning `(ok, tostring(err))`.
    fn pcall(lua: &Lua, call: &str) -> (bool, String) {
        lua.load(format!("local ok, err = pcall(function() return {call} end) return ok, tostring(err)"))
            .eval()
            .expect("pcall should return")
    }

    #[test]
    fn test_lua_fractional_byte_raises() {
        let lua = Lua::new();
        register(&lua).expect("Should register byte primitives");

        let (ok, message) = pcall(&lua, "bytestoint({1.5, 2})");
        assert!(!ok);
        assert!(message.contains("byte at index 1 must be an integer, got 1.5"), "{message}");

        let (ok, message) = pcall(&lua, "bytestoint({0, 'x'})");
        assert!(!ok);
        assert!(message.contains("byte at index 2 must be an integer"), "{message}");
    }

    #[test]
    fn test_lua_byte_table_with_hole_raises() {
        let lua = Lua::new();
        register(&lua).expect("Should register byte primitives");

        let (ok, message) = pcall(&lua, "bytestoint({0, 1, nil, 4})");
        assert!(!ok, "a hole must not shorten the array: {message}");

        let (ok, message) = pcall(&lua, "bytestoint({0, 1, [5] = 4})");
        assert!(!ok);
        assert!(message.contains("must be a sequence"), "{message}");

        let (ok, message) = pcall(&lua, "bytestoint({0, 1, name = 4})");
        assert!(!ok);
        assert!(message.contains("must be a sequence"), "{message}");
    }

    #[test]
    fn test_lua_integral_floats_are_accepted() {
        let lua = Lua::new();
        register(&lua).expect("Should register byte primitives");

        let value: i64 = lua
            .load("return bytestoint({0.0, 1.0})")
            .eval()
            .expect("integral floats are exact bytes");
        assert_eq!(value, 1);

        let (len, hi, lo): (i64, i64, i64) = lua
            .load("local b = inttobytes(258.0, 2.0) return #b, b[1], b[2]")
            .eval()
            .expect("integral floats are exact integers");
        assert_eq!((len, hi, lo), (2, 1, 2));
    }

    #[test]
    fn test_lua_int_to_bytes_rejects_fractional_arguments() {
        let lua = Lua::new();
        register(&lua).expect("Should register byte primitives");

        let (ok, message) = pcall(&lua, "inttobytes(258.9, 2)");
        assert!(!ok);
        assert!(message.contains("inttobytes: value must be an integer, got 258.9"), "{message}");

        let (ok, message) = pcall(&lua, "inttobytes(258, 2.5)");
        assert!(!ok);
        assert!(message.contains("inttobytes: size must be an integer, got 2.5"), "{message}");

        let (ok, message) = pcall(&lua, "inttobytes(0/0, 2)");
        assert!(!ok, "NaN is not an integer: {message}");
    }

    #[test]
    fn test_lua_int_to_bytes_default_size() {
        let lua = Lua::new();
        register(&lua).expect("Should register byte primitives");

        let len: i64 = lua
            .load("return #inttobytes(1)")
            .eval()
            .expect("size should default");
        assert_eq!(len, 4);
    }
}
