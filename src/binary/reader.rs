use crate::error::Error;
use alloc::string::String;

/// A bounds-checked cursor over an in-memory Wasm byte slice.
///
/// Never allocates (spec §4.1). Every primitive either advances the cursor
/// and returns a value, or leaves the cursor untouched and returns a
/// [`Error::malformed`].
#[derive(Debug, Clone, Copy)]
pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    pub fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    /// Restricts this reader to the next `len` bytes, returning a fresh
    /// reader over exactly that span and advancing `self` past it.
    ///
    /// Used by the module decoder (spec §4.2) to carve each section's
    /// length-prefixed payload out of the surrounding stream.
    pub fn split(&mut self, len: usize) -> Result<Reader<'a>, Error> {
        if len > self.remaining() {
            return Err(Error::malformed("unexpected end of section"));
        }
        let start = self.pos;
        self.pos += len;
        Ok(Reader {
            bytes: &self.bytes[start..start + len],
            pos: 0,
        })
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| Error::malformed("unexpected end of input"))?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn peek_u8(&self) -> Result<u8, Error> {
        self.bytes
            .get(self.pos)
            .copied()
            .ok_or_else(|| Error::malformed("unexpected end of input"))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], Error> {
        if len > self.remaining() {
            return Err(Error::malformed("unexpected end of input"));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let slice = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    pub fn read_u32_fixed(&mut self) -> Result<u32, Error> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, Error> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, Error> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }

    #[cfg(feature = "simd")]
    pub fn read_v128(&mut self) -> Result<u128, Error> {
        Ok(u128::from_le_bytes(self.read_array()?))
    }

    /// Reads an unsigned LEB128 integer bounded to `bits` of magnitude.
    ///
    /// Fails (spec §4.1) if the stream runs out mid-token, if more than
    /// `ceil(bits / 7)` continuation bytes are seen, or if the final byte
    /// sets any bit beyond the `bits`-wide result (a non-canonical
    /// encoding).
    pub fn read_uleb(&mut self, bits: u32) -> Result<u64, Error> {
        let mut result: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            let low7 = (byte & 0x7f) as u64;
            if shift >= 64 || (shift == 63 && low7 > 1) {
                return Err(Error::malformed("LEB128 overflows 64 bits"));
            }
            // Once `shift` has consumed all `bits` worth of magnitude, every
            // further data bit must be zero or the value does not fit.
            if shift >= bits {
                if low7 != 0 {
                    return Err(Error::malformed("LEB128 exceeds declared bit width"));
                }
            } else if shift + 7 > bits && (low7 >> (bits - shift)) != 0 {
                return Err(Error::malformed("LEB128 exceeds declared bit width"));
            }
            result |= low7 << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
    }

    pub fn read_u32_leb(&mut self) -> Result<u32, Error> {
        self.read_uleb(32).map(|v| v as u32)
    }

    pub fn read_u64_leb(&mut self) -> Result<u64, Error> {
        self.read_uleb(64)
    }

    /// Reads a signed LEB128 integer bounded to `bits` of magnitude
    /// (32 or 64), checking for canonical sign-extension (spec §4.1).
    pub fn read_sleb(&mut self, bits: u32) -> Result<i64, Error> {
        let mut result: i64 = 0;
        let mut shift = 0u32;
        let mut byte;
        loop {
            byte = self.read_u8()?;
            let low7 = (byte & 0x7f) as i64;
            if shift < 64 {
                result |= low7 << shift;
            }
            shift += 7;
            if byte & 0x80 == 0 {
                break;
            }
            if shift >= 64 {
                return Err(Error::malformed("LEB128 overflows 64 bits"));
            }
        }
        let sign_bit_set = byte & 0x40 != 0;
        if shift < 64 && sign_bit_set {
            result |= -(1i64 << shift);
        }
        // Canonical-encoding check: the bits above `bits` must equal the
        // sign-extension of bit `bits - 1`.
        if bits < 64 {
            let expected = if (result >> (bits - 1)) & 1 == 1 {
                -1i64 << (bits - 1)
            } else {
                0
            };
            if result & (-1i64 << (bits - 1)) != expected {
                return Err(Error::malformed("non-canonical signed LEB128"));
            }
        }
        Ok(result)
    }

    pub fn read_i32_leb(&mut self) -> Result<i32, Error> {
        self.read_sleb(32).map(|v| v as i32)
    }

    pub fn read_i64_leb(&mut self) -> Result<i64, Error> {
        self.read_sleb(64)
    }

    pub fn read_bytes_vec(&mut self) -> Result<&'a [u8], Error> {
        let len = self.read_u32_leb()? as usize;
        self.read_bytes(len)
    }

    pub fn read_name(&mut self) -> Result<String, Error> {
        let bytes = self.read_bytes_vec()?;
        core::str::from_utf8(bytes)
            .map(String::from)
            .map_err(|_| Error::malformed("invalid UTF-8 in name"))
    }

    pub fn expect_end(&self) -> Result<(), Error> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::malformed("unexpected trailing bytes"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_small_uleb128() {
        let mut r = Reader::new(&[0xE5, 0x8E, 0x26]);
        assert_eq!(r.read_u32_leb().unwrap(), 624485);
    }

    #[test]
    fn reads_negative_sleb128() {
        let mut r = Reader::new(&[0x9b, 0xf1, 0x59]);
        assert_eq!(r.read_i32_leb().unwrap(), -624485);
    }

    #[test]
    fn rejects_truncated_leb128() {
        let mut r = Reader::new(&[0x80]);
        assert!(r.read_u32_leb().is_err());
    }

    #[test]
    fn rejects_overlong_u32_leb128() {
        // 5 bytes encoding a value one bit too wide for u32.
        let mut r = Reader::new(&[0x80, 0x80, 0x80, 0x80, 0x10]);
        assert!(r.read_u32_leb().is_err());
        let mut r = Reader::new(&[0x80, 0x80, 0x80, 0x80, 0x08]);
        assert!(r.read_u32_leb().is_ok());
    }

    #[test]
    fn rejects_invalid_utf8_name() {
        let mut r = Reader::new(&[0x01, 0xFF]);
        assert!(r.read_name().is_err());
    }
}
