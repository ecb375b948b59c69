use crate::error::ProtocolError;

macro_rules! get_try_impl {
    ($try_getter: ident, $ty:ty, $getter: ident) => {
        fn $try_getter(&mut self) -> Result<$ty, ProtocolError> {
            if self.remaining() < size_of::<$ty>() {
                return Err(ProtocolError::Truncated);
            }
            Ok(self.$getter())
        }
    }
}

/// Checked little-endian getters for the wire's scalar fields.
pub trait BufExt: bytes::Buf {
    get_try_impl!(try_get_u16_le, u16, get_u16_le);
    get_try_impl!(try_get_u32_le, u32, get_u32_le);
    get_try_impl!(try_get_u64_le, u64, get_u64_le);
}

impl <T: bytes::Buf> BufExt for T {
}

/// Reads the wire's little-endian scalars, undoing the byte order of a
///  foreign-endian peer when the handshake probe detected a swapped magic.
#[derive(Copy, Clone, Debug)]
pub struct ScalarReader {
    pub flip: bool,
}

impl ScalarReader {
    pub fn u16(&self, buf: &mut impl bytes::Buf) -> Result<u16, ProtocolError> {
        let v = buf.try_get_u16_le()?;
        Ok(if self.flip { v.swap_bytes() } else { v })
    }

    pub fn u32(&self, buf: &mut impl bytes::Buf) -> Result<u32, ProtocolError> {
        let v = buf.try_get_u32_le()?;
        Ok(if self.flip { v.swap_bytes() } else { v })
    }

    pub fn u64(&self, buf: &mut impl bytes::Buf) -> Result<u64, ProtocolError> {
        let v = buf.try_get_u64_le()?;
        Ok(if self.flip { v.swap_bytes() } else { v })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::exact(vec![1, 0, 0, 0], Some(1))]
    #[case::remainder(vec![2, 1, 0, 0, 99], Some(0x102))]
    #[case::short(vec![1, 2, 3], None)]
    #[case::empty(vec![], None)]
    fn test_try_get_u32_le(#[case] bytes: Vec<u8>, #[case] expected: Option<u32>) {
        let mut buf: &[u8] = &bytes;
        assert_eq!(buf.try_get_u32_le().ok(), expected);
    }

    #[rstest]
    #[case::native(false, 0x0403_0201)]
    #[case::flipped(true, 0x0102_0304)]
    fn test_scalar_reader_u32(#[case] flip: bool, #[case] expected: u32) {
        let reader = ScalarReader { flip };
        let mut buf: &[u8] = &[1, 2, 3, 4];
        assert_eq!(reader.u32(&mut buf).unwrap(), expected);
    }

    #[rstest]
    #[case::native(false, 0x0807_0605_0403_0201)]
    #[case::flipped(true, 0x0102_0304_0506_0708)]
    fn test_scalar_reader_u64(#[case] flip: bool, #[case] expected: u64) {
        let reader = ScalarReader { flip };
        let mut buf: &[u8] = &[1, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(reader.u64(&mut buf).unwrap(), expected);
    }
}
