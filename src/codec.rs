use crate::error::Error;

// decode returns the value plus the number of bytes it consumed, so a
// flat sequence of fields can be decoded without a separate length table.
pub trait Codec: Sized {
    fn encode(&self, out: &mut Vec<u8>);
    fn decode(buf: &[u8]) -> Result<(Self, usize), Error>;
}

fn need(buf: &[u8], n: usize, what: &str) -> Result<(), Error> {
    if buf.len() < n {
        Err(Error::Corrupt(format!(
            "truncated {what}: need {n} bytes, have {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

macro_rules! impl_codec_for_be_int {
    ($t:ty) => {
        impl Codec for $t {
            fn encode(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_be_bytes());
            }

            fn decode(buf: &[u8]) -> Result<(Self, usize), Error> {
                const WIDTH: usize = std::mem::size_of::<$t>();
                need(buf, WIDTH, stringify!($t))?;
                let mut bytes = [0u8; WIDTH];
                bytes.copy_from_slice(&buf[..WIDTH]);
                Ok((<$t>::from_be_bytes(bytes), WIDTH))
            }
        }
    };
}

impl_codec_for_be_int!(u32);
impl_codec_for_be_int!(u64);
impl_codec_for_be_int!(i32);
impl_codec_for_be_int!(i64);

impl Codec for u8 {
    fn encode(&self, out: &mut Vec<u8>) {
        out.push(*self);
    }

    fn decode(buf: &[u8]) -> Result<(Self, usize), Error> {
        need(buf, 1, "u8")?;
        Ok((buf[0], 1))
    }
}

// Zero-width placeholder value.
impl Codec for () {
    fn encode(&self, _out: &mut Vec<u8>) {}

    fn decode(_buf: &[u8]) -> Result<(Self, usize), Error> {
        Ok(((), 0))
    }
}

impl Codec for bool {
    fn encode(&self, out: &mut Vec<u8>) {
        out.push(if *self { 1 } else { 0 });
    }

    fn decode(buf: &[u8]) -> Result<(Self, usize), Error> {
        need(buf, 1, "bool")?;
        Ok((buf[0] != 0, 1))
    }
}

// Length-prefixed byte string: a u32 length followed by the raw bytes.
impl Codec for Vec<u8> {
    fn encode(&self, out: &mut Vec<u8>) {
        (self.len() as u32).encode(out);
        out.extend_from_slice(self);
    }

    fn decode(buf: &[u8]) -> Result<(Self, usize), Error> {
        let (len, used) = u32::decode(buf)?;
        let len = len as usize;
        need(&buf[used..], len, "Vec<u8> payload")?;
        Ok((buf[used..used + len].to_vec(), used + len))
    }
}

impl Codec for String {
    fn encode(&self, out: &mut Vec<u8>) {
        self.as_bytes().to_vec().encode(out);
    }

    fn decode(buf: &[u8]) -> Result<(Self, usize), Error> {
        let (bytes, used) = Vec::<u8>::decode(buf)?;
        let s = String::from_utf8(bytes)
            .map_err(|e| Error::Corrupt(format!("invalid utf-8 string: {e}")))?;
        Ok((s, used))
    }
}

// One presence byte (0 = absent, 1 = present) followed by T's bytes.
impl<T: Codec> Codec for Option<T> {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            None => out.push(0),
            Some(v) => {
                out.push(1);
                v.encode(out);
            }
        }
    }

    fn decode(buf: &[u8]) -> Result<(Self, usize), Error> {
        need(buf, 1, "Option tag")?;
        match buf[0] {
            0 => Ok((None, 1)),
            1 => {
                let (v, used) = T::decode(&buf[1..])?;
                Ok((Some(v), 1 + used))
            }
            tag => Err(Error::Corrupt(format!("invalid Option tag byte: {tag}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T: Codec + PartialEq + std::fmt::Debug>(v: T) {
        let mut buf = Vec::new();
        v.encode(&mut buf);
        let (decoded, used) = T::decode(&buf).unwrap();
        assert_eq!(used, buf.len());
        assert_eq!(decoded, v);
    }

    #[test]
    fn integers_roundtrip() {
        roundtrip(0u32);
        roundtrip(u32::MAX);
        roundtrip(0u64);
        roundtrip(u64::MAX);
        roundtrip(-1i32);
        roundtrip(-1i64);
    }

    #[test]
    fn bool_roundtrips() {
        roundtrip(true);
        roundtrip(false);
    }

    #[test]
    fn bytes_and_string_roundtrip() {
        roundtrip(Vec::<u8>::new());
        roundtrip(vec![1u8, 2, 3, 255]);
        roundtrip(String::new());
        roundtrip("hello page".to_string());
    }

    #[test]
    fn option_roundtrips() {
        roundtrip(None::<u32>);
        roundtrip(Some(42u32));
        roundtrip(Some("x".to_string()));
    }

    #[test]
    fn unit_encodes_to_zero_bytes() {
        let mut buf = Vec::new();
        ().encode(&mut buf);
        assert!(buf.is_empty());
        let (_, used) = <()>::decode(&buf).unwrap();
        assert_eq!(used, 0);
    }

    #[test]
    fn sequential_fields_decode_independently() {
        let mut buf = Vec::new();
        true.encode(&mut buf);
        7u32.encode(&mut buf);
        Some(9u32).encode(&mut buf);

        let (is_leaf, n1) = bool::decode(&buf).unwrap();
        let (key, n2) = u32::decode(&buf[n1..]).unwrap();
        let (sep, n3) = Option::<u32>::decode(&buf[n1 + n2..]).unwrap();

        assert!(is_leaf);
        assert_eq!(key, 7);
        assert_eq!(sep, Some(9));
        assert_eq!(n1 + n2 + n3, buf.len());
    }

    #[test]
    fn truncated_buffer_is_corrupt_error() {
        let err = u32::decode(&[0u8, 1]).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }
}
