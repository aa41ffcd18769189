// Written in place of a freed page's slot. detached = true once the
// allocator has committed to reissuing it but hasn't overwritten it yet.

use crate::codec::Codec;
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreePage {
    pub id: u64,
    pub detached: bool,
}

impl FreePage {
    pub fn encode_body(&self, out: &mut Vec<u8>) {
        self.detached.encode(out);
    }

    pub fn decode_body(id: u64, buf: &[u8]) -> Result<Self, Error> {
        let (detached, _) = bool::decode(buf)?;
        Ok(Self { id, detached })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_page_body_roundtrips() {
        let free = FreePage {
            id: 5,
            detached: true,
        };
        let mut buf = Vec::new();
        free.encode_body(&mut buf);
        let decoded = FreePage::decode_body(5, &buf).unwrap();
        assert_eq!(decoded, free);
    }
}
