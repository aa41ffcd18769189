// Single-cell record naming the tree's current root page id. Rewriting it
// is the one write that publishes a new root after a split or collapse.

use crate::codec::Codec;
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaPage {
    pub id: u64,
    pub root_id: u64,
}

impl MetaPage {
    pub fn encode_body(&self, out: &mut Vec<u8>) {
        self.root_id.encode(out);
    }

    pub fn decode_body(id: u64, buf: &[u8]) -> Result<Self, Error> {
        let (root_id, _) = u64::decode(buf)?;
        Ok(Self { id, root_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_page_body_roundtrips() {
        let meta = MetaPage { id: 0, root_id: 42 };
        let mut buf = Vec::new();
        meta.encode_body(&mut buf);
        let decoded = MetaPage::decode_body(0, &buf).unwrap();
        assert_eq!(decoded, meta);
    }
}
