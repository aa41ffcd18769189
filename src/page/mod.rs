// Every page on disk is [page_id][type_tag][body]. The body's own framing
// depends on type_tag; a decoder that expects one page kind and finds
// another's tag fails loudly rather than guessing.

mod data_page;
mod free_page;
mod meta_page;

pub use data_page::{ChildIndex, DataPage, Entry, Pointer};
pub use free_page::FreePage;
pub use meta_page::MetaPage;

use crate::codec::Codec;
use crate::error::Error;

pub const TAG_DATA: u8 = 1;
pub const TAG_META: u8 = 2;
pub const TAG_FREE: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page<K, V> {
    Data(DataPage<K, V>),
    Meta(MetaPage),
    Free(FreePage),
}

impl<K, V> Page<K, V> {
    pub fn id(&self) -> u64 {
        match self {
            Page::Data(p) => p.id,
            Page::Meta(p) => p.id,
            Page::Free(p) => p.id,
        }
    }

    fn type_tag(&self) -> u8 {
        match self {
            Page::Data(_) => TAG_DATA,
            Page::Meta(_) => TAG_META,
            Page::Free(_) => TAG_FREE,
        }
    }
}

impl<K: Codec, V: Codec> Page<K, V> {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.id().encode(&mut out);
        self.type_tag().encode(&mut out);
        match self {
            Page::Data(p) => p.encode_body(&mut out),
            Page::Meta(p) => p.encode_body(&mut out),
            Page::Free(p) => p.encode_body(&mut out),
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        let (id, used) = u64::decode(buf)?;
        let buf = &buf[used..];
        let (tag, used) = u8::decode(buf)?;
        let body = &buf[used..];
        match tag {
            TAG_DATA => Ok(Page::Data(DataPage::decode_body(id, body)?)),
            TAG_META => Ok(Page::Meta(MetaPage::decode_body(id, body)?)),
            TAG_FREE => Ok(Page::Free(FreePage::decode_body(id, body)?)),
            other => Err(Error::Corrupt(format!("unknown page type tag {other}"))),
        }
    }
}

pub fn load_data_page<K: Codec, V: Codec>(bytes: &[u8]) -> Result<DataPage<K, V>, Error> {
    match Page::<K, V>::decode(bytes)? {
        Page::Data(p) => Ok(p),
        other => Err(Error::Corrupt(format!(
            "expected Data page, found tag {}",
            other.type_tag()
        ))),
    }
}

pub fn load_meta_page<K: Codec, V: Codec>(bytes: &[u8]) -> Result<MetaPage, Error> {
    match Page::<K, V>::decode(bytes)? {
        Page::Meta(p) => Ok(p),
        other => Err(Error::Corrupt(format!(
            "expected Meta page, found tag {}",
            other.type_tag()
        ))),
    }
}

pub fn load_free_page<K: Codec, V: Codec>(bytes: &[u8]) -> Result<FreePage, Error> {
    match Page::<K, V>::decode(bytes)? {
        Page::Free(p) => Ok(p),
        other => Err(Error::Corrupt(format!(
            "expected Free page, found tag {}",
            other.type_tag()
        ))),
    }
}
