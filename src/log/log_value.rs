//! LogValue - A staged page and the page it was cloned from.

use crate::store::{page_codec, DbError, Page, Result};

/// Entry of a transaction log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogValue {
    /// The page as the transaction modified it.
    pub modified: Page,
    /// The published page it was cloned from, if any.
    pub original: Option<Page>,
}

impl LogValue {
    pub fn new(modified: Page, original: Option<Page>) -> Self {
        Self { modified, original }
    }

    /// Serializes both pages.
    ///
    /// Layout: `u8` original flag, `u32` length and bytes of the modified
    /// page, then `u32` length and bytes of the original if present.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let modified = page_codec::encode(&self.modified)?;
        let original = self.original.as_ref().map(page_codec::encode).transpose()?;

        let mut out = Vec::with_capacity(
            9 + modified.len() + original.as_ref().map_or(0, |o| 4 + o.len()),
        );
        out.push(original.is_some() as u8);
        out.extend_from_slice(&page_codec::length_prefix(modified.len(), "modified page")?.to_le_bytes());
        out.extend_from_slice(&modified);
        if let Some(original) = original {
            out.extend_from_slice(&page_codec::length_prefix(original.len(), "original page")?.to_le_bytes());
            out.extend_from_slice(&original);
        }
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let (&flag, rest) = data
            .split_first()
            .ok_or(DbError::Corrupted("empty log value"))?;
        let (modified, rest) = split_page(rest)?;
        let modified = page_codec::decode(modified)?;

        let original = match flag {
            0 => {
                if !rest.is_empty() {
                    return Err(DbError::Corrupted("trailing bytes in log value"));
                }
                None
            }
            1 => {
                let (original, rest) = split_page(rest)?;
                if !rest.is_empty() {
                    return Err(DbError::Corrupted("trailing bytes in log value"));
                }
                Some(page_codec::decode(original)?)
            }
            _ => return Err(DbError::Corrupted("invalid log value flag")),
        };

        Ok(Self { modified, original })
    }
}

fn split_page(data: &[u8]) -> Result<(&[u8], &[u8])> {
    if data.len() < 4 {
        return Err(DbError::Corrupted("truncated log value"));
    }
    let len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let rest = &data[4..];
    if rest.len() < len {
        return Err(DbError::Corrupted("truncated log value"));
    }
    Ok(rest.split_at(len))
}
