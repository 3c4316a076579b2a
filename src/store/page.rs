//! Page - The tagged page variant stored in the trie.
//!
//! Every page carries a revision stamp, a reference array whose length
//! depends on its kind, and a kind-specific payload:
//!
//! | kind         | references | payload                                   |
//! |--------------|------------|-------------------------------------------|
//! | Uber         | 1          | revision count, bootstrap flag            |
//! | Indirect     | `FANOUT`   | none                                      |
//! | RevisionRoot | 2          | record count, max record key, timestamp   |
//! | Name         | 0          | key to string table                       |
//! | Data         | 0          | `PAGE_RECORD_COUNT` record slots          |
//!
//! ## Copy-on-Write
//!
//! Published pages are only ever handed out as `Arc<Page>`, which cannot be
//! mutated. A transaction edits a page by calling [`Page::cow_clone`], which
//! copies the reference array (each entry still points at the same child)
//! and shares record payloads.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::data::{NameTable, RecordSlots, FANOUT};

use super::{DbError, PageReference, Result};

/// Slot of a RevisionRoot holding the name page.
pub const NAME_SLOT: usize = 0;

/// Slot of a RevisionRoot holding the record-space indirect root.
pub const RECORD_ROOT_SLOT: usize = 1;

/// Slot of the Uber page holding the revision-space indirect root.
pub const REVISION_ROOT_SLOT: usize = 0;

/// Kinds of pages in the trie.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PageKind {
    /// Root of everything, one per revision.
    Uber = 0,
    /// Routing page with `FANOUT` reference slots.
    Indirect = 1,
    /// Root of one revision's record and name subtrees.
    RevisionRoot = 2,
    /// Leaf page with the name table.
    Name = 3,
    /// Leaf page with record slots.
    Data = 4,
}

impl PageKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PageKind::Uber),
            1 => Some(PageKind::Indirect),
            2 => Some(PageKind::RevisionRoot),
            3 => Some(PageKind::Name),
            4 => Some(PageKind::Data),
            _ => None,
        }
    }

    /// Number of reference slots a page of this kind carries.
    pub const fn reference_count(self) -> usize {
        match self {
            PageKind::Uber => 1,
            PageKind::Indirect => FANOUT,
            PageKind::RevisionRoot => 2,
            PageKind::Name | PageKind::Data => 0,
        }
    }
}

/// Metadata of the Uber page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UberMeta {
    /// Number of committed revisions, including the one this page roots.
    pub revision_count: u64,
    /// True only for the first, never-committed revision.
    pub bootstrap: bool,
}

/// Metadata of a RevisionRoot page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RevisionMeta {
    /// Number of live records.
    pub revision_size: u64,
    /// Largest record key allocated so far.
    pub max_record_key: u64,
    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Kind-specific page content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Uber(UberMeta),
    Indirect,
    RevisionRoot(RevisionMeta),
    Name(NameTable),
    Data(RecordSlots),
}

/// A page of the revisioned trie.
#[derive(Clone, Debug)]
pub struct Page {
    revision: u64,
    references: Box<[PageReference]>,
    payload: Payload,
}

impl Page {
    /// Assembles a page, checking the reference count against the kind.
    pub fn from_parts(
        revision: u64,
        references: Vec<PageReference>,
        payload: Payload,
    ) -> Result<Self> {
        let kind = payload_kind(&payload);
        if references.len() != kind.reference_count() {
            return Err(DbError::inconsistent(format!(
                "{:?} page needs {} references, got {}",
                kind,
                kind.reference_count(),
                references.len()
            )));
        }
        Ok(Self {
            revision,
            references: references.into_boxed_slice(),
            payload,
        })
    }

    fn with_payload(revision: u64, payload: Payload) -> Self {
        let count = payload_kind(&payload).reference_count();
        Self {
            revision,
            references: vec![PageReference::empty(); count].into_boxed_slice(),
            payload,
        }
    }

    /// Creates an Uber page.
    pub fn new_uber(revision: u64, revision_count: u64, bootstrap: bool) -> Self {
        Self::with_payload(
            revision,
            Payload::Uber(UberMeta {
                revision_count,
                bootstrap,
            }),
        )
    }

    /// Creates an empty indirect page.
    pub fn new_indirect(revision: u64) -> Self {
        Self::with_payload(revision, Payload::Indirect)
    }

    /// Creates an empty RevisionRoot page stamped with the current time.
    pub fn new_revision_root(revision: u64) -> Self {
        Self::with_payload(
            revision,
            Payload::RevisionRoot(RevisionMeta {
                timestamp: now_millis(),
                ..RevisionMeta::default()
            }),
        )
    }

    /// Creates an empty name page.
    pub fn new_name(revision: u64) -> Self {
        Self::with_payload(revision, Payload::Name(NameTable::new()))
    }

    /// Creates an empty data page.
    pub fn new_data(revision: u64) -> Self {
        Self::with_payload(revision, Payload::Data(RecordSlots::new()))
    }

    /// Creates an empty page of the given kind.
    pub fn empty(kind: PageKind, revision: u64) -> Self {
        match kind {
            PageKind::Uber => Self::new_uber(revision, 0, true),
            PageKind::Indirect => Self::new_indirect(revision),
            PageKind::RevisionRoot => Self::new_revision_root(revision),
            PageKind::Name => Self::new_name(revision),
            PageKind::Data => Self::new_data(revision),
        }
    }

    /// Produces the writable successor of this page for `revision`.
    ///
    /// The reference array is copied slot by slot, so every child is shared
    /// with this page. Uber pages advance their revision count and drop the
    /// bootstrap flag; RevisionRoot pages keep their counters and take a new
    /// timestamp.
    pub fn cow_clone(&self, revision: u64) -> Page {
        let payload = match &self.payload {
            Payload::Uber(meta) => Payload::Uber(UberMeta {
                revision_count: meta.revision_count + 1,
                bootstrap: false,
            }),
            Payload::RevisionRoot(meta) => Payload::RevisionRoot(RevisionMeta {
                timestamp: now_millis(),
                ..*meta
            }),
            other => other.clone(),
        };
        Page {
            revision,
            references: self.references.clone(),
            payload,
        }
    }

    #[inline]
    pub fn kind(&self) -> PageKind {
        payload_kind(&self.payload)
    }

    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn references(&self) -> &[PageReference] {
        &self.references
    }

    /// Returns the reference at `slot`, or `None` for a slot the kind lacks.
    pub fn reference(&self, slot: usize) -> Option<&PageReference> {
        self.references.get(slot)
    }

    /// Replaces the reference at `slot`.
    pub fn set_reference(&mut self, slot: usize, reference: PageReference) -> Result<()> {
        let kind = self.kind();
        let entry = self.references.get_mut(slot).ok_or_else(|| {
            DbError::inconsistent(format!("{:?} page has no reference slot {}", kind, slot))
        })?;
        *entry = reference;
        Ok(())
    }

    /// Returns true if any slot points into a transaction log.
    pub fn has_staged_references(&self) -> bool {
        self.references.iter().any(PageReference::is_staged)
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn uber_meta(&self) -> Result<UberMeta> {
        match &self.payload {
            Payload::Uber(meta) => Ok(*meta),
            _ => Err(self.wrong_kind(PageKind::Uber)),
        }
    }

    pub fn uber_meta_mut(&mut self) -> Result<&mut UberMeta> {
        let err = self.wrong_kind(PageKind::Uber);
        match &mut self.payload {
            Payload::Uber(meta) => Ok(meta),
            _ => Err(err),
        }
    }

    pub fn revision_meta(&self) -> Result<RevisionMeta> {
        match &self.payload {
            Payload::RevisionRoot(meta) => Ok(*meta),
            _ => Err(self.wrong_kind(PageKind::RevisionRoot)),
        }
    }

    pub fn revision_meta_mut(&mut self) -> Result<&mut RevisionMeta> {
        let err = self.wrong_kind(PageKind::RevisionRoot);
        match &mut self.payload {
            Payload::RevisionRoot(meta) => Ok(meta),
            _ => Err(err),
        }
    }

    pub fn names(&self) -> Result<&NameTable> {
        match &self.payload {
            Payload::Name(names) => Ok(names),
            _ => Err(self.wrong_kind(PageKind::Name)),
        }
    }

    pub fn names_mut(&mut self) -> Result<&mut NameTable> {
        let err = self.wrong_kind(PageKind::Name);
        match &mut self.payload {
            Payload::Name(names) => Ok(names),
            _ => Err(err),
        }
    }

    pub fn records(&self) -> Result<&RecordSlots> {
        match &self.payload {
            Payload::Data(slots) => Ok(slots),
            _ => Err(self.wrong_kind(PageKind::Data)),
        }
    }

    pub fn records_mut(&mut self) -> Result<&mut RecordSlots> {
        let err = self.wrong_kind(PageKind::Data);
        match &mut self.payload {
            Payload::Data(slots) => Ok(slots),
            _ => Err(err),
        }
    }

    /// Checks the page kind, for pages fetched from a log or a backend.
    pub fn expect_kind(&self, kind: PageKind) -> Result<()> {
        if self.kind() == kind {
            Ok(())
        } else {
            Err(self.wrong_kind(kind))
        }
    }

    fn wrong_kind(&self, expected: PageKind) -> DbError {
        DbError::inconsistent(format!(
            "expected {:?} page, found {:?} (revision {})",
            expected,
            self.kind(),
            self.revision
        ))
    }
}

/// Pages are equal when their content and reference identities match.
impl PartialEq for Page {
    fn eq(&self, other: &Self) -> bool {
        self.revision == other.revision
            && self.references == other.references
            && self.payload == other.payload
    }
}

impl Eq for Page {}

fn payload_kind(payload: &Payload) -> PageKind {
    match payload {
        Payload::Uber(_) => PageKind::Uber,
        Payload::Indirect => PageKind::Indirect,
        Payload::RevisionRoot(_) => PageKind::RevisionRoot,
        Payload::Name(_) => PageKind::Name,
        Payload::Data(_) => PageKind::Data,
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
