//! Merging of SHF_MERGE|SHF_STRINGS sections. Each input section is split
//! into NUL-terminated pieces which are interned into the owning output
//! section's pool. Election of a winning section per piece and offset
//! assignment then run as data-parallel passes over the files.

use crate::error::Result;
use crate::hash::hash_bytes;
use crate::hash::PassThroughHashMap;
use crate::object_file::ObjectFile;
use crate::output_sections::SectionKey;
use ahash::AHashMap;
use anyhow::Context;
use rayon::prelude::*;
use std::hash::Hasher;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct MergedSectionId(u32);

impl MergedSectionId {
    pub(crate) fn from_usize(value: usize) -> MergedSectionId {
        MergedSectionId(value as u32)
    }

    pub(crate) fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// One unique string. The owner word packs `(priority << 32) | token` of the
/// currently winning mergeable section, so electing the lowest-priority owner
/// is a single-word CAS loop.
pub(crate) struct StringPiece<'data> {
    pub(crate) data: &'data [u8],
    owner: AtomicU64,

    /// Offset of this piece within the winning section's range of the output
    /// section. u64::MAX until assigned.
    pub(crate) output_offset: AtomicU64,

    /// Offset of the winning section's range within the output section.
    pub(crate) base: AtomicU64,
}

impl<'data> StringPiece<'data> {
    fn new(data: &'data [u8]) -> StringPiece<'data> {
        StringPiece {
            data,
            owner: AtomicU64::new(u64::MAX),
            output_offset: AtomicU64::new(u64::MAX),
            base: AtomicU64::new(0),
        }
    }

    /// Makes the section identified by `(priority, token)` the owner of this
    /// piece if its file priority is lower than the incumbent's.
    fn claim(&self, priority: u32, token: u32) {
        let candidate = (u64::from(priority) << 32) | u64::from(token);
        let mut current = self.owner.load(Relaxed);
        while candidate >> 32 < current >> 32 {
            match self
                .owner
                .compare_exchange_weak(current, candidate, Relaxed, Relaxed)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn is_owned_by(&self, token: u32) -> bool {
        self.owner.load(Relaxed) as u32 == token
    }

    /// The piece's offset within the merged output section. Valid once offset
    /// assignment is complete.
    pub(crate) fn offset_in_output(&self) -> u64 {
        self.base.load(Relaxed) + self.output_offset.load(Relaxed)
    }
}

/// A mergeable input section: the per-file view of its pieces.
pub(crate) struct MergeableSection<'ctx, 'data> {
    pub(crate) merged: MergedSectionId,

    /// Uniquely identifies this section in piece owner words.
    token: u32,

    /// The priority of the file this section came from.
    priority: u32,

    pieces: Vec<&'ctx StringPiece<'data>>,

    /// Offset of the start of each piece within the input section, parallel
    /// to `pieces`.
    piece_offsets: Vec<u32>,

    /// Total bytes of pieces this section won.
    pub(crate) size: u64,

    /// This section's offset within the merged output section.
    pub(crate) offset: u64,
}

impl<'ctx, 'data> MergeableSection<'ctx, 'data> {
    pub(crate) fn new(
        registry: &'ctx MergedRegistry<'data>,
        name: &'data [u8],
        sh_type: u32,
        sh_flags: u64,
        data: &'data [u8],
        priority: u32,
    ) -> Result<MergeableSection<'ctx, 'data>> {
        let (merged, section) = registry.add_or_get(SectionKey {
            name,
            sh_type,
            sh_flags,
        });
        let mut pieces = Vec::new();
        let mut piece_offsets = Vec::new();
        let mut remaining = data;
        let mut input_offset = 0u32;
        while !remaining.is_empty() {
            let len = memchr::memchr(0, remaining)
                .map(|i| i + 1)
                .context("string in mergeable section is not null-terminated")?;
            let (bytes, rest) = remaining.split_at(len);
            pieces.push(section.intern(bytes));
            piece_offsets.push(input_offset);
            input_offset += len as u32;
            remaining = rest;
        }
        Ok(MergeableSection {
            merged,
            token: registry.next_token(),
            priority,
            pieces,
            piece_offsets,
            size: 0,
            offset: 0,
        })
    }

    /// Pass 1: elect this section as the owner of each of its pieces if no
    /// lower-priority section contains them.
    pub(crate) fn claim_pieces(&self) {
        for piece in &self.pieces {
            piece.claim(self.priority, self.token);
        }
    }

    /// Pass 2: walk pieces in order and hand out offsets for the ones this
    /// section won. Winners are unique per piece, so no other section races
    /// on these stores.
    pub(crate) fn assign_piece_offsets(&mut self) {
        let mut offset = 0;
        for piece in &self.pieces {
            if piece.is_owned_by(self.token) && piece.output_offset.load(Relaxed) == u64::MAX {
                piece.output_offset.store(offset, Relaxed);
                offset += piece.data.len() as u64;
            }
        }
        self.size = offset;
    }

    /// After sequential offset assignment, tell won pieces where this
    /// section's range starts so that symbol addresses can be computed from
    /// the piece alone.
    pub(crate) fn publish_piece_bases(&self) {
        for piece in &self.pieces {
            if piece.is_owned_by(self.token) {
                piece.base.store(self.offset, Relaxed);
            }
        }
    }

    /// Resolves an offset within the input section to the owning piece and
    /// the remainder within it.
    pub(crate) fn piece_at(&self, input_offset: u64) -> Option<(&'ctx StringPiece<'data>, u64)> {
        let index = self
            .piece_offsets
            .partition_point(|&start| u64::from(start) <= input_offset)
            .checked_sub(1)?;
        let delta = input_offset - u64::from(self.piece_offsets[index]);
        Some((self.pieces[index], delta))
    }

    pub(crate) fn pieces(&self) -> &[&'ctx StringPiece<'data>] {
        &self.pieces
    }

    pub(crate) fn token(&self) -> u32 {
        self.token
    }
}

/// Runs the three coalescing passes over all live files: elect a winning
/// section per piece, assign piece offsets within each winning section, then
/// sequentially lay the sections out within their merged output sections.
/// Returns the total size of each merged output section.
#[tracing::instrument(skip_all, name = "Merge strings")]
pub(crate) fn coalesce_strings<'ctx, 'data>(
    files: &mut [ObjectFile<'ctx, 'data>],
    num_merged: usize,
) -> Vec<u64> {
    files.par_iter().for_each(|file| {
        if file.is_alive() {
            for section in file.mergeable_sections() {
                section.claim_pieces();
            }
        }
    });

    files.par_iter_mut().for_each(|file| {
        if file.is_alive() {
            for section in file.mergeable_sections_mut() {
                section.assign_piece_offsets();
            }
        }
    });

    // Section offsets accumulate in file-then-section order, which makes the
    // layout of each merged output section deterministic.
    let mut sizes = vec![0u64; num_merged];
    for file in files.iter_mut() {
        if !file.is_alive() {
            continue;
        }
        for section in file.mergeable_sections_mut() {
            section.offset = sizes[section.merged.as_usize()];
            sizes[section.merged.as_usize()] += section.size;
        }
    }

    files.par_iter().for_each(|file| {
        if file.is_alive() {
            for section in file.mergeable_sections() {
                section.publish_piece_bases();
            }
        }
    });
    sizes
}

/// A string together with its precomputed hash, used as the piece pool key.
#[derive(Clone, Copy, PartialEq, Eq)]
struct PieceBytes<'data> {
    hash: u64,
    bytes: &'data [u8],
}

impl<'data> std::hash::Hash for PieceBytes<'data> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

const SHARD_COUNT: usize = 16;

/// The pool of unique pieces for one merged output section.
pub(crate) struct MergedSection<'data> {
    shards: Vec<Mutex<PieceShard<'data>>>,
    num_pieces: AtomicU64,
}

#[derive(Default)]
struct PieceShard<'data> {
    map: PassThroughHashMap<PieceBytes<'data>, usize>,
    pieces: Vec<Box<StringPiece<'data>>>,
}

impl<'data> MergedSection<'data> {
    fn new() -> MergedSection<'data> {
        let mut shards = Vec::with_capacity(SHARD_COUNT);
        shards.resize_with(SHARD_COUNT, || Mutex::new(PieceShard::default()));
        MergedSection {
            shards,
            num_pieces: AtomicU64::new(0),
        }
    }

    /// Interns a piece, returning a reference that stays valid for the
    /// registry's lifetime.
    pub(crate) fn intern(&self, bytes: &'data [u8]) -> &StringPiece<'data> {
        let key = PieceBytes {
            hash: hash_bytes(bytes),
            bytes,
        };
        let mut shard = self.shards[key.hash as usize & (SHARD_COUNT - 1)]
            .lock()
            .unwrap();
        let index = match shard.map.get(&key) {
            Some(&index) => index,
            None => {
                let index = shard.pieces.len();
                shard.pieces.push(Box::new(StringPiece::new(bytes)));
                shard.map.insert(key, index);
                self.num_pieces.fetch_add(1, Relaxed);
                index
            }
        };
        let piece: *const StringPiece<'data> = &*shard.pieces[index];
        // Safety: pieces are individually boxed and never removed; only
        // shared references are handed out, tied to the registry's borrow.
        unsafe { &*piece }
    }

    pub(crate) fn num_pieces(&self) -> u64 {
        self.num_pieces.load(Relaxed)
    }
}

/// The registry of merged output sections, keyed like regular output sections
/// by `(name, sh_type, sh_flags)`.
pub(crate) struct MergedRegistry<'data> {
    state: Mutex<MergedState<'data>>,
    token_counter: AtomicU32,
}

#[derive(Default)]
struct MergedState<'data> {
    ids: AHashMap<SectionKey<'data>, usize>,
    sections: Vec<Box<MergedSection<'data>>>,
    keys: Vec<SectionKey<'data>>,
}

impl<'data> MergedRegistry<'data> {
    pub(crate) fn new() -> MergedRegistry<'data> {
        MergedRegistry {
            state: Mutex::new(MergedState::default()),
            token_counter: AtomicU32::new(1),
        }
    }

    pub(crate) fn add_or_get(
        &self,
        key: SectionKey<'data>,
    ) -> (MergedSectionId, &MergedSection<'data>) {
        let mut state = self.state.lock().unwrap();
        let index = match state.ids.get(&key) {
            Some(&index) => index,
            None => {
                let index = state.sections.len();
                state.sections.push(Box::new(MergedSection::new()));
                state.keys.push(key);
                state.ids.insert(key, index);
                index
            }
        };
        let section: *const MergedSection<'data> = &*state.sections[index];
        // Safety: sections are individually boxed and never removed; only
        // shared references are handed out, tied to the registry's borrow.
        (MergedSectionId(index as u32), unsafe { &*section })
    }

    fn next_token(&self) -> u32 {
        self.token_counter.fetch_add(1, Relaxed)
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().unwrap().keys.len()
    }

    pub(crate) fn keys(&self) -> Vec<SectionKey<'data>> {
        self.state.lock().unwrap().keys.clone()
    }

    pub(crate) fn num_pieces(&self) -> u64 {
        self.state
            .lock()
            .unwrap()
            .sections
            .iter()
            .map(|s| s.num_pieces())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mergeable<'ctx, 'data>(
        registry: &'ctx MergedRegistry<'data>,
        data: &'data [u8],
        priority: u32,
    ) -> MergeableSection<'ctx, 'data> {
        MergeableSection::new(
            registry,
            b".rodata.str1.1",
            object::elf::SHT_PROGBITS,
            u64::from(object::elf::SHF_ALLOC | object::elf::SHF_MERGE | object::elf::SHF_STRINGS),
            data,
            priority,
        )
        .unwrap()
    }

    #[test]
    fn test_identical_strings_collapse() {
        let registry = MergedRegistry::new();
        let mut a = mergeable(&registry, b"hello\0", 1);
        let mut b = mergeable(&registry, b"hello\0", 2);
        let mut c = mergeable(&registry, b"hello\0world\0", 3);

        a.claim_pieces();
        b.claim_pieces();
        c.claim_pieces();
        a.assign_piece_offsets();
        b.assign_piece_offsets();
        c.assign_piece_offsets();

        // The lowest-priority file owns "hello\0"; only file c owns "world\0".
        assert_eq!(a.size, 6);
        assert_eq!(b.size, 0);
        assert_eq!(c.size, 6);
        assert_eq!(registry.num_pieces(), 2);
    }

    #[test]
    fn test_unterminated_string_is_an_error() {
        let registry = MergedRegistry::new();
        assert!(MergeableSection::new(
            &registry,
            b".rodata.str1.1",
            object::elf::SHT_PROGBITS,
            0,
            b"no-terminator",
            1,
        )
        .is_err());
    }

    #[test]
    fn test_piece_lookup_by_offset() {
        let registry = MergedRegistry::new();
        let mut section = mergeable(&registry, b"ab\0cdef\0", 1);
        section.claim_pieces();
        section.assign_piece_offsets();
        section.publish_piece_bases();

        let (piece, delta) = section.piece_at(0).unwrap();
        assert_eq!(piece.data, b"ab\0");
        assert_eq!(delta, 0);

        let (piece, delta) = section.piece_at(5).unwrap();
        assert_eq!(piece.data, b"cdef\0");
        assert_eq!(delta, 2);
        assert_eq!(piece.offset_in_output(), 3);
    }

    #[test]
    fn test_duplicate_piece_within_one_section() {
        let registry = MergedRegistry::new();
        let mut section = mergeable(&registry, b"x\0x\0", 1);
        section.claim_pieces();
        section.assign_piece_offsets();
        // Both references resolve to the same piece at offset zero.
        assert_eq!(section.size, 2);
        let (first, _) = section.piece_at(0).unwrap();
        let (second, _) = section.piece_at(2).unwrap();
        assert!(std::ptr::eq(first, second));
    }
}
