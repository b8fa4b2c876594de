//! A reader for classic `!<arch>` archives. We iterate over borrowed entry
//! data rather than going through an io::Read-style interface because member
//! bytes need to live as long as the mapped archive does.

use crate::error::Result;
use anyhow::bail;
use anyhow::Context;
use bytemuck::Pod;
use bytemuck::Zeroable;

pub(crate) const ARCHIVE_MAGIC: &[u8] = b"!<arch>\n";

pub(crate) enum ArchiveEntry<'data> {
    /// An actual member, usually a relocatable object.
    Member(ArchiveMember<'data>),

    /// The archive symbol table. We ignore it: the linker eagerly parses every
    /// member anyway, which for large links is faster than going through the
    /// table first.
    SymbolTable,

    /// The extended filename table ("//").
    Filenames(ExtendedFilenames<'data>),
}

pub(crate) struct ArchiveMember<'data> {
    ident: &'data str,
    pub(crate) data: &'data [u8],
}

#[derive(Clone, Copy)]
pub(crate) struct ExtendedFilenames<'data> {
    data: &'data [u8],
}

/// The name that identifies a member. Resolving it may require a lookup in the
/// extended filename table, so we defer that until the name is actually wanted
/// (usually only for diagnostics).
#[derive(Clone, Copy)]
pub(crate) struct MemberName<'data> {
    data: &'data [u8],
}

pub(crate) struct ArchiveIterator<'data> {
    remaining: &'data [u8],
}

#[derive(Zeroable, Pod, Clone, Copy)]
#[repr(C)]
struct MemberHeader {
    ident: [u8; 16],
    _timestamp: [u8; 12],
    _owner_id: [u8; 6],
    _group_id: [u8; 6],
    _mode: [u8; 8],
    size: [u8; 10],
    end: [u8; 2],
}

const MEMBER_HEADER_SIZE: usize = core::mem::size_of::<MemberHeader>();

const _ASSERTS: () = {
    assert!(MEMBER_HEADER_SIZE == 60);
};

impl<'data> ArchiveIterator<'data> {
    /// Creates an iterator from the bytes of a whole archive, including the
    /// leading magic.
    pub(crate) fn from_archive_bytes(data: &'data [u8]) -> Result<Self> {
        let Some(remaining) = data.strip_prefix(ARCHIVE_MAGIC) else {
            bail!("missing !<arch> header");
        };
        Ok(Self { remaining })
    }

    fn next_entry(&mut self) -> Result<Option<ArchiveEntry<'data>>> {
        if self.remaining.is_empty() {
            return Ok(None);
        }
        if self.remaining.len() < MEMBER_HEADER_SIZE {
            bail!("short member header");
        }
        let (header, rest) = self.remaining.split_at(MEMBER_HEADER_SIZE);
        let header: &MemberHeader = bytemuck::from_bytes(header);
        let size = parse_decimal(&header.size);
        if rest.len() < size {
            bail!("member size is {size}, but only {} bytes left", rest.len());
        }
        let ident = std::str::from_utf8(&header.ident)
            .context("archive member name is invalid UTF-8")?
            .trim_end();
        let data = &rest[..size];
        // Members are 2-byte aligned; a padding byte follows odd-sized ones.
        let advance = size.next_multiple_of(2).min(rest.len());
        self.remaining = &rest[advance..];
        let entry = match ident {
            "/" => ArchiveEntry::SymbolTable,
            "//" => ArchiveEntry::Filenames(ExtendedFilenames { data }),
            _ => ArchiveEntry::Member(ArchiveMember { ident, data }),
        };
        Ok(Some(entry))
    }
}

impl<'data> Iterator for ArchiveIterator<'data> {
    type Item = Result<ArchiveEntry<'data>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

fn parse_decimal(bytes: &[u8]) -> usize {
    let mut value = 0;
    for &byte in bytes {
        if !byte.is_ascii_digit() {
            break;
        }
        value = value * 10 + usize::from(byte - b'0');
    }
    value
}

impl<'data> ArchiveMember<'data> {
    pub(crate) fn name(&self, extended: Option<ExtendedFilenames<'data>>) -> MemberName<'data> {
        if let Some(filenames) = extended {
            if let Some(offset) = self
                .ident
                .strip_prefix('/')
                .and_then(|rest| rest.parse::<usize>().ok())
            {
                if offset < filenames.data.len() {
                    return MemberName {
                        data: &filenames.data[offset..],
                    };
                }
            }
        }
        MemberName {
            data: self.ident.as_bytes(),
        }
    }
}

impl<'data> MemberName<'data> {
    pub(crate) fn as_slice(&self) -> &'data [u8] {
        let end = memchr::memchr(b'/', self.data).unwrap_or(self.data.len());
        &self.data[..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds an archive in memory from (ident, data) pairs.
    fn build_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = Vec::from(ARCHIVE_MAGIC);
        for (ident, data) in entries {
            out.extend_from_slice(format!("{ident:<16}").as_bytes());
            out.extend_from_slice(b"0           "); // timestamp
            out.extend_from_slice(b"0     0     "); // owner, group
            out.extend_from_slice(b"644     "); // mode
            out.extend_from_slice(format!("{:<10}", data.len()).as_bytes());
            out.extend_from_slice(b"`\n");
            out.extend_from_slice(data);
            if data.len() % 2 == 1 {
                out.push(b'\n');
            }
        }
        out
    }

    #[test]
    fn test_iterate_members() {
        let archive = build_archive(&[("x.o/", b"xxx"), ("y.o/", b"yyyy")]);
        let entries: Vec<_> = ArchiveIterator::from_archive_bytes(&archive)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(entries.len(), 2);
        let ArchiveEntry::Member(first) = &entries[0] else {
            panic!("expected member");
        };
        assert_eq!(first.name(None).as_slice(), b"x.o");
        assert_eq!(first.data, b"xxx");
        let ArchiveEntry::Member(second) = &entries[1] else {
            panic!("expected member");
        };
        assert_eq!(second.data, b"yyyy");
    }

    #[test]
    fn test_extended_filenames() {
        let names = b"a-very-long-member-name.o/\nanother.o/\n";
        let archive = build_archive(&[("//", names), ("/27", b"zz")]);
        let mut iter = ArchiveIterator::from_archive_bytes(&archive).unwrap();
        let Some(Ok(ArchiveEntry::Filenames(filenames))) = iter.next() else {
            panic!("expected filename table");
        };
        let Some(Ok(ArchiveEntry::Member(member))) = iter.next() else {
            panic!("expected member");
        };
        assert_eq!(member.name(Some(filenames)).as_slice(), b"another.o");
    }

    #[test]
    fn test_bad_magic() {
        assert!(ArchiveIterator::from_archive_bytes(b"not-an-archive").is_err());
    }

    #[test]
    fn test_truncated_member() {
        let mut archive = build_archive(&[("x.o/", b"xxxx")]);
        archive.truncate(archive.len() - 2);
        let result: Result<Vec<_>> = ArchiveIterator::from_archive_bytes(&archive)
            .unwrap()
            .collect();
        assert!(result.is_err());
    }
}
