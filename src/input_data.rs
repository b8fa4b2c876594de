//! Opens and memory-maps the input files, then flattens archives into a
//! single ordered list of ELF inputs. The order of that list is load-bearing:
//! a file's index determines its resolution priority, so primary files come
//! first in command-line order, followed by archive members in enumeration
//! order.

use crate::archive::ArchiveEntry;
use crate::archive::ArchiveIterator;
use crate::archive::MemberName;
use crate::args::Args;
use crate::error::Result;
use crate::file_kind::FileKind;
use anyhow::bail;
use anyhow::Context;
use memmap2::Mmap;
use rayon::prelude::*;
use std::path::PathBuf;

pub(crate) struct InputData {
    files: Vec<InputFile>,
}

pub(crate) struct InputFile {
    pub(crate) filename: PathBuf,
    pub(crate) kind: FileKind,
    bytes: Mmap,
}

/// One ELF input: either a file named on the command line or an archive
/// member.
pub(crate) struct InputBytes<'data> {
    pub(crate) input: InputRef<'data>,
    pub(crate) kind: FileKind,
    pub(crate) data: &'data [u8],
}

/// Identifies an input for diagnostics. The member name is present when the
/// input came out of an archive.
#[derive(Clone, Copy)]
pub(crate) struct InputRef<'data> {
    pub(crate) file: &'data InputFile,
    pub(crate) member: Option<MemberName<'data>>,
}

impl InputFile {
    pub(crate) fn data(&self) -> &[u8] {
        &self.bytes
    }
}

impl InputData {
    #[tracing::instrument(skip_all, name = "Open input files")]
    pub(crate) fn from_args(args: &Args) -> Result<InputData> {
        let files = args
            .inputs
            .iter()
            .map(|path| {
                let file = std::fs::File::open(path)
                    .with_context(|| format!("cannot open {}", path.display()))?;

                // Safety: this is only sound as long as nothing truncates or
                // rewrites the input files while we have them mapped. There's
                // no way to defend against that on Linux, and reading
                // everything up front would defeat the point of mapping, so
                // like other linkers we accept the compromise.
                let bytes = unsafe { Mmap::map(&file) }
                    .with_context(|| format!("{}: mmap failed", path.display()))?;

                let kind = FileKind::identify_bytes(&bytes)
                    .with_context(|| format!("{}", path.display()))?;
                Ok(InputFile {
                    filename: path.clone(),
                    kind,
                    bytes,
                })
            })
            .collect::<Result<Vec<InputFile>>>()?;
        Ok(InputData { files })
    }

    /// Produces the flat, priority-ordered list of ELF inputs.
    #[tracing::instrument(skip_all, name = "Split archives")]
    pub(crate) fn split_inputs(&self) -> Result<Vec<InputBytes>> {
        let per_file = self
            .files
            .par_iter()
            .map(|file| match file.kind {
                FileKind::Archive => archive_members(file),
                kind => Ok(vec![InputBytes {
                    input: InputRef { file, member: None },
                    kind,
                    data: file.data(),
                }]),
            })
            .collect::<Result<Vec<Vec<InputBytes>>>>()?;

        // Primary files first, archive members after, with relative order
        // preserved within each class.
        let mut inputs = Vec::new();
        for (file, entries) in self.files.iter().zip(&per_file) {
            if file.kind != FileKind::Archive {
                inputs.extend(entries.iter().map(InputBytes::clone));
            }
        }
        for (file, entries) in self.files.iter().zip(&per_file) {
            if file.kind == FileKind::Archive {
                inputs.extend(entries.iter().map(InputBytes::clone));
            }
        }
        Ok(inputs)
    }
}

fn archive_members(file: &InputFile) -> Result<Vec<InputBytes>> {
    let mut extended_filenames = None;
    let mut members = Vec::new();
    for entry in ArchiveIterator::from_archive_bytes(file.data())? {
        match entry.with_context(|| format!("{}: malformed archive", file.filename.display()))? {
            ArchiveEntry::SymbolTable => {}
            ArchiveEntry::Filenames(table) => extended_filenames = Some(table),
            ArchiveEntry::Member(member) => {
                if member.data.is_empty() {
                    continue;
                }
                let name = member.name(extended_filenames);
                let kind = FileKind::identify_bytes(member.data).with_context(|| {
                    format!(
                        "{} @ {}",
                        file.filename.display(),
                        String::from_utf8_lossy(name.as_slice())
                    )
                })?;
                if kind != FileKind::ElfObject {
                    bail!(
                        "{} @ {}: archive members must be relocatable objects",
                        file.filename.display(),
                        String::from_utf8_lossy(name.as_slice())
                    );
                }
                members.push(InputBytes {
                    input: InputRef {
                        file,
                        member: Some(name),
                    },
                    kind,
                    data: member.data,
                });
            }
        }
    }
    Ok(members)
}

impl<'data> Clone for InputBytes<'data> {
    fn clone(&self) -> Self {
        InputBytes {
            input: self.input,
            kind: self.kind,
            data: self.data,
        }
    }
}

impl<'data> std::fmt::Display for InputRef<'data> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.file.filename.display(), f)?;
        if let Some(member) = &self.member {
            write!(f, " @ {}", String::from_utf8_lossy(member.as_slice()))?;
        }
        Ok(())
    }
}
