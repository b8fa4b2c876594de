//! Output chunks: everything that occupies a range of the output file. A
//! chunk is a regular output section, a merged string section, one of the
//! synthetic sections, or one of the three headers. Polymorphism is a tagged
//! variant rather than a class hierarchy; content writing dispatches on the
//! tag in the writer.

use crate::elf;
use crate::merge::MergedSectionId;
use crate::output_sections::OutputSectionId;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum ChunkKind {
    Regular(OutputSectionId),
    Merged(MergedSectionId),
    Synthetic(Synthetic),
    Header(Header),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Synthetic {
    Got,
    Plt,
    GotPlt,
    RelaPlt,
    RelaDyn,
    Dynamic,
    Dynsym,
    Dynstr,
    Shstrtab,
    Symtab,
    Strtab,
    Hash,
    Interp,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Header {
    Ehdr,
    Phdr,
    Shdr,
}

pub(crate) struct Chunk<'data> {
    pub(crate) kind: ChunkKind,
    pub(crate) name: &'data [u8],
    pub(crate) shdr: elf::SectionHeader,
    /// Section header table index; 0 for headers.
    pub(crate) shndx: u32,
    pub(crate) starts_new_ptload: bool,
}

impl<'data> Chunk<'data> {
    pub(crate) fn new(kind: ChunkKind, name: &'data [u8]) -> Chunk<'data> {
        Chunk {
            kind,
            name,
            shdr: elf::SectionHeader::default(),
            shndx: 0,
            starts_new_ptload: false,
        }
    }

    pub(crate) fn is_header(&self) -> bool {
        matches!(self.kind, ChunkKind::Header(_))
    }

    pub(crate) fn is_nobits(&self) -> bool {
        self.shdr.ty == object::elf::SHT_NOBITS
    }

    pub(crate) fn is_alloc(&self) -> bool {
        self.shdr.flags & u64::from(object::elf::SHF_ALLOC) != 0
    }

    pub(crate) fn is_tls(&self) -> bool {
        self.shdr.flags & u64::from(object::elf::SHF_TLS) != 0
    }

    /// The number of bytes this chunk occupies in the file.
    pub(crate) fn file_size(&self) -> u64 {
        if self.is_nobits() {
            0
        } else {
            self.shdr.size
        }
    }
}

/// Ranks chunks so that a stable descending sort produces the order:
/// alloc-ro-data, alloc-ro-code, tdata, tbss, rw-data, bss, non-alloc. One
/// PT_LOAD then covers each run of equal protection.
pub(crate) fn section_rank(shdr: &elf::SectionHeader) -> u32 {
    let alloc = u32::from(shdr.flags & u64::from(object::elf::SHF_ALLOC) != 0);
    let writable = u32::from(shdr.flags & u64::from(object::elf::SHF_WRITE) != 0);
    let exec = u32::from(shdr.flags & u64::from(object::elf::SHF_EXECINSTR) != 0);
    let tls = u32::from(shdr.flags & u64::from(object::elf::SHF_TLS) != 0);
    let nobits = u32::from(shdr.ty == object::elf::SHT_NOBITS);
    (alloc << 5) | ((1 - writable) << 4) | ((1 - exec) << 3) | (tls << 2) | (1 - nobits)
}

/// Memory protection of a PT_LOAD covering `shdr`.
fn load_flags(shdr: &elf::SectionHeader) -> u32 {
    let mut flags = object::elf::PF_R;
    if shdr.flags & u64::from(object::elf::SHF_WRITE) != 0 {
        flags |= object::elf::PF_W;
    }
    if shdr.flags & u64::from(object::elf::SHF_EXECINSTR) != 0 {
        flags |= object::elf::PF_X;
    }
    flags
}

/// Decides where PT_LOAD segments begin, marking the first chunk of each.
/// Returns the total number of program headers so that the PHDR chunk can be
/// sized before offsets are assigned. Deterministic: depends only on chunk
/// order and flags.
pub(crate) fn plan_segments(chunks: &mut [Chunk]) -> u64 {
    let mut count = 1; // PT_PHDR
    let mut previous: Option<u32> = None;
    let mut has_tls = false;
    let mut has_dynamic = false;
    let mut has_interp = false;
    for chunk in chunks.iter_mut() {
        match chunk.kind {
            ChunkKind::Synthetic(Synthetic::Interp) => has_interp = true,
            ChunkKind::Synthetic(Synthetic::Dynamic) => has_dynamic = true,
            _ => {}
        }
        if chunk.is_tls() {
            has_tls = true;
        }
        if !chunk.is_alloc() {
            continue;
        }
        let flags = load_flags(&chunk.shdr);
        if previous != Some(flags) {
            chunk.starts_new_ptload = true;
            count += 1;
            previous = Some(flags);
        }
    }
    count + u64::from(has_tls) + u64::from(has_dynamic) + u64::from(has_interp)
}

/// Builds the final program headers from the laid-out chunks. Must produce
/// exactly as many entries as `plan_segments` counted.
pub(crate) fn build_program_headers(chunks: &[Chunk]) -> Vec<elf::ProgramHeader> {
    let mut headers = Vec::new();

    if let Some(phdr) = chunks
        .iter()
        .find(|c| c.kind == ChunkKind::Header(Header::Phdr))
    {
        headers.push(elf::ProgramHeader {
            segment_type: object::elf::PT_PHDR,
            flags: object::elf::PF_R,
            offset: phdr.shdr.offset,
            virtual_addr: phdr.shdr.address,
            physical_addr: phdr.shdr.address,
            file_size: phdr.shdr.size,
            mem_size: phdr.shdr.size,
            alignment: 8,
        });
    }
    if let Some(interp) = chunks
        .iter()
        .find(|c| c.kind == ChunkKind::Synthetic(Synthetic::Interp))
    {
        headers.push(segment_for(interp, object::elf::PT_INTERP, object::elf::PF_R, 1));
    }

    // One PT_LOAD per run marked by plan_segments.
    let mut load_start: Option<usize> = None;
    let alloc_chunks: Vec<&Chunk> = chunks.iter().filter(|c| c.is_alloc()).collect();
    for (index, chunk) in alloc_chunks.iter().enumerate() {
        if chunk.starts_new_ptload {
            if let Some(start) = load_start {
                headers.push(load_segment(&alloc_chunks[start..index]));
            }
            load_start = Some(index);
        }
    }
    if let Some(start) = load_start {
        headers.push(load_segment(&alloc_chunks[start..]));
    }

    if let Some(dynamic) = chunks
        .iter()
        .find(|c| c.kind == ChunkKind::Synthetic(Synthetic::Dynamic))
    {
        headers.push(segment_for(
            dynamic,
            object::elf::PT_DYNAMIC,
            object::elf::PF_R | object::elf::PF_W,
            8,
        ));
    }

    let tls_chunks: Vec<&Chunk> = chunks.iter().filter(|c| c.is_tls()).collect();
    if !tls_chunks.is_empty() {
        let first = tls_chunks.first().unwrap();
        let address = first.shdr.address;
        let file_end = tls_chunks
            .iter()
            .filter(|c| !c.is_nobits())
            .map(|c| c.shdr.offset + c.shdr.size)
            .max();
        let mem_end = tls_chunks
            .iter()
            .map(|c| c.shdr.address + c.shdr.size)
            .max()
            .unwrap();
        headers.push(elf::ProgramHeader {
            segment_type: object::elf::PT_TLS,
            flags: object::elf::PF_R,
            offset: first.shdr.offset,
            virtual_addr: address,
            physical_addr: address,
            file_size: file_end.map_or(0, |end| end - first.shdr.offset),
            mem_size: mem_end - address,
            alignment: tls_chunks.iter().map(|c| c.shdr.alignment).max().unwrap(),
        });
    }
    headers
}

fn segment_for(chunk: &Chunk, segment_type: u32, flags: u32, alignment: u64) -> elf::ProgramHeader {
    elf::ProgramHeader {
        segment_type,
        flags,
        offset: chunk.shdr.offset,
        virtual_addr: chunk.shdr.address,
        physical_addr: chunk.shdr.address,
        file_size: chunk.file_size(),
        mem_size: chunk.shdr.size,
        alignment,
    }
}

fn load_segment(chunks: &[&Chunk]) -> elf::ProgramHeader {
    let first = chunks.first().unwrap();
    let offset = first.shdr.offset;
    let address = first.shdr.address;
    let file_end = chunks
        .iter()
        .filter(|c| !c.is_nobits())
        .map(|c| c.shdr.offset + c.shdr.size)
        .max()
        .unwrap_or(offset);
    // tbss takes up no address space.
    let mem_end = chunks
        .iter()
        .filter(|c| !(c.is_nobits() && c.is_tls()))
        .map(|c| c.shdr.address + c.shdr.size)
        .max()
        .unwrap_or(address);
    elf::ProgramHeader {
        segment_type: object::elf::PT_LOAD,
        flags: load_flags(&first.shdr),
        offset,
        virtual_addr: address,
        physical_addr: address,
        file_size: file_end - offset,
        mem_size: mem_end - address,
        alignment: elf::PAGE_SIZE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shdr(sh_type: u32, flags: u64) -> elf::SectionHeader {
        elf::SectionHeader {
            ty: sh_type,
            flags,
            ..Default::default()
        }
    }

    #[test]
    fn test_section_rank_order() {
        let a = u64::from(object::elf::SHF_ALLOC);
        let w = u64::from(object::elf::SHF_WRITE);
        let x = u64::from(object::elf::SHF_EXECINSTR);
        let t = u64::from(object::elf::SHF_TLS);
        let progbits = object::elf::SHT_PROGBITS;
        let nobits = object::elf::SHT_NOBITS;

        let rodata = section_rank(&shdr(progbits, a));
        let text = section_rank(&shdr(progbits, a | x));
        let tdata = section_rank(&shdr(progbits, a | w | t));
        let tbss = section_rank(&shdr(nobits, a | w | t));
        let data = section_rank(&shdr(progbits, a | w));
        let bss = section_rank(&shdr(nobits, a | w));
        let debug = section_rank(&shdr(progbits, 0));

        let mut ranks = [rodata, text, tdata, tbss, data, bss, debug];
        let sorted = ranks;
        ranks.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(ranks, sorted, "ranks must already be in descending order");
    }

    #[test]
    fn test_plan_segments_marks_protection_changes() {
        let a = u64::from(object::elf::SHF_ALLOC);
        let w = u64::from(object::elf::SHF_WRITE);
        let x = u64::from(object::elf::SHF_EXECINSTR);
        let mut chunks = vec![
            Chunk::new(ChunkKind::Header(Header::Ehdr), b""),
            Chunk::new(ChunkKind::Header(Header::Phdr), b""),
            Chunk::new(ChunkKind::Regular(crate::output_sections::OutputSectionId::from_usize(0)), b".rodata"),
            Chunk::new(ChunkKind::Regular(crate::output_sections::OutputSectionId::from_usize(1)), b".text"),
            Chunk::new(ChunkKind::Regular(crate::output_sections::OutputSectionId::from_usize(2)), b".data"),
            Chunk::new(ChunkKind::Header(Header::Shdr), b""),
        ];
        chunks[0].shdr = shdr(object::elf::SHT_PROGBITS, a);
        chunks[1].shdr = shdr(object::elf::SHT_PROGBITS, a);
        chunks[2].shdr = shdr(object::elf::SHT_PROGBITS, a);
        chunks[3].shdr = shdr(object::elf::SHT_PROGBITS, a | x);
        chunks[4].shdr = shdr(object::elf::SHT_PROGBITS, a | w);

        // PT_PHDR + three loads (ro, rx, rw).
        assert_eq!(plan_segments(&mut chunks), 4);
        assert!(chunks[0].starts_new_ptload);
        assert!(!chunks[1].starts_new_ptload);
        assert!(!chunks[2].starts_new_ptload);
        assert!(chunks[3].starts_new_ptload);
        assert!(chunks[4].starts_new_ptload);
    }
}
