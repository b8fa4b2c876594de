//! Layout: bins input sections into output sections, assigns intra-section
//! offsets in parallel, assembles the master chunk list, walks file offsets
//! and virtual addresses, and pins down the linker-synthesized symbols.

use crate::chunk;
use crate::chunk::Chunk;
use crate::chunk::ChunkKind;
use crate::chunk::Header;
use crate::chunk::Synthetic;
use crate::context::Context;
use crate::elf;
use crate::object_file::InputSection;
use crate::object_file::ObjectFile;
use crate::object_file::SectionAddrs;
use crate::object_file::SectionSlot;
use crate::output_sections::OutputSectionId;
use crate::output_sections::SectionKey;
use crate::scan::SyntheticTables;
use crate::symbol::Symbol;
use crate::symbol::SymbolName;
use rayon::prelude::*;
use std::sync::atomic::Ordering::Relaxed;

/// How many shards to split the file list into when binning.
const BIN_SHARDS: usize = 128;

/// Maximum number of members per slice when assigning intra-section offsets.
const OFFSET_SLICE: usize = 100_000;

/// Identifies one input section: an index into the file list plus an index
/// into that file's section slots.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SectionRef {
    pub(crate) file: u32,
    pub(crate) slot: u32,
}

pub(crate) fn align_to(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return value;
    }
    value.next_multiple_of(alignment)
}

pub(crate) fn input_section<'a, 'ctx, 'data>(
    files: &'a [ObjectFile<'ctx, 'data>],
    section: SectionRef,
) -> &'a InputSection<'data> {
    match &files[section.file as usize].sections[section.slot as usize] {
        SectionSlot::Regular(isec) => isec,
        _ => unreachable!("member lists only reference regular sections"),
    }
}

/// Builds the reverse edge from output sections to their input sections.
/// Files are processed in parallel shards; per-shard results are then
/// concatenated in shard order, so the member order of every output section
/// is deterministic and no two threads contend on the same list.
#[tracing::instrument(skip_all, name = "Bin sections")]
pub(crate) fn bin_sections<'ctx, 'data>(
    files: &[ObjectFile<'ctx, 'data>],
    num_sections: usize,
) -> Vec<Vec<SectionRef>> {
    let unit = files.len().div_ceil(BIN_SHARDS).max(1);
    let shards: Vec<Vec<Vec<SectionRef>>> = files
        .par_chunks(unit)
        .enumerate()
        .map(|(shard_index, shard)| {
            let mut per_section = vec![Vec::new(); num_sections];
            for (file_offset, file) in shard.iter().enumerate() {
                if !file.is_alive() {
                    continue;
                }
                let file_index = (shard_index * unit + file_offset) as u32;
                for (slot_index, slot) in file.sections.iter().enumerate() {
                    if let SectionSlot::Regular(isec) = slot {
                        per_section[isec.out_section.as_usize()].push(SectionRef {
                            file: file_index,
                            slot: slot_index as u32,
                        });
                    }
                }
            }
            per_section
        })
        .collect();

    let mut members = vec![Vec::new(); num_sections];
    members
        .par_iter_mut()
        .enumerate()
        .for_each(|(section_index, list)| {
            let total = shards.iter().map(|s| s[section_index].len()).sum();
            list.reserve(total);
            for shard in &shards {
                list.extend_from_slice(&shard[section_index]);
            }
        });
    members
}

/// Assigns each input section its offset within its output section. Members
/// are cut into slices; each slice lays out from zero in parallel, then a
/// cheap sequential reduction positions the slices and a parallel pass
/// shifts them. Returns each output section's size and alignment.
#[tracing::instrument(skip_all, name = "Assign section offsets")]
pub(crate) fn set_isec_offsets<'ctx, 'data>(
    files: &[ObjectFile<'ctx, 'data>],
    members: &[Vec<SectionRef>],
) -> (Vec<u64>, Vec<u64>) {
    let per_section: Vec<(u64, u64)> = members
        .par_iter()
        .map(|list| {
            if list.is_empty() {
                return (0, 1);
            }
            let slices: Vec<&[SectionRef]> = list.chunks(OFFSET_SLICE).collect();
            let slice_layouts: Vec<(u64, u64)> = slices
                .par_iter()
                .map(|slice| {
                    let mut offset = 0;
                    let mut alignment = 1;
                    for &section in *slice {
                        let isec = input_section(files, section);
                        offset = align_to(offset, isec.sh_addralign);
                        isec.offset.store(offset, Relaxed);
                        offset += isec.size;
                        alignment = alignment.max(isec.sh_addralign);
                    }
                    (offset, alignment)
                })
                .collect();

            let alignment = slice_layouts.iter().map(|l| l.1).max().unwrap();
            let mut starts = vec![0u64; slices.len()];
            for i in 1..slices.len() {
                starts[i] = align_to(starts[i - 1] + slice_layouts[i - 1].0, alignment);
            }
            slices
                .par_iter()
                .zip(&starts)
                .skip(1)
                .for_each(|(slice, &start)| {
                    for &section in *slice {
                        input_section(files, section).offset.fetch_add(start, Relaxed);
                    }
                });
            (starts.last().unwrap() + slice_layouts.last().unwrap().0, alignment)
        })
        .collect();
    per_section.into_iter().unzip()
}

/// Builds chunks for the regular and merged output sections, stably sorted
/// by `(name, sh_type, sh_flags)` so the output doesn't depend on the order
/// sections were registered in. Empty sections are dropped.
pub(crate) fn build_section_chunks<'data>(
    section_keys: &[SectionKey<'data>],
    section_sizes: &[u64],
    section_aligns: &[u64],
    merged_keys: &[SectionKey<'data>],
    merged_sizes: &[u64],
) -> Vec<Chunk<'data>> {
    let mut chunks = Vec::new();

    let mut order: Vec<usize> = (0..section_keys.len()).collect();
    order.sort_by_key(|&i| {
        let key = &section_keys[i];
        (key.name, key.sh_type, key.sh_flags)
    });
    for index in order {
        if section_sizes[index] == 0 {
            continue;
        }
        let key = section_keys[index];
        let mut chunk = Chunk::new(
            ChunkKind::Regular(OutputSectionId::from_usize(index)),
            key.name,
        );
        chunk.shdr.ty = key.sh_type;
        chunk.shdr.flags = key.sh_flags;
        chunk.shdr.size = section_sizes[index];
        chunk.shdr.alignment = section_aligns[index];
        chunks.push(chunk);
    }

    let mut order: Vec<usize> = (0..merged_keys.len()).collect();
    order.sort_by_key(|&i| {
        let key = &merged_keys[i];
        (key.name, key.sh_type, key.sh_flags)
    });
    for index in order {
        if merged_sizes[index] == 0 {
            continue;
        }
        let key = merged_keys[index];
        let mut chunk = Chunk::new(
            ChunkKind::Merged(crate::merge::MergedSectionId::from_usize(index)),
            key.name,
        );
        chunk.shdr.ty = key.sh_type;
        chunk.shdr.flags = key.sh_flags;
        chunk.shdr.size = merged_sizes[index];
        chunk.shdr.alignment = 1;
        chunk.shdr.entsize = 1;
        chunks.push(chunk);
    }
    chunks
}

pub(crate) fn section_names<'data>(chunks: &[Chunk<'data>]) -> Vec<&'data [u8]> {
    chunks.iter().map(|c| c.name).collect()
}

/// Completes the master chunk list: adds the synthetic sections and headers,
/// sorts by segment rank, assigns section indices and names, and fills in
/// the section-header cross-links. Returns the chunk list and the .shstrtab
/// contents.
#[tracing::instrument(skip_all, name = "Finalize chunks")]
pub(crate) fn finalize_chunks<'ctx, 'data>(
    mut chunks: Vec<Chunk<'data>>,
    tables: &SyntheticTables<'ctx, 'data>,
    ctx: &Context<'data>,
    num_symtab_locals: u64,
    num_symtab_globals: u64,
    strtab_size: u64,
) -> (Vec<Chunk<'data>>, Vec<u8>) {
    let is_static = ctx.args.is_static;
    let a = u64::from(object::elf::SHF_ALLOC);
    let w = u64::from(object::elf::SHF_WRITE);
    let x = u64::from(object::elf::SHF_EXECINSTR);

    let synthetic = |name: &'data [u8],
                         kind: Synthetic,
                         ty: u32,
                         flags: u64,
                         size: u64,
                         alignment: u64,
                         entsize: u64| {
        let mut chunk = Chunk::new(ChunkKind::Synthetic(kind), name);
        chunk.shdr.ty = ty;
        chunk.shdr.flags = flags;
        chunk.shdr.size = size;
        chunk.shdr.alignment = alignment;
        chunk.shdr.entsize = entsize;
        chunk
    };

    let progbits = object::elf::SHT_PROGBITS;
    chunks.push(synthetic(b".got", Synthetic::Got, progbits, a | w, tables.got_size, 8, 0));
    chunks.push(synthetic(
        b".plt",
        Synthetic::Plt,
        progbits,
        a | x,
        tables.plt_size,
        16,
        elf::PLT_ENTRY_SIZE,
    ));
    chunks.push(synthetic(
        b".got.plt",
        Synthetic::GotPlt,
        progbits,
        a | w,
        tables.gotplt_size,
        8,
        elf::GOT_ENTRY_SIZE,
    ));
    chunks.push(synthetic(
        b".rela.plt",
        Synthetic::RelaPlt,
        object::elf::SHT_RELA,
        a,
        tables.relplt_size,
        8,
        elf::RELA_ENTRY_SIZE,
    ));
    if !is_static {
        let num_dynsym = tables.dynsyms.len() as u64 + 1;
        chunks.push(synthetic(
            b".rela.dyn",
            Synthetic::RelaDyn,
            object::elf::SHT_RELA,
            a,
            tables.reldyn_size,
            8,
            elf::RELA_ENTRY_SIZE,
        ));
        let num_dynamic = tables.needed_offsets.len() as u64 + 13;
        chunks.push(synthetic(
            b".dynamic",
            Synthetic::Dynamic,
            object::elf::SHT_DYNAMIC,
            a | w,
            num_dynamic * elf::DYNAMIC_ENTRY_SIZE,
            8,
            elf::DYNAMIC_ENTRY_SIZE,
        ));
        let mut dynsym = synthetic(
            b".dynsym",
            Synthetic::Dynsym,
            object::elf::SHT_DYNSYM,
            a,
            num_dynsym * elf::SYMTAB_ENTRY_SIZE,
            8,
            elf::SYMTAB_ENTRY_SIZE,
        );
        dynsym.shdr.info = 1;
        chunks.push(dynsym);
        chunks.push(synthetic(
            b".dynstr",
            Synthetic::Dynstr,
            object::elf::SHT_STRTAB,
            a,
            tables.dynstr.len() as u64,
            1,
            0,
        ));
        chunks.push(synthetic(
            b".hash",
            Synthetic::Hash,
            object::elf::SHT_HASH,
            a,
            (2 + 2 * num_dynsym) * 4,
            4,
            4,
        ));
    }
    chunks.push(synthetic(
        b".shstrtab",
        Synthetic::Shstrtab,
        object::elf::SHT_STRTAB,
        0,
        0,
        1,
        0,
    ));
    let mut symtab = synthetic(
        b".symtab",
        Synthetic::Symtab,
        object::elf::SHT_SYMTAB,
        0,
        (1 + num_symtab_locals + num_symtab_globals) * elf::SYMTAB_ENTRY_SIZE,
        8,
        elf::SYMTAB_ENTRY_SIZE,
    );
    symtab.shdr.info = 1 + num_symtab_locals as u32;
    chunks.push(symtab);
    chunks.push(synthetic(
        b".strtab",
        Synthetic::Strtab,
        object::elf::SHT_STRTAB,
        0,
        strtab_size,
        1,
        0,
    ));

    // Sort so we need as few segments as possible. The sort is stable, so
    // the name-sorted order survives within each rank.
    chunks.sort_by(|p, q| chunk::section_rank(&q.shdr).cmp(&chunk::section_rank(&p.shdr)));

    // Headers go at the very start (and the section header table at the
    // end), outside the rank order.
    let mut ehdr = Chunk::new(ChunkKind::Header(Header::Ehdr), b"");
    ehdr.shdr.ty = progbits;
    ehdr.shdr.flags = a;
    ehdr.shdr.size = elf::FILE_HEADER_SIZE;
    ehdr.shdr.alignment = 8;
    let mut phdr = Chunk::new(ChunkKind::Header(Header::Phdr), b"");
    phdr.shdr.ty = progbits;
    phdr.shdr.flags = a;
    phdr.shdr.alignment = 8;
    chunks.insert(0, ehdr);
    chunks.insert(1, phdr);
    if !is_static {
        let path = ctx.args.interpreter_path().as_os_str().as_encoded_bytes();
        let interp = synthetic(
            b".interp",
            Synthetic::Interp,
            progbits,
            a,
            path.len() as u64 + 1,
            1,
            0,
        );
        chunks.insert(2, interp);
    }
    let mut shdr = Chunk::new(ChunkKind::Header(Header::Shdr), b"");
    shdr.shdr.alignment = 8;
    chunks.push(shdr);

    let num_phdrs = chunk::plan_segments(&mut chunks);
    let num_sections = chunks.iter().filter(|c| !c.is_header()).count() as u64;
    for chunk in chunks.iter_mut() {
        match chunk.kind {
            ChunkKind::Header(Header::Phdr) => {
                chunk.shdr.size = num_phdrs * elf::PROGRAM_HEADER_SIZE;
            }
            ChunkKind::Header(Header::Shdr) => {
                chunk.shdr.size = (num_sections + 1) * elf::SECTION_HEADER_SIZE;
            }
            _ => {}
        }
    }

    // Section indices, then names.
    let mut shndx = 1;
    let mut shstrtab = vec![0u8];
    for chunk in chunks.iter_mut() {
        if chunk.is_header() {
            continue;
        }
        chunk.shndx = shndx;
        shndx += 1;
        chunk.shdr.name = shstrtab.len() as u32;
        shstrtab.extend_from_slice(chunk.name);
        shstrtab.push(0);
    }
    if let Some(chunk) = find_synthetic_mut(&mut chunks, Synthetic::Shstrtab) {
        chunk.shdr.size = shstrtab.len() as u64;
    }

    // Cross-links between section headers.
    let shndx_of = |chunks: &[Chunk], kind: Synthetic| {
        chunks
            .iter()
            .find(|c| c.kind == ChunkKind::Synthetic(kind))
            .map_or(0, |c| c.shndx)
    };
    let strtab_shndx = shndx_of(&chunks, Synthetic::Strtab);
    let dynsym_shndx = shndx_of(&chunks, Synthetic::Dynsym);
    let dynstr_shndx = shndx_of(&chunks, Synthetic::Dynstr);
    for chunk in chunks.iter_mut() {
        match chunk.kind {
            ChunkKind::Synthetic(Synthetic::Symtab) => chunk.shdr.link = strtab_shndx,
            ChunkKind::Synthetic(Synthetic::RelaPlt)
            | ChunkKind::Synthetic(Synthetic::RelaDyn)
            | ChunkKind::Synthetic(Synthetic::Hash) => chunk.shdr.link = dynsym_shndx,
            ChunkKind::Synthetic(Synthetic::Dynsym)
            | ChunkKind::Synthetic(Synthetic::Dynamic) => chunk.shdr.link = dynstr_shndx,
            _ => {}
        }
    }

    (chunks, shstrtab)
}

pub(crate) fn find_synthetic<'a, 'data>(
    chunks: &'a [Chunk<'data>],
    kind: Synthetic,
) -> Option<&'a Chunk<'data>> {
    chunks.iter().find(|c| c.kind == ChunkKind::Synthetic(kind))
}

fn find_synthetic_mut<'a, 'data>(
    chunks: &'a mut [Chunk<'data>],
    kind: Synthetic,
) -> Option<&'a mut Chunk<'data>> {
    chunks
        .iter_mut()
        .find(|c| c.kind == ChunkKind::Synthetic(kind))
}

/// Walks the chunk list assigning file offsets and virtual addresses. Within
/// a PT_LOAD, file offsets and addresses stay congruent modulo the page
/// size; NOBITS chunks consume address space but no file space, except tbss
/// which consumes neither. Returns the final file size.
#[tracing::instrument(skip_all, name = "Assign chunk offsets")]
pub(crate) fn assign_chunk_offsets(chunks: &mut [Chunk]) -> u64 {
    let mut fileoff = 0u64;
    let mut vaddr = elf::IMAGE_BASE;
    for chunk in chunks.iter_mut() {
        if chunk.starts_new_ptload {
            vaddr = align_to(vaddr, elf::PAGE_SIZE);
        }
        let is_bss = chunk.is_nobits();
        if !is_bss {
            if vaddr % elf::PAGE_SIZE > fileoff % elf::PAGE_SIZE {
                fileoff += vaddr % elf::PAGE_SIZE - fileoff % elf::PAGE_SIZE;
            } else if vaddr % elf::PAGE_SIZE < fileoff % elf::PAGE_SIZE {
                fileoff = align_to(fileoff, elf::PAGE_SIZE) + vaddr % elf::PAGE_SIZE;
            }
        }
        fileoff = align_to(fileoff, chunk.shdr.alignment.max(1));
        vaddr = align_to(vaddr, chunk.shdr.alignment.max(1));
        chunk.shdr.offset = fileoff;
        if chunk.is_alloc() {
            chunk.shdr.address = vaddr;
        }
        if !is_bss {
            fileoff += chunk.shdr.size;
        }
        let is_tbss = is_bss && chunk.is_tls();
        if !is_tbss {
            vaddr += chunk.shdr.size;
        }
    }
    fileoff
}

/// Fixes the addresses of linker-synthesized symbols now that layout is
/// final. Only symbols the internal file still owns are touched; user
/// definitions win.
#[tracing::instrument(skip_all, name = "Fix synthetic symbols")]
pub(crate) fn fix_synthetic_symbols<'ctx, 'data>(
    ctx: &'ctx Context<'data>,
    chunks: &[Chunk<'data>],
    internal: &ObjectFile<'ctx, 'data>,
) {
    let set_start = |sym: &Symbol, chunk: &Chunk| {
        if internal.owns(sym) {
            sym.addr.store(chunk.shdr.address, Relaxed);
            sym.out_shndx.store(i64::from(chunk.shndx), Relaxed);
        }
    };
    let set_stop = |sym: &Symbol, chunk: &Chunk| {
        if internal.owns(sym) {
            sym.addr.store(chunk.shdr.address + chunk.shdr.size, Relaxed);
            sym.out_shndx.store(i64::from(chunk.shndx), Relaxed);
        }
    };
    let lookup = |name: &'static [u8]| ctx.symbols.intern(SymbolName::new(name));

    if let Some(bss) = chunks
        .iter()
        .find(|c| matches!(c.kind, ChunkKind::Regular(_)) && c.name == b".bss")
    {
        set_start(lookup(b"__bss_start"), bss);
    }
    if let Some(first) = chunks.iter().find(|c| c.shndx == 1) {
        let ehdr = &chunks[0];
        let sym = lookup(b"__ehdr_start");
        if internal.owns(sym) {
            sym.addr.store(ehdr.shdr.address, Relaxed);
            sym.out_shndx.store(i64::from(first.shndx), Relaxed);
        }
    }
    if let Some(relplt) = find_synthetic(chunks, Synthetic::RelaPlt) {
        set_start(lookup(b"__rela_iplt_start"), relplt);
        set_stop(lookup(b"__rela_iplt_end"), relplt);
    }
    for chunk in chunks {
        match chunk.shdr.ty {
            object::elf::SHT_INIT_ARRAY => {
                set_start(lookup(b"__init_array_start"), chunk);
                set_stop(lookup(b"__init_array_end"), chunk);
            }
            object::elf::SHT_FINI_ARRAY => {
                set_start(lookup(b"__fini_array_start"), chunk);
                set_stop(lookup(b"__fini_array_end"), chunk);
            }
            _ => {}
        }
    }
    for chunk in chunks {
        if chunk.is_header() {
            continue;
        }
        if chunk.is_alloc() {
            set_stop(lookup(b"_end"), chunk);
            set_stop(lookup(b"end"), chunk);
        }
        if chunk.shdr.flags & u64::from(object::elf::SHF_EXECINSTR) != 0 {
            set_stop(lookup(b"_etext"), chunk);
            set_stop(lookup(b"etext"), chunk);
        }
        if !chunk.is_nobits() && chunk.is_alloc() {
            set_stop(lookup(b"_edata"), chunk);
            set_stop(lookup(b"edata"), chunk);
        }
    }
    if let Some(dynamic) = find_synthetic(chunks, Synthetic::Dynamic) {
        set_start(lookup(b"_DYNAMIC"), dynamic);
    }
    if let Some(gotplt) = find_synthetic(chunks, Synthetic::GotPlt) {
        set_start(lookup(b"_GLOBAL_OFFSET_TABLE_"), gotplt);
    }
    for (section_name, start, stop) in &internal.start_stop_syms {
        if let Some(chunk) = chunks
            .iter()
            .find(|c| !c.is_header() && c.name == *section_name)
        {
            set_start(start, chunk);
            set_stop(stop, chunk);
        }
    }
}

/// Gathers the addresses later phases need from the laid-out chunks.
pub(crate) fn section_addrs(
    chunks: &[Chunk],
    num_sections: usize,
    num_merged: usize,
) -> SectionAddrs {
    let mut addrs = SectionAddrs {
        osec_addr: vec![0; num_sections],
        osec_shndx: vec![0; num_sections],
        merged_addr: vec![0; num_merged],
        merged_shndx: vec![0; num_merged],
        got_base: 0,
        plt_base: 0,
        gotplt_base: 0,
        tls_end: 0,
    };
    for chunk in chunks {
        match chunk.kind {
            ChunkKind::Regular(id) => {
                addrs.osec_addr[id.as_usize()] = chunk.shdr.address;
                addrs.osec_shndx[id.as_usize()] = chunk.shndx;
            }
            ChunkKind::Merged(id) => {
                addrs.merged_addr[id.as_usize()] = chunk.shdr.address;
                addrs.merged_shndx[id.as_usize()] = chunk.shndx;
            }
            ChunkKind::Synthetic(Synthetic::Got) => addrs.got_base = chunk.shdr.address,
            ChunkKind::Synthetic(Synthetic::Plt) => addrs.plt_base = chunk.shdr.address,
            ChunkKind::Synthetic(Synthetic::GotPlt) => addrs.gotplt_base = chunk.shdr.address,
            _ => {}
        }
        if chunk.is_tls() {
            addrs.tls_end = align_to(
                chunk.shdr.address + chunk.shdr.size,
                chunk.shdr.alignment.max(1),
            );
        }
    }
    addrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;
    use crate::chunk::ChunkKind;
    use crate::chunk::Header;

    #[test]
    fn test_align_to() {
        assert_eq!(align_to(0, 8), 0);
        assert_eq!(align_to(1, 8), 8);
        assert_eq!(align_to(8, 8), 8);
        assert_eq!(align_to(17, 1), 17);
        assert_eq!(align_to(17, 0), 17);
    }

    fn chunk(ty: u32, flags: u64, size: u64, alignment: u64, new_load: bool) -> Chunk<'static> {
        let mut c = Chunk::new(ChunkKind::Header(Header::Ehdr), b"");
        c.shdr.ty = ty;
        c.shdr.flags = flags;
        c.shdr.size = size;
        c.shdr.alignment = alignment;
        c.starts_new_ptload = new_load;
        c
    }

    #[test]
    fn test_offsets_follow_addresses_modulo_page() {
        let a = u64::from(object::elf::SHF_ALLOC);
        let w = u64::from(object::elf::SHF_WRITE);
        let x = u64::from(object::elf::SHF_EXECINSTR);
        let mut chunks = vec![
            chunk(object::elf::SHT_PROGBITS, a, 0x40, 8, true),
            chunk(object::elf::SHT_PROGBITS, a | x, 0x123, 16, true),
            chunk(object::elf::SHT_PROGBITS, a | w, 0x10, 8, true),
            chunk(object::elf::SHT_NOBITS, a | w, 0x200, 32, false),
            chunk(object::elf::SHT_PROGBITS, 0, 0x80, 1, false),
        ];
        let file_size = assign_chunk_offsets(&mut chunks);

        for c in &chunks {
            if c.is_alloc() && !c.is_nobits() {
                assert_eq!(
                    c.shdr.offset % elf::PAGE_SIZE,
                    c.shdr.address % elf::PAGE_SIZE,
                    "offset and address must be congruent modulo the page size"
                );
                assert_eq!(c.shdr.offset % c.shdr.alignment, 0);
                assert_eq!(c.shdr.address % c.shdr.alignment, 0);
            }
        }
        // Chunks are laid out in order without overlap.
        let mut previous_end = 0;
        for c in &chunks {
            assert!(c.shdr.offset >= previous_end);
            previous_end = c.shdr.offset + c.file_size();
        }
        assert_eq!(
            file_size,
            chunks.last().unwrap().shdr.offset + chunks.last().unwrap().shdr.size
        );
        // The first chunk starts at the image base.
        assert_eq!(chunks[0].shdr.address, elf::IMAGE_BASE);
        assert_eq!(chunks[0].shdr.offset, 0);
    }

    #[test]
    fn test_tbss_consumes_no_address_space() {
        let a = u64::from(object::elf::SHF_ALLOC);
        let w = u64::from(object::elf::SHF_WRITE);
        let t = u64::from(object::elf::SHF_TLS);
        let mut chunks = vec![
            chunk(object::elf::SHT_PROGBITS, a | w | t, 0x10, 8, true),
            chunk(object::elf::SHT_NOBITS, a | w | t, 0x1000, 8, false),
            chunk(object::elf::SHT_PROGBITS, a | w, 0x8, 8, false),
        ];
        assign_chunk_offsets(&mut chunks);
        // .data starts right after .tdata; .tbss overlays the address space.
        assert_eq!(chunks[2].shdr.address, chunks[1].shdr.address);
    }
}
