//! Writes the output file. The mapping is split into disjoint mutable slices
//! (per chunk, then per file within the synthetic tables) so that every pass
//! can run data-parallel without locks.

use crate::chunk::Chunk;
use crate::chunk::ChunkKind;
use crate::chunk::Header;
use crate::chunk::Synthetic;
use crate::context::Context;
use crate::elf;
use crate::elf::RelocationKind;
use crate::error::Result;
use crate::layout::find_synthetic;
use crate::layout::input_section;
use crate::layout::SectionRef;
use crate::object_file::ObjectFile;
use crate::object_file::SectionAddrs;
use crate::scan::SyntheticTables;
use crate::scan::GOTPLT_RESERVED;
use crate::symbol::SymbolName;
use anyhow::bail;
use anyhow::Context as _;
use memmap2::MmapMut;
use object::read::elf::Rela as _;
use object::read::elf::Sym as _;
use object::LittleEndian;
use rayon::prelude::*;
use std::path::Path;

pub(crate) struct Output {
    file: std::fs::File,
    mmap: MmapMut,
}

/// Everything the write passes need to look at, read-only.
pub(crate) struct WriteCx<'a, 'ctx, 'data> {
    pub(crate) ctx: &'ctx Context<'data>,
    pub(crate) files: &'a [ObjectFile<'ctx, 'data>],
    pub(crate) chunks: &'a [Chunk<'data>],
    pub(crate) members: &'a [Vec<SectionRef>],
    pub(crate) tables: &'a SyntheticTables<'ctx, 'data>,
    pub(crate) addrs: &'a SectionAddrs,
    pub(crate) shstrtab: &'a [u8],
    pub(crate) phdrs: &'a [elf::ProgramHeader],
    pub(crate) filesize: u64,
}

impl Output {
    #[tracing::instrument(skip_all, name = "Open output file")]
    pub(crate) fn create(path: &Path, filesize: u64, filler: Option<u8>) -> Result<Output> {
        let _ = std::fs::remove_file(path);
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("cannot open {}", path.display()))?;
        file.set_len(filesize)
            .with_context(|| format!("{}: ftruncate failed", path.display()))?;

        // Safety: the mapping is private to us until we close it; nothing
        // else has a handle to the file we just created.
        let mut mmap = unsafe { MmapMut::map_mut(&file) }
            .with_context(|| format!("{}: mmap failed", path.display()))?;

        if let Some(filler) = filler {
            mmap.fill(filler);
        }
        Ok(Output { file, mmap })
    }

    /// Runs all write passes, then commits the mapping and makes the file
    /// executable.
    pub(crate) fn write(&mut self, cx: &WriteCx) -> Result {
        initialize_chunks(&mut self.mmap, cx)?;
        copy_sections(&mut self.mmap, cx)?;
        write_got_plt(&mut self.mmap, cx)?;
        write_symtab(&mut self.mmap, cx)?;
        clear_padding(&mut self.mmap, cx);

        self.mmap.flush()?;
        make_executable(&self.file)
    }
}

fn make_executable(file: &std::fs::File) -> Result {
    use std::os::unix::prelude::PermissionsExt;

    let mut permissions = file.metadata()?.permissions();
    let mut mode = PermissionsExt::mode(&permissions);
    // Add execute permission wherever there's read permission.
    mode |= (mode & 0o444) >> 2;
    PermissionsExt::set_mode(&mut permissions, mode);
    file.set_permissions(permissions)?;
    Ok(())
}

/// Removes and returns the first `prefix` bytes of `*data`.
fn take_prefix_mut<'t>(data: &mut &'t mut [u8], prefix: usize) -> &'t mut [u8] {
    let owned = core::mem::take(data);
    let (taken, rest) = owned.split_at_mut(prefix);
    *data = rest;
    taken
}

/// Splits the output buffer into one mutable slice per chunk, in chunk
/// order. NOBITS chunks get an empty slice.
fn split_by_chunks<'out, 'data>(
    mut data: &'out mut [u8],
    chunks: &[Chunk<'data>],
) -> Vec<&'out mut [u8]> {
    let mut buffers = Vec::with_capacity(chunks.len());
    let mut position = 0u64;
    for chunk in chunks {
        if chunk.is_nobits() {
            buffers.push(Default::default());
            continue;
        }
        take_prefix_mut(&mut data, (chunk.shdr.offset - position) as usize);
        buffers.push(take_prefix_mut(&mut data, chunk.shdr.size as usize));
        position = chunk.shdr.offset + chunk.shdr.size;
    }
    buffers
}

fn write_value(buf: &mut [u8], offset: usize, byte_size: usize, value: u64) {
    buf[offset..offset + byte_size].copy_from_slice(&value.to_le_bytes()[..byte_size]);
}

/// Pass 1: stamp headers and the contents of synthetic sections that don't
/// depend on per-file state.
#[tracing::instrument(skip_all, name = "Initialize chunks")]
fn initialize_chunks(mmap: &mut [u8], cx: &WriteCx) -> Result {
    let buffers = split_by_chunks(mmap, cx.chunks);
    cx.chunks
        .par_iter()
        .zip(buffers)
        .try_for_each(|(chunk, buf)| initialize_chunk(chunk, buf, cx))
}

fn initialize_chunk(chunk: &Chunk, buf: &mut [u8], cx: &WriteCx) -> Result {
    match chunk.kind {
        ChunkKind::Header(Header::Ehdr) => {
            let shdr_chunk = cx
                .chunks
                .iter()
                .find(|c| c.kind == ChunkKind::Header(Header::Shdr))
                .unwrap();
            let shstrtab_chunk = find_synthetic(cx.chunks, Synthetic::Shstrtab).unwrap();
            let num_sections = cx.chunks.iter().filter(|c| !c.is_header()).count() as u16;
            let header = elf::FileHeader {
                magic: [0x7f, b'E', b'L', b'F'],
                class: 2, // 64 bit
                data: 1,  // little endian
                ei_version: 1,
                os_abi: 0,
                abi_version: 0,
                padding: [0; 7],
                ty: object::elf::ET_EXEC,
                machine: object::elf::EM_X86_64,
                e_version: 1,
                entry_point: cx.ctx.symbols.intern(SymbolName::new(b"_start")).address(),
                program_header_offset: elf::PHEADER_OFFSET,
                section_header_offset: shdr_chunk.shdr.offset,
                flags: 0,
                ehsize: elf::FILE_HEADER_SIZE as u16,
                program_header_entry_size: elf::PROGRAM_HEADER_SIZE as u16,
                program_header_num: cx.phdrs.len() as u16,
                section_header_entry_size: elf::SECTION_HEADER_SIZE as u16,
                section_header_num: num_sections + 1,
                section_names_index: shstrtab_chunk.shndx as u16,
            };
            buf.copy_from_slice(bytemuck::bytes_of(&header));
        }
        ChunkKind::Header(Header::Phdr) => {
            buf.copy_from_slice(bytemuck::cast_slice(cx.phdrs));
        }
        ChunkKind::Header(Header::Shdr) => {
            let entries: &mut [elf::SectionHeader] = bytemuck::cast_slice_mut(buf);
            entries[0] = elf::SectionHeader::default();
            for c in cx.chunks.iter().filter(|c| !c.is_header()) {
                entries[c.shndx as usize] = c.shdr;
            }
        }
        ChunkKind::Synthetic(Synthetic::Interp) => {
            let path = cx.ctx.args.interpreter_path().as_os_str().as_encoded_bytes();
            buf[..path.len()].copy_from_slice(path);
            buf[path.len()] = 0;
        }
        ChunkKind::Synthetic(Synthetic::GotPlt) => {
            // The first reserved entry holds the address of .dynamic; the
            // next two are filled by the dynamic loader at runtime.
            let dynamic_addr =
                find_synthetic(cx.chunks, Synthetic::Dynamic).map_or(0, |c| c.shdr.address);
            write_value(buf, 0, 8, dynamic_addr);
            write_value(buf, 8, 8, 0);
            write_value(buf, 16, 8, 0);
        }
        ChunkKind::Synthetic(Synthetic::Dynamic) => {
            write_dynamic(buf, cx);
        }
        ChunkKind::Synthetic(Synthetic::Dynsym) => {
            let entries: &mut [elf::SymtabEntry] = bytemuck::cast_slice_mut(buf);
            entries[0] = elf::SymtabEntry::default();
            for (index, sym) in cx.tables.dynsyms.iter().enumerate() {
                let owner_file = &cx.files[sym.owner().priority() as usize - 1];
                let esym = owner_file
                    .elf
                    .as_ref()
                    .map(|elf| elf.symbol(object::SymbolIndex(sym.owner().sym_index())).unwrap());
                let (info, shndx) = match esym {
                    Some(esym) if !owner_file.is_dso => (
                        esym.st_info(),
                        object::elf::SHN_ABS,
                    ),
                    Some(esym) => (esym.st_info(), object::elf::SHN_UNDEF),
                    None => ((object::elf::STB_GLOBAL << 4) | object::elf::STT_NOTYPE, object::elf::SHN_ABS),
                };
                entries[index + 1] = elf::SymtabEntry {
                    name: cx.tables.dynsym_name_offsets[index],
                    info,
                    other: 0,
                    shndx,
                    value: sym.address(),
                    size: 0,
                };
            }
        }
        ChunkKind::Synthetic(Synthetic::Dynstr) => {
            buf.copy_from_slice(&cx.tables.dynstr);
        }
        ChunkKind::Synthetic(Synthetic::Shstrtab) => {
            buf.copy_from_slice(cx.shstrtab);
        }
        ChunkKind::Synthetic(Synthetic::Hash) => {
            write_hash(buf, cx);
        }
        _ => {}
    }
    Ok(())
}

fn write_dynamic(buf: &mut [u8], cx: &WriteCx) {
    let section = |kind| find_synthetic(cx.chunks, kind);
    let addr = |kind| section(kind).map_or(0, |c| c.shdr.address);
    let size = |kind| section(kind).map_or(0, |c| c.shdr.size);

    let mut entries = Vec::new();
    for &offset in &cx.tables.needed_offsets {
        entries.push((object::elf::DT_NEEDED, u64::from(offset)));
    }
    entries.push((object::elf::DT_PLTGOT, addr(Synthetic::GotPlt)));
    entries.push((object::elf::DT_JMPREL, addr(Synthetic::RelaPlt)));
    entries.push((object::elf::DT_PLTRELSZ, size(Synthetic::RelaPlt)));
    entries.push((object::elf::DT_PLTREL, u64::from(object::elf::DT_RELA)));
    entries.push((object::elf::DT_RELA, addr(Synthetic::RelaDyn)));
    entries.push((object::elf::DT_RELASZ, size(Synthetic::RelaDyn)));
    entries.push((object::elf::DT_RELAENT, elf::RELA_ENTRY_SIZE));
    entries.push((object::elf::DT_SYMTAB, addr(Synthetic::Dynsym)));
    entries.push((object::elf::DT_SYMENT, elf::SYMTAB_ENTRY_SIZE));
    entries.push((object::elf::DT_STRTAB, addr(Synthetic::Dynstr)));
    entries.push((object::elf::DT_STRSZ, size(Synthetic::Dynstr)));
    entries.push((object::elf::DT_HASH, addr(Synthetic::Hash)));
    entries.push((object::elf::DT_NULL, 0));

    let out: &mut [elf::DynamicEntry] = bytemuck::cast_slice_mut(buf);
    for (entry, (tag, value)) in out.iter_mut().zip(entries) {
        *entry = elf::DynamicEntry {
            tag: u64::from(tag),
            value,
        };
    }
}

/// SysV hash table over .dynsym: nbucket u32, nchain u32, buckets, chains.
fn write_hash(buf: &mut [u8], cx: &WriteCx) {
    let num_symbols = cx.tables.dynsyms.len() + 1;
    let mut buckets = vec![0u32; num_symbols];
    let mut chains = vec![0u32; num_symbols];
    for (index, sym) in cx.tables.dynsyms.iter().enumerate() {
        let slot = elf::sysv_hash(sym.name().bytes()) as usize % num_symbols;
        chains[index + 1] = buckets[slot];
        buckets[slot] = index as u32 + 1;
    }
    write_value(buf, 0, 4, num_symbols as u64);
    write_value(buf, 4, 4, num_symbols as u64);
    let mut offset = 8;
    for value in buckets.iter().chain(chains.iter()) {
        write_value(buf, offset, 4, u64::from(*value));
        offset += 4;
    }
}

/// Pass 2: copy input section payloads and apply their relocations; copy the
/// winning string pieces of merged sections.
#[tracing::instrument(skip_all, name = "Copy sections")]
fn copy_sections(mmap: &mut [u8], cx: &WriteCx) -> Result {
    let buffers = split_by_chunks(mmap, cx.chunks);
    cx.chunks
        .par_iter()
        .zip(buffers)
        .try_for_each(|(chunk, buf)| match chunk.kind {
            ChunkKind::Regular(id) => copy_regular_section(chunk, buf, &cx.members[id.as_usize()], cx),
            ChunkKind::Merged(id) => {
                for file in cx.files {
                    if !file.is_alive() {
                        continue;
                    }
                    for msec in file.mergeable_sections() {
                        if msec.merged != id {
                            continue;
                        }
                        for piece in msec.pieces() {
                            if piece.is_owned_by(msec.token()) {
                                let start = piece.offset_in_output() as usize;
                                buf[start..start + piece.data.len()].copy_from_slice(piece.data);
                            }
                        }
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        })
}

fn copy_regular_section(
    chunk: &Chunk,
    buf: &mut [u8],
    members: &[SectionRef],
    cx: &WriteCx,
) -> Result {
    if chunk.is_nobits() {
        return Ok(());
    }
    for &section in members {
        let isec = input_section(cx.files, section);
        let file = &cx.files[section.file as usize];
        let offset = isec.offset.load(std::sync::atomic::Ordering::Relaxed) as usize;
        let dst = &mut buf[offset..offset + isec.data.len()];
        dst.copy_from_slice(isec.data);
        apply_relocations(file, isec, chunk.shdr.address + offset as u64, dst, cx)
            .with_context(|| format!("failed to relocate {} in {}", String::from_utf8_lossy(isec.name), file))?;
    }
    Ok(())
}

fn apply_relocations(
    file: &ObjectFile,
    isec: &crate::object_file::InputSection,
    section_addr: u64,
    dst: &mut [u8],
    cx: &WriteCx,
) -> Result {
    let e = LittleEndian;
    for rel in isec.relocs {
        let info = elf::RelocationKindInfo::from_raw(rel.r_type(e, false))?;
        if info.kind == RelocationKind::None {
            continue;
        }
        let offset = rel.r_offset(e) as usize;
        let addend = rel.r_addend(e) as u64;
        let sym_index = rel.r_sym(e, false) as usize;
        let place = section_addr + offset as u64;
        let target = file.reloc_target(sym_index, addend, cx.addrs);
        let sym = file.global_for_sym_index(sym_index);
        let value = match info.kind {
            RelocationKind::Absolute => target,
            RelocationKind::Relative => target.wrapping_sub(place),
            RelocationKind::PltRelative => {
                let plt_addr = sym.map_or(0, |s| s.plt_addr.load(std::sync::atomic::Ordering::Relaxed));
                if plt_addr != 0 {
                    plt_addr.wrapping_add(addend).wrapping_sub(place)
                } else {
                    target.wrapping_sub(place)
                }
            }
            RelocationKind::GotRelative => {
                let Some(sym) = sym else {
                    bail!("GOT relocation against local symbol");
                };
                sym.got_addr
                    .load(std::sync::atomic::Ordering::Relaxed)
                    .wrapping_add(addend)
                    .wrapping_sub(place)
            }
            RelocationKind::GotTpOff => {
                let Some(sym) = sym else {
                    bail!("GOTTPOFF relocation against local symbol");
                };
                sym.gottp_addr
                    .load(std::sync::atomic::Ordering::Relaxed)
                    .wrapping_add(addend)
                    .wrapping_sub(place)
            }
            RelocationKind::TpOff => target.wrapping_sub(cx.addrs.tls_end),
            RelocationKind::TlsGd | RelocationKind::TlsLd | RelocationKind::DtpOff => {
                bail!("TLS relocation type {} is not implemented", rel.r_type(e, false));
            }
            RelocationKind::None => continue,
        };
        write_value(dst, offset, info.byte_size, value);
    }
    Ok(())
}

/// Per-file mutable windows into the synthetic tables.
struct FileTableBufs<'out> {
    got: &'out mut [u8],
    plt: &'out mut [u8],
    gotplt: &'out mut [u8],
    relplt: &'out mut [u8],
    reldyn: &'out mut [u8],
}

/// Splits a synthetic table's buffer into one window per file, using the
/// per-file counts that sized the table in the first place. Each window must
/// land exactly on the file's reserved range from the prefix sum.
fn split_table<'out, 'ctx, 'data>(
    mut region: &'out mut [u8],
    files: &[ObjectFile<'ctx, 'data>],
    skip: u64,
    size_of: impl for<'f> Fn(&'f ObjectFile<'ctx, 'data>) -> u64,
    offset_of: impl for<'f> Fn(&'f ObjectFile<'ctx, 'data>) -> u64,
) -> Vec<&'out mut [u8]> {
    if !region.is_empty() {
        take_prefix_mut(&mut region, skip as usize);
    }
    let mut position = skip;
    files
        .iter()
        .map(|file| {
            let size = size_of(file);
            debug_assert!(size == 0 || offset_of(file) == position);
            position += size;
            take_prefix_mut(&mut region, size as usize)
        })
        .collect()
}

/// Pass 3: every file writes the GOT/PLT/GOTPLT/RELPLT/RELDYN entries for
/// the symbols it owns, into its reserved ranges.
#[tracing::instrument(skip_all, name = "Write GOT and PLT")]
fn write_got_plt(mmap: &mut [u8], cx: &WriteCx) -> Result {
    let chunk_buffers = split_by_chunks(mmap, cx.chunks);
    let mut got_region: &mut [u8] = Default::default();
    let mut plt_region: &mut [u8] = Default::default();
    let mut gotplt_region: &mut [u8] = Default::default();
    let mut relplt_region: &mut [u8] = Default::default();
    let mut reldyn_region: &mut [u8] = Default::default();
    for (chunk, buf) in cx.chunks.iter().zip(chunk_buffers) {
        match chunk.kind {
            ChunkKind::Synthetic(Synthetic::Got) => got_region = buf,
            ChunkKind::Synthetic(Synthetic::Plt) => plt_region = buf,
            ChunkKind::Synthetic(Synthetic::GotPlt) => gotplt_region = buf,
            ChunkKind::Synthetic(Synthetic::RelaPlt) => relplt_region = buf,
            ChunkKind::Synthetic(Synthetic::RelaDyn) => reldyn_region = buf,
            _ => {}
        }
    }

    let got = split_table(
        got_region,
        cx.files,
        0,
        |f| f.num_got * elf::GOT_ENTRY_SIZE,
        |f| f.got_offset,
    );
    let plt = split_table(
        plt_region,
        cx.files,
        0,
        |f| f.num_plt * elf::PLT_ENTRY_SIZE,
        |f| f.plt_offset,
    );
    let gotplt = split_table(
        gotplt_region,
        cx.files,
        GOTPLT_RESERVED * elf::GOT_ENTRY_SIZE,
        |f| f.num_gotplt * elf::GOT_ENTRY_SIZE,
        |f| f.gotplt_offset,
    );
    let relplt = split_table(
        relplt_region,
        cx.files,
        0,
        |f| f.num_relplt * elf::RELA_ENTRY_SIZE,
        |f| f.relplt_offset,
    );
    let reldyn = split_table(
        reldyn_region,
        cx.files,
        0,
        |f| f.num_reldyn * elf::RELA_ENTRY_SIZE,
        |f| f.reldyn_offset,
    );

    let file_buffers: Vec<FileTableBufs> = got
        .into_iter()
        .zip(plt)
        .zip(gotplt)
        .zip(relplt)
        .zip(reldyn)
        .map(|((((got, plt), gotplt), relplt), reldyn)| FileTableBufs {
            got,
            plt,
            gotplt,
            relplt,
            reldyn,
        })
        .collect();

    cx.files
        .par_iter()
        .zip(file_buffers)
        .try_for_each(|(file, bufs)| {
            if file.is_alive() {
                write_file_table_entries(file, bufs, cx)
            } else {
                Ok(())
            }
        })
}

fn write_file_table_entries(
    file: &ObjectFile,
    mut bufs: FileTableBufs,
    cx: &WriteCx,
) -> Result {
    use std::sync::atomic::Ordering::Relaxed;
    let is_static = cx.ctx.args.is_static;
    let mut reldyn_index = 0usize;
    for sym in &file.globals {
        if !file.owns(sym) {
            continue;
        }
        if sym.got_idx.is_assigned() {
            if is_static {
                write_value(
                    bufs.got,
                    sym.got_idx.get() as usize * elf::GOT_ENTRY_SIZE as usize,
                    8,
                    sym.address(),
                );
            } else {
                let rela = elf::Rela::new(
                    sym.got_addr.load(Relaxed),
                    object::elf::R_X86_64_GLOB_DAT,
                    sym.dynsym_idx.get() as u32,
                    0,
                );
                let offset = reldyn_index * elf::RELA_ENTRY_SIZE as usize;
                bufs.reldyn[offset..offset + elf::RELA_ENTRY_SIZE as usize]
                    .copy_from_slice(bytemuck::bytes_of(&rela));
                reldyn_index += 1;
            }
        }
        if sym.gottp_idx.is_assigned() {
            write_value(
                bufs.got,
                sym.gottp_idx.get() as usize * elf::GOT_ENTRY_SIZE as usize,
                8,
                sym.address().wrapping_sub(cx.addrs.tls_end),
            );
        }
        if sym.gotgd_idx.is_assigned() || sym.gotld_idx.is_assigned() {
            bail!("TLS GD/LD entries for {}: not implemented", sym.name());
        }
        if sym.plt_idx.is_assigned() {
            let entry_offset = sym.plt_idx.get() as usize * elf::PLT_ENTRY_SIZE as usize;
            let entry = &mut bufs.plt[entry_offset..entry_offset + elf::PLT_ENTRY_SIZE as usize];
            entry.copy_from_slice(elf::PLT_ENTRY_TEMPLATE);
            let slot_addr = if sym.got_idx.is_assigned() {
                sym.got_addr.load(Relaxed)
            } else {
                sym.gotplt_addr.load(Relaxed)
            };
            let entry_addr = sym.plt_addr.load(Relaxed);
            let disp = slot_addr.wrapping_sub(entry_addr + elf::PLT_JMP_END) as u32;
            entry[elf::PLT_DISP_OFFSET..elf::PLT_DISP_OFFSET + 4]
                .copy_from_slice(&disp.to_le_bytes());
        }
        if sym.relplt_idx.is_assigned() {
            let is_ifunc = owner_is_ifunc(file, sym);
            let rela = if is_ifunc {
                elf::Rela::new(
                    sym.gotplt_addr.load(Relaxed),
                    object::elf::R_X86_64_IRELATIVE,
                    0,
                    sym.address() as i64,
                )
            } else {
                elf::Rela::new(
                    sym.gotplt_addr.load(Relaxed),
                    object::elf::R_X86_64_JUMP_SLOT,
                    sym.dynsym_idx.get() as u32,
                    0,
                )
            };
            let offset = sym.relplt_idx.get() as usize * elf::RELA_ENTRY_SIZE as usize;
            bufs.relplt[offset..offset + elf::RELA_ENTRY_SIZE as usize]
                .copy_from_slice(bytemuck::bytes_of(&rela));
            if !is_ifunc {
                // Seed the .got.plt slot to the push instruction after the
                // entry's first jmp, for lazy binding.
                write_value(
                    bufs.gotplt,
                    sym.gotplt_idx.get() as usize * elf::GOT_ENTRY_SIZE as usize,
                    8,
                    sym.plt_addr.load(Relaxed) + 6,
                );
            }
        }
    }
    Ok(())
}

fn owner_is_ifunc(file: &ObjectFile, sym: &crate::symbol::Symbol) -> bool {
    let Some(elf_file) = &file.elf else {
        return false;
    };
    elf_file
        .symbol(object::SymbolIndex(sym.owner().sym_index()))
        .map(|esym| esym.st_type() == object::elf::STT_GNU_IFUNC)
        .unwrap_or(false)
}

/// Pass 4: symbol table and string table. Per-file ranges come from a
/// sequential prefix sum: the null entry, then every file's locals, then
/// every file's globals.
#[tracing::instrument(skip_all, name = "Write symtab")]
fn write_symtab(mmap: &mut [u8], cx: &WriteCx) -> Result {
    let symtab_chunk = find_synthetic(cx.chunks, Synthetic::Symtab).unwrap();
    let strtab_chunk = find_synthetic(cx.chunks, Synthetic::Strtab).unwrap();

    let mut symtab_size = elf::SYMTAB_ENTRY_SIZE;
    let mut strtab_size = 1u64;
    let mut local_offsets = Vec::with_capacity(cx.files.len());
    for file in cx.files {
        local_offsets.push((symtab_size, strtab_size));
        symtab_size += file.num_local_symtab * elf::SYMTAB_ENTRY_SIZE;
        strtab_size += file.local_strtab_size;
    }
    let mut global_offsets = Vec::with_capacity(cx.files.len());
    for file in cx.files {
        global_offsets.push((symtab_size, strtab_size));
        symtab_size += file.num_global_symtab * elf::SYMTAB_ENTRY_SIZE;
        strtab_size += file.global_strtab_size;
    }
    assert_eq!(symtab_size, symtab_chunk.shdr.size);
    assert_eq!(strtab_size, strtab_chunk.shdr.size);

    // Split both sections into per-file windows, locals first then globals.
    let buffers = split_by_chunks(mmap, cx.chunks);
    let mut symtab_buf: &mut [u8] = Default::default();
    let mut strtab_buf: &mut [u8] = Default::default();
    for (chunk, buf) in cx.chunks.iter().zip(buffers) {
        match chunk.kind {
            ChunkKind::Synthetic(Synthetic::Symtab) => symtab_buf = buf,
            ChunkKind::Synthetic(Synthetic::Strtab) => strtab_buf = buf,
            _ => {}
        }
    }
    take_prefix_mut(&mut symtab_buf, elf::SYMTAB_ENTRY_SIZE as usize).fill(0);
    strtab_buf[0] = 0;
    take_prefix_mut(&mut strtab_buf, 1);

    let mut windows: Vec<(SymtabWindow, u64)> = Vec::with_capacity(cx.files.len() * 2);
    for (index, file) in cx.files.iter().enumerate() {
        windows.push((
            SymtabWindow {
                entries: take_prefix_mut(
                    &mut symtab_buf,
                    (file.num_local_symtab * elf::SYMTAB_ENTRY_SIZE) as usize,
                ),
                strings: take_prefix_mut(&mut strtab_buf, file.local_strtab_size as usize),
            },
            local_offsets[index].1,
        ));
    }
    for (index, file) in cx.files.iter().enumerate() {
        windows.push((
            SymtabWindow {
                entries: take_prefix_mut(
                    &mut symtab_buf,
                    (file.num_global_symtab * elf::SYMTAB_ENTRY_SIZE) as usize,
                ),
                strings: take_prefix_mut(&mut strtab_buf, file.global_strtab_size as usize),
            },
            global_offsets[index].1,
        ));
    }

    let (local_windows, global_windows) = windows.split_at_mut(cx.files.len());
    cx.files
        .par_iter()
        .zip(local_windows)
        .for_each(|(file, (window, string_base))| {
            write_local_symbols(file, window, *string_base, cx);
        });
    cx.files
        .par_iter()
        .zip(global_windows)
        .for_each(|(file, (window, string_base))| {
            write_global_symbols(file, window, *string_base, cx);
        });
    Ok(())
}

struct SymtabWindow<'out> {
    entries: &'out mut [u8],
    strings: &'out mut [u8],
}

impl<'out> SymtabWindow<'out> {
    fn push(&mut self, mut entry: elf::SymtabEntry, name: &[u8], string_offset: &mut u64) {
        entry.name = *string_offset as u32;
        let taken = take_prefix_mut(&mut self.entries, elf::SYMTAB_ENTRY_SIZE as usize);
        taken.copy_from_slice(bytemuck::bytes_of(&entry));
        let strings = take_prefix_mut(&mut self.strings, name.len() + 1);
        strings[..name.len()].copy_from_slice(name);
        strings[name.len()] = 0;
        *string_offset += name.len() as u64 + 1;
    }
}

fn write_local_symbols(file: &ObjectFile, window: &mut SymtabWindow, string_base: u64, cx: &WriteCx) {
    if !file.is_alive() || file.is_dso || file.is_internal() {
        return;
    }
    let Some(elf_file) = &file.elf else {
        return;
    };
    let e = LittleEndian;
    let mut string_offset = string_base;
    for index in 0..file.first_global {
        let esym = elf_file.symbol(object::SymbolIndex(index)).unwrap();
        let name = elf_file.symbol_name(esym).unwrap_or_default();
        if !file.should_emit_local(esym, name) {
            continue;
        }
        let entry = elf::SymtabEntry {
            name: 0,
            info: esym.st_info(),
            other: 0,
            shndx: file.output_shndx(esym, index, cx.addrs),
            value: file.local_addrs.get(index).copied().unwrap_or(0),
            size: esym.st_size(e),
        };
        window.push(entry, name, &mut string_offset);
    }
}

fn write_global_symbols(file: &ObjectFile, window: &mut SymtabWindow, string_base: u64, cx: &WriteCx) {
    use std::sync::atomic::Ordering::Relaxed;
    if !file.is_alive() || file.is_dso {
        return;
    }
    let e = LittleEndian;
    let mut string_offset = string_base;
    for (index, sym) in file.globals.iter().enumerate() {
        if !file.owns(sym) {
            continue;
        }
        let entry = if file.is_internal() {
            let shndx = match sym.out_shndx.load(Relaxed) {
                -1 => object::elf::SHN_ABS,
                shndx => shndx as u16,
            };
            elf::SymtabEntry {
                name: 0,
                info: (object::elf::STB_GLOBAL << 4) | object::elf::STT_NOTYPE,
                other: 0,
                shndx,
                value: sym.address(),
                size: 0,
            }
        } else {
            let sym_index = file.first_global + index;
            let esym = file.global_esym(index);
            elf::SymtabEntry {
                name: 0,
                info: esym.st_info(),
                other: 0,
                shndx: file.output_shndx(esym, sym_index, cx.addrs),
                value: sym.address(),
                size: esym.st_size(e),
            }
        };
        window.push(entry, sym.name().bytes(), &mut string_offset);
    }
}

/// Pass 6: zero the gaps between chunks and the tail so output bytes are a
/// pure function of the inputs.
#[tracing::instrument(skip_all, name = "Clear padding")]
fn clear_padding(mmap: &mut [u8], cx: &WriteCx) {
    let mut position = 0u64;
    for chunk in cx.chunks {
        mmap[position as usize..chunk.shdr.offset as usize].fill(0);
        position = chunk.shdr.offset + chunk.file_size();
    }
    mmap[position as usize..cx.filesize as usize].fill(0);
}
