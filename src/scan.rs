//! Relocation scanning. A parallel classify pass ORs per-symbol need bits,
//! a parallel assignment pass hands out dense slot indices within each file,
//! and a sequential prefix sum turns per-file counts into disjoint ranges
//! inside the synthetic tables.

use crate::elf;
use crate::elf::RelocationKind;
use crate::error::Result;
use crate::object_file::ObjectFile;
use crate::object_file::SectionSlot;
use crate::symbol;
use crate::symbol::Symbol;
use anyhow::bail;
use object::read::elf::Rela as _;
use object::read::elf::Sym as _;
use object::LittleEndian;
use rayon::prelude::*;
use std::sync::atomic::Ordering::Relaxed;

/// Entries reserved at the start of .got.plt: the address of .dynamic plus
/// two slots for the dynamic loader.
pub(crate) const GOTPLT_RESERVED: u64 = 3;

/// Sizes of the synthetic tables plus the aggregated dynamic symbol list,
/// produced once scanning is complete.
pub(crate) struct SyntheticTables<'ctx, 'data> {
    pub(crate) got_size: u64,
    pub(crate) plt_size: u64,
    pub(crate) gotplt_size: u64,
    pub(crate) relplt_size: u64,
    pub(crate) reldyn_size: u64,

    /// Dynamic symbols in table order, excluding the leading null entry.
    pub(crate) dynsyms: Vec<&'ctx Symbol<'data>>,
    /// .dynstr offset of each dynamic symbol's name, parallel to `dynsyms`.
    pub(crate) dynsym_name_offsets: Vec<u32>,
    /// .dynstr offsets of the DT_NEEDED sonames, in file order.
    pub(crate) needed_offsets: Vec<u32>,
    pub(crate) dynstr: Vec<u8>,
}

/// Classifies every relocation, ORing need bits into the referenced symbols.
#[tracing::instrument(skip_all, name = "Scan relocations")]
pub(crate) fn scan_relocations<'ctx, 'data>(files: &[ObjectFile<'ctx, 'data>]) -> Result {
    files.par_iter().try_for_each(|file| {
        if !file.is_alive() || file.is_dso || file.is_internal() {
            return Ok(());
        }
        let e = LittleEndian;
        for slot in &file.sections {
            let SectionSlot::Regular(isec) = slot else {
                continue;
            };
            for rel in isec.relocs {
                let info = elf::RelocationKindInfo::from_raw(rel.r_type(e, false))?;
                let bit = match info.kind {
                    RelocationKind::PltRelative => symbol::HAS_PLT_REL,
                    RelocationKind::GotRelative => symbol::HAS_GOT_REL,
                    RelocationKind::GotTpOff => symbol::HAS_GOTTP_REL,
                    RelocationKind::TlsGd => symbol::HAS_TLSGD_REL,
                    RelocationKind::TlsLd => symbol::HAS_TLSLD_REL,
                    _ => continue,
                };
                let sym_index = rel.r_sym(e, false) as usize;
                match file.global_for_sym_index(sym_index) {
                    Some(sym) => {
                        sym.rels.fetch_or(bit, Relaxed);
                    }
                    None => {
                        // A PLT-relative branch to a local symbol is just a
                        // direct call; everything else would need a table
                        // slot keyed by something other than a global.
                        if bit != symbol::HAS_PLT_REL {
                            bail!(
                                "{file}: relocation type {} against local symbol: not implemented",
                                rel.r_type(e, false)
                            );
                        }
                    }
                }
            }
        }
        Ok(())
    })
}

/// Assigns dense per-file slot indices based on the need bits. Each file only
/// touches symbols it owns, so no two threads write the same slot.
#[tracing::instrument(skip_all, name = "Assign table slots")]
pub(crate) fn assign_slots<'ctx, 'data>(
    files: &mut [ObjectFile<'ctx, 'data>],
    is_static: bool,
) -> Result {
    files.par_iter_mut().try_for_each(|file| {
        if !file.is_alive() {
            return Ok(());
        }
        if is_static {
            assign_slots_static(file)
        } else {
            assign_slots_dynamic(file)
        }
    })
}

fn assign_slots_static<'ctx, 'data>(file: &mut ObjectFile<'ctx, 'data>) -> Result {
    for index in 0..file.globals.len() {
        let sym = file.globals[index];
        if !file.owns(sym) {
            continue;
        }
        let rels = sym.rels.load(Relaxed);
        if rels & symbol::HAS_GOT_REL != 0 {
            sym.got_idx.set(file.num_got as i64);
            file.num_got += 1;
        }
        if rels & symbol::HAS_PLT_REL != 0 && owned_is_ifunc(file, sym) {
            sym.plt_idx.set(file.num_plt as i64);
            file.num_plt += 1;
            sym.gotplt_idx.set(file.num_gotplt as i64);
            file.num_gotplt += 1;
            sym.relplt_idx.set(file.num_relplt as i64);
            file.num_relplt += 1;
        }
        if rels & symbol::HAS_TLSGD_REL != 0 {
            bail!("TLSGD relocation against {}: not implemented", sym.name());
        }
        if rels & symbol::HAS_TLSLD_REL != 0 {
            bail!("TLSLD relocation against {}: not implemented", sym.name());
        }
        if rels & symbol::HAS_GOTTP_REL != 0 {
            sym.gottp_idx.set(file.num_got as i64);
            file.num_got += 1;
        }
    }
    Ok(())
}

fn assign_slots_dynamic<'ctx, 'data>(file: &mut ObjectFile<'ctx, 'data>) -> Result {
    for index in 0..file.globals.len() {
        let sym = file.globals[index];
        if !file.owns(sym) {
            continue;
        }
        let rels = sym.rels.load(Relaxed);
        let mut needs_dynsym = false;
        if rels & symbol::HAS_GOT_REL != 0 {
            sym.got_idx.set(file.num_got as i64);
            file.num_got += 1;
            file.num_reldyn += 1;
            needs_dynsym = true;
        }
        if rels & symbol::HAS_PLT_REL != 0 {
            sym.plt_idx.set(file.num_plt as i64);
            file.num_plt += 1;
            needs_dynsym = true;
            if !sym.got_idx.is_assigned() {
                sym.gotplt_idx.set(file.num_gotplt as i64);
                file.num_gotplt += 1;
                sym.relplt_idx.set(file.num_relplt as i64);
                file.num_relplt += 1;
            }
        }
        if rels & symbol::HAS_TLSGD_REL != 0 {
            sym.gotgd_idx.set(file.num_got as i64);
            file.num_got += 2;
            file.num_reldyn += 2;
            needs_dynsym = true;
        }
        if rels & symbol::HAS_TLSLD_REL != 0 {
            sym.gotld_idx.set(file.num_got as i64);
            file.num_got += 1;
            file.num_reldyn += 1;
            needs_dynsym = true;
        }
        if rels & symbol::HAS_GOTTP_REL != 0 {
            sym.gottp_idx.set(file.num_got as i64);
            file.num_got += 1;
        }
        if needs_dynsym {
            file.dynsyms.push(sym);
        }
    }
    Ok(())
}

fn owned_is_ifunc(file: &ObjectFile, sym: &Symbol) -> bool {
    let Some(elf) = &file.elf else {
        return false;
    };
    let esym = elf
        .symbol(object::SymbolIndex(sym.owner().sym_index()))
        .unwrap();
    esym.st_type() == object::elf::STT_GNU_IFUNC
}

/// Sequential prefix sum over files in priority order: gives every file a
/// disjoint contiguous range in each synthetic table, then aggregates the
/// dynamic symbol list and the .dynstr contents.
#[tracing::instrument(skip_all, name = "Size synthetic tables")]
pub(crate) fn assign_table_offsets<'ctx, 'data>(
    files: &mut [ObjectFile<'ctx, 'data>],
) -> SyntheticTables<'ctx, 'data> {
    let mut got_size = 0;
    let mut plt_size = 0;
    let mut gotplt_size = GOTPLT_RESERVED * elf::GOT_ENTRY_SIZE;
    let mut relplt_size = 0;
    let mut reldyn_size = 0;
    for file in files.iter_mut() {
        if !file.is_alive() {
            continue;
        }
        file.got_offset = got_size;
        got_size += file.num_got * elf::GOT_ENTRY_SIZE;
        file.plt_offset = plt_size;
        plt_size += file.num_plt * elf::PLT_ENTRY_SIZE;
        file.gotplt_offset = gotplt_size;
        gotplt_size += file.num_gotplt * elf::GOT_ENTRY_SIZE;
        file.relplt_offset = relplt_size;
        relplt_size += file.num_relplt * elf::RELA_ENTRY_SIZE;
        file.reldyn_offset = reldyn_size;
        reldyn_size += file.num_reldyn * elf::RELA_ENTRY_SIZE;
    }

    let mut dynstr = vec![0u8];
    let mut needed_offsets = Vec::new();
    for file in files.iter() {
        if let Some(soname) = file.soname.filter(|_| file.is_alive()) {
            needed_offsets.push(dynstr.len() as u32);
            dynstr.extend_from_slice(soname);
            dynstr.push(0);
        }
    }

    let mut dynsyms = Vec::new();
    let mut dynsym_name_offsets = Vec::new();
    for file in files.iter() {
        if !file.is_alive() {
            continue;
        }
        for sym in &file.dynsyms {
            sym.dynsym_idx.set(dynsyms.len() as i64 + 1);
            dynsym_name_offsets.push(dynstr.len() as u32);
            dynstr.extend_from_slice(sym.name().bytes());
            dynstr.push(0);
            dynsyms.push(*sym);
        }
    }

    SyntheticTables {
        got_size,
        plt_size,
        gotplt_size,
        relplt_size,
        reldyn_size,
        dynsyms,
        dynsym_name_offsets,
        needed_offsets,
        dynstr,
    }
}
