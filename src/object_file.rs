//! The per-input view that the pipeline works on: section slots, symbol
//! vectors, COMDAT groups and synthetic-table accounting for one relocatable
//! object, shared object, or the linker-internal file.

use crate::context::Context;
use crate::elf;
use crate::elf::InRela;
use crate::elf::InSymbol;
use crate::error::Result;
use crate::file_kind::FileKind;
use crate::input_data::InputBytes;
use crate::input_data::InputRef;
use crate::merge::MergeableSection;
use crate::output_sections::output_section_name;
use crate::output_sections::OutputSectionId;
use crate::symbol::rank;
use crate::symbol::Owner;
use crate::symbol::Symbol;
use crate::symbol::SymbolName;
use ahash::AHashMap;
use anyhow::bail;
use object::read::elf::SectionHeader as _;
use object::read::elf::Sym as _;
use object::LittleEndian;
use smallvec::SmallVec;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::Relaxed;

/// Names of the symbols whose addresses the linker itself determines. The
/// internal file defines these; user definitions override them because the
/// internal file has the highest priority value.
const SYNTHETIC_SYMBOLS: &[&[u8]] = &[
    b"__bss_start",
    b"__ehdr_start",
    b"__rela_iplt_start",
    b"__rela_iplt_end",
    b"__init_array_start",
    b"__init_array_end",
    b"__fini_array_start",
    b"__fini_array_end",
    b"_end",
    b"end",
    b"_etext",
    b"etext",
    b"_edata",
    b"edata",
    b"_GLOBAL_OFFSET_TABLE_",
];

pub(crate) struct ObjectFile<'ctx, 'data> {
    pub(crate) input: Option<InputRef<'data>>,
    pub(crate) elf: Option<elf::File<'data>>,

    /// 1-based; equals this file's index in the file list plus one.
    pub(crate) priority: u32,
    is_alive: AtomicBool,
    pub(crate) is_dso: bool,
    pub(crate) is_in_archive: bool,
    pub(crate) soname: Option<&'data [u8]>,

    /// One slot per input section, in section-index order. Sections created
    /// by the linker (for common symbols) are appended after.
    pub(crate) sections: Vec<SectionSlot<'ctx, 'data>>,
    pub(crate) comdat_groups: Vec<ComdatGroup<'data>>,

    /// Global symbols, indexed by symtab index minus `first_global`.
    pub(crate) globals: Vec<&'ctx Symbol<'data>>,
    pub(crate) first_global: usize,

    /// For the internal file only: the `__start_`/`__stop_` pair for each
    /// output section whose name is a C identifier.
    pub(crate) start_stop_syms: Vec<(&'data [u8], &'ctx Symbol<'data>, &'ctx Symbol<'data>)>,

    /// Addresses of local symbols, filled in once layout is fixed.
    pub(crate) local_addrs: Vec<u64>,

    /// Maps the symtab index of a common symbol to the linker-created
    /// section slot that now backs it.
    pub(crate) common_slots: AHashMap<usize, usize>,

    // Counts of entries this file contributes to each synthetic table, and
    // the file's base offset within each. Offsets are filled in by a
    // sequential prefix sum once every file has counted.
    pub(crate) num_got: u64,
    pub(crate) num_plt: u64,
    pub(crate) num_gotplt: u64,
    pub(crate) num_relplt: u64,
    pub(crate) num_reldyn: u64,
    pub(crate) got_offset: u64,
    pub(crate) plt_offset: u64,
    pub(crate) gotplt_offset: u64,
    pub(crate) relplt_offset: u64,
    pub(crate) reldyn_offset: u64,

    pub(crate) dynsyms: Vec<&'ctx Symbol<'data>>,

    // Symbol table contributions, set by `compute_symtab`.
    pub(crate) num_local_symtab: u64,
    pub(crate) local_strtab_size: u64,
    pub(crate) num_global_symtab: u64,
    pub(crate) global_strtab_size: u64,
}

pub(crate) enum SectionSlot<'ctx, 'data> {
    Discard,
    Regular(InputSection<'data>),
    Merge(MergeableSection<'ctx, 'data>),
}

pub(crate) struct InputSection<'data> {
    pub(crate) name: &'data [u8],
    pub(crate) sh_type: u32,
    pub(crate) sh_addralign: u64,
    pub(crate) size: u64,
    /// Empty for NOBITS sections.
    pub(crate) data: &'data [u8],
    pub(crate) relocs: &'data [InRela],
    pub(crate) out_section: OutputSectionId,

    /// Offset within the output section, assigned during layout. Stored
    /// atomically because layout walks output sections, not files.
    pub(crate) offset: AtomicU64,
}

impl<'data> InputSection<'data> {
    pub(crate) fn is_nobits(&self) -> bool {
        self.sh_type == object::elf::SHT_NOBITS
    }
}

pub(crate) struct ComdatGroup<'data> {
    pub(crate) signature: SymbolName<'data>,
    /// Indices of the group's member sections.
    pub(crate) members: SmallVec<[u32; 4]>,
}

/// Addresses and section indices the writer and address-fixing passes need,
/// gathered from the laid-out chunk list.
pub(crate) struct SectionAddrs {
    pub(crate) osec_addr: Vec<u64>,
    pub(crate) osec_shndx: Vec<u32>,
    pub(crate) merged_addr: Vec<u64>,
    pub(crate) merged_shndx: Vec<u32>,
    pub(crate) got_base: u64,
    pub(crate) plt_base: u64,
    pub(crate) gotplt_base: u64,
    pub(crate) tls_end: u64,
}

impl<'ctx, 'data> ObjectFile<'ctx, 'data> {
    pub(crate) fn parse(
        input: InputBytes<'data>,
        priority: u32,
        ctx: &'ctx Context<'data>,
    ) -> Result<ObjectFile<'ctx, 'data>> {
        let is_dso = input.kind == FileKind::ElfDynamic;
        let elf = elf::File::parse(input.data, is_dso)?;
        let is_in_archive = input.input.member.is_some();

        let soname = if is_dso {
            Some(elf.soname()?.unwrap_or_else(|| {
                let name = input.input.file.filename.as_os_str().as_encoded_bytes();
                match memchr::memrchr(b'/', name) {
                    Some(i) => &name[i + 1..],
                    None => name,
                }
            }))
        } else {
            None
        };

        let mut file = ObjectFile {
            input: Some(input.input),
            elf: Some(elf),
            priority,
            is_alive: AtomicBool::new(!is_in_archive),
            is_dso,
            is_in_archive,
            soname,
            sections: Vec::new(),
            comdat_groups: Vec::new(),
            globals: Vec::new(),
            first_global: 0,
            start_stop_syms: Vec::new(),
            local_addrs: Vec::new(),
            common_slots: AHashMap::new(),
            num_got: 0,
            num_plt: 0,
            num_gotplt: 0,
            num_relplt: 0,
            num_reldyn: 0,
            got_offset: 0,
            plt_offset: 0,
            gotplt_offset: 0,
            relplt_offset: 0,
            reldyn_offset: 0,
            dynsyms: Vec::new(),
            num_local_symtab: 0,
            local_strtab_size: 0,
            num_global_symtab: 0,
            global_strtab_size: 0,
        };
        if !is_dso {
            file.initialize_sections(ctx)?;
        }
        file.initialize_symbols(ctx)?;
        Ok(file)
    }

    /// Creates the file that defines linker-synthesized symbols: the fixed
    /// set plus `__start_`/`__stop_` pairs for every output section whose
    /// name is a C identifier.
    pub(crate) fn internal(
        ctx: &'ctx Context<'data>,
        priority: u32,
        section_names: &[&'data [u8]],
    ) -> ObjectFile<'ctx, 'data> {
        let mut globals = Vec::new();
        let mut start_stop_syms = Vec::new();
        for name in SYNTHETIC_SYMBOLS {
            globals.push(ctx.symbols.intern(SymbolName::new(name)));
        }
        if !ctx.args.is_static {
            globals.push(ctx.symbols.intern(SymbolName::new(b"_DYNAMIC")));
        }
        for name in section_names {
            if is_c_identifier(name) {
                let pair: Vec<_> = ["__start_", "__stop_"]
                    .iter()
                    .map(|prefix| {
                        let mut symbol_name = prefix.as_bytes().to_vec();
                        symbol_name.extend_from_slice(name);
                        // These names are built at runtime but interned names
                        // live for the whole link anyway, so leaking the few
                        // bytes is the simplest way to give them 'data
                        // lifetime.
                        let symbol_name: &'data [u8] = Box::leak(symbol_name.into_boxed_slice());
                        let sym = ctx.symbols.intern(SymbolName::new(symbol_name));
                        globals.push(sym);
                        sym
                    })
                    .collect();
                start_stop_syms.push((*name, pair[0], pair[1]));
            }
        }
        ObjectFile {
            input: None,
            elf: None,
            priority,
            is_alive: AtomicBool::new(true),
            is_dso: false,
            is_in_archive: false,
            soname: None,
            sections: Vec::new(),
            comdat_groups: Vec::new(),
            globals,
            first_global: 0,
            start_stop_syms,
            local_addrs: Vec::new(),
            common_slots: AHashMap::new(),
            num_got: 0,
            num_plt: 0,
            num_gotplt: 0,
            num_relplt: 0,
            num_reldyn: 0,
            got_offset: 0,
            plt_offset: 0,
            gotplt_offset: 0,
            relplt_offset: 0,
            reldyn_offset: 0,
            dynsyms: Vec::new(),
            num_local_symtab: 0,
            local_strtab_size: 0,
            num_global_symtab: 0,
            global_strtab_size: 0,
        }
    }

    fn initialize_sections(&mut self, ctx: &'ctx Context<'data>) -> Result {
        let e = LittleEndian;
        let elf = self.elf.as_ref().unwrap();
        let mut slots = Vec::new();
        let mut groups = Vec::new();
        for (index, section) in elf.sections.enumerate() {
            let sh_type = section.sh_type(e);
            let sh_flags = section.sh_flags(e);
            match sh_type {
                object::elf::SHT_NULL
                | object::elf::SHT_SYMTAB
                | object::elf::SHT_STRTAB
                | object::elf::SHT_RELA
                | object::elf::SHT_REL
                | object::elf::SHT_NOTE => {
                    slots.push(SectionSlot::Discard);
                }
                object::elf::SHT_GROUP => {
                    parse_group(elf, section, &mut groups)?;
                    slots.push(SectionSlot::Discard);
                }
                _ if sh_flags & u64::from(object::elf::SHF_EXCLUDE) != 0 => {
                    slots.push(SectionSlot::Discard);
                }
                _ => {
                    let name = elf.section_name(section)?;
                    let is_mergeable_strings = sh_flags
                        & u64::from(object::elf::SHF_MERGE | object::elf::SHF_STRINGS)
                        == u64::from(object::elf::SHF_MERGE | object::elf::SHF_STRINGS)
                        && sh_type == object::elf::SHT_PROGBITS
                        && section.sh_entsize(e) == 1
                        && section.sh_size(e) > 0;
                    if is_mergeable_strings {
                        slots.push(SectionSlot::Merge(MergeableSection::new(
                            &ctx.merged,
                            name,
                            sh_type,
                            sh_flags,
                            elf.section_data(section)?,
                            self.priority,
                        )?));
                    } else {
                        let data = if sh_type == object::elf::SHT_NOBITS {
                            &[]
                        } else {
                            elf.section_data(section)?
                        };
                        let out_section = ctx.sections.add_or_get(
                            output_section_name(name),
                            sh_type,
                            sh_flags,
                        );
                        slots.push(SectionSlot::Regular(InputSection {
                            name,
                            sh_type,
                            sh_addralign: section.sh_addralign(e).max(1),
                            size: section.sh_size(e),
                            data,
                            relocs: elf.relocations(index)?,
                            out_section,
                            offset: AtomicU64::new(0),
                        }));
                    }
                }
            }
        }
        self.sections = slots;
        self.comdat_groups = groups;
        Ok(())
    }

    fn initialize_symbols(&mut self, ctx: &'ctx Context<'data>) -> Result {
        let elf = self.elf.as_ref().unwrap();
        self.first_global = elf.first_global.min(elf.num_symbols());
        for index in self.first_global..elf.num_symbols() {
            let esym = elf.symbol(object::SymbolIndex(index))?;
            let name = SymbolName::new(elf.symbol_name(esym)?);
            self.globals.push(ctx.symbols.intern(name));
        }
        Ok(())
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.is_alive.load(Relaxed)
    }

    /// Flips this file alive. Returns true if the caller made the
    /// transition, which means the caller is responsible for processing it.
    pub(crate) fn activate(&self) -> bool {
        !self.is_alive.swap(true, Relaxed)
    }

    pub(crate) fn is_internal(&self) -> bool {
        self.input.is_none() && !self.is_dso
    }

    pub(crate) fn global_esym(&self, global_index: usize) -> &'data InSymbol {
        let elf = self.elf.as_ref().unwrap();
        elf.symbol(object::SymbolIndex(self.first_global + global_index))
            .unwrap()
    }

    /// Whether this file currently provides the chosen definition of `sym`.
    pub(crate) fn owns(&self, sym: &Symbol) -> bool {
        let owner = sym.owner();
        owner.is_defined() && !owner.is_absolute_zero() && owner.priority() == self.priority
    }

    /// Registers every definition this file has, competing for ownership
    /// under the dominance order. Called once for each file at resolution
    /// start, and again when an archive member is pulled in (its definitions
    /// are then re-ranked as live).
    pub(crate) fn register_symbols(&self, files: &[ObjectFile<'ctx, 'data>]) -> Result {
        let e = LittleEndian;
        if self.is_internal() {
            for (index, sym) in self.globals.iter().enumerate() {
                let owner = Owner::new(rank::DEFINED, self.priority, index as u32);
                if sym.try_override(owner) && sym.traced.load(Relaxed) {
                    println!("trace-symbol: {}: defined by <internal>", sym.name());
                }
            }
            return Ok(());
        }
        for (index, sym) in self.globals.iter().enumerate() {
            let esym = self.global_esym(index);
            if esym.is_undefined(e) {
                continue;
            }
            let symbol_rank = if self.is_dso {
                rank::DSO
            } else if !self.is_alive() {
                rank::LAZY
            } else if esym.is_common(e) {
                rank::COMMON
            } else if esym.st_bind() == object::elf::STB_WEAK {
                rank::WEAK
            } else {
                rank::DEFINED
            };
            let sym_index = (self.first_global + index) as u32;
            let candidate = Owner::new(symbol_rank, self.priority, sym_index);
            let changed = sym.try_override(candidate);
            if changed && sym.traced.load(Relaxed) {
                println!("trace-symbol: {}: defined by {}", sym.name(), self);
            }
            if symbol_rank == rank::DEFINED {
                let owner = sym.owner();
                if owner.rank() == rank::DEFINED && owner.priority() != self.priority {
                    let other = &files[owner.priority() as usize - 1];
                    bail!(
                        "duplicate symbol: {}: defined by both {} and {}",
                        sym.name(),
                        other,
                        self
                    );
                }
            }
        }
        Ok(())
    }

    /// Calls `found` for each file that an undefined reference from this
    /// file resolves to.
    pub(crate) fn for_each_required_file(&self, mut found: impl FnMut(u32)) {
        let e = LittleEndian;
        if self.is_internal() || self.is_dso {
            return;
        }
        for (index, sym) in self.globals.iter().enumerate() {
            let esym = self.global_esym(index);
            if !esym.is_undefined(e) || esym.st_bind() == object::elf::STB_WEAK {
                continue;
            }
            let owner = sym.owner();
            if owner.is_defined() && !owner.is_absolute_zero() {
                found(owner.priority() - 1);
            }
        }
    }

    /// Binds weak symbols that stayed undefined to absolute zero.
    pub(crate) fn handle_undefined_weak_symbols(&self) {
        let e = LittleEndian;
        if self.is_internal() || self.is_dso {
            return;
        }
        for (index, sym) in self.globals.iter().enumerate() {
            let esym = self.global_esym(index);
            if esym.is_undefined(e)
                && esym.st_bind() == object::elf::STB_WEAK
                && sym.owner().is_undefined()
            {
                sym.bind_absolute_zero();
                if sym.traced.load(Relaxed) {
                    println!("trace-symbol: {}: bound to absolute zero", sym.name());
                }
            }
        }
    }

    /// Reports the first remaining undefined non-weak reference as an error.
    /// Shared objects are exempt: their imports are the dynamic loader's
    /// problem.
    pub(crate) fn check_undefined_symbols(&self) -> Result {
        let e = LittleEndian;
        if self.is_internal() || self.is_dso {
            return Ok(());
        }
        for (index, sym) in self.globals.iter().enumerate() {
            let esym = self.global_esym(index);
            if esym.is_undefined(e)
                && esym.st_bind() != object::elf::STB_WEAK
                && sym.owner().is_undefined()
            {
                bail!("undefined symbol: {}: referenced by {}", sym.name(), self);
            }
        }
        Ok(())
    }

    pub(crate) fn claim_comdat_groups(&self, ctx: &Context<'data>) {
        for group in &self.comdat_groups {
            ctx.comdats.claim(group.signature, self.priority);
        }
    }

    /// Discards the sections of every COMDAT group this file did not win.
    pub(crate) fn prune_comdat_groups(&mut self, ctx: &Context<'data>) {
        for group_index in 0..self.comdat_groups.len() {
            let group = &self.comdat_groups[group_index];
            if ctx.comdats.is_winner(group.signature, self.priority) {
                continue;
            }
            let members = group.members.clone();
            for member in members {
                if let Some(slot) = self.sections.get_mut(member as usize) {
                    *slot = SectionSlot::Discard;
                }
            }
        }
    }

    pub(crate) fn mergeable_sections(&self) -> impl Iterator<Item = &MergeableSection<'ctx, 'data>> {
        self.sections.iter().filter_map(|slot| match slot {
            SectionSlot::Merge(section) => Some(section),
            _ => None,
        })
    }

    pub(crate) fn mergeable_sections_mut(
        &mut self,
    ) -> impl Iterator<Item = &mut MergeableSection<'ctx, 'data>> {
        self.sections.iter_mut().filter_map(|slot| match slot {
            SectionSlot::Merge(section) => Some(section),
            _ => None,
        })
    }

    /// Creates a NOBITS .bss member for every common symbol this file ended
    /// up owning.
    pub(crate) fn convert_common_symbols(&mut self, ctx: &'ctx Context<'data>) {
        let e = LittleEndian;
        if self.elf.is_none() || self.is_dso {
            return;
        }
        for index in 0..self.globals.len() {
            let sym = self.globals[index];
            let esym = self.global_esym(index);
            if !esym.is_common(e) || !self.owns(sym) {
                continue;
            }
            let out_section = ctx.sections.add_or_get(
                b".bss",
                object::elf::SHT_NOBITS,
                u64::from(object::elf::SHF_ALLOC | object::elf::SHF_WRITE),
            );
            let slot = self.sections.len();
            self.sections.push(SectionSlot::Regular(InputSection {
                name: b".common",
                sh_type: object::elf::SHT_NOBITS,
                sh_addralign: esym.st_value(e).max(1),
                size: esym.st_size(e),
                data: &[],
                relocs: &[],
                out_section,
                offset: AtomicU64::new(0),
            }));
            self.common_slots.insert(self.first_global + index, slot);
        }
    }

    /// Computes the sizes of this file's symbol table and string table
    /// contributions. Must run before the writer; the writer's prefix sums
    /// assume these are final.
    pub(crate) fn compute_symtab(&mut self) {
        let e = LittleEndian;
        self.num_local_symtab = 0;
        self.local_strtab_size = 0;
        self.num_global_symtab = 0;
        self.global_strtab_size = 0;
        if !self.is_alive() || self.is_dso {
            return;
        }
        if self.is_internal() {
            for sym in &self.globals {
                if self.owns(sym) {
                    self.num_global_symtab += 1;
                    self.global_strtab_size += sym.name().bytes().len() as u64 + 1;
                }
            }
            return;
        }
        let elf = self.elf.as_ref().unwrap();
        for index in 0..self.first_global {
            let esym = elf.symbol(object::SymbolIndex(index)).unwrap();
            let name = elf.symbol_name(esym).unwrap_or_default();
            if self.should_emit_local(esym, name) {
                self.num_local_symtab += 1;
                self.local_strtab_size += name.len() as u64 + 1;
            }
        }
        for sym in &self.globals {
            if self.owns(sym) {
                self.num_global_symtab += 1;
                self.global_strtab_size += sym.name().bytes().len() as u64 + 1;
            }
        }
    }

    pub(crate) fn should_emit_local(&self, esym: &InSymbol, name: &[u8]) -> bool {
        let e = LittleEndian;
        if name.is_empty()
            || esym.st_type() == object::elf::STT_SECTION
            || esym.st_type() == object::elf::STT_FILE
        {
            return false;
        }
        match esym.st_shndx(e) {
            object::elf::SHN_UNDEF => false,
            object::elf::SHN_ABS => true,
            shndx => matches!(
                self.sections.get(shndx as usize),
                Some(SectionSlot::Regular(_)) | Some(SectionSlot::Merge(_))
            ),
        }
    }

    /// Resolves the output address of one of this file's symbols once layout
    /// is fixed. `extra` is added before piece lookup so that section-symbol
    /// references into merged strings find the right piece.
    pub(crate) fn symbol_address(&self, sym_index: usize, extra: u64, addrs: &SectionAddrs) -> u64 {
        let e = LittleEndian;
        let elf = self.elf.as_ref().unwrap();
        let esym = elf.symbol(object::SymbolIndex(sym_index)).unwrap();
        match esym.st_shndx(e) {
            object::elf::SHN_UNDEF => 0,
            object::elf::SHN_ABS => esym.st_value(e).wrapping_add(extra),
            object::elf::SHN_COMMON => match self.common_slots.get(&sym_index) {
                Some(&slot) => {
                    let SectionSlot::Regular(isec) = &self.sections[slot] else {
                        unreachable!();
                    };
                    addrs.osec_addr[isec.out_section.as_usize()]
                        + isec.offset.load(Relaxed)
                        + extra
                }
                None => 0,
            },
            shndx => match self.sections.get(shndx as usize) {
                Some(SectionSlot::Regular(isec)) => {
                    addrs.osec_addr[isec.out_section.as_usize()]
                        + isec.offset.load(Relaxed)
                        + esym.st_value(e)
                        + extra
                }
                Some(SectionSlot::Merge(msec)) => {
                    let input_offset = esym.st_value(e).wrapping_add(extra);
                    match msec.piece_at(input_offset) {
                        Some((piece, delta)) => {
                            addrs.merged_addr[msec.merged.as_usize()]
                                + piece.offset_in_output()
                                + delta
                        }
                        None => 0,
                    }
                }
                _ => 0,
            },
        }
    }

    /// Fixes final addresses: local symbol addresses, the addresses of
    /// globals this file owns, and the GOT/PLT slot addresses derived from
    /// this file's reserved ranges.
    pub(crate) fn fix_addresses(&mut self, addrs: &SectionAddrs) {
        if self.elf.is_some() && !self.is_dso {
            self.local_addrs = (0..self.first_global)
                .map(|index| self.symbol_address(index, 0, addrs))
                .collect();
        }
        for index in 0..self.globals.len() {
            let sym = self.globals[index];
            if !self.owns(sym) {
                continue;
            }
            if self.elf.is_some() && !self.is_dso {
                let address = self.symbol_address(self.first_global + index, 0, addrs);
                sym.addr.store(address, Relaxed);
            }
            if sym.got_idx.is_assigned() {
                sym.got_addr.store(
                    addrs.got_base
                        + self.got_offset
                        + sym.got_idx.get() as u64 * elf::GOT_ENTRY_SIZE,
                    Relaxed,
                );
            }
            if sym.gottp_idx.is_assigned() {
                sym.gottp_addr.store(
                    addrs.got_base
                        + self.got_offset
                        + sym.gottp_idx.get() as u64 * elf::GOT_ENTRY_SIZE,
                    Relaxed,
                );
            }
            if sym.plt_idx.is_assigned() {
                sym.plt_addr.store(
                    addrs.plt_base
                        + self.plt_offset
                        + sym.plt_idx.get() as u64 * elf::PLT_ENTRY_SIZE,
                    Relaxed,
                );
            }
            if sym.gotplt_idx.is_assigned() {
                sym.gotplt_addr.store(
                    addrs.gotplt_base
                        + self.gotplt_offset
                        + sym.gotplt_idx.get() as u64 * elf::GOT_ENTRY_SIZE,
                    Relaxed,
                );
            }
        }
    }

    /// The output section header index for one of this file's symbols.
    pub(crate) fn output_shndx(&self, esym: &InSymbol, sym_index: usize, addrs: &SectionAddrs) -> u16 {
        let e = LittleEndian;
        match esym.st_shndx(e) {
            object::elf::SHN_UNDEF => object::elf::SHN_UNDEF,
            object::elf::SHN_ABS => object::elf::SHN_ABS,
            object::elf::SHN_COMMON => match self.common_slots.get(&sym_index) {
                Some(&slot) => {
                    let SectionSlot::Regular(isec) = &self.sections[slot] else {
                        unreachable!();
                    };
                    addrs.osec_shndx[isec.out_section.as_usize()] as u16
                }
                None => object::elf::SHN_UNDEF,
            },
            shndx => match self.sections.get(shndx as usize) {
                Some(SectionSlot::Regular(isec)) => {
                    addrs.osec_shndx[isec.out_section.as_usize()] as u16
                }
                Some(SectionSlot::Merge(msec)) => {
                    addrs.merged_shndx[msec.merged.as_usize()] as u16
                }
                _ => object::elf::SHN_UNDEF,
            },
        }
    }

    /// The value of symbol `sym_index` plus `addend`, for relocation
    /// application.
    pub(crate) fn reloc_target(&self, sym_index: usize, addend: u64, addrs: &SectionAddrs) -> u64 {
        if sym_index >= self.first_global {
            let sym = self.globals[sym_index - self.first_global];
            return sym.address().wrapping_add(addend);
        }
        let e = LittleEndian;
        let elf = self.elf.as_ref().unwrap();
        let esym = elf.symbol(object::SymbolIndex(sym_index)).unwrap();
        if let Some(SectionSlot::Merge(_)) = self.sections.get(esym.st_shndx(e) as usize) {
            // For references into merged strings the addend selects the
            // string, so it has to participate in piece lookup.
            return self.symbol_address(sym_index, addend, addrs);
        }
        self.local_addrs
            .get(sym_index)
            .copied()
            .unwrap_or(0)
            .wrapping_add(addend)
    }

    /// The global symbol a relocation refers to, if its target is global.
    pub(crate) fn global_for_sym_index(&self, sym_index: usize) -> Option<&'ctx Symbol<'data>> {
        sym_index
            .checked_sub(self.first_global)
            .map(|i| self.globals[i])
    }
}

fn parse_group<'data>(
    elf: &elf::File<'data>,
    section: &'data elf::InSectionHeader,
    groups: &mut Vec<ComdatGroup<'data>>,
) -> Result {
    let e = LittleEndian;
    let data = elf.section_data(section)?;
    let mut words = data
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()));
    let Some(flags) = words.next() else {
        bail!("empty SHT_GROUP section");
    };
    if flags & object::elf::GRP_COMDAT == 0 {
        return Ok(());
    }
    let signature_sym = elf.symbol(object::SymbolIndex(section.sh_info(e) as usize))?;
    let signature = SymbolName::new(elf.symbol_name(signature_sym)?);
    groups.push(ComdatGroup {
        signature,
        members: words.collect(),
    });
    Ok(())
}

pub(crate) fn is_c_identifier(name: &[u8]) -> bool {
    !name.is_empty()
        && !name[0].is_ascii_digit()
        && name
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || b == b'_')
}

impl<'ctx, 'data> std::fmt::Display for ObjectFile<'ctx, 'data> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.input {
            Some(input) => std::fmt::Display::fmt(input, f),
            None => f.write_str("<internal>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_c_identifier() {
        assert!(is_c_identifier(b"my_section"));
        assert!(is_c_identifier(b"data1"));
        assert!(!is_c_identifier(b".text"));
        assert!(!is_c_identifier(b"1data"));
        assert!(!is_c_identifier(b""));
        assert!(!is_c_identifier(b"a-b"));
    }
}
