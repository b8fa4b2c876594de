//! ELF input views and output record definitions. Input files are parsed with
//! the low-level ELF API from the `object` crate; output records are our own
//! `Pod` structs that get cast directly into the output mapping.

use crate::error::Result;
use anyhow::bail;
use bytemuck::Pod;
use bytemuck::Zeroable;
use object::read::elf::FileHeader as _;
use object::read::elf::RelocationSections;
use object::read::elf::SectionHeader as _;
use object::LittleEndian;

pub(crate) const PAGE_SIZE: u64 = 0x1000;

/// Base virtual address of the output image.
pub(crate) const IMAGE_BASE: u64 = 0x200000;

pub(crate) type InFileHeader = object::elf::FileHeader64<LittleEndian>;
pub(crate) type InSectionHeader = object::elf::SectionHeader64<LittleEndian>;
pub(crate) type InSymbol = object::elf::Sym64<LittleEndian>;
pub(crate) type InRela = object::elf::Rela64<LittleEndian>;

type SectionTable<'data> = object::read::elf::SectionTable<'data, InFileHeader>;
type SymbolTable<'data> = object::read::elf::SymbolTable<'data, InFileHeader>;

/// A parsed view of one relocatable object or shared object.
pub(crate) struct File<'data> {
    pub(crate) data: &'data [u8],
    pub(crate) sections: SectionTable<'data>,
    /// symtab for relocatable objects, dynsym for shared objects.
    pub(crate) symbols: SymbolTable<'data>,
    /// Index of the first non-local symbol in `symbols`.
    pub(crate) first_global: usize,
    relocations: RelocationSections,
}

impl<'data> File<'data> {
    pub(crate) fn parse(data: &'data [u8], is_dynamic: bool) -> Result<Self> {
        let header = InFileHeader::parse(data)?;
        let endian = header.endian()?;
        let sections = header.sections(endian, data)?;

        let mut symbols = SymbolTable::default();
        let mut first_global = 0;
        let wanted = if is_dynamic {
            object::elf::SHT_DYNSYM
        } else {
            object::elf::SHT_SYMTAB
        };
        for (section_index, section) in sections.enumerate() {
            if section.sh_type(endian) == wanted {
                symbols = SymbolTable::parse(endian, data, &sections, section_index, section)?;
                first_global = section.sh_info(endian) as usize;
            }
        }
        let relocations = if is_dynamic {
            RelocationSections::default()
        } else {
            sections.relocation_sections(endian, symbols.section())?
        };
        Ok(Self {
            data,
            sections,
            symbols,
            first_global,
            relocations,
        })
    }

    pub(crate) fn section(&self, index: object::SectionIndex) -> Result<&'data InSectionHeader> {
        Ok(self.sections.section(index)?)
    }

    pub(crate) fn section_name(&self, section: &InSectionHeader) -> Result<&'data [u8]> {
        Ok(self.sections.section_name(LittleEndian, section)?)
    }

    pub(crate) fn section_data(&self, section: &InSectionHeader) -> Result<&'data [u8]> {
        Ok(section.data(LittleEndian, self.data)?)
    }

    /// Returns the relocations that apply to the section at `index`.
    pub(crate) fn relocations(&self, index: object::SectionIndex) -> Result<&'data [InRela]> {
        let Some(rela_index) = self.relocations.get(index) else {
            return Ok(&[]);
        };
        let rela_section = self.sections.section(rela_index)?;
        let Some((rela, _)) = rela_section.rela(LittleEndian, self.data)? else {
            return Ok(&[]);
        };
        Ok(rela)
    }

    pub(crate) fn symbol(&self, index: object::SymbolIndex) -> Result<&'data InSymbol> {
        Ok(self.symbols.symbol(index)?)
    }

    pub(crate) fn symbol_name(&self, symbol: &InSymbol) -> Result<&'data [u8]> {
        Ok(self.symbols.symbol_name(LittleEndian, symbol)?)
    }

    pub(crate) fn num_symbols(&self) -> usize {
        self.symbols.len()
    }

    /// Returns the DT_SONAME of a shared object, if it has one.
    pub(crate) fn soname(&self) -> Result<Option<&'data [u8]>> {
        let e = LittleEndian;
        for (_, section) in self.sections.enumerate() {
            if section.sh_type(e) != object::elf::SHT_DYNAMIC {
                continue;
            }
            let strtab_section = self.section(object::SectionIndex(section.sh_link(e) as usize))?;
            let strtab = strtab_section.data(e, self.data)?;
            let entries = section.data(e, self.data)?;
            for entry in entries.chunks_exact(16) {
                let tag = u64::from_le_bytes(entry[..8].try_into().unwrap());
                let value = u64::from_le_bytes(entry[8..].try_into().unwrap());
                if tag == u64::from(object::elf::DT_SONAME) {
                    let rest = strtab.get(value as usize..).unwrap_or_default();
                    let end = memchr::memchr(0, rest).unwrap_or(rest.len());
                    return Ok(Some(&rest[..end]));
                }
            }
        }
        Ok(None)
    }
}

//
// Output records. These are written straight into the output mapping, so their
// layout must match the ELF spec exactly; the asserts below keep us honest.
//

#[derive(Zeroable, Pod, Clone, Copy)]
#[repr(C)]
pub(crate) struct FileHeader {
    pub(crate) magic: [u8; 4],
    pub(crate) class: u8,
    pub(crate) data: u8,
    pub(crate) ei_version: u8,
    pub(crate) os_abi: u8,
    pub(crate) abi_version: u8,
    pub(crate) padding: [u8; 7],
    pub(crate) ty: u16,
    pub(crate) machine: u16,
    pub(crate) e_version: u32,
    pub(crate) entry_point: u64,
    pub(crate) program_header_offset: u64,
    pub(crate) section_header_offset: u64,
    pub(crate) flags: u32,
    pub(crate) ehsize: u16,
    pub(crate) program_header_entry_size: u16,
    pub(crate) program_header_num: u16,
    pub(crate) section_header_entry_size: u16,
    pub(crate) section_header_num: u16,
    pub(crate) section_names_index: u16,
}

#[derive(Zeroable, Pod, Clone, Copy, Default)]
#[repr(C)]
pub(crate) struct ProgramHeader {
    pub(crate) segment_type: u32,
    pub(crate) flags: u32,
    pub(crate) offset: u64,
    pub(crate) virtual_addr: u64,
    pub(crate) physical_addr: u64,
    pub(crate) file_size: u64,
    pub(crate) mem_size: u64,
    pub(crate) alignment: u64,
}

#[derive(Zeroable, Pod, Clone, Copy, Default, Debug)]
#[repr(C)]
pub(crate) struct SectionHeader {
    pub(crate) name: u32,
    pub(crate) ty: u32,
    pub(crate) flags: u64,
    pub(crate) address: u64,
    pub(crate) offset: u64,
    pub(crate) size: u64,
    pub(crate) link: u32,
    pub(crate) info: u32,
    pub(crate) alignment: u64,
    pub(crate) entsize: u64,
}

#[derive(Zeroable, Pod, Clone, Copy, Default)]
#[repr(C)]
pub(crate) struct SymtabEntry {
    pub(crate) name: u32,
    pub(crate) info: u8,
    pub(crate) other: u8,
    pub(crate) shndx: u16,
    pub(crate) value: u64,
    pub(crate) size: u64,
}

#[derive(Zeroable, Pod, Clone, Copy, Default)]
#[repr(C)]
pub(crate) struct Rela {
    pub(crate) address: u64,
    pub(crate) info: u64,
    pub(crate) addend: i64,
}

impl Rela {
    pub(crate) fn new(address: u64, r_type: u32, dynsym_idx: u32, addend: i64) -> Rela {
        Rela {
            address,
            info: (u64::from(dynsym_idx) << 32) | u64::from(r_type),
            addend,
        }
    }
}

#[derive(Zeroable, Pod, Clone, Copy, Default)]
#[repr(C)]
pub(crate) struct DynamicEntry {
    pub(crate) tag: u64,
    pub(crate) value: u64,
}

pub(crate) const FILE_HEADER_SIZE: u64 = 0x40;
pub(crate) const PROGRAM_HEADER_SIZE: u64 = 0x38;
pub(crate) const SECTION_HEADER_SIZE: u64 = 0x40;
pub(crate) const SYMTAB_ENTRY_SIZE: u64 = 0x18;
pub(crate) const RELA_ENTRY_SIZE: u64 = 0x18;
pub(crate) const DYNAMIC_ENTRY_SIZE: u64 = 0x10;
pub(crate) const GOT_ENTRY_SIZE: u64 = 0x8;
pub(crate) const PLT_ENTRY_SIZE: u64 = PLT_ENTRY_TEMPLATE.len() as u64;

/// Offset in the file where we store the program headers. We always put them
/// straight after the file header.
pub(crate) const PHEADER_OFFSET: u64 = FILE_HEADER_SIZE;

pub(crate) const PLT_ENTRY_TEMPLATE: &[u8] = &[
    0xf3, 0x0f, 0x1e, 0xfa, // endbr64
    0xf2, 0xff, 0x25, 0x0, 0x0, 0x0, 0x0, // bnd jmp *{relative GOT address}(%rip)
    0x0f, 0x1f, 0x44, 0x0, 0x0, // nopl 0x0(%rax,%rax,1)
];

/// Offset of the disp32 in the PLT entry, and the end of the jmp instruction
/// that the displacement is relative to.
pub(crate) const PLT_DISP_OFFSET: usize = 7;
pub(crate) const PLT_JMP_END: u64 = 0xb;

const _ASSERTS: () = {
    assert!(FILE_HEADER_SIZE as usize == std::mem::size_of::<FileHeader>());
    assert!(PROGRAM_HEADER_SIZE as usize == std::mem::size_of::<ProgramHeader>());
    assert!(SECTION_HEADER_SIZE as usize == std::mem::size_of::<SectionHeader>());
    assert!(SYMTAB_ENTRY_SIZE as usize == std::mem::size_of::<SymtabEntry>());
    assert!(RELA_ENTRY_SIZE as usize == std::mem::size_of::<Rela>());
    assert!(DYNAMIC_ENTRY_SIZE as usize == std::mem::size_of::<DynamicEntry>());
    assert!(PLT_ENTRY_SIZE == 16);
};

/// What a relocation wants from its target symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RelocationKind {
    Absolute,
    Relative,
    PltRelative,
    GotRelative,
    GotTpOff,
    TpOff,
    DtpOff,
    TlsGd,
    TlsLd,
    None,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct RelocationKindInfo {
    pub(crate) kind: RelocationKind,
    pub(crate) byte_size: usize,
}

impl RelocationKindInfo {
    pub(crate) fn from_raw(r_type: u32) -> Result<Self> {
        let (kind, size) = match r_type {
            object::elf::R_X86_64_64 => (RelocationKind::Absolute, 8),
            object::elf::R_X86_64_32 | object::elf::R_X86_64_32S => (RelocationKind::Absolute, 4),
            object::elf::R_X86_64_16 => (RelocationKind::Absolute, 2),
            object::elf::R_X86_64_8 => (RelocationKind::Absolute, 1),
            object::elf::R_X86_64_PC64 => (RelocationKind::Relative, 8),
            object::elf::R_X86_64_PC32 => (RelocationKind::Relative, 4),
            object::elf::R_X86_64_PC16 => (RelocationKind::Relative, 2),
            object::elf::R_X86_64_PC8 => (RelocationKind::Relative, 1),
            object::elf::R_X86_64_PLT32 => (RelocationKind::PltRelative, 4),
            object::elf::R_X86_64_GOTPCREL
            | object::elf::R_X86_64_GOTPCRELX
            | object::elf::R_X86_64_REX_GOTPCRELX => (RelocationKind::GotRelative, 4),
            object::elf::R_X86_64_GOTTPOFF => (RelocationKind::GotTpOff, 4),
            object::elf::R_X86_64_TPOFF32 => (RelocationKind::TpOff, 4),
            object::elf::R_X86_64_DTPOFF32 => (RelocationKind::DtpOff, 4),
            object::elf::R_X86_64_TLSGD => (RelocationKind::TlsGd, 4),
            object::elf::R_X86_64_TLSLD => (RelocationKind::TlsLd, 4),
            object::elf::R_X86_64_NONE => (RelocationKind::None, 0),
            _ => bail!("Unsupported relocation type {r_type}"),
        };
        Ok(Self {
            kind,
            byte_size: size,
        })
    }
}

/// The hash function used by SysV `.hash` sections.
pub(crate) fn sysv_hash(name: &[u8]) -> u32 {
    let mut h: u32 = 0;
    for &byte in name {
        h = h.wrapping_shl(4).wrapping_add(u32::from(byte));
        let g = h & 0xf000_0000;
        h ^= g >> 24;
        h &= !g;
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysv_hash() {
        // Reference values from the System V ABI.
        assert_eq!(sysv_hash(b""), 0);
        assert_eq!(sysv_hash(b"printf"), 0x077905a6);
        assert_eq!(sysv_hash(b"exit"), 0x0006cf04);
    }

    #[test]
    fn test_relocation_classification() {
        let info = RelocationKindInfo::from_raw(object::elf::R_X86_64_PLT32).unwrap();
        assert_eq!(info.kind, RelocationKind::PltRelative);
        assert_eq!(info.byte_size, 4);
        assert!(RelocationKindInfo::from_raw(0xffff).is_err());
    }

    /// Builds a minimal relocatable object (one .text section defining
    /// `main`) out of our own output records and feeds it back through the
    /// input parser.
    #[test]
    fn test_parse_minimal_object() {
        let text = [0xc3u8; 8];
        let strtab = b"\0main\0";
        let shstrtab = b"\0.text\0.symtab\0.strtab\0.shstrtab\0";

        let mut symtab = Vec::new();
        symtab.extend_from_slice(bytemuck::bytes_of(&SymtabEntry::default()));
        symtab.extend_from_slice(bytemuck::bytes_of(&SymtabEntry {
            name: 1,
            info: (object::elf::STB_GLOBAL << 4) | object::elf::STT_FUNC,
            other: 0,
            shndx: 1,
            value: 0,
            size: 8,
        }));

        let shdrs_offset = FILE_HEADER_SIZE;
        let text_offset = shdrs_offset + 5 * SECTION_HEADER_SIZE;
        let symtab_offset = text_offset + text.len() as u64;
        let strtab_offset = symtab_offset + symtab.len() as u64;
        let shstrtab_offset = strtab_offset + strtab.len() as u64;

        let header = FileHeader {
            magic: [0x7f, b'E', b'L', b'F'],
            class: 2,
            data: 1,
            ei_version: 1,
            os_abi: 0,
            abi_version: 0,
            padding: [0; 7],
            ty: object::elf::ET_REL,
            machine: object::elf::EM_X86_64,
            e_version: 1,
            entry_point: 0,
            program_header_offset: 0,
            section_header_offset: shdrs_offset,
            flags: 0,
            ehsize: FILE_HEADER_SIZE as u16,
            program_header_entry_size: PROGRAM_HEADER_SIZE as u16,
            program_header_num: 0,
            section_header_entry_size: SECTION_HEADER_SIZE as u16,
            section_header_num: 5,
            section_names_index: 4,
        };

        let sections = [
            SectionHeader::default(),
            SectionHeader {
                name: 1,
                ty: object::elf::SHT_PROGBITS,
                flags: u64::from(object::elf::SHF_ALLOC | object::elf::SHF_EXECINSTR),
                offset: text_offset,
                size: text.len() as u64,
                alignment: 16,
                ..Default::default()
            },
            SectionHeader {
                name: 7,
                ty: object::elf::SHT_SYMTAB,
                offset: symtab_offset,
                size: symtab.len() as u64,
                link: 3,
                info: 1,
                alignment: 8,
                entsize: SYMTAB_ENTRY_SIZE,
                ..Default::default()
            },
            SectionHeader {
                name: 15,
                ty: object::elf::SHT_STRTAB,
                offset: strtab_offset,
                size: strtab.len() as u64,
                alignment: 1,
                ..Default::default()
            },
            SectionHeader {
                name: 23,
                ty: object::elf::SHT_STRTAB,
                offset: shstrtab_offset,
                size: shstrtab.len() as u64,
                alignment: 1,
                ..Default::default()
            },
        ];

        let mut bytes = Vec::new();
        bytes.extend_from_slice(bytemuck::bytes_of(&header));
        for section in &sections {
            bytes.extend_from_slice(bytemuck::bytes_of(section));
        }
        bytes.extend_from_slice(&text);
        bytes.extend_from_slice(&symtab);
        bytes.extend_from_slice(strtab);
        bytes.extend_from_slice(shstrtab);

        // The parser reads multi-byte fields in place, so it wants an
        // 8-aligned buffer, like an mmapped file would be.
        let mut backing = vec![0u64; bytes.len().div_ceil(8)];
        bytemuck::cast_slice_mut::<u64, u8>(&mut backing)[..bytes.len()]
            .copy_from_slice(&bytes);
        let data = &bytemuck::cast_slice::<u64, u8>(&backing)[..bytes.len()];

        let file = File::parse(data, false).unwrap();
        assert_eq!(file.num_symbols(), 2);
        assert_eq!(file.first_global, 1);
        let main = file.symbol(object::SymbolIndex(1)).unwrap();
        assert_eq!(file.symbol_name(main).unwrap(), b"main");
        let text_section = file.section(object::SectionIndex(1)).unwrap();
        assert_eq!(file.section_name(text_section).unwrap(), b".text");
        assert_eq!(file.section_data(text_section).unwrap(), &text);
        assert!(file.relocations(object::SectionIndex(1)).unwrap().is_empty());
        assert!(file.soname().unwrap().is_none());
    }
}
