//! Identifies what sort of input we're dealing with from its leading bytes.

use crate::error::Result;
use anyhow::bail;
use object::read::elf::FileHeader as _;
use object::LittleEndian;

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub(crate) enum FileKind {
    ElfObject,
    ElfDynamic,
    Archive,
}

impl FileKind {
    pub(crate) fn identify_bytes(bytes: &[u8]) -> Result<FileKind> {
        if bytes.starts_with(b"!<arch>\n") {
            return Ok(FileKind::Archive);
        }
        if !bytes.starts_with(&object::elf::ELFMAG) {
            bail!("unknown file type");
        }
        let header = crate::elf::InFileHeader::parse(bytes)?;
        if header.e_ident.class != object::elf::ELFCLASS64 {
            bail!("only 64 bit ELF is supported");
        }
        if header.e_ident.data != object::elf::ELFDATA2LSB {
            bail!("only little endian ELF is supported");
        }
        match header.e_type.get(LittleEndian) {
            object::elf::ET_REL => Ok(FileKind::ElfObject),
            object::elf::ET_DYN => Ok(FileKind::ElfDynamic),
            t => bail!("unsupported ELF type {t}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_archive() {
        assert_eq!(
            FileKind::identify_bytes(b"!<arch>\n").unwrap(),
            FileKind::Archive
        );
    }

    #[test]
    fn test_identify_garbage() {
        assert!(FileKind::identify_bytes(b"not an object").is_err());
        assert!(FileKind::identify_bytes(b"").is_err());
    }
}
