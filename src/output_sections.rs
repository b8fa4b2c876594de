//! The registry of output sections. Sections are created on first use during
//! the parallel parse, so the registry is a lock-guarded map handing out
//! stable ids; everything mutable about an output section lives in
//! pipeline-owned tables indexed by those ids.

use ahash::AHashMap;
use std::sync::Mutex;

/// Identifies an output section. Ids are dense and in creation order, which is
/// arbitrary; deterministic ordering is established later by a stable sort on
/// the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct OutputSectionId(u32);

impl OutputSectionId {
    pub(crate) fn from_usize(value: usize) -> OutputSectionId {
        OutputSectionId(value as u32)
    }

    pub(crate) fn as_usize(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SectionKey<'data> {
    pub(crate) name: &'data [u8],
    pub(crate) sh_type: u32,
    pub(crate) sh_flags: u64,
}

pub(crate) struct SectionRegistry<'data> {
    state: Mutex<RegistryState<'data>>,
}

#[derive(Default)]
struct RegistryState<'data> {
    ids: AHashMap<SectionKey<'data>, u32>,
    keys: Vec<SectionKey<'data>>,
}

impl<'data> SectionRegistry<'data> {
    pub(crate) fn new() -> SectionRegistry<'data> {
        SectionRegistry {
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub(crate) fn add_or_get(
        &self,
        name: &'data [u8],
        sh_type: u32,
        sh_flags: u64,
    ) -> OutputSectionId {
        // Group membership is a property of the input section, not of where
        // its bytes end up.
        let key = SectionKey {
            name,
            sh_type,
            sh_flags: sh_flags & !u64::from(object::elf::SHF_GROUP),
        };
        let mut state = self.state.lock().unwrap();
        if let Some(&id) = state.ids.get(&key) {
            return OutputSectionId(id);
        }
        let id = state.keys.len() as u32;
        state.keys.push(key);
        state.ids.insert(key, id);
        OutputSectionId(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().unwrap().keys.len()
    }

    /// Snapshot of all keys, indexed by id. Only called once parsing is done
    /// and the registry has stopped growing.
    pub(crate) fn keys(&self) -> Vec<SectionKey<'data>> {
        self.state.lock().unwrap().keys.clone()
    }
}

/// Maps an input section name to the output section it should land in, e.g.
/// `.text.start` goes to `.text`. Mergeable string sections don't go through
/// this; they keep their full name.
pub(crate) fn output_section_name(name: &[u8]) -> &[u8] {
    const PREFIXES: &[&[u8]] = &[
        b".text",
        b".data.rel.ro",
        b".data",
        b".rodata",
        b".bss.rel.ro",
        b".bss",
        b".init_array",
        b".fini_array",
        b".tdata",
        b".tbss",
        b".ctors",
        b".dtors",
        b".gcc_except_table",
    ];
    for prefix in PREFIXES {
        if name == *prefix
            || (name.starts_with(prefix) && name.get(prefix.len()) == Some(&b'.'))
        {
            return prefix;
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_deduplicates() {
        let registry = SectionRegistry::new();
        let flags = u64::from(object::elf::SHF_ALLOC | object::elf::SHF_EXECINSTR);
        let a = registry.add_or_get(b".text", object::elf::SHT_PROGBITS, flags);
        let b = registry.add_or_get(b".text", object::elf::SHT_PROGBITS, flags);
        let c = registry.add_or_get(b".data", object::elf::SHT_PROGBITS, flags);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_group_flag_ignored_in_key() {
        let registry = SectionRegistry::new();
        let flags = u64::from(object::elf::SHF_ALLOC);
        let plain = registry.add_or_get(b".text", object::elf::SHT_PROGBITS, flags);
        let grouped = registry.add_or_get(
            b".text",
            object::elf::SHT_PROGBITS,
            flags | u64::from(object::elf::SHF_GROUP),
        );
        assert_eq!(plain, grouped);
    }

    #[test]
    fn test_output_section_name() {
        assert_eq!(output_section_name(b".text.start"), b".text");
        assert_eq!(output_section_name(b".text"), b".text");
        assert_eq!(output_section_name(b".data.rel.ro.foo"), b".data.rel.ro");
        assert_eq!(output_section_name(b".textual"), b".textual");
        assert_eq!(output_section_name(b".mycustom"), b".mycustom");
    }
}
