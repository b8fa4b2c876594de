//! Process-wide state shared by every phase. Rather than module-level
//! globals, everything that behaves like a global registry lives in one
//! `Context` value created at pipeline start and passed explicitly.

use crate::args::Args;
use crate::comdat::ComdatPool;
use crate::merge::MergedRegistry;
use crate::output_sections::SectionRegistry;
use crate::symbol::SymbolName;
use crate::symbol::SymbolPool;

pub(crate) struct Context<'data> {
    pub(crate) args: &'data Args,
    pub(crate) symbols: SymbolPool<'data>,
    pub(crate) comdats: ComdatPool<'data>,
    pub(crate) sections: SectionRegistry<'data>,
    pub(crate) merged: MergedRegistry<'data>,
}

impl<'data> Context<'data> {
    pub(crate) fn new(args: &'data Args) -> Context<'data> {
        let context = Context {
            args,
            symbols: SymbolPool::new(),
            comdats: ComdatPool::new(),
            sections: SectionRegistry::new(),
            merged: MergedRegistry::new(),
        };
        for name in &args.trace_symbols {
            context
                .symbols
                .intern(SymbolName::new(name.as_bytes()))
                .traced
                .store(true, std::sync::atomic::Ordering::Relaxed);
        }
        context
    }
}
