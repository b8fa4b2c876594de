//! The global symbol table. Symbols are interned by name into a sharded pool
//! that hands out stable references: a symbol, once created, lives until the
//! pool is dropped and never moves. All cross-file coordination happens
//! through atomic fields on the symbol itself, so resolution and relocation
//! scanning can run from many threads without locks.

use crate::hash::hash_bytes;
use crate::hash::PassThroughHashMap;
use std::fmt::Display;
use std::hash::Hasher;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Mutex;

/// Relocation-need bits, ORed into `Symbol::rels` during relocation scanning.
pub(crate) const HAS_GOT_REL: u8 = 1 << 0;
pub(crate) const HAS_PLT_REL: u8 = 1 << 1;
pub(crate) const HAS_GOTTP_REL: u8 = 1 << 2;
pub(crate) const HAS_TLSGD_REL: u8 = 1 << 3;
pub(crate) const HAS_TLSLD_REL: u8 = 1 << 4;

/// How strongly a definition binds. Lower ranks dominate higher ones.
pub(crate) mod rank {
    /// A strong (non-common) definition in a live, non-shared file.
    pub(crate) const DEFINED: u8 = 0;
    /// A common symbol in a live, non-shared file.
    pub(crate) const COMMON: u8 = 1;
    /// A weak definition in a live, non-shared file.
    pub(crate) const WEAK: u8 = 2;
    /// Defined by a shared object.
    pub(crate) const DSO: u8 = 3;
    /// Defined by an archive member that hasn't been pulled in yet.
    pub(crate) const LAZY: u8 = 4;
}

/// Identifies the definition that currently owns a symbol, packed into a
/// single word so that ownership can be resolved with one CAS:
///
/// ```text
/// [rank: 8][priority: 24][local symbol index: 32]
/// ```
///
/// Numerically smaller `(rank, priority)` prefixes dominate, and priorities
/// are unique per file, so a simple fetch-min loop converges and is ABA-free.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Owner(u64);

impl Owner {
    pub(crate) const UNDEFINED: Owner = Owner(u64::MAX);

    /// An undefined weak symbol that resolution bound to absolute zero.
    pub(crate) const ABS_ZERO: Owner = Owner(u64::MAX - 1);

    pub(crate) fn new(rank: u8, priority: u32, sym_index: u32) -> Owner {
        debug_assert!(priority < 1 << 24, "too many input files");
        Owner((u64::from(rank) << 56) | (u64::from(priority) << 32) | u64::from(sym_index))
    }

    pub(crate) fn rank(self) -> u8 {
        (self.0 >> 56) as u8
    }

    pub(crate) fn priority(self) -> u32 {
        ((self.0 >> 32) & 0xff_ffff) as u32
    }

    /// The index of the defining symbol within the owning file's symbol table.
    pub(crate) fn sym_index(self) -> usize {
        self.0 as u32 as usize
    }

    /// The comparison key for resolution: rank first, then priority.
    fn dominance(self) -> u64 {
        self.0 >> 32
    }

    pub(crate) fn is_undefined(self) -> bool {
        self == Owner::UNDEFINED
    }

    pub(crate) fn is_absolute_zero(self) -> bool {
        self == Owner::ABS_ZERO
    }

    /// Whether anything provides this definition. Callers must check
    /// `is_absolute_zero` before interpreting the packed fields.
    pub(crate) fn is_defined(self) -> bool {
        !self.is_undefined()
    }
}

/// A symbol name together with its precomputed hash. Hashing happens on the
/// parallel parse path; single-threaded consumers just reuse it.
#[derive(Clone, Copy)]
pub(crate) struct SymbolName<'data> {
    hash: u64,
    bytes: &'data [u8],
}

impl<'data> SymbolName<'data> {
    pub(crate) fn new(bytes: &'data [u8]) -> SymbolName<'data> {
        Self {
            hash: hash_bytes(bytes),
            bytes,
        }
    }

    pub(crate) fn bytes(&self) -> &'data [u8] {
        self.bytes
    }

    pub(crate) fn hash(&self) -> u64 {
        self.hash
    }
}

impl<'data> PartialEq for SymbolName<'data> {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.bytes == other.bytes
    }
}

impl<'data> Eq for SymbolName<'data> {}

impl<'data> std::hash::Hash for SymbolName<'data> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl<'data> Display for SymbolName<'data> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        String::from_utf8_lossy(self.bytes).fmt(f)
    }
}

/// One globally unique symbol. Fields fall into three groups: the owner word
/// and `rels`, updated concurrently by CAS / atomic OR; the slot indices,
/// written only by the owning file's thread during slot assignment; and the
/// address fields, written only by the owning file once layout is fixed.
pub(crate) struct Symbol<'data> {
    name: SymbolName<'data>,
    owner: AtomicU64,
    pub(crate) rels: AtomicU8,

    pub(crate) got_idx: SlotIndex,
    pub(crate) plt_idx: SlotIndex,
    pub(crate) gotplt_idx: SlotIndex,
    pub(crate) relplt_idx: SlotIndex,
    pub(crate) gottp_idx: SlotIndex,
    pub(crate) gotgd_idx: SlotIndex,
    pub(crate) gotld_idx: SlotIndex,
    pub(crate) dynsym_idx: SlotIndex,

    pub(crate) addr: AtomicU64,
    pub(crate) got_addr: AtomicU64,
    pub(crate) gottp_addr: AtomicU64,
    pub(crate) plt_addr: AtomicU64,
    pub(crate) gotplt_addr: AtomicU64,

    /// Output section header index, for symbols that don't come from any
    /// input file (set during synthetic-symbol fixup). -1 otherwise; files
    /// compute the output index of their own symbols from their own tables.
    pub(crate) out_shndx: AtomicI64,

    pub(crate) traced: AtomicBool,
}

/// An index into one of the synthetic tables; -1 until assigned.
pub(crate) struct SlotIndex(AtomicI64);

impl SlotIndex {
    fn new() -> SlotIndex {
        SlotIndex(AtomicI64::new(-1))
    }

    pub(crate) fn get(&self) -> i64 {
        self.0.load(Relaxed)
    }

    pub(crate) fn set(&self, value: i64) {
        self.0.store(value, Relaxed);
    }

    pub(crate) fn is_assigned(&self) -> bool {
        self.get() != -1
    }
}

impl<'data> Symbol<'data> {
    fn new(name: SymbolName<'data>) -> Symbol<'data> {
        Symbol {
            name,
            owner: AtomicU64::new(Owner::UNDEFINED.0),
            rels: AtomicU8::new(0),
            got_idx: SlotIndex::new(),
            plt_idx: SlotIndex::new(),
            gotplt_idx: SlotIndex::new(),
            relplt_idx: SlotIndex::new(),
            gottp_idx: SlotIndex::new(),
            gotgd_idx: SlotIndex::new(),
            gotld_idx: SlotIndex::new(),
            dynsym_idx: SlotIndex::new(),
            addr: AtomicU64::new(0),
            got_addr: AtomicU64::new(0),
            gottp_addr: AtomicU64::new(0),
            plt_addr: AtomicU64::new(0),
            gotplt_addr: AtomicU64::new(0),
            out_shndx: AtomicI64::new(-1),
            traced: AtomicBool::new(false),
        }
    }

    pub(crate) fn name(&self) -> SymbolName<'data> {
        self.name
    }

    pub(crate) fn owner(&self) -> Owner {
        Owner(self.owner.load(Relaxed))
    }

    /// Attempts to make `candidate` the owning definition. Returns true if
    /// ownership changed. The loop re-reads after a failed CAS and
    /// re-evaluates dominance against the new incumbent.
    pub(crate) fn try_override(&self, candidate: Owner) -> bool {
        let mut current = self.owner.load(Relaxed);
        while candidate.dominance() < Owner(current).dominance() {
            match self
                .owner
                .compare_exchange_weak(current, candidate.0, Relaxed, Relaxed)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    /// Binds a still-undefined symbol to absolute zero. Racing callers all
    /// write the same value, so plain CAS from UNDEFINED is enough.
    pub(crate) fn bind_absolute_zero(&self) {
        let _ = self.owner.compare_exchange(
            Owner::UNDEFINED.0,
            Owner::ABS_ZERO.0,
            Relaxed,
            Relaxed,
        );
    }

    pub(crate) fn address(&self) -> u64 {
        self.addr.load(Relaxed)
    }
}

const SHARD_COUNT: usize = 32;

/// The process-wide symbol intern pool. Concurrent interning is supported via
/// per-shard locks; every symbol is boxed so references stay valid while the
/// map grows.
pub(crate) struct SymbolPool<'data> {
    shards: Vec<Shard<'data>>,
}

struct Shard<'data> {
    state: Mutex<ShardState<'data>>,
}

#[derive(Default)]
struct ShardState<'data> {
    map: PassThroughHashMap<SymbolName<'data>, usize>,
    symbols: Vec<Box<Symbol<'data>>>,
}

impl<'data> SymbolPool<'data> {
    pub(crate) fn new() -> SymbolPool<'data> {
        let mut shards = Vec::with_capacity(SHARD_COUNT);
        shards.resize_with(SHARD_COUNT, || Shard {
            state: Mutex::new(ShardState::default()),
        });
        SymbolPool { shards }
    }

    /// Returns the symbol for `name`, creating it if needed. Repeated interns
    /// of the same name return the same reference.
    pub(crate) fn intern(&self, name: SymbolName<'data>) -> &Symbol<'data> {
        let shard = &self.shards[name.hash() as usize & (SHARD_COUNT - 1)];
        let mut state = shard.state.lock().unwrap();
        let index = match state.map.get(&name) {
            Some(&index) => index,
            None => {
                let index = state.symbols.len();
                state.symbols.push(Box::new(Symbol::new(name)));
                state.map.insert(name, index);
                index
            }
        };
        let symbol: *const Symbol<'data> = &*state.symbols[index];
        // Safety: symbols are individually boxed and never removed, so the
        // pointee outlives the shard lock and stays put while the vec grows.
        // We only ever hand out shared references, tied to the pool's borrow.
        unsafe { &*symbol }
    }

    pub(crate) fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.state.lock().unwrap().symbols.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_packing() {
        let owner = Owner::new(rank::COMMON, 42, 7);
        assert_eq!(owner.rank(), rank::COMMON);
        assert_eq!(owner.priority(), 42);
        assert_eq!(owner.sym_index(), 7);
    }

    #[test]
    fn test_dominance_order() {
        // Rank beats priority; priority breaks ties within a rank.
        let strong_late = Owner::new(rank::DEFINED, 90, 0);
        let lazy_early = Owner::new(rank::LAZY, 1, 0);
        let strong_early = Owner::new(rank::DEFINED, 5, 0);
        assert!(strong_late.dominance() < lazy_early.dominance());
        assert!(strong_early.dominance() < strong_late.dominance());
        assert!(Owner::UNDEFINED.dominance() > lazy_early.dominance());
    }

    #[test]
    fn test_intern_returns_stable_reference() {
        let names: Vec<String> = (0..1000).map(|i| format!("sym{i}")).collect();
        let pool = SymbolPool::new();
        let a = pool.intern(SymbolName::new(b"main"));
        // Force growth.
        for name in &names {
            pool.intern(SymbolName::new(name.as_bytes()));
        }
        let b = pool.intern(SymbolName::new(b"main"));
        assert!(std::ptr::eq(a, b));
        assert_eq!(pool.len(), 1001);
    }

    #[test]
    fn test_concurrent_override_is_deterministic() {
        let pool = SymbolPool::new();
        let symbol = pool.intern(SymbolName::new(b"foo"));
        std::thread::scope(|scope| {
            for priority in 1..64u32 {
                scope.spawn(move || {
                    symbol.try_override(Owner::new(rank::DEFINED, priority, 0));
                });
            }
        });
        assert_eq!(symbol.owner().priority(), 1);
        assert_eq!(symbol.owner().rank(), rank::DEFINED);
    }

    #[test]
    fn test_weak_binding_only_applies_when_undefined() {
        let pool = SymbolPool::new();
        let undefined = pool.intern(SymbolName::new(b"u"));
        undefined.bind_absolute_zero();
        assert!(undefined.owner().is_absolute_zero());

        let defined = pool.intern(SymbolName::new(b"d"));
        defined.try_override(Owner::new(rank::DEFINED, 1, 0));
        defined.bind_absolute_zero();
        assert_eq!(defined.owner().priority(), 1);
    }
}
