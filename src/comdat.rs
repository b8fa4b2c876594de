//! COMDAT group deduplication. Every file claims each of its group signatures
//! in a process-wide pool; the file with the lowest priority keeps the group's
//! sections, everyone else throws theirs away.

use crate::hash::PassThroughHashMap;
use crate::symbol::SymbolName;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Mutex;

const SHARD_COUNT: usize = 16;

pub(crate) struct ComdatPool<'data> {
    shards: Vec<Shard<'data>>,
}

struct Shard<'data> {
    state: Mutex<PassThroughHashMap<SymbolName<'data>, Box<AtomicU64>>>,
}

impl<'data> ComdatPool<'data> {
    pub(crate) fn new() -> ComdatPool<'data> {
        let mut shards = Vec::with_capacity(SHARD_COUNT);
        shards.resize_with(SHARD_COUNT, || Shard {
            state: Mutex::new(PassThroughHashMap::default()),
        });
        ComdatPool { shards }
    }

    fn claim_word(&self, signature: SymbolName<'data>) -> &AtomicU64 {
        let shard = &self.shards[signature.hash() as usize & (SHARD_COUNT - 1)];
        let mut state = shard.state.lock().unwrap();
        let word: *const AtomicU64 = &**state
            .entry(signature)
            .or_insert_with(|| Box::new(AtomicU64::new(u64::MAX)));
        // Safety: claim words are individually boxed and never removed, so the
        // pointee stays valid for the pool's lifetime; only shared references
        // are handed out.
        unsafe { &*word }
    }

    /// Claims `signature` on behalf of a file. The lowest claiming priority
    /// wins.
    pub(crate) fn claim(&self, signature: SymbolName<'data>, priority: u32) {
        self.claim_word(signature)
            .fetch_min(u64::from(priority), Relaxed);
    }

    /// Returns whether the file with `priority` won the group for `signature`.
    /// Only meaningful once every claim has been made.
    pub(crate) fn is_winner(&self, signature: SymbolName<'data>, priority: u32) -> bool {
        self.claim_word(signature).load(Relaxed) == u64::from(priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowest_priority_wins() {
        let pool = ComdatPool::new();
        let signature = SymbolName::new(b"inline_f");
        std::thread::scope(|scope| {
            for priority in [9, 3, 7, 12] {
                let pool = &pool;
                scope.spawn(move || pool.claim(signature, priority));
            }
        });
        assert!(pool.is_winner(signature, 3));
        assert!(!pool.is_winner(signature, 9));
    }

    #[test]
    fn test_signatures_are_independent() {
        let pool = ComdatPool::new();
        pool.claim(SymbolName::new(b"f"), 2);
        pool.claim(SymbolName::new(b"g"), 5);
        assert!(pool.is_winner(SymbolName::new(b"f"), 2));
        assert!(pool.is_winner(SymbolName::new(b"g"), 5));
    }
}
