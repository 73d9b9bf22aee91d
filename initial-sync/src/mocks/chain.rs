use super::{Block, Digest};
use crate::{Block as _, Rejection};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

#[derive(Default)]
struct State {
    blocks: Vec<Block>,
    future: BTreeMap<u64, Block>,
    bad: Vec<Digest>,
    inserts: Vec<(u64, u64)>,
}

impl State {
    fn head(&self) -> &Block {
        self.blocks.last().expect("genesis is always present")
    }

    /// Appends stashed future blocks that now extend the head.
    fn reconcile(&mut self) {
        loop {
            let next = self.head().number() + 1;
            let Some(block) = self.future.remove(&next) else {
                return;
            };
            if block.parent() != self.head().digest() {
                self.bad.push(block.digest());
                return;
            }
            self.blocks.push(block);
        }
    }
}

/// An in-memory chain that only accepts blocks extending its canonical head.
///
/// Insertions are atomic: either every block of a call is appended or none is. Leading blocks
/// that are already stored are skipped.
#[derive(Clone)]
pub struct Chain {
    state: Arc<Mutex<State>>,
}

impl Chain {
    /// Creates a chain holding canonical blocks `0..=height`.
    pub fn new(height: u64) -> Self {
        let state = State {
            blocks: Block::range(0, height + 1),
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Height of the head.
    pub fn height(&self) -> u64 {
        self.state.lock().unwrap().head().number()
    }

    /// Digest of the block at `number`, if stored.
    pub fn digest(&self, number: u64) -> Option<Digest> {
        let state = self.state.lock().unwrap();
        state.blocks.get(number as usize).map(|b| b.digest())
    }

    /// Blocks reported as bad.
    pub fn bad(&self) -> Vec<Digest> {
        self.state.lock().unwrap().bad.clone()
    }

    /// Heights of stashed future blocks.
    pub fn future(&self) -> Vec<u64> {
        self.state.lock().unwrap().future.keys().copied().collect()
    }

    /// First and last height of every successful insertion, in order.
    pub fn inserts(&self) -> Vec<(u64, u64)> {
        self.state.lock().unwrap().inserts.clone()
    }
}

impl crate::Chain for Chain {
    type Block = Block;

    async fn head(&self) -> u64 {
        self.height()
    }

    async fn insert(&mut self, mut blocks: Vec<Block>) -> Result<(), Rejection<Digest>> {
        let mut state = self.state.lock().unwrap();

        // Blocks already stored are ignored
        let known = blocks
            .iter()
            .take_while(|block| {
                state
                    .blocks
                    .get(block.number() as usize)
                    .is_some_and(|stored| stored.digest() == block.digest())
            })
            .count();
        let blocks = blocks.split_off(known);

        let mut expected = state.head().digest();
        for block in &blocks {
            if block.number() != expected.number + 1 {
                return Err(Rejection {
                    number: block.number(),
                    digest: block.digest(),
                    reason: format!("expected height {}", expected.number + 1),
                });
            }
            if block.parent() != expected {
                return Err(Rejection {
                    number: block.number(),
                    digest: block.digest(),
                    reason: "unknown parent".into(),
                });
            }
            expected = block.digest();
        }
        if let (Some(first), Some(last)) = (blocks.first(), blocks.last()) {
            state.inserts.push((first.number(), last.number()));
        }
        state.blocks.extend(blocks);
        state.reconcile();
        Ok(())
    }

    async fn register_future(&mut self, block: Block) -> Result<(), Rejection<Digest>> {
        let mut state = self.state.lock().unwrap();
        if block.number() <= state.head().number() + 1 {
            return Err(Rejection {
                number: block.number(),
                digest: block.digest(),
                reason: "not a future block".into(),
            });
        }
        state.future.insert(block.number(), block);
        Ok(())
    }

    async fn mark_bad(&mut self, digest: Digest) {
        self.state.lock().unwrap().bad.push(digest);
    }
}
