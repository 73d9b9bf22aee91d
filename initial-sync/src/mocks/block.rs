/// Identifies a block by its fork and height.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    pub fork: u8,
    pub number: u64,
}

/// A block that links to the block at the previous height of the same fork.
///
/// Fork `0` is the canonical chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    number: u64,
    fork: u8,
}

impl Block {
    /// Block of the canonical chain at `number`.
    pub fn canonical(number: u64) -> Self {
        Self { number, fork: 0 }
    }

    /// Block of the competing fork at `number`.
    pub fn forked(number: u64) -> Self {
        Self { number, fork: 1 }
    }

    /// `count` canonical blocks starting at `start`.
    pub fn range(start: u64, count: u64) -> Vec<Self> {
        (start..start + count).map(Self::canonical).collect()
    }

    /// `count` blocks of a competing fork starting at `start`.
    pub fn forked_range(start: u64, count: u64) -> Vec<Self> {
        (start..start + count).map(Self::forked).collect()
    }
}

impl crate::Block for Block {
    type Digest = Digest;

    fn number(&self) -> u64 {
        self.number
    }

    fn digest(&self) -> Digest {
        Digest {
            fork: self.fork,
            number: self.number,
        }
    }

    fn parent(&self) -> Digest {
        Digest {
            fork: self.fork,
            number: self.number.saturating_sub(1),
        }
    }
}
