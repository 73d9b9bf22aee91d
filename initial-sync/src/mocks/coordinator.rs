use std::sync::{Arc, Mutex};

/// A coordinator whose peer set can be changed while the engine runs.
#[derive(Clone, Default)]
pub struct Coordinator {
    peers: Arc<Mutex<Vec<(u64, u64)>>>,
}

impl Coordinator {
    /// Creates a coordinator with the given peers and their advertised heads.
    pub fn new(peers: Vec<(u64, u64)>) -> Self {
        Self {
            peers: Arc::new(Mutex::new(peers)),
        }
    }

    /// Adds `peer` or updates its advertised head.
    pub fn set(&self, peer: u64, head: u64) {
        let mut peers = self.peers.lock().unwrap();
        match peers.iter_mut().find(|(p, _)| *p == peer) {
            Some(entry) => entry.1 = head,
            None => peers.push((peer, head)),
        }
    }

    /// Disconnects `peer`.
    pub fn remove(&self, peer: u64) {
        self.peers.lock().unwrap().retain(|(p, _)| *p != peer);
    }
}

impl crate::Coordinator for Coordinator {
    type PublicKey = u64;

    fn peers(&self) -> Vec<(u64, u64)> {
        self.peers.lock().unwrap().clone()
    }
}
