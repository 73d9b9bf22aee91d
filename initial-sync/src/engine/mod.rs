//! Drive range state machines until the chain catches up with its peers.
//!
//! # Overview
//!
//! The [Engine] owns a [crate::fsm::Manager] and runs a single loop that reacts to two inputs:
//!
//! - A periodic tick. The engine refreshes the chain head and the peer set, prunes ranges the
//!   chain already holds (and idle ranges past the highest advertised head), fills every gap
//!   between the head and that target (up to `lookahead` ranges), and applies `Tick` to every
//!   range. Requests issued by the state machines are then handed to
//!   the [crate::Requester].
//! - A message on the [Mailbox]. Responses are applied as `DataReceived` to the range they answer.
//!   Responses that do not match the outstanding request of that range are discarded.
//!
//! After each input, parsed ranges are handed to the [crate::Chain], lowest first. A parsed range
//! that is not the lowest waits, however long that takes. A range refused by the chain is reported
//! with [crate::Chain::mark_bad] and dropped. The next tick re-creates it, and the peer that served
//! it is only asked again when no other peer can serve a range.
//!
//! The engine finishes once at least one peer is known, no ranges are in flight, and the chain
//! head reaches the highest head advertised by peers.

mod actor;
pub use actor::Engine;
mod config;
pub use config::{
    Config, DEFAULT_BATCH_SIZE, DEFAULT_LOOKAHEAD, DEFAULT_MAILBOX_SIZE, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_TICK_INTERVAL,
};
mod ingress;
pub use ingress::{Mailbox, Progress};
mod metrics;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gossip::{self, Outcome},
        mocks::{Behavior, Block, Chain, Coordinator, Network},
        Chain as _, Error, Response,
    };
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Clock, Handle, Metrics, Runner};
    use std::time::Duration;

    // Time for a simulated peer to answer
    const LATENCY: Duration = Duration::from_millis(50);

    // Enough time for the first tick to send its requests, but not for peers to answer
    const A_JIFFY: Duration = Duration::from_millis(10);

    fn config(chain: Chain, coordinator: Coordinator) -> Config<Chain, Coordinator> {
        Config {
            batch_size: 16,
            lookahead: 4,
            tick_interval: Duration::from_millis(100),
            request_timeout: Duration::from_secs(1),
            ..Config::new(chain, coordinator)
        }
    }

    fn start(
        context: &deterministic::Context,
        cfg: Config<Chain, Coordinator>,
    ) -> (
        Handle<Result<u64, Error>>,
        Mailbox<u64, Block>,
        Network<deterministic::Context>,
    ) {
        let (engine, mailbox) = Engine::new(context.with_label("engine"), cfg).unwrap();
        let network = Network::new(context.with_label("network"), mailbox.clone(), LATENCY);
        let handle = engine.start(network.clone());
        (handle, mailbox, network)
    }

    /// Asserts that ranges were inserted back to back, starting right after genesis.
    fn assert_contiguous(chain: &Chain, head: u64) {
        let mut next = 1;
        for (first, last) in chain.inserts() {
            assert_eq!(first, next);
            next = last + 1;
        }
        assert_eq!(next, head + 1);
    }

    #[test_traced]
    fn test_sync_from_honest_peers() {
        let executor = deterministic::Runner::timed(Duration::from_secs(60));
        executor.start(|context| async move {
            let chain = Chain::new(0);
            let coordinator = Coordinator::new(vec![(1, 200), (2, 200), (3, 150)]);
            let (handle, _mailbox, network) =
                start(&context, config(chain.clone(), coordinator));

            let head = handle.await.unwrap().unwrap();
            assert_eq!(head, 200);
            assert_eq!(chain.height(), 200);
            assert_contiguous(&chain, 200);
            assert!(chain.bad().is_empty());

            // Peers are only asked for ranges below their head
            for request in network.requests() {
                if request.peer == 3 {
                    assert!(request.start + request.count - 1 <= 150);
                }
            }
        });
    }

    #[test_traced]
    fn test_silent_peer_times_out() {
        let executor = deterministic::Runner::timed(Duration::from_secs(60));
        executor.start(|context| async move {
            let chain = Chain::new(0);
            let coordinator = Coordinator::new(vec![(1, 100), (2, 100)]);
            let (handle, _mailbox, network) =
                start(&context, config(chain.clone(), coordinator));
            network.set_behavior(1, Behavior::Silent);

            let head = handle.await.unwrap().unwrap();
            assert_eq!(head, 100);
            assert_contiguous(&chain, 100);

            // Every range asked from the silent peer was asked again from the other one
            let requests = network.requests();
            let silent: Vec<_> = requests.iter().filter(|r| r.peer == 1).collect();
            assert!(!silent.is_empty());
            for request in silent {
                assert!(requests
                    .iter()
                    .any(|r| r.peer == 2 && r.start == request.start && r.id > request.id));
            }
        });
    }

    #[test_traced]
    fn test_invalid_responses_skipped() {
        let executor = deterministic::Runner::timed(Duration::from_secs(60));
        executor.start(|context| async move {
            let chain = Chain::new(0);
            let coordinator = Coordinator::new(vec![(1, 120), (2, 120), (3, 120)]);
            let (handle, _mailbox, network) =
                start(&context, config(chain.clone(), coordinator));
            network.set_behavior(1, Behavior::Empty);
            network.set_behavior(2, Behavior::Truncated);

            let head = handle.await.unwrap().unwrap();
            assert_eq!(head, 120);
            assert_contiguous(&chain, 120);

            // Invalid data never reaches the chain
            assert!(chain.bad().is_empty());
        });
    }

    #[test_traced]
    fn test_forked_peer_rejected() {
        let executor = deterministic::Runner::timed(Duration::from_secs(120));
        executor.start(|context| async move {
            let chain = Chain::new(0);
            let coordinator = Coordinator::new(vec![(1, 96), (2, 96)]);
            let (handle, _mailbox, network) =
                start(&context, config(chain.clone(), coordinator));
            network.set_behavior(1, Behavior::Forked);

            let head = handle.await.unwrap().unwrap();
            assert_eq!(head, 96);
            assert_contiguous(&chain, 96);

            // Only blocks of the competing fork were reported
            let bad = chain.bad();
            assert!(!bad.is_empty());
            assert!(bad.iter().all(|digest| digest.fork == 1));
            for number in 1..=96 {
                assert_eq!(chain.digest(number).unwrap().fork, 0);
            }

            // A refused range is asked again from the other peer, never from the same one
            let requests = network.requests();
            for digest in bad {
                let forked: Vec<_> = requests
                    .iter()
                    .filter(|r| r.peer == 1 && r.start == digest.number)
                    .collect();
                assert_eq!(forked.len(), 1);
                assert!(requests
                    .iter()
                    .any(|r| r.peer == 2 && r.start == digest.number && r.id > forked[0].id));
            }

            // Ranges served by the other peer were kept rather than fetched again
            let mut starts: Vec<u64> = requests
                .iter()
                .filter(|r| r.peer == 2)
                .map(|r| r.start)
                .collect();
            let total = starts.len();
            starts.sort();
            starts.dedup();
            assert_eq!(starts.len(), total);
        });
    }

    #[test_traced]
    fn test_target_lowered_after_window_built() {
        let executor = deterministic::Runner::timed(Duration::from_secs(60));
        executor.start(|context| async move {
            let chain = Chain::new(0);
            let coordinator = Coordinator::new(vec![(1, 200)]);
            let (handle, mut mailbox, network) =
                start(&context, config(chain.clone(), coordinator.clone()));
            network.set_behavior(1, Behavior::Silent);
            context.sleep(A_JIFFY).await;
            assert_eq!(mailbox.progress().await.unwrap().machines, 4);

            // The only peer now advertises a head inside the window
            coordinator.set(1, 40);
            network.set_behavior(1, Behavior::Honest);

            assert_eq!(handle.await.unwrap().unwrap(), 40);
            assert_eq!(chain.height(), 40);
            assert_contiguous(&chain, 40);

            // The last blocks were requested at their new size
            assert!(network
                .requests()
                .iter()
                .any(|r| r.start == 33 && r.count == 8));
            assert!(context.encode().contains("ranges_trimmed_total 2"));
        });
    }

    #[test_traced]
    fn test_stale_responses_discarded() {
        let executor = deterministic::Runner::timed(Duration::from_secs(10));
        executor.start(|context| async move {
            let chain = Chain::new(0);
            let coordinator = Coordinator::new(vec![(1, 32)]);
            let cfg = Config {
                lookahead: 2,
                ..config(chain.clone(), coordinator)
            };
            let (_handle, mut mailbox, network) = start(&context, cfg);
            network.set_behavior(1, Behavior::Silent);
            context.sleep(A_JIFFY).await;

            let requests = network.requests();
            assert_eq!(requests.len(), 2);
            let request = requests.iter().find(|r| r.start == 1).unwrap().clone();

            // Unknown request id
            mailbox
                .deliver(Response {
                    id: request.id + 100,
                    start: 1,
                    peer: 1,
                    blocks: Block::range(1, 16),
                })
                .await;

            // Right id, wrong peer
            mailbox
                .deliver(Response {
                    id: request.id,
                    start: 1,
                    peer: 2,
                    blocks: Block::range(1, 16),
                })
                .await;
            let progress = mailbox.progress().await.unwrap();
            assert_eq!(progress.head, 0);
            assert_eq!(progress.machines, 2);

            // The actual answer is applied and handed off
            let response = Response {
                id: request.id,
                start: 1,
                peer: 1,
                blocks: Block::range(1, 16),
            };
            mailbox.deliver(response.clone()).await;
            let progress = mailbox.progress().await.unwrap();
            assert_eq!(progress.head, 16);
            assert_eq!(progress.machines, 1);

            // A duplicate of it no longer has a range to apply to
            mailbox.deliver(response).await;
            let progress = mailbox.progress().await.unwrap();
            assert_eq!(progress.head, 16);
            assert_eq!(progress.machines, 1);
            assert_eq!(chain.height(), 16);
        });
    }

    #[test_traced]
    fn test_later_ranges_wait_for_earlier() {
        let executor = deterministic::Runner::timed(Duration::from_secs(10));
        executor.start(|context| async move {
            let chain = Chain::new(0);
            let coordinator = Coordinator::new(vec![(1, 48)]);
            let cfg = Config {
                lookahead: 3,
                ..config(chain.clone(), coordinator)
            };
            let (handle, mut mailbox, network) = start(&context, cfg);
            network.set_behavior(1, Behavior::Silent);
            context.sleep(A_JIFFY).await;

            let mut requests = network.requests();
            requests.sort_by_key(|r| r.start);
            assert_eq!(
                requests.iter().map(|r| r.start).collect::<Vec<_>>(),
                vec![1, 17, 33]
            );

            // Answer the last range first, then the middle one
            for request in requests.iter().rev() {
                mailbox
                    .deliver(Response {
                        id: request.id,
                        start: request.start,
                        peer: request.peer,
                        blocks: Block::range(request.start, request.count),
                    })
                    .await;
                let progress = mailbox.progress().await.unwrap();
                if request.start != 1 {
                    assert_eq!(progress.head, 0);
                    assert!(chain.inserts().is_empty());
                }
            }

            // Everything was handed off, lowest first
            assert_eq!(chain.inserts(), vec![(1, 16), (17, 32), (33, 48)]);
            assert_eq!(handle.await.unwrap().unwrap(), 48);
        });
    }

    #[test_traced]
    fn test_waits_for_peers() {
        let executor = deterministic::Runner::timed(Duration::from_secs(30));
        executor.start(|context| async move {
            let chain = Chain::new(0);
            let coordinator = Coordinator::default();
            let (handle, mut mailbox, _network) =
                start(&context, config(chain.clone(), coordinator.clone()));

            context.sleep(Duration::from_secs(1)).await;
            let progress = mailbox.progress().await.unwrap();
            assert_eq!(
                progress,
                Progress {
                    head: 0,
                    target: 0,
                    machines: 0,
                }
            );

            coordinator.set(1, 40);
            assert_eq!(handle.await.unwrap().unwrap(), 40);
            assert_eq!(chain.height(), 40);
        });
    }

    #[test_traced]
    fn test_prunes_ranges_the_chain_already_holds() {
        let executor = deterministic::Runner::timed(Duration::from_secs(60));
        executor.start(|context| async move {
            let chain = Chain::new(0);
            let coordinator = Coordinator::new(vec![(1, 64)]);
            let (handle, _mailbox, network) =
                start(&context, config(chain.clone(), coordinator));
            network.set_behavior(1, Behavior::Silent);
            context.sleep(A_JIFFY).await;
            assert_eq!(network.requests().len(), 4);

            // The chain advances through another path
            let mut external = chain.clone();
            external.insert(Block::range(1, 40)).await.unwrap();
            network.set_behavior(1, Behavior::Honest);

            assert_eq!(handle.await.unwrap().unwrap(), 64);
            assert_eq!(chain.height(), 64);

            // Only the blocks above the external head were inserted by sync
            let inserts = chain.inserts();
            assert_eq!(inserts[0], (1, 40));
            assert_eq!(inserts[1], (41, 48));
        });
    }

    #[test_traced]
    fn test_future_block_reconciled() {
        let executor = deterministic::Runner::timed(Duration::from_secs(60));
        executor.start(|context| async move {
            let mut chain = Chain::new(0);
            let outcome = gossip::handle(&mut chain, Block::canonical(50))
                .await
                .unwrap();
            assert_eq!(outcome, Outcome::Future);
            assert_eq!(chain.future(), vec![50]);

            let coordinator = Coordinator::new(vec![(1, 49)]);
            let (handle, _mailbox, _network) =
                start(&context, config(chain.clone(), coordinator));

            // The stashed block extends the synced range
            assert_eq!(handle.await.unwrap().unwrap(), 50);
            assert_eq!(chain.height(), 50);
            assert!(chain.future().is_empty());
        });
    }

    #[test_traced]
    fn test_invalid_config() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let cases = [
                Config {
                    batch_size: 0,
                    ..config(Chain::new(0), Coordinator::default())
                },
                Config {
                    lookahead: 0,
                    ..config(Chain::new(0), Coordinator::default())
                },
                Config {
                    request_timeout: Duration::from_millis(1),
                    ..config(Chain::new(0), Coordinator::default())
                },
            ];
            for cfg in cases {
                let result = Engine::new(context.with_label("engine"), cfg);
                assert!(matches!(result, Err(Error::InvalidConfig(_))));
            }
        });
    }
}
