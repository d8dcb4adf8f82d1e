//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{instance::ServerInstance, LoadBalancer, SelectionContext};

/// Round-robin selector.
/// Stores an internal counter to rotate through servers.
///
/// The counter is advanced with a single `fetch_add`, so concurrent callers
/// always observe distinct cursor values.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next cursor value and wrap it onto `len` slots.
    pub(crate) fn next_index(&self, len: usize) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed) % len
    }
}

impl LoadBalancer for RoundRobin {
    fn next_server(
        &self,
        servers: &[Arc<ServerInstance>],
        _ctx: &SelectionContext<'_>,
    ) -> Option<Arc<ServerInstance>> {
        if servers.is_empty() {
            return None;
        }
        Some(servers[self.next_index(servers.len())].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_servers;
    use std::collections::HashSet;

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let servers = test_servers(&["a", "b"]);
        let ctx = SelectionContext::default();

        let picks: Vec<_> = (0..4)
            .map(|_| lb.next_server(&servers, &ctx).unwrap().id.clone())
            .collect();
        assert_eq!(picks, vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn test_each_server_once_per_cycle() {
        let lb = RoundRobin::new();
        let servers = test_servers(&["a", "b", "c", "d", "e"]);
        let ctx = SelectionContext::default();

        for _ in 0..3 {
            let cycle: HashSet<_> = (0..servers.len())
                .map(|_| lb.next_server(&servers, &ctx).unwrap().id.clone())
                .collect();
            assert_eq!(cycle.len(), servers.len());
        }
    }

    #[test]
    fn test_concurrent_callers_share_cursor() {
        let lb = Arc::new(RoundRobin::new());
        let servers = Arc::new(test_servers(&["a", "b", "c", "d"]));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lb = lb.clone();
                let servers = servers.clone();
                std::thread::spawn(move || {
                    let ctx = SelectionContext::default();
                    (0..250)
                        .map(|_| lb.next_server(&servers, &ctx).unwrap().id.clone())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts = std::collections::HashMap::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                *counts.entry(id).or_insert(0) += 1;
            }
        }
        // 1000 picks over 4 servers with no duplicated cursor values
        assert!(counts.values().all(|&n| n == 250));
    }

    #[test]
    fn test_empty() {
        let lb = RoundRobin::new();
        assert!(lb.next_server(&[], &SelectionContext::default()).is_none());
    }
}
