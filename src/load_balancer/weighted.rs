//! Weighted random load balancing strategy.

use std::sync::Arc;

use rand::Rng;

use crate::load_balancer::{instance::ServerInstance, LoadBalancer, SelectionContext};

/// Weighted random selector.
///
/// Each server is chosen with probability `weight / total_weight`. Stateless.
#[derive(Debug, Default)]
pub struct Weighted;

impl Weighted {
    pub fn new() -> Self {
        Self
    }

    /// Map a draw in `0..weights.sum()` onto an index.
    fn pick(weights: &[u64], mut draw: u64) -> Option<usize> {
        for (i, &weight) in weights.iter().enumerate() {
            if draw < weight {
                return Some(i);
            }
            draw -= weight;
        }
        None
    }
}

impl LoadBalancer for Weighted {
    fn next_server(
        &self,
        servers: &[Arc<ServerInstance>],
        _ctx: &SelectionContext<'_>,
    ) -> Option<Arc<ServerInstance>> {
        // Weights can change concurrently; draw against one read of each.
        let weights: Vec<u64> = servers.iter().map(|s| u64::from(s.weight())).collect();
        let total: u64 = weights.iter().sum();
        if total == 0 {
            return servers.first().cloned();
        }
        let draw = rand::thread_rng().gen_range(0..total);
        Self::pick(&weights, draw).and_then(|i| servers.get(i).cloned())
    }
}
