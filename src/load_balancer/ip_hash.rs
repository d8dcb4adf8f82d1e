//! Client IP hash load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{
    instance::ServerInstance, round_robin::RoundRobin, LoadBalancer, SelectionContext,
};

/// IP hash selector.
///
/// The same client IP maps to the same server while the healthy set is
/// unchanged. No consistent hashing: any membership change may reshuffle.
/// Requests without a client IP are spread round-robin.
#[derive(Debug, Default)]
pub struct IpHash {
    fallback: RoundRobin,
}

impl IpHash {
    pub fn new() -> Self {
        Self::default()
    }
}

/// 32-bit polynomial rolling hash (`h = h * 31 + byte`).
pub fn hash_ip(ip: &str) -> u32 {
    ip.bytes()
        .fold(0u32, |hash, byte| hash.wrapping_mul(31).wrapping_add(u32::from(byte)))
}

impl LoadBalancer for IpHash {
    fn next_server(
        &self,
        servers: &[Arc<ServerInstance>],
        ctx: &SelectionContext<'_>,
    ) -> Option<Arc<ServerInstance>> {
        if servers.is_empty() {
            return None;
        }
        let index = match ctx.client_ip {
            Some(ip) => hash_ip(ip) as usize % servers.len(),
            None => self.fallback.next_index(servers.len()),
        };
        Some(servers[index].clone())
    }
}
