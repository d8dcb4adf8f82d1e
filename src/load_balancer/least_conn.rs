//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{instance::ServerInstance, LoadBalancer, SelectionContext};

/// Least connections selector.
/// Selects the server with the minimum number of active connections.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastConnections {
    fn next_server(
        &self,
        servers: &[Arc<ServerInstance>],
        _ctx: &SelectionContext<'_>,
    ) -> Option<Arc<ServerInstance>> {
        // min_by_key keeps the first of equal elements, so ties go to list order
        servers
            .iter()
            .min_by_key(|s| s.current_connections())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_servers;

    #[test]
    fn test_least_conn() {
        let lb = LeastConnections::new();
        let servers = test_servers(&["a", "b"]);
        let ctx = SelectionContext::default();

        // artificially increase connections on a
        servers[0].inc_connections();

        // Should pick b (0 connections)
        assert_eq!(lb.next_server(&servers, &ctx).unwrap().id, "b");

        // now b has 2, a has 1
        servers[1].inc_connections();
        servers[1].inc_connections();

        assert_eq!(lb.next_server(&servers, &ctx).unwrap().id, "a");
    }

    #[test]
    fn test_ties_follow_list_order() {
        let lb = LeastConnections::new();
        let servers = test_servers(&["a", "b", "c"]);
        servers[0].inc_connections();

        let picked = lb.next_server(&servers, &SelectionContext::default()).unwrap();
        assert_eq!(picked.id, "b");
    }
}
