use crate::coordination::{NodeRegistration, NodeStatus};

/// Picks the worker for the next dispatch, round-robin over the live
/// registrations ordered by node id.
///
/// The cursor remembers the last node id picked rather than an index, so
/// members joining or leaving between calls do not cause repeats or skips.
#[derive(Debug, Default)]
pub struct WorkerAssigner {
    last: Option<String>,
}

impl WorkerAssigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Choose the first online member after the previously chosen node id,
    /// wrapping around. Returns None when nobody is online.
    pub fn next_worker(&mut self, members: &[NodeRegistration]) -> Option<NodeRegistration> {
        let mut online: Vec<&NodeRegistration> = members
            .iter()
            .filter(|m| m.status == NodeStatus::Online)
            .collect();
        if online.is_empty() {
            return None;
        }
        online.sort_by(|a, b| a.node_id.cmp(&b.node_id));

        let chosen = match &self.last {
            Some(last) => online
                .iter()
                .find(|m| m.node_id.as_str() > last.as_str())
                .copied()
                .unwrap_or(online[0]),
            None => online[0],
        };

        self.last = Some(chosen.node_id.clone());
        tracing::debug!(worker_id = %chosen.node_id, address = %chosen.address, "Worker selected");
        Some(chosen.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::LeaseId;

    fn member(id: &str) -> NodeRegistration {
        NodeRegistration::online(id, &format!("{}:9090", id), LeaseId(1))
    }

    #[test]
    fn empty_membership_yields_none() {
        let mut assigner = WorkerAssigner::new();
        assert!(assigner.next_worker(&[]).is_none());
    }

    #[test]
    fn rotates_in_node_id_order() {
        let mut assigner = WorkerAssigner::new();
        let members = vec![member("c"), member("a"), member("b")];
        let picks: Vec<String> = (0..4)
            .map(|_| assigner.next_worker(&members).unwrap().node_id)
            .collect();
        assert_eq!(picks, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn departed_member_does_not_stall_rotation() {
        let mut assigner = WorkerAssigner::new();
        let all = vec![member("a"), member("b"), member("c")];
        assert_eq!(assigner.next_worker(&all).unwrap().node_id, "a");
        assert_eq!(assigner.next_worker(&all).unwrap().node_id, "b");

        let without_b = vec![member("a"), member("c")];
        assert_eq!(assigner.next_worker(&without_b).unwrap().node_id, "c");
        assert_eq!(assigner.next_worker(&without_b).unwrap().node_id, "a");
    }
}
