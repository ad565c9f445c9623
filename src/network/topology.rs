use crate::address::Address;
use crate::network::NetworkKind;

/// Truth connections to create and erase after a membership change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopologyChange {
    pub add: Vec<(Address, Address)>,
    pub remove: Vec<(Address, Address)>,
}

impl TopologyChange {
    fn link_both(&mut self, a: Address, b: Address) {
        if a != b {
            self.add.push((a, b));
            self.add.push((b, a));
        }
    }

    fn unlink_both(&mut self, a: Address, b: Address) {
        if a != b {
            self.remove.push((a, b));
            self.remove.push((b, a));
        }
    }
}

/// Connections generated when `joining` is appended to `members`.
///
/// `members` is the membership before the join, in join order.
pub fn on_join(kind: &NetworkKind, members: &[Address], joining: Address) -> TopologyChange {
    let mut change = TopologyChange::default();
    match kind {
        NetworkKind::Mesh => {
            for member in members {
                change.link_both(*member, joining);
            }
        }
        NetworkKind::Star { hub } => {
            if joining == *hub {
                for member in members {
                    change.link_both(*hub, *member);
                }
            } else if members.contains(hub) {
                change.link_both(*hub, joining);
            }
        }
        NetworkKind::Ring => {
            if let (Some(first), Some(last)) = (members.first(), members.last()) {
                // Three or more members already close the ring through last -> first
                if members.len() >= 3 {
                    change.unlink_both(*last, *first);
                }
                change.link_both(*last, joining);
                change.link_both(joining, *first);
            }
        }
        NetworkKind::PointToPoint => {
            if let [other] = members {
                change.link_both(*other, joining);
            }
        }
        NetworkKind::Generic => {}
    }
    change
}

/// Connections generated after `leaving` is removed from `members`.
///
/// `members` is the membership before the removal. Connections of the
/// leaving member itself are erased by the caller.
pub fn on_leave(kind: &NetworkKind, members: &[Address], leaving: Address) -> TopologyChange {
    let mut change = TopologyChange::default();
    if let NetworkKind::Ring = kind {
        let Some(index) = members.iter().position(|member| *member == leaving) else {
            return change;
        };
        if members.len() >= 4 {
            let previous = members[(index + members.len() - 1) % members.len()];
            let next = members[(index + 1) % members.len()];
            change.link_both(previous, next);
        }
    }
    change
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> Address {
        Address::from_octets([10, 0, 0, last], 24)
    }

    #[test]
    fn mesh_links_every_member() {
        let change = on_join(&NetworkKind::Mesh, &[addr(1), addr(2)], addr(3));
        assert_eq!(change.add.len(), 4);
        assert!(change.add.contains(&(addr(3), addr(1))));
        assert!(change.remove.is_empty());
    }

    #[test]
    fn star_links_only_the_hub() {
        let kind = NetworkKind::Star { hub: addr(1) };
        assert!(on_join(&kind, &[], addr(2)).add.is_empty());

        let hub_join = on_join(&kind, &[addr(2), addr(3)], addr(1));
        assert_eq!(hub_join.add.len(), 4);

        let spoke = on_join(&kind, &[addr(1), addr(2)], addr(3));
        assert_eq!(spoke.add, vec![(addr(1), addr(3)), (addr(3), addr(1))]);
    }

    #[test]
    fn ring_reopens_and_recloses() {
        let members = [addr(1), addr(2), addr(3)];
        let change = on_join(&NetworkKind::Ring, &members, addr(4));
        assert!(change.remove.contains(&(addr(3), addr(1))));
        assert!(change.add.contains(&(addr(3), addr(4))));
        assert!(change.add.contains(&(addr(4), addr(1))));

        let four = [addr(1), addr(2), addr(3), addr(4)];
        let leave = on_leave(&NetworkKind::Ring, &four, addr(1));
        assert!(leave.add.contains(&(addr(4), addr(2))));
    }
}
