use crate::data_structures::Bitmap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Every block is present locally.
    Complete,
    /// The peer holds nothing we are missing.
    PeerHasNothing,
    /// Fetch this block; its assigned bit was set with this decision.
    Assigned(usize),
    /// Endgame: every wanted block is already assigned elsewhere, fetch a
    /// duplicate of this one. The assigned map is left untouched.
    Endgame(usize),
}

/// Picks the next block to request from a peer. The least wanted index not
/// yet assigned wins and is marked assigned in the same call; callers must
/// hold the transfer guard across the call so the test-and-set is atomic
/// with the decision. Deterministic, least-index tie-break throughout.
pub fn select_block(local: &Bitmap, peer: &Bitmap, assigned: &mut Bitmap) -> Decision {
    if local.is_full() {
        return Decision::Complete;
    }

    let mut wanted = None;

    for idx in peer.ones().filter(|idx| !local.get(*idx)) {
        if !assigned.get(idx) {
            assigned.set(idx);
            return Decision::Assigned(idx);
        }

        wanted.get_or_insert(idx);
    }

    match wanted {
        Some(idx) => Decision::Endgame(idx),
        None => Decision::PeerHasNothing,
    }
}

#[cfg(test)]
mod tests {
    use super::{select_block, Decision};
    use crate::data_structures::Bitmap;

    fn bitmap(len: usize, ones: &[usize]) -> Bitmap {
        let mut map = Bitmap::new(len);
        for idx in ones {
            map.set(*idx);
        }
        map
    }

    #[test]
    fn least_unassigned_wanted_index_wins() {
        let local = bitmap(8, &[0, 1]);
        let peer = bitmap(8, &[1, 3, 5]);
        let mut assigned = bitmap(8, &[3]);

        let decision = select_block(&local, &peer, &mut assigned);

        assert_eq!(Decision::Assigned(5), decision);
        assert!(assigned.get(5));
    }

    #[test]
    fn assignment_is_atomic_with_the_decision() {
        let local = Bitmap::new(4);
        let peer = bitmap(4, &[0, 1, 2, 3]);
        let mut assigned = Bitmap::new(4);

        assert_eq!(Decision::Assigned(0), select_block(&local, &peer, &mut assigned));
        assert_eq!(Decision::Assigned(1), select_block(&local, &peer, &mut assigned));
        assert_eq!(Decision::Assigned(2), select_block(&local, &peer, &mut assigned));
        assert_eq!(Decision::Assigned(3), select_block(&local, &peer, &mut assigned));
    }

    #[test]
    fn endgame_returns_least_wanted_and_leaves_assigned_untouched() {
        let local = bitmap(6, &[0]);
        let peer = bitmap(6, &[0, 2, 4]);
        let mut assigned = bitmap(6, &[2, 4]);
        let before = assigned.clone();

        let decision = select_block(&local, &peer, &mut assigned);

        assert_eq!(Decision::Endgame(2), decision);
        assert_eq!(before, assigned);
    }

    #[test]
    fn peer_with_nothing_new() {
        let local = bitmap(4, &[0, 1]);
        let peer = bitmap(4, &[0, 1]);
        let mut assigned = Bitmap::new(4);

        assert_eq!(
            Decision::PeerHasNothing,
            select_block(&local, &peer, &mut assigned)
        );

        let empty_peer = Bitmap::new(4);
        assert_eq!(
            Decision::PeerHasNothing,
            select_block(&local, &empty_peer, &mut assigned)
        );
    }

    #[test]
    fn full_local_map_is_complete_even_when_peer_offers_blocks() {
        let mut local = Bitmap::new(3);
        local.set_all();
        let peer = bitmap(3, &[0, 1, 2]);
        let mut assigned = Bitmap::new(3);

        assert_eq!(Decision::Complete, select_block(&local, &peer, &mut assigned));
    }

    #[test]
    fn zero_blocks_is_complete() {
        let local = Bitmap::new(0);
        let peer = Bitmap::new(0);
        let mut assigned = Bitmap::new(0);

        assert_eq!(Decision::Complete, select_block(&local, &peer, &mut assigned));
    }

    #[test]
    fn single_byte_blocks_terminate() {
        let mut local = Bitmap::new(5);
        let peer = bitmap(5, &[0, 1, 2, 3, 4]);
        let mut assigned = Bitmap::new(5);

        while !local.is_full() {
            match select_block(&local, &peer, &mut assigned) {
                Decision::Assigned(idx) => {
                    local.set(idx);
                }
                other => panic!("unexpected decision {:?}", other),
            }
        }

        assert_eq!(Decision::Complete, select_block(&local, &peer, &mut assigned));
    }
}
