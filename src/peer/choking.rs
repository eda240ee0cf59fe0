use super::peer_id::PeerId;
use super::session::NeighborSession;
use rand::seq::SliceRandom;
use std::cmp::Reverse;
use std::sync::Arc;

/// Choke/unchoke transitions produced by one selection round.
///
/// The scheduler flips the preferred/optimistic flags itself; the caller is
/// responsible for sending the CHOKE and UNCHOKE messages.
#[derive(Debug, Default)]
pub struct Transition {
    /// Neighbors that lost their slot and are not held open by the other set.
    pub choke: Vec<Arc<NeighborSession>>,
    /// Neighbors that gained a slot and were not already unchoked by the other set.
    pub unchoke: Vec<Arc<NeighborSession>>,
    /// The new selection sorted by peer ID, present only when it differs
    /// from the previous one.
    pub changed: Option<Vec<PeerId>>,
}

/// Preferred and optimistic neighbor selection.
///
/// Preferred neighbors reward reciprocity: the interested neighbors that
/// uploaded the most to the host during the last interval. Once the host
/// has the whole file there is nothing to reciprocate and the picks are
/// random. Optimistic neighbors are random interested neighbors that are
/// still choked, giving newcomers a chance to prove themselves.
#[derive(Debug, Clone, Copy)]
pub struct ChokeScheduler {
    preferred_count: usize,
    optimistic_count: usize,
}

impl ChokeScheduler {
    pub fn new(preferred_count: usize, optimistic_count: usize) -> Self {
        Self {
            preferred_count,
            optimistic_count,
        }
    }

    /// Recomputes the preferred set and resets every session's
    /// sub-interval counters.
    pub fn select_preferred(
        &self,
        sessions: &[Arc<NeighborSession>],
        host_complete: bool,
    ) -> Transition {
        let old: Vec<Arc<NeighborSession>> = sessions
            .iter()
            .filter(|s| s.is_preferred_by_host())
            .cloned()
            .collect();

        let mut candidates: Vec<Arc<NeighborSession>> = if host_complete {
            let mut candidates: Vec<_> = sessions
                .iter()
                .filter(|s| s.is_interested_in_host() && !s.is_optimistic_by_host())
                .cloned()
                .collect();
            candidates.shuffle(&mut rand::rng());
            candidates
        } else {
            // Shuffle first so the stable sort breaks rate ties randomly.
            let mut ranked: Vec<_> = sessions
                .iter()
                .filter(|s| s.is_interested_in_host())
                .map(|s| (s.counters().downloaded_sub_rate(), s.clone()))
                .collect();
            ranked.shuffle(&mut rand::rng());
            ranked.sort_by_key(|(rate, _)| Reverse(*rate));
            ranked.into_iter().map(|(_, s)| s).collect()
        };

        for session in sessions {
            session.counters().reset_sub();
        }

        candidates.truncate(self.preferred_count);

        let mut transition = Transition::default();
        for session in &old {
            if !contains(&candidates, session) {
                session.set_preferred_by_host(false);
                if !session.is_optimistic_by_host() {
                    transition.choke.push(session.clone());
                }
            }
        }
        for session in &candidates {
            if !contains(&old, session) {
                session.set_preferred_by_host(true);
                if !session.is_optimistic_by_host() {
                    transition.unchoke.push(session.clone());
                }
            }
        }

        transition.changed = changed_selection(&old, &candidates);
        transition
    }

    /// Recomputes the optimistic set.
    ///
    /// When fewer choked, interested neighbors exist than there are slots,
    /// previous optimistic picks that are still interested are kept to fill
    /// the gap.
    pub fn select_optimistic(&self, sessions: &[Arc<NeighborSession>]) -> Transition {
        let mut rng = rand::rng();

        let old: Vec<Arc<NeighborSession>> = sessions
            .iter()
            .filter(|s| s.is_optimistic_by_host())
            .cloned()
            .collect();

        let mut candidates: Vec<Arc<NeighborSession>> = sessions
            .iter()
            .filter(|s| s.is_interested_in_host() && !s.is_unchoked_by_host())
            .cloned()
            .collect();
        candidates.shuffle(&mut rng);

        let shortfall = self.optimistic_count.saturating_sub(candidates.len());
        candidates.truncate(self.optimistic_count);

        if shortfall > 0 {
            let mut backfill: Vec<Arc<NeighborSession>> = old
                .iter()
                .filter(|s| s.is_interested_in_host() && !contains(&candidates, s))
                .cloned()
                .collect();
            backfill.shuffle(&mut rng);
            candidates.extend(backfill.into_iter().take(shortfall));
        }

        let mut transition = Transition::default();
        for session in &old {
            if !contains(&candidates, session) {
                session.set_optimistic_by_host(false);
                if !session.is_preferred_by_host() {
                    transition.choke.push(session.clone());
                }
            }
        }
        for session in &candidates {
            if !contains(&old, session) {
                session.set_optimistic_by_host(true);
                if !session.is_preferred_by_host() {
                    transition.unchoke.push(session.clone());
                }
            }
        }

        transition.changed = changed_selection(&old, &candidates);
        transition
    }

    /// Drops every selection and restarts sub-interval counting. Used while
    /// the swarm is paused.
    pub fn clear_selections(&self, sessions: &[Arc<NeighborSession>]) {
        for session in sessions {
            session.set_preferred_by_host(false);
            session.set_optimistic_by_host(false);
            session.counters().reset_sub();
        }
    }
}

fn contains(set: &[Arc<NeighborSession>], session: &Arc<NeighborSession>) -> bool {
    set.iter().any(|s| s.peer_id() == session.peer_id())
}

fn sorted_ids(set: &[Arc<NeighborSession>]) -> Vec<PeerId> {
    let mut ids: Vec<PeerId> = set.iter().map(|s| s.peer_id()).collect();
    ids.sort_unstable();
    ids
}

fn changed_selection(
    old: &[Arc<NeighborSession>],
    new: &[Arc<NeighborSession>],
) -> Option<Vec<PeerId>> {
    let new_ids = sorted_ids(new);
    if sorted_ids(old) == new_ids {
        None
    } else {
        Some(new_ids)
    }
}
