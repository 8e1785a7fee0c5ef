//! Quorum arithmetic shared by both protocols.

/// Default fraction of affirmative votes a majority-vote proposal must exceed.
pub const DEFAULT_QUORUM_FRACTION: f64 = 0.5;

/// Smallest number of members that forms a strict majority.
pub fn required_quorum(cluster_size: usize) -> usize {
    if cluster_size == 0 {
        0
    } else {
        cluster_size / 2 + 1
    }
}

/// Check whether `for_votes` out of `cluster_size` clears `fraction`.
///
/// The comparison is strict: exactly half of a cluster does not clear 0.5.
pub fn quorum_satisfied(for_votes: usize, cluster_size: usize, fraction: f64) -> bool {
    if cluster_size == 0 {
        return false;
    }
    for_votes as f64 / cluster_size as f64 > fraction
}

/// Check whether a proposal could still clear `fraction` if every member that
/// has not voted yet voted in favour.
pub fn quorum_reachable(
    for_votes: usize,
    votes_cast: usize,
    cluster_size: usize,
    fraction: f64,
) -> bool {
    let uncast = cluster_size.saturating_sub(votes_cast);
    quorum_satisfied(for_votes + uncast, cluster_size, fraction)
}

/// Number of simultaneously faulty members a BFT cluster of `n` tolerates.
pub fn max_faulty(n: usize) -> usize {
    n.saturating_sub(1) / 3
}

/// Matching messages required in each BFT phase (`2f + 1`).
pub fn bft_quorum_size(n: usize) -> usize {
    2 * max_faulty(n) + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_quorum() {
        assert_eq!(required_quorum(0), 0);
        assert_eq!(required_quorum(1), 1);
        assert_eq!(required_quorum(2), 2);
        assert_eq!(required_quorum(3), 2);
        assert_eq!(required_quorum(4), 3);
        assert_eq!(required_quorum(5), 3);
    }

    #[test]
    fn test_quorum_satisfied_is_strict() {
        assert!(quorum_satisfied(1, 1, DEFAULT_QUORUM_FRACTION));
        assert!(!quorum_satisfied(1, 2, DEFAULT_QUORUM_FRACTION));
        assert!(quorum_satisfied(2, 3, DEFAULT_QUORUM_FRACTION));
        assert!(quorum_satisfied(3, 5, DEFAULT_QUORUM_FRACTION));
        assert!(!quorum_satisfied(0, 0, DEFAULT_QUORUM_FRACTION));
    }

    #[test]
    fn test_custom_fraction() {
        assert!(!quorum_satisfied(3, 4, 0.75));
        assert!(quorum_satisfied(4, 4, 0.75));
    }

    #[test]
    fn test_quorum_reachable() {
        // 3 members, 2 against and no for: best case is 1/3.
        assert!(!quorum_reachable(0, 2, 3, DEFAULT_QUORUM_FRACTION));
        // Proposer voted for, one against: the last vote decides.
        assert!(quorum_reachable(1, 2, 3, DEFAULT_QUORUM_FRACTION));
    }

    #[test]
    fn test_bft_quorum_sizes() {
        assert_eq!(bft_quorum_size(1), 1);
        assert_eq!(bft_quorum_size(2), 1);
        assert_eq!(bft_quorum_size(3), 1);
        assert_eq!(bft_quorum_size(4), 3);
        assert_eq!(bft_quorum_size(7), 5);
        assert_eq!(max_faulty(0), 0);
        assert_eq!(max_faulty(10), 3);
    }
}
