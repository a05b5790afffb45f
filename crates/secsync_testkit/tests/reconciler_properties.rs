//! Properties of membership reconciliation.

use proptest::prelude::*;
use secsync_core::MembershipSummary;
use secsync_engine::reconcile_memberships;
use secsync_testkit::prelude::*;

proptest! {
    #![proptest_config(PropTestConfig::default().to_proptest_config())]

    #[test]
    fn install_is_local_minus_remote(
        local in local_memberships_strategy(),
        remote in remote_memberships_strategy(),
    ) {
        let diff = reconcile_memberships(&local, &remote);
        let expected: Vec<_> = chain_identities(&local)
            .difference(&summary_identities(&remote))
            .cloned()
            .collect();
        let actual: Vec<_> = chain_identities(&diff.to_install).into_iter().collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn remove_is_remote_minus_local(
        local in local_memberships_strategy(),
        remote in remote_memberships_strategy(),
    ) {
        let diff = reconcile_memberships(&local, &remote);
        let expected: Vec<_> = summary_identities(&remote)
            .difference(&chain_identities(&local))
            .cloned()
            .collect();
        let actual: Vec<_> = summary_identities(&diff.to_remove).into_iter().collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn matching_sets_need_nothing(local in local_memberships_strategy()) {
        let remote: Vec<_> = local.iter().filter_map(MembershipSummary::for_chain).collect();
        prop_assert!(reconcile_memberships(&local, &remote).is_empty());
    }

    #[test]
    fn applying_the_diff_converges(
        local in local_memberships_strategy(),
        remote in remote_memberships_strategy(),
    ) {
        let diff = reconcile_memberships(&local, &remote);
        let mut after: Vec<_> = remote
            .into_iter()
            .filter(|summary| !diff.to_remove.contains(summary))
            .collect();
        after.extend(diff.to_install.iter().filter_map(MembershipSummary::for_chain));
        prop_assert!(reconcile_memberships(&local, &after).is_empty());
    }

    #[test]
    fn outputs_keep_input_order(
        local in local_memberships_strategy(),
        remote in remote_memberships_strategy(),
    ) {
        let diff = reconcile_memberships(&local, &remote);
        let positions: Vec<_> = diff
            .to_install
            .iter()
            .filter_map(|chain| local.iter().position(|c| c == chain))
            .collect();
        prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }
}

#[test]
fn documented_convergence_example() {
    let local = vec![membership_chain(1, b'X'), membership_chain(2, b'Y')];
    let remote = vec![membership_summary(2, b'Y'), membership_summary(3, b'Z')];

    let diff = reconcile_memberships(&local, &remote);
    assert_eq!(diff.to_install, vec![membership_chain(1, b'X')]);
    assert_eq!(diff.to_remove, vec![membership_summary(3, b'Z')]);

    let after = vec![membership_summary(2, b'Y'), membership_summary(1, b'X')];
    assert!(reconcile_memberships(&local, &after).is_empty());
}
