//! Update-policy analysis: is a cached timestamp stale under a policy, and
//! which of two policies is the stricter one.

use chrono::{Local, LocalResult, TimeZone};

use quarry_core::types::{ChecksumPolicy, Nature, RemoteRepository, RepositoryPolicy, UpdatePolicy};

/// Whether an item last touched at `last_modified_ms` must be refreshed at
/// `now_ms` under `policy`. Both timestamps are Unix milliseconds.
pub fn is_update_required(now_ms: i64, last_modified_ms: i64, policy: UpdatePolicy) -> bool {
    match policy {
        UpdatePolicy::Never => false,
        UpdatePolicy::Always => true,
        UpdatePolicy::Daily => last_modified_ms < local_midnight_millis(now_ms),
        UpdatePolicy::Interval(minutes) => {
            now_ms - i64::from(minutes) * 60_000 >= last_modified_ms
        }
    }
}

/// The stricter (more frequently updating) of two policies, used when merging
/// mirror policies.
pub fn effective_policy(a: UpdatePolicy, b: UpdatePolicy) -> UpdatePolicy {
    if ordinal(a) <= ordinal(b) {
        a
    } else {
        b
    }
}

/// The policy of `remote` for items of the given nature. Natures spanning
/// releases and snapshots merge both policies: enabled if either side is,
/// stricter update policy, stricter checksum policy.
pub fn nature_policy(remote: &RemoteRepository, nature: Nature) -> RepositoryPolicy {
    match nature {
        Nature::Release => remote.release_policy.clone(),
        Nature::Snapshot => remote.snapshot_policy.clone(),
        Nature::ReleaseOrSnapshot => {
            let release = &remote.release_policy;
            let snapshot = &remote.snapshot_policy;
            RepositoryPolicy {
                enabled: release.enabled || snapshot.enabled,
                update_policy: effective_policy(release.update_policy, snapshot.update_policy),
                checksum_policy: strict_checksum(release.checksum_policy, snapshot.checksum_policy),
            }
        }
    }
}

/// Expressed in minutes-between-updates; smaller is stricter.
fn ordinal(policy: UpdatePolicy) -> i64 {
    match policy {
        UpdatePolicy::Always => 0,
        UpdatePolicy::Interval(minutes) => i64::from(minutes),
        UpdatePolicy::Daily => 24 * 60,
        UpdatePolicy::Never => i64::MAX,
    }
}

fn strict_checksum(a: ChecksumPolicy, b: ChecksumPolicy) -> ChecksumPolicy {
    let rank = |policy: ChecksumPolicy| match policy {
        ChecksumPolicy::Fail => 0,
        ChecksumPolicy::Warn => 1,
        ChecksumPolicy::Ignore => 2,
    };
    if rank(a) <= rank(b) {
        a
    } else {
        b
    }
}

/// Unix milliseconds of the most recent local midnight before `now_ms`.
pub(crate) fn local_midnight_millis(now_ms: i64) -> i64 {
    let now = match Local.timestamp_millis_opt(now_ms) {
        LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => t,
        LocalResult::None => return now_ms,
    };
    let midnight = match now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("00:00:00 is valid")
        .and_local_timezone(Local)
    {
        LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => t,
        // a DST gap swallowing midnight: fall back to "now", which makes
        // every earlier timestamp stale
        LocalResult::None => return now_ms,
    };
    midnight.timestamp_millis()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const NOW: i64 = 1_722_600_000_000;

    #[test]
    fn never_and_always_ignore_timestamps() {
        assert!(!is_update_required(NOW, 0, UpdatePolicy::Never));
        assert!(!is_update_required(NOW, NOW, UpdatePolicy::Never));
        assert!(is_update_required(NOW, NOW, UpdatePolicy::Always));
    }

    #[test]
    fn daily_flips_exactly_at_local_midnight() {
        let midnight = local_midnight_millis(NOW);
        assert!(is_update_required(NOW, midnight - 1, UpdatePolicy::Daily));
        assert!(!is_update_required(NOW, midnight, UpdatePolicy::Daily));
        assert!(!is_update_required(NOW, midnight + 1, UpdatePolicy::Daily));
    }

    #[rstest]
    #[case(60 * 60_000, true)] // exactly 60 minutes old
    #[case(60 * 60_000 - 1_000, false)] // 59m59s old
    #[case(60 * 60_000 + 1, true)]
    fn interval_boundary_is_inclusive(#[case] age_ms: i64, #[case] required: bool) {
        assert_eq!(
            is_update_required(NOW, NOW - age_ms, UpdatePolicy::Interval(60)),
            required
        );
    }

    #[rstest]
    #[case(UpdatePolicy::Always, UpdatePolicy::Never, UpdatePolicy::Always)]
    #[case(UpdatePolicy::Daily, UpdatePolicy::Interval(60), UpdatePolicy::Interval(60))]
    #[case(UpdatePolicy::Interval(10), UpdatePolicy::Interval(240), UpdatePolicy::Interval(10))]
    #[case(UpdatePolicy::Never, UpdatePolicy::Daily, UpdatePolicy::Daily)]
    fn effective_policy_prefers_the_stricter(
        #[case] a: UpdatePolicy,
        #[case] b: UpdatePolicy,
        #[case] expected: UpdatePolicy,
    ) {
        assert_eq!(effective_policy(a, b), expected);
        assert_eq!(effective_policy(b, a), expected);
    }

    #[test]
    fn release_or_snapshot_merges_both_sides() {
        let mut remote = RemoteRepository::new("central", "https://repo.example.org/");
        remote.release_policy.enabled = false;
        remote.release_policy.update_policy = UpdatePolicy::Never;
        remote.release_policy.checksum_policy = ChecksumPolicy::Fail;
        remote.snapshot_policy.update_policy = UpdatePolicy::Interval(30);

        let merged = nature_policy(&remote, Nature::ReleaseOrSnapshot);
        assert!(merged.enabled, "enabled when either side is");
        assert_eq!(merged.update_policy, UpdatePolicy::Interval(30));
        assert_eq!(merged.checksum_policy, ChecksumPolicy::Fail);

        let release_only = nature_policy(&remote, Nature::Release);
        assert!(!release_only.enabled);
    }
}
