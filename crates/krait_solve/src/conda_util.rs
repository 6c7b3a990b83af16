use std::cmp::Ordering;

use krait_conda_types::PackageRecord;

/// Returns the preference order of two candidates for the same dependency,
/// most preferred first.
///
/// Candidates with track features are down-weighted below those without.
/// Otherwise the highest version wins, then the highest build number, then
/// the most recent timestamp.
pub(crate) fn compare_candidates(a: &PackageRecord, b: &PackageRecord) -> Ordering {
    // Fewer track features sort first.
    let a_track_features = a.track_features.len();
    let b_track_features = b.track_features.len();
    match a_track_features.cmp(&b_track_features) {
        Ordering::Equal => {}
        ord => return ord,
    }

    // Higher version first.
    match b.version.cmp(&a.version) {
        Ordering::Equal => {}
        ord => return ord,
    }

    // Higher build number first.
    match b.build_number.cmp(&a.build_number) {
        Ordering::Equal => {}
        ord => return ord,
    }

    // More recent timestamp first.
    match b.timestamp.cmp(&a.timestamp) {
        Ordering::Equal => {}
        ord => return ord,
    }

    // Finally the build string, so the order does not depend on the
    // iteration order of the repodata maps.
    a.build.cmp(&b.build)
}
