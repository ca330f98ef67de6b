use std::cmp::Ordering as CmpOrdering;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::cluster::PodInfo;
use crate::config::Ordering;

/// Put the kill-set in termination order.
pub fn reorder(pods: &mut [PodInfo], order: Ordering) {
    reorder_with(pods, order, &mut rand::thread_rng());
}

/// [`reorder`] with a caller-provided random source for [`Ordering::Random`]
pub fn reorder_with<R: Rng + ?Sized>(pods: &mut [PodInfo], order: Ordering, rng: &mut R) {
    match order {
        Ordering::Random => pods.shuffle(rng),
        Ordering::Default => {}
        Ordering::Cost => pods.sort_by_key(PodInfo::deletion_cost),
        Ordering::Youngest => pods.sort_by(|a, b| by_start_time(a, b, true)),
        Ordering::Oldest => pods.sort_by(|a, b| by_start_time(a, b, false)),
    }
}

/// Compare start times, newest first when `newest_first`. Pods with no
/// recorded start time go last either way.
fn by_start_time(a: &PodInfo, b: &PodInfo, newest_first: bool) -> CmpOrdering {
    match (a.start_time, b.start_time) {
        (Some(x), Some(y)) => chronological(x, y, newest_first),
        (Some(_), None) => CmpOrdering::Less,
        (None, Some(_)) => CmpOrdering::Greater,
        (None, None) => CmpOrdering::Equal,
    }
}

fn chronological(x: DateTime<Utc>, y: DateTime<Utc>, newest_first: bool) -> CmpOrdering {
    if newest_first {
        y.cmp(&x)
    } else {
        x.cmp(&y)
    }
}
