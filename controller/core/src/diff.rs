use ahash::AHashMap as HashMap;
use std::collections::hash_map::Entry;
use std::hash::Hash;

/// Pairing outcome for one resource kind: desired resources matched with
/// tag-discovered actual state, plus the creates and deletes left over.
#[derive(Debug)]
pub struct Partition<D, A> {
    pub matched: Vec<(D, A)>,
    pub unmatched_desired: Vec<D>,
    pub unmatched_actual: Vec<A>,
}

impl<D, A> Default for Partition<D, A> {
    fn default() -> Self {
        Self {
            matched: Vec::new(),
            unmatched_desired: Vec::new(),
            unmatched_actual: Vec::new(),
        }
    }
}

impl<D, A> Partition<D, A> {
    pub fn is_steady(&self) -> bool {
        self.unmatched_desired.is_empty() && self.unmatched_actual.is_empty()
    }
}

/// Pairs desired and actual resources by their `resource-id` key.
///
/// Actuals without a key never match. When several actuals carry the same
/// key, exactly one is kept (the first by `actual_order` ascending) and the
/// rest land in `unmatched_actual`, so duplicate discovery results collapse
/// to a single match plus deletions.
pub fn partition<D, A, K, O>(
    desired: Vec<D>,
    mut actual: Vec<A>,
    desired_key: impl Fn(&D) -> K,
    actual_key: impl Fn(&A) -> Option<K>,
    actual_order: impl Fn(&A) -> O,
) -> Partition<D, A>
where
    K: Eq + Hash,
    O: Ord,
{
    actual.sort_by_key(|a| actual_order(a));

    let mut unmatched_actual = Vec::new();
    let mut by_key: HashMap<K, A> = HashMap::new();
    for a in actual {
        match actual_key(&a) {
            Some(key) => match by_key.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert(a);
                }
                Entry::Occupied(_) => unmatched_actual.push(a),
            },
            None => unmatched_actual.push(a),
        }
    }

    let mut matched = Vec::new();
    let mut unmatched_desired = Vec::new();
    for d in desired {
        match by_key.remove(&desired_key(&d)) {
            Some(a) => matched.push((d, a)),
            None => unmatched_desired.push(d),
        }
    }

    // Leftover actuals are deletions; keep them in discovery sort order.
    unmatched_actual.extend(by_key.into_values());
    unmatched_actual.sort_by_key(|a| actual_order(a));

    Partition {
        matched,
        unmatched_desired,
        unmatched_actual,
    }
}
