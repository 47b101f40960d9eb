//! Reference-state classification.
//!
//! When a resource loses its last anchor the cache must decide, for every
//! resource transitively reachable from it, whether that resource can be
//! evicted, must be kept, or should be demoted to stale. Two depth-first
//! passes over the reachable subgraph answer this:
//!
//! 1. `seek_refs` counts, per resource, how many inbound references come
//!    from *outside* the subgraph. Subscribed resources terminate descent;
//!    they are anchored by definition.
//! 2. `mark_delete` walks the subgraph again carrying its parent's fate.
//!    Externally referenced resources are kept, resources with listeners
//!    become stale roots whose subtrees are kept on their behalf, and
//!    everything else is deleted.
//!
//! Cycles collapse correctly because a back edge into the current stale
//! root does not count as coverage for that root itself.

use crate::cache::CacheItem;
use crate::types::Rid;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Fate of one resource in the reachable subgraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefState {
    None,
    Delete,
    Keep,
    Stale,
}

#[derive(Debug)]
pub(crate) struct RefEntry {
    pub state: RefState,
    pub rc: i64,
}

#[derive(Clone)]
enum Parent {
    Delete,
    Root(Rid),
}

/// Classify every resource reachable from `root`.
///
/// Returns an empty map if the root is missing or still subscribed.
pub(crate) fn evaluate(
    items: &HashMap<Rid, CacheItem>,
    root: &Rid,
) -> HashMap<Rid, RefEntry> {
    let mut map: HashMap<Rid, RefEntry> = HashMap::new();
    let Some(root_item) = items.get(root) else {
        return map;
    };
    if root_item.subscribed {
        return map;
    }

    // Pass 1: external reference counts. Each arrival over an edge inside
    // the subgraph cancels one unit of the target's indirect count; what
    // remains is the number of anchors outside the subgraph.
    map.insert(
        root.clone(),
        RefEntry {
            state: RefState::None,
            rc: root_item.indirect as i64,
        },
    );
    let mut stack: Vec<Rid> = root_item.refs();
    while let Some(rid) = stack.pop() {
        let Some(item) = items.get(&rid) else {
            continue;
        };
        if item.subscribed {
            continue;
        }
        match map.entry(rid) {
            Entry::Occupied(mut e) => {
                e.get_mut().rc -= 1;
            }
            Entry::Vacant(v) => {
                v.insert(RefEntry {
                    state: RefState::None,
                    rc: item.indirect as i64 - 1,
                });
                stack.extend(item.refs());
            }
        }
    }

    // Pass 2: propagate fates.
    let mut stack: Vec<(Rid, Parent)> = vec![(root.clone(), Parent::Delete)];
    while let Some((rid, parent)) = stack.pop() {
        let Some(item) = items.get(&rid) else {
            continue;
        };
        if item.subscribed {
            continue;
        }
        let Some(entry) = map.get_mut(&rid) else {
            continue;
        };
        if entry.state == RefState::Keep {
            continue;
        }
        let next_parent = match parent {
            Parent::Delete => {
                if entry.rc > 0 {
                    entry.state = RefState::Keep;
                    Parent::Root(rid.clone())
                } else if entry.state != RefState::None {
                    continue;
                } else if item.direct > 0 {
                    entry.state = RefState::Stale;
                    Parent::Root(rid.clone())
                } else {
                    entry.state = RefState::Delete;
                    Parent::Delete
                }
            }
            Parent::Root(token) => {
                if rid == token {
                    continue;
                }
                entry.state = RefState::Keep;
                if entry.rc > 0 {
                    Parent::Root(rid.clone())
                } else {
                    Parent::Root(token)
                }
            }
        };
        for child in item.refs() {
            stack.push((child, next_parent.clone()));
        }
    }

    map
}
