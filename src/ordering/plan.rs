//! Collision-free write scheduling.
//!
//! Given the current number of every content page and the number each one
//! must end up with, [`schedule`] emits single-page writes such that after
//! every write no two pages share a number. A store that enforces
//! `(yearbook_id, page_number)` uniqueness row by row accepts every step.
//!
//! A write is emitted as soon as its target number is free. When only
//! cycles remain (a swap, or a move toward the front), one page of the cycle
//! is parked on a number above every current and target number, which
//! frees its slot and lets the rest of the cycle settle.

use crate::model::PageId;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Set one page's number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Write {
    pub page_id: PageId,
    pub number: u32,
}

/// Schedule writes that move every page from `current` to `target`.
///
/// `current` lists each page with its number now; `target` maps pages to
/// their final number. Pages missing from `target` keep their number.
/// Both sides must be injective.
pub fn schedule(current: &[(PageId, u32)], target: &HashMap<PageId, u32>) -> Vec<Write> {
    let mut occupied: HashMap<u32, PageId> = current.iter().map(|&(id, n)| (n, id)).collect();

    // Pending moves ordered by current number so plans are deterministic and
    // gap-closing after a delete runs lowest number first.
    let mut pending: BTreeMap<u32, PageId> = current
        .iter()
        .filter(|(id, n)| target.get(id).is_some_and(|t| t != n))
        .map(|&(id, n)| (n, id))
        .collect();

    let ceiling = current
        .iter()
        .map(|&(_, n)| n)
        .chain(target.values().copied())
        .max()
        .unwrap_or(0);
    let mut next_parking = ceiling + 1;

    let mut parked: HashSet<PageId> = HashSet::new();
    let mut writes = Vec::new();
    while !pending.is_empty() {
        let ready = pending
            .iter()
            .find(|(_, id)| !occupied.contains_key(&target[*id]))
            .map(|(&n, &id)| (n, id));

        let (from, id, to) = match ready {
            Some((from, id)) => (from, id, target[&id]),
            None => {
                // Only cycles left: park the lowest pending page. A page
                // parked twice means the targets were not injective.
                let Some((&from, &id)) = pending.iter().find(|(_, id)| !parked.contains(*id))
                else {
                    break;
                };
                parked.insert(id);
                while occupied.contains_key(&next_parking) {
                    next_parking += 1;
                }
                let slot = next_parking;
                next_parking += 1;
                (from, id, slot)
            }
        };

        occupied.remove(&from);
        occupied.insert(to, id);
        pending.remove(&from);
        if target[&id] != to {
            pending.insert(to, id);
        }
        writes.push(Write {
            page_id: id,
            number: to,
        });
    }
    writes
}

/// Apply `writes` to a position map, asserting no collision. Used by tests
/// and debug checks.
pub fn replay(current: &[(PageId, u32)], writes: &[Write]) -> Result<HashMap<PageId, u32>, String> {
    let mut by_number: HashMap<u32, PageId> = current.iter().map(|&(id, n)| (n, id)).collect();
    let mut by_page: HashMap<PageId, u32> = current.iter().copied().collect();
    for w in writes {
        let old = by_page
            .get(&w.page_id)
            .copied()
            .ok_or_else(|| format!("write for unknown page {}", w.page_id))?;
        if let Some(holder) = by_number.get(&w.number) {
            if *holder != w.page_id {
                return Err(format!("number {} already held by {}", w.number, holder));
            }
        }
        by_number.remove(&old);
        by_number.insert(w.number, w.page_id);
        by_page.insert(w.page_id, w.number);
    }
    Ok(by_page)
}
