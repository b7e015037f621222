//! Diff a run's findings against the stored broken links.
//!
//! Both sides are ordered by `(source_url, broken_url)` and walked once
//! (merge-join), producing the inserts, updates and deletes that turn the
//! stored set into the new one.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::domain::models::{BrokenLink, Finding, ReconcilePlan};

/// Plan the writes that make `existing` equal to `findings`.
///
/// Neither input needs to be sorted. When `findings` holds the same pair more
/// than once the last occurrence wins.
pub fn reconcile(existing: &[BrokenLink], findings: &[Finding]) -> ReconcilePlan {
    let mut stored: Vec<&BrokenLink> = existing.iter().collect();
    stored.sort_by(|a, b| a.key().cmp(&b.key()));

    let mut latest: HashMap<(&str, &str), &Finding> = HashMap::with_capacity(findings.len());
    for finding in findings {
        latest.insert(finding.key(), finding);
    }
    let mut found: Vec<&Finding> = latest.into_values().collect();
    found.sort_by(|a, b| a.key().cmp(&b.key()));

    let mut plan = ReconcilePlan::default();
    let (mut i, mut j) = (0, 0);
    loop {
        match (stored.get(i), found.get(j)) {
            (Some(old), Some(new)) => match old.key().cmp(&new.key()) {
                Ordering::Less => {
                    plan.deletes.push(old.id);
                    i += 1;
                }
                Ordering::Greater => {
                    plan.inserts.push((*new).clone());
                    j += 1;
                }
                Ordering::Equal => {
                    if old.differs_from(new) {
                        plan.updates.push((old.id, (*new).clone()));
                    } else {
                        plan.unchanged += 1;
                    }
                    i += 1;
                    j += 1;
                }
            },
            (Some(old), None) => {
                plan.deletes.push(old.id);
                i += 1;
            }
            (None, Some(new)) => {
                plan.inserts.push((*new).clone());
                j += 1;
            }
            (None, None) => break,
        }
    }

    plan
}
