use std::collections::{HashMap, HashSet};

use log::debug;

use crate::{helpers::round2, manager::Snapshot};

/// parent pid -> children, in the order the children were listed
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HierarchyIndex {
    children: HashMap<u32, Vec<u32>>,
    roots: Vec<u32>,
}

impl HierarchyIndex {
    pub fn build(snapshot: &Snapshot) -> Self {
        let mut index = Self::default();
        for proc in snapshot.iter() {
            index.insert(proc.parent, proc.pid);
            //parent already exited or is outside what we can see
            if !snapshot.contains(proc.parent) {
                index.roots.push(proc.pid);
            }
        }
        index
    }

    pub fn insert(&mut self, parent: u32, child: u32) {
        self.children.entry(parent).or_default().push(child);
    }

    pub fn children(&self, pid: u32) -> &[u32] {
        self.children.get(&pid).map_or(&[], |c| c.as_slice())
    }

    pub fn roots(&self) -> &[u32] {
        &self.roots
    }
}

///total memory of every process: its own plus that of all its descendants
pub fn aggregate(snapshot: &Snapshot, index: &HierarchyIndex) -> HashMap<u32, f64> {
    let mut memo = HashMap::with_capacity(snapshot.len());
    let mut on_stack = HashSet::new();
    for proc in snapshot.iter() {
        total_of(proc.pid, snapshot, index, &mut memo, &mut on_stack);
    }
    memo
}

fn total_of(
    pid: u32,
    snapshot: &Snapshot,
    index: &HierarchyIndex,
    memo: &mut HashMap<u32, f64>,
    on_stack: &mut HashSet<u32>,
) -> f64 {
    if let Some(total) = memo.get(&pid) {
        return *total;
    }
    let Some(proc) = snapshot.get(pid) else {
        return 0.;
    };
    //a pid already being summed means the parent links loop, the loop adds nothing
    if !on_stack.insert(pid) {
        debug!("parent cycle through pid {pid}");
        return 0.;
    }

    let mut total = proc.memory;
    for &child in index.children(pid) {
        if snapshot.contains(child) {
            total += total_of(child, snapshot, index, memo, on_stack);
        }
    }
    on_stack.remove(&pid);

    let total = round2(total);
    memo.insert(pid, total);
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::myprocess::ProcessRecord;

    fn snapshot(procs: &[(u32, u32, f64)]) -> Snapshot {
        Snapshot::from_records(
            procs
                .iter()
                .map(|&(pid, parent, memory)| ProcessRecord::test(pid, parent, "p", memory)),
        )
    }

    #[test]
    fn roots_are_pids_with_unknown_parent() {
        let snap = snapshot(&[(1, 0, 0.), (2, 1, 0.), (3, 99, 0.)]);
        let index = HierarchyIndex::build(&snap);
        assert_eq!(index.roots(), &[1, 3]);
        assert_eq!(index.children(1), &[2]);
        assert_eq!(index.children(99), &[3]);
        assert!(index.children(2).is_empty());
    }

    #[test]
    fn children_keep_listing_order() {
        let snap = snapshot(&[(1, 0, 0.), (30, 1, 0.), (10, 1, 0.), (20, 1, 0.)]);
        let index = HierarchyIndex::build(&snap);
        assert_eq!(index.children(1), &[30, 10, 20]);
    }

    #[test]
    fn totals_roll_up_descendants() {
        let snap = snapshot(&[
            (1, 0, 1.),
            (2, 1, 2.5),
            (3, 2, 0.25),
            (4, 1, 0.1),
            (5, 77, 3.),
        ]);
        let index = HierarchyIndex::build(&snap);
        let totals = aggregate(&snap, &index);

        assert_eq!(totals.len(), snap.len());
        assert_eq!(totals[&3], 0.25);
        assert_eq!(totals[&2], 2.75);
        assert_eq!(totals[&1], 3.85);
        assert_eq!(totals[&5], 3.);
        for proc in snap.iter() {
            assert!(totals[&proc.pid] >= proc.memory);
            let children: f64 = index.children(proc.pid).iter().map(|c| totals[c]).sum();
            assert!((totals[&proc.pid] - (proc.memory + children)).abs() <= 0.01);
        }
    }

    #[test]
    fn totals_are_rounded() {
        let snap = snapshot(&[(1, 0, 0.1), (2, 1, 0.2)]);
        let index = HierarchyIndex::build(&snap);
        let totals = aggregate(&snap, &index);
        assert_ne!(0.1 + 0.2, 0.3);
        assert_eq!(totals[&1], 0.3);
        assert_eq!(totals[&2], 0.2);
        for proc in snap.iter() {
            assert!(totals[&proc.pid] >= proc.memory);
        }
    }

    #[test]
    fn cycle_terminates_with_finite_totals() {
        let snap = snapshot(&[(5, 7, 1.5), (7, 5, 2.25)]);
        let mut index = HierarchyIndex::default();
        index.insert(7, 5);
        index.insert(5, 7);

        let totals = aggregate(&snap, &index);
        assert!(totals[&5].is_finite() && totals[&5] >= 1.5);
        assert!(totals[&7].is_finite() && totals[&7] >= 2.25);
        //5 is summed first, the edge back into it counts as nothing
        assert_eq!(totals[&7], 2.25);
        assert_eq!(totals[&5], 3.75);
    }

    #[test]
    fn self_parent_does_not_loop() {
        let snap = snapshot(&[(4, 4, 1.)]);
        let index = HierarchyIndex::build(&snap);
        assert!(index.roots().is_empty());
        assert_eq!(aggregate(&snap, &index)[&4], 1.);
    }

    #[test]
    fn dangling_children_are_skipped() {
        let snap = snapshot(&[(1, 0, 1.)]);
        let mut index = HierarchyIndex::build(&snap);
        index.insert(1, 42);
        assert_eq!(aggregate(&snap, &index)[&1], 1.);
    }

    #[test]
    fn empty_snapshot() {
        let snap = snapshot(&[]);
        let index = HierarchyIndex::build(&snap);
        assert!(index.roots().is_empty());
        assert!(aggregate(&snap, &index).is_empty());
    }
}
