use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
    fmt,
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::{hierarchy::HierarchyIndex, manager::Snapshot, myprocess::ProcessRecord};

/// Ordering applied to every group of siblings.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone, Copy, Default, Hash)]
pub enum SortKey {
    #[default]
    Pid,
    Name,
    Owner,
    /// largest total first
    Memory,
}

impl SortKey {
    pub const ALL: [SortKey; 4] = [SortKey::Pid, SortKey::Name, SortKey::Owner, SortKey::Memory];

    pub fn compare(self, a: &ProcessRecord, b: &ProcessRecord) -> Ordering {
        match self {
            SortKey::Pid => a.pid.cmp(&b.pid),
            SortKey::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
            SortKey::Owner => a.owner.to_lowercase().cmp(&b.owner.to_lowercase()),
            SortKey::Memory => b.total().total_cmp(&a.total()),
        }
    }

    pub fn next(self) -> Self {
        match self {
            SortKey::Pid => SortKey::Name,
            SortKey::Name => SortKey::Owner,
            SortKey::Owner => SortKey::Memory,
            SortKey::Memory => SortKey::Pid,
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SortKey::Pid => "pid",
            SortKey::Name => "name",
            SortKey::Owner => "owner",
            SortKey::Memory => "memory",
        };
        f.write_str(name)
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pid" => Ok(SortKey::Pid),
            "name" | "alphabet" => Ok(SortKey::Name),
            "owner" | "user" => Ok(SortKey::Owner),
            "memory" | "mem" | "total" => Ok(SortKey::Memory),
            other => Err(format!("unknown sort key `{other}`, expected pid, name, owner or memory")),
        }
    }
}

/// Ordered roots and, for every process with children, its ordered children.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Forest {
    pub roots: Vec<u32>,
    children: HashMap<u32, Vec<u32>>,
}

/// One visible line of the forest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForestRow {
    pub pid: u32,
    pub depth: usize,
    /// box drawing prefix, empty for roots
    pub guide: String,
    pub has_children: bool,
    pub expanded: bool,
}

impl Forest {
    pub fn build(procs: &Snapshot, index: &HierarchyIndex, sort: SortKey) -> Self {
        let mut forest = Forest::default();
        let mut placed = HashSet::new();

        forest.roots = sorted(index.roots(), procs, sort, &placed);
        placed.extend(forest.roots.iter().copied());
        for root in forest.roots.clone() {
            forest.place(root, procs, index, sort, &mut placed);
        }

        //parents that loop back on each other have no root,
        //so the loop is cut at its lowest pid
        let mut detached = vec![];
        for proc in procs.iter() {
            if placed.contains(&proc.pid) {
                continue;
            }
            let entry = cycle_entry(proc.pid, procs);
            if !placed.insert(entry) {
                continue;
            }
            detached.push(entry);
            forest.place(entry, procs, index, sort, &mut placed);
        }
        forest.roots.extend(sorted(&detached, procs, sort, &HashSet::new()));

        forest
    }

    fn place(
        &mut self,
        pid: u32,
        procs: &Snapshot,
        index: &HierarchyIndex,
        sort: SortKey,
        placed: &mut HashSet<u32>,
    ) {
        let mut stack = vec![pid];
        while let Some(pid) = stack.pop() {
            let children = sorted(index.children(pid), procs, sort, placed);
            if children.is_empty() {
                continue;
            }
            placed.extend(children.iter().copied());
            stack.extend(children.iter().copied());
            self.children.insert(pid, children);
        }
    }

    pub fn children(&self, pid: u32) -> &[u32] {
        self.children.get(&pid).map_or(&[], |c| c.as_slice())
    }

    ///pids that have children
    pub fn parents(&self) -> impl Iterator<Item = u32> + '_ {
        self.children.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.roots.len() + self.children.values().map(|c| c.len()).sum::<usize>()
    }

    ///depth first listing, the children of collapsed pids are skipped
    pub fn rows(&self, collapsed: &HashSet<u32>) -> Vec<ForestRow> {
        let mut rows = vec![];
        for root in &self.roots {
            self.push_rows(*root, 0, "", true, collapsed, &mut rows);
        }
        rows
    }

    fn push_rows(
        &self,
        pid: u32,
        depth: usize,
        indent: &str,
        last: bool,
        collapsed: &HashSet<u32>,
        rows: &mut Vec<ForestRow>,
    ) {
        let children = self.children(pid);
        let expanded = !collapsed.contains(&pid);
        let (guide, child_indent) = if depth == 0 {
            (String::new(), String::new())
        } else if last {
            (format!("{indent}└─"), format!("{indent}  "))
        } else {
            (format!("{indent}├─"), format!("{indent}│ "))
        };
        rows.push(ForestRow {
            pid,
            depth,
            guide,
            has_children: !children.is_empty(),
            expanded,
        });
        if !expanded {
            return;
        }
        for (i, child) in children.iter().enumerate() {
            let last = i + 1 == children.len();
            self.push_rows(*child, depth + 1, &child_indent, last, collapsed, rows);
        }
    }
}

///pids present in the snapshot and not yet placed, in sort order.
///sort_by is stable, so ties keep listing order
fn sorted(pids: &[u32], procs: &Snapshot, sort: SortKey, placed: &HashSet<u32>) -> Vec<u32> {
    let mut found: Vec<&ProcessRecord> = pids
        .iter()
        .filter(|pid| !placed.contains(*pid))
        .filter_map(|pid| procs.get(*pid))
        .collect();
    found.sort_by(|a, b| sort.compare(a, b));
    found.iter().map(|p| p.pid).collect()
}

///lowest pid of the loop reached by following parents from `pid`
fn cycle_entry(pid: u32, procs: &Snapshot) -> u32 {
    let mut path: Vec<u32> = vec![];
    let mut current = pid;
    while let Some(proc) = procs.get(current) {
        if let Some(start) = path.iter().position(|p| *p == current) {
            return path[start..].iter().copied().min().unwrap_or(pid);
        }
        path.push(current);
        current = proc.parent;
    }
    pid
}
