use std::collections::{HashMap, HashSet};

use log::{debug, info};

use crate::{
    helpers::round2,
    hierarchy::{aggregate, HierarchyIndex},
    myprocess::{AncestorLink, ProcessRecord},
    sorted::{Forest, SortKey},
    source::{SnapshotSource, SysinfoSource},
};

///walks up further than this are treated as a loop
pub const MAX_ANCESTOR_DEPTH: usize = 1000;

const UNKNOWN_OWNER: &str = "unknown";

/// Which processes a snapshot keeps.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ProcFilter {
    #[default]
    All,
    Pid(u32),
    /// case insensitive, whole name
    Name(String),
}

impl ProcFilter {
    ///numbers are pids, anything else a process name
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            Self::All
        } else if let Ok(pid) = text.parse::<u32>() {
            Self::Pid(pid)
        } else {
            Self::Name(text.to_lowercase())
        }
    }

    pub fn matches(&self, pid: u32, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Pid(p) => *p == pid,
            Self::Name(n) => name.to_lowercase() == *n,
        }
    }
}

/// Normalized records of one refresh, keyed by pid, kept in listing order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    procs: Vec<ProcessRecord>,
    positions: HashMap<u32, usize>,
}

impl Snapshot {
    pub fn from_records(records: impl IntoIterator<Item = ProcessRecord>) -> Self {
        let mut snapshot = Self::default();
        for proc in records {
            if snapshot.positions.contains_key(&proc.pid) {
                debug!("pid {} listed twice, keeping first", proc.pid);
                continue;
            }
            snapshot.positions.insert(proc.pid, snapshot.procs.len());
            snapshot.procs.push(proc);
        }
        snapshot
    }

    pub fn get(&self, pid: u32) -> Option<&ProcessRecord> {
        self.positions.get(&pid).map(|&i| &self.procs[i])
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.positions.contains_key(&pid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessRecord> {
        self.procs.iter()
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    pub fn with_totals(mut self, totals: &HashMap<u32, f64>) -> Self {
        for proc in self.procs.iter_mut() {
            proc.total_memory = totals.get(&proc.pid).copied();
        }
        self
    }
}

///strips `DOMAIN\` style prefixes
pub fn normalize_owner(owner: Option<&str>) -> String {
    match owner.and_then(|o| o.rsplit(['\\', '/']).next()) {
        Some(o) if !o.is_empty() => o.to_string(),
        _ => UNKNOWN_OWNER.to_string(),
    }
}

///reads every listed process, anything that cannot be read fully is left out
pub fn normalize<S: SnapshotSource + ?Sized>(source: &S, filter: &ProcFilter) -> Snapshot {
    let mut records = vec![];
    let mut dropped = 0usize;
    for raw in source.processes() {
        let raw = match raw {
            Ok(raw) => raw,
            Err(err) => {
                debug!("dropping process: {err}");
                dropped += 1;
                continue;
            }
        };
        let name = raw.name.unwrap_or_default();
        if !filter.matches(raw.pid, &name) {
            continue;
        }
        let memory = match source.memory_percent(raw.pid) {
            Ok(memory) => round2(memory.clamp(0., 100.)),
            Err(err) => {
                debug!("dropping process: {err}");
                dropped += 1;
                continue;
            }
        };

        records.push(ProcessRecord {
            pid: raw.pid,
            parent: raw.parent,
            name,
            owner: normalize_owner(raw.owner.as_deref()),
            memory,
            ancestors: ancestor_chain(source, raw.pid),
            total_memory: None,
        });
    }
    if dropped > 0 {
        debug!("{dropped} processes could not be read");
    }
    Snapshot::from_records(records)
}

///parents of `pid` as the source reports them right now, nearest first.
///stops at the top, or at the first parent that cannot be read
pub fn ancestor_chain<S: SnapshotSource + ?Sized>(source: &S, pid: u32) -> Vec<AncestorLink> {
    let mut chain = vec![];
    let mut visited = HashSet::from([pid]);
    let mut current = pid;
    while chain.len() < MAX_ANCESTOR_DEPTH {
        let parent = match source.parent(current) {
            Ok(Some(parent)) => parent,
            Ok(None) => break,
            Err(err) => {
                debug!("ancestors of {pid} cut short: {err}");
                break;
            }
        };
        if !visited.insert(parent.pid) {
            debug!("ancestors of {pid} loop back to {}", parent.pid);
            break;
        }
        let memory = match source.memory_percent(parent.pid) {
            Ok(memory) => round2(memory.clamp(0., 100.)),
            Err(err) => {
                debug!("ancestors of {pid} cut short: {err}");
                break;
            }
        };
        current = parent.pid;
        chain.push(AncestorLink {
            pid: parent.pid,
            name: parent.name,
            memory,
        });
    }
    chain
}

/// Aggregated result of one refresh.
#[derive(Clone, Debug, Default)]
pub struct ProcessTable {
    pub procs: Snapshot,
    pub index: HierarchyIndex,
}

impl ProcessTable {
    pub fn build<S: SnapshotSource + ?Sized>(source: &S, filter: &ProcFilter) -> Self {
        let snapshot = normalize(source, filter);
        let index = HierarchyIndex::build(&snapshot);
        let totals = aggregate(&snapshot, &index);
        Self {
            procs: snapshot.with_totals(&totals),
            index,
        }
    }

    pub fn view(&self, sort: SortKey) -> Forest {
        Forest::build(&self.procs, &self.index, sort)
    }
}

pub struct ProcManager<S = SysinfoSource> {
    source: S,
    filter: ProcFilter,
    table: ProcessTable,
}

impl ProcManager<SysinfoSource> {
    pub fn new(filter: ProcFilter) -> Self {
        Self::with_source(SysinfoSource::new(), filter)
    }
}

impl<S: SnapshotSource> ProcManager<S> {
    pub fn with_source(source: S, filter: ProcFilter) -> Self {
        let mut man = Self {
            source,
            filter,
            table: ProcessTable::default(),
        };
        man.update();
        man
    }

    ///takes a fresh snapshot and recomputes everything from it
    pub fn update(&mut self) {
        self.source.refresh();
        self.table = ProcessTable::build(&self.source, &self.filter);
        info!(
            "refreshed {} processes, {} roots",
            self.table.procs.len(),
            self.table.index.roots().len()
        );
    }

    ///reorders the current snapshot, does not sample again
    pub fn view(&self, sort: SortKey) -> Forest {
        self.table.view(sort)
    }

    pub fn refresh_and_build_view(&mut self, sort: SortKey) -> Forest {
        self.update();
        self.view(sort)
    }

    pub fn procs(&self) -> &Snapshot {
        &self.table.procs
    }

    pub fn set_filter(&mut self, filter: ProcFilter) {
        self.filter = filter;
    }

    #[cfg(test)]
    pub fn source(&self) -> &S {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::fake::FakeSource;
    use rstest::rstest;

    fn sample() -> FakeSource {
        FakeSource::new()
            .with(1, 0, "init", 0.5)
            .with(10, 1, "sshd", 1.25)
            .with(11, 10, "bash", 2.)
            .with(12, 11, "vim", 4.)
            .with(20, 1, "cron", 0.25)
    }

    #[rstest]
    #[case("", ProcFilter::All)]
    #[case("  ", ProcFilter::All)]
    #[case("42", ProcFilter::Pid(42))]
    #[case("Firefox", ProcFilter::Name("firefox".to_string()))]
    #[case("-1", ProcFilter::Name("-1".to_string()))]
    fn parse_filter(#[case] text: &str, #[case] expected: ProcFilter) {
        assert_eq!(ProcFilter::parse(text), expected);
    }

    #[rstest]
    #[case(Some("CORP\\alice"), "alice")]
    #[case(Some("host/bob"), "bob")]
    #[case(Some("carol"), "carol")]
    #[case(Some("CORP\\"), "unknown")]
    #[case(Some(""), "unknown")]
    #[case(None, "unknown")]
    fn owner_is_normalized(#[case] raw: Option<&str>, #[case] expected: &str) {
        assert_eq!(normalize_owner(raw), expected);
    }

    #[test]
    fn normalize_keeps_listing_order() {
        let snap = normalize(&sample(), &ProcFilter::All);
        let pids: Vec<u32> = snap.iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![1, 10, 11, 12, 20]);
        assert!(snap.iter().all(|p| p.total_memory.is_none()));
    }

    #[test]
    fn unreadable_processes_are_dropped() {
        let source = sample().denied(11);
        let snap = normalize(&source, &ProcFilter::All);
        assert_eq!(snap.len(), 4);
        assert!(!snap.contains(11));
        assert_eq!(snap.get(12).map(|p| p.parent), Some(11));
        assert_eq!(snap.get(10).map(|p| p.name.as_str()), Some("sshd"));
    }

    #[test]
    fn process_exiting_after_listing_is_dropped() {
        let source = sample().gone(20);
        let snap = normalize(&source, &ProcFilter::All);
        assert_eq!(snap.len(), 4);
        assert!(!snap.contains(20));
    }

    #[test]
    fn missing_owner_becomes_unknown() {
        let mut source = sample();
        source.add(30, 1, "svc", "", 0.);
        source.add(31, 1, "svc", "NT AUTHORITY\\SYSTEM", 0.);
        let snap = normalize(&source, &ProcFilter::All);
        assert_eq!(snap.get(30).map(|p| p.owner.as_str()), Some("unknown"));
        assert_eq!(snap.get(31).map(|p| p.owner.as_str()), Some("SYSTEM"));
    }

    #[test]
    fn ancestors_nearest_first() {
        let chain = ancestor_chain(&sample(), 12);
        let pids: Vec<u32> = chain.iter().map(|a| a.pid).collect();
        assert_eq!(pids, vec![11, 10, 1]);
        assert_eq!(chain[0].name, "bash");
        assert_eq!(chain[1].memory, 1.25);
        assert!(ancestor_chain(&sample(), 1).is_empty());
    }

    #[test]
    fn ancestors_stop_at_unreadable_parent() {
        let source = sample().denied(10);
        let chain = ancestor_chain(&source, 12);
        assert_eq!(chain.iter().map(|a| a.pid).collect::<Vec<_>>(), vec![11]);

        let source = sample().gone(1);
        let chain = ancestor_chain(&source, 12);
        assert_eq!(chain.iter().map(|a| a.pid).collect::<Vec<_>>(), vec![11, 10]);
    }

    #[test]
    fn ancestors_stop_at_missing_parent() {
        let source = FakeSource::new().with(3, 99, "orphan", 1.);
        assert!(ancestor_chain(&source, 3).is_empty());
    }

    #[test]
    fn ancestors_survive_parent_cycle() {
        let source = FakeSource::new()
            .with(5, 7, "a", 1.)
            .with(7, 5, "b", 1.)
            .with(8, 5, "c", 1.);
        let chain = ancestor_chain(&source, 8);
        assert_eq!(chain.iter().map(|a| a.pid).collect::<Vec<_>>(), vec![5, 7]);
    }

    #[test]
    fn ancestors_see_reparenting_at_walk_time() {
        let source = sample().live_parent(11, 20);
        let snap = normalize(&source, &ProcFilter::All);
        //the listing and the walk disagree, both are kept as read
        assert_eq!(snap.get(11).map(|p| p.parent), Some(10));
        let chain = snap.get(12).map(|p| p.ancestors.clone()).unwrap_or_default();
        assert_eq!(chain.iter().map(|a| a.pid).collect::<Vec<_>>(), vec![11, 20, 1]);
    }

    #[test]
    fn ancestor_memory_is_not_reconciled_with_its_record() {
        let source = sample().drifts(10, 9.5);
        let snap = normalize(&source, &ProcFilter::All);

        let own = snap.get(10).map(|p| p.memory);
        assert_eq!(own, Some(1.25));
        let chain = snap.get(12).map(|p| p.ancestors.clone()).unwrap_or_default();
        assert_eq!(chain[1].pid, 10);
        assert_eq!(chain[1].memory, 9.5);
        assert_ne!(Some(chain[1].memory), own);
    }

    #[test]
    fn filter_by_name_and_pid() {
        let snap = normalize(&sample(), &ProcFilter::parse("BASH"));
        assert_eq!(snap.iter().map(|p| p.pid).collect::<Vec<_>>(), vec![11]);
        //the chain still reaches processes filtered out of the snapshot
        assert_eq!(snap.get(11).map(|p| p.ancestors.len()), Some(2));

        let snap = normalize(&sample(), &ProcFilter::parse("20"));
        assert_eq!(snap.iter().map(|p| p.pid).collect::<Vec<_>>(), vec![20]);

        assert!(normalize(&sample(), &ProcFilter::parse("nothing")).is_empty());
        assert!(normalize(&sample(), &ProcFilter::Pid(4242)).is_empty());
    }

    #[test]
    fn table_sets_totals() {
        let table = ProcessTable::build(&sample(), &ProcFilter::All);
        let total = |pid| table.procs.get(pid).and_then(|p| p.total_memory);
        assert_eq!(total(12), Some(4.));
        assert_eq!(total(11), Some(6.));
        assert_eq!(total(10), Some(7.25));
        assert_eq!(total(1), Some(8.));
        assert_eq!(table.index.roots(), &[1]);
    }

    #[test]
    fn sort_change_does_not_resample() {
        let mut man = ProcManager::with_source(sample(), ProcFilter::All);
        assert_eq!(man.source().refreshes, 1);

        let by_pid = man.view(SortKey::Pid);
        let by_mem = man.view(SortKey::Memory);
        assert_eq!(man.source().refreshes, 1);
        assert_eq!(by_pid.children(1), &[10, 20]);
        assert_eq!(by_mem.children(1), &[10, 20]);

        let again = man.refresh_and_build_view(SortKey::Pid);
        assert_eq!(man.source().refreshes, 2);
        assert_eq!(again, by_pid);
    }

    #[test]
    fn empty_filter_result_is_empty_forest() {
        let mut man = ProcManager::with_source(sample(), ProcFilter::parse("nope"));
        let forest = man.refresh_and_build_view(SortKey::Name);
        assert!(forest.roots.is_empty());
        assert!(man.procs().is_empty());

        man.set_filter(ProcFilter::All);
        assert_eq!(man.refresh_and_build_view(SortKey::Name).roots, vec![1]);
    }
}
