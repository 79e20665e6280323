use sysinfo::{Pid, System, Users};
use thiserror::Error;

use crate::helpers::round2;

/// Why a process attribute could not be read.
///
/// `SysinfoSource` only ever reports `Gone`: sysinfo leaves a process it may not
/// read out of its table instead of failing the read.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Unavailable {
    #[error("process {0} no longer exists")]
    Gone(u32),
    #[cfg_attr(not(test), allow(dead_code))]
    #[error("access to process {0} denied")]
    AccessDenied(u32),
}

/// One flat observation of a live process.
#[derive(Clone, Debug, PartialEq)]
pub struct RawProcess {
    pub pid: u32,
    /// 0 when the OS reports no parent
    pub parent: u32,
    pub name: Option<String>,
    pub owner: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParentProcess {
    pub pid: u32,
    pub name: String,
}

/// Point in time, non-atomic view of the process table.
///
/// Nothing guarantees two queries for the same pid agree with each other
/// or with the flat listing.
pub trait SnapshotSource {
    fn processes(&self) -> Vec<Result<RawProcess, Unavailable>>;
    /// resident memory as percent of physical memory (0-100)
    fn memory_percent(&self, pid: u32) -> Result<f64, Unavailable>;
    /// `Ok(None)` when the process has no parent
    fn parent(&self, pid: u32) -> Result<Option<ParentProcess>, Unavailable>;
    /// called once per snapshot, before `processes`
    fn refresh(&mut self) {}
}

pub struct SysinfoSource {
    system: System,
    users: Users,
}

impl SysinfoSource {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            users: Users::new(),
        }
    }

    fn process(&self, pid: u32) -> Result<&sysinfo::Process, Unavailable> {
        self.system
            .process(Pid::from_u32(pid))
            .ok_or(Unavailable::Gone(pid))
    }
}

impl SnapshotSource for SysinfoSource {
    fn refresh(&mut self) {
        self.system.refresh_all();
        self.users = Users::new_with_refreshed_list();
    }

    fn processes(&self) -> Vec<Result<RawProcess, Unavailable>> {
        let mut procs = self
            .system
            .processes()
            .values()
            .filter(|x| x.thread_kind() != Some(sysinfo::ThreadKind::Userland))
            .filter(|x| x.pid().as_u32() != 0) //dont want root or errors
            .map(|x| {
                let owner = x
                    .user_id()
                    .and_then(|uid| self.users.get_user_by_id(uid))
                    .map(|u| u.name().to_string());
                Ok(RawProcess {
                    pid: x.pid().as_u32(),
                    parent: x.parent().map_or(0, |f| f.as_u32()),
                    name: Some(x.name().to_string_lossy().to_string()),
                    owner,
                })
            })
            .collect::<Vec<_>>();
        procs.sort_by_key(|x| x.as_ref().map_or(0, |p| p.pid));
        procs
    }

    fn memory_percent(&self, pid: u32) -> Result<f64, Unavailable> {
        let proc = self.process(pid)?;
        let total = self.system.total_memory();
        if total == 0 {
            return Ok(0.);
        }
        Ok(round2(proc.memory() as f64 / total as f64 * 100.))
    }

    fn parent(&self, pid: u32) -> Result<Option<ParentProcess>, Unavailable> {
        let proc = self.process(pid)?;
        let Some(parent) = proc.parent() else {
            return Ok(None);
        };
        if parent.as_u32() == 0 {
            return Ok(None);
        }
        let parent = self.process(parent.as_u32())?;
        Ok(Some(ParentProcess {
            pid: parent.pid().as_u32(),
            name: parent.name().to_string_lossy().to_string(),
        }))
    }
}
