/// One step up the parent chain, as observed while walking it.
#[derive(Clone, Debug, PartialEq)]
pub struct AncestorLink {
    pub pid: u32,
    pub name: String,
    pub memory: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProcessRecord {
    pub pid: u32,
    pub parent: u32,
    pub name: String,
    pub owner: String,
    /// own memory, percent of physical memory
    pub memory: f64,
    /// nearest ancestor first
    pub ancestors: Vec<AncestorLink>,
    /// own memory plus all descendants, set once aggregated
    pub total_memory: Option<f64>,
}

impl ProcessRecord {
    pub fn total(&self) -> f64 {
        self.total_memory.unwrap_or(self.memory)
    }
}

#[cfg(test)]
impl ProcessRecord {
    pub fn test(pid: u32, parent: u32, name: &str, memory: f64) -> Self {
        Self {
            pid,
            parent,
            name: name.to_string(),
            owner: "user".to_string(),
            memory,
            ancestors: vec![],
            total_memory: None,
        }
    }
}
