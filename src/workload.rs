// WORKLOAD DESCRIPTOR TABLE
// LOADS THE INPUT CSV FIXED BY §6: CID, CNAME, TYPE, CPUS.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;

use crate::error::{AgentError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkloadClass {
    Lc,
    Be,
}

#[derive(Clone, Debug)]
pub struct WorkloadDescriptor {
    pub cid: String,
    pub cname: String,
    pub class: WorkloadClass,
    pub cpus: u32,
}

#[derive(Deserialize)]
struct WorkloadRow {
    #[serde(rename = "CID")]
    cid: String,
    #[serde(rename = "CNAME")]
    cname: String,
    #[serde(rename = "TYPE")]
    r#type: String,
    #[serde(rename = "CPUS")]
    cpus: u32,
}

pub struct WorkloadTable {
    pub descriptors: Vec<WorkloadDescriptor>,
    pub lc_keys: HashSet<String>,
    pub be_keys: HashSet<String>,
    /// Requested CPU count keyed by display name, used by the builder.
    pub cpus_by_name: HashMap<String, u32>,
}

impl WorkloadTable {
    /// `key_cid` selects whether LC/BE set membership is tested by container
    /// id (true) or display name (false), matching the agent's `--key-cid` flag.
    pub fn load(path: &Path, key_cid: bool) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| {
            AgentError::Config(format!("cannot read workload file {}: {e}", path.display()))
        })?;

        let mut descriptors = Vec::new();
        let mut lc_keys = HashSet::new();
        let mut be_keys = HashSet::new();
        let mut cpus_by_name = HashMap::new();

        for result in reader.deserialize() {
            let row: WorkloadRow = result.map_err(|e| {
                AgentError::Config(format!("malformed workload row in {}: {e}", path.display()))
            })?;
            let class = match row.r#type.as_str() {
                "LC" => WorkloadClass::Lc,
                "BE" => WorkloadClass::Be,
                other => {
                    return Err(AgentError::Config(format!(
                        "unknown workload TYPE '{other}' (expected LC or BE)"
                    )))
                }
            };
            let key = if key_cid { row.cid.clone() } else { row.cname.clone() };
            match class {
                WorkloadClass::Lc => {
                    lc_keys.insert(key);
                }
                WorkloadClass::Be => {
                    be_keys.insert(key);
                }
            }
            cpus_by_name.insert(row.cname.clone(), row.cpus);
            descriptors.push(WorkloadDescriptor {
                cid: row.cid,
                cname: row.cname,
                class,
                cpus: row.cpus,
            });
        }

        if descriptors.is_empty() {
            return Err(AgentError::Config(format!(
                "workload file {} contains no rows",
                path.display()
            )));
        }

        Ok(Self { descriptors, lc_keys, be_keys, cpus_by_name })
    }

    pub fn is_lc(&self, key: &str) -> bool {
        self.lc_keys.contains(key)
    }

    pub fn is_be(&self, key: &str) -> bool {
        self.be_keys.contains(key)
    }
}
