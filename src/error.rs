// NODEWARD ERROR TAXONOMY
// THREE KINDS ONLY -- "UNANTICIPATED" IS NOT A VARIANT HERE, IT IS WHATEVER
// anyhow::Error CAPTURES AT THE main() BOUNDARY. SEE DESIGN.md.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Missing/malformed workload file, bad CLI combination, unreadable
    /// threshold file. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// External command or cgroup read failed this cycle. Caller skips the
    /// affected container and keeps its prior state.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Cooperative shutdown observed mid-operation.
    #[error("interrupted")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, AgentError>;
