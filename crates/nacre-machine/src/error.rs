#[derive(Debug, thiserror::Error)]
pub enum MachineError {
    #[error("failed to spawn host thread for context `{name}`: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}
