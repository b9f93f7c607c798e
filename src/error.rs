use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid plan: {0}")]
    PlanInvalid(String),

    #[error("Deadlock: no progress possible for tasks [{}]", tasks.join(", "))]
    Deadlock { tasks: Vec<String> },

    #[error("Task '{task}' failed after {attempts} attempt(s): {error}")]
    TaskExecution {
        task: String,
        attempts: u32,
        error: String,
    },

    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Result already recorded for task: {0}")]
    DuplicateResult(String),
}

pub type Result<T> = std::result::Result<T, Error>;
