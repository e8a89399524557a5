use thiserror::Error;

#[derive(Error, Debug)]
pub enum KilnError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },

    #[error("config error: {0}")]
    Config(String),
}
