use thiserror::Error;

#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("Neither {0}, nor {1} exists in the environment")]
    MissingEnvVar(String, String),
    #[error("Credentials file not found")]
    ConfigNotFound,
    #[error("Section [{0}] not found in credentials file")]
    MissingSection(String),
    #[error("Missing access_key_id in credentials file")]
    ConfigMissingAccessKeyId,
    #[error("Missing secret_access_key in credentials file")]
    ConfigMissingSecretKey,
    #[error("Metadata endpoint returned no usable credentials")]
    EmptyMetadata,
    #[cfg(feature = "http-credentials")]
    #[error("attohttpc: {0}")]
    Atto(#[from] attohttpc::Error),
    #[error("ini: {0}")]
    Ini(#[from] ini::Error),
    #[error("time parse: {0}")]
    TimeParse(#[from] time::error::Parse),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid home dir")]
    HomeDir,
}
