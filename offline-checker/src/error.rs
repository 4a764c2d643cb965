use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    DcsError(#[from] dcs_client::Error),

    #[error(transparent)]
    TomlParseError(#[from] toml::de::Error),

    #[error(transparent)]
    TomlWriteError(#[from] toml::ser::Error),

    #[error(transparent)]
    EmailError(#[from] lettre::error::Error),

    #[error(transparent)]
    InvalidAddress(#[from] lettre::address::AddressError),

    #[error(transparent)]
    SmtpError(#[from] lettre::transport::smtp::Error),

    #[error("Not connected to the DCS")]
    NotConnected,

    #[error("{0}")]
    Other(std::borrow::Cow<'static, str>),
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Self::Other(s.into())
    }
}
impl From<&'static str> for Error {
    fn from(s: &'static str) -> Self {
        Self::Other(s.into())
    }
}
