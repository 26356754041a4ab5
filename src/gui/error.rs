use std::{error::Error, fmt::Display};

#[derive(Debug)]
pub enum HudError {
    IOError(std::io::Error),
}

impl Display for HudError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HudError::IOError(e) => write!(f, "terminal i/o failed: {}", e),
        }
    }
}

impl Error for HudError {}

impl From<std::io::Error> for HudError {
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}
