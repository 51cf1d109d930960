use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Object store backend types
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    S3,
    Local,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "s3" => Ok(StorageBackend::S3),
            "local" => Ok(StorageBackend::Local),
            _ => Err(anyhow::anyhow!("Invalid storage backend: {}", s)),
        }
    }
}

impl Display for StorageBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            StorageBackend::S3 => write!(f, "s3"),
            StorageBackend::Local => write!(f, "local"),
        }
    }
}

/// Record store backend types
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStoreBackend {
    Postgres,
    Memory,
}

impl FromStr for RecordStoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(RecordStoreBackend::Postgres),
            "memory" => Ok(RecordStoreBackend::Memory),
            _ => Err(anyhow::anyhow!("Invalid record store backend: {}", s)),
        }
    }
}

impl Display for RecordStoreBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            RecordStoreBackend::Postgres => write!(f, "postgres"),
            RecordStoreBackend::Memory => write!(f, "memory"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parsing_is_case_insensitive() {
        assert_eq!("S3".parse::<StorageBackend>().unwrap(), StorageBackend::S3);
        assert_eq!(
            "Memory".parse::<RecordStoreBackend>().unwrap(),
            RecordStoreBackend::Memory
        );
        assert!("nfs".parse::<StorageBackend>().is_err());
    }
}
