//! Compiled program descriptors and constructor argument encoding.

use std::path::{Path, PathBuf};

use alloy_core::primitives::{Address, B256, Bytes, U256};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

/// A deployable program produced by the compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramArtifact {
    /// Name of the compiled program, e.g. `WalletFactory`.
    pub contract_name: String,
    /// Creation bytecode.
    pub bytecode: Bytes,
    /// ABI descriptor, kept for downstream consumers.
    pub abi: Value,
}

impl ProgramArtifact {
    pub fn new(contract_name: impl Into<String>, bytecode: impl Into<Bytes>) -> Self {
        Self {
            contract_name: contract_name.into(),
            bytecode: bytecode.into(),
            abi: Value::Array(Vec::new()),
        }
    }

    /// Creation payload: bytecode followed by the encoded constructor arguments.
    pub fn deploy_data(&self, args: &[ConstructorArg]) -> Bytes {
        let mut data = self.bytecode.to_vec();
        data.extend_from_slice(&encode_constructor_args(args));
        data.into()
    }
}

/// Bytecode field as emitted by Truffle (plain string) or Foundry (`{ "object": ... }`).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BytecodeField {
    Plain(String),
    Object { object: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactFile {
    contract_name: Option<String>,
    bytecode: BytecodeField,
    #[serde(default)]
    abi: Value,
}

/// Loads compiled artifacts from a build directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load the artifact `<root>/<name>.json`.
    pub fn require(&self, name: &str) -> Result<ProgramArtifact> {
        let path = self.root.join(format!("{name}.json"));
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read artifact {}", path.display()))?;
        let file: ArtifactFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse artifact {}", path.display()))?;

        let raw = match file.bytecode {
            BytecodeField::Plain(s) => s,
            BytecodeField::Object { object } => object,
        };
        let bytecode = hex::decode(raw.trim_start_matches("0x"))
            .with_context(|| format!("Artifact {} has malformed bytecode", path.display()))?;

        if bytecode.is_empty() {
            anyhow::bail!(
                "Artifact {} has no bytecode (abstract program or interface?)",
                path.display()
            );
        }

        let artifact = ProgramArtifact {
            contract_name: file.contract_name.unwrap_or_else(|| name.to_string()),
            bytecode: bytecode.into(),
            abi: file.abi,
        };

        tracing::debug!(
            name,
            path = %path.display(),
            bytecode_len = artifact.bytecode.len(),
            "Artifact loaded"
        );

        Ok(artifact)
    }
}

/// A statically sized constructor argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstructorArg {
    Address(Address),
    Uint(U256),
    Bool(bool),
    Bytes32(B256),
}

impl ConstructorArg {
    /// ABI head word for the argument.
    pub fn to_word(&self) -> B256 {
        match self {
            Self::Address(address) => address.into_word(),
            Self::Uint(value) => B256::from(value.to_be_bytes::<32>()),
            Self::Bool(value) => B256::with_last_byte(u8::from(*value)),
            Self::Bytes32(word) => *word,
        }
    }
}

impl From<Address> for ConstructorArg {
    fn from(address: Address) -> Self {
        Self::Address(address)
    }
}

impl From<U256> for ConstructorArg {
    fn from(value: U256) -> Self {
        Self::Uint(value)
    }
}

impl From<u64> for ConstructorArg {
    fn from(value: u64) -> Self {
        Self::Uint(U256::from(value))
    }
}

impl From<bool> for ConstructorArg {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// ABI-encode constructor arguments as consecutive 32-byte words.
pub fn encode_constructor_args(args: &[ConstructorArg]) -> Vec<u8> {
    args.iter()
        .flat_map(|arg| arg.to_word().0)
        .collect()
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    #[test]
    fn test_require_truffle_artifact() {
        let dir = TempDir::new("waymark-artifacts").expect("Failed to create temp dir");
        std::fs::write(
            dir.path().join("Wallet.json"),
            r#"{ "contractName": "Wallet", "abi": [], "bytecode": "0x6080604052" }"#,
        )
        .unwrap();

        let artifact = ArtifactStore::new(dir.path()).require("Wallet").unwrap();
        assert_eq!(artifact.contract_name, "Wallet");
        assert_eq!(artifact.bytecode.to_vec(), vec![0x60, 0x80, 0x60, 0x40, 0x52]);
    }

    #[test]
    fn test_require_foundry_artifact() {
        let dir = TempDir::new("waymark-artifacts").expect("Failed to create temp dir");
        std::fs::write(
            dir.path().join("WalletFactory.json"),
            r#"{ "abi": [], "bytecode": { "object": "0x6001", "sourceMap": "" } }"#,
        )
        .unwrap();

        let artifact = ArtifactStore::new(dir.path())
            .require("WalletFactory")
            .unwrap();
        assert_eq!(artifact.contract_name, "WalletFactory");
        assert_eq!(artifact.bytecode.to_vec(), vec![0x60, 0x01]);
    }

    #[test]
    fn test_require_rejects_empty_bytecode() {
        let dir = TempDir::new("waymark-artifacts").expect("Failed to create temp dir");
        std::fs::write(
            dir.path().join("IWallet.json"),
            r#"{ "contractName": "IWallet", "bytecode": "0x" }"#,
        )
        .unwrap();

        let err = ArtifactStore::new(dir.path()).require("IWallet").unwrap_err();
        assert!(err.to_string().contains("no bytecode"));
    }

    #[test]
    fn test_require_missing_artifact() {
        let dir = TempDir::new("waymark-artifacts").expect("Failed to create temp dir");
        assert!(ArtifactStore::new(dir.path()).require("Nope").is_err());
    }

    #[test]
    fn test_encode_address_argument() {
        let wallet = Address::repeat_byte(0x11);
        let encoded = encode_constructor_args(&[wallet.into()]);

        assert_eq!(encoded.len(), 32);
        assert_eq!(&encoded[..12], &[0u8; 12]);
        assert_eq!(&encoded[12..], wallet.as_slice());
    }

    #[test]
    fn test_encode_mixed_arguments() {
        let encoded = encode_constructor_args(&[
            ConstructorArg::from(true),
            ConstructorArg::from(0x0de0b6b3a7640000u64),
        ]);

        assert_eq!(encoded.len(), 64);
        assert_eq!(encoded[31], 1);
        assert_eq!(
            hex::encode(&encoded[32..]),
            "0000000000000000000000000000000000000000000000000de0b6b3a7640000"
        );
    }

    #[test]
    fn test_deploy_data_appends_arguments() {
        let artifact = ProgramArtifact::new("WalletFactory", vec![0x60, 0x80]);
        let data = artifact.deploy_data(&[Address::with_last_byte(7).into()]);

        assert_eq!(data.len(), 2 + 32);
        assert_eq!(&data[..2], &[0x60, 0x80]);
        assert_eq!(data[data.len() - 1], 7);
    }
}
