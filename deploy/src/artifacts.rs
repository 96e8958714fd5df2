use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use ethers::{
    abi::{
        token::{LenientTokenizer, Tokenizer},
        Abi, Param, ParamType, Token,
    },
    types::Bytes,
    utils::hex,
};
use serde::Deserialize;

use crate::error::DeployError;

const BUILD_INFO_DIR: &str = "build-info";

#[derive(Debug, Clone)]
pub struct ContractArtifact {
    pub name: String,
    pub source_name: Option<String>,
    pub abi: Abi,
    pub bytecode: Bytes,
    pub path: PathBuf,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArtifact {
    contract_name: Option<String>,
    source_name: Option<String>,
    abi: Abi,
    bytecode: RawBytecode,
    deployed_bytecode: Option<RawBytecode>,
    #[serde(default)]
    link_references: BTreeMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBytecode {
    Hex(String),
    Object {
        object: String,
        #[serde(default, rename = "linkReferences")]
        link_references: BTreeMap<String, serde_json::Value>,
    },
}

impl RawBytecode {
    fn has_links(&self) -> bool {
        matches!(self, RawBytecode::Object { link_references, .. } if !link_references.is_empty())
    }

    fn decode(&self) -> Result<Bytes, String> {
        let object = match self {
            RawBytecode::Hex(code) => code,
            RawBytecode::Object { object, .. } => object,
        };
        if object.contains("__") {
            return Err("bytecode has unlinked library placeholders".to_string());
        }
        hex::decode(object.strip_prefix("0x").unwrap_or(object))
            .map(Bytes::from)
            .map_err(|e| format!("bytecode is not valid hex: {e}"))
    }
}

impl ContractArtifact {
    pub fn from_file(path: &Path, fallback_name: &str) -> Result<Self, DeployError> {
        let invalid = |reason: String| DeployError::InvalidArtifact {
            path: path.display().to_string(),
            reason,
        };

        let contents = fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let raw: RawArtifact = serde_json::from_str(&contents).map_err(|e| invalid(e.to_string()))?;

        if !raw.link_references.is_empty() || raw.bytecode.has_links() {
            return Err(invalid("contract links external libraries".to_string()));
        }
        let bytecode = raw.bytecode.decode().map_err(invalid)?;
        if bytecode.is_empty() {
            return Err(invalid(
                "empty bytecode, abstract contracts and interfaces cannot be deployed".to_string(),
            ));
        }
        if let Some(code) = &raw.deployed_bytecode {
            code.decode().map_err(invalid)?;
        }

        Ok(Self {
            name: raw
                .contract_name
                .unwrap_or_else(|| fallback_name.to_string()),
            source_name: raw.source_name,
            abi: raw.abi,
            bytecode,
            path: path.to_path_buf(),
        })
    }

    pub fn constructor_inputs(&self) -> &[Param] {
        self.abi
            .constructor()
            .map(|c| c.inputs.as_slice())
            .unwrap_or_default()
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.abi.functions.contains_key(name)
    }

    /// Creation code with `args` parsed against the constructor inputs.
    pub fn encode_constructor(&self, args: &[String]) -> Result<Bytes, DeployError> {
        let tokens = tokenize(&self.name, self.constructor_inputs(), args)?;
        self.encode_constructor_tokens(&tokens)
    }

    pub fn encode_constructor_tokens(&self, tokens: &[Token]) -> Result<Bytes, DeployError> {
        match self.abi.constructor() {
            Some(constructor) => constructor
                .encode_input(self.bytecode.to_vec(), tokens)
                .map(Bytes::from)
                .map_err(|e| DeployError::InvalidArguments(format!("{} constructor: {e}", self.name))),
            None if tokens.is_empty() => Ok(self.bytecode.clone()),
            None => Err(DeployError::InvalidArguments(format!(
                "{} has no constructor but {} arguments were given",
                self.name,
                tokens.len()
            ))),
        }
    }

    /// Calldata for `function(args)`. Overloads are told apart by arity.
    pub fn encode_call(&self, function: &str, args: &[String]) -> Result<Bytes, DeployError> {
        let candidates = self.abi.functions.get(function).ok_or_else(|| {
            DeployError::InvalidArguments(format!("{} has no function `{function}`", self.name))
        })?;
        let function = candidates
            .iter()
            .find(|f| f.inputs.len() == args.len())
            .ok_or_else(|| {
                DeployError::InvalidArguments(format!(
                    "{}.{function} takes {} arguments, got {}",
                    self.name,
                    candidates[0].inputs.len(),
                    args.len()
                ))
            })?;

        let tokens = tokenize(&self.name, &function.inputs, args)?;
        function
            .encode_input(&tokens)
            .map(Bytes::from)
            .map_err(|e| DeployError::InvalidArguments(format!("{}.{}: {e}", self.name, function.name)))
    }
}

fn tokenize(contract: &str, params: &[Param], args: &[String]) -> Result<Vec<Token>, DeployError> {
    if params.len() != args.len() {
        return Err(DeployError::InvalidArguments(format!(
            "{contract} expects {} arguments, got {}",
            params.len(),
            args.len()
        )));
    }
    params
        .iter()
        .zip(args)
        .map(|(param, arg)| {
            let value = match param.kind {
                ParamType::Address | ParamType::Bytes | ParamType::FixedBytes(_) => {
                    arg.strip_prefix("0x").unwrap_or(arg.as_str())
                }
                _ => arg.as_str(),
            };
            LenientTokenizer::tokenize(&param.kind, value).map_err(|e| {
                DeployError::InvalidArguments(format!(
                    "`{arg}` is not a valid {} for `{}`: {e}",
                    param.kind, param.name
                ))
            })
        })
        .collect()
}

/// Finds compiled artifacts below a build output directory.
#[derive(Debug, Clone)]
pub struct ArtifactResolver {
    root: PathBuf,
}

impl ArtifactResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves `Name` or `path/Source.sol:Name`.
    pub fn resolve(&self, contract: &str) -> Result<ContractArtifact, DeployError> {
        let name = contract
            .rsplit_once(':')
            .map(|(_, name)| name)
            .unwrap_or(contract);
        let path = self.locate(contract)?;
        log::debug!("{contract} resolved to {}", path.display());
        ContractArtifact::from_file(&path, name)
    }

    fn locate(&self, contract: &str) -> Result<PathBuf, DeployError> {
        let not_found = || DeployError::ArtifactNotFound(contract.to_string());

        if let Some((source, name)) = contract.rsplit_once(':') {
            let file = format!("{name}.json");
            let mut candidates = vec![self.root.join(source).join(&file)];
            if let Some(source_file) = Path::new(source).file_name() {
                candidates.push(self.root.join(source_file).join(&file));
            }
            return candidates.into_iter().find(|p| p.is_file()).ok_or_else(not_found);
        }

        let direct = self.root.join(format!("{contract}.json"));
        if direct.is_file() {
            return Ok(direct);
        }

        let mut found = Vec::new();
        collect_named(&self.root, &format!("{contract}.json"), &mut found);
        found.sort();
        match found.len() {
            0 => Err(not_found()),
            1 => Ok(found.remove(0)),
            _ => Err(DeployError::AmbiguousArtifact {
                name: contract.to_string(),
                candidates: found
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }
}

fn collect_named(dir: &Path, file_name: &str, found: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if entry.file_name() != BUILD_INFO_DIR {
                collect_named(&path, file_name, found);
            }
        } else if entry.file_name().to_str() == Some(file_name) {
            found.push(path);
        }
    }
}
