//! Web3 utility types and functions for EVM contract deployment.
//!
//! Provides compiled-artifact loading, JSON → ABI token conversion and back,
//! and the JSON-RPC client used by the live deployment chain.

pub mod rpc;

pub use rpc::EvmRpc;

use ethers::abi::{Abi, Function, ParamType, Token};
use ethers::prelude::*;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Compiled contract artifact file structure.
/// Accepts both `"bytecode": "0x.."` and foundry's `"bytecode": { "object": "0x.." }`.
#[derive(Debug, Deserialize)]
struct ArtifactFile {
    #[serde(default, alias = "contractName")]
    contract_name: Option<String>,
    abi: Value,
    #[serde(default)]
    bytecode: Option<Value>,
}

/// A loaded contract: parsed ABI plus creation bytecode (absent for interfaces)
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    pub name: String,
    pub abi: Abi,
    pub bytecode: Option<Vec<u8>>,
}

impl ContractArtifact {
    /// Parse an artifact from JSON text
    pub fn from_json(name: &str, content: &str) -> Result<Self, String> {
        let file: ArtifactFile = serde_json::from_str(content)
            .map_err(|e| format!("Failed to parse artifact '{}': {}", name, e))?;

        let abi: Abi = serde_json::from_value(file.abi)
            .map_err(|e| format!("Failed to parse ABI of '{}': {}", name, e))?;

        let bytecode_hex = match file.bytecode {
            Some(Value::String(s)) => Some(s),
            Some(Value::Object(obj)) => obj.get("object").and_then(|v| v.as_str()).map(|s| s.to_string()),
            _ => None,
        };
        let bytecode = match bytecode_hex {
            Some(hex_str) if !hex_str.trim_start_matches("0x").is_empty() => Some(
                hex::decode(hex_str.trim_start_matches("0x"))
                    .map_err(|e| format!("Invalid bytecode hex in '{}': {}", name, e))?,
            ),
            _ => None,
        };

        Ok(Self {
            name: file.contract_name.unwrap_or_else(|| name.to_string()),
            abi,
            bytecode,
        })
    }

    pub fn is_deployable(&self) -> bool {
        self.bytecode.is_some()
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.abi.functions.contains_key(name)
    }

    /// Find function by name AND parameter count (handles overloads)
    pub fn function(&self, name: &str, param_count: usize) -> Result<&Function, String> {
        find_function_with_params(&self.abi, name, param_count)
            .map_err(|e| format!("{}: {}", self.name, e))
    }

    /// Constructor parameter types (empty if the contract has no constructor)
    pub fn constructor_params(&self) -> Vec<ParamType> {
        self.abi
            .constructor()
            .map(|c| c.inputs.iter().map(|i| i.kind.clone()).collect())
            .unwrap_or_default()
    }

    /// Creation calldata: bytecode followed by ABI-encoded constructor arguments
    pub fn encode_deploy(&self, args: &[Token]) -> Result<Vec<u8>, String> {
        let bytecode = self
            .bytecode
            .clone()
            .ok_or_else(|| format!("Artifact '{}' has no bytecode (interface only)", self.name))?;

        match self.abi.constructor() {
            Some(constructor) => constructor
                .encode_input(bytecode, args)
                .map_err(|e| format!("Failed to encode constructor of '{}': {}", self.name, e)),
            None if args.is_empty() => Ok(bytecode),
            None => Err(format!(
                "'{}' has no constructor but {} arguments were given",
                self.name,
                args.len()
            )),
        }
    }
}

/// Loads artifacts from `<dir>/<Name>.json`, caching each one after first use
pub struct ArtifactStore {
    dir: PathBuf,
    cache: HashMap<String, Arc<ContractArtifact>>,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: HashMap::new(),
        }
    }

    pub fn load(&mut self, name: &str) -> Result<Arc<ContractArtifact>, String> {
        if let Some(artifact) = self.cache.get(name) {
            return Ok(artifact.clone());
        }

        let path = self.dir.join(format!("{}.json", name));
        let content = std::fs::read_to_string(&path)
            .map_err(|e| format!("Failed to load artifact '{}' from {}: {}", name, path.display(), e))?;
        let artifact = Arc::new(ContractArtifact::from_json(name, &content)?);
        log::debug!("[artifacts] Loaded {} from {}", name, path.display());

        self.cache.insert(name.to_string(), artifact.clone());
        Ok(artifact)
    }
}

/// Find function in ABI, matching by name AND parameter count for overloaded functions
pub fn find_function_with_params<'a>(
    abi: &'a Abi,
    name: &str,
    param_count: usize,
) -> Result<&'a Function, String> {
    if let Some(functions) = abi.functions.get(name) {
        for func in functions {
            if func.inputs.len() == param_count {
                return Ok(func);
            }
        }
        // No exact match -- list available overloads in the error
        let overloads: Vec<String> = functions
            .iter()
            .map(|f| {
                let params: Vec<String> = f.inputs.iter().map(|i| format!("{}: {}", i.name, i.kind)).collect();
                format!("{}({})", name, params.join(", "))
            })
            .collect();
        Err(format!(
            "No '{}' overload with {} parameters. Available: {}",
            name, param_count, overloads.join(", ")
        ))
    } else {
        Err(format!("Function '{}' not found in ABI", name))
    }
}

/// Parse a decimal or 0x-hex string into U256
pub fn parse_u256(s: &str) -> Result<U256, String> {
    let s = s.trim();
    if s.starts_with("0x") || s.starts_with("0X") {
        U256::from_str_radix(&s[2..], 16)
            .map_err(|e| format!("Invalid hex: {} - {}", s, e))
    } else {
        // from_dec_str, not parse(): parse() reads the input as hex
        U256::from_dec_str(s)
            .map_err(|e| format!("Invalid decimal: {} - {}", s, e))
    }
}

/// Convert JSON value to ethers Token based on param type
pub fn value_to_token(value: &Value, param_type: &ParamType) -> Result<Token, String> {
    match param_type {
        ParamType::Address => {
            let s = value.as_str()
                .ok_or_else(|| format!("Expected string for address, got {:?}", value))?;
            let addr: Address = s.parse()
                .map_err(|_| format!("Invalid address: {}", s))?;
            Ok(Token::Address(addr))
        }
        ParamType::Uint(bits) => {
            let s = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return Err(format!("Expected string or number for uint{}, got {:?}", bits, value)),
            };
            let n: U256 = parse_u256(&s)
                .map_err(|_| format!("Invalid uint{}: {}", bits, s))?;
            Ok(Token::Uint(n))
        }
        ParamType::Int(bits) => {
            let s = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return Err(format!("Expected string or number for int{}, got {:?}", bits, value)),
            };
            let n = I256::from_dec_str(&s)
                .map_err(|_| format!("Invalid int{}: {}", bits, s))?;
            Ok(Token::Int(n.into_raw()))
        }
        ParamType::Bool => {
            let b = value.as_bool()
                .ok_or_else(|| format!("Expected boolean, got {:?}", value))?;
            Ok(Token::Bool(b))
        }
        ParamType::String => {
            let s = value.as_str()
                .ok_or_else(|| format!("Expected string, got {:?}", value))?;
            Ok(Token::String(s.to_string()))
        }
        ParamType::Bytes => {
            let s = value.as_str()
                .ok_or_else(|| format!("Expected hex string for bytes, got {:?}", value))?;
            let hex_str = s.strip_prefix("0x").unwrap_or(s);
            let bytes = hex::decode(hex_str)
                .map_err(|e| format!("Invalid hex for bytes: {}", e))?;
            Ok(Token::Bytes(bytes))
        }
        ParamType::FixedBytes(size) => {
            let s = value.as_str()
                .ok_or_else(|| format!("Expected hex string for bytes{}, got {:?}", size, value))?;
            let hex_str = s.strip_prefix("0x").unwrap_or(s);
            let bytes = hex::decode(hex_str)
                .map_err(|e| format!("Invalid hex for bytes{}: {}", size, e))?;
            if bytes.len() != *size {
                return Err(format!("Expected {} bytes, got {}", size, bytes.len()));
            }
            Ok(Token::FixedBytes(bytes))
        }
        ParamType::Array(inner) => {
            let arr = value.as_array()
                .ok_or_else(|| format!("Expected array, got {:?}", value))?;
            let tokens: Result<Vec<Token>, String> = arr.iter()
                .map(|v| value_to_token(v, inner))
                .collect();
            Ok(Token::Array(tokens?))
        }
        ParamType::Tuple(types) => {
            let arr = value.as_array()
                .ok_or_else(|| format!("Expected array for tuple, got {:?}", value))?;
            if arr.len() != types.len() {
                return Err(format!("Tuple expects {} elements, got {}", types.len(), arr.len()));
            }
            let tokens: Result<Vec<Token>, String> = arr.iter()
                .zip(types.iter())
                .map(|(v, t)| value_to_token(v, t))
                .collect();
            Ok(Token::Tuple(tokens?))
        }
        ParamType::FixedArray(inner, size) => {
            let arr = value.as_array()
                .ok_or_else(|| format!("Expected array, got {:?}", value))?;
            if arr.len() != *size {
                return Err(format!("Fixed array expects {} elements, got {}", size, arr.len()));
            }
            let tokens: Result<Vec<Token>, String> = arr.iter()
                .map(|v| value_to_token(v, inner))
                .collect();
            Ok(Token::FixedArray(tokens?))
        }
    }
}

/// Convert a list of JSON values against a parameter list
pub fn values_to_tokens(values: &[Value], params: &[ParamType]) -> Result<Vec<Token>, String> {
    if values.len() != params.len() {
        return Err(format!(
            "Expected {} arguments ({:?}), got {}",
            params.len(),
            params.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
            values.len()
        ));
    }
    values
        .iter()
        .zip(params.iter())
        .map(|(value, kind)| value_to_token(value, kind))
        .collect()
}

/// Convert ethers Token to JSON value
pub fn token_to_value(token: &Token) -> Value {
    match token {
        Token::Address(a) => json!(format!("{:?}", a)),
        Token::Uint(n) => json!(n.to_string()),
        Token::Int(n) => json!(I256::from_raw(*n).to_string()),
        Token::Bool(b) => json!(b),
        Token::String(s) => json!(s),
        Token::Bytes(b) => json!(format!("0x{}", hex::encode(b))),
        Token::FixedBytes(b) => json!(format!("0x{}", hex::encode(b))),
        Token::Array(arr) | Token::FixedArray(arr) => {
            json!(arr.iter().map(token_to_value).collect::<Vec<_>>())
        }
        Token::Tuple(tuple) => {
            json!(tuple.iter().map(token_to_value).collect::<Vec<_>>())
        }
    }
}

/// Collapse decoded outputs: a single output becomes its own value, several become an array
pub fn tokens_to_value(tokens: &[Token]) -> Value {
    let mut values: Vec<Value> = tokens.iter().map(token_to_value).collect();
    if values.len() == 1 {
        values.remove(0)
    } else {
        Value::Array(values)
    }
}

/// Zero value for a parameter type (what an unset storage slot decodes to)
pub fn zero_token(param_type: &ParamType) -> Token {
    match param_type {
        ParamType::Address => Token::Address(Address::zero()),
        ParamType::Uint(_) => Token::Uint(U256::zero()),
        ParamType::Int(_) => Token::Int(U256::zero()),
        ParamType::Bool => Token::Bool(false),
        ParamType::String => Token::String(String::new()),
        ParamType::Bytes => Token::Bytes(Vec::new()),
        ParamType::FixedBytes(size) => Token::FixedBytes(vec![0u8; *size]),
        ParamType::Array(_) => Token::Array(Vec::new()),
        ParamType::FixedArray(inner, size) => {
            Token::FixedArray((0..*size).map(|_| zero_token(inner)).collect())
        }
        ParamType::Tuple(types) => Token::Tuple(types.iter().map(zero_token).collect()),
    }
}
