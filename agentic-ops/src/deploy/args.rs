//! Argument resolution for migration steps
//!
//! `@deployer` is the deployer address, `@Name` a manifest address and
//! `$name` a network parameter. A doubled sigil (`@@`, `$$`) escapes to a
//! literal string with one sigil removed.

use super::manifest::DeployedContract;
use super::DeployError;
use ethers::types::Address;
use serde_json::Value;
use std::collections::BTreeMap;

pub struct ResolveContext<'a> {
    pub deployer: Address,
    pub contracts: &'a BTreeMap<String, DeployedContract>,
    pub params: &'a BTreeMap<String, Value>,
}

fn address_value(address: Address) -> Value {
    Value::String(format!("{:?}", address))
}

/// Resolve sigils in a single value; arrays resolve element-wise
pub fn resolve_value(value: &Value, ctx: &ResolveContext<'_>) -> Result<Value, DeployError> {
    match value {
        Value::String(s) => {
            if let Some(literal) = s.strip_prefix("@@") {
                return Ok(Value::String(format!("@{}", literal)));
            }
            if let Some(literal) = s.strip_prefix("$$") {
                return Ok(Value::String(format!("${}", literal)));
            }
            if s == "@deployer" {
                return Ok(address_value(ctx.deployer));
            }
            if let Some(name) = s.strip_prefix('@') {
                return ctx
                    .contracts
                    .get(name)
                    .map(|c| address_value(c.address))
                    .ok_or_else(|| DeployError::UnknownContract(name.to_string()));
            }
            if let Some(name) = s.strip_prefix('$') {
                return ctx
                    .params
                    .get(name)
                    .cloned()
                    .ok_or_else(|| DeployError::UnknownParam(name.to_string()));
            }
            Ok(value.clone())
        }
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|item| resolve_value(item, ctx))
                .collect::<Result<Vec<_>, _>>()?,
        )),
        other => Ok(other.clone()),
    }
}

pub fn resolve_args(values: &[Value], ctx: &ResolveContext<'_>) -> Result<Vec<Value>, DeployError> {
    values.iter().map(|v| resolve_value(v, ctx)).collect()
}

/// Compare a decoded call result with an expected value.
/// Hex strings compare case-insensitively and numbers compare by their decimal text.
pub fn values_match(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::String(a), Value::String(b)) if a.starts_with("0x") && b.starts_with("0x") => {
            a.eq_ignore_ascii_case(b)
        }
        (Value::String(a), Value::Number(n)) | (Value::Number(n), Value::String(a)) => {
            *a == n.to_string()
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| values_match(x, y))
        }
        (a, b) => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ethers::types::H256;
    use serde_json::json;

    fn contract(address: Address) -> DeployedContract {
        DeployedContract {
            address,
            artifact: "AddyRegistry".to_string(),
            tx_hash: H256::zero(),
            migration: 1,
            deployed_at: Utc::now(),
            previous: vec![],
        }
    }

    fn fixtures() -> (BTreeMap<String, DeployedContract>, BTreeMap<String, Value>) {
        let mut contracts = BTreeMap::new();
        contracts.insert("AddyRegistry".to_string(), contract(Address::from_low_u64_be(0xaa)));
        let mut params = BTreeMap::new();
        params.insert("weth".to_string(), json!("0x4200000000000000000000000000000000000006"));
        params.insert("delay".to_string(), json!(43200));
        (contracts, params)
    }

    #[test]
    fn test_resolves_sigils() {
        let (contracts, params) = fixtures();
        let ctx = ResolveContext {
            deployer: Address::from_low_u64_be(1),
            contracts: &contracts,
            params: &params,
        };

        let resolved = resolve_args(
            &[
                json!("@deployer"),
                json!("@AddyRegistry"),
                json!("$delay"),
                json!(["$weth", "@@handle", "$$5"]),
                json!("plain"),
                json!(true),
            ],
            &ctx,
        )
        .unwrap();

        assert_eq!(
            resolved,
            vec![
                json!("0x0000000000000000000000000000000000000001"),
                json!("0x00000000000000000000000000000000000000aa"),
                json!(43200),
                json!(["0x4200000000000000000000000000000000000006", "@handle", "$5"]),
                json!("plain"),
                json!(true),
            ]
        );
    }

    #[test]
    fn test_unknown_names_fail() {
        let (contracts, params) = fixtures();
        let ctx = ResolveContext {
            deployer: Address::zero(),
            contracts: &contracts,
            params: &params,
        };
        assert!(matches!(
            resolve_value(&json!("@LegoRegistry"), &ctx),
            Err(DeployError::UnknownContract(name)) if name == "LegoRegistry"
        ));
        assert!(matches!(
            resolve_value(&json!(["$usdc"]), &ctx),
            Err(DeployError::UnknownParam(name)) if name == "usdc"
        ));
    }

    #[test]
    fn test_values_match() {
        assert!(values_match(
            &json!("0x00000000000000000000000000000000000000aa"),
            &json!("0x00000000000000000000000000000000000000AA")
        ));
        assert!(values_match(&json!("2"), &json!(2)));
        assert!(values_match(&json!(["1", true]), &json!([1, true])));
        assert!(!values_match(&json!(["1"]), &json!([1, 2])));
        assert!(!values_match(&json!("3"), &json!(2)));
        assert!(!values_match(&json!(false), &json!("false")));

        // Only hex compares without case
        assert!(values_match(&json!("Aave v3"), &json!("Aave v3")));
        assert!(!values_match(&json!("AAVE V3"), &json!("Aave v3")));
        assert!(!values_match(&json!("0xAB"), &json!("xab")));
    }
}
