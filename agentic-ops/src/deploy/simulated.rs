//! In-process simulated chain
//!
//! Stands in for a node in tests and dry runs. It does not execute EVM
//! bytecode; each contract gets a behavior picked from its ABI:
//!
//! - registries (ABI has `registerNewAddy`) keep an id-ordered address directory
//!   with an optional governance change delay in blocks
//! - everything else mirrors setters into getters (`setFoo(x)` -> `foo()`/`getFoo()`)
//!   and answers other reads with zero values
//!
//! Every contract is governed by its deployer until `changeGovernance` moves
//! it. State-changing calls from anyone else revert with `"no perms"`.

use super::args::{resolve_args, ResolveContext};
use super::chain::{Chain, DeployReceipt, TxReceipt};
use super::manifest::Manifest;
use super::plan::{Migration, Step};
use super::{ChainError, DeployError};
use crate::web3::{values_to_tokens, zero_token, ArtifactStore, ContractArtifact};
use async_trait::async_trait;
use ethers::abi::{Function, StateMutability, Token};
use ethers::types::{Address, H256, U256};
use ethers::utils::{get_contract_address, keccak256};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

pub const NO_PERMS: &str = "no perms";

struct CallContext {
    block_number: u64,
}

trait SimBehavior: Send {
    /// Apply a state-changing call. `Err` is the revert reason.
    fn execute(&mut self, ctx: &CallContext, function: &Function, args: &[Token]) -> Result<(), String>;

    /// Answer a read call, or `None` to fall back to zero values
    fn view(&self, function: &Function, args: &[Token]) -> Option<Vec<Token>>;
}

fn arg_address(args: &[Token], idx: usize) -> Result<Address, String> {
    match args.get(idx) {
        Some(Token::Address(addr)) => Ok(*addr),
        other => Err(format!("expected address at argument {}, got {:?}", idx, other)),
    }
}

fn arg_uint(args: &[Token], idx: usize) -> Result<U256, String> {
    match args.get(idx) {
        Some(Token::Uint(n)) => Ok(*n),
        other => Err(format!("expected uint at argument {}, got {:?}", idx, other)),
    }
}

/// Setter/getter mirroring. Writes are kept in order so the latest one wins;
/// getters with inputs match writes whose leading arguments equal them.
#[derive(Default)]
struct GenericBehavior {
    writes: HashMap<String, Vec<Vec<Token>>>,
}

impl GenericBehavior {
    /// Seed getters from named constructor arguments (`_addyRegistry` -> `addyRegistry()`)
    fn with_constructor(artifact: &ContractArtifact, args: &[Token]) -> Self {
        let mut behavior = Self::default();
        if let Some(constructor) = artifact.abi.constructor() {
            for (input, token) in constructor.inputs.iter().zip(args) {
                let name = input.name.trim_start_matches('_');
                if !name.is_empty() {
                    behavior.store(name, vec![token.clone()]);
                }
            }
        }
        behavior
    }

    fn store(&mut self, property: &str, tokens: Vec<Token>) {
        self.writes.entry(property.to_lowercase()).or_default().push(tokens);
    }
}

impl SimBehavior for GenericBehavior {
    fn execute(&mut self, _ctx: &CallContext, function: &Function, args: &[Token]) -> Result<(), String> {
        if let Some(property) = function.name.strip_prefix("set").filter(|p| !p.is_empty()) {
            self.store(property, args.to_vec());
        }
        Ok(())
    }

    fn view(&self, function: &Function, args: &[Token]) -> Option<Vec<Token>> {
        let property = function
            .name
            .strip_prefix("get")
            .filter(|p| !p.is_empty())
            .unwrap_or(&function.name);
        let writes = self.writes.get(&property.to_lowercase())?;

        let wanted = args.len() + function.outputs.len();
        writes
            .iter()
            .rev()
            .find(|w| w.len() == wanted && w[..args.len()] == *args)
            .map(|w| w[args.len()..].to_vec())
    }
}

/// Address directory with ids starting at 1
struct RegistryBehavior {
    change_delay: u64,
    addys: Vec<Address>,
    reg_ids: HashMap<Address, u64>,
    /// Pending address -> first block it may be confirmed in
    pending: HashMap<Address, u64>,
    fallback: GenericBehavior,
}

impl RegistryBehavior {
    fn new(fallback: GenericBehavior) -> Self {
        Self {
            change_delay: 0,
            addys: Vec::new(),
            reg_ids: HashMap::new(),
            pending: HashMap::new(),
            fallback,
        }
    }

    fn register(&mut self, address: Address) {
        self.addys.push(address);
        self.reg_ids.insert(address, self.addys.len() as u64);
    }
}

impl SimBehavior for RegistryBehavior {
    fn execute(&mut self, ctx: &CallContext, function: &Function, args: &[Token]) -> Result<(), String> {
        match function.name.as_str() {
            "registerNewAddy" => {
                let address = arg_address(args, 0)?;
                if address.is_zero() {
                    return Err("invalid addy".to_string());
                }
                if self.reg_ids.contains_key(&address) {
                    return Err("already registered".to_string());
                }
                if self.pending.contains_key(&address) {
                    return Err("already pending".to_string());
                }

                if self.change_delay == 0 {
                    self.register(address);
                } else {
                    self.pending.insert(address, ctx.block_number + self.change_delay);
                }
                Ok(())
            }
            "confirmNewAddy" => {
                let address = arg_address(args, 0)?;
                let confirm_block = *self
                    .pending
                    .get(&address)
                    .ok_or_else(|| "no pending addy".to_string())?;
                if ctx.block_number < confirm_block {
                    return Err("time delay not reached".to_string());
                }
                self.pending.remove(&address);
                self.register(address);
                Ok(())
            }
            "cancelPendingNewAddy" => {
                let address = arg_address(args, 0)?;
                self.pending
                    .remove(&address)
                    .map(|_| ())
                    .ok_or_else(|| "no pending addy".to_string())
            }
            "setRegistryChangeDelay" => {
                let delay = arg_uint(args, 0)?;
                if delay > U256::from(u64::MAX) {
                    return Err("invalid delay".to_string());
                }
                self.change_delay = delay.as_u64();
                Ok(())
            }
            _ => self.fallback.execute(ctx, function, args),
        }
    }

    fn view(&self, function: &Function, args: &[Token]) -> Option<Vec<Token>> {
        match function.name.as_str() {
            "getAddy" => {
                let id = arg_uint(args, 0).ok()?;
                let address = if id.is_zero() || id > U256::from(self.addys.len()) {
                    Address::zero()
                } else {
                    self.addys[id.as_usize() - 1]
                };
                Some(vec![Token::Address(address)])
            }
            "getRegId" => {
                let address = arg_address(args, 0).ok()?;
                let id = self.reg_ids.get(&address).copied().unwrap_or_default();
                Some(vec![Token::Uint(U256::from(id))])
            }
            "isValidAddy" => {
                let address = arg_address(args, 0).ok()?;
                Some(vec![Token::Bool(self.reg_ids.contains_key(&address))])
            }
            "hasPendingNewAddy" => {
                let address = arg_address(args, 0).ok()?;
                Some(vec![Token::Bool(self.pending.contains_key(&address))])
            }
            "numAddys" => Some(vec![Token::Uint(U256::from(self.addys.len()))]),
            "registryChangeDelay" | "getRegistryChangeDelay" => {
                Some(vec![Token::Uint(U256::from(self.change_delay))])
            }
            _ => self.fallback.view(function, args),
        }
    }
}

fn behavior_for(artifact: &ContractArtifact, args: &[Token]) -> Box<dyn SimBehavior> {
    let generic = GenericBehavior::with_constructor(artifact, args);
    if artifact.has_function("registerNewAddy") {
        Box::new(RegistryBehavior::new(generic))
    } else {
        Box::new(generic)
    }
}

struct SimContract {
    artifact: String,
    governance: Address,
    behavior: Box<dyn SimBehavior>,
}

/// One mined transaction, in order. Tests read these as emitted events.
#[derive(Debug, Clone, PartialEq)]
pub struct SimLogEntry {
    pub block_number: u64,
    pub tx_hash: H256,
    pub from: Address,
    pub to: Address,
    /// Function name, or `"constructor"` for deployments
    pub function: String,
    pub args: Vec<Token>,
}

#[derive(Default)]
struct SimState {
    block_number: u64,
    nonces: HashMap<Address, u64>,
    contracts: HashMap<Address, SimContract>,
    log: Vec<SimLogEntry>,
}

impl SimState {
    fn next_nonce(&mut self, sender: Address) -> u64 {
        let nonce = self.nonces.entry(sender).or_insert(0);
        let current = *nonce;
        *nonce += 1;
        current
    }

    /// Mine one block holding a single transaction
    fn mine(&mut self, from: Address, to: Address, function: &str, args: &[Token]) -> (H256, u64) {
        self.block_number += 1;
        let seed = format!("{}:{:?}:{:?}:{}:{}", self.block_number, from, to, function, self.log.len());
        let tx_hash = H256::from(keccak256(seed.as_bytes()));

        self.log.push(SimLogEntry {
            block_number: self.block_number,
            tx_hash,
            from,
            to,
            function: function.to_string(),
            args: args.to_vec(),
        });
        (tx_hash, self.block_number)
    }
}

/// Steps already on chain: all of an applied migration, the completed prefix of the one in progress
fn applied_steps<'a>(manifest: &Manifest, migration: &'a Migration) -> &'a [Step] {
    let done = if manifest.is_applied(migration.number) {
        migration.steps.len()
    } else {
        manifest
            .in_progress
            .as_ref()
            .filter(|ip| ip.number == migration.number)
            .map_or(0, |ip| ip.completed_steps.min(migration.steps.len()))
    };
    &migration.steps[..done]
}

pub struct SimulatedChain {
    chain_id: u64,
    deployer: Address,
    state: Mutex<SimState>,
}

impl SimulatedChain {
    pub fn new(chain_id: u64, deployer: Address) -> Self {
        Self {
            chain_id,
            deployer,
            state: Mutex::new(SimState::default()),
        }
    }

    /// Start from the contracts recorded in a manifest.
    ///
    /// Contracts deployed by applied migrations (and by the completed steps
    /// of the one in progress) are rebuilt with their constructor arguments,
    /// then those migrations' `execute` steps are replayed so pending checks
    /// see the state a live run would. Governance of every contract moves to
    /// `deployer`. The replay leaves no call log and no nonces behind.
    pub fn fork(
        manifest: &Manifest,
        migrations: &[Migration],
        params: &BTreeMap<String, Value>,
        artifacts: &mut ArtifactStore,
        deployer: Address,
    ) -> Result<Self, DeployError> {
        let chain = Self::new(manifest.chain_id, deployer);
        {
            let mut state = chain.state.lock();
            for (name, deployed) in &manifest.contracts {
                let artifact = artifacts.load(&deployed.artifact).map_err(DeployError::Artifact)?;
                state.contracts.insert(
                    deployed.address,
                    SimContract {
                        artifact: artifact.name.clone(),
                        governance: deployer,
                        behavior: behavior_for(&artifact, &[]),
                    },
                );
                log::debug!("[sim] Forked {} at {:?}", name, deployed.address);
            }
        }

        let replayed = chain.replay(manifest, migrations, params, artifacts)?;
        {
            let mut state = chain.state.lock();
            state.log.clear();
            state.nonces.clear();
        }

        log::info!(
            "[sim] Forked {} contracts from the {} manifest, replayed {} transactions",
            manifest.contracts.len(),
            manifest.network,
            replayed
        );
        Ok(chain)
    }

    fn replay(
        &self,
        manifest: &Manifest,
        migrations: &[Migration],
        params: &BTreeMap<String, Value>,
        artifacts: &mut ArtifactStore,
    ) -> Result<usize, DeployError> {
        let ctx = ResolveContext {
            deployer: manifest.deployer.unwrap_or(self.deployer),
            contracts: &manifest.contracts,
            params,
        };

        let mut replayed = 0;
        for migration in migrations {
            for step in applied_steps(manifest, migration) {
                match step {
                    Step::Deploy { contract, args, .. } => {
                        // Replaced later: the later deploy step rebuilds it
                        let Some(deployed) = manifest
                            .contracts
                            .get(step.target())
                            .filter(|d| d.migration == migration.number)
                        else {
                            continue;
                        };
                        let artifact = artifacts.load(contract).map_err(DeployError::Artifact)?;
                        let values = resolve_args(args, &ctx)?;
                        let tokens = values_to_tokens(&values, &artifact.constructor_params())
                            .map_err(|e| DeployError::Artifact(format!("{} constructor: {}", contract, e)))?;
                        self.state.lock().contracts.insert(
                            deployed.address,
                            SimContract {
                                artifact: artifact.name.clone(),
                                governance: self.deployer,
                                behavior: behavior_for(&artifact, &tokens),
                            },
                        );
                    }
                    Step::Execute {
                        contract,
                        function,
                        args,
                    } => {
                        let deployed = manifest
                            .contracts
                            .get(contract)
                            .ok_or_else(|| DeployError::UnknownContract(contract.clone()))?;
                        let artifact = artifacts.load(&deployed.artifact).map_err(DeployError::Artifact)?;
                        let func = artifact.function(function, args.len()).map_err(DeployError::Artifact)?;
                        let values = resolve_args(args, &ctx)?;
                        let kinds: Vec<_> = func.inputs.iter().map(|i| i.kind.clone()).collect();
                        let tokens = values_to_tokens(&values, &kinds)
                            .map_err(|e| DeployError::Artifact(format!("{}.{}: {}", contract, function, e)))?;

                        match self.send_as(self.deployer, deployed.address, func, &tokens) {
                            Ok(_) => replayed += 1,
                            Err(e) => log::warn!(
                                "[sim] Replaying {} ({}) failed: {}",
                                migration.id(),
                                step.describe(),
                                e
                            ),
                        }
                    }
                    Step::Check { .. } => {}
                }
            }
        }
        Ok(replayed)
    }

    pub fn artifact_at(&self, address: Address) -> Option<String> {
        self.state.lock().contracts.get(&address).map(|c| c.artifact.clone())
    }

    pub fn call_log(&self) -> Vec<SimLogEntry> {
        self.state.lock().log.clone()
    }

    /// Send a transaction as an arbitrary account
    pub fn send_as(
        &self,
        caller: Address,
        to: Address,
        function: &Function,
        args: &[Token],
    ) -> Result<TxReceipt, ChainError> {
        function
            .encode_input(args)
            .map_err(|e| ChainError::Abi(format!("Failed to encode {}: {}", function.name, e)))?;

        let mut state = self.state.lock();
        let current_block = state.block_number;
        let contract = state
            .contracts
            .get_mut(&to)
            .ok_or_else(|| ChainError::Reverted(format!("no contract at {:?}", to)))?;

        // Reads do not mine
        if matches!(
            function.state_mutability,
            StateMutability::View | StateMutability::Pure
        ) {
            return Ok(TxReceipt {
                tx_hash: H256::zero(),
                block_number: current_block,
            });
        }

        if caller != contract.governance {
            return Err(ChainError::Reverted(NO_PERMS.to_string()));
        }
        if function.name == "changeGovernance" {
            let governance = arg_address(args, 0).map_err(ChainError::Reverted)?;
            if governance.is_zero() {
                return Err(ChainError::Reverted("invalid governance".to_string()));
            }
            contract.governance = governance;
        } else {
            let ctx = CallContext {
                block_number: current_block + 1,
            };
            contract
                .behavior
                .execute(&ctx, function, args)
                .map_err(ChainError::Reverted)?;
        }

        state.next_nonce(caller);
        let (tx_hash, block_number) = state.mine(caller, to, &function.name, args);
        Ok(TxReceipt { tx_hash, block_number })
    }
}

#[async_trait]
impl Chain for SimulatedChain {
    fn deployer(&self) -> Address {
        self.deployer
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        Ok(self.chain_id)
    }

    async fn deploy(&self, artifact: &ContractArtifact, args: &[Token]) -> Result<DeployReceipt, ChainError> {
        artifact.encode_deploy(args).map_err(ChainError::Abi)?;

        let mut state = self.state.lock();
        // Forked contracts may already sit on the next CREATE address
        let address = loop {
            let nonce = state.next_nonce(self.deployer);
            let candidate = get_contract_address(self.deployer, nonce);
            if !state.contracts.contains_key(&candidate) {
                break candidate;
            }
        };

        state.contracts.insert(
            address,
            SimContract {
                artifact: artifact.name.clone(),
                governance: self.deployer,
                behavior: behavior_for(artifact, args),
            },
        );
        let (tx_hash, block_number) = state.mine(self.deployer, address, "constructor", args);
        log::debug!("[sim] Deployed {} at {:?} in block {}", artifact.name, address, block_number);

        Ok(DeployReceipt {
            address,
            tx_hash,
            block_number,
        })
    }

    async fn send(&self, to: Address, function: &Function, args: &[Token]) -> Result<TxReceipt, ChainError> {
        self.send_as(self.deployer, to, function, args)
    }

    async fn call(&self, to: Address, function: &Function, args: &[Token]) -> Result<Vec<Token>, ChainError> {
        function
            .encode_input(args)
            .map_err(|e| ChainError::Abi(format!("Failed to encode {}: {}", function.name, e)))?;

        let state = self.state.lock();
        let contract = state
            .contracts
            .get(&to)
            .ok_or_else(|| ChainError::Reverted(format!("no contract at {:?}", to)))?;

        if function.name == "governance" && function.inputs.is_empty() {
            return Ok(vec![Token::Address(contract.governance)]);
        }

        Ok(contract
            .behavior
            .view(function, args)
            .unwrap_or_else(|| function.outputs.iter().map(|o| zero_token(&o.kind)).collect()))
    }

    async fn has_code(&self, address: Address) -> Result<bool, ChainError> {
        Ok(self.state.lock().contracts.contains_key(&address))
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

/// Inspection helpers for tests
#[cfg(test)]
impl SimulatedChain {
    pub fn block_number(&self) -> u64 {
        self.state.lock().block_number
    }

    /// Advance the chain by `blocks` empty blocks
    pub fn mine_blocks(&self, blocks: u64) {
        self.state.lock().block_number += blocks;
    }

    pub fn governance_of(&self, address: Address) -> Option<Address> {
        self.state.lock().contracts.get(&address).map(|c| c.governance)
    }

    /// Mined calls of `function` on `to`
    pub fn calls_to(&self, to: Address, function: &str) -> Vec<SimLogEntry> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|entry| entry.to == to && entry.function == function)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::manifest::DeployedContract;
    use chrono::Utc;
    use ethers::abi::parse_abi;

    fn artifact(name: &str, signatures: &[&str]) -> ContractArtifact {
        ContractArtifact {
            name: name.to_string(),
            abi: parse_abi(signatures).unwrap(),
            bytecode: Some(vec![0x60, 0x80, 0x60, 0x40]),
        }
    }

    fn registry() -> ContractArtifact {
        artifact(
            "AddyRegistry",
            &[
                "constructor(address _governance)",
                "function registerNewAddy(address _addy, string _description)",
                "function confirmNewAddy(address _addy)",
                "function cancelPendingNewAddy(address _addy)",
                "function setRegistryChangeDelay(uint256 _numBlocks)",
                "function changeGovernance(address _newGovernance)",
                "function getAddy(uint256 _regId) view returns (address)",
                "function getRegId(address _addy) view returns (uint256)",
                "function isValidAddy(address _addy) view returns (bool)",
                "function hasPendingNewAddy(address _addy) view returns (bool)",
                "function numAddys() view returns (uint256)",
                "function registryChangeDelay() view returns (uint256)",
                "function governance() view returns (address)",
            ],
        )
    }

    fn factory() -> ContractArtifact {
        artifact(
            "AgentFactory",
            &[
                "constructor(address _addyRegistry, address _weth)",
                "function setAgentWalletTemplate(address _template)",
                "function agentWalletTemplate() view returns (address)",
                "function setTrialFunds(address _asset, uint256 _amount)",
                "function getTrialFunds(address _asset) view returns (uint256)",
                "function addyRegistry() view returns (address)",
                "function numAgenticWallets() view returns (uint256)",
            ],
        )
    }

    fn f<'a>(artifact: &'a ContractArtifact, name: &str, params: usize) -> &'a Function {
        artifact.function(name, params).unwrap()
    }

    fn addr(low: u64) -> Address {
        Address::from_low_u64_be(low)
    }

    fn hardhat_deployer() -> Address {
        "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".parse().unwrap()
    }

    #[tokio::test]
    async fn test_deploy_addresses_are_deterministic() {
        let chain = SimulatedChain::new(31337, hardhat_deployer());
        let registry = registry();

        let first = chain.deploy(&registry, &[Token::Address(addr(1))]).await.unwrap();
        let second = chain.deploy(&registry, &[Token::Address(addr(1))]).await.unwrap();

        let expected: Address = "0x5fbdb2315678afecb367f032d93f642f64180aa3".parse().unwrap();
        assert_eq!(first.address, expected);
        assert_ne!(second.address, first.address);
        assert_eq!((first.block_number, second.block_number), (1, 2));
        assert!(chain.has_code(first.address).await.unwrap());
        assert!(!chain.has_code(addr(77)).await.unwrap());
        assert_eq!(chain.artifact_at(first.address).as_deref(), Some("AddyRegistry"));
    }

    #[tokio::test]
    async fn test_deploy_rejects_bad_constructor_args() {
        let chain = SimulatedChain::new(31337, hardhat_deployer());
        let err = chain.deploy(&registry(), &[]).await.unwrap_err();
        assert!(matches!(err, ChainError::Abi(_)));
        assert_eq!(chain.block_number(), 0);
    }

    #[tokio::test]
    async fn test_registry_registers_and_answers_views() {
        let chain = SimulatedChain::new(31337, hardhat_deployer());
        let registry = registry();
        let at = chain.deploy(&registry, &[Token::Address(addr(1))]).await.unwrap().address;
        let register = f(&registry, "registerNewAddy", 2);

        chain
            .send(at, register, &[Token::Address(addr(10)), Token::String("Lego Registry".into())])
            .await
            .unwrap();
        chain
            .send(at, register, &[Token::Address(addr(11)), Token::String("Oracle Registry".into())])
            .await
            .unwrap();

        let dup = chain
            .send(at, register, &[Token::Address(addr(10)), Token::String("again".into())])
            .await;
        assert_eq!(dup, Err(ChainError::Reverted("already registered".to_string())));
        let zero = chain
            .send(at, register, &[Token::Address(Address::zero()), Token::String("zero".into())])
            .await;
        assert_eq!(zero, Err(ChainError::Reverted("invalid addy".to_string())));

        let num = chain.call(at, f(&registry, "numAddys", 0), &[]).await.unwrap();
        assert_eq!(num, vec![Token::Uint(U256::from(2))]);
        let id = chain
            .call(at, f(&registry, "getRegId", 1), &[Token::Address(addr(11))])
            .await
            .unwrap();
        assert_eq!(id, vec![Token::Uint(U256::from(2))]);
        let first = chain
            .call(at, f(&registry, "getAddy", 1), &[Token::Uint(U256::from(1))])
            .await
            .unwrap();
        assert_eq!(first, vec![Token::Address(addr(10))]);
        let missing = chain
            .call(at, f(&registry, "getAddy", 1), &[Token::Uint(U256::from(9))])
            .await
            .unwrap();
        assert_eq!(missing, vec![Token::Address(Address::zero())]);
        let valid = chain
            .call(at, f(&registry, "isValidAddy", 1), &[Token::Address(addr(12))])
            .await
            .unwrap();
        assert_eq!(valid, vec![Token::Bool(false)]);

        let registrations = chain.calls_to(at, "registerNewAddy");
        assert_eq!(registrations.len(), 2);
        assert_eq!(registrations[0].args[1], Token::String("Lego Registry".into()));
    }

    #[tokio::test]
    async fn test_registry_change_delay() {
        let chain = SimulatedChain::new(31337, hardhat_deployer());
        let registry = registry();
        let at = chain.deploy(&registry, &[Token::Address(addr(1))]).await.unwrap().address;

        chain
            .send(at, f(&registry, "setRegistryChangeDelay", 1), &[Token::Uint(U256::from(10))])
            .await
            .unwrap();
        chain
            .send(
                at,
                f(&registry, "registerNewAddy", 2),
                &[Token::Address(addr(10)), Token::String("Lego".into())],
            )
            .await
            .unwrap();
        let initiated = chain.block_number();

        let pending = chain
            .call(at, f(&registry, "hasPendingNewAddy", 1), &[Token::Address(addr(10))])
            .await
            .unwrap();
        assert_eq!(pending, vec![Token::Bool(true)]);
        let num = chain.call(at, f(&registry, "numAddys", 0), &[]).await.unwrap();
        assert_eq!(num, vec![Token::Uint(U256::zero())]);

        let confirm = f(&registry, "confirmNewAddy", 1);
        let early = chain.send(at, confirm, &[Token::Address(addr(10))]).await;
        assert_eq!(early, Err(ChainError::Reverted("time delay not reached".to_string())));

        // The confirming transaction mines in the next block
        chain.mine_blocks(initiated + 10 - chain.block_number() - 1);
        chain.send(at, confirm, &[Token::Address(addr(10))]).await.unwrap();
        assert_eq!(chain.block_number(), initiated + 10);

        let id = chain
            .call(at, f(&registry, "getRegId", 1), &[Token::Address(addr(10))])
            .await
            .unwrap();
        assert_eq!(id, vec![Token::Uint(U256::from(1))]);

        chain
            .send(
                at,
                f(&registry, "registerNewAddy", 2),
                &[Token::Address(addr(11)), Token::String("Oracle".into())],
            )
            .await
            .unwrap();
        let cancel = f(&registry, "cancelPendingNewAddy", 1);
        chain.send(at, cancel, &[Token::Address(addr(11))]).await.unwrap();
        assert_eq!(
            chain.send(at, cancel, &[Token::Address(addr(11))]).await,
            Err(ChainError::Reverted("no pending addy".to_string()))
        );
    }

    #[tokio::test]
    async fn test_governance_permissions() {
        let deployer = hardhat_deployer();
        let chain = SimulatedChain::new(31337, deployer);
        let registry = registry();
        let at = chain.deploy(&registry, &[Token::Address(deployer)]).await.unwrap().address;
        let register = f(&registry, "registerNewAddy", 2);
        let args = [Token::Address(addr(10)), Token::String("Lego".into())];
        let stranger = addr(0xbad);

        let blocked = chain.send_as(stranger, at, register, &args);
        assert_eq!(blocked, Err(ChainError::Reverted(NO_PERMS.to_string())));
        let before = chain.call_log().len();

        let handover = f(&registry, "changeGovernance", 1);
        chain.send(at, handover, &[Token::Address(stranger)]).await.unwrap();
        assert_eq!(chain.governance_of(at), Some(stranger));
        let gov = chain.call(at, f(&registry, "governance", 0), &[]).await.unwrap();
        assert_eq!(gov, vec![Token::Address(stranger)]);

        assert_eq!(
            chain.send(at, register, &args).await,
            Err(ChainError::Reverted(NO_PERMS.to_string()))
        );
        chain.send_as(stranger, at, register, &args).unwrap();
        assert_eq!(chain.call_log().len(), before + 2);

        // Reads are open to anyone and mine nothing
        let logged = chain.call_log().len();
        let block = chain.block_number();
        chain.send_as(addr(5), at, f(&registry, "numAddys", 0), &[]).unwrap();
        assert_eq!(chain.call_log().len(), logged);
        assert_eq!(chain.block_number(), block);
    }

    #[tokio::test]
    async fn test_generic_contracts_mirror_setters() {
        let chain = SimulatedChain::new(31337, hardhat_deployer());
        let factory = factory();
        let at = chain
            .deploy(&factory, &[Token::Address(addr(1)), Token::Address(addr(2))])
            .await
            .unwrap()
            .address;

        let registry = chain.call(at, f(&factory, "addyRegistry", 0), &[]).await.unwrap();
        assert_eq!(registry, vec![Token::Address(addr(1))]);

        let template = f(&factory, "agentWalletTemplate", 0);
        assert_eq!(
            chain.call(at, template, &[]).await.unwrap(),
            vec![Token::Address(Address::zero())]
        );
        let set_template = f(&factory, "setAgentWalletTemplate", 1);
        chain.send(at, set_template, &[Token::Address(addr(3))]).await.unwrap();
        chain.send(at, set_template, &[Token::Address(addr(4))]).await.unwrap();
        assert_eq!(
            chain.call(at, template, &[]).await.unwrap(),
            vec![Token::Address(addr(4))]
        );

        let set_funds = f(&factory, "setTrialFunds", 2);
        chain
            .send(at, set_funds, &[Token::Address(addr(20)), Token::Uint(U256::from(500))])
            .await
            .unwrap();
        let funds = f(&factory, "getTrialFunds", 1);
        assert_eq!(
            chain.call(at, funds, &[Token::Address(addr(20))]).await.unwrap(),
            vec![Token::Uint(U256::from(500))]
        );
        assert_eq!(
            chain.call(at, funds, &[Token::Address(addr(21))]).await.unwrap(),
            vec![Token::Uint(U256::zero())]
        );
    }

    #[tokio::test]
    async fn test_fork_from_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("AgentFactory.json"),
            r#"{"abi": [{"type": "function", "name": "setAgentWalletTemplate", "inputs": [{"name": "_t", "type": "address"}], "outputs": [], "stateMutability": "nonpayable"}], "bytecode": "0x6080"}"#,
        )
        .unwrap();
        let mut artifacts = ArtifactStore::new(dir.path());

        let deployer = hardhat_deployer();
        let taken = get_contract_address(deployer, 0u64);
        let mut manifest = Manifest::new("local", 31337);
        manifest
            .record_deploy(
                "AgentFactory",
                DeployedContract {
                    address: taken,
                    artifact: "AgentFactory".to_string(),
                    tx_hash: H256::zero(),
                    migration: 1,
                    deployed_at: Utc::now(),
                    previous: vec![],
                },
                false,
            )
            .unwrap();

        let chain = SimulatedChain::fork(&manifest, &[], &BTreeMap::new(), &mut artifacts, deployer).unwrap();
        assert!(chain.has_code(taken).await.unwrap());
        assert_eq!(chain.chain_id().await.unwrap(), 31337);

        let fresh = chain.deploy(&factory(), &[Token::Address(addr(1)), Token::Address(addr(2))]).await.unwrap();
        assert_ne!(fresh.address, taken);
    }
}
