//! Contract event types, log decoding and call encoding
//!
//! Covers the two swap agent contracts: the ETH agent (pair registration, ETH->BSC swap
//! starts, BSC->ETH fills) and the BSC agent (pair creation, BSC->ETH swap starts,
//! ETH->BSC fills). Fill outcomes come from receipts, so fill events are not decoded.

use crate::chain::Chain;
use crate::error::{RelayerError, RelayerResult};
use crate::state::models::SwapDirection;

use ethers::abi::{parse_abi, Abi, Token};
use ethers::contract::BaseContract;
use ethers::types::{Address, Bytes, Log, H256, U256};
use serde::Serialize;

const ETH_AGENT_ABI: &[&str] = &[
    "event SwapPairRegister(address indexed sponsor, address indexed erc20Addr, string name, string symbol, uint8 decimals)",
    "event SwapStarted(address indexed erc20Addr, address indexed fromAddr, uint256 amount, uint256 feeAmount)",
    "function fillBSC2ETHSwap(bytes32 bscTxHash, address erc20Addr, address toAddress, uint256 amount) returns (bool)",
];

const BSC_AGENT_ABI: &[&str] = &[
    "event SwapPairCreated(bytes32 indexed ethRegisterTxHash, address indexed bep20Addr, address indexed erc20Addr, string symbol, string name, uint8 decimals)",
    "event SwapStarted(address indexed bep20Addr, address indexed erc20Addr, address indexed fromAddr, uint256 amount, uint256 feeAmount)",
    "function createSwapPair(bytes32 ethTxHash, address erc20Addr, string name, string symbol, uint8 decimals) returns (address)",
    "function fillETH2BSCSwap(bytes32 ethTxHash, address erc20Addr, address toAddress, uint256 amount) returns (bool)",
];

/// Decoded swap agent events
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum BridgeEvent {
    /// ETH agent: a pair was registered for an ERC20
    SwapPairRegister {
        sponsor: Address,
        erc20: Address,
        name: String,
        symbol: String,
        decimals: u8,
    },

    /// A user locked tokens on the source chain; `bep20` is only known on BSC
    SwapStarted {
        chain: Chain,
        erc20: Option<Address>,
        bep20: Option<Address>,
        from: Address,
        amount: U256,
        fee: U256,
    },

    /// BSC agent: the pegged BEP20 was deployed
    SwapPairCreated {
        register_tx_hash: H256,
        bep20: Address,
        erc20: Address,
        symbol: String,
        name: String,
        decimals: u8,
    },
}

impl BridgeEvent {
    /// Get event name for metrics
    pub fn name(&self) -> &'static str {
        match self {
            BridgeEvent::SwapPairRegister { .. } => "swap_pair_register",
            BridgeEvent::SwapStarted { .. } => "swap_started",
            BridgeEvent::SwapPairCreated { .. } => "swap_pair_created",
        }
    }
}

/// ABI codec for both swap agents
pub struct SwapAgentAbi {
    eth: BaseContract,
    bsc: BaseContract,
}

impl SwapAgentAbi {
    pub fn new() -> RelayerResult<Self> {
        let eth = parse_abi(ETH_AGENT_ABI)
            .map_err(|e| RelayerError::Contract(format!("ETH agent ABI: {}", e)))?;
        let bsc = parse_abi(BSC_AGENT_ABI)
            .map_err(|e| RelayerError::Contract(format!("BSC agent ABI: {}", e)))?;

        Ok(Self {
            eth: BaseContract::from(eth),
            bsc: BaseContract::from(bsc),
        })
    }

    fn contract(&self, chain: Chain) -> &BaseContract {
        match chain {
            Chain::Eth => &self.eth,
            Chain::Bsc => &self.bsc,
        }
    }

    /// Topic0 of a named event on a chain's agent
    pub fn topic(&self, chain: Chain, event: &str) -> RelayerResult<H256> {
        event_topic(self.contract(chain).abi(), event)
    }

    /// Topics the observer watches on `chain`: swap starts on both, registrations on ETH
    pub fn observed_topics(&self, chain: Chain) -> RelayerResult<Vec<H256>> {
        match chain {
            Chain::Eth => Ok(vec![
                self.topic(Chain::Eth, "SwapStarted")?,
                self.topic(Chain::Eth, "SwapPairRegister")?,
            ]),
            Chain::Bsc => Ok(vec![self.topic(Chain::Bsc, "SwapStarted")?]),
        }
    }

    /// Decode a log emitted by `chain`'s agent; `None` for events the relayer ignores
    pub fn decode(&self, chain: Chain, log: &Log) -> RelayerResult<Option<BridgeEvent>> {
        let Some(topic0) = log.topics.first().copied() else {
            return Ok(None);
        };

        let abi = self.contract(chain).abi();
        let Some(event) = abi.events().find(|e| e.signature() == topic0) else {
            return Ok(None);
        };

        let tokens = self
            .contract(chain)
            .decode_event_raw(&event.name, log.topics.clone(), log.data.clone())
            .map_err(|e| RelayerError::EventParsing(format!("{}: {}", event.name, e)))?;
        let mut tokens = TokenReader::new(&event.name, tokens);

        let decoded = match (chain, event.name.as_str()) {
            (Chain::Eth, "SwapPairRegister") => BridgeEvent::SwapPairRegister {
                sponsor: tokens.address()?,
                erc20: tokens.address()?,
                name: tokens.string()?,
                symbol: tokens.string()?,
                decimals: tokens.u8()?,
            },
            (Chain::Eth, "SwapStarted") => BridgeEvent::SwapStarted {
                chain,
                erc20: Some(tokens.address()?),
                bep20: None,
                from: tokens.address()?,
                amount: tokens.uint()?,
                fee: tokens.uint()?,
            },
            (Chain::Bsc, "SwapStarted") => BridgeEvent::SwapStarted {
                chain,
                bep20: Some(tokens.address()?),
                erc20: Some(tokens.address()?),
                from: tokens.address()?,
                amount: tokens.uint()?,
                fee: tokens.uint()?,
            },
            (Chain::Bsc, "SwapPairCreated") => BridgeEvent::SwapPairCreated {
                register_tx_hash: tokens.hash()?,
                bep20: tokens.address()?,
                erc20: tokens.address()?,
                symbol: tokens.string()?,
                name: tokens.string()?,
                decimals: tokens.u8()?,
            },
            _ => return Ok(None),
        };

        Ok(Some(decoded))
    }

    /// First `SwapPairCreated` event among a receipt's logs
    pub fn find_swap_pair_created(&self, logs: &[Log]) -> Option<BridgeEvent> {
        logs.iter()
            .filter_map(|log| self.decode(Chain::Bsc, log).ok().flatten())
            .find(|event| matches!(event, BridgeEvent::SwapPairCreated { .. }))
    }

    /// Call data for `createSwapPair` on the BSC agent
    pub fn encode_create_swap_pair(
        &self,
        register_tx_hash: H256,
        erc20: Address,
        name: &str,
        symbol: &str,
        decimals: u8,
    ) -> RelayerResult<Bytes> {
        self.bsc
            .encode(
                "createSwapPair",
                (
                    register_tx_hash,
                    erc20,
                    name.to_string(),
                    symbol.to_string(),
                    decimals,
                ),
            )
            .map_err(|e| RelayerError::Contract(format!("createSwapPair: {}", e)))
    }

    /// Call data for the fill on the swap's destination chain
    pub fn encode_fill(
        &self,
        direction: SwapDirection,
        start_tx_hash: H256,
        erc20: Address,
        to: Address,
        amount: U256,
    ) -> RelayerResult<Bytes> {
        let (contract, method) = match direction {
            SwapDirection::EthToBsc => (&self.bsc, "fillETH2BSCSwap"),
            SwapDirection::BscToEth => (&self.eth, "fillBSC2ETHSwap"),
        };

        contract
            .encode(method, (start_tx_hash, erc20, to, amount))
            .map_err(|e| RelayerError::Contract(format!("{}: {}", method, e)))
    }
}

fn event_topic(abi: &Abi, name: &str) -> RelayerResult<H256> {
    abi.event(name)
        .map(|e| e.signature())
        .map_err(|e| RelayerError::Contract(format!("unknown event {}: {}", name, e)))
}

/// Pulls typed values off a decoded token list in declaration order
struct TokenReader<'a> {
    event: &'a str,
    tokens: std::vec::IntoIter<Token>,
}

impl<'a> TokenReader<'a> {
    fn new(event: &'a str, tokens: Vec<Token>) -> Self {
        Self {
            event,
            tokens: tokens.into_iter(),
        }
    }

    fn next(&mut self, expected: &str) -> RelayerResult<Token> {
        self.tokens.next().ok_or_else(|| {
            RelayerError::EventParsing(format!("{}: missing {} field", self.event, expected))
        })
    }

    fn mismatch(&self, expected: &str) -> RelayerError {
        RelayerError::EventParsing(format!("{}: expected {}", self.event, expected))
    }

    fn address(&mut self) -> RelayerResult<Address> {
        self.next("address")?
            .into_address()
            .ok_or_else(|| self.mismatch("address"))
    }

    fn uint(&mut self) -> RelayerResult<U256> {
        self.next("uint")?
            .into_uint()
            .ok_or_else(|| self.mismatch("uint"))
    }

    fn u8(&mut self) -> RelayerResult<u8> {
        let value = self.uint()?;
        if value > U256::from(u8::MAX) {
            return Err(self.mismatch("uint8"));
        }
        Ok(value.low_u32() as u8)
    }

    fn string(&mut self) -> RelayerResult<String> {
        self.next("string")?
            .into_string()
            .ok_or_else(|| self.mismatch("string"))
    }

    fn hash(&mut self) -> RelayerResult<H256> {
        let bytes = self
            .next("bytes32")?
            .into_fixed_bytes()
            .ok_or_else(|| self.mismatch("bytes32"))?;
        if bytes.len() != 32 {
            return Err(self.mismatch("bytes32"));
        }
        Ok(H256::from_slice(&bytes))
    }
}

/// Log builders shared by tests across the crate
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use ethers::abi::encode;
    use ethers::types::U64;

    fn address_topic(addr: Address) -> H256 {
        H256::from(addr)
    }

    fn base_log(contract: Address, topics: Vec<H256>, data: Vec<u8>, tx_hash: H256) -> Log {
        Log {
            address: contract,
            topics,
            data: Bytes::from(data),
            transaction_hash: Some(tx_hash),
            log_index: Some(U256::zero()),
            block_number: Some(U64::zero()),
            ..Default::default()
        }
    }

    pub fn eth_swap_started(
        abi: &SwapAgentAbi,
        contract: Address,
        erc20: Address,
        from: Address,
        amount: u64,
        tx_hash: H256,
    ) -> Log {
        let topics = vec![
            abi.topic(Chain::Eth, "SwapStarted").unwrap(),
            address_topic(erc20),
            address_topic(from),
        ];
        let data = encode(&[Token::Uint(amount.into()), Token::Uint(U256::zero())]);
        base_log(contract, topics, data, tx_hash)
    }

    pub fn bsc_swap_started(
        abi: &SwapAgentAbi,
        contract: Address,
        bep20: Address,
        erc20: Address,
        from: Address,
        amount: u64,
        tx_hash: H256,
    ) -> Log {
        let topics = vec![
            abi.topic(Chain::Bsc, "SwapStarted").unwrap(),
            address_topic(bep20),
            address_topic(erc20),
            address_topic(from),
        ];
        let data = encode(&[Token::Uint(amount.into()), Token::Uint(U256::zero())]);
        base_log(contract, topics, data, tx_hash)
    }

    pub fn swap_pair_register(
        abi: &SwapAgentAbi,
        contract: Address,
        sponsor: Address,
        erc20: Address,
        tx_hash: H256,
    ) -> Log {
        let topics = vec![
            abi.topic(Chain::Eth, "SwapPairRegister").unwrap(),
            address_topic(sponsor),
            address_topic(erc20),
        ];
        let data = encode(&[
            Token::String("Test Token".to_string()),
            Token::String("TT".to_string()),
            Token::Uint(18u8.into()),
        ]);
        base_log(contract, topics, data, tx_hash)
    }

    pub fn swap_pair_created(
        abi: &SwapAgentAbi,
        contract: Address,
        register_tx_hash: H256,
        bep20: Address,
        erc20: Address,
        tx_hash: H256,
    ) -> Log {
        let topics = vec![
            abi.topic(Chain::Bsc, "SwapPairCreated").unwrap(),
            register_tx_hash,
            address_topic(bep20),
            address_topic(erc20),
        ];
        let data = encode(&[
            Token::String("TT".to_string()),
            Token::String("Test Token".to_string()),
            Token::Uint(18u8.into()),
        ]);
        base_log(contract, topics, data, tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_observed_topics_are_distinct_per_kind() {
        let abi = SwapAgentAbi::new().unwrap();
        let eth = abi.observed_topics(Chain::Eth).unwrap();
        assert_eq!(eth.len(), 2);
        assert_ne!(eth[0], eth[1]);
        assert_ne!(
            abi.topic(Chain::Eth, "SwapStarted").unwrap(),
            abi.topic(Chain::Bsc, "SwapStarted").unwrap()
        );
    }

    #[test]
    fn test_decode_eth_swap_started() {
        let abi = SwapAgentAbi::new().unwrap();
        let erc20 = Address::repeat_byte(0x11);
        let from = Address::repeat_byte(0x22);
        let log = eth_swap_started(&abi, Address::zero(), erc20, from, 500, H256::zero());

        let event = abi.decode(Chain::Eth, &log).unwrap().unwrap();
        assert_eq!(
            event,
            BridgeEvent::SwapStarted {
                chain: Chain::Eth,
                erc20: Some(erc20),
                bep20: None,
                from,
                amount: U256::from(500),
                fee: U256::zero(),
            }
        );
    }

    #[test]
    fn test_decode_pair_register_and_created() {
        let abi = SwapAgentAbi::new().unwrap();
        let sponsor = Address::repeat_byte(0x01);
        let erc20 = Address::repeat_byte(0x02);
        let bep20 = Address::repeat_byte(0x03);
        let register_tx = H256::repeat_byte(0x04);

        let log = swap_pair_register(&abi, Address::zero(), sponsor, erc20, register_tx);
        match abi.decode(Chain::Eth, &log).unwrap().unwrap() {
            BridgeEvent::SwapPairRegister {
                sponsor: s,
                erc20: e,
                symbol,
                decimals,
                ..
            } => {
                assert_eq!((s, e), (sponsor, erc20));
                assert_eq!(symbol, "TT");
                assert_eq!(decimals, 18);
            }
            other => panic!("unexpected event {:?}", other),
        }

        let created =
            swap_pair_created(&abi, Address::zero(), register_tx, bep20, erc20, H256::zero());
        match abi.find_swap_pair_created(&[created]).unwrap() {
            BridgeEvent::SwapPairCreated {
                register_tx_hash,
                bep20: b,
                ..
            } => {
                assert_eq!(register_tx_hash, register_tx);
                assert_eq!(b, bep20);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_unknown_topic_is_ignored() {
        let abi = SwapAgentAbi::new().unwrap();
        let log = Log {
            topics: vec![H256::repeat_byte(0xaa)],
            ..Default::default()
        };
        assert!(abi.decode(Chain::Eth, &log).unwrap().is_none());
    }

    #[test]
    fn test_encode_fill_uses_destination_agent() {
        let abi = SwapAgentAbi::new().unwrap();
        let to_bsc = abi
            .encode_fill(
                SwapDirection::EthToBsc,
                H256::zero(),
                Address::zero(),
                Address::zero(),
                U256::one(),
            )
            .unwrap();
        let to_eth = abi
            .encode_fill(
                SwapDirection::BscToEth,
                H256::zero(),
                Address::zero(),
                Address::zero(),
                U256::one(),
            )
            .unwrap();
        // same argument layout, different selectors
        assert_eq!(to_bsc.len(), 4 + 32 * 4);
        assert_ne!(to_bsc[..4], to_eth[..4]);
    }
}
