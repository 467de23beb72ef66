//! Router call encoding for destination transactions

use super::address::parse_address;
use crate::error::{RouterError, RouterResult};
use crate::registry::TokenRegistry;
use crate::swap::{BuildTxArgs, SwapPayload};
use crate::validate::destination_amount;

use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::{id, keccak256};

const ANY_SWAP_IN: &str = "anySwapIn(bytes32,address,address,uint256,uint256)";
const ANY_SWAP_IN_AND_EXEC: &str =
    "anySwapInAndExec(bytes32,address,address,uint256,uint256,address,bytes)";
const ANY_SWAP_IN_FOR_TOKENS: &str =
    "anySwapInExactTokensForTokens(bytes32,uint256,uint256,address[],address,uint256,uint256)";
const ANY_SWAP_IN_FOR_NATIVE: &str =
    "anySwapInExactTokensForNative(bytes32,uint256,uint256,address[],address,uint256,uint256)";
const ANY_CALL: &str = "anyCall(address,address[],bytes[],address[],uint256[],uint256)";

/// Receiver and calldata of a destination router call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterCall {
    pub to: Address,
    pub data: Bytes,
}

/// Swap identifier passed to the destination router: the source hash when it
/// is a 32-byte hex hash, else its keccak digest
pub fn swap_id(tx_hash: &str) -> H256 {
    let digits = tx_hash.trim_start_matches("0x");
    match hex::decode(digits) {
        Ok(bytes) if bytes.len() == 32 => H256::from_slice(&bytes),
        _ => H256::from(keccak256(tx_hash.as_bytes())),
    }
}

fn with_selector(signature: &str, tokens: &[Token]) -> Bytes {
    let mut data = id(signature).to_vec();
    data.extend(encode(tokens));
    data.into()
}

fn config_address(address: &str) -> RouterResult<Address> {
    parse_address(address)
        .map_err(|_| RouterError::Config(format!("invalid configured address {}", address)))
}

fn address_tokens(addresses: &[String]) -> RouterResult<Vec<Token>> {
    addresses
        .iter()
        .map(|a| parse_address(a).map(Token::Address))
        .collect()
}

/// Encode the router call a verified record asks for on `chain_id`
pub fn build_router_call(
    registry: &dyn TokenRegistry,
    chain_id: u64,
    args: &BuildTxArgs,
) -> RouterResult<RouterCall> {
    let record = &args.record;
    let chain = registry.chain(chain_id).ok_or(RouterError::MissRouterInfo)?;
    let txs = Token::FixedBytes(swap_id(&record.tx_hash).as_bytes().to_vec());
    let from_chain = Token::Uint(U256::from(record.from_chain_id));

    if let SwapPayload::AnyCall(info) = &record.payload {
        let data = with_selector(
            ANY_CALL,
            &[
                Token::Address(parse_address(&info.call_from)?),
                Token::Array(address_tokens(&info.call_to)?),
                Token::Array(info.call_data.iter().map(|d| Token::Bytes(d.to_vec())).collect()),
                Token::Array(address_tokens(&info.callbacks)?),
                Token::Array(info.call_nonces.iter().map(|n| Token::Uint(*n)).collect()),
                from_chain,
            ],
        );
        return Ok(RouterCall {
            to: config_address(&chain.router_contract)?,
            data,
        });
    }

    let router = registry
        .router_contract(&record.token_id, chain_id)
        .ok_or(RouterError::MissRouterInfo)?;
    let (to_token, amount) = destination_amount(registry, record)?;
    let token = config_address(&to_token.address)?;
    let bind = parse_address(&record.bind)?;

    let data = match &record.payload {
        SwapPayload::Transfer => with_selector(
            ANY_SWAP_IN,
            &[
                txs,
                Token::Address(token),
                Token::Address(bind),
                Token::Uint(amount),
                from_chain,
            ],
        ),
        SwapPayload::CallProxy {
            call_proxy,
            call_data,
        } => with_selector(
            ANY_SWAP_IN_AND_EXEC,
            &[
                txs,
                Token::Address(token),
                Token::Address(bind),
                Token::Uint(amount),
                from_chain,
                Token::Address(parse_address(call_proxy)?),
                Token::Bytes(call_data.to_vec()),
            ],
        ),
        SwapPayload::Trade {
            path,
            amount_out_min,
            for_native,
        } => {
            let deadline = args
                .trade_deadline
                .ok_or_else(|| RouterError::Internal("trade build without deadline".into()))?;
            let signature = if *for_native {
                ANY_SWAP_IN_FOR_NATIVE
            } else {
                ANY_SWAP_IN_FOR_TOKENS
            };
            with_selector(
                signature,
                &[
                    txs,
                    Token::Uint(amount),
                    Token::Uint(*amount_out_min),
                    Token::Array(address_tokens(path)?),
                    Token::Address(bind),
                    Token::Uint(U256::from(deadline)),
                    from_chain,
                ],
            )
        }
        SwapPayload::AnyCall(_) => return Err(RouterError::SwapTypeNotSupported),
    };

    Ok(RouterCall {
        to: config_address(&router)?,
        data,
    })
}
