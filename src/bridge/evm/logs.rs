//! Router event decoders keyed by event signature
//!
//! Each decoder checks its own indexed-field count and data length before
//! reading any field; a log with an unknown signature is not a swap.

use super::abicoder::*;
use crate::error::{RouterError, RouterResult};
use crate::swap::{AnyCallInfo, SwapPayload, SwapType};

use ethers::types::{Log, H256, U256};
use ethers::utils::keccak256;
use lazy_static::lazy_static;

/// Fields decoded from one router log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLog {
    pub swap_type: SwapType,
    pub token: String,
    pub from: String,
    pub bind: String,
    pub value: U256,
    pub from_chain_id: u64,
    pub to_chain_id: u64,
    pub payload: SwapPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataLen {
    Exact(usize),
    AtLeast(usize),
}

pub struct LogDecoder {
    pub signature: &'static str,
    pub topic: H256,
    pub swap_type: SwapType,
    topics: usize,
    data_len: DataLen,
    parse: fn(&[H256], &[u8]) -> RouterResult<DecodedLog>,
}

impl LogDecoder {
    fn new(
        signature: &'static str,
        swap_type: SwapType,
        topics: usize,
        data_len: DataLen,
        parse: fn(&[H256], &[u8]) -> RouterResult<DecodedLog>,
    ) -> Self {
        Self {
            signature,
            topic: H256::from(keccak256(signature.as_bytes())),
            swap_type,
            topics,
            data_len,
            parse,
        }
    }

    pub fn decode(&self, log: &Log) -> RouterResult<DecodedLog> {
        if log.topics.len() != self.topics {
            return Err(RouterError::TxWithWrongTopics);
        }
        let data = log.data.as_ref();
        let length_ok = match self.data_len {
            DataLen::Exact(n) => data.len() == n,
            DataLen::AtLeast(n) => data.len() >= n,
        };
        if !length_ok {
            return Err(RouterError::ParseData(format!(
                "{} data length {}",
                self.signature,
                data.len()
            )));
        }
        (self.parse)(&log.topics, data)
    }
}

lazy_static! {
    pub static ref DECODERS: Vec<LogDecoder> = vec![
        LogDecoder::new(
            "LogAnySwapOut(address,address,address,uint256,uint256,uint256)",
            SwapType::SimpleTransfer,
            4,
            DataLen::Exact(96),
            parse_swap_out,
        ),
        LogDecoder::new(
            "LogAnySwapOut(address,address,string,uint256,uint256,uint256)",
            SwapType::SimpleTransfer,
            3,
            DataLen::AtLeast(160),
            parse_swap_out_to_string,
        ),
        LogDecoder::new(
            "LogAnySwapOutAndCall(address,address,string,uint256,uint256,uint256,string,bytes)",
            SwapType::TransferWithCall,
            3,
            DataLen::AtLeast(288),
            parse_swap_out_and_call,
        ),
        LogDecoder::new(
            "LogAnySwapTradeTokensForTokens(address[],address,address,uint256,uint256,uint256,uint256)",
            SwapType::TradeForToken,
            3,
            DataLen::AtLeast(192),
            parse_trade_for_tokens,
        ),
        LogDecoder::new(
            "LogAnySwapTradeTokensForNative(address[],address,address,uint256,uint256,uint256,uint256)",
            SwapType::TradeForNative,
            3,
            DataLen::AtLeast(192),
            parse_trade_for_native,
        ),
        LogDecoder::new(
            "LogAnyCall(address,address[],bytes[],address[],uint256[],uint256,uint256)",
            SwapType::TransferWithCall,
            2,
            DataLen::AtLeast(320),
            parse_any_call,
        ),
    ];
}

pub fn decoder_for(topic: &H256) -> Option<&'static LogDecoder> {
    DECODERS.iter().find(|d| &d.topic == topic)
}

fn parse_swap_out(topics: &[H256], data: &[u8]) -> RouterResult<DecodedLog> {
    Ok(DecodedLog {
        swap_type: SwapType::SimpleTransfer,
        token: topic_address(&topics[1]),
        from: topic_address(&topics[2]),
        bind: topic_address(&topics[3]),
        value: parse_u256(data, 0)?,
        from_chain_id: parse_u64(data, 32)?,
        to_chain_id: parse_u64(data, 64)?,
        payload: SwapPayload::Transfer,
    })
}

fn parse_swap_out_to_string(topics: &[H256], data: &[u8]) -> RouterResult<DecodedLog> {
    Ok(DecodedLog {
        swap_type: SwapType::SimpleTransfer,
        token: topic_address(&topics[1]),
        from: topic_address(&topics[2]),
        bind: parse_string(data, 0)?,
        value: parse_u256(data, 32)?,
        from_chain_id: parse_u64(data, 64)?,
        to_chain_id: parse_u64(data, 96)?,
        payload: SwapPayload::Transfer,
    })
}

fn parse_swap_out_and_call(topics: &[H256], data: &[u8]) -> RouterResult<DecodedLog> {
    Ok(DecodedLog {
        swap_type: SwapType::TransferWithCall,
        token: topic_address(&topics[1]),
        from: topic_address(&topics[2]),
        bind: parse_string(data, 0)?,
        value: parse_u256(data, 32)?,
        from_chain_id: parse_u64(data, 64)?,
        to_chain_id: parse_u64(data, 96)?,
        payload: SwapPayload::CallProxy {
            call_proxy: parse_string(data, 128)?,
            call_data: parse_bytes(data, 160)?.into(),
        },
    })
}

fn parse_trade(topics: &[H256], data: &[u8], for_native: bool) -> RouterResult<DecodedLog> {
    let path = parse_address_slice(data, 0)?;
    if path.len() < 3 {
        return Err(RouterError::TxWithWrongPath);
    }
    Ok(DecodedLog {
        swap_type: if for_native {
            SwapType::TradeForNative
        } else {
            SwapType::TradeForToken
        },
        from: topic_address(&topics[1]),
        bind: topic_address(&topics[2]),
        value: parse_u256(data, 32)?,
        from_chain_id: parse_u64(data, 96)?,
        to_chain_id: parse_u64(data, 128)?,
        // The first element is the source token; the rest is the destination route
        token: path[0].clone(),
        payload: SwapPayload::Trade {
            path: path[1..].to_vec(),
            amount_out_min: parse_u256(data, 64)?,
            for_native,
        },
    })
}

fn parse_trade_for_tokens(topics: &[H256], data: &[u8]) -> RouterResult<DecodedLog> {
    parse_trade(topics, data, false)
}

fn parse_trade_for_native(topics: &[H256], data: &[u8]) -> RouterResult<DecodedLog> {
    parse_trade(topics, data, true)
}

fn parse_any_call(topics: &[H256], data: &[u8]) -> RouterResult<DecodedLog> {
    let call_from = topic_address(&topics[1]);
    let info = AnyCallInfo {
        call_from: call_from.clone(),
        call_to: parse_address_slice(data, 0)?,
        call_data: parse_bytes_slice(data, 32)?,
        callbacks: parse_address_slice(data, 64)?,
        call_nonces: parse_u256_slice(data, 96)?,
    };
    Ok(DecodedLog {
        swap_type: SwapType::TransferWithCall,
        token: String::new(),
        from: call_from,
        bind: String::new(),
        value: U256::zero(),
        from_chain_id: parse_u64(data, 128)?,
        to_chain_id: parse_u64(data, 160)?,
        payload: SwapPayload::AnyCall(info),
    })
}
