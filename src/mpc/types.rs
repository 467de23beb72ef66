//! Wire types of the MPC node JSON-RPC API

use crate::swap::{BuildTxArgs, RawTx};

use serde::{Deserialize, Serialize};

pub const SUCCESS_STATUS: &str = "Success";
pub const AGREE: &str = "AGREE";
pub const DISAGREE: &str = "DISAGREE";

/// `{Status, Tip, Error, Data: {result}}` envelope
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DataResultResp {
    pub status: String,
    #[serde(default)]
    pub tip: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub data: Option<DataResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataResult {
    #[serde(default)]
    pub result: String,
}

/// Progress of a signing session as reported by the quorum
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignStatus {
    pub status: String,
    #[serde(default)]
    pub rsv: Vec<String>,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub all_reply: Vec<SignReply>,
    #[serde(default)]
    pub time_stamp: String,
}

impl SignStatus {
    /// Some node answered DISAGREE
    pub fn has_disagree(&self) -> bool {
        self.all_reply
            .iter()
            .any(|reply| reply.status.eq_ignore_ascii_case(DISAGREE))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignReply {
    #[serde(default)]
    pub enode: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub time_stamp: String,
    #[serde(default)]
    pub initiator: String,
}

/// `getCurNodeSignInfo` envelope
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignInfoResp {
    pub status: String,
    #[serde(default)]
    pub tip: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub data: Vec<SignInfoData>,
}

/// A sign request waiting for this node's answer
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignInfoData {
    #[serde(default)]
    pub account: String,
    #[serde(rename = "GroupId", default)]
    pub group_id: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub key_type: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub msg_context: Vec<String>,
    #[serde(default)]
    pub msg_hash: Vec<String>,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub pub_key: String,
    #[serde(default)]
    pub thres_hold: String,
    #[serde(default)]
    pub time_stamp: String,
}

impl SignInfoData {
    pub fn is_valid(&self) -> bool {
        !self.key.is_empty()
            && !self.pub_key.is_empty()
            && !self.msg_hash.is_empty()
            && self.msg_hash.len() == self.msg_context.len()
    }

    /// Milliseconds since epoch, zero when unparsable
    pub fn timestamp_ms(&self) -> u64 {
        self.time_stamp.parse().unwrap_or_default()
    }
}

/// Payload of a `sign` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignRequest {
    pub key_type: String,
    #[serde(rename = "GroupId")]
    pub group_id: String,
    pub thres_hold: String,
    pub mode: String,
    pub pub_key: String,
    pub msg_hash: Vec<String>,
    pub msg_context: Vec<String>,
    pub time_stamp: String,
}

/// Payload of an `acceptSign` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AcceptRequest {
    pub key: String,
    pub accept: String,
    pub msg_hash: Vec<String>,
    pub msg_context: Vec<String>,
    pub time_stamp: String,
}

/// What co-signers need to re-verify a request: the build input and its result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignContext {
    pub args: BuildTxArgs,
    pub raw: RawTx,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnodeData {
    #[serde(default)]
    pub enode: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetEnodeResp {
    pub status: String,
    #[serde(default)]
    pub error: String,
    pub data: Option<EnodeData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupInfo {
    #[serde(rename = "Gid", default)]
    pub group_id: String,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub enodes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetGroupByIdResp {
    pub status: String,
    #[serde(default)]
    pub error: String,
    pub data: Option<GroupInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_status_decode() {
        let status: SignStatus = serde_json::from_str(
            r#"{"Status":"Failure","Rsv":[],"AllReply":[
                {"Enode":"a","Status":"AGREE","TimeStamp":"1","Initiator":"1"},
                {"Enode":"b","Status":"DISAGREE","TimeStamp":"2","Initiator":"0"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(status.status, "Failure");
        assert!(status.has_disagree());
    }

    #[test]
    fn test_sign_info_validity() {
        let info = SignInfoData {
            key: "k".into(),
            pub_key: "04ab".into(),
            msg_hash: vec!["0x01".into()],
            msg_context: vec!["{}".into()],
            time_stamp: "1700000000000".into(),
            ..Default::default()
        };
        assert!(info.is_valid());
        assert_eq!(info.timestamp_ms(), 1_700_000_000_000);

        let mismatched = SignInfoData {
            msg_context: vec![],
            ..info
        };
        assert!(!mismatched.is_valid());
    }
}
