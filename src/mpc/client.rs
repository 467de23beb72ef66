//! MPC node JSON-RPC client

use super::types::*;
use crate::config::MpcConfig;
use crate::error::{RouterError, RouterResult};
use crate::rpc::RpcTransport;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Quorum operations the coordinator and the acceptor rely on
#[async_trait]
pub trait MpcApi: Send + Sync {
    /// Submit a sign request; returns the session key
    async fn sign(&self, request: &SignRequest) -> RouterResult<String>;

    /// Session progress, envelope checked but quorum status uninterpreted
    async fn get_sign_status(&self, key: &str) -> RouterResult<SignStatus>;

    /// Valid, unexpired sign requests pending on this node, oldest first
    async fn get_cur_node_sign_info(&self, expired_interval_secs: i64)
        -> RouterResult<Vec<SignInfoData>>;

    async fn accept_sign(&self, request: &AcceptRequest) -> RouterResult<String>;
}

pub struct MpcClient {
    transport: Arc<dyn RpcTransport>,
    api_prefix: String,
    rpc_address: String,
    node_address: String,
    timeout: Duration,
}

impl MpcClient {
    pub fn new(config: &MpcConfig, transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            transport,
            api_prefix: config.api_prefix.clone(),
            rpc_address: config.rpc_address.clone(),
            node_address: config.node_address.clone(),
            timeout: Duration::from_secs(config.rpc_timeout_secs),
        }
    }

    async fn post<T: DeserializeOwned>(&self, method: &str, params: Value) -> RouterResult<T> {
        let full_method = format!("{}{}", self.api_prefix, method);
        let wrap = |e: String| RouterError::Mpc(format!("[post] {} error, {}", full_method, e));

        let request =
            self.transport
                .post_request(&self.rpc_address, &full_method, params, self.timeout);
        let value = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| wrap("timed out".to_string()))?
            .map_err(|e| wrap(e.to_string()))?;
        serde_json::from_value(value).map_err(|e| wrap(e.to_string()))
    }

    fn data_result(subject: &str, resp: DataResultResp) -> RouterResult<String> {
        if resp.status != SUCCESS_STATUS {
            return Err(RouterError::MpcWrongStatus {
                subject: subject.to_string(),
                status: resp.status,
                error: resp.error,
            });
        }
        Ok(resp.data.unwrap_or_default().result)
    }

    pub async fn get_enode(&self) -> RouterResult<String> {
        let resp: GetEnodeResp = self.post("getEnode", json!([])).await?;
        if resp.status != SUCCESS_STATUS {
            return Err(RouterError::MpcWrongStatus {
                subject: "getEnode".into(),
                status: resp.status,
                error: resp.error,
            });
        }
        Ok(resp.data.map(|d| d.enode).unwrap_or_default())
    }

    pub async fn get_group_by_id(&self, group_id: &str) -> RouterResult<GroupInfo> {
        let resp: GetGroupByIdResp = self.post("getGroupByID", json!([group_id])).await?;
        if resp.status != SUCCESS_STATUS {
            return Err(RouterError::MpcWrongStatus {
                subject: "getGroupByID".into(),
                status: resp.status,
                error: resp.error,
            });
        }
        Ok(resp.data.unwrap_or_default())
    }

    /// Confirm this node belongs to `group_id`; returns its enode
    pub async fn check_membership(&self, group_id: &str) -> RouterResult<String> {
        let enode = self.get_enode().await?;
        let node_id = enode_id(&enode)
            .ok_or_else(|| RouterError::Mpc(format!("getEnode returned malformed enode {}", enode)))?;
        let group = self.get_group_by_id(group_id).await?;
        if !group.enodes.iter().any(|e| enode_id(e) == Some(node_id)) {
            return Err(RouterError::Config(format!(
                "node {} is not a member of signing group {} ({} members)",
                node_id, group_id, group.count
            )));
        }
        debug!(group_id, count = group.count, "Signing group membership confirmed");
        Ok(enode)
    }
}

/// Node id part of `enode://<id>@<host>:<port>`
fn enode_id(enode: &str) -> Option<&str> {
    let rest = enode.trim().strip_prefix("enode://").unwrap_or(enode.trim());
    let id = rest.split('@').next().unwrap_or_default();
    (!id.is_empty()).then_some(id)
}

fn encode<T: serde::Serialize>(request: &T) -> RouterResult<String> {
    serde_json::to_string(request).map_err(|e| RouterError::Internal(e.to_string()))
}

#[async_trait]
impl MpcApi for MpcClient {
    async fn sign(&self, request: &SignRequest) -> RouterResult<String> {
        let resp: DataResultResp = self.post("sign", json!([encode(request)?])).await?;
        Self::data_result("sign", resp)
    }

    async fn get_sign_status(&self, key: &str) -> RouterResult<SignStatus> {
        let resp: DataResultResp = self.post("getSignStatus", json!([key])).await?;
        let data = Self::data_result("getSignStatus", resp)?;
        serde_json::from_str(&data)
            .map_err(|e| RouterError::Mpc(format!("getSignStatus undecodable result: {}", e)))
    }

    async fn get_cur_node_sign_info(
        &self,
        expired_interval_secs: i64,
    ) -> RouterResult<Vec<SignInfoData>> {
        let resp: SignInfoResp = self
            .post("getCurNodeSignInfo", json!([self.node_address]))
            .await?;
        if resp.status != SUCCESS_STATUS {
            return Err(RouterError::MpcWrongStatus {
                subject: "getCurNodeSignInfo".into(),
                status: resp.status,
                error: resp.error,
            });
        }

        let now = chrono::Utc::now().timestamp();
        let mut infos: Vec<SignInfoData> = resp
            .data
            .into_iter()
            .filter(|info| {
                if !info.is_valid() {
                    trace!(key = %info.key, "Filter out invalid sign info");
                    return false;
                }
                let expired = expired_interval_secs > 0
                    && (info.timestamp_ms() / 1000) as i64 + expired_interval_secs < now;
                if expired {
                    trace!(key = %info.key, "Filter out expired sign info");
                }
                !expired
            })
            .collect();
        infos.sort_by_key(SignInfoData::timestamp_ms);
        Ok(infos)
    }

    async fn accept_sign(&self, request: &AcceptRequest) -> RouterResult<String> {
        let resp: DataResultResp = self.post("acceptSign", json!([encode(request)?])).await?;
        Self::data_result("acceptSign", resp)
    }
}
