// ==========================================
// 称重汇总系统 - SAP 传输接口
// ==========================================
// 职责: 定义传输 trait (引擎依赖抽象,HTTP 实现可替换)
// 说明: 引擎不重试失败的发送,重试由人工决定
// ==========================================

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

// ==========================================
// 传输报文
// ==========================================

/// 单条明细的过账行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransmissionRow {
    pub item_id: i64,
    pub batch_code: String,
    pub production_order_number: String,
    pub material_code: String,
    pub plant_code: Option<String>,
    pub storage_location: Option<String>,
    pub storage_location_target: Option<String>,
    pub production_lot: Option<String>,
    pub transaction_type: Option<String>,
    pub quantity: f64, // 折算重量
    pub unit: Option<String>,
    pub posting_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransmissionRequest {
    pub batch_id: i64,
    pub batch_code: String,
    pub items: Vec<TransmissionRow>,
}

/// 传输响应
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkResponse {
    pub status: u16,
    /// 明细 id → 物料凭证号
    pub material_documents: HashMap<i64, String>,
}

impl SinkResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("传输失败: {0}")]
    Transport(String),

    #[error("传输客户端初始化失败: {0}")]
    Client(String),
}

// ==========================================
// TransmissionSink Trait
// ==========================================
#[async_trait]
pub trait TransmissionSink: Send + Sync {
    /// 发送一个批次
    ///
    /// 非 2xx 以 Ok(status) 返回,网络层错误返回 Err
    async fn send(&self, request: &TransmissionRequest) -> Result<SinkResponse, SinkError>;
}

// ==========================================
// HttpTransmissionSink - reqwest 实现
// ==========================================

/// 响应体中可选的物料凭证列表
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SapResponseBody {
    #[serde(default)]
    material_documents: Vec<MaterialDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MaterialDocument {
    item_id: i64,
    material_document: String,
}

pub struct HttpTransmissionSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransmissionSink {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Client(e.to_string()))?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TransmissionSink for HttpTransmissionSink {
    #[instrument(skip(self, request), fields(batch_code = %request.batch_code, items = request.items.len()))]
    async fn send(&self, request: &TransmissionRequest) -> Result<SinkResponse, SinkError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Ok(SinkResponse {
                status: status.as_u16(),
                material_documents: HashMap::new(),
            });
        }

        // 响应体缺失或格式不符时仍视为成功,只是没有凭证号
        let body: SapResponseBody = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                debug!(error = %e, "SAP 响应体无法解析,忽略物料凭证");
                SapResponseBody::default()
            }
        };

        Ok(SinkResponse {
            status: status.as_u16(),
            material_documents: body
                .material_documents
                .into_iter()
                .map(|d| (d.item_id, d.material_document))
                .collect(),
        })
    }
}
