//! 视觉分析服务 - 业务能力层
//!
//! 只负责"把一张图片交给视觉模型并拿回文本"这一能力，不做解析、不关心流程
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 兼容 OpenAI API 的服务（自定义端点和模型）
//!
//! ## 调用策略
//! `ResilientAnalyzer` 为任意 `Analyzer` 加上单次超时和指数退避重试，
//! 只有超时与临时故障会被重试。

use std::sync::Arc;
use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    error::{ApiError, OpenAIError},
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
        ImageUrl,
    },
    Client,
};
use async_trait::async_trait;
use base64::Engine;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::AnalyzerError;

/// 系统提示词：塞内加尔地籍评估规则
pub const SYSTEM_PROMPT: &str = "Tu es un expert en évaluation cadastrale au Sénégal. \
À partir d'une photo d'un bâtiment, tu dois : \
- Décrire brièvement l'apparence générale (style, matériaux, hauteur, état apparent). \
- Déterminer le nombre de niveaux selon : Terrain nu=0, RDC=1, R+1=2, R+2=3, etc. \
- Déterminer si l'immeuble est individuel, collectif ou terrain nu. \
- Catégoriser : 1/2/3/4 pour individuel ou A/B/C/D pour collectif, basé sur confort et équipements. \
- Calculer le coefficient d'entretien et vétusté (CENVET) entre 1.0 et 0.3 selon état. \
- Calculer le coefficient de voisinage (1.1, 1.0, 0.9 ou 0.8) selon avantages ou inconvénients. \
- Déterminer le coefficient d'abattement : \
1.0 si moins de 6 ans, \
entre 0.5 et 0.95 si plus vieux selon état apparent. \
Réponds uniquement en JSON : \
{'niveaux': ?, 'type_immeuble': 'individuel/collectif/terrain nu', \
'categorie': 'A/B/C/D/1/2/3/4/Aucun', \
'description': '...', \
'cenvet': ?, \
'coefficient_voisinage': ?, \
'coefficient_abatement': ?}";

/// 用户消息中的文字部分
pub const USER_PROMPT: &str = "Voici l'image, analyse-la selon ces règles :";

/// 视觉分析能力
///
/// 输入图片字节，输出模型的原始文本；实现方不做任何解析
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, image: &[u8], mime: &str) -> Result<String, AnalyzerError>;
}

/// 把图片编码为 data URL
pub fn data_url(image: &[u8], mime: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(image);
    format!("data:{};base64,{}", mime, encoded)
}

/// 基于 OpenAI 兼容接口的视觉分析
pub struct VisionLlmAnalyzer {
    client: Client<OpenAIConfig>,
    model_name: String,
    temperature: f32,
    max_tokens: u32,
}

impl VisionLlmAnalyzer {
    /// 创建新的视觉分析服务
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        // 重试只由 ResilientAnalyzer 负责，关闭客户端内置的退避重试
        let no_retry = backoff::ExponentialBackoff {
            max_elapsed_time: Some(Duration::ZERO),
            ..Default::default()
        };

        Self {
            client: Client::with_config(openai_config).with_backoff(no_retry),
            model_name: config.llm_model_name.clone(),
            temperature: config.llm_temperature,
            max_tokens: config.llm_max_tokens,
        }
    }

    fn build_messages(
        &self,
        image: &[u8],
        mime: &str,
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(SYSTEM_PROMPT)
            .build()?;

        let content_parts = vec![
            ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: USER_PROMPT.to_string(),
                },
            ),
            ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImage {
                    image_url: ImageUrl {
                        url: data_url(image, mime),
                        detail: Some(ImageDetail::Auto),
                    },
                },
            ),
        ];

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Array(content_parts))
            .build()?;

        Ok(vec![
            ChatCompletionRequestMessage::System(system_msg),
            ChatCompletionRequestMessage::User(user_msg),
        ])
    }
}

#[async_trait]
impl Analyzer for VisionLlmAnalyzer {
    async fn analyze(&self, image: &[u8], mime: &str) -> Result<String, AnalyzerError> {
        debug!(
            "调用视觉模型，模型: {}，图片大小: {} 字节",
            self.model_name,
            image.len()
        );

        let messages = self.build_messages(image, mime).map_err(classify)?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build()
            .map_err(classify)?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("视觉模型调用失败: {}", e);
            classify(e)
        })?;

        debug!("视觉模型调用成功");

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(AnalyzerError::EmptyResponse)
    }
}

/// 区分可重试与不可重试的错误
fn classify(err: OpenAIError) -> AnalyzerError {
    let transient = match &err {
        OpenAIError::Reqwest(_) => true,
        OpenAIError::ApiError(api) => is_transient_api_error(api),
        _ => false,
    };
    if transient {
        AnalyzerError::Transient(err.to_string())
    } else {
        AnalyzerError::Permanent(err.to_string())
    }
}

/// 限流与服务端错误可以重试，额度耗尽不行
///
/// 5xx 响应体不是 JSON，客户端构造的 `ApiError` 不带 `type` 与 `code`
fn is_transient_api_error(api: &ApiError) -> bool {
    let kind = api.r#type.as_deref().unwrap_or_default();
    let code = api.code.as_deref().unwrap_or_default();
    if kind == "insufficient_quota" || code == "insufficient_quota" {
        return false;
    }
    if api.r#type.is_none() && api.code.is_none() {
        return true;
    }
    [kind, code].iter().any(|field| {
        field.contains("rate_limit") || field.contains("server_error") || field.contains("overloaded")
    })
}

/// 超时与重试策略
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 单次调用超时
    pub timeout: Duration,
    /// 首次调用之外的最大重试次数
    pub max_retries: u32,
    /// 首次重试前的等待时间，之后每次翻倍
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.analyzer_timeout(),
            max_retries: config.analyzer_max_retries,
            backoff: config.analyzer_backoff(),
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// 带超时和重试的分析服务包装
pub struct ResilientAnalyzer {
    inner: Arc<dyn Analyzer>,
    policy: RetryPolicy,
}

impl ResilientAnalyzer {
    pub fn new(inner: Arc<dyn Analyzer>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl Analyzer for ResilientAnalyzer {
    async fn analyze(&self, image: &[u8], mime: &str) -> Result<String, AnalyzerError> {
        let mut attempt = 0;
        loop {
            let result = match timeout(self.policy.timeout, self.inner.analyze(image, mime)).await {
                Ok(result) => result,
                Err(_) => Err(AnalyzerError::Timeout(self.policy.timeout)),
            };

            match result {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < self.policy.max_retries => {
                    let delay = self.policy.delay_for(attempt);
                    attempt += 1;
                    info!(
                        "分析服务临时故障 (尝试 {}/{}): {}，{:?} 后重试...",
                        attempt,
                        self.policy.max_retries + 1,
                        e,
                        delay
                    );
                    sleep(delay).await;
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!("分析服务调用失败，已重试 {} 次: {}", attempt, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// 按配置构建生产环境使用的分析服务
pub fn build_analyzer(config: &Config) -> Arc<dyn Analyzer> {
    let inner: Arc<dyn Analyzer> = Arc::new(VisionLlmAnalyzer::new(config));
    Arc::new(ResilientAnalyzer::new(inner, RetryPolicy::from_config(config)))
}
