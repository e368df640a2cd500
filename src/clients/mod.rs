pub mod llm_client;
pub mod ocr_client;

use std::sync::Arc;

pub use llm_client::{ChatModel, OpenAiChatModel};
pub use ocr_client::{OcrEngine, OcrMyPdfEngine, OcrOutput, TextLayerEngine};

use crate::config::{Config, OcrEngineKind};

/// 按配置选择 OCR 引擎
pub fn ocr_engine_from_config(config: &Config) -> Arc<dyn OcrEngine> {
    match config.ocr_engine {
        OcrEngineKind::Ocrmypdf => Arc::new(OcrMyPdfEngine::new(config)),
        OcrEngineKind::TextLayer => Arc::new(TextLayerEngine),
    }
}
