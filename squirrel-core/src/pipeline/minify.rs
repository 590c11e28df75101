//! Whitespace minification stage.

use async_trait::async_trait;

use crate::config::{keys, Properties};
use crate::core::Result;
use crate::nut::{Nut, NutType};
use crate::pipeline::request::PipelineRequest;
use crate::pipeline::stage::{EngineType, NodeStage};

/// Strips indentation, trailing whitespace and blank lines from text nuts.
///
/// Heavier minifiers (obfuscation, dead-code elimination) plug in as
/// replacement stages of the same engine type.
pub struct TextMinifierStage {
    enabled: bool,
    line_break_pos: u64,
    types: Vec<NutType>,
}

impl TextMinifierStage {
    /// Supported configuration keys.
    pub const SUPPORTED_KEYS: &'static [&'static str] =
        &[keys::COMPRESS, keys::LINE_BREAK_POS];

    /// Creates an enabled minifier for CSS and Javascript.
    pub fn new() -> Self {
        Self {
            enabled: true,
            line_break_pos: 0,
            types: vec![NutType::Css, NutType::Javascript],
        }
    }

    /// Builds a minifier from a property bag, honoring [`keys::COMPRESS`]
    /// and [`keys::LINE_BREAK_POS`].
    pub fn from_properties(props: &Properties) -> Result<Self> {
        props.validate("text minifier", Self::SUPPORTED_KEYS)?;
        let mut stage = Self::new();
        stage.enabled = props.bool_or(keys::COMPRESS, true)?;
        stage.line_break_pos = props.u64_or(keys::LINE_BREAK_POS, 0)?;
        Ok(stage)
    }

    fn minify(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push('\n');
            }
            if self.line_break_pos > 0 {
                let mut column = 0usize;
                for ch in trimmed.chars() {
                    if column >= self.line_break_pos as usize {
                        out.push('\n');
                        column = 0;
                    }
                    out.push(ch);
                    column += 1;
                }
            } else {
                out.push_str(trimmed);
            }
        }
        out
    }
}

impl Default for TextMinifierStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeStage for TextMinifierStage {
    fn engine_type(&self) -> EngineType {
        EngineType::Minification
    }

    fn nut_types(&self) -> &[NutType] {
        &self.types
    }

    fn works(&self) -> bool {
        self.enabled
    }

    async fn transform(&self, _request: &PipelineRequest, nuts: Vec<Nut>) -> Result<Vec<Nut>> {
        let mut out = Vec::with_capacity(nuts.len());
        for nut in nuts {
            if !nut.is_text_compressible() {
                out.push(nut);
                continue;
            }
            let text = nut.open_text().await?;
            out.push(nut.with_bytes(self.minify(&text)));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::nut::Heap;
    use crate::pipeline::chain::ChainMap;

    fn request() -> PipelineRequest {
        let heap = Heap::new("h", None, Vec::new()).unwrap();
        PipelineRequest::new("wf", heap, Vec::new(), Arc::new(ChainMap::new()))
    }

    #[tokio::test]
    async fn test_strips_whitespace_and_blank_lines() {
        let stage = TextMinifierStage::new();
        let nut = Nut::from_bytes(
            "a.js",
            NutType::Javascript,
            "1",
            b"  var a;  \n\n   var b;\n".to_vec(),
        );

        let out = stage.transform(&request(), vec![nut]).await.unwrap();
        assert_eq!(out[0].open_text().await.unwrap(), "var a;\nvar b;");
        assert_eq!(out[0].name(), "a.js");
    }

    #[tokio::test]
    async fn test_line_break_position_wraps_long_lines() {
        let props = Properties::new().with(keys::LINE_BREAK_POS, "4");
        let stage = TextMinifierStage::from_properties(&props).unwrap();
        let nut = Nut::from_bytes("a.css", NutType::Css, "1", b"abcdefgh".to_vec());

        let out = stage.transform(&request(), vec![nut]).await.unwrap();
        assert_eq!(out[0].open_text().await.unwrap(), "abcd\nefgh");
    }

    #[tokio::test]
    async fn test_binary_nuts_untouched() {
        let stage = TextMinifierStage::new();
        let nut = Nut::from_bytes("logo.png", NutType::Png, "1", vec![0u8, 1, 2]);

        let out = stage.transform(&request(), vec![nut]).await.unwrap();
        assert_eq!(&*out[0].open().await.unwrap(), &[0u8, 1, 2]);
    }

    #[test]
    fn test_unsupported_key_rejected() {
        let props = Properties::new().with(keys::OBFUSCATE, "true");
        assert!(TextMinifierStage::from_properties(&props).is_err());
    }
}
