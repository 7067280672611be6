use crate::error::Result;
use patchwise_code_chunker::{language_tag, Language};
use patchwise_vector_store::FileContent;
use serde::Serialize;
use std::path::Path;

/// The file a pipeline run repairs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFile {
    pub filename: String,
    pub content: String,
    /// Uppercased extension, or `TXT`
    pub language_tag: String,
}

impl SourceFile {
    pub fn new(filename: impl Into<String>, content: impl Into<String>) -> Self {
        let filename = filename.into();
        let language_tag = language_tag(&filename);
        Self {
            filename,
            content: content.into(),
            language_tag,
        }
    }

    /// Read a UTF-8 file; the filename is the path's basename
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        let filename = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        log::debug!("Read {} ({} bytes)", path.display(), content.len());
        Ok(Self::new(filename, content))
    }

    /// Name used for code fences and review prompts
    pub fn language_name(&self) -> String {
        match Language::from_tag(&self.language_tag) {
            Language::Unknown => self.language_tag.to_ascii_lowercase(),
            language => language.as_str().to_string(),
        }
    }

    pub fn to_file_content(&self) -> FileContent {
        FileContent::new(self.filename.clone(), self.content.clone())
    }
}
