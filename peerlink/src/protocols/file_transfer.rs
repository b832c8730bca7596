use serde::{Deserialize, Serialize};

/// Messages sent over the direct channel while a file is transferred.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum FileTransferMessage {
    #[serde(rename = "fileInfo")]
    FileInfo {
        name: String,
        size: u64,
        #[serde(rename = "fileType")]
        file_type: String,
        #[serde(
            rename = "totalChunks",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        total_chunks: Option<u64>,
    },
    #[serde(rename = "chunk")]
    Chunk {
        /// Base64 of the raw bytes.
        data: String,
        #[serde(rename = "totalChunks")]
        total_chunks: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<u64>,
    },
}

impl FileTransferMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decodes one channel message.
    ///
    /// Messages whose `type` is not a transfer message yield `Ok(None)`.
    pub fn decode(text: &str) -> Result<Option<Self>, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        match value.get("type").and_then(|t| t.as_str()) {
            Some("fileInfo") | Some("chunk") => serde_json::from_value(value).map(Some),
            _ => Ok(None),
        }
    }
}
