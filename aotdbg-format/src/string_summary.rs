//! UTF-16文字列のサマリー
//!
//! 文字データ参照と長さフィールドを持つ文字列オブジェクトを、ターゲットメモリから直接読み取って表示します。
//! 表示に失敗しても例外的な状態をホストに伝播せず、固定の表示文字列を返します。

use crate::memory::MemoryReader;
use crate::registry::SummaryProvider;
use crate::value::{ValueHandle, INVALID_ADDRESS};
use thiserror::Error;
use tracing::{debug, warn};

/// 空文字列、または長さを取得できなかった場合の表示
pub const EMPTY_SUMMARY: &str = "\"\"";

/// 文字データのアドレスが解決できなかった場合の表示
pub const INVALID_ADDRESS_SUMMARY: &str = "<invalid address>";

/// メモリ読み取り・デコード失敗時の表示の接頭辞
pub const READ_ERROR_PREFIX: &str = "<error reading string: ";

/// 想定外の失敗時の表示
pub const UNEXPECTED_ERROR_SUMMARY: &str = "<error formatting string>";

/// UTF-16の1要素のバイト数
const UTF16_ELEMENT_SIZE: u64 = 2;

/// サマリー生成の失敗
#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("string is empty")]
    Empty,
    #[error("invalid address")]
    InvalidAddress,
    #[error("{0}")]
    Read(String),
    #[error("{0}")]
    Unexpected(String),
}

impl SummaryError {
    /// 失敗を表示用の固定文字列に変換する
    pub fn to_summary(&self) -> String {
        match self {
            SummaryError::Empty => EMPTY_SUMMARY.to_string(),
            SummaryError::InvalidAddress => INVALID_ADDRESS_SUMMARY.to_string(),
            SummaryError::Read(reason) => format!("{}{}>", READ_ERROR_PREFIX, reason),
            SummaryError::Unexpected(_) => UNEXPECTED_ERROR_SUMMARY.to_string(),
        }
    }
}

/// UTF-16文字列のサマリープロバイダー
///
/// `data_field` の格納アドレスから `length_field` 要素分（2バイト/要素）を読み取り、UTF-16としてデコードします。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utf16StringSummary {
    pub data_field: String,
    pub length_field: String,
}

impl Default for Utf16StringSummary {
    fn default() -> Self {
        Self::new("_firstChar", "_stringLength")
    }
}

impl Utf16StringSummary {
    pub fn new(data_field: impl Into<String>, length_field: impl Into<String>) -> Self {
        Self {
            data_field: data_field.into(),
            length_field: length_field.into(),
        }
    }

    /// 文字列を読み取ってデコードする
    pub fn read_string(
        &self,
        value: &dyn ValueHandle,
        memory: &dyn MemoryReader,
    ) -> Result<String, SummaryError> {
        let (Some(data), Some(length)) = (
            value.child(&self.data_field),
            value.child(&self.length_field),
        ) else {
            return Err(SummaryError::Empty);
        };

        let length = length
            .value_as_unsigned()
            .map_err(|e| SummaryError::Unexpected(format!("failed to read length: {}", e)))?;
        if length == 0 {
            return Err(SummaryError::Empty);
        }

        let address = data.load_address();
        if address == INVALID_ADDRESS {
            return Err(SummaryError::InvalidAddress);
        }

        let byte_len = length
            .checked_mul(UTF16_ELEMENT_SIZE)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| SummaryError::Unexpected(format!("string length {} is too large", length)))?;
        let address = usize::try_from(address)
            .map_err(|_| SummaryError::Unexpected(format!("address 0x{:x} does not fit in usize", address)))?;

        let bytes = memory
            .read(address, byte_len)
            .map_err(|e| SummaryError::Read(e.to_string()))?;
        if bytes.len() != byte_len {
            return Err(SummaryError::Read(format!(
                "short read at 0x{:x}: got {} of {} bytes",
                address,
                bytes.len(),
                byte_len
            )));
        }

        decode_utf16le(&bytes).map_err(|e| SummaryError::Read(e.to_string()))
    }
}

impl SummaryProvider for Utf16StringSummary {
    fn summarize(&self, value: &dyn ValueHandle, memory: &dyn MemoryReader) -> String {
        match self.read_string(value, memory) {
            Ok(text) => quote(&text),
            Err(e) => {
                match &e {
                    SummaryError::Empty | SummaryError::InvalidAddress => {
                        debug!("string summary for {}: {}", value.type_name(), e)
                    }
                    SummaryError::Read(reason) => {
                        warn!("failed to read string for {}: {}", value.type_name(), reason)
                    }
                    SummaryError::Unexpected(reason) => {
                        warn!("unexpected error formatting {}: {}", value.type_name(), reason)
                    }
                }
                e.to_summary()
            }
        }
    }
}

/// リトルエンディアンのUTF-16バイト列をデコードする
fn decode_utf16le(bytes: &[u8]) -> crate::Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(anyhow::anyhow!("odd byte count {} for UTF-16 data", bytes.len()));
    }

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    String::from_utf16(&units).map_err(|e| anyhow::anyhow!("{}", e))
}

/// 文字列を二重引用符で囲んで表示用にする
fn quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for ch in text.chars() {
        match ch {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            _ => quoted.push(ch),
        }
    }
    quoted.push('"');
    quoted
}
