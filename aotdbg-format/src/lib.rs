//! aotdbg 値フォーマッター
//!
//! このクレートは、デバッグ対象プロセスのメモリを直接読み取って値を表示するための機能を提供します。
//! 値ハンドルの抽象化、オブジェクトレイアウト、UTF-16文字列のサマリー、型名によるフォーマッター登録を行います。

pub mod memory;
pub mod value;
pub mod string_summary;
pub mod registry;

pub use memory::{MemoryReader, VecMemory};
pub use value::{FieldLayout, FieldValue, ObjectLayout, ObjectValue, ValueHandle, INVALID_ADDRESS};
pub use string_summary::{SummaryError, Utf16StringSummary};
pub use registry::{FormatterRegistry, SummaryProvider};

/// フォーマット処理の結果型
pub type Result<T> = anyhow::Result<T>;
