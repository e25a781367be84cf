//! aotdbg のコア機能
//!
//! このクレートは、ホストデバッガセッションへの登録処理と、デバッガ連携の補助機能を提供します。
//! 文字列フォーマッターとアタッチ解除コマンドの登録、古いjdbアタッチの解除、クライアント出力の読み取りを行います。

pub mod command;
pub mod drain;
pub mod errors;
pub mod jdb;
pub mod session;

pub use command::Command;
pub use jdb::{clear_stale_attachment, ClearConfig, ClearOutcome, ClearReport, SystemSpawner};
pub use session::{ClearJdbCommand, HostCommand, Session, CLEAR_COMMAND_NAME, STRING_TYPE_NAME};

// 他のクレートから使用するために再エクスポート
pub use aotdbg_format::{MemoryReader, ObjectLayout};

/// コア処理の結果型
pub type Result<T> = anyhow::Result<T>;
