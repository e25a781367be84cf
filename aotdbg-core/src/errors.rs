//! エラーメッセージ定数

/// プロセスに接続されていない場合のエラーメッセージ
pub const ERR_NOT_ATTACHED: &str = "Not attached to a process";

/// 型のレイアウトが登録されていない場合のエラーメッセージ
pub const ERR_NO_LAYOUT: &str = "No layout registered for type";

/// コマンドが登録されていない場合のエラーメッセージ
pub const ERR_UNKNOWN_COMMAND: &str = "Unknown command";
