//! ホストデバッガセッション
//!
//! 型名に対するフォーマッター、オブジェクトレイアウト、名前付きコマンドを保持し、
//! 検査対象プロセスのメモリを通して値を表示します。

use crate::errors::{ERR_NOT_ATTACHED, ERR_NO_LAYOUT, ERR_UNKNOWN_COMMAND};
use crate::jdb::{clear_stale_attachment, ClearConfig, ClientSpawner, SystemSpawner};
use crate::Result;
use aotdbg_format::{
    FormatterRegistry, MemoryReader, ObjectLayout, ObjectValue, Utf16StringSummary, ValueHandle,
};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// アタッチ解除コマンドの名前
pub const CLEAR_COMMAND_NAME: &str = "clearjdb";

/// 文字列フォーマッターを登録する型名
pub const STRING_TYPE_NAME: &str = "System.String";

/// セッションに登録するコマンド
pub trait HostCommand {
    /// ヘルプに表示する説明
    fn description(&self) -> &str;

    /// コマンドを実行して出力を返す
    fn run(&self, args: &[String]) -> Result<String>;
}

/// 古いjdbアタッチを解除するコマンド
///
/// 引数は受け取りません。解除に失敗しても出力メッセージで報告し、エラーにはしません。
pub struct ClearJdbCommand {
    config: ClearConfig,
    spawner: Box<dyn ClientSpawner>,
}

impl ClearJdbCommand {
    pub fn new(config: ClearConfig) -> Self {
        Self::with_spawner(config, Box::new(SystemSpawner))
    }

    pub fn with_spawner(config: ClearConfig, spawner: Box<dyn ClientSpawner>) -> Self {
        Self { config, spawner }
    }
}

impl HostCommand for ClearJdbCommand {
    fn description(&self) -> &str {
        "Connect jdb to the forwarded JDWP port and kill it to clear a stale attachment"
    }

    fn run(&self, args: &[String]) -> Result<String> {
        if !args.is_empty() {
            debug!("{} ignores arguments: {:?}", CLEAR_COMMAND_NAME, args);
        }
        let report = clear_stale_attachment(&self.config, self.spawner.as_ref());
        Ok(report.message())
    }
}

/// ホストデバッガセッション
#[derive(Default)]
pub struct Session {
    formatters: FormatterRegistry,
    layouts: HashMap<String, ObjectLayout>,
    commands: BTreeMap<String, Box<dyn HostCommand>>,
    memory: Option<Box<dyn MemoryReader>>,
}

impl Session {
    /// 空のセッションを作成する
    pub fn new() -> Self {
        Self::default()
    }

    /// モジュール初期化
    ///
    /// `System.String` のレイアウトとUTF-16文字列フォーマッター、
    /// およびアタッチ解除コマンドを登録します。
    pub fn init_module(&mut self, clear_config: ClearConfig) {
        let layout = ObjectLayout::system_string();
        let summary = Utf16StringSummary::default();
        self.register_layout(layout);
        self.formatters
            .register(STRING_TYPE_NAME, Box::new(summary));
        self.register_command(CLEAR_COMMAND_NAME, Box::new(ClearJdbCommand::new(clear_config)));
        info!(
            "registered '{}' summary and '{}' command",
            STRING_TYPE_NAME, CLEAR_COMMAND_NAME
        );
    }

    /// 検査対象のメモリを設定する
    pub fn set_memory(&mut self, memory: Box<dyn MemoryReader>) {
        self.memory = Some(memory);
    }

    pub fn has_memory(&self) -> bool {
        self.memory.is_some()
    }

    /// コマンドを登録する（既存の登録は置き換える）
    pub fn register_command(&mut self, name: impl Into<String>, command: Box<dyn HostCommand>) {
        self.commands.insert(name.into(), command);
    }

    /// オブジェクトレイアウトを登録する
    pub fn register_layout(&mut self, layout: ObjectLayout) {
        self.layouts.insert(layout.type_name.clone(), layout);
    }

    pub fn formatters(&self) -> &FormatterRegistry {
        &self.formatters
    }

    pub fn formatters_mut(&mut self) -> &mut FormatterRegistry {
        &mut self.formatters
    }

    /// 登録済みコマンドの名前と説明
    pub fn commands(&self) -> Vec<(&str, &str)> {
        self.commands
            .iter()
            .map(|(name, command)| (name.as_str(), command.description()))
            .collect()
    }

    /// 登録済みコマンドを実行する
    pub fn run_command(&self, name: &str, args: &[String]) -> Result<String> {
        let command = self
            .commands
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("{}: {}", ERR_UNKNOWN_COMMAND, name))?;
        command.run(args)
    }

    /// 指定アドレスのオブジェクトを表示する
    ///
    /// 型にフォーマッターが登録されていればそのサマリーを、なければフィールドの一覧を表示します。
    pub fn print_value(&self, type_name: &str, address: u64) -> Result<String> {
        let memory = self
            .memory
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!(ERR_NOT_ATTACHED))?;
        let layout = self
            .layouts
            .get(type_name)
            .ok_or_else(|| anyhow::anyhow!("{}: {}", ERR_NO_LAYOUT, type_name))?;

        let value = ObjectValue::new(memory, layout, address);
        let rendered = match self.formatters.summarize(&value, memory) {
            Some(summary) => summary,
            None => format_fields(&value),
        };

        Ok(format!("({}) 0x{:x} {}", type_name, address, rendered))
    }
}

/// フィールドを `{ name = value, ... }` の形式で表示する
fn format_fields(value: &ObjectValue<'_>) -> String {
    let fields: Vec<String> = value
        .layout()
        .fields
        .iter()
        .map(|field| {
            let rendered = match value.child(&field.name).map(|child| child.value_as_unsigned()) {
                Some(Ok(v)) => format!("0x{:x}", v),
                Some(Err(e)) => format!("<error: {}>", e),
                None => "<unavailable>".to_string(),
            };
            format!("{} = {}", field.name, rendered)
        })
        .collect();

    if fields.is_empty() {
        "{}".to_string()
    } else {
        format!("{{ {} }}", fields.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aotdbg_format::{FieldLayout, VecMemory};

    fn string_memory(base: usize, text: &str) -> VecMemory {
        let units: Vec<u16> = text.encode_utf16().collect();
        let mut data = 0x1234_u64.to_le_bytes().to_vec();
        data.extend_from_slice(&(units.len() as u32).to_le_bytes());
        for unit in units {
            data.extend_from_slice(&unit.to_le_bytes());
        }
        VecMemory::new(base, data)
    }

    struct EchoCommand;

    impl HostCommand for EchoCommand {
        fn description(&self) -> &str {
            "echo arguments"
        }

        fn run(&self, args: &[String]) -> Result<String> {
            Ok(args.join(" "))
        }
    }

    #[test]
    fn test_init_module_registers_formatter_and_command() {
        let mut session = Session::new();
        session.init_module(ClearConfig::default());

        assert!(session.formatters().is_registered(STRING_TYPE_NAME));
        assert_eq!(session.commands().len(), 1);
        assert_eq!(session.commands()[0].0, CLEAR_COMMAND_NAME);
    }

    #[test]
    fn test_print_string_through_registered_formatter() {
        let mut session = Session::new();
        session.init_module(ClearConfig::default());
        session.set_memory(Box::new(string_memory(0x5000, "Hello, Android")));

        assert_eq!(
            session.print_value(STRING_TYPE_NAME, 0x5000).unwrap(),
            "(System.String) 0x5000 \"Hello, Android\""
        );
        assert_eq!(
            session.print_value(STRING_TYPE_NAME, 0).unwrap(),
            "(System.String) 0x0 \"\""
        );
    }

    #[test]
    fn test_print_read_failure_is_rendered_not_raised() {
        let mut data = 0x1234_u64.to_le_bytes().to_vec();
        data.extend_from_slice(&100u32.to_le_bytes());
        let mut session = Session::new();
        session.init_module(ClearConfig::default());
        session.set_memory(Box::new(VecMemory::new(0x5000, data)));

        let output = session.print_value(STRING_TYPE_NAME, 0x5000).unwrap();
        assert!(output.contains("<error reading string: "), "{}", output);
    }

    #[test]
    fn test_print_without_formatter_dumps_fields() {
        let mut session = Session::new();
        session.register_layout(ObjectLayout::new(
            "Pair",
            vec![FieldLayout::new("left", 0, 4), FieldLayout::new("right", 4, 4)],
        ));
        let mut data = 7u32.to_le_bytes().to_vec();
        data.extend_from_slice(&9u32.to_le_bytes());
        session.set_memory(Box::new(VecMemory::new(0x100, data)));

        assert_eq!(
            session.print_value("Pair", 0x100).unwrap(),
            "(Pair) 0x100 { left = 0x7, right = 0x9 }"
        );
    }

    #[test]
    fn test_print_requires_memory_and_layout() {
        let mut session = Session::new();
        session.init_module(ClearConfig::default());

        let err = session.print_value(STRING_TYPE_NAME, 0x10).unwrap_err();
        assert_eq!(err.to_string(), ERR_NOT_ATTACHED);

        session.set_memory(Box::new(VecMemory::default()));
        let err = session.print_value("System.Object", 0x10).unwrap_err();
        assert!(err.to_string().starts_with(ERR_NO_LAYOUT));
    }

    #[test]
    fn test_run_registered_and_unknown_commands() {
        let mut session = Session::new();
        session.register_command("echo", Box::new(EchoCommand));

        let args = vec!["a".to_string(), "b".to_string()];
        assert_eq!(session.run_command("echo", &args).unwrap(), "a b");
        assert!(session.run_command("missing", &[]).is_err());
    }
}
