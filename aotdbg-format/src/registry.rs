//! 型名によるフォーマッター登録

use crate::memory::MemoryReader;
use crate::value::ValueHandle;
use std::collections::HashMap;
use tracing::debug;

/// 値のサマリー（表示文字列）を生成する
///
/// 失敗してもエラーを返さず、表示用の文字列で状態を伝えます。
pub trait SummaryProvider {
    fn summarize(&self, value: &dyn ValueHandle, memory: &dyn MemoryReader) -> String;
}

impl<F> SummaryProvider for F
where
    F: Fn(&dyn ValueHandle, &dyn MemoryReader) -> String,
{
    fn summarize(&self, value: &dyn ValueHandle, memory: &dyn MemoryReader) -> String {
        self(value, memory)
    }
}

/// 型名とサマリープロバイダーの対応表
#[derive(Default)]
pub struct FormatterRegistry {
    providers: HashMap<String, Box<dyn SummaryProvider>>,
}

impl FormatterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 型名にプロバイダーを登録する（既存の登録は置き換える）
    pub fn register(&mut self, type_name: impl Into<String>, provider: Box<dyn SummaryProvider>) {
        let type_name = type_name.into();
        debug!("registering summary provider for '{}'", type_name);
        self.providers.insert(type_name, provider);
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.providers.contains_key(type_name)
    }

    /// 登録済みの型名（ソート済み）
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// 値の型名に対応するプロバイダーでサマリーを生成する
    ///
    /// 登録がない場合は `None` を返します。
    pub fn summarize(&self, value: &dyn ValueHandle, memory: &dyn MemoryReader) -> Option<String> {
        self.providers
            .get(value.type_name())
            .map(|provider| provider.summarize(value, memory))
    }
}
