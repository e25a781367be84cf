//! 値ハンドルとオブジェクトレイアウト
//!
//! ホストデバッガが検査中の値を指す不透明なハンドルを抽象化します。
//! フォーマッターはハンドルを所有せず、1回の表示の間だけ子フィールドとメモリを読み取ります。

use crate::memory::MemoryReader;
use crate::Result;

/// ロードアドレスが解決できなかったことを示す値
pub const INVALID_ADDRESS: u64 = u64::MAX;

/// 検査中の値へのハンドル
pub trait ValueHandle {
    /// 値の型名
    fn type_name(&self) -> &str;

    /// 名前で子フィールドを取得する
    fn child(&self, name: &str) -> Option<Box<dyn ValueHandle + '_>>;

    /// 値を符号なし整数として読み取る
    fn value_as_unsigned(&self) -> Result<u64>;

    /// 値の格納先のロードアドレス
    ///
    /// 解決できない場合は [`INVALID_ADDRESS`] を返します。
    fn load_address(&self) -> u64;
}

/// オブジェクト内のフィールド配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    pub name: String,
    pub offset: u64,
    pub size: usize,
}

impl FieldLayout {
    pub fn new(name: impl Into<String>, offset: u64, size: usize) -> Self {
        Self {
            name: name.into(),
            offset,
            size,
        }
    }
}

/// オブジェクトのメモリレイアウト
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLayout {
    pub type_name: String,
    pub fields: Vec<FieldLayout>,
}

impl ObjectLayout {
    pub fn new(type_name: impl Into<String>, fields: Vec<FieldLayout>) -> Self {
        Self {
            type_name: type_name.into(),
            fields,
        }
    }

    /// NativeAOT の `System.String` レイアウト（64bit）
    ///
    /// ```text
    /// +0   MethodTable*   (8 bytes)
    /// +8   _stringLength  (4 bytes, UTF-16 要素数)
    /// +12  _firstChar     (2 bytes, 以降に文字データが続く)
    /// ```
    pub fn system_string() -> Self {
        Self::new(
            "System.String",
            vec![
                FieldLayout::new("m_pEEType", 0, 8),
                FieldLayout::new("_stringLength", 8, 4),
                FieldLayout::new("_firstChar", 12, 2),
            ],
        )
    }

    /// 名前でフィールドを検索する
    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// レイアウトに基づいてターゲットメモリ上のオブジェクトを指すハンドル
pub struct ObjectValue<'a> {
    memory: &'a dyn MemoryReader,
    layout: &'a ObjectLayout,
    address: u64,
}

impl<'a> ObjectValue<'a> {
    pub fn new(memory: &'a dyn MemoryReader, layout: &'a ObjectLayout, address: u64) -> Self {
        Self {
            memory,
            layout,
            address,
        }
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn layout(&self) -> &ObjectLayout {
        self.layout
    }
}

impl ValueHandle for ObjectValue<'_> {
    fn type_name(&self) -> &str {
        &self.layout.type_name
    }

    fn child(&self, name: &str) -> Option<Box<dyn ValueHandle + '_>> {
        // nullオブジェクトには子フィールドがない
        if self.address == 0 {
            return None;
        }

        let field = self.layout.field(name)?;
        let address = self.address.checked_add(field.offset)?;
        Some(Box::new(FieldValue {
            memory: self.memory,
            name: field.name.clone(),
            address,
            size: field.size,
        }))
    }

    fn value_as_unsigned(&self) -> Result<u64> {
        // 参照型の値はオブジェクトのアドレスそのもの
        Ok(self.address)
    }

    fn load_address(&self) -> u64 {
        if self.address == 0 {
            INVALID_ADDRESS
        } else {
            self.address
        }
    }
}

/// オブジェクト内のプリミティブフィールド
pub struct FieldValue<'a> {
    memory: &'a dyn MemoryReader,
    name: String,
    address: u64,
    size: usize,
}

impl FieldValue<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl ValueHandle for FieldValue<'_> {
    fn type_name(&self) -> &str {
        match self.size {
            1 => "u8",
            2 => "u16",
            4 => "u32",
            8 => "u64",
            _ => "bytes",
        }
    }

    fn child(&self, _name: &str) -> Option<Box<dyn ValueHandle + '_>> {
        None
    }

    fn value_as_unsigned(&self) -> Result<u64> {
        let addr = usize::try_from(self.address)
            .map_err(|_| anyhow::anyhow!("Address 0x{:x} does not fit in usize", self.address))?;
        match self.size {
            1 => Ok(self.memory.read_u8(addr)? as u64),
            2 => Ok(self.memory.read_u16(addr)? as u64),
            4 => Ok(self.memory.read_u32(addr)? as u64),
            8 => self.memory.read_u64(addr),
            size => Err(anyhow::anyhow!(
                "Field '{}' has unsupported size {} for unsigned read",
                self.name,
                size
            )),
        }
    }

    fn load_address(&self) -> u64 {
        self.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::VecMemory;

    fn string_object(base: usize, text: &str) -> VecMemory {
        let units: Vec<u16> = text.encode_utf16().collect();
        let mut data = Vec::new();
        data.extend_from_slice(&0xdead_beef_u64.to_le_bytes());
        data.extend_from_slice(&(units.len() as u32).to_le_bytes());
        for unit in units {
            data.extend_from_slice(&unit.to_le_bytes());
        }
        VecMemory::new(base, data)
    }

    #[test]
    fn test_object_value_reads_fields_through_layout() {
        let memory = string_object(0x4000, "hi");
        let layout = ObjectLayout::system_string();
        let value = ObjectValue::new(&memory, &layout, 0x4000);

        assert_eq!(value.type_name(), "System.String");

        let length = value.child("_stringLength").unwrap();
        assert_eq!(length.value_as_unsigned().unwrap(), 2);

        let first_char = value.child("_firstChar").unwrap();
        assert_eq!(first_char.load_address(), 0x400c);
        assert_eq!(first_char.value_as_unsigned().unwrap(), 'h' as u64);

        assert!(value.child("_missing").is_none());
    }

    #[test]
    fn test_null_object_has_no_children() {
        let memory = VecMemory::default();
        let layout = ObjectLayout::system_string();
        let value = ObjectValue::new(&memory, &layout, 0);

        assert!(value.child("_stringLength").is_none());
        assert_eq!(value.load_address(), INVALID_ADDRESS);
    }
}
