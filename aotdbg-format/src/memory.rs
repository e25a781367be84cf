//! メモリ読み取りの抽象化

use crate::Result;

/// メモリ読み取りトレイト
///
/// デバッグ対象プロセスのメモリインターフェースを抽象化します。
/// 読み取りに失敗した場合はエラーを返します（ホストデバッガのエラーステータスに相当）。
pub trait MemoryReader {
    fn read(&self, addr: usize, size: usize) -> Result<Vec<u8>>;

    fn read_u8(&self, addr: usize) -> Result<u8> {
        Ok(u8::from_le_bytes(read_array(self, addr)?))
    }

    fn read_u16(&self, addr: usize) -> Result<u16> {
        Ok(u16::from_le_bytes(read_array(self, addr)?))
    }

    fn read_u32(&self, addr: usize) -> Result<u32> {
        Ok(u32::from_le_bytes(read_array(self, addr)?))
    }

    fn read_u64(&self, addr: usize) -> Result<u64> {
        Ok(u64::from_le_bytes(read_array(self, addr)?))
    }
}

/// 固定長の配列として読み取る（短い読み取りはエラー）
fn read_array<const N: usize, M: MemoryReader + ?Sized>(memory: &M, addr: usize) -> Result<[u8; N]> {
    let bytes = memory.read(addr, N)?;
    bytes.as_slice().try_into()
        .map_err(|_| anyhow::anyhow!("Short read at 0x{:x}: got {} bytes, expected {}", addr, bytes.len(), N))
}

/// バイト列をベースアドレスに配置したメモリ
///
/// キャプチャしたメモリダンプの表示やテストに使用します。
/// ウィンドウ外への読み取りはエラーになります。
#[derive(Debug, Clone, Default)]
pub struct VecMemory {
    base: usize,
    data: Vec<u8>,
}

impl VecMemory {
    pub fn new(base: usize, data: Vec<u8>) -> Self {
        Self { base, data }
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl MemoryReader for VecMemory {
    fn read(&self, addr: usize, size: usize) -> Result<Vec<u8>> {
        let start = addr
            .checked_sub(self.base)
            .ok_or_else(|| anyhow::anyhow!("memory read failed at 0x{:x}: address below mapped window", addr))?;
        let end = start
            .checked_add(size)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| anyhow::anyhow!("memory read failed at 0x{:x}: {} bytes exceed mapped window", addr, size))?;
        Ok(self.data[start..end].to_vec())
    }
}
