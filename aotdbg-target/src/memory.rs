//! メモリアクセス機能

use crate::Result;
use nix::unistd::Pid;
use std::fs::File;
use std::io::{BufRead, BufReader, Read as _, Seek, SeekFrom};
use tracing::debug;

/// メモリから読み取り可能な型
pub trait MemoryReadable: Sized {
    /// バイト配列から値を構築
    fn from_le_bytes(bytes: &[u8]) -> Result<Self>;

    /// 型のサイズ（バイト数）
    fn size() -> usize;
}

macro_rules! impl_memory_readable {
    ($($ty:ty),*) => {
        $(
            impl MemoryReadable for $ty {
                fn from_le_bytes(bytes: &[u8]) -> Result<Self> {
                    let array: [u8; std::mem::size_of::<$ty>()] = bytes.try_into()
                        .map_err(|_| anyhow::anyhow!(
                            "Failed to convert {} bytes to {} array (expected {} bytes)",
                            bytes.len(),
                            stringify!($ty),
                            std::mem::size_of::<$ty>()
                        ))?;
                    Ok(<$ty>::from_le_bytes(array))
                }

                fn size() -> usize { std::mem::size_of::<$ty>() }
            }
        )*
    };
}

impl_memory_readable!(u8, u16, u32, u64);

/// メモリマッピング情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMapping {
    pub start: usize,
    pub end: usize,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
}

impl MemoryMapping {
    /// /proc/pid/maps の1行を解析する
    ///
    /// フォーマット: "address perms offset dev inode pathname"
    /// 例: "7f1234567000-7f1234568000 r-xp 00000000 08:01 123456 /lib/libc.so"
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            return Ok(None);
        }

        let Some((start, end)) = parts[0].split_once('-') else {
            return Ok(None);
        };

        let start = usize::from_str_radix(start, 16)
            .map_err(|e| anyhow::anyhow!("Failed to parse start address: {}", e))?;
        let end = usize::from_str_radix(end, 16)
            .map_err(|e| anyhow::anyhow!("Failed to parse end address: {}", e))?;

        let perms = parts[1];
        Ok(Some(Self {
            start,
            end,
            readable: perms.chars().next() == Some('r'),
            writable: perms.chars().nth(1) == Some('w'),
            executable: perms.chars().nth(2) == Some('x'),
        }))
    }

    /// 範囲 [addr, addr+size) がこのマッピングに収まるか
    pub fn contains_range(&self, addr: usize, size: usize) -> bool {
        match addr.checked_add(size) {
            Some(end) => addr >= self.start && end <= self.end,
            None => false,
        }
    }
}

/// メモリアクセス
pub struct Memory {
    pid: Pid,
}

impl Memory {
    /// メモリアクセスを作成する
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    /// /proc/pid/mem のパスを取得する
    fn mem_path(&self) -> String {
        format!("/proc/{}/mem", self.pid)
    }

    /// メモリからデータを読み取る
    ///
    /// /proc/pid/memを使用してターゲットプロセスのメモリを読み取ります。
    /// /proc/pid/memが使用できない場合（EIOエラー）、PTRACE_PEEKDATAにフォールバックします。
    /// 読み取り範囲が読み取り可能なマッピングに収まらない場合は、バッファを確保する前にエラーを返します。
    pub fn read(&self, addr: usize, size: usize) -> Result<Vec<u8>> {
        if !self.is_readable(addr, size)? {
            return Err(anyhow::anyhow!(
                "{} bytes at 0x{:x} are outside readable memory of process {}",
                size,
                addr,
                self.pid
            ));
        }

        match self.read_via_proc_mem(addr, size) {
            Ok(data) => Ok(data),
            Err(e) => {
                // EIO (errno 5): ptraceにフォールバック
                if let Some(io_err) = e.downcast_ref::<std::io::Error>() {
                    if io_err.raw_os_error() == Some(nix::libc::EIO) {
                        debug!("/proc mem read failed at 0x{:x}, falling back to ptrace", addr);
                        return self.read_via_ptrace(addr, size);
                    }
                }
                Err(e)
            }
        }
    }

    /// /proc/pid/mem経由でメモリを読み取る（内部実装）
    fn read_via_proc_mem(&self, addr: usize, size: usize) -> Result<Vec<u8>> {
        let mem_path = self.mem_path();
        let mut file = File::open(&mem_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", mem_path, e))?;

        file.seek(SeekFrom::Start(addr as u64))?;

        let mut buffer = alloc_buffer(size)?;
        buffer.resize(size, 0);
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// 型付き値を読み取る（ジェネリック版）
    ///
    /// # Examples
    /// ```ignore
    /// let value: u64 = memory.read_typed(addr)?;
    /// let value: u32 = memory.read_typed(addr)?;
    /// ```
    pub fn read_typed<T: MemoryReadable>(&self, addr: usize) -> Result<T> {
        let bytes = self.read(addr, T::size())?;
        T::from_le_bytes(&bytes)
    }

    /// /proc/pid/maps を解析してメモリマッピング情報を取得する
    pub fn get_mappings(&self) -> Result<Vec<MemoryMapping>> {
        let maps_path = format!("/proc/{}/maps", self.pid);
        let file = File::open(&maps_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", maps_path, e))?;
        let reader = BufReader::new(file);

        let mut mappings = Vec::new();
        for line in reader.lines() {
            if let Some(mapping) = MemoryMapping::parse(&line?)? {
                mappings.push(mapping);
            }
        }

        Ok(mappings)
    }

    /// 指定された範囲が読み取り可能なマッピング内にあるかチェックする
    pub fn is_readable(&self, addr: usize, size: usize) -> Result<bool> {
        let mappings = self.get_mappings()?;
        Ok(mappings
            .iter()
            .any(|m| m.readable && m.contains_range(addr, size)))
    }

    /// PTRACE_PEEKDATAを使用してメモリからデータを読み取る
    ///
    /// /proc/pid/memが使用できない場合のフォールバック。
    pub fn read_via_ptrace(&self, addr: usize, size: usize) -> Result<Vec<u8>> {
        use nix::sys::ptrace;

        let mut data = alloc_buffer(size)?;
        let word_size = std::mem::size_of::<usize>();

        for offset in (0..size).step_by(word_size) {
            let word_addr = (addr + offset) as *mut std::ffi::c_void;
            let word = ptrace::read(self.pid, word_addr)
                .map_err(|e| anyhow::anyhow!("Failed to read via ptrace at 0x{:x}: {}", addr + offset, e))?;

            let bytes = word.to_ne_bytes();
            let remaining = size - offset;
            let copy_size = remaining.min(word_size);

            data.extend_from_slice(&bytes[..copy_size]);
        }

        data.truncate(size);
        Ok(data)
    }
}

/// 読み取り用のバッファを確保する（確保に失敗してもabortしない）
fn alloc_buffer(size: usize) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(size)
        .map_err(|e| anyhow::anyhow!("Failed to allocate {} bytes for memory read: {}", size, e))?;
    Ok(buffer)
}

/// aotdbg_formatのMemoryReaderトレイトを実装
impl aotdbg_format::MemoryReader for Memory {
    fn read(&self, addr: usize, size: usize) -> Result<Vec<u8>> {
        self.read(addr, size)
    }

    fn read_u8(&self, addr: usize) -> Result<u8> {
        self.read_typed(addr)
    }

    fn read_u16(&self, addr: usize) -> Result<u16> {
        self.read_typed(addr)
    }

    fn read_u32(&self, addr: usize) -> Result<u32> {
        self.read_typed(addr)
    }

    fn read_u64(&self, addr: usize) -> Result<u64> {
        self.read_typed(addr)
    }
}
