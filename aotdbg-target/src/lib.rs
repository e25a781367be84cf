//! aotdbg ターゲットプロセスアクセス
//!
//! このクレートは、検査対象のプロセスにアタッチしてメモリを読み取るための低レベル機能を提供します。
//! ptraceによるアタッチ/デタッチ、/proc/pid/mem と PTRACE_PEEKDATA によるメモリ読み取りを行います。

pub mod process;
pub mod memory;

pub use process::{Process, StopReason};
pub use memory::{Memory, MemoryMapping, MemoryReadable};

/// ターゲット制御の結果型
pub type Result<T> = anyhow::Result<T>;
