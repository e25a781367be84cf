//! プロセスのアタッチ制御

use crate::Result;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use tracing::debug;

/// アタッチ直後の停止状態
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// シグナルによる停止
    Signal(Signal),
    /// プロセス終了
    Exited(i32),
    /// シグナルによるプロセス終了
    Killed(Signal),
    /// その他の停止
    Other,
}

/// メモリを検査するためにアタッチしたプロセス
///
/// ドロップ時にデタッチしてプロセスの実行を再開させます。
pub struct Process {
    pid: Pid,
    attached: bool,
}

impl Process {
    /// 既存のプロセスにアタッチする
    ///
    /// PTRACE_ATTACHを送信し、プロセスが停止するまで待機します。
    pub fn attach(pid: i32) -> Result<Self> {
        let pid = Pid::from_raw(pid);
        nix::sys::ptrace::attach(pid)
            .map_err(|e| anyhow::anyhow!("Failed to attach to process {}: {}", pid, e))?;

        let mut process = Self { pid, attached: true };
        let reason = process.wait_for_stop()?;
        debug!("attached to process {}: {:?}", pid, reason);

        match reason {
            StopReason::Exited(code) => {
                return Err(anyhow::anyhow!("Process {} exited with code {} during attach", pid, code));
            }
            StopReason::Killed(signal) => {
                return Err(anyhow::anyhow!("Process {} was killed by {:?} during attach", pid, signal));
            }
            _ => {}
        }

        Ok(process)
    }

    /// プロセスIDを取得する
    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// 停止イベントを待機する
    fn wait_for_stop(&mut self) -> Result<StopReason> {
        let status = waitpid(self.pid, None)?;
        if matches!(status, WaitStatus::Exited(..) | WaitStatus::Signaled(..)) {
            // 終了したプロセスにはデタッチできない
            self.attached = false;
        }
        Ok(StopReason::from(status))
    }

    /// プロセスからデタッチする
    pub fn detach(&mut self) -> Result<()> {
        if !self.attached {
            return Ok(());
        }

        nix::sys::ptrace::detach(self.pid, None)
            .map_err(|e| anyhow::anyhow!("Failed to detach from process {}: {}", self.pid, e))?;
        self.attached = false;
        debug!("detached from process {}", self.pid);
        Ok(())
    }
}

impl From<WaitStatus> for StopReason {
    fn from(status: WaitStatus) -> Self {
        match status {
            WaitStatus::Stopped(_, signal) => StopReason::Signal(signal),
            WaitStatus::Exited(_, code) => StopReason::Exited(code),
            WaitStatus::Signaled(_, signal, _) => StopReason::Killed(signal),
            _ => StopReason::Other,
        }
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if self.attached {
            let _ = nix::sys::ptrace::detach(self.pid, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_reason_from_wait_status() {
        let pid = Pid::from_raw(1234);

        assert_eq!(
            StopReason::from(WaitStatus::Stopped(pid, Signal::SIGSTOP)),
            StopReason::Signal(Signal::SIGSTOP)
        );
        assert_eq!(StopReason::from(WaitStatus::Exited(pid, 3)), StopReason::Exited(3));
        assert_eq!(
            StopReason::from(WaitStatus::Signaled(pid, Signal::SIGKILL, false)),
            StopReason::Killed(Signal::SIGKILL)
        );
        assert_eq!(StopReason::from(WaitStatus::StillAlive), StopReason::Other);
    }

    #[test]
    fn test_attach_to_missing_process_fails() {
        assert!(Process::attach(i32::MAX).is_err());
    }
}
