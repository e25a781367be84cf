//! デバッガクライアント出力の読み捨て
//!
//! 一定時間だけ子プロセスの出力をノンブロッキングに読み取り、ラベル付きで表示します。
//! Unixではreadinessポーリング、それ以外ではバックグラウンドの読み取りスレッドとキューを使います。
//! 解除処理（[`crate::jdb`]）からは呼び出されません。

use std::io::{BufRead, BufReader, Read};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// 既定の読み取り時間
pub const DRAIN_WINDOW: Duration = Duration::from_secs(1);

/// 各行の先頭に付けるラベル
pub const DRAIN_LABEL: &str = "[jdb] ";

/// 行を組み立てるバッファ
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
    lines: Vec<String>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8], label: &str) {
        self.pending.extend_from_slice(chunk);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.emit(&line[..line.len() - 1], label);
        }
    }

    fn finish(mut self, label: &str) -> Vec<String> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.emit(&rest, label);
        }
        self.lines
    }

    fn emit(&mut self, raw: &[u8], label: &str) {
        let line = String::from_utf8_lossy(raw)
            .trim_end_matches('\r')
            .to_string();
        println!("{}{}", label, line);
        self.lines.push(line);
    }
}

/// プラットフォームに応じた方法で出力を読み取る
#[cfg(unix)]
pub fn drain_output<R>(reader: R, window: Duration, label: &str) -> crate::Result<Vec<String>>
where
    R: Read + std::os::fd::AsFd + Send + 'static,
{
    drain_with_poll(reader, window, label)
}

/// プラットフォームに応じた方法で出力を読み取る
#[cfg(not(unix))]
pub fn drain_output<R>(reader: R, window: Duration, label: &str) -> crate::Result<Vec<String>>
where
    R: Read + Send + 'static,
{
    Ok(drain_with_thread(reader, window, label))
}

/// readinessポーリングで出力を読み取る
///
/// `window` が経過するか、EOFに達するまで読み取ります。
#[cfg(unix)]
pub fn drain_with_poll<R>(mut reader: R, window: Duration, label: &str) -> crate::Result<Vec<String>>
where
    R: Read + std::os::fd::AsFd,
{
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

    let deadline = Instant::now() + window;
    let mut buffer = LineBuffer::default();
    let mut chunk = [0u8; 4096];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        let timeout_ms = remaining.as_millis().min(u16::MAX as u128) as u16;
        let state = {
            let mut fds = [PollFd::new(reader.as_fd(), PollFlags::POLLIN)];
            let n = poll(&mut fds, PollTimeout::from(timeout_ms))
                .map_err(|e| anyhow::anyhow!("poll failed: {}", e))?;
            if n > 0 {
                classify_revents(fds[0].revents())
            } else {
                PollState::Idle
            }
        };
        match state {
            PollState::Readable => {}
            PollState::Idle => continue,
            PollState::Broken => {
                debug!("drain stopped: descriptor reported an error");
                break;
            }
        }

        let n = reader.read(&mut chunk)?;
        if n == 0 {
            debug!("drain reached EOF");
            break;
        }
        buffer.push(&chunk[..n], label);
    }

    Ok(buffer.finish(label))
}

/// pollの結果
#[cfg(unix)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollState {
    /// 読み取り可能（EOFを含む）
    Readable,
    /// まだデータがない
    Idle,
    /// POLLERR/POLLNVALのみ（以降のpollは即座に返る）
    Broken,
}

#[cfg(unix)]
fn classify_revents(revents: Option<nix::poll::PollFlags>) -> PollState {
    use nix::poll::PollFlags;

    match revents {
        Some(r) if r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP) => PollState::Readable,
        Some(r) if r.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) => PollState::Broken,
        _ => PollState::Idle,
    }
}

/// バックグラウンドスレッドとキューで出力を読み取る
///
/// 読み取りスレッドはデタッチされ、`window` 経過後に残った出力は読み捨てます。
pub fn drain_with_thread<R>(reader: R, window: Duration, label: &str) -> Vec<String>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        loop {
            let mut line = Vec::new();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let deadline = Instant::now() + window;
    let mut buffer = LineBuffer::default();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match rx.recv_timeout(remaining) {
            Ok(line) => buffer.push(&line, label),
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("drain reader finished");
                break;
            }
        }
    }

    buffer.finish(label)
}
