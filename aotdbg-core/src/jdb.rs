//! 古いデバッガアタッチの解除
//!
//! コマンドラインのJavaデバッガ（jdb）を固定のJDWPエンドポイントに接続させ、
//! 少し待ってから強制終了することで、アプリ側に残ったデバッガ待ちの状態を解除します。
//! 終了は常に強制（kill）で、jdbへの quit 送信は行いません。

use std::io;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 既定の接続先ホスト
pub const DEFAULT_HOST: &str = "localhost";

/// 既定の接続先ポート（adb forward tcp:8700 jdwp:<pid>）
pub const DEFAULT_PORT: u16 = 8700;

/// 既定のデバッガクライアント
pub const DEFAULT_PROGRAM: &str = "jdb";

/// 終了待ちのポーリング間隔
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// 解除処理の設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearConfig {
    pub program: String,
    pub host: String,
    pub port: u16,
    /// 接続ハンドシェイクのために待つ時間
    pub settle_delay: Duration,
    /// kill後に終了を待つ時間
    pub reap_timeout: Duration,
}

impl Default for ClearConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            settle_delay: Duration::from_secs(1),
            reap_timeout: Duration::from_secs(2),
        }
    }
}

impl ClearConfig {
    /// デバッガクライアントに渡す引数
    pub fn client_args(&self) -> Vec<String> {
        vec![
            "-connect".to_string(),
            format!(
                "com.sun.jdi.SocketAttach:hostname={},port={}",
                self.host, self.port
            ),
        ]
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 起動したデバッガクライアント
pub trait ClientProcess {
    fn kill(&mut self) -> io::Result<()>;
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>>;
}

impl ClientProcess for Child {
    fn kill(&mut self) -> io::Result<()> {
        Child::kill(self)
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        Child::try_wait(self)
    }
}

/// デバッガクライアントを起動する
pub trait ClientSpawner {
    fn spawn(&self, program: &str, args: &[String]) -> io::Result<Box<dyn ClientProcess>>;
}

/// `std::process::Command` で実プロセスを起動する
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSpawner;

impl ClientSpawner for SystemSpawner {
    fn spawn(&self, program: &str, args: &[String]) -> io::Result<Box<dyn ClientProcess>> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        Ok(Box::new(child))
    }
}

/// 解除処理の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearOutcome {
    Cleared,
    TimedOut,
    Failed(String),
}

/// 解除処理の報告
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearReport {
    pub program: String,
    pub endpoint: String,
    pub outcome: ClearOutcome,
    /// killを試みた回数
    pub kill_attempts: usize,
}

impl ClearReport {
    /// ユーザー向けのメッセージ
    pub fn message(&self) -> String {
        match &self.outcome {
            ClearOutcome::Cleared => {
                format!("Cleared stale debugger attachment on {}", self.endpoint)
            }
            ClearOutcome::TimedOut => {
                format!("Timed out waiting for {} to exit; killed it again", self.program)
            }
            ClearOutcome::Failed(reason) => {
                format!("Error clearing debugger attachment: {}", reason)
            }
        }
    }
}

/// 途中の失敗
enum Interrupt {
    TimedOut,
    Failed(String),
}

/// 古いデバッガアタッチを解除する
///
/// クライアントを起動し、`settle_delay` 待ってから無条件にkillします。
/// 終了待ちがタイムアウトした場合はもう一度killします。
/// どの失敗もエラーとして返さず、[`ClearReport`] に記録します。
pub fn clear_stale_attachment(config: &ClearConfig, spawner: &dyn ClientSpawner) -> ClearReport {
    let mut report = ClearReport {
        program: config.program.clone(),
        endpoint: config.endpoint(),
        outcome: ClearOutcome::Cleared,
        kill_attempts: 0,
    };

    info!("starting {} against {}", config.program, report.endpoint);
    let mut client = match spawner.spawn(&config.program, &config.client_args()) {
        Ok(client) => client,
        Err(e) => {
            warn!("failed to start {}: {}", config.program, e);
            report.outcome = ClearOutcome::Failed(format!("failed to start {}: {}", config.program, e));
            return report;
        }
    };

    match settle_and_kill(config, client.as_mut(), &mut report.kill_attempts) {
        Ok(()) => {
            debug!("{} terminated", config.program);
        }
        Err(Interrupt::TimedOut) => {
            warn!("{} did not exit within {:?}", config.program, config.reap_timeout);
            kill_tolerant(client.as_mut(), &mut report.kill_attempts).ok();
            // 2回目のkill後に一度だけ回収を試みる
            if let Ok(Some(status)) = client.try_wait() {
                debug!("client exited with {} after second kill", status);
            }
            report.outcome = ClearOutcome::TimedOut;
        }
        Err(Interrupt::Failed(reason)) => {
            warn!("error while clearing attachment: {}", reason);
            if report.kill_attempts == 0 {
                kill_tolerant(client.as_mut(), &mut report.kill_attempts).ok();
            }
            report.outcome = ClearOutcome::Failed(reason);
        }
    }

    report
}

fn settle_and_kill(
    config: &ClearConfig,
    client: &mut dyn ClientProcess,
    kill_attempts: &mut usize,
) -> Result<(), Interrupt> {
    thread::sleep(config.settle_delay);

    kill_tolerant(client, kill_attempts)
        .map_err(|e| Interrupt::Failed(format!("failed to kill {}: {}", config.program, e)))?;

    wait_with_timeout(client, config.reap_timeout)
}

/// killする（既に終了している場合のエラーは無視）
fn kill_tolerant(client: &mut dyn ClientProcess, kill_attempts: &mut usize) -> io::Result<()> {
    *kill_attempts += 1;
    match client.kill() {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
        Err(e) => Err(e),
    }
}

/// 終了をポーリングで待つ
fn wait_with_timeout(client: &mut dyn ClientProcess, timeout: Duration) -> Result<(), Interrupt> {
    let deadline = Instant::now() + timeout;
    loop {
        match client.try_wait() {
            Ok(Some(status)) => {
                debug!("client exited with {}", status);
                return Ok(());
            }
            Ok(None) => {}
            Err(e) => return Err(Interrupt::Failed(format!("failed to wait for client: {}", e))),
        }

        if Instant::now() >= deadline {
            return Err(Interrupt::TimedOut);
        }
        thread::sleep(REAP_POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::os::unix::process::ExitStatusExt;
    use std::rc::Rc;

    #[derive(Default)]
    struct Calls {
        spawned: Vec<(String, Vec<String>)>,
        kills: usize,
        events: Vec<&'static str>,
    }

    #[derive(Clone, Copy)]
    enum Behavior {
        ExitsAfterKill,
        NeverExits,
        WaitFails,
        KillFails,
        AlreadyExited,
    }

    struct MockClient {
        calls: Rc<RefCell<Calls>>,
        behavior: Behavior,
        killed: bool,
    }

    impl ClientProcess for MockClient {
        fn kill(&mut self) -> io::Result<()> {
            {
                let mut calls = self.calls.borrow_mut();
                calls.kills += 1;
                calls.events.push("kill");
            }
            self.killed = true;
            match self.behavior {
                Behavior::KillFails => Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied")),
                Behavior::AlreadyExited => Err(io::Error::new(io::ErrorKind::InvalidInput, "already exited")),
                _ => Ok(()),
            }
        }

        fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
            self.calls.borrow_mut().events.push("wait");
            match self.behavior {
                Behavior::NeverExits => Ok(None),
                Behavior::WaitFails => Err(io::Error::new(io::ErrorKind::Other, "wait failed")),
                _ if self.killed => Ok(Some(ExitStatus::from_raw(9))),
                _ => Ok(None),
            }
        }
    }

    struct MockSpawner {
        calls: Rc<RefCell<Calls>>,
        behavior: Option<Behavior>,
    }

    impl MockSpawner {
        fn new(behavior: Option<Behavior>) -> Self {
            Self {
                calls: Rc::new(RefCell::new(Calls::default())),
                behavior,
            }
        }
    }

    impl ClientSpawner for MockSpawner {
        fn spawn(&self, program: &str, args: &[String]) -> io::Result<Box<dyn ClientProcess>> {
            self.calls
                .borrow_mut()
                .spawned
                .push((program.to_string(), args.to_vec()));
            match self.behavior {
                Some(behavior) => Ok(Box::new(MockClient {
                    calls: Rc::clone(&self.calls),
                    behavior,
                    killed: false,
                })),
                None => Err(io::Error::new(io::ErrorKind::NotFound, "No such file or directory")),
            }
        }
    }

    fn fast_config() -> ClearConfig {
        ClearConfig {
            settle_delay: Duration::from_millis(1),
            reap_timeout: Duration::from_millis(50),
            ..ClearConfig::default()
        }
    }

    #[test]
    fn test_default_target_is_local_jdwp_port() {
        let config = ClearConfig::default();
        assert_eq!(config.program, "jdb");
        assert_eq!(config.endpoint(), "localhost:8700");
        assert_eq!(
            config.client_args(),
            vec![
                "-connect".to_string(),
                "com.sun.jdi.SocketAttach:hostname=localhost,port=8700".to_string(),
            ]
        );
        assert_eq!(config.settle_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_kills_exactly_once_on_success() {
        let spawner = MockSpawner::new(Some(Behavior::ExitsAfterKill));
        let report = clear_stale_attachment(&fast_config(), &spawner);

        assert_eq!(report.outcome, ClearOutcome::Cleared);
        assert_eq!(report.kill_attempts, 1);
        assert_eq!(spawner.calls.borrow().kills, 1);
        assert_eq!(spawner.calls.borrow().spawned[0].0, "jdb");
        assert_eq!(report.message(), "Cleared stale debugger attachment on localhost:8700");
    }

    #[test]
    fn test_kills_again_on_timeout() {
        let spawner = MockSpawner::new(Some(Behavior::NeverExits));
        let report = clear_stale_attachment(&fast_config(), &spawner);

        assert_eq!(report.outcome, ClearOutcome::TimedOut);
        assert_eq!(report.kill_attempts, 2);
        assert_eq!(spawner.calls.borrow().kills, 2);
        assert!(report.message().starts_with("Timed out"));

        // 2回目のkillの後に回収が一度だけ行われる
        let calls = spawner.calls.borrow();
        let last_kill = calls.events.iter().rposition(|e| *e == "kill").unwrap();
        assert_eq!(&calls.events[last_kill..], &["kill", "wait"]);
    }

    #[test]
    fn test_already_exited_client_is_tolerated() {
        let spawner = MockSpawner::new(Some(Behavior::AlreadyExited));
        let report = clear_stale_attachment(&fast_config(), &spawner);

        assert_eq!(report.outcome, ClearOutcome::Cleared);
        assert_eq!(spawner.calls.borrow().kills, 1);
    }

    #[test]
    fn test_kill_failure_is_reported_without_second_kill() {
        let spawner = MockSpawner::new(Some(Behavior::KillFails));
        let report = clear_stale_attachment(&fast_config(), &spawner);

        assert!(matches!(report.outcome, ClearOutcome::Failed(ref reason) if reason.contains("denied")));
        assert_eq!(spawner.calls.borrow().kills, 1);
    }

    #[test]
    fn test_wait_failure_is_reported_after_single_kill() {
        let spawner = MockSpawner::new(Some(Behavior::WaitFails));
        let report = clear_stale_attachment(&fast_config(), &spawner);

        assert!(matches!(report.outcome, ClearOutcome::Failed(_)));
        assert_eq!(report.kill_attempts, 1);
        assert!(report.message().starts_with("Error clearing debugger attachment:"));
    }

    #[test]
    fn test_unreachable_client_reports_error() {
        let spawner = MockSpawner::new(None);
        let report = clear_stale_attachment(&fast_config(), &spawner);

        assert!(matches!(report.outcome, ClearOutcome::Failed(ref reason) if reason.contains("failed to start jdb")));
        assert_eq!(report.kill_attempts, 0);
    }
}
