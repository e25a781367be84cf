//! セッションコマンド

/// セッションコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 指定アドレスの値を型名で表示
    Print { type_name: String, address: u64 },
    /// フォーマッターが登録された型の一覧
    Types,
    /// 登録済みコマンドの一覧
    Commands,
    /// 登録済みコマンドの実行
    Custom { name: String, args: Vec<String> },
    /// ヘルプ表示
    Help,
    /// 終了
    Quit,
}

impl Command {
    /// コマンド文字列をパースする
    pub fn parse(input: &str) -> Option<Self> {
        let parts: Vec<&str> = input.split_whitespace().collect();
        if parts.is_empty() {
            return None;
        }

        match parts[0] {
            "print" | "p" => {
                if parts.len() == 3 {
                    let address = parse_address(parts[2])?;
                    Some(Command::Print {
                        type_name: parts[1].to_string(),
                        address,
                    })
                } else {
                    None
                }
            }
            "types" => Some(Command::Types),
            "commands" => Some(Command::Commands),
            "help" | "h" | "?" => Some(Command::Help),
            "quit" | "q" | "exit" => Some(Command::Quit),
            name => Some(Command::Custom {
                name: name.to_string(),
                args: parts[1..].iter().map(|s| s.to_string()).collect(),
            }),
        }
    }
}

/// 16進数（0x付き）または10進数のアドレスをパースする
pub fn parse_address(s: &str) -> Option<u64> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("types"), Some(Command::Types));
        assert_eq!(Command::parse("q"), Some(Command::Quit));
        assert_eq!(Command::parse("?"), Some(Command::Help));
        assert_eq!(Command::parse("   "), None);
    }

    #[test]
    fn test_parse_print() {
        assert_eq!(
            Command::parse("p System.String 0x7f00dead0010"),
            Some(Command::Print {
                type_name: "System.String".to_string(),
                address: 0x7f00_dead_0010,
            })
        );
        assert_eq!(
            Command::parse("print System.String 4096"),
            Some(Command::Print {
                type_name: "System.String".to_string(),
                address: 4096,
            })
        );
        assert_eq!(Command::parse("print System.String zz"), None);
        assert_eq!(Command::parse("print 0x10"), None);
    }

    #[test]
    fn test_unknown_words_become_custom_commands() {
        assert_eq!(
            Command::parse("clearjdb now"),
            Some(Command::Custom {
                name: "clearjdb".to_string(),
                args: vec!["now".to_string()],
            })
        );
    }
}
