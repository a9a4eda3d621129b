//! OpenSSH `Host` stanza codec.
//!
//! Encoding emits a fixed subset of directives with two-space indentation.
//! Decoding is permissive: it never fails, skips anything it does not
//! understand and falls back to defaults for malformed values.

use super::profiles::{HostDraft, HostProfile, LocalForward, RemoteForward};
use crate::ssh::AuthMethod;

const DEFAULT_PORT: u16 = 22;

/// Render one profile as an OpenSSH `Host` stanza. Every line ends in `\n`.
pub fn encode_host(host: &HostProfile) -> String {
    let mut output = String::new();
    output.push_str(&format!("Host {}\n", host.name));
    output.push_str(&format!("  HostName {}\n", host.hostname));
    output.push_str(&format!("  Port {}\n", host.port));
    output.push_str(&format!("  User {}\n", host.username));

    if let Some(path) = host.private_key_path.as_deref().filter(|p| !p.is_empty()) {
        output.push_str(&format!("  IdentityFile {}\n", path));
    }
    if host.forward_agent == Some(true) {
        output.push_str("  ForwardAgent yes\n");
    }
    if host.compression == Some(true) {
        output.push_str("  Compression yes\n");
    }
    if let Some(strict) = host.strict_host_key_checking {
        output.push_str(&format!(
            "  StrictHostKeyChecking {}\n",
            if strict { "yes" } else { "no" }
        ));
    }
    if let Some(jump) = host.proxy_jump.as_deref().filter(|j| !j.is_empty()) {
        output.push_str(&format!("  ProxyJump {}\n", jump));
    }

    for forward in &host.local_forwards {
        output.push_str(&format!(
            "  LocalForward {} {}:{}\n",
            forward.local_port, forward.remote_host, forward.remote_port
        ));
    }
    for forward in &host.remote_forwards {
        output.push_str(&format!(
            "  RemoteForward {} {}:{}\n",
            forward.remote_port, forward.local_host, forward.local_port
        ));
    }

    output
}

/// Render every profile in order, stanzas separated by a blank line.
pub fn encode_hosts(hosts: &[HostProfile]) -> String {
    hosts
        .iter()
        .map(encode_host)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Parse OpenSSH config text into host drafts.
pub fn decode_hosts(content: &str) -> Vec<HostDraft> {
    let mut drafts = Vec::new();
    let mut current: Option<HostDraft> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Case-sensitive and must be followed by a space
        if let Some(name) = line.strip_prefix("Host ") {
            if let Some(draft) = current.take() {
                drafts.push(draft);
            }
            let mut draft = HostDraft::new(name.trim());
            draft.auth_method = AuthMethod::PrivateKey;
            current = Some(draft);
            continue;
        }

        let Some(ref mut draft) = current else {
            continue;
        };

        let mut words = line.split_whitespace();
        let key = match words.next() {
            Some(key) => key.to_lowercase(),
            None => continue,
        };
        let value = words.collect::<Vec<_>>().join(" ");

        match key.as_str() {
            "hostname" => draft.hostname = value,
            "port" => draft.port = parse_port(&value),
            "user" => draft.username = value,
            "identityfile" => draft.private_key_path = Some(value),
            "forwardagent" => draft.forward_agent = Some(is_yes(&value)),
            "compression" => draft.compression = Some(is_yes(&value)),
            "stricthostkeychecking" => draft.strict_host_key_checking = Some(is_yes(&value)),
            "proxyjump" => draft.proxy_jump = Some(value),
            "localforward" => {
                if let Some((local_port, remote_host, remote_port)) = parse_forward(&value) {
                    draft.local_forwards.push(LocalForward {
                        local_port,
                        remote_host,
                        remote_port,
                    });
                }
            }
            "remoteforward" => {
                if let Some((remote_port, local_host, local_port)) = parse_forward(&value) {
                    draft.remote_forwards.push(RemoteForward {
                        remote_port,
                        local_host,
                        local_port,
                    });
                }
            }
            _ => {}
        }
    }

    if let Some(draft) = current {
        drafts.push(draft);
    }

    drafts
}

fn is_yes(value: &str) -> bool {
    value.to_lowercase() == "yes"
}

/// Leading integer of `value`; 22 when absent, zero, or out of range.
fn parse_port(value: &str) -> u16 {
    let (negative, rest) = match value.as_bytes().first() {
        Some(b'-') => (true, &value[1..]),
        Some(b'+') => (false, &value[1..]),
        _ => (false, value),
    };
    let digits: &str = {
        let end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        &rest[..end]
    };
    if negative || digits.is_empty() {
        return DEFAULT_PORT;
    }

    match digits.parse::<u64>() {
        Ok(port) if (1..=u64::from(u16::MAX)).contains(&port) => port as u16,
        _ => DEFAULT_PORT,
    }
}

/// `<port> <host>:<port>`, host split at the last colon.
fn parse_forward(value: &str) -> Option<(u16, String, u16)> {
    let (bind, target) = value.split_once(' ')?;
    let bind_port = parse_forward_port(bind)?;
    let (host, port) = target.trim().rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    Some((bind_port, host.to_string(), parse_forward_port(port)?))
}

fn parse_forward_port(value: &str) -> Option<u16> {
    value.trim().parse::<u16>().ok().filter(|port| *port != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn profile(name: &str) -> HostProfile {
        let mut draft = HostDraft::new(name);
        draft.hostname = "10.0.0.5".to_string();
        draft.username = "op".to_string();
        HostProfile::from_draft("id-1".to_string(), draft, Utc::now())
    }

    #[test]
    fn test_encode_skips_empty_optional_values() {
        let mut host = profile("box");
        host.private_key_path = Some(String::new());
        host.proxy_jump = Some(String::new());
        assert_eq!(
            encode_host(&host),
            "Host box\n  HostName 10.0.0.5\n  Port 22\n  User op\n"
        );
    }

    #[test]
    fn test_decode_basic_stanza() {
        let drafts =
            decode_hosts("Host box\n  HostName 10.0.0.5\n  Port 2222\n  User op\n  ForwardAgent yes\n");
        assert_eq!(drafts.len(), 1);
        let draft = &drafts[0];
        assert_eq!(draft.name, "box");
        assert_eq!(draft.hostname, "10.0.0.5");
        assert_eq!(draft.port, 2222);
        assert_eq!(draft.username, "op");
        assert_eq!(draft.forward_agent, Some(true));
        assert_eq!(draft.auth_method, AuthMethod::PrivateKey);
        assert_eq!(draft.compression, None);
    }

    #[test]
    fn test_decode_skips_comments_and_orphans() {
        let config = r#"
# global defaults
User nobody
ServerAliveInterval 30

Host web
    # inline comment
    HostName web.example.com
    User deploy
    IdentityFile ~/.ssh/id_ed25519
    ServerAliveInterval 30

Host db
    HostName db.internal
"#;
        let drafts = decode_hosts(config);
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].name, "web");
        assert_eq!(drafts[0].username, "deploy");
        assert_eq!(drafts[0].private_key_path.as_deref(), Some("~/.ssh/id_ed25519"));
        assert_eq!(drafts[1].name, "db");
        assert_eq!(drafts[1].username, "");
        assert_eq!(drafts[1].port, 22);
    }

    #[test]
    fn test_decode_host_keyword_is_case_sensitive() {
        // lower-case `host` is an unknown key inside a stanza, not a new stanza
        let drafts = decode_hosts("Host a\n  host b\n  HostName x\n");
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].name, "a");
        assert_eq!(drafts[0].hostname, "x");

        assert!(decode_hosts("host b\n  HostName x\n").is_empty());
    }

    #[test]
    fn test_decode_keys_are_case_insensitive() {
        let drafts = decode_hosts("Host a\n  HOSTNAME h\n  user u\n  pOrT 2200\n");
        assert_eq!(drafts[0].hostname, "h");
        assert_eq!(drafts[0].username, "u");
        assert_eq!(drafts[0].port, 2200);
    }

    #[test]
    fn test_decode_port_fallbacks() {
        assert_eq!(parse_port("2222"), 2222);
        assert_eq!(parse_port("2222abc"), 2222);
        assert_eq!(parse_port("abc"), 22);
        assert_eq!(parse_port(""), 22);
        assert_eq!(parse_port("0"), 22);
        assert_eq!(parse_port("70000"), 22);
        assert_eq!(parse_port("-5"), 22);
        assert_eq!(parse_port("99999999999999999999999"), 22);
    }

    #[test]
    fn test_decode_flag_values() {
        let drafts = decode_hosts(
            "Host a\n  Compression YES\n  ForwardAgent true\n  StrictHostKeyChecking accept-new\n",
        );
        assert_eq!(drafts[0].compression, Some(true));
        assert_eq!(drafts[0].forward_agent, Some(false));
        assert_eq!(drafts[0].strict_host_key_checking, Some(false));
    }

    #[test]
    fn test_decode_collapses_value_whitespace() {
        let drafts = decode_hosts("Host a\n  ProxyJump   jump1,\t jump2\n");
        assert_eq!(drafts[0].proxy_jump.as_deref(), Some("jump1, jump2"));
    }

    #[test]
    fn test_decode_forwards() {
        let drafts = decode_hosts(
            "Host a\n  LocalForward 8080 localhost:80\n  LocalForward 5432 [::1]:5432\n  LocalForward bogus\n  RemoteForward 9000 127.0.0.1:3000\n  RemoteForward 9001 nohost\n",
        );
        let draft = &drafts[0];
        assert_eq!(
            draft.local_forwards,
            vec![
                LocalForward {
                    local_port: 8080,
                    remote_host: "localhost".to_string(),
                    remote_port: 80,
                },
                LocalForward {
                    local_port: 5432,
                    remote_host: "[::1]".to_string(),
                    remote_port: 5432,
                },
            ]
        );
        assert_eq!(
            draft.remote_forwards,
            vec![RemoteForward {
                remote_port: 9000,
                local_host: "127.0.0.1".to_string(),
                local_port: 3000,
            }]
        );
    }

    #[test]
    fn test_decode_empty_input() {
        assert!(decode_hosts("").is_empty());
        assert!(decode_hosts("\n\n# nothing here\n").is_empty());
    }

    #[test]
    fn test_encode_minimal_host() {
        let host = profile("box");
        assert_eq!(
            encode_host(&host),
            "Host box\n  HostName 10.0.0.5\n  Port 22\n  User op\n"
        );
    }

    #[test]
    fn test_encode_optional_lines_in_order() {
        let mut host = profile("box");
        host.private_key_path = Some("~/.ssh/id_rsa".to_string());
        host.forward_agent = Some(true);
        host.compression = Some(false);
        host.strict_host_key_checking = Some(false);
        host.proxy_jump = Some("bastion".to_string());
        host.keep_alive = Some(true);
        host.local_forwards.push(LocalForward {
            local_port: 8080,
            remote_host: "localhost".to_string(),
            remote_port: 80,
        });
        host.remote_forwards.push(RemoteForward {
            remote_port: 9000,
            local_host: "127.0.0.1".to_string(),
            local_port: 3000,
        });

        assert_eq!(
            encode_host(&host),
            "Host box\n  HostName 10.0.0.5\n  Port 22\n  User op\n  IdentityFile ~/.ssh/id_rsa\n  ForwardAgent yes\n  StrictHostKeyChecking no\n  ProxyJump bastion\n  LocalForward 8080 localhost:80\n  RemoteForward 9000 127.0.0.1:3000\n"
        );
    }

    #[test]
    fn test_encode_hosts_separates_stanzas() {
        let a = profile("a");
        let b = profile("b");
        let text = encode_hosts(&[a, b]);
        assert!(text.contains("User op\n\n\nHost b\n"));
        assert_eq!(encode_hosts(&[]), "");
    }

    #[test]
    fn test_round_trip_preserves_connection_fields() {
        let mut host = profile("box");
        host.port = 2222;
        host.private_key_path = Some("~/.ssh/id_ed25519".to_string());
        host.forward_agent = Some(true);
        host.compression = Some(true);
        host.proxy_jump = Some("user@jump:2200".to_string());
        host.local_forwards.push(LocalForward {
            local_port: 8080,
            remote_host: "localhost".to_string(),
            remote_port: 80,
        });
        host.remote_forwards.push(RemoteForward {
            remote_port: 9000,
            local_host: "127.0.0.1".to_string(),
            local_port: 3000,
        });

        let drafts = decode_hosts(&encode_host(&host));
        assert_eq!(drafts.len(), 1);
        let draft = &drafts[0];
        assert_eq!(draft.name, host.name);
        assert_eq!(draft.hostname, host.hostname);
        assert_eq!(draft.port, host.port);
        assert_eq!(draft.username, host.username);
        assert_eq!(draft.private_key_path, host.private_key_path);
        assert_eq!(draft.forward_agent, Some(true));
        assert_eq!(draft.compression, Some(true));
        assert_eq!(draft.proxy_jump, host.proxy_jump);
        assert_eq!(draft.local_forwards, host.local_forwards);
        assert_eq!(draft.remote_forwards, host.remote_forwards);
    }

    #[test]
    fn test_round_trip_flag_asymmetry() {
        let mut host = profile("box");
        host.forward_agent = Some(false);
        host.compression = Some(false);
        host.strict_host_key_checking = Some(false);

        let draft = &decode_hosts(&encode_host(&host))[0];
        // false yes-only flags are not emitted
        assert_eq!(draft.forward_agent, None);
        assert_eq!(draft.compression, None);
        // strict is emitted as `no` and decoded as an explicit false
        assert_eq!(draft.strict_host_key_checking, Some(false));

        host.strict_host_key_checking = None;
        let draft = &decode_hosts(&encode_host(&host))[0];
        assert_eq!(draft.strict_host_key_checking, None);
    }

    #[test]
    fn test_round_trip_many_hosts() {
        let mut a = profile("a");
        a.hostname = "a.example.com".to_string();
        let mut b = profile("b");
        b.hostname = "b.example.com".to_string();
        b.port = 2022;

        let drafts = decode_hosts(&encode_hosts(&[a, b]));
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].hostname, "a.example.com");
        assert_eq!(drafts[1].hostname, "b.example.com");
        assert_eq!(drafts[1].port, 2022);
    }
}
