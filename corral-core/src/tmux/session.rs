//! `tmux` command-line driver

use std::path::Path;
use std::process::Command;

use super::{Multiplexer, PaneInfo, PaneRef, SplitDirection, WindowSpec};
use crate::{Error, Result};

const LIST_FORMAT: &str = "#{window_id}\t#{pane_id}\t#{pane_dead}\t#{pane_dead_status}";

/// Runs tmux commands against one session (or the current one)
#[derive(Debug, Clone, Default)]
pub struct Tmux {
    session: Option<String>,
}

impl Tmux {
    pub fn new(session: Option<String>) -> Self {
        Self { session }
    }

    /// Whether the current process runs inside tmux
    pub fn inside_tmux() -> bool {
        std::env::var_os("TMUX").is_some()
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("tmux")
            .args(args)
            .output()
            .map_err(|e| Error::Multiplexer(format!("failed to run tmux: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Multiplexer(format!(
                "tmux {} failed: {}",
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Shell command for a new window, with scrubbed variables removed
fn window_command(spec: &WindowSpec) -> String {
    if spec.unset_env.is_empty() {
        return spec.command.clone();
    }
    let unset: Vec<String> = spec.unset_env.iter().map(|v| format!("-u {}", v)).collect();
    format!("env {} {}", unset.join(" "), spec.command)
}

fn parse_pane_line(line: &str) -> Option<PaneInfo> {
    let mut fields = line.split('\t');
    let window_id = fields.next()?.to_string();
    let pane_id = fields.next()?.to_string();
    let dead = fields.next()? == "1";
    let exit_status = fields.next().and_then(|s| s.trim().parse().ok());
    Some(PaneInfo {
        window_id,
        pane_id,
        dead,
        exit_status: if dead { exit_status } else { None },
    })
}

impl Multiplexer for Tmux {
    fn new_window(&self, spec: &WindowSpec) -> Result<PaneRef> {
        let cwd = spec.cwd.to_string_lossy();
        let target = self.session.as_ref().map(|s| format!("{}:", s));
        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let command = window_command(spec);

        let mut args = vec!["new-window", "-d", "-P", "-F", "#{window_id} #{pane_id}"];
        if let Some(target) = target.as_deref() {
            args.extend(["-t", target]);
        }
        args.extend(["-n", spec.name.as_str(), "-c", &*cwd]);
        for var in &env {
            args.extend(["-e", var.as_str()]);
        }
        args.push(command.as_str());

        let output = self.run(&args)?;
        let mut ids = output.split_whitespace();
        let (Some(window_id), Some(pane_id)) = (ids.next(), ids.next()) else {
            return Err(Error::Multiplexer(format!(
                "unexpected new-window output: {}",
                output.trim()
            )));
        };

        // Keep dead panes around so the exit status can be read
        self.run(&["set-option", "-w", "-t", window_id, "remain-on-exit", "on"])?;

        tracing::debug!(window_id, pane_id, name = %spec.name, "Opened tmux window");
        Ok(PaneRef {
            window_id: window_id.to_string(),
            pane_id: pane_id.to_string(),
        })
    }

    fn split_pane(
        &self,
        target_pane: &str,
        direction: SplitDirection,
        size_percent: u8,
        cwd: &Path,
        command: &str,
    ) -> Result<String> {
        let flag = match direction {
            SplitDirection::Horizontal => "-h",
            SplitDirection::Vertical => "-v",
        };
        let size = format!("{}%", size_percent.clamp(1, 99));
        let cwd = cwd.to_string_lossy();
        let output = self.run(&[
            "split-window",
            flag,
            "-l",
            size.as_str(),
            "-t",
            target_pane,
            "-c",
            &*cwd,
            "-P",
            "-F",
            "#{pane_id}",
            command,
        ])?;
        Ok(output.trim().to_string())
    }

    fn kill_window(&self, window_id: &str) -> Result<()> {
        self.run(&["kill-window", "-t", window_id]).map(|_| ())
    }

    fn kill_pane(&self, pane_id: &str) -> Result<()> {
        self.run(&["kill-pane", "-t", pane_id]).map(|_| ())
    }

    fn send_keys(&self, pane_id: &str, keys: &[&str]) -> Result<()> {
        let mut args = vec!["send-keys", "-t", pane_id];
        args.extend_from_slice(keys);
        self.run(&args).map(|_| ())
    }

    fn select_window(&self, window_id: &str) -> Result<()> {
        self.run(&["select-window", "-t", window_id]).map(|_| ())
    }

    fn select_pane(&self, pane_id: &str) -> Result<()> {
        self.run(&["select-pane", "-t", pane_id]).map(|_| ())
    }

    fn list_panes(&self) -> Result<Vec<PaneInfo>> {
        let output = self.run(&["list-panes", "-a", "-F", LIST_FORMAT])?;
        Ok(output.lines().filter_map(parse_pane_line).collect())
    }

    fn capture_pane(&self, pane_id: &str, lines: usize) -> Result<String> {
        let start = format!("-{}", lines);
        self.run(&["capture-pane", "-p", "-t", pane_id, "-S", start.as_str()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_pane_line() {
        let live = parse_pane_line("@1\t%3\t0\t").unwrap();
        assert_eq!(live.window_id, "@1");
        assert_eq!(live.pane_id, "%3");
        assert!(!live.dead);
        assert_eq!(live.exit_status, None);

        let dead = parse_pane_line("@2\t%4\t1\t130").unwrap();
        assert!(dead.dead);
        assert_eq!(dead.exit_status, Some(130));

        assert!(parse_pane_line("garbage").is_none());
    }

    #[test]
    fn test_window_command_scrubs_env() {
        let spec = WindowSpec {
            name: "agent-1".to_string(),
            cwd: PathBuf::from("/tmp"),
            command: "claude --settings /s.json".to_string(),
            env: vec![],
            unset_env: vec!["CLAUDECODE".to_string(), "CLAUDE_CODE_ENTRYPOINT".to_string()],
        };
        assert_eq!(
            window_command(&spec),
            "env -u CLAUDECODE -u CLAUDE_CODE_ENTRYPOINT claude --settings /s.json"
        );

        let plain = WindowSpec {
            command: "bash".to_string(),
            unset_env: vec![],
            ..spec
        };
        assert_eq!(window_command(&plain), "bash");
    }
}
