//! Command-line arguments and the optional JSON settings file.

use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::Password;
use mirror_core::layout::LayoutError;
use mirror_core::{DiffPolicy, MirrorLayout, SessionIdentity};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable consulted for the password when `--password-env` is not given.
pub const DEFAULT_PASSWORD_ENV: &str = "MIRROR_PASSWORD";

#[derive(Parser, Debug)]
#[command(name = "mirror-daemon")]
#[command(about = "Mirror local changes in a directory onto a remote shell")]
pub struct Args {
    /// Your user id on the remote machine
    #[arg(short, long)]
    pub user_id: String,

    /// Remote machine domain
    #[arg(short, long)]
    pub remote_domain: String,

    /// Absolute path of the remote directory to mirror
    #[arg(short = 'd', long)]
    pub remote_dir: String,

    /// Number of seconds between each sync
    #[arg(short, long, default_value_t = 5)]
    pub wait_time: u64,

    /// Copy the remote directory into the current directory before syncing
    #[arg(short = 'c', long)]
    pub copy_from_remote: bool,

    /// Transfer the local directory to the remote machine before syncing
    #[arg(short = 't', long)]
    pub transfer_to_remote: bool,

    /// Skip the initial copy; the local directory already matches the remote
    #[arg(short = 'a', long)]
    pub assume_synced: bool,

    /// Reconnect once if the session drops
    #[arg(short, long)]
    pub keep_alive: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Also wake up early when the filesystem reports a change
    #[arg(long)]
    pub watch: bool,

    /// JSON settings file (command file name, temp suffixes)
    #[arg(long, env = "MIRROR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Environment variable holding the remote password
    #[arg(long, default_value = DEFAULT_PASSWORD_ENV)]
    pub password_env: String,

    /// Never prompt for a password; authenticate with keys or the agent
    #[arg(long)]
    pub no_password: bool,
}

/// How the local and remote directories are brought in line before polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialSync {
    CopyFromRemote,
    TransferToRemote,
    AssumeSynced,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Cannot both copy from remote and transfer to remote")]
    ConflictingCopyModes,

    #[error("--assume-synced cannot be combined with a copy mode")]
    AssumeWithCopy,

    #[error(
        "No initial sync mode selected. Invoke with --copy-from-remote, --transfer-to-remote or --assume-synced"
    )]
    MissingSyncMode,

    #[error("Wait time must be at least one second")]
    ZeroWaitTime,

    #[error(transparent)]
    Layout(#[from] LayoutError),
}

impl Args {
    pub fn initial_sync(&self) -> Result<InitialSync, ConfigError> {
        match (self.copy_from_remote, self.transfer_to_remote, self.assume_synced) {
            (true, true, _) => Err(ConfigError::ConflictingCopyModes),
            (true, false, true) | (false, true, true) => Err(ConfigError::AssumeWithCopy),
            (true, false, false) => Ok(InitialSync::CopyFromRemote),
            (false, true, false) => Ok(InitialSync::TransferToRemote),
            (false, false, true) => Ok(InitialSync::AssumeSynced),
            (false, false, false) => Err(ConfigError::MissingSyncMode),
        }
    }

    pub fn layout(&self) -> Result<MirrorLayout, ConfigError> {
        Ok(MirrorLayout::from_remote_dir(&self.remote_dir)?)
    }

    pub fn poll_interval(&self) -> Result<Duration, ConfigError> {
        if self.wait_time == 0 {
            return Err(ConfigError::ZeroWaitTime);
        }
        Ok(Duration::from_secs(self.wait_time))
    }

    /// Identity for the transport.
    ///
    /// The secret comes from `--password-env` if set, otherwise from an
    /// interactive prompt when stdin is a terminal.
    pub fn identity(&self) -> Result<SessionIdentity> {
        self.identity_with(|name| std::env::var(name).ok(), prompt_password)
    }

    pub fn identity_with(
        &self,
        env: impl Fn(&str) -> Option<String>,
        prompt: impl FnOnce() -> Result<Option<String>>,
    ) -> Result<SessionIdentity> {
        let secret = match env(&self.password_env).filter(|s| !s.is_empty()) {
            Some(secret) => Some(secret),
            None if self.no_password => None,
            None => prompt()?,
        };
        Ok(SessionIdentity {
            host: self.remote_domain.clone(),
            user: self.user_id.clone(),
            secret,
            remote_root: self.remote_dir.trim_end_matches('/').to_string(),
        })
    }

    /// Default log filter; `RUST_LOG` overrides it.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "debug,mirror_daemon=debug,mirror_core=debug"
        } else {
            "info,mirror_daemon=info,mirror_core=info"
        }
    }
}

/// Ask for the password on the terminal. An empty answer means key-based auth.
fn prompt_password() -> Result<Option<String>> {
    if !std::io::stdin().is_terminal() {
        return Ok(None);
    }
    let password = Password::new()
        .with_prompt("Enter Password")
        .allow_empty_password(true)
        .interact()
        .context("Failed to read password")?;
    Ok(Some(password).filter(|p| !p.is_empty()))
}

/// Load the diff policy from a JSON settings file, or use defaults.
///
/// Missing fields fall back to their defaults; a file that was named but
/// cannot be read is an error.
pub fn load_policy(path: Option<&Path>) -> Result<DiffPolicy> {
    let Some(path) = path else {
        return Ok(DiffPolicy::default());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file: {:?}", path))?;
    let policy: DiffPolicy = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse settings file: {:?}", path))?;
    tracing::info!("Loaded settings from {:?}", path);
    Ok(policy)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["mirror-daemon", "-u", "dev", "-r", "build.example", "-d", "/srv/proj"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["-a"]);
        assert_eq!(args.wait_time, 5);
        assert!(!args.keep_alive);
        assert_eq!(args.password_env, DEFAULT_PASSWORD_ENV);
        assert_eq!(args.poll_interval().unwrap(), Duration::from_secs(5));
        assert_eq!(args.log_filter(), "info,mirror_daemon=info,mirror_core=info");
    }

    #[test]
    fn test_initial_sync_modes() {
        assert_eq!(parse(&["-c"]).initial_sync(), Ok(InitialSync::CopyFromRemote));
        assert_eq!(
            parse(&["--transfer-to-remote"]).initial_sync(),
            Ok(InitialSync::TransferToRemote)
        );
        assert_eq!(parse(&["-a"]).initial_sync(), Ok(InitialSync::AssumeSynced));
    }

    #[test]
    fn test_initial_sync_conflicts() {
        assert_eq!(
            parse(&["-c", "-t"]).initial_sync(),
            Err(ConfigError::ConflictingCopyModes)
        );
        assert_eq!(parse(&["-c", "-a"]).initial_sync(), Err(ConfigError::AssumeWithCopy));
        assert_eq!(parse(&[]).initial_sync(), Err(ConfigError::MissingSyncMode));
    }

    #[test]
    fn test_layout_and_identity() {
        let args = parse(&["-a", "-k", "-w", "2", "--password-env", "MIRROR_TEST_UNSET_VAR"]);
        let layout = args.layout().unwrap();
        assert_eq!(layout.local_root(), "proj");

        let identity = args.identity_with(|_| None, || Ok(None)).unwrap();
        assert_eq!(identity.to_string(), "dev@build.example");
        assert_eq!(identity.secret, None);
        assert_eq!(identity.remote_root, "/srv/proj");
        assert!(args.keep_alive);
        assert_eq!(args.poll_interval().unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn test_password_from_env_skips_prompt() {
        let args = parse(&["-a"]);
        let identity = args
            .identity_with(
                |name| (name == DEFAULT_PASSWORD_ENV).then(|| "hunter2".to_string()),
                || panic!("prompted although the password was in the environment"),
            )
            .unwrap();
        assert_eq!(identity.secret.as_deref(), Some("hunter2"));
    }

    #[test]
    fn test_password_prompt_when_env_unset() {
        let args = parse(&["-a"]);
        let identity = args
            .identity_with(|_| Some(String::new()), || Ok(Some("typed".to_string())))
            .unwrap();
        assert_eq!(identity.secret.as_deref(), Some("typed"));
    }

    #[test]
    fn test_no_password_never_prompts() {
        let args = parse(&["-a", "--no-password"]);
        let identity = args
            .identity_with(|_| None, || panic!("prompted with --no-password"))
            .unwrap();
        assert_eq!(identity.secret, None);
    }

    #[test]
    fn test_relative_remote_dir_is_rejected() {
        let args = Args::try_parse_from([
            "mirror-daemon", "-u", "dev", "-r", "host", "-d", "proj", "-a",
        ])
        .unwrap();
        assert!(matches!(args.layout(), Err(ConfigError::Layout(_))));
    }

    #[test]
    fn test_zero_wait_time_is_rejected() {
        assert_eq!(parse(&["-a", "-w", "0"]).poll_interval(), Err(ConfigError::ZeroWaitTime));
    }

    #[test]
    fn test_missing_required_args_fail_to_parse() {
        assert!(Args::try_parse_from(["mirror-daemon", "-a"]).is_err());
    }
}
