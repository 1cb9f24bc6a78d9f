use crate::{Error, Result};
use std::env::var;
use std::net::TcpListener;
use std::str::FromStr;
use std::time::Duration;

/// Host the emulator binds to if none is set.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// A placeholder region. Nothing leaves the machine, but the emulator wants one.
pub const DEFAULT_REGION: &str = "local";

/// How long `start()` waits for the emulator to accept connections by default.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(60);

/// The emulator executable and the arguments that select its mode.
/// The template, host, port and region arguments are appended by the session.
#[derive(Debug, Clone, PartialEq)]
pub struct EmulatorCommand {
    /// E.g. `sam`
    pub program: String,
    /// E.g. `["local", "start-api"]`
    pub args: Vec<String>,
}

impl Default for EmulatorCommand {
    fn default() -> Self {
        Self {
            program: "sam".to_owned(),
            args: vec!["local".to_owned(), "start-api".to_owned()],
        }
    }
}

/// Caller-tunable settings of a session.
/// Unset values are resolved when the session is started.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Defaults to a free ephemeral port
    pub port: Option<u16>,
    /// Defaults to [DEFAULT_HOST]
    pub host: Option<String>,
    /// Defaults to [DEFAULT_REGION]
    pub region: Option<String>,
    pub emulator: EmulatorCommand,
    /// Passed to the emulator as is, after all other arguments
    pub extra_args: Vec<String>,
    /// `None` returns from `start()` as soon as the process is spawned
    pub ready_timeout: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            port: None,
            host: None,
            region: None,
            emulator: EmulatorCommand::default(),
            extra_args: Vec::new(),
            ready_timeout: Some(DEFAULT_READY_TIMEOUT),
        }
    }
}

/// Host, port and region the emulator is launched with.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub region: String,
}

impl Endpoint {
    /// E.g. `http://127.0.0.1:3000`
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// E.g. `127.0.0.1:3000`
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl SessionOptions {
    /// Creates options from environment variables, using defaults for anything not set:
    /// - LAMBDA_LOCAL_PORT
    /// - LAMBDA_LOCAL_HOST
    /// - LAMBDA_LOCAL_REGION
    /// - LAMBDA_LOCAL_EMULATOR, e.g. `sam`
    /// - LAMBDA_LOCAL_EMULATOR_ARGS, whitespace separated, e.g. `local start-api`
    /// - LAMBDA_LOCAL_EXTRA_ARGS, whitespace separated, e.g. `--warm-containers EAGER`
    /// - LAMBDA_LOCAL_READY_TIMEOUT_SECS, 0 disables the readiness check
    pub fn from_env() -> Result<Self> {
        let mut options = Self::default();

        if let Ok(port) = var("LAMBDA_LOCAL_PORT") {
            options.port = Some(u16::from_str(port.trim()).map_err(|e| {
                Error::Config(format!("Invalid port in LAMBDA_LOCAL_PORT: {port}. {e}"))
            })?);
        }

        options.host = var("LAMBDA_LOCAL_HOST").ok();
        options.region = var("LAMBDA_LOCAL_REGION").ok();

        if let Ok(program) = var("LAMBDA_LOCAL_EMULATOR") {
            options.emulator.program = program;
        }

        if let Ok(args) = var("LAMBDA_LOCAL_EMULATOR_ARGS") {
            options.emulator.args = split_args(&args);
        }

        if let Ok(args) = var("LAMBDA_LOCAL_EXTRA_ARGS") {
            options.extra_args = split_args(&args);
        }

        if let Ok(secs) = var("LAMBDA_LOCAL_READY_TIMEOUT_SECS") {
            let secs = u64::from_str(secs.trim()).map_err(|e| {
                Error::Config(format!(
                    "Invalid number of seconds in LAMBDA_LOCAL_READY_TIMEOUT_SECS: {secs}. {e}"
                ))
            })?;
            options.ready_timeout = if secs == 0 { None } else { Some(Duration::from_secs(secs)) };
        }

        Ok(options)
    }

    /// Fills in the host, port and region that were not set by the caller.
    /// Looking up a free port requires binding to it briefly, on the host the emulator will use.
    pub fn resolve_endpoint(&self) -> Result<Endpoint> {
        let host = self.host.clone().unwrap_or_else(|| DEFAULT_HOST.to_owned());

        let port = match self.port {
            Some(v) => v,
            None => free_port(&host)?,
        };

        let region = self.region.clone().unwrap_or_else(|| DEFAULT_REGION.to_owned());

        Ok(Endpoint { host, port, region })
    }
}

/// Asks the OS for an unused port on `host`, e.g. `127.0.0.1` or `0.0.0.0`.
/// The port is released before returning, so there is a small window for someone else to grab it.
pub fn free_port(host: &str) -> Result<u16> {
    let listener = TcpListener::bind((host, 0))?;
    Ok(listener.local_addr()?.port())
}

fn split_args(args: &str) -> Vec<String> {
    args.split_whitespace().map(str::to_owned).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_to_loopback_and_a_free_port() {
        let endpoint = SessionOptions::default().resolve_endpoint().unwrap();

        assert_eq!(endpoint.host, "127.0.0.1");
        assert_eq!(endpoint.region, "local");
        assert_ne!(endpoint.port, 0);
        assert_eq!(endpoint.url(), format!("http://127.0.0.1:{}", endpoint.port));
    }

    #[test]
    fn overrides_are_kept() {
        let options = SessionOptions {
            port: Some(3999),
            host: Some("0.0.0.0".to_owned()),
            region: Some("eu-west-1".to_owned()),
            ..Default::default()
        };
        let endpoint = options.resolve_endpoint().unwrap();

        assert_eq!(
            endpoint,
            Endpoint {
                host: "0.0.0.0".to_owned(),
                port: 3999,
                region: "eu-west-1".to_owned()
            }
        );
        assert_eq!(endpoint.authority(), "0.0.0.0:3999");
    }

    #[test]
    fn free_port_is_looked_up_on_the_emulator_host() {
        let options = SessionOptions {
            host: Some("0.0.0.0".to_owned()),
            ..Default::default()
        };
        let endpoint = options.resolve_endpoint().unwrap();
        assert_eq!(endpoint.host, "0.0.0.0");
        assert_ne!(endpoint.port, 0);

        // the port is free on that interface
        TcpListener::bind(("0.0.0.0", endpoint.port)).unwrap();
    }

    #[test]
    fn default_emulator_is_sam_start_api() {
        let options = SessionOptions::default();
        assert_eq!(options.emulator.program, "sam");
        assert_eq!(options.emulator.args, vec!["local", "start-api"]);
        assert_eq!(options.ready_timeout, Some(DEFAULT_READY_TIMEOUT));
    }

    #[test]
    fn args_are_split_on_whitespace() {
        assert_eq!(split_args(" --warm-containers  EAGER\t--debug "), vec!["--warm-containers", "EAGER", "--debug"]);
        assert!(split_args("").is_empty());
    }
}
